//! Bitmap-mode display: a 240×160 BGR555 frame shown through the BG2
//! affine scale.

use gba_cart::mailbox::{SCALE_ONE, SCREEN_HEIGHT, SCREEN_WIDTH};
use gba_cart::Display;

pub const WIDTH: usize = SCREEN_WIDTH as usize;
pub const HEIGHT: usize = SCREEN_HEIGHT as usize;

pub struct Screen {
    vram: Vec<u16>,
    display: Display,
    frames: u64,
}

impl Default for Screen {
    fn default() -> Self {
        Self::new()
    }
}

impl Screen {
    #[must_use]
    pub fn new() -> Self {
        Self {
            vram: vec![0; WIDTH * HEIGHT],
            display: Display::default(),
            frames: 0,
        }
    }

    /// One VRAM line.
    pub fn line_mut(&mut self, y: usize) -> &mut [u16] {
        let start = y.min(HEIGHT - 1) * WIDTH;
        &mut self.vram[start..start + WIDTH]
    }

    #[must_use]
    pub fn vram(&self) -> &[u16] {
        &self.vram
    }

    /// Latch the scale a copied frame was published with.
    pub fn present(&mut self, display: Display) {
        self.display = display;
        self.frames += 1;
    }

    #[must_use]
    pub fn display(&self) -> Display {
        self.display
    }

    /// Frames presented so far.
    #[must_use]
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// The colour at screen position `(x, y)` after scaling. Outside the
    /// bitmap the backdrop (black) shows.
    #[must_use]
    pub fn pixel(&self, x: usize, y: usize) -> u16 {
        let pa = usize::from(self.display.pa);
        let pd = usize::from(self.display.pd);
        let tx = x * pa / usize::from(SCALE_ONE);
        let ty = y * pd / usize::from(SCALE_ONE);
        if tx < WIDTH && ty < usize::from(self.display.height).min(HEIGHT) {
            self.vram[ty * WIDTH + tx]
        } else {
            0
        }
    }

    /// The visible screen as ARGB32.
    #[must_use]
    pub fn to_argb(&self) -> Vec<u32> {
        let mut out = Vec::with_capacity(WIDTH * HEIGHT);
        for y in 0..HEIGHT {
            for x in 0..WIDTH {
                out.push(bgr555_to_argb(self.pixel(x, y)));
            }
        }
        out
    }
}

/// Expand a BGR555 colour to opaque ARGB32.
#[must_use]
pub fn bgr555_to_argb(colour: u16) -> u32 {
    let expand = |c: u16| {
        let c = u32::from(c & 0x1F);
        (c << 3) | (c >> 2)
    };
    let r = expand(colour);
    let g = expand(colour >> 5);
    let b = expand(colour >> 10);
    0xFF00_0000 | r << 16 | g << 8 | b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colour_expansion() {
        assert_eq!(bgr555_to_argb(0x7FFF), 0xFFFF_FFFF);
        assert_eq!(bgr555_to_argb(0x001F), 0xFFFF_0000);
        assert_eq!(bgr555_to_argb(0x7C00), 0xFF00_00FF);
    }

    #[test]
    fn half_scale_stretches_the_bitmap() {
        let mut screen = Screen::new();
        screen.line_mut(1)[2] = 0x1234;
        screen.present(Display {
            pa: SCALE_ONE / 2,
            pd: SCALE_ONE / 2,
            height: 80,
        });
        assert_eq!(screen.pixel(4, 2), 0x1234);
        assert_eq!(screen.pixel(5, 3), 0x1234);
        assert_eq!(screen.pixel(2, 1), 0);
    }

    #[test]
    fn lines_past_the_copied_height_are_backdrop() {
        let mut screen = Screen::new();
        screen.line_mut(100).fill(0x7FFF);
        screen.present(Display::unscaled(100));
        assert_eq!(screen.pixel(0, 100), 0);
        screen.present(Display::unscaled(101));
        assert_eq!(screen.pixel(0, 100), 0x7FFF);
    }
}
