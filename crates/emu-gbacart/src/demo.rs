//! Demo host firmware: a crosshair steered with the d-pad, and a steady
//! tone.
//!
//! The framebuffer and both audio buffers live in the image right after
//! the program. The crosshair moves one pixel per console vblank while a
//! direction is held, and the framebuffer is repainted and handed over
//! again whenever the console has consumed the previous one.

use gba_cart::mailbox::{SCREEN_HEIGHT, SCREEN_WIDTH};
use gba_cart::{
    AudioFormat, BackingImage, BusAddr, Button, Buttons, CartError, Display, HostApp, HostMailbox,
    untranslate,
};
use gba_console::header::{HEADER_LEN, Header};
use tracing::{info, trace, warn};

pub const TITLE: &str = "CARTDEMO";
pub const GAME_CODE: &str = "CDMO";

pub const SAMPLE_RATE: u32 = 32_768;
/// Samples per audio buffer.
pub const BUF_SIZE: u16 = 544;
/// Samples per tone period (1024 Hz); a buffer holds 17 whole periods.
const TONE_PERIOD: u32 = 32;
const TONE_AMPLITUDE: f64 = 96.0;

const BACKGROUND: u16 = 0x2800;
const CROSSHAIR: u16 = 0x7FFF;
/// Arm length either side of the centre.
const ARM: u16 = 12;

/// A program image with a valid header and nothing else.
#[must_use]
pub fn image() -> Vec<u8> {
    let mut rom = vec![0; HEADER_LEN];
    Header::write(&mut rom, TITLE, GAME_CODE);
    rom
}

/// One buffer of signed 8-bit sine samples.
#[must_use]
pub fn tone() -> Vec<u8> {
    (0..u32::from(BUF_SIZE))
        .map(|i| {
            let phase = f64::from(i % TONE_PERIOD) / f64::from(TONE_PERIOD);
            let sample = (phase * std::f64::consts::TAU).sin() * TONE_AMPLITUDE;
            sample.round() as i8 as u8
        })
        .collect()
}

pub struct DemoHost {
    display: Display,
    framebuffer: Option<BusAddr>,
    audio: [Option<BusAddr>; 2],
    x: u16,
    y: u16,
    vblanks: u64,
    published: u64,
}

impl Default for DemoHost {
    fn default() -> Self {
        Self::new(SCREEN_HEIGHT)
    }
}

impl DemoHost {
    /// A demo drawing `height` framebuffer lines (clamped to the screen).
    #[must_use]
    pub fn new(height: u16) -> Self {
        let height = height.clamp(1, SCREEN_HEIGHT);
        Self {
            display: Display::unscaled(height),
            framebuffer: None,
            audio: [None; 2],
            x: SCREEN_WIDTH / 2,
            y: height / 2,
            vblanks: 0,
            published: 0,
        }
    }

    #[must_use]
    pub fn cursor(&self) -> (u16, u16) {
        (self.x, self.y)
    }

    #[must_use]
    pub fn vblanks(&self) -> u64 {
        self.vblanks
    }

    /// Framebuffers handed to the console so far.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published
    }

    #[must_use]
    pub fn framebuffer(&self) -> Option<BusAddr> {
        self.framebuffer
    }

    fn steer(&mut self, keys: Buttons) {
        if keys.is_pressed(Button::Left) {
            self.x = self.x.saturating_sub(1);
        }
        if keys.is_pressed(Button::Right) {
            self.x = (self.x + 1).min(SCREEN_WIDTH - 1);
        }
        if keys.is_pressed(Button::Up) {
            self.y = self.y.saturating_sub(1);
        }
        if keys.is_pressed(Button::Down) {
            self.y = (self.y + 1).min(self.display.height - 1);
        }
    }

    fn paint(&self, image: &mut BackingImage) -> Result<(), CartError> {
        let Some(fb) = self.framebuffer else {
            return Ok(());
        };
        let host = image
            .to_host(fb)
            .ok_or(CartError::OutsideImage(untranslate(fb).0))?;
        let width = usize::from(SCREEN_WIDTH);
        let mut pixels = vec![BACKGROUND; width * usize::from(self.display.height)];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            let x = (i % width) as u16;
            let y = (i / width) as u16;
            let vertical = x == self.x && y.abs_diff(self.y) <= ARM;
            let horizontal = y == self.y && x.abs_diff(self.x) <= ARM;
            if vertical || horizontal {
                *pixel = CROSSHAIR;
            }
        }
        image.write_halfwords(host, &pixels)
    }
}

impl HostApp for DemoHost {
    fn init(&mut self, image: &mut BackingImage) -> Result<(), CartError> {
        let fb = image.reserve(self.display.framebuffer_bytes(), 4)?;
        self.framebuffer = Some(image.to_bus(fb)?);

        let samples = tone();
        for slot in &mut self.audio {
            let buffer = image.reserve(samples.len(), 4)?;
            image.write_bytes(buffer, &samples)?;
            *slot = Some(image.to_bus(buffer)?);
        }

        self.paint(image)?;
        let mut mailbox = HostMailbox::new(&mut *image);
        mailbox.set_display(self.display);
        mailbox.set_audio_format(AudioFormat::new(SAMPLE_RATE, BUF_SIZE)?);
        if let Some(fb) = self.framebuffer {
            mailbox.publish_framebuffer(fb)?;
            self.published += 1;
        }
        info!(
            height = self.display.height,
            free = image.free(),
            "demo host initialised"
        );
        Ok(())
    }

    fn update(&mut self, image: &mut BackingImage) {
        let mut mailbox = HostMailbox::new(&mut *image);
        for (slot, buffer) in self.audio.iter().enumerate() {
            let Some(buffer) = *buffer else { continue };
            if mailbox.fill_audio_slot(slot, buffer).is_ok() {
                trace!(slot, "audio slot refilled");
            }
        }

        let keys = mailbox.buttons();
        if !mailbox.take_vblank() {
            return;
        }
        self.vblanks += 1;
        self.steer(keys);
        if mailbox.framebuffer_pending() {
            return;
        }

        if let Err(e) = self.paint(image) {
            warn!(%e, "framebuffer not painted");
            return;
        }
        let Some(fb) = self.framebuffer else { return };
        match HostMailbox::new(image).publish_framebuffer(fb) {
            Ok(()) => self.published += 1,
            Err(e) => warn!(%e, "framebuffer not published"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gba_cart::{IMAGE_BASE, MailboxSnapshot};

    fn initialised(height: u16) -> (DemoHost, BackingImage) {
        let mut image = BackingImage::with_program(256 * 1024, &image()).expect("image fits");
        let mut host = DemoHost::new(height);
        host.init(&mut image).expect("buffers fit");
        (host, image)
    }

    #[test]
    fn demo_image_carries_a_valid_header() {
        let header = Header::parse(&image());
        assert!(header.valid);
        assert_eq!(header.title, TITLE);
        assert_eq!(header.game_code, GAME_CODE);
    }

    #[test]
    fn tone_repeats_every_period() {
        let samples = tone();
        assert_eq!(samples.len(), usize::from(BUF_SIZE));
        assert_eq!(samples[0], 0);
        assert_eq!(samples[8] as i8, 96);
        assert_eq!(samples[24] as i8, -96);
        assert_eq!(samples[..32], samples[32..64]);
    }

    #[test]
    fn init_publishes_the_first_frame_and_the_format() {
        let (host, image) = initialised(160);
        let mailbox = MailboxSnapshot::from_image(&image);
        assert_eq!(Some(BusAddr(mailbox.fb_addr)), host.framebuffer());
        assert_eq!(mailbox.fb_height, 160);
        assert_eq!(mailbox.audio_buf_size, BUF_SIZE);
        assert_eq!(mailbox.audio_timer, 0xFE00);
        assert_eq!(host.published(), 1);

        // Buffers sit after the program and the mailbox, in the bus window.
        let fb = host.framebuffer().expect("reserved");
        let host_fb = image.to_host(fb).expect("inside the image");
        assert!(host_fb.0 >= IMAGE_BASE + 0xDC);
    }

    #[test]
    fn crosshair_starts_centred() {
        let (host, image) = initialised(160);
        assert_eq!(host.cursor(), (120, 80));
        let offset = untranslate(host.framebuffer().expect("reserved")).0 - IMAGE_BASE;
        let at = |x: u32, y: u32| image.read_u16(offset + (y * 240 + x) * 2);
        assert_eq!(at(120, 80), Some(CROSSHAIR));
        assert_eq!(at(120, 80 - 12), Some(CROSSHAIR));
        assert_eq!(at(120 + 13, 80), Some(BACKGROUND));
        assert_eq!(at(0, 0), Some(BACKGROUND));
    }

    #[test]
    fn cursor_moves_once_per_vblank_and_stays_on_screen() {
        let mut host = DemoHost::new(8);
        let left_up: Buttons = [Button::Left, Button::Up].into_iter().collect();
        for _ in 0..10 {
            host.steer(left_up);
        }
        assert_eq!(host.cursor(), (110, 0));
        let down = [Button::Down].into_iter().collect();
        for _ in 0..20 {
            host.steer(down);
        }
        assert_eq!(host.cursor(), (110, 7));
    }

    #[test]
    fn update_waits_for_vblank_and_a_free_field() {
        let (mut host, mut image) = initialised(8);
        host.update(&mut image);
        assert_eq!(host.vblanks(), 0);
        assert_ne!(MailboxSnapshot::from_image(&image).audio_addr, [0, 0]);

        // Vblank with the framebuffer still pending: count it, don't publish.
        gba_cart::ConsoleMailbox::new(&mut image).set_vblank();
        host.update(&mut image);
        assert_eq!(host.vblanks(), 1);
        assert_eq!(host.published(), 1);

        let mut console = gba_cart::ConsoleMailbox::new(&mut image);
        console.take_framebuffer().expect("pending");
        console.set_vblank();
        host.update(&mut image);
        assert_eq!(host.vblanks(), 2);
        assert_eq!(host.published(), 2);
    }
}
