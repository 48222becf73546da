//! The mailbox: a fixed window of the image both sides read and write.
//!
//! # Layout (image offset 0xC0, little endian)
//!
//! | Offset | Field          | Width | Written by              |
//! |--------|----------------|-------|-------------------------|
//! | $00    | fb_addr        | 32    | host; console clears    |
//! | $04    | vblank_flag    | 16    | console; host clears    |
//! | $06    | fb_pa          | 16    | host                    |
//! | $08    | fb_pd          | 16    | host                    |
//! | $0A    | fb_height      | 16    | host                    |
//! | $0C    | audio_addr[0]  | 32    | host fills; console clears |
//! | $10    | audio_addr[1]  | 32    | host fills; console clears |
//! | $14    | audio_buf_size | 16    | host                    |
//! | $16    | audio_timer    | 16    | host                    |
//! | $18    | buttons        | 16    | console                 |
//!
//! There are no locks: the console is an independent bus master. Each
//! shared field instead alternates ownership. A zero `fb_addr` or audio
//! slot belongs to the host, a non-zero one to the console. A set
//! `vblank_flag` belongs to the host. All accesses are at least 16 bits
//! wide, the bus's smallest unit, so no field is ever seen half-written
//! except the 32-bit pointers, which only change hands while zero.

use emu_core::{Observable, Value};
use rp2040_dma::DataSize;
use thiserror::Error;

use crate::buttons::Buttons;
use crate::error::CartError;
use crate::image::{BackingImage, BusAddr};

pub const MAILBOX_OFFSET: u32 = 0xC0;
pub const MAILBOX_SIZE: u32 = 0x1C;
pub const MAILBOX_END: u32 = MAILBOX_OFFSET + MAILBOX_SIZE;

pub const FB_ADDR: u32 = 0x00;
pub const VBLANK_FLAG: u32 = 0x04;
pub const FB_PA: u32 = 0x06;
pub const FB_PD: u32 = 0x08;
pub const FB_HEIGHT: u32 = 0x0A;
pub const AUDIO_ADDR: [u32; 2] = [0x0C, 0x10];
pub const AUDIO_BUF_SIZE: u32 = 0x14;
pub const AUDIO_TIMER: u32 = 0x16;
pub const BUTTONS: u32 = 0x18;

pub const SCREEN_WIDTH: u16 = 240;
pub const SCREEN_HEIGHT: u16 = 160;
/// One full-screen 16-bit framebuffer.
pub const FRAMEBUFFER_BYTES: usize = SCREEN_WIDTH as usize * SCREEN_HEIGHT as usize * 2;

/// Console CPU clock, which also drives its timers.
pub const CONSOLE_CLOCK_HZ: u32 = 1 << 24;

/// Affine parameter for 1:1 scale (8.8 fixed point).
pub const SCALE_ONE: u16 = 1 << 8;

/// A side broke the ownership rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HandshakeError {
    #[error("previous framebuffer not yet consumed")]
    FramebufferPending,
    #[error("no framebuffer to consume")]
    NoFramebuffer,
    #[error("null pointer cannot be handed over")]
    NullAddress,
    #[error("audio slot {0} is still full")]
    SlotFull(usize),
    #[error("audio slot {0} is empty")]
    SlotEmpty(usize),
    #[error("there is no audio slot {0}")]
    NoSuchSlot(usize),
}

/// 16-bit access to cartridge memory by byte offset.
///
/// The host reaches the image directly; the console goes through bus
/// transactions, which is why even loads take `&mut self`.
pub trait MailboxMemory {
    fn load_u16(&mut self, offset: u32) -> u16;
    fn store_u16(&mut self, offset: u32, value: u16);

    /// Two halfword loads, low half first.
    fn load_u32(&mut self, offset: u32) -> u32 {
        let lo = self.load_u16(offset);
        let hi = self.load_u16(offset + 2);
        u32::from(lo) | u32::from(hi) << 16
    }

    /// Two halfword stores, low half first.
    fn store_u32(&mut self, offset: u32, value: u32) {
        self.store_u16(offset, value as u16);
        self.store_u16(offset + 2, (value >> 16) as u16);
    }
}

impl MailboxMemory for BackingImage {
    fn load_u16(&mut self, offset: u32) -> u16 {
        self.read(offset, DataSize::HalfWord).map_or(0, |v| v as u16)
    }

    fn store_u16(&mut self, offset: u32, value: u16) {
        self.write(offset, DataSize::HalfWord, u32::from(value));
    }

    fn load_u32(&mut self, offset: u32) -> u32 {
        self.read(offset, DataSize::Word).unwrap_or(0)
    }

    fn store_u32(&mut self, offset: u32, value: u32) {
        self.write(offset, DataSize::Word, value);
    }
}

impl<M: MailboxMemory + ?Sized> MailboxMemory for &mut M {
    fn load_u16(&mut self, offset: u32) -> u16 {
        (**self).load_u16(offset)
    }

    fn store_u16(&mut self, offset: u32, value: u16) {
        (**self).store_u16(offset, value);
    }

    fn load_u32(&mut self, offset: u32) -> u32 {
        (**self).load_u32(offset)
    }

    fn store_u32(&mut self, offset: u32, value: u32) {
        (**self).store_u32(offset, value);
    }
}

fn slot_offset(slot: usize) -> Result<u32, HandshakeError> {
    AUDIO_ADDR
        .get(slot)
        .map(|field| MAILBOX_OFFSET + field)
        .ok_or(HandshakeError::NoSuchSlot(slot))
}

fn nonzero(addr: u32) -> Option<BusAddr> {
    (addr != 0).then_some(BusAddr(addr))
}

/// Screen scaling and height of the framebuffers the host publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Display {
    /// Horizontal affine step, 8.8 fixed point (`SCALE_ONE` = 1:1).
    pub pa: u16,
    /// Vertical affine step, 8.8 fixed point.
    pub pd: u16,
    /// Framebuffer lines the console copies.
    pub height: u16,
}

impl Display {
    /// 1:1 scale, `height` lines.
    #[must_use]
    pub const fn unscaled(height: u16) -> Self {
        Self {
            pa: SCALE_ONE,
            pd: SCALE_ONE,
            height,
        }
    }

    /// Stretch a `width` x `height` framebuffer over the whole screen.
    /// The framebuffer keeps the screen's 240-pixel line pitch.
    #[must_use]
    pub const fn stretched(width: u16, height: u16) -> Self {
        Self {
            pa: ((width as u32 * SCALE_ONE as u32) / SCREEN_WIDTH as u32) as u16,
            pd: ((height as u32 * SCALE_ONE as u32) / SCREEN_HEIGHT as u32) as u16,
            height,
        }
    }

    /// Size of a framebuffer for this display.
    #[must_use]
    pub const fn framebuffer_bytes(&self) -> usize {
        SCREEN_WIDTH as usize * self.height as usize * 2
    }
}

impl Default for Display {
    fn default() -> Self {
        Self::unscaled(SCREEN_HEIGHT)
    }
}

/// Sample rate and buffer length of the audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    sample_rate: u32,
    buf_size: u16,
}

impl AudioFormat {
    /// `buf_size` is in 8-bit samples and must be a non-zero multiple of
    /// 16: the console's sound DMA moves 16 samples at a time.
    pub fn new(sample_rate: u32, buf_size: u16) -> Result<Self, CartError> {
        if buf_size == 0 || buf_size % 16 != 0 {
            return Err(CartError::AudioBufferSize(buf_size));
        }
        let period = CONSOLE_CLOCK_HZ.checked_div(sample_rate).unwrap_or(0);
        if period == 0 || period > 0xFFFF {
            return Err(CartError::SampleRate(sample_rate));
        }
        Ok(Self {
            sample_rate,
            buf_size,
        })
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub const fn buf_size(&self) -> u16 {
        self.buf_size
    }

    /// Console timer reload value: overflows once per sample.
    #[must_use]
    pub const fn timer_reload(&self) -> u16 {
        (0x10000 - CONSOLE_CLOCK_HZ / self.sample_rate) as u16
    }

    /// Console cycles between samples for a timer reload value.
    #[must_use]
    pub const fn sample_period(timer_reload: u16) -> u32 {
        0x10000 - timer_reload as u32
    }
}

/// A framebuffer handed to the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FramebufferRequest {
    pub addr: BusAddr,
    pub display: Display,
}

/// Host side of the mailbox.
pub struct HostMailbox<M: MailboxMemory> {
    mem: M,
}

impl<M: MailboxMemory> HostMailbox<M> {
    pub fn new(mem: M) -> Self {
        Self { mem }
    }

    fn load_u16(&mut self, field: u32) -> u16 {
        self.mem.load_u16(MAILBOX_OFFSET + field)
    }

    fn store_u16(&mut self, field: u32, value: u16) {
        self.mem.store_u16(MAILBOX_OFFSET + field, value);
    }

    /// Hand a framebuffer to the console. Refused while the previous one
    /// has not been consumed.
    pub fn publish_framebuffer(&mut self, addr: BusAddr) -> Result<(), HandshakeError> {
        if addr.0 == 0 {
            return Err(HandshakeError::NullAddress);
        }
        if self.framebuffer_pending() {
            return Err(HandshakeError::FramebufferPending);
        }
        self.mem.store_u32(MAILBOX_OFFSET + FB_ADDR, addr.0);
        Ok(())
    }

    pub fn framebuffer_pending(&mut self) -> bool {
        self.mem.load_u32(MAILBOX_OFFSET + FB_ADDR) != 0
    }

    /// Consume the vblank signal: `true` once per console frame.
    pub fn take_vblank(&mut self) -> bool {
        if self.load_u16(VBLANK_FLAG) == 0 {
            return false;
        }
        self.store_u16(VBLANK_FLAG, 0);
        true
    }

    /// Hand an audio buffer to the console through an empty slot.
    pub fn fill_audio_slot(&mut self, slot: usize, addr: BusAddr) -> Result<(), HandshakeError> {
        let offset = slot_offset(slot)?;
        if addr.0 == 0 {
            return Err(HandshakeError::NullAddress);
        }
        if self.mem.load_u32(offset) != 0 {
            return Err(HandshakeError::SlotFull(slot));
        }
        self.mem.store_u32(offset, addr.0);
        Ok(())
    }

    /// The buffer in a slot, `None` while it is empty.
    pub fn audio_slot(&mut self, slot: usize) -> Result<Option<BusAddr>, HandshakeError> {
        let offset = slot_offset(slot)?;
        Ok(nonzero(self.mem.load_u32(offset)))
    }

    pub fn buttons(&mut self) -> Buttons {
        Buttons::decode(self.load_u16(BUTTONS))
    }

    pub fn set_display(&mut self, display: Display) {
        self.store_u16(FB_PA, display.pa);
        self.store_u16(FB_PD, display.pd);
        self.store_u16(FB_HEIGHT, display.height);
    }

    pub fn set_audio_format(&mut self, format: AudioFormat) {
        self.store_u16(AUDIO_BUF_SIZE, format.buf_size());
        self.store_u16(AUDIO_TIMER, format.timer_reload());
    }

    pub fn snapshot(&mut self) -> MailboxSnapshot {
        MailboxSnapshot::read(&mut self.mem)
    }
}

/// Console side of the mailbox.
pub struct ConsoleMailbox<M: MailboxMemory> {
    mem: M,
}

impl<M: MailboxMemory> ConsoleMailbox<M> {
    pub fn new(mem: M) -> Self {
        Self { mem }
    }

    fn load_u16(&mut self, field: u32) -> u16 {
        self.mem.load_u16(MAILBOX_OFFSET + field)
    }

    fn store_u16(&mut self, field: u32, value: u16) {
        self.mem.store_u16(MAILBOX_OFFSET + field, value);
    }

    pub fn set_vblank(&mut self) {
        self.store_u16(VBLANK_FLAG, 1);
    }

    pub fn publish_buttons(&mut self, buttons: Buttons) {
        self.store_u16(BUTTONS, buttons.encode());
    }

    /// The framebuffer waiting to be copied, with the display settings to
    /// copy it with.
    pub fn pending_framebuffer(&mut self) -> Option<FramebufferRequest> {
        let addr = nonzero(self.mem.load_u32(MAILBOX_OFFSET + FB_ADDR))?;
        let display = Display {
            pa: self.load_u16(FB_PA),
            pd: self.load_u16(FB_PD),
            height: self.load_u16(FB_HEIGHT),
        };
        Some(FramebufferRequest { addr, display })
    }

    /// Mark the pending framebuffer consumed, giving the field back to the
    /// host.
    pub fn take_framebuffer(&mut self) -> Result<(), HandshakeError> {
        if self.mem.load_u32(MAILBOX_OFFSET + FB_ADDR) == 0 {
            return Err(HandshakeError::NoFramebuffer);
        }
        self.mem.store_u32(MAILBOX_OFFSET + FB_ADDR, 0);
        Ok(())
    }

    pub fn audio_slot(&mut self, slot: usize) -> Result<Option<BusAddr>, HandshakeError> {
        let offset = slot_offset(slot)?;
        Ok(nonzero(self.mem.load_u32(offset)))
    }

    /// Empty a full slot, returning the buffer it held.
    pub fn consume_audio_slot(&mut self, slot: usize) -> Result<BusAddr, HandshakeError> {
        let offset = slot_offset(slot)?;
        let addr = nonzero(self.mem.load_u32(offset)).ok_or(HandshakeError::SlotEmpty(slot))?;
        self.mem.store_u32(offset, 0);
        Ok(addr)
    }

    /// `(buf_size, timer_reload)` if the host configured audio.
    pub fn audio_format(&mut self) -> Option<(u16, u16)> {
        let timer = self.load_u16(AUDIO_TIMER);
        (timer != 0).then(|| (self.load_u16(AUDIO_BUF_SIZE), timer))
    }
}

/// Every mailbox field at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MailboxSnapshot {
    pub fb_addr: u32,
    pub vblank_flag: u16,
    pub fb_pa: u16,
    pub fb_pd: u16,
    pub fb_height: u16,
    pub audio_addr: [u32; 2],
    pub audio_buf_size: u16,
    pub audio_timer: u16,
    pub buttons: u16,
}

impl MailboxSnapshot {
    pub fn read<M: MailboxMemory + ?Sized>(mem: &mut M) -> Self {
        let at = |field: u32| MAILBOX_OFFSET + field;
        Self {
            fb_addr: mem.load_u32(at(FB_ADDR)),
            vblank_flag: mem.load_u16(at(VBLANK_FLAG)),
            fb_pa: mem.load_u16(at(FB_PA)),
            fb_pd: mem.load_u16(at(FB_PD)),
            fb_height: mem.load_u16(at(FB_HEIGHT)),
            audio_addr: [
                mem.load_u32(at(AUDIO_ADDR[0])),
                mem.load_u32(at(AUDIO_ADDR[1])),
            ],
            audio_buf_size: mem.load_u16(at(AUDIO_BUF_SIZE)),
            audio_timer: mem.load_u16(at(AUDIO_TIMER)),
            buttons: mem.load_u16(at(BUTTONS)),
        }
    }

    /// Read straight from the host's image, without a mutable borrow.
    #[must_use]
    pub fn from_image(image: &BackingImage) -> Self {
        let half = |field: u32| image.read_u16(MAILBOX_OFFSET + field).unwrap_or(0);
        let word = |field: u32| image.read_u32(MAILBOX_OFFSET + field).unwrap_or(0);
        Self {
            fb_addr: word(FB_ADDR),
            vblank_flag: half(VBLANK_FLAG),
            fb_pa: half(FB_PA),
            fb_pd: half(FB_PD),
            fb_height: half(FB_HEIGHT),
            audio_addr: [word(AUDIO_ADDR[0]), word(AUDIO_ADDR[1])],
            audio_buf_size: half(AUDIO_BUF_SIZE),
            audio_timer: half(AUDIO_TIMER),
            buttons: half(BUTTONS),
        }
    }
}

impl Observable for MailboxSnapshot {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "fb_addr" => Some(Value::U32(self.fb_addr)),
            "vblank_flag" => Some(Value::U16(self.vblank_flag)),
            "fb_pa" => Some(Value::U16(self.fb_pa)),
            "fb_pd" => Some(Value::U16(self.fb_pd)),
            "fb_height" => Some(Value::U16(self.fb_height)),
            "audio_addr.0" => Some(Value::U32(self.audio_addr[0])),
            "audio_addr.1" => Some(Value::U32(self.audio_addr[1])),
            "audio_buf_size" => Some(Value::U16(self.audio_buf_size)),
            "audio_timer" => Some(Value::U16(self.audio_timer)),
            "buttons" => Some(Value::U16(self.buttons)),
            "buttons.pressed" => Some(Buttons::decode(self.buttons).to_string().into()),
            _ => None,
        }
    }

    fn query_paths(&self) -> Vec<String> {
        [
            "fb_addr",
            "vblank_flag",
            "fb_pa",
            "fb_pd",
            "fb_height",
            "audio_addr.0",
            "audio_addr.1",
            "audio_buf_size",
            "audio_timer",
            "buttons",
            "buttons.pressed",
        ]
        .iter()
        .map(|s| (*s).to_owned())
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buttons::Button;

    fn image() -> BackingImage {
        BackingImage::new(0x1000).expect("valid capacity")
    }

    #[test]
    fn field_offsets_are_wire_exact() {
        let mut image = image();
        {
            let mut host = HostMailbox::new(&mut image);
            host.publish_framebuffer(BusAddr(0x0800_1000)).expect("empty");
            host.set_display(Display::unscaled(160));
            host.set_audio_format(AudioFormat::new(32768, 544).expect("valid"));
            host.fill_audio_slot(1, BusAddr(0x0800_2000)).expect("empty");
        }
        ConsoleMailbox::new(&mut image).publish_buttons(Buttons::decode(0x3EF));
        let bytes = &image.as_bytes()[MAILBOX_OFFSET as usize..MAILBOX_END as usize];
        assert_eq!(&bytes[0x00..0x04], &[0x00, 0x10, 0x00, 0x08]);
        assert_eq!(&bytes[0x06..0x0C], &[0x00, 0x01, 0x00, 0x01, 0xA0, 0x00]);
        assert_eq!(&bytes[0x0C..0x14], &[0, 0, 0, 0, 0x00, 0x20, 0x00, 0x08]);
        assert_eq!(&bytes[0x14..0x18], &[0x20, 0x02, 0x00, 0xFE]);
        assert_eq!(&bytes[0x18..0x1A], &[0xEF, 0x03]);
    }

    #[test]
    fn framebuffer_write_then_wait_for_clear() {
        let mut image = image();
        HostMailbox::new(&mut image)
            .publish_framebuffer(BusAddr(0x0800_1000))
            .expect("empty");
        assert_eq!(
            HostMailbox::new(&mut image).publish_framebuffer(BusAddr(0x0800_2000)),
            Err(HandshakeError::FramebufferPending)
        );
        let mut console = ConsoleMailbox::new(&mut image);
        let request = console.pending_framebuffer().expect("pending");
        assert_eq!(request.addr, BusAddr(0x0800_1000));
        console.take_framebuffer().expect("pending");
        assert_eq!(console.take_framebuffer(), Err(HandshakeError::NoFramebuffer));
        HostMailbox::new(&mut image)
            .publish_framebuffer(BusAddr(0x0800_2000))
            .expect("consumed");
    }

    #[test]
    fn vblank_is_one_shot() {
        let mut image = image();
        assert!(!HostMailbox::new(&mut image).take_vblank());
        ConsoleMailbox::new(&mut image).set_vblank();
        let mut host = HostMailbox::new(&mut image);
        assert!(host.take_vblank());
        assert!(!host.take_vblank());
    }

    #[test]
    fn audio_slots_refuse_overwrite_and_empty_consume() {
        let mut image = image();
        let mut host = HostMailbox::new(&mut image);
        host.fill_audio_slot(0, BusAddr(0x0800_0400)).expect("empty");
        assert_eq!(
            host.fill_audio_slot(0, BusAddr(0x0800_0800)),
            Err(HandshakeError::SlotFull(0))
        );
        assert_eq!(host.fill_audio_slot(2, BusAddr(1)), Err(HandshakeError::NoSuchSlot(2)));
        let mut console = ConsoleMailbox::new(&mut image);
        assert_eq!(console.consume_audio_slot(0), Ok(BusAddr(0x0800_0400)));
        assert_eq!(console.consume_audio_slot(0), Err(HandshakeError::SlotEmpty(0)));
        assert_eq!(console.consume_audio_slot(1), Err(HandshakeError::SlotEmpty(1)));
    }

    #[test]
    fn buttons_are_a_live_snapshot() {
        let mut image = image();
        let held: Buttons = [Button::Up, Button::B].into_iter().collect();
        ConsoleMailbox::new(&mut image).publish_buttons(held);
        assert_eq!(HostMailbox::new(&mut image).buttons(), held);
        ConsoleMailbox::new(&mut image).publish_buttons(Buttons::NONE);
        assert_eq!(HostMailbox::new(&mut image).buttons(), Buttons::NONE);
    }

    #[test]
    fn audio_format_timer_and_buffer_rules() {
        let format = AudioFormat::new(32768, 544).expect("valid");
        assert_eq!(format.timer_reload(), 0xFE00);
        assert_eq!(AudioFormat::sample_period(format.timer_reload()), 512);
        assert_eq!(AudioFormat::new(32768, 540), Err(CartError::AudioBufferSize(540)));
        assert_eq!(AudioFormat::new(32768, 0), Err(CartError::AudioBufferSize(0)));
        assert_eq!(AudioFormat::new(100, 16), Err(CartError::SampleRate(100)));
        assert_eq!(AudioFormat::new(0, 16), Err(CartError::SampleRate(0)));
    }

    #[test]
    fn display_scaling() {
        assert_eq!(Display::default(), Display::unscaled(160));
        let half = Display::stretched(120, 80);
        assert_eq!((half.pa, half.pd), (0x80, 0x80));
        assert_eq!(half.framebuffer_bytes(), 240 * 80 * 2);
    }
}
