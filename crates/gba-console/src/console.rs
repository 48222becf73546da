//! The console program that talks to the cartridge through the mailbox.

use emu_core::{Observable, Tickable, Value};
use gba_cart::{BusAddr, Button, Buttons, ConsoleMailbox, HandshakeError};
use tracing::{debug, warn};

use crate::audio::{Audio, CHUNK};
use crate::bus::CartBus;
use crate::config::ConsoleConfig;
use crate::header::{HEADER_LEN, Header};
use crate::screen::{HEIGHT, Screen, WIDTH};
use crate::slot::CartSlot;

/// Bytes per framebuffer line.
const LINE_BYTES: u32 = WIDTH as u32 * 2;

/// A console running the mailbox client each frame.
///
/// Per frame: publish the keys, start audio once the host has filled the
/// first slot, copy a pending framebuffer and give the field back, raise
/// the vblank flag, then wait for the next vblank while the sound FIFO
/// keeps pulling samples.
pub struct Console<S: CartSlot> {
    bus: CartBus<S>,
    keys: Buttons,
    screen: Screen,
    audio: Audio,
    header: Option<Header>,
    frame: u64,
    next_vblank: u64,
    /// Frames whose work ran past the next vblank.
    overruns: u64,
    /// Framebuffer pointers outside the cartridge window.
    bad_pointers: u64,
}

impl<S: CartSlot> Console<S> {
    pub fn new(slot: S, config: ConsoleConfig) -> Self {
        Self {
            bus: CartBus::new(slot, config),
            keys: Buttons::NONE,
            screen: Screen::new(),
            audio: Audio::default(),
            header: None,
            frame: 0,
            next_vblank: config.frame_ticks,
            overruns: 0,
            bad_pointers: 0,
        }
    }

    /// Read the cartridge header the way the boot ROM does.
    pub fn boot(&mut self) -> &Header {
        let mut words = vec![0u16; HEADER_LEN / 2];
        self.bus.read_burst(0, &mut words);
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        let header = Header::parse(&bytes);
        debug!(title = %header.title, valid = header.valid, "cartridge header");
        self.header.insert(header)
    }

    /// Run one frame of the mailbox client.
    pub fn run_frame(&mut self) {
        if self.bus.is_powered() {
            self.frame_work();
        }
        let now = self.bus.ticks();
        if now >= self.next_vblank {
            self.overruns += 1;
            let frame_ticks = self.bus.config().frame_ticks.max(1);
            self.next_vblank += (now - self.next_vblank) / frame_ticks * frame_ticks + frame_ticks;
        }
        self.wait_until(self.next_vblank);
        self.next_vblank += self.bus.config().frame_ticks;
        self.frame += 1;
    }

    pub fn run_frames(&mut self, frames: u64) {
        for _ in 0..frames {
            self.run_frame();
        }
    }

    fn frame_work(&mut self) {
        let keys = self.keys;
        let mut mailbox = ConsoleMailbox::new(&mut self.bus);
        mailbox.publish_buttons(keys);

        if !self.audio.is_playing() {
            if let Ok(Some(first)) = mailbox.audio_slot(0) {
                let (buf_size, timer) = mailbox.audio_format().unwrap_or((0, 0));
                self.start_audio(first, buf_size, timer);
            }
        }

        if let Some(request) = ConsoleMailbox::new(&mut self.bus).pending_framebuffer() {
            self.copy_framebuffer(request.addr, request.display.height);
            self.screen.present(request.display);
            if let Err(e) = ConsoleMailbox::new(&mut self.bus).take_framebuffer() {
                warn!(%e, "framebuffer field changed during copy");
            }
        }

        ConsoleMailbox::new(&mut self.bus).set_vblank();
    }

    fn start_audio(&mut self, first: BusAddr, buf_size: u16, timer: u16) {
        let period = gba_cart::AudioFormat::sample_period(timer);
        let chunk_ticks = self
            .bus
            .config()
            .console_cycles(u64::from(period) * u64::from(CHUNK));
        let now = self.bus.ticks();
        self.audio
            .start(first.cart_offset(), buf_size, chunk_ticks, now);
        debug!(buf_size, timer, "audio started");
    }

    fn copy_framebuffer(&mut self, addr: BusAddr, height: u16) {
        let Some(base) = addr.cart_offset() else {
            self.bad_pointers += 1;
            warn!(%addr, "framebuffer outside the cartridge");
            return;
        };
        for y in 0..usize::from(height).min(HEIGHT) {
            let offset = base + y as u32 * LINE_BYTES;
            self.bus.read_burst(offset, self.screen.line_mut(y));
            self.service_audio();
        }
    }

    /// Perform every FIFO refill that is due.
    fn service_audio(&mut self) {
        while let Some(due) = self.audio.next_due() {
            if due > self.bus.ticks() {
                break;
            }
            let mut words = [0u16; CHUNK as usize / 2];
            if let Some(offset) = self.audio.refill_from() {
                self.bus.read_burst(offset, &mut words);
            }
            if self.audio.push_chunk(&words) {
                self.swap_audio();
            }
        }
    }

    fn swap_audio(&mut self) {
        let finished = self.audio.slot();
        let mut mailbox = ConsoleMailbox::new(&mut self.bus);
        match mailbox.consume_audio_slot(finished) {
            Ok(_) | Err(HandshakeError::SlotEmpty(_)) => {}
            Err(e) => warn!(%e, "audio slot"),
        }
        let next = mailbox.audio_slot(finished ^ 1).ok().flatten();
        self.audio.swap(next.and_then(BusAddr::cart_offset));
    }

    fn wait_until(&mut self, target: u64) {
        loop {
            if self.bus.is_powered() {
                self.service_audio();
            }
            let now = self.bus.ticks();
            if now >= target {
                break;
            }
            let until = self
                .audio
                .next_due()
                .filter(|_| self.bus.is_powered())
                .map_or(target, |due| due.clamp(now + 1, target));
            self.bus.idle(until - now);
        }
    }

    /// Switch the console off: every line drops low.
    pub fn power_off(&mut self) {
        self.bus.power_off();
        self.audio.stop();
    }

    /// Switch back on. The mailbox client starts over.
    pub fn power_on(&mut self) {
        self.bus.power_on();
        self.audio = Audio::default();
        self.next_vblank = self.bus.ticks() + self.bus.config().frame_ticks;
    }

    pub fn press(&mut self, button: Button) {
        self.keys.press(button);
    }

    pub fn release(&mut self, button: Button) {
        self.keys.release(button);
    }

    pub fn set_keys(&mut self, keys: Buttons) {
        self.keys = keys;
    }

    #[must_use]
    pub fn keys(&self) -> Buttons {
        self.keys
    }

    #[must_use]
    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    #[must_use]
    pub fn header(&self) -> Option<&Header> {
        self.header.as_ref()
    }

    #[must_use]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    #[must_use]
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    #[must_use]
    pub fn audio(&self) -> &Audio {
        &self.audio
    }

    /// Drain the signed 8-bit samples played so far.
    pub fn take_samples(&mut self) -> Vec<i8> {
        self.audio.take_samples()
    }

    #[must_use]
    pub fn bus(&self) -> &CartBus<S> {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut CartBus<S> {
        &mut self.bus
    }

    #[must_use]
    pub fn slot(&self) -> &S {
        self.bus.slot()
    }

    pub fn slot_mut(&mut self) -> &mut S {
        self.bus.slot_mut()
    }

    /// Mailbox access through bus transactions.
    pub fn mailbox(&mut self) -> ConsoleMailbox<&mut CartBus<S>> {
        ConsoleMailbox::new(&mut self.bus)
    }
}

impl<S: CartSlot> Tickable for Console<S> {
    /// One idle bus cycle.
    fn tick(&mut self) {
        self.bus.idle(1);
    }
}

impl<S: CartSlot + Observable> Observable for Console<S> {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "console.frame" => return Some(Value::U64(self.frame)),
            "console.keys" => return Some(self.keys.to_string().into()),
            "console.overruns" => return Some(Value::U64(self.overruns)),
            "console.bad_pointers" => return Some(Value::U64(self.bad_pointers)),
            "console.frames_presented" => return Some(Value::U64(self.screen.frames())),
            "console.title" => {
                return Some(self.header.as_ref().map_or("", |h| h.title.as_str()).into());
            }
            _ => {}
        }
        if let Some(rest) = path.strip_prefix("console.audio.") {
            return self.audio.query(rest);
        }
        if let Some(rest) = path.strip_prefix("bus.") {
            return self.bus.query(rest);
        }
        if let Some(rest) = path.strip_prefix("cart.") {
            return self.bus.slot().query(rest);
        }
        None
    }

    fn query_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = [
            "console.frame",
            "console.keys",
            "console.overruns",
            "console.bad_pointers",
            "console.frames_presented",
            "console.title",
        ]
        .iter()
        .map(|s| (*s).to_owned())
        .collect();
        paths.extend(
            self.audio
                .query_paths()
                .into_iter()
                .map(|p| format!("console.audio.{p}")),
        );
        paths.extend(self.bus.query_paths().into_iter().map(|p| format!("bus.{p}")));
        paths.extend(
            self.bus
                .slot()
                .query_paths()
                .into_iter()
                .map(|p| format!("cart.{p}")),
        );
        paths
    }
}
