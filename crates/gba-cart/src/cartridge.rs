//! The cartridge: capture programs, resolution pipeline and image wired
//! together, plus the host CPU's interrupt handling.
//!
//! # Pipeline
//!
//! ```text
//!  CS low ──> AddressCapture ──RX──> latch channel ──> holder
//!                                        │ (sniffer adds offset to base)
//!                                        ▼ chain
//!                                  retrigger channel: SNIFF_DATA ──> read channel READ_ADDR_TRIG
//!                                        │ chain back to latch
//!  RD low <── ReadDrive <──TX── read channel <── image[base + offset ..]
//!  WR low ──> WriteCapture ──RX──> write channel ──> image[base + offset ..]
//! ```
//!
//! The latch stage raises DMA IRQ 0. Its handler reseeds the sniffer,
//! points the write channel at the transaction's address and checks the
//! strobes for a desynchronised bus.

use emu_core::{Observable, PinDrive, Pins, Value};
use rp2040_dma::{
    self as dma, BusFault, ChannelConfig, DataSize, Dma, DmaBus, TREQ_PERMANENT, pio0_dreq,
};
use rp2040_pio::{self as pio, Forced, Pio};
use tracing::{info, trace};

use crate::bus::{BUS_MASK, RD_PIN};
use crate::config::CartConfig;
use crate::error::CartError;
use crate::image::{BackingImage, IMAGE_BASE};
use crate::irq::{Dispatcher, Irq};
use crate::mailbox::{ConsoleMailbox, HostMailbox, MailboxSnapshot};
use crate::programs::{AddressCapture, READ_FAULT_IRQ, ReadDrive, WriteCapture};
use crate::resolver::AddressResolver;

/// Address-capture state machine.
pub const CS_SM: usize = 0;
/// Read-drive state machine.
pub const RD_SM: usize = 1;

/// Read data channel.
pub const READ_CH: usize = 0;
/// Write data channel.
pub const WRITE_CH: usize = 1;

/// Words per read or write run before the channel must be retriggered.
const DATA_RUN: u32 = 0x10000;

/// Host RAM word the latch stage writes each captured offset to.
pub const HOLDER_ADDR: u32 = 0x2100_0000;

/// The emulated cartridge and the host resources it owns.
pub struct Cartridge {
    config: CartConfig,
    pub(crate) image: BackingImage,
    pub(crate) pio: Pio,
    pub(crate) dma: Dma<AddressResolver>,
    pub(crate) nvic: Dispatcher,
    /// Last captured offset, as stored by the latch stage.
    pub(crate) holder: u32,
    /// Raw GPIO levels this cycle.
    pub(crate) lines: Pins,
    pub(crate) wr_sm: usize,
    pub(crate) latch_ch: usize,
    pub(crate) retrigger_ch: usize,
    pub(crate) full_resets: u64,
    pub(crate) local_faults: u64,
    started: bool,
    ticks: u64,
}

/// The host's view of memory for DMA transfers.
struct HostBus<'a> {
    image: &'a mut BackingImage,
    pio: &'a mut Pio,
    holder: &'a mut u32,
}

impl DmaBus for HostBus<'_> {
    fn read(&mut self, addr: u32, size: DataSize) -> Result<u32, BusFault> {
        if let Some(value) = self.image.read_host(addr, size) {
            return Ok(value);
        }
        if addr == HOLDER_ADDR {
            return Ok(*self.holder);
        }
        match pio::decode_fifo_addr(addr) {
            // An empty RX FIFO reads as zero.
            Some((sm, false)) => Ok(self.pio.get_rx(sm).unwrap_or(0)),
            _ => Err(BusFault { addr }),
        }
    }

    fn write(&mut self, addr: u32, size: DataSize, value: u32) -> Result<(), BusFault> {
        if self.image.write_host(addr, size, value) {
            return Ok(());
        }
        if addr == HOLDER_ADDR {
            *self.holder = value;
            return Ok(());
        }
        match pio::decode_fifo_addr(addr) {
            Some((sm, true)) => {
                // A full TX FIFO drops the word.
                if !self.pio.put_tx(sm, value) {
                    trace!(sm, value, "TX FIFO overflow");
                }
                Ok(())
            }
            _ => Err(BusFault { addr }),
        }
    }

    fn dreq(&self, dreq: u8) -> bool {
        match dreq {
            0..4 => self.pio.tx_dreq(usize::from(dreq)),
            4..8 => self.pio.rx_dreq(usize::from(dreq - 4)),
            _ => false,
        }
    }
}

impl Cartridge {
    /// Claim and configure the state machines, channels and interrupts.
    /// Nothing runs until [`start`](Self::start).
    pub fn new(config: CartConfig) -> Result<Self, CartError> {
        let image = BackingImage::with_program(config.capacity, &config.program)?;
        let mut cart = Self {
            nvic: Dispatcher::new(config.irq),
            config,
            image,
            pio: Pio::new(),
            dma: Dma::new(AddressResolver::new(IMAGE_BASE)),
            holder: 0,
            lines: crate::bus::IDLE,
            wr_sm: 0,
            latch_ch: 0,
            retrigger_ch: 0,
            full_resets: 0,
            local_faults: 0,
            started: false,
            ticks: 0,
        };
        cart.init_pio()?;
        cart.init_dma()?;
        cart.pio.set_irq0_source_enabled(READ_FAULT_IRQ, true);
        cart.nvic.set_enabled(Irq::Pio0Irq0, true);
        info!(
            capacity = cart.image.capacity(),
            program = cart.image.program_len(),
            "cartridge initialised"
        );
        Ok(cart)
    }

    fn init_pio(&mut self) -> Result<(), CartError> {
        let config_error = |e: pio::PioError| CartError::Config(e.to_string());
        self.pio
            .claim_sm_mask(1 << CS_SM | 1 << RD_SM)
            .map_err(config_error)?;
        self.wr_sm = self.pio.claim_unused_sm().map_err(config_error)?;

        self.pio
            .sm_init(CS_SM, Box::new(AddressCapture::new()))
            .map_err(config_error)?;
        self.pio
            .sm_init(RD_SM, Box::new(ReadDrive::new()))
            .map_err(config_error)?;
        self.pio
            .sm_init(self.wr_sm, Box::new(WriteCapture::new()))
            .map_err(config_error)?;

        for sm in self.sm_indices() {
            self.pio.set_consecutive_pindirs(sm, 0, 32, false);
        }
        self.pio.set_input_sync_bypass(BUS_MASK);
        Ok(())
    }

    fn init_dma(&mut self) -> Result<(), CartError> {
        let config_error = |e: dma::DmaError| CartError::Config(e.to_string());
        self.dma
            .claim_mask(1 << READ_CH | 1 << WRITE_CH)
            .map_err(config_error)?;
        self.latch_ch = self.dma.claim_unused_channel().map_err(config_error)?;
        self.retrigger_ch = self.dma.claim_unused_channel().map_err(config_error)?;

        let read = ChannelConfig::default_for(READ_CH)
            .with_data_size(DataSize::HalfWord)
            .with_dreq(pio0_dreq(RD_SM, true));
        self.dma
            .configure(READ_CH, read, pio::txf_addr(RD_SM), IMAGE_BASE, DATA_RUN, false);

        let write = ChannelConfig::default_for(WRITE_CH)
            .with_read_increment(false)
            .with_write_increment(true)
            .with_data_size(DataSize::HalfWord)
            .with_dreq(pio0_dreq(self.wr_sm, false));
        self.dma
            .configure(WRITE_CH, write, IMAGE_BASE, pio::rxf_addr(self.wr_sm), DATA_RUN, false);

        let latch = ChannelConfig::default_for(self.latch_ch)
            .with_dreq(pio0_dreq(CS_SM, false))
            .with_read_increment(false)
            .with_chain_to(self.retrigger_ch);
        self.dma
            .configure(self.latch_ch, latch, HOLDER_ADDR, pio::rxf_addr(CS_SM), 1, false);

        let retrigger = ChannelConfig::default_for(self.retrigger_ch)
            .with_read_increment(false)
            .with_chain_to(self.latch_ch)
            .with_dreq(TREQ_PERMANENT);
        self.dma.configure(
            self.retrigger_ch,
            retrigger,
            dma::channel_reg(READ_CH, dma::reg::AL3_READ_ADDR_TRIG),
            dma::block_reg(dma::reg::SNIFF_DATA),
            1,
            false,
        );

        self.dma.sniffer_enable(self.latch_ch, true);
        self.dma.sniffer_mut().reset();
        self.dma.set_irq0_enabled(self.latch_ch, true);
        self.nvic.set_enabled(Irq::DmaIrq0, true);
        Ok(())
    }

    pub(crate) fn sm_indices(&self) -> [usize; 3] {
        [CS_SM, RD_SM, self.wr_sm]
    }

    pub(crate) fn sm_mask(&self) -> u8 {
        self.sm_indices().iter().fold(0, |mask, &sm| mask | 1 << sm)
    }

    /// Arm the latch stage and enable the capture programs.
    ///
    /// With `wait_power`, each program first waits for RD to read high so
    /// a console still powering up cannot trigger it.
    pub fn start(&mut self, wait_power: bool) {
        if wait_power {
            for sm in self.sm_indices() {
                self.pio.exec(
                    sm,
                    Forced::WaitGpio {
                        pin: RD_PIN,
                        high: true,
                    },
                );
            }
        }
        self.dma.start(self.latch_ch);
        self.pio.set_sm_mask_enabled(self.sm_mask(), true);
        self.started = true;
        info!(wait_power, "cartridge started");
    }

    /// Start with the configured power-wait setting.
    pub fn start_configured(&mut self) {
        self.start(self.config.wait_power);
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Pins the cartridge is driving.
    #[must_use]
    pub fn drive(&self) -> PinDrive {
        self.pio.drive()
    }

    /// Advance one host cycle with the bus at `lines`.
    ///
    /// Returns `true` when an interrupt handler completed this cycle, which
    /// is when the host's main loop wakes.
    pub fn tick(&mut self, lines: Pins) -> bool {
        self.lines = lines;
        self.ticks += 1;
        self.pio.tick(lines);
        {
            let mut bus = HostBus {
                image: &mut self.image,
                pio: &mut self.pio,
                holder: &mut self.holder,
            };
            self.dma.step(&mut bus);
        }
        let mut irq_lines = 0;
        if self.pio.irq0_asserted() {
            irq_lines |= Irq::Pio0Irq0.mask();
        }
        if self.dma.irq0_asserted() {
            irq_lines |= Irq::DmaIrq0.mask();
        }
        match self.nvic.tick(irq_lines) {
            Some(Irq::Pio0Irq0) => {
                self.on_read_fault();
                true
            }
            Some(Irq::DmaIrq0) => {
                if self.on_latch_complete() {
                    self.nvic.extend(self.config.irq.full_reset_cost);
                }
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CartConfig {
        &self.config
    }

    #[must_use]
    pub fn image(&self) -> &BackingImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut BackingImage {
        &mut self.image
    }

    /// Host side of the mailbox.
    pub fn host_mailbox(&mut self) -> HostMailbox<&mut BackingImage> {
        HostMailbox::new(&mut self.image)
    }

    /// Console side of the mailbox, bypassing the bus. For tests and tools.
    pub fn console_mailbox(&mut self) -> ConsoleMailbox<&mut BackingImage> {
        ConsoleMailbox::new(&mut self.image)
    }

    #[must_use]
    pub fn mailbox(&self) -> MailboxSnapshot {
        MailboxSnapshot::from_image(&self.image)
    }

    #[must_use]
    pub fn resolver(&self) -> &AddressResolver {
        self.dma.sniffer()
    }

    #[must_use]
    pub fn pio(&self) -> &Pio {
        &self.pio
    }

    #[must_use]
    pub fn dma(&self) -> &Dma<AddressResolver> {
        &self.dma
    }

    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    #[must_use]
    pub fn full_resets(&self) -> u64 {
        self.full_resets
    }

    #[must_use]
    pub fn local_faults(&self) -> u64 {
        self.local_faults
    }

    /// Reads that found no data ready.
    #[must_use]
    pub fn underruns(&self) -> u64 {
        match self.pio.program_query(RD_SM, "underruns") {
            Some(Value::U64(n)) => n,
            _ => 0,
        }
    }

    /// The host CPU is not in an interrupt handler.
    #[must_use]
    pub fn cpu_idle(&self) -> bool {
        self.nvic.is_idle()
    }
}

impl Observable for Cartridge {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "ticks" => return Some(Value::U64(self.ticks)),
            "started" => return Some(self.started.into()),
            "lines" => return Some(Value::U32(self.lines.0)),
            "drive.enable" => return Some(Value::U32(self.drive().enable)),
            "drive.value" => return Some(Value::U32(self.drive().value)),
            "holder" => return Some(Value::U32(self.holder)),
            "supervisor.full_resets" => return Some(Value::U64(self.full_resets)),
            "supervisor.local_faults" => return Some(Value::U64(self.local_faults)),
            "supervisor.underruns" => return Some(Value::U64(self.underruns())),
            "image.capacity" => return Some(self.image.capacity().into()),
            "image.program_len" => return Some(self.image.program_len().into()),
            "image.free" => return Some(self.image.free().into()),
            "channels.latch" => return Some(self.latch_ch.into()),
            "channels.retrigger" => return Some(self.retrigger_ch.into()),
            "sm.write" => return Some(self.wr_sm.into()),
            _ => {}
        }
        if let Some(rest) = path.strip_prefix("pio.") {
            return self.pio.query(rest);
        }
        if let Some(rest) = path.strip_prefix("dma.") {
            return self.dma.query(rest);
        }
        if let Some(rest) = path.strip_prefix("resolver.") {
            return self.dma.sniffer().query(rest);
        }
        if let Some(rest) = path.strip_prefix("nvic.") {
            return self.nvic.query(rest);
        }
        if let Some(rest) = path.strip_prefix("mailbox.") {
            return self.mailbox().query(rest);
        }
        None
    }

    fn query_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = [
            "ticks",
            "started",
            "lines",
            "drive.enable",
            "drive.value",
            "holder",
            "supervisor.full_resets",
            "supervisor.local_faults",
            "supervisor.underruns",
            "image.capacity",
            "image.program_len",
            "image.free",
            "channels.latch",
            "channels.retrigger",
            "sm.write",
        ]
        .iter()
        .map(|s| (*s).to_owned())
        .collect();
        let nested: [(&str, Vec<String>); 5] = [
            ("pio", self.pio.query_paths()),
            ("dma", self.dma.query_paths()),
            ("resolver", self.dma.sniffer().query_paths()),
            ("nvic", self.nvic.query_paths()),
            ("mailbox", MailboxSnapshot::default().query_paths()),
        ];
        for (prefix, sub) in nested {
            paths.extend(sub.into_iter().map(|p| format!("{prefix}.{p}")));
        }
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_claims_the_fixed_and_free_resources() {
        let cart = Cartridge::new(CartConfig::default()).expect("valid config");
        assert_eq!(cart.wr_sm, 2);
        assert_eq!((cart.latch_ch, cart.retrigger_ch), (2, 3));
        assert!(!cart.is_started());
        assert_eq!(cart.resolver().resolve(), IMAGE_BASE);
        let latch = cart.dma().channel(cart.latch_ch);
        assert_eq!(latch.config().chain_to, 3);
        assert!(!latch.is_busy());
    }

    #[test]
    fn start_arms_latch_and_power_wait() {
        let mut cart = Cartridge::new(CartConfig::default()).expect("valid config");
        cart.start(true);
        assert!(cart.dma().channel(cart.latch_ch).is_busy());
        for sm in [CS_SM, RD_SM, 2] {
            assert!(cart.pio().is_enabled(sm));
            assert_eq!(cart.pio().pending_wait(sm), Some((RD_PIN, true)));
        }
    }

    #[test]
    fn observable_paths_resolve() {
        let cart = Cartridge::new(CartConfig::default()).expect("valid config");
        for path in cart.query_paths() {
            assert!(cart.query(&path).is_some(), "{path}");
        }
    }
}
