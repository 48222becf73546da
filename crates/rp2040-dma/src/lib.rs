//! RP2040 DMA controller.
//!
//! Twelve channels share one bus master. Each cycle the controller grants
//! at most one transfer, round-robin over busy channels whose transfer
//! request is asserted. Channels chain: when one completes it triggers its
//! `chain_to` channel. A channel may target the controller's own registers,
//! which is how one channel retargets and restarts another without the CPU.
//!
//! The sniffer watches the data of one channel. Its accumulator is
//! supplied by the user through the [`Sniffer`] trait.

mod channel;

use emu_core::{Observable, Value};
use thiserror::Error;
use tracing::trace;

pub use channel::{
    CTRL_AHB_ERROR, CTRL_BUSY, CTRL_READ_ERROR, CTRL_WRITE_ERROR, Channel, ChannelConfig, DataSize,
    TREQ_PERMANENT, pio0_dreq,
};

/// Number of channels.
pub const NUM_CHANNELS: usize = 12;

/// Base address of the DMA register block.
pub const DMA_BASE: u32 = 0x5000_0000;
const DMA_BLOCK_SIZE: u32 = 0x1000;
const CHANNEL_STRIDE: u32 = 0x40;

/// Register offsets within the block.
pub mod reg {
    pub const READ_ADDR: u32 = 0x00;
    pub const WRITE_ADDR: u32 = 0x04;
    pub const TRANS_COUNT: u32 = 0x08;
    pub const CTRL_TRIG: u32 = 0x0C;
    pub const AL1_CTRL: u32 = 0x10;
    pub const AL1_READ_ADDR: u32 = 0x14;
    pub const AL1_WRITE_ADDR: u32 = 0x18;
    pub const AL1_TRANS_COUNT_TRIG: u32 = 0x1C;
    pub const AL2_CTRL: u32 = 0x20;
    pub const AL2_TRANS_COUNT: u32 = 0x24;
    pub const AL2_READ_ADDR: u32 = 0x28;
    pub const AL2_WRITE_ADDR_TRIG: u32 = 0x2C;
    pub const AL3_CTRL: u32 = 0x30;
    pub const AL3_WRITE_ADDR: u32 = 0x34;
    pub const AL3_TRANS_COUNT: u32 = 0x38;
    pub const AL3_READ_ADDR_TRIG: u32 = 0x3C;

    pub const INTR: u32 = 0x400;
    pub const INTE0: u32 = 0x404;
    pub const INTS0: u32 = 0x40C;
    pub const MULTI_CHAN_TRIGGER: u32 = 0x430;
    pub const SNIFF_CTRL: u32 = 0x434;
    pub const SNIFF_DATA: u32 = 0x438;
    pub const CHAN_ABORT: u32 = 0x444;
}

/// Bus address of a channel register.
#[must_use]
pub const fn channel_reg(channel: usize, offset: u32) -> u32 {
    DMA_BASE + channel as u32 * CHANNEL_STRIDE + offset
}

/// Bus address of a block-level register.
#[must_use]
pub const fn block_reg(offset: u32) -> u32 {
    DMA_BASE + offset
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DmaError {
    #[error("DMA channel {0} is already claimed")]
    AlreadyClaimed(usize),
    #[error("no unclaimed DMA channel left")]
    NoFreeChannel,
}

/// A failed bus access. Sets the channel's error flag and halts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("bus fault at {addr:#010X}")]
pub struct BusFault {
    pub addr: u32,
}

/// The system bus as seen by the DMA master.
pub trait DmaBus {
    fn read(&mut self, addr: u32, size: DataSize) -> Result<u32, BusFault>;
    fn write(&mut self, addr: u32, size: DataSize, value: u32) -> Result<(), BusFault>;
    /// Level of transfer request `dreq`.
    fn dreq(&self, dreq: u8) -> bool;
}

/// Accumulator fed with the data of the sniffed channel.
pub trait Sniffer {
    /// Fold one transferred value into the accumulator.
    fn observe(&mut self, data: u32);
    /// Current accumulator (the SNIFF_DATA register).
    fn data(&self) -> u32;
    /// Overwrite the accumulator.
    fn set_data(&mut self, value: u32);
}

/// Plain summing accumulator (sniffer calculation mode 0xF).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SumSniffer(pub u32);

impl Sniffer for SumSniffer {
    fn observe(&mut self, data: u32) {
        self.0 = self.0.wrapping_add(data);
    }

    fn data(&self) -> u32 {
        self.0
    }

    fn set_data(&mut self, value: u32) {
        self.0 = value;
    }
}

/// The DMA controller.
pub struct Dma<S: Sniffer> {
    channels: Vec<Channel>,
    claimed: u16,
    sniffer: S,
    sniff_channel: Option<usize>,
    intr: u16,
    inte0: u16,
    /// Next channel to consider for arbitration.
    next: usize,
}

impl<S: Sniffer> Dma<S> {
    pub fn new(sniffer: S) -> Self {
        Self {
            channels: (0..NUM_CHANNELS).map(Channel::new).collect(),
            claimed: 0,
            sniffer,
            sniff_channel: None,
            intr: 0,
            inte0: 0,
            next: 0,
        }
    }

    pub fn claim_mask(&mut self, mask: u16) -> Result<(), DmaError> {
        if let Some(ch) = (0..NUM_CHANNELS).find(|ch| mask & self.claimed & (1 << ch) != 0) {
            return Err(DmaError::AlreadyClaimed(ch));
        }
        self.claimed |= mask;
        Ok(())
    }

    pub fn claim_unused_channel(&mut self) -> Result<usize, DmaError> {
        let ch = (0..NUM_CHANNELS)
            .find(|ch| self.claimed & (1 << ch) == 0)
            .ok_or(DmaError::NoFreeChannel)?;
        self.claimed |= 1 << ch;
        Ok(ch)
    }

    /// Program a channel in one go, optionally starting it.
    pub fn configure(
        &mut self,
        channel: usize,
        config: ChannelConfig,
        write_addr: u32,
        read_addr: u32,
        count: u32,
        trigger: bool,
    ) {
        let ch = &mut self.channels[channel];
        ch.config = config;
        ch.write_addr = write_addr;
        ch.read_addr = read_addr;
        ch.trans_count = count;
        if trigger {
            self.start(channel);
        }
    }

    /// Start a channel. A busy channel keeps running; an idle one reloads
    /// its transfer count and clears its error flags.
    pub fn start(&mut self, channel: usize) {
        let ch = &mut self.channels[channel];
        ch.triggers += 1;
        if ch.busy || !ch.config.enable {
            return;
        }
        ch.busy = true;
        ch.remaining = ch.trans_count;
        ch.read_error = false;
        ch.write_error = false;
        if ch.remaining == 0 {
            ch.busy = false;
        }
    }

    /// Set the write address, optionally as a trigger.
    pub fn set_write_addr(&mut self, channel: usize, addr: u32, trigger: bool) {
        self.channels[channel].write_addr = addr;
        if trigger {
            self.start(channel);
        }
    }

    /// Set the read address, optionally as a trigger.
    pub fn set_read_addr(&mut self, channel: usize, addr: u32, trigger: bool) {
        self.channels[channel].read_addr = addr;
        if trigger {
            self.start(channel);
        }
    }

    /// Abort every channel in `mask`. In-flight transfers are dropped.
    pub fn abort(&mut self, mask: u16) {
        for (i, ch) in self.channels.iter_mut().enumerate() {
            if mask & (1 << i) != 0 {
                ch.busy = false;
                ch.remaining = 0;
            }
        }
    }

    /// Flag a read error on a channel, as the bus would on a failed read.
    pub fn set_read_error(&mut self, channel: usize) {
        self.channels[channel].read_error = true;
    }

    #[must_use]
    pub fn channel(&self, channel: usize) -> &Channel {
        &self.channels[channel]
    }

    pub fn set_irq0_enabled(&mut self, channel: usize, enabled: bool) {
        if enabled {
            self.inte0 |= 1 << channel;
        } else {
            self.inte0 &= !(1 << channel);
        }
    }

    /// Clear a channel's interrupt (write-1-to-clear on INTS0).
    pub fn acknowledge_irq0(&mut self, channel: usize) {
        self.intr &= !(1 << channel);
    }

    #[must_use]
    pub fn irq0_status(&self) -> u16 {
        self.intr & self.inte0
    }

    /// Level of the DMA_IRQ_0 line.
    #[must_use]
    pub fn irq0_asserted(&self) -> bool {
        self.irq0_status() != 0
    }

    /// Point the sniffer at a channel. With `force` the channel's own
    /// sniff-enable bit is set too.
    pub fn sniffer_enable(&mut self, channel: usize, force: bool) {
        self.sniff_channel = Some(channel);
        if force {
            self.channels[channel].config.sniff_enable = true;
        }
    }

    pub fn sniffer_set_data_accumulator(&mut self, value: u32) {
        self.sniffer.set_data(value);
    }

    #[must_use]
    pub fn sniffer(&self) -> &S {
        &self.sniffer
    }

    pub fn sniffer_mut(&mut self) -> &mut S {
        &mut self.sniffer
    }

    /// Read one of the controller's own registers.
    #[must_use]
    pub fn register_read(&self, offset: u32) -> u32 {
        match offset {
            reg::INTR => u32::from(self.intr),
            reg::INTE0 => u32::from(self.inte0),
            reg::INTS0 => u32::from(self.irq0_status()),
            reg::SNIFF_DATA => self.sniffer.data(),
            reg::SNIFF_CTRL => self
                .sniff_channel
                .map_or(0, |ch| 1 | ((ch as u32) << 1) | (0xF << 5)),
            _ if offset < NUM_CHANNELS as u32 * CHANNEL_STRIDE => {
                let ch = &self.channels[(offset / CHANNEL_STRIDE) as usize];
                match offset % CHANNEL_STRIDE {
                    reg::READ_ADDR
                    | reg::AL1_READ_ADDR
                    | reg::AL2_READ_ADDR
                    | reg::AL3_READ_ADDR_TRIG => ch.read_addr,
                    reg::WRITE_ADDR
                    | reg::AL1_WRITE_ADDR
                    | reg::AL2_WRITE_ADDR_TRIG
                    | reg::AL3_WRITE_ADDR => ch.write_addr,
                    reg::TRANS_COUNT
                    | reg::AL1_TRANS_COUNT_TRIG
                    | reg::AL2_TRANS_COUNT
                    | reg::AL3_TRANS_COUNT => ch.remaining,
                    _ => ch.ctrl(),
                }
            }
            _ => 0,
        }
    }

    /// Write one of the controller's own registers, with trigger side
    /// effects.
    pub fn register_write(&mut self, offset: u32, value: u32) {
        match offset {
            reg::INTR | reg::INTS0 => self.intr &= !(value as u16),
            reg::INTE0 => self.inte0 = value as u16,
            reg::SNIFF_DATA => self.sniffer.set_data(value),
            reg::MULTI_CHAN_TRIGGER => {
                for ch in 0..NUM_CHANNELS {
                    if value & (1 << ch) != 0 {
                        self.start(ch);
                    }
                }
            }
            reg::CHAN_ABORT => self.abort(value as u16),
            _ if offset < NUM_CHANNELS as u32 * CHANNEL_STRIDE => {
                let index = (offset / CHANNEL_STRIDE) as usize;
                let ch = &mut self.channels[index];
                let trigger = match offset % CHANNEL_STRIDE {
                    reg::READ_ADDR | reg::AL1_READ_ADDR | reg::AL2_READ_ADDR => {
                        ch.read_addr = value;
                        false
                    }
                    reg::AL3_READ_ADDR_TRIG => {
                        ch.read_addr = value;
                        true
                    }
                    reg::WRITE_ADDR | reg::AL1_WRITE_ADDR | reg::AL3_WRITE_ADDR => {
                        ch.write_addr = value;
                        false
                    }
                    reg::AL2_WRITE_ADDR_TRIG => {
                        ch.write_addr = value;
                        true
                    }
                    reg::TRANS_COUNT | reg::AL2_TRANS_COUNT | reg::AL3_TRANS_COUNT => {
                        ch.trans_count = value;
                        false
                    }
                    reg::AL1_TRANS_COUNT_TRIG => {
                        ch.trans_count = value;
                        true
                    }
                    reg::CTRL_TRIG | reg::AL1_CTRL | reg::AL2_CTRL | reg::AL3_CTRL => {
                        // Error flags are write-1-to-clear.
                        if value & CTRL_READ_ERROR != 0 {
                            ch.read_error = false;
                        }
                        if value & CTRL_WRITE_ERROR != 0 {
                            ch.write_error = false;
                        }
                        ch.config = ChannelConfig::from_ctrl(value);
                        offset % CHANNEL_STRIDE == reg::CTRL_TRIG
                    }
                    _ => false,
                };
                if trigger {
                    self.start(index);
                }
            }
            _ => {}
        }
    }

    fn is_own_register(addr: u32) -> bool {
        (DMA_BASE..DMA_BASE + DMA_BLOCK_SIZE).contains(&addr)
    }

    fn bus_read<B: DmaBus>(
        &self,
        bus: &mut B,
        addr: u32,
        size: DataSize,
    ) -> Result<u32, BusFault> {
        if Self::is_own_register(addr) {
            Ok(self.register_read(addr - DMA_BASE))
        } else {
            bus.read(addr, size)
        }
    }

    fn bus_write<B: DmaBus>(
        &mut self,
        bus: &mut B,
        addr: u32,
        size: DataSize,
        value: u32,
    ) -> Result<(), BusFault> {
        if Self::is_own_register(addr) {
            self.register_write(addr - DMA_BASE, value);
            Ok(())
        } else {
            bus.write(addr, size, value)
        }
    }

    fn ready<B: DmaBus>(&self, bus: &B, index: usize) -> bool {
        let ch = &self.channels[index];
        ch.busy && (ch.config.treq == TREQ_PERMANENT || bus.dreq(ch.config.treq))
    }

    /// Grant at most one transfer. Returns the channel that transferred.
    pub fn step<B: DmaBus>(&mut self, bus: &mut B) -> Option<usize> {
        let index = (0..NUM_CHANNELS)
            .map(|i| (self.next + i) % NUM_CHANNELS)
            .find(|&i| self.ready(&*bus, i))?;
        self.next = (index + 1) % NUM_CHANNELS;

        let (read_addr, write_addr, config) = {
            let ch = &self.channels[index];
            (ch.read_addr, ch.write_addr, ch.config)
        };
        let size = config.data_size;

        let data = match self.bus_read(bus, read_addr, size) {
            Ok(data) => data,
            Err(fault) => {
                trace!(channel = index, %fault, "DMA read error");
                let ch = &mut self.channels[index];
                ch.read_error = true;
                ch.busy = false;
                return Some(index);
            }
        };

        if config.sniff_enable && self.sniff_channel == Some(index) {
            self.sniffer.observe(data);
        }

        if let Err(fault) = self.bus_write(bus, write_addr, size, data) {
            trace!(channel = index, %fault, "DMA write error");
            let ch = &mut self.channels[index];
            ch.write_error = true;
            ch.busy = false;
            return Some(index);
        }

        let ch = &mut self.channels[index];
        ch.transfers += 1;
        // A register write above may have retargeted this very channel;
        // only advance addresses that were not replaced.
        if config.read_increment && ch.read_addr == read_addr {
            ch.read_addr = read_addr.wrapping_add(size.bytes());
        }
        if config.write_increment && ch.write_addr == write_addr {
            ch.write_addr = write_addr.wrapping_add(size.bytes());
        }
        ch.remaining = ch.remaining.saturating_sub(1);
        if ch.remaining == 0 && ch.busy {
            ch.busy = false;
            if !config.irq_quiet {
                self.intr |= 1 << index;
            }
            if config.chain_to != index {
                self.start(config.chain_to);
            }
        }
        Some(index)
    }
}

impl<S: Sniffer> Observable for Dma<S> {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "intr" => return Some(Value::U16(self.intr)),
            "inte0" => return Some(Value::U16(self.inte0)),
            "ints0" => return Some(Value::U16(self.irq0_status())),
            "claimed" => return Some(Value::U16(self.claimed)),
            "sniff_data" => return Some(Value::U32(self.sniffer.data())),
            "sniff_channel" => {
                return Some(self.sniff_channel.map_or_else(|| "none".into(), Value::from));
            }
            _ => {}
        }
        let (index, field) = path.strip_prefix("ch.")?.split_once('.')?;
        let ch = self.channels.get(index.parse::<usize>().ok()?)?;
        match field {
            "read_addr" => Some(Value::U32(ch.read_addr)),
            "write_addr" => Some(Value::U32(ch.write_addr)),
            "trans_count" => Some(Value::U32(ch.trans_count)),
            "remaining" => Some(Value::U32(ch.remaining)),
            "ctrl" => Some(Value::U32(ch.ctrl())),
            "busy" => Some(ch.busy.into()),
            "read_error" => Some(ch.read_error.into()),
            "write_error" => Some(ch.write_error.into()),
            "chain_to" => Some(ch.config.chain_to.into()),
            "transfers" => Some(Value::U64(ch.transfers)),
            "triggers" => Some(Value::U64(ch.triggers)),
            _ => None,
        }
    }

    fn query_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = [
            "intr",
            "inte0",
            "ints0",
            "claimed",
            "sniff_data",
            "sniff_channel",
        ]
        .iter()
        .map(|s| (*s).to_owned())
        .collect();
        for ch in 0..NUM_CHANNELS {
            for field in [
                "read_addr",
                "write_addr",
                "trans_count",
                "remaining",
                "ctrl",
                "busy",
                "read_error",
                "write_error",
                "chain_to",
                "transfers",
                "triggers",
            ] {
                paths.push(format!("ch.{ch}.{field}"));
            }
        }
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 256 bytes of RAM at 0x2000_0000 and one always-ready DREQ line.
    struct TestBus {
        ram: [u8; 256],
        dreq_ready: bool,
    }

    const RAM: u32 = 0x2000_0000;

    impl TestBus {
        fn new() -> Self {
            let mut ram = [0u8; 256];
            for (i, b) in ram.iter_mut().enumerate() {
                *b = i as u8;
            }
            Self { ram, dreq_ready: true }
        }

        fn index(addr: u32) -> Result<usize, BusFault> {
            addr.checked_sub(RAM)
                .map(|o| o as usize)
                .filter(|&o| o < 256)
                .ok_or(BusFault { addr })
        }
    }

    impl DmaBus for TestBus {
        fn read(&mut self, addr: u32, size: DataSize) -> Result<u32, BusFault> {
            let base = Self::index(addr)?;
            let mut value = 0u32;
            for i in 0..size.bytes() as usize {
                value |= u32::from(*self.ram.get(base + i).ok_or(BusFault { addr })?) << (8 * i);
            }
            Ok(value)
        }

        fn write(&mut self, addr: u32, size: DataSize, value: u32) -> Result<(), BusFault> {
            let base = Self::index(addr)?;
            for i in 0..size.bytes() as usize {
                *self.ram.get_mut(base + i).ok_or(BusFault { addr })? = (value >> (8 * i)) as u8;
            }
            Ok(())
        }

        fn dreq(&self, _dreq: u8) -> bool {
            self.dreq_ready
        }
    }

    fn run<B: DmaBus, S: Sniffer>(dma: &mut Dma<S>, bus: &mut B, cycles: usize) {
        for _ in 0..cycles {
            dma.step(bus);
        }
    }

    #[test]
    fn copies_halfwords_and_raises_irq() {
        let mut dma = Dma::new(SumSniffer::default());
        let mut bus = TestBus::new();
        let cfg = ChannelConfig::default_for(0)
            .with_data_size(DataSize::HalfWord)
            .with_write_increment(true);
        dma.set_irq0_enabled(0, true);
        dma.configure(0, cfg, RAM + 0x80, RAM, 4, true);
        run(&mut dma, &mut bus, 10);
        assert_eq!(&bus.ram[0x80..0x88], &[0, 1, 2, 3, 4, 5, 6, 7]);
        assert!(!dma.channel(0).is_busy());
        assert!(dma.irq0_asserted());
        dma.acknowledge_irq0(0);
        assert!(!dma.irq0_asserted());
    }

    #[test]
    fn paced_channel_waits_for_dreq() {
        let mut dma = Dma::new(SumSniffer::default());
        let mut bus = TestBus::new();
        bus.dreq_ready = false;
        let cfg = ChannelConfig::default_for(0).with_dreq(pio0_dreq(1, true));
        dma.configure(0, cfg, RAM + 0x40, RAM, 1, true);
        run(&mut dma, &mut bus, 5);
        assert_eq!(dma.channel(0).transfers(), 0);
        bus.dreq_ready = true;
        run(&mut dma, &mut bus, 1);
        assert_eq!(dma.channel(0).transfers(), 1);
    }

    #[test]
    fn chain_and_register_trigger_retarget_another_channel() {
        let mut dma = Dma::new(SumSniffer::default());
        let mut bus = TestBus::new();
        // Channel 1 copies a word from RAM+0x10 into channel 0's
        // READ_ADDR_TRIG alias, starting channel 0 from that address.
        bus.write(RAM + 0x10, DataSize::Word, RAM + 0x20).expect("in range");
        let ch0 = ChannelConfig::default_for(0).with_write_increment(true);
        dma.configure(0, ch0, RAM + 0xC0, 0, 1, false);
        let ch1 = ChannelConfig::default_for(1).with_read_increment(false);
        dma.configure(1, ch1, channel_reg(0, reg::AL3_READ_ADDR_TRIG), RAM + 0x10, 1, true);
        run(&mut dma, &mut bus, 4);
        assert_eq!(dma.channel(0).triggers(), 1);
        assert_eq!(&bus.ram[0xC0..0xC4], &[0x20, 0x21, 0x22, 0x23]);
    }

    #[test]
    fn sniffer_sums_sniffed_channel_data() {
        let mut dma = Dma::new(SumSniffer(1000));
        let mut bus = TestBus::new();
        let cfg = ChannelConfig::default_for(2)
            .with_read_increment(false)
            .with_sniff(true)
            .with_chain_to(2);
        dma.sniffer_enable(2, true);
        bus.write(RAM, DataSize::Word, 24).expect("in range");
        dma.configure(2, cfg, RAM + 0x40, RAM, 1, true);
        run(&mut dma, &mut bus, 2);
        assert_eq!(dma.register_read(reg::SNIFF_DATA), 1024);
    }

    #[test]
    fn read_fault_halts_channel_until_next_trigger() {
        let mut dma = Dma::new(SumSniffer::default());
        let mut bus = TestBus::new();
        let cfg = ChannelConfig::default_for(0);
        dma.configure(0, cfg, RAM, 0x1000_0000, 8, true);
        run(&mut dma, &mut bus, 1);
        assert!(dma.channel(0).read_error());
        assert!(!dma.channel(0).is_busy());
        assert_ne!(dma.channel(0).ctrl() & CTRL_READ_ERROR, 0);
        dma.set_read_addr(0, RAM, true);
        assert!(!dma.channel(0).read_error());
        assert!(dma.channel(0).is_busy());
    }

    #[test]
    fn abort_stops_channel() {
        let mut dma = Dma::new(SumSniffer::default());
        let mut bus = TestBus::new();
        dma.configure(0, ChannelConfig::default_for(0), RAM + 0x80, RAM, 100, true);
        run(&mut dma, &mut bus, 3);
        dma.abort(1);
        run(&mut dma, &mut bus, 3);
        assert_eq!(dma.channel(0).transfers(), 3);
    }

    #[test]
    fn claiming() {
        let mut dma = Dma::new(SumSniffer::default());
        dma.claim_mask(0b11).expect("free");
        assert_eq!(dma.claim_mask(0b10), Err(DmaError::AlreadyClaimed(1)));
        assert_eq!(dma.claim_unused_channel(), Ok(2));
        assert_eq!(dma.claim_unused_channel(), Ok(3));
    }
}
