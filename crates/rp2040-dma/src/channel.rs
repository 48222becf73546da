//! Channel configuration and state.

/// Transfer request source that always asks for data (unpaced).
pub const TREQ_PERMANENT: u8 = 0x3F;

/// DREQ number of a PIO0 state machine FIFO.
#[must_use]
pub const fn pio0_dreq(sm: usize, is_tx: bool) -> u8 {
    if is_tx { sm as u8 } else { 4 + sm as u8 }
}

/// Width of each transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSize {
    Byte,
    HalfWord,
    Word,
}

impl DataSize {
    #[must_use]
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Byte => 1,
            Self::HalfWord => 2,
            Self::Word => 4,
        }
    }

    const fn encode(self) -> u32 {
        match self {
            Self::Byte => 0,
            Self::HalfWord => 1,
            Self::Word => 2,
        }
    }

    const fn decode(bits: u32) -> Self {
        match bits & 3 {
            0 => Self::Byte,
            1 => Self::HalfWord,
            _ => Self::Word,
        }
    }
}

// CTRL register fields.
pub const CTRL_EN: u32 = 1 << 0;
pub const CTRL_DATA_SIZE_SHIFT: u32 = 2;
pub const CTRL_INCR_READ: u32 = 1 << 4;
pub const CTRL_INCR_WRITE: u32 = 1 << 5;
pub const CTRL_CHAIN_TO_SHIFT: u32 = 11;
pub const CTRL_TREQ_SEL_SHIFT: u32 = 15;
pub const CTRL_IRQ_QUIET: u32 = 1 << 21;
pub const CTRL_SNIFF_EN: u32 = 1 << 23;
pub const CTRL_BUSY: u32 = 1 << 24;
pub const CTRL_WRITE_ERROR: u32 = 1 << 29;
pub const CTRL_READ_ERROR: u32 = 1 << 30;
pub const CTRL_AHB_ERROR: u32 = 1 << 31;

/// Channel control settings (the writable half of CTRL).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelConfig {
    pub enable: bool,
    pub data_size: DataSize,
    pub read_increment: bool,
    pub write_increment: bool,
    /// Channel to trigger on completion. Chaining to itself disables chaining.
    pub chain_to: usize,
    pub treq: u8,
    pub irq_quiet: bool,
    pub sniff_enable: bool,
}

impl ChannelConfig {
    /// Power-on defaults for `channel`: 32-bit, read increment, unpaced,
    /// no chaining.
    #[must_use]
    pub const fn default_for(channel: usize) -> Self {
        Self {
            enable: true,
            data_size: DataSize::Word,
            read_increment: true,
            write_increment: false,
            chain_to: channel,
            treq: TREQ_PERMANENT,
            irq_quiet: false,
            sniff_enable: false,
        }
    }

    #[must_use]
    pub const fn with_data_size(mut self, size: DataSize) -> Self {
        self.data_size = size;
        self
    }

    #[must_use]
    pub const fn with_read_increment(mut self, incr: bool) -> Self {
        self.read_increment = incr;
        self
    }

    #[must_use]
    pub const fn with_write_increment(mut self, incr: bool) -> Self {
        self.write_increment = incr;
        self
    }

    #[must_use]
    pub const fn with_chain_to(mut self, channel: usize) -> Self {
        self.chain_to = channel;
        self
    }

    #[must_use]
    pub const fn with_dreq(mut self, treq: u8) -> Self {
        self.treq = treq;
        self
    }

    #[must_use]
    pub const fn with_sniff(mut self, enable: bool) -> Self {
        self.sniff_enable = enable;
        self
    }

    /// Encode as the writable bits of the CTRL register.
    #[must_use]
    pub const fn to_ctrl(self) -> u32 {
        let mut ctrl = (self.data_size.encode() << CTRL_DATA_SIZE_SHIFT)
            | ((self.chain_to as u32 & 0xF) << CTRL_CHAIN_TO_SHIFT)
            | ((self.treq as u32 & 0x3F) << CTRL_TREQ_SEL_SHIFT);
        if self.enable {
            ctrl |= CTRL_EN;
        }
        if self.read_increment {
            ctrl |= CTRL_INCR_READ;
        }
        if self.write_increment {
            ctrl |= CTRL_INCR_WRITE;
        }
        if self.irq_quiet {
            ctrl |= CTRL_IRQ_QUIET;
        }
        if self.sniff_enable {
            ctrl |= CTRL_SNIFF_EN;
        }
        ctrl
    }

    /// Decode the writable bits of a CTRL register value.
    #[must_use]
    pub const fn from_ctrl(ctrl: u32) -> Self {
        Self {
            enable: ctrl & CTRL_EN != 0,
            data_size: DataSize::decode(ctrl >> CTRL_DATA_SIZE_SHIFT),
            read_increment: ctrl & CTRL_INCR_READ != 0,
            write_increment: ctrl & CTRL_INCR_WRITE != 0,
            chain_to: ((ctrl >> CTRL_CHAIN_TO_SHIFT) & 0xF) as usize,
            treq: ((ctrl >> CTRL_TREQ_SEL_SHIFT) & 0x3F) as u8,
            irq_quiet: ctrl & CTRL_IRQ_QUIET != 0,
            sniff_enable: ctrl & CTRL_SNIFF_EN != 0,
        }
    }
}

/// One DMA channel.
#[derive(Debug, Clone)]
pub struct Channel {
    pub(crate) read_addr: u32,
    pub(crate) write_addr: u32,
    /// Transfers left in the current run.
    pub(crate) remaining: u32,
    /// Value reloaded into `remaining` on each trigger.
    pub(crate) trans_count: u32,
    pub(crate) config: ChannelConfig,
    pub(crate) busy: bool,
    pub(crate) read_error: bool,
    pub(crate) write_error: bool,
    pub(crate) transfers: u64,
    pub(crate) triggers: u64,
}

impl Channel {
    pub(crate) fn new(index: usize) -> Self {
        Self {
            read_addr: 0,
            write_addr: 0,
            remaining: 0,
            trans_count: 0,
            config: ChannelConfig::default_for(index),
            busy: false,
            read_error: false,
            write_error: false,
            transfers: 0,
            triggers: 0,
        }
    }

    /// CTRL register as read back: config plus status bits.
    #[must_use]
    pub fn ctrl(&self) -> u32 {
        let mut ctrl = self.config.to_ctrl();
        if self.busy {
            ctrl |= CTRL_BUSY;
        }
        if self.read_error {
            ctrl |= CTRL_READ_ERROR | CTRL_AHB_ERROR;
        }
        if self.write_error {
            ctrl |= CTRL_WRITE_ERROR | CTRL_AHB_ERROR;
        }
        ctrl
    }

    #[must_use]
    pub fn read_addr(&self) -> u32 {
        self.read_addr
    }

    #[must_use]
    pub fn write_addr(&self) -> u32 {
        self.write_addr
    }

    /// Transfers left in the current run.
    #[must_use]
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    #[must_use]
    pub fn config(&self) -> ChannelConfig {
        self.config
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.busy
    }

    #[must_use]
    pub fn read_error(&self) -> bool {
        self.read_error
    }

    #[must_use]
    pub fn write_error(&self) -> bool {
        self.write_error
    }

    /// Completed transfers since power-on.
    #[must_use]
    pub fn transfers(&self) -> u64 {
        self.transfers
    }

    /// Triggers (starts) since power-on.
    #[must_use]
    pub fn triggers(&self) -> u64 {
        self.triggers
    }
}
