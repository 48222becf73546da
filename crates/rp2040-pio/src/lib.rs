//! RP2040 programmable I/O (PIO) block.
//!
//! One block holds four state machines. Each has a 4-word TX FIFO (system
//! to machine) and a 4-word RX FIFO (machine to system), its own pin drive,
//! and shares the block's eight IRQ flags. Inputs normally pass through a
//! two-stage synchroniser; pins in the bypass mask are sampled directly,
//! trading a small metastability risk for two cycles of latency.
//!
//! Programs are supplied by the user as automata implementing [`Program`].

mod fifo;
mod program;

use emu_core::{Observable, PinDrive, Pins, Value};
use thiserror::Error;

pub use fifo::{FIFO_DEPTH, Fifo};
pub use program::{Program, SmIo};

use program::field_mask;

/// State machines per block.
pub const NUM_SM: usize = 4;

/// Base address of PIO0's register block.
pub const PIO0_BASE: u32 = 0x5020_0000;
const TXF_OFFSET: u32 = 0x10;
const RXF_OFFSET: u32 = 0x20;

/// Bus address of a state machine's TX FIFO register.
#[must_use]
pub const fn txf_addr(sm: usize) -> u32 {
    PIO0_BASE + TXF_OFFSET + sm as u32 * 4
}

/// Bus address of a state machine's RX FIFO register.
#[must_use]
pub const fn rxf_addr(sm: usize) -> u32 {
    PIO0_BASE + RXF_OFFSET + sm as u32 * 4
}

/// Which FIFO register, if any, lives at `addr`: `(sm, is_tx)`.
#[must_use]
pub fn decode_fifo_addr(addr: u32) -> Option<(usize, bool)> {
    let offset = addr.checked_sub(PIO0_BASE)?;
    if offset % 4 != 0 {
        return None;
    }
    match offset {
        0x10..0x20 => Some((((offset - TXF_OFFSET) / 4) as usize, true)),
        0x20..0x30 => Some((((offset - RXF_OFFSET) / 4) as usize, false)),
        _ => None,
    }
}

/// FIFO joining: one direction takes the other's storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FifoJoin {
    #[default]
    None,
    /// 8-deep TX, no RX.
    Tx,
    /// 8-deep RX, no TX.
    Rx,
}

/// Errors from block configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PioError {
    #[error("state machine {0} is already claimed")]
    AlreadyClaimed(usize),
    #[error("no unclaimed state machine left")]
    NoFreeStateMachine,
    #[error("state machine {0} does not exist")]
    NoSuchStateMachine(usize),
}

/// An instruction forced into a state machine through its instruction
/// register, bypassing the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forced {
    /// `jmp <entry>`.
    JumpToEntry,
    /// `wait <level> gpio <pin>`: stalls until the pin reads `high`.
    WaitGpio { pin: u8, high: bool },
}

struct StateMachine {
    program: Option<Box<dyn Program>>,
    enabled: bool,
    tx: Fifo,
    rx: Fifo,
    drive: PinDrive,
    /// Latched forced `wait`, evaluated before the program runs.
    pending_wait: Option<(u8, bool)>,
    stall_cycles: u64,
}

impl StateMachine {
    fn new() -> Self {
        Self {
            program: None,
            enabled: false,
            tx: Fifo::default(),
            rx: Fifo::default(),
            drive: PinDrive::RELEASED,
            pending_wait: None,
            stall_cycles: 0,
        }
    }
}

/// One PIO block.
pub struct Pio {
    sms: [StateMachine; NUM_SM],
    claimed: u8,
    /// IRQ flags 0-7.
    irq: u8,
    /// IRQ0 source enables for flags 0-3.
    irq0_inte: u8,
    input_sync_bypass: u32,
    /// Synchroniser stages: `[first, second]`.
    sync: [u32; 2],
}

impl Pio {
    #[must_use]
    pub fn new() -> Self {
        Self {
            sms: [
                StateMachine::new(),
                StateMachine::new(),
                StateMachine::new(),
                StateMachine::new(),
            ],
            claimed: 0,
            irq: 0,
            irq0_inte: 0,
            input_sync_bypass: 0,
            sync: [0; 2],
        }
    }

    /// Claim the state machines in `mask`.
    pub fn claim_sm_mask(&mut self, mask: u8) -> Result<(), PioError> {
        for sm in 0..NUM_SM {
            if mask & (1 << sm) != 0 && self.claimed & (1 << sm) != 0 {
                return Err(PioError::AlreadyClaimed(sm));
            }
        }
        self.claimed |= mask;
        Ok(())
    }

    /// Claim the lowest unclaimed state machine.
    pub fn claim_unused_sm(&mut self) -> Result<usize, PioError> {
        let sm = (0..NUM_SM)
            .find(|&sm| self.claimed & (1 << sm) == 0)
            .ok_or(PioError::NoFreeStateMachine)?;
        self.claimed |= 1 << sm;
        Ok(sm)
    }

    /// Load a program into a state machine and leave it disabled at its
    /// entry point with empty FIFOs.
    pub fn sm_init(&mut self, sm: usize, mut program: Box<dyn Program>) -> Result<(), PioError> {
        let machine = self.sms.get_mut(sm).ok_or(PioError::NoSuchStateMachine(sm))?;
        program.enter();
        machine.program = Some(program);
        machine.enabled = false;
        machine.tx.clear();
        machine.rx.clear();
        machine.pending_wait = None;
        Ok(())
    }

    pub fn set_sm_mask_enabled(&mut self, mask: u8, enabled: bool) {
        for (sm, machine) in self.sms.iter_mut().enumerate() {
            if mask & (1 << sm) != 0 {
                machine.enabled = enabled;
            }
        }
    }

    /// Restart the state machines in `mask`: clear shift state and stalls,
    /// keep the program counter.
    pub fn restart_sm_mask(&mut self, mask: u8) {
        for (sm, machine) in self.sms.iter_mut().enumerate() {
            if mask & (1 << sm) != 0 {
                machine.pending_wait = None;
                if let Some(program) = machine.program.as_mut() {
                    program.restart();
                }
            }
        }
    }

    /// Join a machine's FIFOs. Contents are discarded.
    pub fn set_fifo_join(&mut self, sm: usize, join: FifoJoin) {
        if let Some(machine) = self.sms.get_mut(sm) {
            let (tx, rx) = match join {
                FifoJoin::None => (FIFO_DEPTH, FIFO_DEPTH),
                FifoJoin::Tx => (FIFO_DEPTH * 2, 0),
                FifoJoin::Rx => (0, FIFO_DEPTH * 2),
            };
            machine.tx = Fifo::new(tx);
            machine.rx = Fifo::new(rx);
        }
    }

    pub fn clear_fifos(&mut self, sm: usize) {
        if let Some(machine) = self.sms.get_mut(sm) {
            machine.tx.clear();
            machine.rx.clear();
        }
    }

    /// Force an instruction into a state machine.
    ///
    /// A jump takes effect immediately. A wait is latched and evaluated
    /// each cycle the machine is enabled; a later forced instruction
    /// replaces it.
    pub fn exec(&mut self, sm: usize, instr: Forced) {
        let Some(machine) = self.sms.get_mut(sm) else {
            return;
        };
        match instr {
            Forced::JumpToEntry => {
                machine.pending_wait = None;
                if let Some(program) = machine.program.as_mut() {
                    program.enter();
                }
            }
            Forced::WaitGpio { pin, high } => machine.pending_wait = Some((pin, high)),
        }
    }

    /// Set pin directions for `count` pins from `base` on one machine.
    pub fn set_consecutive_pindirs(&mut self, sm: usize, base: u8, count: u8, output: bool) {
        if let Some(machine) = self.sms.get_mut(sm) {
            let mask = field_mask(base, count);
            if output {
                machine.drive.enable |= mask;
            } else {
                machine.drive.enable &= !mask;
            }
        }
    }

    /// Set output levels of the pins in `mask` on one machine.
    pub fn set_pins_with_mask(&mut self, sm: usize, value: u32, mask: u32) {
        if let Some(machine) = self.sms.get_mut(sm) {
            machine.drive.value = (machine.drive.value & !mask) | (value & mask);
        }
    }

    pub fn set_input_sync_bypass(&mut self, mask: u32) {
        self.input_sync_bypass |= mask;
    }

    #[must_use]
    pub fn input_sync_bypass(&self) -> u32 {
        self.input_sync_bypass
    }

    // === System side of the FIFOs (DMA and CPU) ===

    /// Write a word to a machine's TX FIFO. Returns `false` if full.
    pub fn put_tx(&mut self, sm: usize, word: u32) -> bool {
        self.sms.get_mut(sm).is_some_and(|m| m.tx.push(word))
    }

    /// Read a word from a machine's RX FIFO.
    pub fn get_rx(&mut self, sm: usize) -> Option<u32> {
        self.sms.get_mut(sm).and_then(|m| m.rx.pop())
    }

    /// TX DREQ: asserted while the TX FIFO has room.
    #[must_use]
    pub fn tx_dreq(&self, sm: usize) -> bool {
        self.sms.get(sm).is_some_and(|m| !m.tx.is_full())
    }

    /// RX DREQ: asserted while the RX FIFO holds data.
    #[must_use]
    pub fn rx_dreq(&self, sm: usize) -> bool {
        self.sms.get(sm).is_some_and(|m| !m.rx.is_empty())
    }

    #[must_use]
    pub fn tx_level(&self, sm: usize) -> usize {
        self.sms.get(sm).map_or(0, |m| m.tx.level())
    }

    #[must_use]
    pub fn rx_level(&self, sm: usize) -> usize {
        self.sms.get(sm).map_or(0, |m| m.rx.level())
    }

    #[must_use]
    pub fn is_enabled(&self, sm: usize) -> bool {
        self.sms.get(sm).is_some_and(|m| m.enabled)
    }

    /// The forced wait a machine is currently held on, if any.
    #[must_use]
    pub fn pending_wait(&self, sm: usize) -> Option<(u8, bool)> {
        self.sms.get(sm).and_then(|m| m.pending_wait)
    }

    #[must_use]
    pub fn at_entry(&self, sm: usize) -> bool {
        self.sms
            .get(sm)
            .and_then(|m| m.program.as_ref())
            .is_some_and(|p| p.at_entry())
    }

    #[must_use]
    pub fn state_name(&self, sm: usize) -> &'static str {
        self.sms
            .get(sm)
            .and_then(|m| m.program.as_ref())
            .map_or("unloaded", |p| p.state_name())
    }

    /// Query the program loaded in `sm`.
    #[must_use]
    pub fn program_query(&self, sm: usize, path: &str) -> Option<Value> {
        self.sms.get(sm)?.program.as_ref()?.query(path)
    }

    // === IRQ flags ===

    #[must_use]
    pub fn irq_flags(&self) -> u8 {
        self.irq
    }

    /// Clear IRQ flag `flag` (write-1-to-clear on the IRQ register).
    pub fn interrupt_clear(&mut self, flag: u8) {
        self.irq &= !(1 << flag);
    }

    /// Set IRQ flag `flag` from the host side (the IRQ_FORCE register).
    pub fn interrupt_force(&mut self, flag: u8) {
        self.irq |= 1 << flag;
    }

    /// Route IRQ flag `flag` (0-3) to the block's IRQ0 output.
    pub fn set_irq0_source_enabled(&mut self, flag: u8, enabled: bool) {
        if enabled {
            self.irq0_inte |= 1 << flag;
        } else {
            self.irq0_inte &= !(1 << flag);
        }
    }

    /// Level of the block's IRQ0 output.
    #[must_use]
    pub fn irq0_asserted(&self) -> bool {
        self.irq & self.irq0_inte & 0x0F != 0
    }

    // === Pins ===

    /// Combined output drive of all machines. Higher-numbered machines win
    /// where two drive the same pin.
    #[must_use]
    pub fn drive(&self) -> PinDrive {
        self.sms.iter().fold(PinDrive::RELEASED, |acc, m| PinDrive {
            enable: acc.enable | m.drive.enable,
            value: (acc.value & !m.drive.enable) | (m.drive.value & m.drive.enable),
        })
    }

    /// Advance one cycle with the given external pin levels.
    pub fn tick(&mut self, external: Pins) {
        let synced = self.sync[1];
        self.sync[1] = self.sync[0];
        self.sync[0] = external.0;
        let bypass = self.input_sync_bypass;
        let visible = Pins((external.0 & bypass) | (synced & !bypass));

        for machine in &mut self.sms {
            if !machine.enabled {
                continue;
            }
            let Some(program) = machine.program.as_mut() else {
                continue;
            };
            if let Some((pin, high)) = machine.pending_wait {
                if visible.is_high(pin) == high {
                    machine.pending_wait = None;
                } else {
                    machine.stall_cycles += 1;
                }
                continue;
            }
            let mut io = SmIo::new(
                visible,
                &mut machine.tx,
                &mut machine.rx,
                &mut self.irq,
                &mut machine.drive,
            );
            program.step(&mut io);
        }
    }
}

impl Default for Pio {
    fn default() -> Self {
        Self::new()
    }
}

impl Observable for Pio {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "irq" => return Some(Value::U8(self.irq)),
            "irq0_inte" => return Some(Value::U8(self.irq0_inte)),
            "input_sync_bypass" => return Some(Value::U32(self.input_sync_bypass)),
            "claimed" => return Some(Value::U8(self.claimed)),
            _ => {}
        }
        let rest = path.strip_prefix("sm.")?;
        let (index, field) = rest.split_once('.')?;
        let sm: usize = index.parse().ok()?;
        let machine = self.sms.get(sm)?;
        match field {
            "enabled" => Some(machine.enabled.into()),
            "state" => Some(self.state_name(sm).into()),
            "tx_level" => Some(machine.tx.level().into()),
            "rx_level" => Some(machine.rx.level().into()),
            "tx" => Some(machine.tx.contents().into()),
            "rx" => Some(machine.rx.contents().into()),
            "pindirs" => Some(Value::U32(machine.drive.enable)),
            "pins_out" => Some(Value::U32(machine.drive.value)),
            "stall_cycles" => Some(Value::U64(machine.stall_cycles)),
            "pending_wait" => Some(match machine.pending_wait {
                Some((pin, high)) => format!("gpio{pin}={}", u8::from(high)).into(),
                None => "none".into(),
            }),
            other => other
                .strip_prefix("program.")
                .and_then(|p| machine.program.as_ref()?.query(p)),
        }
    }

    fn query_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = ["irq", "irq0_inte", "input_sync_bypass", "claimed"]
            .iter()
            .map(|s| (*s).to_owned())
            .collect();
        for (sm, machine) in self.sms.iter().enumerate() {
            for field in [
                "enabled",
                "state",
                "tx_level",
                "rx_level",
                "tx",
                "rx",
                "pindirs",
                "pins_out",
                "stall_cycles",
                "pending_wait",
            ] {
                paths.push(format!("sm.{sm}.{field}"));
            }
            if let Some(program) = machine.program.as_ref() {
                for p in program.query_paths() {
                    paths.push(format!("sm.{sm}.program.{p}"));
                }
            }
        }
        paths
    }
}
