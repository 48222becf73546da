//! The three bus capture programs.
//!
//! Each is an explicit automaton: the state is the program counter, pin
//! levels are the transition guards. One state transition per cycle, like
//! one PIO instruction per cycle.

use emu_core::{Observable, Value};
use rp2040_pio::{Program, SmIo};

use crate::bus::{AD_BASE, AD_COUNT, ADDR_BITS, CS_PIN, RD_PIN, WR_PIN};

/// PIO IRQ flag raised by [`ReadDrive`] when a transaction ends with the
/// read path out of step.
pub const READ_FAULT_IRQ: u8 = 0;

/// PIO IRQ flag raised by [`ReadDrive`], together with [`READ_FAULT_IRQ`],
/// when the console sampled an undriven bus during the transaction. Not
/// routed to an interrupt line; the fault handler reads it.
pub const READ_STARVED_IRQ: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CaptureState {
    AwaitSelect,
    /// Address shifted in; waiting for room in the RX FIFO.
    Push(u32),
    AwaitDeselect,
}

/// Captures the address at the falling edge of CS.
///
/// Shifts in the 23 address lines then one zero bit, so the pushed word is
/// the byte offset of the transaction.
#[derive(Debug)]
pub struct AddressCapture {
    state: CaptureState,
    captured: u64,
}

impl AddressCapture {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: CaptureState::AwaitSelect,
            captured: 0,
        }
    }
}

impl Default for AddressCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl Program for AddressCapture {
    fn enter(&mut self) {
        self.state = CaptureState::AwaitSelect;
    }

    fn restart(&mut self) {
        if let CaptureState::Push(_) = self.state {
            self.state = CaptureState::AwaitSelect;
        }
    }

    fn step(&mut self, io: &mut SmIo<'_>) {
        self.state = match self.state {
            CaptureState::AwaitSelect if io.pins().is_low(CS_PIN) => {
                let offset = io.pins().field(AD_BASE, ADDR_BITS) << 1;
                if io.push(offset) {
                    self.captured += 1;
                    CaptureState::AwaitDeselect
                } else {
                    CaptureState::Push(offset)
                }
            }
            CaptureState::Push(offset) => {
                if io.push(offset) {
                    self.captured += 1;
                    CaptureState::AwaitDeselect
                } else {
                    CaptureState::Push(offset)
                }
            }
            CaptureState::AwaitDeselect if io.pins().is_high(CS_PIN) => CaptureState::AwaitSelect,
            state => state,
        };
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            CaptureState::AwaitSelect => "await_select",
            CaptureState::Push(_) => "push",
            CaptureState::AwaitDeselect => "await_deselect",
        }
    }

    fn at_entry(&self) -> bool {
        self.state == CaptureState::AwaitSelect
    }
}

impl Observable for AddressCapture {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "captured" => Some(Value::U64(self.captured)),
            _ => None,
        }
    }

    fn query_paths(&self) -> Vec<String> {
        vec!["captured".to_owned()]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DriveState {
    AwaitSelect,
    AwaitStrobe,
    /// RD low, data on AD0-15.
    Driving,
    /// RD low, TX FIFO empty.
    Stalled,
}

/// Serves read strobes from the TX FIFO.
///
/// On each RD low it drives the next TX word onto AD0-15 and releases the
/// lines on RD high. A transaction that ends (CS high) while stalled or
/// with words still queued leaves the read path out of step with the bus;
/// the program raises [`READ_FAULT_IRQ`] so the host can flush it before
/// the next address arrives.
///
/// RD rising while stalled is an underrun: the console sampled an undriven
/// bus. It is counted but not recovered; the late word is still driven
/// once it arrives and the stream slips by one. A transaction that saw an
/// underrun, or ended stalled, also raises [`READ_STARVED_IRQ`]. Leftover
/// prefetch alone does not: the data served was good.
#[derive(Debug)]
pub struct ReadDrive {
    state: DriveState,
    underrun_noted: bool,
    /// This transaction served at least one strobe late or not at all.
    starved: bool,
    strobes: u64,
    underruns: u64,
    faults: u64,
}

impl ReadDrive {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: DriveState::AwaitSelect,
            underrun_noted: false,
            starved: false,
            strobes: 0,
            underruns: 0,
            faults: 0,
        }
    }

    /// Reads that found the TX FIFO empty when RD rose.
    #[must_use]
    pub fn underruns(&self) -> u64 {
        self.underruns
    }

    fn drive(&mut self, io: &mut SmIo<'_>, word: u32) -> DriveState {
        io.out_pins(AD_BASE, AD_COUNT, word);
        io.set_pindirs(AD_BASE, AD_COUNT, true);
        self.strobes += 1;
        self.underrun_noted = false;
        DriveState::Driving
    }

    fn end_transaction(&mut self, io: &mut SmIo<'_>, out_of_step: bool) -> DriveState {
        io.set_pindirs(AD_BASE, AD_COUNT, false);
        if out_of_step {
            io.set_irq(READ_FAULT_IRQ);
            self.faults += 1;
        }
        if self.starved {
            io.set_irq(READ_STARVED_IRQ);
        }
        self.underrun_noted = false;
        self.starved = false;
        DriveState::AwaitSelect
    }
}

impl Default for ReadDrive {
    fn default() -> Self {
        Self::new()
    }
}

impl Program for ReadDrive {
    fn enter(&mut self) {
        self.state = DriveState::AwaitSelect;
        self.underrun_noted = false;
        self.starved = false;
    }

    fn restart(&mut self) {
        self.underrun_noted = false;
        self.starved = false;
    }

    fn step(&mut self, io: &mut SmIo<'_>) {
        let pins = io.pins();
        self.state = match self.state {
            DriveState::AwaitSelect if pins.is_low(CS_PIN) => DriveState::AwaitStrobe,
            DriveState::AwaitSelect => DriveState::AwaitSelect,
            DriveState::AwaitStrobe if pins.is_high(CS_PIN) => {
                let queued = io.tx_level() > 0;
                self.end_transaction(io, queued)
            }
            DriveState::AwaitStrobe if pins.is_low(RD_PIN) => match io.pull() {
                Some(word) => self.drive(io, word),
                None => DriveState::Stalled,
            },
            DriveState::AwaitStrobe => DriveState::AwaitStrobe,
            DriveState::Driving if pins.is_high(RD_PIN) => {
                io.set_pindirs(AD_BASE, AD_COUNT, false);
                DriveState::AwaitStrobe
            }
            DriveState::Driving => DriveState::Driving,
            DriveState::Stalled if pins.is_high(CS_PIN) => {
                self.starved = true;
                self.end_transaction(io, true)
            }
            DriveState::Stalled => {
                if pins.is_high(RD_PIN) && !self.underrun_noted {
                    self.underrun_noted = true;
                    self.underruns += 1;
                    self.starved = true;
                }
                match io.pull() {
                    Some(word) => self.drive(io, word),
                    None => DriveState::Stalled,
                }
            }
        };
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            DriveState::AwaitSelect => "await_select",
            DriveState::AwaitStrobe => "await_strobe",
            DriveState::Driving => "driving",
            DriveState::Stalled => "stalled",
        }
    }

    fn at_entry(&self) -> bool {
        self.state == DriveState::AwaitSelect
    }
}

impl Observable for ReadDrive {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "strobes" => Some(Value::U64(self.strobes)),
            "underruns" => Some(Value::U64(self.underruns)),
            "faults" => Some(Value::U64(self.faults)),
            _ => None,
        }
    }

    fn query_paths(&self) -> Vec<String> {
        ["strobes", "underruns", "faults"]
            .iter()
            .map(|s| (*s).to_owned())
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteState {
    AwaitSelect,
    AwaitStrobe,
    /// Sampled; waiting for room in the RX FIFO.
    Push(u32),
    AwaitRelease,
}

/// Samples AD0-15 on each WR low and pushes the halfword.
#[derive(Debug)]
pub struct WriteCapture {
    state: WriteState,
    captured: u64,
}

impl WriteCapture {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: WriteState::AwaitSelect,
            captured: 0,
        }
    }

    fn push(&mut self, io: &mut SmIo<'_>, word: u32) -> WriteState {
        if io.push(word) {
            self.captured += 1;
            WriteState::AwaitRelease
        } else {
            WriteState::Push(word)
        }
    }
}

impl Default for WriteCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl Program for WriteCapture {
    fn enter(&mut self) {
        self.state = WriteState::AwaitSelect;
    }

    fn restart(&mut self) {
        if let WriteState::Push(_) = self.state {
            self.state = WriteState::AwaitRelease;
        }
    }

    fn step(&mut self, io: &mut SmIo<'_>) {
        let pins = io.pins();
        self.state = match self.state {
            WriteState::AwaitSelect if pins.is_low(CS_PIN) => WriteState::AwaitStrobe,
            WriteState::AwaitStrobe if pins.is_high(CS_PIN) => WriteState::AwaitSelect,
            WriteState::AwaitStrobe if pins.is_low(WR_PIN) => {
                let word = pins.field(AD_BASE, AD_COUNT);
                self.push(io, word)
            }
            WriteState::Push(word) => self.push(io, word),
            WriteState::AwaitRelease if pins.is_high(WR_PIN) => WriteState::AwaitStrobe,
            state => state,
        };
    }

    fn state_name(&self) -> &'static str {
        match self.state {
            WriteState::AwaitSelect => "await_select",
            WriteState::AwaitStrobe => "await_strobe",
            WriteState::Push(_) => "push",
            WriteState::AwaitRelease => "await_release",
        }
    }

    fn at_entry(&self) -> bool {
        self.state == WriteState::AwaitSelect
    }
}

impl Observable for WriteCapture {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "captured" => Some(Value::U64(self.captured)),
            _ => None,
        }
    }

    fn query_paths(&self) -> Vec<String> {
        vec!["captured".to_owned()]
    }
}
