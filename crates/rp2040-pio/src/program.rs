//! Programs run by state machines.
//!
//! A program is an explicit automaton: its program counter is a tagged
//! state, its wait instructions are pin-level guards evaluated once per
//! cycle. The block owns the FIFOs, IRQ flags and pin drive; programs reach
//! them through [`SmIo`].

use emu_core::{Observable, PinDrive, Pins};

use crate::fifo::Fifo;

/// A program loaded into one state machine.
pub trait Program: Observable {
    /// Jump to the program's entry point (a forced `jmp` to its origin).
    fn enter(&mut self);

    /// Clear shift counters and scratch state without moving the program
    /// counter (the effect of an SM restart).
    fn restart(&mut self) {}

    /// Execute one cycle.
    fn step(&mut self, io: &mut SmIo<'_>);

    /// Name of the current state, for inspection.
    fn state_name(&self) -> &'static str;

    /// Whether the program is at its entry point.
    fn at_entry(&self) -> bool;
}

/// What a state machine can see and touch during one cycle.
pub struct SmIo<'a> {
    pins: Pins,
    tx: &'a mut Fifo,
    rx: &'a mut Fifo,
    irq: &'a mut u8,
    drive: &'a mut PinDrive,
}

impl<'a> SmIo<'a> {
    pub(crate) fn new(
        pins: Pins,
        tx: &'a mut Fifo,
        rx: &'a mut Fifo,
        irq: &'a mut u8,
        drive: &'a mut PinDrive,
    ) -> Self {
        Self {
            pins,
            tx,
            rx,
            irq,
            drive,
        }
    }

    /// Pin levels as seen through the input synchronisers.
    #[must_use]
    pub fn pins(&self) -> Pins {
        self.pins
    }

    /// `pull noblock`-style access: take the oldest TX word if any.
    pub fn pull(&mut self) -> Option<u32> {
        self.tx.pop()
    }

    #[must_use]
    pub fn tx_level(&self) -> usize {
        self.tx.level()
    }

    /// `push`: returns `false` (stall) if the RX FIFO is full.
    pub fn push(&mut self, word: u32) -> bool {
        self.rx.push(word)
    }

    /// Raise a block IRQ flag (`irq set n`).
    pub fn set_irq(&mut self, flag: u8) {
        *self.irq |= 1 << flag;
    }

    /// `out pins`: write `count` bits of `value` to the pins starting at `base`.
    pub fn out_pins(&mut self, base: u8, count: u8, value: u32) {
        let mask = field_mask(base, count);
        self.drive.value = (self.drive.value & !mask) | ((value << base) & mask);
    }

    /// `out pindirs`: switch pins between output (`true`) and input.
    pub fn set_pindirs(&mut self, base: u8, count: u8, output: bool) {
        let mask = field_mask(base, count);
        if output {
            self.drive.enable |= mask;
        } else {
            self.drive.enable &= !mask;
        }
    }
}

pub(crate) fn field_mask(base: u8, count: u8) -> u32 {
    let bits = if count >= 32 { u32::MAX } else { (1u32 << count) - 1 };
    bits << base
}
