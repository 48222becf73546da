//! Interrupt dispatch for the host CPU.
//!
//! A single core services level-triggered lines one handler at a time. A
//! handler runs to completion: from the cycle its line is taken, the core
//! is busy for the entry latency plus the handler's cost, and the
//! handler's effects land at the end of that window. When several lines
//! are asserted at once the lowest IRQ number wins.

use emu_core::{Observable, Value};

use crate::config::IrqTiming;

/// Interrupt lines the cartridge uses, by RP2040 IRQ number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Irq {
    Pio0Irq0 = 7,
    DmaIrq0 = 11,
}

impl Irq {
    #[must_use]
    pub const fn number(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub const fn from_number(number: u32) -> Option<Self> {
        match number {
            7 => Some(Self::Pio0Irq0),
            11 => Some(Self::DmaIrq0),
            _ => None,
        }
    }

    #[must_use]
    pub const fn mask(self) -> u32 {
        1 << self as u32
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Pio0Irq0 => "pio0_irq_0",
            Self::DmaIrq0 => "dma_irq_0",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    /// Handler for `irq` is being entered or is running.
    Servicing { irq: Irq, remaining: u32 },
    /// Handler effects have landed but it is still executing.
    Tail { remaining: u32 },
}

/// Single-core interrupt dispatcher.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    timing: IrqTiming,
    enabled: u32,
    phase: Phase,
    pio_serviced: u64,
    dma_serviced: u64,
    /// Cycles an enabled line stayed asserted while the core was busy.
    blocked_cycles: u64,
}

impl Dispatcher {
    #[must_use]
    pub fn new(timing: IrqTiming) -> Self {
        Self {
            timing,
            enabled: 0,
            phase: Phase::Idle,
            pio_serviced: 0,
            dma_serviced: 0,
            blocked_cycles: 0,
        }
    }

    pub fn set_enabled(&mut self, irq: Irq, enabled: bool) {
        if enabled {
            self.enabled |= irq.mask();
        } else {
            self.enabled &= !irq.mask();
        }
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    /// Keep the core busy for `cycles` more after the current handler.
    pub fn extend(&mut self, cycles: u32) {
        if cycles > 0 {
            self.phase = Phase::Tail { remaining: cycles };
        }
    }

    fn cost(&self, irq: Irq) -> u32 {
        let handler = match irq {
            Irq::Pio0Irq0 => self.timing.pio_handler_cost,
            Irq::DmaIrq0 => self.timing.dma_handler_cost,
        };
        (self.timing.entry_latency + handler).max(1)
    }

    /// Advance one cycle. `lines` has bit `n` set while IRQ `n` is
    /// asserted. Returns the interrupt whose handler must take effect now.
    pub fn tick(&mut self, lines: u32) -> Option<Irq> {
        let active = lines & self.enabled;
        match self.phase {
            Phase::Idle => {
                let irq = Irq::from_number(active.trailing_zeros())?;
                self.phase = Phase::Servicing {
                    irq,
                    remaining: self.cost(irq),
                };
                None
            }
            Phase::Servicing { irq, remaining } if remaining <= 1 => {
                self.phase = Phase::Idle;
                match irq {
                    Irq::Pio0Irq0 => self.pio_serviced += 1,
                    Irq::DmaIrq0 => self.dma_serviced += 1,
                }
                Some(irq)
            }
            Phase::Servicing { irq, remaining } => {
                if active & !irq.mask() != 0 {
                    self.blocked_cycles += 1;
                }
                self.phase = Phase::Servicing {
                    irq,
                    remaining: remaining - 1,
                };
                None
            }
            Phase::Tail { remaining } => {
                if active != 0 {
                    self.blocked_cycles += 1;
                }
                self.phase = if remaining <= 1 {
                    Phase::Idle
                } else {
                    Phase::Tail {
                        remaining: remaining - 1,
                    }
                };
                None
            }
        }
    }
}

impl Observable for Dispatcher {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "enabled" => Some(Value::U32(self.enabled)),
            "active" => Some(match self.phase {
                Phase::Idle => "idle".into(),
                Phase::Servicing { irq, .. } => irq.name().into(),
                Phase::Tail { .. } => "tail".into(),
            }),
            "serviced.pio0_irq_0" => Some(Value::U64(self.pio_serviced)),
            "serviced.dma_irq_0" => Some(Value::U64(self.dma_serviced)),
            "blocked_cycles" => Some(Value::U64(self.blocked_cycles)),
            _ => None,
        }
    }

    fn query_paths(&self) -> Vec<String> {
        [
            "enabled",
            "active",
            "serviced.pio0_irq_0",
            "serviced.dma_irq_0",
            "blocked_cycles",
        ]
        .iter()
        .map(|s| (*s).to_owned())
        .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher() -> Dispatcher {
        let mut nvic = Dispatcher::new(IrqTiming {
            entry_latency: 2,
            pio_handler_cost: 1,
            dma_handler_cost: 3,
            full_reset_cost: 10,
        });
        nvic.set_enabled(Irq::Pio0Irq0, true);
        nvic.set_enabled(Irq::DmaIrq0, true);
        nvic
    }

    #[test]
    fn handler_lands_after_latency_plus_cost() {
        let mut nvic = dispatcher();
        let lines = Irq::DmaIrq0.mask();
        let fired: Vec<_> = (0..6).map(|_| nvic.tick(lines)).collect();
        assert_eq!(fired[..5], [None; 5]);
        assert_eq!(fired[5], Some(Irq::DmaIrq0));
        assert!(nvic.is_idle());
    }

    #[test]
    fn lower_number_wins() {
        let mut nvic = dispatcher();
        let lines = Irq::DmaIrq0.mask() | Irq::Pio0Irq0.mask();
        let first = (0..10).find_map(|_| nvic.tick(lines));
        assert_eq!(first, Some(Irq::Pio0Irq0));
    }

    #[test]
    fn disabled_lines_are_ignored() {
        let mut nvic = dispatcher();
        nvic.set_enabled(Irq::DmaIrq0, false);
        assert!((0..20).all(|_| nvic.tick(Irq::DmaIrq0.mask()).is_none()));
        assert!(nvic.is_idle());
    }

    #[test]
    fn tail_holds_off_the_next_handler() {
        let mut nvic = dispatcher();
        let lines = Irq::Pio0Irq0.mask();
        assert_eq!((0..4).find_map(|_| nvic.tick(lines)), Some(Irq::Pio0Irq0));
        nvic.extend(5);
        assert!((0..5).all(|_| nvic.tick(lines).is_none()));
        assert!(nvic.is_idle());
        assert_eq!(nvic.query("blocked_cycles"), Some(Value::U64(5)));
    }
}
