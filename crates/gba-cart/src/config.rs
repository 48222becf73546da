//! Cartridge configuration.

use emu_core::{MasterClock, Ticks};
use tracing::warn;

use crate::error::CartError;
use crate::image::MAX_CAPACITY;

/// Host clock the firmware runs at (overclocked RP2040).
pub const HOST_CLOCK_HZ: u64 = 250_000_000;

/// Interrupt timing of the host CPU, in host cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IrqTiming {
    /// From a line asserting to the first handler instruction.
    pub entry_latency: u32,
    /// Local fault recovery (PIO IRQ 0).
    pub pio_handler_cost: u32,
    /// Reseed and write retarget (DMA IRQ 0), without a full reset.
    pub dma_handler_cost: u32,
    /// Extra cost when the DMA handler performs a full reset.
    pub full_reset_cost: u32,
}

impl Default for IrqTiming {
    fn default() -> Self {
        Self {
            entry_latency: 12,
            pio_handler_cost: 10,
            dma_handler_cost: 16,
            full_reset_cost: 48,
        }
    }
}

/// Shortest intervals the console leaves between bus events, in host
/// cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusTiming {
    /// CS high between two transactions.
    pub deselect: u64,
    /// CS low for the shortest transaction.
    pub select: u64,
}

/// Cartridge configuration.
#[derive(Debug, Clone)]
pub struct CartConfig {
    /// Program image served from offset 0.
    pub program: Vec<u8>,
    /// Image size in bytes, program plus reserved buffers.
    pub capacity: usize,
    /// Hold the capture programs until RD reads high (console powered).
    pub wait_power: bool,
    pub clock: MasterClock,
    pub irq: IrqTiming,
}

impl Default for CartConfig {
    fn default() -> Self {
        Self {
            program: Vec::new(),
            capacity: 256 * 1024,
            wait_power: true,
            clock: MasterClock::new(HOST_CLOCK_HZ),
            irq: IrqTiming::default(),
        }
    }
}

impl CartConfig {
    #[must_use]
    pub fn with_program(program: Vec<u8>) -> Self {
        Self {
            program,
            ..Self::default()
        }
    }

    /// Check static settings and the interrupt budget against the
    /// console's bus timing.
    ///
    /// Two deadlines exist. Local recovery after a read must finish while
    /// CS is still high, or it flushes the next transaction's data. The
    /// reseed after a latch must finish before CS rises again, or the
    /// recovery for that transaction end jumps ahead of it.
    pub fn validate(&self, bus: &BusTiming) -> Result<(), CartError> {
        if self.capacity > MAX_CAPACITY {
            return Err(CartError::CapacityTooLarge(self.capacity));
        }
        if self.program.len() > self.capacity {
            return Err(CartError::ProgramTooLarge {
                len: self.program.len(),
                capacity: self.capacity,
            });
        }
        if self.clock.frequency_hz == 0 {
            return Err(CartError::Config("host clock frequency is zero".to_owned()));
        }

        let entry = u64::from(self.irq.entry_latency);
        let recovery = entry + u64::from(self.irq.pio_handler_cost);
        // The fault is raised one cycle after CS rises.
        let recovery_window = bus.deselect.saturating_sub(1);
        if recovery >= recovery_window {
            warn!(
                needed = recovery,
                available = recovery_window,
                "local recovery overruns the deselect interval"
            );
            return Err(CartError::RealTimeBudget {
                what: "local recovery",
                needed: recovery,
                available: recovery_window,
            });
        }

        let reseed = entry + u64::from(self.irq.dma_handler_cost);
        let reseed_window = bus.select;
        if reseed >= reseed_window {
            warn!(
                needed = reseed,
                available = reseed_window,
                "accumulator reseed overruns the transaction"
            );
            return Err(CartError::RealTimeBudget {
                what: "accumulator reseed",
                needed: reseed,
                available: reseed_window,
            });
        }
        Ok(())
    }

    /// Host cycles in `nanos` nanoseconds at the configured clock.
    #[must_use]
    pub fn cycles(&self, nanos: u64) -> Ticks {
        self.clock.ticks_in_nanos(nanos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GBA_LIKE: BusTiming = BusTiming {
        deselect: 32,
        select: 53,
    };

    #[test]
    fn defaults_fit_console_timing() {
        assert_eq!(CartConfig::default().validate(&GBA_LIKE), Ok(()));
    }

    #[test]
    fn slow_interrupts_are_rejected() {
        let mut config = CartConfig::default();
        config.irq.entry_latency = 40;
        assert!(matches!(
            config.validate(&GBA_LIKE),
            Err(CartError::RealTimeBudget {
                what: "local recovery",
                ..
            })
        ));

        let mut config = CartConfig::default();
        config.irq.dma_handler_cost = 200;
        assert!(matches!(
            config.validate(&GBA_LIKE),
            Err(CartError::RealTimeBudget {
                what: "accumulator reseed",
                ..
            })
        ));
    }

    #[test]
    fn oversized_program_is_rejected() {
        let config = CartConfig {
            capacity: 0x100,
            ..CartConfig::with_program(vec![0; 0x200])
        };
        assert!(matches!(
            config.validate(&GBA_LIKE),
            Err(CartError::ProgramTooLarge { .. })
        ));
    }

    #[test]
    fn nanosecond_budgets() {
        assert_eq!(CartConfig::default().cycles(100), Ticks(25));
    }
}
