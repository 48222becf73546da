//! Host clock configuration.

use crate::Ticks;

/// Host system clock.
///
/// The host runs every peripheral from one clock. Real-time budgets given
/// in nanoseconds (bus setup intervals, strobe widths) are converted to
/// cycles of this clock before they are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterClock {
    /// Clock frequency in Hz (e.g., `250_000_000` for an overclocked RP2040).
    pub frequency_hz: u64,
}

impl MasterClock {
    #[must_use]
    pub const fn new(frequency_hz: u64) -> Self {
        Self { frequency_hz }
    }

    /// Whole cycles that fit in `nanos` nanoseconds (rounded down).
    #[must_use]
    pub const fn ticks_in_nanos(&self, nanos: u64) -> Ticks {
        Ticks::new(nanos * self.frequency_hz / 1_000_000_000)
    }

    /// Duration of `ticks` cycles in nanoseconds (rounded down).
    #[must_use]
    pub const fn nanos(&self, ticks: Ticks) -> u64 {
        ticks.get() * 1_000_000_000 / self.frequency_hz
    }
}
