//! Console bus timing.

use gba_cart::BusTiming;

/// GBA system clock cycles per frame (228 lines of 1232 cycles).
pub const CYCLES_PER_FRAME: u64 = 280_896;

/// Bus timing and frame length, in host cycles unless noted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsoleConfig {
    /// Host cycles per console clock.
    pub clock: u64,
    /// Address driven with CS still high.
    pub address_setup: u64,
    /// Address held after CS falls, before the first strobe.
    pub address_hold: u64,
    /// Strobe high between two accesses of a burst.
    pub strobe_recovery: u64,
    /// Bus idle between transactions, after CS rises.
    pub bus_idle: u64,
    /// Wait states of a non-sequential access, in console clocks.
    pub wait_n: u64,
    /// Wait states of a sequential access, in console clocks.
    pub wait_s: u64,
    /// Frame length.
    pub frame_ticks: u64,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            clock: 15,
            address_setup: 8,
            address_hold: 8,
            strobe_recovery: 8,
            bus_idle: 24,
            wait_n: 4,
            wait_s: 1,
            frame_ticks: CYCLES_PER_FRAME * 15,
        }
    }
}

impl ConsoleConfig {
    /// Same bus timing with a shorter frame, for tests.
    #[must_use]
    pub fn with_frame_ticks(frame_ticks: u64) -> Self {
        Self {
            frame_ticks,
            ..Self::default()
        }
    }

    /// Strobe width of one access.
    #[must_use]
    pub const fn strobe(&self, sequential: bool) -> u64 {
        let wait = if sequential { self.wait_s } else { self.wait_n };
        (1 + wait) * self.clock
    }

    /// Shortest intervals between bus events, for checking the cartridge's
    /// interrupt budget.
    #[must_use]
    pub const fn bus_timing(&self) -> BusTiming {
        BusTiming {
            deselect: self.bus_idle + self.address_setup,
            select: self.address_hold + self.strobe(false) + self.strobe_recovery,
        }
    }

    /// Host cycles for `cycles` console clocks.
    #[must_use]
    pub const fn console_cycles(&self, cycles: u64) -> u64 {
        cycles * self.clock
    }
}
