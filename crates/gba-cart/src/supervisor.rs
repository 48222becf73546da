//! Fault and reset supervision.
//!
//! Two recovery paths exist. A read that ends out of step (data still
//! queued, or a strobe that found nothing) is recovered locally by the
//! PIO IRQ 0 handler. Only the second case marks the read channel's
//! error flag. WR, RD and CS all low at a latch means the console is off
//! or the cartridge is half inserted; the latch handler then resets every
//! state machine and the latch stage.

use rp2040_pio::Forced;
use tracing::{debug, trace};

use crate::bus::{BUS_MASK, CS_PIN, control_lines_low};
use crate::cartridge::{Cartridge, READ_CH, RD_SM, WRITE_CH};
use crate::image::IMAGE_BASE;
use crate::programs::{READ_FAULT_IRQ, READ_STARVED_IRQ};

impl Cartridge {
    /// Return every state machine and the latch stage to the state of a
    /// fresh start, waiting for the console to deselect the cartridge.
    ///
    /// Idempotent: a second reset with no bus activity in between leaves
    /// the same state.
    pub fn full_reset(&mut self) {
        self.dma
            .abort(1 << READ_CH | 1 << WRITE_CH | 1 << self.latch_ch);

        let mask = self.sm_mask();
        self.pio.set_sm_mask_enabled(mask, false);
        for sm in self.sm_indices() {
            self.pio.clear_fifos(sm);
        }
        self.pio.restart_sm_mask(mask);
        self.pio.interrupt_clear(READ_FAULT_IRQ);
        self.pio.interrupt_clear(READ_STARVED_IRQ);
        for sm in self.sm_indices() {
            self.pio.exec(sm, Forced::JumpToEntry);
            self.pio.set_consecutive_pindirs(sm, 0, 32, false);
            self.pio.set_pins_with_mask(sm, 0, BUS_MASK);
            self.pio.exec(
                sm,
                Forced::WaitGpio {
                    pin: CS_PIN,
                    high: true,
                },
            );
        }

        self.dma.start(self.latch_ch);
        self.pio.set_sm_mask_enabled(mask, true);
        self.full_resets += 1;
        debug!(count = self.full_resets, "full reset");
    }

    /// DMA IRQ 0: a new address was latched.
    ///
    /// Returns `true` when the control lines showed a desynchronised bus
    /// and a full reset was performed.
    pub(crate) fn on_latch_complete(&mut self) -> bool {
        self.dma.sniffer_set_data_accumulator(IMAGE_BASE);
        self.dma.acknowledge_irq0(self.latch_ch);
        let target = IMAGE_BASE.wrapping_add(self.holder);
        self.dma.set_write_addr(WRITE_CH, target, true);
        trace!(offset = self.holder, target, "latched");

        if control_lines_low(self.lines) {
            self.full_reset();
            return true;
        }
        false
    }

    /// PIO IRQ 0: a read transaction ended out of step.
    ///
    /// Leftover prefetch is only flushed. A transaction the read drive
    /// could not serve in time also marks the read channel's error flag,
    /// which holds until the next retrigger.
    pub(crate) fn on_read_fault(&mut self) {
        let starved = self.pio.irq_flags() & 1 << READ_STARVED_IRQ != 0;
        self.dma.abort(1 << READ_CH | 1 << WRITE_CH);
        self.pio.interrupt_clear(READ_FAULT_IRQ);
        self.pio.interrupt_clear(READ_STARVED_IRQ);
        self.pio.clear_fifos(RD_SM);
        if starved {
            self.dma.set_read_error(READ_CH);
        }
        self.local_faults += 1;
        debug!(count = self.local_faults, starved, "local read recovery");
    }
}

#[cfg(test)]
mod tests {
    use emu_core::{Observable, Pins};

    use super::*;
    use crate::bus::{IDLE, POWER_OFF, address_phase};
    use crate::cartridge::CS_SM;
    use crate::config::CartConfig;

    fn started() -> Cartridge {
        let mut cart = Cartridge::new(CartConfig::with_program(vec![0xAB; 0x400]))
            .expect("valid config");
        cart.start(false);
        cart
    }

    fn run(cart: &mut Cartridge, lines: Pins, cycles: usize) {
        for _ in 0..cycles {
            cart.tick(lines);
        }
    }

    #[test]
    fn reset_is_idempotent() {
        let mut cart = started();
        cart.full_reset();
        let first: Vec<_> = cart
            .query_paths()
            .into_iter()
            .filter(|p| !p.starts_with("supervisor.") && !p.contains("triggers"))
            .map(|p| (cart.query(&p), p))
            .collect();
        cart.full_reset();
        for (value, path) in first {
            assert_eq!(cart.query(&path), value, "{path}");
        }
        assert_eq!(cart.full_resets(), 2);
    }

    #[test]
    fn reset_waits_for_deselect() {
        let mut cart = started();
        cart.full_reset();
        for sm in cart.sm_indices() {
            assert_eq!(cart.pio().pending_wait(sm), Some((CS_PIN, true)));
            assert!(cart.pio().is_enabled(sm));
            assert!(cart.pio().at_entry(sm));
        }
        assert!(cart.dma().channel(cart.latch_ch).is_busy());
        assert!(!cart.dma().channel(READ_CH).is_busy());
    }

    #[test]
    fn power_off_resets_once() {
        let mut cart = started();
        run(&mut cart, IDLE, 8);
        run(&mut cart, POWER_OFF, 400);
        assert_eq!(cart.full_resets(), 1);
        assert_eq!(cart.pio().pending_wait(CS_SM), Some((CS_PIN, true)));
    }

    #[test]
    fn latch_retargets_the_write_channel() {
        let mut cart = started();
        run(&mut cart, address_phase(0x200), 8);
        run(&mut cart, address_phase(0x200).with(CS_PIN, false), 60);
        assert_eq!(cart.dma().channel(WRITE_CH).write_addr(), IMAGE_BASE + 0x200);
        assert_eq!(cart.resolver().resolve(), IMAGE_BASE);
        assert_eq!(cart.full_resets(), 0);
    }

    #[test]
    fn leftover_prefetch_is_flushed_without_an_error() {
        let mut cart = started();
        cart.pio.interrupt_force(READ_FAULT_IRQ);
        cart.on_read_fault();
        assert!(!cart.dma().channel(READ_CH).read_error());
        assert_eq!(cart.pio().irq_flags(), 0);
        assert_eq!(cart.local_faults(), 1);
    }

    #[test]
    fn starved_read_recovers_locally_and_marks_the_channel() {
        let mut cart = started();
        cart.pio.interrupt_force(READ_FAULT_IRQ);
        cart.pio.interrupt_force(READ_STARVED_IRQ);
        cart.on_read_fault();
        assert!(cart.dma().channel(READ_CH).read_error());
        assert_eq!(cart.pio().irq_flags(), 0);
        assert!(!cart.dma().channel(READ_CH).is_busy());
        assert_eq!(cart.pio().tx_level(RD_SM), 0);
        assert_eq!(cart.local_faults(), 1);
        assert_eq!(cart.full_resets(), 0);
    }
}
