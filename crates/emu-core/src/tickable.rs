//! Components advanced one host cycle at a time.

use crate::Ticks;

/// A component that advances on the host clock.
///
/// Free-running peripherals (state machine blocks, DMA controllers, bus
/// masters) implement this. Components that depend on external signals
/// sample them from state handed to them before `tick` is called.
pub trait Tickable {
    /// Advance by one host cycle.
    fn tick(&mut self);

    /// Advance by several host cycles.
    ///
    /// Must behave exactly like calling `tick()` `count` times.
    fn tick_n(&mut self, count: Ticks) {
        let mut remaining = count.get();
        while remaining > 0 {
            self.tick();
            remaining -= 1;
        }
    }
}
