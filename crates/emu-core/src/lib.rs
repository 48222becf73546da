//! Core traits and types for cycle-stepped hardware simulation.
//!
//! Everything advances on the host system clock. Peripheral timing, bus
//! timing and interrupt latency are all expressed in host cycles.

mod clock;
mod observable;
mod pins;
mod tickable;
mod ticks;

pub use clock::MasterClock;
pub use observable::{Observable, Value};
pub use pins::{PinDrive, Pins};
pub use tickable::Tickable;
pub use ticks::Ticks;
