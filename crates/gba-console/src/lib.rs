//! A simulated GBA console for the cartridge to talk to.
//!
//! Nothing here emulates the console's CPU. [`CartBus`] generates bus
//! transactions with the console's timing and wait states, and
//! [`Console`] runs a fixed client of the cartridge mailbox on top of it:
//! key publishing, framebuffer copies, double-buffered audio and the
//! vblank signal.
//!
//! One console clock is 15 host cycles (16.78 MHz against 250 MHz). A
//! frame is 280,896 console clocks.

mod audio;
mod bus;
mod config;
mod console;
pub mod header;
pub mod screen;
mod slot;

pub use audio::Audio;
pub use bus::CartBus;
pub use config::{CYCLES_PER_FRAME, ConsoleConfig};
pub use console::Console;
pub use header::Header;
pub use screen::Screen;
pub use slot::CartSlot;
