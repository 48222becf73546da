//! GBA cartridge-bus emulation on an RP2040 host.
//!
//! The cartridge serves a memory image to the console over the 16-bit
//! multiplexed cartridge bus. Three PIO state machines watch the bus: one
//! captures the address at each chip select, one drives read data, one
//! captures write data. A chain of DMA channels turns each captured offset
//! into a host pointer and retargets the data channels, so no CPU work sits
//! between an address and its first data word. Interrupt handlers only
//! resynchronise and recover.
//!
//! | Pin    | Function                          |
//! |--------|-----------------------------------|
//! | 0-15   | AD0-AD15: address low / data      |
//! | 16-22  | A16-A22: address high             |
//! | 24     | WR (active low)                   |
//! | 25     | RD (active low)                   |
//! | 26     | CS (active low)                   |
//!
//! The host clock is 250 MHz; every time in this crate is in host cycles.
//!
//! A small mailbox at image offset `0xC0` lets host firmware and console
//! software exchange a framebuffer, double-buffered audio, a vblank signal
//! and the key state. See [`mailbox`].

mod board;
pub mod bus;
pub mod buttons;
mod cartridge;
mod config;
mod error;
pub mod image;
mod irq;
pub mod mailbox;
mod programs;
mod resolver;
mod supervisor;

pub use board::{Board, HostApp};
pub use buttons::{Button, Buttons};
pub use cartridge::{CS_SM, Cartridge, HOLDER_ADDR, RD_SM, READ_CH, WRITE_CH};
pub use config::{BusTiming, CartConfig, HOST_CLOCK_HZ, IrqTiming};
pub use error::CartError;
pub use image::{BackingImage, BusAddr, HostAddr, IMAGE_BASE, translate, untranslate};
pub use irq::{Dispatcher, Irq};
pub use mailbox::{
    AudioFormat, ConsoleMailbox, Display, HandshakeError, HostMailbox, MailboxMemory,
    MailboxSnapshot,
};
pub use programs::{AddressCapture, READ_FAULT_IRQ, READ_STARVED_IRQ, ReadDrive, WriteCapture};
pub use resolver::AddressResolver;
