//! Runner for the GBA cartridge bridge.
//!
//! Puts the demo host firmware on a simulated cartridge, plugs it into the
//! simulated console and runs whole frames, headless or behind a JSON-RPC
//! server.

pub mod capture;
pub mod demo;
pub mod mcp;

use gba_cart::{Board, CartConfig, CartError};
use gba_console::{Console, ConsoleConfig};
use tracing::info;

pub use demo::DemoHost;

/// Console, cartridge and host firmware.
pub type Machine = Console<Board<DemoHost>>;

/// How to build a [`Machine`].
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Program image served from offset 0.
    pub program: Vec<u8>,
    /// Hold the capture programs until the console is powered.
    pub wait_power: bool,
    /// Framebuffer lines the demo draws.
    pub display_height: u16,
    pub console: ConsoleConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            program: demo::image(),
            wait_power: true,
            display_height: gba_cart::mailbox::SCREEN_HEIGHT,
            console: ConsoleConfig::default(),
        }
    }
}

impl RunConfig {
    /// Build the machine and let the console read the header.
    pub fn build(&self) -> Result<Machine, CartError> {
        let cart = CartConfig {
            program: self.program.clone(),
            wait_power: self.wait_power,
            ..CartConfig::default()
        };
        cart.validate(&self.console.bus_timing())?;
        let board = Board::new(cart, DemoHost::new(self.display_height))?;
        let mut console = Console::new(board, self.console);
        let header = console.boot();
        info!(title = %header.title, valid = header.valid, "booted");
        Ok(console)
    }
}
