//! The cartridge board: the bus machinery plus the host's main loop.

use emu_core::{Observable, PinDrive, Pins, Value};

use crate::cartridge::Cartridge;
use crate::config::CartConfig;
use crate::error::CartError;
use crate::image::BackingImage;

/// Host firmware running in thread mode.
///
/// The main loop sleeps until an interrupt handler returns, then calls
/// [`update`](Self::update). All console communication goes through the
/// mailbox in `image`, so an update must not assume the console has seen
/// anything it wrote last time.
pub trait HostApp {
    /// Reserve buffers and fill in the mailbox before the bus starts.
    fn init(&mut self, image: &mut BackingImage) -> Result<(), CartError> {
        let _ = image;
        Ok(())
    }

    /// One pass of the main loop.
    fn update(&mut self, image: &mut BackingImage);
}

/// A host that never touches the mailbox.
impl HostApp for () {
    fn update(&mut self, _image: &mut BackingImage) {}
}

pub struct Board<A: HostApp> {
    cart: Cartridge,
    app: A,
    updates: u64,
}

impl<A: HostApp> Board<A> {
    /// Initialise the cartridge and the app, start the bus and run the
    /// first main-loop pass.
    pub fn new(config: CartConfig, mut app: A) -> Result<Self, CartError> {
        let mut cart = Cartridge::new(config)?;
        app.init(cart.image_mut())?;
        cart.start_configured();
        app.update(cart.image_mut());
        Ok(Self {
            cart,
            app,
            updates: 1,
        })
    }

    /// Advance one host cycle. Returns `true` when the main loop woke.
    pub fn tick(&mut self, lines: Pins) -> bool {
        let woke = self.cart.tick(lines);
        if woke {
            self.app.update(self.cart.image_mut());
            self.updates += 1;
        }
        woke
    }

    #[must_use]
    pub fn drive(&self) -> PinDrive {
        self.cart.drive()
    }

    #[must_use]
    pub fn cart(&self) -> &Cartridge {
        &self.cart
    }

    pub fn cart_mut(&mut self) -> &mut Cartridge {
        &mut self.cart
    }

    #[must_use]
    pub fn app(&self) -> &A {
        &self.app
    }

    pub fn app_mut(&mut self) -> &mut A {
        &mut self.app
    }

    /// Main-loop passes so far.
    #[must_use]
    pub fn updates(&self) -> u64 {
        self.updates
    }
}

impl<A: HostApp> Observable for Board<A> {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "board.updates" => Some(Value::U64(self.updates)),
            _ => self.cart.query(path),
        }
    }

    fn query_paths(&self) -> Vec<String> {
        let mut paths = vec!["board.updates".to_owned()];
        paths.extend(self.cart.query_paths());
        paths
    }
}
