use emu_core::{PinDrive, Pins};
use gba_cart::{Board, Cartridge, HostApp};

/// Whatever sits in the cartridge slot.
pub trait CartSlot {
    /// Pins the cartridge drives this cycle.
    fn drive(&self) -> PinDrive;

    /// Advance one host cycle with the bus at `lines`.
    fn tick(&mut self, lines: Pins);
}

impl CartSlot for Cartridge {
    fn drive(&self) -> PinDrive {
        Cartridge::drive(self)
    }

    fn tick(&mut self, lines: Pins) {
        Cartridge::tick(self, lines);
    }
}

impl<A: HostApp> CartSlot for Board<A> {
    fn drive(&self) -> PinDrive {
        Board::drive(self)
    }

    fn tick(&mut self, lines: Pins) {
        Board::tick(self, lines);
    }
}

/// An empty slot: the bus floats high.
impl CartSlot for () {
    fn drive(&self) -> PinDrive {
        PinDrive::RELEASED
    }

    fn tick(&mut self, _lines: Pins) {}
}
