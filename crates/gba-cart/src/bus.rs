//! Cartridge-bus wiring on the host GPIO bank.
//!
//! | GPIO  | Signal   | Notes                                      |
//! |-------|----------|--------------------------------------------|
//! | 0-15  | AD0-AD15 | address low during the address phase, data after |
//! | 16-22 | A16-A22  | address high                               |
//! | 24    | /WR      | write strobe, active low                   |
//! | 25    | /RD      | read strobe, active low                    |
//! | 26    | /CS      | chip select, active low                    |
//!
//! The console addresses the cartridge in halfwords. 23 address lines
//! cover a 16 MiB byte window.

use emu_core::Pins;

pub const AD_BASE: u8 = 0;
pub const AD_COUNT: u8 = 16;
/// Address lines wired (AD0-15 plus A16-22).
pub const ADDR_BITS: u8 = 23;
pub const WR_PIN: u8 = 24;
pub const RD_PIN: u8 = 25;
pub const CS_PIN: u8 = 26;

/// Every pin the cartridge touches.
pub const BUS_MASK: u32 = ((1 << ADDR_BITS) - 1) | 1 << WR_PIN | 1 << RD_PIN | 1 << CS_PIN;

/// Largest byte offset the bus can address, plus one.
pub const BUS_WINDOW: u32 = 1 << (ADDR_BITS + 1);

/// Base of the cartridge ROM region in the console's memory map.
pub const ROM_BASE: u32 = 0x0800_0000;

/// Lines with nobody driving them: pulled high.
pub const IDLE: Pins = Pins(BUS_MASK);

/// Lines with the console powered off or the cartridge pulled: all low.
pub const POWER_OFF: Pins = Pins(0);

/// Pin levels of the console's address phase for byte offset `offset`,
/// CS still high.
#[must_use]
pub const fn address_phase(offset: u32) -> Pins {
    IDLE.with_field(AD_BASE, ADDR_BITS, offset >> 1)
}

/// Byte offset carried by the address lines.
#[must_use]
pub const fn captured_offset(pins: Pins) -> u32 {
    pins.field(AD_BASE, ADDR_BITS) << 1
}

/// WR, RD and CS all asserted at once. Only seen with the console off or
/// the cartridge half-inserted.
#[must_use]
pub const fn control_lines_low(pins: Pins) -> bool {
    pins.is_low(WR_PIN) && pins.is_low(RD_PIN) && pins.is_low(CS_PIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_phase_round_trips_byte_offsets() {
        for offset in [0, 0xC0, 0x1_FFFE, 0xFF_FFFE] {
            assert_eq!(captured_offset(address_phase(offset)), offset);
        }
        assert!(address_phase(0).is_high(CS_PIN));
    }

    #[test]
    fn control_line_fault_detection() {
        assert!(!control_lines_low(IDLE));
        assert!(!control_lines_low(IDLE.with(RD_PIN, false)));
        // Both strobes low with CS released is not a fault.
        assert!(!control_lines_low(
            IDLE.with(RD_PIN, false).with(WR_PIN, false)
        ));
        assert!(control_lines_low(POWER_OFF));
    }
}
