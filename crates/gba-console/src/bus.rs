//! The console side of the cartridge bus.
//!
//! A transaction drives the 24-bit address with CS high, drops CS, then
//! strobes RD or WR once per halfword. The cartridge counts sequential
//! accesses itself; the address is only sent once per transaction.

use emu_core::{Observable, PinDrive, Pins, Tickable, Value};
use gba_cart::MailboxMemory;
use gba_cart::bus::{
    AD_BASE, AD_COUNT, ADDR_BITS, BUS_MASK, CS_PIN, IDLE, POWER_OFF, RD_PIN, WR_PIN,
    address_phase,
};
use tracing::trace;

use crate::config::ConsoleConfig;
use crate::slot::CartSlot;

const CONTROL_MASK: u32 = 1 << WR_PIN | 1 << RD_PIN | 1 << CS_PIN;
const AD_MASK: u32 = (1 << AD_COUNT) - 1;
/// A16-A22 stay driven for the whole transaction.
const HIGH_ADDR_MASK: u32 = ((1 << ADDR_BITS) - 1) & !AD_MASK;

/// Bus master plus whatever is in the slot.
pub struct CartBus<S: CartSlot> {
    slot: S,
    config: ConsoleConfig,
    powered: bool,
    ticks: u64,
    lines: Pins,
    transactions: u64,
    /// Cycles where both sides drove a bus pin.
    contention: u64,
}

impl<S: CartSlot> CartBus<S> {
    pub fn new(slot: S, config: ConsoleConfig) -> Self {
        Self {
            slot,
            config,
            powered: true,
            ticks: 0,
            lines: IDLE,
            transactions: 0,
            contention: 0,
        }
    }

    /// One host cycle with the console driving `drive`.
    pub fn cycle(&mut self, drive: PinDrive) -> Pins {
        let cart = self.slot.drive();
        let lines = if self.powered {
            if drive.contention(cart) & BUS_MASK != 0 {
                self.contention += 1;
            }
            drive.over(cart.over(IDLE))
        } else {
            POWER_OFF
        };
        self.slot.tick(lines);
        self.lines = lines;
        self.ticks += 1;
        lines
    }

    /// Idle bus: strobes and CS high, address released.
    pub fn idle(&mut self, cycles: u64) {
        let drive = PinDrive {
            enable: CONTROL_MASK,
            value: CONTROL_MASK,
        };
        for _ in 0..cycles {
            self.cycle(drive);
        }
    }

    fn hold(&mut self, drive: PinDrive, cycles: u64) -> Pins {
        let mut lines = self.lines;
        for _ in 0..cycles {
            lines = self.cycle(drive);
        }
        lines
    }

    /// Send the address and select the cartridge. Returns the selected
    /// line levels the strobes are applied to.
    fn select(&mut self, offset: u32) -> Pins {
        let address = address_phase(offset);
        self.hold(
            PinDrive {
                enable: BUS_MASK,
                value: address.0,
            },
            self.config.address_setup,
        );
        let selected = address.with(CS_PIN, false);
        self.hold(
            PinDrive {
                enable: BUS_MASK,
                value: selected.0,
            },
            self.config.address_hold,
        );
        selected
    }

    fn deselect(&mut self) {
        self.idle(self.config.bus_idle);
        self.transactions += 1;
    }

    /// Read `out.len()` consecutive halfwords from byte offset `offset`.
    /// Data is sampled on the last cycle of each RD strobe.
    pub fn read_burst(&mut self, offset: u32, out: &mut [u16]) {
        if out.is_empty() {
            return;
        }
        let selected = self.select(offset);
        let enable = CONTROL_MASK | HIGH_ADDR_MASK;
        for (i, word) in out.iter_mut().enumerate() {
            let strobe = PinDrive {
                enable,
                value: selected.with(RD_PIN, false).0,
            };
            let lines = self.hold(strobe, self.config.strobe(i > 0));
            *word = lines.field(AD_BASE, AD_COUNT) as u16;
            self.hold(
                PinDrive {
                    enable,
                    value: selected.0,
                },
                self.config.strobe_recovery,
            );
        }
        trace!(offset, len = out.len(), "read burst");
        self.deselect();
    }

    /// Write consecutive halfwords from byte offset `offset`.
    pub fn write_burst(&mut self, offset: u32, data: &[u16]) {
        if data.is_empty() {
            return;
        }
        let selected = self.select(offset);
        let enable = CONTROL_MASK | HIGH_ADDR_MASK | AD_MASK;
        for (i, &word) in data.iter().enumerate() {
            let with_data = selected.with_field(AD_BASE, AD_COUNT, u32::from(word));
            self.hold(
                PinDrive {
                    enable,
                    value: with_data.with(WR_PIN, false).0,
                },
                self.config.strobe(i > 0),
            );
            self.hold(
                PinDrive {
                    enable,
                    value: with_data.0,
                },
                self.config.strobe_recovery,
            );
        }
        trace!(offset, len = data.len(), "write burst");
        self.deselect();
    }

    pub fn read_u16(&mut self, offset: u32) -> u16 {
        let mut word = [0];
        self.read_burst(offset, &mut word);
        word[0]
    }

    pub fn write_u16(&mut self, offset: u32, value: u16) {
        self.write_burst(offset, &[value]);
    }

    /// Drop every line low, as a console switched off or a pulled
    /// cartridge would.
    pub fn power_off(&mut self) {
        self.powered = false;
    }

    pub fn power_on(&mut self) {
        self.powered = true;
    }

    #[must_use]
    pub fn is_powered(&self) -> bool {
        self.powered
    }

    #[must_use]
    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    #[must_use]
    pub fn lines(&self) -> Pins {
        self.lines
    }

    #[must_use]
    pub fn transactions(&self) -> u64 {
        self.transactions
    }

    #[must_use]
    pub fn contention(&self) -> u64 {
        self.contention
    }

    #[must_use]
    pub fn slot(&self) -> &S {
        &self.slot
    }

    pub fn slot_mut(&mut self) -> &mut S {
        &mut self.slot
    }
}

impl<S: CartSlot> Tickable for CartBus<S> {
    fn tick(&mut self) {
        self.idle(1);
    }
}

/// Mailbox access over real bus transactions.
impl<S: CartSlot> MailboxMemory for CartBus<S> {
    fn load_u16(&mut self, offset: u32) -> u16 {
        self.read_u16(offset)
    }

    fn store_u16(&mut self, offset: u32, value: u16) {
        self.write_u16(offset, value);
    }

    fn load_u32(&mut self, offset: u32) -> u32 {
        let mut halves = [0; 2];
        self.read_burst(offset, &mut halves);
        u32::from(halves[0]) | u32::from(halves[1]) << 16
    }

    fn store_u32(&mut self, offset: u32, value: u32) {
        self.write_burst(offset, &[value as u16, (value >> 16) as u16]);
    }
}

impl<S: CartSlot> Observable for CartBus<S> {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "ticks" => Some(Value::U64(self.ticks)),
            "lines" => Some(Value::U32(self.lines.0)),
            "powered" => Some(self.powered.into()),
            "transactions" => Some(Value::U64(self.transactions)),
            "contention" => Some(Value::U64(self.contention)),
            _ => None,
        }
    }

    fn query_paths(&self) -> Vec<String> {
        ["ticks", "lines", "powered", "transactions", "contention"]
            .iter()
            .map(|s| (*s).to_owned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records every line state it sees.
    #[derive(Default)]
    struct Probe(Vec<Pins>);

    impl CartSlot for Probe {
        fn drive(&self) -> PinDrive {
            PinDrive::RELEASED
        }

        fn tick(&mut self, lines: Pins) {
            self.0.push(lines);
        }
    }

    #[test]
    fn read_transaction_shape() {
        let config = ConsoleConfig::default();
        let mut bus = CartBus::new(Probe::default(), config);
        let mut out = [0; 2];
        bus.read_burst(0x1234, &mut out);

        let seen = &bus.slot().0;
        let expected = config.address_setup
            + config.address_hold
            + config.strobe(false)
            + config.strobe(true)
            + 2 * config.strobe_recovery
            + config.bus_idle;
        assert_eq!(seen.len() as u64, expected);

        let falls = seen
            .windows(2)
            .filter(|w| w[0].is_high(RD_PIN) && w[1].is_low(RD_PIN))
            .count();
        assert_eq!(falls, 2);
        assert!(seen.iter().all(|p| p.is_high(WR_PIN)));
        let at_select = seen[config.address_setup as usize];
        assert!(at_select.is_low(CS_PIN));
        assert_eq!(gba_cart::bus::captured_offset(at_select), 0x1234);
        // Nothing drives AD during the strobes, so reads float high.
        assert_eq!(out, [0xFFFF; 2]);
        assert_eq!(bus.transactions(), 1);
    }

    #[test]
    fn write_drives_data_with_the_strobe() {
        let mut bus = CartBus::new(Probe::default(), ConsoleConfig::default());
        bus.write_burst(0x40, &[0xBEEF]);
        let strobed: Vec<_> = bus.slot().0.iter().filter(|p| p.is_low(WR_PIN)).collect();
        assert!(!strobed.is_empty());
        assert!(strobed.iter().all(|p| p.field(AD_BASE, AD_COUNT) == 0xBEEF));
    }

    #[test]
    fn powered_off_bus_is_all_low() {
        let mut bus = CartBus::new(Probe::default(), ConsoleConfig::default());
        bus.power_off();
        assert_eq!(bus.read_u16(0), 0);
        assert!(bus.slot().0.iter().all(|&p| p == POWER_OFF));
    }
}
