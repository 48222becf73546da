//! Pin-level signal snapshots.

/// Logic levels of a 32-pin bank at one instant. Bit `n` is pin `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Pins(pub u32);

impl Pins {
    pub const ALL_LOW: Self = Self(0);
    pub const ALL_HIGH: Self = Self(u32::MAX);

    #[must_use]
    pub const fn is_high(self, pin: u8) -> bool {
        self.0 & (1 << pin) != 0
    }

    #[must_use]
    pub const fn is_low(self, pin: u8) -> bool {
        !self.is_high(pin)
    }

    /// `count` consecutive pins starting at `base`, right-aligned.
    #[must_use]
    pub const fn field(self, base: u8, count: u8) -> u32 {
        let mask = if count >= 32 { u32::MAX } else { (1 << count) - 1 };
        (self.0 >> base) & mask
    }

    #[must_use]
    pub const fn with(self, pin: u8, high: bool) -> Self {
        if high {
            Self(self.0 | (1 << pin))
        } else {
            Self(self.0 & !(1 << pin))
        }
    }

    #[must_use]
    pub const fn with_field(self, base: u8, count: u8, value: u32) -> Self {
        let mask = if count >= 32 { u32::MAX } else { (1 << count) - 1 };
        Self((self.0 & !(mask << base)) | ((value & mask) << base))
    }
}

/// Output drive from one side of a shared bus.
///
/// `enable` selects the pins this side drives; `value` holds their levels.
/// Pins outside `enable` are left to whoever else drives them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PinDrive {
    pub enable: u32,
    pub value: u32,
}

impl PinDrive {
    pub const RELEASED: Self = Self { enable: 0, value: 0 };

    /// Resolve this drive on top of `under`.
    #[must_use]
    pub const fn over(self, under: Pins) -> Pins {
        Pins((under.0 & !self.enable) | (self.value & self.enable))
    }

    /// Pins both sides drive at once.
    #[must_use]
    pub const fn contention(self, other: Self) -> u32 {
        self.enable & other.enable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_extraction() {
        let pins = Pins(0x0765_4321);
        assert_eq!(pins.field(0, 16), 0x4321);
        assert_eq!(pins.field(16, 7), 0x65);
        assert!(pins.is_high(26));
        assert!(pins.is_low(27));
    }

    #[test]
    fn drive_overrides_only_enabled_pins() {
        let under = Pins(0xFFFF_0000);
        let drive = PinDrive { enable: 0x0000_FFFF, value: 0x1234 };
        assert_eq!(drive.over(under), Pins(0xFFFF_1234));
    }

    #[test]
    fn with_field_replaces_bits() {
        let pins = Pins::ALL_HIGH.with_field(0, 16, 0xABCD).with(25, false);
        assert_eq!(pins.field(0, 16), 0xABCD);
        assert!(pins.is_low(25));
    }
}
