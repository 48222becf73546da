//! Console key state as published in the mailbox.
//!
//! The console copies its key register verbatim: bits 0-9, a cleared bit
//! means the key is held.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    A,
    B,
    Select,
    Start,
    Right,
    Left,
    Up,
    Down,
    R,
    L,
}

impl Button {
    pub const ALL: [Self; 10] = [
        Self::A,
        Self::B,
        Self::Select,
        Self::Start,
        Self::Right,
        Self::Left,
        Self::Up,
        Self::Down,
        Self::R,
        Self::L,
    ];

    #[must_use]
    pub const fn bit(self) -> u16 {
        1 << self as u16
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::A => "a",
            Self::B => "b",
            Self::Select => "select",
            Self::Start => "start",
            Self::Right => "right",
            Self::Left => "left",
            Self::Up => "up",
            Self::Down => "down",
            Self::R => "r",
            Self::L => "l",
        }
    }

    /// Look up a button by its lowercase name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.name().eq_ignore_ascii_case(name))
    }
}

/// Mask of the ten key bits.
pub const KEY_MASK: u16 = 0x03FF;

/// Decoded key state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Buttons {
    /// Held keys, one bit per [`Button`], active high.
    held: u16,
}

impl Buttons {
    /// Nothing held.
    pub const NONE: Self = Self { held: 0 };

    /// Decode the active-low register value.
    #[must_use]
    pub const fn decode(raw: u16) -> Self {
        Self {
            held: !raw & KEY_MASK,
        }
    }

    /// Encode as the active-low register value.
    #[must_use]
    pub const fn encode(self) -> u16 {
        !self.held & KEY_MASK
    }

    #[must_use]
    pub const fn is_pressed(self, button: Button) -> bool {
        self.held & button.bit() != 0
    }

    pub fn press(&mut self, button: Button) {
        self.held |= button.bit();
    }

    pub fn release(&mut self, button: Button) {
        self.held &= !button.bit();
    }

    /// Held keys in bit order.
    #[must_use]
    pub fn pressed(self) -> Vec<Button> {
        Button::ALL.into_iter().filter(|&b| self.is_pressed(b)).collect()
    }
}

impl FromIterator<Button> for Buttons {
    fn from_iter<I: IntoIterator<Item = Button>>(iter: I) -> Self {
        let mut buttons = Self::NONE;
        for button in iter {
            buttons.press(button);
        }
        buttons
    }
}

impl fmt::Display for Buttons {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.pressed().iter().map(|b| b.name()).collect();
        if names.is_empty() {
            f.write_str("none")
        } else {
            f.write_str(&names.join("+"))
        }
    }
}
