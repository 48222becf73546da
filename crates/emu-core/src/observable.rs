//! State inspection for simulated hardware.
//!
//! Every component exposes its registers, FIFO levels and counters through
//! dotted query paths. Queries never change simulation state.

use std::fmt;

/// A dynamically-typed snapshot value.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Value {
    Bool(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    String(String),
    /// Ordered list, e.g. the contents of a FIFO (oldest first).
    Array(Vec<Value>),
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "{v}"),
            Value::U8(v) => write!(f, "{v:#04X}"),
            Value::U16(v) => write!(f, "{v:#06X}"),
            Value::U32(v) => write!(f, "{v:#010X}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::String(v) => f.write_str(v),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

value_from! {
    bool => Bool,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    String => String,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::U64(v as u64)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::Array(items.into_iter().map(Into::into).collect())
    }
}

/// A component whose state can be inspected.
pub trait Observable {
    /// Query one property by dotted path, e.g. `sm.1.tx_level` or
    /// `dma.ch.0.read_addr`.
    ///
    /// Returns `None` for unknown paths.
    fn query(&self, path: &str) -> Option<Value>;

    /// Every path `query` understands.
    fn query_paths(&self) -> Vec<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_hex_for_registers() {
        assert_eq!(Value::U16(0x1F).to_string(), "0x001F");
        assert_eq!(Value::U32(0x0800_0000).to_string(), "0x08000000");
        assert_eq!(Value::U64(12).to_string(), "12");
    }

    #[test]
    fn arrays_keep_order() {
        let v: Value = vec![1u16, 2, 3].into();
        assert_eq!(v.to_string(), "[0x0001, 0x0002, 0x0003]");
    }
}
