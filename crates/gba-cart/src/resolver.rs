//! Address resolution: bus offset to host pointer.

use emu_core::{Observable, Value};
use rp2040_dma::Sniffer;

/// Turns a captured bus offset into a host address by adding the image
/// base.
///
/// Sits in the DMA sniffer: the latch stage feeds each captured offset
/// through it, and the retrigger stage reads the sum back as the read
/// channel's new source. The sum only holds while the accumulator starts
/// from the base, so it must be reseeded after every transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressResolver {
    base: u32,
    holder: u32,
    accumulator: u32,
    latches: u64,
}

impl AddressResolver {
    #[must_use]
    pub const fn new(base: u32) -> Self {
        Self {
            base,
            holder: 0,
            accumulator: base,
            latches: 0,
        }
    }

    /// Fold a captured offset into the accumulator.
    pub fn latch(&mut self, offset: u32) {
        self.holder = offset;
        self.accumulator = self.accumulator.wrapping_add(offset);
        self.latches += 1;
    }

    /// The resolved host address.
    #[must_use]
    pub const fn resolve(&self) -> u32 {
        self.accumulator
    }

    /// Reseed the accumulator to the base.
    pub fn reset(&mut self) {
        self.accumulator = self.base;
    }

    #[must_use]
    pub const fn base(&self) -> u32 {
        self.base
    }

    /// The last offset latched.
    #[must_use]
    pub const fn holder(&self) -> u32 {
        self.holder
    }

    #[must_use]
    pub const fn latches(&self) -> u64 {
        self.latches
    }
}

impl Sniffer for AddressResolver {
    fn observe(&mut self, data: u32) {
        self.latch(data);
    }

    fn data(&self) -> u32 {
        self.resolve()
    }

    fn set_data(&mut self, value: u32) {
        self.accumulator = value;
    }
}

impl Observable for AddressResolver {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "base" => Some(Value::U32(self.base)),
            "holder" => Some(Value::U32(self.holder)),
            "accumulator" => Some(Value::U32(self.accumulator)),
            "latches" => Some(Value::U64(self.latches)),
            _ => None,
        }
    }

    fn query_paths(&self) -> Vec<String> {
        ["base", "holder", "accumulator", "latches"]
            .iter()
            .map(|s| (*s).to_owned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const BASE: u32 = 0x2000_0000;

    #[test]
    fn resolves_base_plus_offset() {
        let mut resolver = AddressResolver::new(BASE);
        resolver.latch(0x100);
        assert_eq!(resolver.resolve(), 0x2000_0100);
        assert_eq!(resolver.holder(), 0x100);
    }

    #[test]
    fn without_reseed_offsets_accumulate() {
        let mut resolver = AddressResolver::new(BASE);
        resolver.latch(0x100);
        resolver.latch(0x100);
        assert_eq!(resolver.resolve(), 0x2000_0200);
    }

    proptest! {
        #[test]
        fn reseeded_latches_never_drift(offsets in prop::collection::vec(0u32..(1 << 24), 1..64)) {
            let mut resolver = AddressResolver::new(BASE);
            for &offset in &offsets {
                resolver.latch(offset);
                prop_assert_eq!(resolver.resolve(), BASE + offset);
                resolver.reset();
                prop_assert_eq!(resolver.resolve(), BASE);
            }
        }
    }
}
