//! The backing image: cartridge contents as seen from the bus.
//!
//! The image lives at a fixed host address. The program is loaded at
//! offset 0; buffers the console must be able to read (framebuffers, audio)
//! are reserved after it, because only pointers inside the image can be
//! turned into bus addresses.

use rp2040_dma::DataSize;

use crate::bus::{BUS_WINDOW, ROM_BASE};
use crate::error::CartError;
use crate::mailbox::MAILBOX_END;

/// Host address of the image's first byte (start of host SRAM).
pub const IMAGE_BASE: u32 = 0x2000_0000;

/// Largest image the bus can address.
pub const MAX_CAPACITY: usize = BUS_WINDOW as usize;

/// An address in the host's memory map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HostAddr(pub u32);

/// An address in the console's memory map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BusAddr(pub u32);

impl HostAddr {
    #[must_use]
    pub const fn offset(self, bytes: u32) -> Self {
        Self(self.0.wrapping_add(bytes))
    }
}

impl BusAddr {
    #[must_use]
    pub const fn offset(self, bytes: u32) -> Self {
        Self(self.0.wrapping_add(bytes))
    }

    /// Byte offset into the cartridge, if this is a cartridge address.
    #[must_use]
    pub const fn cart_offset(self) -> Option<u32> {
        match self.0.checked_sub(ROM_BASE) {
            Some(offset) if offset < BUS_WINDOW => Some(offset),
            _ => None,
        }
    }
}

impl std::fmt::Display for HostAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010X}", self.0)
    }
}

impl std::fmt::Display for BusAddr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010X}", self.0)
    }
}

/// Map an image pointer to the address the console uses for it.
#[must_use]
pub const fn translate(addr: HostAddr) -> BusAddr {
    BusAddr(addr.0.wrapping_sub(IMAGE_BASE).wrapping_add(ROM_BASE))
}

/// Inverse of [`translate`].
#[must_use]
pub const fn untranslate(addr: BusAddr) -> HostAddr {
    HostAddr(addr.0.wrapping_sub(ROM_BASE).wrapping_add(IMAGE_BASE))
}

/// Word-aligned cartridge contents.
#[derive(Debug, Clone)]
pub struct BackingImage {
    words: Vec<u32>,
    program_len: usize,
    /// First byte not yet reserved.
    reserve_end: usize,
}

impl BackingImage {
    /// An empty image of `capacity` bytes (rounded up to whole words).
    pub fn new(capacity: usize) -> Result<Self, CartError> {
        let capacity = capacity.next_multiple_of(4);
        if capacity > MAX_CAPACITY {
            return Err(CartError::CapacityTooLarge(capacity));
        }
        if capacity < MAILBOX_END as usize {
            return Err(CartError::CapacityTooSmall(capacity));
        }
        Ok(Self {
            words: vec![0; capacity / 4],
            program_len: 0,
            reserve_end: MAILBOX_END as usize,
        })
    }

    /// An image of `capacity` bytes holding `program`.
    pub fn with_program(capacity: usize, program: &[u8]) -> Result<Self, CartError> {
        let mut image = Self::new(capacity)?;
        image.load(program)?;
        Ok(image)
    }

    /// Replace the contents with `program`. Earlier reservations are
    /// dropped.
    pub fn load(&mut self, program: &[u8]) -> Result<(), CartError> {
        let capacity = self.capacity();
        if program.len() > capacity {
            return Err(CartError::ProgramTooLarge {
                len: program.len(),
                capacity,
            });
        }
        self.words.fill(0);
        self.as_bytes_mut()[..program.len()].copy_from_slice(program);
        self.program_len = program.len();
        self.reserve_end = program.len().max(MAILBOX_END as usize).next_multiple_of(4);
        Ok(())
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.words.len() * 4
    }

    #[must_use]
    pub fn program_len(&self) -> usize {
        self.program_len
    }

    /// Bytes not yet reserved.
    #[must_use]
    pub fn free(&self) -> usize {
        self.capacity() - self.reserve_end
    }

    #[must_use]
    pub fn base(&self) -> HostAddr {
        HostAddr(IMAGE_BASE)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.words)
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::cast_slice_mut(&mut self.words)
    }

    /// Reserve `len` bytes aligned to `align` after the program.
    pub fn reserve(&mut self, len: usize, align: usize) -> Result<HostAddr, CartError> {
        let start = self.reserve_end.next_multiple_of(align.max(1));
        let end = start.checked_add(len).filter(|&end| end <= self.capacity());
        let Some(end) = end else {
            return Err(CartError::ReservationExhausted {
                len,
                free: self.free(),
            });
        };
        self.reserve_end = end;
        Ok(HostAddr(IMAGE_BASE + start as u32))
    }

    #[must_use]
    pub fn contains(&self, addr: HostAddr) -> bool {
        self.host_offset(addr.0).is_some()
    }

    /// Bus address of an image pointer.
    pub fn to_bus(&self, addr: HostAddr) -> Result<BusAddr, CartError> {
        if self.contains(addr) {
            Ok(translate(addr))
        } else {
            Err(CartError::OutsideImage(addr.0))
        }
    }

    /// Image pointer for a bus address, if it lands inside the image.
    #[must_use]
    pub fn to_host(&self, addr: BusAddr) -> Option<HostAddr> {
        let host = untranslate(addr);
        self.contains(host).then_some(host)
    }

    fn host_offset(&self, addr: u32) -> Option<usize> {
        let offset = addr.checked_sub(IMAGE_BASE)? as usize;
        (offset < self.capacity()).then_some(offset)
    }

    /// Little-endian read at an image offset. The offset is aligned down to
    /// the access size, as the host bus does.
    #[must_use]
    pub fn read(&self, offset: u32, size: DataSize) -> Option<u32> {
        let width = size.bytes() as usize;
        let start = offset as usize & !(width - 1);
        let bytes = self.as_bytes().get(start..start + width)?;
        Some(bytes.iter().rev().fold(0, |acc, &b| (acc << 8) | u32::from(b)))
    }

    /// Little-endian write at an image offset. Returns `false` outside the
    /// image.
    pub fn write(&mut self, offset: u32, size: DataSize, value: u32) -> bool {
        let width = size.bytes() as usize;
        let start = offset as usize & !(width - 1);
        let Some(bytes) = self.as_bytes_mut().get_mut(start..start + width) else {
            return false;
        };
        bytes.copy_from_slice(&value.to_le_bytes()[..width]);
        true
    }

    /// Read through a host address.
    #[must_use]
    pub fn read_host(&self, addr: u32, size: DataSize) -> Option<u32> {
        self.read(self.host_offset(addr)? as u32, size)
    }

    /// Write through a host address. Returns `false` outside the image.
    pub fn write_host(&mut self, addr: u32, size: DataSize, value: u32) -> bool {
        match self.host_offset(addr) {
            Some(offset) => self.write(offset as u32, size, value),
            None => false,
        }
    }

    #[must_use]
    pub fn read_u16(&self, offset: u32) -> Option<u16> {
        self.read(offset, DataSize::HalfWord).map(|v| v as u16)
    }

    #[must_use]
    pub fn read_u32(&self, offset: u32) -> Option<u32> {
        self.read(offset, DataSize::Word)
    }

    /// Copy halfwords into the image starting at `addr`.
    pub fn write_halfwords(&mut self, addr: HostAddr, data: &[u16]) -> Result<(), CartError> {
        let start = self.host_offset(addr.0).ok_or(CartError::OutsideImage(addr.0))?;
        let end = start + data.len() * 2;
        let bytes = self
            .as_bytes_mut()
            .get_mut(start..end)
            .ok_or(CartError::OutsideImage(addr.0.wrapping_add(data.len() as u32 * 2)))?;
        for (chunk, half) in bytes.chunks_exact_mut(2).zip(data) {
            chunk.copy_from_slice(&half.to_le_bytes());
        }
        Ok(())
    }

    /// Copy bytes into the image starting at `addr`.
    pub fn write_bytes(&mut self, addr: HostAddr, data: &[u8]) -> Result<(), CartError> {
        let start = self.host_offset(addr.0).ok_or(CartError::OutsideImage(addr.0))?;
        let bytes = self
            .as_bytes_mut()
            .get_mut(start..start + data.len())
            .ok_or(CartError::OutsideImage(addr.0.wrapping_add(data.len() as u32)))?;
        bytes.copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translation_matches_the_rom_mapping() {
        assert_eq!(translate(HostAddr(IMAGE_BASE)), BusAddr(0x0800_0000));
        assert_eq!(translate(HostAddr(IMAGE_BASE + 0x100)), BusAddr(0x0800_0100));
        assert_eq!(untranslate(BusAddr(0x0800_0100)), HostAddr(IMAGE_BASE + 0x100));
    }

    #[test]
    fn capacity_limits() {
        assert_eq!(
            BackingImage::new(MAX_CAPACITY + 4).expect_err("too large"),
            CartError::CapacityTooLarge(MAX_CAPACITY + 4)
        );
        assert!(matches!(
            BackingImage::new(0x40),
            Err(CartError::CapacityTooSmall(_))
        ));
        assert!(matches!(
            BackingImage::with_program(0x100, &[0; 0x101]),
            Err(CartError::ProgramTooLarge { .. })
        ));
    }

    #[test]
    fn little_endian_access() {
        let image = BackingImage::with_program(0x100, &[0x11, 0x22, 0x33, 0x44]).expect("fits");
        assert_eq!(image.read_u16(0), Some(0x2211));
        assert_eq!(image.read_u16(2), Some(0x4433));
        assert_eq!(image.read_u32(0), Some(0x4433_2211));
        assert_eq!(image.read_u16(0x100), None);
    }

    #[test]
    fn reservations_follow_the_program() {
        let mut image = BackingImage::with_program(0x1000, &[0xFF; 0x123]).expect("fits");
        let fb = image.reserve(0x100, 4).expect("room");
        assert_eq!(fb, HostAddr(IMAGE_BASE + 0x124));
        let audio = image.reserve(0x10, 0x100).expect("room");
        assert_eq!(audio, HostAddr(IMAGE_BASE + 0x300));
        assert!(matches!(
            image.reserve(0x1000, 4),
            Err(CartError::ReservationExhausted { .. })
        ));
        assert_eq!(image.to_bus(audio), Ok(BusAddr(0x0800_0300)));
        assert_eq!(
            image.to_bus(HostAddr(IMAGE_BASE + 0x1000)),
            Err(CartError::OutsideImage(IMAGE_BASE + 0x1000))
        );
    }

    #[test]
    fn small_programs_leave_the_mailbox_unreserved() {
        let mut image = BackingImage::with_program(0x1000, &[1, 2]).expect("fits");
        let addr = image.reserve(4, 4).expect("room");
        assert_eq!(addr, HostAddr(IMAGE_BASE + MAILBOX_END));
    }

    #[test]
    fn halfword_copies() {
        let mut image = BackingImage::new(0x1000).expect("fits");
        let buf = image.reserve(8, 4).expect("room");
        image.write_halfwords(buf, &[0xABCD, 0x1234]).expect("inside");
        let offset = buf.0 - IMAGE_BASE;
        assert_eq!(image.read_u32(offset), Some(0x1234_ABCD));
    }
}
