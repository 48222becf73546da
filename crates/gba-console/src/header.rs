//! Cartridge header, as the boot ROM reads it.
//!
//! | Offset | Size | Field              |
//! |--------|------|--------------------|
//! | 0x00   | 4    | entry branch       |
//! | 0x04   | 156  | logo               |
//! | 0xA0   | 12   | title (ASCII)      |
//! | 0xAC   | 4    | game code          |
//! | 0xB0   | 2    | maker code         |
//! | 0xB2   | 1    | fixed 0x96         |
//! | 0xBD   | 1    | complement check   |

/// Bytes the boot ROM reads.
pub const HEADER_LEN: usize = 0xC0;

const TITLE: std::ops::Range<usize> = 0xA0..0xAC;
const GAME_CODE: std::ops::Range<usize> = 0xAC..0xB0;
const FIXED: usize = 0xB2;
const CHECKSUM: usize = 0xBD;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub title: String,
    pub game_code: String,
    /// Fixed byte and complement check both match.
    pub valid: bool,
}

/// Complement check over 0xA0..=0xBC.
#[must_use]
pub fn complement(bytes: &[u8]) -> u8 {
    bytes
        .get(0xA0..0xBD)
        .unwrap_or(&[])
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_sub(b))
        .wrapping_sub(0x19)
}

fn ascii(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
        .collect()
}

impl Header {
    /// Parse header bytes. Short input yields an invalid, empty header.
    #[must_use]
    pub fn parse(bytes: &[u8]) -> Self {
        if bytes.len() < HEADER_LEN {
            return Self {
                title: String::new(),
                game_code: String::new(),
                valid: false,
            };
        }
        Self {
            title: ascii(&bytes[TITLE]),
            game_code: ascii(&bytes[GAME_CODE]),
            valid: bytes[FIXED] == 0x96 && bytes[CHECKSUM] == complement(bytes),
        }
    }

    /// Fill in title, code, fixed byte and check byte of `bytes`.
    pub fn write(bytes: &mut [u8], title: &str, game_code: &str) {
        if bytes.len() < HEADER_LEN {
            return;
        }
        for (dst, src) in bytes[TITLE].iter_mut().zip(title.bytes().chain(std::iter::repeat(0))) {
            *dst = src;
        }
        for (dst, src) in bytes[GAME_CODE]
            .iter_mut()
            .zip(game_code.bytes().chain(std::iter::repeat(b'0')))
        {
            *dst = src;
        }
        bytes[FIXED] = 0x96;
        bytes[CHECKSUM] = complement(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn written_header_parses_back() {
        let mut rom = vec![0; HEADER_LEN];
        Header::write(&mut rom, "CARTDEMO", "CDMO");
        let header = Header::parse(&rom);
        assert_eq!(header.title, "CARTDEMO");
        assert_eq!(header.game_code, "CDMO");
        assert!(header.valid);

        rom[0xA0] ^= 1;
        assert!(!Header::parse(&rom).valid);
    }

    #[test]
    fn blank_image_is_invalid() {
        assert!(!Header::parse(&[0; HEADER_LEN]).valid);
        assert!(!Header::parse(&[]).valid);
    }
}
