use thiserror::Error;

use crate::mailbox::HandshakeError;

/// Errors from setting up or using the cartridge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    #[error("image capacity {0:#X} exceeds the 16 MiB bus window")]
    CapacityTooLarge(usize),
    #[error("image capacity {0:#X} does not hold the mailbox")]
    CapacityTooSmall(usize),
    #[error("program of {len:#X} bytes does not fit in an image of {capacity:#X}")]
    ProgramTooLarge { len: usize, capacity: usize },
    #[error("cannot reserve {len:#X} bytes: {free:#X} free in the image")]
    ReservationExhausted { len: usize, free: usize },
    #[error("host address {0:#010X} is outside the image")]
    OutsideImage(u32),
    #[error("audio buffer size {0} is not a non-zero multiple of 16 samples")]
    AudioBufferSize(u16),
    #[error("sample rate {0} Hz cannot be produced by the console timer")]
    SampleRate(u32),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("interrupt budget exceeded: {needed} cycles needed, {available} available ({what})")]
    RealTimeBudget {
        what: &'static str,
        needed: u64,
        available: u64,
    },
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
}
