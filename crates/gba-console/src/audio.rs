//! Direct-sound playback from double-buffered cartridge audio.
//!
//! A timer overflows once per sample; the sound FIFO pulls 16 samples at
//! a time over the bus. After `buf_size` samples the timer interrupt
//! gives the finished slot back to the host and continues from the other
//! one.

use emu_core::{Observable, Value};

/// Samples per FIFO refill.
pub const CHUNK: u32 = 16;

/// Cap on buffered output samples.
const MAX_CAPTURE: usize = 1 << 20;

#[derive(Debug, Default)]
pub struct Audio {
    playing: bool,
    slot: usize,
    /// Cartridge offset of the buffer being played.
    buffer: Option<u32>,
    cursor: u32,
    buf_size: u32,
    /// Host cycles between refills.
    chunk_ticks: u64,
    next_chunk: u64,
    samples: Vec<i8>,
    buffers_played: u64,
    starved: u64,
}

impl Audio {
    /// Begin playback from slot 0.
    pub fn start(&mut self, buffer: Option<u32>, buf_size: u16, chunk_ticks: u64, now: u64) {
        self.playing = true;
        self.slot = 0;
        self.buffer = buffer;
        self.cursor = 0;
        self.buf_size = u32::from(buf_size).max(CHUNK);
        self.chunk_ticks = chunk_ticks.max(1);
        self.next_chunk = now;
    }

    pub fn stop(&mut self) {
        self.playing = false;
        self.buffer = None;
    }

    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.playing
    }

    /// Host cycle of the next refill.
    #[must_use]
    pub fn next_due(&self) -> Option<u64> {
        self.playing.then_some(self.next_chunk)
    }

    /// Where the next refill reads from, or `None` to play silence.
    #[must_use]
    pub fn refill_from(&self) -> Option<u32> {
        self.buffer.map(|base| base + self.cursor)
    }

    /// Queue one refill's samples. Returns `true` when the buffer is
    /// finished and the slots must be swapped.
    pub fn push_chunk(&mut self, words: &[u16]) -> bool {
        if self.samples.len() < MAX_CAPTURE {
            for &word in words {
                self.samples.extend(word.to_le_bytes().map(|b| b as i8));
            }
        }
        self.cursor += CHUNK;
        self.next_chunk += self.chunk_ticks;
        self.cursor >= self.buf_size
    }

    /// The finished slot, to be handed back to the host.
    #[must_use]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Continue from the other slot. `None` means the host has not
    /// refilled it yet.
    pub fn swap(&mut self, next: Option<u32>) {
        self.slot ^= 1;
        self.buffer = next;
        self.cursor = 0;
        self.buffers_played += 1;
        if next.is_none() {
            self.starved += 1;
        }
    }

    /// Drain the samples played so far (signed 8-bit).
    pub fn take_samples(&mut self) -> Vec<i8> {
        std::mem::take(&mut self.samples)
    }

    #[must_use]
    pub fn buffers_played(&self) -> u64 {
        self.buffers_played
    }

    /// Buffer periods played as silence.
    #[must_use]
    pub fn starved(&self) -> u64 {
        self.starved
    }
}

impl Observable for Audio {
    fn query(&self, path: &str) -> Option<Value> {
        match path {
            "playing" => Some(self.playing.into()),
            "slot" => Some(self.slot.into()),
            "cursor" => Some(Value::U32(self.cursor)),
            "buffers_played" => Some(Value::U64(self.buffers_played)),
            "starved" => Some(Value::U64(self.starved)),
            "pending_samples" => Some(self.samples.len().into()),
            _ => None,
        }
    }

    fn query_paths(&self) -> Vec<String> {
        [
            "playing",
            "slot",
            "cursor",
            "buffers_played",
            "starved",
            "pending_samples",
        ]
        .iter()
        .map(|s| (*s).to_owned())
        .collect()
    }
}
