//! State machine FIFOs.

use std::collections::VecDeque;

/// Default depth of each TX/RX FIFO.
pub const FIFO_DEPTH: usize = 4;

/// A fixed-depth word FIFO between a state machine and the system side.
///
/// Pushing into a full FIFO is refused rather than overwriting; the caller
/// decides whether that is a stall (state machine side) or an overflow
/// (system side).
#[derive(Debug, Clone)]
pub struct Fifo {
    words: VecDeque<u32>,
    depth: usize,
}

impl Fifo {
    #[must_use]
    pub fn new(depth: usize) -> Self {
        Self {
            words: VecDeque::with_capacity(depth),
            depth,
        }
    }

    /// Push a word. Returns `false` if the FIFO was full.
    pub fn push(&mut self, word: u32) -> bool {
        if self.is_full() {
            return false;
        }
        self.words.push_back(word);
        true
    }

    pub fn pop(&mut self) -> Option<u32> {
        self.words.pop_front()
    }

    pub fn clear(&mut self) {
        self.words.clear();
    }

    #[must_use]
    pub fn level(&self) -> usize {
        self.words.len()
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    #[must_use]
    pub fn is_full(&self) -> bool {
        self.words.len() >= self.depth
    }

    /// Contents, oldest first.
    #[must_use]
    pub fn contents(&self) -> Vec<u32> {
        self.words.iter().copied().collect()
    }
}

impl Default for Fifo {
    fn default() -> Self {
        Self::new(FIFO_DEPTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_push_when_full() {
        let mut fifo = Fifo::new(2);
        assert!(fifo.push(1));
        assert!(fifo.push(2));
        assert!(!fifo.push(3));
        assert_eq!(fifo.pop(), Some(1));
        assert!(fifo.push(3));
        assert_eq!(fifo.contents(), vec![2, 3]);
    }
}
