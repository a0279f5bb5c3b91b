// aishiz-abi/src/batch.rs
//
// Engine-agnostic decode batch.
// - Single sequence (seq id 0) per session.
// - Fixed capacity, reusable with `clear()`.

use crate::error::EngineError;
use crate::token::Token;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchEntry {
    pub token: Token,
    pub pos: i32,
    pub logits: bool,
}

#[derive(Debug, Clone)]
pub struct Batch {
    entries: Vec<BatchEntry>,
    capacity: usize,
}

impl Batch {
    /// Create a batch that holds at most `capacity` tokens.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append one token. `pos` is its absolute position in the sequence;
    /// `logits = true` only where the caller wants to sample afterwards.
    pub fn push(&mut self, token: Token, pos: i32, logits: bool) -> Result<(), EngineError> {
        if self.entries.len() >= self.capacity {
            return Err(EngineError::Batch(format!(
                "batch full: capacity {}",
                self.capacity
            )));
        }
        self.entries.push(BatchEntry { token, pos, logits });
        Ok(())
    }

    /// Ensure only the last entry is marked for logits.
    pub fn mark_last_for_logits(&mut self) {
        let n = self.entries.len();
        for (i, e) in self.entries.iter_mut().enumerate() {
            e.logits = i + 1 == n;
        }
    }

    /// Reset the batch so it can be reused.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    /// Position of the last entry that requested logits, if any.
    pub fn logits_index(&self) -> Option<usize> {
        self.entries.iter().rposition(|e| e.logits)
    }
}
