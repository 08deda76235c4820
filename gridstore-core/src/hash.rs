use crate::error::{GridError, Result};
use md5::{Digest, Md5};

/// Streaming MD5 accumulator fed chunk by chunk during an upload.
pub struct ContentHasher {
    hasher: Md5,
    consumed: u64,
}

impl ContentHasher {
    pub fn new() -> Self {
        Self {
            hasher: Md5::new(),
            consumed: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) -> Result<()> {
        self.consumed = self
            .consumed
            .checked_add(data.len() as u64)
            .ok_or_else(|| GridError::HashComputation("digest input length overflow".to_string()))?;
        self.hasher.update(data);
        Ok(())
    }

    /// Finish the digest, checking it covered exactly `expected_len` bytes.
    pub fn finalize(self, expected_len: u64) -> Result<String> {
        if self.consumed != expected_len {
            return Err(GridError::HashComputation(format!(
                "digest consumed {} bytes, payload has {}",
                self.consumed, expected_len
            )));
        }
        Ok(hex::encode(self.hasher.finalize()))
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute the MD5 hex digest of data
pub fn compute_md5(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}
