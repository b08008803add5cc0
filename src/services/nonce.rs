//! Per-task nonce generation.
//!
//! The nonce travels with the dispatch notification and must come back with
//! the result; it proves the runner executed the intended assignment.

use rand::rngs::OsRng;
use rand::RngCore;

/// Source of unguessable per-task tokens.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonceSource;

impl NonceSource {
    pub fn new() -> Self {
        Self
    }

    /// Generate a fresh 128-bit hex-encoded nonce.
    pub fn generate(&self) -> String {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        hex::encode(bytes)
    }
}
