//! Deterministic chunk identifiers.
//!
//! The identifier of a chunk is part of the on-disk contract: SHA-256 over
//! `"<doc_id>_chunk_<chunk_index>"`, first 12 hex digits of the digest
//! (48 bits, big-endian) reduced modulo 10^9. Changing any of these breaks
//! every persisted session, so artifacts record [`IDENTIFIER_SCHEME`].

use sha2::{Digest, Sha256};

pub const IDENTIFIER_SCHEME: &str = "sha256-hex12-mod1e9";
pub const IDENTIFIER_MODULUS: u64 = 1_000_000_000;

const PREFIX_BYTES: usize = 6;

#[must_use]
pub fn assign(doc_id: &str, chunk_index: usize) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(format!("{doc_id}_chunk_{chunk_index}").as_bytes());
    let digest = hasher.finalize();
    let prefix = digest
        .iter()
        .take(PREFIX_BYTES)
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte));
    prefix % IDENTIFIER_MODULUS
}
