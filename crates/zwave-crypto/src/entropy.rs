//! OS entropy for entropy inputs, half-nonces, and sequence-number seeds.

use rand::Rng;

/// Fill a fixed-size array from the operating system's entropy source.
#[must_use]
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    rand::rngs::OsRng.fill(&mut out[..]);
    out
}

/// A fresh 16-byte entropy input for nonce-stream derivation.
#[must_use]
pub fn generate_entropy_input() -> [u8; 16] {
    random_bytes()
}

/// A fresh 8-byte half-nonce for the legacy nonce handshake.
#[must_use]
pub fn generate_half_nonce() -> [u8; 8] {
    random_bytes()
}
