//! The truncated AES-128 CBC-MAC used by legacy secure frames.
//!
//! The authentication data is zero-padded to a whole number of blocks,
//! CBC-encrypted under a zero IV, and the first 8 bytes of the final cipher
//! block form the authentication code. Empty input authenticates as a single
//! zero block.

use aes::Aes128;
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockEncryptMut, KeyIvInit};

type Aes128CbcEnc = cbc::Encryptor<Aes128>;

pub const MAC_SIZE: usize = 8;

/// Compute the 8-byte CBC-MAC of `data` under `key`.
#[must_use]
pub fn compute_mac(key: &[u8; 16], data: &[u8]) -> [u8; MAC_SIZE] {
    let blocks = data.len().div_ceil(16).max(1);
    let mut padded = alloc::vec![0u8; blocks * 16];
    padded[..data.len()].copy_from_slice(data);

    let encryptor = Aes128CbcEnc::new(key.into(), &[0u8; 16].into());
    let mut out = alloc::vec![0u8; padded.len()];
    // SAFETY: output buffer is block-aligned and same size as padded input; this never fails.
    encryptor
        .encrypt_padded_b2b_mut::<NoPadding>(&padded, &mut out)
        .expect("output buffer is block-aligned and same size as padded input");

    let mut mac = [0u8; MAC_SIZE];
    mac.copy_from_slice(&out[out.len() - 16..out.len() - 8]);
    mac
}

/// Verify an 8-byte CBC-MAC.
#[must_use]
pub fn verify_mac(key: &[u8; 16], data: &[u8], expected: &[u8; MAC_SIZE]) -> bool {
    let computed = compute_mac(key, data);
    let mut diff = 0u8;
    for (a, b) in computed.iter().zip(expected.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}
