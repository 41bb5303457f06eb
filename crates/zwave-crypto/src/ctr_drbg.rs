//! AES-128 CTR_DRBG and the synchronized nonce stream built on it.
//!
//! Hand-rolled to match the protocol's profile of SP 800-90A: AES-128
//! without a derivation function, seeded once with 32 bytes of entropy XOR
//! personalization, never reseeded. Both parties instantiate the generator
//! from the same mixed entropy and draw 13-byte IVs from it in lockstep;
//! staying synchronized is the caller's state machine, not this module's.
//!
//! # Critical subtleties
//!
//! - The counter `V` increments **before** each block encryption, in both
//!   `update` and `generate` (big-endian, wrapping).
//! - Every `generate` call finishes with `update(0^32)`, so two streams that
//!   have produced the same number of outputs are in identical states.

use crate::block::aes128_encrypt_block;
use crate::kdf::ckdf_mei;

const SEED_LEN: usize = 32;

/// Deterministic random bit generator in the AES-128 CTR construction.
#[derive(Clone)]
pub struct CtrDrbg {
    key: [u8; 16],
    v: [u8; 16],
}

impl CtrDrbg {
    /// Instantiate from 32 bytes of entropy and a 32-byte personalization
    /// string.
    #[must_use]
    pub fn instantiate(entropy: &[u8; SEED_LEN], personalization: &[u8; SEED_LEN]) -> Self {
        let mut seed = [0u8; SEED_LEN];
        for (out, (e, p)) in seed
            .iter_mut()
            .zip(entropy.iter().zip(personalization.iter()))
        {
            *out = e ^ p;
        }
        let mut drbg = Self {
            key: [0u8; 16],
            v: [0u8; 16],
        };
        drbg.update(&seed);
        drbg
    }

    fn update(&mut self, provided: &[u8; SEED_LEN]) {
        let mut temp = [0u8; SEED_LEN];
        for chunk in temp.chunks_exact_mut(16) {
            increment(&mut self.v);
            chunk.copy_from_slice(&aes128_encrypt_block(&self.key, &self.v));
        }
        for (t, p) in temp.iter_mut().zip(provided.iter()) {
            *t ^= p;
        }
        self.key.copy_from_slice(&temp[..16]);
        self.v.copy_from_slice(&temp[16..]);
    }

    /// Fill `out` with the next pseudorandom bytes and advance the state.
    pub fn generate(&mut self, out: &mut [u8]) {
        let mut offset = 0;
        while offset < out.len() {
            increment(&mut self.v);
            let block = aes128_encrypt_block(&self.key, &self.v);
            let n = (out.len() - offset).min(16);
            out[offset..offset + n].copy_from_slice(&block[..n]);
            offset += n;
        }
        self.update(&[0u8; SEED_LEN]);
    }
}

impl core::fmt::Debug for CtrDrbg {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CtrDrbg").finish_non_exhaustive()
    }
}

fn increment(v: &mut [u8; 16]) {
    for byte in v.iter_mut().rev() {
        *byte = byte.wrapping_add(1);
        if *byte != 0 {
            break;
        }
    }
}

/// A synchronized per-peer nonce stream.
///
/// Derived from both parties' 16-byte entropy inputs and a per-key
/// personalization string; each call to [`next_nonce`](Self::next_nonce)
/// yields the next 13-byte IV and advances the stream one step.
#[derive(Clone)]
pub struct NonceStream {
    drbg: CtrDrbg,
}

impl NonceStream {
    pub const NONCE_SIZE: usize = 13;

    /// Derive a stream from the sender's and receiver's entropy inputs.
    ///
    /// Argument order is part of the synchronization contract: both parties
    /// pass the frame **sender's** entropy first.
    #[must_use]
    pub fn derive(
        sender_ei: &[u8; 16],
        receiver_ei: &[u8; 16],
        personalization: &[u8; 32],
    ) -> Self {
        let mei = ckdf_mei(sender_ei, receiver_ei);
        Self {
            drbg: CtrDrbg::instantiate(&mei, personalization),
        }
    }

    /// Produce the next 13-byte IV, advancing the stream.
    pub fn next_nonce(&mut self) -> [u8; 13] {
        let mut out = [0u8; 13];
        self.drbg.generate(&mut out);
        out
    }
}

impl core::fmt::Debug for NonceStream {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NonceStream").finish_non_exhaustive()
    }
}
