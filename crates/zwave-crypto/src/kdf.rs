//! Key derivation for the secure transport generations.
//!
//! Hand-rolled over AES and AES-CMAC to match the protocol's CKDF
//! construction rather than a generic KDF crate:
//!
//! - **Legacy (S0) keys** are single AES-ECB encryptions of fixed password
//!   blocks under the network key.
//! - **S2 keys** come from a CMAC chain `T_i = CMAC(PNK, T_{i-1} || C || i)`
//!   where `C` is a 15-byte constant distinguishing the permanent-key
//!   expansion (0x55) from the temporary bootstrap-key expansion (0x88).
//! - **Entropy mixing** (two 16-byte entropy inputs into 32 bytes of DRBG
//!   seed material) is a CMAC extract-then-expand under fixed constants.

use aes::Aes128;
use cmac::{Cmac, Mac};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::block::aes128_encrypt_block;

pub const NETWORK_KEY_SIZE: usize = 16;

const S0_AUTH_PASSWORD: [u8; 16] = [0x55; 16];
const S0_ENC_PASSWORD: [u8; 16] = [0xAA; 16];

const CKDF_NETWORK_CONSTANT: u8 = 0x55;
const CKDF_TEMP_CONSTANT: u8 = 0x88;
const CKDF_MEI_EXTRACT_KEY: [u8; 16] = [0x26; 16];
const CKDF_MEI_EXPAND_CONSTANT: u8 = 0x88;

/// A 16-byte symmetric network key for one security class.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct NetworkKey([u8; NETWORK_KEY_SIZE]);

impl NetworkKey {
    pub const fn new(bytes: [u8; NETWORK_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NETWORK_KEY_SIZE] {
        &self.0
    }
}

impl core::fmt::Debug for NetworkKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("NetworkKey(..)")
    }
}

/// Derived key pair for the legacy (S0) transport.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct S0Keys {
    pub auth_key: [u8; 16],
    pub enc_key: [u8; 16],
}

/// Derived key material for one S2 security class.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct S2Keys {
    /// AES-128-CCM encryption/authentication key.
    pub ccm_key: [u8; 16],
    /// Personalization string for the per-peer nonce stream.
    pub personalization: [u8; 32],
    /// Key for deriving multicast nonce sequences.
    pub mpan_key: [u8; 16],
}

fn cmac16(key: &[u8; 16], data: &[u8]) -> [u8; 16] {
    let mut mac = Cmac::<Aes128>::new(key.into());
    mac.update(data);
    mac.finalize().into_bytes().into()
}

/// Derive the S0 authentication and encryption keys from a network key.
#[must_use]
pub fn derive_s0_keys(network_key: &NetworkKey) -> S0Keys {
    S0Keys {
        auth_key: aes128_encrypt_block(network_key.as_bytes(), &S0_AUTH_PASSWORD),
        enc_key: aes128_encrypt_block(network_key.as_bytes(), &S0_ENC_PASSWORD),
    }
}

/// CKDF expansion: `T_1 = CMAC(key, C || 0x01)`, `T_i = CMAC(key, T_{i-1} ||
/// C || i)` with `C` a 15-byte run of `constant`.
fn ckdf_expand(key: &[u8; 16], constant: u8) -> [[u8; 16]; 4] {
    let c = [constant; 15];
    let mut blocks = [[0u8; 16]; 4];
    let mut input = alloc::vec::Vec::with_capacity(32);
    for i in 0..4 {
        input.clear();
        if i > 0 {
            input.extend_from_slice(&blocks[i - 1]);
        }
        input.extend_from_slice(&c);
        input.push(i as u8 + 1);
        blocks[i] = cmac16(key, &input);
    }
    blocks
}

fn assemble_s2_keys(blocks: [[u8; 16]; 4]) -> S2Keys {
    let mut personalization = [0u8; 32];
    personalization[..16].copy_from_slice(&blocks[1]);
    personalization[16..].copy_from_slice(&blocks[2]);
    S2Keys {
        ccm_key: blocks[0],
        personalization,
        mpan_key: blocks[3],
    }
}

/// Expand a permanent network key into its S2 key set.
#[must_use]
pub fn ckdf_network_key_expand(network_key: &NetworkKey) -> S2Keys {
    assemble_s2_keys(ckdf_expand(network_key.as_bytes(), CKDF_NETWORK_CONSTANT))
}

/// Expand a temporary bootstrap key into its S2 key set.
///
/// Uses a distinct expansion constant so temporary and permanent key sets
/// never coincide even for identical input keys.
#[must_use]
pub fn ckdf_temp_key_expand(temp_key: &NetworkKey) -> S2Keys {
    assemble_s2_keys(ckdf_expand(temp_key.as_bytes(), CKDF_TEMP_CONSTANT))
}

/// Mix the sender and receiver entropy inputs into 32 bytes of nonce-stream
/// seed material (extract-then-expand).
///
/// Both parties call this with the **sender's** entropy first; the argument
/// order is part of the synchronization contract.
#[must_use]
pub fn ckdf_mei(sender_ei: &[u8; 16], receiver_ei: &[u8; 16]) -> [u8; 32] {
    let mut combined = [0u8; 32];
    combined[..16].copy_from_slice(sender_ei);
    combined[16..].copy_from_slice(receiver_ei);
    let prk = cmac16(&CKDF_MEI_EXTRACT_KEY, &combined);

    let c = [CKDF_MEI_EXPAND_CONSTANT; 15];
    let mut input = alloc::vec::Vec::with_capacity(32);
    input.extend_from_slice(&c);
    input.push(0x01);
    let t1 = cmac16(&prk, &input);

    input.clear();
    input.extend_from_slice(&t1);
    input.extend_from_slice(&c);
    input.push(0x02);
    let t2 = cmac16(&prk, &input);

    let mut mei = [0u8; 32];
    mei[..16].copy_from_slice(&t1);
    mei[16..].copy_from_slice(&t2);
    mei
}

/// Derive the 13-byte multicast IV from a group's inner nonce state.
#[must_use]
pub fn mpan_iv(mpan_key: &[u8; 16], inner_state: &[u8; 16]) -> [u8; 13] {
    let block = aes128_encrypt_block(mpan_key, inner_state);
    let mut iv = [0u8; 13];
    iv.copy_from_slice(&block[..13]);
    iv
}
