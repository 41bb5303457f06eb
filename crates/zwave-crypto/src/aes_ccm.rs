//! AES-128-CCM authenticated encryption.
//!
//! The secure-frame construction uses CCM with a 13-byte nonce and an 8-byte
//! authentication tag (leaving a 2-byte CCM length field, so payloads are
//! bounded by 2^16 - 1 bytes). The tag is returned detached; frames carry it
//! as a separate trailing field.

use alloc::vec::Vec;

use aes::Aes128;
use ccm::aead::generic_array::GenericArray;
use ccm::aead::{AeadInPlace, KeyInit};
use ccm::consts::{U8, U13};
use ccm::Ccm;

use crate::CryptoError;

type Aes128Ccm = Ccm<Aes128, U8, U13>;

pub const CCM_NONCE_SIZE: usize = 13;
pub const CCM_TAG_SIZE: usize = 8;
/// Largest payload encodable in CCM's 2-byte length field.
pub const CCM_MAX_PAYLOAD: usize = u16::MAX as usize;

/// Encrypt `plaintext` with AES-128-CCM, authenticating `aad` alongside it.
///
/// Returns the ciphertext (same length as the plaintext) and the detached
/// 8-byte tag.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidLength`] if the plaintext exceeds
/// [`CCM_MAX_PAYLOAD`].
pub fn aes128_ccm_encrypt(
    key: &[u8; 16],
    iv: &[u8; CCM_NONCE_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<(Vec<u8>, [u8; CCM_TAG_SIZE]), CryptoError> {
    if plaintext.len() > CCM_MAX_PAYLOAD {
        return Err(CryptoError::InvalidLength {
            reason: "CCM payload exceeds 2^16 - 1 bytes",
        });
    }

    let cipher = Aes128Ccm::new(GenericArray::from_slice(key));
    let mut buf = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(GenericArray::from_slice(iv), aad, &mut buf)
        .map_err(|_| CryptoError::InvalidLength {
            reason: "CCM rejected input sizes",
        })?;
    Ok((buf, tag.into()))
}

/// Decrypt `ciphertext` with AES-128-CCM, verifying the detached tag over
/// the ciphertext and `aad`.
///
/// # Errors
///
/// Returns [`CryptoError::AuthenticationFailed`] if the tag does not verify.
/// No plaintext is released on failure.
pub fn aes128_ccm_decrypt(
    key: &[u8; 16],
    iv: &[u8; CCM_NONCE_SIZE],
    ciphertext: &[u8],
    aad: &[u8],
    tag: &[u8; CCM_TAG_SIZE],
) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes128Ccm::new(GenericArray::from_slice(key));
    let mut buf = ciphertext.to_vec();
    cipher
        .decrypt_in_place_detached(
            GenericArray::from_slice(iv),
            aad,
            &mut buf,
            GenericArray::from_slice(tag),
        )
        .map_err(|_| CryptoError::AuthenticationFailed)?;
    Ok(buf)
}
