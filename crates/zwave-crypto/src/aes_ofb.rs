//! AES-128-OFB encryption and decryption.
//!
//! OFB turns AES into a stream cipher, so ciphertext length always equals
//! plaintext length and no padding is involved. Encryption and decryption
//! are the same keystream XOR; both directions are provided for call-site
//! clarity. The IV is passed explicitly and is **not** prepended to the
//! output.

use alloc::vec::Vec;

use aes::Aes128;
use ofb::Ofb;
use ofb::cipher::{KeyIvInit, StreamCipher};

type Aes128Ofb = Ofb<Aes128>;

/// Encrypt `plaintext` with AES-128-OFB using the given `key` and `iv`.
#[must_use]
pub fn aes128_ofb_encrypt(key: &[u8; 16], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
    let mut buf = plaintext.to_vec();
    let mut cipher = Aes128Ofb::new(key.into(), iv.into());
    cipher.apply_keystream(&mut buf);
    buf
}

/// Decrypt `ciphertext` with AES-128-OFB using the given `key` and `iv`.
#[must_use]
pub fn aes128_ofb_decrypt(key: &[u8; 16], iv: &[u8; 16], ciphertext: &[u8]) -> Vec<u8> {
    aes128_ofb_encrypt(key, iv, ciphertext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ofb_roundtrip() {
        let key: [u8; 16] = [0x42; 16];
        let iv: [u8; 16] = [0x24; 16];

        for size in [0, 1, 7, 15, 16, 17, 31, 32, 33, 100, 255] {
            let data: Vec<u8> = (0..size).map(|i| (i & 0xFF) as u8).collect();
            let ciphertext = aes128_ofb_encrypt(&key, &iv, &data);
            assert_eq!(ciphertext.len(), data.len(), "OFB must not change length");

            let recovered = aes128_ofb_decrypt(&key, &iv, &ciphertext);
            assert_eq!(recovered, data, "roundtrip mismatch for size {size}");
        }
    }

    #[test]
    fn test_ofb_different_iv_different_ciphertext() {
        let key: [u8; 16] = [0x42; 16];
        let data = b"same plaintext, different keystream";

        let ct_a = aes128_ofb_encrypt(&key, &[0x01; 16], data);
        let ct_b = aes128_ofb_encrypt(&key, &[0x02; 16], data);
        assert_ne!(ct_a, ct_b);
    }

    #[test]
    fn test_ofb_wrong_iv_garbles_plaintext() {
        let key: [u8; 16] = [0x42; 16];
        let data = b"recoverable only with the right IV";

        let ciphertext = aes128_ofb_encrypt(&key, &[0x11; 16], data);
        let garbled = aes128_ofb_decrypt(&key, &[0x22; 16], &ciphertext);
        assert_ne!(garbled, data);
    }
}
