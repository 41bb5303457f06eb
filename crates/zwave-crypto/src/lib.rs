//! Cryptographic primitives for the Z-Wave security stack.
//!
//! This crate provides the symmetric building blocks the encapsulation
//! engines are built on: AES-128-CCM authenticated encryption, AES-128-OFB,
//! the 8-byte CBC-MAC used by legacy secure frames, the CKDF family of key
//! derivations, and the CTR_DRBG that turns two parties' entropy
//! contributions into a synchronized nonce stream.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod block;

pub mod aes_ccm;
pub mod aes_ofb;
pub mod cbc_mac;
pub mod ctr_drbg;
pub mod entropy;
pub mod error;
pub mod kdf;

pub use ctr_drbg::{CtrDrbg, NonceStream};
pub use error::CryptoError;
pub use kdf::{NetworkKey, S0Keys, S2Keys};
