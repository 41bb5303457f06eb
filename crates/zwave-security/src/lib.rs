//! Secure transport encapsulation for the Z-Wave security stack.
//!
//! This crate implements the two generations of end-to-end secure transport:
//! the legacy S0 scheme (half-nonce handshake, AES-OFB + truncated CBC-MAC)
//! and the current S2 scheme (synchronized nonce streams, AES-CCM, extension
//! chains, multicast groups). Each generation is driven through an explicit
//! security context owned by the caller; there is no ambient global state.
//!
//! Callers must serialize access per peer: decoding a frame mutates that
//! peer's synchronization state, and encrypting consumes a nonce from the
//! per-peer stream. Frames for different peers are independent.

pub mod error;
pub mod kex;
pub mod keys;
pub mod mpan;
pub mod s0;
pub mod s2;
pub mod sequence;
pub mod span;

pub use error::SecurityError;
pub use keys::Keyring;
pub use s0::{S0Decapsulated, SecurityContext0};
pub use s2::{
    DecapsulatedFrame, Destination, EncapsulationOptions, SecurityContext2, TransportFrameType,
};
pub use span::{SpanKey, SpanState};
