//! Core types, constants, and command framing for the Z-Wave security stack.
//!
//! This crate defines the protocol identifiers, newtype wrappers, and the
//! generic command-frame abstraction (a command class id, a command id, and
//! an opaque payload) that the security encapsulation layers nest inside one
//! another.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod constants;
pub mod error;
pub mod frame;
pub mod types;

pub use constants::{S0Command, S2Command};
pub use error::FrameError;
pub use frame::{CommandSpec, RawCommand};
pub use types::{
    EntropyInput, GroupId, HalfNonce, HomeId, InvalidLength, NodeId, SecurityClass,
};
