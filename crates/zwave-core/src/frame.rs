//! Generic command framing.
//!
//! Every command on the wire is a command-class id, a command id, and an
//! opaque payload:
//!
//! ```text
//! [cc: 1 byte] || [command: 1 byte] || [payload: variable]
//! ```
//!
//! Encapsulation nests one serialized command as the payload (or part of the
//! payload) of another. [`RawCommand`] is the unit the security layers
//! encrypt and decrypt; the typed payload codecs live next to the engines
//! that use them.
//!
//! The registry below is the closed set of commands this stack understands,
//! resolved through a static lookup table rather than any runtime type
//! registration.

use alloc::vec::Vec;

use crate::constants::{
    COMMAND_CLASS_BASIC, COMMAND_CLASS_SECURITY, COMMAND_CLASS_SECURITY_2,
    COMMAND_HEADER_SIZE,
};
use crate::error::FrameError;

/// A parsed command frame: command class, command id, and raw payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawCommand {
    pub cc: u8,
    pub command: u8,
    pub payload: Vec<u8>,
}

impl RawCommand {
    pub fn new(cc: u8, command: u8, payload: Vec<u8>) -> Self {
        Self { cc, command, payload }
    }

    /// Parse a command frame from wire bytes.
    pub fn parse(raw: &[u8]) -> Result<Self, FrameError> {
        if raw.len() < COMMAND_HEADER_SIZE {
            return Err(FrameError::TooShort {
                min: COMMAND_HEADER_SIZE,
                actual: raw.len(),
            });
        }
        Ok(Self {
            cc: raw[0],
            command: raw[1],
            payload: raw[2..].to_vec(),
        })
    }

    /// Serialize the command back to wire format.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(COMMAND_HEADER_SIZE + self.payload.len());
        out.push(self.cc);
        out.push(self.command);
        out.extend_from_slice(&self.payload);
        out
    }

    /// The length of the serialized form.
    #[must_use]
    pub fn serialized_len(&self) -> usize {
        COMMAND_HEADER_SIZE + self.payload.len()
    }

    /// Whether this command encapsulates another command in its payload.
    #[must_use]
    pub fn is_encapsulation(&self) -> bool {
        lookup(self.cc, self.command).is_some_and(|spec| spec.encapsulating)
    }
}

/// Static description of a known command.
#[derive(Debug, Clone, Copy)]
pub struct CommandSpec {
    pub cc: u8,
    pub command: u8,
    pub name: &'static str,
    /// Minimum valid payload length.
    pub min_payload: usize,
    /// Whether the payload carries another encapsulated command.
    pub encapsulating: bool,
}

/// The closed command registry. Leaf command classes beyond Basic are out of
/// scope; the stack treats them as opaque [`RawCommand`] payloads.
static REGISTRY: &[CommandSpec] = &[
    CommandSpec { cc: COMMAND_CLASS_BASIC, command: 0x01, name: "Basic Set", min_payload: 1, encapsulating: false },
    CommandSpec { cc: COMMAND_CLASS_BASIC, command: 0x02, name: "Basic Get", min_payload: 0, encapsulating: false },
    CommandSpec { cc: COMMAND_CLASS_BASIC, command: 0x03, name: "Basic Report", min_payload: 1, encapsulating: false },
    CommandSpec { cc: COMMAND_CLASS_SECURITY, command: 0x02, name: "Security Commands Supported Get", min_payload: 0, encapsulating: false },
    CommandSpec { cc: COMMAND_CLASS_SECURITY, command: 0x03, name: "Security Commands Supported Report", min_payload: 1, encapsulating: false },
    CommandSpec { cc: COMMAND_CLASS_SECURITY, command: 0x04, name: "Security Scheme Get", min_payload: 1, encapsulating: false },
    CommandSpec { cc: COMMAND_CLASS_SECURITY, command: 0x05, name: "Security Scheme Report", min_payload: 1, encapsulating: false },
    CommandSpec { cc: COMMAND_CLASS_SECURITY, command: 0x06, name: "Network Key Set", min_payload: 16, encapsulating: false },
    CommandSpec { cc: COMMAND_CLASS_SECURITY, command: 0x07, name: "Network Key Verify", min_payload: 0, encapsulating: false },
    CommandSpec { cc: COMMAND_CLASS_SECURITY, command: 0x08, name: "Security Scheme Inherit", min_payload: 1, encapsulating: false },
    CommandSpec { cc: COMMAND_CLASS_SECURITY, command: 0x40, name: "Nonce Get", min_payload: 0, encapsulating: false },
    CommandSpec { cc: COMMAND_CLASS_SECURITY, command: 0x80, name: "Nonce Report", min_payload: 8, encapsulating: false },
    CommandSpec { cc: COMMAND_CLASS_SECURITY, command: 0x81, name: "Security Command Encapsulation", min_payload: 18, encapsulating: true },
    CommandSpec { cc: COMMAND_CLASS_SECURITY, command: 0xC1, name: "Security Command Encapsulation Nonce Get", min_payload: 18, encapsulating: true },
    CommandSpec { cc: COMMAND_CLASS_SECURITY_2, command: 0x01, name: "S2 Nonce Get", min_payload: 1, encapsulating: false },
    CommandSpec { cc: COMMAND_CLASS_SECURITY_2, command: 0x02, name: "S2 Nonce Report", min_payload: 2, encapsulating: false },
    CommandSpec { cc: COMMAND_CLASS_SECURITY_2, command: 0x03, name: "S2 Message Encapsulation", min_payload: 10, encapsulating: true },
    CommandSpec { cc: COMMAND_CLASS_SECURITY_2, command: 0x04, name: "KEX Get", min_payload: 0, encapsulating: false },
    CommandSpec { cc: COMMAND_CLASS_SECURITY_2, command: 0x05, name: "KEX Report", min_payload: 4, encapsulating: false },
    CommandSpec { cc: COMMAND_CLASS_SECURITY_2, command: 0x06, name: "KEX Set", min_payload: 4, encapsulating: false },
    CommandSpec { cc: COMMAND_CLASS_SECURITY_2, command: 0x07, name: "KEX Fail", min_payload: 1, encapsulating: false },
    CommandSpec { cc: COMMAND_CLASS_SECURITY_2, command: 0x08, name: "Public Key Report", min_payload: 17, encapsulating: false },
    CommandSpec { cc: COMMAND_CLASS_SECURITY_2, command: 0x09, name: "Network Key Get", min_payload: 1, encapsulating: false },
    CommandSpec { cc: COMMAND_CLASS_SECURITY_2, command: 0x0A, name: "Network Key Report", min_payload: 17, encapsulating: false },
    CommandSpec { cc: COMMAND_CLASS_SECURITY_2, command: 0x0B, name: "Network Key Verify", min_payload: 0, encapsulating: false },
    CommandSpec { cc: COMMAND_CLASS_SECURITY_2, command: 0x0C, name: "Transfer End", min_payload: 1, encapsulating: false },
    CommandSpec { cc: COMMAND_CLASS_SECURITY_2, command: 0x0D, name: "S2 Commands Supported Get", min_payload: 0, encapsulating: false },
    CommandSpec { cc: COMMAND_CLASS_SECURITY_2, command: 0x0E, name: "S2 Commands Supported Report", min_payload: 0, encapsulating: false },
];

/// Look up a command in the closed registry.
#[must_use]
pub fn lookup(cc: u8, command: u8) -> Option<&'static CommandSpec> {
    REGISTRY
        .iter()
        .find(|spec| spec.cc == cc && spec.command == command)
}

/// Validate a parsed command against the registry, if it is known.
///
/// Unknown commands pass: the stack transports leaf command classes it does
/// not model. Known commands with short payloads are rejected before any
/// downstream processing.
pub fn validate(cmd: &RawCommand) -> Result<(), FrameError> {
    if let Some(spec) = lookup(cmd.cc, cmd.command)
        && cmd.payload.len() < spec.min_payload
    {
        return Err(FrameError::TooShort {
            min: spec.min_payload,
            actual: cmd.payload.len(),
        });
    }
    Ok(())
}
