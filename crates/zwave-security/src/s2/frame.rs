//! S2 encapsulation frame codec.
//!
//! Payload layout of a Message Encapsulation command:
//!
//! ```text
//! [sequence number: 1] || [flags: 1] || [unencrypted extensions] ||
//! [ciphertext] || [auth tag: 8]
//! ```
//!
//! Flags bit 0 marks the presence of the unencrypted extension chain; bit 1
//! marks encrypted extensions at the head of the plaintext. The CCM
//! authentication data covers the sender, the destination, the network id,
//! the full serialized frame length, and everything up to the ciphertext:
//!
//! ```text
//! [sender id: 1] || [destination id: 1] || [home id: 4, BE] ||
//! [message length: 2, BE] || [sequence number: 1] || [flags: 1] ||
//! [unencrypted extensions]
//! ```

use zwave_core::constants::{
    COMMAND_CLASS_SECURITY_2, COMMAND_HEADER_SIZE, S2_AUTH_TAG_SIZE,
};
use zwave_core::{EntropyInput, FrameError, GroupId, HomeId, NodeId, RawCommand, S2Command};

use crate::error::SecurityError;
use super::extension::{parse_chain, serialize_chain, Extension};

const FLAG_EXTENSIONS: u8 = 0x01;
const FLAG_ENCRYPTED_EXTENSIONS: u8 = 0x02;

/// Sequence number + flags byte.
const FIXED_HEADER: usize = 2;

/// A parsed S2 encapsulation frame.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct EncryptedFrame {
    pub sequence_number: u8,
    /// The unencrypted extension run.
    pub extensions: Vec<Extension>,
    /// Whether the plaintext starts with an encrypted extension run.
    pub has_encrypted_extensions: bool,
    pub ciphertext: Vec<u8>,
    pub auth_tag: [u8; S2_AUTH_TAG_SIZE],
    /// The serialized unencrypted extension run, byte-exact as received or
    /// built, so authentication data never depends on re-encoding.
    pub(crate) extension_bytes: Vec<u8>,
}

impl EncryptedFrame {
    /// Assemble a frame from freshly built parts.
    pub fn new(
        sequence_number: u8,
        extensions: Vec<Extension>,
        has_encrypted_extensions: bool,
        ciphertext: Vec<u8>,
        auth_tag: [u8; S2_AUTH_TAG_SIZE],
    ) -> Self {
        let mut extension_bytes = Vec::new();
        serialize_chain(&extensions, &mut extension_bytes);
        Self {
            sequence_number,
            extensions,
            has_encrypted_extensions,
            ciphertext,
            auth_tag,
            extension_bytes,
        }
    }

    /// Parse an encapsulation frame from a command.
    pub fn parse(cmd: &RawCommand) -> Result<Self, SecurityError> {
        if cmd.cc != COMMAND_CLASS_SECURITY_2 {
            return Err(SecurityError::Frame(FrameError::InvalidCommandClass(cmd.cc)));
        }
        if cmd.command != S2Command::MessageEncapsulation as u8 {
            return Err(SecurityError::Frame(FrameError::InvalidCommand {
                cc: cmd.cc,
                command: cmd.command,
            }));
        }

        let payload = &cmd.payload;
        let min = FIXED_HEADER + S2_AUTH_TAG_SIZE;
        if payload.len() < min {
            return Err(SecurityError::Frame(FrameError::TooShort {
                min,
                actual: payload.len(),
            }));
        }

        let sequence_number = payload[0];
        let flags = payload[1];

        let (extensions, ext_len) = if flags & FLAG_EXTENSIONS != 0 {
            parse_chain(&payload[FIXED_HEADER..payload.len() - S2_AUTH_TAG_SIZE])?
        } else {
            (Vec::new(), 0)
        };
        let extension_bytes = payload[FIXED_HEADER..FIXED_HEADER + ext_len].to_vec();

        let tag_start = payload.len() - S2_AUTH_TAG_SIZE;
        let ciphertext = payload[FIXED_HEADER + ext_len..tag_start].to_vec();
        let auth_tag: [u8; S2_AUTH_TAG_SIZE] = payload[tag_start..]
            .try_into()
            .expect("slice is exactly 8 bytes");

        Ok(Self {
            sequence_number,
            extensions,
            has_encrypted_extensions: flags & FLAG_ENCRYPTED_EXTENSIONS != 0,
            ciphertext,
            auth_tag,
            extension_bytes,
        })
    }

    /// Serialize back into a command.
    pub fn to_command(&self) -> RawCommand {
        let mut payload = Vec::with_capacity(
            FIXED_HEADER + self.extension_bytes.len() + self.ciphertext.len() + S2_AUTH_TAG_SIZE,
        );
        payload.push(self.sequence_number);
        payload.push(self.flags_byte());
        payload.extend_from_slice(&self.extension_bytes);
        payload.extend_from_slice(&self.ciphertext);
        payload.extend_from_slice(&self.auth_tag);
        RawCommand::new(
            COMMAND_CLASS_SECURITY_2,
            S2Command::MessageEncapsulation as u8,
            payload,
        )
    }

    pub fn flags_byte(&self) -> u8 {
        let mut flags = 0;
        if !self.extension_bytes.is_empty() {
            flags |= FLAG_EXTENSIONS;
        }
        if self.has_encrypted_extensions {
            flags |= FLAG_ENCRYPTED_EXTENSIONS;
        }
        flags
    }

    /// Total serialized length of the encapsulation command, as covered by
    /// the authentication data.
    pub fn serialized_len(&self) -> usize {
        COMMAND_HEADER_SIZE
            + FIXED_HEADER
            + self.extension_bytes.len()
            + self.ciphertext.len()
            + S2_AUTH_TAG_SIZE
    }

    pub fn extension_bytes(&self) -> &[u8] {
        &self.extension_bytes
    }

    /// The group id from a multicast-group extension, if present.
    pub fn find_group(&self) -> Option<GroupId> {
        self.extensions.iter().find_map(|ext| match ext {
            Extension::MulticastGroup { group } => Some(*group),
            _ => None,
        })
    }

    /// The sender's entropy input from a SPAN extension, if present.
    pub fn find_sender_entropy(&self) -> Option<EntropyInput> {
        self.extensions.iter().find_map(|ext| match ext {
            Extension::Span { sender_ei } => Some(*sender_ei),
            _ => None,
        })
    }

    /// Whether the sender signalled multicast desynchronization.
    pub fn has_mos(&self) -> bool {
        self.extensions
            .iter()
            .any(|ext| matches!(ext, Extension::Mos))
    }
}

/// Build the CCM authentication data for one frame direction.
pub fn build_aad(
    sender: NodeId,
    destination: NodeId,
    home_id: HomeId,
    message_length: u16,
    sequence_number: u8,
    flags: u8,
    extension_bytes: &[u8],
) -> Vec<u8> {
    let mut aad = Vec::with_capacity(10 + extension_bytes.len());
    aad.push(sender.value());
    aad.push(destination.value());
    aad.extend_from_slice(&home_id.to_be_bytes());
    aad.extend_from_slice(&message_length.to_be_bytes());
    aad.push(sequence_number);
    aad.push(flags);
    aad.extend_from_slice(extension_bytes);
    aad
}
