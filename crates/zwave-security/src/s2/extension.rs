//! S2 frame extensions.
//!
//! Extensions form a chain of self-describing entries:
//!
//! ```text
//! [length: 1] || [control: 1] || [data: length - 2]
//! ```
//!
//! where `length` covers the whole entry and the control byte packs the
//! 6-bit extension type, a critical bit (bit 6, "must be understood"), and
//! a more-to-follow bit (bit 7). Extensions that must be readable before
//! decryption (sender entropy, group id, out-of-sync signal) travel in the
//! clear ahead of the ciphertext; the multicast-state extension travels
//! inside it.

use zwave_core::constants::{S2_ENTROPY_INPUT_SIZE, S2_MPAN_STATE_SIZE};
use zwave_core::{EntropyInput, GroupId};

use crate::error::SecurityError;

pub const EXT_TYPE_SPAN: u8 = 0x01;
pub const EXT_TYPE_MPAN: u8 = 0x02;
pub const EXT_TYPE_MGRP: u8 = 0x03;
pub const EXT_TYPE_MOS: u8 = 0x04;

const CONTROL_TYPE_MASK: u8 = 0x3F;
const CONTROL_CRITICAL: u8 = 0x40;
const CONTROL_MORE_TO_FOLLOW: u8 = 0x80;

/// Entry header: length byte plus control byte.
const ENTRY_HEADER: usize = 2;

/// One extension in an S2 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extension {
    /// The sender's entropy input, establishing a fresh nonce stream.
    Span { sender_ei: EntropyInput },
    /// The sender's inner multicast nonce state for one group. Encrypted.
    Mpan { group: GroupId, inner: [u8; 16] },
    /// The multicast group this frame addresses.
    MulticastGroup { group: GroupId },
    /// The sender has lost multicast synchronization with us.
    Mos,
    /// An extension type this implementation does not know. Only
    /// non-critical unknowns survive parsing.
    Unknown {
        ext_type: u8,
        critical: bool,
        data: Vec<u8>,
    },
}

impl Extension {
    pub fn ext_type(&self) -> u8 {
        match self {
            Extension::Span { .. } => EXT_TYPE_SPAN,
            Extension::Mpan { .. } => EXT_TYPE_MPAN,
            Extension::MulticastGroup { .. } => EXT_TYPE_MGRP,
            Extension::Mos => EXT_TYPE_MOS,
            Extension::Unknown { ext_type, .. } => *ext_type,
        }
    }

    pub fn is_critical(&self) -> bool {
        match self {
            Extension::Span { .. } | Extension::Mpan { .. } | Extension::MulticastGroup { .. } => {
                true
            }
            Extension::Mos => false,
            Extension::Unknown { critical, .. } => *critical,
        }
    }

    /// Whether this extension travels inside the ciphertext.
    pub fn is_encrypted(&self) -> bool {
        matches!(self, Extension::Mpan { .. })
    }

    fn data(&self) -> Vec<u8> {
        match self {
            Extension::Span { sender_ei } => sender_ei.as_ref().to_vec(),
            Extension::Mpan { group, inner } => {
                let mut data = Vec::with_capacity(1 + S2_MPAN_STATE_SIZE);
                data.push(group.value());
                data.extend_from_slice(inner);
                data
            }
            Extension::MulticastGroup { group } => vec![group.value()],
            Extension::Mos => Vec::new(),
            Extension::Unknown { data, .. } => data.clone(),
        }
    }

    fn serialize_into(&self, out: &mut Vec<u8>, more_to_follow: bool) {
        let data = self.data();
        let mut control = self.ext_type() & CONTROL_TYPE_MASK;
        if self.is_critical() {
            control |= CONTROL_CRITICAL;
        }
        if more_to_follow {
            control |= CONTROL_MORE_TO_FOLLOW;
        }
        out.push((ENTRY_HEADER + data.len()) as u8);
        out.push(control);
        out.extend_from_slice(&data);
    }
}

/// Serialize a chain of extensions, setting more-to-follow on all but the
/// last entry.
pub fn serialize_chain(extensions: &[Extension], out: &mut Vec<u8>) {
    for (index, extension) in extensions.iter().enumerate() {
        extension.serialize_into(out, index + 1 < extensions.len());
    }
}

/// Parse an extension chain from the start of `data`.
///
/// Returns the extensions and the number of bytes consumed.
///
/// # Errors
///
/// [`SecurityError::UnsupportedExtension`] for an unknown extension marked
/// critical; [`SecurityError::InvalidPayload`] for structural violations.
/// All length validation happens here, before any payload interpretation.
pub fn parse_chain(data: &[u8]) -> Result<(Vec<Extension>, usize), SecurityError> {
    let mut extensions = Vec::new();
    let mut offset = 0;

    loop {
        if data.len() < offset + ENTRY_HEADER {
            return Err(SecurityError::InvalidPayload(
                "extension entry shorter than its header",
            ));
        }
        let length = data[offset] as usize;
        let control = data[offset + 1];
        if length < ENTRY_HEADER || data.len() < offset + length {
            return Err(SecurityError::InvalidPayload(
                "extension length exceeds frame",
            ));
        }

        let ext_type = control & CONTROL_TYPE_MASK;
        let critical = control & CONTROL_CRITICAL != 0;
        let more_to_follow = control & CONTROL_MORE_TO_FOLLOW != 0;
        let payload = &data[offset + ENTRY_HEADER..offset + length];

        let extension = match ext_type {
            EXT_TYPE_SPAN => {
                if payload.len() != S2_ENTROPY_INPUT_SIZE {
                    return Err(SecurityError::InvalidPayload(
                        "entropy extension must carry 16 bytes",
                    ));
                }
                Extension::Span {
                    sender_ei: EntropyInput::try_from(payload)
                        .expect("length checked above"),
                }
            }
            EXT_TYPE_MPAN => {
                if payload.len() != 1 + S2_MPAN_STATE_SIZE {
                    return Err(SecurityError::InvalidPayload(
                        "multicast state extension must carry 17 bytes",
                    ));
                }
                let inner: [u8; 16] = payload[1..].try_into().expect("length checked above");
                Extension::Mpan {
                    group: GroupId::new(payload[0]),
                    inner,
                }
            }
            EXT_TYPE_MGRP => {
                if payload.len() != 1 {
                    return Err(SecurityError::InvalidPayload(
                        "group extension must carry 1 byte",
                    ));
                }
                Extension::MulticastGroup {
                    group: GroupId::new(payload[0]),
                }
            }
            EXT_TYPE_MOS => {
                if !payload.is_empty() {
                    return Err(SecurityError::InvalidPayload(
                        "out-of-sync extension carries no data",
                    ));
                }
                Extension::Mos
            }
            other => {
                if critical {
                    return Err(SecurityError::UnsupportedExtension(other));
                }
                Extension::Unknown {
                    ext_type: other,
                    critical,
                    data: payload.to_vec(),
                }
            }
        };
        extensions.push(extension);
        offset += length;

        if !more_to_follow {
            return Ok((extensions, offset));
        }
    }
}
