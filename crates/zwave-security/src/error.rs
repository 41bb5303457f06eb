//! Security-layer error types.
//!
//! Every variant is a protocol-level condition the caller is expected to
//! handle: request a nonce and retry, drop the frame, or resynchronize.
//! Parser bugs are not represented here; malformed peer input surfaces as
//! `InvalidPayload` or a frame error before any crypto runs.

use zwave_core::{FrameError, GroupId, NodeId, SecurityClass};
use zwave_crypto::CryptoError;

#[derive(Debug, thiserror::Error)]
pub enum SecurityError {
    #[error("no nonce synchronization established with node {0}")]
    NoSpan(NodeId),

    #[error("no multicast nonce state for node {node} in group {group}")]
    NoMpan { node: NodeId, group: GroupId },

    #[error("no nonce available for node {0}")]
    NoNonce(NodeId),

    #[error("no key material for security class {0}")]
    NoKey(SecurityClass),

    #[error("temporary bootstrap key not configured")]
    NoTempKey,

    #[error("unable to decrypt singlecast frame from node {0}")]
    CannotDecode(NodeId),

    #[error("unable to decrypt multicast frame from node {node} for group {group}")]
    CannotDecodeMulticast { node: NodeId, group: GroupId },

    #[error("duplicate sequence number {seq} from node {node}")]
    DuplicateSequence { node: NodeId, seq: u8 },

    #[error("required extension missing: {0}")]
    MissingExtension(&'static str),

    #[error("unsupported critical extension type 0x{0:02x}")]
    UnsupportedExtension(u8),

    #[error("invalid payload: {0}")]
    InvalidPayload(&'static str),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
}
