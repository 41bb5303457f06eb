//! Per-peer synchronized-nonce (SPAN) state.
//!
//! The synchronization lifecycle per peer:
//!
//! ```text
//! None ──(we send our entropy)──────────► LocalEntropy
//! None ──(peer sends its entropy)───────► RemoteEntropy
//! LocalEntropy ──(frame with sender entropy arrives)──► Established
//! RemoteEntropy ──(we send, attaching our entropy)────► Established
//! Established ──(desync, expiry, reset)──────────────► None
//! ```
//!
//! `Established` owns the derived nonce stream. Every nonce draw advances
//! the stream, so callers must not draw speculatively; the one sanctioned
//! exception is the stashed send-nonce kept for the race where both parties
//! transmit on the same stream position nearly simultaneously.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use zwave_core::{EntropyInput, NodeId, SecurityClass};
use zwave_crypto::entropy::generate_entropy_input;
use zwave_crypto::NonceStream;

use crate::error::SecurityError;

/// Lifetime of an established stream without re-synchronization.
pub const SPAN_TTL: Duration = Duration::from_secs(3600);
/// Lifetime of the stashed send-nonce used by the race-tolerance rule.
pub const STASHED_NONCE_TTL: Duration = Duration::from_secs(10);

/// Which key material an established stream was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanKey {
    Class(SecurityClass),
    Temporary,
}

#[derive(Debug, Clone, Copy)]
struct StashedNonce {
    nonce: [u8; 13],
    expires: Instant,
}

/// A live, derivable nonce stream shared with one peer.
#[must_use]
pub struct EstablishedSpan {
    pub key: SpanKey,
    stream: NonceStream,
    stashed: Option<StashedNonce>,
    expires: Instant,
}

impl EstablishedSpan {
    fn new(key: SpanKey, stream: NonceStream) -> Self {
        Self {
            key,
            stream,
            stashed: None,
            expires: Instant::now() + SPAN_TTL,
        }
    }

    /// Draw the next nonce, advancing the stream.
    ///
    /// When drawing for an outbound frame the nonce is also stashed as the
    /// race-tolerance candidate for the next inbound frame.
    pub fn next_nonce(&mut self, for_sending: bool) -> [u8; 13] {
        let nonce = self.stream.next_nonce();
        if for_sending {
            self.stashed = Some(StashedNonce {
                nonce,
                expires: Instant::now() + STASHED_NONCE_TTL,
            });
        }
        nonce
    }

    /// Consume the stashed send-nonce if one is live. The nonce is removed
    /// whether or not the caller's decryption attempt with it succeeds.
    pub fn take_stashed(&mut self) -> Option<[u8; 13]> {
        let stashed = self.stashed.take()?;
        (Instant::now() < stashed.expires).then_some(stashed.nonce)
    }

    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires
    }
}

impl std::fmt::Debug for EstablishedSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EstablishedSpan")
            .field("key", &self.key)
            .field("has_stashed", &self.stashed.is_some())
            .finish_non_exhaustive()
    }
}

/// Synchronization state with one peer.
#[derive(Debug)]
#[must_use]
pub enum SpanState {
    /// No synchronization; inbound secure frames must be rejected.
    None,
    /// We generated our entropy half and await the peer's half in-band.
    LocalEntropy { receiver_ei: EntropyInput },
    /// We hold the peer's entropy half but have not derived a stream yet.
    RemoteEntropy { receiver_ei: EntropyInput },
    /// A live nonce stream exists.
    Established(EstablishedSpan),
}

impl SpanState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::LocalEntropy { .. } => "LOCAL_ENTROPY",
            Self::RemoteEntropy { .. } => "REMOTE_ENTROPY",
            Self::Established(_) => "ESTABLISHED",
        }
    }

    pub fn is_established(&self) -> bool {
        matches!(self, Self::Established(_))
    }
}

static NONE_STATE: SpanState = SpanState::None;

/// Per-peer SPAN storage.
#[derive(Debug, Default)]
pub struct SpanTable {
    spans: HashMap<NodeId, SpanState>,
}

impl SpanTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current state for a peer. Absent peers are `None`.
    pub fn state(&self, peer: NodeId) -> &SpanState {
        self.spans.get(&peer).unwrap_or(&NONE_STATE)
    }

    pub fn set_state(&mut self, peer: NodeId, state: SpanState) {
        tracing::debug!(%peer, state = state.name(), "SPAN state set");
        self.spans.insert(peer, state);
    }

    /// Record the peer's entropy half, replacing any prior synchronization.
    pub fn store_remote_entropy(&mut self, peer: NodeId, receiver_ei: EntropyInput) {
        self.set_state(peer, SpanState::RemoteEntropy { receiver_ei });
    }

    /// Generate our entropy half for this peer and remember it. The returned
    /// value is what the peer must receive in a nonce report.
    pub fn generate_local_entropy(&mut self, peer: NodeId) -> EntropyInput {
        let receiver_ei = EntropyInput::new(generate_entropy_input());
        self.set_state(peer, SpanState::LocalEntropy { receiver_ei });
        receiver_ei
    }

    /// Install an established stream for a peer.
    pub fn establish(&mut self, peer: NodeId, key: SpanKey, stream: NonceStream) {
        tracing::debug!(%peer, ?key, "SPAN established");
        self.spans
            .insert(peer, SpanState::Established(EstablishedSpan::new(key, stream)));
    }

    /// Mutable access to an established stream. Expired streams are torn
    /// down and reported as absent.
    pub fn established_mut(&mut self, peer: NodeId) -> Option<&mut EstablishedSpan> {
        if let Some(SpanState::Established(span)) = self.spans.get(&peer)
            && span.is_expired()
        {
            tracing::debug!(%peer, "SPAN expired");
            self.spans.insert(peer, SpanState::None);
        }
        match self.spans.get_mut(&peer) {
            Some(SpanState::Established(span)) => Some(span),
            _ => None,
        }
    }

    /// The key an established (unexpired) stream was derived from.
    pub fn established_key(&mut self, peer: NodeId) -> Option<SpanKey> {
        self.established_mut(peer).map(|span| span.key)
    }

    /// Draw the next nonce for a peer.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::NoSpan`] unless the peer is `Established`.
    pub fn next_nonce(
        &mut self,
        peer: NodeId,
        for_sending: bool,
    ) -> Result<[u8; 13], SecurityError> {
        self.established_mut(peer)
            .map(|span| span.next_nonce(for_sending))
            .ok_or(SecurityError::NoSpan(peer))
    }

    pub fn reset(&mut self, peer: NodeId) {
        if self.spans.remove(&peer).is_some() {
            tracing::debug!(%peer, "SPAN reset");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: NodeId = NodeId::new(3);

    fn established_table() -> SpanTable {
        let mut table = SpanTable::new();
        let stream = NonceStream::derive(&[0xAA; 16], &[0xBB; 16], &[0xCC; 32]);
        table.establish(PEER, SpanKey::Class(SecurityClass::S2Authenticated), stream);
        table
    }

    #[test]
    fn absent_peer_is_none() {
        let table = SpanTable::new();
        assert!(matches!(table.state(PEER), SpanState::None));
    }

    #[test]
    fn next_nonce_requires_established() {
        let mut table = SpanTable::new();
        assert!(matches!(
            table.next_nonce(PEER, false),
            Err(SecurityError::NoSpan(_))
        ));

        table.generate_local_entropy(PEER);
        assert!(matches!(
            table.next_nonce(PEER, false),
            Err(SecurityError::NoSpan(_))
        ));
    }

    #[test]
    fn next_nonce_advances_stream() {
        let mut table = established_table();
        let first = table.next_nonce(PEER, false).unwrap();
        let second = table.next_nonce(PEER, false).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn sending_stashes_the_drawn_nonce() {
        let mut table = established_table();
        let sent = table.next_nonce(PEER, true).unwrap();
        let span = table.established_mut(PEER).unwrap();
        assert_eq!(span.take_stashed(), Some(sent));
        // Single use.
        assert_eq!(span.take_stashed(), None);
    }

    #[test]
    fn receiving_does_not_stash() {
        let mut table = established_table();
        table.next_nonce(PEER, false).unwrap();
        let span = table.established_mut(PEER).unwrap();
        assert_eq!(span.take_stashed(), None);
    }

    #[test]
    fn local_entropy_is_remembered() {
        let mut table = SpanTable::new();
        let ei = table.generate_local_entropy(PEER);
        match table.state(PEER) {
            SpanState::LocalEntropy { receiver_ei } => assert_eq!(*receiver_ei, ei),
            other => panic!("unexpected state {}", other.name()),
        }
    }

    #[test]
    fn remote_entropy_replaces_established() {
        let mut table = established_table();
        table.store_remote_entropy(PEER, EntropyInput::new([0x11; 16]));
        assert!(matches!(table.state(PEER), SpanState::RemoteEntropy { .. }));
        assert!(table.established_mut(PEER).is_none());
    }

    #[test]
    fn reset_tears_down() {
        let mut table = established_table();
        table.reset(PEER);
        assert!(matches!(table.state(PEER), SpanState::None));
    }
}
