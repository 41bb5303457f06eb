//! Anti-replay sequence-number bookkeeping.
//!
//! Each peer's entry tracks the last accepted sequence number and the one
//! before it. Duplicates of either are rejected before any decryption is
//! attempted; the previous number is kept so the decrypt path can recognize
//! the "next frame arrived one step early" race.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use zwave_core::NodeId;

/// How long an entry stays authoritative without new traffic.
pub const SEQUENCE_ENTRY_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy)]
struct SequenceEntry {
    last: u8,
    previous: Option<u8>,
    updated: Instant,
}

#[derive(Debug, Default)]
pub struct SequenceLedger {
    entries: HashMap<NodeId, SequenceEntry>,
}

impl SequenceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_entry(&self, peer: NodeId) -> Option<&SequenceEntry> {
        self.entries
            .get(&peer)
            .filter(|entry| entry.updated.elapsed() < SEQUENCE_ENTRY_TTL)
    }

    /// Whether `seq` was already accepted from this peer.
    #[must_use]
    pub fn is_duplicate(&self, peer: NodeId, seq: u8) -> bool {
        self.live_entry(peer)
            .is_some_and(|entry| entry.last == seq || entry.previous == Some(seq))
    }

    /// The most recently accepted sequence number, if still live.
    #[must_use]
    pub fn last_accepted(&self, peer: NodeId) -> Option<u8> {
        self.live_entry(peer).map(|entry| entry.last)
    }

    /// Record `seq` as accepted. Returns the previously accepted number.
    pub fn accept(&mut self, peer: NodeId, seq: u8) -> Option<u8> {
        let now = Instant::now();
        match self.entries.get_mut(&peer) {
            Some(entry) if now.duration_since(entry.updated) < SEQUENCE_ENTRY_TTL => {
                let previous = entry.last;
                entry.previous = Some(previous);
                entry.last = seq;
                entry.updated = now;
                Some(previous)
            }
            _ => {
                self.entries.insert(
                    peer,
                    SequenceEntry {
                        last: seq,
                        previous: None,
                        updated: now,
                    },
                );
                None
            }
        }
    }

    pub fn reset(&mut self, peer: NodeId) {
        self.entries.remove(&peer);
    }
}
