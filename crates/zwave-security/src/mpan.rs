//! Multicast (MPAN) nonce state, per peer-and-group and for our own groups.
//!
//! A multicast sender owns one inner nonce state per group; every receiver
//! mirrors that state per `(peer, group)` pair. The 13-byte multicast IV is
//! derived from the inner state, which then advances by one. Any decryption
//! failure, or an explicit out-of-sync signal, parks the pair in
//! `OutOfSync` until the sender redistributes its state via an encrypted
//! singlecast extension.

use std::collections::HashMap;

use zwave_core::{GroupId, NodeId, SecurityClass};
use zwave_crypto::entropy::random_bytes;
use zwave_crypto::kdf::mpan_iv;

use crate::error::SecurityError;

/// Multicast synchronization with one peer for one group. Absence from the
/// table is the unsynchronized state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MpanState {
    /// Decryption failed or the peer signalled desync; wait for the sender
    /// to redistribute its state.
    OutOfSync,
    /// We mirror the sender's inner nonce state.
    Established { inner: [u8; 16] },
}

fn advance_inner(inner: &mut [u8; 16]) {
    for byte in inner.iter_mut().rev() {
        *byte = byte.wrapping_add(1);
        if *byte != 0 {
            break;
        }
    }
}

/// Per-(peer, group) MPAN storage for groups other nodes own.
#[derive(Debug, Default)]
pub struct MpanTable {
    entries: HashMap<(NodeId, GroupId), MpanState>,
}

impl MpanTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, peer: NodeId, group: GroupId) -> Option<&MpanState> {
        self.entries.get(&(peer, group))
    }

    /// Install the sender's inner state, replacing whatever was there.
    pub fn store(&mut self, peer: NodeId, group: GroupId, inner: [u8; 16]) {
        tracing::debug!(%peer, %group, "peer MPAN stored");
        self.entries
            .insert((peer, group), MpanState::Established { inner });
    }

    pub fn mark_out_of_sync(&mut self, peer: NodeId, group: GroupId) {
        tracing::debug!(%peer, %group, "peer MPAN out of sync");
        self.entries.insert((peer, group), MpanState::OutOfSync);
    }

    pub fn is_out_of_sync(&self, peer: NodeId, group: GroupId) -> bool {
        matches!(self.get(peer, group), Some(MpanState::OutOfSync))
    }

    /// Drop every out-of-sync entry for a peer. Called when a singlecast
    /// frame from the peer arrives without a group id: the peer has
    /// forgotten the group, so waiting for a redistribution is pointless.
    pub fn reset_out_of_sync(&mut self, peer: NodeId) {
        self.entries
            .retain(|(node, _), state| *node != peer || *state != MpanState::OutOfSync);
    }

    pub fn reset_peer(&mut self, peer: NodeId) {
        self.entries.retain(|(node, _), _| *node != peer);
    }

    /// Derive the next multicast IV for `(peer, group)` and advance the
    /// mirrored state.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::NoMpan`] unless the pair is `Established`.
    pub fn next_iv(
        &mut self,
        peer: NodeId,
        group: GroupId,
        mpan_key: &[u8; 16],
    ) -> Result<[u8; 13], SecurityError> {
        match self.entries.get_mut(&(peer, group)) {
            Some(MpanState::Established { inner }) => {
                let iv = mpan_iv(mpan_key, inner);
                advance_inner(inner);
                Ok(iv)
            }
            _ => Err(SecurityError::NoMpan { node: peer, group }),
        }
    }
}

/// A multicast group this node sends to.
#[derive(Debug)]
#[must_use]
pub struct MulticastGroup {
    pub group: GroupId,
    pub class: SecurityClass,
    pub nodes: Vec<NodeId>,
    inner: [u8; 16],
    sequence: u8,
}

impl MulticastGroup {
    /// Create a group with a fresh random inner state and sequence seed.
    pub fn new(group: GroupId, class: SecurityClass, nodes: Vec<NodeId>) -> Self {
        Self {
            group,
            class,
            nodes,
            inner: random_bytes(),
            sequence: random_bytes::<1>()[0],
        }
    }

    pub fn next_sequence(&mut self) -> u8 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    /// Derive the next multicast IV and advance the inner state.
    pub fn next_iv(&mut self, mpan_key: &[u8; 16]) -> [u8; 13] {
        let iv = mpan_iv(mpan_key, &self.inner);
        advance_inner(&mut self.inner);
        iv
    }

    /// The current inner state, as distributed to group members via an
    /// encrypted singlecast extension.
    #[must_use]
    pub fn inner_state(&self) -> [u8; 16] {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PEER: NodeId = NodeId::new(4);
    const GROUP: GroupId = GroupId::new(1);
    const KEY: [u8; 16] = [0x77; 16];

    #[test]
    fn next_iv_requires_established() {
        let mut table = MpanTable::new();
        assert!(matches!(
            table.next_iv(PEER, GROUP, &KEY),
            Err(SecurityError::NoMpan { .. })
        ));

        table.mark_out_of_sync(PEER, GROUP);
        assert!(matches!(
            table.next_iv(PEER, GROUP, &KEY),
            Err(SecurityError::NoMpan { .. })
        ));
    }

    #[test]
    fn next_iv_advances() {
        let mut table = MpanTable::new();
        table.store(PEER, GROUP, [0u8; 16]);
        let first = table.next_iv(PEER, GROUP, &KEY).unwrap();
        let second = table.next_iv(PEER, GROUP, &KEY).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn sender_and_receiver_stay_in_lockstep() {
        let mut group = MulticastGroup::new(GROUP, SecurityClass::S2Authenticated, vec![PEER]);
        let mut table = MpanTable::new();
        table.store(PEER, GROUP, group.inner_state());

        for _ in 0..5 {
            let sender_iv = group.next_iv(&KEY);
            let receiver_iv = table.next_iv(PEER, GROUP, &KEY).unwrap();
            assert_eq!(sender_iv, receiver_iv);
        }
    }

    #[test]
    fn reset_out_of_sync_keeps_established_entries() {
        let mut table = MpanTable::new();
        let other_group = GroupId::new(2);
        table.store(PEER, GROUP, [1u8; 16]);
        table.mark_out_of_sync(PEER, other_group);
        table.mark_out_of_sync(NodeId::new(9), GROUP);

        table.reset_out_of_sync(PEER);

        assert!(matches!(
            table.get(PEER, GROUP),
            Some(MpanState::Established { .. })
        ));
        assert!(table.get(PEER, other_group).is_none());
        // Other peers are untouched.
        assert!(table.is_out_of_sync(NodeId::new(9), GROUP));
    }

    #[test]
    fn inner_state_wraps_on_overflow() {
        let mut table = MpanTable::new();
        table.store(PEER, GROUP, [0xFF; 16]);
        table.next_iv(PEER, GROUP, &KEY).unwrap();
        match table.get(PEER, GROUP) {
            Some(MpanState::Established { inner }) => assert_eq!(*inner, [0u8; 16]),
            other => panic!("unexpected state {other:?}"),
        }
    }
}
