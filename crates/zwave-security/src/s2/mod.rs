//! Current-generation (S2) secure transport.
//!
//! [`SecurityContext2`] owns every piece of per-peer synchronization state:
//! the SPAN table, the mirrored multicast states, the anti-replay ledger,
//! our own outbound sequence counters, and the key ring. Encapsulation and
//! decapsulation are synchronous transforms over that state; callers
//! serialize access per peer.
//!
//! Multicast frames are always transmitted as link-layer broadcasts — field
//! devices have been observed to mishandle true multicast frames as the
//! singlecast follow-up — so reception classifies a frame as multicast by
//! the broadcast frame type plus a group extension.

pub mod commands;
pub mod decrypt;
pub mod extension;
pub mod frame;

use std::collections::HashMap;

use zwave_core::{
    frame as core_frame, EntropyInput, GroupId, HomeId, NodeId, RawCommand, SecurityClass,
};
use zwave_crypto::aes_ccm::aes128_ccm_encrypt;
use zwave_crypto::entropy::{generate_entropy_input, random_bytes};
use zwave_crypto::{NonceStream, S2Keys};

use crate::error::SecurityError;
use crate::keys::Keyring;
use crate::mpan::{MpanTable, MulticastGroup};
use crate::sequence::SequenceLedger;
use crate::span::{SpanKey, SpanState, SpanTable};
use self::extension::Extension;
use self::frame::{build_aad, EncryptedFrame};

/// Bound on nonces tried per decryption before giving up.
pub const MAX_DECRYPT_ATTEMPTS: usize = 5;

/// Where an outbound frame is headed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Destination {
    Singlecast(NodeId),
    Multicast(GroupId),
}

/// How an inbound frame arrived at the link layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFrameType {
    Singlecast,
    Broadcast,
}

/// Caller-selected knobs for one encapsulation.
#[derive(Debug, Clone, Default)]
pub struct EncapsulationOptions {
    /// Encrypt under this class instead of the peer's granted class.
    pub security_class: Option<SecurityClass>,
    /// Encrypt under the temporary bootstrap key.
    pub use_temp_key: bool,
    /// Signal that we lost multicast synchronization with the peer.
    pub multicast_out_of_sync: bool,
    /// Distribute this group's multicast state inside the ciphertext.
    pub include_mpan: Option<GroupId>,
}

/// A successfully decapsulated frame.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct DecapsulatedFrame {
    pub command: RawCommand,
    /// The multicast group the frame addressed, if any.
    pub group: Option<GroupId>,
    /// The security class that decrypted the frame; `None` for the
    /// temporary bootstrap key.
    pub security_class: Option<SecurityClass>,
    /// The peer asked for its multicast state to be redistributed.
    pub peer_requested_mpan_sync: bool,
}

/// The S2 security engine for one node.
pub struct SecurityContext2 {
    own_node_id: NodeId,
    home_id: HomeId,
    keyring: Keyring,
    spans: SpanTable,
    peer_mpans: MpanTable,
    own_groups: HashMap<GroupId, MulticastGroup>,
    sequence: SequenceLedger,
    own_sequence: HashMap<NodeId, u8>,
    granted: HashMap<NodeId, SecurityClass>,
    /// Conformance-test harnesses must not use the race-tolerance nonce.
    test_harness_mode: bool,
}

impl SecurityContext2 {
    pub fn new(own_node_id: NodeId, home_id: HomeId) -> Self {
        Self {
            own_node_id,
            home_id,
            keyring: Keyring::new(),
            spans: SpanTable::new(),
            peer_mpans: MpanTable::new(),
            own_groups: HashMap::new(),
            sequence: SequenceLedger::new(),
            own_sequence: HashMap::new(),
            granted: HashMap::new(),
            test_harness_mode: false,
        }
    }

    pub fn own_node_id(&self) -> NodeId {
        self.own_node_id
    }

    pub fn keyring(&self) -> &Keyring {
        &self.keyring
    }

    pub fn keyring_mut(&mut self) -> &mut Keyring {
        &mut self.keyring
    }

    pub fn set_test_harness_mode(&mut self, enabled: bool) {
        self.test_harness_mode = enabled;
    }

    // -----------------------------------------------------------------------
    // State administration
    // -----------------------------------------------------------------------

    pub fn span_state(&self, peer: NodeId) -> &SpanState {
        self.spans.state(peer)
    }

    pub fn peer_mpans(&self) -> &MpanTable {
        &self.peer_mpans
    }

    /// The class a peer is known to hold, if any.
    pub fn granted_class(&self, peer: NodeId) -> Option<SecurityClass> {
        self.granted.get(&peer).copied()
    }

    /// Record the class a peer was granted (or proved it holds).
    pub fn grant_class(&mut self, peer: NodeId, class: SecurityClass) {
        if self.granted.insert(peer, class) != Some(class) {
            tracing::info!(%peer, %class, "peer security class recorded");
        }
    }

    pub(crate) fn keys_for(&self, key: SpanKey) -> Result<&S2Keys, SecurityError> {
        match key {
            SpanKey::Class(class) => self
                .keyring
                .s2(class)
                .ok_or(SecurityError::NoKey(class)),
            SpanKey::Temporary => self.keyring.temp().ok_or(SecurityError::NoTempKey),
        }
    }

    /// Record the peer's entropy half (received in a nonce report).
    pub fn store_remote_entropy(&mut self, peer: NodeId, receiver_ei: EntropyInput) {
        self.spans.store_remote_entropy(peer, receiver_ei);
    }

    /// Generate our entropy half for a nonce report to `peer`.
    pub fn generate_nonce_report_entropy(&mut self, peer: NodeId) -> EntropyInput {
        self.spans.generate_local_entropy(peer)
    }

    /// Drop all synchronization state for a peer (node removed or reset).
    pub fn reset_peer(&mut self, peer: NodeId) {
        tracing::info!(%peer, "resetting peer security state");
        self.spans.reset(peer);
        self.sequence.reset(peer);
        self.peer_mpans.reset_peer(peer);
        self.own_sequence.remove(&peer);
        self.granted.remove(&peer);
    }

    /// Revoke one granted class from a peer. Synchronization derived from
    /// that class is torn down.
    pub fn revoke_security_class(&mut self, peer: NodeId, class: SecurityClass) {
        if self.granted.get(&peer) == Some(&class) {
            tracing::info!(%peer, %class, "revoking peer security class");
            self.granted.remove(&peer);
            self.spans.reset(peer);
            self.sequence.reset(peer);
            self.peer_mpans.reset_peer(peer);
        }
    }

    /// Register a multicast group this node sends to.
    pub fn create_group(&mut self, group: GroupId, class: SecurityClass, nodes: Vec<NodeId>) {
        self.own_groups
            .insert(group, MulticastGroup::new(group, class, nodes));
    }

    pub fn group(&self, group: GroupId) -> Option<&MulticastGroup> {
        self.own_groups.get(&group)
    }

    fn next_own_sequence(&mut self, peer: NodeId) -> u8 {
        let entry = self
            .own_sequence
            .entry(peer)
            .or_insert_with(|| random_bytes::<1>()[0]);
        *entry = entry.wrapping_add(1);
        *entry
    }

    // -----------------------------------------------------------------------
    // Encapsulation
    // -----------------------------------------------------------------------

    /// Encrypt a command for one peer or a multicast group.
    ///
    /// A class override or temp-key request in `options` takes effect when
    /// a stream is (re-)established by this call; an already established
    /// stream keeps the key it was derived from.
    ///
    /// # Errors
    ///
    /// [`SecurityError::NoSpan`] when no synchronization with a singlecast
    /// peer exists (the caller should run the nonce handshake and retry);
    /// [`SecurityError::NoMpan`] for an unregistered group.
    pub fn encapsulate(
        &mut self,
        destination: Destination,
        inner: &RawCommand,
        options: &EncapsulationOptions,
    ) -> Result<EncryptedFrame, SecurityError> {
        match destination {
            Destination::Singlecast(peer) => self.encapsulate_singlecast(peer, inner, options),
            Destination::Multicast(group) => self.encapsulate_multicast(group, inner),
        }
    }

    fn resolve_send_key(
        &self,
        peer: NodeId,
        options: &EncapsulationOptions,
    ) -> Result<SpanKey, SecurityError> {
        if options.use_temp_key {
            self.keyring
                .temp()
                .map(|_| SpanKey::Temporary)
                .ok_or(SecurityError::NoTempKey)
        } else {
            let class = options
                .security_class
                .or_else(|| self.granted_class(peer))
                .ok_or(SecurityError::NoSpan(peer))?;
            if !class.is_s2() || !self.keyring.has_class(class) {
                return Err(SecurityError::NoKey(class));
            }
            Ok(SpanKey::Class(class))
        }
    }

    fn encapsulate_singlecast(
        &mut self,
        peer: NodeId,
        inner: &RawCommand,
        options: &EncapsulationOptions,
    ) -> Result<EncryptedFrame, SecurityError> {
        tracing::trace!(%peer, "encapsulating S2 singlecast");
        let mut extensions: Vec<Extension> = Vec::new();

        // Establish a stream in-band when we hold the peer's entropy: the
        // frame carries our freshly generated half so the peer can derive
        // the same stream without another nonce round trip.
        let remote_ei = match self.spans.state(peer) {
            SpanState::Established(_) => None,
            SpanState::RemoteEntropy { receiver_ei } => Some(*receiver_ei),
            SpanState::None | SpanState::LocalEntropy { .. } => {
                return Err(SecurityError::NoSpan(peer));
            }
        };
        if let Some(receiver_ei) = remote_ei {
            let key = self.resolve_send_key(peer, options)?;
            let personalization = self.keys_for(key)?.personalization;
            let sender_ei = EntropyInput::new(generate_entropy_input());
            let stream = NonceStream::derive(
                &sender_ei.to_bytes(),
                &receiver_ei.to_bytes(),
                &personalization,
            );
            self.spans.establish(peer, key, stream);
            extensions.push(Extension::Span { sender_ei });
        }

        if options.multicast_out_of_sync {
            extensions.push(Extension::Mos);
        }

        let mut encrypted_extensions: Vec<Extension> = Vec::new();
        if let Some(group) = options.include_mpan {
            let state = self
                .own_groups
                .get(&group)
                .ok_or(SecurityError::NoMpan { node: peer, group })?
                .inner_state();
            encrypted_extensions.push(Extension::Mpan { group, inner: state });
        }

        let key = self
            .spans
            .established_key(peer)
            .ok_or(SecurityError::NoSpan(peer))?;
        let keys = self.keys_for(key)?.clone();
        let seq = self.next_own_sequence(peer);
        let iv = self.spans.next_nonce(peer, true)?;

        let frame = encrypt_frame(
            self.own_node_id,
            peer,
            self.home_id,
            &keys,
            &iv,
            seq,
            extensions,
            encrypted_extensions,
            inner,
        )?;
        Ok(frame)
    }

    fn encapsulate_multicast(
        &mut self,
        group: GroupId,
        inner: &RawCommand,
    ) -> Result<EncryptedFrame, SecurityError> {
        tracing::trace!(%group, "encapsulating S2 multicast");
        let own_group = self
            .own_groups
            .get_mut(&group)
            .ok_or(SecurityError::NoMpan {
                node: NodeId::BROADCAST,
                group,
            })?;
        let class = own_group.class;
        let keys = self
            .keyring
            .s2(class)
            .ok_or(SecurityError::NoKey(class))?
            .clone();
        let seq = own_group.next_sequence();
        let iv = own_group.next_iv(&keys.mpan_key);

        encrypt_frame(
            self.own_node_id,
            NodeId::BROADCAST,
            self.home_id,
            &keys,
            &iv,
            seq,
            vec![Extension::MulticastGroup { group }],
            Vec::new(),
            inner,
        )
    }

    // -----------------------------------------------------------------------
    // Decapsulation
    // -----------------------------------------------------------------------

    /// Decrypt and validate one inbound frame from `peer`.
    ///
    /// The link-layer frame type decides the decode context: a broadcast
    /// frame with a group extension is multicast, everything else is
    /// singlecast. State is updated even on failure paths — a multicast
    /// decryption failure parks the pair out-of-sync, and a singlecast
    /// frame without a group id clears the peer's out-of-sync entries.
    pub fn decapsulate(
        &mut self,
        peer: NodeId,
        frame: &EncryptedFrame,
        frame_type: TransportFrameType,
    ) -> Result<DecapsulatedFrame, SecurityError> {
        match frame_type {
            TransportFrameType::Broadcast => {
                let group = frame
                    .find_group()
                    .ok_or(SecurityError::MissingExtension("multicast group"))?;
                self.decapsulate_multicast(peer, frame, group)
            }
            TransportFrameType::Singlecast => self.decapsulate_singlecast(peer, frame),
        }
    }

    fn decapsulate_singlecast(
        &mut self,
        peer: NodeId,
        frame: &EncryptedFrame,
    ) -> Result<DecapsulatedFrame, SecurityError> {
        let seq = frame.sequence_number;
        if self.sequence.is_duplicate(peer, seq) {
            tracing::trace!(%peer, seq, "dropping duplicate singlecast frame");
            return Err(SecurityError::DuplicateSequence { node: peer, seq });
        }

        let (plaintext, key) = self.decrypt_singlecast(peer, frame)?;
        self.sequence.accept(peer, seq);

        let (command, encrypted_extensions) = split_plaintext(frame, &plaintext)?;

        for ext in &encrypted_extensions {
            if let Extension::Mpan { group, inner } = ext {
                self.peer_mpans.store(peer, *group, *inner);
            }
        }

        let group = frame.find_group();
        if group.is_none() {
            // No group id on a singlecast frame: the peer no longer knows
            // the groups we were waiting to resynchronize.
            self.peer_mpans.reset_out_of_sync(peer);
        }

        Ok(DecapsulatedFrame {
            command,
            group,
            security_class: match key {
                SpanKey::Class(class) => Some(class),
                SpanKey::Temporary => None,
            },
            peer_requested_mpan_sync: frame.has_mos(),
        })
    }

    fn decapsulate_multicast(
        &mut self,
        peer: NodeId,
        frame: &EncryptedFrame,
        group: GroupId,
    ) -> Result<DecapsulatedFrame, SecurityError> {
        let result = self.decrypt_multicast(peer, frame, group);
        let plaintext = match result {
            Ok(plaintext) => plaintext,
            Err(err) => {
                // The failure itself is protocol information: remember the
                // desync so the next singlecast exchange can repair it.
                self.peer_mpans.mark_out_of_sync(peer, group);
                tracing::warn!(%peer, %group, %err, "multicast frame undecryptable");
                return Err(SecurityError::CannotDecodeMulticast { node: peer, group });
            }
        };

        let (command, _) = split_plaintext(frame, &plaintext)?;
        Ok(DecapsulatedFrame {
            command,
            group: Some(group),
            security_class: self.granted_class(peer),
            peer_requested_mpan_sync: frame.has_mos(),
        })
    }
}

impl std::fmt::Debug for SecurityContext2 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityContext2")
            .field("own_node_id", &self.own_node_id)
            .field("home_id", &self.home_id)
            .finish_non_exhaustive()
    }
}

/// Encrypt the encrypted-extension run plus the inner command and assemble
/// the frame.
#[allow(clippy::too_many_arguments)]
fn encrypt_frame(
    sender: NodeId,
    destination: NodeId,
    home_id: HomeId,
    keys: &S2Keys,
    iv: &[u8; 13],
    seq: u8,
    extensions: Vec<Extension>,
    encrypted_extensions: Vec<Extension>,
    inner: &RawCommand,
) -> Result<EncryptedFrame, SecurityError> {
    let mut plaintext = Vec::new();
    if !encrypted_extensions.is_empty() {
        extension::serialize_chain(&encrypted_extensions, &mut plaintext);
    }
    plaintext.extend_from_slice(&inner.serialize());

    // The tag is not computed yet, but the frame length is already fixed by
    // the parts; build a skeleton to get the authenticated length and the
    // canonical extension bytes.
    let skeleton = EncryptedFrame::new(
        seq,
        extensions,
        !encrypted_extensions.is_empty(),
        vec![0; plaintext.len()],
        [0; 8],
    );
    let aad = build_aad(
        sender,
        destination,
        home_id,
        skeleton.serialized_len() as u16,
        seq,
        skeleton.flags_byte(),
        skeleton.extension_bytes(),
    );

    let (ciphertext, auth_tag) = aes128_ccm_encrypt(&keys.ccm_key, iv, &plaintext, &aad)?;
    Ok(EncryptedFrame {
        ciphertext,
        auth_tag,
        ..skeleton
    })
}

/// Split decrypted plaintext into the encrypted-extension run and the inner
/// command.
fn split_plaintext(
    frame: &EncryptedFrame,
    plaintext: &[u8],
) -> Result<(RawCommand, Vec<Extension>), SecurityError> {
    let (encrypted_extensions, consumed) = if frame.has_encrypted_extensions {
        extension::parse_chain(plaintext)?
    } else {
        (Vec::new(), 0)
    };
    let command = RawCommand::parse(&plaintext[consumed..])?;
    core_frame::validate(&command)?;
    Ok((command, encrypted_extensions))
}
