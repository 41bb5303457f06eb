//! Legacy (S0) secure transport.
//!
//! S0 has no synchronized nonce streams: every encrypted frame consumes one
//! single-use 8-byte receiver nonce obtained through an explicit nonce
//! handshake. [`SecurityContext0`] owns both nonce directions — the nonces
//! we have issued to peers (consumed when their encrypted frame arrives)
//! and the nonces peers have reported to us (consumed when we encrypt).
//!
//! Commands too large for one frame are split across two frames sharing a
//! 4-bit session counter; the receiver buffers the first fragment until the
//! closing frame arrives.

pub mod commands;
pub mod frame;

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use zwave_core::constants::S0_MAX_INNER_PER_FRAME;
use zwave_core::{frame as core_frame, FrameError, HalfNonce, NodeId, RawCommand, S0Command};
use zwave_crypto::aes_ofb::{aes128_ofb_decrypt, aes128_ofb_encrypt};
use zwave_crypto::cbc_mac::{compute_mac, verify_mac};
use zwave_crypto::entropy::generate_half_nonce;
use zwave_crypto::kdf::derive_s0_keys;
use zwave_crypto::{NetworkKey, S0Keys};

use crate::error::SecurityError;
use self::frame::{build_auth_data, build_iv, FrameControl, SecurityFrame};

/// How long an issued nonce stays redeemable.
pub const S0_NONCE_TTL: Duration = Duration::from_secs(20);
/// Upper bound on concurrently live issued nonces.
const MAX_ISSUED_NONCES: usize = 10;
/// How many reported peer nonces we queue for sending (a split pair needs
/// two).
const MAX_STORED_PEER_NONCES: usize = 2;

#[derive(Debug, Clone, Copy)]
struct IssuedNonce {
    nonce: HalfNonce,
    peer: NodeId,
    issued: Instant,
}

#[derive(Debug, Clone, Copy)]
struct StoredPeerNonce {
    nonce: HalfNonce,
    received: Instant,
}

/// Outcome of decapsulating one physical S0 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub enum S0Decapsulated {
    /// The frame (or a completed two-frame session) carried this command.
    Complete(RawCommand),
    /// First fragment of a split command; buffered until its closing frame.
    Partial,
}

/// The S0 security engine for one node.
pub struct SecurityContext0 {
    own_node_id: NodeId,
    keys: S0Keys,
    issued: HashMap<u8, IssuedNonce>,
    peer_nonces: HashMap<NodeId, VecDeque<StoredPeerNonce>>,
    partials: HashMap<(NodeId, u8), Vec<u8>>,
    split_counter: u8,
}

impl SecurityContext0 {
    pub fn new(own_node_id: NodeId, network_key: &NetworkKey) -> Self {
        Self {
            own_node_id,
            keys: derive_s0_keys(network_key),
            issued: HashMap::new(),
            peer_nonces: HashMap::new(),
            partials: HashMap::new(),
            split_counter: 0,
        }
    }

    // -----------------------------------------------------------------------
    // Nonce bookkeeping
    // -----------------------------------------------------------------------

    /// Issue a fresh single-use nonce for `peer`, to be sent in a nonce
    /// report. The first byte is the id the peer echoes back.
    pub fn generate_nonce(&mut self, peer: NodeId) -> HalfNonce {
        self.evict_expired_nonces();
        if self.issued.len() >= MAX_ISSUED_NONCES {
            // Drop the oldest live nonce to stay bounded.
            if let Some(oldest) = self
                .issued
                .values()
                .min_by_key(|entry| entry.issued)
                .map(|entry| entry.nonce.id())
            {
                self.issued.remove(&oldest);
            }
        }

        let nonce = loop {
            let candidate = HalfNonce::new(generate_half_nonce());
            if !self.issued.contains_key(&candidate.id()) {
                break candidate;
            }
        };
        self.issued.insert(
            nonce.id(),
            IssuedNonce {
                nonce,
                peer,
                issued: Instant::now(),
            },
        );
        tracing::trace!(%peer, nonce_id = nonce.id(), "issued S0 nonce");
        nonce
    }

    /// Record a nonce the peer reported to us, for a later encapsulation.
    pub fn store_peer_nonce(&mut self, peer: NodeId, nonce: HalfNonce) {
        let queue = self.peer_nonces.entry(peer).or_default();
        queue.push_back(StoredPeerNonce {
            nonce,
            received: Instant::now(),
        });
        while queue.len() > MAX_STORED_PEER_NONCES {
            queue.pop_front();
        }
    }

    fn evict_expired_nonces(&mut self) {
        self.issued
            .retain(|_, entry| entry.issued.elapsed() < S0_NONCE_TTL);
    }

    fn take_peer_nonce(&mut self, peer: NodeId) -> Option<HalfNonce> {
        let queue = self.peer_nonces.get_mut(&peer)?;
        while let Some(stored) = queue.pop_front() {
            if stored.received.elapsed() < S0_NONCE_TTL {
                return Some(stored.nonce);
            }
        }
        None
    }

    fn peer_nonce_supply(&self, peer: NodeId) -> usize {
        self.peer_nonces
            .get(&peer)
            .map(|queue| {
                queue
                    .iter()
                    .filter(|stored| stored.received.elapsed() < S0_NONCE_TTL)
                    .count()
            })
            .unwrap_or(0)
    }

    /// Redeem an issued nonce by id. The nonce is consumed even if the
    /// frame it arrived in later fails authentication.
    fn take_issued(&mut self, nonce_id: u8, peer: NodeId) -> Result<HalfNonce, SecurityError> {
        let entry = self
            .issued
            .remove(&nonce_id)
            .ok_or(SecurityError::NoNonce(peer))?;
        if entry.peer != peer || entry.issued.elapsed() >= S0_NONCE_TTL {
            return Err(SecurityError::NoNonce(peer));
        }
        Ok(entry.nonce)
    }

    fn next_split_counter(&mut self) -> u8 {
        self.split_counter = (self.split_counter + 1) & 0x0F;
        self.split_counter
    }

    // -----------------------------------------------------------------------
    // Encapsulation
    // -----------------------------------------------------------------------

    /// Encrypt a command for `peer` using the network key.
    ///
    /// Returns one encapsulation command, or two when the inner command
    /// requires splitting. Each frame consumes one stored peer nonce; the
    /// first frame of a pair uses the command id that doubles as a request
    /// for the next nonce.
    ///
    /// # Errors
    ///
    /// [`SecurityError::NoNonce`] when fewer peer nonces are stored than
    /// frames are needed (no nonce is consumed in that case).
    pub fn encapsulate(
        &mut self,
        peer: NodeId,
        inner: &RawCommand,
    ) -> Result<Vec<RawCommand>, SecurityError> {
        let keys = self.keys.clone();
        self.encapsulate_with(peer, inner, &keys)
    }

    /// Encrypt a command with a caller-supplied network key instead of the
    /// configured one. Used for the key-transfer command during inclusion,
    /// which is encrypted under the all-zero provisioning key.
    pub fn encapsulate_with_key(
        &mut self,
        peer: NodeId,
        inner: &RawCommand,
        network_key: &NetworkKey,
    ) -> Result<Vec<RawCommand>, SecurityError> {
        let keys = derive_s0_keys(network_key);
        self.encapsulate_with(peer, inner, &keys)
    }

    fn encapsulate_with(
        &mut self,
        peer: NodeId,
        inner: &RawCommand,
        keys: &S0Keys,
    ) -> Result<Vec<RawCommand>, SecurityError> {
        let serialized = inner.serialize();
        tracing::trace!(%peer, len = serialized.len(), "encapsulating S0 command");

        if serialized.len() <= S0_MAX_INNER_PER_FRAME {
            if self.peer_nonce_supply(peer) < 1 {
                return Err(SecurityError::NoNonce(peer));
            }
            let frame = self.encrypt_frame(
                peer,
                keys,
                S0Command::CommandEncapsulation,
                FrameControl::SOLO,
                &serialized,
            )?;
            return Ok(vec![frame.to_command()]);
        }

        if serialized.len() > 2 * S0_MAX_INNER_PER_FRAME {
            return Err(SecurityError::Frame(FrameError::PayloadTooLarge {
                max: 2 * S0_MAX_INNER_PER_FRAME,
                actual: serialized.len(),
            }));
        }

        if self.peer_nonce_supply(peer) < 2 {
            return Err(SecurityError::NoNonce(peer));
        }

        let counter = self.next_split_counter();
        let (first, second) = serialized.split_at(S0_MAX_INNER_PER_FRAME);

        let first_frame = self.encrypt_frame(
            peer,
            keys,
            S0Command::CommandEncapsulationNonceGet,
            FrameControl {
                sequenced: true,
                second_frame: false,
                counter,
            },
            first,
        )?;
        let second_frame = self.encrypt_frame(
            peer,
            keys,
            S0Command::CommandEncapsulation,
            FrameControl {
                sequenced: true,
                second_frame: true,
                counter,
            },
            second,
        )?;
        Ok(vec![first_frame.to_command(), second_frame.to_command()])
    }

    fn encrypt_frame(
        &mut self,
        peer: NodeId,
        keys: &S0Keys,
        command: S0Command,
        control: FrameControl,
        inner: &[u8],
    ) -> Result<SecurityFrame, SecurityError> {
        let receiver_nonce = self
            .take_peer_nonce(peer)
            .ok_or(SecurityError::NoNonce(peer))?;
        let sender_nonce = HalfNonce::new(generate_half_nonce());

        let mut plaintext = Vec::with_capacity(1 + inner.len());
        plaintext.push(control.to_byte());
        plaintext.extend_from_slice(inner);

        let iv = build_iv(&sender_nonce, &receiver_nonce);
        let ciphertext = aes128_ofb_encrypt(&keys.enc_key, &iv, &plaintext);

        let auth_data = build_auth_data(
            &sender_nonce,
            &receiver_nonce,
            command,
            self.own_node_id,
            peer,
            &ciphertext,
        );
        let auth_code = compute_mac(&keys.auth_key, &auth_data);

        Ok(SecurityFrame {
            command,
            sender_nonce,
            ciphertext,
            nonce_id: receiver_nonce.id(),
            auth_code,
        })
    }

    // -----------------------------------------------------------------------
    // Decapsulation
    // -----------------------------------------------------------------------

    /// Decrypt one encapsulation frame from `peer` using the network key.
    pub fn decapsulate(
        &mut self,
        peer: NodeId,
        cmd: &RawCommand,
    ) -> Result<S0Decapsulated, SecurityError> {
        let keys = self.keys.clone();
        self.decapsulate_with(peer, cmd, &keys)
    }

    /// Decrypt with a caller-supplied network key (key-transfer frames).
    pub fn decapsulate_with_key(
        &mut self,
        peer: NodeId,
        cmd: &RawCommand,
        network_key: &NetworkKey,
    ) -> Result<S0Decapsulated, SecurityError> {
        let keys = derive_s0_keys(network_key);
        self.decapsulate_with(peer, cmd, &keys)
    }

    fn decapsulate_with(
        &mut self,
        peer: NodeId,
        cmd: &RawCommand,
        keys: &S0Keys,
    ) -> Result<S0Decapsulated, SecurityError> {
        let frame = SecurityFrame::parse(cmd)?;
        if frame.ciphertext.len() > u8::MAX as usize {
            return Err(SecurityError::InvalidPayload(
                "S0 ciphertext exceeds one-byte length field",
            ));
        }

        // The referenced nonce is single-use: consumed here, before the MAC
        // is checked, so a forged frame still burns it.
        let receiver_nonce = self.take_issued(frame.nonce_id, peer)?;

        let auth_data = build_auth_data(
            &frame.sender_nonce,
            &receiver_nonce,
            frame.command,
            peer,
            self.own_node_id,
            &frame.ciphertext,
        );
        if !verify_mac(&keys.auth_key, &auth_data, &frame.auth_code) {
            tracing::warn!(%peer, "S0 frame failed authentication");
            return Err(SecurityError::CannotDecode(peer));
        }

        let iv = build_iv(&frame.sender_nonce, &receiver_nonce);
        let plaintext = aes128_ofb_decrypt(&keys.enc_key, &iv, &frame.ciphertext);
        let control = FrameControl::from_byte(plaintext[0]);
        let inner = &plaintext[1..];

        if !control.sequenced {
            let command = RawCommand::parse(inner)?;
            core_frame::validate(&command)?;
            return Ok(S0Decapsulated::Complete(command));
        }

        if !control.second_frame {
            self.partials.insert((peer, control.counter), inner.to_vec());
            tracing::trace!(%peer, counter = control.counter, "buffered first S0 fragment");
            return Ok(S0Decapsulated::Partial);
        }

        let mut combined = self
            .partials
            .remove(&(peer, control.counter))
            .ok_or(SecurityError::InvalidPayload(
                "closing frame without a buffered first fragment",
            ))?;
        combined.extend_from_slice(inner);
        let command = RawCommand::parse(&combined)?;
        core_frame::validate(&command)?;
        Ok(S0Decapsulated::Complete(command))
    }

    /// Drop all per-peer state: queued nonces, issued nonces, and partial
    /// reassembly sessions.
    pub fn reset_peer(&mut self, peer: NodeId) {
        self.peer_nonces.remove(&peer);
        self.issued.retain(|_, entry| entry.peer != peer);
        self.partials.retain(|(node, _), _| *node != peer);
    }
}

impl std::fmt::Debug for SecurityContext0 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityContext0")
            .field("own_node_id", &self.own_node_id)
            .field("issued", &self.issued.len())
            .finish_non_exhaustive()
    }
}
