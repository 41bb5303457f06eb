//! Decryption retry engine.
//!
//! Inbound decryption is a walk over an ordered candidate list, stopping at
//! the first nonce/key pair that authenticates:
//!
//! 1. **Reserved send-nonce** — when both parties transmitted on the same
//!    stream position nearly simultaneously, the peer encrypted with the
//!    nonce we drew for our own last send. That stash is tried first, only
//!    while it is unexpired and the incoming sequence number directly
//!    follows the last accepted one. It is consumed by the attempt either
//!    way.
//! 2. **Current stream** — up to [`MAX_DECRYPT_ATTEMPTS`] successive draws
//!    from the established stream, tolerating frames we never received.
//! 3. **Fresh establishment** — when the frame carries the sender's entropy
//!    and we hold our own half, a fresh stream is derived per candidate key:
//!    the temporary bootstrap key first, then each plausible security class
//!    in descending trust order. The winning class is remembered.
//!
//! Exhaustion is a typed failure; for an established singlecast stream it
//! also tears the synchronization down, because a frame from a peer we
//! believed synchronized proves the stream is unusable.

use zwave_core::{EntropyInput, GroupId, NodeId, SecurityClass};
use zwave_crypto::aes_ccm::aes128_ccm_decrypt;
use zwave_crypto::NonceStream;

use super::frame::{build_aad, EncryptedFrame};
use super::{SecurityContext2, MAX_DECRYPT_ATTEMPTS};
use crate::error::SecurityError;
use crate::span::{SpanKey, SpanState};

/// Whether the reserved send-nonce may be offered as the first candidate.
pub(crate) fn race_nonce_admissible(
    incoming_seq: u8,
    last_accepted: Option<u8>,
    test_harness_mode: bool,
) -> bool {
    !test_harness_mode
        && last_accepted.is_some_and(|last| incoming_seq == last.wrapping_add(1))
}

impl SecurityContext2 {
    pub(crate) fn decrypt_singlecast(
        &mut self,
        peer: NodeId,
        frame: &EncryptedFrame,
    ) -> Result<(Vec<u8>, SpanKey), SecurityError> {
        let aad = build_aad(
            peer,
            self.own_node_id,
            self.home_id,
            frame.serialized_len() as u16,
            frame.sequence_number,
            frame.flags_byte(),
            frame.extension_bytes(),
        );

        let local_ei = match self.spans.state(peer) {
            SpanState::LocalEntropy { receiver_ei } => Some(*receiver_ei),
            _ => None,
        };
        if let (Some(sender_ei), Some(receiver_ei)) = (frame.find_sender_entropy(), local_ei) {
            return self.establish_and_decrypt(peer, frame, &aad, sender_ei, receiver_ei);
        }

        if self.spans.state(peer).is_established() {
            self.decrypt_established(peer, frame, &aad)
        } else {
            // Holding only the peer's entropy half does not permit decoding;
            // the protocol leaves this case undefined, so it is rejected the
            // same way as no synchronization at all.
            Err(SecurityError::NoSpan(peer))
        }
    }

    fn decrypt_established(
        &mut self,
        peer: NodeId,
        frame: &EncryptedFrame,
        aad: &[u8],
    ) -> Result<(Vec<u8>, SpanKey), SecurityError> {
        let key = self
            .spans
            .established_key(peer)
            .ok_or(SecurityError::NoSpan(peer))?;
        let keys = self.keys_for(key)?.clone();
        let race_ok = race_nonce_admissible(
            frame.sequence_number,
            self.sequence.last_accepted(peer),
            self.test_harness_mode,
        );

        let span = self
            .spans
            .established_mut(peer)
            .ok_or(SecurityError::NoSpan(peer))?;

        if race_ok
            && let Some(nonce) = span.take_stashed()
            && let Ok(plaintext) = aes128_ccm_decrypt(
                &keys.ccm_key,
                &nonce,
                &frame.ciphertext,
                aad,
                &frame.auth_tag,
            )
        {
            tracing::debug!(%peer, "decrypted with reserved send-nonce");
            return Ok((plaintext, key));
        }

        for attempt in 0..MAX_DECRYPT_ATTEMPTS {
            let iv = span.next_nonce(false);
            if let Ok(plaintext) =
                aes128_ccm_decrypt(&keys.ccm_key, &iv, &frame.ciphertext, aad, &frame.auth_tag)
            {
                if attempt > 0 {
                    tracing::debug!(%peer, attempt, "decrypted after skipping nonces");
                }
                return Ok((plaintext, key));
            }
        }

        // The peer was believed synchronized and no admissible nonce fits;
        // the stream is unusable from here on.
        self.spans.reset(peer);
        tracing::warn!(%peer, "singlecast frame undecryptable, synchronization torn down");
        Err(SecurityError::CannotDecode(peer))
    }

    fn establish_and_decrypt(
        &mut self,
        peer: NodeId,
        frame: &EncryptedFrame,
        aad: &[u8],
        sender_ei: EntropyInput,
        receiver_ei: EntropyInput,
    ) -> Result<(Vec<u8>, SpanKey), SecurityError> {
        let mut candidates: Vec<SpanKey> = Vec::new();
        if self.keyring.temp().is_some() {
            candidates.push(SpanKey::Temporary);
        }
        match self.granted_class(peer) {
            Some(class) => {
                if self.keyring.has_class(class) {
                    candidates.push(SpanKey::Class(class));
                }
            }
            None => candidates.extend(
                SecurityClass::S2_DESCENDING
                    .iter()
                    .copied()
                    .filter(|class| self.keyring.has_class(*class))
                    .map(SpanKey::Class),
            ),
        }

        for key in candidates {
            let keys = self.keys_for(key)?.clone();
            let mut stream = NonceStream::derive(
                &sender_ei.to_bytes(),
                &receiver_ei.to_bytes(),
                &keys.personalization,
            );
            let iv = stream.next_nonce();
            if let Ok(plaintext) =
                aes128_ccm_decrypt(&keys.ccm_key, &iv, &frame.ciphertext, aad, &frame.auth_tag)
            {
                self.spans.establish(peer, key, stream);
                if let SpanKey::Class(class) = key {
                    self.grant_class(peer, class);
                }
                return Ok((plaintext, key));
            }
        }

        // Our entropy half stays valid: a retransmission of the peer's
        // establishment frame can still succeed.
        Err(SecurityError::CannotDecode(peer))
    }

    pub(crate) fn decrypt_multicast(
        &mut self,
        peer: NodeId,
        frame: &EncryptedFrame,
        group: GroupId,
    ) -> Result<Vec<u8>, SecurityError> {
        let class = self
            .granted_class(peer)
            .ok_or(SecurityError::NoMpan { node: peer, group })?;
        let keys = self
            .keyring
            .s2(class)
            .ok_or(SecurityError::NoKey(class))?
            .clone();
        let aad = build_aad(
            peer,
            NodeId::BROADCAST,
            self.home_id,
            frame.serialized_len() as u16,
            frame.sequence_number,
            frame.flags_byte(),
            frame.extension_bytes(),
        );

        // Advancing once per attempt tolerates multicast frames we missed.
        for _ in 0..MAX_DECRYPT_ATTEMPTS {
            let iv = self.peer_mpans.next_iv(peer, group, &keys.mpan_key)?;
            if let Ok(plaintext) =
                aes128_ccm_decrypt(&keys.ccm_key, &iv, &frame.ciphertext, &aad, &frame.auth_tag)
            {
                return Ok(plaintext);
            }
        }
        Err(SecurityError::CannotDecodeMulticast { node: peer, group })
    }
}
