//! End-to-end tests for S2 singlecast: in-band stream establishment,
//! replay rejection, the race-tolerance nonce, and security-class fallback.
//!
//! The tests drive two full contexts against each other over serialized
//! wire bytes. Where a test needs to forge traffic (stale nonces), it
//! derives its own oracle copy of the nonce stream from the entropy halves
//! it observed in the handshake.

use zwave_core::{HomeId, NodeId, RawCommand, S2Command, SecurityClass};
use zwave_crypto::aes_ccm::aes128_ccm_encrypt;
use zwave_crypto::kdf::ckdf_network_key_expand;
use zwave_crypto::{NetworkKey, NonceStream};
use zwave_security::s2::frame::{build_aad, EncryptedFrame};
use zwave_security::{
    Destination, EncapsulationOptions, SecurityContext2, SecurityError, SpanState,
    TransportFrameType,
};

const ALICE: NodeId = NodeId::new(1);
const BOB: NodeId = NodeId::new(2);
const HOME: HomeId = HomeId::new(0x1B4D2F90);

const KEY_UNAUTH: [u8; 16] = [0x11; 16];
const KEY_AUTH: [u8; 16] = [0x22; 16];
const KEY_ACCESS: [u8; 16] = [0x33; 16];

fn class_key(class: SecurityClass) -> NetworkKey {
    NetworkKey::new(match class {
        SecurityClass::S2Unauthenticated => KEY_UNAUTH,
        SecurityClass::S2Authenticated => KEY_AUTH,
        SecurityClass::S2AccessControl => KEY_ACCESS,
        SecurityClass::S0Legacy => unreachable!("S0 has no S2 key"),
    })
}

fn context(node: NodeId) -> SecurityContext2 {
    let mut ctx = SecurityContext2::new(node, HOME);
    for class in SecurityClass::S2_DESCENDING {
        ctx.keyring_mut().set_s2_key(class, &class_key(class));
    }
    ctx
}

fn options_for(class: SecurityClass) -> EncapsulationOptions {
    EncapsulationOptions {
        security_class: Some(class),
        ..Default::default()
    }
}

/// Serialize, re-parse, and decapsulate a frame at the receiver.
fn deliver(
    receiver: &mut SecurityContext2,
    sender: NodeId,
    frame: &EncryptedFrame,
) -> Result<zwave_security::DecapsulatedFrame, SecurityError> {
    let wire = frame.to_command().serialize();
    let parsed = EncryptedFrame::parse(&RawCommand::parse(&wire).unwrap()).unwrap();
    receiver.decapsulate(sender, &parsed, TransportFrameType::Singlecast)
}

/// Run the nonce handshake and one establishment frame from `alice` to
/// `bob`. Returns the entropy halves so tests can derive an oracle stream.
fn establish(
    alice: &mut SecurityContext2,
    bob: &mut SecurityContext2,
    class: SecurityClass,
) -> ([u8; 16], [u8; 16], EncryptedFrame) {
    let receiver_ei = bob.generate_nonce_report_entropy(ALICE);
    alice.store_remote_entropy(BOB, receiver_ei);

    let inner = RawCommand::new(0x25, 0x03, vec![0xFF]);
    let frame = alice
        .encapsulate(Destination::Singlecast(BOB), &inner, &options_for(class))
        .unwrap();
    let sender_ei = frame
        .find_sender_entropy()
        .expect("establishment frame must carry sender entropy");

    let decoded = deliver(bob, ALICE, &frame).unwrap();
    assert_eq!(decoded.command, inner);

    (sender_ei.to_bytes(), receiver_ei.to_bytes(), frame)
}

// ---------------------------------------------------------------------------
// Establishment and roundtrip
// ---------------------------------------------------------------------------

#[test]
fn establishment_round_trips_and_remembers_class() {
    let mut alice = context(ALICE);
    let mut bob = context(BOB);

    assert!(matches!(alice.span_state(BOB), SpanState::None));
    establish(&mut alice, &mut bob, SecurityClass::S2Authenticated);

    assert!(alice.span_state(BOB).is_established());
    assert!(bob.span_state(ALICE).is_established());
    assert_eq!(
        bob.granted_class(ALICE),
        Some(SecurityClass::S2Authenticated)
    );
}

#[test]
fn follow_up_frames_use_the_established_stream() {
    let mut alice = context(ALICE);
    let mut bob = context(BOB);
    establish(&mut alice, &mut bob, SecurityClass::S2Authenticated);

    for value in [0x00u8, 0x63, 0xFF] {
        let inner = RawCommand::new(0x25, 0x01, vec![value]);
        let frame = alice
            .encapsulate(Destination::Singlecast(BOB), &inner, &Default::default())
            .unwrap();
        // Synchronization exists, so no entropy travels along.
        assert!(frame.find_sender_entropy().is_none());

        let decoded = deliver(&mut bob, ALICE, &frame).unwrap();
        assert_eq!(decoded.command, inner);
    }
}

#[test]
fn both_directions_share_one_stream() {
    let mut alice = context(ALICE);
    let mut bob = context(BOB);
    establish(&mut alice, &mut bob, SecurityClass::S2AccessControl);

    let inner = RawCommand::new(0x25, 0x02, vec![]);
    let frame = bob
        .encapsulate(Destination::Singlecast(ALICE), &inner, &Default::default())
        .unwrap();
    let decoded = deliver(&mut alice, BOB, &frame).unwrap();
    assert_eq!(decoded.command, inner);
}

// ---------------------------------------------------------------------------
// Replay rejection
// ---------------------------------------------------------------------------

#[test]
fn replayed_frame_is_rejected_by_sequence_number() {
    let mut alice = context(ALICE);
    let mut bob = context(BOB);
    establish(&mut alice, &mut bob, SecurityClass::S2Authenticated);

    let inner = RawCommand::new(0x25, 0x01, vec![0x01]);
    let frame = alice
        .encapsulate(Destination::Singlecast(BOB), &inner, &Default::default())
        .unwrap();

    deliver(&mut bob, ALICE, &frame).unwrap();
    // The identical wire frame again: rejected before any decryption.
    assert!(matches!(
        deliver(&mut bob, ALICE, &frame),
        Err(SecurityError::DuplicateSequence { .. })
    ));
}

// ---------------------------------------------------------------------------
// Missing synchronization
// ---------------------------------------------------------------------------

#[test]
fn decode_without_synchronization_fails() {
    let mut alice = context(ALICE);
    let mut bob = context(BOB);
    establish(&mut alice, &mut bob, SecurityClass::S2Authenticated);

    let inner = RawCommand::new(0x25, 0x02, vec![]);
    let frame = alice
        .encapsulate(Destination::Singlecast(BOB), &inner, &Default::default())
        .unwrap();

    // A bystander with the right keys but no synchronization.
    let mut carol = context(NodeId::new(3));
    assert!(matches!(
        deliver(&mut carol, ALICE, &frame),
        Err(SecurityError::NoSpan(_))
    ));
}

#[test]
fn holding_only_peer_entropy_rejects_inbound_frames() {
    let mut alice = context(ALICE);
    let mut bob = context(BOB);
    establish(&mut alice, &mut bob, SecurityClass::S2Authenticated);

    let inner = RawCommand::new(0x25, 0x02, vec![]);
    let frame = alice
        .encapsulate(Destination::Singlecast(BOB), &inner, &Default::default())
        .unwrap();

    // Carol received Alice's entropy half (as if Alice had answered
    // Carol's nonce get) but has contributed none of her own.
    let mut carol = context(NodeId::new(3));
    carol.store_remote_entropy(ALICE, zwave_core::EntropyInput::new([0x99; 16]));
    assert!(matches!(
        deliver(&mut carol, ALICE, &frame),
        Err(SecurityError::NoSpan(_))
    ));
}

#[test]
fn encapsulate_without_synchronization_fails() {
    let mut alice = context(ALICE);
    let inner = RawCommand::new(0x25, 0x02, vec![]);
    assert!(matches!(
        alice.encapsulate(
            Destination::Singlecast(BOB),
            &inner,
            &options_for(SecurityClass::S2Authenticated)
        ),
        Err(SecurityError::NoSpan(_))
    ));
}

// ---------------------------------------------------------------------------
// Security-class fallback
// ---------------------------------------------------------------------------

#[test]
fn receiver_discovers_the_sender_class_by_fallback() {
    for class in SecurityClass::S2_DESCENDING {
        let mut alice = context(ALICE);
        let mut bob = context(BOB);

        assert_eq!(bob.granted_class(ALICE), None);
        let (_, _, frame) = establish(&mut alice, &mut bob, class);
        assert!(frame.find_sender_entropy().is_some());
        assert_eq!(bob.granted_class(ALICE), Some(class), "class {class}");
    }
}

// ---------------------------------------------------------------------------
// Race tolerance
// ---------------------------------------------------------------------------

/// Forge a frame from Alice with an arbitrary nonce, using the oracle
/// stream the test derived from the observed entropy halves.
fn forge_frame(
    nonce: &[u8; 13],
    seq: u8,
    class: SecurityClass,
    inner: &RawCommand,
) -> EncryptedFrame {
    let keys = ckdf_network_key_expand(&class_key(class));
    let plaintext = inner.serialize();
    let skeleton = EncryptedFrame::new(seq, vec![], false, vec![0; plaintext.len()], [0; 8]);
    let aad = build_aad(
        ALICE,
        BOB,
        HOME,
        skeleton.serialized_len() as u16,
        seq,
        skeleton.flags_byte(),
        skeleton.extension_bytes(),
    );
    let (ciphertext, auth_tag) =
        aes128_ccm_encrypt(&keys.ccm_key, nonce, &plaintext, &aad).unwrap();
    EncryptedFrame::new(seq, vec![], false, ciphertext, auth_tag)
}

#[test]
fn simultaneous_transmission_race_is_tolerated_exactly_once() {
    let class = SecurityClass::S2Authenticated;
    let mut alice = context(ALICE);
    let mut bob = context(BOB);
    let (sender_ei, receiver_ei, _) = establish(&mut alice, &mut bob, class);

    // Oracle copy of the shared stream, positioned past the establishment
    // frame's nonce.
    let keys = ckdf_network_key_expand(&class_key(class));
    let mut oracle = NonceStream::derive(&sender_ei, &receiver_ei, &keys.personalization);
    let _nonce0 = oracle.next_nonce();
    let nonce1 = oracle.next_nonce();

    // Alice sends the next frame...
    let inner = RawCommand::new(0x25, 0x01, vec![0x42]);
    let frame2 = alice
        .encapsulate(Destination::Singlecast(BOB), &inner, &Default::default())
        .unwrap();

    // ...while Bob simultaneously transmits on the same stream position,
    // consuming (and stashing) the nonce Alice just used.
    let bob_inner = RawCommand::new(0x25, 0x02, vec![]);
    let _bobs_frame = bob
        .encapsulate(Destination::Singlecast(ALICE), &bob_inner, &Default::default())
        .unwrap();

    // Bob can still decode Alice's frame: the reserved send-nonce matches.
    let decoded = deliver(&mut bob, ALICE, &frame2).unwrap();
    assert_eq!(decoded.command, inner);

    // The stash is gone. Another frame encrypted with the same stale nonce
    // exhausts the candidates and tears the synchronization down.
    let stale = forge_frame(
        &nonce1,
        frame2.sequence_number.wrapping_add(1),
        class,
        &inner,
    );
    assert!(matches!(
        deliver(&mut bob, ALICE, &stale),
        Err(SecurityError::CannotDecode(_))
    ));
    assert!(matches!(bob.span_state(ALICE), SpanState::None));
}

#[test]
fn test_harness_mode_never_uses_the_reserved_nonce() {
    let class = SecurityClass::S2Authenticated;
    let mut alice = context(ALICE);
    let mut bob = context(BOB);
    establish(&mut alice, &mut bob, class);
    bob.set_test_harness_mode(true);

    let inner = RawCommand::new(0x25, 0x01, vec![0x42]);
    let frame2 = alice
        .encapsulate(Destination::Singlecast(BOB), &inner, &Default::default())
        .unwrap();
    let bob_inner = RawCommand::new(0x25, 0x02, vec![]);
    let _bobs_frame = bob
        .encapsulate(Destination::Singlecast(ALICE), &bob_inner, &Default::default())
        .unwrap();

    // Without the race candidate the stream positions never line up again.
    assert!(matches!(
        deliver(&mut bob, ALICE, &frame2),
        Err(SecurityError::CannotDecode(_))
    ));
}

// ---------------------------------------------------------------------------
// Hostile input
// ---------------------------------------------------------------------------

#[test]
fn tampered_frame_tears_down_synchronization() {
    let mut alice = context(ALICE);
    let mut bob = context(BOB);
    establish(&mut alice, &mut bob, SecurityClass::S2Authenticated);

    let inner = RawCommand::new(0x25, 0x01, vec![0x42]);
    let frame = alice
        .encapsulate(Destination::Singlecast(BOB), &inner, &Default::default())
        .unwrap();

    let mut wire = frame.to_command().serialize();
    let ciphertext_pos = wire.len() - 9; // last ciphertext byte, before the tag
    wire[ciphertext_pos] ^= 0x01;
    let parsed = EncryptedFrame::parse(&RawCommand::parse(&wire).unwrap()).unwrap();

    assert!(matches!(
        bob.decapsulate(ALICE, &parsed, TransportFrameType::Singlecast),
        Err(SecurityError::CannotDecode(_))
    ));
    // A peer believed synchronized sent garbage: state is torn down and
    // even the genuine frame now needs a fresh handshake.
    assert!(matches!(bob.span_state(ALICE), SpanState::None));
    assert!(matches!(
        deliver(&mut bob, ALICE, &frame),
        Err(SecurityError::NoSpan(_))
    ));
}

#[test]
fn unknown_critical_extension_is_rejected_outright() {
    // seq, flags (extension present), one critical unknown extension
    // (type 0x1F), empty ciphertext, zero tag.
    let mut payload = vec![0x01, 0x01];
    payload.extend_from_slice(&[0x02, 0x40 | 0x1F]);
    payload.extend_from_slice(&[0u8; 8]);
    let cmd = RawCommand::new(0x9F, S2Command::MessageEncapsulation as u8, payload);

    assert!(matches!(
        EncryptedFrame::parse(&cmd),
        Err(SecurityError::UnsupportedExtension(0x1F))
    ));
}

// ---------------------------------------------------------------------------
// Temporary bootstrap key
// ---------------------------------------------------------------------------

#[test]
fn bootstrap_traffic_uses_the_temporary_key() {
    let temp_key = NetworkKey::new([0x77; 16]);
    let mut alice = SecurityContext2::new(ALICE, HOME);
    let mut bob = SecurityContext2::new(BOB, HOME);
    alice.keyring_mut().set_temp_key(&temp_key);
    bob.keyring_mut().set_temp_key(&temp_key);

    let receiver_ei = bob.generate_nonce_report_entropy(ALICE);
    alice.store_remote_entropy(BOB, receiver_ei);

    let inner = zwave_security::kex::KexGet.to_command();
    let frame = alice
        .encapsulate(
            Destination::Singlecast(BOB),
            &inner,
            &EncapsulationOptions {
                use_temp_key: true,
                ..Default::default()
            },
        )
        .unwrap();

    let decoded = deliver(&mut bob, ALICE, &frame).unwrap();
    assert_eq!(decoded.command, inner);
    // The temporary key is not a security class.
    assert_eq!(decoded.security_class, None);
    assert_eq!(bob.granted_class(ALICE), None);
}
