//! End-to-end tests for S2 multicast: group nonce distribution, desync
//! propagation, and the singlecast repair path.

use zwave_core::{GroupId, HomeId, NodeId, RawCommand, SecurityClass};
use zwave_crypto::NetworkKey;
use zwave_security::mpan::MpanState;
use zwave_security::s2::frame::EncryptedFrame;
use zwave_security::{
    Destination, EncapsulationOptions, SecurityContext2, SecurityError, TransportFrameType,
};

const SENDER: NodeId = NodeId::new(1);
const MEMBER: NodeId = NodeId::new(2);
const GROUP: GroupId = GroupId::new(5);
const HOME: HomeId = HomeId::new(0x1B4D2F90);
const CLASS: SecurityClass = SecurityClass::S2Authenticated;

fn context(node: NodeId) -> SecurityContext2 {
    let mut ctx = SecurityContext2::new(node, HOME);
    ctx.keyring_mut()
        .set_s2_key(CLASS, &NetworkKey::new([0x44; 16]));
    ctx
}

fn deliver(
    receiver: &mut SecurityContext2,
    sender: NodeId,
    frame: &EncryptedFrame,
    frame_type: TransportFrameType,
) -> Result<zwave_security::DecapsulatedFrame, SecurityError> {
    let wire = frame.to_command().serialize();
    let parsed = EncryptedFrame::parse(&RawCommand::parse(&wire).unwrap()).unwrap();
    receiver.decapsulate(sender, &parsed, frame_type)
}

/// Establish singlecast synchronization from `sender` to `member`.
fn establish_singlecast(sender: &mut SecurityContext2, member: &mut SecurityContext2) {
    let receiver_ei = member.generate_nonce_report_entropy(SENDER);
    sender.store_remote_entropy(MEMBER, receiver_ei);

    let inner = RawCommand::new(0x25, 0x02, vec![]);
    let frame = sender
        .encapsulate(
            Destination::Singlecast(MEMBER),
            &inner,
            &EncapsulationOptions {
                security_class: Some(CLASS),
                ..Default::default()
            },
        )
        .unwrap();
    deliver(member, SENDER, &frame, TransportFrameType::Singlecast).unwrap();
}

/// Distribute the sender's group state to `member` inside a singlecast.
fn distribute_mpan(sender: &mut SecurityContext2, member: &mut SecurityContext2) {
    let inner = RawCommand::new(0x25, 0x02, vec![]);
    let frame = sender
        .encapsulate(
            Destination::Singlecast(MEMBER),
            &inner,
            &EncapsulationOptions {
                include_mpan: Some(GROUP),
                ..Default::default()
            },
        )
        .unwrap();
    deliver(member, SENDER, &frame, TransportFrameType::Singlecast).unwrap();
}

fn multicast(sender: &mut SecurityContext2, value: u8) -> EncryptedFrame {
    let inner = RawCommand::new(0x25, 0x01, vec![value]);
    sender
        .encapsulate(Destination::Multicast(GROUP), &inner, &Default::default())
        .unwrap()
}

// ---------------------------------------------------------------------------
// Desync detection
// ---------------------------------------------------------------------------

#[test]
fn multicast_without_established_state_fails_and_marks_out_of_sync() {
    let mut sender = context(SENDER);
    let mut member = context(MEMBER);
    sender.create_group(GROUP, CLASS, vec![MEMBER]);

    let frame = multicast(&mut sender, 0x01);
    assert!(matches!(
        deliver(&mut member, SENDER, &frame, TransportFrameType::Broadcast),
        Err(SecurityError::CannotDecodeMulticast { .. })
    ));
    assert!(member.peer_mpans().is_out_of_sync(SENDER, GROUP));
}

#[test]
fn broadcast_frame_without_group_extension_is_rejected() {
    let mut sender = context(SENDER);
    let mut member = context(MEMBER);
    establish_singlecast(&mut sender, &mut member);

    let inner = RawCommand::new(0x25, 0x02, vec![]);
    let frame = sender
        .encapsulate(Destination::Singlecast(MEMBER), &inner, &Default::default())
        .unwrap();
    assert!(matches!(
        deliver(&mut member, SENDER, &frame, TransportFrameType::Broadcast),
        Err(SecurityError::MissingExtension(_))
    ));
}

// ---------------------------------------------------------------------------
// Distribution and decoding
// ---------------------------------------------------------------------------

#[test]
fn distributed_group_state_decodes_multicast_frames() {
    let mut sender = context(SENDER);
    let mut member = context(MEMBER);
    sender.create_group(GROUP, CLASS, vec![MEMBER]);
    establish_singlecast(&mut sender, &mut member);
    distribute_mpan(&mut sender, &mut member);

    for value in [0x10u8, 0x20, 0x30] {
        let frame = multicast(&mut sender, value);
        let decoded = deliver(&mut member, SENDER, &frame, TransportFrameType::Broadcast).unwrap();
        assert_eq!(decoded.command, RawCommand::new(0x25, 0x01, vec![value]));
        assert_eq!(decoded.group, Some(GROUP));
    }
}

#[test]
fn a_few_missed_multicast_frames_are_tolerated() {
    let mut sender = context(SENDER);
    let mut member = context(MEMBER);
    sender.create_group(GROUP, CLASS, vec![MEMBER]);
    establish_singlecast(&mut sender, &mut member);
    distribute_mpan(&mut sender, &mut member);

    // Frames 1-3 are lost; only the fourth arrives.
    for _ in 0..3 {
        let _lost = multicast(&mut sender, 0x00);
    }
    let frame = multicast(&mut sender, 0x44);
    let decoded = deliver(&mut member, SENDER, &frame, TransportFrameType::Broadcast).unwrap();
    assert_eq!(decoded.command, RawCommand::new(0x25, 0x01, vec![0x44]));
}

#[test]
fn falling_too_far_behind_marks_out_of_sync() {
    let mut sender = context(SENDER);
    let mut member = context(MEMBER);
    sender.create_group(GROUP, CLASS, vec![MEMBER]);
    establish_singlecast(&mut sender, &mut member);
    distribute_mpan(&mut sender, &mut member);

    // More frames are lost than the bounded decrypt attempts can bridge.
    for _ in 0..5 {
        let _lost = multicast(&mut sender, 0x00);
    }
    let frame = multicast(&mut sender, 0x55);
    assert!(matches!(
        deliver(&mut member, SENDER, &frame, TransportFrameType::Broadcast),
        Err(SecurityError::CannotDecodeMulticast { .. })
    ));
    assert!(member.peer_mpans().is_out_of_sync(SENDER, GROUP));
}

// ---------------------------------------------------------------------------
// Repair paths
// ---------------------------------------------------------------------------

#[test]
fn redistribution_repairs_an_out_of_sync_pair() {
    let mut sender = context(SENDER);
    let mut member = context(MEMBER);
    sender.create_group(GROUP, CLASS, vec![MEMBER]);
    establish_singlecast(&mut sender, &mut member);

    // Multicast before any distribution: member parks the pair.
    let frame = multicast(&mut sender, 0x01);
    assert!(deliver(&mut member, SENDER, &frame, TransportFrameType::Broadcast).is_err());
    assert!(member.peer_mpans().is_out_of_sync(SENDER, GROUP));

    // The encrypted state extension replaces the out-of-sync marker.
    distribute_mpan(&mut sender, &mut member);
    assert!(matches!(
        member.peer_mpans().get(SENDER, GROUP),
        Some(MpanState::Established { .. })
    ));

    let frame = multicast(&mut sender, 0x02);
    let decoded = deliver(&mut member, SENDER, &frame, TransportFrameType::Broadcast).unwrap();
    assert_eq!(decoded.command, RawCommand::new(0x25, 0x01, vec![0x02]));
}

#[test]
fn plain_singlecast_clears_out_of_sync_entries() {
    let mut sender = context(SENDER);
    let mut member = context(MEMBER);
    sender.create_group(GROUP, CLASS, vec![MEMBER]);
    establish_singlecast(&mut sender, &mut member);

    let frame = multicast(&mut sender, 0x01);
    assert!(deliver(&mut member, SENDER, &frame, TransportFrameType::Broadcast).is_err());
    assert!(member.peer_mpans().is_out_of_sync(SENDER, GROUP));

    // A singlecast frame without a group id: the peer has forgotten the
    // group, so the pair returns to the unsynchronized state entirely.
    let inner = RawCommand::new(0x25, 0x02, vec![]);
    let plain = sender
        .encapsulate(Destination::Singlecast(MEMBER), &inner, &Default::default())
        .unwrap();
    deliver(&mut member, SENDER, &plain, TransportFrameType::Singlecast).unwrap();

    assert!(member.peer_mpans().get(SENDER, GROUP).is_none());
}

#[test]
fn out_of_sync_signal_travels_in_singlecast() {
    let mut sender = context(SENDER);
    let mut member = context(MEMBER);
    sender.create_group(GROUP, CLASS, vec![MEMBER]);
    establish_singlecast(&mut sender, &mut member);

    // The member answers with a desync signal; the group owner sees the
    // request to redistribute.
    let inner = RawCommand::new(0x25, 0x02, vec![]);
    let frame = member
        .encapsulate(
            Destination::Singlecast(SENDER),
            &inner,
            &EncapsulationOptions {
                multicast_out_of_sync: true,
                ..Default::default()
            },
        )
        .unwrap();
    let decoded = deliver(&mut sender, MEMBER, &frame, TransportFrameType::Singlecast).unwrap();
    assert!(decoded.peer_requested_mpan_sync);
}
