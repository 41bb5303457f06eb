//! S0 encapsulation frame codec.
//!
//! Payload layout of a Security Command Encapsulation (either command id):
//!
//! ```text
//! [sender nonce: 8] || [ciphertext: >=1] || [nonce id: 1] || [auth code: 8]
//! ```
//!
//! The ciphertext decrypts (AES-128-OFB, IV = sender nonce || receiver
//! nonce) to a frame-control byte followed by the inner command bytes. The
//! auth code is the truncated CBC-MAC over:
//!
//! ```text
//! [sender nonce: 8] || [receiver nonce: 8] || [command id: 1] ||
//! [sender id: 1] || [receiver id: 1] || [ciphertext length: 1] || [ciphertext]
//! ```

use zwave_core::constants::{
    COMMAND_CLASS_SECURITY, S0_FRAME_CONTROL_COUNTER_MASK, S0_FRAME_CONTROL_SECOND_FRAME,
    S0_FRAME_CONTROL_SEQUENCED, S0_HALF_NONCE_SIZE, S0_MAC_SIZE,
};
use zwave_core::{FrameError, HalfNonce, NodeId, RawCommand, S0Command};

use crate::error::SecurityError;

/// Minimum encapsulation payload: nonce + one ciphertext byte + nonce id +
/// auth code.
pub const MIN_PAYLOAD: usize = S0_HALF_NONCE_SIZE + 1 + 1 + S0_MAC_SIZE;

/// The frame-control byte prefixed to every encrypted payload: two-frame
/// splitting flags plus a 4-bit session counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameControl {
    pub sequenced: bool,
    pub second_frame: bool,
    pub counter: u8,
}

impl FrameControl {
    pub const SOLO: FrameControl = FrameControl {
        sequenced: false,
        second_frame: false,
        counter: 0,
    };

    pub fn from_byte(byte: u8) -> Self {
        Self {
            sequenced: byte & S0_FRAME_CONTROL_SEQUENCED != 0,
            second_frame: byte & S0_FRAME_CONTROL_SECOND_FRAME != 0,
            counter: byte & S0_FRAME_CONTROL_COUNTER_MASK,
        }
    }

    pub fn to_byte(self) -> u8 {
        let mut byte = self.counter & S0_FRAME_CONTROL_COUNTER_MASK;
        if self.sequenced {
            byte |= S0_FRAME_CONTROL_SEQUENCED;
        }
        if self.second_frame {
            byte |= S0_FRAME_CONTROL_SECOND_FRAME;
        }
        byte
    }
}

/// A parsed S0 encapsulation frame.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use]
pub struct SecurityFrame {
    pub command: S0Command,
    pub sender_nonce: HalfNonce,
    pub ciphertext: Vec<u8>,
    pub nonce_id: u8,
    pub auth_code: [u8; S0_MAC_SIZE],
}

impl SecurityFrame {
    /// Parse an encapsulation frame from a command.
    ///
    /// Accepts both the plain encapsulation command id and the variant that
    /// doubles as a nonce request.
    pub fn parse(cmd: &RawCommand) -> Result<Self, SecurityError> {
        if cmd.cc != COMMAND_CLASS_SECURITY {
            return Err(SecurityError::Frame(FrameError::InvalidCommandClass(cmd.cc)));
        }
        let command = S0Command::from_u8(cmd.command)?;
        if !matches!(
            command,
            S0Command::CommandEncapsulation | S0Command::CommandEncapsulationNonceGet
        ) {
            return Err(SecurityError::Frame(FrameError::InvalidCommand {
                cc: cmd.cc,
                command: cmd.command,
            }));
        }

        let payload = &cmd.payload;
        if payload.len() < MIN_PAYLOAD {
            return Err(SecurityError::Frame(FrameError::TooShort {
                min: MIN_PAYLOAD,
                actual: payload.len(),
            }));
        }

        let sender_nonce = HalfNonce::try_from(&payload[..S0_HALF_NONCE_SIZE])
            .expect("slice is exactly 8 bytes");
        let mac_start = payload.len() - S0_MAC_SIZE;
        let nonce_id = payload[mac_start - 1];
        let ciphertext = payload[S0_HALF_NONCE_SIZE..mac_start - 1].to_vec();
        let auth_code: [u8; S0_MAC_SIZE] = payload[mac_start..]
            .try_into()
            .expect("slice is exactly 8 bytes");

        Ok(Self {
            command,
            sender_nonce,
            ciphertext,
            nonce_id,
            auth_code,
        })
    }

    /// Serialize back into a command.
    pub fn to_command(&self) -> RawCommand {
        let mut payload =
            Vec::with_capacity(S0_HALF_NONCE_SIZE + self.ciphertext.len() + 1 + S0_MAC_SIZE);
        payload.extend_from_slice(self.sender_nonce.as_ref());
        payload.extend_from_slice(&self.ciphertext);
        payload.push(self.nonce_id);
        payload.extend_from_slice(&self.auth_code);
        RawCommand::new(COMMAND_CLASS_SECURITY, self.command as u8, payload)
    }
}

/// Build the MAC input for an S0 frame.
pub fn build_auth_data(
    sender_nonce: &HalfNonce,
    receiver_nonce: &HalfNonce,
    command: S0Command,
    sender: NodeId,
    receiver: NodeId,
    ciphertext: &[u8],
) -> Vec<u8> {
    let mut data = Vec::with_capacity(2 * S0_HALF_NONCE_SIZE + 4 + ciphertext.len());
    data.extend_from_slice(sender_nonce.as_ref());
    data.extend_from_slice(receiver_nonce.as_ref());
    data.push(command as u8);
    data.push(sender.value());
    data.push(receiver.value());
    data.push(ciphertext.len() as u8);
    data.extend_from_slice(ciphertext);
    data
}

/// Assemble the 16-byte OFB IV from the two half-nonces.
pub fn build_iv(sender_nonce: &HalfNonce, receiver_nonce: &HalfNonce) -> [u8; 16] {
    let mut iv = [0u8; 16];
    iv[..S0_HALF_NONCE_SIZE].copy_from_slice(sender_nonce.as_ref());
    iv[S0_HALF_NONCE_SIZE..].copy_from_slice(receiver_nonce.as_ref());
    iv
}

#[cfg(test)]
mod tests {
    use super::*;

    // -----------------------------------------------------------------------
    // FrameControl
    // -----------------------------------------------------------------------

    #[test]
    fn frame_control_roundtrip_all_combinations() {
        for sequenced in [false, true] {
            for second_frame in [false, true] {
                for counter in 0..=0x0F {
                    let fc = FrameControl {
                        sequenced,
                        second_frame,
                        counter,
                    };
                    assert_eq!(FrameControl::from_byte(fc.to_byte()), fc);
                }
            }
        }
    }

    #[test]
    fn frame_control_ignores_reserved_bits() {
        let fc = FrameControl::from_byte(0xC3);
        assert_eq!(
            fc,
            FrameControl {
                sequenced: false,
                second_frame: false,
                counter: 3,
            }
        );
    }

    // -----------------------------------------------------------------------
    // SecurityFrame codec
    // -----------------------------------------------------------------------

    fn sample_frame() -> SecurityFrame {
        SecurityFrame {
            command: S0Command::CommandEncapsulation,
            sender_nonce: HalfNonce::new([1, 2, 3, 4, 5, 6, 7, 8]),
            ciphertext: vec![0xDE, 0xAD, 0xBE],
            nonce_id: 0x42,
            auth_code: [0xA0; 8],
        }
    }

    #[test]
    fn frame_roundtrip() {
        let frame = sample_frame();
        let parsed = SecurityFrame::parse(&frame.to_command()).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn frame_roundtrip_nonce_get_variant() {
        let mut frame = sample_frame();
        frame.command = S0Command::CommandEncapsulationNonceGet;
        let parsed = SecurityFrame::parse(&frame.to_command()).unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn frame_rejects_wrong_command_class() {
        let mut cmd = sample_frame().to_command();
        cmd.cc = 0x20;
        assert!(SecurityFrame::parse(&cmd).is_err());
    }

    #[test]
    fn frame_rejects_non_encapsulation_command() {
        let mut cmd = sample_frame().to_command();
        cmd.command = S0Command::NonceReport as u8;
        assert!(SecurityFrame::parse(&cmd).is_err());
    }

    #[test]
    fn frame_rejects_short_payload() {
        let cmd = RawCommand::new(
            COMMAND_CLASS_SECURITY,
            S0Command::CommandEncapsulation as u8,
            vec![0u8; MIN_PAYLOAD - 1],
        );
        assert!(matches!(
            SecurityFrame::parse(&cmd),
            Err(SecurityError::Frame(FrameError::TooShort { .. }))
        ));
    }

    #[test]
    fn auth_data_layout() {
        let sender = HalfNonce::new([0x11; 8]);
        let receiver = HalfNonce::new([0x22; 8]);
        let data = build_auth_data(
            &sender,
            &receiver,
            S0Command::CommandEncapsulation,
            NodeId::new(1),
            NodeId::new(2),
            &[0xAA, 0xBB],
        );
        assert_eq!(&data[..8], &[0x11; 8]);
        assert_eq!(&data[8..16], &[0x22; 8]);
        assert_eq!(data[16], S0Command::CommandEncapsulation as u8);
        assert_eq!(data[17], 1);
        assert_eq!(data[18], 2);
        assert_eq!(data[19], 2); // ciphertext length
        assert_eq!(&data[20..], &[0xAA, 0xBB]);
    }

    #[test]
    fn iv_is_sender_then_receiver() {
        let iv = build_iv(&HalfNonce::new([0x11; 8]), &HalfNonce::new([0x22; 8]));
        assert_eq!(&iv[..8], &[0x11; 8]);
        assert_eq!(&iv[8..], &[0x22; 8]);
    }
}
