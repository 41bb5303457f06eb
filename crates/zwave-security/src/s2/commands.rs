//! Payload codecs for the ancillary S2 commands.
//!
//! The nonce handshake commands carry the entropy halves that feed the
//! synchronized nonce streams; the commands-supported pair advertises the
//! securely reachable command classes. All of them are stateless shells —
//! the surrounding context owns every state transition.

use zwave_core::constants::{COMMAND_CLASS_SECURITY_2, S2_ENTROPY_INPUT_SIZE};
use zwave_core::{EntropyInput, FrameError, RawCommand, S2Command};

use crate::error::SecurityError;

const FLAG_SOS: u8 = 0x01;
const FLAG_MOS: u8 = 0x02;

fn expect_command(cmd: &RawCommand, expected: S2Command) -> Result<(), SecurityError> {
    if cmd.cc != COMMAND_CLASS_SECURITY_2 || cmd.command != expected as u8 {
        return Err(SecurityError::Frame(FrameError::InvalidCommand {
            cc: cmd.cc,
            command: cmd.command,
        }));
    }
    Ok(())
}

/// Nonce Get: request a nonce report from the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceGet {
    pub sequence_number: u8,
}

impl NonceGet {
    pub fn parse(cmd: &RawCommand) -> Result<Self, SecurityError> {
        expect_command(cmd, S2Command::NonceGet)?;
        match cmd.payload.as_slice() {
            [seq] => Ok(Self {
                sequence_number: *seq,
            }),
            _ => Err(SecurityError::InvalidPayload("nonce get must carry 1 byte")),
        }
    }

    pub fn to_command(&self) -> RawCommand {
        RawCommand::new(
            COMMAND_CLASS_SECURITY_2,
            S2Command::NonceGet as u8,
            vec![self.sequence_number],
        )
    }
}

/// Nonce Report: out-of-sync signalling plus, for singlecast recovery, the
/// reporter's entropy half.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceReport {
    pub sequence_number: u8,
    /// Singlecast desync: the receiver entropy field is present.
    pub receiver_entropy: Option<EntropyInput>,
    /// Multicast desync: the sender must redistribute its group state.
    pub multicast_out_of_sync: bool,
}

impl NonceReport {
    pub fn parse(cmd: &RawCommand) -> Result<Self, SecurityError> {
        expect_command(cmd, S2Command::NonceReport)?;
        let payload = &cmd.payload;
        if payload.len() < 2 {
            return Err(SecurityError::InvalidPayload(
                "nonce report must carry at least 2 bytes",
            ));
        }
        let sequence_number = payload[0];
        let flags = payload[1];

        let receiver_entropy = if flags & FLAG_SOS != 0 {
            if payload.len() != 2 + S2_ENTROPY_INPUT_SIZE {
                return Err(SecurityError::InvalidPayload(
                    "nonce report entropy field must be 16 bytes",
                ));
            }
            Some(
                EntropyInput::try_from(&payload[2..])
                    .expect("length checked above"),
            )
        } else {
            if payload.len() != 2 {
                return Err(SecurityError::InvalidPayload(
                    "nonce report without entropy carries exactly 2 bytes",
                ));
            }
            None
        };

        Ok(Self {
            sequence_number,
            receiver_entropy,
            multicast_out_of_sync: flags & FLAG_MOS != 0,
        })
    }

    pub fn to_command(&self) -> RawCommand {
        let mut flags = 0;
        if self.receiver_entropy.is_some() {
            flags |= FLAG_SOS;
        }
        if self.multicast_out_of_sync {
            flags |= FLAG_MOS;
        }
        let mut payload = Vec::with_capacity(2 + S2_ENTROPY_INPUT_SIZE);
        payload.push(self.sequence_number);
        payload.push(flags);
        if let Some(entropy) = &self.receiver_entropy {
            payload.extend_from_slice(entropy.as_ref());
        }
        RawCommand::new(COMMAND_CLASS_SECURITY_2, S2Command::NonceReport as u8, payload)
    }
}

/// Commands Supported Report: the securely supported command classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandsSupportedReport {
    pub command_classes: Vec<u8>,
}

impl CommandsSupportedReport {
    pub fn parse(cmd: &RawCommand) -> Result<Self, SecurityError> {
        expect_command(cmd, S2Command::CommandsSupportedReport)?;
        Ok(Self {
            command_classes: cmd.payload.clone(),
        })
    }

    pub fn to_command(&self) -> RawCommand {
        RawCommand::new(
            COMMAND_CLASS_SECURITY_2,
            S2Command::CommandsSupportedReport as u8,
            self.command_classes.clone(),
        )
    }
}
