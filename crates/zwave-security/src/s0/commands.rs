//! Payload codecs for the ancillary S0 commands.
//!
//! These are data-only request/response shells around the encapsulation
//! engine: the nonce handshake, the scheme negotiation, and the network key
//! transfer. None of them carry state of their own.

use zwave_core::constants::{COMMAND_CLASS_SECURITY, NETWORK_KEY_SIZE};
use zwave_core::{FrameError, HalfNonce, RawCommand, S0Command};
use zwave_crypto::NetworkKey;

use crate::error::SecurityError;

fn expect_command(cmd: &RawCommand, expected: S0Command) -> Result<(), SecurityError> {
    if cmd.cc != COMMAND_CLASS_SECURITY || cmd.command != expected as u8 {
        return Err(SecurityError::Frame(FrameError::InvalidCommand {
            cc: cmd.cc,
            command: cmd.command,
        }));
    }
    Ok(())
}

/// Nonce Report: the issued 8-byte nonce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceReport {
    pub nonce: HalfNonce,
}

impl NonceReport {
    pub fn parse(cmd: &RawCommand) -> Result<Self, SecurityError> {
        expect_command(cmd, S0Command::NonceReport)?;
        let nonce = HalfNonce::try_from(cmd.payload.as_slice())
            .map_err(|_| SecurityError::InvalidPayload("nonce report must carry 8 bytes"))?;
        Ok(Self { nonce })
    }

    pub fn to_command(&self) -> RawCommand {
        RawCommand::new(
            COMMAND_CLASS_SECURITY,
            S0Command::NonceReport as u8,
            self.nonce.as_ref().to_vec(),
        )
    }
}

/// Scheme Report / Scheme Get: a one-byte scheme bitmask. Bit 0 clear means
/// "scheme 0 supported" in both directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemeReport {
    pub schemes: u8,
}

impl SchemeReport {
    pub fn parse(cmd: &RawCommand) -> Result<Self, SecurityError> {
        expect_command(cmd, S0Command::SchemeReport)?;
        match cmd.payload.as_slice() {
            [schemes] => Ok(Self { schemes: *schemes }),
            _ => Err(SecurityError::InvalidPayload(
                "scheme report must carry 1 byte",
            )),
        }
    }

    pub fn to_command(&self) -> RawCommand {
        RawCommand::new(
            COMMAND_CLASS_SECURITY,
            S0Command::SchemeReport as u8,
            vec![self.schemes],
        )
    }
}

/// Network Key Set: the 16-byte network key, itself always sent inside an
/// encapsulation under the provisioning key.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkKeySet {
    pub network_key: NetworkKey,
}

impl NetworkKeySet {
    pub fn parse(cmd: &RawCommand) -> Result<Self, SecurityError> {
        expect_command(cmd, S0Command::NetworkKeySet)?;
        let bytes: [u8; NETWORK_KEY_SIZE] = cmd
            .payload
            .as_slice()
            .try_into()
            .map_err(|_| SecurityError::InvalidPayload("network key must be 16 bytes"))?;
        Ok(Self {
            network_key: NetworkKey::new(bytes),
        })
    }

    pub fn to_command(&self) -> RawCommand {
        RawCommand::new(
            COMMAND_CLASS_SECURITY,
            S0Command::NetworkKeySet as u8,
            self.network_key.as_bytes().to_vec(),
        )
    }
}

/// Commands Supported Report: the securely supported command classes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandsSupportedReport {
    /// Reports-to-follow counter for multi-frame lists.
    pub reports_to_follow: u8,
    pub command_classes: Vec<u8>,
}

impl CommandsSupportedReport {
    pub fn parse(cmd: &RawCommand) -> Result<Self, SecurityError> {
        expect_command(cmd, S0Command::CommandsSupportedReport)?;
        let Some((&reports_to_follow, classes)) = cmd.payload.split_first() else {
            return Err(SecurityError::InvalidPayload(
                "commands supported report must carry at least 1 byte",
            ));
        };
        Ok(Self {
            reports_to_follow,
            command_classes: classes.to_vec(),
        })
    }

    pub fn to_command(&self) -> RawCommand {
        let mut payload = Vec::with_capacity(1 + self.command_classes.len());
        payload.push(self.reports_to_follow);
        payload.extend_from_slice(&self.command_classes);
        RawCommand::new(
            COMMAND_CLASS_SECURITY,
            S0Command::CommandsSupportedReport as u8,
            payload,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nonce_report_roundtrip() {
        let report = NonceReport {
            nonce: HalfNonce::new([1, 2, 3, 4, 5, 6, 7, 8]),
        };
        assert_eq!(NonceReport::parse(&report.to_command()).unwrap(), report);
    }

    #[test]
    fn nonce_report_rejects_wrong_length() {
        let cmd = RawCommand::new(COMMAND_CLASS_SECURITY, S0Command::NonceReport as u8, vec![0; 7]);
        assert!(NonceReport::parse(&cmd).is_err());
    }

    #[test]
    fn scheme_report_roundtrip() {
        let report = SchemeReport { schemes: 0 };
        assert_eq!(SchemeReport::parse(&report.to_command()).unwrap(), report);
    }

    #[test]
    fn network_key_set_roundtrip() {
        let set = NetworkKeySet {
            network_key: NetworkKey::new([0x42; 16]),
        };
        assert_eq!(NetworkKeySet::parse(&set.to_command()).unwrap(), set);
    }

    #[test]
    fn commands_supported_roundtrip() {
        let report = CommandsSupportedReport {
            reports_to_follow: 0,
            command_classes: vec![0x25, 0x26, 0x62],
        };
        assert_eq!(
            CommandsSupportedReport::parse(&report.to_command()).unwrap(),
            report
        );
    }

    #[test]
    fn parse_rejects_wrong_command_id() {
        let report = NonceReport {
            nonce: HalfNonce::new([0; 8]),
        };
        let mut cmd = report.to_command();
        cmd.command = S0Command::NonceGet as u8;
        assert!(NonceReport::parse(&cmd).is_err());
    }
}
