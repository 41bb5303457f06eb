//! Key-exchange bootstrap commands.
//!
//! The handshake that grants security classes to a joining node: advertise
//! and select key-exchange schemes and an ECDH profile, exchange public
//! keys, transfer the network key for each granted class, and signal abort
//! with a typed reason. These commands are pure data — the encryption rules
//! around them (which ones travel inside the temporary-key transport, which
//! echoes must mirror the original flags) are static and checked with the
//! helpers at the bottom, not with a state machine.

use zwave_core::constants::{COMMAND_CLASS_SECURITY_2, NETWORK_KEY_SIZE};
use zwave_core::{FrameError, RawCommand, S2Command, SecurityClass};
use zwave_crypto::NetworkKey;

use crate::error::SecurityError;

const KEX_FLAG_ECHO: u8 = 0x01;
const KEX_FLAG_CSA: u8 = 0x02;

/// Key-exchange scheme bitmask: bit 1 is the only scheme defined.
pub const KEX_SCHEME_1: u8 = 0x02;
/// ECDH profile bitmask: bit 0 is Curve25519.
pub const ECDH_PROFILE_CURVE25519: u8 = 0x01;

fn expect_command(cmd: &RawCommand, expected: S2Command) -> Result<(), SecurityError> {
    if cmd.cc != COMMAND_CLASS_SECURITY_2 || cmd.command != expected as u8 {
        return Err(SecurityError::Frame(FrameError::InvalidCommand {
            cc: cmd.cc,
            command: cmd.command,
        }));
    }
    Ok(())
}

fn single_class_from_mask(mask: u8) -> Result<SecurityClass, SecurityError> {
    let mut classes = SecurityClass::from_bitmask(mask);
    match (classes.next(), classes.next()) {
        (Some(class), None) if mask.count_ones() == 1 => Ok(class),
        _ => Err(SecurityError::InvalidPayload(
            "expected exactly one security class bit",
        )),
    }
}

/// KEX Get: request the peer's key-exchange capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KexGet;

impl KexGet {
    pub fn parse(cmd: &RawCommand) -> Result<Self, SecurityError> {
        expect_command(cmd, S2Command::KexGet)?;
        Ok(Self)
    }

    pub fn to_command(&self) -> RawCommand {
        RawCommand::new(COMMAND_CLASS_SECURITY_2, S2Command::KexGet as u8, vec![])
    }
}

/// KEX Report: capabilities and requested classes.
///
/// Layout: `[flags: 1] || [schemes: 1] || [ecdh profiles: 1] || [keys: 1]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KexReport {
    /// Set when this report echoes a received one inside secure transport.
    pub echo: bool,
    /// The joining node asks for client-side authentication.
    pub request_csa: bool,
    pub supported_schemes: u8,
    pub supported_ecdh_profiles: u8,
    pub requested_keys: u8,
}

impl KexReport {
    pub fn parse(cmd: &RawCommand) -> Result<Self, SecurityError> {
        expect_command(cmd, S2Command::KexReport)?;
        match cmd.payload.as_slice() {
            [flags, schemes, profiles, keys] => Ok(Self {
                echo: flags & KEX_FLAG_ECHO != 0,
                request_csa: flags & KEX_FLAG_CSA != 0,
                supported_schemes: *schemes,
                supported_ecdh_profiles: *profiles,
                requested_keys: *keys,
            }),
            _ => Err(SecurityError::InvalidPayload(
                "kex report must carry 4 bytes",
            )),
        }
    }

    pub fn to_command(&self) -> RawCommand {
        let mut flags = 0;
        if self.echo {
            flags |= KEX_FLAG_ECHO;
        }
        if self.request_csa {
            flags |= KEX_FLAG_CSA;
        }
        RawCommand::new(
            COMMAND_CLASS_SECURITY_2,
            S2Command::KexReport as u8,
            vec![
                flags,
                self.supported_schemes,
                self.supported_ecdh_profiles,
                self.requested_keys,
            ],
        )
    }
}

/// KEX Set: the including node's selection.
///
/// Layout matches [`KexReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KexSet {
    pub echo: bool,
    pub permit_csa: bool,
    pub selected_scheme: u8,
    pub selected_ecdh_profile: u8,
    pub granted_keys: u8,
}

impl KexSet {
    pub fn parse(cmd: &RawCommand) -> Result<Self, SecurityError> {
        expect_command(cmd, S2Command::KexSet)?;
        match cmd.payload.as_slice() {
            [flags, scheme, profile, keys] => Ok(Self {
                echo: flags & KEX_FLAG_ECHO != 0,
                permit_csa: flags & KEX_FLAG_CSA != 0,
                selected_scheme: *scheme,
                selected_ecdh_profile: *profile,
                granted_keys: *keys,
            }),
            _ => Err(SecurityError::InvalidPayload("kex set must carry 4 bytes")),
        }
    }

    pub fn to_command(&self) -> RawCommand {
        let mut flags = 0;
        if self.echo {
            flags |= KEX_FLAG_ECHO;
        }
        if self.permit_csa {
            flags |= KEX_FLAG_CSA;
        }
        RawCommand::new(
            COMMAND_CLASS_SECURITY_2,
            S2Command::KexSet as u8,
            vec![
                flags,
                self.selected_scheme,
                self.selected_ecdh_profile,
                self.granted_keys,
            ],
        )
    }
}

/// Typed abort reasons for a failed key exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum KexFailType {
    NoMatchingKeys = 0x01,
    NoMatchingScheme = 0x02,
    NoMatchingCurve = 0x03,
    DecryptFailed = 0x05,
    BootstrapCancelled = 0x06,
    AuthenticationFailed = 0x07,
    KeyNotGranted = 0x08,
    KeyVerifyFailed = 0x09,
    WrongSecurityLevel = 0x0A,
}

impl KexFailType {
    pub fn from_u8(v: u8) -> Result<Self, SecurityError> {
        match v {
            0x01 => Ok(Self::NoMatchingKeys),
            0x02 => Ok(Self::NoMatchingScheme),
            0x03 => Ok(Self::NoMatchingCurve),
            0x05 => Ok(Self::DecryptFailed),
            0x06 => Ok(Self::BootstrapCancelled),
            0x07 => Ok(Self::AuthenticationFailed),
            0x08 => Ok(Self::KeyNotGranted),
            0x09 => Ok(Self::KeyVerifyFailed),
            0x0A => Ok(Self::WrongSecurityLevel),
            _ => Err(SecurityError::InvalidPayload("unknown kex failure code")),
        }
    }
}

/// KEX Fail: abort the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KexFail {
    pub reason: KexFailType,
}

impl KexFail {
    pub fn parse(cmd: &RawCommand) -> Result<Self, SecurityError> {
        expect_command(cmd, S2Command::KexFail)?;
        match cmd.payload.as_slice() {
            [reason] => Ok(Self {
                reason: KexFailType::from_u8(*reason)?,
            }),
            _ => Err(SecurityError::InvalidPayload("kex fail must carry 1 byte")),
        }
    }

    pub fn to_command(&self) -> RawCommand {
        RawCommand::new(
            COMMAND_CLASS_SECURITY_2,
            S2Command::KexFail as u8,
            vec![self.reason as u8],
        )
    }
}

/// Public Key Report: one party's ECDH public key.
///
/// Layout: `[flags: 1] || [public key: 32]`, flag bit 0 set when the key
/// belongs to the joining (included) node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyReport {
    pub including_node: bool,
    pub public_key: [u8; 32],
}

impl PublicKeyReport {
    pub fn parse(cmd: &RawCommand) -> Result<Self, SecurityError> {
        expect_command(cmd, S2Command::PublicKeyReport)?;
        let payload = &cmd.payload;
        if payload.len() != 33 {
            return Err(SecurityError::InvalidPayload(
                "public key report must carry 33 bytes",
            ));
        }
        let public_key: [u8; 32] = payload[1..].try_into().expect("length checked above");
        Ok(Self {
            including_node: payload[0] & 0x01 != 0,
            public_key,
        })
    }

    pub fn to_command(&self) -> RawCommand {
        let mut payload = Vec::with_capacity(33);
        payload.push(self.including_node as u8);
        payload.extend_from_slice(&self.public_key);
        RawCommand::new(
            COMMAND_CLASS_SECURITY_2,
            S2Command::PublicKeyReport as u8,
            payload,
        )
    }
}

/// Network Key Get: request the key for exactly one granted class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkKeyGet {
    pub requested_key: SecurityClass,
}

impl NetworkKeyGet {
    pub fn parse(cmd: &RawCommand) -> Result<Self, SecurityError> {
        expect_command(cmd, S2Command::NetworkKeyGet)?;
        match cmd.payload.as_slice() {
            [mask] => Ok(Self {
                requested_key: single_class_from_mask(*mask)?,
            }),
            _ => Err(SecurityError::InvalidPayload(
                "network key get must carry 1 byte",
            )),
        }
    }

    pub fn to_command(&self) -> RawCommand {
        RawCommand::new(
            COMMAND_CLASS_SECURITY_2,
            S2Command::NetworkKeyGet as u8,
            vec![self.requested_key.bitmask()],
        )
    }
}

/// Network Key Report: the key for one granted class. Always sent inside
/// temporary-key secure transport.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkKeyReport {
    pub granted_key: SecurityClass,
    pub network_key: NetworkKey,
}

impl NetworkKeyReport {
    pub fn parse(cmd: &RawCommand) -> Result<Self, SecurityError> {
        expect_command(cmd, S2Command::NetworkKeyReport)?;
        let payload = &cmd.payload;
        if payload.len() != 1 + NETWORK_KEY_SIZE {
            return Err(SecurityError::InvalidPayload(
                "network key report must carry 17 bytes",
            ));
        }
        let key_bytes: [u8; NETWORK_KEY_SIZE] =
            payload[1..].try_into().expect("length checked above");
        Ok(Self {
            granted_key: single_class_from_mask(payload[0])?,
            network_key: NetworkKey::new(key_bytes),
        })
    }

    pub fn to_command(&self) -> RawCommand {
        let mut payload = Vec::with_capacity(1 + NETWORK_KEY_SIZE);
        payload.push(self.granted_key.bitmask());
        payload.extend_from_slice(self.network_key.as_bytes());
        RawCommand::new(
            COMMAND_CLASS_SECURITY_2,
            S2Command::NetworkKeyReport as u8,
            payload,
        )
    }
}

/// Network Key Verify: sent under the freshly received key to prove it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetworkKeyVerify;

impl NetworkKeyVerify {
    pub fn parse(cmd: &RawCommand) -> Result<Self, SecurityError> {
        expect_command(cmd, S2Command::NetworkKeyVerify)?;
        Ok(Self)
    }

    pub fn to_command(&self) -> RawCommand {
        RawCommand::new(
            COMMAND_CLASS_SECURITY_2,
            S2Command::NetworkKeyVerify as u8,
            vec![],
        )
    }
}

/// Transfer End: close the key transfer phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferEnd {
    pub key_verified: bool,
    pub key_request_complete: bool,
}

impl TransferEnd {
    pub fn parse(cmd: &RawCommand) -> Result<Self, SecurityError> {
        expect_command(cmd, S2Command::TransferEnd)?;
        match cmd.payload.as_slice() {
            [flags] => Ok(Self {
                key_verified: flags & 0x02 != 0,
                key_request_complete: flags & 0x01 != 0,
            }),
            _ => Err(SecurityError::InvalidPayload(
                "transfer end must carry 1 byte",
            )),
        }
    }

    pub fn to_command(&self) -> RawCommand {
        let mut flags = 0;
        if self.key_request_complete {
            flags |= 0x01;
        }
        if self.key_verified {
            flags |= 0x02;
        }
        RawCommand::new(
            COMMAND_CLASS_SECURITY_2,
            S2Command::TransferEnd as u8,
            vec![flags],
        )
    }
}

/// Whether a securely echoed KEX Report mirrors the original. The echo flag
/// itself is excluded from the comparison.
pub fn kex_report_echo_matches(original: &KexReport, echo: &KexReport) -> bool {
    echo.echo
        && original.request_csa == echo.request_csa
        && original.supported_schemes == echo.supported_schemes
        && original.supported_ecdh_profiles == echo.supported_ecdh_profiles
        && original.requested_keys == echo.requested_keys
}

/// Whether a securely echoed KEX Set mirrors the original.
pub fn kex_set_echo_matches(original: &KexSet, echo: &KexSet) -> bool {
    echo.echo
        && original.permit_csa == echo.permit_csa
        && original.selected_scheme == echo.selected_scheme
        && original.selected_ecdh_profile == echo.selected_ecdh_profile
        && original.granted_keys == echo.granted_keys
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kex_report_roundtrip() {
        let report = KexReport {
            echo: false,
            request_csa: true,
            supported_schemes: KEX_SCHEME_1,
            supported_ecdh_profiles: ECDH_PROFILE_CURVE25519,
            requested_keys: SecurityClass::S2Unauthenticated.bitmask()
                | SecurityClass::S2Authenticated.bitmask(),
        };
        assert_eq!(KexReport::parse(&report.to_command()).unwrap(), report);
    }

    #[test]
    fn kex_set_roundtrip() {
        let set = KexSet {
            echo: true,
            permit_csa: false,
            selected_scheme: KEX_SCHEME_1,
            selected_ecdh_profile: ECDH_PROFILE_CURVE25519,
            granted_keys: SecurityClass::S2Authenticated.bitmask(),
        };
        assert_eq!(KexSet::parse(&set.to_command()).unwrap(), set);
    }

    #[test]
    fn kex_fail_roundtrip() {
        for reason in [
            KexFailType::NoMatchingKeys,
            KexFailType::DecryptFailed,
            KexFailType::BootstrapCancelled,
            KexFailType::WrongSecurityLevel,
        ] {
            let fail = KexFail { reason };
            assert_eq!(KexFail::parse(&fail.to_command()).unwrap(), fail);
        }
    }

    #[test]
    fn kex_fail_rejects_unknown_code() {
        let cmd = RawCommand::new(COMMAND_CLASS_SECURITY_2, S2Command::KexFail as u8, vec![0x04]);
        assert!(KexFail::parse(&cmd).is_err());
    }

    #[test]
    fn public_key_report_roundtrip() {
        let report = PublicKeyReport {
            including_node: true,
            public_key: [0x5A; 32],
        };
        assert_eq!(PublicKeyReport::parse(&report.to_command()).unwrap(), report);
    }

    #[test]
    fn network_key_get_requires_single_class() {
        let get = NetworkKeyGet {
            requested_key: SecurityClass::S2AccessControl,
        };
        assert_eq!(NetworkKeyGet::parse(&get.to_command()).unwrap(), get);

        let two_bits = RawCommand::new(
            COMMAND_CLASS_SECURITY_2,
            S2Command::NetworkKeyGet as u8,
            vec![SecurityClass::S2Authenticated.bitmask()
                | SecurityClass::S2Unauthenticated.bitmask()],
        );
        assert!(NetworkKeyGet::parse(&two_bits).is_err());

        let no_bits = RawCommand::new(
            COMMAND_CLASS_SECURITY_2,
            S2Command::NetworkKeyGet as u8,
            vec![0],
        );
        assert!(NetworkKeyGet::parse(&no_bits).is_err());
    }

    #[test]
    fn network_key_report_roundtrip() {
        let report = NetworkKeyReport {
            granted_key: SecurityClass::S0Legacy,
            network_key: NetworkKey::new([0x0F; 16]),
        };
        assert_eq!(NetworkKeyReport::parse(&report.to_command()).unwrap(), report);
    }

    #[test]
    fn transfer_end_roundtrip() {
        for (verified, complete) in [(false, false), (true, false), (false, true), (true, true)] {
            let end = TransferEnd {
                key_verified: verified,
                key_request_complete: complete,
            };
            assert_eq!(TransferEnd::parse(&end.to_command()).unwrap(), end);
        }
    }

    #[test]
    fn echo_matching_ignores_echo_flag_but_compares_the_rest() {
        let original = KexReport {
            echo: false,
            request_csa: false,
            supported_schemes: KEX_SCHEME_1,
            supported_ecdh_profiles: ECDH_PROFILE_CURVE25519,
            requested_keys: 0x07,
        };
        let mut echo = original;
        echo.echo = true;
        assert!(kex_report_echo_matches(&original, &echo));

        // A non-echo copy never matches.
        assert!(!kex_report_echo_matches(&original, &original));

        // Tampered keys are caught.
        let mut tampered = echo;
        tampered.requested_keys = 0x01;
        assert!(!kex_report_echo_matches(&original, &tampered));
    }
}
