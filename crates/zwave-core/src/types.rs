//! Newtype wrappers for protocol identifiers and fixed-size byte fields.
//!
//! These types prevent accidental mixing of values that share an underlying
//! representation (node ids vs. group ids, entropy inputs vs. half-nonces).

use core::fmt;

/// Helper to write lowercase hex without the `hex` crate.
fn fmt_hex(bytes: &[u8], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for byte in bytes {
        write!(f, "{:02x}", byte)?;
    }
    Ok(())
}

/// Error returned when converting a slice of the wrong length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidLength {
    pub expected: usize,
    pub actual: usize,
}

impl fmt::Display for InvalidLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid length: expected {} bytes, got {}",
            self.expected, self.actual
        )
    }
}

#[cfg(feature = "std")]
impl std::error::Error for InvalidLength {}

/// A mesh node identifier. Unicast ids occupy 1..=232; `0xFF` is the
/// broadcast address.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[must_use]
pub struct NodeId(u8);

impl NodeId {
    pub const BROADCAST: NodeId = NodeId(0xFF);
    pub const MAX_UNICAST: u8 = 232;

    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    pub const fn is_broadcast(self) -> bool {
        self.0 == Self::BROADCAST.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

/// A multicast group identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[must_use]
pub struct GroupId(u8);

impl GroupId {
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    pub const fn value(self) -> u8 {
        self.0
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GroupId({})", self.0)
    }
}

/// The 32-bit network (home) identifier shared by all nodes of a mesh.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[must_use]
pub struct HomeId(u32);

impl HomeId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    pub const fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for HomeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl fmt::Debug for HomeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HomeId({:08x})", self.0)
    }
}

/// A 16-byte entropy contribution to the synchronized nonce derivation.
#[derive(Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct EntropyInput(pub(crate) [u8; 16]);

impl EntropyInput {
    pub const SIZE: usize = 16;

    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    pub const fn to_bytes(self) -> [u8; 16] {
        self.0
    }
}

impl AsRef<[u8]> for EntropyInput {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for EntropyInput {
    type Error = InvalidLength;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 16] = bytes.try_into().map_err(|_| InvalidLength {
            expected: 16,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for EntropyInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntropyInput(")?;
        fmt_hex(&self.0[..4], f)?;
        write!(f, "..)")
    }
}

/// An 8-byte nonce contribution in the legacy S0 handshake. The first byte
/// doubles as the nonce identifier echoed back by the encrypting party.
#[derive(Clone, Copy, PartialEq, Eq)]
#[must_use]
pub struct HalfNonce(pub(crate) [u8; 8]);

impl HalfNonce {
    pub const SIZE: usize = 8;

    pub const fn new(bytes: [u8; 8]) -> Self {
        Self(bytes)
    }

    pub const fn to_bytes(self) -> [u8; 8] {
        self.0
    }

    /// The nonce identifier: the first byte of the nonce.
    pub const fn id(self) -> u8 {
        self.0[0]
    }
}

impl AsRef<[u8]> for HalfNonce {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<&[u8]> for HalfNonce {
    type Error = InvalidLength;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        let arr: [u8; 8] = bytes.try_into().map_err(|_| InvalidLength {
            expected: 8,
            actual: bytes.len(),
        })?;
        Ok(Self(arr))
    }
}

impl fmt::Debug for HalfNonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HalfNonce(")?;
        fmt_hex(&self.0, f)?;
        write!(f, ")")
    }
}

/// A tier of network trust. Each class owns independently derived key
/// material; the `Ord` impl ranks classes from least to most trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SecurityClass {
    S0Legacy,
    S2Unauthenticated,
    S2Authenticated,
    S2AccessControl,
}

impl SecurityClass {
    /// All S2 classes in descending trust order, the order in which
    /// decryption candidates are tried when a peer's class is unknown.
    pub const S2_DESCENDING: [SecurityClass; 3] = [
        SecurityClass::S2AccessControl,
        SecurityClass::S2Authenticated,
        SecurityClass::S2Unauthenticated,
    ];

    /// The bit this class occupies in key-exchange bitmasks.
    pub const fn bitmask(self) -> u8 {
        match self {
            SecurityClass::S2Unauthenticated => 0x01,
            SecurityClass::S2Authenticated => 0x02,
            SecurityClass::S2AccessControl => 0x04,
            SecurityClass::S0Legacy => 0x80,
        }
    }

    /// Decode a key-exchange bitmask into the classes it grants,
    /// most trusted first.
    pub fn from_bitmask(mask: u8) -> impl Iterator<Item = SecurityClass> {
        [
            SecurityClass::S2AccessControl,
            SecurityClass::S2Authenticated,
            SecurityClass::S2Unauthenticated,
            SecurityClass::S0Legacy,
        ]
        .into_iter()
        .filter(move |class| mask & class.bitmask() != 0)
    }

    pub const fn is_s2(self) -> bool {
        !matches!(self, SecurityClass::S0Legacy)
    }
}

impl fmt::Display for SecurityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SecurityClass::S0Legacy => "S0 Legacy",
            SecurityClass::S2Unauthenticated => "S2 Unauthenticated",
            SecurityClass::S2Authenticated => "S2 Authenticated",
            SecurityClass::S2AccessControl => "S2 Access Control",
        };
        write!(f, "{name}")
    }
}
