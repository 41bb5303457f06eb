use core::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    InvalidLength { reason: &'static str },
    AuthenticationFailed,
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::InvalidLength { reason } => write!(f, "invalid length: {reason}"),
            CryptoError::AuthenticationFailed => write!(f, "authentication failed"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CryptoError {}
