//! Error types for the zwave-core crate.

use core::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    TooShort { min: usize, actual: usize },
    InvalidCommandClass(u8),
    InvalidCommand { cc: u8, command: u8 },
    PayloadTooLarge { max: usize, actual: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::TooShort { min, actual } => {
                write!(f, "frame too short: need at least {min} bytes, got {actual}")
            }
            FrameError::InvalidCommandClass(v) => {
                write!(f, "invalid command class: 0x{v:02x}")
            }
            FrameError::InvalidCommand { cc, command } => {
                write!(
                    f,
                    "invalid command 0x{command:02x} for command class 0x{cc:02x}"
                )
            }
            FrameError::PayloadTooLarge { max, actual } => {
                write!(f, "payload too large: max {max} bytes, got {actual}")
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FrameError {}
