//! Error types for color decoding, the strip and the twin store.
//!
//! Each collaborator has its own small error type. [`SyncError`] wraps all
//! three so `StateSync::set_color` can use `?` across module boundaries.
//!
//! ## Rust concepts
//! - Implementing `Display` and `std::error::Error` by hand
//! - `From` impls, which is what makes `?` convert between error types
//! - `source()` for error chaining

use std::fmt;

// ── InvalidColorFormat ───────────────────────────────────────────────

/// The text handed to the color decoder is not six hex digits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidColorFormat {
    /// Input had this many characters instead of 6.
    WrongLength(usize),
    /// Input contained a character outside `0-9a-fA-F`.
    NonHexDigit(char),
}

impl fmt::Display for InvalidColorFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidColorFormat::WrongLength(len) => {
                write!(f, "expected 6 hex digits (RRGGBB), got {len} characters")
            }
            InvalidColorFormat::NonHexDigit(c) => write!(f, "{c:?} is not a hex digit"),
        }
    }
}

impl std::error::Error for InvalidColorFormat {}

// ── HardwareFault ────────────────────────────────────────────────────

/// The strip driver could not write the pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareFault(pub String);

impl fmt::Display for HardwareFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "strip hardware fault: {}", self.0)
    }
}

impl std::error::Error for HardwareFault {}

// ── TransportError ───────────────────────────────────────────────────

/// The twin store could not be read or written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError(pub String);

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "twin transport error: {}", self.0)
    }
}

impl std::error::Error for TransportError {}

// ── SyncError ────────────────────────────────────────────────────────

/// Why a `set_color` call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    InvalidColor(InvalidColorFormat),
    Hardware(HardwareFault),
    Transport(TransportError),
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncError::InvalidColor(e) => write!(f, "invalid color: {e}"),
            SyncError::Hardware(e) => write!(f, "{e}"),
            SyncError::Transport(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SyncError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SyncError::InvalidColor(e) => Some(e),
            SyncError::Hardware(e) => Some(e),
            SyncError::Transport(e) => Some(e),
        }
    }
}

impl From<InvalidColorFormat> for SyncError {
    fn from(e: InvalidColorFormat) -> Self {
        SyncError::InvalidColor(e)
    }
}

impl From<HardwareFault> for SyncError {
    fn from(e: HardwareFault) -> Self {
        SyncError::Hardware(e)
    }
}

impl From<TransportError> for SyncError {
    fn from(e: TransportError) -> Self {
        SyncError::Transport(e)
    }
}
