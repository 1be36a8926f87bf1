//! Error taxonomy shared by every bus call.
//!
//! The set is closed: synchronous calls return one of these directly, and
//! asynchronous requests carry one in the `error` field of their reply event.
//!
//! | Variant | Code | Recoverable |
//! |---------|------|-------------|
//! | [`BusError::QueueFull`] | -1 | Yes |
//! | [`BusError::OutOfMemory`] | -2 | No |
//! | [`BusError::Uninitialized`] | -3 | No |
//! | [`BusError::InvalidParameter`] | -4 | No |
//! | [`BusError::NotFound`] | -8 | No |
//! | [`BusError::UnsupportedFormat`] | -9 | No |
//! | [`BusError::Unavailable`] | -10 | Yes |
//! | [`BusError::SetFailed`] | -11 | No |
//! | [`BusError::CommandFailed`] | -12 | No |
//! | [`BusError::Unsupported`] | -18 | No |
//! | [`BusError::NotImplemented`] | -19 | No |
//! | [`BusError::Generic`] | -20 | No |

/// Result alias that carries the bus [`BusError`] type.
pub type Result<T> = std::result::Result<T, BusError>;

/// Common error type for the bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum BusError {
    /// The handle's event queue is saturated; drain it before issuing more
    /// asynchronous requests.
    #[error("event queue full")]
    QueueFull,
    /// Allocation failure. Treated as catastrophic by callers.
    #[error("memory allocation failed")]
    OutOfMemory,
    /// The engine has not been initialized yet, or the handle is gone.
    #[error("core not initialized")]
    Uninitialized,
    /// Malformed name, arguments or request.
    #[error("invalid parameter")]
    InvalidParameter,
    /// Unknown property, option, command or client.
    #[error("property not found")]
    NotFound,
    /// The value cannot be converted to the requested format.
    #[error("unsupported format for accessing property")]
    UnsupportedFormat,
    /// The property exists but its subsystem is inactive.
    #[error("property unavailable")]
    Unavailable,
    /// The property rejected the write, usually because it is read-only.
    #[error("error accessing property")]
    SetFailed,
    /// A command handler failed for a reason of its own.
    #[error("error running command")]
    CommandFailed,
    #[error("operation not supported")]
    Unsupported,
    /// Reserved for entry points without a backend.
    #[error("operation not implemented")]
    NotImplemented,
    /// Catch-all for failures outside the other categories.
    #[error("something happened")]
    Generic,
}

impl BusError {
    const ALL: [BusError; 12] = [
        BusError::QueueFull,
        BusError::OutOfMemory,
        BusError::Uninitialized,
        BusError::InvalidParameter,
        BusError::NotFound,
        BusError::UnsupportedFormat,
        BusError::Unavailable,
        BusError::SetFailed,
        BusError::CommandFailed,
        BusError::Unsupported,
        BusError::NotImplemented,
        BusError::Generic,
    ];

    /// Stable negative numeric code, suitable for foreign consumers.
    pub fn code(&self) -> i32 {
        match self {
            Self::QueueFull => -1,
            Self::OutOfMemory => -2,
            Self::Uninitialized => -3,
            Self::InvalidParameter => -4,
            Self::NotFound => -8,
            Self::UnsupportedFormat => -9,
            Self::Unavailable => -10,
            Self::SetFailed => -11,
            Self::CommandFailed => -12,
            Self::Unsupported => -18,
            Self::NotImplemented => -19,
            Self::Generic => -20,
        }
    }

    /// Maps a numeric code back to its error. `None` for success (`>= 0`)
    /// and for codes outside the taxonomy.
    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|err| err.code() == code)
    }

    /// Recoverable errors may succeed on retry without any change by the
    /// caller other than waiting or draining.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::QueueFull | Self::Unavailable)
    }
}

/// Describes a numeric code. `0` and positive values are success; codes
/// outside the taxonomy read as "unknown error".
pub fn error_string(code: i32) -> String {
    if code >= 0 {
        return "success".to_string();
    }
    match BusError::from_code(code) {
        Some(err) => err.to_string(),
        None => "unknown error".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_negative_and_unique() {
        let mut seen = std::collections::HashSet::new();
        for err in BusError::ALL {
            assert!(err.code() < 0, "{err:?} must have a negative code");
            assert!(seen.insert(err.code()), "{err:?} code is duplicated");
            assert_eq!(BusError::from_code(err.code()), Some(err));
        }
    }

    #[test]
    fn describes_codes() {
        assert_eq!(error_string(0), "success");
        assert_eq!(error_string(-1), "event queue full");
        assert_eq!(error_string(-999), "unknown error");
    }

    #[test]
    fn queue_full_is_recoverable() {
        assert!(BusError::QueueFull.is_recoverable());
        assert!(BusError::Unavailable.is_recoverable());
        assert!(!BusError::CommandFailed.is_recoverable());
        assert!(!BusError::OutOfMemory.is_recoverable());
    }
}
