use std::fmt;

use thiserror::Error;

/// Precondition violations raised synchronously by resolver and cursor
/// operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("the resolver has already been resolved")]
    AlreadyResolved,
    #[error("invalid state: expected {expected}, found {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("every resolver was dropped before the future settled")]
    ResolverDropped,
}

/// Rejection reasons produced by `cancel()` and `timeout()`.
///
/// A future whose error type implements `From<Interrupted>` can be cancelled
/// or timed out; the resulting rejection carries the reason named `"Cancel"`
/// or `"Timeout"`.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupted {
    #[error("Cancel")]
    Cancel,
    #[error("Timeout")]
    Timeout,
}

impl Interrupted {
    pub fn name(&self) -> &'static str {
        match self {
            Interrupted::Cancel => "Cancel",
            Interrupted::Timeout => "Timeout",
        }
    }
}

/// A rejection that reached the end of a chain without a reject handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnhandledRejection {
    reason: String,
}

impl UnhandledRejection {
    pub(crate) fn new<E: fmt::Debug>(reason: &E) -> Self {
        UnhandledRejection {
            reason: format!("{:?}", reason),
        }
    }

    /// The `Debug` rendering of the rejection reason.
    pub fn reason(&self) -> &str {
        &self.reason
    }
}

impl fmt::Display for UnhandledRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unhandled rejection: {}", self.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interrupted_names() {
        assert_eq!(Interrupted::Cancel.name(), "Cancel");
        assert_eq!(Interrupted::Timeout.to_string(), "Timeout");
    }

    #[test]
    fn invalid_state_message() {
        let err = Error::InvalidState {
            expected: "accepted",
            actual: "pending",
        };
        assert_eq!(err.to_string(), "invalid state: expected accepted, found pending");
    }

    #[test]
    fn unhandled_rejection_formats_reason() {
        let rejection = UnhandledRejection::new(&"boom");
        assert_eq!(rejection.reason(), "\"boom\"");
        assert_eq!(rejection.to_string(), "unhandled rejection: \"boom\"");
    }
}
