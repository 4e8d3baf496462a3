//! Error types for the fault injector

use std::io;

use thiserror::Error;

/// Result type alias for the fault injector
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error used at the tower service boundary
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Fault injector errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Upstream returned something we could not relay
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Deliberate connection abort produced by an `Abort` or `DelayWithAbort` fault.
///
/// This is not a failure of the service. It is returned as the error of the
/// request future so the host transport drops the connection without writing
/// a response. Hosts should recognise it with [`is_aborted`] and stay quiet
/// about it.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[error("connection aborted by fault injection")]
pub struct Aborted;

/// Check whether an error, or anything in its `source()` chain, is [`Aborted`]
#[must_use]
pub fn is_aborted(err: &(dyn std::error::Error + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.is::<Aborted>() {
            return true;
        }
        current = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Error, Debug)]
    #[error("transport closed")]
    struct Wrapper(#[source] BoxError);

    #[test]
    fn test_is_aborted_direct() {
        let err: BoxError = Box::new(Aborted);
        assert!(is_aborted(&*err));
    }

    #[test]
    fn test_is_aborted_through_source_chain() {
        let err = Wrapper(Box::new(Aborted));
        assert!(is_aborted(&err));
    }

    #[test]
    fn test_other_errors_are_not_aborts() {
        let err = Wrapper(Box::new(Error::Internal("boom".to_string())));
        assert!(!is_aborted(&err));
        assert!(!is_aborted(&Error::Config("bad".to_string())));
    }

    #[test]
    fn test_aborted_message() {
        assert_eq!(Aborted.to_string(), "connection aborted by fault injection");
    }
}
