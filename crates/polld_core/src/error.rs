use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entities::{AccountId, ServiceId};

/// Coarse classification of an [`Error`] for the watcher's propagation policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The account directory could not answer; logged, never surfaced.
    Directory,
    /// The credential session could not be constructed.
    SessionSetup,
    /// The asynchronous credential acquisition failed.
    SessionProcess,
    /// A result arrived for an attempt that is no longer current.
    Stale,
    /// Misuse of the watcher's control surface.
    Lifecycle,
    Other,
}

/// Which step of a login attempt failed, as seen by the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SessionSetup,
    SessionProcess,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionSetup => write!(f, "session setup"),
            Self::SessionProcess => write!(f, "session process"),
        }
    }
}

/// Failure delivered to the observer alongside an account state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl LoginFailure {
    pub fn setup(error: &Error) -> Self {
        Self {
            kind: FailureKind::SessionSetup,
            message: error.to_string(),
        }
    }

    pub fn process(error: &Error) -> Self {
        Self {
            kind: FailureKind::SessionProcess,
            message: error.to_string(),
        }
    }
}

impl fmt::Display for LoginFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.kind, self.message)
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("account directory error: {0}")]
    Directory(String),

    #[error("account {0} not found")]
    AccountNotFound(AccountId),

    #[error("service '{0}' not found")]
    ServiceNotFound(ServiceId),

    #[error("could not set up auth session: {0}")]
    SessionSetup(String),

    #[error("authentication failed: {0}")]
    SessionProcess(String),

    #[error("authentication requires user interaction")]
    UserInteractionRequired,

    #[error("credential storage error: {0}")]
    CredentialStorage(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("watcher is already running")]
    AlreadyRunning,

    #[error("no tokio runtime available to drive the watcher")]
    NoRuntime,

    #[error("watcher is bound to service type '{0}' and cannot watch extra services")]
    FixedServiceSet(String),

    #[error("watcher has shut down")]
    Shutdown,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Directory(_) | Error::AccountNotFound(_) | Error::ServiceNotFound(_) => {
                ErrorKind::Directory
            }
            Error::SessionSetup(_) => ErrorKind::SessionSetup,
            Error::SessionProcess(_)
            | Error::UserInteractionRequired
            | Error::CredentialStorage(_) => ErrorKind::SessionProcess,
            Error::Cancelled => ErrorKind::Stale,
            Error::AlreadyRunning
            | Error::NoRuntime
            | Error::FixedServiceSet(_)
            | Error::Shutdown => ErrorKind::Lifecycle,
            Error::Io(_) | Error::Other(_) => ErrorKind::Other,
        }
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_error_from_string() {
        let err: Error = String::from("test error").into();
        if let Error::Other(msg) = err {
            assert_eq!(msg, "test error");
        } else {
            panic!("Expected Error::Other");
        }
    }

    #[test]
    fn test_error_from_str() {
        let err: Error = "test error".into();
        assert!(matches!(err, Error::Other(ref msg) if msg == "test error"));
    }

    #[rstest]
    #[case(Error::Directory("gone".into()), ErrorKind::Directory)]
    #[case(Error::AccountNotFound(AccountId::new(3)), ErrorKind::Directory)]
    #[case(Error::SessionSetup("bad method".into()), ErrorKind::SessionSetup)]
    #[case(Error::SessionProcess("rejected".into()), ErrorKind::SessionProcess)]
    #[case(Error::UserInteractionRequired, ErrorKind::SessionProcess)]
    #[case(Error::Cancelled, ErrorKind::Stale)]
    #[case(Error::AlreadyRunning, ErrorKind::Lifecycle)]
    #[case(Error::Other("x".into()), ErrorKind::Other)]
    fn test_error_kind(#[case] error: Error, #[case] expected: ErrorKind) {
        assert_eq!(error.kind(), expected);
    }

    #[test]
    fn test_error_display_variants() {
        assert_eq!(
            Error::AccountNotFound(AccountId::new(7)).to_string(),
            "account 7 not found"
        );
        assert_eq!(
            Error::ServiceNotFound(ServiceId::new("sso")).to_string(),
            "service 'sso' not found"
        );
        assert_eq!(
            Error::UserInteractionRequired.to_string(),
            "authentication requires user interaction"
        );
        assert_eq!(
            Error::FixedServiceSet("mail".into()).to_string(),
            "watcher is bound to service type 'mail' and cannot watch extra services"
        );
        assert_eq!(Error::Cancelled.to_string(), "operation cancelled");
    }

    #[test]
    fn test_login_failure_from_error() {
        let failure = LoginFailure::setup(&Error::SessionSetup("unknown method".into()));
        assert_eq!(failure.kind, FailureKind::SessionSetup);
        assert_eq!(
            failure.message,
            "could not set up auth session: unknown method"
        );

        let failure = LoginFailure::process(&Error::UserInteractionRequired);
        assert_eq!(failure.kind, FailureKind::SessionProcess);
        assert_eq!(
            failure.to_string(),
            "session process failed: authentication requires user interaction"
        );
    }
}
