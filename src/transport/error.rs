//! Managed proxy error types.

use thiserror::Error;

use super::proxy::Phase;
use super::record::Role;

/// A line claimed a known message kind but could not be parsed as one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("malformed {kind} line: {reason}")]
    Malformed { kind: &'static str, reason: String },
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(String),
}

impl ParseError {
    pub(crate) fn malformed(kind: &'static str, reason: impl Into<String>) -> Self {
        ParseError::Malformed {
            kind,
            reason: reason.into(),
        }
    }
}

/// Why a managed proxy went `Broken`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("unexpected {kind} while {phase}")]
    UnexpectedMessage { kind: &'static str, phase: Phase },
    #[error("{kind} line from a {role} proxy")]
    RoleMismatch { kind: &'static str, role: Role },
    #[error("transport '{0}' announced twice")]
    DuplicateTransport(String),
    #[error("helper reported {kind}: {message}")]
    HelperReported { kind: &'static str, message: String },
    #[error("PROXY DONE received but no upstream proxy was configured")]
    ProxyNotRequested,
}

pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Failure while driving a proxy, as opposed to the proxy misbehaving.
#[derive(Debug, Error)]
pub enum DriveError {
    #[error("failed to read helper output: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    State(#[from] crate::state::StateError),
}
