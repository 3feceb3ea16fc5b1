//! Durable state backend trait.
//!
//! Bind addresses announced by server transports are remembered across
//! restarts so helpers can be asked to listen on the same ports again.

use std::net::SocketAddr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result type for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors from state store operations.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StateError {
    fn from(e: serde_json::Error) -> Self {
        StateError::Serialization(e.to_string())
    }
}

/// Last known bind address of one server transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindAddrRecord {
    pub transport: String,
    pub addr: SocketAddr,
    pub recorded_at: DateTime<Utc>,
}

impl BindAddrRecord {
    pub fn new(transport: impl Into<String>, addr: SocketAddr) -> Self {
        Self {
            transport: transport.into(),
            addr,
            recorded_at: Utc::now(),
        }
    }

    /// State-file value: `<transport> <addr>:<port>`.
    pub fn state_line(&self) -> String {
        format!("{} {}", self.transport, self.addr)
    }
}

/// Trait for durable state backends.
///
/// Implementations must allow concurrent reads and serialize writes.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fetch the stored bind address for a transport.
    async fn get_bind_addr(&self, transport: &str) -> StateResult<Option<BindAddrRecord>>;

    /// Insert or replace the bind address for `record.transport`.
    async fn set_bind_addr(&self, record: BindAddrRecord) -> StateResult<()>;

    /// All stored records, ordered by transport name.
    async fn all(&self) -> StateResult<Vec<BindAddrRecord>>;
}
