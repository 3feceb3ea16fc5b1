//! Durable state for managed proxies.
//!
//! Provides bind-address persistence with pluggable backends:
//! - In-memory (tests, dry runs)
//! - JSON file (survives restarts)

mod backend;
mod file;
mod memory;

pub use backend::{BindAddrRecord, StateError, StateResult, StateStore};
pub use file::FileStateStore;
pub use memory::InMemoryStateStore;
