//! In-memory state store.
//!
//! State is not persisted across restarts; used by tests and dry runs.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::backend::{BindAddrRecord, StateResult, StateStore};

#[derive(Debug, Clone, Default)]
pub struct InMemoryStateStore {
    records: Arc<RwLock<BTreeMap<String, BindAddrRecord>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get_bind_addr(&self, transport: &str) -> StateResult<Option<BindAddrRecord>> {
        Ok(self.records.read().await.get(transport).cloned())
    }

    async fn set_bind_addr(&self, record: BindAddrRecord) -> StateResult<()> {
        let mut records = self.records.write().await;
        records.insert(record.transport.clone(), record);
        Ok(())
    }

    async fn all(&self) -> StateResult<Vec<BindAddrRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}
