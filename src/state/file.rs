//! JSON-file state store.
//!
//! The whole file is rewritten on every change through a temporary file
//! in the same directory, so a crash never leaves a half-written state.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{BindAddrRecord, StateResult, StateStore};

/// On-disk layout.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    transport_proxies: Vec<BindAddrRecord>,
}

pub struct FileStateStore {
    path: PathBuf,
    records: RwLock<BTreeMap<String, BindAddrRecord>>,
}

impl FileStateStore {
    /// Open the state file at `path`, starting empty if it does not exist.
    pub async fn open(path: impl Into<PathBuf>) -> StateResult<Self> {
        let path = path.into();
        let records = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let file: StateFile = serde_json::from_str(&contents)?;
                file.transport_proxies
                    .into_iter()
                    .map(|r| (r.transport.clone(), r))
                    .collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No state file at {}, starting empty", path.display());
                BTreeMap::new()
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    /// Default location: `<data dir>/ptmanager/state.json`.
    pub fn default_path() -> PathBuf {
        dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ptmanager")
            .join("state.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Replace `path` with `contents` through a temporary file in the same
/// directory. Blocking.
fn write_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn get_bind_addr(&self, transport: &str) -> StateResult<Option<BindAddrRecord>> {
        Ok(self.records.read().await.get(transport).cloned())
    }

    async fn set_bind_addr(&self, record: BindAddrRecord) -> StateResult<()> {
        let mut records = self.records.write().await;

        // The cache only changes once the new file is in place.
        let mut updated = records.clone();
        updated.insert(record.transport.clone(), record);
        let file = StateFile {
            transport_proxies: updated.values().cloned().collect(),
        };
        let contents = serde_json::to_vec_pretty(&file)?;

        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_file(&path, &contents))
            .await
            .map_err(std::io::Error::other)??;

        *records = updated;
        Ok(())
    }

    async fn all(&self) -> StateResult<Vec<BindAddrRecord>> {
        Ok(self.records.read().await.values().cloned().collect())
    }
}
