//! Shared helper functions for CLI commands.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use ptmanager::config::Config;
use ptmanager::privacy::upstream_proxy_uri;
use ptmanager::state::{FileStateStore, InMemoryStateStore, StateStore};
use ptmanager::transport::{ManagedProxy, Role};

/// Load the config file if one was given, otherwise defaults plus env overrides.
pub async fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => {
            debug!("Loading config from {}", path.display());
            Ok(Config::load(path).await?)
        }
        None => {
            let config = Config::default().with_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }
}

/// File-backed store at `path`, or an empty in-memory store.
pub async fn open_store(path: Option<&Path>) -> anyhow::Result<Arc<dyn StateStore>> {
    let store: Arc<dyn StateStore> = match path {
        Some(path) => Arc::new(FileStateStore::open(path).await?),
        None => Arc::new(InMemoryStateStore::new()),
    };
    Ok(store)
}

/// A proxy labelled `label`, asked for `transports` and wired to the
/// configured upstream.
pub fn build_proxy(config: &Config, role: Role, label: &str, transports: &[String]) -> ManagedProxy {
    let mut proxy = ManagedProxy::with_label(role, label);
    for transport in transports {
        proxy.request_transport(transport.as_str());
    }
    if role == Role::Client {
        proxy.set_upstream_proxy(upstream_proxy_uri(&config.upstream));
    }
    proxy
}
