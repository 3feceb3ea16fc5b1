//! Environment handed to a managed proxy helper at launch.

use std::path::PathBuf;

use super::options::{options_for_server_proxy, ServerTransportOptions};
use super::proxy::ManagedProxy;
use super::record::Role;
use crate::state::{StateResult, StateStore};

/// Node-wide settings every helper sees.
#[derive(Debug, Clone, Default)]
pub struct HelperContext {
    pub state_dir: PathBuf,
    pub or_port: Option<String>,
    pub ext_or_port: Option<String>,
}

/// Ordered `(name, value)` pairs for the helper's environment.
pub async fn pt_environment(
    proxy: &ManagedProxy,
    ctx: &HelperContext,
    store: &dyn StateStore,
    options: &ServerTransportOptions,
) -> StateResult<Vec<(String, String)>> {
    let mut env = vec![
        ("TOR_PT_MANAGED_TRANSPORT_VER".to_string(), "1".to_string()),
        (
            "TOR_PT_STATE_LOCATION".to_string(),
            ctx.state_dir.display().to_string(),
        ),
        ("TOR_PT_EXIT_ON_STDIN_CLOSE".to_string(), "1".to_string()),
    ];

    let transports = proxy.requested().join(",");

    match proxy.role() {
        Role::Server => {
            env.push(("TOR_PT_SERVER_TRANSPORTS".to_string(), transports));
            env.push((
                "TOR_PT_ORPORT".to_string(),
                ctx.or_port.clone().unwrap_or_default(),
            ));
            env.push((
                "TOR_PT_EXTENDED_SERVER_PORT".to_string(),
                ctx.ext_or_port.clone().unwrap_or_default(),
            ));

            let mut bind_addrs = Vec::new();
            for name in proxy.requested() {
                if let Some(record) = store.get_bind_addr(name).await? {
                    bind_addrs.push(format!("{}-{}", name, record.addr));
                }
            }
            if !bind_addrs.is_empty() {
                env.push(("TOR_PT_SERVER_BINDADDR".to_string(), bind_addrs.join(",")));
            }

            if let Some(opts) = options_for_server_proxy(proxy.requested(), options) {
                env.push(("TOR_PT_SERVER_TRANSPORT_OPTIONS".to_string(), opts));
            }
        }
        Role::Client => {
            env.push(("TOR_PT_CLIENT_TRANSPORTS".to_string(), transports));
            if let Some(uri) = proxy.upstream_proxy() {
                env.push(("TOR_PT_PROXY".to_string(), uri.to_string()));
            }
        }
    }

    Ok(env)
}
