//! Commands that print what a helper would be handed.

use std::path::Path;

use ptmanager::config::Config;
use ptmanager::privacy::upstream_proxy_uri;
use ptmanager::transport::{options_for_server_proxy, pt_environment, Role};

use crate::cli::helpers::{build_proxy, open_store};

/// Print the `TOR_PT_SERVER_TRANSPORT_OPTIONS` value, or nothing.
pub fn cmd_options(config: &Config, transports: &[String]) -> anyhow::Result<()> {
    if let Some(options) =
        options_for_server_proxy(transports, &config.server_transport_options)
    {
        println!("{}", options);
    }
    Ok(())
}

/// Print the `TOR_PT_PROXY` value, or nothing.
pub fn cmd_proxy_uri(config: &Config) -> anyhow::Result<()> {
    if let Some(uri) = upstream_proxy_uri(&config.upstream) {
        println!("{}", uri);
    }
    Ok(())
}

pub async fn cmd_env(
    config: &Config,
    role: Role,
    transports: &[String],
    state: Option<&Path>,
) -> anyhow::Result<()> {
    let state_path = state
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.state_file_path());
    let store = open_store(Some(&state_path)).await?;

    let label = transports
        .first()
        .and_then(|t| config.plugin_for(role, t))
        .and_then(|p| p.exec.first())
        .map(String::as_str)
        .unwrap_or("ptctl");
    let proxy = build_proxy(config, role, label, transports);

    let env = pt_environment(
        &proxy,
        &config.helper_context(),
        store.as_ref(),
        &config.server_transport_options,
    )
    .await?;
    for (key, value) in env {
        println!("{}={}", key, value);
    }
    Ok(())
}
