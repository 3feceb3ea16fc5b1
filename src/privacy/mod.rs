//! Outbound proxy the node itself connects through.
//!
//! Client helpers are told about it in `TOR_PT_PROXY` so their own
//! connections go through the same upstream.
//!
//! # Configuration
//!
//! ```toml
//! [upstream]
//! socks5_proxy = "192.0.2.1:1080"
//! socks5_username = "hwest"
//! socks5_password = "r34n1m470r"
//! ```
//!
//! Environment overrides: `PTMANAGER_SOCKS4_PROXY`, `PTMANAGER_SOCKS5_PROXY`,
//! `PTMANAGER_HTTPS_PROXY`.

mod config;
mod uri;

pub use config::{UpstreamKind, UpstreamProxyConfig};
pub use uri::upstream_proxy_uri;
