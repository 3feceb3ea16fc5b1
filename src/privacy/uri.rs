//! Upstream proxy URI handed to client helpers as `TOR_PT_PROXY`.

use super::config::{UpstreamKind, UpstreamProxyConfig};

/// Build `<scheme>://[<user>:<password>@]<address>:<port>`.
///
/// Credentials and addresses are inserted verbatim. Returns `None` when no
/// upstream is configured.
pub fn upstream_proxy_uri(config: &UpstreamProxyConfig) -> Option<String> {
    let kind = config.kind()?;
    let (endpoint, credentials) = match kind {
        UpstreamKind::Socks4 => (config.socks4_proxy.as_deref()?, None),
        UpstreamKind::Socks5 => (
            config.socks5_proxy.as_deref()?,
            config
                .socks5_username
                .as_deref()
                .map(|user| format!("{}:{}", user, config.socks5_password.as_deref().unwrap_or(""))),
        ),
        UpstreamKind::Https => (
            config.https_proxy.as_deref()?,
            config.https_authenticator.clone(),
        ),
    };

    Some(match credentials {
        Some(credentials) => format!("{}://{}@{}", kind.scheme(), credentials, endpoint),
        None => format!("{}://{}", kind.scheme(), endpoint),
    })
}
