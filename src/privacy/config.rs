//! Outbound proxy configuration.

use serde::{Deserialize, Serialize};
use std::env;

/// Kind of upstream proxy the node itself connects through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamKind {
    Socks4,
    Socks5,
    Https,
}

impl UpstreamKind {
    /// URI scheme handed to helpers.
    pub fn scheme(&self) -> &'static str {
        match self {
            UpstreamKind::Socks4 => "socks4a",
            UpstreamKind::Socks5 => "socks5",
            UpstreamKind::Https => "http",
        }
    }
}

impl std::fmt::Display for UpstreamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamKind::Socks4 => write!(f, "socks4"),
            UpstreamKind::Socks5 => write!(f, "socks5"),
            UpstreamKind::Https => write!(f, "https"),
        }
    }
}

/// The node's own outbound proxy.
///
/// At most one kind may be configured. Endpoints are `addr:port`, with IPv6
/// addresses in brackets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamProxyConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socks4_proxy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socks5_proxy: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socks5_username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socks5_password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_proxy: Option<String>,

    /// `user:password` sent to the HTTPS proxy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub https_authenticator: Option<String>,
}

impl UpstreamProxyConfig {
    /// Check if no upstream is configured.
    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }

    /// Apply environment variable overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(proxy) = non_empty_var("PTMANAGER_SOCKS4_PROXY") {
            self.socks4_proxy = Some(proxy);
        }
        if let Some(proxy) = non_empty_var("PTMANAGER_SOCKS5_PROXY") {
            self.socks5_proxy = Some(proxy);
        }
        if let Some(proxy) = non_empty_var("PTMANAGER_HTTPS_PROXY") {
            self.https_proxy = Some(proxy);
        }
        self
    }

    /// First configured kind, checking SOCKS4, SOCKS5, then HTTPS.
    pub fn kind(&self) -> Option<UpstreamKind> {
        if self.socks4_proxy.is_some() {
            Some(UpstreamKind::Socks4)
        } else if self.socks5_proxy.is_some() {
            Some(UpstreamKind::Socks5)
        } else if self.https_proxy.is_some() {
            Some(UpstreamKind::Https)
        } else {
            None
        }
    }

    /// Validate the configuration, returning an error if invalid.
    pub fn validate(&self) -> Result<(), String> {
        let configured: Vec<String> = [
            (UpstreamKind::Socks4, &self.socks4_proxy),
            (UpstreamKind::Socks5, &self.socks5_proxy),
            (UpstreamKind::Https, &self.https_proxy),
        ]
        .into_iter()
        .filter_map(|(kind, endpoint)| endpoint.as_ref().map(|_| kind.to_string()))
        .collect();

        if configured.len() > 1 {
            return Err(format!(
                "only one upstream proxy may be configured, found: {}",
                configured.join(", ")
            ));
        }

        for endpoint in [&self.socks4_proxy, &self.socks5_proxy, &self.https_proxy]
            .into_iter()
            .flatten()
        {
            if split_endpoint(endpoint).is_none() {
                return Err(format!(
                    "upstream proxy '{}' is not of the form addr:port",
                    endpoint
                ));
            }
        }

        match (&self.socks5_username, &self.socks5_password) {
            (Some(_), None) => {
                return Err("socks5_username is set but socks5_password is missing".to_string())
            }
            (None, Some(_)) => {
                return Err("socks5_password is set but socks5_username is missing".to_string())
            }
            _ => {}
        }

        if matches!(self.https_authenticator.as_deref(), Some("")) {
            return Err("https_authenticator must not be empty".to_string());
        }

        Ok(())
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// Split `addr:port`, keeping IPv6 brackets on the address.
pub(crate) fn split_endpoint(endpoint: &str) -> Option<(&str, u16)> {
    let (host, port) = endpoint.rsplit_once(':')?;
    let port = port.parse().ok()?;
    if host.is_empty() {
        return None;
    }
    if host.starts_with('[') {
        if !host.ends_with(']') || host.len() < 3 {
            return None;
        }
    } else if host.contains(':') {
        // Unbracketed IPv6.
        return None;
    }
    Some((host, port))
}
