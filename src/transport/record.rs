//! Transport endpoints announced by managed proxies.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Which side of the network a managed proxy serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Client-side helper, announces `CMETHOD` lines.
    Client,
    /// Server-side helper, announces `SMETHOD` lines.
    Server,
}

impl Role {
    /// Keyword prefix used by this role's method lines (`CMETHOD` / `SMETHOD`).
    pub fn method_keyword(&self) -> &'static str {
        match self {
            Role::Client => "CMETHOD",
            Role::Server => "SMETHOD",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Client => write!(f, "client"),
            Role::Server => write!(f, "server"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "client" => Ok(Role::Client),
            "server" => Ok(Role::Server),
            other => Err(format!("unknown proxy role: {}", other)),
        }
    }
}

/// SOCKS flavour a client transport listens with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocksVersion {
    Socks4,
    Socks5,
}

impl SocksVersion {
    /// Parse the SOCKS kind keyword used on `CMETHOD` lines.
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "socks4" => Some(SocksVersion::Socks4),
            "socks5" => Some(SocksVersion::Socks5),
            _ => None,
        }
    }
}

impl std::fmt::Display for SocksVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SocksVersion::Socks4 => write!(f, "socks4"),
            SocksVersion::Socks5 => write!(f, "socks5"),
        }
    }
}

/// One endpoint announced by a managed proxy.
///
/// Client records always carry a SOCKS version; server records never do.
/// The constructors are the only way to build one, which keeps that
/// pairing intact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transport {
    name: String,
    addr: SocketAddr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    socks_version: Option<SocksVersion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    extra_info_args: Option<String>,
}

impl Transport {
    /// Record for a `CMETHOD` announcement.
    pub fn client(name: impl Into<String>, socks_version: SocksVersion, addr: SocketAddr) -> Self {
        Self {
            name: name.into(),
            addr,
            socks_version: Some(socks_version),
            extra_info_args: None,
        }
    }

    /// Record for an `SMETHOD` announcement.
    pub fn server(name: impl Into<String>, addr: SocketAddr, args: Option<String>) -> Self {
        Self {
            name: name.into(),
            addr,
            socks_version: None,
            extra_info_args: args,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn socks_version(&self) -> Option<SocksVersion> {
        self.socks_version
    }

    pub fn extra_info_args(&self) -> Option<&str> {
        self.extra_info_args.as_deref()
    }

    pub fn role(&self) -> Role {
        if self.socks_version.is_some() {
            Role::Client
        } else {
            Role::Server
        }
    }
}
