//! Control events raised while driving managed proxies.
//!
//! Event names and their rendered control-port lines are consumed by
//! external controllers byte-for-byte, so the formatting lives here and
//! nowhere else.

use std::net::{IpAddr, SocketAddr};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use super::grammar::{KeyValue, LogSeverity};
use super::record::Role;

/// An event emitted on behalf of one managed proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlEvent {
    /// A transport was announced and is listening.
    TransportLaunched {
        proxy: String,
        transport: String,
        role: Role,
        address: IpAddr,
        port: u16,
    },
    /// The helper sent a `LOG` line.
    PtLog {
        proxy: String,
        severity: LogSeverity,
        message: String,
    },
    /// The helper sent a `STATUS` line.
    PtStatus {
        proxy: String,
        transport: String,
        pairs: Vec<KeyValue>,
    },
}

impl ControlEvent {
    pub fn transport_launched(
        proxy: &str,
        transport: &str,
        role: Role,
        addr: SocketAddr,
    ) -> Self {
        ControlEvent::TransportLaunched {
            proxy: proxy.to_string(),
            transport: transport.to_string(),
            role,
            address: addr.ip(),
            port: addr.port(),
        }
    }

    /// Literal event name.
    pub fn name(&self) -> &'static str {
        match self {
            ControlEvent::TransportLaunched { .. } => "TRANSPORT_LAUNCHED",
            ControlEvent::PtLog { .. } => "PT_LOG",
            ControlEvent::PtStatus { .. } => "PT_STATUS",
        }
    }

    /// Label of the proxy that raised the event.
    pub fn proxy(&self) -> &str {
        match self {
            ControlEvent::TransportLaunched { proxy, .. }
            | ControlEvent::PtLog { proxy, .. }
            | ControlEvent::PtStatus { proxy, .. } => proxy,
        }
    }

    /// Asynchronous control-port reply line, CRLF terminated.
    pub fn control_line(&self) -> String {
        format!("{}\r\n", self)
    }
}

impl std::fmt::Display for ControlEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlEvent::TransportLaunched {
                transport,
                role,
                address,
                port,
                ..
            } => write!(
                f,
                "650 TRANSPORT_LAUNCHED {} {} {} {}",
                role, transport, address, port
            ),
            ControlEvent::PtLog {
                proxy,
                severity,
                message,
            } => write!(
                f,
                "650 PT_LOG PT={} SEVERITY={} MESSAGE=\"{}\"",
                proxy, severity, message
            ),
            ControlEvent::PtStatus {
                proxy,
                transport,
                pairs,
            } => {
                write!(f, "650 PT_STATUS PT={} TRANSPORT={}", proxy, transport)?;
                for pair in pairs {
                    write!(f, " {}", pair)?;
                }
                Ok(())
            }
        }
    }
}

/// Destination for control events.
///
/// Implementations must be thread-safe; proxies may be driven from
/// different tasks.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &ControlEvent);
}

/// Sink that keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ControlEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything emitted so far.
    pub fn events(&self) -> Vec<ControlEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Remove and return everything emitted so far.
    pub fn drain(&self) -> Vec<ControlEvent> {
        std::mem::take(
            &mut *self
                .events
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: &ControlEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }
}

/// Sink that fans events out to any number of subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    sender: broadcast::Sender<ControlEvent>,
}

impl BroadcastSink {
    /// Create a sink buffering up to `capacity` events per lagging subscriber.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.sender.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn emit(&self, event: &ControlEvent) {
        if self.sender.send(event.clone()).is_err() {
            debug!("No listeners for {} event", event.name());
        }
    }
}
