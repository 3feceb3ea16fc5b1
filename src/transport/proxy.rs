//! Managed proxy state machine.
//!
//! A [`ManagedProxy`] owns everything known about one helper process: its
//! role, its negotiation phase, and the transports it announced. Lines are
//! applied strictly in arrival order through [`ManagedProxy::apply_line`],
//! which performs no I/O. Persistence and event delivery are left to the
//! driver.

use serde::{Deserialize, Serialize};

use super::error::{ParseError, ProtocolError, ProtocolResult};
use super::events::ControlEvent;
use super::grammar::{parse_line, Message};
use super::record::{Role, Transport};

/// Negotiation phase of a managed proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Launched, waiting for `VERSION`.
    Infant,
    /// Version agreed, collecting method lines.
    AcceptingMethods,
    /// `*METHODS DONE` seen, waiting to be finalized.
    Configured,
    /// Finalized; transports are registered and persisted.
    Completed,
    /// Protocol violation. Terminal.
    Broken,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Infant => write!(f, "infant"),
            Phase::AcceptingMethods => write!(f, "accepting methods"),
            Phase::Configured => write!(f, "configured"),
            Phase::Completed => write!(f, "completed"),
            Phase::Broken => write!(f, "broken"),
        }
    }
}

/// Result of applying one line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineOutcome {
    /// Phase after the line was applied.
    pub phase: Phase,
    /// Events raised by the line, in order.
    pub events: Vec<ControlEvent>,
    /// Set when this line broke the proxy. Reported once.
    pub error: Option<ProtocolError>,
    /// Non-fatal complaint from the helper (a `*METHOD-ERROR` line).
    pub notice: Option<String>,
    /// The line had no known keyword and was dropped.
    pub unrecognized: bool,
}

/// Serializable view of a managed proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySnapshot {
    pub label: String,
    pub role: Role,
    pub phase: Phase,
    pub requested: Vec<String>,
    pub transports: Vec<Transport>,
    pub proxy_supported: bool,
}

/// One external pluggable-transport helper.
#[derive(Debug, Clone)]
pub struct ManagedProxy {
    role: Role,
    argv: Vec<String>,
    label: String,
    phase: Phase,
    transports: Vec<Transport>,
    requested: Vec<String>,
    upstream_proxy: Option<String>,
    proxy_supported: bool,
}

impl ManagedProxy {
    /// Create a proxy for a helper launched with `argv`.
    ///
    /// The first argument doubles as the label attached to events.
    pub fn new(role: Role, argv: Vec<String>) -> Self {
        let label = argv
            .first()
            .cloned()
            .unwrap_or_else(|| "<unnamed>".to_string());
        Self {
            role,
            argv,
            label,
            phase: Phase::Infant,
            transports: Vec::new(),
            requested: Vec::new(),
            upstream_proxy: None,
            proxy_supported: false,
        }
    }

    /// Create a proxy whose only identity is a label.
    pub fn with_label(role: Role, label: impl Into<String>) -> Self {
        Self::new(role, vec![label.into()])
    }

    /// Ask this helper to provide `name`. Returns false if already requested.
    pub fn request_transport(&mut self, name: impl Into<String>) -> bool {
        let name = name.into();
        if self.requested.contains(&name) {
            return false;
        }
        self.requested.push(name);
        true
    }

    /// Upstream proxy URI handed to the helper, enabling `PROXY DONE`.
    pub fn set_upstream_proxy(&mut self, uri: Option<String>) {
        self.upstream_proxy = uri;
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn transports(&self) -> &[Transport] {
        &self.transports
    }

    pub fn requested(&self) -> &[String] {
        &self.requested
    }

    pub fn upstream_proxy(&self) -> Option<&str> {
        self.upstream_proxy.as_deref()
    }

    pub fn proxy_supported(&self) -> bool {
        self.proxy_supported
    }

    pub fn is_broken(&self) -> bool {
        self.phase == Phase::Broken
    }

    pub fn snapshot(&self) -> ProxySnapshot {
        ProxySnapshot {
            label: self.label.clone(),
            role: self.role,
            phase: self.phase,
            requested: self.requested.clone(),
            transports: self.transports.clone(),
            proxy_supported: self.proxy_supported,
        }
    }

    /// Forget announced transports and start negotiating from scratch.
    /// Used when the helper is restarted.
    pub fn reset(&mut self) {
        self.phase = Phase::Infant;
        self.transports.clear();
        self.proxy_supported = false;
    }

    /// Move a `Configured` proxy to `Completed`.
    ///
    /// Returns false (and changes nothing) in any other phase. The driver
    /// calls this after the announced transports have been persisted.
    pub fn complete(&mut self) -> bool {
        if self.phase != Phase::Configured {
            return false;
        }
        self.phase = Phase::Completed;
        true
    }

    /// Parse and apply one line from the helper's stdout.
    pub fn apply_line(&mut self, line: &str) -> LineOutcome {
        match parse_line(line) {
            Ok(message) => self.apply(message),
            Err(e) => self.reject_line(e),
        }
    }

    /// Treat a line that could not be parsed as a protocol violation.
    ///
    /// Also used for input that never became a line of text, such as
    /// invalid UTF-8 or an over-long line.
    pub fn reject_line(&mut self, error: ParseError) -> LineOutcome {
        let error = if self.phase == Phase::Broken {
            None
        } else {
            self.phase = Phase::Broken;
            Some(ProtocolError::Parse(error))
        };
        LineOutcome {
            phase: self.phase,
            events: Vec::new(),
            error,
            notice: None,
            unrecognized: false,
        }
    }

    /// Apply an already parsed message.
    pub fn apply(&mut self, message: Message) -> LineOutcome {
        let mut outcome = LineOutcome {
            phase: self.phase,
            events: Vec::new(),
            error: None,
            notice: None,
            unrecognized: matches!(message, Message::Unrecognized),
        };

        if self.phase == Phase::Broken && !message.is_ungated() {
            return outcome;
        }

        if let Err(e) = self.transition(message, &mut outcome) {
            self.phase = Phase::Broken;
            outcome.error = Some(e);
        }
        outcome.phase = self.phase;
        outcome
    }

    fn transition(&mut self, message: Message, outcome: &mut LineOutcome) -> ProtocolResult<()> {
        let kind = message.kind();
        match message {
            Message::Log { severity, message } => {
                outcome.events.push(ControlEvent::PtLog {
                    proxy: self.label.clone(),
                    severity,
                    message,
                });
                Ok(())
            }
            Message::Status { transport, pairs } => {
                outcome.events.push(ControlEvent::PtStatus {
                    proxy: self.label.clone(),
                    transport,
                    pairs,
                });
                Ok(())
            }
            Message::Unrecognized => Ok(()),
            Message::EnvError(message)
            | Message::VersionError(message)
            | Message::ProxyError(message) => Err(ProtocolError::HelperReported { kind, message }),
            Message::Version(_) => {
                if self.phase != Phase::Infant {
                    return Err(ProtocolError::UnexpectedMessage {
                        kind,
                        phase: self.phase,
                    });
                }
                self.phase = Phase::AcceptingMethods;
                Ok(())
            }
            _ if self.phase != Phase::AcceptingMethods => Err(ProtocolError::UnexpectedMessage {
                kind,
                phase: self.phase,
            }),
            Message::ClientMethod {
                name,
                socks_version,
                addr,
            } => {
                self.expect_role(Role::Client, kind)?;
                self.register(Transport::client(name, socks_version, addr), outcome)
            }
            Message::ServerMethod { name, addr, args } => {
                self.expect_role(Role::Server, kind)?;
                self.register(Transport::server(name, addr, args), outcome)
            }
            Message::MethodError {
                role,
                name,
                message,
            } => {
                self.expect_role(role, kind)?;
                outcome.notice = Some(format!("could not launch transport {}: {}", name, message));
                Ok(())
            }
            Message::MethodsDone(role) => {
                self.expect_role(role, kind)?;
                self.phase = Phase::Configured;
                Ok(())
            }
            Message::ProxyDone => {
                if self.upstream_proxy.is_none() {
                    return Err(ProtocolError::ProxyNotRequested);
                }
                self.proxy_supported = true;
                Ok(())
            }
        }
    }

    fn expect_role(&self, role: Role, kind: &'static str) -> ProtocolResult<()> {
        if self.role == role {
            Ok(())
        } else {
            Err(ProtocolError::RoleMismatch {
                kind,
                role: self.role,
            })
        }
    }

    fn register(&mut self, transport: Transport, outcome: &mut LineOutcome) -> ProtocolResult<()> {
        if self.transports.iter().any(|t| t.name() == transport.name()) {
            return Err(ProtocolError::DuplicateTransport(
                transport.name().to_string(),
            ));
        }
        outcome.events.push(ControlEvent::transport_launched(
            &self.label,
            transport.name(),
            self.role,
            transport.addr(),
        ));
        self.transports.push(transport);
        Ok(())
    }
}
