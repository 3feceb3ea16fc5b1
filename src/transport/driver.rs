//! Feeds helper output into managed proxies.
//!
//! The driver is the only place where applying a line has side effects:
//! events go to the sink, helper log lines are relayed into `tracing`, and
//! a proxy that reaches `Configured` is finalized by persisting its bind
//! addresses.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error, info, trace, warn};

use super::error::{DriveError, ParseError};
use super::events::{ControlEvent, EventSink};
use super::grammar::LogSeverity;
use super::proxy::{LineOutcome, ManagedProxy, Phase};
use super::record::{Role, Transport};
use crate::state::{BindAddrRecord, StateResult, StateStore};

/// What a finalize attempt did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finalize {
    /// Still negotiating; nothing happened.
    NotYetConfigured,
    /// Transports were persisted and the proxy is now `Completed`.
    Completed,
    /// The proxy had already been finalized.
    AlreadyCompleted,
    /// The proxy is unusable.
    Broken,
}

#[derive(Clone)]
pub struct ProxyDriver {
    sink: Arc<dyn EventSink>,
    store: Arc<dyn StateStore>,
}

impl ProxyDriver {
    pub fn new(sink: Arc<dyn EventSink>, store: Arc<dyn StateStore>) -> Self {
        Self { sink, store }
    }

    /// Apply one line and finalize the proxy if it just became `Configured`.
    pub async fn handle_line(
        &self,
        proxy: &mut ManagedProxy,
        line: &str,
    ) -> StateResult<Phase> {
        let outcome = proxy.apply_line(line);
        self.dispatch(proxy, outcome, line).await
    }

    async fn dispatch(
        &self,
        proxy: &mut ManagedProxy,
        outcome: LineOutcome,
        line: &str,
    ) -> StateResult<Phase> {
        for event in &outcome.events {
            relay(event);
            self.sink.emit(event);
        }
        if let Some(notice) = &outcome.notice {
            warn!("Managed proxy \"{}\" {}", proxy.label(), notice);
        }
        if let Some(e) = &outcome.error {
            warn!(
                "Managed proxy \"{}\" is broken and will not be used: {}",
                proxy.label(),
                e
            );
        }
        if outcome.unrecognized {
            info!(
                "Unknown line received by managed proxy \"{}\" ({})",
                proxy.label(),
                line
            );
        }

        if proxy.phase() == Phase::Configured {
            self.configure(proxy).await?;
        }
        Ok(proxy.phase())
    }

    /// Finalize a `Configured` proxy. A no-op in every other phase.
    pub async fn configure(&self, proxy: &mut ManagedProxy) -> StateResult<Finalize> {
        match proxy.phase() {
            Phase::Infant | Phase::AcceptingMethods => Ok(Finalize::NotYetConfigured),
            Phase::Completed => Ok(Finalize::AlreadyCompleted),
            Phase::Broken => Ok(Finalize::Broken),
            Phase::Configured => {
                if proxy.role() == Role::Server {
                    for transport in proxy.transports() {
                        self.save_bind_addr(transport).await?;
                    }
                }
                proxy.complete();
                info!(
                    "Managed proxy \"{}\" configured with {} transport(s)",
                    proxy.label(),
                    proxy.transports().len()
                );
                Ok(Finalize::Completed)
            }
        }
    }

    /// Read lines until EOF, applying each in order.
    ///
    /// Lines that are not UTF-8 or exceed [`MAX_LINE_LEN`] break the proxy
    /// and reading continues, so later `LOG`/`STATUS` lines are still
    /// relayed. Only a failing reader ends the loop early.
    pub async fn drive<R>(
        &self,
        mut reader: R,
        proxy: &mut ManagedProxy,
    ) -> Result<Phase, DriveError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut buf = Vec::new();
        while let Some(truncated) = read_bounded_line(&mut reader, &mut buf).await? {
            if truncated {
                let outcome = proxy.reject_line(ParseError::malformed(
                    "helper output",
                    format!("line longer than {} bytes", MAX_LINE_LEN),
                ));
                self.dispatch(proxy, outcome, "<over-long line>").await?;
                continue;
            }

            let raw = strip_terminator(&buf);
            match std::str::from_utf8(raw) {
                Ok(line) => {
                    self.handle_line(proxy, line).await?;
                }
                Err(e) => {
                    let outcome = proxy
                        .reject_line(ParseError::malformed("helper output", e.to_string()));
                    self.dispatch(proxy, outcome, &String::from_utf8_lossy(raw))
                        .await?;
                }
            }
        }
        debug!(
            "Managed proxy \"{}\" closed its output while {}",
            proxy.label(),
            proxy.phase()
        );
        Ok(proxy.phase())
    }

    async fn save_bind_addr(&self, transport: &Transport) -> StateResult<()> {
        if let Some(existing) = self.store.get_bind_addr(transport.name()).await? {
            if existing.addr == transport.addr() {
                debug!(
                    "Transport {} already stored at {}",
                    transport.name(),
                    existing.addr
                );
                return Ok(());
            }
            info!(
                "Transport {} moved from {} to {}",
                transport.name(),
                existing.addr,
                transport.addr()
            );
        }
        self.store
            .set_bind_addr(BindAddrRecord::new(transport.name(), transport.addr()))
            .await
    }
}

/// Longest line accepted from a helper, terminator excluded.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Read one `\n`-terminated line into `buf`, keeping at most
/// [`MAX_LINE_LEN`] bytes of it.
///
/// Returns `None` at EOF, otherwise whether the line was cut short. The
/// rest of an over-long line is consumed and discarded.
async fn read_bounded_line<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<bool>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let mut truncated = false;
    let mut read_any = false;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(read_any.then_some(truncated));
        }
        read_any = true;

        let (chunk, done) = match available.iter().position(|&b| b == b'\n') {
            Some(i) => (&available[..i], true),
            None => (available, false),
        };
        let room = MAX_LINE_LEN.saturating_sub(buf.len());
        if chunk.len() > room {
            truncated = true;
        }
        buf.extend_from_slice(&chunk[..chunk.len().min(room)]);

        let used = if done { chunk.len() + 1 } else { chunk.len() };
        reader.consume(used);
        if done {
            return Ok(Some(truncated));
        }
    }
}

fn strip_terminator(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Mirror an event into our own log.
fn relay(event: &ControlEvent) {
    match event {
        ControlEvent::PtLog {
            proxy,
            severity,
            message,
        } => match severity {
            LogSeverity::Error => error!(proxy = %proxy, "{}", message),
            LogSeverity::Warning => warn!(proxy = %proxy, "{}", message),
            LogSeverity::Notice => info!(proxy = %proxy, "{}", message),
            LogSeverity::Info => debug!(proxy = %proxy, "{}", message),
            LogSeverity::Debug => trace!(proxy = %proxy, "{}", message),
        },
        ControlEvent::TransportLaunched {
            proxy,
            transport,
            role,
            address,
            port,
        } => info!(
            "Managed proxy \"{}\" launched {} transport {} on {}:{}",
            proxy, role, transport, address, port
        ),
        ControlEvent::PtStatus {
            proxy, transport, ..
        } => debug!("Managed proxy \"{}\" status for {}", proxy, transport),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::InMemoryStateStore;
    use crate::transport::events::CollectingSink;

    fn driver() -> (ProxyDriver, Arc<CollectingSink>, Arc<InMemoryStateStore>) {
        let sink = Arc::new(CollectingSink::new());
        let store = Arc::new(InMemoryStateStore::new());
        (ProxyDriver::new(sink.clone(), store.clone()), sink, store)
    }

    #[tokio::test]
    async fn test_configure_before_done_is_noop() {
        let (driver, _, store) = driver();
        let mut mp = ManagedProxy::with_label(Role::Server, "<testcase>");

        assert_eq!(driver.configure(&mut mp).await.unwrap(), Finalize::NotYetConfigured);
        driver.handle_line(&mut mp, "VERSION 1").await.unwrap();
        driver
            .handle_line(&mut mp, "SMETHOD mock1 127.0.0.1:5551")
            .await
            .unwrap();
        assert_eq!(driver.configure(&mut mp).await.unwrap(), Finalize::NotYetConfigured);
        assert_eq!(mp.phase(), Phase::AcceptingMethods);
        assert!(store.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_done_line_finalizes() {
        let (driver, sink, store) = driver();
        let mut mp = ManagedProxy::with_label(Role::Server, "<testcase>");

        driver.handle_line(&mut mp, "VERSION 1").await.unwrap();
        driver
            .handle_line(&mut mp, "SMETHOD mock1 127.0.0.1:5551")
            .await
            .unwrap();
        let phase = driver.handle_line(&mut mp, "SMETHODS DONE").await.unwrap();

        assert_eq!(phase, Phase::Completed);
        assert_eq!(sink.len(), 1);
        let record = store.get_bind_addr("mock1").await.unwrap().unwrap();
        assert_eq!(record.state_line(), "mock1 127.0.0.1:5551");
        assert_eq!(driver.configure(&mut mp).await.unwrap(), Finalize::AlreadyCompleted);
    }

    #[tokio::test]
    async fn test_unchanged_bind_addr_not_rewritten() {
        let (driver, _, store) = driver();
        let original = BindAddrRecord::new("mock1", "127.0.0.1:5551".parse().unwrap());
        store.set_bind_addr(original.clone()).await.unwrap();

        let mut mp = ManagedProxy::with_label(Role::Server, "<testcase>");
        for line in ["VERSION 1", "SMETHOD mock1 127.0.0.1:5551", "SMETHODS DONE"] {
            driver.handle_line(&mut mp, line).await.unwrap();
        }

        let stored = store.get_bind_addr("mock1").await.unwrap().unwrap();
        assert_eq!(stored.recorded_at, original.recorded_at);
    }

    #[tokio::test]
    async fn test_client_transports_not_persisted() {
        let (driver, sink, store) = driver();
        let mut mp = ManagedProxy::with_label(Role::Client, "<testcase>");
        for line in [
            "VERSION 1",
            "CMETHOD trebuchet socks5 127.0.0.1:1999",
            "CMETHODS DONE",
        ] {
            driver.handle_line(&mut mp, line).await.unwrap();
        }
        assert_eq!(mp.phase(), Phase::Completed);
        assert_eq!(
            sink.events()[0].control_line(),
            "650 TRANSPORT_LAUNCHED client trebuchet 127.0.0.1 1999\r\n"
        );
        assert!(store.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_broken_proxy_reports_broken() {
        let (driver, _, _) = driver();
        let mut mp = ManagedProxy::with_label(Role::Server, "<testcase>");
        driver.handle_line(&mut mp, "SMETHODS DONE").await.unwrap();
        assert_eq!(driver.configure(&mut mp).await.unwrap(), Finalize::Broken);
    }

    #[tokio::test]
    async fn test_drive_reads_until_eof() {
        let (driver, sink, _) = driver();
        let mut mp = ManagedProxy::with_label(Role::Client, "<testcase>");
        let input: &[u8] = b"VERSION 1\r\nCMETHOD a socks4 127.0.0.1:1000\nCMETHODS DONE\n\
                             LOG SEVERITY=debug MESSAGE=\"bye\"\n";

        let phase = driver.drive(input, &mut mp).await.unwrap();
        assert_eq!(phase, Phase::Completed);
        assert_eq!(sink.len(), 2);
    }

    #[tokio::test]
    async fn test_drive_invalid_utf8_breaks_proxy() {
        let (driver, sink, store) = driver();
        let mut mp = ManagedProxy::with_label(Role::Server, "<testcase>");
        let input: &[u8] = b"VERSION 1\nLOG SEVERITY=notice MESSAGE=\"caf\xe9\"\n\
                             SMETHOD a 127.0.0.1:1\nSMETHODS DONE\n\
                             LOG SEVERITY=notice MESSAGE=\"still here\"\n";

        let phase = driver.drive(input, &mut mp).await.unwrap();

        assert_eq!(phase, Phase::Broken);
        assert!(mp.transports().is_empty());
        assert!(store.all().await.unwrap().is_empty());
        assert_eq!(
            sink.events()
                .iter()
                .map(ControlEvent::control_line)
                .collect::<Vec<_>>(),
            vec!["650 PT_LOG PT=<testcase> SEVERITY=notice MESSAGE=\"still here\"\r\n"]
        );
    }

    #[tokio::test]
    async fn test_drive_over_long_line_breaks_proxy() {
        let (driver, sink, _) = driver();
        let mut mp = ManagedProxy::with_label(Role::Client, "<testcase>");

        let mut input = b"VERSION 1\n".to_vec();
        input.extend(std::iter::repeat(b'A').take(MAX_LINE_LEN + 10));
        input.extend_from_slice(b"\nLOG SEVERITY=warning MESSAGE=\"after\"\n");

        let phase = driver.drive(input.as_slice(), &mut mp).await.unwrap();

        assert_eq!(phase, Phase::Broken);
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.events()[0].proxy(), "<testcase>");
    }

    #[tokio::test]
    async fn test_drive_line_at_limit_is_accepted() {
        let (driver, _, _) = driver();
        let mut mp = ManagedProxy::with_label(Role::Client, "<testcase>");

        let mut input = b"VERSION 1\n".to_vec();
        input.extend(std::iter::repeat(b'X').take(MAX_LINE_LEN));
        input.push(b'\n');

        // An unknown keyword of exactly the maximum length is dropped, not fatal.
        let phase = driver.drive(input.as_slice(), &mut mp).await.unwrap();
        assert_eq!(phase, Phase::AcceptingMethods);
    }

    #[tokio::test]
    async fn test_drive_unterminated_last_line() {
        let (driver, _, _) = driver();
        let mut mp = ManagedProxy::with_label(Role::Client, "<testcase>");
        let input: &[u8] = b"VERSION 1\nCMETHODS DONE";
        assert_eq!(driver.drive(input, &mut mp).await.unwrap(), Phase::Completed);
    }

    mod log_relay {
        use super::*;
        use std::sync::Mutex;
        use tracing::field::{Field, Visit};
        use tracing::{Event, Level, Subscriber};
        use tracing_subscriber::layer::{Context, SubscriberExt};
        use tracing_subscriber::Layer;

        #[derive(Debug, Clone, PartialEq, Eq)]
        struct Captured {
            level: Level,
            proxy: Option<String>,
            message: String,
        }

        #[derive(Clone, Default)]
        struct CaptureLayer(Arc<Mutex<Vec<Captured>>>);

        #[derive(Default)]
        struct Fields {
            proxy: Option<String>,
            message: String,
        }

        impl Visit for Fields {
            fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
                match field.name() {
                    "proxy" => self.proxy = Some(format!("{:?}", value)),
                    "message" => self.message = format!("{:?}", value),
                    _ => {}
                }
            }
        }

        impl<S: Subscriber> Layer<S> for CaptureLayer {
            fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
                let mut fields = Fields::default();
                event.record(&mut fields);
                self.0.lock().unwrap().push(Captured {
                    level: *event.metadata().level(),
                    proxy: fields.proxy,
                    message: fields.message,
                });
            }
        }

        #[tokio::test]
        async fn test_log_severity_maps_to_level() {
            let layer = CaptureLayer::default();
            let subscriber = tracing_subscriber::registry().with(layer.clone());
            let _guard = tracing::subscriber::set_default(subscriber);

            let (driver, _, _) = driver();
            let mut mp = ManagedProxy::with_label(Role::Server, "<testcase>");
            for line in [
                "LOG SEVERITY=error MESSAGE=\"Oh noes, something bad happened. What do we do!?\"",
                "LOG SEVERITY=warning MESSAGE=\"warning msg\"",
                "LOG SEVERITY=notice MESSAGE=\"notice msg\"",
                "LOG SEVERITY=info MESSAGE=\"info msg\"",
                "LOG SEVERITY=debug MESSAGE=\"debug msg\"",
            ] {
                driver.handle_line(&mut mp, line).await.unwrap();
            }

            let relayed: Vec<Captured> = layer
                .0
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.proxy.is_some())
                .cloned()
                .collect();
            let expected = [
                (Level::ERROR, "Oh noes, something bad happened. What do we do!?"),
                (Level::WARN, "warning msg"),
                (Level::INFO, "notice msg"),
                (Level::DEBUG, "info msg"),
                (Level::TRACE, "debug msg"),
            ];
            assert_eq!(relayed.len(), expected.len());
            for (captured, (level, message)) in relayed.iter().zip(expected) {
                assert_eq!(captured.level, level);
                assert_eq!(captured.proxy.as_deref(), Some("<testcase>"));
                assert_eq!(captured.message, message);
            }
        }
    }
}
