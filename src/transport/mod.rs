//! Pluggable-transport managed proxies.
//!
//! A managed proxy is an external helper that speaks the line-oriented PT
//! control protocol on its stdout. This module parses that protocol,
//! tracks each helper's negotiation state, and turns what it announces
//! into control events, durable state, and descriptor lines.
//!
//! # Protocol
//!
//! ```text
//! VERSION 1
//! SMETHOD obfs4 0.0.0.0:4000 ARGS:cert=...
//! SMETHODS DONE
//! LOG SEVERITY=notice MESSAGE="listening"
//! STATUS TRANSPORT=obfs4 CONNECT=Success
//! ```

mod driver;
mod env;
mod error;
mod events;
mod extra_info;
mod grammar;
mod options;
mod proxy;
mod record;
mod registry;

pub use driver::{Finalize, ProxyDriver, MAX_LINE_LEN};
pub use env::{pt_environment, HelperContext};
pub use error::{DriveError, ParseError, ProtocolError, ProtocolResult};
pub use events::{BroadcastSink, CollectingSink, ControlEvent, EventSink};
pub use extra_info::extra_info_descriptor;
pub use grammar::{
    is_c_identifier, parse_cmethod, parse_key_values, parse_line, parse_log, parse_smethod,
    parse_status, parse_version, KeyValue, LogSeverity, Message, SUPPORTED_VERSION,
};
pub use options::{escape_pt_arg, options_for_server_proxy, ServerTransportOptions};
pub use proxy::{LineOutcome, ManagedProxy, Phase, ProxySnapshot};
pub use record::{Role, SocksVersion, Transport};
pub use registry::{ProxyId, ProxyRegistry};
