//! `transport` lines for the extra-info descriptor.

use std::fmt::Write;

use super::proxy::{ManagedProxy, Phase};
use super::record::Role;

/// Build the descriptor text advertising server transports.
///
/// Only `Completed` server proxies contribute, one line per transport in
/// proxy order then announcement order. Returns `None` when no line
/// would be produced.
pub fn extra_info_descriptor<'a, I>(proxies: I) -> Option<String>
where
    I: IntoIterator<Item = &'a ManagedProxy>,
{
    let mut out = String::new();

    for proxy in proxies {
        if proxy.role() != Role::Server || proxy.phase() != Phase::Completed {
            continue;
        }
        for transport in proxy.transports() {
            // Writing into a String cannot fail.
            let _ = write!(out, "transport {} {}", transport.name(), transport.addr());
            if let Some(args) = transport.extra_info_args() {
                let _ = write!(out, " {}", args);
            }
            out.push('\n');
        }
    }

    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}
