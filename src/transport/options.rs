//! Per-transport server options handed to server-side helpers.

use serde::{Deserialize, Serialize};

/// Ordered table of `<transport> <key>=<value> ...` lines.
///
/// A transport may appear on several lines; all of them count, in table order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerTransportOptions {
    lines: Vec<String>,
}

impl ServerTransportOptions {
    pub fn new(lines: Vec<String>) -> Self {
        Self { lines }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// `(transport name, raw line)` pairs in table order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.lines.iter().filter_map(|line| {
            line.split_whitespace()
                .next()
                .map(|name| (name, line.as_str()))
        })
    }

    /// Option tokens configured for `transport`, in table then line order.
    pub fn options_for<'a>(&'a self, transport: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries()
            .filter(move |(name, _)| *name == transport)
            .flat_map(|(_, line)| line.split_whitespace().skip(1))
    }

    /// Check every line is a transport name followed by `key=value` tokens.
    pub fn validate(&self) -> Result<(), String> {
        for line in &self.lines {
            let mut tokens = line.split_whitespace();
            let Some(name) = tokens.next() else {
                return Err("empty server transport options line".to_string());
            };
            let mut count = 0;
            for token in tokens {
                match token.split_once('=') {
                    Some((key, _)) if !key.is_empty() => count += 1,
                    _ => {
                        return Err(format!(
                            "option '{}' for transport {} is not key=value",
                            token, name
                        ))
                    }
                }
            }
            if count == 0 {
                return Err(format!("no options given for transport {}", name));
            }
        }
        Ok(())
    }
}

impl From<Vec<String>> for ServerTransportOptions {
    fn from(lines: Vec<String>) -> Self {
        Self::new(lines)
    }
}

/// Build the `name:key=value;...` string for one server proxy.
///
/// Walks `requested` in order and, for each, every matching table line.
/// Returns `None` when nothing matches.
pub fn options_for_server_proxy(
    requested: &[String],
    table: &ServerTransportOptions,
) -> Option<String> {
    let segments: Vec<String> = requested
        .iter()
        .flat_map(|name| {
            table
                .options_for(name)
                .map(move |option| format!("{}:{}", name, escape_pt_arg(option, &[';'])))
        })
        .collect();

    if segments.is_empty() {
        None
    } else {
        Some(segments.join(";"))
    }
}

/// Backslash-escape `special` characters and backslashes.
pub fn escape_pt_arg(value: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '\\' || special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
