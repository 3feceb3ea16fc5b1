//! Line grammar of the managed-proxy control protocol.
//!
//! Every function here is pure: a line goes in, a [`Message`] or a
//! [`ParseError`] comes out. Lines whose leading keyword is unknown parse
//! successfully as [`Message::Unrecognized`] so the caller can drop them
//! without treating them as a protocol error.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use super::error::ParseError;
use super::record::{Role, SocksVersion};

/// The only managed-proxy protocol version we speak.
pub const SUPPORTED_VERSION: u32 = 1;

const ARGS_PREFIX: &str = "ARGS:";

/// Severity of a `LOG` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSeverity {
    Error,
    Warning,
    Notice,
    Info,
    Debug,
}

impl LogSeverity {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "error" => Some(LogSeverity::Error),
            "warning" => Some(LogSeverity::Warning),
            "notice" => Some(LogSeverity::Notice),
            "info" => Some(LogSeverity::Info),
            "debug" => Some(LogSeverity::Debug),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LogSeverity::Error => "error",
            LogSeverity::Warning => "warning",
            LogSeverity::Notice => "notice",
            LogSeverity::Info => "info",
            LogSeverity::Debug => "debug",
        }
    }
}

impl std::fmt::Display for LogSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `key=value` pair from a `LOG` or `STATUS` line.
///
/// Quoted values keep their content exactly as sent, escapes included,
/// and remember that they were quoted so they can be re-emitted the same way.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub quoted: bool,
}

impl KeyValue {
    pub fn bare(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            quoted: false,
        }
    }

    pub fn quoted(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            quoted: true,
        }
    }
}

impl std::fmt::Display for KeyValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.quoted {
            write!(f, "{}=\"{}\"", self.key, self.value)
        } else {
            write!(f, "{}={}", self.key, self.value)
        }
    }
}

/// One parsed protocol line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(u32),
    VersionError(String),
    EnvError(String),
    ClientMethod {
        name: String,
        socks_version: SocksVersion,
        addr: SocketAddr,
    },
    ServerMethod {
        name: String,
        addr: SocketAddr,
        args: Option<String>,
    },
    MethodError {
        role: Role,
        name: String,
        message: String,
    },
    MethodsDone(Role),
    ProxyDone,
    ProxyError(String),
    Log {
        severity: LogSeverity,
        message: String,
    },
    Status {
        transport: String,
        pairs: Vec<KeyValue>,
    },
    Unrecognized,
}

impl Message {
    /// Protocol keyword this message was parsed from.
    pub fn kind(&self) -> &'static str {
        match self {
            Message::Version(_) => "VERSION",
            Message::VersionError(_) => "VERSION-ERROR",
            Message::EnvError(_) => "ENV-ERROR",
            Message::ClientMethod { .. } => "CMETHOD",
            Message::ServerMethod { .. } => "SMETHOD",
            Message::MethodError {
                role: Role::Client,
                ..
            } => "CMETHOD-ERROR",
            Message::MethodError {
                role: Role::Server,
                ..
            } => "SMETHOD-ERROR",
            Message::MethodsDone(Role::Client) => "CMETHODS DONE",
            Message::MethodsDone(Role::Server) => "SMETHODS DONE",
            Message::ProxyDone => "PROXY DONE",
            Message::ProxyError(_) => "PROXY-ERROR",
            Message::Log { .. } => "LOG",
            Message::Status { .. } => "STATUS",
            Message::Unrecognized => "unrecognized",
        }
    }

    /// `LOG` and `STATUS` are accepted regardless of negotiation phase.
    pub fn is_ungated(&self) -> bool {
        matches!(self, Message::Log { .. } | Message::Status { .. })
    }
}

/// Parse one line (without its terminator).
///
/// The keyword must start the line; leading whitespace makes it unknown.
pub fn parse_line(line: &str) -> Result<Message, ParseError> {
    let line = line.trim_end();
    let (keyword, rest) = match line.split_once(char::is_whitespace) {
        Some((keyword, rest)) => (keyword, rest.trim_start()),
        None => (line, ""),
    };

    match keyword {
        "VERSION" => parse_version(rest),
        "VERSION-ERROR" => Ok(Message::VersionError(rest.to_string())),
        "ENV-ERROR" => Ok(Message::EnvError(rest.to_string())),
        "CMETHOD" => parse_cmethod(rest),
        "SMETHOD" => parse_smethod(rest),
        "CMETHOD-ERROR" => parse_method_error(Role::Client, rest),
        "SMETHOD-ERROR" => parse_method_error(Role::Server, rest),
        "CMETHODS" => expect_done("CMETHODS DONE", rest).map(|_| Message::MethodsDone(Role::Client)),
        "SMETHODS" => expect_done("SMETHODS DONE", rest).map(|_| Message::MethodsDone(Role::Server)),
        "PROXY" => expect_done("PROXY DONE", rest).map(|_| Message::ProxyDone),
        "PROXY-ERROR" => Ok(Message::ProxyError(rest.to_string())),
        "LOG" => parse_log(rest),
        "STATUS" => parse_status(rest),
        _ => Ok(Message::Unrecognized),
    }
}

/// `VERSION <n>`
pub fn parse_version(rest: &str) -> Result<Message, ParseError> {
    let mut tokens = rest.split_whitespace();
    let raw = tokens
        .next()
        .ok_or_else(|| ParseError::malformed("VERSION", "missing version number"))?;
    if tokens.next().is_some() {
        return Err(ParseError::malformed("VERSION", "trailing arguments"));
    }

    let version: u32 = raw
        .parse()
        .map_err(|_| ParseError::malformed("VERSION", format!("'{}' is not a number", raw)))?;
    if version != SUPPORTED_VERSION {
        return Err(ParseError::UnsupportedVersion(raw.to_string()));
    }
    Ok(Message::Version(version))
}

/// `CMETHOD <name> <socks4|socks5> <addr>:<port>`
pub fn parse_cmethod(rest: &str) -> Result<Message, ParseError> {
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let [name, socks, addrport] = tokens.as_slice() else {
        return Err(ParseError::malformed(
            "CMETHOD",
            format!("expected 3 arguments, got {}", tokens.len()),
        ));
    };

    let name = parse_transport_name("CMETHOD", name)?;
    let socks_version = SocksVersion::from_keyword(socks).ok_or_else(|| {
        ParseError::malformed("CMETHOD", format!("unknown proxy type '{}'", socks))
    })?;
    let addr = parse_addr_port("CMETHOD", addrport)?;

    Ok(Message::ClientMethod {
        name,
        socks_version,
        addr,
    })
}

/// `SMETHOD <name> <addr>:<port> [ARGS:<k=v,...>]`
pub fn parse_smethod(rest: &str) -> Result<Message, ParseError> {
    let mut tokens = rest.split_whitespace();
    let (Some(name), Some(addrport)) = (tokens.next(), tokens.next()) else {
        return Err(ParseError::malformed(
            "SMETHOD",
            "expected a transport name and an address",
        ));
    };

    let name = parse_transport_name("SMETHOD", name)?;
    let addr = parse_addr_port("SMETHOD", addrport)?;

    let mut args = None;
    for option in tokens {
        // Options we do not understand are skipped.
        let Some(payload) = option.strip_prefix(ARGS_PREFIX) else {
            continue;
        };
        if payload.is_empty() {
            return Err(ParseError::malformed("SMETHOD", "empty ARGS: option"));
        }
        if args.is_none() {
            args = Some(payload.to_string());
        }
    }

    Ok(Message::ServerMethod { name, addr, args })
}

/// `CMETHOD-ERROR <name> <message>` / `SMETHOD-ERROR <name> <message>`
fn parse_method_error(role: Role, rest: &str) -> Result<Message, ParseError> {
    let kind = match role {
        Role::Client => "CMETHOD-ERROR",
        Role::Server => "SMETHOD-ERROR",
    };
    let (name, message) = rest
        .split_once(char::is_whitespace)
        .map(|(n, m)| (n, m.trim()))
        .unwrap_or((rest, ""));
    if name.is_empty() || message.is_empty() {
        return Err(ParseError::malformed(
            kind,
            "expected a transport name and an error message",
        ));
    }
    Ok(Message::MethodError {
        role,
        name: name.to_string(),
        message: message.to_string(),
    })
}

fn expect_done(kind: &'static str, rest: &str) -> Result<(), ParseError> {
    if rest.trim_end() == "DONE" {
        Ok(())
    } else {
        Err(ParseError::malformed(kind, format!("expected DONE, got '{}'", rest)))
    }
}

/// `LOG SEVERITY=<level> MESSAGE="<text>"`
pub fn parse_log(rest: &str) -> Result<Message, ParseError> {
    let pairs = parse_key_values("LOG", rest)?;

    let severity = find_value(&pairs, "SEVERITY")
        .ok_or_else(|| ParseError::malformed("LOG", "missing SEVERITY"))?;
    let severity = LogSeverity::from_keyword(severity).ok_or_else(|| {
        ParseError::malformed("LOG", format!("unknown severity '{}'", severity))
    })?;
    let message = find_value(&pairs, "MESSAGE")
        .ok_or_else(|| ParseError::malformed("LOG", "missing MESSAGE"))?;

    Ok(Message::Log {
        severity,
        message: message.to_string(),
    })
}

/// `STATUS TRANSPORT=<name> <key>=<value> ...`
pub fn parse_status(rest: &str) -> Result<Message, ParseError> {
    let mut pairs = parse_key_values("STATUS", rest)?;

    let position = pairs
        .iter()
        .position(|kv| kv.key == "TRANSPORT")
        .ok_or_else(|| ParseError::malformed("STATUS", "missing TRANSPORT"))?;
    let transport = pairs.remove(position).value;
    if transport.is_empty() {
        return Err(ParseError::malformed("STATUS", "empty TRANSPORT"));
    }

    Ok(Message::Status { transport, pairs })
}

fn find_value<'a>(pairs: &'a [KeyValue], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|kv| kv.key == key)
        .map(|kv| kv.value.as_str())
}

/// Split a `key=value key="quoted value"` payload into ordered pairs.
///
/// Inside quotes a backslash protects the next character; both are kept
/// in the value as received.
pub fn parse_key_values(kind: &'static str, input: &str) -> Result<Vec<KeyValue>, ParseError> {
    let mut pairs = Vec::new();
    let mut chars = input.char_indices().peekable();

    loop {
        while chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}
        let Some(&(start, _)) = chars.peek() else {
            break;
        };

        let mut key_end = None;
        while let Some(&(i, c)) = chars.peek() {
            if c == '=' {
                key_end = Some(i);
                chars.next();
                break;
            }
            if c.is_whitespace() || c == '"' {
                break;
            }
            chars.next();
        }
        let key_end = key_end.ok_or_else(|| {
            ParseError::malformed(kind, format!("expected key=value at '{}'", &input[start..]))
        })?;
        let key = &input[start..key_end];
        if key.is_empty() {
            return Err(ParseError::malformed(kind, "empty key"));
        }

        if chars.next_if(|&(_, c)| c == '"').is_some() {
            let mut value = String::new();
            let mut closed = false;
            while let Some((_, c)) = chars.next() {
                match c {
                    '\\' => {
                        value.push(c);
                        match chars.next() {
                            Some((_, escaped)) => value.push(escaped),
                            None => break,
                        }
                    }
                    '"' => {
                        closed = true;
                        break;
                    }
                    _ => value.push(c),
                }
            }
            if !closed {
                return Err(ParseError::malformed(
                    kind,
                    format!("unterminated quoted value for {}", key),
                ));
            }
            if chars.peek().is_some_and(|(_, c)| !c.is_whitespace()) {
                return Err(ParseError::malformed(
                    kind,
                    format!("garbage after quoted value for {}", key),
                ));
            }
            pairs.push(KeyValue::quoted(key, value));
        } else {
            let mut value = String::new();
            while let Some((_, c)) = chars.next_if(|(_, c)| !c.is_whitespace()) {
                value.push(c);
            }
            pairs.push(KeyValue::bare(key, value));
        }
    }

    Ok(pairs)
}

fn parse_transport_name(kind: &'static str, name: &str) -> Result<String, ParseError> {
    if is_c_identifier(name) {
        Ok(name.to_string())
    } else {
        Err(ParseError::malformed(
            kind,
            format!("transport name '{}' is not a C identifier", name),
        ))
    }
}

/// True for `[A-Za-z_][A-Za-z0-9_]*`.
pub fn is_c_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Parse `a.b.c.d:port` or `[v6]:port`.
fn parse_addr_port(kind: &'static str, token: &str) -> Result<SocketAddr, ParseError> {
    token
        .parse()
        .map_err(|_| ParseError::malformed(kind, format!("bad address:port '{}'", token)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_malformed(line: &str) {
        match parse_line(line) {
            Err(ParseError::Malformed { .. }) => {}
            other => panic!("expected malformed for {:?}, got {:?}", line, other),
        }
    }

    #[test]
    fn test_cmethod_incomplete() {
        assert_malformed("CMETHOD trebuchet");
    }

    #[test]
    fn test_cmethod_wrong_proxy_type() {
        assert_malformed("CMETHOD trebuchet dog 127.0.0.1:1999");
    }

    #[test]
    fn test_cmethod_wrong_addrport() {
        assert_malformed("CMETHOD trebuchet socks4 abcd");
    }

    #[test]
    fn test_cmethod_extra_argument() {
        assert_malformed("CMETHOD trebuchet socks5 127.0.0.1:1999 ARGS:x=y");
    }

    #[test]
    fn test_cmethod_correct() {
        let msg = parse_line("CMETHOD trebuchet socks5 127.0.0.1:1999").unwrap();
        assert_eq!(
            msg,
            Message::ClientMethod {
                name: "trebuchet".into(),
                socks_version: SocksVersion::Socks5,
                addr: "127.0.0.1:1999".parse().unwrap(),
            }
        );
    }

    #[test]
    fn test_cmethod_ipv6() {
        let msg = parse_line("CMETHOD obfs4 socks4 [2001:db8::1]:4444").unwrap();
        match msg {
            Message::ClientMethod { addr, .. } => {
                assert_eq!(addr, "[2001:db8::1]:4444".parse().unwrap());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_cmethod_bad_name() {
        assert_malformed("CMETHOD 9lives socks5 127.0.0.1:1999");
        assert_malformed("CMETHOD tre-buchet socks5 127.0.0.1:1999");
    }

    #[test]
    fn test_smethod_incomplete() {
        assert_malformed("SMETHOD trebuchet");
    }

    #[test]
    fn test_smethod_wrong_addr() {
        assert_malformed("SMETHOD trebuchet abcd");
    }

    #[test]
    fn test_smethod_correct() {
        let msg = parse_line("SMETHOD trebuchy 127.0.0.2:2999").unwrap();
        assert_eq!(
            msg,
            Message::ServerMethod {
                name: "trebuchy".into(),
                addr: "127.0.0.2:2999".parse().unwrap(),
                args: None,
            }
        );
    }

    #[test]
    fn test_smethod_with_args() {
        let msg =
            parse_line("SMETHOD trebuchet 127.0.0.1:9999 ARGS:counterweight=3,sling=snappy")
                .unwrap();
        match msg {
            Message::ServerMethod { name, addr, args } => {
                assert_eq!(name, "trebuchet");
                assert_eq!(addr.port(), 9999);
                assert_eq!(args.as_deref(), Some("counterweight=3,sling=snappy"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_smethod_empty_args() {
        assert_malformed("SMETHOD trebuchet 127.0.0.1:9999 ARGS:");
    }

    #[test]
    fn test_smethod_unknown_option_ignored() {
        let msg = parse_line("SMETHOD trebuchet 127.0.0.1:9999 FUTURE:thing").unwrap();
        assert!(matches!(msg, Message::ServerMethod { args: None, .. }));
    }

    #[test]
    fn test_version() {
        assert_eq!(parse_line("VERSION 1").unwrap(), Message::Version(1));
        assert_eq!(
            parse_line("VERSION 666"),
            Err(ParseError::UnsupportedVersion("666".into()))
        );
        assert_malformed("VERSION ");
        assert_malformed("VERSION one");
        assert_malformed("VERSION -1");
        assert_malformed("VERSION 1 2");
    }

    #[test]
    fn test_methods_done() {
        assert_eq!(
            parse_line("CMETHODS DONE").unwrap(),
            Message::MethodsDone(Role::Client)
        );
        assert_eq!(
            parse_line("SMETHODS DONE").unwrap(),
            Message::MethodsDone(Role::Server)
        );
        assert_malformed("SMETHODS");
        assert_malformed("SMETHODS FINISHED");
        assert_malformed("CMETHODS DONE NOW");
    }

    #[test]
    fn test_keywords_are_case_sensitive() {
        assert_eq!(parse_line("version 1").unwrap(), Message::Unrecognized);
        assert_eq!(parse_line("Cmethods DONE").unwrap(), Message::Unrecognized);
    }

    #[test]
    fn test_unrecognized() {
        assert_eq!(parse_line("HELLO there").unwrap(), Message::Unrecognized);
        assert_eq!(parse_line("").unwrap(), Message::Unrecognized);
    }

    #[test]
    fn test_indented_keyword_is_unrecognized() {
        assert_eq!(parse_line("  VERSION 1").unwrap(), Message::Unrecognized);
        assert_eq!(parse_line("\tSMETHODS DONE").unwrap(), Message::Unrecognized);
        assert_eq!(parse_line("VERSION 1  ").unwrap(), Message::Version(1));
    }

    #[test]
    fn test_helper_errors() {
        assert_eq!(
            parse_line("ENV-ERROR missing TOR_PT_STATE_LOCATION").unwrap(),
            Message::EnvError("missing TOR_PT_STATE_LOCATION".into())
        );
        assert_eq!(
            parse_line("VERSION-ERROR no-version").unwrap(),
            Message::VersionError("no-version".into())
        );
        assert_eq!(
            parse_line("PROXY-ERROR bad scheme").unwrap(),
            Message::ProxyError("bad scheme".into())
        );
        assert_eq!(parse_line("PROXY DONE").unwrap(), Message::ProxyDone);
    }

    #[test]
    fn test_method_error() {
        assert_eq!(
            parse_line("SMETHOD-ERROR trebuchet could not bind port").unwrap(),
            Message::MethodError {
                role: Role::Server,
                name: "trebuchet".into(),
                message: "could not bind port".into(),
            }
        );
        assert_malformed("CMETHOD-ERROR trebuchet");
        assert_malformed("CMETHOD-ERROR");
    }

    #[test]
    fn test_log_line() {
        let msg = parse_line(
            "LOG SEVERITY=error MESSAGE=\"Oh noes, something bad happened. What do we do!?\"",
        )
        .unwrap();
        assert_eq!(
            msg,
            Message::Log {
                severity: LogSeverity::Error,
                message: "Oh noes, something bad happened. What do we do!?".into(),
            }
        );
    }

    #[test]
    fn test_log_keeps_escapes_verbatim() {
        let msg = parse_line(r#"LOG SEVERITY=notice MESSAGE="say \"hi\" now""#).unwrap();
        assert_eq!(
            msg,
            Message::Log {
                severity: LogSeverity::Notice,
                message: r#"say \"hi\" now"#.into(),
            }
        );
    }

    #[test]
    fn test_log_malformed() {
        assert_malformed("LOG SEVERITY=loud MESSAGE=\"x\"");
        assert_malformed("LOG MESSAGE=\"x\"");
        assert_malformed("LOG SEVERITY=info");
        assert_malformed("LOG SEVERITY=info MESSAGE=\"unterminated");
        assert_malformed("LOG SEVERITY=info justtext");
    }

    #[test]
    fn test_status_line() {
        let msg = parse_line("STATUS TRANSPORT=a K_1=a K_2=b K_3=\"foo bar\"").unwrap();
        assert_eq!(
            msg,
            Message::Status {
                transport: "a".into(),
                pairs: vec![
                    KeyValue::bare("K_1", "a"),
                    KeyValue::bare("K_2", "b"),
                    KeyValue::quoted("K_3", "foo bar"),
                ],
            }
        );
    }

    #[test]
    fn test_status_requires_transport() {
        assert_malformed("STATUS K_1=a");
        assert_malformed("STATUS TRANSPORT= K_1=a");
    }

    #[test]
    fn test_key_values_garbage_after_quote() {
        assert!(parse_key_values("STATUS", "K=\"a\"b").is_err());
    }

    #[test]
    fn test_c_identifier() {
        assert!(is_c_identifier("obfs4"));
        assert!(is_c_identifier("_x"));
        assert!(!is_c_identifier(""));
        assert!(!is_c_identifier("4obfs"));
        assert!(!is_c_identifier("meek-lite"));
    }
}
