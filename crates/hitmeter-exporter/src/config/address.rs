//! Structured `host:port[/path]` parsing for the listen socket.

use std::fmt;
use std::net::SocketAddr;

use hitmeter_core::error::{HitmeterError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindAddress {
    /// Host name or IP literal, without IPv6 brackets.
    pub host: String,
    pub port: u16,
    /// HTTP route the metrics are served at; `/` when not given.
    pub path: String,
}

impl BindAddress {
    /// Parse `host:port`, `[v6]:port`, optionally followed by `/path`.
    /// No part is defaulted: a missing host or port is an error.
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || HitmeterError::InvalidAddress(s.to_string());
        let s_trim = s.trim();

        let (host, rest) = if let Some(after) = s_trim.strip_prefix('[') {
            let (host, rest) = after.split_once(']').ok_or_else(invalid)?;
            (host, rest.strip_prefix(':').ok_or_else(invalid)?)
        } else {
            let authority_end = s_trim.find('/').unwrap_or(s_trim.len());
            let (host, _port) = s_trim[..authority_end].rsplit_once(':').ok_or_else(invalid)?;
            if host.contains(':') {
                // Unbracketed IPv6 is ambiguous.
                return Err(invalid());
            }
            (host, &s_trim[host.len() + 1..])
        };
        if host.is_empty() || host.chars().any(char::is_whitespace) {
            return Err(invalid());
        }

        let (port, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let port: u16 = port.parse().map_err(|_| invalid())?;
        if !valid_route(path) {
            return Err(invalid());
        }

        Ok(Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// Resolve to socket addresses (DNS for host names).
    pub async fn resolve(&self) -> Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|_| HitmeterError::InvalidAddress(self.authority()))?
            .collect();
        if addrs.is_empty() {
            return Err(HitmeterError::InvalidAddress(self.authority()));
        }
        Ok(addrs)
    }

    /// `host:port`, bracketing IPv6 literals.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// A literal HTTP route: starts with `/`, no whitespace, no route captures.
pub fn valid_route(path: &str) -> bool {
    path.starts_with('/') && !path.contains(|c: char| c.is_whitespace() || c == ':' || c == '*')
}

impl fmt::Display for BindAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.authority(), self.path)
    }
}
