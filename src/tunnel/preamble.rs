//! Preamble classification.
//!
//! A preamble is the HTTP request head a client sends before any payload.
//! It is complete once the blank line ending the header block arrived.

use std::fmt;

use axum::http::uri::Authority;

use super::TunnelError;

const MAX_HEADERS: usize = 64;
const DEFAULT_TLS_PORT: u16 = 443;
const DEFAULT_HTTP_PORT: u16 = 80;

/// Upstream endpoint; `host` never carries IPv6 brackets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelTarget {
    pub host: String,
    pub port: u16,
}

impl TunnelTarget {
    /// Parse `host[:port]`.
    pub fn parse(authority: &str, default_port: u16) -> Option<Self> {
        let authority: Authority = authority.trim().parse().ok()?;
        let host = authority
            .host()
            .trim_start_matches('[')
            .trim_end_matches(']');
        if host.is_empty() {
            return None;
        }
        Some(Self {
            host: host.to_string(),
            port: authority.port_u16().unwrap_or(default_port),
        })
    }
}

impl fmt::Display for TunnelTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preamble {
    /// `CONNECT host:port`; the head is setup metadata. Bytes past
    /// `header_len` are already payload.
    Connect { target: TunnelTarget, header_len: usize },
    /// Any other request with a `Host` header; the whole buffer is payload.
    Plain { target: TunnelTarget },
}

impl Preamble {
    pub fn target(&self) -> &TunnelTarget {
        match self {
            Preamble::Connect { target, .. } | Preamble::Plain { target } => target,
        }
    }

    /// Metric/log label.
    pub fn kind(&self) -> &'static str {
        match self {
            Preamble::Connect { .. } => "connect",
            Preamble::Plain { .. } => "relay",
        }
    }
}

/// Classify the bytes read so far. `Ok(None)` means the header block is
/// not complete yet.
///
/// A plain relay goes to the port named in `Host`, 80 only when it names
/// none, so relays to HTTP services on other ports reach them.
pub fn classify(buf: &[u8]) -> Result<Option<Preamble>, TunnelError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut request = httparse::Request::new(&mut headers);

    let header_len = match request.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(TunnelError::MalformedPreamble(e.to_string())),
    };

    if request.method == Some("CONNECT") {
        let path = request.path.unwrap_or_default();
        let target = TunnelTarget::parse(path, DEFAULT_TLS_PORT).ok_or_else(|| {
            TunnelError::MalformedPreamble(format!("invalid CONNECT target `{path}`"))
        })?;
        return Ok(Some(Preamble::Connect { target, header_len }));
    }

    let host = request
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("host"))
        .ok_or_else(|| TunnelError::MalformedPreamble("no Host header".to_string()))?;
    let host = std::str::from_utf8(host.value)
        .map_err(|_| TunnelError::MalformedPreamble("Host header is not UTF-8".to_string()))?;
    let target = TunnelTarget::parse(host, DEFAULT_HTTP_PORT)
        .ok_or_else(|| TunnelError::MalformedPreamble(format!("invalid Host `{host}`")))?;

    Ok(Some(Preamble::Plain { target }))
}
