//! Command channel URL construction.
//!
//! `{scheme}://{host}:{port}{path}?name={base64 name}&token={token|None}`

use std::fmt;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Plain command channel port
pub const PLAIN_PORT: u16 = 8001;
/// TLS command channel port
pub const SECURE_PORT: u16 = 8002;

/// WebSocket scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Plain `ws`
    Ws,
    /// TLS `wss`
    Wss,
}

impl Scheme {
    /// Scheme implied by a port: 8002 is TLS, everything else plain.
    pub fn for_port(port: u16) -> Self {
        if port == SECURE_PORT {
            Self::Wss
        } else {
            Self::Ws
        }
    }

    /// The other scheme
    pub fn alternate(self) -> Self {
        match self {
            Self::Ws => Self::Wss,
            Self::Wss => Self::Ws,
        }
    }

    /// URL scheme text
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ws => "ws",
            Self::Wss => "wss",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Components of a command channel URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUrl {
    /// Scheme
    pub scheme: Scheme,
    /// Device host
    pub host: String,
    /// Device port
    pub port: u16,
    /// Channel path, starting with `/`
    pub path: String,
    /// Client name (sent base64-encoded)
    pub name: String,
    /// Stored token, if any
    pub token: Option<String>,
}

impl ConnectionUrl {
    /// URL with the scheme implied by `port`
    pub fn new(host: &str, port: u16, path: &str, name: &str, token: Option<String>) -> Self {
        Self {
            scheme: Scheme::for_port(port),
            host: host.to_string(),
            port,
            path: path.to_string(),
            name: name.to_string(),
            token,
        }
    }

    /// The same endpoint over the other scheme. The two well-known ports
    /// travel with their scheme; any other port is kept.
    pub fn fallback(&self) -> Self {
        let scheme = self.scheme.alternate();
        let port = match (self.port, scheme) {
            (PLAIN_PORT, Scheme::Wss) => SECURE_PORT,
            (SECURE_PORT, Scheme::Ws) => PLAIN_PORT,
            (port, _) => port,
        };
        Self {
            scheme,
            port,
            ..self.clone()
        }
    }

    /// Full URL with the token
    pub fn to_url(&self) -> String {
        self.render(self.token.as_deref().unwrap_or("None"))
    }

    /// URL suitable for logs
    pub fn redacted(&self) -> String {
        self.render(if self.token.is_some() { "***" } else { "None" })
    }

    fn render(&self, token: &str) -> String {
        format!(
            "{}://{}:{}{}?name={}&token={}",
            self.scheme,
            self.host,
            self.port,
            self.path,
            BASE64.encode(self.name.as_bytes()),
            token
        )
    }
}
