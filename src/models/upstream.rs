use std::path::Path;

use url::Url;

use crate::error::{PoolError, Result};

/// Default port for SOCKS upstreams listed without one
pub const DEFAULT_SOCKS_PORT: u16 = 9050;

/// Upstream proxy scheme
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyScheme {
    Http,
    Socks4,
    Socks4a,
    Socks5,
    /// Any scheme the relay has no parent-proxy mode for
    Other(String),
}

impl ProxyScheme {
    pub fn as_str(&self) -> &str {
        match self {
            ProxyScheme::Http => "http",
            ProxyScheme::Socks4 => "socks4",
            ProxyScheme::Socks4a => "socks4a",
            ProxyScheme::Socks5 => "socks5",
            ProxyScheme::Other(s) => s,
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "http" => ProxyScheme::Http,
            "socks4" => ProxyScheme::Socks4,
            "socks4a" => ProxyScheme::Socks4a,
            "socks5" => ProxyScheme::Socks5,
            other => ProxyScheme::Other(other.to_string()),
        }
    }

    pub fn is_socks(&self) -> bool {
        matches!(
            self,
            ProxyScheme::Socks4 | ProxyScheme::Socks4a | ProxyScheme::Socks5
        )
    }

    /// Scheme as handed to the relay. Plain socks4 is always upgraded to socks4a
    /// so that hostnames are resolved by the upstream.
    pub fn as_upstream(&self) -> Self {
        match self {
            ProxyScheme::Socks4 => ProxyScheme::Socks4a,
            other => other.clone(),
        }
    }

    fn default_port(&self) -> Option<u16> {
        match self {
            ProxyScheme::Socks4 | ProxyScheme::Socks4a | ProxyScheme::Socks5 => {
                Some(DEFAULT_SOCKS_PORT)
            }
            ProxyScheme::Http => Some(80),
            ProxyScheme::Other(_) => None,
        }
    }
}

impl std::fmt::Display for ProxyScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A public upstream proxy taken from one line of the proxy list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyUri {
    pub scheme: ProxyScheme,
    pub host: String,
    /// Always set for the schemes the relay supports; an unsupported scheme may
    /// carry none.
    pub port: Option<u16>,
}

impl ProxyUri {
    /// Parse a proxy URI such as `socks5://10.0.0.1:1080` or `http://proxy.example`
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| PoolError::InvalidProxyUri {
            uri: raw.to_string(),
            reason: reason.to_string(),
        };

        let url = Url::parse(raw.trim()).map_err(|e| invalid(&e.to_string()))?;
        let scheme = ProxyScheme::from_str(url.scheme());

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| invalid("missing host"))?;

        let port = url
            .port()
            .or_else(|| scheme.default_port())
            .or_else(|| url.port_or_known_default());

        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
        })
    }

    /// Address in `host:port` form, or just `host` when no port is known
    pub fn authority(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }
}

impl std::fmt::Display for ProxyUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority())
    }
}

/// Read a newline-delimited proxy list, keeping file order.
///
/// Blank lines and `#` comments are skipped; a line that is not a URI at all is an error.
pub fn read_proxy_list(path: &Path) -> Result<Vec<ProxyUri>> {
    let contents = std::fs::read_to_string(path)?;
    parse_proxy_list(&contents)
}

pub fn parse_proxy_list(contents: &str) -> Result<Vec<ProxyUri>> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(ProxyUri::parse)
        .collect()
}
