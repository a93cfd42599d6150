//! Protocol-translating relay (Polipo)
//!
//! Accepts HTTP clients on the unit's listen port and forwards them to one parent proxy,
//! either a local Tor instance or a public proxy from the list.

use std::sync::Arc;

use tracing::warn;

use crate::daemon::{CommandSpec, ManagedProcess, ServiceContext, TorRelay};
use crate::error::Result;
use crate::models::{ProxyScheme, ProxyUri};

pub const SERVICE_NAME: &str = "polipo";

/// Where a relay sends its traffic
#[derive(Debug, Clone)]
pub enum Upstream {
    Tor(Arc<TorRelay>),
    Proxy(ProxyUri),
}

impl Upstream {
    /// Scheme the relay should speak to the upstream
    pub fn scheme(&self) -> ProxyScheme {
        let scheme = match self {
            Upstream::Tor(tor) => tor.scheme(),
            Upstream::Proxy(uri) => uri.scheme.clone(),
        };
        scheme.as_upstream()
    }

    pub fn host(&self) -> &str {
        match self {
            Upstream::Tor(tor) => tor.host(),
            Upstream::Proxy(uri) => &uri.host,
        }
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            Upstream::Tor(tor) => Some(tor.port()),
            Upstream::Proxy(uri) => uri.port,
        }
    }

    /// `host:port` handed to the relay as its parent proxy
    fn parent(&self) -> Option<String> {
        self.port().map(|port| format!("{}:{}", self.host(), port))
    }
}

/// One Polipo daemon in front of an upstream
#[derive(Debug, Clone)]
pub struct PolipoRelay {
    process: ManagedProcess,
    upstream: Upstream,
}

impl PolipoRelay {
    pub fn new(port: u16, upstream: Upstream, ctx: &ServiceContext) -> Self {
        Self {
            process: ManagedProcess::new(SERVICE_NAME, port, ctx),
            upstream,
        }
    }

    pub fn port(&self) -> u16 {
        self.process.port()
    }

    pub fn upstream(&self) -> &Upstream {
        &self.upstream
    }

    pub fn pid_file(&self) -> &std::path::Path {
        self.process.pid_file()
    }

    /// Full command line, or `None` when the upstream scheme has no parent-proxy mode
    pub fn command(&self) -> Result<Option<CommandSpec>> {
        let scheme = self.upstream.scheme();
        if !scheme.is_socks() && scheme != ProxyScheme::Http {
            return Ok(None);
        }
        let Some(parent) = self.upstream.parent() else {
            return Ok(None);
        };

        let command = self
            .process
            .prepare()?
            .arg(format!("proxyPort={}", self.port()));

        let command = if scheme.is_socks() {
            command
                .arg(format!("socksParentProxy={}", parent))
                .arg(format!("socksProxyType={}", scheme))
        } else {
            command.arg(format!("parentProxy={}", parent))
        };

        Ok(Some(
            command
                .arg("diskCacheRoot=")
                .arg("disableLocalInterface=true")
                .arg("allowedClients=127.0.0.1")
                .arg("localDocumentRoot=")
                .arg("disableConfiguration=true")
                .arg("dnsUseGethostbyname=yes")
                .arg("logSyslog=true")
                .arg("daemonise=true")
                .arg(format!("pidFile={}", self.process.pid_file().display()))
                .arg("disableVia=true")
                .arg("allowedPorts=1-65535")
                .arg("tunnelAllowedPorts=1-65535"),
        ))
    }

    /// Clear any stale pid file so the daemon can detach cleanly, then launch.
    ///
    /// An upstream with an unsupported scheme launches nothing and is not an error.
    pub fn start(&self) -> Result<()> {
        self.process.clear_pid_file()?;

        match self.command()? {
            Some(command) => self.process.launch(&command),
            None => {
                warn!(
                    "no parent proxy mode for scheme {}, {} on port {} not launched",
                    self.upstream.scheme(),
                    SERVICE_NAME,
                    self.port()
                );
                Ok(())
            }
        }
    }

    pub fn stop(&self) {
        self.process.stop();
    }
}
