//! Anonymizing relay (Tor) instances
//!
//! Each instance is tuned for short-lived circuits that are rotated on every
//! supervisor pass.

use std::path::PathBuf;

use tracing::debug;

use crate::daemon::{CommandSpec, ManagedProcess, ServiceContext};
use crate::error::Result;
use crate::models::ProxyScheme;

pub const SERVICE_NAME: &str = "tor";
pub const DEFAULT_NEWNYM_HELPER: &str = "/usr/local/bin/newnym.sh";

/// Tor always listens on loopback
pub const TOR_HOST: &str = "127.0.0.1";

/// One Tor daemon with its own SOCKS port, control port and data directory
#[derive(Debug, Clone)]
pub struct TorRelay {
    process: ManagedProcess,
    control_port: u16,
    newnym_helper: PathBuf,
}

impl TorRelay {
    pub fn new(socks_port: u16, control_port: u16, ctx: &ServiceContext) -> Self {
        Self {
            process: ManagedProcess::new(SERVICE_NAME, socks_port, ctx),
            control_port,
            newnym_helper: ctx.newnym_helper.clone(),
        }
    }

    pub fn port(&self) -> u16 {
        self.process.port()
    }

    pub fn control_port(&self) -> u16 {
        self.control_port
    }

    pub fn host(&self) -> &'static str {
        TOR_HOST
    }

    pub fn scheme(&self) -> ProxyScheme {
        ProxyScheme::Socks5
    }

    /// Per-instance data directory so instances never share state on disk
    pub fn data_directory(&self) -> PathBuf {
        self.process.data_directory().join(self.port().to_string())
    }

    pub fn pid_file(&self) -> PathBuf {
        self.process.pid_file().to_path_buf()
    }

    pub fn command(&self) -> Result<CommandSpec> {
        let command = self
            .process
            .prepare()?
            .flag("--SocksPort", self.port())
            .flag("--ControlPort", self.control_port)
            .flag("--NewCircuitPeriod", 15)
            .flag("--MaxCircuitDirtiness", 15)
            .flag("--UseEntryGuards", 0)
            .flag("--UseEntryGuardsAsDirGuards", 0)
            .flag("--CircuitBuildTimeout", 5)
            .flag("--ExitRelay", 0)
            .flag("--RefuseUnknownExits", 0)
            .flag("--ClientOnly", 1)
            .flag("--AllowSingleHopCircuits", 1)
            .flag("--DataDirectory", self.data_directory().display())
            .flag("--PidFile", self.process.pid_file().display())
            .flag("--Log", "warn syslog")
            .flag("--RunAsDaemon", 1);
        Ok(command)
    }

    pub fn start(&self) -> Result<()> {
        let command = self.command()?;
        self.process.launch(&command)
    }

    pub fn stop(&self) {
        self.process.stop();
    }

    /// Request a new circuit through the control port.
    ///
    /// Fire-and-forget: the helper's outcome is never awaited or checked.
    pub fn rotate_circuit(&self) -> Result<()> {
        let command =
            CommandSpec::new(&self.newnym_helper, "newnym").arg(self.control_port.to_string());
        debug!(control_port = self.control_port, "requesting new circuit");
        self.process.launcher().launch(&command)
    }
}
