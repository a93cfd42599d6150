//! Managed external daemons
//!
//! A [`ManagedProcess`] knows where a service keeps its pid file and data, how to launch
//! it, and how to stop it. The concrete daemons compose one:
//! - [`TorRelay`] - anonymizing SOCKS relay with circuit rotation
//! - [`PolipoRelay`] - HTTP front relay chained to one upstream
//! - [`LoadBalancer`] - HAProxy spreading clients over the pool

pub mod haproxy;
pub mod launcher;
pub mod polipo;
pub mod tor;

pub use haproxy::{Backend, LoadBalancer};
pub use launcher::{CommandSpec, ProcessLauncher, SystemLauncher};
pub use polipo::{PolipoRelay, Upstream};
pub use tor::TorRelay;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{PoolError, Result};
use launcher::read_pid_file;

/// Roots of the on-disk trees every service gets a directory in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePaths {
    root: PathBuf,
}

impl ServicePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn lib_dir(&self, service: &str) -> PathBuf {
        self.root.join("lib").join(service)
    }

    pub fn run_dir(&self, service: &str) -> PathBuf {
        self.root.join("run").join(service)
    }

    pub fn log_dir(&self, service: &str) -> PathBuf {
        self.root.join("log").join(service)
    }

    /// One pid file per (service, port)
    pub fn pid_file(&self, service: &str, port: u16) -> PathBuf {
        self.run_dir(service).join(format!("{}.pid", port))
    }
}

impl Default for ServicePaths {
    fn default() -> Self {
        Self::new("/var")
    }
}

/// Collaborators shared by every managed process in the pool
#[derive(Clone)]
pub struct ServiceContext {
    pub paths: ServicePaths,
    pub launcher: Arc<dyn ProcessLauncher>,
    /// Helper invoked with a control port to request a fresh circuit
    pub newnym_helper: PathBuf,
}

impl ServiceContext {
    pub fn new(paths: ServicePaths, launcher: Arc<dyn ProcessLauncher>) -> Self {
        Self {
            paths,
            launcher,
            newnym_helper: PathBuf::from(tor::DEFAULT_NEWNYM_HELPER),
        }
    }

    pub fn with_newnym_helper(mut self, helper: impl Into<PathBuf>) -> Self {
        self.newnym_helper = helper.into();
        self
    }
}

/// Lifecycle wrapper around one external daemon bound to one port
#[derive(Clone)]
pub struct ManagedProcess {
    service: &'static str,
    port: u16,
    executable: Option<PathBuf>,
    pid_file: PathBuf,
    paths: ServicePaths,
    launcher: Arc<dyn ProcessLauncher>,
}

impl std::fmt::Debug for ManagedProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedProcess")
            .field("service", &self.service)
            .field("port", &self.port)
            .field("executable", &self.executable)
            .field("pid_file", &self.pid_file)
            .finish()
    }
}

impl ManagedProcess {
    /// Resolve the executable once and derive this instance's paths
    pub fn new(service: &'static str, port: u16, ctx: &ServiceContext) -> Self {
        let executable = ctx.launcher.locate(service);
        if executable.is_none() {
            warn!(service, "executable not found in PATH");
        }

        Self {
            service,
            port,
            executable,
            pid_file: ctx.paths.pid_file(service, port),
            paths: ctx.paths.clone(),
            launcher: ctx.launcher.clone(),
        }
    }

    pub fn service(&self) -> &'static str {
        self.service
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }

    /// Executable path or an error if it was never found
    pub fn resolve(&self) -> Result<&Path> {
        self.executable().ok_or(PoolError::ExecutableNotFound {
            service: self.service,
        })
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    pub fn data_directory(&self) -> PathBuf {
        self.paths.lib_dir(self.service)
    }

    pub fn launcher(&self) -> &Arc<dyn ProcessLauncher> {
        &self.launcher
    }

    /// Create the service's lib/run/log directories if missing
    pub fn ensure_directories(&self) -> Result<()> {
        for dir in [
            self.paths.lib_dir(self.service),
            self.paths.run_dir(self.service),
            self.paths.log_dir(self.service),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        Ok(())
    }

    /// Log, prepare directories and build a command for this service's executable
    pub fn prepare(&self) -> Result<CommandSpec> {
        self.ensure_directories()?;
        info!("starting {} on port {}", self.service, self.port);
        Ok(CommandSpec::new(self.resolve()?, self.service))
    }

    /// Launch a prepared command, fire-and-forget
    pub fn launch(&self, command: &CommandSpec) -> Result<()> {
        self.launcher.launch(command)
    }

    /// Prepare and launch with the given arguments
    pub fn start<I, S>(&self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command = args
            .into_iter()
            .fold(self.prepare()?, |cmd, arg| cmd.arg(arg));
        self.launch(&command)
    }

    /// Best-effort stop: a missing pid file means "not running", and failures to signal
    /// are logged rather than returned.
    pub fn stop(&self) {
        info!("stopping {} on port {}", self.service, self.port);

        match read_pid_file(&self.pid_file) {
            Ok(Some(pid)) => {
                if let Err(e) = self.launcher.terminate(pid) {
                    warn!(
                        "couldn't kill {} on port {}: {}",
                        self.service, self.port, e
                    );
                }
            }
            Ok(None) => {
                info!("{} on port {} was not running", self.service, self.port);
            }
            Err(e) => {
                warn!(
                    "couldn't kill {} on port {}: {}",
                    self.service, self.port, e
                );
            }
        }
    }

    /// Remove a leftover pid file, ignoring one that does not exist
    pub fn clear_pid_file(&self) -> Result<()> {
        match std::fs::remove_file(&self.pid_file) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
