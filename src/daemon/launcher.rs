//! Process launching
//!
//! Every external daemon is started fire-and-forget: the child is spawned, its output is
//! forwarded into the log, and no handle is retained. Whether it keeps running is only
//! ever learned through health checks.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{PoolError, Result};

/// A fully rendered command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Tag attached to the child's forwarded output
    pub tag: &'static str,
}

impl CommandSpec {
    pub fn new(program: impl Into<PathBuf>, tag: &'static str) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            tag,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append a `--Flag value` pair as two words
    pub fn flag(self, name: &str, value: impl ToString) -> Self {
        self.arg(name).arg(value.to_string())
    }

    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Narrow seam between the supervisor and the operating system.
///
/// Swapping the implementation is how a supervised spawning model would be introduced.
pub trait ProcessLauncher: Send + Sync {
    /// Locate an executable by name, `None` if it is not installed
    fn locate(&self, name: &str) -> Option<PathBuf>;

    /// Spawn and detach. Returns once the child has been created.
    fn launch(&self, command: &CommandSpec) -> Result<()>;

    /// Ask a process to terminate
    fn terminate(&self, pid: i32) -> Result<()>;
}

/// Launcher backed by real OS processes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

impl SystemLauncher {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessLauncher for SystemLauncher {
    fn locate(&self, name: &str) -> Option<PathBuf> {
        which::which(name).ok()
    }

    fn launch(&self, command: &CommandSpec) -> Result<()> {
        debug!("running: {}", command.command_line());

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        // Keep children out of the supervisor's process group so a Ctrl+C aimed at
        // the supervisor does not take the pool down with it.
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|source| PoolError::Spawn {
            program: command.program.display().to_string(),
            source,
        })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, command.tag));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, command.tag));
        }

        // Dropping the handle detaches the child; tokio reaps it in the background.
        drop(child);
        Ok(())
    }

    fn terminate(&self, pid: i32) -> Result<()> {
        kill(Pid::from_raw(pid), Signal::SIGINT).map_err(|source| PoolError::Signal { pid, source })
    }
}

async fn forward_output<R>(stream: R, tag: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        info!(service = tag, "{}", line);
    }
}

/// Read a pid file written by a daemon
pub fn read_pid_file(path: &Path) -> Result<Option<i32>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let trimmed = contents.trim();
    match trimmed.parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(Some(pid)),
        _ => Err(PoolError::InvalidPidFile {
            path: path.to_path_buf(),
            contents: trimmed.to_string(),
        }),
    }
}
