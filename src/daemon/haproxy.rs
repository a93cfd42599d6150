//! Load balancer (HAProxy)
//!
//! Backends are baked into a rendered config file before the daemon starts; they are
//! never hot-added.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::daemon::launcher::read_pid_file;
use crate::daemon::{ManagedProcess, ServiceContext};
use crate::error::{PoolError, Result};
use crate::proxy::ProxyUnit;

pub const SERVICE_NAME: &str = "haproxy";
pub const DEFAULT_PORT: u16 = 5566;

const SECTION_OPEN: &str = "{{#backends}}";
const SECTION_CLOSE: &str = "{{/backends}}";

/// One server line in the balancer config
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backend {
    pub name: String,
    pub addr: String,
    pub port: u16,
}

impl Backend {
    pub fn for_unit(unit: &ProxyUnit) -> Self {
        Self {
            name: format!("proxy{}", unit.id()),
            addr: "127.0.0.1".to_string(),
            port: unit.listen_port(),
        }
    }
}

/// HAProxy instance plus the backend list it is rendered with
#[derive(Debug, Clone)]
pub struct LoadBalancer {
    process: ManagedProcess,
    backends: Vec<Backend>,
    template_path: PathBuf,
    config_path: PathBuf,
}

impl LoadBalancer {
    pub fn new(
        port: u16,
        template_path: impl Into<PathBuf>,
        config_path: impl Into<PathBuf>,
        ctx: &ServiceContext,
    ) -> Self {
        Self {
            process: ManagedProcess::new(SERVICE_NAME, port, ctx),
            backends: Vec::new(),
            template_path: template_path.into(),
            config_path: config_path.into(),
        }
    }

    pub fn port(&self) -> u16 {
        self.process.port()
    }

    pub fn backends(&self) -> &[Backend] {
        &self.backends
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn pid_file(&self) -> &Path {
        self.process.pid_file()
    }

    /// Register a unit. Must happen before `start`.
    pub fn add_backend(&mut self, unit: &ProxyUnit) {
        let backend = Backend::for_unit(unit);
        debug!(name = %backend.name, port = backend.port, "adding backend");
        self.backends.push(backend);
    }

    /// Render the template with the current backend list into the config path
    pub fn render_config(&self) -> Result<()> {
        let template = std::fs::read_to_string(&self.template_path)?;
        let rendered = render_template(&template, self.port(), self.pid_file(), &self.backends)?;
        std::fs::write(&self.config_path, rendered)?;
        info!(
            "rendered {} with {} backends",
            self.config_path.display(),
            self.backends.len()
        );
        Ok(())
    }

    pub fn start(&self) -> Result<()> {
        let command = self.process.prepare()?;
        self.render_config()?;
        let command = command
            .arg("-f")
            .arg(self.config_path.display().to_string());
        self.process.launch(&command)
    }

    /// Start a new balancer that takes over gracefully from the one in the pid file
    pub fn soft_reload(&self) -> Result<()> {
        let pid = read_pid_file(self.pid_file())?.ok_or(PoolError::NotRunning {
            service: SERVICE_NAME,
            port: self.port(),
        })?;

        info!("reloading {} on port {} (old pid {})", SERVICE_NAME, self.port(), pid);
        let command = self
            .process
            .prepare()?
            .arg("-f")
            .arg(self.config_path.display().to_string())
            .arg("-p")
            .arg(self.pid_file().display().to_string())
            .arg("-sf")
            .arg(pid.to_string());
        self.process.launch(&command)
    }

    pub fn stop(&self) {
        self.process.stop();
    }
}

/// Render a balancer template.
///
/// `{{port}}` and `{{pid_file}}` refer to the balancer itself. The body between
/// `{{#backends}}` and `{{/backends}}` is repeated once per backend with `{{name}}`,
/// `{{addr}}` and `{{port}}` bound to that backend.
///
/// A template with backends to place but no section for them, or with a section that
/// is never closed, is rejected.
pub fn render_template(
    template: &str,
    listen_port: u16,
    pid_file: &Path,
    backends: &[Backend],
) -> Result<String> {
    if !backends.is_empty() && !template.contains(SECTION_OPEN) {
        return Err(missing_section());
    }

    let globals = [
        ("port", listen_port.to_string()),
        ("pid_file", pid_file.display().to_string()),
    ];

    let mut out = String::new();
    let mut rest = template;
    while let Some(open) = rest.find(SECTION_OPEN) {
        let body_start = open + SECTION_OPEN.len();
        let body_len = rest[body_start..]
            .find(SECTION_CLOSE)
            .ok_or_else(unclosed_section)?;

        out.push_str(&substitute(&rest[..open], &globals));
        let body = strip_leading_newline(&rest[body_start..body_start + body_len]);
        for backend in backends {
            let vars = [
                ("name", backend.name.clone()),
                ("addr", backend.addr.clone()),
                ("port", backend.port.to_string()),
            ];
            out.push_str(&substitute(body, &vars));
        }
        rest = strip_leading_newline(&rest[body_start + body_len + SECTION_CLOSE.len()..]);
    }
    out.push_str(&substitute(rest, &globals));
    Ok(out)
}

/// Reject a template that could never list the pool's backends
pub fn check_template(template: &str) -> Result<()> {
    let Some(open) = template.find(SECTION_OPEN) else {
        return Err(missing_section());
    };
    if !template[open..].contains(SECTION_CLOSE) {
        return Err(unclosed_section());
    }
    Ok(())
}

fn missing_section() -> PoolError {
    PoolError::InvalidConfig(format!(
        "balancer template has no {}...{} section",
        SECTION_OPEN, SECTION_CLOSE
    ))
}

fn unclosed_section() -> PoolError {
    PoolError::InvalidConfig(format!(
        "balancer template opens {} but never closes it",
        SECTION_OPEN
    ))
}

fn strip_leading_newline(text: &str) -> &str {
    text.strip_prefix("\r\n")
        .or_else(|| text.strip_prefix('\n'))
        .unwrap_or(text)
}

fn substitute(text: &str, vars: &[(&str, String)]) -> String {
    vars.iter().fold(text.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{{{}}}}}", key), value)
    })
}
