use crate::daemon::haproxy;
use crate::daemon::tor::DEFAULT_NEWNYM_HELPER;
use crate::error::{PoolError, Result};
use crate::proxy::health::{HealthCheckerConfig, DEFAULT_TEST_URL};
use crate::proxy::unit::MAX_UNIT_ID;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// How the pool's upstreams are provided
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One local Tor instance per unit
    Tor,
    /// One public proxy per unit, read from the proxy list
    List,
}

impl Mode {
    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "tor" => Ok(Mode::Tor),
            "list" => Ok(Mode::List),
            other => Err(PoolError::InvalidMode(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Tor => "tor",
            Mode::List => "list",
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub mode: Mode,
    /// Requested number of proxy units
    pub pool_size: u16,
    /// Health check settings
    pub health: HealthCheckerConfig,
    /// Supervisor loop timing
    pub supervisor: SupervisorConfig,
    /// Load balancer settings
    pub balancer: BalancerConfig,
    /// Proxy list (list mode)
    pub proxy_list: PathBuf,
    /// Helper script for circuit rotation
    pub newnym_helper: PathBuf,
    /// Root of the lib/run/log service trees
    pub var_root: PathBuf,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Pause between loop iterations (default: 90s)
    pub check_interval: Duration,
    /// Pause between stop and start when restarting a unit (default: 5s)
    pub restart_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(90),
            restart_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BalancerConfig {
    /// HAProxy listen port (default: 5566)
    pub port: u16,
    /// Template the config is rendered from
    pub template: PathBuf,
    /// Rendered config handed to HAProxy
    pub config: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Debug-level logging
    pub debug: bool,
    /// Output format (pretty, json)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mode = Mode::from_str(&get_env_or("mode", ""))?;

        let pool_size: i64 = get_env_or("pool_size", "0").trim().parse().unwrap_or(0);
        if pool_size <= 0 {
            return Err(PoolError::InvalidPoolSize);
        }
        if pool_size > i64::from(MAX_UNIT_ID) + 1 {
            return Err(PoolError::InvalidConfig(format!(
                "pool_size must not exceed {}",
                u32::from(MAX_UNIT_ID) + 1
            )));
        }

        Ok(Config {
            mode,
            pool_size: pool_size as u16,
            health: HealthCheckerConfig {
                test_url: non_empty_env("test_url").unwrap_or_else(|| DEFAULT_TEST_URL.into()),
                timeout: get_secs("check_timeout", 20)?,
                verify_tls: parse_bool("ssl_verify", &get_env_or("ssl_verify", "true"))?,
            },
            supervisor: SupervisorConfig {
                check_interval: get_secs("check_interval", 90)?,
                restart_delay: get_secs("restart_delay", 5)?,
            },
            balancer: BalancerConfig {
                port: get_env_or("haproxy_port", &haproxy::DEFAULT_PORT.to_string())
                    .parse()
                    .map_err(|_| {
                        PoolError::InvalidConfig("haproxy_port must be a valid port number".into())
                    })?,
                template: get_env_or("haproxy_template", "/usr/local/etc/haproxy.cfg.tmpl").into(),
                config: get_env_or("haproxy_config", "/usr/local/etc/haproxy.cfg").into(),
            },
            proxy_list: get_env_or("proxy_list", "/usr/local/etc/proxy.lst").into(),
            newnym_helper: get_env_or("newnym_helper", DEFAULT_NEWNYM_HELPER).into(),
            var_root: get_env_or("var_root", "/var").into(),
            log: LogConfig {
                debug: non_empty_env("DEBUG").is_some(),
                format: get_env_or("log_format", "pretty"),
            },
        })
    }

    /// Pre-flight checks on files the run depends on
    pub fn validate(&self) -> Result<()> {
        if !self.balancer.template.is_file() {
            return Err(PoolError::MissingTemplate(self.balancer.template.clone()));
        }
        haproxy::check_template(&std::fs::read_to_string(&self.balancer.template)?)?;
        if self.mode == Mode::List && !self.proxy_list.is_file() {
            return Err(PoolError::MissingProxyList(self.proxy_list.clone()));
        }
        Ok(())
    }
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn get_secs(key: &str, default: u64) -> Result<Duration> {
    let raw = get_env_or(key, &default.to_string());
    raw.trim()
        .parse()
        .map(Duration::from_secs)
        .map_err(|_| PoolError::InvalidConfig(format!("{} must be a number of seconds", key)))
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_lowercase().as_str() {
        "" | "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(PoolError::InvalidConfig(format!(
            "{} must be a boolean, got {:?}",
            key, other
        ))),
    }
}
