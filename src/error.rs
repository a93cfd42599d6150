use std::path::PathBuf;

use thiserror::Error;

/// Unified error type for the proxy pool supervisor
#[derive(Error, Debug)]
pub enum PoolError {
    // Configuration errors
    #[error("Invalid mode {0}")]
    InvalidMode(String),

    #[error("Pool size should be greater than 0!")]
    InvalidPoolSize,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Missing template config file at {}", .0.display())]
    MissingTemplate(PathBuf),

    #[error("Mode is set to 'list' but {} was not found!", .0.display())]
    MissingProxyList(PathBuf),

    // Upstream errors
    #[error("Invalid proxy URI {uri:?}: {reason}")]
    InvalidProxyUri { uri: String, reason: String },

    // Process errors
    #[error("Executable for {service} not found")]
    ExecutableNotFound { service: &'static str },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{service} on port {port} is not running")]
    NotRunning { service: &'static str, port: u16 },

    #[error("Invalid pid file {}: {contents:?}", .path.display())]
    InvalidPidFile { path: PathBuf, contents: String },

    #[error("Failed to signal pid {pid}: {source}")]
    Signal {
        pid: i32,
        #[source]
        source: nix::Error,
    },

    // Health check errors
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    // I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for supervisor operations
pub type Result<T> = std::result::Result<T, PoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_messages() {
        assert_eq!(
            PoolError::InvalidMode("socks".to_string()).to_string(),
            "Invalid mode socks"
        );
        assert_eq!(
            PoolError::MissingProxyList(PathBuf::from("/usr/local/etc/proxy.lst")).to_string(),
            "Mode is set to 'list' but /usr/local/etc/proxy.lst was not found!"
        );
        assert_eq!(
            PoolError::MissingTemplate(PathBuf::from("/usr/local/etc/haproxy.cfg.tmpl"))
                .to_string(),
            "Missing template config file at /usr/local/etc/haproxy.cfg.tmpl"
        );
    }
}
