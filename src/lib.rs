//! Rotating Proxy - supervised pool of local forward proxies
//!
//! Runs a pool of Polipo relays, each chained either to its own Tor instance or to a
//! public proxy from a list, puts HAProxy in front of them, and keeps the pool healthy.
//!
//! ## Features
//!
//! - Tor-backed pool with per-pass circuit rotation
//! - List-backed pool over HTTP, SOCKS4, SOCKS4a and SOCKS5 upstreams
//! - HTTP health checks through every unit with automatic restart
//! - HAProxy config rendered from a template

pub mod config;
pub mod error;
pub mod models;
pub mod proxy;
pub mod daemon;
pub mod services;

pub use config::{Config, Mode};
pub use error::{PoolError, Result};
