//! Proxy pool
//!
//! This module provides the addressable side of the system:
//! - Proxy units (Tor-backed or public-list-backed)
//! - Health probing through each unit's listen port
//! - Pool construction per operating mode

pub mod health;
pub mod pool;
pub mod unit;

pub use health::{HealthCheckerConfig, HealthProbe, HttpHealthProbe};
pub use pool::build_pool;
pub use unit::{ProxyUnit, UnitBackend, UnitOptions};
