//! Pool construction for both operating modes

use tracing::{info, warn};

use crate::config::{Config, Mode};
use crate::daemon::ServiceContext;
use crate::error::Result;
use crate::models::{read_proxy_list, ProxyUri};
use crate::proxy::unit::{ProxyUnit, UnitOptions};

/// Build the pool for the configured mode. Units are created, not started.
pub fn build_pool(
    config: &Config,
    ctx: &ServiceContext,
    options: &UnitOptions,
) -> Result<Vec<ProxyUnit>> {
    let pool = match config.mode {
        Mode::Tor => tor_pool(config.pool_size, ctx, options),
        Mode::List => {
            let uris = read_proxy_list(&config.proxy_list)?;
            list_pool(config.pool_size, uris, ctx, options)
        }
    };

    info!("built pool of {} proxies in {} mode", pool.len(), config.mode);
    Ok(pool)
}

/// `size` Tor-backed units with ids `0..size`
pub fn tor_pool(size: u16, ctx: &ServiceContext, options: &UnitOptions) -> Vec<ProxyUnit> {
    (0..size).map(|id| ProxyUnit::tor(id, ctx, options)).collect()
}

/// One unit per list entry, in list order, shrinking the pool if the list is short
pub fn list_pool(
    size: u16,
    uris: Vec<ProxyUri>,
    ctx: &ServiceContext,
    options: &UnitOptions,
) -> Vec<ProxyUnit> {
    let requested = size as usize;
    if requested > uris.len() {
        warn!(
            "Supplied pool_size is greater than supplied proxy list. pool_size will be adjusted to {}",
            uris.len()
        );
    }

    uris.into_iter()
        .take(requested)
        .zip(0u16..)
        .map(|(uri, id)| ProxyUnit::public(id, uri, ctx, options))
        .collect()
}
