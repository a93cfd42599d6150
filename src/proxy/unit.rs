//! Proxy units
//!
//! A unit is one addressable forward-proxy endpoint on `20000 + id`. It always owns a
//! Polipo relay and, when Tor-backed, the Tor instance that relay points at.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, info_span, Instrument, Span};

use crate::daemon::{PolipoRelay, ServiceContext, TorRelay, Upstream};
use crate::error::Result;
use crate::models::ProxyUri;
use crate::proxy::health::HealthProbe;

pub const SOCKS_PORT_BASE: u16 = 10000;
pub const LISTEN_PORT_BASE: u16 = 20000;
pub const CONTROL_PORT_BASE: u16 = 30000;

/// Largest id whose three ports stay inside their own 10000-wide ranges
pub const MAX_UNIT_ID: u16 = 9999;

/// Per-unit collaborators
#[derive(Clone)]
pub struct UnitOptions {
    pub probe: Arc<dyn HealthProbe>,
    /// Pause between stop and start on restart
    pub restart_delay: Duration,
}

impl UnitOptions {
    pub fn new(probe: Arc<dyn HealthProbe>, restart_delay: Duration) -> Self {
        Self {
            probe,
            restart_delay,
        }
    }
}

/// What a unit's relay forwards to
#[derive(Debug, Clone)]
pub enum UnitBackend {
    Tor(Arc<TorRelay>),
    Public(ProxyUri),
}

pub struct ProxyUnit {
    id: u16,
    backend: UnitBackend,
    relay: PolipoRelay,
    probe: Arc<dyn HealthProbe>,
    restart_delay: Duration,
    span: Span,
}

impl std::fmt::Debug for ProxyUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyUnit")
            .field("id", &self.id)
            .field("backend", &self.backend)
            .field("relay", &self.relay)
            .finish()
    }
}

impl ProxyUnit {
    /// Tor-backed unit: SOCKS on `10000 + id`, control on `30000 + id`
    pub fn tor(id: u16, ctx: &ServiceContext, options: &UnitOptions) -> Self {
        let tor = Arc::new(TorRelay::new(
            SOCKS_PORT_BASE + id,
            CONTROL_PORT_BASE + id,
            ctx,
        ));
        let relay = PolipoRelay::new(LISTEN_PORT_BASE + id, Upstream::Tor(tor.clone()), ctx);
        Self::assemble(id, UnitBackend::Tor(tor), relay, options)
    }

    /// Unit chained to a public proxy from the list
    pub fn public(id: u16, uri: ProxyUri, ctx: &ServiceContext, options: &UnitOptions) -> Self {
        let relay = PolipoRelay::new(LISTEN_PORT_BASE + id, Upstream::Proxy(uri.clone()), ctx);
        Self::assemble(id, UnitBackend::Public(uri), relay, options)
    }

    fn assemble(id: u16, backend: UnitBackend, relay: PolipoRelay, options: &UnitOptions) -> Self {
        let span = info_span!("proxy", id, port = LISTEN_PORT_BASE + id);
        Self {
            id,
            backend,
            relay,
            probe: options.probe.clone(),
            restart_delay: options.restart_delay,
            span,
        }
    }

    pub fn id(&self) -> u16 {
        self.id
    }

    /// Port every client and the balancer use to reach this unit
    pub fn listen_port(&self) -> u16 {
        LISTEN_PORT_BASE + self.id
    }

    pub fn backend(&self) -> &UnitBackend {
        &self.backend
    }

    pub fn tor_relay(&self) -> Option<&TorRelay> {
        match &self.backend {
            UnitBackend::Tor(tor) => Some(tor),
            UnitBackend::Public(_) => None,
        }
    }

    pub fn relay(&self) -> &PolipoRelay {
        &self.relay
    }

    /// Start Tor (if any) and then the relay that points at it
    pub fn start(&self) -> Result<()> {
        let _enter = self.span.enter();
        info!("starting proxy id {}", self.id);

        if let Some(tor) = self.tor_relay() {
            tor.start()?;
        }
        self.relay.start()
    }

    pub fn stop(&self) {
        let _enter = self.span.enter();
        info!("stopping proxy id {}", self.id);

        if let Some(tor) = self.tor_relay() {
            tor.stop();
        }
        self.relay.stop();
    }

    /// Stop, wait for the ports to be released, start again
    pub async fn restart(&self) -> Result<()> {
        self.stop();
        sleep(self.restart_delay)
            .instrument(self.span.clone())
            .await;
        self.start()
    }

    pub async fn is_working(&self) -> bool {
        self.probe
            .is_working(self.listen_port())
            .instrument(self.span.clone())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::launcher::testing::RecordingLauncher;
    use crate::daemon::ServicePaths;
    use crate::models::ProxyScheme;
    use crate::proxy::health::testing::StaticProbe;

    fn setup(
        probe: StaticProbe,
    ) -> (tempfile::TempDir, Arc<RecordingLauncher>, ServiceContext, UnitOptions) {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(RecordingLauncher::new());
        let ctx = ServiceContext::new(ServicePaths::new(dir.path()), launcher.clone());
        let options = UnitOptions::new(Arc::new(probe), Duration::from_secs(5));
        (dir, launcher, ctx, options)
    }

    #[test]
    fn test_tor_unit_port_layout() {
        let (_dir, _launcher, ctx, options) = setup(StaticProbe::healthy());
        let unit = ProxyUnit::tor(2, &ctx, &options);

        let tor = unit.tor_relay().unwrap();
        assert_eq!(tor.port(), 10002);
        assert_eq!(tor.control_port(), 30002);
        assert_eq!(unit.listen_port(), 20002);
        assert_eq!(unit.relay().port(), 20002);
        assert_eq!(unit.relay().upstream().port(), Some(10002));
        assert_eq!(unit.relay().upstream().scheme(), ProxyScheme::Socks5);
    }

    #[test]
    fn test_public_unit_has_no_tor() {
        let (_dir, _launcher, ctx, options) = setup(StaticProbe::healthy());
        let uri = ProxyUri::parse("socks5://9.9.9.9").unwrap();
        let unit = ProxyUnit::public(7, uri, &ctx, &options);

        assert!(unit.tor_relay().is_none());
        assert_eq!(unit.listen_port(), 20007);
        assert_eq!(unit.relay().upstream().port(), Some(9050));
    }

    #[test]
    fn test_tor_unit_starts_tor_before_relay() {
        let (_dir, launcher, ctx, options) = setup(StaticProbe::healthy());
        let unit = ProxyUnit::tor(0, &ctx, &options);

        unit.start().unwrap();

        let tags: Vec<_> = launcher.launched().iter().map(|c| c.tag).collect();
        assert_eq!(tags, vec!["tor", "polipo"]);
    }

    #[test]
    fn test_tor_unit_stops_both_in_order() {
        let (_dir, launcher, ctx, options) = setup(StaticProbe::healthy());
        let unit = ProxyUnit::tor(1, &ctx, &options);

        let tor_pid = unit.tor_relay().unwrap().pid_file();
        std::fs::create_dir_all(tor_pid.parent().unwrap()).unwrap();
        std::fs::write(&tor_pid, "100").unwrap();
        std::fs::create_dir_all(unit.relay().pid_file().parent().unwrap()).unwrap();
        std::fs::write(unit.relay().pid_file(), "200").unwrap();

        unit.stop();
        assert_eq!(launcher.terminated(), vec![100, 200]);
    }

    #[test]
    fn test_public_unit_starts_relay_only() {
        let (_dir, launcher, ctx, options) = setup(StaticProbe::healthy());
        let uri = ProxyUri::parse("http://1.2.3.4:8080").unwrap();
        let unit = ProxyUnit::public(0, uri, &ctx, &options);

        unit.start().unwrap();

        let tags: Vec<_> = launcher.launched().iter().map(|c| c.tag).collect();
        assert_eq!(tags, vec!["polipo"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_is_stop_delay_start() {
        let (_dir, launcher, ctx, options) = setup(StaticProbe::healthy());
        let unit = ProxyUnit::tor(3, &ctx, &options);

        let before = tokio::time::Instant::now();
        unit.restart().await.unwrap();

        assert!(before.elapsed() >= Duration::from_secs(5));
        assert_eq!(launcher.launched().len(), 2);
    }

    #[tokio::test]
    async fn test_is_working_probes_listen_port() {
        let (_dir, _launcher, ctx, _) = setup(StaticProbe::healthy());
        let probe = Arc::new(StaticProbe::failing([20001]));
        let options = UnitOptions::new(probe.clone(), Duration::ZERO);

        let healthy = ProxyUnit::tor(0, &ctx, &options);
        let broken = ProxyUnit::tor(1, &ctx, &options);

        assert!(healthy.is_working().await);
        assert!(!broken.is_working().await);
        assert_eq!(probe.checked(), vec![20000, 20001]);
    }
}
