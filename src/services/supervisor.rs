//! Pool supervisor
//!
//! Owns the pool and the load balancer. After bootstrap it loops forever: rotate Tor
//! circuits (Tor mode only), check every unit and restart the ones that fail, sleep.
//! All units are handled one after another on a single task, so a pass over many broken
//! units can take far longer than the nominal interval.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

use crate::config::Mode;
use crate::daemon::LoadBalancer;
use crate::error::Result;
use crate::proxy::ProxyUnit;

/// Outcome of one pass over the pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IterationSummary {
    /// Circuit rotations whose helper was launched
    pub rotated: usize,
    pub checked: usize,
    pub restarted: usize,
}

pub struct Supervisor {
    mode: Mode,
    pool: Vec<ProxyUnit>,
    balancer: LoadBalancer,
    interval: Duration,
}

impl Supervisor {
    pub fn new(mode: Mode, pool: Vec<ProxyUnit>, balancer: LoadBalancer, interval: Duration) -> Self {
        Self {
            mode,
            pool,
            balancer,
            interval,
        }
    }

    pub fn pool(&self) -> &[ProxyUnit] {
        &self.pool
    }

    pub fn balancer(&self) -> &LoadBalancer {
        &self.balancer
    }

    /// Register every unit with the balancer, start the units, then start the balancer.
    ///
    /// A unit that fails to start is left for the health checks to repair; a balancer
    /// that fails to start is fatal.
    pub fn bootstrap(&mut self) -> Result<()> {
        for unit in &self.pool {
            self.balancer.add_backend(unit);
            if let Err(e) = unit.start() {
                warn!("failed to start proxy id {}: {}", unit.id(), e);
            }
        }

        self.balancer.start()
    }

    /// One rotate/check/repair pass
    #[instrument(skip(self), fields(mode = %self.mode, pool = self.pool.len()))]
    pub async fn run_iteration(&self) -> IterationSummary {
        let mut summary = IterationSummary::default();

        if self.mode == Mode::Tor {
            info!("resetting circuits");
            for unit in &self.pool {
                let Some(tor) = unit.tor_relay() else { continue };
                info!("reset nym for {} (port {})", unit.id(), unit.listen_port());
                match tor.rotate_circuit() {
                    Ok(()) => summary.rotated += 1,
                    Err(e) => warn!("couldn't reset nym for {}: {}", unit.id(), e),
                }
            }
        }

        info!("testing proxies");
        for unit in &self.pool {
            info!("testing proxy {} (port {})", unit.id(), unit.listen_port());
            summary.checked += 1;

            if unit.is_working().await {
                continue;
            }

            summary.restarted += 1;
            if let Err(e) = unit.restart().await {
                error!("failed to restart proxy id {}: {}", unit.id(), e);
            }
        }

        summary
    }

    /// Sleep, pass, repeat until shutdown is signalled. A pass in progress is never
    /// interrupted.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting supervisor with {} proxies and {}s interval",
            self.pool.len(),
            self.interval.as_secs()
        );

        loop {
            info!("sleeping for {} seconds", self.interval.as_secs());
            tokio::select! {
                _ = sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Supervisor shutting down");
                        break;
                    }
                    continue;
                }
            }

            let summary = self.run_iteration().await;
            info!(
                rotated = summary.rotated,
                checked = summary.checked,
                restarted = summary.restarted,
                "pass complete"
            );
        }
    }

    /// Stop every unit and the balancer
    pub fn shutdown(&self) {
        for unit in &self.pool {
            unit.stop();
        }
        self.balancer.stop();
    }
}

/// Guard for managing the supervisor loop lifecycle
pub struct SupervisorHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl SupervisorHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for SupervisorHandle {
    fn default() -> Self {
        Self::new().0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::daemon::haproxy::DEFAULT_PORT;
    use crate::daemon::launcher::testing::RecordingLauncher;
    use crate::daemon::{ServiceContext, ServicePaths};
    use crate::models::parse_proxy_list;
    use crate::proxy::health::testing::StaticProbe;
    use crate::proxy::pool::{list_pool, tor_pool};
    use crate::proxy::UnitOptions;

    struct Fixture {
        _dir: tempfile::TempDir,
        launcher: Arc<RecordingLauncher>,
        probe: Arc<StaticProbe>,
        supervisor: Supervisor,
    }

    fn fixture(mode: Mode, size: u16, probe: StaticProbe) -> Fixture {
        fixture_with(mode, size, probe, RecordingLauncher::new())
    }

    fn fixture_with(
        mode: Mode,
        size: u16,
        probe: StaticProbe,
        launcher: RecordingLauncher,
    ) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let launcher = Arc::new(launcher);
        let ctx = ServiceContext::new(ServicePaths::new(dir.path().join("var")), launcher.clone());
        let probe = Arc::new(probe);
        let options = UnitOptions::new(probe.clone(), Duration::from_secs(5));

        let pool = match mode {
            Mode::Tor => tor_pool(size, &ctx, &options),
            Mode::List => {
                let list = "http://1.2.3.4:8080\nsocks5://5.6.7.8:1080\nsocks5://9.9.9.9\n";
                list_pool(size, parse_proxy_list(list).unwrap(), &ctx, &options)
            }
        };

        let template = dir.path().join("haproxy.cfg.tmpl");
        std::fs::write(&template, "{{#backends}}\nserver {{name}} {{addr}}:{{port}}\n{{/backends}}\n")
            .unwrap();
        let balancer = LoadBalancer::new(DEFAULT_PORT, template, dir.path().join("haproxy.cfg"), &ctx);

        Fixture {
            _dir: dir,
            launcher,
            probe,
            supervisor: Supervisor::new(mode, pool, balancer, Duration::from_secs(90)),
        }
    }

    #[test]
    fn test_bootstrap_registers_and_starts_everything() {
        let mut fx = fixture(Mode::Tor, 3, StaticProbe::healthy());

        fx.supervisor.bootstrap().unwrap();

        let ports: Vec<u16> = fx.supervisor.balancer().backends().iter().map(|b| b.port).collect();
        assert_eq!(ports, vec![20000, 20001, 20002]);

        let tags: Vec<_> = fx.launcher.launched().iter().map(|c| c.tag).collect();
        assert_eq!(
            tags,
            vec!["tor", "polipo", "tor", "polipo", "tor", "polipo", "haproxy"]
        );

        let config = std::fs::read_to_string(fx.supervisor.balancer().config_path()).unwrap();
        assert_eq!(
            config,
            "server proxy0 127.0.0.1:20000\nserver proxy1 127.0.0.1:20001\nserver proxy2 127.0.0.1:20002\n"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tor_mode_rotates_every_unit_once() {
        let fx = fixture(Mode::Tor, 3, StaticProbe::healthy());

        let summary = fx.supervisor.run_iteration().await;

        assert_eq!(
            summary,
            IterationSummary {
                rotated: 3,
                checked: 3,
                restarted: 0
            }
        );
        let control_ports: Vec<_> = fx
            .launcher
            .launched_with_tag("newnym")
            .into_iter()
            .map(|c| c.args[0].clone())
            .collect();
        assert_eq!(control_ports, vec!["30000", "30001", "30002"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_rotation_is_not_counted() {
        let fx = fixture_with(
            Mode::Tor,
            3,
            StaticProbe::healthy(),
            RecordingLauncher::failing_launches(vec!["newnym"]),
        );

        let summary = fx.supervisor.run_iteration().await;

        assert_eq!(
            summary,
            IterationSummary {
                rotated: 0,
                checked: 3,
                restarted: 0
            }
        );
        assert_eq!(fx.probe.checked(), vec![20000, 20001, 20002]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_mode_never_rotates() {
        let fx = fixture(Mode::List, 3, StaticProbe::healthy());

        let summary = fx.supervisor.run_iteration().await;

        assert_eq!(summary.rotated, 0);
        assert_eq!(summary.checked, 3);
        assert!(fx.launcher.launched_with_tag("newnym").is_empty());
        assert_eq!(fx.probe.checked(), vec![20000, 20001, 20002]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_unit_is_restarted_every_pass() {
        let fx = fixture(Mode::Tor, 3, StaticProbe::failing([20001]));

        for _ in 0..2 {
            fx.launcher.clear();
            let summary = fx.supervisor.run_iteration().await;
            assert_eq!(summary.restarted, 1);

            let restarted: Vec<_> = fx
                .launcher
                .launched()
                .into_iter()
                .filter(|c| c.tag != "newnym")
                .map(|c| (c.tag, c.args[0].clone()))
                .collect();
            assert_eq!(
                restarted,
                vec![
                    ("tor", "--SocksPort".to_string()),
                    ("polipo", "proxyPort=20001".to_string())
                ]
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_passes_until_shutdown() {
        let fx = fixture(Mode::List, 2, StaticProbe::healthy());
        let probe = fx.probe.clone();
        let supervisor = Arc::new(fx.supervisor);
        let (handle, shutdown) = SupervisorHandle::new();

        let task = {
            let supervisor = supervisor.clone();
            tokio::spawn(async move { supervisor.run(shutdown).await })
        };

        // First pass at 90s, second at 180s
        sleep(Duration::from_secs(200)).await;
        handle.shutdown();
        task.await.unwrap();

        assert_eq!(probe.checked(), vec![20000, 20001, 20000, 20001]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_before_first_pass() {
        let fx = fixture(Mode::Tor, 2, StaticProbe::healthy());
        let (handle, shutdown) = SupervisorHandle::new();

        handle.shutdown();
        fx.supervisor.run(shutdown).await;

        assert!(fx.probe.checked().is_empty());
        assert!(fx.launcher.launched().is_empty());
    }

    #[test]
    fn test_shutdown_stops_units_and_balancer() {
        let fx = fixture(Mode::List, 2, StaticProbe::healthy());

        for (pid, unit) in (100..).zip(fx.supervisor.pool()) {
            let pid_file = unit.relay().pid_file();
            std::fs::create_dir_all(pid_file.parent().unwrap()).unwrap();
            std::fs::write(pid_file, pid.to_string()).unwrap();
        }
        let balancer_pid = fx.supervisor.balancer().pid_file();
        std::fs::create_dir_all(balancer_pid.parent().unwrap()).unwrap();
        std::fs::write(balancer_pid, "300").unwrap();

        fx.supervisor.shutdown();

        assert_eq!(fx.launcher.terminated(), vec![100, 101, 300]);
    }
}
