use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::hub::CollabHub;
use crate::config::Config;

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub heartbeat_interval: Duration,
    pub snapshot_interval: Duration,
    pub maintenance_interval: Duration,
    pub session_archive_days: i64,
    pub event_retention_days: i64,
}

impl SupervisorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            heartbeat_interval: config.heartbeat_interval(),
            snapshot_interval: config.snapshot_interval(),
            maintenance_interval: config.maintenance_interval(),
            session_archive_days: config.session_archive_days,
            event_retention_days: config.event_retention_days,
        }
    }
}

/// Background loops keeping the hub healthy: heartbeats, periodic
/// snapshots, and the archive/purge sweep.
pub struct Supervisor {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Supervisor {
    pub fn start(hub: Arc<CollabHub>, settings: SupervisorSettings) -> Self {
        let (shutdown, _) = watch::channel(false);
        let mut tasks = Vec::new();

        let heartbeat_hub = hub.clone();
        tasks.push(spawn_loop("heartbeat", settings.heartbeat_interval, shutdown.subscribe(), move || {
            let hub = heartbeat_hub.clone();
            async move {
                let evicted = hub.heartbeat().await;
                if evicted > 0 {
                    info!("Heartbeat evicted {} unresponsive clients", evicted);
                }
            }
        }));

        let snapshot_hub = hub.clone();
        tasks.push(spawn_loop("snapshot", settings.snapshot_interval, shutdown.subscribe(), move || {
            let hub = snapshot_hub.clone();
            async move {
                let saved = hub.persist_dirty("periodic").await;
                if saved > 0 {
                    debug!("Periodic snapshot saved {} documents", saved);
                }
            }
        }));

        let maintenance_hub = hub;
        let archive_days = settings.session_archive_days;
        let retention_days = settings.event_retention_days;
        tasks.push(spawn_loop("maintenance", settings.maintenance_interval, shutdown.subscribe(), move || {
            let hub = maintenance_hub.clone();
            async move {
                hub.run_maintenance(archive_days, retention_days).await;
            }
        }));

        info!(
            "Supervisor started (heartbeat {:?}, snapshot {:?}, maintenance {:?})",
            settings.heartbeat_interval, settings.snapshot_interval, settings.maintenance_interval
        );
        Self { shutdown, tasks }
    }

    /// Stop every loop after its current round
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!("Supervisor stopped");
    }
}

fn spawn_loop<F, Fut>(name: &'static str, period: Duration, mut shutdown: watch::Receiver<bool>, mut round: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        // First round one full period after start
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => round().await,
                _ = shutdown.changed() => break,
            }
        }
        debug!("{} loop exited", name);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crdt::LoroMergeEngine;
    use crate::db::MemoryCollabStore;
    use crate::services::auth_service::Authenticator;
    use crate::ws::client::Outbound;
    use crate::ws::hub::HubSettings;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn heartbeat_loop_evicts_silent_clients() {
        let hub = Arc::new(CollabHub::new(
            HubSettings::default(),
            Arc::new(MemoryCollabStore::new()),
            Arc::new(LoroMergeEngine),
            Arc::new(Authenticator::new(None, None)),
        ));
        let (tx, mut rx) = mpsc::unbounded_channel();
        hub.on_connect(tx).await;

        let supervisor = Supervisor::start(
            hub.clone(),
            SupervisorSettings {
                heartbeat_interval: Duration::from_secs(30),
                snapshot_interval: Duration::from_secs(3600),
                maintenance_interval: Duration::from_secs(86_400),
                session_archive_days: 30,
                event_retention_days: 90,
            },
        );

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(hub.stats().await.connections, 1);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(hub.stats().await.connections, 0);

        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        assert!(frames.iter().any(|f| matches!(f, Outbound::Ping)));
        assert!(matches!(frames.last(), Some(Outbound::Close)));

        supervisor.stop().await;
    }
}
