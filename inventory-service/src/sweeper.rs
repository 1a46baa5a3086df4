//! Periodic expiry of reservations past their TTL.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::coordinator::ReservationCoordinator;

pub struct ExpirySweeper {
    coordinator: Arc<ReservationCoordinator>,
    interval: Duration,
}

/// Running sweeper. Dropping the handle leaves the task running until the
/// token it was started with is cancelled.
pub struct SweeperHandle {
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stops scheduling new ticks and waits for the task to exit. A tick
    /// already in progress finishes first.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.task.await {
            error!(error = %e, "Expiry sweeper task failed");
        }
    }
}

impl ExpirySweeper {
    pub fn new(coordinator: Arc<ReservationCoordinator>, interval: Duration) -> Self {
        Self { coordinator, interval }
    }

    pub fn start(self, shutdown: CancellationToken) -> SweeperHandle {
        let token = shutdown.clone();
        let task = tokio::spawn(async move { self.run(token).await });
        SweeperHandle { shutdown, task }
    }

    async fn run(self, shutdown: CancellationToken) {
        info!(interval_secs = self.interval.as_secs(), "Expiry sweeper started");
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Expiry sweeper received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        info!("Expiry sweeper stopped");
    }

    async fn tick(&self) {
        match self.coordinator.sweep_expired(Utc::now()).await {
            Ok(report) if report.lines_expired > 0 || report.failures > 0 => {
                info!(%report, "Expiry sweep finished");
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Expiry sweep failed, retrying on next tick"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{ReservationSettings, ReserveItem, ReserveRequest};
    use crate::store::testing::FaultyStore;
    use crate::store::MemoryInventoryStore;

    #[tokio::test]
    async fn expires_reservations_and_stops_on_shutdown() {
        let store = Arc::new(MemoryInventoryStore::new());
        let p = store.add_product("p", 4).await;
        let settings = ReservationSettings {
            ttl: chrono::Duration::zero(),
            ..Default::default()
        };
        let coordinator = Arc::new(ReservationCoordinator::new(store.clone(), settings));
        coordinator
            .reserve(ReserveRequest {
                items: vec![ReserveItem { product_id: p, quantity: 4 }],
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(store.stock_level(p).await.unwrap().available, 0);

        // the first tick fires immediately; give the clock a moment to pass expires_at
        time::sleep(Duration::from_millis(5)).await;
        let handle = ExpirySweeper::new(coordinator, Duration::from_millis(10)).start(CancellationToken::new());

        let mut freed = false;
        for _ in 0..100 {
            if store.stock_level(p).await.unwrap().reserved == 0 {
                freed = true;
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;

        assert!(freed);
    }

    #[tokio::test]
    async fn shutdown_before_first_tick_returns_promptly() {
        let store = Arc::new(MemoryInventoryStore::new());
        let coordinator = Arc::new(ReservationCoordinator::new(store, ReservationSettings::default()));
        let token = CancellationToken::new();
        let handle = ExpirySweeper::new(coordinator, Duration::from_secs(3600)).start(token.clone());

        time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .expect("sweeper did not stop");
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn keeps_running_after_a_failed_scan() {
        let inner = MemoryInventoryStore::new();
        let p = inner.add_product("p", 4).await;
        let store = Arc::new(FaultyStore::new(inner).with_find_expired_failures(2));
        let settings = ReservationSettings {
            ttl: chrono::Duration::zero(),
            ..Default::default()
        };
        let coordinator = Arc::new(ReservationCoordinator::new(store.clone(), settings));
        coordinator
            .reserve(ReserveRequest {
                items: vec![ReserveItem { product_id: p, quantity: 4 }],
                ..Default::default()
            })
            .await
            .unwrap();

        time::sleep(Duration::from_millis(5)).await;
        let handle = ExpirySweeper::new(coordinator, Duration::from_millis(10)).start(CancellationToken::new());

        let mut freed = false;
        for _ in 0..100 {
            if store.inner.stock_level(p).await.unwrap().reserved == 0 {
                freed = true;
                break;
            }
            time::sleep(Duration::from_millis(10)).await;
        }
        handle.shutdown().await;

        assert!(freed);
    }
}
