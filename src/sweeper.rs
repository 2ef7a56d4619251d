use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::engine::Engine;

/// Background task that periodically completes ended reservations and frees their spots.
pub async fn run_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        match engine.sweep().await {
            Ok(0) => debug!("sweep: nothing expired"),
            Ok(n) => info!(completed = n, "sweep finished"),
            // A store failure leaves the remaining reservations for the next tick.
            Err(e) => error!(error = %e, "sweep failed"),
        }
    }
}

/// Background task that compacts the WAL once enough appends have piled up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        if let Err(e) = engine.compact_wal().await {
            error!(error = %e, appends, "WAL compaction failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock, StorageZone};
    use crate::engine::NewLot;
    use crate::model::LedgerStatus;
    use crate::notify::NotifyHub;
    use chrono::{TimeZone, Utc};
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("parkd_test_sweeper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn sweeper_loop_completes_expired_reservation() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 15, 8, 0, 0).unwrap(),
        ));
        let engine = Arc::new(
            Engine::new(
                test_wal_path("sweeper_loop.wal"),
                Arc::new(NotifyHub::new()),
                clock.clone(),
                StorageZone::default(),
            )
            .unwrap(),
        );
        let lot = engine
            .create_lot(NewLot {
                name: "Gara".into(),
                address: "Piata Garii 1".into(),
                latitude: 46.78,
                longitude: 23.57,
                hourly_rate: 600,
                amenities: vec![],
                description: None,
            })
            .await
            .unwrap();
        let spot = engine.add_spot(lot, "G7".into(), "standard".into()).await.unwrap();
        let user = Ulid::new();
        let now = clock.now();
        let id = engine
            .create_reservation(user, spot, now, now + chrono::Duration::hours(1), None)
            .await
            .unwrap();
        clock.advance(chrono::Duration::hours(2));

        let handle = tokio::spawn(run_sweeper(engine.clone(), Duration::from_millis(10)));
        let mut completed = false;
        for _ in 0..100 {
            let r = engine.get_reservation(user, id).await.unwrap().reservation;
            if r.status == LedgerStatus::Completed {
                completed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        assert!(completed);
        assert!(engine.is_available(spot).await.unwrap());
    }
}
