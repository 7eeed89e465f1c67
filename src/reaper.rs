use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{Engine, now_ms};

/// Background task that persists the expiry of holds past their TTL.
/// Expiry is already effective for readers through the status projection;
/// the reaper frees the stay entries and makes the expiry durable.
pub async fn run_reaper(engine: Arc<Engine>) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;
        let now = now_ms();
        for (reservation_id, room_id) in engine.collect_expired_holds(now) {
            match engine.expire_reservation(reservation_id, room_id).await {
                Ok(()) => info!("reaped expired hold {reservation_id}"),
                Err(e) => {
                    // May have been finalized or cancelled since the sweep
                    tracing::debug!("reaper skip {reservation_id}: {e}");
                }
            }
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {appends} appends"),
            Err(e) => tracing::warn!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Day, ReservationStatus, StayRange};
    use crate::notify::NotifyHub;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("innkeep_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    #[tokio::test]
    async fn reaper_collects_and_expires() {
        let path = test_wal_path("reaper_collect.wal");
        let notify = Arc::new(NotifyHub::new());
        let engine = Arc::new(Engine::new(path, notify).unwrap());

        let category_id = Ulid::new();
        let room_id = Ulid::new();
        engine.create_category(category_id, 100, 0).await.unwrap();
        engine.create_room(room_id, category_id).await.unwrap();

        let hold_id = Ulid::new();
        let range = StayRange::new(Day::from_ymd(2026, 3, 1), Day::from_ymd(2026, 3, 4));
        engine
            .create_hold(hold_id, category_id, "guest", range, 2, 0)
            .await
            .unwrap();

        // Nothing expired while the TTL is live
        assert!(engine.collect_expired_holds(now_ms()).is_empty());

        // Well past the TTL, the sweep finds it
        let future = now_ms() + crate::limits::HOLD_TTL_MS + 1_000;
        let expired = engine.collect_expired_holds(future);
        assert_eq!(expired, vec![(hold_id, room_id)]);

        // expire_reservation is a no-op while the hold is still live,
        // so nothing changes here
        engine.expire_reservation(hold_id, room_id).await.unwrap();
        let res = engine.reservations.get(&hold_id).unwrap();
        assert_eq!(res.status, ReservationStatus::Pending);
    }
}
