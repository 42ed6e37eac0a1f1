use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;
use crate::store::WalStore;

/// Background task that periodically cancels pending bookings whose payment never arrived.
pub async fn run_reaper(engine: Arc<Engine>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        reap_once(&engine).await;
    }
}

async fn reap_once(engine: &Engine) -> usize {
    let expired = match engine.expire_pending(engine.now()).await {
        Ok(expired) => expired,
        Err(e) => {
            // Retried on the next tick
            warn!("pending expiry sweep failed: {e}");
            return 0;
        }
    };
    if !expired.is_empty() {
        info!("reaped {} unpaid bookings", expired.len());
    }
    engine.prune_write_slots();
    expired.len()
}

/// Background task that compacts the reservation log once enough appends pile up.
pub async fn run_compactor(store: Arc<WalStore>, threshold: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        compact_if_due(&store, threshold).await;
    }
}

async fn compact_if_due(store: &WalStore, threshold: u64) -> bool {
    let appends = store.appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    debug!("compacting reservation log after {appends} appends");
    match store.compact().await {
        Ok(()) => {
            store.notify().prune();
            true
        }
        Err(e) => {
            warn!("reservation log compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::clock::FixedClock;
    use crate::config::BookingPolicy;
    use crate::model::*;
    use crate::notify::NotifyHub;
    use crate::payment::CashOnly;
    use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("pitchbook_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    struct Setup {
        engine: Arc<Engine>,
        store: Arc<WalStore>,
        clock: Arc<FixedClock>,
        arena: Resource,
    }

    fn setup(name: &str) -> Setup {
        let store = Arc::new(WalStore::open(test_wal_path(name), Arc::new(NotifyHub::new())).unwrap());
        let catalog = Arc::new(StaticCatalog::new());
        let h = |h| NaiveTime::from_hms_opt(h, 0, 0).unwrap();
        let arena = Resource::new(Ulid::new(), "Arena", 3500, h(6), h(22));
        catalog.upsert(arena.clone()).unwrap();
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap()));
        let engine = Engine::with_clock(
            store.clone(),
            catalog,
            Arc::new(CashOnly),
            BookingPolicy::default(),
            clock.clone(),
        );
        Setup {
            engine: Arc::new(engine),
            store,
            clock,
            arena,
        }
    }

    async fn book(s: &Setup, start: u32, method: PaymentMethod) -> Reservation {
        s.engine
            .create_booking(
                s.arena.id,
                NaiveDate::from_ymd_opt(2026, 10, 20).unwrap(),
                NaiveTime::from_hms_opt(start, 0, 0).unwrap(),
                1,
                Holder::Account(Ulid::new()),
                method,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn reaper_expires_only_stale_pending() {
        let s = setup("reaper_stale.wal");
        let stale = book(&s, 10, PaymentMethod::Online).await;
        s.clock.advance(chrono::Duration::minutes(10));
        let fresh = book(&s, 12, PaymentMethod::Online).await;
        let cash = book(&s, 14, PaymentMethod::Cash).await;

        s.clock.advance(chrono::Duration::minutes(6));
        assert_eq!(reap_once(&s.engine).await, 1);

        assert_eq!(s.engine.get_booking(stale.id).await.unwrap().status, Status::Cancelled);
        assert_eq!(s.engine.get_booking(fresh.id).await.unwrap().status, Status::Pending);
        assert_eq!(s.engine.get_booking(cash.id).await.unwrap().status, Status::Confirmed);

        // Nothing left to do on the next sweep
        assert_eq!(reap_once(&s.engine).await, 0);
        assert_eq!(s.engine.write_slot_count(), 0);
    }

    #[tokio::test]
    async fn compactor_waits_for_threshold() {
        let s = setup("reaper_compact.wal");
        for start in [8, 10, 12] {
            book(&s, start, PaymentMethod::Cash).await;
        }
        assert!(!compact_if_due(&s.store, 10).await);
        assert_eq!(s.store.appends_since_compact().await, 3);

        assert!(compact_if_due(&s.store, 3).await);
        assert_eq!(s.store.appends_since_compact().await, 0);
        assert_eq!(s.store.reservation_count(), 3);
    }

    #[tokio::test]
    async fn reaper_task_runs_on_its_period() {
        let s = setup("reaper_task.wal");
        let pending = book(&s, 10, PaymentMethod::Online).await;
        s.clock.advance(chrono::Duration::minutes(20));

        let handle = tokio::spawn(run_reaper(s.engine.clone(), Duration::from_secs(5)));
        // Give the first tick a chance to run
        for _ in 0..50 {
            tokio::task::yield_now().await;
            if s.engine.get_booking(pending.id).await.unwrap().status == Status::Cancelled {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();
        assert_eq!(s.engine.get_booking(pending.id).await.unwrap().status, Status::Cancelled);
    }
}
