use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::Engine;

/// How often the compactor checks the WAL size.
pub const COMPACT_CHECK_PERIOD: Duration = Duration::from_secs(10);

/// Background task that sends due reminders every `period`, so they go out
/// even when nobody lists their notifications.
pub async fn run_reminder_sweeper(engine: Arc<Engine>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        match engine.process_reminders().await {
            Ok(0) => {}
            Ok(n) => info!("reminder sweep: {n} bookings reminded"),
            Err(e) => tracing::warn!("reminder sweep failed: {e}"),
        }
    }
}

/// Background task that rewrites the WAL once more than `threshold` events
/// have been appended since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64, period: Duration) {
    let mut interval = tokio::time::interval(period);
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends <= threshold {
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => {
                metrics::counter!(crate::observability::WAL_COMPACTIONS_TOTAL).increment(1);
                info!("compacted WAL after {appends} appends");
            }
            Err(e) => tracing::error!("WAL compaction failed: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::directory::{StaticDirectory, UserDirectory};
    use crate::engine::Collaborators;
    use crate::model::*;
    use chrono::NaiveDate;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roombook_test_sweeper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn booking_request(start: &str, end: &str) -> BookingRequest {
        BookingRequest {
            room_id: 1,
            title: "Standup".into(),
            date: "2026-03-02".into(),
            start_time: start.into(),
            end_time: end.into(),
            ..Default::default()
        }
    }

    async fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        for _ in 0..100 {
            if done() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn sweeper_sends_due_reminders() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        let clock = Arc::new(ManualClock::new(day.and_hms_opt(7, 0, 0).unwrap()));
        let directory = Arc::new(StaticDirectory::seeded());
        let alice = directory.resolve_by_email("alice@example.com").unwrap();
        let engine = Arc::new(
            Engine::new(
                test_wal_path("sweeper_reminders.wal"),
                Collaborators::in_memory(directory, clock.clone()),
            )
            .unwrap(),
        );
        engine
            .create_booking(&alice, booking_request("09:00", "09:30"))
            .await
            .unwrap();

        tokio::spawn(run_reminder_sweeper(engine.clone(), Duration::from_millis(5)));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(engine.unread_count(alice.id), 0);

        clock.set(day.and_hms_opt(8, 0, 0).unwrap());
        assert!(wait_until(|| engine.unread_count(alice.id) == 1).await);
    }

    #[tokio::test]
    async fn compactor_runs_past_threshold() {
        let day = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        let clock = Arc::new(ManualClock::new(day.and_hms_opt(7, 0, 0).unwrap()));
        let directory = Arc::new(StaticDirectory::seeded());
        let alice = directory.resolve_by_email("alice@example.com").unwrap();
        let engine = Arc::new(
            Engine::new(
                test_wal_path("sweeper_compact.wal"),
                Collaborators::in_memory(directory, clock),
            )
            .unwrap(),
        );
        for (start, end) in [("09:00", "10:00"), ("10:00", "11:00"), ("11:00", "12:00")] {
            let b = engine
                .create_booking(&alice, booking_request(start, end))
                .await
                .unwrap();
            engine.cancel_booking(&alice, b.id, None).await.unwrap();
        }
        assert_eq!(engine.wal_appends_since_compact().await, 6);

        tokio::spawn(run_compactor(engine.clone(), 4, Duration::from_millis(5)));
        let mut compacted = false;
        for _ in 0..100 {
            if engine.wal_appends_since_compact().await == 0 {
                compacted = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(compacted);
    }
}
