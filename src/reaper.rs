use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use tracing::info;

use crate::auth::Directory;
use crate::engine::Engine;
use crate::model::ReservationStatus;

const COMPLETION_NOTE: &str = "selesai otomatis";

/// Move every approved reservation that ended at or before `now` to
/// completed. Returns how many were moved.
pub async fn complete_finished(engine: &Engine, now: NaiveDateTime) -> usize {
    let mut completed = 0;
    for id in engine.collect_finished(now) {
        match engine
            .update_status(id, ReservationStatus::Completed, Some(COMPLETION_NOTE.into()))
            .await
        {
            Ok(_) => {
                info!(reservation = %id, "completed finished reservation");
                completed += 1;
            }
            Err(e) => {
                // Status may have moved since collection.
                tracing::debug!("completer skip {id}: {e}");
            }
        }
    }
    completed
}

/// Background task that periodically completes finished reservations.
pub async fn run_completer(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let now = chrono::Local::now().naive_local();
        complete_finished(&engine, now).await;
    }
}

/// Background task that drops expired bearer tokens.
pub async fn run_token_sweeper(directory: Arc<Directory>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        directory.sweep_expired();
    }
}

/// Background task that rewrites the WAL once enough appends pile up.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        let appends = engine.wal_appends_since_compact().await;
        if appends < threshold {
            continue;
        }
        if let Err(e) = engine.compact_wal().await {
            tracing::error!("WAL compaction failed after {appends} appends: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::{d, identity, room, t};
    use crate::model::*;
    use std::path::PathBuf;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("roombook_test_reaper");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    async fn engine_with_room(name: &str) -> Engine {
        let engine = Engine::new(test_wal_path(name)).unwrap();
        engine
            .upsert_building(Building {
                id: "A".into(),
                name: "Gedung A".into(),
                zones: vec!["Utara".into()],
            })
            .await
            .unwrap();
        engine.create_room(room("r1", RoomStatus::Available)).await.unwrap();
        engine
    }

    async fn book(engine: &Engine, start: &str, end: &str) -> Reservation {
        engine
            .insert_reservation(ReservationDraft {
                room_id: RoomId::from("r1"),
                requester: identity("u1"),
                date: d("2024-05-01"),
                start: t(start),
                end: t(end),
                purpose: "Kuliah umum".into(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn completer_moves_only_finished_approved() {
        let engine = engine_with_room("completer_finished.wal").await;

        let done = book(&engine, "08:00", "10:00").await;
        engine
            .update_status(done.id, ReservationStatus::Approved, None)
            .await
            .unwrap();
        let running = book(&engine, "10:00", "12:00").await;
        engine
            .update_status(running.id, ReservationStatus::Approved, None)
            .await
            .unwrap();
        let pending = book(&engine, "07:00", "08:00").await;

        let now = d("2024-05-01").and_time(t("10:00"));
        assert_eq!(complete_finished(&engine, now).await, 1);

        let done = engine.get_reservation(done.id).await.unwrap();
        assert_eq!(done.status, ReservationStatus::Completed);
        let running = engine.get_reservation(running.id).await.unwrap();
        assert_eq!(running.status, ReservationStatus::Approved);
        let pending = engine.get_reservation(pending.id).await.unwrap();
        assert_eq!(pending.status, ReservationStatus::Pending);

        let audit = engine.status_history(Some(done.id)).unwrap();
        let last = audit.last().unwrap();
        assert_eq!(last.new, ReservationStatus::Completed);
        assert_eq!(last.note.as_deref(), Some(COMPLETION_NOTE));

        assert!(engine.collect_finished(now).is_empty());
        assert_eq!(complete_finished(&engine, now).await, 0);
    }

    #[tokio::test]
    async fn completed_slot_is_bookable_again() {
        let engine = engine_with_room("completer_release.wal").await;
        let done = book(&engine, "08:00", "10:00").await;
        engine
            .update_status(done.id, ReservationStatus::Approved, None)
            .await
            .unwrap();

        let free = engine
            .is_available(&RoomId::from("r1"), d("2024-05-01"), t("08:00"), t("09:00"))
            .await
            .unwrap();
        assert!(!free);

        complete_finished(&engine, d("2024-05-02").and_time(t("00:00"))).await;
        let free = engine
            .is_available(&RoomId::from("r1"), d("2024-05-01"), t("08:00"), t("09:00"))
            .await
            .unwrap();
        assert!(free);
    }
}
