use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{NaiveDate, NaiveTime};
use ulid::Ulid;

use roombook::Error;
use roombook::engine::Engine;
use roombook::model::*;

const ROOMS: usize = 10;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.3}ms, p50={:.3}ms, p95={:.3}ms, p99={:.3}ms, max={:.3}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn room_id(i: usize) -> RoomId {
    RoomId(format!("R-{i:03}"))
}

fn requester(i: usize) -> Identity {
    Identity {
        id: UserId(format!("u{i}")),
        name: format!("User {i}"),
        class: RequesterClass::Student,
    }
}

/// Day `n` after the bench epoch, one hour slot `h` in 07:00..19:00.
fn slot(n: usize, h: usize) -> (NaiveDate, NaiveTime, NaiveTime) {
    let base = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let date = base + chrono::Days::new(n as u64);
    let hour = 7 + (h % 12) as u32;
    (
        date,
        NaiveTime::from_hms_opt(hour, 0, 0).unwrap(),
        NaiveTime::from_hms_opt(hour + 1, 0, 0).unwrap(),
    )
}

fn draft(room: usize, user: usize, n: usize, h: usize) -> ReservationDraft {
    let (date, start, end) = slot(n, h);
    ReservationDraft {
        room_id: room_id(room),
        requester: requester(user),
        date,
        start,
        end,
        purpose: "stress".into(),
    }
}

async fn setup() -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("roombook_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(Engine::new(dir.join("roombook.wal")).unwrap());
    engine
        .upsert_building(Building {
            id: "B".into(),
            name: "Gedung Bench".into(),
            zones: vec!["Utama".into()],
        })
        .await
        .unwrap();
    for i in 0..ROOMS {
        engine
            .create_room(Room {
                id: room_id(i),
                name: format!("Ruang {i}"),
                building: "Gedung Bench".into(),
                zone: "Utama".into(),
                floor: 1 + (i as u32 % 4),
                capacity: 40,
                amenities: Default::default(),
                status: RoomStatus::Available,
            })
            .await
            .unwrap();
    }
    println!("  created {ROOMS} rooms in {}", dir.display());
    engine
}

async fn phase1_sequential(engine: &Engine) {
    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let t = Instant::now();
        engine.insert_reservation(draft(0, 0, i / 12, i)).await.unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_contention(engine: Arc<Engine>) {
    let n_tasks = 32;
    let n_slots = 120;
    let accepted = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for task in 0..n_tasks {
        let engine = engine.clone();
        let accepted = accepted.clone();
        let conflicts = conflicts.clone();
        handles.push(tokio::spawn(async move {
            // Every task goes after the same slots on room 1.
            for s in 0..n_slots {
                match engine.insert_reservation(draft(1, task, 1000 + s / 12, s)).await {
                    Ok(_) => accepted.fetch_add(1, Ordering::Relaxed),
                    Err(Error::Conflict(_)) => conflicts.fetch_add(1, Ordering::Relaxed),
                    Err(e) => panic!("unexpected error: {e}"),
                };
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let accepted = accepted.load(Ordering::Relaxed);
    let conflicts = conflicts.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks x {n_slots} slots in {:.2}s: {accepted} accepted, {conflicts} conflicts",
        elapsed.as_secs_f64()
    );
    assert_eq!(accepted, n_slots, "each contested slot must be granted exactly once");
}

async fn phase3_read_under_load(engine: Arc<Engine>) {
    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for w in 0..5 {
        let engine = engine.clone();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let room = 2 + w;
            let mut i = 0;
            while !stop.load(Ordering::Relaxed) {
                let _ = engine.insert_reservation(draft(room, w, 2000 + i / 12, i)).await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for r in 0..n_readers {
        let engine = engine.clone();
        reader_handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let (date, start, end) = slot(2000 + i % 30, r);
                let t = Instant::now();
                match i % 3 {
                    0 => {
                        engine
                            .is_available(&room_id(2 + r % 5), date, start, end)
                            .await
                            .unwrap();
                    }
                    1 => {
                        engine.available_rooms(date, &RoomFilter::default()).await;
                    }
                    _ => {
                        engine.free_slots(&room_id(2 + r % 5), date, None).await.unwrap();
                    }
                }
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }
    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("availability query", &mut all_latencies);
}

async fn phase4_compaction(engine: &Engine) {
    let appends = engine.wal_appends_since_compact().await;
    let t = Instant::now();
    engine.compact_wal().await.unwrap();
    println!(
        "  compacted after {appends} appends in {:.2}ms",
        t.elapsed().as_secs_f64() * 1000.0
    );
}

async fn verify_no_double_booking(engine: &Engine) {
    let all = engine.list_reservations(&ReservationFilter::default()).await;
    let mut overlaps = 0;
    for (i, a) in all.iter().enumerate() {
        for b in &all[i + 1..] {
            if a.room_id == b.room_id
                && a.date == b.date
                && a.status.blocks()
                && b.status.blocks()
                && a.span().overlaps(&b.span())
            {
                overlaps += 1;
            }
        }
    }
    println!("  {} reservations checked, {overlaps} overlapping pairs", all.len());
    assert_eq!(overlaps, 0);
}

#[tokio::main]
async fn main() {
    println!("=== roombook stress benchmark ===\n");

    println!("[setup]");
    let engine = setup().await;

    println!("\n[phase 1] sequential booking throughput");
    phase1_sequential(&engine).await;

    println!("\n[phase 2] contended booking on one room");
    phase2_contention(engine.clone()).await;

    println!("\n[phase 3] availability latency under write load");
    phase3_read_under_load(engine.clone()).await;

    println!("\n[phase 4] WAL compaction");
    phase4_compaction(&engine).await;

    println!("\n[verify]");
    verify_no_double_booking(&engine).await;

    println!("\n=== benchmark complete ===");
}
