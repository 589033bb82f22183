use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, TimeDelta};
use ulid::Ulid;

use roombook::clock::ManualClock;
use roombook::directory::StaticDirectory;
use roombook::engine::{Collaborators, Engine, EngineError};
use roombook::model::*;

const ROOMS: u64 = 20;
const USERS: u64 = 200;
const SLOTS_PER_DAY: u64 = 16;

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
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        latencies[latencies.len() - 1].as_secs_f64() * 1000.0,
    );
}

fn directory() -> StaticDirectory {
    let rooms = (1..=ROOMS)
        .map(|id| Room {
            id,
            name: format!("Room {id}"),
            capacity: 60,
            facilities: BTreeSet::new(),
            accessibility: BTreeSet::new(),
            restricted_to_roles: Vec::new(),
            building: "Bench".into(),
        })
        .collect();
    let users = (1..=USERS)
        .map(|id| User {
            id,
            name: format!("User {id}"),
            email: format!("user{id}@bench.example"),
            role: if id <= 20 { Role::Organiser } else { Role::Attendee },
        })
        .collect();
    StaticDirectory::new(rooms, users).expect("bench directory is valid")
}

fn start_engine() -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("roombook_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("create bench dir");
    let wal: PathBuf = dir.join("roombook.wal");
    let clock = Arc::new(ManualClock::new(
        NaiveDate::from_ymd_opt(2026, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap(),
    ));
    let engine = Engine::new(wal, Collaborators::in_memory(Arc::new(directory()), clock))
        .expect("engine starts");
    Arc::new(engine)
}

fn organiser(id: UserId) -> User {
    User {
        id,
        name: format!("User {id}"),
        email: format!("user{id}@bench.example"),
        role: Role::Organiser,
    }
}

/// The `slot`-th hour-long slot, counted from 2026-02-01 06:00.
fn slot_request(room_id: RoomId, slot: u64, attendees: &[UserId]) -> BookingRequest {
    let day = NaiveDate::from_ymd_opt(2026, 2, 1).unwrap() + TimeDelta::days((slot / SLOTS_PER_DAY) as i64);
    let hour = 6 + slot % SLOTS_PER_DAY;
    BookingRequest {
        room_id,
        title: format!("Bench slot {slot}"),
        date: day.format("%Y-%m-%d").to_string(),
        start_time: format!("{hour:02}:00"),
        end_time: format!("{:02}:00", hour + 1),
        attendee_emails: attendees.iter().map(|id| format!("user{id}@bench.example")).collect(),
        notes: None,
        visibility: Visibility::Public,
    }
}

async fn phase1_sequential(engine: &Engine) {
    let alice = organiser(1);
    let n = 2000;
    let mut latencies = Vec::with_capacity(n as usize);
    let start = Instant::now();

    for slot in 0..n {
        let t = Instant::now();
        engine
            .create_booking(&alice, slot_request(1, slot, &[]))
            .await
            .expect("sequential create");
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("create latency", &mut latencies);
}

async fn phase2_contended(engine: Arc<Engine>) {
    let n_tasks = 10u64;
    let n_slots = 200u64;
    let conflicts = Arc::new(AtomicUsize::new(0));
    let created = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for task in 0..n_tasks {
        let engine = engine.clone();
        let conflicts = conflicts.clone();
        let created = created.clone();
        handles.push(tokio::spawn(async move {
            let who = organiser(2 + task);
            // Pairs of tasks race for the same room.
            let room_id = 2 + task / 2;
            for slot in 0..n_slots {
                match engine.create_booking(&who, slot_request(room_id, slot, &[])).await {
                    Ok(_) => created.fetch_add(1, Ordering::Relaxed),
                    Err(EngineError::Conflict(_)) => conflicts.fetch_add(1, Ordering::Relaxed),
                    Err(e) => panic!("unexpected error: {e}"),
                };
            }
        }));
    }
    for h in handles {
        h.await.expect("writer task");
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_slots;
    let ok = created.load(Ordering::Relaxed);
    println!(
        "  {n_tasks} tasks x {n_slots} attempts = {total} in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
    println!(
        "  created {ok}, conflicts {} (expected {} each)",
        conflicts.load(Ordering::Relaxed),
        total as usize / 2
    );
    assert_eq!(ok as u64, total / 2, "double booking detected");
}

async fn phase3_read_under_load(engine: Arc<Engine>) {
    let stop = Arc::new(AtomicBool::new(false));
    let mut writers = Vec::new();
    for w in 0..4u64 {
        let engine = engine.clone();
        let stop = stop.clone();
        writers.push(tokio::spawn(async move {
            let who = organiser(12 + w);
            let room_id = 12 + w;
            let mut slot = 0;
            while !stop.load(Ordering::Relaxed) {
                let _ = engine.create_booking(&who, slot_request(room_id, slot, &[])).await;
                slot += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut readers = Vec::new();
    for r in 0..n_readers {
        let engine = engine.clone();
        readers.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for i in 0..reads_per_reader {
                let t = Instant::now();
                let room_id = 1 + ((r + i) as u64 % ROOMS);
                engine
                    .room_schedule(room_id, "2026-02-03")
                    .expect("schedule query");
                latencies.push(t.elapsed());
                tokio::task::yield_now().await;
            }
            latencies
        }));
    }

    let mut all = Vec::new();
    for h in readers {
        all.extend(h.await.expect("reader task"));
    }
    stop.store(true, Ordering::Relaxed);
    for h in writers {
        let _ = h.await;
    }
    print_latency("room schedule query", &mut all);
}

async fn phase4_notification_fanout(engine: &Engine) {
    let who = organiser(20);
    let attendees: Vec<UserId> = (21..=70).collect();
    let n = 50;
    let mut latencies = Vec::with_capacity(n as usize);
    for slot in 0..n {
        let booking = engine
            .create_booking(&who, slot_request(ROOMS, slot, &attendees))
            .await
            .expect("fan-out create");
        let t = Instant::now();
        engine
            .cancel_booking(&who, booking.id, Some("bench"))
            .await
            .expect("fan-out cancel");
        latencies.push(t.elapsed());
    }
    println!("  {} notifications per cancel", attendees.len());
    print_latency("cancel latency", &mut latencies);
    println!("  user 21 unread: {}", engine.unread_count(21));
}

#[tokio::main]
async fn main() {
    println!("=== roombook stress benchmark ===\n");

    println!("[phase 1] sequential create throughput");
    let engine = start_engine();
    phase1_sequential(&engine).await;

    println!("\n[phase 2] contended concurrent creates");
    phase2_contended(engine.clone()).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(engine.clone()).await;

    println!("\n[phase 4] cancellation fan-out");
    phase4_notification_fanout(&engine).await;

    let t = Instant::now();
    engine.compact_wal().await.expect("compaction");
    println!("\n[compaction] {:.2}ms", t.elapsed().as_secs_f64() * 1000.0);
    println!("\n=== done ===");
}
