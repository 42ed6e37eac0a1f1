use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Duration as DateDuration, NaiveDate, NaiveTime, Utc};
use ulid::Ulid;

use pitchbook::catalog::StaticCatalog;
use pitchbook::config::BookingPolicy;
use pitchbook::engine::{BookingError, ConflictError, Engine, SlotCalendar};
use pitchbook::model::*;
use pitchbook::notify::NotifyHub;
use pitchbook::observability;
use pitchbook::payment::CashOnly;
use pitchbook::store::{ReservationStore, WalStore};

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

struct Bench {
    engine: Arc<Engine>,
    store: Arc<WalStore>,
    pitches: Vec<Resource>,
    first_day: NaiveDate,
}

fn setup(n_pitches: usize) -> Bench {
    let dir = std::env::temp_dir().join(format!("pitchbook_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("create bench dir");
    let store = Arc::new(WalStore::open(dir.join("bench.wal"), Arc::new(NotifyHub::new())).expect("open store"));

    let catalog = Arc::new(StaticCatalog::new());
    let h = |h| NaiveTime::from_hms_opt(h, 0, 0).expect("valid hour");
    let pitches: Vec<Resource> = (0..n_pitches)
        .map(|i| Resource::new(Ulid::new(), format!("Pitch {i}"), 3000 + 250 * i as u64, h(6), h(22)))
        .collect();
    for p in &pitches {
        catalog.upsert(p.clone()).expect("valid pitch");
    }

    let engine = Engine::new(store.clone(), catalog, Arc::new(CashOnly), BookingPolicy::default());
    println!("  {} pitches, log at {}", pitches.len(), dir.display());
    Bench {
        engine: Arc::new(engine),
        store,
        pitches,
        first_day: (Utc::now() + DateDuration::days(2)).date_naive(),
    }
}

/// Deterministic spread of requests: (pitch, day offset, start hour, hours).
fn request(worker: usize, i: usize, n_pitches: usize) -> (usize, i64, u32, u32) {
    let pitch = (worker + i) % n_pitches;
    let day = ((i * 7 + worker) % 27) as i64;
    let start = 6 + ((worker * 3 + i * 5) % 14) as u32;
    let hours = 1 + (i % 3) as u32;
    (pitch, day, start, hours)
}

async fn phase1_sequential(bench: &Bench) {
    let pitch = &bench.pitches[0];
    let start = Instant::now();
    let mut n = 0;
    for day in 0..27 {
        for hour in (6..22).step_by(2) {
            let date = bench.first_day + DateDuration::days(day);
            let t = NaiveTime::from_hms_opt(hour, 0, 0).expect("valid hour");
            if bench
                .engine
                .create_booking(pitch.id, date, t, 2, Holder::Account(Ulid::new()), PaymentMethod::Cash)
                .await
                .is_ok()
            {
                n += 1;
            }
        }
    }
    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
}

async fn phase2_contended(bench: &Bench) {
    let n_tasks = 32;
    let n_per_task = 100;
    let n_pitches = bench.pitches.len();

    let start = Instant::now();
    let mut handles = Vec::new();
    for worker in 0..n_tasks {
        let engine = bench.engine.clone();
        let pitches = bench.pitches.clone();
        let first_day = bench.first_day;
        handles.push(tokio::spawn(async move {
            let mut confirmed = 0usize;
            let mut taken = 0usize;
            let mut latencies = Vec::with_capacity(n_per_task);
            for i in 0..n_per_task {
                let (p, day, hour, hours) = request(worker, i, n_pitches);
                let date = first_day + DateDuration::days(day);
                let t = NaiveTime::from_hms_opt(hour, 0, 0).expect("valid hour");
                let began = Instant::now();
                let result = engine
                    .create_booking(pitches[p].id, date, t, hours, Holder::Account(Ulid::new()), PaymentMethod::Cash)
                    .await;
                latencies.push(began.elapsed());
                match result {
                    Ok(_) => confirmed += 1,
                    Err(BookingError::Conflict(ConflictError::SlotTaken(_))) => taken += 1,
                    Err(e) => eprintln!("  unexpected error: {e}"),
                }
            }
            (confirmed, taken, latencies)
        }));
    }

    let mut confirmed = 0;
    let mut taken = 0;
    let mut latencies = Vec::new();
    for h in futures::future::join_all(handles).await {
        let (c, t, l) = h.expect("worker panicked");
        confirmed += c;
        taken += t;
        latencies.extend(l);
    }
    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    println!(
        "  {n_tasks} tasks x {n_per_task} requests = {total} total in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
    println!("  confirmed={confirmed}, slot_taken={taken}");
    print_latency("create_booking", &mut latencies);
}

async fn phase3_reads_under_load(bench: &Bench) {
    let pitch = bench.pitches[1 % bench.pitches.len()].clone();
    let engine = bench.engine.clone();
    let first_day = bench.first_day;

    let writer = tokio::spawn(async move {
        for i in 0..500usize {
            let date = first_day + DateDuration::days((i % 27) as i64);
            let t = NaiveTime::from_hms_opt(6 + (i % 16) as u32, 0, 0).expect("valid hour");
            let _ = engine
                .create_booking(pitch.id, date, t, 1, Holder::Account(Ulid::new()), PaymentMethod::Cash)
                .await;
        }
    });

    let mut latencies = Vec::new();
    let target = bench.pitches[1 % bench.pitches.len()].id;
    while !writer.is_finished() {
        let began = Instant::now();
        let _ = bench.engine.list_available_starts(target, first_day, 2).await;
        latencies.push(began.elapsed());
        tokio::task::yield_now().await;
    }
    writer.await.expect("writer panicked");
    print_latency("list_available_starts", &mut latencies);
}

async fn verify_no_overlaps(bench: &Bench) {
    let mut checked = 0;
    for pitch in &bench.pitches {
        let all = bench
            .store
            .reservations_for_resource(pitch.id)
            .await
            .expect("store read");
        let mut by_day: std::collections::BTreeMap<NaiveDate, Vec<Reservation>> = Default::default();
        for r in all {
            by_day.entry(r.date).or_default().push(r);
        }
        for (date, day) in by_day {
            let intervals = SlotCalendar::build(pitch.id, date, &day, None).intervals();
            for pair in intervals.windows(2) {
                assert!(!pair[0].overlaps(&pair[1]), "overlap on {date}: {} {}", pair[0], pair[1]);
            }
            checked += intervals.len();
        }
    }
    println!("  {checked} confirmed bookings, no overlaps");
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("PITCHBOOK_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    observability::init(metrics_port).expect("failed to install metrics exporter");

    let n_pitches: usize = std::env::var("PITCHBOOK_BENCH_PITCHES")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(4);

    println!("=== pitchbook stress benchmark ===\n");

    println!("[setup]");
    let bench = setup(n_pitches.max(1));

    println!("\n[phase 1] sequential booking throughput");
    phase1_sequential(&bench).await;

    println!("\n[phase 2] contended concurrent bookings");
    phase2_contended(&bench).await;

    println!("\n[phase 3] availability reads under write load");
    phase3_reads_under_load(&bench).await;

    println!("\n[verify]");
    verify_no_overlaps(&bench).await;

    let appends = bench.store.appends_since_compact().await;
    let began = Instant::now();
    bench.store.compact().await.expect("compaction");
    println!("  compacted {appends} appends in {:.2}ms", began.elapsed().as_secs_f64() * 1000.0);

    println!("\n=== benchmark complete ===");
}
