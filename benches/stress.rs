use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use ulid::Ulid;

use slotbook::engine::{BookingRequest, Engine, EngineError};
use slotbook::model::Ms;
use slotbook::notify::NotifyHub;

const MINUTE: Ms = 60_000;
const DAY: Ms = 4_102_444_800_000; // 2100-01-01T00:00:00Z

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

fn fresh_engine(label: &str) -> Arc<Engine> {
    let dir = std::env::temp_dir().join(format!("slotbook_bench_{label}_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    Arc::new(Engine::new(dir.join("slotbook.wal"), Arc::new(NotifyHub::new())).unwrap())
}

/// A whole-day slot and an unrestricted link to it.
async fn day_slot(engine: &Engine) -> (Ulid, String) {
    let slot = Ulid::new();
    engine.create_slot(slot, None, DAY, DAY + 24 * 60 * MINUTE).await.unwrap();
    let link = engine.create_link(None, vec![slot], Ms::MAX).await.unwrap();
    (slot, link.token)
}

fn request(token: &str, slot_id: Ulid, start: Ms, end: Ms) -> BookingRequest {
    BookingRequest {
        link_token: token.to_string(),
        slot_id,
        start: start.to_string(),
        end: end.to_string(),
        name: "bench".into(),
        email: None,
        meeting_place: None,
        note: None,
    }
}

async fn phase1_sequential() {
    let engine = fresh_engine("sequential");
    let (slot, token) = day_slot(&engine).await;

    let n = 1440;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();
    for i in 0..n {
        let s = DAY + (i as Ms) * MINUTE;
        let t = Instant::now();
        engine
            .create_appointment(request(&token, slot, s, s + MINUTE))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("booking latency", &mut latencies);
}

async fn phase2_contended() {
    let engine = fresh_engine("contended");
    let (slot, token) = day_slot(&engine).await;

    // Every task asks for the same minutes; exactly one may win each.
    let n_tasks = 16;
    let n_minutes = 200;
    let wins = Arc::new(AtomicUsize::new(0));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();

    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let engine = engine.clone();
        let token = token.clone();
        let wins = wins.clone();
        let overlaps = overlaps.clone();
        handles.push(tokio::spawn(async move {
            for m in 0..n_minutes {
                let s = DAY + m * MINUTE;
                match engine.create_appointment(request(&token, slot, s, s + MINUTE)).await {
                    Ok(_) => wins.fetch_add(1, Ordering::Relaxed),
                    Err(EngineError::Overlap(_)) => overlaps.fetch_add(1, Ordering::Relaxed),
                    Err(e) => panic!("unexpected error: {e}"),
                };
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks as usize * n_minutes as usize;
    println!(
        "  {n_tasks} tasks x {n_minutes} requests = {total} in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
    println!(
        "  wins={} overlaps={} (expected wins={n_minutes})",
        wins.load(Ordering::Relaxed),
        overlaps.load(Ordering::Relaxed)
    );
}

async fn phase3_read_under_load() {
    let engine = fresh_engine("read_under_load");
    let (slot, token) = day_slot(&engine).await;

    let writer = {
        let engine = engine.clone();
        tokio::spawn(async move {
            for i in 0..1000 {
                let s = DAY + (i as Ms) * MINUTE;
                let _ = engine.create_appointment(request(&token, slot, s, s + MINUTE)).await;
            }
        })
    };

    let mut latencies = Vec::new();
    while !writer.is_finished() {
        let t = Instant::now();
        let _ = engine.list_available(None).await;
        latencies.push(t.elapsed());
        tokio::task::yield_now().await;
    }
    writer.await.unwrap();
    print_latency("availability latency", &mut latencies);
}

#[tokio::main]
async fn main() {
    println!("=== slotbook stress benchmark ===");

    println!("\n[phase 1] sequential booking throughput");
    phase1_sequential().await;

    println!("\n[phase 2] contended booking on one slot");
    phase2_contended().await;

    println!("\n[phase 3] availability latency under write load");
    phase3_read_under_load().await;

    println!("\n=== benchmark complete ===");
}
