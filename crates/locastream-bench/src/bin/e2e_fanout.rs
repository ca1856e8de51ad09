//! End-to-end fan-out benchmark for locastream.
//!
//! One producer streams route samples to a running server while N viewers
//! count what arrives and measure delivery latency.
//!
//! ```bash
//! cargo run --release -p locastream-bench --bin e2e_fanout -- 64 200
//! ```
//! Arguments: viewer count (default 16), producer rate in samples/s (default 100).

use futures_util::{SinkExt, StreamExt};
use locastream_bench::route_point;
use locastream_protocol::codec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::Barrier;
use tokio_tungstenite::{connect_async, tungstenite::Message};

const SERVER_URL: &str = "ws://127.0.0.1:8080/ws";
const WARMUP_SECS: u64 = 2;
const BENCH_SECS: u64 = 10;

/// Field carrying the producer's send time in microseconds.
const SENT_AT: &str = "sent_at_us";

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Default)]
struct Stats {
    received: AtomicU64,
    latency_us_total: AtomicU64,
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let num_viewers = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(16);
    let rate = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(100u64);

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║         locastream End-to-End Fan-out Benchmark              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Make sure the server is running: cargo run --release        ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    if let Err(e) = run_fanout_benchmark(num_viewers, rate).await {
        eprintln!("Benchmark failed: {}", e);
    }
}

fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or_default()
}

async fn run_fanout_benchmark(num_viewers: usize, rate: u64) -> Result<(), BoxError> {
    println!("📊 Fan-out: {} viewers, 1 producer at {} samples/s", num_viewers, rate);
    println!("   Warmup: {}s, Measurement: {}s", WARMUP_SECS, BENCH_SECS);
    println!();

    let stats = Arc::new(Stats::default());
    let barrier = Arc::new(Barrier::new(num_viewers + 1));

    let mut handles = Vec::new();
    for viewer_id in 0..num_viewers {
        let stats = Arc::clone(&stats);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            if let Err(e) = run_viewer(stats, barrier).await {
                eprintln!("Viewer {} error: {}", viewer_id, e);
            }
        }));
    }

    // Wait for all viewers to connect
    barrier.wait().await;
    println!("✓ All {} viewers connected", num_viewers);

    let producer = tokio::spawn(run_producer(rate));

    println!("⏳ Warming up for {}s...", WARMUP_SECS);
    tokio::time::sleep(Duration::from_secs(WARMUP_SECS)).await;

    stats.received.store(0, Ordering::SeqCst);
    stats.latency_us_total.store(0, Ordering::SeqCst);
    let start = Instant::now();

    println!("📈 Measuring for {}s...", BENCH_SECS);
    tokio::time::sleep(Duration::from_secs(BENCH_SECS)).await;

    let elapsed = start.elapsed();
    let received = stats.received.load(Ordering::SeqCst);
    let latency_total = stats.latency_us_total.load(Ordering::SeqCst);

    let deliveries_per_sec = received as f64 / elapsed.as_secs_f64();
    let mean_latency_ms = if received > 0 {
        latency_total as f64 / received as f64 / 1000.0
    } else {
        0.0
    };

    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                         RESULTS                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!(
        "║  Viewers:              {:>10}                           ║",
        num_viewers
    );
    println!(
        "║  Duration:             {:>10.2}s                          ║",
        elapsed.as_secs_f64()
    );
    println!(
        "║  Deliveries:           {:>10}                           ║",
        received
    );
    println!(
        "║  Throughput:           {:>10.0} msg/s                    ║",
        deliveries_per_sec
    );
    println!(
        "║  Mean latency:         {:>10.3} ms                       ║",
        mean_latency_ms
    );
    println!("╚══════════════════════════════════════════════════════════════╝");

    producer.abort();
    for handle in handles {
        handle.abort();
    }
    Ok(())
}

async fn run_producer(rate: u64) -> Result<(), BoxError> {
    let (mut ws, _) = connect_async(SERVER_URL).await?;
    let mut ticker = tokio::time::interval(Duration::from_micros(1_000_000 / rate.max(1)));

    for n in 0.. {
        ticker.tick().await;
        let mut sample = route_point(n);
        sample.extra.insert(SENT_AT.into(), now_us().into());
        ws.send(Message::Text(serde_json::to_string(&sample)?)).await?;
    }
    Ok(())
}

async fn run_viewer(stats: Arc<Stats>, barrier: Arc<Barrier>) -> Result<(), BoxError> {
    let (ws, _) = connect_async(SERVER_URL).await?;
    let (_sender, mut receiver) = ws.split();

    barrier.wait().await;

    while let Some(result) = receiver.next().await {
        let text = match result? {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let Ok(sample) = codec::decode_sample(text.as_bytes()) else {
            continue;
        };
        if let Some(sent) = sample.extra.get(SENT_AT).and_then(|v| v.as_u64()) {
            stats
                .latency_us_total
                .fetch_add(now_us().saturating_sub(sent), Ordering::Relaxed);
        }
        stats.received.fetch_add(1, Ordering::Relaxed);
    }
    Ok(())
}
