use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{Days, NaiveDate};
use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname("roomkeep")
        .user("bench")
        .password("roomkeep");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

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

/// Far enough out that bench runs never collide with real bookings.
fn day(offset: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2040, 1, 1)
        .and_then(|d| d.checked_add_days(Days::new(offset)))
        .expect("date in range")
}

async fn create_room(client: &tokio_postgres::Client) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!("INSERT INTO rooms VALUES ('{id}', 'bench {id}', 5000)"))
        .await
        .unwrap();
    id
}

fn reservation_sql(room: Ulid, check_in: NaiveDate, check_out: NaiveDate) -> String {
    format!(
        "INSERT INTO reservations VALUES ('{}', '{room}', '{check_in}', '{check_out}', 2, 'Bench Guest', 'bench@example.com')",
        Ulid::new()
    )
}

fn is_dates_unavailable(e: &tokio_postgres::Error) -> bool {
    e.as_db_error().is_some_and(|db| db.code().code() == "23P01")
}

async fn phase1_sequential(host: &str, port: u16) {
    let client = connect(host, port).await;
    let room = create_room(&client).await;

    let n = 1000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n as u64 {
        let t = Instant::now();
        client
            .batch_execute(&reservation_sql(room, day(i), day(i + 1)))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} reservations in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

/// Every task races for the same nights on one room. Exactly one reservation
/// per night may be admitted; everything else must come back as 23P01.
async fn phase2_contended(host: &str, port: u16) {
    let setup = connect(host, port).await;
    let room = create_room(&setup).await;
    drop(setup);

    let n_tasks = 16;
    let nights = 100u64;
    let admitted = Arc::new(AtomicUsize::new(0));
    let rejected = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let host = host.to_string();
        let admitted = admitted.clone();
        let rejected = rejected.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            for i in 0..nights {
                match client.batch_execute(&reservation_sql(room, day(i), day(i + 1))).await {
                    Ok(()) => admitted.fetch_add(1, Ordering::Relaxed),
                    Err(e) if is_dates_unavailable(&e) => rejected.fetch_add(1, Ordering::Relaxed),
                    Err(e) => panic!("unexpected error: {e}"),
                };
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let admitted = admitted.load(Ordering::Relaxed);
    let rejected = rejected.load(Ordering::Relaxed);
    let total = admitted + rejected;
    println!(
        "  {n_tasks} tasks x {nights} nights = {total} attempts in {:.2}s = {:.0} ops/sec",
        elapsed.as_secs_f64(),
        total as f64 / elapsed.as_secs_f64()
    );
    println!("  admitted={admitted}, rejected={rejected}");
    assert_eq!(admitted, nights as usize, "double booking detected");
}

async fn phase3_read_under_load(host: &str, port: u16) {
    let setup = connect(host, port).await;
    let room = create_room(&setup).await;
    drop(setup);

    let writer_host = host.to_string();
    let writer = tokio::spawn(async move {
        let client = connect(&writer_host, port).await;
        for i in 0..500u64 {
            let _ = client
                .batch_execute(&reservation_sql(room, day(i * 2), day(i * 2 + 1)))
                .await;
        }
    });

    let reader = connect(host, port).await;
    let mut calendar = Vec::new();
    let mut preview = Vec::new();
    while !writer.is_finished() {
        let t = Instant::now();
        reader
            .simple_query(&format!("SELECT * FROM unavailable_dates WHERE room_id = '{room}'"))
            .await
            .unwrap();
        calendar.push(t.elapsed());

        let t = Instant::now();
        reader
            .simple_query(&format!(
                "SELECT * FROM availability WHERE room_id = '{room}' AND check_in = '{}' AND check_out = '{}'",
                day(1),
                day(2)
            ))
            .await
            .unwrap();
        preview.push(t.elapsed());
    }
    writer.await.unwrap();

    print_latency("unavailable_dates latency", &mut calendar);
    print_latency("availability latency", &mut preview);
}

async fn phase4_connection_storm(host: &str, port: u16) {
    let n_conns = 100;
    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_conns {
        let host = host.to_string();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            client.simple_query("SELECT * FROM rooms").await.is_ok()
        }));
    }
    let mut ok = 0;
    for h in handles {
        if h.await.unwrap_or(false) {
            ok += 1;
        }
    }
    println!(
        "  {ok}/{n_conns} connections served in {:.2}s",
        start.elapsed().as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("ROOMKEEP_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("ROOMKEEP_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid ROOMKEEP_PORT");

    println!("=== roomkeep stress benchmark ===");
    println!("target: {host}:{port}\n");

    println!("[phase 1] sequential reservation throughput");
    phase1_sequential(&host, port).await;

    println!("\n[phase 2] contended reservations on one room");
    phase2_contended(&host, port).await;

    println!("\n[phase 3] read latency under write load");
    phase3_read_under_load(&host, port).await;

    println!("\n[phase 4] connection storm");
    phase4_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
