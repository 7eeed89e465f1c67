use std::time::{Duration, Instant};

use tokio_postgres::{Config, NoTls};
use ulid::Ulid;

async fn connect(host: &str, port: u16) -> tokio_postgres::Client {
    connect_to(host, port, &format!("bench_{}", Ulid::new())).await
}

async fn connect_to(host: &str, port: u16, property: &str) -> tokio_postgres::Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(property)
        .user("innkeep")
        .password("innkeep");

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
        latencies.last().unwrap().as_secs_f64() * 1000.0,
    );
}

/// Distinct one-night stays: index i maps to a unique calendar day.
/// Days stay within 1..=28 so every (y, m, d) is a real date.
fn one_night_stay(i: usize) -> (String, String) {
    let year = 2026 + i / 336;
    let month = (i % 336) / 28 + 1;
    let day = i % 28 + 1;
    (
        format!("{year:04}-{month:02}-{day:02}"),
        format!("{year:04}-{month:02}-{:02}", day + 1),
    )
}

/// Create one category at 200/15% with `n_rooms` rooms, returning their ids.
async fn setup_category(client: &tokio_postgres::Client, n_rooms: usize) -> (Ulid, Vec<Ulid>) {
    let category_id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO categories (id, base_price, discount_percent) VALUES ('{category_id}', 200, 15)"
        ))
        .await
        .unwrap();

    let mut rooms = Vec::with_capacity(n_rooms);
    for _ in 0..n_rooms {
        let room_id = Ulid::new();
        client
            .batch_execute(&format!(
                "INSERT INTO rooms (id, category_id) VALUES ('{room_id}', '{category_id}')"
            ))
            .await
            .unwrap();
        rooms.push(room_id);
    }
    (category_id, rooms)
}

async fn phase1_sequential_bookings(host: &str, port: u16) {
    let client = connect(host, port).await;
    let (_, rooms) = setup_category(&client, 1).await;
    let room_id = rooms[0];

    let n = 2000;
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let booking_id = Ulid::new();
        let (check_in, check_out) = one_night_stay(i);
        let t = Instant::now();
        client
            .batch_execute(&format!(
                "INSERT INTO bookings (id, hold_id, guest, room_id, check_in, check_out, adults, children, method, declared_total) \
                 VALUES ('{booking_id}', NULL, 'bench', '{room_id}', '{check_in}', '{check_out}', 1, 0, 'card', 196)"
            ))
            .await
            .unwrap();
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!(
        "  {n} bookings in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent_holds(host: &str, port: u16) {
    let n_tasks = 10;
    let n_per_task = 200;

    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_tasks {
        let host = host.to_string();
        handles.push(tokio::spawn(async move {
            // Each task gets its own property, so WAL and lock contention
            // is the per-engine cost rather than cross-task conflicts
            let client = connect(&host, port).await;
            let (category_id, _) = setup_category(&client, n_per_task).await;

            for i in 0..n_per_task {
                let hold_id = Ulid::new();
                let (check_in, check_out) = one_night_stay(i);
                client
                    .batch_execute(&format!(
                        "INSERT INTO holds (id, category_id, guest, check_in, check_out, adults, children) \
                         VALUES ('{hold_id}', '{category_id}', 'bench', '{check_in}', '{check_out}', 1, 0)"
                    ))
                    .await
                    .unwrap();
            }
        }));
    }

    for h in handles {
        h.await.unwrap();
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} holds = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_hold_contention(host: &str, port: u16) {
    // Many clients chase the same small category in one property for the
    // same stay; exactly n_rooms holds can win.
    let property = format!("bench_{}", Ulid::new());
    let n_rooms = 10;
    let n_clients = 50;

    let setup_client = connect_to(host, port, &property).await;
    let (category_id, _) = setup_category(&setup_client, n_rooms).await;
    drop(setup_client);

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_clients {
        let host = host.to_string();
        let property = property.clone();
        handles.push(tokio::spawn(async move {
            let client = connect_to(&host, port, &property).await;
            let hold_id = Ulid::new();
            client
                .batch_execute(&format!(
                    "INSERT INTO holds (id, category_id, guest, check_in, check_out, adults, children) \
                     VALUES ('{hold_id}', '{category_id}', 'bench', '2026-08-01', '2026-08-04', 2, 0)"
                ))
                .await
                .is_ok()
        }));
    }

    let mut wins = 0;
    for h in handles {
        if h.await.unwrap() {
            wins += 1;
        }
    }
    let elapsed = start.elapsed();
    println!(
        "  {n_clients} clients contending for {n_rooms} rooms: {wins} holds won in {:.2}s",
        elapsed.as_secs_f64()
    );
    assert_eq!(wins, n_rooms, "oversubscription or undersubscription");
}

async fn phase4_reads_under_write_load(host: &str, port: u16) {
    // Writer tasks: continuously create holds in their own properties
    let stop = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let host = host.to_string();
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let (category_id, _) = setup_category(&client, 1000).await;
            let mut i = 0usize;
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                let hold_id = Ulid::new();
                let (check_in, check_out) = one_night_stay(i % 900);
                let _ = client
                    .batch_execute(&format!(
                        "INSERT INTO holds (id, category_id, guest, check_in, check_out, adults, children) \
                         VALUES ('{hold_id}', '{category_id}', 'bench', '{check_in}', '{check_out}', 1, 0)"
                    ))
                    .await;
                i += 1;
            }
        }));
    }

    // Reader tasks: availability queries over a populated category
    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();

    for _ in 0..n_readers {
        let host = host.to_string();
        reader_handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let (category_id, rooms) = setup_category(&client, 100).await;
            // Claim half the rooms so the overlap scan does real work
            for room_id in rooms.iter().take(50) {
                let booking_id = Ulid::new();
                client
                    .batch_execute(&format!(
                        "INSERT INTO bookings (id, hold_id, guest, room_id, check_in, check_out, adults, children, method, declared_total) \
                         VALUES ('{booking_id}', NULL, 'bench', '{room_id}', '2026-08-01', '2026-08-08', 1, 0, 'card', 1369)"
                    ))
                    .await
                    .unwrap();
            }

            let mut latencies = Vec::with_capacity(reads_per_reader);
            for _ in 0..reads_per_reader {
                let t = Instant::now();
                client
                    .simple_query(&format!(
                        "SELECT * FROM availability WHERE category_id = '{category_id}' \
                         AND check_in = '2026-08-03' AND check_out = '2026-08-05'"
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.unwrap());
    }

    stop.store(true, std::sync::atomic::Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }

    print_latency("availability query", &mut all_latencies);
}

async fn phase5_pool_rush(host: &str, port: u16) {
    // All clients rush one slot; capacity caps the winners.
    let property = format!("bench_{}", Ulid::new());
    let capacity = 20;
    let n_clients = 100;

    let setup_client = connect_to(host, port, &property).await;
    let slot_id = Ulid::new();
    setup_client
        .batch_execute(&format!(
            "INSERT INTO pool_slots (id, date, start_time, max_people) \
             VALUES ('{slot_id}', '2026-08-01', 32400000, {capacity})"
        ))
        .await
        .unwrap();
    drop(setup_client);

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_clients {
        let host = host.to_string();
        let property = property.clone();
        handles.push(tokio::spawn(async move {
            let client = connect_to(&host, port, &property).await;
            let id = Ulid::new();
            client
                .batch_execute(&format!(
                    "INSERT INTO pool_reservations (id, slot_id, guest) VALUES ('{id}', '{slot_id}', 'bench')"
                ))
                .await
                .is_ok()
        }));
    }

    let mut wins = 0;
    for h in handles {
        if h.await.unwrap() {
            wins += 1;
        }
    }
    let elapsed = start.elapsed();
    println!(
        "  {n_clients} clients rushing a slot of {capacity}: {wins} reserved in {:.2}s",
        elapsed.as_secs_f64()
    );
    assert_eq!(wins, capacity, "capacity violated under contention");
}

async fn phase6_connection_storm(host: &str, port: u16) {
    let n_conns = 50;
    let ops_per_conn = 10;

    let start = Instant::now();
    let mut handles = Vec::new();
    let success = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));

    for _ in 0..n_conns {
        let host = host.to_string();
        let success = success.clone();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port).await;
            let (category_id, _) = setup_category(&client, ops_per_conn).await;

            for i in 0..ops_per_conn {
                let hold_id = Ulid::new();
                let (check_in, check_out) = one_night_stay(i);
                client
                    .batch_execute(&format!(
                        "INSERT INTO holds (id, category_id, guest, check_in, check_out, adults, children) \
                         VALUES ('{hold_id}', '{category_id}', 'bench', '{check_in}', '{check_out}', 1, 0)"
                    ))
                    .await
                    .unwrap();
            }
            success.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }));
    }

    for h in handles {
        let _ = h.await;
    }

    let elapsed = start.elapsed();
    let ok = success.load(std::sync::atomic::Ordering::Relaxed);
    println!(
        "  {n_conns} connections, {ops_per_conn} ops each: {ok}/{n_conns} succeeded in {:.2}s",
        elapsed.as_secs_f64()
    );
}

#[tokio::main]
async fn main() {
    let host = std::env::var("INNKEEP_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("INNKEEP_PORT")
        .unwrap_or_else(|_| "5433".into())
        .parse()
        .expect("invalid INNKEEP_PORT");

    println!("=== innkeep stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Each phase uses its own property (unique dbname) to avoid interference

    println!("[phase 1] sequential write throughput");
    phase1_sequential_bookings(&host, port).await;

    println!("\n[phase 2] concurrent write throughput");
    phase2_concurrent_holds(&host, port).await;

    println!("\n[phase 3] hold contention on a small category");
    phase3_hold_contention(&host, port).await;

    println!("\n[phase 4] read latency under write load");
    phase4_reads_under_write_load(&host, port).await;

    println!("\n[phase 5] pool slot rush");
    phase5_pool_rush(&host, port).await;

    println!("\n[phase 6] connection storm");
    phase6_connection_storm(&host, port).await;

    println!("\n=== benchmark complete ===");
}
