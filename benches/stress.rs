use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

/// (suite size, suites of that size). One group per suite, so the draw is
/// never oversubscribed.
const SIZE_MIX: [(u32, usize); 3] = [(1, 40), (2, 40), (4, 20)];
const SELECTORS: usize = 8;

async fn connect(host: &str, port: u16, college: &str) -> Client {
    let mut config = Config::new();
    config
        .host(host)
        .port(port)
        .dbname(college)
        .user("registrar")
        .password("suitedraw");

    let (client, conn) = config.connect(NoTls).await.expect("connect failed");
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            eprintln!("connection error: {e}");
        }
    });
    client
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
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

async fn enrolled_student(client: &Client, draw: Ulid) -> Ulid {
    let id = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO students (id, name, surname) VALUES ('{id}', 'Bench', 'S{id}');
             INSERT INTO draw_students (draw_id, student_id) VALUES ('{draw}', '{id}')"
        ))
        .await
        .unwrap();
    id
}

/// Draw in group_formation with every suite of `SIZE_MIX` attached.
async fn setup_draw(client: &Client) -> Ulid {
    let draw = Ulid::new();
    client
        .batch_execute(&format!(
            "INSERT INTO draws (id, name, intent_locked) VALUES ('{draw}', 'Bench draw', true)"
        ))
        .await
        .unwrap();
    let mut suites = 0;
    for (size, count) in SIZE_MIX {
        for i in 0..count {
            let suite = Ulid::new();
            client
                .batch_execute(&format!(
                    "INSERT INTO suites (id, label, size) VALUES ('{suite}', 'S{size}-{i}', {size});
                     INSERT INTO draw_suites (draw_id, suite_id) VALUES ('{draw}', '{suite}')"
                ))
                .await
                .unwrap();
            suites += 1;
        }
    }
    enrolled_student(client, draw).await;
    client
        .batch_execute(&format!(
            "UPDATE draws SET phase = 'group_formation' WHERE id = '{draw}'"
        ))
        .await
        .unwrap();
    println!("  draw {draw} with {suites} suites");
    draw
}

async fn phase1_group_formation(client: &Client, draw: Ulid) -> HashMap<Ulid, u32> {
    let mut groups = HashMap::new();
    let mut latencies = Vec::new();
    let start = Instant::now();

    for (size, count) in SIZE_MIX {
        for _ in 0..count {
            let group = Ulid::new();
            let leader = enrolled_student(client, draw).await;
            let t = Instant::now();
            client
                .batch_execute(&format!(
                    "INSERT INTO groups (id, draw_id, leader_id, size) VALUES ('{group}', '{draw}', '{leader}', {size})"
                ))
                .await
                .unwrap();
            latencies.push(t.elapsed());
            for _ in 1..size {
                let member = enrolled_student(client, draw).await;
                let t = Instant::now();
                client
                    .batch_execute(&format!(
                        "INSERT INTO memberships (group_id, student_id, status) VALUES ('{group}', '{member}', 'requested');
                         UPDATE memberships SET status = 'accepted' WHERE group_id = '{group}' AND student_id = '{member}'"
                    ))
                    .await
                    .unwrap();
                latencies.push(t.elapsed());
            }
            groups.insert(group, size);
        }
    }

    println!(
        "  {} groups formed in {:.2}s",
        groups.len(),
        start.elapsed().as_secs_f64()
    );
    print_latency("group write", &mut latencies);
    groups
}

async fn phase2_lottery(client: &Client, draw: Ulid) {
    let t = Instant::now();
    let locked = client
        .execute(
            "UPDATE groups SET status = 'locked' WHERE draw_id = $1",
            &[&draw.to_string()],
        )
        .await
        .unwrap();
    println!("  locked {locked} groups in {:.2}ms", t.elapsed().as_secs_f64() * 1000.0);

    client
        .batch_execute(&format!(
            "UPDATE draws SET phase = 'pre_lottery' WHERE id = '{draw}'"
        ))
        .await
        .unwrap();
    let t = Instant::now();
    client
        .batch_execute(&format!(
            "UPDATE draws SET phase = 'lottery' WHERE id = '{draw}'"
        ))
        .await
        .unwrap();
    println!("  lottery ran in {:.2}ms", t.elapsed().as_secs_f64() * 1000.0);
    client
        .batch_execute(&format!(
            "UPDATE draws SET phase = 'suite_selection' WHERE id = '{draw}'"
        ))
        .await
        .unwrap();
}

/// Every selector owns a slice of the groups and grabs a random free suite
/// for each of them as soon as their number comes up. Selectors collide on
/// suites; the loser retries with a fresh view.
async fn phase3_concurrent_selection(
    host: &str,
    port: u16,
    college: &str,
    draw: Ulid,
    groups: &HashMap<Ulid, u32>,
) {
    let conflicts = Arc::new(AtomicUsize::new(0));
    let start = Instant::now();
    let mut handles = Vec::new();

    for k in 0..SELECTORS {
        let owned: HashMap<String, u32> = groups
            .iter()
            .enumerate()
            .filter(|(i, _)| i % SELECTORS == k)
            .map(|(_, (g, s))| (g.to_string(), *s))
            .collect();
        let client = connect(host, port, college).await;
        let conflicts = conflicts.clone();
        handles.push(tokio::spawn(async move {
            let mut latencies = Vec::new();
            loop {
                let turn = rows(
                    &client,
                    &format!("SELECT * FROM next_eligible WHERE draw_id = '{draw}'"),
                )
                .await;
                if turn.is_empty() {
                    break;
                }
                let mine: Vec<(String, u32)> = turn
                    .iter()
                    .flat_map(|u| u.get("pending_groups").unwrap_or("").split(','))
                    .filter_map(|g| owned.get(g).map(|s| (g.to_string(), *s)))
                    .collect();
                if mine.is_empty() {
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    continue;
                }
                let suites = rows(&client, &format!("SELECT * FROM suites WHERE draw_id = '{draw}'")).await;
                for (group, size) in mine {
                    let size = size.to_string();
                    let free: Vec<&SimpleQueryRow> = suites
                        .iter()
                        .filter(|s| s.get("group_id").is_none() && s.get("size") == Some(size.as_str()))
                        .collect();
                    let Some(suite) = free.choose(&mut rand::thread_rng()) else {
                        continue;
                    };
                    let t = Instant::now();
                    let result = client
                        .batch_execute(&format!(
                            "INSERT INTO suite_assignments (group_id, suite_id) VALUES ('{group}', '{}')",
                            suite.get("id").unwrap_or_default()
                        ))
                        .await;
                    latencies.push(t.elapsed());
                    if result.is_err() {
                        conflicts.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in handles {
        all_latencies.extend(h.await.unwrap());
    }
    println!(
        "  {} groups housed by {SELECTORS} selectors in {:.2}s, {} conflicts",
        groups.len(),
        start.elapsed().as_secs_f64(),
        conflicts.load(Ordering::Relaxed)
    );
    print_latency("assign", &mut all_latencies);
}

async fn phase4_report_storm(host: &str, port: u16, college: &str, draw: Ulid) {
    let n_conns = 50;
    let reads_per_conn = 20;
    let start = Instant::now();
    let mut handles = Vec::new();

    for _ in 0..n_conns {
        let host = host.to_string();
        let college = college.to_string();
        handles.push(tokio::spawn(async move {
            let client = connect(&host, port, &college).await;
            let mut latencies = Vec::with_capacity(reads_per_conn);
            for i in 0..reads_per_conn {
                let report = if i % 2 == 0 { "lottery" } else { "capacity" };
                let t = Instant::now();
                rows(&client, &format!("SELECT * FROM {report} WHERE draw_id = '{draw}'")).await;
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }
    let mut all_latencies = Vec::new();
    for h in handles {
        all_latencies.extend(h.await.unwrap());
    }
    println!(
        "  {n_conns} connections, {reads_per_conn} reports each in {:.2}s",
        start.elapsed().as_secs_f64()
    );
    print_latency("report", &mut all_latencies);
}

#[tokio::main]
async fn main() {
    let host = std::env::var("SUITEDRAW_HOST").unwrap_or_else(|_| "127.0.0.1".into());
    let port: u16 = std::env::var("SUITEDRAW_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(5433);

    println!("=== suitedraw stress benchmark ===");
    println!("target: {host}:{port}\n");

    // Fresh college per run.
    let college = format!("bench_{}", Ulid::new());
    let admin = connect(&host, port, &college).await;

    println!("[setup]");
    let draw = setup_draw(&admin).await;

    println!("\n[phase 1] group formation");
    let groups = phase1_group_formation(&admin, draw).await;

    println!("\n[phase 2] lock and lottery");
    phase2_lottery(&admin, draw).await;

    println!("\n[phase 3] concurrent suite selection");
    phase3_concurrent_selection(&host, port, &college, draw, &groups).await;

    println!("\n[phase 4] report storm");
    phase4_report_storm(&host, port, &college, draw).await;

    admin
        .batch_execute(&format!("UPDATE draws SET phase = 'results' WHERE id = '{draw}'"))
        .await
        .unwrap();
    println!("\n=== benchmark complete ===");
}
