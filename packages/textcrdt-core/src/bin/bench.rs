use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use textcrdt_core::{Branch, Frontier, Replica, SyncSession};

const CI_COUNTS: &[u64] = &[100, 1_000, 10_000];

const LOCAL_COUNTS: &[u64] = &[10, 100, 1_000, 10_000];

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Output {
    implementation: &'static str,
    workload: String,
    timestamp: String,
    name: String,
    total_ops: u64,
    duration_ms: f64,
    ops_per_sec: f64,
    extra: Extra,
    source_file: Option<String>,
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct Extra {
    count: u64,
    mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    document_len: Option<usize>,
}

fn is_ci() -> bool {
    env::var("CI").map(|v| v == "true").unwrap_or(false)
}

/// Two agents typing `count` characters each into the same spot, then merging.
fn concurrent_pair(count: u64) -> Replica {
    let mut a = Replica::with_agent("alice");
    let mut b = Replica::with_agent("bob");
    for i in 0..count {
        let ca = char::from(b'a' + (i % 26) as u8);
        let cb = char::from(b'A' + (i % 26) as u8);
        a.insert(a.len(), &ca.to_string()).expect("local insert");
        b.insert(0, &cb.to_string()).expect("local insert");
        if i % 8 == 7 {
            a.delete(a.len() / 2, 1).expect("local delete");
        }
    }
    let batch = textcrdt_core::export_missing(&b, a.version_vector()).expect("export");
    SyncSession::new().apply(&mut a, batch).expect("apply");
    a
}

fn typing(count: u64) -> (f64, usize) {
    let start = Instant::now();
    let mut doc = Replica::with_agent("typist");
    for i in 0..count {
        let c = char::from(b'a' + (i % 26) as u8);
        doc.insert(doc.len(), &c.to_string()).expect("local insert");
    }
    (start.elapsed().as_secs_f64() * 1000.0, doc.len())
}

fn walker_checkout(doc: &Replica) -> (f64, usize) {
    let oplog = doc.oplog();
    let mut branch = Branch::new();
    let start = Instant::now();
    for lv in (0..oplog.len()).step_by(64) {
        branch.checkout(oplog, &Frontier::new_1(lv)).expect("checkout");
    }
    branch.checkout(oplog, oplog.version()).expect("checkout");
    (start.elapsed().as_secs_f64() * 1000.0, branch.len())
}

fn rebuild_checkout(doc: &Replica) -> (f64, usize) {
    let oplog = doc.oplog();
    let mut branch = Branch::new();
    let start = Instant::now();
    for lv in (0..oplog.len()).step_by(64) {
        branch.rebuild(oplog, &Frontier::new_1(lv)).expect("rebuild");
    }
    branch.rebuild(oplog, oplog.version()).expect("rebuild");
    (start.elapsed().as_secs_f64() * 1000.0, branch.len())
}

fn main() {
    let counts: &[u64] = if is_ci() { CI_COUNTS } else { LOCAL_COUNTS };

    let mut out_dir: Option<PathBuf> = None;
    let mut custom: Option<Vec<u64>> = None;
    for arg in env::args().skip(1) {
        if let Some(val) = arg.strip_prefix("--count=") {
            custom = Some(vec![val.parse().unwrap_or(500)]);
        } else if let Some(val) = arg.strip_prefix("--counts=") {
            let parsed: Vec<u64> = val
                .split(',')
                .filter_map(|s| s.trim().parse::<u64>().ok())
                .collect();
            if !parsed.is_empty() {
                custom = Some(parsed);
            }
        } else if let Some(val) = arg.strip_prefix("--out-dir=") {
            out_dir = Some(PathBuf::from(val));
        }
    }

    let counts = custom.as_deref().unwrap_or(counts);
    let out_dir = out_dir.unwrap_or_else(|| PathBuf::from("benchmarks/core"));
    fs::create_dir_all(&out_dir).expect("mkdirs");

    for &count in counts {
        let doc = concurrent_pair(count);
        let runs: [(&str, &'static str, u64, (f64, usize)); 3] = [
            ("typing", "sequential", count, typing(count)),
            ("checkout", "walker", doc.oplog().len() as u64, walker_checkout(&doc)),
            ("checkout", "rebuild", doc.oplog().len() as u64, rebuild_checkout(&doc)),
        ];
        for (workload, mode, total_ops, (duration_ms, document_len)) in runs {
            let workload_name = format!("{workload}-{mode}-{count}");
            let out_path = out_dir.join(format!("{workload_name}.json"));
            let output = Output {
                implementation: "textcrdt-core",
                workload: workload_name.clone(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                name: workload_name,
                total_ops,
                duration_ms,
                ops_per_sec: if duration_ms > 0.0 {
                    total_ops as f64 / duration_ms * 1000.0
                } else {
                    f64::INFINITY
                },
                extra: Extra {
                    count,
                    mode,
                    document_len: Some(document_len),
                },
                source_file: Some(out_path.display().to_string()),
            };

            let json = serde_json::to_string_pretty(&output).expect("serialize");
            fs::write(&out_path, &json).expect("write output");
            println!("{}", json);
        }
    }
}
