use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::atomic::{AtomicU64, Ordering};

use dagspawn_contracts::{RUN_REPORT_SCHEMA_VERSION, VALIDATE_REPORT_SCHEMA_VERSION};
use serde_json::{json, Value};

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

fn temp_dir(prefix: &str) -> PathBuf {
    let base = std::env::temp_dir();
    let pid = std::process::id();
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = base.join(format!("{prefix}_{pid}_{n}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn dagspawn(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_dagspawn"))
        .args(args)
        .env_remove("DAGSPAWN_BACKEND")
        .output()
        .expect("run dagspawn")
}

fn stdout_json(out: &Output) -> Value {
    serde_json::from_slice(&out.stdout).unwrap_or_else(|err| {
        panic!(
            "parse stdout json: {err}\nstdout={}\nstderr={}",
            String::from_utf8_lossy(&out.stdout),
            String::from_utf8_lossy(&out.stderr)
        )
    })
}

fn write_json(dir: &Path, name: &str, v: &Value) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_vec(v).expect("encode json")).expect("write json");
    path
}

fn hello_doc() -> Value {
    json!({
        "schema_version": "dagspawn.graph@0.1.0",
        "spawns": [{"from": 0, "child": 1, "pipes": [10]}],
        "pipes": [{"owner": 0, "read_pipe": 10, "write_pipe": 11}],
        "writes": [{"from": 0, "from_pipe": 11, "to": 1, "to_pipe": 10,
                    "data_b64": "SGVsbG8gV29ybGQh"}]
    })
}

fn p(path: &Path) -> &str {
    path.to_str().expect("utf-8 temp path")
}

#[test]
fn gen_encode_inspect_agree() {
    let dir = temp_dir("dagspawn_cli_gen");
    let json_path = dir.join("g.json");
    let bin_path = dir.join("g.bin");

    let out = dagspawn(&["gen", "--nodes", "6", "--seed", "11", "--output", p(&json_path)]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));

    let out = dagspawn(&["encode", "--input", p(&json_path), "--output", p(&bin_path)]);
    assert!(out.status.success(), "stderr={}", String::from_utf8_lossy(&out.stderr));

    let out = dagspawn(&["inspect", "--graph", p(&bin_path)]);
    assert!(out.status.success());
    let from_bin = stdout_json(&out);
    let from_file: Value =
        serde_json::from_slice(&std::fs::read(&json_path).expect("read json")).expect("parse");
    assert_eq!(from_bin, from_file);
    assert_eq!(from_bin["spawns"].as_array().map(Vec::len), Some(5));

    let out = dagspawn(&["gen", "--nodes", "6", "--seed", "11"]);
    assert_eq!(stdout_json(&out), from_file, "generation is deterministic");
}

#[test]
fn validate_reports_issues() {
    let dir = temp_dir("dagspawn_cli_validate");
    let good = write_json(&dir, "good.json", &hello_doc());
    let out = dagspawn(&["validate", "--graph", p(&good)]);
    assert_eq!(out.status.code(), Some(0));
    let v = stdout_json(&out);
    assert_eq!(v["schema_version"], VALIDATE_REPORT_SCHEMA_VERSION);
    assert_eq!(v["ok"], true);

    let mut bad = hello_doc();
    bad["spawns"] = json!([
        {"from": 0, "child": 1, "pipes": []},
        {"from": 0, "child": 1, "pipes": []}
    ]);
    bad["writes"][0]["to"] = json!(0);
    let bad = write_json(&dir, "bad.json", &bad);
    let out = dagspawn(&["validate", "--graph", p(&bad)]);
    assert_eq!(out.status.code(), Some(1));
    let v = stdout_json(&out);
    assert_eq!(v["ok"], false);
    assert_eq!(v["issues"].as_array().map(Vec::len), Some(2));
}

#[test]
fn unreadable_graph_is_a_driver_error() {
    let dir = temp_dir("dagspawn_cli_unreadable");
    let out = dagspawn(&["inspect", "--graph", p(&dir.join("nope.bin"))]);
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("read graph"));

    let mut doc = hello_doc();
    doc["extra"] = json!(1);
    let path = write_json(&dir, "extra.json", &doc);
    let out = dagspawn(&["validate", "--graph", p(&path)]);
    assert_eq!(out.status.code(), Some(2));
}

#[test]
fn sim_run_reports_success() {
    let dir = temp_dir("dagspawn_cli_sim");
    let graph = write_json(&dir, "hello.json", &hello_doc());
    let out = dagspawn(&["run", "--graph", p(&graph), "--backend", "sim"]);
    assert_eq!(out.status.code(), Some(0));
    let v = stdout_json(&out);
    assert_eq!(v["schema_version"], RUN_REPORT_SCHEMA_VERSION);
    assert_eq!(v["backend"], "sim");
    assert_eq!(v["ok"], true);
    assert_eq!(v["exit_code"], 0);
    assert_eq!(v["timed_out"], false);
    assert_eq!(v["graph"]["spawns"], 1);
    assert_eq!(v["graph"]["sha256"].as_str().map(str::len), Some(64));
}

#[test]
fn sim_run_surfaces_node_exit_codes() {
    let dir = temp_dir("dagspawn_cli_sim_codes");

    let mut corrupt = hello_doc();
    corrupt["writes"] = json!([
        {"from": 0, "from_pipe": 11, "to": 2, "to_pipe": 50, "data_b64": "QUFBQQ=="},
        {"from": 3, "from_pipe": 60, "to": 1, "to_pipe": 10, "data_b64": "QkJCQg=="}
    ]);
    let graph = write_json(&dir, "corrupt.json", &corrupt);
    let out = dagspawn(&["run", "--graph", p(&graph), "--backend", "sim"]);
    assert_eq!(out.status.code(), Some(49));
    let v = stdout_json(&out);
    assert_eq!(v["exit_name"], "corrupted_data");
    assert_eq!(v["ok"], false);

    let mut invalid = hello_doc();
    invalid["writes"][0]["to"] = json!(0);
    let graph = write_json(&dir, "invalid.json", &invalid);
    let out = dagspawn(&["run", "--graph", p(&graph), "--backend", "sim"]);
    assert_eq!(out.status.code(), Some(50));
}

fn stalled_doc() -> Value {
    // The root reads from a pipe whose write end it holds itself.
    json!({
        "schema_version": "dagspawn.graph@0.1.0",
        "pipes": [{"owner": 0, "read_pipe": 0, "write_pipe": 1}],
        "writes": [{"from": 5, "from_pipe": 1, "to": 0, "to_pipe": 0, "data_b64": "AA=="}]
    })
}

#[test]
fn sim_run_times_out() {
    let dir = temp_dir("dagspawn_cli_sim_timeout");
    let graph = write_json(&dir, "stall.json", &stalled_doc());
    let out = dagspawn(&[
        "run", "--graph", p(&graph), "--backend", "sim", "--wall-ms", "200",
    ]);
    assert_eq!(out.status.code(), Some(124));
    let v = stdout_json(&out);
    assert_eq!(v["timed_out"], true);
    assert!(v["exit_code"].is_null());
}

#[test]
fn unknown_backend_is_rejected() {
    let dir = temp_dir("dagspawn_cli_backend");
    let graph = write_json(&dir, "hello.json", &hello_doc());
    let out = Command::new(env!("CARGO_BIN_EXE_dagspawn"))
        .args(["run", "--graph", p(&graph)])
        .env("DAGSPAWN_BACKEND", "vm")
        .output()
        .expect("run dagspawn");
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("DAGSPAWN_BACKEND"));
}

#[test]
fn oversized_graph_is_refused_for_os_backend() {
    let dir = temp_dir("dagspawn_cli_oversized");
    let mut doc = hello_doc();
    let payload = vec![0x5Au8; 700 * 1024];
    doc["writes"][0]["data_b64"] = json!(base64_std(&payload));
    let graph = write_json(&dir, "big.json", &doc);

    let out = dagspawn(&["run", "--graph", p(&graph), "--backend", "os"]);
    assert_eq!(out.status.code(), Some(2));
    assert!(String::from_utf8_lossy(&out.stderr).contains("byte limit of the os backend"));
    assert!(out.stdout.is_empty());

    let out = dagspawn(&["run", "--graph", p(&graph), "--backend", "sim"]);
    assert_eq!(out.status.code(), Some(0));
}

fn base64_std(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// The node program is built by its own package; it sits next to this
/// binary when the whole workspace is built.
#[cfg(unix)]
fn sibling_node_bin() -> Option<PathBuf> {
    let cli = PathBuf::from(env!("CARGO_BIN_EXE_dagspawn"));
    let cand = cli.parent()?.join("dagspawn-node");
    cand.is_file().then_some(cand)
}

#[cfg(unix)]
#[test]
fn os_run_end_to_end() {
    let Some(node_bin) = sibling_node_bin() else {
        eprintln!("skipping: dagspawn-node is not built next to dagspawn");
        return;
    };
    let dir = temp_dir("dagspawn_cli_os");

    let graph = write_json(&dir, "hello.json", &hello_doc());
    let out = dagspawn(&[
        "run", "--graph", p(&graph), "--backend", "os", "--node-bin", p(&node_bin),
        "--log", "debug",
    ]);
    assert_eq!(out.status.code(), Some(0), "stderr={}", String::from_utf8_lossy(&out.stderr));
    let v = stdout_json(&out);
    assert_eq!(v["backend"], "os");
    assert_eq!(v["ok"], true);
    assert!(!v["stderr_b64"].as_str().unwrap_or("").is_empty(), "debug logs captured");

    let gen = dir.join("gen.bin");
    let out = dagspawn(&["gen", "--nodes", "10", "--seed", "5", "--output", p(&gen)]);
    assert!(out.status.success());
    let out = dagspawn(&[
        "run", "--graph", p(&gen), "--backend", "os", "--node-bin", p(&node_bin),
    ]);
    assert_eq!(out.status.code(), Some(0));

    let graph = write_json(&dir, "stall.json", &stalled_doc());
    let out = dagspawn(&[
        "run", "--graph", p(&graph), "--backend", "os", "--node-bin", p(&node_bin),
        "--wall-ms", "300",
    ]);
    assert_eq!(out.status.code(), Some(124));
    assert_eq!(stdout_json(&out)["timed_out"], true);
}
