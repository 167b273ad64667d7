#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::Value;
use sombra_counts::primitives::tree::Unlimited;
use sombra_counts::storage::counts::{CountsStoreOptions, EMPTY_REBUILD};
use sombra_counts::storage::graph::CountsStore;
use sombra_counts::types::{LabelId, TxId, TypeId};
use tempfile::TempDir;

fn setup_store(name: &str) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join(format!("{name}.counts"));
    seed(&path).expect("seed counts");
    (dir, path)
}

fn seed(path: &Path) -> sombra_counts::types::Result<()> {
    let store = CountsStore::open(path, Box::new(EMPTY_REBUILD), &CountsStoreOptions::new("cli"))?;
    store.start()?;
    for tx in [2u64, 3, 5] {
        let mut updater = store.apply(TxId(tx))?.expect("fresh transaction");
        updater.increment_node_count(LabelId(1), 1)?;
        updater.increment_relationship_count(LabelId(1), TypeId(4), LabelId::ANY, 1)?;
        updater.close()?;
    }
    store.checkpoint(&Unlimited)?;
    store.close()
}

#[test]
fn dump_prints_header_and_entries() {
    let (_dir, path) = setup_store("dump");
    let output = cargo_bin_cmd!("sombra-counts")
        .arg("dump")
        .arg(&path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8(output).expect("utf8");
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "Highest gap-free txId: 3");
    assert_eq!(lines[1], "StrayTxId[5] = 0");
    assert_eq!(lines[2], "Node[(1)] = 3");
    assert_eq!(lines.len(), 4);
}

#[test]
fn verify_reports_json() {
    let (_dir, path) = setup_store("verify");
    let output = cargo_bin_cmd!("sombra-counts")
        .args(["--format", "json", "verify"])
        .arg(&path)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let json: Value = serde_json::from_slice(&output).expect("valid json");
    assert_eq!(json["success"], Value::Bool(true));
    assert_eq!(json["counts"]["highest_gap_free_tx_id"], 3);
    assert_eq!(json["counts"]["stray_tx_ids"][0], 5);
    assert_eq!(json["counts"]["counts_checked"], 2);
}

#[test]
fn verify_flags_corrupt_store_without_touching_it() {
    let (_dir, path) = setup_store("corrupt");
    let mut bytes = fs::read(&path).expect("read");
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&path, &bytes).expect("write");

    cargo_bin_cmd!("sombra-counts")
        .arg("verify")
        .arg(&path)
        .assert()
        .failure();
    assert_eq!(fs::read(&path).expect("read"), bytes);
}

#[test]
fn dump_of_missing_store_fails_without_creating_it() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("absent.counts");
    cargo_bin_cmd!("sombra-counts")
        .arg("dump")
        .arg(&path)
        .assert()
        .failure();
    assert!(!path.exists());
}

#[test]
fn config_file_is_honoured() {
    let (dir, path) = setup_store("config");
    let config = dir.path().join("counts.toml");
    fs::write(&config, "name = \"audited\"\nmax_cache_size = 16\n").expect("config");
    cargo_bin_cmd!("sombra-counts")
        .arg("--config")
        .arg(&config)
        .arg("verify")
        .arg(&path)
        .assert()
        .success();

    fs::write(&config, "bogus = 1\n").expect("config");
    cargo_bin_cmd!("sombra-counts")
        .arg("--config")
        .arg(&config)
        .arg("verify")
        .arg(&path)
        .assert()
        .failure();
}
