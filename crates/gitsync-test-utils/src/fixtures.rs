//! Dashboard manifests used across test suites.

use std::path::PathBuf;

use serde_json::{Value, json};

/// Uid of the classic dashboard in `all-panels.json`.
pub const ALL_PANELS_UID: &str = "n1jR8vnnz";

/// Absolute path of a file under `test-fixtures/provisioning`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../test-fixtures/provisioning")
        .join(name)
}

/// Raw bytes of a fixture file.
///
/// # Panics
/// Panics if the fixture does not exist.
pub fn load(name: &str) -> Vec<u8> {
    let path = fixture_path(name);
    std::fs::read(&path).unwrap_or_else(|e| panic!("fixture {}: {e}", path.display()))
}

/// A `Dashboard` manifest at `version` (e.g. `v1beta1`).
pub fn dashboard(version: &str, name: &str, title: &str) -> Value {
    json!({
        "apiVersion": format!("dashboard.grafana.app/{version}"),
        "kind": "Dashboard",
        "metadata": { "name": name },
        "spec": { "title": title, "panels": [] }
    })
}

/// Pretty JSON bytes of a manifest, as a user would commit it.
pub fn to_bytes(value: &Value) -> Vec<u8> {
    let mut out = serde_json::to_vec_pretty(value).unwrap_or_default();
    out.push(b'\n');
    out
}
