//! Integration tests for the `modmap` binary.

use std::path::Path;
use std::process::{Command, Output};

fn cargo_bin() -> Command {
    let mut cmd = Command::new(env!("CARGO"));
    cmd.args(["run", "-q", "-p", "modmap-cli", "--bin", "modmap", "--"]);
    cmd
}

fn run_in(dir: &Path, args: &[&str]) -> Output {
    cargo_bin()
        .arg("--cwd")
        .arg(dir)
        .args(args)
        .output()
        .expect("Failed to run modmap")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    serde_json::from_str(&stdout).expect("stdout should be valid JSON")
}

fn project() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("modmap.json"),
        r#"{
            "map": { "jq": "jquery" },
            "packages": {
                "jquery": { "main": "dist/jquery.js" },
                "app": { "map": { "./platform.js": "./platform-#{./env.js|platform}.js" } }
            },
            "packageConfigPaths": ["packages/*/package.json"],
            "depCache": { "app/main.js": ["./util.js"] },
            "conditions": { "./app/env.js": { "platform": "web" } }
        }"#,
    )
    .unwrap();

    let widgets = dir.path().join("packages").join("widgets");
    std::fs::create_dir_all(&widgets).unwrap();
    std::fs::write(widgets.join("package.json"), r#"{ "main": "lib/index" }"#).unwrap();
    dir
}

#[test]
fn test_resolve_json_mapped_package() {
    let dir = project();
    let output = run_in(dir.path(), &["--json", "resolve", "jq"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json = stdout_json(&output);
    assert_eq!(json["specifier"], "jq");
    let id = json["id"].as_str().unwrap();
    assert!(id.starts_with("file:///"), "{id}");
    assert!(id.ends_with("/jquery/dist/jquery.js"), "{id}");
    assert!(json["metadata"]["packageName"].as_str().unwrap().ends_with("/jquery"));
}

#[test]
fn test_resolve_fetches_package_config() {
    let dir = project();
    let output = run_in(dir.path(), &["--json", "resolve", "packages/widgets"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let id = stdout_json(&output)["id"].as_str().unwrap().to_string();
    assert!(id.ends_with("/packages/widgets/lib/index.js"), "{id}");
}

#[test]
fn test_resolve_interpolates_from_conditions_table() {
    let dir = project();
    let output = run_in(dir.path(), &["--json", "resolve", "app/platform"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let id = stdout_json(&output)["id"].as_str().unwrap().to_string();
    assert!(id.ends_with("/app/platform-web.js"), "{id}");
}

#[test]
fn test_resolve_reports_dep_cache() {
    let dir = project();
    let output = run_in(dir.path(), &["--json", "resolve", "./app/main.js"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json = stdout_json(&output);
    let deps = json["deps"].as_array().unwrap();
    assert_eq!(deps.len(), 1);
    assert!(deps[0].as_str().unwrap().ends_with("/app/util.js"));
}

#[test]
fn test_resolve_sync_matches_async() {
    let dir = project();
    let sync = run_in(dir.path(), &["resolve-sync", "jq", "--parent", "src/main.js"]);
    let resolved = run_in(dir.path(), &["resolve", "jq", "--parent", "src/main.js"]);
    assert!(sync.status.success());
    assert!(resolved.status.success());
    assert_eq!(
        String::from_utf8_lossy(&sync.stdout).trim(),
        String::from_utf8_lossy(&resolved.stdout).trim()
    );
}

#[test]
fn test_missing_package_config_fails() {
    let dir = project();
    let output = run_in(dir.path(), &["resolve", "packages/missing/x"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("package.json"));
}

#[test]
fn test_config_prints_normalized_config() {
    let dir = project();
    let output = run_in(dir.path(), &["config"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json = stdout_json(&output);
    let base = json["baseURL"].as_str().unwrap();
    assert!(base.starts_with("file:///") && base.ends_with('/'));
    let packages = json["packages"].as_object().unwrap();
    assert!(packages.keys().any(|k| k.ends_with("/jquery")));
    assert!(json["packageConfigPaths"][0]
        .as_str()
        .unwrap()
        .ends_with("/packages/*/package.json"));
}

#[test]
fn test_explicit_config_flag() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("loader.json"), r#"{ "registry": ["react"] }"#).unwrap();

    let output = run_in(dir.path(), &["--config", "loader.json", "resolve-sync", "react"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "react");
}

#[test]
fn test_version_json() {
    let output = cargo_bin()
        .args(["--json", "version"])
        .output()
        .expect("Failed to run modmap");
    assert!(output.status.success());

    let json = stdout_json(&output);
    assert_eq!(json["name"], "modmap");
    assert!(json["version"].is_string());
}
