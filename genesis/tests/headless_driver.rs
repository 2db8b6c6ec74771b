//! Dynamic validation against a real driver process speaking the
//! line-delimited JSON protocol.

#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use genesis::core::rules::ArtifactRules;
use genesis::io::environment::{ExecutionEnvironment, ProcessEnvironment};
use genesis::test_support::valid_artifact;
use genesis::validate::{DynamicCheck, DynamicMode, DynamicValidator};

/// Write a `/bin/sh` driver that answers `navigate` with `navigate_reply`,
/// reports `page_errors` on `drain` and evaluates every expression to `true`.
fn write_driver(dir: &Path, navigate_reply: &str, page_errors: &[&str]) -> PathBuf {
    let errors = serde_json::to_string(page_errors).expect("serialize errors");
    let script = format!(
        r#"while IFS= read -r line; do
  case "$line" in
    *'"op":"navigate"'*) echo '{navigate_reply}' ;;
    *'"op":"drain"'*) echo '{{"ok":true,"value":{{"console_errors":[],"page_errors":{errors}}}}}' ;;
    *'"op":"evaluate"'*) echo '{{"ok":true,"value":true}}' ;;
    *'"op":"close"'*) exit 0 ;;
    *) echo '{{"ok":false,"error":"unknown op"}}' ;;
  esac
done
"#
    );
    let path = dir.join("driver.sh");
    std::fs::write(&path, script).expect("write driver");
    path
}

/// The script is run through `/bin/sh` so it never needs the exec bit.
fn environment(driver: &Path) -> Arc<dyn ExecutionEnvironment> {
    Arc::new(ProcessEnvironment::new(&[
        "/bin/sh".to_string(),
        driver.display().to_string(),
    ]))
}

fn dynamic(env: Arc<dyn ExecutionEnvironment>) -> DynamicValidator {
    DynamicValidator::new(
        env,
        ArtifactRules::default(),
        Duration::ZERO,
        Duration::from_secs(30),
    )
}

#[tokio::test]
async fn uncaught_page_error_is_reported_as_runtime_error() {
    let temp = tempfile::tempdir().expect("tempdir");
    let driver = write_driver(
        temp.path(),
        r#"{"ok":true}"#,
        &["Uncaught TypeError: x is undefined"],
    );
    let env = environment(&driver);
    assert!(env.available());

    let check = dynamic(env).check(&valid_artifact()).await;
    assert_eq!(
        check,
        DynamicCheck {
            ok: false,
            console_errors: Vec::new(),
            runtime_errors: vec!["Uncaught TypeError: x is undefined".to_string()],
            warnings: Vec::new(),
            mode: DynamicMode::Browser,
        }
    );
}

#[tokio::test]
async fn clean_page_passes_every_assertion() {
    let temp = tempfile::tempdir().expect("tempdir");
    let driver = write_driver(temp.path(), r#"{"ok":true}"#, &[]);

    let check = dynamic(environment(&driver)).check(&valid_artifact()).await;
    assert!(check.ok, "{check:?}");
    assert_eq!(check.mode, DynamicMode::Browser);
}

#[tokio::test]
async fn driver_refusing_navigation_falls_back_to_heuristics() {
    let temp = tempfile::tempdir().expect("tempdir");
    let driver = write_driver(
        temp.path(),
        r#"{"ok":false,"error":"net::ERR_FILE_NOT_FOUND"}"#,
        &[],
    );

    let check = dynamic(environment(&driver)).check(&valid_artifact()).await;
    assert!(check.ok, "{check:?}");
    assert_eq!(check.mode, DynamicMode::Heuristic);
    assert!(check.warnings[0].contains("net::ERR_FILE_NOT_FOUND"));
}
