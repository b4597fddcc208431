#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::time::{SystemTime, UNIX_EPOCH};

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_banker") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "banker.exe" } else { "banker" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve banker binary path for integration test"),
    }
}

/// Run the binary with `HOME` pointed at `home` so no user config leaks in.
pub fn run_cli_case_in(case_name: &str, home: &Path, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("banker-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("HOME", home)
        .env_remove("BANKER_OUTPUT_FORMAT")
        .env_remove("BANKER_PROTOCOL_MODE")
        .env_remove("BANKER_PROTOCOL_FIRST_WAIT_TIMEOUT_MS")
        .env_remove("BANKER_WATCHDOG_POLL_INTERVAL_MS")
        .env_remove("BANKER_LOGGING_JSONL_PATH")
        .env_remove("BANKER_LOGGING_CONSOLE")
        .env_remove("BANKER_LOGGING_STATE_DUMPS")
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute banker command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}

/// Parse the last non-empty stdout line as JSON.
pub fn last_json_line(result: &CmdResult) -> serde_json::Value {
    let line = result
        .stdout
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or_else(|| panic!("no stdout; log: {}", result.log_path.display()));
    serde_json::from_str(line)
        .unwrap_or_else(|e| panic!("bad json {line:?}: {e}; log: {}", result.log_path.display()))
}
