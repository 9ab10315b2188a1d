// tests/common/mod.rs
// Shared test utilities for integration tests
#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use tempfile::TempDir;

/// Path of the binary under test
pub fn logweave_binary() -> &'static str {
    env!("CARGO_BIN_EXE_logweave")
}

/// Arguments every test passes so results don't depend on the environment
pub const BASE_ARGS: &[&str] = &["--ignore-config", "--no-emoji"];

/// Run logweave with the given arguments, returning (stdout, stderr, exit code)
pub fn run_logweave(args: &[&str]) -> (String, String, i32) {
    let output = Command::new(logweave_binary())
        .args(BASE_ARGS)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .expect("Failed to execute logweave");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.code().unwrap_or(-1),
    )
}

/// Start logweave without waiting for it
pub fn spawn_logweave(args: &[&str]) -> Child {
    Command::new(logweave_binary())
        .args(BASE_ARGS)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("Failed to spawn logweave")
}

/// Temporary input directory filled with the given files
pub fn log_dir(files: &[(&str, &[u8])]) -> TempDir {
    let dir = TempDir::new().expect("Failed to create temp dir");
    for (name, content) in files {
        write_file(dir.path(), name, content);
    }
    dir
}

pub fn write_file(dir: &Path, name: &str, content: &[u8]) {
    fs::write(dir.join(name), content).expect("Failed to write log file");
}

/// Lines of `count` seconds starting at `start`, tagged with `tag`
pub fn timestamped_lines(tag: &str, start: u32, step: u32, count: u32) -> String {
    (0..count)
        .map(|i| {
            let secs = start + i * step;
            format!(
                "2024-05-01T10:{:02}:{:02},{}{}\n",
                secs / 60,
                secs % 60,
                tag,
                i
            )
        })
        .collect()
}

pub fn dir_arg(dir: &TempDir) -> String {
    dir.path().to_string_lossy().to_string()
}
