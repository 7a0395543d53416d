//! Helpers for driving external media tools (`ffmpeg`, `ffprobe`).

use std::io::{BufReader, Read};
use std::process::{ChildStderr, Command};
use std::thread::JoinHandle;

/// Whether `binary` resolves on `PATH`.
pub fn command_exists(binary: &str) -> bool {
    Command::new("sh")
        .arg("-c")
        .arg(format!("command -v {binary} >/dev/null 2>&1"))
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

/// Drain a child's stderr on a background thread so the child never
/// blocks on a full pipe.
pub fn drain_stderr(stderr: ChildStderr) -> JoinHandle<String> {
    std::thread::spawn(move || {
        let mut reader = BufReader::new(stderr);
        let mut output = String::new();
        match reader.read_to_string(&mut output) {
            Ok(_) => output,
            Err(err) => format!("<failed to read stderr: {err}>"),
        }
    })
}

/// Collect drained stderr, tolerating a panicked reader.
pub fn join_stderr(handle: JoinHandle<String>) -> String {
    handle
        .join()
        .unwrap_or_else(|_| "<failed to join stderr reader>".to_string())
}

/// Last `max_lines` lines of tool output, for error messages.
pub fn tail_lines(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.trim().lines().collect();
    let start = lines.len().saturating_sub(max_lines);
    lines[start..].join("\n")
}
