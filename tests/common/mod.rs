#![allow(dead_code)]

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use foldertail::{Config, Line, LineReceiver, TailHandle, Tailer};
use tokio_util::sync::CancellationToken;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn config(root: &Path) -> Config {
    Config {
        scan_interval: Duration::from_millis(200),
        ..Config::new(root)
    }
}

pub async fn start(config: Config) -> (TailHandle, LineReceiver, CancellationToken) {
    let shutdown = CancellationToken::new();
    let mut handle = Tailer::new(config)
        .unwrap()
        .start(shutdown.clone())
        .await
        .unwrap();
    let lines = handle.take_lines().unwrap();
    (handle, lines, shutdown)
}

pub async fn next_line(lines: &mut LineReceiver) -> Line {
    tokio::time::timeout(TIMEOUT, lines.recv())
        .await
        .expect("timed out waiting for a line")
        .expect("line queue closed")
}

/// Polls `check` until it holds or the timeout expires.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    check()
}

pub fn append(path: &Path, data: &str) {
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(data.as_bytes()).unwrap();
    file.sync_all().unwrap();
}
