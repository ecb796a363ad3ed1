mod common;

use common::{append, config, eventually, next_line, start};
use foldertail::Config;
use std::time::Duration;
use tempfile::tempdir;

#[tokio::test]
pub async fn test_logrotate() {
    let logdir = tempdir().unwrap();
    let logfile = logdir.path().join("foo.log");
    std::fs::write(&logfile, "").unwrap();

    // Files that show up later are tailed like startup files, so a non-zero
    // count picks up whatever the new generation already holds. Periodic
    // scans are off so only notifications drive the rotation.
    let (handle, mut lines, shutdown) = start(Config {
        lines: 10,
        scan_interval: Duration::ZERO,
        ..config(logdir.path())
    })
    .await;

    append(&logfile, "foo foo foo\nbar bar bar\n");
    assert_eq!(next_line(&mut lines).await.text(), "foo foo foo");
    assert_eq!(next_line(&mut lines).await.text(), "bar bar bar");

    // Rotate: move the live file aside, then start a smaller fresh one.
    std::fs::rename(&logfile, logdir.path().join("foo.log.1")).unwrap();
    std::fs::write(&logfile, "baz\n").unwrap();
    append(&logfile, "qux\n");

    // The rotated generation is picked up at its end, so nothing is replayed
    // under the new name.
    let mut seen = Vec::new();
    while seen.len() < 2 {
        let line = next_line(&mut lines).await;
        assert_eq!(line.path(), "foo.log", "replayed {:?}", line.text());
        seen.push(line.text().to_string());
    }
    assert_eq!(seen, vec!["baz", "qux"]);

    append(&logdir.path().join("foo.log.1"), "late\n");
    let line = next_line(&mut lines).await;
    assert_eq!((line.path(), line.text()), ("foo.log.1", "late"));

    shutdown.cancel();
    handle.stopped().await;
}

#[tokio::test]
pub async fn test_truncate_rereads_from_start() {
    let logdir = tempdir().unwrap();
    let logfile = logdir.path().join("app.log");
    std::fs::write(&logfile, "a much longer first generation line\n").unwrap();

    let (handle, mut lines, shutdown) = start(Config {
        lines: 1,
        ..config(logdir.path())
    })
    .await;
    assert_eq!(
        next_line(&mut lines).await.text(),
        "a much longer first generation line"
    );

    std::fs::write(&logfile, "short\n").unwrap();
    assert_eq!(next_line(&mut lines).await.text(), "short");
    assert_eq!(handle.file_count(), 1);

    shutdown.cancel();
    handle.stopped().await;
}

#[tokio::test]
pub async fn test_deleted_file_is_forgotten() {
    let logdir = tempdir().unwrap();
    let logfile = logdir.path().join("app.log");
    std::fs::write(&logfile, "x\n").unwrap();

    let (handle, _lines, shutdown) = start(Config {
        lines: 0,
        ..config(logdir.path())
    })
    .await;
    assert_eq!(handle.file_count(), 1);

    std::fs::remove_file(&logfile).unwrap();
    assert!(eventually(|| handle.file_count() == 0).await);

    shutdown.cancel();
    handle.stopped().await;
}
