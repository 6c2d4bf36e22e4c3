//! Integrity detection for the on-disk log/meta pair.

use common::{ChangeLog, ChangeLogError, Digest, LOG_FILE};

fn path(s: &str) -> common::TreePath {
    s.parse().unwrap()
}

#[tokio::test]
async fn flipped_byte_in_log_fails_load() {
    let dir = tempfile::tempdir().unwrap();

    let mut log = ChangeLog::new(dir.path());
    log.add(path("a.txt"), Digest::of_bytes(b"alpha"), 5);
    log.add(path("b.txt"), Digest::of_bytes(b"beta"), 4);
    log.dump().await.unwrap();

    // flip a single byte of the persisted log
    let log_path = dir.path().join(LOG_FILE);
    let mut bytes = std::fs::read(&log_path).unwrap();
    bytes[10] ^= 0x01;
    std::fs::write(&log_path, &bytes).unwrap();

    let mut reloaded = ChangeLog::new(dir.path());
    let err = reloaded.load().await.unwrap_err();
    assert!(
        matches!(err, ChangeLogError::Integrity { .. }),
        "expected integrity error, got {err}"
    );
}

#[tokio::test]
async fn truncated_log_fails_load() {
    let dir = tempfile::tempdir().unwrap();

    let mut log = ChangeLog::new(dir.path());
    log.add(path("a.txt"), Digest::of_bytes(b"alpha"), 5);
    log.dump().await.unwrap();

    let log_path = dir.path().join(LOG_FILE);
    let bytes = std::fs::read(&log_path).unwrap();
    std::fs::write(&log_path, &bytes[..bytes.len() - 1]).unwrap();

    let mut reloaded = ChangeLog::new(dir.path());
    let err = reloaded.load().await.unwrap_err();
    assert!(matches!(err, ChangeLogError::Integrity { .. }));
}

#[tokio::test]
async fn appended_garbage_fails_load() {
    let dir = tempfile::tempdir().unwrap();

    let mut log = ChangeLog::new(dir.path());
    log.add(path("a.txt"), Digest::of_bytes(b"alpha"), 5);
    log.dump().await.unwrap();

    // a foreign writer appended to the log without updating the meta record
    let log_path = dir.path().join(LOG_FILE);
    let mut bytes = std::fs::read(&log_path).unwrap();
    bytes.extend_from_slice(b"{\"op\":\"remove\",\"path\":\"a.txt\"}\n");
    std::fs::write(&log_path, &bytes).unwrap();

    let mut reloaded = ChangeLog::new(dir.path());
    let err = reloaded.load().await.unwrap_err();
    assert!(matches!(err, ChangeLogError::Integrity { .. }));
}

#[tokio::test]
async fn intact_pair_survives_many_dump_cycles() {
    let dir = tempfile::tempdir().unwrap();

    let mut log = ChangeLog::new(dir.path());
    let mut last_revision = log.create().await.unwrap();
    let mut last_size = 0u64;

    for round in 0u32..5 {
        let name = format!("file-{round}.txt");
        let content = name.as_bytes();
        log.add(path(&name), Digest::of_bytes(content), content.len() as u64);
        let revision = log.dump().await.unwrap();
        let size = std::fs::metadata(dir.path().join(LOG_FILE)).unwrap().len();

        // growth-only: revision and log size never decrease
        assert!(revision > last_revision);
        assert!(size > last_size);
        last_revision = revision;
        last_size = size;

        let mut reloaded = ChangeLog::new(dir.path());
        reloaded.load().await.unwrap();
        assert_eq!(reloaded.entries(), log.entries());
        assert_eq!(reloaded.tracked_count(), (round + 1) as usize);
    }
}
