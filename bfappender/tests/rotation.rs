use std::{fs, sync::Arc, sync::atomic::{AtomicUsize, Ordering}, time::Duration};

use bfappender::{AppenderHandle, Options, ScrollBySize, ScrollKeepCount};

fn unique_path(dir: &tempfile::TempDir, name: &str) -> std::path::PathBuf {
    dir.path().join(name)
}

#[test]
fn writes_land_in_the_active_file_immediately_when_unbuffered() {
    let dir = tempfile::tempdir().unwrap();
    let path = unique_path(&dir, "app.log");
    let mut options = Options::default();
    options.flush_over_size = Some(bfappender::FlushOverSize::Unbuffered);
    options.flush_at_least_time = Some(bfappender::FlushAtLeastTime::Immediate);
    let appender = AppenderHandle::open(&path, options);

    appender.write(b"first\n").unwrap();
    appender.write(b"second\n").unwrap();

    let contents = fs::read_to_string(&path).unwrap();
    assert_eq!(contents, "first\nsecond\n");
}

#[test]
fn rolls_to_an_archive_once_the_size_threshold_is_exceeded() {
    let dir = tempfile::tempdir().unwrap();
    let path = unique_path(&dir, "svc.log");
    let mut options = Options::default();
    options.flush_over_size = Some(bfappender::FlushOverSize::Unbuffered);
    options.flush_at_least_time = Some(bfappender::FlushAtLeastTime::Immediate);
    options.scroll_by_size = Some(ScrollBySize::Bytes(16));
    options.record_end_flag = Some(b"\n".to_vec());
    let appender = AppenderHandle::open(&path, options);

    for i in 0..6 {
        appender.write(format!("record-{i}\n").as_bytes()).unwrap();
    }
    appender.flush().unwrap();

    let mut entries: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    entries.sort();
    assert!(entries.len() > 1, "expected at least one rotated archive, got {entries:?}");
    assert!(entries.iter().any(|n| n == "svc.log" || n.starts_with("svc.")));
}

#[test]
fn retention_keeps_only_the_configured_number_of_archives() {
    let dir = tempfile::tempdir().unwrap();
    let path = unique_path(&dir, "ret.log");
    let mut options = Options::default();
    options.flush_over_size = Some(bfappender::FlushOverSize::Unbuffered);
    options.flush_at_least_time = Some(bfappender::FlushAtLeastTime::Immediate);
    options.scroll_by_size = Some(ScrollBySize::Bytes(8));
    options.scroll_keep_count = Some(ScrollKeepCount::Count(2));
    let appender = AppenderHandle::open(&path, options);

    for i in 0..40 {
        appender.write(format!("{i:04}\n").as_bytes()).unwrap();
    }
    appender.flush().unwrap();

    let archive_count = fs::read_dir(dir.path())
        .unwrap()
        .filter(|e| {
            let name = e.as_ref().unwrap().file_name().to_string_lossy().into_owned();
            name != "ret.log"
        })
        .count();
    assert!(archive_count <= 2, "expected at most 2 retained archives, got {archive_count}");
}

#[test]
fn on_scroll_observers_fire_once_per_rotation() {
    let dir = tempfile::tempdir().unwrap();
    let path = unique_path(&dir, "obs.log");
    let mut options = Options::default();
    options.flush_over_size = Some(bfappender::FlushOverSize::Unbuffered);
    options.flush_at_least_time = Some(bfappender::FlushAtLeastTime::Immediate);
    options.scroll_by_size = Some(ScrollBySize::Bytes(8));
    let appender = AppenderHandle::open(&path, options);

    let fired = Arc::new(AtomicUsize::new(0));
    let fired_clone = Arc::clone(&fired);
    let _subscription = appender.on_scroll(move |_archive_path| {
        fired_clone.fetch_add(1, Ordering::SeqCst);
    });

    for i in 0..20 {
        appender.write(format!("{i:04}\n").as_bytes()).unwrap();
    }
    appender.flush().unwrap();

    assert!(fired.load(Ordering::SeqCst) > 0);
}

#[test]
fn multiple_handles_on_the_same_path_share_one_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = unique_path(&dir, "shared.log");
    let mut options = Options::default();
    options.flush_over_size = Some(bfappender::FlushOverSize::Unbuffered);
    options.flush_at_least_time = Some(bfappender::FlushAtLeastTime::Immediate);

    let a = AppenderHandle::open(&path, options.clone());
    let b = AppenderHandle::open(&path, options);

    a.write(b"from-a\n").unwrap();
    b.write(b"from-b\n").unwrap();

    let contents = fs::read_to_string(&path).unwrap();
    assert_eq!(contents, "from-a\nfrom-b\n");
}

#[tokio::test(flavor = "multi_thread")]
async fn background_dispatch_eventually_lands_buffered_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = unique_path(&dir, "bg.log");
    let appender = AppenderHandle::open_default(&path);

    for i in 0..200 {
        appender.write(format!("line-{i}\n").as_bytes()).unwrap();
    }
    appender.flush().unwrap();

    let contents = fs::read_to_string(&path).unwrap();
    assert_eq!(contents.lines().count(), 200);
}

#[test]
fn concurrent_writers_do_not_interleave_partial_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = unique_path(&dir, "concurrent.log");
    let mut options = Options::default();
    options.flush_over_size = Some(bfappender::FlushOverSize::Unbuffered);
    options.flush_at_least_time = Some(bfappender::FlushAtLeastTime::Immediate);
    let appender = Arc::new(AppenderHandle::open(&path, options));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let appender = Arc::clone(&appender);
            std::thread::spawn(move || {
                for i in 0..50 {
                    appender
                        .write(format!("thread-{t}-line-{i}\n").as_bytes())
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    appender.flush().unwrap();

    let contents = fs::read_to_string(&path).unwrap();
    assert_eq!(contents.lines().count(), 400);
    assert!(contents.lines().all(|l| l.starts_with("thread-")));
}

#[test]
fn startup_recovers_a_fresh_appender_for_an_empty_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = unique_path(&dir, "fresh.log");
    let appender = AppenderHandle::open_default(&path);
    assert!(appender.last_error().is_none());
    appender.write(b"hello\n").unwrap();
    appender.flush().unwrap();
    assert_eq!(fs::read_to_string(&path).unwrap(), "hello\n");
}
