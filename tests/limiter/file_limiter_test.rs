//! Marker-file rate limiter against a real directory.

use std::fs;
use std::time::{Duration, SystemTime};

use filetime::FileTime;

use faultline::limiter::{FileRateLimiter, LimiterError, RateLimiter};

use crate::doubles::{marker_count, seed_markers};

#[test]
fn creates_missing_directory_and_first_marker() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let dir = tmp.path().join("state").join(".ratelimiter");
    let limiter = FileRateLimiter::new(&dir);

    assert_eq!(limiter.active_markers().expect("count"), 0);
    assert!(limiter.try_acquire());
    assert!(dir.is_dir());
    assert_eq!(marker_count(&dir), 1);
    assert_eq!(limiter.active_markers().expect("count"), 1);
}

#[test]
fn acquires_below_the_ceiling() {
    let tmp = tempfile::tempdir().expect("temp dir");
    seed_markers(tmp.path(), 24);

    let limiter = FileRateLimiter::new(tmp.path());
    limiter.acquire().expect("24 markers leave one slot");
    assert_eq!(marker_count(tmp.path()), 25);
}

#[test]
fn refuses_at_the_ceiling_without_adding_a_marker() {
    let tmp = tempfile::tempdir().expect("temp dir");
    seed_markers(tmp.path(), 25);

    let limiter = FileRateLimiter::new(tmp.path());
    let err = limiter.acquire().expect_err("ceiling reached");
    assert!(matches!(
        err,
        LimiterError::Exhausted {
            max: 25,
            window_hours: 24
        }
    ));
    assert!(!limiter.try_acquire());
    assert_eq!(marker_count(tmp.path()), 25);
}

#[test]
fn expired_marker_is_pruned_and_frees_a_slot() {
    let tmp = tempfile::tempdir().expect("temp dir");
    seed_markers(tmp.path(), 25);

    let stale = tmp.path().join("seed-0.alert");
    let day_and_an_hour_ago = SystemTime::now()
        .checked_sub(Duration::from_secs(90_000))
        .expect("time in range");
    filetime::set_file_mtime(&stale, FileTime::from_system_time(day_and_an_hour_ago))
        .expect("backdate marker");
    assert_eq!(
        FileRateLimiter::new(tmp.path())
            .active_markers()
            .expect("count"),
        24
    );

    assert!(FileRateLimiter::new(tmp.path()).try_acquire());
    assert!(!stale.exists());
    assert_eq!(marker_count(tmp.path()), 25);
}

#[test]
fn recent_markers_are_kept() {
    let tmp = tempfile::tempdir().expect("temp dir");
    seed_markers(tmp.path(), 1);

    let marker = tmp.path().join("seed-0.alert");
    let an_hour_ago = SystemTime::now()
        .checked_sub(Duration::from_secs(3600))
        .expect("time in range");
    filetime::set_file_mtime(&marker, FileTime::from_system_time(an_hour_ago))
        .expect("backdate marker");

    assert!(FileRateLimiter::new(tmp.path()).try_acquire());
    assert!(marker.exists());
}

#[test]
fn unrelated_files_do_not_count() {
    let tmp = tempfile::tempdir().expect("temp dir");
    for index in 0..30 {
        fs::write(tmp.path().join(format!("note-{index}.txt")), b"").expect("write file");
    }

    let limiter = FileRateLimiter::new(tmp.path());
    assert!(limiter.try_acquire());
    assert_eq!(marker_count(tmp.path()), 1);
    assert!(tmp.path().join("note-0.txt").exists());
}

#[test]
fn custom_ceiling_and_window() {
    let tmp = tempfile::tempdir().expect("temp dir");
    seed_markers(tmp.path(), 2);

    let limiter = FileRateLimiter::new(tmp.path())
        .with_max_alerts(2)
        .with_window(Duration::from_secs(3600));
    match limiter.acquire() {
        Err(LimiterError::Exhausted { max, window_hours }) => {
            assert_eq!(max, 2);
            assert_eq!(window_hours, 1);
        }
        other => panic!("expected exhaustion, got {other:?}"),
    }
}

#[test]
fn unusable_directory_refuses() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let not_a_dir = tmp.path().join("occupied");
    fs::write(&not_a_dir, b"plain file").expect("write file");

    let limiter = FileRateLimiter::new(&not_a_dir);
    let err = limiter.acquire().expect_err("directory cannot be created");
    assert!(matches!(err, LimiterError::Unavailable { .. }));
    assert!(!limiter.try_acquire());
}

#[test]
fn limiter_is_usable_as_trait_object() {
    let tmp = tempfile::tempdir().expect("temp dir");
    let limiter: std::sync::Arc<dyn RateLimiter> =
        std::sync::Arc::new(FileRateLimiter::new(tmp.path()));
    assert!(limiter.try_acquire());
}

#[test]
fn expired_marker_that_cannot_be_removed_refuses() {
    let tmp = tempfile::tempdir().expect("temp dir");
    // remove_file cannot delete a directory, whoever runs the test.
    let stuck = tmp.path().join("stale.alert");
    fs::create_dir(&stuck).expect("create stuck marker");
    let two_days_ago = SystemTime::now()
        .checked_sub(Duration::from_secs(172_800))
        .expect("time in range");
    filetime::set_file_mtime(&stuck, FileTime::from_system_time(two_days_ago))
        .expect("backdate marker");

    let limiter = FileRateLimiter::new(tmp.path());
    match limiter.acquire() {
        Err(LimiterError::Prune { path, .. }) => assert_eq!(path, stuck),
        other => panic!("expected prune failure, got {other:?}"),
    }
    assert!(!limiter.try_acquire());
    assert!(stuck.is_dir());
    assert_eq!(marker_count(tmp.path()), 1);
}
