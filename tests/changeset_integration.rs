//! Integration tests for change-set aggregation over a live watcher.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use treewatch::{ChangeSetListener, DirectoryWatcher, Result};

fn start(watcher: &Arc<DirectoryWatcher>) -> JoinHandle<Result<()>> {
    let watcher = Arc::clone(watcher);
    std::thread::spawn(move || watcher.watch())
}

fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    condition()
}

#[test]
fn change_sets_accumulate_and_normalize_per_root() {
    let tmp = TempDir::new().unwrap();
    let listener = ChangeSetListener::new();
    let watcher = Arc::new(
        DirectoryWatcher::builder()
            .path(tmp.path())
            .listener(listener.clone())
            .build()
            .unwrap(),
    );
    let handle = start(&watcher);

    let file = tmp.path().join("f.txt");
    fs::write(&file, "v1").unwrap();

    let root = tmp.path().to_path_buf();
    assert!(wait_until(
        || {
            let sets = listener.take();
            match sets.get(&root) {
                Some(set) => {
                    // Create (plus any same-burst modify) stays in created.
                    let created: Vec<&Path> =
                        set.created().iter().map(|e| e.path()).collect();
                    created.contains(&file.as_path())
                }
                None => false,
            }
        },
        Duration::from_secs(10)
    ));

    // Consumption reset the accumulator; a delete now lands alone.
    fs::remove_file(&file).unwrap();
    assert!(wait_until(
        || {
            let sets = listener.take();
            match sets.get(&root) {
                Some(set) => set
                    .deleted()
                    .iter()
                    .any(|e| e.path() == file.as_path()),
                None => false,
            }
        },
        Duration::from_secs(10)
    ));

    watcher.close();
    handle.join().unwrap().unwrap();
}

#[test]
fn create_then_delete_within_one_window_cancels_out() {
    let tmp = TempDir::new().unwrap();
    let listener = ChangeSetListener::new();
    let watcher = Arc::new(
        DirectoryWatcher::builder()
            .path(tmp.path())
            .listener(listener.clone())
            .build()
            .unwrap(),
    );
    let handle = start(&watcher);

    let file = tmp.path().join("transient.txt");
    fs::write(&file, "blink").unwrap();

    // Wait for the create to be folded in before deleting.
    let root = tmp.path().to_path_buf();
    std::thread::sleep(Duration::from_millis(500));
    fs::remove_file(&file).unwrap();
    std::thread::sleep(Duration::from_millis(500));

    let sets = listener.take();
    if let Some(set) = sets.get(&root) {
        assert!(
            !set.created().iter().any(|e| e.path() == file.as_path()),
            "created then deleted before consumption must vanish"
        );
        assert!(
            !set.modified().iter().any(|e| e.path() == file.as_path()),
            "a transient file is not a modification"
        );
    }

    watcher.close();
    handle.join().unwrap().unwrap();
}

#[test]
fn idle_timeout_flushes_after_a_burst() {
    let tmp = TempDir::new().unwrap();
    let flushes = Arc::new(AtomicUsize::new(0));
    let flushes_clone = Arc::clone(&flushes);
    let listener = ChangeSetListener::with_idle_timeout(Duration::from_millis(100), move |_| {
        flushes_clone.fetch_add(1, Ordering::SeqCst);
    });
    let watcher = Arc::new(
        DirectoryWatcher::builder()
            .path(tmp.path())
            .listener(listener.clone())
            .build()
            .unwrap(),
    );
    let handle = start(&watcher);

    fs::write(tmp.path().join("burst.txt"), "x").unwrap();

    assert!(
        wait_until(
            || flushes.load(Ordering::SeqCst) >= 1,
            Duration::from_secs(10)
        ),
        "the idle timer fires once the watcher goes quiet"
    );

    watcher.close();
    handle.join().unwrap().unwrap();
}
