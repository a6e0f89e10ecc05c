//! Bounded worker pool: plain fan-out/fan-in over scoped threads.
//!
//! The pool size is the only backpressure mechanism — workers pull the next
//! job index from a shared atomic cursor, so excess jobs wait for a free
//! worker rather than queueing unboundedly. On the first failure a stop flag
//! is raised: in-flight siblings run to completion, nothing further is
//! dispatched.

use crate::ForgeError;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;

/// Host-derived default pool size.
pub fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Runs `run` over every item on at most `jobs` worker threads.
///
/// Returns one `(index, outcome)` per dispatched item, sorted by index.
/// Items never dispatched (because an earlier failure raised the stop flag)
/// have no entry. Blocks until every dispatched job has finished — callers
/// rely on this as the layer barrier.
pub fn run_jobs<T, R, F>(items: &[T], jobs: usize, run: F) -> Vec<(usize, Result<R, ForgeError>)>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Result<R, ForgeError> + Sync,
{
    if items.is_empty() {
        return Vec::new();
    }
    let workers = jobs.clamp(1, items.len());

    let cursor = AtomicUsize::new(0);
    let stop = AtomicBool::new(false);
    let (tx, rx) = mpsc::channel();

    let cursor_ref = &cursor;
    let stop_ref = &stop;
    let run_ref = &run;

    std::thread::scope(|s| {
        for _ in 0..workers {
            let tx = tx.clone();
            s.spawn(move || loop {
                if stop_ref.load(Ordering::SeqCst) {
                    break;
                }
                let i = cursor_ref.fetch_add(1, Ordering::SeqCst);
                if i >= items.len() {
                    break;
                }
                let outcome = run_ref(&items[i]);
                if outcome.is_err() {
                    stop_ref.store(true, Ordering::SeqCst);
                }
                if tx.send((i, outcome)).is_err() {
                    break;
                }
            });
        }
        // Close the channel once all workers finish.
        drop(tx);

        let mut results: Vec<(usize, Result<R, ForgeError>)> = rx.iter().collect();
        results.sort_by_key(|(i, _)| *i);
        results
    })
}
