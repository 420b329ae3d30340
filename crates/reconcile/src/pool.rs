//! Bounded worker pool.
//!
//! Workers pull items off a shared index and send results back over a
//! channel. The caller's thread drains the channel, so `on_result` runs on a
//! single thread and can own mutable state (the record store) without locks.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

/// Cooperative cancellation flag shared with workers and the signal handler.
pub type CancelToken = Arc<AtomicBool>;

pub fn cancel_token() -> CancelToken {
    Arc::new(AtomicBool::new(false))
}

/// Run `work` over `items` with at most `workers` threads.
///
/// Results arrive at `on_result` in completion order. Once `cancel` is set,
/// no new items are started; items already in flight still report. Returns
/// the number of items that were processed.
pub fn run_bounded<T, R, W, F>(items: &[T], workers: usize, cancel: &CancelToken, work: W, mut on_result: F) -> usize
where
    T: Sync,
    R: Send,
    W: Fn(&T) -> R + Sync,
    F: FnMut(&T, R),
{
    if items.is_empty() {
        return 0;
    }
    let workers = workers.clamp(1, items.len());
    let next = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel::<(usize, R)>();

    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let next = &next;
            let work = &work;
            scope.spawn(move || loop {
                if cancel.load(Ordering::Relaxed) {
                    break;
                }
                let idx = next.fetch_add(1, Ordering::Relaxed);
                let Some(item) = items.get(idx) else {
                    break;
                };
                if tx.send((idx, work(item))).is_err() {
                    break;
                }
            });
        }
        drop(tx);

        let mut done = 0;
        for (idx, result) in rx {
            on_result(&items[idx], result);
            done += 1;
        }
        done
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_every_item_processed_once() {
        let items: Vec<u32> = (1..=50).collect();
        let mut seen = BTreeSet::new();
        let done = run_bounded(&items, 4, &cancel_token(), |n| n * 2, |item, doubled| {
            assert_eq!(*item * 2, doubled);
            assert!(seen.insert(*item));
        });
        assert_eq!(done, 50);
        assert_eq!(seen.len(), 50);
    }

    #[test]
    fn test_concurrency_is_bounded() {
        let items: Vec<u32> = (0..40).collect();
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        run_bounded(
            &items,
            3,
            &cancel_token(),
            |_| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                thread::sleep(std::time::Duration::from_millis(2));
                active.fetch_sub(1, Ordering::SeqCst);
            },
            |_, _| {},
        );
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn test_cancel_stops_new_work() {
        let items: Vec<u32> = (0..100).collect();
        let cancel = cancel_token();
        let done = run_bounded(
            &items,
            1,
            &cancel,
            |n| {
                if *n == 9 {
                    cancel.store(true, Ordering::SeqCst);
                }
                *n
            },
            |_, _| {},
        );
        assert_eq!(done, 10);
    }

    #[test]
    fn test_empty_input() {
        let items: Vec<u32> = Vec::new();
        assert_eq!(run_bounded(&items, 8, &cancel_token(), |n| *n, |_, _| {}), 0);
    }
}
