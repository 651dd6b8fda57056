//! Per-thread cleanup barrier.
//!
//! Releasing a bootstrap flushes thread-local TLS state on every loop of
//! its group before the last reference can go. Loops are visited one at a
//! time and the caller blocks until each has run the cleanup.

use crate::base::lock;
use crate::eventloop::{EventLoop, EventLoopGroup};
use std::sync::{Arc, Condvar, Mutex};

#[derive(Default)]
struct Barrier {
    done: Mutex<bool>,
    signal: Condvar,
}

impl Barrier {
    fn wait(&self) {
        let mut done = lock(&self.done);
        while !*done {
            done = self
                .signal
                .wait(done)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
    }
}

/// Signals its barrier when dropped, so a task that never runs (loop
/// stopped with the task queued) still releases the waiter.
struct Release(Arc<Barrier>);

impl Drop for Release {
    fn drop(&mut self) {
        *lock(&self.0.done) = true;
        self.0.signal.notify_all();
    }
}

/// Runs `task` on every loop of `group` in turn, waiting for each.
pub(crate) fn run_on_each_loop<F>(group: &EventLoopGroup, task: F)
where
    F: Fn() + Send + Sync + 'static,
{
    let task = Arc::new(task);
    for event_loop in group.loops() {
        run_on_loop(event_loop, Arc::clone(&task));
    }
}

fn run_on_loop<F>(event_loop: &EventLoop, task: Arc<F>)
where
    F: Fn() + Send + Sync + 'static,
{
    if event_loop.is_on_callers_thread() {
        task();
        return;
    }

    let barrier = Arc::new(Barrier::default());
    let release = Release(Arc::clone(&barrier));
    let scheduled = event_loop.schedule_task_now(move || {
        let _release = release;
        task();
    });

    match scheduled {
        Ok(()) => barrier.wait(),
        Err(e) => {
            tracing::warn!(loop_index = event_loop.index(), error = %e, "skipping thread cleanup on stopped loop");
        }
    }
}

/// Flushes thread-local TLS state on every loop of `group`.
pub fn clean_up_thread_local_state(group: &EventLoopGroup) {
    run_on_each_loop(group, crate::tls::clean_up_thread_local_state);
    tracing::trace!(loops = group.get_loop_count(), "thread-local tls state cleaned up");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_runs_once_per_loop() {
        let group = EventLoopGroup::new(3).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let threads = Arc::new(Mutex::new(Vec::new()));

        let (task_count, task_threads) = (Arc::clone(&count), Arc::clone(&threads));
        run_on_each_loop(&group, move || {
            task_count.fetch_add(1, Ordering::SeqCst);
            lock(&task_threads).push(std::thread::current().id());
        });

        assert_eq!(count.load(Ordering::SeqCst), 3);
        let mut threads = lock(&threads).clone();
        threads.sort_by_key(|id| format!("{id:?}"));
        threads.dedup();
        assert_eq!(threads.len(), 3);
        assert!(!threads.contains(&std::thread::current().id()));
    }

    #[test]
    fn test_runs_inline_on_loop_thread() {
        let group = EventLoopGroup::new(2).unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        let inner_group = group.clone();
        group
            .get_loop_at(0)
            .unwrap()
            .schedule_task_now(move || {
                let count = Arc::new(AtomicUsize::new(0));
                let task_count = Arc::clone(&count);
                run_on_each_loop(&inner_group, move || {
                    task_count.fetch_add(1, Ordering::SeqCst);
                });
                tx.send(count.load(Ordering::SeqCst)).unwrap();
            })
            .unwrap();

        assert_eq!(rx.recv_timeout(std::time::Duration::from_secs(10)).unwrap(), 2);
    }

    #[test]
    fn test_tls_cleanup_barrier() {
        let group = EventLoopGroup::new(2).unwrap();
        clean_up_thread_local_state(&group);
    }
}
