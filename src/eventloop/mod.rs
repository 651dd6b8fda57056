//! Event loops.
//!
//! An [`EventLoop`] is one OS thread driving a current-thread tokio runtime.
//! Every socket, channel and callback belongs to exactly one loop and runs
//! on that loop's thread. An [`EventLoopGroup`] owns a fixed set of loops and
//! hands them out round-robin.

mod group;

pub use group::EventLoopGroup;

use crate::base::lock;
use crate::base::neterror::NetError;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{JoinHandle, ThreadId};
use tokio::runtime::{Builder, EnterGuard, Handle};
use tokio::sync::Notify;

/// Handle to a single event-loop thread. Cheap to clone.
#[derive(Clone)]
pub struct EventLoop {
    inner: Arc<LoopInner>,
}

struct LoopInner {
    index: usize,
    handle: Handle,
    thread_id: ThreadId,
    stopped: AtomicBool,
    stop: Arc<Notify>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl EventLoop {
    pub(crate) fn start(index: usize) -> Result<Self, NetError> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                tracing::error!(error = %e, "failed to build event loop runtime");
                NetError::SysCallFailure
            })?;
        let handle = runtime.handle().clone();
        let stop = Arc::new(Notify::new());
        let thread_stop = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name(format!("channelnet-loop-{index}"))
            .spawn(move || {
                runtime.block_on(thread_stop.notified());
                tracing::trace!(index, "event loop exiting");
                drop(runtime);
            })
            .map_err(|e| {
                tracing::error!(error = %e, "failed to spawn event loop thread");
                NetError::SysCallFailure
            })?;

        Ok(Self {
            inner: Arc::new(LoopInner {
                index,
                handle,
                thread_id: thread.thread().id(),
                stopped: AtomicBool::new(false),
                stop,
                thread: Mutex::new(Some(thread)),
            }),
        })
    }

    /// Position of this loop in its group.
    pub fn index(&self) -> usize {
        self.inner.index
    }

    /// Runs `task` on the loop thread as soon as possible.
    pub fn schedule_task_now<F>(&self, task: F) -> Result<(), NetError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn(async move { task() })
    }

    /// Spawns a future onto the loop.
    pub fn spawn<F>(&self, future: F) -> Result<(), NetError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_stopped() {
            return Err(NetError::EventLoopShutdown);
        }
        self.inner.handle.spawn(future);
        if self.is_stopped() {
            // Stopped after the check: the runtime may drop the task unpolled.
            tracing::warn!(index = self.inner.index, "task spawned onto a stopping event loop");
        }
        Ok(())
    }

    /// Enters the loop's runtime context on the current thread.
    ///
    /// Needed to register std sockets with the loop's reactor.
    pub fn enter(&self) -> EnterGuard<'_> {
        self.inner.handle.enter()
    }

    /// True when called from this loop's own thread.
    pub fn is_on_callers_thread(&self) -> bool {
        std::thread::current().id() == self.inner.thread_id
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::Acquire)
    }

    pub fn ptr_eq(&self, other: &EventLoop) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stops the loop. Tasks still queued are dropped without running.
    pub(crate) fn stop(&self) {
        if !self.inner.stopped.swap(true, Ordering::AcqRel) {
            self.inner.stop.notify_one();
        }
    }

    /// Waits for the loop thread to exit. A no-op on the loop's own thread.
    pub(crate) fn join(&self) {
        if self.is_on_callers_thread() {
            return;
        }
        let thread = lock(&self.inner.thread).take();
        if let Some(thread) = thread {
            if thread.join().is_err() {
                tracing::error!(index = self.inner.index, "event loop thread panicked");
            }
        }
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("index", &self.inner.index)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_schedule_runs_on_loop_thread() {
        let event_loop = EventLoop::start(0).unwrap();
        let (tx, rx) = mpsc::channel();
        let on_loop = event_loop.clone();
        event_loop
            .schedule_task_now(move || {
                tx.send(on_loop.is_on_callers_thread()).unwrap();
            })
            .unwrap();

        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert!(!event_loop.is_on_callers_thread());

        event_loop.stop();
        event_loop.join();
    }

    #[test]
    fn test_schedule_after_stop_fails() {
        let event_loop = EventLoop::start(0).unwrap();
        event_loop.stop();
        event_loop.join();

        assert_eq!(
            event_loop.schedule_task_now(|| {}),
            Err(NetError::EventLoopShutdown)
        );
    }

    #[test]
    fn test_spawned_future_has_timers() {
        let event_loop = EventLoop::start(3).unwrap();
        let (tx, rx) = mpsc::channel();
        event_loop
            .spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                tx.send(()).unwrap();
            })
            .unwrap();

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(event_loop.index(), 3);
        event_loop.stop();
        event_loop.join();
    }
}
