use super::EventLoop;
use crate::base::neterror::NetError;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A fixed set of event loops with round-robin assignment.
///
/// Clones share the same loops. The loops are stopped and joined when the
/// last clone is dropped.
#[derive(Clone)]
pub struct EventLoopGroup {
    inner: Arc<GroupInner>,
}

struct GroupInner {
    loops: Vec<EventLoop>,
    next: AtomicUsize,
}

impl EventLoopGroup {
    /// Starts `count` loops. Zero means one loop per available CPU.
    pub fn new(count: usize) -> Result<Self, NetError> {
        let count = if count == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            count
        };

        let mut loops = Vec::with_capacity(count);
        for index in 0..count {
            match EventLoop::start(index) {
                Ok(event_loop) => loops.push(event_loop),
                Err(e) => {
                    for started in &loops {
                        started.stop();
                        started.join();
                    }
                    return Err(e);
                }
            }
        }

        tracing::debug!(count, "event loop group started");
        Ok(Self {
            inner: Arc::new(GroupInner {
                loops,
                next: AtomicUsize::new(0),
            }),
        })
    }

    pub fn get_loop_count(&self) -> usize {
        self.inner.loops.len()
    }

    pub fn get_loop_at(&self, index: usize) -> Option<&EventLoop> {
        self.inner.loops.get(index)
    }

    /// Next loop in round-robin order.
    pub fn get_next_loop(&self) -> &EventLoop {
        let index = self.inner.next.fetch_add(1, Ordering::Relaxed) % self.inner.loops.len();
        &self.inner.loops[index]
    }

    pub fn loops(&self) -> impl Iterator<Item = &EventLoop> {
        self.inner.loops.iter()
    }
}

impl Drop for GroupInner {
    fn drop(&mut self) {
        for event_loop in &self.loops {
            event_loop.stop();
        }
        for event_loop in &self.loops {
            event_loop.join();
        }
        tracing::debug!(count = self.loops.len(), "event loop group stopped");
    }
}

impl fmt::Debug for EventLoopGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoopGroup")
            .field("loop_count", &self.inner.loops.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_round_robin_visits_every_loop() {
        let group = EventLoopGroup::new(3).unwrap();
        assert_eq!(group.get_loop_count(), 3);

        let seen: HashSet<usize> = (0..3).map(|_| group.get_next_loop().index()).collect();
        assert_eq!(seen.len(), 3);

        // Wraps around
        let fourth = group.get_next_loop();
        assert!(fourth.ptr_eq(group.get_loop_at(0).unwrap()));
    }

    #[test]
    fn test_get_loop_at_out_of_range() {
        let group = EventLoopGroup::new(1).unwrap();
        assert!(group.get_loop_at(1).is_none());
    }

    #[test]
    fn test_drop_stops_loops() {
        let group = EventLoopGroup::new(2).unwrap();
        let held = group.get_loop_at(1).unwrap().clone();
        drop(group);
        assert!(held.is_stopped());
        assert_eq!(held.schedule_task_now(|| {}), Err(NetError::EventLoopShutdown));
    }
}
