//! Deduplicating work queue keyed by resource identity.
//!
//! - an identity is pending at most once; repeated `enqueue` calls coalesce
//! - a dequeued identity is "processing" until `done`; enqueues that arrive
//!   meanwhile mark it dirty and it is redelivered once after `done`
//! - `requeue_after` schedules delayed redelivery; the earliest deadline wins
//!   and an immediate `enqueue` supersedes a pending delay
//!
//! The state lock is a std `Mutex` and is never held across an `.await`.

use crds::ResourceIdentity;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<ResourceIdentity>,
    pending: HashSet<ResourceIdentity>,
    processing: HashSet<ResourceIdentity>,
    dirty: HashSet<ResourceIdentity>,
    delayed: HashMap<ResourceIdentity, (Instant, u64)>,
    next_token: u64,
    shutting_down: bool,
}

impl QueueState {
    /// Returns true if a waiting worker should be woken.
    fn push(&mut self, identity: ResourceIdentity) -> bool {
        if self.shutting_down {
            return false;
        }
        self.delayed.remove(&identity);
        if self.processing.contains(&identity) {
            self.dirty.insert(identity);
            return false;
        }
        if !self.pending.insert(identity.clone()) {
            return false;
        }
        self.queue.push_back(identity);
        true
    }
}

#[derive(Debug, Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds `identity` unless it is already pending.
    pub fn enqueue(&self, identity: ResourceIdentity) {
        let wake = self.state().push(identity);
        if wake {
            self.notify.notify_one();
        }
    }

    /// Waits for the next identity. Returns `None` once the queue is shut down.
    pub async fn dequeue(&self) -> Option<ResourceIdentity> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent enqueue is not missed
            notified.as_mut().enable();
            {
                let mut state = self.state();
                if state.shutting_down {
                    return None;
                }
                if let Some(identity) = state.queue.pop_front() {
                    state.pending.remove(&identity);
                    state.processing.insert(identity.clone());
                    return Some(identity);
                }
            }
            notified.await;
        }
    }

    /// Marks processing of `identity` complete, redelivering it if it was
    /// enqueued while in flight.
    pub fn done(&self, identity: &ResourceIdentity) {
        let wake = {
            let mut state = self.state();
            state.processing.remove(identity);
            if state.dirty.remove(identity) {
                debug!("Redelivering {} after in-flight update", identity);
                state.push(identity.clone())
            } else {
                false
            }
        };
        if wake {
            self.notify.notify_one();
        }
    }

    /// Schedules `identity` for redelivery after `delay`.
    pub fn requeue_after(self: &Arc<Self>, identity: ResourceIdentity, delay: Duration) {
        let deadline = Instant::now() + delay;
        let token = {
            let mut state = self.state();
            if state.shutting_down {
                return;
            }
            if let Some((existing, _)) = state.delayed.get(&identity) {
                if *existing <= deadline {
                    return;
                }
            }
            state.next_token += 1;
            let token = state.next_token;
            state.delayed.insert(identity.clone(), (deadline, token));
            token
        };

        let queue = Arc::downgrade(self);
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(queue) = queue.upgrade() {
                queue.fire_delayed(identity, token);
            }
        });
    }

    fn fire_delayed(&self, identity: ResourceIdentity, token: u64) {
        let wake = {
            let mut state = self.state();
            match state.delayed.get(&identity) {
                Some((_, current)) if *current == token => state.push(identity),
                // Superseded by an earlier deadline or an immediate enqueue
                _ => false,
            }
        };
        if wake {
            self.notify.notify_one();
        }
    }

    /// Stops the queue: waiters get `None`, pending and delayed items are dropped.
    pub fn shutdown(&self) {
        {
            let mut state = self.state();
            state.shutting_down = true;
            state.queue.clear();
            state.pending.clear();
            state.dirty.clear();
            state.delayed.clear();
        }
        self.notify.notify_waiters();
    }

    /// Number of identities waiting to be dequeued
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_processing(&self, identity: &ResourceIdentity) -> bool {
        self.state().processing.contains(identity)
    }

    /// True if `identity` will be redelivered once its current pass is done
    pub fn is_dirty(&self, identity: &ResourceIdentity) -> bool {
        self.state().dirty.contains(identity)
    }

    /// Number of identities waiting on a delay
    pub fn delayed_len(&self) -> usize {
        self.state().delayed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> ResourceIdentity {
        ResourceIdentity::new("default", name)
    }

    #[tokio::test]
    async fn test_enqueue_coalesces_pending_identity() {
        let queue = WorkQueue::new();
        queue.enqueue(id("a"));
        queue.enqueue(id("a"));
        queue.enqueue(id("b"));

        assert_eq!(queue.len(), 2);
        assert_eq!(queue.dequeue().await, Some(id("a")));
        assert_eq!(queue.dequeue().await, Some(id("b")));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_in_flight_identity_is_not_handed_out_twice() {
        let queue = WorkQueue::new();
        queue.enqueue(id("a"));
        assert_eq!(queue.dequeue().await, Some(id("a")));
        assert!(queue.is_processing(&id("a")));

        // Burst of updates while processing collapses into one redelivery
        queue.enqueue(id("a"));
        queue.enqueue(id("a"));
        assert!(queue.is_empty());
        assert!(queue.is_dirty(&id("a")));

        queue.done(&id("a"));
        assert!(!queue.is_processing(&id("a")));
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.dequeue().await, Some(id("a")));
        queue.done(&id("a"));
        assert!(queue.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_workers_never_overlap_on_one_identity() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let queue = Arc::new(WorkQueue::new());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));
        let passes = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let (queue, in_flight, max_in_flight, passes) =
                    (queue.clone(), in_flight.clone(), max_in_flight.clone(), passes.clone());
                tokio::spawn(async move {
                    while let Some(identity) = queue.dequeue().await {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_in_flight.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(1)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        passes.fetch_add(1, Ordering::SeqCst);
                        queue.done(&identity);
                    }
                })
            })
            .collect();

        for _ in 0..200 {
            queue.enqueue(id("a"));
            tokio::task::yield_now().await;
        }
        assert!(
            crate::test_utils::wait_for(Duration::from_secs(5), || {
                !queue.is_processing(&id("a")) && queue.is_empty()
            })
            .await
        );

        queue.shutdown();
        for worker in workers {
            worker.await.unwrap();
        }
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        assert!(passes.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_done_without_update_does_not_redeliver() {
        let queue = WorkQueue::new();
        queue.enqueue(id("a"));
        queue.dequeue().await;
        queue.done(&id("a"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_dequeue_waits_for_enqueue() {
        let queue = Arc::new(WorkQueue::new());
        let worker = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!worker.is_finished());

        queue.enqueue(id("a"));
        assert_eq!(worker.await.unwrap(), Some(id("a")));
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiters_and_drops_pending() {
        let queue = Arc::new(WorkQueue::new());
        let workers: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.dequeue().await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(20)).await;

        queue.shutdown();
        for worker in workers {
            assert_eq!(worker.await.unwrap(), None);
        }

        queue.enqueue(id("a"));
        assert!(queue.is_empty());
        assert_eq!(queue.dequeue().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_requeue_after_redelivers_after_delay() {
        let queue = Arc::new(WorkQueue::new());
        queue.requeue_after(id("a"), Duration::from_secs(5));
        assert_eq!(queue.delayed_len(), 1);

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.delayed_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_earliest_requeue_deadline_wins() {
        let queue = Arc::new(WorkQueue::new());
        queue.requeue_after(id("a"), Duration::from_secs(10));
        queue.requeue_after(id("a"), Duration::from_secs(2));
        queue.requeue_after(id("a"), Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(queue.dequeue().await, Some(id("a")));
        queue.done(&id("a"));

        // The superseded timers must not fire again
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_immediate_enqueue_supersedes_delay() {
        let queue = Arc::new(WorkQueue::new());
        queue.requeue_after(id("a"), Duration::from_secs(5));
        queue.enqueue(id("a"));
        assert_eq!(queue.delayed_len(), 0);

        assert_eq!(queue.dequeue().await, Some(id("a")));
        queue.done(&id("a"));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(queue.is_empty());
    }
}
