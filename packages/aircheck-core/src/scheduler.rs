//! Deferred-work timer service.
//!
//! A delta list keyed by caller-chosen ids. Arming a known id replaces its
//! fire time; cancellation is O(1) best-effort. Due entries are delivered
//! over an mpsc channel to the single consumer — a fire that races a
//! cancellation is absorbed by the consumer's own idempotence (the DJ
//! pipeline ignores triggers for jobs already in a terminal state).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Tick resolution of the delta list.
const TICK_INTERVAL: Duration = Duration::from_millis(250);

struct Entry<T> {
    fire_at: Instant,
    value: T,
}

/// Timer service delivering `(id, value)` pairs when entries come due.
pub struct Scheduler<T> {
    entries: Mutex<HashMap<String, Entry<T>>>,
    fire_tx: mpsc::Sender<(String, T)>,
}

impl<T: Send + 'static> Scheduler<T> {
    /// Creates the scheduler and the receiving end of its fire channel.
    pub fn new(fire_capacity: usize) -> (Arc<Self>, mpsc::Receiver<(String, T)>) {
        let (fire_tx, fire_rx) = mpsc::channel(fire_capacity);
        (
            Arc::new(Self {
                entries: Mutex::new(HashMap::new()),
                fire_tx,
            }),
            fire_rx,
        )
    }

    /// Arms `id` to fire after `delay`. Re-arming a known id replaces its
    /// fire time and payload.
    pub fn arm_after(&self, id: impl Into<String>, delay: Duration, value: T) {
        let id = id.into();
        let fire_at = Instant::now() + delay;
        let replaced = self
            .entries
            .lock()
            .insert(id.clone(), Entry { fire_at, value })
            .is_some();
        log::debug!(
            "[Scheduler] Armed '{}' for {:?} (replaced: {})",
            id,
            delay,
            replaced
        );
    }

    /// Cancels a pending entry. Returns whether one existed.
    pub fn cancel(&self, id: &str) -> bool {
        let removed = self.entries.lock().remove(id).is_some();
        if removed {
            log::debug!("[Scheduler] Cancelled '{}'", id);
        }
        removed
    }

    /// Whether an entry is currently armed.
    pub fn is_armed(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    /// Dispatches every due entry to the fire channel.
    ///
    /// Delivery never blocks; if the consumer's queue is full the trigger is
    /// dropped (the consumer re-derives missed work from the store).
    pub fn run_tick(&self) {
        let now = Instant::now();
        let due: Vec<(String, T)> = {
            let mut entries = self.entries.lock();
            let ids: Vec<String> = entries
                .iter()
                .filter(|(_, e)| e.fire_at <= now)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|e| (id, e.value)))
                .collect()
        };

        for (id, value) in due {
            if let Err(e) = self.fire_tx.try_send((id, value)) {
                log::warn!("[Scheduler] Dropped fire (consumer backlogged): {}", e);
            }
        }
    }

    /// Runs the tick loop until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval(TICK_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.run_tick(),
            }
        }
        log::debug!("[Scheduler] Stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn due_entries_fire_once() {
        let (scheduler, mut rx) = Scheduler::new(8);
        scheduler.arm_after("job-1", Duration::from_millis(100), 7_u32);

        scheduler.run_tick();
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(150)).await;
        scheduler.run_tick();
        assert_eq!(rx.try_recv().unwrap(), ("job-1".to_string(), 7));

        // A fired entry is gone.
        scheduler.run_tick();
        assert!(rx.try_recv().is_err());
        assert!(!scheduler.is_armed("job-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_the_fire_time() {
        let (scheduler, mut rx) = Scheduler::new(8);
        scheduler.arm_after("job-1", Duration::from_millis(100), 1_u32);
        scheduler.arm_after("job-1", Duration::from_secs(60), 2_u32);

        tokio::time::advance(Duration::from_millis(500)).await;
        scheduler.run_tick();
        assert!(rx.try_recv().is_err(), "old fire time must be replaced");

        tokio::time::advance(Duration::from_secs(60)).await;
        scheduler.run_tick();
        assert_eq!(rx.try_recv().unwrap().1, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_suppresses_delivery() {
        let (scheduler, mut rx) = Scheduler::new(8);
        scheduler.arm_after("job-1", Duration::from_millis(100), 1_u32);

        assert!(scheduler.cancel("job-1"));
        assert!(!scheduler.cancel("job-1"));

        tokio::time::advance(Duration::from_secs(1)).await;
        scheduler.run_tick();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn independent_ids_fire_independently() {
        let (scheduler, mut rx) = Scheduler::new(8);
        scheduler.arm_after("a", Duration::from_millis(100), 1_u32);
        scheduler.arm_after("b", Duration::from_secs(10), 2_u32);

        tokio::time::advance(Duration::from_millis(200)).await;
        scheduler.run_tick();
        assert_eq!(rx.try_recv().unwrap().0, "a");
        assert!(rx.try_recv().is_err());
        assert!(scheduler.is_armed("b"));
    }
}
