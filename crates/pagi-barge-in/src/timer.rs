//! Watchdog and debounce timers for pending candidates.
//!
//! Every armed timer is a small tokio task that sleeps and then reports on a
//! channel; the event loop feeds that report back to the arbiter. At most one
//! timer is armed per candidate. Handles carry a generation so a report from
//! a timer that was cancelled or replaced is recognised and dropped.

use crate::candidate::CandidateId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// What an armed timer is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerPurpose {
    /// VAD fired, no transcript yet.
    Watchdog,
    /// A partial transcript arrived; waiting for the utterance to settle.
    Debounce,
}

/// Identifies one arming of a timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    pub candidate_id: CandidateId,
    pub purpose: TimerPurpose,
    generation: u64,
}

/// Reported when an armed timer runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub handle: TimerHandle,
}

struct ArmedTimer {
    handle: TimerHandle,
    task: JoinHandle<()>,
}

/// Schedules per-candidate timeouts on the tokio timer.
pub struct PendingCandidateTimer {
    fired_tx: mpsc::UnboundedSender<TimerFired>,
    armed: HashMap<CandidateId, ArmedTimer>,
    next_generation: u64,
}

impl PendingCandidateTimer {
    /// Create a timer and the receiver its expiries are reported on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerFired>) {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        let timer = Self {
            fired_tx,
            armed: HashMap::new(),
            next_generation: 0,
        };
        (timer, fired_rx)
    }

    /// Arm a timer for `candidate_id`, replacing any timer already armed for it.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm(&mut self, candidate_id: CandidateId, purpose: TimerPurpose, timeout: Duration) -> TimerHandle {
        self.cancel_candidate(candidate_id);

        self.next_generation += 1;
        let handle = TimerHandle {
            candidate_id,
            purpose,
            generation: self.next_generation,
        };
        let tx = self.fired_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            // Receiver gone means the session ended.
            let _ = tx.send(TimerFired { handle });
        });
        debug!("armed {:?} for candidate {} ({:?})", purpose, candidate_id, timeout);

        self.armed.insert(candidate_id, ArmedTimer { handle, task });
        handle
    }

    /// Cancel the timer behind `handle`. No-op if it was already replaced.
    pub fn cancel(&mut self, handle: TimerHandle) {
        if self.is_current(handle) {
            self.cancel_candidate(handle.candidate_id);
        }
    }

    /// Cancel and re-arm for the same candidate.
    pub fn restart(&mut self, handle: TimerHandle, purpose: TimerPurpose, timeout: Duration) -> TimerHandle {
        self.cancel(handle);
        self.arm(handle.candidate_id, purpose, timeout)
    }

    /// Cancel whatever is armed for `candidate_id`.
    pub fn cancel_candidate(&mut self, candidate_id: CandidateId) {
        if let Some(armed) = self.armed.remove(&candidate_id) {
            armed.task.abort();
            debug!("cancelled {:?} for candidate {}", armed.handle.purpose, candidate_id);
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, armed) in self.armed.drain() {
            armed.task.abort();
        }
    }

    /// True if `handle` is the live arming for its candidate.
    pub fn is_current(&self, handle: TimerHandle) -> bool {
        self.armed
            .get(&handle.candidate_id)
            .is_some_and(|armed| armed.handle == handle)
    }

    /// Accept an expiry report. Returns false for stale handles.
    pub fn acknowledge(&mut self, fired: TimerFired) -> bool {
        if !self.is_current(fired.handle) {
            debug!("dropping stale timer for candidate {}", fired.handle.candidate_id);
            return false;
        }
        self.armed.remove(&fired.handle.candidate_id);
        true
    }

    pub fn is_armed(&self, candidate_id: CandidateId) -> bool {
        self.armed.contains_key(&candidate_id)
    }

    pub fn armed_handle(&self, candidate_id: CandidateId) -> Option<TimerHandle> {
        self.armed.get(&candidate_id).map(|armed| armed.handle)
    }
}

impl Drop for PendingCandidateTimer {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: CandidateId = CandidateId(1);

    #[tokio::test(start_paused = true)]
    async fn fires_after_timeout() {
        let (mut timer, mut rx) = PendingCandidateTimer::new();
        let handle = timer.arm(ID, TimerPurpose::Watchdog, Duration::from_millis(500));

        tokio::time::sleep(Duration::from_millis(499)).await;
        assert!(rx.try_recv().is_err());

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.handle, handle);
        assert!(timer.acknowledge(fired));
        assert!(!timer.is_armed(ID));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_reports() {
        let (mut timer, mut rx) = PendingCandidateTimer::new();
        let handle = timer.arm(ID, TimerPurpose::Watchdog, Duration::from_millis(100));
        timer.cancel(handle);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(rx.try_recv().is_err());
        assert!(!timer.is_armed(ID));
    }

    #[tokio::test(start_paused = true)]
    async fn restart_supersedes_earlier_arming() {
        let (mut timer, mut rx) = PendingCandidateTimer::new();
        let first = timer.arm(ID, TimerPurpose::Watchdog, Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(80)).await;
        let second = timer.restart(first, TimerPurpose::Debounce, Duration::from_millis(100));

        assert!(!timer.is_current(first));
        assert!(timer.is_current(second));
        assert_eq!(timer.armed_handle(ID).map(|h| h.purpose), Some(TimerPurpose::Debounce));

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired.handle, second);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_report_is_dropped() {
        let (mut timer, _rx) = PendingCandidateTimer::new();
        let first = timer.arm(ID, TimerPurpose::Watchdog, Duration::from_millis(100));
        let second = timer.arm(ID, TimerPurpose::Watchdog, Duration::from_millis(100));

        // A report from the first arming that raced its cancellation.
        assert!(!timer.acknowledge(TimerFired { handle: first }));
        assert!(timer.is_current(second));
        // Cancelling the stale handle leaves the live one alone.
        timer.cancel(first);
        assert!(timer.is_armed(ID));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_all_disarms_everything() {
        let (mut timer, mut rx) = PendingCandidateTimer::new();
        timer.arm(CandidateId(1), TimerPurpose::Watchdog, Duration::from_millis(10));
        timer.arm(CandidateId(2), TimerPurpose::Debounce, Duration::from_millis(10));
        timer.cancel_all();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());
    }
}
