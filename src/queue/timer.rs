//! Timer queue - fires envelopes at their scheduled time
//!
//! A single background task sleeps until the head of the queue is due,
//! then hands the envelope to the dispatcher. An idle sentinel keeps the
//! queue non-empty so the task always has a deadline to wait for, like a
//! watchdog that is re-armed whenever nothing else is pending.

use crate::message::MessageEnvelope;
use bert_shared::{monotonic_ms, state_machine::RequestEvent};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, info, trace, warn};

/// State shared between the queue handle and the timer task
struct TimerShared {
    /// Sorted by ascending execution time
    entries: Mutex<VecDeque<MessageEnvelope>>,
    /// Interrupts the timer task's sleep
    wakeup: Notify,
    running: AtomicBool,
    idle_fires: AtomicU64,
}

impl TimerShared {
    /// Insert in execution-time order, after any entries due at the same time.
    /// Returns true when the envelope became the new head.
    async fn insert(&self, envelope: MessageEnvelope) -> bool {
        let mut entries = self.entries.lock().await;
        let position = entries
            .iter()
            .position(|e| e.execution_time_ms() > envelope.execution_time_ms())
            .unwrap_or(entries.len());
        entries.insert(position, envelope);
        position == 0
    }
}

/// Queue of envelopes waiting for their execution time
pub struct TimerQueue {
    shared: Arc<TimerShared>,
    idle_delay_ms: u64,
    /// Where fired envelopes are delivered
    sink: mpsc::Sender<MessageEnvelope>,
    task: Option<JoinHandle<()>>,
}

impl TimerQueue {
    /// Create a stopped timer queue delivering fired envelopes to `sink`
    pub fn new(idle_delay_ms: u64, sink: mpsc::Sender<MessageEnvelope>) -> Self {
        Self {
            shared: Arc::new(TimerShared {
                entries: Mutex::new(VecDeque::new()),
                wakeup: Notify::new(),
                running: AtomicBool::new(false),
                idle_fires: AtomicU64::new(0),
            }),
            idle_delay_ms,
            sink,
            task: None,
        }
    }

    /// Clear any prior state, arm the idle sentinel and spawn the timer task
    pub async fn start(&mut self) {
        if self.task.is_some() {
            self.stop().await;
        }

        {
            let mut entries = self.shared.entries.lock().await;
            entries.clear();
            entries.push_back(MessageEnvelope::idle(self.idle_delay_ms));
        }
        self.shared.idle_fires.store(0, Ordering::SeqCst);
        self.shared.running.store(true, Ordering::SeqCst);

        let shared = self.shared.clone();
        let sink = self.sink.clone();
        self.task = Some(tokio::spawn(async move {
            timer_loop(shared, sink).await;
        }));

        info!("[TIMER] Started (idle delay {}ms)", self.idle_delay_ms);
    }

    /// Stop the timer task. Pending envelopes are not delivered.
    pub async fn stop(&mut self) {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.wakeup.notify_one();

        if let Some(task) = self.task.take() {
            // The task may be parked on a full sink that nobody drains any more
            task.abort();
            let _ = task.await;

            let abandoned = self.len().await.saturating_sub(1);
            if abandoned > 0 {
                warn!("[TIMER] Stopped with {} pending envelopes abandoned", abandoned);
            } else {
                info!("[TIMER] Stopped");
            }
        }
    }

    /// Schedule an envelope. Wakes the timer task if it became the new head.
    pub async fn add_message(&self, envelope: MessageEnvelope) {
        debug!(
            "[TIMER] Scheduling envelope {} at {}ms",
            envelope.id(),
            envelope.execution_time_ms()
        );
        if self.shared.insert(envelope).await {
            self.shared.wakeup.notify_one();
        }
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Number of queued envelopes, including the idle sentinel
    pub async fn len(&self) -> usize {
        self.shared.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// How many times the idle sentinel has fired since `start`
    pub fn idle_fires(&self) -> u64 {
        self.shared.idle_fires.load(Ordering::SeqCst)
    }
}

impl Drop for TimerQueue {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// The timer task: sleep until the head is due, fire it, repeat
async fn timer_loop(shared: Arc<TimerShared>, sink: mpsc::Sender<MessageEnvelope>) {
    loop {
        let wait_ms = {
            let entries = shared.entries.lock().await;
            entries
                .front()
                .map(|head| head.execution_time_ms().saturating_sub(monotonic_ms()))
        };

        match wait_ms {
            Some(0) => {}
            Some(ms) => {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
                    _ = shared.wakeup.notified() => {}
                }
            }
            None => shared.wakeup.notified().await,
        }

        if !shared.running.load(Ordering::SeqCst) {
            break;
        }

        // An early wake-up leaves the head in place and recomputes the wait
        let due = {
            let mut entries = shared.entries.lock().await;
            match entries.front() {
                Some(head) if head.execution_time_ms() <= monotonic_ms() => entries.pop_front(),
                _ => None,
            }
        };
        let Some(mut envelope) = due else {
            continue;
        };

        let now = monotonic_ms();

        if envelope.is_idle() {
            let fires = shared.idle_fires.fetch_add(1, Ordering::SeqCst) + 1;
            trace!("[TIMER] Idle sentinel fired ({} times)", fires);
            envelope.reschedule(now);
            shared.insert(envelope).await;
            continue;
        }

        if envelope.should_repeat() {
            let mut next = envelope.clone();
            next.reschedule(now);
            shared.insert(next).await;
        }

        envelope.advance(RequestEvent::Fire);
        debug!("[TIMER] Fired envelope {}", envelope.id());

        if sink.send(envelope).await.is_err() {
            warn!("[TIMER] Dispatcher channel closed, timer exiting");
            break;
        }
    }

    debug!("[TIMER] Timer task exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::sources;
    use bert_shared::Request;

    fn envelope_at(execution_time_ms: u64) -> MessageEnvelope {
        let mut env = MessageEnvelope::from_request(Request::metric("NAME"), sources::INTERNAL)
            .with_execution_time_ms(execution_time_ms);
        env.advance(RequestEvent::Classify);
        env.advance(RequestEvent::ScheduleTimer);
        env
    }

    #[tokio::test]
    async fn test_start_arms_idle_sentinel() {
        let (tx, _rx) = mpsc::channel(16);
        let mut timer = TimerQueue::new(60_000, tx);
        assert!(timer.is_empty().await);

        timer.start().await;
        assert!(timer.is_running());
        assert_eq!(timer.len().await, 1);

        timer.stop().await;
        assert!(!timer.is_running());
    }

    #[tokio::test]
    async fn test_fires_in_execution_time_order() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut timer = TimerQueue::new(60_000, tx);
        timer.start().await;

        let base = monotonic_ms();
        for offset in [90, 10, 50, 30, 70, 30] {
            timer.add_message(envelope_at(base + offset)).await;
        }

        let mut fired = Vec::new();
        for _ in 0..6 {
            let env = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .expect("timer did not fire")
                .expect("channel closed");
            fired.push(env.execution_time_ms());
        }

        assert!(fired.windows(2).all(|w| w[0] <= w[1]), "out of order: {:?}", fired);
        timer.stop().await;
    }

    #[tokio::test]
    async fn test_new_head_interrupts_long_wait() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut timer = TimerQueue::new(60_000, tx);
        timer.start().await;

        // Timer task is now sleeping towards the sentinel a minute away
        tokio::time::sleep(Duration::from_millis(20)).await;
        timer.add_message(envelope_at(monotonic_ms() + 30)).await;

        let env = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("insert at head did not wake the timer")
            .expect("channel closed");
        assert_eq!(env.state(), bert_shared::state_machine::RequestState::Fired);
        timer.stop().await;
    }

    #[tokio::test]
    async fn test_idle_sentinel_keeps_firing() {
        let (tx, _rx) = mpsc::channel(16);
        let mut timer = TimerQueue::new(100, tx);
        timer.start().await;

        tokio::time::sleep(Duration::from_millis(250)).await;

        assert!(timer.idle_fires() >= 2, "fired {} times", timer.idle_fires());
        // Never empty while running
        assert_eq!(timer.len().await, 1);
        timer.stop().await;
    }

    #[tokio::test]
    async fn test_repeating_envelope_is_reinserted() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut timer = TimerQueue::new(60_000, tx);
        timer.start().await;

        let request = Request::metric("CYCLECOUNT").repeating_every_ms(30);
        let mut env = MessageEnvelope::from_request(request, sources::INTERNAL);
        env.advance(RequestEvent::Classify);
        env.advance(RequestEvent::ScheduleTimer);
        let id = env.id();
        timer.add_message(env).await;

        for _ in 0..3 {
            let fired = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("repeat did not fire")
                .expect("channel closed");
            assert_eq!(fired.id(), id);
        }

        // Sentinel plus the re-armed repeat
        assert_eq!(timer.len().await, 2);
        timer.stop().await;
    }

    #[tokio::test]
    async fn test_huge_repeat_interval_keeps_timer_alive() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut timer = TimerQueue::new(50, tx);
        timer.start().await;

        let request = Request::metric("CYCLECOUNT").repeating_every_ms(u64::MAX);
        let mut env = MessageEnvelope::from_request(request, sources::INTERNAL);
        env.advance(RequestEvent::Classify);
        env.advance(RequestEvent::ScheduleTimer);
        timer.add_message(env).await;

        let fired = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("repeating envelope did not fire")
            .expect("channel closed");
        assert_eq!(fired.state(), bert_shared::state_machine::RequestState::Fired);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(timer.idle_fires() >= 2, "fired {} times", timer.idle_fires());
        // Sentinel plus the repeat parked at the end of time
        assert_eq!(timer.len().await, 2);
        assert!(rx.try_recv().is_err());
        timer.stop().await;
    }

    #[tokio::test]
    async fn test_stop_abandons_pending() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut timer = TimerQueue::new(60_000, tx);
        timer.start().await;

        timer.add_message(envelope_at(monotonic_ms() + 200)).await;
        timer.stop().await;

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(rx.try_recv().is_err());

        // Restart clears prior state
        timer.start().await;
        assert_eq!(timer.len().await, 1);
        timer.stop().await;
    }
}
