//! Message envelope - a request plus its scheduling metadata

use super::sources;
use bert_shared::{
    monotonic_ms,
    state_machine::{RequestEvent, RequestLifecycle, RequestState, TransitionResult},
    Request, RequestType,
};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// A request wrapped with timing metadata
///
/// Lives in at most one queue at a time. Only the owning queue moves
/// `execution_time_ms`, and only forward.
#[derive(Debug, Clone)]
pub struct MessageEnvelope {
    id: u64,
    payload: Option<Request>,
    original_source: String,
    chain: Option<String>,
    delay_ms: u64,
    execution_time_ms: u64,
    repeat_interval_ms: u64,
    should_repeat: bool,
    duration_ms: u64,
    idle: bool,
    lifecycle: RequestLifecycle,
}

impl MessageEnvelope {
    /// Wrap a request submitted by `source`
    ///
    /// The request becomes eligible `delay_ms` from now. A non-zero repeat
    /// interval makes it fire repeatedly.
    pub fn from_request(request: Request, source: impl Into<String>) -> Self {
        let now = monotonic_ms();
        Self {
            id: next_id(),
            chain: request.chain.clone(),
            delay_ms: request.delay_ms,
            execution_time_ms: now.saturating_add(request.delay_ms),
            repeat_interval_ms: request.repeat_interval_ms,
            should_repeat: request.repeat_interval_ms > 0,
            duration_ms: request.duration_ms,
            payload: Some(request),
            original_source: source.into(),
            idle: false,
            lifecycle: RequestLifecycle::new(),
        }
    }

    /// An envelope that arrived without a request
    pub fn empty(source: impl Into<String>) -> Self {
        Self {
            id: next_id(),
            payload: None,
            original_source: source.into(),
            chain: None,
            delay_ms: 0,
            execution_time_ms: monotonic_ms(),
            repeat_interval_ms: 0,
            should_repeat: false,
            duration_ms: 0,
            idle: false,
            lifecycle: RequestLifecycle::new(),
        }
    }

    /// The timer queue's idle sentinel, re-armed every `idle_delay_ms`
    pub fn idle(idle_delay_ms: u64) -> Self {
        Self {
            id: next_id(),
            payload: None,
            original_source: sources::INTERNAL.into(),
            chain: None,
            delay_ms: idle_delay_ms,
            execution_time_ms: monotonic_ms().saturating_add(idle_delay_ms),
            repeat_interval_ms: idle_delay_ms,
            should_repeat: true,
            duration_ms: 0,
            idle: true,
            lifecycle: RequestLifecycle::new(),
        }
    }

    /// Override the absolute execution time before the envelope is queued
    pub fn with_execution_time_ms(mut self, execution_time_ms: u64) -> Self {
        self.execution_time_ms = execution_time_ms;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn payload(&self) -> Option<&Request> {
        self.payload.as_ref()
    }

    /// Request type of the payload; `Unknown` when absent or unrecognized
    pub fn request_type(&self) -> RequestType {
        self.payload
            .as_ref()
            .and_then(|r| RequestType::try_from(r.request_type).ok())
            .unwrap_or(RequestType::Unknown)
    }

    pub fn original_source(&self) -> &str {
        &self.original_source
    }

    /// Name of the chain that must serialize this envelope, if any
    pub fn chain(&self) -> Option<&str> {
        self.chain.as_deref()
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms
    }

    pub fn execution_time_ms(&self) -> u64 {
        self.execution_time_ms
    }

    pub fn repeat_interval_ms(&self) -> u64 {
        self.repeat_interval_ms
    }

    pub fn should_repeat(&self) -> bool {
        self.should_repeat
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    /// True only for the timer queue's sentinel
    pub fn is_idle(&self) -> bool {
        self.idle
    }

    /// True when the envelope must wait in the timer queue before it runs
    pub fn is_deferred(&self) -> bool {
        self.delay_ms > 0 || self.should_repeat
    }

    pub fn state(&self) -> RequestState {
        self.lifecycle.state()
    }

    /// Push the execution time out to `time_ms`; earlier times are ignored
    pub(crate) fn defer_until(&mut self, time_ms: u64) {
        self.execution_time_ms = self.execution_time_ms.max(time_ms);
    }

    /// Schedule the next firing of a repeating envelope
    pub(crate) fn reschedule(&mut self, now_ms: u64) {
        self.defer_until(now_ms.saturating_add(self.repeat_interval_ms));
    }

    /// Chained envelopes are serialized by their chain, never repeated
    pub(crate) fn clear_repeat(&mut self) {
        self.repeat_interval_ms = 0;
        self.should_repeat = false;
    }

    /// Consume the pending delay once it has been served
    pub(crate) fn clear_delay(&mut self) {
        self.delay_ms = 0;
    }

    /// Apply a lifecycle event, logging rejected transitions
    pub(crate) fn advance(&mut self, event: RequestEvent) -> bool {
        match self.lifecycle.process_event(event) {
            TransitionResult::Success(_) => true,
            TransitionResult::Invalid { from, event } => {
                warn!(
                    "Envelope {}: invalid lifecycle transition {:?} from {:?}",
                    self.id, event, from
                );
                false
            }
        }
    }
}
