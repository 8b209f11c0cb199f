//! Per-chain sequential queues
//!
//! Commands on the same kinematic sub-chain run one at a time, each
//! starting no earlier than the previous one's declared duration allows.
//! Commands on different chains are independent.

use crate::error::DispatchError;
use crate::message::MessageEnvelope;
use bert_shared::monotonic_ms;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

/// Independent kinematic sub-chains of the robot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    Head,
    LeftArm,
    RightArm,
    LeftLeg,
    RightLeg,
    /// Catch-all for commands touching several chains
    Global,
}

impl QueueName {
    pub const ALL: [QueueName; 6] = [
        QueueName::Head,
        QueueName::LeftArm,
        QueueName::RightArm,
        QueueName::LeftLeg,
        QueueName::RightLeg,
        QueueName::Global,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            QueueName::Head => "HEAD",
            QueueName::LeftArm => "LEFT_ARM",
            QueueName::RightArm => "RIGHT_ARM",
            QueueName::LeftLeg => "LEFT_LEG",
            QueueName::RightLeg => "RIGHT_LEG",
            QueueName::Global => "GLOBAL",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueName {
    type Err = DispatchError;

    /// Case-insensitive; `-` and space are accepted in place of `_`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace(['-', ' '], "_");
        QueueName::ALL
            .into_iter()
            .find(|q| q.as_str() == normalized)
            .ok_or_else(|| DispatchError::UnknownChain(s.to_string()))
    }
}

/// FIFO of motion commands for one chain
#[derive(Debug, Default)]
pub struct ChainQueue {
    pending: VecDeque<MessageEnvelope>,
    in_progress: bool,
    next_allowed_execute_time: u64,
}

impl ChainQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an envelope to the tail of the chain
    pub fn append(&mut self, envelope: MessageEnvelope) {
        self.pending.push_back(envelope);
    }

    /// Remove the head and assign its start time using the current clock
    pub fn pop_next(&mut self) -> Option<MessageEnvelope> {
        self.pop_next_at(monotonic_ms())
    }

    /// Remove the head and assign its start time as of `now_ms`
    ///
    /// The head starts at `max(next_allowed, now)` (or later if its own
    /// delay has not been served yet), and the chain is then blocked for the
    /// head's declared duration.
    pub fn pop_next_at(&mut self, now_ms: u64) -> Option<MessageEnvelope> {
        let mut envelope = self.pending.pop_front()?;

        let start = self.next_allowed_execute_time.max(now_ms);
        envelope.defer_until(start);
        self.next_allowed_execute_time = envelope
            .execution_time_ms()
            .saturating_add(envelope.duration_ms());

        Some(envelope)
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress
    }

    pub fn set_in_progress(&mut self, in_progress: bool) {
        self.in_progress = in_progress;
    }

    /// Earliest time the next command on this chain may start
    pub fn next_allowed_execute_time(&self) -> u64 {
        self.next_allowed_execute_time
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Discard everything still waiting; returns how many were dropped
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        self.in_progress = false;
        dropped
    }
}

/// One `ChainQueue` per `QueueName`
#[derive(Debug)]
pub struct ChainQueueSet {
    queues: HashMap<QueueName, ChainQueue>,
}

impl Default for ChainQueueSet {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainQueueSet {
    pub fn new() -> Self {
        Self {
            queues: QueueName::ALL.into_iter().map(|q| (q, ChainQueue::new())).collect(),
        }
    }

    pub fn get(&self, name: QueueName) -> &ChainQueue {
        &self.queues[&name]
    }

    pub fn get_mut(&mut self, name: QueueName) -> &mut ChainQueue {
        self.queues.entry(name).or_default()
    }

    /// Total envelopes waiting across all chains
    pub fn pending(&self) -> usize {
        self.queues.values().map(ChainQueue::len).sum()
    }

    /// Abandon all queued entries; returns how many were dropped
    pub fn clear(&mut self) -> usize {
        self.queues.values_mut().map(ChainQueue::clear).sum()
    }
}
