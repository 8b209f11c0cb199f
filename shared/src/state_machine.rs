//! Request Lifecycle State Machine
//!
//! Tracks a single request from receipt to the routing of its response.
//!
//! ```text
//! Received -> Classified -> AnsweredLocally ------------------------------+
//!                        -> ForwardedToMotor -> Completed ----------------+-> ResponseRouted
//!                        -> QueuedOnChain -> TimerPending -> Fired -> ForwardedToMotor
//!                        -> TimerPending -> Fired -> Classified (delayed requests)
//! any non-terminal state -> Dropped
//! ```

/// Where a request currently is in the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    /// Submitted by a channel, not yet inspected
    Received,
    /// Request type and destination decided
    Classified,
    /// Answered from the dispatcher's own state
    AnsweredLocally,
    /// Handed to the motor subsystem
    ForwardedToMotor,
    /// Waiting behind earlier commands on its chain
    QueuedOnChain,
    /// Waiting in the timer queue for its execution time
    TimerPending,
    /// Execution time reached
    Fired,
    /// Motor subsystem answered
    Completed,
    /// Response delivered to the originating channel
    ResponseRouted,
    /// Discarded (malformed, or no channel to answer)
    Dropped,
}

impl RequestState {
    /// Terminal states accept no further events
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::ResponseRouted | RequestState::Dropped)
    }
}

/// Events that move a request between states
#[derive(Debug, Clone, PartialEq)]
pub enum RequestEvent {
    Classify,
    AnswerLocally,
    ForwardToMotor,
    QueueOnChain,
    ScheduleTimer,
    Fire,
    Complete,
    RouteResponse,
    Drop { reason: String },
}

/// Result of a state transition attempt
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionResult {
    /// Transition was valid and state changed
    Success(RequestState),
    /// Transition was invalid from current state; state unchanged
    Invalid { from: RequestState, event: RequestEvent },
}

/// Lifecycle of one request
#[derive(Debug, Clone)]
pub struct RequestLifecycle {
    current_state: RequestState,
    transitions: u32,
}

impl Default for RequestLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestLifecycle {
    /// Create a lifecycle in the Received state
    pub fn new() -> Self {
        Self {
            current_state: RequestState::Received,
            transitions: 0,
        }
    }

    /// Get current state
    pub fn state(&self) -> RequestState {
        self.current_state
    }

    /// Number of successful transitions so far
    pub fn transitions(&self) -> u32 {
        self.transitions
    }

    /// Process an event and return the transition result
    pub fn process_event(&mut self, event: RequestEvent) -> TransitionResult {
        match self.get_next_state(&event) {
            Some(state) => {
                self.current_state = state;
                self.transitions += 1;
                TransitionResult::Success(state)
            }
            None => TransitionResult::Invalid {
                from: self.current_state,
                event,
            },
        }
    }

    fn get_next_state(&self, event: &RequestEvent) -> Option<RequestState> {
        use RequestEvent::*;
        use RequestState::*;

        match (self.current_state, event) {
            (state, Drop { .. }) if !state.is_terminal() => Some(Dropped),

            (Received, Classify) => Some(Classified),

            (Classified, AnswerLocally) => Some(AnsweredLocally),
            (Classified, ForwardToMotor) => Some(ForwardedToMotor),
            (Classified, QueueOnChain) => Some(QueuedOnChain),
            (Classified, ScheduleTimer) => Some(TimerPending),

            (QueuedOnChain, ScheduleTimer) => Some(TimerPending),
            // Popped from an idle chain and already due
            (QueuedOnChain, Fire) => Some(Fired),

            (TimerPending, Fire) => Some(Fired),

            (Fired, ForwardToMotor) => Some(ForwardedToMotor),
            // Delayed requests are classified again once they fire
            (Fired, Classify) => Some(Classified),

            (ForwardedToMotor, Complete) => Some(Completed),

            (AnsweredLocally | Completed, RouteResponse) => Some(ResponseRouted),

            _ => None,
        }
    }
}

/// Check if a transition from one state to another is generally valid
pub fn is_valid_transition(from: RequestState, to: RequestState) -> bool {
    use RequestState::*;

    match (from, to) {
        (a, b) if a == b => !a.is_terminal(),

        (a, Dropped) => !a.is_terminal(),

        (Received, Classified) => true,
        (Classified, AnsweredLocally | ForwardedToMotor | QueuedOnChain | TimerPending) => true,
        (QueuedOnChain, TimerPending | Fired) => true,
        (TimerPending, Fired) => true,
        (Fired, ForwardedToMotor | Classified) => true,
        (ForwardedToMotor, Completed) => true,
        (AnsweredLocally | Completed, ResponseRouted) => true,

        _ => false,
    }
}
