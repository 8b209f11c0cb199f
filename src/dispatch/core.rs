//! Dispatch core - the single consumer of all robot requests
//!
//! Every request passes through one task which classifies it, executes or
//! forwards it, and routes the response back to the channel it came from.
//! Motion requests bound to a chain are serialized through that chain's
//! queue and released through the timer queue when they become due.

use super::handlers::{self, HandlerContext, LocalResult, RobotIdentity, ShutdownKind};
use super::metrics::CycleMetrics;
use crate::channel::{ChannelRegistry, Collaborator, ResponseSender};
use crate::config::{DispatchConfig, RobotConfig};
use crate::error::DispatchError;
use crate::message::MessageEnvelope;
use crate::motor::Motor;
use crate::queue::{ChainQueueSet, QueueName, TimerQueue};
use bert_shared::{keys, monotonic_ms, state_machine::RequestEvent, RequestType, Response};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Items delivered to the dispatch task
#[derive(Debug)]
enum DispatchEvent {
    /// Submitted by a channel adapter
    Request(MessageEnvelope),
    /// Released by the timer queue
    Fired(MessageEnvelope),
    /// Leave the loop and stop collaborators
    Shutdown(ShutdownKind),
}

/// Where a classified request goes next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Local(RequestType),
    Deferred,
    Motor,
    Chain(QueueName),
}

/// State readable from outside the dispatch task
struct DispatchShared {
    identity: RobotIdentity,
    metrics: RwLock<CycleMetrics>,
}

impl DispatchShared {
    async fn context(&self) -> HandlerContext {
        HandlerContext {
            identity: self.identity.clone(),
            metrics: *self.metrics.read().await,
            today: chrono::Local::now().date_naive(),
        }
    }
}

/// Cloneable handle used by channel adapters to reach the dispatcher
#[derive(Clone)]
pub struct DispatcherHandle {
    events: mpsc::Sender<DispatchEvent>,
    channels: Arc<ChannelRegistry>,
    shared: Arc<DispatchShared>,
    capacity: usize,
}

impl DispatcherHandle {
    /// Submit an envelope for execution. Never blocks.
    pub fn handle_request(&self, envelope: MessageEnvelope) -> Result<(), DispatchError> {
        self.events
            .try_send(DispatchEvent::Request(envelope))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => DispatchError::QueueFull(self.capacity),
                mpsc::error::TrySendError::Closed(_) => DispatchError::Closed,
            })
    }

    /// Register how responses reach requests tagged with `source`
    pub async fn register_channel(&self, source: impl Into<String>, sender: Arc<dyn ResponseSender>) {
        self.channels.register(source, sender).await;
    }

    /// Describe one of the dispatcher's metrics in words
    pub async fn get_metric(&self, name: &str) -> Result<String, DispatchError> {
        let ctx = self.shared.context().await;
        handlers::answer_metric(&ctx, name)
    }

    /// Ask the dispatcher to leave its loop, as if a HALT or SHUTDOWN arrived
    pub fn request_shutdown(&self, kind: ShutdownKind) -> Result<(), DispatchError> {
        self.events
            .try_send(DispatchEvent::Shutdown(kind))
            .map_err(|_| DispatchError::Closed)
    }
}

/// The dispatcher. Build it, hand out handles, then `run` it.
pub struct DispatchCore {
    config: DispatchConfig,
    events: mpsc::Receiver<DispatchEvent>,
    fired: mpsc::Receiver<MessageEnvelope>,
    /// An event received while pacing, handled next cycle
    deferred: Option<DispatchEvent>,
    timer: TimerQueue,
    chains: ChainQueueSet,
    motor: Arc<dyn Motor>,
    collaborators: Vec<Arc<dyn Collaborator>>,
    handle: DispatcherHandle,
}

impl DispatchCore {
    /// Create a dispatcher configured from `config`, forwarding motion to `motor`
    pub fn new(config: &RobotConfig, motor: Arc<dyn Motor>) -> Self {
        let dispatch = config.dispatch.clone();
        let (events_tx, events_rx) = mpsc::channel(dispatch.queue_capacity);
        let (fired_tx, fired_rx) = mpsc::channel(dispatch.queue_capacity);

        let shared = Arc::new(DispatchShared {
            identity: RobotIdentity {
                name: config.name.clone(),
                height_cm: config.height_cm,
                birth_date: config.birth_date,
            },
            metrics: RwLock::new(CycleMetrics::new(dispatch.cadence_ms, dispatch.weight)),
        });

        let handle = DispatcherHandle {
            events: events_tx,
            channels: Arc::new(ChannelRegistry::new()),
            shared,
            capacity: dispatch.queue_capacity,
        };

        Self {
            timer: TimerQueue::new(dispatch.idle_delay_ms, fired_tx),
            config: dispatch,
            events: events_rx,
            fired: fired_rx,
            deferred: None,
            chains: ChainQueueSet::new(),
            motor,
            collaborators: Vec::new(),
            handle,
        }
    }

    pub fn handle(&self) -> DispatcherHandle {
        self.handle.clone()
    }

    /// Add a subsystem to stop when the dispatcher shuts down
    pub fn add_collaborator(&mut self, collaborator: Arc<dyn Collaborator>) {
        self.collaborators.push(collaborator);
    }

    /// Run the dispatch loop until HALT or SHUTDOWN
    pub async fn run(mut self) -> ShutdownKind {
        self.timer.start().await;
        info!(
            "Dispatcher running (cadence {}ms, weight {})",
            self.config.cadence_ms, self.config.weight
        );

        let kind = loop {
            let Some(event) = self.next_event().await else {
                warn!("All request producers closed, halting");
                break ShutdownKind::Halt;
            };
            let start_cycle = Instant::now();

            let outcome = match event {
                DispatchEvent::Shutdown(kind) => Some(kind),
                DispatchEvent::Request(envelope) => self.dispatch(envelope, true).await,
                DispatchEvent::Fired(envelope) => self.handle_fired(envelope).await,
            };

            let elapsed = start_cycle.elapsed();
            self.handle.shared.metrics.write().await.record_cycle(elapsed);

            if let Some(kind) = outcome {
                break kind;
            }
            self.pace(elapsed).await;
        };

        self.teardown().await;
        info!("Dispatcher stopped ({:?})", kind);
        kind
    }

    async fn next_event(&mut self) -> Option<DispatchEvent> {
        if let Some(event) = self.deferred.take() {
            return Some(event);
        }
        recv_event(&mut self.events, &mut self.fired).await
    }

    /// Sleep out the rest of the cadence, unless new work arrives first
    async fn pace(&mut self, elapsed: Duration) {
        let Some(remaining) = self.config.cadence().checked_sub(elapsed) else {
            return;
        };

        let event = tokio::select! {
            _ = tokio::time::sleep(remaining) => None,
            event = recv_event(&mut self.events, &mut self.fired) => event,
        };
        self.deferred = event;
    }

    fn classify(&self, envelope: &MessageEnvelope, allow_defer: bool) -> Result<Route, DispatchError> {
        let request = envelope.payload().ok_or(DispatchError::EmptyPayload)?;
        let request_type = RequestType::try_from(request.request_type)
            .map_err(|_| DispatchError::UnknownRequestType(request.request_type))?;

        let chain = envelope.chain().map(str::parse::<QueueName>).transpose()?;

        if !request_type.is_local() && !request_type.is_motion() {
            return Err(DispatchError::UnknownRequestType(request.request_type));
        }
        if allow_defer && chain.is_none() && envelope.is_deferred() {
            return Ok(Route::Deferred);
        }
        if request_type.is_local() {
            return Ok(Route::Local(request_type));
        }

        Ok(match chain {
            Some(queue) => Route::Chain(queue),
            None => Route::Motor,
        })
    }

    /// Classify an envelope and carry it to its next stop
    async fn dispatch(&mut self, mut envelope: MessageEnvelope, allow_defer: bool) -> Option<ShutdownKind> {
        envelope.advance(RequestEvent::Classify);

        let route = match self.classify(&envelope, allow_defer) {
            Ok(route) => route,
            Err(e) => {
                self.reject(envelope, e).await;
                return None;
            }
        };
        debug!("Envelope {} from {} -> {:?}", envelope.id(), envelope.original_source(), route);

        match route {
            Route::Local(request_type) => return self.answer_locally(envelope, request_type).await,
            Route::Deferred => {
                envelope.advance(RequestEvent::ScheduleTimer);
                self.timer.add_message(envelope).await;
            }
            Route::Motor => self.forward_to_motor(envelope).await,
            Route::Chain(queue) => self.enqueue_on_chain(queue, envelope).await,
        }
        None
    }

    async fn handle_fired(&mut self, envelope: MessageEnvelope) -> Option<ShutdownKind> {
        let Some(chain) = envelope.chain() else {
            // A delayed or repeating request whose time has come
            return self.dispatch(envelope, false).await;
        };

        match chain.parse::<QueueName>() {
            Ok(queue) => {
                self.execute_chain_entry(queue, envelope).await;
                self.advance_chain(queue).await;
            }
            Err(e) => self.reject(envelope, e).await,
        }
        None
    }

    async fn answer_locally(
        &mut self,
        mut envelope: MessageEnvelope,
        request_type: RequestType,
    ) -> Option<ShutdownKind> {
        let ctx = self.handle.shared.context().await;
        let request = envelope.payload();

        let result = match request_type {
            RequestType::Command => {
                handlers::handle_command(&ctx, request.and_then(|r| r.property(keys::COMMAND)))
            }
            _ => handlers::handle_get_metric(&ctx, request.and_then(|r| r.property(keys::METRIC))),
        };
        envelope.advance(RequestEvent::AnswerLocally);

        let (response, shutdown) = match result {
            LocalResult::Answered { text } => (Response::text(envelope.id(), request_type, text), None),
            LocalResult::Rejected { error } => {
                warn!("Envelope {} rejected: {}", envelope.id(), error);
                (Response::error(envelope.id(), request_type, error.to_string()), None)
            }
            LocalResult::Shutdown { kind, text } => {
                (Response::text(envelope.id(), request_type, text), Some(kind))
            }
        };

        self.route(envelope, response).await;
        shutdown
    }

    /// Hand a motion request to the motor and route its answer
    async fn forward_to_motor(&mut self, mut envelope: MessageEnvelope) {
        envelope.advance(RequestEvent::ForwardToMotor);
        let request_type = envelope.request_type();
        let timeout = self.config.motor_timeout();

        let mut response =
            match tokio::time::timeout(timeout, self.motor.process_request(&envelope)).await {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    error!("Motor failed on envelope {}: {}", envelope.id(), e);
                    let error = DispatchError::Motor(e.to_string());
                    Response::error(envelope.id(), request_type, error.to_string())
                }
                Err(_) => {
                    error!("Motor timed out on envelope {}", envelope.id());
                    let error = DispatchError::Motor(format!(
                        "Motor subsystem timed out after {}ms",
                        timeout.as_millis()
                    ));
                    Response::error(envelope.id(), request_type, error.to_string())
                }
            };
        response.request_id = envelope.id();

        envelope.advance(RequestEvent::Complete);
        self.route(envelope, response).await;
    }

    async fn enqueue_on_chain(&mut self, queue: QueueName, mut envelope: MessageEnvelope) {
        if envelope.should_repeat() {
            warn!(
                "Envelope {} on chain {} cannot repeat, running it once",
                envelope.id(),
                queue
            );
            envelope.clear_repeat();
        }

        envelope.advance(RequestEvent::QueueOnChain);
        self.chains.get_mut(queue).append(envelope);
        self.advance_chain(queue).await;
    }

    /// Start the next command on an idle chain.
    ///
    /// Commands already due run immediately; the first one still in the
    /// future goes to the timer queue and keeps the chain busy until it fires.
    async fn advance_chain(&mut self, queue: QueueName) {
        loop {
            let chain = self.chains.get_mut(queue);
            if chain.is_in_progress() {
                return;
            }
            let Some(mut envelope) = chain.pop_next() else {
                return;
            };
            chain.set_in_progress(true);
            envelope.clear_delay();

            if envelope.execution_time_ms() > monotonic_ms() {
                debug!(
                    "Chain {}: envelope {} waits until {}ms",
                    queue,
                    envelope.id(),
                    envelope.execution_time_ms()
                );
                envelope.advance(RequestEvent::ScheduleTimer);
                self.timer.add_message(envelope).await;
                return;
            }

            envelope.advance(RequestEvent::Fire);
            self.execute_chain_entry(queue, envelope).await;
        }
    }

    async fn execute_chain_entry(&mut self, queue: QueueName, envelope: MessageEnvelope) {
        debug!("Chain {}: executing envelope {}", queue, envelope.id());
        self.forward_to_motor(envelope).await;
        self.chains.get_mut(queue).set_in_progress(false);
    }

    /// Answer a malformed request with its error, then drop it
    async fn reject(&mut self, mut envelope: MessageEnvelope, error: DispatchError) {
        warn!(
            "Dropping envelope {} from {}: {}",
            envelope.id(),
            envelope.original_source(),
            error
        );
        let response = Response::error(envelope.id(), envelope.request_type(), error.to_string());
        self.handle
            .channels
            .route(envelope.original_source(), response)
            .await;
        envelope.advance(RequestEvent::Drop {
            reason: error.to_string(),
        });
    }

    async fn route(&mut self, mut envelope: MessageEnvelope, response: Response) {
        let routed = self
            .handle
            .channels
            .route(envelope.original_source(), response)
            .await;

        if routed {
            envelope.advance(RequestEvent::RouteResponse);
        } else {
            envelope.advance(RequestEvent::Drop {
                reason: format!("no route to {}", envelope.original_source()),
            });
        }
    }

    /// Stop the timer, abandon queued chain commands, stop collaborators
    async fn teardown(&mut self) {
        self.timer.stop().await;

        let abandoned = self.chains.clear();
        if abandoned > 0 {
            warn!("Abandoned {} queued chain commands", abandoned);
        }

        if let Err(e) = self.motor.stop().await {
            error!("Failed to stop motor subsystem: {}", e);
        }

        let results = futures::future::join_all(self.collaborators.iter().map(|c| c.stop())).await;
        for (collaborator, result) in self.collaborators.iter().zip(results) {
            match result {
                Ok(()) => info!("Stopped {}", collaborator.name()),
                Err(e) => error!("Failed to stop {}: {}", collaborator.name(), e),
            }
        }
    }
}

async fn recv_event(
    events: &mut mpsc::Receiver<DispatchEvent>,
    fired: &mut mpsc::Receiver<MessageEnvelope>,
) -> Option<DispatchEvent> {
    tokio::select! {
        Some(event) = events.recv() => Some(event),
        Some(envelope) = fired.recv() => Some(DispatchEvent::Fired(envelope)),
        else => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::sources;
    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use bert_shared::Request;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    /// Records the chain and start time of every request it handles
    #[derive(Default)]
    struct RecordingMotor {
        calls: Mutex<Vec<(Option<String>, u64)>>,
        fail_with: Option<String>,
    }

    #[async_trait]
    impl Motor for RecordingMotor {
        async fn process_request(&self, envelope: &MessageEnvelope) -> Result<Response> {
            self.calls
                .lock()
                .unwrap()
                .push((envelope.chain().map(str::to_owned), monotonic_ms()));
            match &self.fail_with {
                Some(message) => Err(anyhow!(message.clone())),
                None => Ok(Response::text(envelope.id(), envelope.request_type(), "done")),
            }
        }
    }

    struct ForwardingSender(mpsc::UnboundedSender<Response>);

    #[async_trait]
    impl ResponseSender for ForwardingSender {
        async fn send(&self, response: Response) -> Result<()> {
            self.0.send(response).map_err(|_| anyhow!("receiver dropped"))
        }

        fn name(&self) -> &str {
            "forwarding"
        }
    }

    /// Stalls on its first request, answers promptly afterwards
    #[derive(Default)]
    struct StallingMotor {
        calls: AtomicU64,
    }

    #[async_trait]
    impl Motor for StallingMotor {
        async fn process_request(&self, envelope: &MessageEnvelope) -> Result<Response> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
            Ok(Response::text(envelope.id(), envelope.request_type(), "done"))
        }
    }

    #[derive(Default)]
    struct FlagCollaborator {
        stopped: AtomicBool,
    }

    #[async_trait]
    impl Collaborator for FlagCollaborator {
        fn name(&self) -> &str {
            "flag"
        }

        async fn stop(&self) -> Result<()> {
            self.stopped.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn test_config() -> RobotConfig {
        let mut config = RobotConfig::default();
        config.dispatch.cadence_ms = 10;
        config
    }

    struct Harness {
        handle: DispatcherHandle,
        responses: mpsc::UnboundedReceiver<Response>,
        task: JoinHandle<ShutdownKind>,
    }

    impl Harness {
        async fn start(motor: Arc<dyn Motor>) -> Self {
            Self::start_with(test_config(), motor, Vec::new()).await
        }

        async fn start_with(
            config: RobotConfig,
            motor: Arc<dyn Motor>,
            collaborators: Vec<Arc<dyn Collaborator>>,
        ) -> Self {
            let mut core = DispatchCore::new(&config, motor);
            for collaborator in collaborators {
                core.add_collaborator(collaborator);
            }
            let handle = core.handle();
            let (tx, responses) = mpsc::unbounded_channel();
            handle
                .register_channel(sources::TERMINAL, Arc::new(ForwardingSender(tx)))
                .await;
            let task = tokio::spawn(core.run());
            Self {
                handle,
                responses,
                task,
            }
        }

        fn send(&self, request: Request) {
            self.handle
                .handle_request(MessageEnvelope::from_request(request, sources::TERMINAL))
                .unwrap();
        }

        async fn next_response(&mut self) -> Response {
            timeout(Duration::from_secs(2), self.responses.recv())
                .await
                .expect("timed out waiting for response")
                .expect("response channel closed")
        }

        async fn halt(self) -> ShutdownKind {
            self.handle.request_shutdown(ShutdownKind::Halt).unwrap();
            timeout(Duration::from_secs(2), self.task)
                .await
                .expect("dispatcher did not stop")
                .unwrap()
        }
    }

    #[tokio::test]
    async fn test_unknown_command_keeps_running() {
        let mut harness = Harness::start(Arc::new(RecordingMotor::default())).await;

        harness.send(Request::command("dance"));
        let response = harness.next_response().await;
        assert!(response.is_error());
        assert_eq!(response.error, "Unrecognized command: dance");

        harness.send(Request::metric("NAME"));
        assert_eq!(harness.next_response().await.text, "My name is bert");

        assert_eq!(harness.halt().await, ShutdownKind::Halt);
    }

    #[tokio::test]
    async fn test_get_metric_through_handle() {
        let core = DispatchCore::new(&RobotConfig::default(), Arc::new(RecordingMotor::default()));
        let handle = core.handle();

        assert_eq!(
            handle.get_metric("CADENCE").await,
            Ok("The cadence is 1000 milliseconds".to_string())
        );
        assert_eq!(
            handle.get_metric("WEIGHT").await,
            Err(DispatchError::UnknownMetric("WEIGHT".into()))
        );
    }

    #[tokio::test]
    async fn test_chain_commands_are_serialized() {
        let motor = Arc::new(RecordingMotor::default());
        let mut harness = Harness::start(motor.clone()).await;

        let pose = |duration| {
            Request::new(RequestType::SetPose)
                .with_joint_target("left_shoulder_x", 10.0)
                .on_chain("LEFT_ARM")
                .with_duration_ms(duration)
        };
        harness.send(pose(200));
        harness.send(pose(100));
        harness.send(
            Request::new(RequestType::SetPose)
                .with_joint_target("right_shoulder_x", 5.0)
                .on_chain("right_arm"),
        );

        for _ in 0..3 {
            assert!(!harness.next_response().await.is_error());
        }

        let calls = motor.calls.lock().unwrap().clone();
        let left: Vec<u64> = calls
            .iter()
            .filter(|(chain, _)| chain.as_deref() == Some("LEFT_ARM"))
            .map(|(_, at)| *at)
            .collect();
        let right: Vec<u64> = calls
            .iter()
            .filter(|(chain, _)| chain.as_deref() == Some("right_arm"))
            .map(|(_, at)| *at)
            .collect();

        assert_eq!(left.len(), 2);
        assert!(left[1] - left[0] >= 190, "second pose started too early: {:?}", left);
        // The right arm does not wait for the left arm
        assert!(right[0] < left[1], "right arm was blocked: {:?}", calls);

        harness.halt().await;
    }

    #[tokio::test]
    async fn test_motor_error_is_surfaced_verbatim() {
        let motor = RecordingMotor {
            fail_with: Some("Unknown joint: tail".into()),
            ..Default::default()
        };
        let mut harness = Harness::start(Arc::new(motor)).await;

        harness.send(Request::new(RequestType::SetMotorProperty).with_property("joint", "tail"));
        let response = harness.next_response().await;
        assert_eq!(response.error, "Unknown joint: tail");
        assert_eq!(response.request_type, RequestType::SetMotorProperty as i32);

        harness.halt().await;
    }

    #[tokio::test]
    async fn test_motor_timeout_releases_chain() {
        let mut config = test_config();
        config.dispatch.motor_timeout_ms = 50;
        let motor = Arc::new(StallingMotor::default());
        let mut harness = Harness::start_with(config, motor.clone(), Vec::new()).await;

        let nod = || {
            Request::new(RequestType::SetPose)
                .with_joint_target("neck_y", 15.0)
                .on_chain("HEAD")
        };
        harness.send(nod());
        harness.send(nod());

        let first = harness.next_response().await;
        assert_eq!(first.error, "Motor subsystem timed out after 50ms");
        assert_eq!(first.request_type, RequestType::SetPose as i32);

        let second = harness.next_response().await;
        assert!(!second.is_error(), "second command failed: {}", second.error);
        assert_eq!(second.text, "done");
        assert_eq!(motor.calls.load(Ordering::SeqCst), 2);

        assert_eq!(harness.halt().await, ShutdownKind::Halt);
    }

    #[tokio::test]
    async fn test_huge_chain_duration_keeps_running() {
        let mut harness = Harness::start(Arc::new(RecordingMotor::default())).await;

        harness.send(
            Request::new(RequestType::SetPose)
                .with_joint_target("neck_y", 1.0)
                .on_chain("HEAD")
                .with_duration_ms(u64::MAX),
        );
        assert_eq!(harness.next_response().await.text, "done");

        harness.send(Request::metric("NAME"));
        assert_eq!(harness.next_response().await.text, "My name is bert");

        assert_eq!(harness.halt().await, ShutdownKind::Halt);
    }

    #[tokio::test]
    async fn test_unroutable_response_is_dropped() {
        let mut harness = Harness::start(Arc::new(RecordingMotor::default())).await;

        harness
            .handle
            .handle_request(MessageEnvelope::from_request(Request::metric("NAME"), "NOWHERE"))
            .unwrap();
        harness.send(Request::metric("HEIGHT"));

        assert_eq!(harness.next_response().await.text, "I am 83 centimeters tall");
        harness.halt().await;
    }

    #[tokio::test]
    async fn test_malformed_requests_are_rejected() {
        let mut harness = Harness::start(Arc::new(RecordingMotor::default())).await;

        harness
            .handle
            .handle_request(MessageEnvelope::empty(sources::TERMINAL))
            .unwrap();
        assert_eq!(harness.next_response().await.error, "Request has no payload");

        harness.send(Request::new(RequestType::Unknown));
        assert_eq!(harness.next_response().await.error, "Unrecognized request type: 0");

        harness.send(
            Request::new(RequestType::SetPose)
                .with_joint_target("neck_y", 1.0)
                .on_chain("TAIL"),
        );
        assert_eq!(harness.next_response().await.error, "Unrecognized chain: TAIL");

        harness.halt().await;
    }

    #[tokio::test]
    async fn test_delayed_request_waits() {
        let mut harness = Harness::start(Arc::new(RecordingMotor::default())).await;

        let sent = Instant::now();
        harness.send(Request::metric("NAME").with_delay_ms(150));
        let response = harness.next_response().await;

        assert_eq!(response.text, "My name is bert");
        assert!(sent.elapsed() >= Duration::from_millis(140));
        harness.halt().await;
    }

    #[tokio::test]
    async fn test_repeating_request_fires_repeatedly() {
        let mut harness = Harness::start(Arc::new(RecordingMotor::default())).await;

        harness.send(Request::metric("CYCLECOUNT").repeating_every_ms(50));
        for _ in 0..3 {
            let response = harness.next_response().await;
            assert!(response.text.starts_with("I've processed"));
        }

        harness.halt().await;
    }

    #[tokio::test]
    async fn test_halt_command_stops_collaborators() {
        let collaborator = Arc::new(FlagCollaborator::default());
        let mut harness = Harness::start_with(
            test_config(),
            Arc::new(RecordingMotor::default()),
            vec![collaborator.clone() as Arc<dyn Collaborator>],
        )
        .await;

        harness.send(Request::command("halt"));
        assert_eq!(harness.next_response().await.text, "I am halting");

        let kind = timeout(Duration::from_secs(2), harness.task)
            .await
            .expect("dispatcher did not stop")
            .unwrap();
        assert_eq!(kind, ShutdownKind::Halt);
        assert!(collaborator.stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_shutdown_command_requests_power_off() {
        let mut harness = Harness::start(Arc::new(RecordingMotor::default())).await;

        harness.send(Request::command("SHUTDOWN"));
        assert_eq!(harness.next_response().await.text, "I am shutting down");

        let kind = timeout(Duration::from_secs(2), harness.task).await.unwrap().unwrap();
        assert_eq!(kind, ShutdownKind::PowerOff);
    }

    #[tokio::test]
    async fn test_queue_full() {
        let mut config = test_config();
        config.dispatch.queue_capacity = 1;
        let core = DispatchCore::new(&config, Arc::new(RecordingMotor::default()));
        let handle = core.handle();

        handle
            .handle_request(MessageEnvelope::from_request(Request::metric("NAME"), sources::TERMINAL))
            .unwrap();
        let second = handle
            .handle_request(MessageEnvelope::from_request(Request::metric("NAME"), sources::TERMINAL));
        assert_eq!(second, Err(DispatchError::QueueFull(1)));
    }
}
