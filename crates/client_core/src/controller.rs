//! The single consumer of the event queue and sole writer of the operation state.
//!
//! Push frames, poll ticks, user intents and request results all arrive as
//! [`ControllerEvent`]s on one unbounded queue and are handled strictly in
//! arrival order. Outbound requests run in spawned tasks that report back
//! through the same queue, so handling an event never waits on the network.

use std::{ops::ControlFlow, sync::Arc};

use shared::protocol::{HealthResponse, PushEvent, StatusResponse};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::{
    dispatcher::{CommandKind, Dispatcher, StartCommand, UserIntent},
    error::ClientError,
    log::{classify_relay, ActivityLog, LogEntry},
    machine::{OperationMachine, OperationState, Signal, Transition},
    presentation::{project, LinkStatus, PresentationSink, RecordingSink, ServerHealth, View},
    transport::{FlasherApi, MissingFlasherApi},
};

pub type CommandReply = oneshot::Sender<Result<String, ClientError>>;

pub enum ControllerEvent {
    Intent {
        intent: UserIntent,
        reply: Option<CommandReply>,
    },
    HealthChecked(Result<HealthResponse, ClientError>),
    CommandFinished {
        kind: CommandKind,
        result: Result<String, ClientError>,
    },
    PushConnected,
    PushDisconnected,
    Push(PushEvent),
    PollTick,
    PollFinished {
        /// Completion count when the poll was sent.
        completions: u64,
        result: Result<StatusResponse, ClientError>,
    },
    Shutdown,
}

impl ControllerEvent {
    pub fn intent(intent: UserIntent) -> Self {
        ControllerEvent::Intent {
            intent,
            reply: None,
        }
    }
}

/// Cloneable entry point into the controller queue.
#[derive(Clone)]
pub struct ControllerHandle {
    events: mpsc::UnboundedSender<ControllerEvent>,
    state: watch::Receiver<OperationState>,
}

impl ControllerHandle {
    /// Queue an event. Returns `false` once the controller has stopped.
    pub fn send(&self, event: ControllerEvent) -> bool {
        self.events.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    pub fn submit(&self, intent: UserIntent) -> bool {
        self.send(ControllerEvent::intent(intent))
    }

    /// Queue an intent and wait until its request is answered or refused.
    pub async fn request(&self, intent: UserIntent) -> Result<String, ClientError> {
        let (reply, rx) = oneshot::channel();
        if !self.send(ControllerEvent::Intent {
            intent,
            reply: Some(reply),
        }) {
            return Err(ClientError::Unreachable("controller has shut down".into()));
        }
        rx.await
            .unwrap_or_else(|_| Err(ClientError::Unreachable("controller has shut down".into())))
    }

    pub fn state(&self) -> OperationState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<OperationState> {
        self.state.clone()
    }

    /// Resolves once no operation is believed to be running.
    pub async fn wait_until_idle(&self) -> OperationState {
        let mut state = self.state.clone();
        if let Ok(snapshot) = state.wait_for(|s| !s.running()).await {
            return *snapshot;
        }
        let snapshot = *state.borrow();
        snapshot
    }

    pub fn shutdown(&self) {
        let _ = self.events.send(ControllerEvent::Shutdown);
    }
}

/// The single outbound request allowed in flight.
struct PendingCommand {
    kind: CommandKind,
    reply: Option<CommandReply>,
}

impl PendingCommand {
    fn settle(self, result: &Result<String, ClientError>) {
        if let Some(reply) = self.reply {
            let _ = reply.send(result.clone());
        }
    }
}

pub struct Controller {
    machine: OperationMachine,
    log: ActivityLog,
    link: LinkStatus,
    pending: Option<PendingCommand>,
    poll_in_flight: bool,
    poll_failing: bool,
    completions_seen: u64,
    dispatcher: Dispatcher,
    api: Arc<dyn FlasherApi>,
    queue: mpsc::UnboundedSender<ControllerEvent>,
    state_tx: watch::Sender<OperationState>,
    sink: Box<dyn PresentationSink>,
    last_view: Option<View>,
}

impl Controller {
    pub fn new(
        api: Arc<dyn FlasherApi>,
        dispatcher: Dispatcher,
        sink: Box<dyn PresentationSink>,
    ) -> (Self, mpsc::UnboundedReceiver<ControllerEvent>) {
        let (queue, rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(OperationState::default());
        let controller = Self {
            machine: OperationMachine::default(),
            log: ActivityLog::default(),
            link: LinkStatus::default(),
            pending: None,
            poll_in_flight: false,
            poll_failing: false,
            completions_seen: 0,
            dispatcher,
            api,
            queue,
            state_tx,
            sink,
            last_view: None,
        };
        (controller, rx)
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle {
            events: self.queue.clone(),
            state: self.state_tx.subscribe(),
        }
    }

    pub fn state(&self) -> &OperationState {
        self.machine.state()
    }

    pub fn log(&self) -> &ActivityLog {
        &self.log
    }

    pub fn link(&self) -> LinkStatus {
        self.link
    }

    /// Number of completion reports pushed so far.
    pub fn completions_seen(&self) -> u64 {
        self.completions_seen
    }

    pub fn view(&self) -> View {
        project(self.machine.state(), &self.log, self.link)
    }

    /// Probe service health once; the result comes back as `HealthChecked`.
    pub fn check_health(&self) {
        let api = Arc::clone(&self.api);
        let queue = self.queue.clone();
        tokio::spawn(async move {
            let result = api.health().await;
            let _ = queue.send(ControllerEvent::HealthChecked(result));
        });
    }

    /// Feed a recorded event sequence through a fresh controller and return
    /// every view it rendered.
    ///
    /// Request results must be part of the recording: anything the replayed
    /// controller sends goes to a service that does not exist. Recorded start
    /// intents and poll ticks spawn those requests, so call this from within a
    /// Tokio runtime.
    pub fn replay(
        dispatcher: Dispatcher,
        events: impl IntoIterator<Item = ControllerEvent>,
    ) -> Vec<View> {
        let sink = RecordingSink::default();
        let (mut controller, _queue) = Controller::new(
            Arc::new(MissingFlasherApi),
            dispatcher,
            Box::new(sink.clone()),
        );
        controller.render();
        for event in events {
            if controller.process(event).is_break() {
                break;
            }
        }
        sink.views()
    }

    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<ControllerEvent>) {
        self.render();
        while let Some(event) = events.recv().await {
            if self.process(event).is_break() {
                break;
            }
        }
        info!("controller stopped");
    }

    pub fn process(&mut self, event: ControllerEvent) -> ControlFlow<()> {
        match event {
            ControllerEvent::Intent { intent, reply } => self.on_intent(intent, reply),
            ControllerEvent::HealthChecked(result) => self.on_health(result),
            ControllerEvent::CommandFinished { kind, result } => {
                self.on_command_finished(kind, result)
            }
            ControllerEvent::PushConnected => {
                self.link.push_connected = true;
                self.append(LogEntry::info("Push channel connected"));
            }
            ControllerEvent::PushDisconnected => {
                self.link.push_connected = false;
                self.append(LogEntry::warning("Push channel disconnected"));
            }
            ControllerEvent::Push(event) => self.on_push(event),
            ControllerEvent::PollTick => self.on_poll_tick(),
            ControllerEvent::PollFinished {
                completions,
                result,
            } => self.on_poll_finished(completions, result),
            ControllerEvent::Shutdown => return ControlFlow::Break(()),
        }
        self.render();
        ControlFlow::Continue(())
    }

    fn on_intent(&mut self, intent: UserIntent, reply: Option<CommandReply>) {
        match intent {
            UserIntent::Start(command) => self.start(command, reply),
            UserIntent::Stop => self.stop(reply),
            UserIntent::ClearLog => {
                self.log.clear();
                self.sink.cleared();
                if let Some(reply) = reply {
                    let _ = reply.send(Ok("log cleared".into()));
                }
            }
        }
    }

    fn start(&mut self, command: StartCommand, reply: Option<CommandReply>) {
        let kind = command.kind();
        let in_flight = self.pending.as_ref().map(|p| p.kind);
        let request = match self
            .dispatcher
            .prepare(command, self.machine.state(), in_flight)
        {
            Ok(request) => request,
            Err(err) => {
                self.refuse(kind, err, reply);
                return;
            }
        };

        self.pending = Some(PendingCommand { kind, reply });
        self.apply(Signal::Dispatched);
        debug!(command = %kind, "dispatching start command");

        let api = Arc::clone(&self.api);
        let queue = self.queue.clone();
        tokio::spawn(async move {
            let result = api.submit(request).await.map(|accepted| {
                accepted
                    .message
                    .unwrap_or_else(|| "Operation started".to_string())
            });
            let _ = queue.send(ControllerEvent::CommandFinished { kind, result });
        });
    }

    fn stop(&mut self, reply: Option<CommandReply>) {
        if let Some(pending) = &self.pending {
            let err = ClientError::CommandPending(pending.kind);
            self.refuse(CommandKind::Stop, err, reply);
            return;
        }

        self.pending = Some(PendingCommand {
            kind: CommandKind::Stop,
            reply,
        });
        debug!("dispatching stop request");

        let api = Arc::clone(&self.api);
        let queue = self.queue.clone();
        tokio::spawn(async move {
            let result = api.stop().await.map(|res| {
                res.message
                    .unwrap_or_else(|| "Stop request received".to_string())
            });
            let _ = queue.send(ControllerEvent::CommandFinished {
                kind: CommandKind::Stop,
                result,
            });
        });
    }

    fn refuse(&mut self, kind: CommandKind, err: ClientError, reply: Option<CommandReply>) {
        debug!(command = %kind, error = %err, "command refused locally");
        self.report(&err);
        if let Some(reply) = reply {
            let _ = reply.send(Err(err));
        }
    }

    fn on_command_finished(&mut self, kind: CommandKind, result: Result<String, ClientError>) {
        let pending = match self.pending.take() {
            Some(pending) if pending.kind == kind => Some(pending),
            other => {
                warn!(command = %kind, "completion for a command that is not in flight");
                self.pending = other;
                None
            }
        };

        match (&result, kind.is_start()) {
            (Ok(message), true) => {
                self.apply(Signal::Accepted);
                self.append(LogEntry::info(message.clone()));
            }
            (Ok(message), false) => {
                self.append(LogEntry::warning(format!("Stop request sent: {message}")));
            }
            (Err(err), is_start) => {
                if is_start && err.voids_dispatch() {
                    self.apply(Signal::Rejected);
                }
                warn!(command = %kind, error = %err, "command failed");
                self.report(err);
            }
        }

        if let Some(pending) = pending {
            pending.settle(&result);
        }
    }

    fn on_health(&mut self, result: Result<HealthResponse, ClientError>) {
        match result {
            Ok(health) if health.is_ok() => {
                self.link.server = ServerHealth::Reachable;
                info!(version = ?health.version, "flashing service healthy");
                self.append(LogEntry::info("Server connection OK, ready to operate"));
            }
            Ok(health) => {
                self.link.server = ServerHealth::Unreachable;
                self.append(LogEntry::error(format!(
                    "Server health check reported '{}'",
                    health.status
                )));
            }
            Err(err) => {
                self.link.server = ServerHealth::Unreachable;
                self.report(&err);
            }
        }
    }

    fn on_push(&mut self, event: PushEvent) {
        match event {
            PushEvent::Connected { message } => self.append(LogEntry::info(message)),
            PushEvent::LogMessage { message, .. } => {
                let severity = classify_relay(&message);
                self.append(LogEntry::new(severity, message));
            }
            PushEvent::StatusUpdate {
                is_running,
                operation_type,
                ..
            } => {
                debug!(is_running, operation_type = ?operation_type, "push status update");
                self.apply(Signal::PushStatus { is_running });
            }
            PushEvent::OperationComplete { success, message } => {
                self.completions_seen += 1;
                if let Transition::Completed(_) = self.apply(Signal::PushComplete { success }) {
                    let entry = match (success, message) {
                        (true, Some(message)) => LogEntry::success(message),
                        (true, None) => LogEntry::success("Operation completed successfully"),
                        (false, Some(message)) => LogEntry::error(message),
                        (false, None) => LogEntry::error("Operation failed"),
                    };
                    self.append(entry);
                }
            }
        }
    }

    /// Poll unless push has confirmed the running operation and is still
    /// connected, a start request is in flight, or a poll is outstanding.
    fn should_poll(&self) -> bool {
        let push_covers = self.machine.state().push_confirmed() && self.link.push_connected;
        let start_in_flight = self.pending.as_ref().is_some_and(|p| p.kind.is_start());
        !push_covers && !start_in_flight && !self.poll_in_flight
    }

    fn on_poll_tick(&mut self) {
        if !self.should_poll() {
            return;
        }
        self.poll_in_flight = true;
        let completions = self.completions_seen;
        let api = Arc::clone(&self.api);
        let queue = self.queue.clone();
        tokio::spawn(async move {
            let result = api.status().await;
            let _ = queue.send(ControllerEvent::PollFinished {
                completions,
                result,
            });
        });
    }

    fn on_poll_finished(
        &mut self,
        completions: u64,
        result: Result<StatusResponse, ClientError>,
    ) {
        self.poll_in_flight = false;
        match result {
            Ok(status) => {
                self.link.server = ServerHealth::Reachable;
                if self.poll_failing {
                    self.poll_failing = false;
                    info!("status polling recovered");
                }
                if self.pending.as_ref().is_some_and(|p| p.kind.is_start()) {
                    debug!("discarding poll observation taken around a start request");
                    return;
                }
                if completions != self.completions_seen {
                    debug!(
                        is_running = status.is_running,
                        "discarding poll observation that predates a completion"
                    );
                    return;
                }
                debug!(
                    is_running = status.is_running,
                    operation_type = ?status.operation_type,
                    queue_size = ?status.queue_size,
                    "poll observation"
                );
                self.apply(Signal::PollStatus {
                    is_running: status.is_running,
                });
            }
            Err(err) => {
                self.link.server = ServerHealth::Unreachable;
                if self.poll_failing {
                    debug!(error = %err, "status polling still failing");
                } else {
                    self.poll_failing = true;
                    self.report(&err);
                }
            }
        }
    }

    fn apply(&mut self, signal: Signal) -> Transition {
        let transition = self.machine.apply(signal);
        match transition {
            Transition::Unchanged => {}
            Transition::Started(source) => {
                self.log.mark_operation_start();
                debug!(?signal, ?source, "operation started");
            }
            Transition::EndedUnknown => {
                warn!(?signal, "operation ended without a completion report");
                self.report(&ClientError::UnknownOutcome);
            }
            Transition::DuplicateCompletion => debug!("ignoring duplicate completion"),
            other => debug!(?signal, transition = ?other, "operation state changed"),
        }
        self.state_tx.send_replace(*self.machine.state());
        transition
    }

    fn report(&mut self, err: &ClientError) {
        self.append(LogEntry::new(err.severity(), err.to_string()));
    }

    fn append(&mut self, entry: LogEntry) {
        self.sink.append(&entry);
        self.log.push(entry);
    }

    fn render(&mut self) {
        let view = self.view();
        if self.last_view.as_ref() != Some(&view) {
            self.sink.present(&view);
            self.last_view = Some(view);
        }
    }
}

#[cfg(test)]
#[path = "tests/controller_tests.rs"]
mod tests;
