//! Operation state and the transition function that reconciles push and poll reports.
//!
//! Push events are authoritative the moment they arrive. Poll observations only
//! act when they disagree with the believed `running` value, and they can never
//! produce a success or failure verdict. A completion pushed after a stale poll
//! observation still sets the outcome.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Outcome {
    #[default]
    None,
    Success,
    Failure,
    /// The operation stopped running but no completion report arrived.
    Unknown,
}

impl Outcome {
    pub fn is_verdict(self) -> bool {
        matches!(self, Outcome::Success | Outcome::Failure)
    }
}

/// Which path last put the state into `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningSource {
    /// Local dispatch, not yet acknowledged by the service.
    Optimistic,
    /// Local dispatch acknowledged by the service.
    Accepted,
    Push,
    Poll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OperationState {
    running: bool,
    last_outcome: Outcome,
    source: Option<RunningSource>,
}

impl OperationState {
    pub fn running(&self) -> bool {
        self.running
    }

    pub fn last_outcome(&self) -> Outcome {
        self.last_outcome
    }

    pub fn source(&self) -> Option<RunningSource> {
        self.source
    }

    pub fn push_confirmed(&self) -> bool {
        self.running && self.source == Some(RunningSource::Push)
    }
}

/// Status-affecting inputs, in the order they arrive on the controller queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Dispatched,
    Accepted,
    Rejected,
    PushStatus { is_running: bool },
    PushComplete { success: bool },
    PollStatus { is_running: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Started(RunningSource),
    /// Already running; the recorded source was upgraded.
    Confirmed(RunningSource),
    Completed(Outcome),
    EndedUnknown,
    RolledBack,
    DuplicateCompletion,
}

#[derive(Debug, Default)]
pub struct OperationMachine {
    state: OperationState,
}

impl OperationMachine {
    pub fn state(&self) -> &OperationState {
        &self.state
    }

    pub fn apply(&mut self, signal: Signal) -> Transition {
        let running = self.state.running;
        let source = self.state.source;
        match signal {
            Signal::Dispatched if !running => self.start(RunningSource::Optimistic),
            Signal::Dispatched => Transition::Unchanged,

            Signal::Accepted if running => {
                if source == Some(RunningSource::Optimistic) {
                    self.state.source = Some(RunningSource::Accepted);
                    Transition::Confirmed(RunningSource::Accepted)
                } else {
                    Transition::Unchanged
                }
            }
            // The operation already concluded before the acknowledgement came back.
            Signal::Accepted if self.state.last_outcome.is_verdict() => Transition::Unchanged,
            Signal::Accepted => self.start(RunningSource::Accepted),

            Signal::Rejected if running && source == Some(RunningSource::Optimistic) => {
                self.state.running = false;
                self.state.source = None;
                Transition::RolledBack
            }
            Signal::Rejected => Transition::Unchanged,

            Signal::PushStatus { is_running: true } if !running => {
                self.start(RunningSource::Push)
            }
            Signal::PushStatus { is_running: true } if source != Some(RunningSource::Push) => {
                self.state.source = Some(RunningSource::Push);
                Transition::Confirmed(RunningSource::Push)
            }
            Signal::PushStatus { is_running: true } => Transition::Unchanged,
            // The service has not seen the dispatched request yet.
            Signal::PushStatus { is_running: false }
                if source == Some(RunningSource::Optimistic) =>
            {
                Transition::Unchanged
            }
            Signal::PushStatus { is_running: false } if running => self.end_unknown(),
            Signal::PushStatus { is_running: false } => Transition::Unchanged,

            Signal::PushComplete { .. } if !running && self.state.last_outcome.is_verdict() => {
                Transition::DuplicateCompletion
            }
            Signal::PushComplete { success } => {
                let outcome = if success {
                    Outcome::Success
                } else {
                    Outcome::Failure
                };
                self.state.running = false;
                self.state.source = None;
                self.state.last_outcome = outcome;
                Transition::Completed(outcome)
            }

            Signal::PollStatus { is_running: true } if !running => {
                self.start(RunningSource::Poll)
            }
            Signal::PollStatus { is_running: false } if running => self.end_unknown(),
            Signal::PollStatus { .. } => Transition::Unchanged,
        }
    }

    fn start(&mut self, source: RunningSource) -> Transition {
        self.state = OperationState {
            running: true,
            last_outcome: Outcome::None,
            source: Some(source),
        };
        Transition::Started(source)
    }

    fn end_unknown(&mut self) -> Transition {
        self.state.running = false;
        self.state.source = None;
        self.state.last_outcome = Outcome::Unknown;
        Transition::EndedUnknown
    }
}

#[cfg(test)]
#[path = "tests/machine_tests.rs"]
mod tests;
