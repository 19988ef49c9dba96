//! Pure projection of the operation state and activity log into what a front
//! end shows. Holds no state of its own.

use std::sync::{Arc, Mutex};

use crate::{
    log::{ActivityLog, LogEntry},
    machine::{OperationState, Outcome},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerHealth {
    #[default]
    Unknown,
    Reachable,
    Unreachable,
}

/// Connectivity as last observed by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinkStatus {
    pub server: ServerHealth,
    pub push_connected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Ready,
    Busy,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Controls {
    pub upload: bool,
    pub erase: bool,
    pub read_fuses: bool,
    pub write_fuses: bool,
    pub stop: bool,
}

impl Controls {
    fn for_running(running: bool) -> Self {
        Self {
            upload: !running,
            erase: !running,
            read_fuses: !running,
            write_fuses: !running,
            stop: running,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct View {
    pub label: &'static str,
    pub description: &'static str,
    pub tone: Tone,
    /// Rough percentage; not authoritative.
    pub progress: u8,
    pub controls: Controls,
    pub push_connected: bool,
}

pub fn project(state: &OperationState, log: &ActivityLog, link: LinkStatus) -> View {
    let (label, description, tone) = if state.running() {
        ("Operation in progress", "Running operation...", Tone::Busy)
    } else {
        match state.last_outcome() {
            Outcome::Success => (
                "Operation completed",
                "Operation finished successfully",
                Tone::Success,
            ),
            Outcome::Failure => ("Operation failed", "Operation failed", Tone::Error),
            Outcome::Unknown => (
                "Operation ended",
                "No completion report received; outcome unknown",
                Tone::Warning,
            ),
            Outcome::None => match link.server {
                ServerHealth::Unknown => ("Connecting", "Waiting for the server", Tone::Ready),
                ServerHealth::Reachable => ("Ready", "Waiting for an operation", Tone::Ready),
                ServerHealth::Unreachable => {
                    ("Server unreachable", "Cannot reach the server", Tone::Error)
                }
            },
        }
    };

    let progress = if state.running() {
        estimate_progress(log.current_operation())
    } else if state.last_outcome() == Outcome::Success {
        100
    } else {
        0
    };

    View {
        label,
        description,
        tone,
        progress,
        controls: Controls::for_running(state.running()),
        push_connected: link.push_connected,
    }
}

const PHASES: [(&[&str], u8); 4] = [
    (&["writing", "写入"], 60),
    (&["reading", "读取"], 80),
    (&["verifying", "验证"], 90),
    (&["成功", "完成", "success", "complete", "done"], 100),
];

fn phase_of(text: &str) -> Option<u8> {
    let lower = text.to_lowercase();
    PHASES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|keyword| lower.contains(keyword)))
        .map(|(_, percent)| *percent)
}

/// Progress from the most recent log line that names a phase.
pub fn estimate_progress(entries: &[LogEntry]) -> u8 {
    entries
        .iter()
        .rev()
        .find_map(|entry| phase_of(&entry.text))
        .unwrap_or(0)
}

pub trait PresentationSink: Send {
    fn present(&mut self, view: &View);
    fn append(&mut self, entry: &LogEntry);
    fn cleared(&mut self) {}
}

pub struct NullSink;

impl PresentationSink for NullSink {
    fn present(&mut self, _view: &View) {}
    fn append(&mut self, _entry: &LogEntry) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    View(View),
    Entry(LogEntry),
    Cleared,
}

/// Sink that keeps everything it was given, for replaying recorded sessions.
#[derive(Clone, Default)]
pub struct RecordingSink {
    rendered: Arc<Mutex<Vec<Rendered>>>,
}

impl RecordingSink {
    pub fn rendered(&self) -> Vec<Rendered> {
        self.rendered
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }

    pub fn views(&self) -> Vec<View> {
        self.rendered()
            .into_iter()
            .filter_map(|item| match item {
                Rendered::View(view) => Some(view),
                _ => None,
            })
            .collect()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.rendered()
            .into_iter()
            .filter_map(|item| match item {
                Rendered::Entry(entry) => Some(entry),
                _ => None,
            })
            .collect()
    }

    fn record(&self, item: Rendered) {
        if let Ok(mut guard) = self.rendered.lock() {
            guard.push(item);
        }
    }
}

impl PresentationSink for RecordingSink {
    fn present(&mut self, view: &View) {
        self.record(Rendered::View(view.clone()));
    }

    fn append(&mut self, entry: &LogEntry) {
        self.record(Rendered::Entry(entry.clone()));
    }

    fn cleared(&mut self) {
        self.record(Rendered::Cleared);
    }
}

#[cfg(test)]
#[path = "tests/presentation_tests.rs"]
mod tests;
