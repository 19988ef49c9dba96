//! The user-facing activity log.

use std::fmt;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEntry {
    pub text: String,
    pub severity: Severity,
}

impl LogEntry {
    pub fn new(severity: Severity, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            severity,
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(Severity::Info, text)
    }

    pub fn success(text: impl Into<String>) -> Self {
        Self::new(Severity::Success, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(Severity::Warning, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(Severity::Error, text)
    }
}

/// Append-only, chronological log. Only an explicit clear drops entries.
#[derive(Debug, Clone, Default)]
pub struct ActivityLog {
    entries: Vec<LogEntry>,
    operation_start: usize,
}

impl ActivityLog {
    pub fn push(&mut self, entry: LogEntry) {
        self.entries.push(entry);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.operation_start = 0;
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remember where the current operation's output begins.
    pub fn mark_operation_start(&mut self) {
        self.operation_start = self.entries.len();
    }

    /// Entries appended since the last operation started.
    pub fn current_operation(&self) -> &[LogEntry] {
        &self.entries[self.operation_start.min(self.entries.len())..]
    }
}

const ERROR_MARKERS: [&str; 6] = ["error", "failed", "fail:", "失败", "错误", "异常"];
const WARNING_MARKERS: [&str; 2] = ["warning", "警告"];

/// Severity for a line relayed verbatim from the service.
///
/// Never returns `Success`: only the completion event may claim success.
pub fn classify_relay(line: &str) -> Severity {
    let lower = line.to_lowercase();
    if ERROR_MARKERS.iter().any(|marker| lower.contains(marker)) {
        Severity::Error
    } else if WARNING_MARKERS.iter().any(|marker| lower.contains(marker)) {
        Severity::Warning
    } else {
        Severity::Info
    }
}

#[cfg(test)]
#[path = "tests/log_tests.rs"]
mod tests;
