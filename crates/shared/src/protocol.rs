use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl HealthResponse {
    pub fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok")
    }
}

/// Body of `GET /status`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusResponse {
    pub is_running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_size: Option<u64>,
}

/// Acknowledgement of an accepted `/upload` submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartAccepted {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsResponse {
    #[serde(default)]
    pub logs: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupportedOptions {
    #[serde(default)]
    pub basic: Vec<String>,
    #[serde(default)]
    pub boolean: Vec<String>,
    #[serde(default)]
    pub advanced: Vec<String>,
}

/// Body of `GET /capabilities`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Capabilities {
    #[serde(default)]
    pub supported_options: SupportedOptions,
    #[serde(default)]
    pub examples: BTreeMap<String, String>,
    #[serde(default)]
    pub supported_file_types: Vec<String>,
    #[serde(default)]
    pub default_port: Option<String>,
}

/// Named Socket.IO events pushed by the service. `type` is the event name and
/// `payload` its single argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum PushEvent {
    Connected {
        message: String,
    },
    LogMessage {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        raw_message: Option<String>,
    },
    StatusUpdate {
        is_running: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start_time: Option<NaiveDateTime>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        operation_type: Option<String>,
    },
    OperationComplete {
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

/// Socket.IO events the client may emit; `type` is the event name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    RequestStatus,
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
