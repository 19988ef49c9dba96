//! Turns user intents into outbound requests, gated on the operation state.

use std::fmt;

use shared::domain::{
    has_firmware_extension, AvrdudeOptions, DeviceTarget, FlashAction, FlashRequest, Fuse,
    MemoryOperation,
};
use url::Url;

use crate::{error::ClientError, machine::OperationState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    Upload,
    Erase,
    ReadFuses,
    WriteFuses,
    Stop,
}

impl CommandKind {
    pub fn is_start(self) -> bool {
        self != CommandKind::Stop
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CommandKind::Upload => "upload",
            CommandKind::Erase => "erase",
            CommandKind::ReadFuses => "read-fuses",
            CommandKind::WriteFuses => "write-fuses",
            CommandKind::Stop => "stop",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// Where the firmware image comes from. Exactly one field must be set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadSource {
    pub file: Option<FirmwareFile>,
    pub url: Option<String>,
}

impl UploadSource {
    pub fn file(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file: Some(FirmwareFile {
                file_name: file_name.into(),
                bytes,
            }),
            url: None,
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self {
            file: None,
            url: Some(url.into()),
        }
    }
}

/// Fuse bytes to write, as typed by the user (`0xFF`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FuseValues {
    pub low: Option<String>,
    pub high: Option<String>,
    pub extended: Option<String>,
}

impl FuseValues {
    fn entries(&self) -> [(Fuse, Option<&str>); 3] {
        [
            (Fuse::Low, self.low.as_deref()),
            (Fuse::High, self.high.as_deref()),
            (Fuse::Extended, self.extended.as_deref()),
        ]
    }

    pub fn set(&mut self, fuse: Fuse, value: impl Into<String>) {
        let slot = match fuse {
            Fuse::Low => &mut self.low,
            Fuse::High => &mut self.high,
            Fuse::Extended => &mut self.extended,
        };
        *slot = Some(value.into());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartCommand {
    Upload(UploadSource),
    Erase,
    ReadFuses,
    WriteFuses(FuseValues),
}

impl StartCommand {
    pub fn kind(&self) -> CommandKind {
        match self {
            StartCommand::Upload(_) => CommandKind::Upload,
            StartCommand::Erase => CommandKind::Erase,
            StartCommand::ReadFuses => CommandKind::ReadFuses,
            StartCommand::WriteFuses(_) => CommandKind::WriteFuses,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserIntent {
    Start(StartCommand),
    Stop,
    ClearLog,
}

/// Builds requests from the configured device parameters.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    target: DeviceTarget,
    options: AvrdudeOptions,
}

impl Dispatcher {
    pub fn new(target: DeviceTarget, options: AvrdudeOptions) -> Self {
        Self { target, options }
    }

    pub fn target(&self) -> &DeviceTarget {
        &self.target
    }

    /// Checks gating and input, returning the request to send.
    ///
    /// Never touches the state: refusal and validation failures are reported
    /// by the caller and nothing goes on the wire.
    pub fn prepare(
        &self,
        command: StartCommand,
        state: &OperationState,
        in_flight: Option<CommandKind>,
    ) -> Result<FlashRequest, ClientError> {
        if state.running() || in_flight.is_some() {
            return Err(ClientError::AlreadyRunning);
        }
        if self.target.port.trim().is_empty() {
            return Err(ClientError::validation("a serial port is required"));
        }

        let action = match command {
            StartCommand::Upload(source) => upload_action(source)?,
            StartCommand::Erase => FlashAction::EraseChip,
            StartCommand::ReadFuses => FlashAction::Memory(
                Fuse::ALL
                    .into_iter()
                    .map(MemoryOperation::read_fuse)
                    .collect(),
            ),
            StartCommand::WriteFuses(values) => FlashAction::Memory(fuse_writes(&values)?),
        };

        Ok(FlashRequest {
            target: self.target.clone(),
            options: self.options.clone(),
            action,
        })
    }
}

fn upload_action(source: UploadSource) -> Result<FlashAction, ClientError> {
    let url = source
        .url
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty());

    match (source.file, url) {
        (None, None) => Err(ClientError::validation(
            "select a firmware file or enter a firmware URL",
        )),
        (Some(_), Some(_)) => Err(ClientError::validation(
            "provide either a firmware file or a firmware URL, not both",
        )),
        (Some(file), None) => {
            if file.file_name.trim().is_empty() {
                return Err(ClientError::validation("firmware file has no name"));
            }
            if !has_firmware_extension(&file.file_name) {
                return Err(ClientError::validation(format!(
                    "unsupported firmware file '{}': only .hex and .bin are accepted",
                    file.file_name
                )));
            }
            Ok(FlashAction::UploadFile {
                file_name: file.file_name,
                bytes: file.bytes,
            })
        }
        (None, Some(url)) => {
            let parsed = Url::parse(&url).map_err(|err| {
                ClientError::validation(format!("invalid firmware URL '{url}': {err}"))
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ClientError::validation(format!(
                    "firmware URL must use http or https, got '{}'",
                    parsed.scheme()
                )));
            }
            Ok(FlashAction::UploadUrl(url))
        }
    }
}

fn fuse_writes(values: &FuseValues) -> Result<Vec<MemoryOperation>, ClientError> {
    let mut operations = Vec::new();
    for (fuse, raw) in values.entries() {
        let Some(raw) = raw else { continue };
        let value = parse_fuse_byte(raw).ok_or_else(|| {
            ClientError::validation(format!(
                "invalid {} value '{raw}': expected a hex byte such as 0xFF",
                fuse.memory_name()
            ))
        })?;
        operations.push(MemoryOperation::write_fuse(fuse, value));
    }
    if operations.is_empty() {
        return Err(ClientError::validation("no fuse values to write"));
    }
    Ok(operations)
}

fn parse_fuse_byte(raw: &str) -> Option<u8> {
    let raw = raw.trim();
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))?;
    if digits.is_empty() || digits.len() > 2 {
        return None;
    }
    u8::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
#[path = "tests/dispatcher_tests.rs"]
mod tests;
