use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: &str = "/dev/ttyS7";
pub const DEFAULT_PART: &str = "atmega328p";
pub const DEFAULT_PROGRAMMER: &str = "arduino";
pub const DEFAULT_BAUD: u32 = 115_200;

/// Firmware file extensions accepted by the flashing service.
pub const FIRMWARE_EXTENSIONS: [&str; 2] = [".hex", ".bin"];

/// Serial port, chip and programmer the service should drive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTarget {
    pub port: String,
    pub part: String,
    pub programmer: String,
    pub baud: u32,
    #[serde(default)]
    pub verbose: bool,
}

impl Default for DeviceTarget {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.into(),
            part: DEFAULT_PART.into(),
            programmer: DEFAULT_PROGRAMMER.into(),
            baud: DEFAULT_BAUD,
            verbose: false,
        }
    }
}

/// Less common avrdude switches forwarded verbatim to the service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvrdudeOptions {
    #[serde(default)]
    pub disable_auto_erase: bool,
    #[serde(default)]
    pub disable_verify: bool,
    #[serde(default)]
    pub extra_verbose: bool,
    #[serde(default)]
    pub quiet: bool,
    #[serde(default)]
    pub force: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitclock: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_file: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extended_params: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fuse {
    Low,
    High,
    Extended,
}

impl Fuse {
    pub const ALL: [Fuse; 3] = [Fuse::Low, Fuse::High, Fuse::Extended];

    /// avrdude memory name for this fuse.
    pub fn memory_name(self) -> &'static str {
        match self {
            Fuse::Low => "lfuse",
            Fuse::High => "hfuse",
            Fuse::Extended => "efuse",
        }
    }

    pub fn from_memory_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|fuse| fuse.memory_name().eq_ignore_ascii_case(name))
    }
}

/// A single `-U memtype:op:filename:format` directive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryOperation(pub String);

impl MemoryOperation {
    pub fn read_fuse(fuse: Fuse) -> Self {
        Self(format!("{}:r:-:h", fuse.memory_name()))
    }

    pub fn write_fuse(fuse: Fuse, value: u8) -> Self {
        Self(format!("{}:w:0x{value:02X}:m", fuse.memory_name()))
    }
}

impl fmt::Display for MemoryOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What the service should do once the device is in its bootloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlashAction {
    UploadFile { file_name: String, bytes: Vec<u8> },
    UploadUrl(String),
    EraseChip,
    Memory(Vec<MemoryOperation>),
}

/// Everything the `/upload` endpoint receives for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashRequest {
    pub target: DeviceTarget,
    pub options: AvrdudeOptions,
    pub action: FlashAction,
}

impl FlashRequest {
    /// Text fields of the multipart form, in submission order.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![
            ("port", self.target.port.clone()),
            ("part", self.target.part.clone()),
            ("programmer", self.target.programmer.clone()),
            ("baud", self.target.baud.to_string()),
        ];
        if self.target.verbose {
            fields.push(("verbose", "true".into()));
        }

        let flags = [
            ("disable_auto_erase", self.options.disable_auto_erase),
            ("disable_verify", self.options.disable_verify),
            ("extra_verbose", self.options.extra_verbose),
            ("quiet", self.options.quiet),
            ("force", self.options.force),
        ];
        for (name, enabled) in flags {
            if enabled {
                fields.push((name, "true".into()));
            }
        }
        if let Some(bitclock) = &self.options.bitclock {
            fields.push(("bitclock", bitclock.clone()));
        }
        if let Some(config_file) = &self.options.config_file {
            fields.push(("config_file", config_file.clone()));
        }
        if !self.options.extended_params.is_empty() {
            fields.push(("extended_params", self.options.extended_params.join(",")));
        }

        match &self.action {
            FlashAction::UploadFile { .. } => {}
            FlashAction::UploadUrl(url) => fields.push(("hex_url", url.clone())),
            FlashAction::EraseChip => {
                fields.push(("operation_only", "true".into()));
                fields.push(("erase_chip", "true".into()));
            }
            FlashAction::Memory(operations) => {
                let joined = operations
                    .iter()
                    .map(|op| op.0.as_str())
                    .collect::<Vec<_>>()
                    .join(",");
                fields.push(("operation_only", "true".into()));
                fields.push(("memory_operations", joined));
            }
        }
        fields
    }

    /// The `hex_file` part, when uploading local bytes.
    pub fn file_part(&self) -> Option<(&str, &[u8])> {
        match &self.action {
            FlashAction::UploadFile { file_name, bytes } => Some((file_name, bytes)),
            _ => None,
        }
    }
}

pub fn has_firmware_extension(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    FIRMWARE_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}
