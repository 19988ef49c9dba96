//! Client core for driving a remote flashing service.
//!
//! Operation status reaches the client over two unreliable channels: a push
//! socket and a periodic status poll. The [`controller::Controller`] serializes
//! both, together with user intents, onto one queue and keeps the only copy of
//! the [`machine::OperationState`].

pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod log;
pub mod machine;
pub mod presentation;
pub mod session;
pub mod transport;

pub use controller::{Controller, ControllerEvent, ControllerHandle};
pub use dispatcher::{
    CommandKind, Dispatcher, FirmwareFile, FuseValues, StartCommand, UploadSource, UserIntent,
};
pub use error::ClientError;
pub use log::{ActivityLog, LogEntry, Severity};
pub use machine::{OperationState, Outcome};
pub use presentation::{PresentationSink, View};
pub use session::{Session, SessionConfig};
pub use transport::{FlasherApi, HttpFlasherApi};

#[cfg(test)]
#[path = "tests/support.rs"]
mod test_support;
