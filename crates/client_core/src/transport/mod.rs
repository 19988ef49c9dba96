//! Adapters to the flashing service: request/response calls, the Socket.IO
//! push socket and the poll ticker.

use async_trait::async_trait;
use shared::{
    domain::FlashRequest,
    protocol::{Capabilities, HealthResponse, StartAccepted, StatusResponse, StopResponse},
};

use crate::error::ClientError;

mod http;
pub mod poll;
pub mod push;
mod socketio;

pub use http::HttpFlasherApi;

#[async_trait]
pub trait FlasherApi: Send + Sync {
    async fn health(&self) -> Result<HealthResponse, ClientError>;
    async fn status(&self) -> Result<StatusResponse, ClientError>;
    async fn submit(&self, request: FlashRequest) -> Result<StartAccepted, ClientError>;
    async fn stop(&self) -> Result<StopResponse, ClientError>;
    async fn capabilities(&self) -> Result<Capabilities, ClientError>;
    async fn server_logs(&self) -> Result<Vec<String>, ClientError>;
}

pub struct MissingFlasherApi;

#[async_trait]
impl FlasherApi for MissingFlasherApi {
    async fn health(&self) -> Result<HealthResponse, ClientError> {
        Err(unavailable())
    }

    async fn status(&self) -> Result<StatusResponse, ClientError> {
        Err(unavailable())
    }

    async fn submit(&self, _request: FlashRequest) -> Result<StartAccepted, ClientError> {
        Err(unavailable())
    }

    async fn stop(&self) -> Result<StopResponse, ClientError> {
        Err(unavailable())
    }

    async fn capabilities(&self) -> Result<Capabilities, ClientError> {
        Err(unavailable())
    }

    async fn server_logs(&self) -> Result<Vec<String>, ClientError> {
        Err(unavailable())
    }
}

fn unavailable() -> ClientError {
    ClientError::Unreachable("no flashing service configured".into())
}
