//! Wires the controller to its adapters and runs them on the current runtime.

use std::{sync::Arc, time::Duration};

use shared::domain::{AvrdudeOptions, DeviceTarget};
use tokio::task::JoinHandle;
use tracing::info;

use crate::{
    controller::{Controller, ControllerHandle},
    dispatcher::Dispatcher,
    error::ClientError,
    presentation::PresentationSink,
    transport::{
        poll::{run_poll_ticker, DEFAULT_POLL_INTERVAL},
        push::{run_push_channel, socket_url},
        FlasherApi, HttpFlasherApi,
    },
};

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub server_url: String,
    pub poll_interval: Duration,
    pub reconnect_delay: Duration,
    pub target: DeviceTarget,
    pub options: AvrdudeOptions,
}

impl SessionConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            target: DeviceTarget::default(),
            options: AvrdudeOptions::default(),
        }
    }
}

/// A running controller plus its push and poll adapters.
pub struct Session {
    handle: ControllerHandle,
    api: Arc<dyn FlasherApi>,
    controller_task: JoinHandle<()>,
    adapters: Vec<JoinHandle<()>>,
}

impl Session {
    pub fn start(
        config: SessionConfig,
        sink: Box<dyn PresentationSink>,
    ) -> Result<Self, ClientError> {
        let api: Arc<dyn FlasherApi> = Arc::new(HttpFlasherApi::new(&config.server_url)?);
        let ws_url = socket_url(&config.server_url)?;
        Ok(Self::start_with_api(config, api, ws_url, sink))
    }

    pub fn start_with_api(
        config: SessionConfig,
        api: Arc<dyn FlasherApi>,
        ws_url: String,
        sink: Box<dyn PresentationSink>,
    ) -> Self {
        let dispatcher = Dispatcher::new(config.target, config.options);
        let (controller, events) = Controller::new(Arc::clone(&api), dispatcher, sink);
        let handle = controller.handle();

        controller.check_health();
        let adapters = vec![
            tokio::spawn(run_push_channel(
                ws_url,
                config.reconnect_delay,
                handle.clone(),
            )),
            tokio::spawn(run_poll_ticker(config.poll_interval, handle.clone())),
        ];
        let controller_task = tokio::spawn(controller.run(events));
        info!(server_url = %config.server_url, "flasher session started");

        Self {
            handle,
            api,
            controller_task,
            adapters,
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        self.handle.clone()
    }

    /// The request surface, for one-off queries outside the event queue.
    pub fn api(&self) -> Arc<dyn FlasherApi> {
        Arc::clone(&self.api)
    }

    pub async fn shutdown(self) {
        for adapter in &self.adapters {
            adapter.abort();
        }
        self.handle.shutdown();
        let _ = self.controller_task.await;
    }
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
