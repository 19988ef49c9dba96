use std::{
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex as StdMutex,
    },
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Multipart, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use shared::{
    domain::FlashRequest,
    protocol::{
        Capabilities, HealthResponse, PushEvent, StartAccepted, StatusResponse, StopResponse,
    },
};
use tokio::{
    net::TcpListener,
    sync::{broadcast, mpsc, Mutex},
    time::timeout,
};

use crate::{
    controller::{Controller, ControllerEvent},
    dispatcher::{Dispatcher, UserIntent},
    error::ClientError,
    presentation::RecordingSink,
    transport::FlasherApi,
};

pub(crate) const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// `FlasherApi` double that counts calls and answers from canned results.
#[derive(Default)]
pub(crate) struct RecordingApi {
    health_calls: AtomicUsize,
    submit_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    status_calls: AtomicUsize,
    status_running: AtomicBool,
    submit_error: StdMutex<Option<ClientError>>,
    status_error: StdMutex<Option<ClientError>>,
    submitted: StdMutex<Vec<FlashRequest>>,
}

impl RecordingApi {
    pub(crate) fn accepting() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn failing_submit(err: ClientError) -> Arc<Self> {
        let api = Self::default();
        *api.submit_error.lock().expect("lock") = Some(err);
        Arc::new(api)
    }

    pub(crate) fn set_status_running(&self, running: bool) {
        self.status_running.store(running, Ordering::SeqCst);
    }

    pub(crate) fn fail_status(&self, err: Option<ClientError>) {
        *self.status_error.lock().expect("lock") = err;
    }

    pub(crate) fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn submitted(&self) -> Vec<FlashRequest> {
        self.submitted.lock().expect("lock").clone()
    }
}

#[async_trait]
impl FlasherApi for RecordingApi {
    async fn health(&self) -> Result<HealthResponse, ClientError> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        Ok(HealthResponse {
            status: "ok".into(),
            timestamp: None,
            version: Some("1.0.0".into()),
        })
    }

    async fn status(&self) -> Result<StatusResponse, ClientError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.status_error.lock().expect("lock").clone() {
            return Err(err);
        }
        Ok(StatusResponse {
            is_running: self.status_running.load(Ordering::SeqCst),
            ..Default::default()
        })
    }

    async fn submit(&self, request: FlashRequest) -> Result<StartAccepted, ClientError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        self.submitted.lock().expect("lock").push(request);
        if let Some(err) = self.submit_error.lock().expect("lock").clone() {
            return Err(err);
        }
        Ok(StartAccepted {
            status: Some("started".into()),
            message: Some("Operation started, follow the live log".into()),
        })
    }

    async fn stop(&self) -> Result<StopResponse, ClientError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(StopResponse {
            message: Some("Stop request received".into()),
        })
    }

    async fn capabilities(&self) -> Result<Capabilities, ClientError> {
        Ok(Capabilities::default())
    }

    async fn server_logs(&self) -> Result<Vec<String>, ClientError> {
        Ok(Vec::new())
    }
}

/// A controller driven by hand: events are fed one at a time and request
/// results are pulled off the queue with [`Harness::settle`].
pub(crate) struct Harness {
    pub(crate) controller: Controller,
    pub(crate) events: mpsc::UnboundedReceiver<ControllerEvent>,
    pub(crate) api: Arc<RecordingApi>,
    pub(crate) sink: RecordingSink,
}

impl Harness {
    pub(crate) fn new(api: Arc<RecordingApi>) -> Self {
        let sink = RecordingSink::default();
        let (controller, events) = Controller::new(
            api.clone(),
            Dispatcher::default(),
            Box::new(sink.clone()),
        );
        Self {
            controller,
            events,
            api,
            sink,
        }
    }

    pub(crate) fn feed(&mut self, event: ControllerEvent) {
        let _ = self.controller.process(event);
    }

    pub(crate) fn intent(&mut self, intent: UserIntent) {
        self.feed(ControllerEvent::intent(intent));
    }

    pub(crate) fn push(&mut self, event: PushEvent) {
        self.feed(ControllerEvent::Push(event));
    }

    pub(crate) fn push_status(&mut self, is_running: bool) {
        self.push(PushEvent::StatusUpdate {
            is_running,
            start_time: None,
            operation_type: None,
        });
    }

    pub(crate) fn push_complete(&mut self, success: bool, message: Option<&str>) {
        self.push(PushEvent::OperationComplete {
            success,
            message: message.map(str::to_string),
        });
    }

    pub(crate) fn poll_result(&mut self, is_running: bool) {
        let completions = self.controller.completions_seen();
        self.poll_result_sent_at(completions, is_running);
    }

    /// Deliver a poll answer for a request sent after `completions` reports.
    pub(crate) fn poll_result_sent_at(&mut self, completions: u64, is_running: bool) {
        self.feed(ControllerEvent::PollFinished {
            completions,
            result: Ok(StatusResponse {
                is_running,
                ..Default::default()
            }),
        });
    }

    /// Process the next event a spawned request task puts on the queue.
    pub(crate) async fn settle(&mut self) {
        let event = timeout(RECV_TIMEOUT, self.events.recv())
            .await
            .expect("queued event")
            .expect("queue open");
        self.feed(event);
    }

    pub(crate) fn queue_is_empty(&mut self) -> bool {
        self.events.try_recv().is_err()
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct UploadCapture {
    pub(crate) fields: Vec<(String, String)>,
    pub(crate) file: Option<(String, Vec<u8>)>,
}

impl UploadCapture {
    pub(crate) fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// In-process stand-in for the flashing service.
#[derive(Clone)]
pub(crate) struct MockService {
    pub(crate) running: Arc<AtomicBool>,
    pub(crate) uploads: Arc<Mutex<Vec<UploadCapture>>>,
    pub(crate) client_frames: Arc<Mutex<Vec<String>>>,
    pub(crate) stops: Arc<AtomicUsize>,
    scripted: broadcast::Sender<Option<String>>,
}

impl MockService {
    fn new() -> Self {
        let (scripted, _) = broadcast::channel(64);
        Self {
            running: Arc::new(AtomicBool::new(false)),
            uploads: Arc::new(Mutex::new(Vec::new())),
            client_frames: Arc::new(Mutex::new(Vec::new())),
            stops: Arc::new(AtomicUsize::new(0)),
            scripted,
        }
    }

    /// Send a frame to every connected socket.
    pub(crate) fn push(&self, event: &PushEvent) {
        let _ = self.scripted.send(Some(event_frame(event)));
    }

    pub(crate) fn push_raw(&self, frame: &str) {
        let _ = self.scripted.send(Some(frame.to_string()));
    }

    /// Drop every connected socket without a close handshake.
    pub(crate) fn drop_sockets(&self) {
        let _ = self.scripted.send(None);
    }

    pub(crate) fn finish(&self, success: bool) {
        self.running.store(false, Ordering::SeqCst);
        self.push(&PushEvent::OperationComplete {
            success,
            message: Some(if success {
                "Operation completed successfully!".into()
            } else {
                "Operation failed!".into()
            }),
        });
    }
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": "2024-05-01T10:00:00.000001",
        "version": "1.0.0"
    }))
}

async fn status(State(service): State<MockService>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "is_running": service.running.load(Ordering::SeqCst),
        "start_time": null,
        "operation_type": null,
        "queue_size": 0
    }))
}

async fn upload(State(service): State<MockService>, mut multipart: Multipart) -> Response {
    let mut capture = UploadCapture::default();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let Ok(bytes) = field.bytes().await else {
            break;
        };
        match file_name {
            Some(file_name) => capture.file = Some((file_name, bytes.to_vec())),
            None => capture
                .fields
                .push((name, String::from_utf8_lossy(&bytes).into_owned())),
        }
    }
    service.uploads.lock().await.push(capture);

    if service.running.swap(true, Ordering::SeqCst) {
        return (
            StatusCode::CONFLICT,
            Json(serde_json::json!({ "error": "Another operation is already in progress" })),
        )
            .into_response();
    }
    Json(serde_json::json!({
        "status": "started",
        "message": "Operation started, follow the live log"
    }))
    .into_response()
}

async fn stop(State(service): State<MockService>) -> Json<serde_json::Value> {
    service.stops.fetch_add(1, Ordering::SeqCst);
    Json(serde_json::json!({ "message": "Stop request received" }))
}

async fn capabilities() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "supported_options": {
            "basic": ["part", "programmer", "port", "baud", "bitclock", "config_file"],
            "boolean": ["disable_auto_erase", "disable_verify", "verbose"],
            "advanced": ["extended_params", "memory_operations"]
        },
        "examples": {
            "erase_chip": "POST /upload with operation_only=true&erase_chip=true"
        },
        "supported_file_types": [".hex", ".bin"],
        "default_port": "/dev/ttyS7"
    }))
}

async fn logs() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "logs": ["first line\n", "second line\n"] }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(service): State<MockService>) -> Response {
    ws.on_upgrade(move |socket| ws_connection(service, socket))
}

/// Encode a pushed event the way Flask-SocketIO emits it.
pub(crate) fn event_frame(event: &PushEvent) -> String {
    let value = serde_json::to_value(event).expect("encode event");
    format!("42{}", serde_json::json!([value["type"], value["payload"]]))
}

async fn ws_connection(service: MockService, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let mut scripted = service.scripted.subscribe();
    let open = r#"0{"sid":"mock-engine","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
    if sender.send(WsMessage::Text(open.into())).await.is_err() {
        return;
    }

    // The client joins the default namespace before anything else.
    match receiver.next().await {
        Some(Ok(WsMessage::Text(text))) if text == "40" => {
            service.client_frames.lock().await.push(text);
        }
        _ => return,
    }
    let hello = event_frame(&PushEvent::Connected {
        message: "Connected to the flasher".into(),
    });
    for frame in [r#"40{"sid":"mock-socket"}"#.to_string(), hello, "2".to_string()] {
        if sender.send(WsMessage::Text(frame)).await.is_err() {
            return;
        }
    }

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    if text == r#"42["request_status"]"# {
                        let update = event_frame(&PushEvent::StatusUpdate {
                            is_running: service.running.load(Ordering::SeqCst),
                            start_time: None,
                            operation_type: None,
                        });
                        if sender.send(WsMessage::Text(update)).await.is_err() {
                            break;
                        }
                    }
                    service.client_frames.lock().await.push(text);
                }
                Some(Ok(_)) => {}
                _ => break,
            },
            outgoing = scripted.recv() => match outgoing {
                Ok(Some(frame)) => {
                    if sender.send(WsMessage::Text(frame)).await.is_err() {
                        break;
                    }
                }
                _ => break,
            },
        }
    }
}

pub(crate) async fn spawn_mock_service() -> Result<(String, MockService)> {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let service = MockService::new();
    let app = Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/upload", post(upload))
        .route("/stop", post(stop))
        .route("/capabilities", get(capabilities))
        .route("/logs", get(logs))
        .route("/socket.io/", get(ws_handler))
        .with_state(service.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((format!("http://{addr}"), service))
}

/// Receive the next queued event, failing the test after a timeout.
pub(crate) async fn next_event(
    events: &mut mpsc::UnboundedReceiver<ControllerEvent>,
) -> ControllerEvent {
    timeout(RECV_TIMEOUT, events.recv())
        .await
        .expect("event before timeout")
        .expect("queue open")
}
