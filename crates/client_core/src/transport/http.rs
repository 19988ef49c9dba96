use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client, Response,
};
use serde::de::DeserializeOwned;
use shared::{
    domain::FlashRequest,
    error::{ApiError, ErrorBody},
    protocol::{
        Capabilities, HealthResponse, LogsResponse, StartAccepted, StatusResponse, StopResponse,
    },
};
use tracing::debug;

use super::FlasherApi;
use crate::error::ClientError;

/// `FlasherApi` over the service's HTTP endpoints.
#[derive(Clone)]
pub struct HttpFlasherApi {
    http: Client,
    server_url: String,
}

impl HttpFlasherApi {
    pub fn new(server_url: impl Into<String>) -> Result<Self, ClientError> {
        let server_url = server_url.into().trim_end_matches('/').to_string();
        if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
            return Err(ClientError::validation(
                "server_url must start with http:// or https://",
            ));
        }
        Ok(Self {
            http: Client::new(),
            server_url,
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let res = self
            .http
            .get(format!("{}{path}", self.server_url))
            .send()
            .await?;
        decode(res).await
    }
}

async fn decode<T: DeserializeOwned>(res: Response) -> Result<T, ClientError> {
    let status = res.status();
    if !status.is_success() {
        let message = match res.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string(),
        };
        return Err(ApiError::from_status(status.as_u16(), message).into());
    }
    res.json::<T>()
        .await
        .map_err(|err| ApiError::malformed(Some(status.as_u16()), err).into())
}

fn upload_form(request: &FlashRequest) -> Form {
    let mut form = Form::new();
    for (name, value) in request.form_fields() {
        form = form.text(name, value);
    }
    if let Some((file_name, bytes)) = request.file_part() {
        form = form.part(
            "hex_file",
            Part::bytes(bytes.to_vec()).file_name(file_name.to_string()),
        );
    }
    form
}

#[async_trait]
impl FlasherApi for HttpFlasherApi {
    async fn health(&self) -> Result<HealthResponse, ClientError> {
        self.get("/health").await
    }

    async fn status(&self) -> Result<StatusResponse, ClientError> {
        self.get("/status").await
    }

    async fn submit(&self, request: FlashRequest) -> Result<StartAccepted, ClientError> {
        debug!(port = %request.target.port, part = %request.target.part, "submitting flash request");
        let res = self
            .http
            .post(format!("{}/upload", self.server_url))
            .multipart(upload_form(&request))
            .send()
            .await?;
        decode(res).await
    }

    async fn stop(&self) -> Result<StopResponse, ClientError> {
        let res = self
            .http
            .post(format!("{}/stop", self.server_url))
            .send()
            .await?;
        decode(res).await
    }

    async fn capabilities(&self) -> Result<Capabilities, ClientError> {
        self.get("/capabilities").await
    }

    async fn server_logs(&self) -> Result<Vec<String>, ClientError> {
        let body: LogsResponse = self.get("/logs").await?;
        Ok(body.logs)
    }
}

#[cfg(test)]
#[path = "../tests/http_tests.rs"]
mod tests;
