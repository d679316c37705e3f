//! HTTP client for the Node State Manager.

use async_trait::async_trait;
use nhm_core::error::{NhmError, NhmResult};
use nhm_core::nsm::{NodeStateManager, NsmErrorStatus, RestartReason};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reply envelope shared by all NSM operations.
#[derive(Debug, Deserialize)]
struct ErrorReply {
    error: i32,
}

#[derive(Debug, Serialize)]
struct RegisterShutdownClientRequest<'a> {
    client_addr: &'a str,
    object_path: &'a str,
    shutdown_mode: u32,
    timeout_ms: u32,
}

#[derive(Debug, Serialize)]
struct SetAppHealthStatusRequest<'a> {
    app_name: &'a str,
    running: bool,
}

#[derive(Debug, Serialize)]
struct RequestNodeRestartRequest {
    reason: i32,
    restart_type: u32,
}

pub struct HttpNodeStateManager {
    base: String,
    client: reqwest::Client,
}

impl HttpNodeStateManager {
    pub fn new(endpoint: &str) -> NhmResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|err| NhmError::transport(err.to_string()))?;
        Ok(Self {
            base: endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }

    async fn post<T: Serialize>(&self, route: &str, body: &T) -> NhmResult<NsmErrorStatus> {
        let url = format!("{}{}", self.base, route);
        let reply: ErrorReply = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|err| NhmError::transport(err.to_string()))?
            .error_for_status()
            .map_err(|err| NhmError::transport(err.to_string()))?
            .json()
            .await
            .map_err(|err| NhmError::transport(err.to_string()))?;
        Ok(NsmErrorStatus::from_code(reply.error))
    }
}

#[async_trait]
impl NodeStateManager for HttpNodeStateManager {
    async fn register_shutdown_client(
        &mut self,
        client_addr: &str,
        object_path: &str,
        shutdown_mode: u32,
        timeout_ms: u32,
    ) -> NhmResult<NsmErrorStatus> {
        self.post(
            "/shutdown_clients",
            &RegisterShutdownClientRequest {
                client_addr,
                object_path,
                shutdown_mode,
                timeout_ms,
            },
        )
        .await
    }

    async fn set_app_health_status(
        &mut self,
        app_name: &str,
        running: bool,
    ) -> NhmResult<NsmErrorStatus> {
        self.post("/app_health", &SetAppHealthStatusRequest { app_name, running })
            .await
    }

    async fn request_node_restart(
        &mut self,
        reason: RestartReason,
        restart_type: u32,
    ) -> NhmResult<NsmErrorStatus> {
        self.post(
            "/restart_requests",
            &RequestNodeRestartRequest {
                reason: reason.code(),
                restart_type,
            },
        )
        .await
    }
}
