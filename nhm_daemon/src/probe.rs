//! HTTP endpoint probe for the user-land prober.
//!
//! Each monitored endpoint is expected to answer `GET {addr}/id` with its
//! identity. The client behind a probe is created once and kept for the
//! prober's lifetime, so connections are reused across ticks.

use async_trait::async_trait;
use nhm_core::error::{NhmError, NhmResult};
use nhm_core::prober::{EndpointDialer, EndpointProbe};
use std::time::Duration;

pub struct HttpEndpointDialer;

struct HttpEndpointProbe {
    id_url: String,
    client: reqwest::Client,
}

#[async_trait]
impl EndpointDialer for HttpEndpointDialer {
    async fn dial(&self, addr: &str) -> NhmResult<Box<dyn EndpointProbe>> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|err| NhmError::transport(err.to_string()))?;
        Ok(Box::new(HttpEndpointProbe {
            id_url: format!("{}/id", addr.trim_end_matches('/')),
            client,
        }))
    }
}

#[async_trait]
impl EndpointProbe for HttpEndpointProbe {
    async fn get_id(&mut self) -> NhmResult<String> {
        self.client
            .get(&self.id_url)
            .send()
            .await
            .map_err(|err| NhmError::transport(err.to_string()))?
            .error_for_status()
            .map_err(|err| NhmError::transport(err.to_string()))?
            .text()
            .await
            .map_err(|err| NhmError::transport(err.to_string()))
    }
}
