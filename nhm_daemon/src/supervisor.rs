//! HTTP client for the unit supervisor.
//!
//! The subscription registers this daemon's `/supervisor/events` route as
//! callback; the supervisor pushes `UnitNew` / `UnitRemoved` /
//! `PropertiesChanged` events there, and the observer re-reads unit state
//! through this client.

use async_trait::async_trait;
use nhm_core::error::{NhmError, NhmResult};
use nhm_core::observer::{UnitListing, UnitSupervisor, WatchId};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize)]
struct SubscribeRequest<'a> {
    callback: &'a str,
}

#[derive(Debug, Serialize)]
struct WatchRequest<'a> {
    path: &'a str,
    callback: &'a str,
}

#[derive(Debug, Deserialize)]
struct WatchReply {
    watch_id: WatchId,
}

#[derive(Debug, Deserialize)]
struct UnitStateReply {
    active_state: String,
}

pub struct HttpUnitSupervisor {
    base: String,
    callback: String,
    client: reqwest::Client,
}

impl HttpUnitSupervisor {
    pub fn new(endpoint: &str, external_addr: &str) -> NhmResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|err| NhmError::transport(err.to_string()))?;
        Ok(Self {
            base: endpoint.trim_end_matches('/').to_string(),
            callback: format!("{}/supervisor/events", external_addr.trim_end_matches('/')),
            client,
        })
    }

    fn url(&self, route: &str) -> String {
        format!("{}{}", self.base, route)
    }
}

fn transport(err: reqwest::Error) -> NhmError {
    NhmError::transport(err.to_string())
}

#[async_trait]
impl UnitSupervisor for HttpUnitSupervisor {
    async fn subscribe(&mut self) -> NhmResult<()> {
        self.client
            .post(self.url("/subscribe"))
            .json(&SubscribeRequest { callback: &self.callback })
            .send()
            .await
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?;
        Ok(())
    }

    async fn unsubscribe(&mut self) -> NhmResult<()> {
        self.client
            .post(self.url("/unsubscribe"))
            .json(&SubscribeRequest { callback: &self.callback })
            .send()
            .await
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?;
        Ok(())
    }

    async fn list_units(&mut self) -> NhmResult<Vec<UnitListing>> {
        self.client
            .get(self.url("/units"))
            .send()
            .await
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?
            .json()
            .await
            .map_err(transport)
    }

    async fn active_state(&mut self, path: &str) -> NhmResult<String> {
        let reply: UnitStateReply = self
            .client
            .get(self.url("/unit"))
            .query(&[("path", path)])
            .send()
            .await
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?
            .json()
            .await
            .map_err(transport)?;
        Ok(reply.active_state)
    }

    async fn watch_unit(&mut self, path: &str) -> NhmResult<WatchId> {
        let reply: WatchReply = self
            .client
            .post(self.url("/watches"))
            .json(&WatchRequest { path, callback: &self.callback })
            .send()
            .await
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?
            .json()
            .await
            .map_err(transport)?;
        Ok(reply.watch_id)
    }

    async fn unwatch(&mut self, watch: WatchId) -> NhmResult<()> {
        self.client
            .delete(self.url(&format!("/watches/{watch}")))
            .send()
            .await
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?;
        Ok(())
    }
}
