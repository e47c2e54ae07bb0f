//! Messaging gateway collaborator.
//!
//! The bot process that actually talks to Telegram lives outside the engine;
//! this module speaks to it over a small internal HTTP API. A timeout or
//! transport failure is `GatewayUnavailable` — unknown, retried, never
//! interpreted as "post missing".

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Snapshot of a published post as the gateway currently sees it.
#[derive(Debug, Clone, Deserialize)]
pub struct PostSnapshot {
    pub exists: bool,
    #[serde(default)]
    pub content: Option<String>,
}

/// Narrow messaging interface the engine depends on.
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Publish content to a channel; returns the gateway's post reference.
    async fn publish_post(&self, channel_id: &str, content: &str) -> Result<String, EngineError>;

    /// Fetch the current state of a previously published post.
    async fn get_post(&self, channel_id: &str, post_ref: &str)
        -> Result<PostSnapshot, EngineError>;

    /// Send a direct message to a user. Best-effort notification path.
    async fn send_message(&self, user_id: &str, text: &str) -> Result<(), EngineError>;
}

/// HTTP client for the bot gateway service.
pub struct BotGateway {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct PublishRequest<'a> {
    channel_id: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct PublishResponse {
    post_ref: String,
}

#[derive(Serialize)]
struct SendMessageRequest<'a> {
    user_id: &'a str,
    text: &'a str,
}

impl BotGateway {
    pub fn new(base_url: String, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build bot gateway HTTP client")?;
        Ok(Self { http, base_url })
    }

    fn gateway_err(e: impl std::fmt::Display) -> EngineError {
        EngineError::GatewayUnavailable(e.to_string())
    }
}

#[async_trait]
impl MessagingGateway for BotGateway {
    async fn publish_post(&self, channel_id: &str, content: &str) -> Result<String, EngineError> {
        let url = format!("{}/posts", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&PublishRequest {
                channel_id,
                content,
            })
            .send()
            .await
            .map_err(Self::gateway_err)?;

        if !resp.status().is_success() {
            return Err(Self::gateway_err(format!(
                "publish returned {}",
                resp.status()
            )));
        }
        let body: PublishResponse = resp.json().await.map_err(Self::gateway_err)?;
        Ok(body.post_ref)
    }

    async fn get_post(
        &self,
        channel_id: &str,
        post_ref: &str,
    ) -> Result<PostSnapshot, EngineError> {
        let url = format!("{}/posts/{}/{}", self.base_url, channel_id, post_ref);
        let resp = self.http.get(&url).send().await.map_err(Self::gateway_err)?;

        if !resp.status().is_success() {
            return Err(Self::gateway_err(format!(
                "post query returned {}",
                resp.status()
            )));
        }
        resp.json().await.map_err(Self::gateway_err)
    }

    async fn send_message(&self, user_id: &str, text: &str) -> Result<(), EngineError> {
        let url = format!("{}/messages", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&SendMessageRequest { user_id, text })
            .send()
            .await
            .map_err(Self::gateway_err)?;

        if !resp.status().is_success() {
            return Err(Self::gateway_err(format!(
                "send_message returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}
