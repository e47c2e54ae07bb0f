//! TON chain collaborator.
//!
//! The engine treats the chain as an external source of truth behind a
//! narrow balance/transfer interface. Amounts are integral nano-TON; the
//! display denomination never enters the core. Every call carries a bounded
//! timeout, and a timeout is reported as `ChainUnavailable` — the result of
//! the attempted operation is unknown, never assumed.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// One output leg of a drain transfer.
#[derive(Debug, Clone, Serialize)]
pub struct TransferDestination {
    pub address: String,
    pub amount_nano: i64,
}

/// Narrow chain interface the engine depends on.
#[async_trait]
pub trait TonClient: Send + Sync {
    /// Current balance of the address in nano-TON.
    async fn get_balance(&self, address: &str) -> Result<i64, EngineError>;

    /// Sign and send a transfer from the wallet controlled by `secret`.
    /// Returns the transaction hash.
    async fn send_transfer(
        &self,
        secret: &[u8],
        destination: &TransferDestination,
    ) -> Result<String, EngineError>;
}

/// HTTP JSON-RPC implementation against a TON API endpoint.
pub struct HttpTonClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct BalanceResponse {
    ok: bool,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Serialize)]
struct TransferRequest<'a> {
    secret_hex: String,
    destination: &'a str,
    amount_nano: i64,
}

#[derive(Deserialize)]
struct TransferResponse {
    ok: bool,
    #[serde(default)]
    tx_hash: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpTonClient {
    pub fn new(
        endpoint: String,
        api_key: Option<String>,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        // The timeout is load-bearing: without it a hung RPC node would
        // stall reconciliation indefinitely.
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build TON RPC HTTP client")?;
        Ok(Self {
            http,
            endpoint,
            api_key,
        })
    }

    fn chain_err(e: impl std::fmt::Display) -> EngineError {
        EngineError::ChainUnavailable(e.to_string())
    }
}

#[async_trait]
impl TonClient for HttpTonClient {
    async fn get_balance(&self, address: &str) -> Result<i64, EngineError> {
        let url = format!("{}/getAddressBalance", self.endpoint);
        let mut req = self.http.get(&url).query(&[("address", address)]);
        if let Some(key) = &self.api_key {
            req = req.header("X-API-Key", key);
        }

        let resp = req.send().await.map_err(Self::chain_err)?;
        let body: BalanceResponse = resp.json().await.map_err(Self::chain_err)?;

        if !body.ok {
            return Err(Self::chain_err(
                body.error.unwrap_or_else(|| "balance query rejected".into()),
            ));
        }
        body.result
            .as_deref()
            .and_then(|v| v.parse::<i64>().ok())
            .ok_or_else(|| Self::chain_err("malformed balance response"))
    }

    async fn send_transfer(
        &self,
        secret: &[u8],
        destination: &TransferDestination,
    ) -> Result<String, EngineError> {
        let url = format!("{}/sendTransfer", self.endpoint);
        let payload = TransferRequest {
            secret_hex: hex::encode(secret),
            destination: &destination.address,
            amount_nano: destination.amount_nano,
        };

        let mut req = self.http.post(&url).json(&payload);
        if let Some(key) = &self.api_key {
            req = req.header("X-API-Key", key);
        }

        let resp = req.send().await.map_err(Self::chain_err)?;
        let body: TransferResponse = resp.json().await.map_err(Self::chain_err)?;

        if !body.ok {
            return Err(Self::chain_err(
                body.error.unwrap_or_else(|| "transfer rejected".into()),
            ));
        }
        body.tx_hash
            .ok_or_else(|| Self::chain_err("transfer accepted without tx hash"))
    }
}
