use std::time::Duration;

use anyhow::{anyhow, Result};
use reqwest::Client;
use rsa::RsaPublicKey;
use serde::Serialize;

use crate::config::AgentConfig;
use crate::model::{MetricKind, MetricRecord};
use crate::wire;

/// Transmits metric payloads to the collection server.
///
/// Bodies are JSON, optionally block-encrypted with the server's RSA
/// public key, always gzipped, and signed with the shared secret when
/// one is configured.
pub struct Sender {
    client: Client,
    base_url: String,
    key: Option<String>,
    public_key: Option<RsaPublicKey>,
}

impl Sender {
    /// Fails when the configured public key cannot be read or parsed;
    /// key material problems are fatal at startup, not at send time.
    pub fn new(cfg: &AgentConfig) -> Result<Self> {
        let public_key = match &cfg.public_key_path {
            Some(path) => Some(wire::load_public_key(path)?),
            None => None,
        };

        Ok(Self {
            client: Client::builder().timeout(Duration::from_secs(5)).build()?,
            base_url: format!("http://{}", cfg.server_address),
            key: cfg.key.clone(),
            public_key,
        })
    }

    /// Ships one size-capped batch to `/updates`.
    pub async fn send_batch(&self, batch: &[MetricRecord]) -> Result<()> {
        self.post_payload("/updates", &batch).await?;
        tracing::debug!(len = batch.len(), "batch delivered");
        Ok(())
    }

    /// Structured single-record update via `/update`.
    pub async fn send_record(&self, record: &MetricRecord) -> Result<()> {
        self.post_payload("/update", record).await?;
        tracing::debug!(id = %record.id, kind = %record.kind, "record delivered");
        Ok(())
    }

    /// Legacy plain-text update via path segments, kept for servers
    /// that predate the JSON surface.
    pub async fn send_plain(&self, record: &MetricRecord) -> Result<()> {
        let value = match record.kind {
            MetricKind::Gauge => record
                .value
                .map(|v| v.to_string())
                .ok_or_else(|| anyhow!("gauge {:?} has no value", record.id))?,
            MetricKind::Counter => record
                .delta
                .map(|d| d.to_string())
                .ok_or_else(|| anyhow!("counter {:?} has no delta", record.id))?,
        };

        let url = format!(
            "{}/update/{}/{}/{}",
            self.base_url, record.kind, record.id, value
        );
        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "text/plain")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("bad status: {}", response.status()));
        }
        Ok(())
    }

    async fn post_payload<T: Serialize>(&self, path: &str, payload: &T) -> Result<()> {
        let body = self.prepare_body(payload)?;

        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::CONTENT_ENCODING, "gzip");

        if let Some(key) = &self.key {
            request = request.header(wire::HASH_HEADER, wire::sign_body(&body, key));
        }

        let response = request.body(body).send().await?;
        if !response.status().is_success() {
            return Err(anyhow!("bad status: {}", response.status()));
        }
        Ok(())
    }

    /// `gzip(rsa_blocks(json))`, or `gzip(json)` without a key.
    fn prepare_body<T: Serialize>(&self, payload: &T) -> Result<Vec<u8>> {
        let mut data = serde_json::to_vec(payload)?;
        if let Some(key) = &self.public_key {
            data = wire::encrypt_blocks(key, &data)?;
        }
        Ok(wire::gzip_compress(&data)?)
    }
}
