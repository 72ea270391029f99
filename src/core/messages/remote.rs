//! Remote message-generation client.
//!
//! Turns a (station, persona) pair into personalized notification prose
//! over HTTP. Callers never depend on this succeeding; the resolver
//! falls back to static templates on any failure.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;

use crate::core::model::Persona;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("generation service returned an empty message")]
    Empty,
}

/// The remote message-generation collaborator.
#[async_trait]
pub trait MessageGenerator: Send + Sync {
    async fn generate(
        &self,
        station_name: &str,
        persona: Persona,
    ) -> Result<String, GeneratorError>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    station: &'a str,
    persona: Persona,
}

#[derive(Deserialize)]
struct GenerateResponse {
    message: String,
}

/// HTTP implementation of [`MessageGenerator`].
pub struct HttpMessageGenerator {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpMessageGenerator {
    /// `timeout` bounds each request; the resolver adds its own retry
    /// policy on top.
    pub fn new(endpoint: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { endpoint, client }
    }
}

#[async_trait]
impl MessageGenerator for HttpMessageGenerator {
    async fn generate(
        &self,
        station_name: &str,
        persona: Persona,
    ) -> Result<String, GeneratorError> {
        let request = GenerateRequest {
            station: station_name,
            persona,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;
        let body: GenerateResponse = response.json().await?;
        if body.message.trim().is_empty() {
            return Err(GeneratorError::Empty);
        }
        Ok(body.message)
    }
}

/// Bounded requests per rolling window. Denied acquisitions are not
/// queued; the caller falls back instead of waiting.
#[derive(Debug)]
pub struct RateLimiter {
    max: usize,
    window: Duration,
    sent: VecDeque<Instant>,
}

impl RateLimiter {
    pub fn new(max: usize, window: Duration) -> Self {
        Self {
            max,
            window,
            sent: VecDeque::new(),
        }
    }

    pub fn try_acquire(&mut self, now: Instant) -> bool {
        while let Some(&front) = self.sent.front() {
            if now.duration_since(front) >= self.window {
                self.sent.pop_front();
            } else {
                break;
            }
        }
        if self.sent.len() >= self.max {
            return false;
        }
        self.sent.push_back(now);
        true
    }
}
