//! # Transmission Client
//!
//! Delivers [`TelemetryEvent`]s to the ingestion endpoint over an unreliable
//! wireless link. Event-triggered and periodic sends share this single path, so
//! at most one request is ever in flight.
//!
//! ## Delivery Steps
//! 1. **Link check**: if the link is down, try to reconnect up to the configured
//!    budget with a fixed delay between attempts; on exhaustion the send is
//!    abandoned and counted as failed
//! 2. **Encode**: build the fixed-precision JSON envelope ([`crate::payload`])
//! 3. **POST**: `Content-Type: application/json` plus the `X-API-Key` header
//! 4. **Classify**:
//!    - 2xx: delivered, `data_points_sent` increments
//!    - 401: authentication rejected, the device enters the auth-failure state;
//!      this is a configuration problem, so nothing is retried and nothing is
//!      counted as a transport failure
//!    - anything else, or no response at all: `failed_requests` increments
//!
//! No send is retried immediately. The next event or heartbeat tick is the retry.

use crate::clock::Clock;
use crate::config::NetworkConfig;
use crate::link::Link;
use crate::{payload, DeviceState, ErrorKind, TelemetryEvent};
use reqwest::header::CONTENT_TYPE;
use std::io;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Header carrying the shared secret
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Why a send did not deliver.
#[derive(Error, Debug)]
pub enum SendError {
    /// Link stayed down through the whole reconnect budget
    #[error("link down after {attempts} reconnect attempts")]
    Connectivity { attempts: u32 },

    /// Endpoint answered 401
    #[error("endpoint rejected the API key")]
    Auth,

    /// Endpoint answered with a non-success status other than 401
    #[error("endpoint answered HTTP {0}")]
    Status(u16),

    /// No response (timeout, refused connection, DNS, TLS, ...)
    #[error("no response: {0}")]
    Transport(String),

    /// Envelope could not be serialized
    #[error("encode failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl SendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SendError::Connectivity { .. } => ErrorKind::Connectivity,
            SendError::Auth => ErrorKind::Auth,
            SendError::Status(_) | SendError::Transport(_) | SendError::Encode(_) => {
                ErrorKind::Transport
            }
        }
    }
}

/// Errors raised by an [`HttpPoster`] when no response was obtained.
#[derive(Error, Debug)]
pub enum PostError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("runtime: {0}")]
    Runtime(#[from] io::Error),

    #[error("{0}")]
    Unreachable(String),
}

/// Status and body of a completed HTTP exchange.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Blocking POST of a JSON body with the API key header attached.
pub trait HttpPoster {
    fn post(&mut self, url: &str, api_key: &str, body: Vec<u8>) -> Result<HttpResponse, PostError>;
}

/// [`HttpPoster`] backed by reqwest on a current-thread tokio runtime.
///
/// `block_on` keeps every request on the caller's thread; the client timeout
/// bounds how long the control loop can be stalled by one send.
pub struct ReqwestPoster {
    runtime: tokio::runtime::Runtime,
    client: reqwest::Client,
}

impl ReqwestPoster {
    pub fn new(timeout: Duration) -> Result<Self, PostError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let client = {
            let _guard = runtime.enter();
            reqwest::Client::builder().timeout(timeout).build()?
        };
        Ok(Self { runtime, client })
    }
}

impl HttpPoster for ReqwestPoster {
    fn post(&mut self, url: &str, api_key: &str, body: Vec<u8>) -> Result<HttpResponse, PostError> {
        let client = &self.client;
        self.runtime.block_on(async move {
            let response = client
                .post(url)
                .header(CONTENT_TYPE, "application/json")
                .header(API_KEY_HEADER, api_key)
                .body(body)
                .send()
                .await?;
            let status = response.status().as_u16();
            // Body is only surfaced for diagnostics
            let body = response.text().await.unwrap_or_default();
            Ok::<_, PostError>(HttpResponse { status, body })
        })
    }
}

/// Endpoint and reconnect policy.
#[derive(Clone, Debug, PartialEq)]
pub struct TransmitSettings {
    pub endpoint: String,
    pub api_key: String,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

impl From<&NetworkConfig> for TransmitSettings {
    fn from(config: &NetworkConfig) -> Self {
        TransmitSettings {
            endpoint: config.endpoint.clone(),
            api_key: config.api_key.clone(),
            reconnect_attempts: config.reconnect_attempts,
            reconnect_delay: config.reconnect_delay(),
        }
    }
}

/// Owns the link and the HTTP poster; mutates counters and connectivity through
/// the [`DeviceState`] it is handed.
pub struct TransmissionClient {
    settings: TransmitSettings,
    link: Box<dyn Link>,
    poster: Box<dyn HttpPoster>,
}

impl TransmissionClient {
    pub fn new(settings: TransmitSettings, link: Box<dyn Link>, poster: Box<dyn HttpPoster>) -> Self {
        Self {
            settings,
            link,
            poster,
        }
    }

    pub fn settings(&self) -> &TransmitSettings {
        &self.settings
    }

    /// Signal strength of the underlying link
    pub fn rssi(&mut self) -> i32 {
        self.link.rssi()
    }

    /// Connectivity check with bounded reconnection. Updates
    /// `state.connectivity` but never the counters.
    pub fn ensure_connected(&mut self, state: &mut DeviceState, clock: &dyn Clock) -> Result<(), SendError> {
        if self.link.is_up() {
            if !state.connectivity.is_connected() {
                info!(rssi = self.link.rssi(), "link restored");
            }
            state.connectivity.mark_connected();
            return Ok(());
        }

        if state.connectivity.is_connected() {
            warn!("link lost");
        }
        state.connectivity.mark_disconnected();

        let budget = self.settings.reconnect_attempts;
        for attempt in 1..=budget {
            state.connectivity.record_attempt(attempt);
            if self.link.reconnect() {
                info!(attempt, "link restored");
                state.connectivity.mark_connected();
                return Ok(());
            }
            debug!(attempt, budget, "reconnect attempt failed");
            if attempt < budget {
                clock.sleep(self.settings.reconnect_delay);
            }
        }

        Err(SendError::Connectivity { attempts: budget })
    }

    /// Deliver one event. Exactly one counter moves per call, except on an
    /// authentication rejection where none does.
    pub fn send(
        &mut self,
        event: &TelemetryEvent,
        state: &mut DeviceState,
        clock: &dyn Clock,
    ) -> Result<(), SendError> {
        if let Err(err) = self.ensure_connected(state, clock) {
            warn!(category = event.category.as_str(), error = %err, "send abandoned");
            state.counters.record_failure();
            return Err(err);
        }

        let body = match payload::encode(event) {
            Ok(body) => body,
            Err(err) => {
                state.counters.record_failure();
                return Err(err.into());
            }
        };

        let outcome = self
            .poster
            .post(&self.settings.endpoint, &self.settings.api_key, body);

        match outcome {
            Ok(response) if (200..300).contains(&response.status) => {
                state.counters.record_sent();
                state.auth_failed = false;
                state.last_status = Some(response.status);
                debug!(
                    category = event.category.as_str(),
                    status = response.status,
                    sent = state.counters.data_points_sent(),
                    "telemetry delivered"
                );
                Ok(())
            }
            Ok(response) if response.status == 401 => {
                state.auth_failed = true;
                state.last_status = Some(401);
                error!(
                    endpoint = %self.settings.endpoint,
                    "endpoint rejected the API key; fix the configuration"
                );
                Err(SendError::Auth)
            }
            Ok(response) => {
                state.counters.record_failure();
                state.last_status = Some(response.status);
                warn!(
                    category = event.category.as_str(),
                    status = response.status,
                    body = %snippet(&response.body),
                    "telemetry rejected"
                );
                Err(SendError::Status(response.status))
            }
            Err(err) => {
                state.counters.record_failure();
                state.last_status = None;
                warn!(category = event.category.as_str(), error = %err, "telemetry not delivered");
                Err(SendError::Transport(err.to_string()))
            }
        }
    }
}

/// First line of a response body, capped for log output
fn snippet(body: &str) -> &str {
    let line = body.lines().next().unwrap_or("");
    match line.char_indices().nth(80) {
        Some((index, _)) => &line[..index],
        None => line,
    }
}
