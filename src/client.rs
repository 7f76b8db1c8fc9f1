//! HTTP client module for submitting encrypted samples to the collection server.
//!
//! The submitter talks to the server through [`SubmitEndpoint`].
//! [`SubmitClient`] implements it with a pooled reqwest client posting
//! form-encoded batches over verified TLS. Retries are not performed here:
//! a failed chunk stays buffered until the next submission interval.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::config::Config;
use crate::crypto::EncryptedSample;

/// Result codes reported by the collection server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    NoError,
    DatabaseError,
    AuthError,
    IllegalMessage,
    SessionExpired,
    Unknown(i64),
}

impl From<i64> for ResultCode {
    fn from(code: i64) -> Self {
        match code {
            0 => ResultCode::NoError,
            1 => ResultCode::DatabaseError,
            2 => ResultCode::AuthError,
            3 => ResultCode::IllegalMessage,
            4 => ResultCode::SessionExpired,
            other => ResultCode::Unknown(other),
        }
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultCode::NoError => write!(f, "no error"),
            ResultCode::DatabaseError => write!(f, "server has a database error"),
            ResultCode::AuthError => write!(f, "authentication failed"),
            ResultCode::IllegalMessage => write!(f, "message illegal"),
            ResultCode::SessionExpired => write!(f, "session expired"),
            ResultCode::Unknown(code) => write!(f, "unknown error: {}", code),
        }
    }
}

/// Response body returned by the submission endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    /// Result code, see [`ResultCode`]
    pub code: i64,
}

/// Errors that can occur during HTTP client operations.
#[derive(Debug)]
pub enum ClientError {
    /// HTTP request failed
    Request(reqwest::Error),

    /// Server returned a status other than 200
    Status { code: StatusCode, message: String },

    /// Failed to decode the response body
    Parse(String),

    /// Failed to encode the batch
    Encode(serde_json::Error),

    /// Request timeout
    Timeout,

    /// Client configuration error
    Config(String),
}

impl std::fmt::Display for ClientError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClientError::Request(e) => write!(f, "HTTP request failed: {}", e),
            ClientError::Status { code, message } => {
                write!(f, "Server error ({}): {}", code, message)
            }
            ClientError::Parse(e) => write!(f, "Failed to parse response: {}", e),
            ClientError::Encode(e) => write!(f, "Failed to encode batch: {}", e),
            ClientError::Timeout => write!(f, "Request timed out"),
            ClientError::Config(e) => write!(f, "Client configuration error: {}", e),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Request(e) => Some(e),
            ClientError::Encode(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else {
            ClientError::Request(err)
        }
    }
}

/// Destination for encrypted batches.
pub trait SubmitEndpoint {
    /// Submit one batch and return the server's result code.
    fn submit(
        &self,
        batch: &[EncryptedSample],
    ) -> impl Future<Output = Result<ResultCode, ClientError>> + Send;
}

/// HTTP client for the collection server.
///
/// The underlying reqwest client is reused across submissions for
/// connection pooling and verifies server certificates.
pub struct SubmitClient {
    /// The underlying HTTP client
    client: Client,

    /// URL of the submission endpoint
    server_url: String,

    /// Account name sent with every batch
    username: String,

    /// Account password sent with every batch
    password: String,

    /// Request timeout duration
    timeout: Duration,
}

impl std::fmt::Debug for SubmitClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmitClient")
            .field("server_url", &self.server_url)
            .field("username", &self.username)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl SubmitClient {
    /// Create a new client from the service configuration.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the HTTP client cannot be built.
    pub fn new(config: &Config) -> Result<Self, ClientError> {
        Self::with_settings(
            config.server_url.clone(),
            config.username.clone(),
            config.password.clone(),
            config.request_timeout,
        )
    }

    /// Create a new client with explicit settings.
    pub fn with_settings(
        server_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ClientError::Config(e.to_string()))?;

        Ok(Self {
            client,
            server_url: server_url.into(),
            username: username.into(),
            password: password.into(),
            timeout,
        })
    }

    /// Get the configured server URL.
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Get the request timeout duration.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl SubmitEndpoint for SubmitClient {
    async fn submit(&self, batch: &[EncryptedSample]) -> Result<ResultCode, ClientError> {
        let gps_data = serde_json::to_string(batch).map_err(ClientError::Encode)?;

        debug!(
            batch_size = batch.len(),
            url = %self.server_url,
            "Posting sample batch"
        );

        let form = [
            ("user", self.username.as_str()),
            ("password", self.password.as_str()),
            ("gps_data", gps_data.as_str()),
        ];

        let response = self
            .client
            .post(&self.server_url)
            .timeout(self.timeout)
            .form(&form)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::Status {
                code: status,
                message,
            });
        }

        let body = response.text().await?;
        let parsed: SubmitResponse = serde_json::from_str(&body).map_err(|e| {
            debug!(body = %body, "Undecodable response body");
            ClientError::Parse(e.to_string())
        })?;

        Ok(ResultCode::from(parsed.code))
    }
}
