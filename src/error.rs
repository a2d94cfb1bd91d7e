//! Error types reported by the request manager.

use std::time::Duration;

/// Terminal failure for a single request.
///
/// The `Display` text is what the UI shows to the user.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RequestError {
    /// No API key has been set
    #[error("No API key configured. Set an API key before using AI mode.")]
    MissingCredential,

    /// The request never made it onto the network (or the transport broke mid-exchange)
    #[error("Network error: {0}")]
    DispatchFailure(String),

    #[error("Invalid API key. Check your API key and try again.")]
    InvalidApiKey,

    /// Server-side 429
    #[error("Rate limited by the API server. Please wait and try again.")]
    ServerRateLimited,

    #[error("API server error (HTTP {code}). Please try again later.")]
    ServerError { code: u16 },

    #[error("Request failed with HTTP {code}: {message}")]
    HttpStatus { code: u16, message: String },

    /// `error` event inside an otherwise successful stream
    #[error("API error ({kind}): {message}")]
    Api { kind: String, message: String },

    #[error("Failed to parse response: {0}")]
    ParseFailure(String),

    /// Client-side admission refusal; the request stays queued
    #[error("Rate limit reached. Please wait {}.", wait_text(.wait))]
    RateLimited { wait: Duration },
}

// Whole seconds, rounded up, never below one
fn wait_text(wait: &Duration) -> String {
    let secs = wait.as_millis().div_ceil(1000).max(1);
    if secs == 1 {
        "1 second".to_string()
    } else {
        format!("{} seconds", secs)
    }
}

impl RequestError {
    /// Map a non-200 HTTP status to an error.
    ///
    /// `body` is only consulted for the generic case, where the API's own
    /// `error.message` is more useful than the bare status code.
    pub fn from_status(code: u16, body: &str) -> Self {
        match code {
            401 => RequestError::InvalidApiKey,
            429 => RequestError::ServerRateLimited,
            c if c >= 500 => RequestError::ServerError { code: c },
            c => {
                let message = serde_json::from_str::<serde_json::Value>(body)
                    .ok()
                    .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
                    .unwrap_or_else(|| "unexpected response".to_string());
                RequestError::HttpStatus { code: c, message }
            }
        }
    }

    /// Short label used for the error metric
    pub fn kind(&self) -> &'static str {
        match self {
            RequestError::MissingCredential => "missing_credential",
            RequestError::DispatchFailure(_) => "dispatch_failure",
            RequestError::InvalidApiKey => "invalid_api_key",
            RequestError::ServerRateLimited => "server_rate_limited",
            RequestError::ServerError { .. } => "server_error",
            RequestError::HttpStatus { .. } => "http_status",
            RequestError::Api { .. } => "api_error",
            RequestError::ParseFailure(_) => "parse_failure",
            RequestError::RateLimited { .. } => "rate_limited",
        }
    }
}

/// Failure to hand a request to the transport
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("failed to build request: {0}")]
    Build(#[from] reqwest::Error),

    #[error("request manager worker is gone")]
    ChannelClosed,
}

/// The control task has stopped, so the handle can no longer reach it
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("request manager worker has stopped")]
pub struct WorkerGone;

/// Failure while setting up the HTTP client
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}
