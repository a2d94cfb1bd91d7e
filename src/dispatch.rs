use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::error::{DispatchError, SetupError};
use crate::models::{ApiRequest, Completion, HttpResponse};

/// Hands a request to the network.
///
/// `dispatch` must not block: it either refuses the request right away or
/// accepts it and later delivers exactly one [`Completion`] for it back to
/// the control task.
pub trait Dispatcher: Send {
    fn dispatch(&mut self, request: ApiRequest) -> Result<(), DispatchError>;
}

// reqwest transport - each exchange runs on its own task
pub struct HttpDispatcher {
    client: reqwest::Client,
    endpoint: String,
    api_version: String,
    completions: mpsc::UnboundedSender<Completion>,
}

impl HttpDispatcher {
    pub fn new(
        settings: &Settings,
        completions: mpsc::UnboundedSender<Completion>,
    ) -> Result<Self, SetupError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()?;

        Ok(Self {
            client,
            endpoint: settings.endpoint.clone(),
            api_version: settings.api_version.clone(),
            completions,
        })
    }

    // bad header values (e.g. a key with a newline) fail here
    fn build_http_request(&self, request: &ApiRequest) -> reqwest::Result<reqwest::Request> {
        self.client
            .post(&self.endpoint)
            .header("x-api-key", &request.api_key)
            .header("anthropic-version", &self.api_version)
            .header("content-type", "application/json")
            .json(&request.body)
            .build()
    }
}

impl Dispatcher for HttpDispatcher {
    fn dispatch(&mut self, request: ApiRequest) -> Result<(), DispatchError> {
        if self.completions.is_closed() {
            return Err(DispatchError::ChannelClosed);
        }

        let http_request = self.build_http_request(&request)?;

        let client = self.client.clone();
        let completions = self.completions.clone();
        let id = request.id;

        tokio::spawn(async move {
            let result = match client.execute(http_request).await {
                Ok(res) => {
                    let status = res.status().as_u16();
                    match res.text().await {
                        Ok(body) => Ok(HttpResponse { status, body }),
                        Err(e) => Err(format!("failed to read response body: {}", e)),
                    }
                }
                Err(e) if e.is_timeout() => Err("request timed out".to_string()),
                Err(e) => Err(e.to_string()),
            };

            match &result {
                Ok(res) => debug!(%id, status = res.status, bytes = res.body.len(), "exchange finished"),
                Err(e) => warn!(%id, error = %e, "exchange failed"),
            }

            let _ = completions.send(Completion { id, result });
        });

        Ok(())
    }
}
