//! ==============================================================================
//! thingspeak.rs - client for the remote telemetry channel
//! ==============================================================================
//!
//! purpose:
//!     the ONLY place that talks to the remote service. each method makes
//!     exactly one outbound GET with its own timeout and no retries.
//!
//! endpoints:
//!     GET {base}/channels/{id}/feeds.json?api_key=READ&results=N  -> feed entries
//!     GET {base}/update?api_key=WRITE&field4=CMD                  -> new entry id or "0"
//!     GET {base}/channels/{id}/fields/4/last.txt?api_key=READ     -> current command
//!
//! relationships:
//!     - used by: server.rs (one call per incoming request)
//!     - reads: config.rs (ThingSpeakConfig)
//!     - returns: domain.rs shapes, error.rs GatewayError
//!
//! ==============================================================================

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::ThingSpeakConfig;
use crate::domain::{Command, CommandOutcome, CommandState, FeedEntry, FeedResponse};
use crate::error::GatewayError;

/// field the device firmware polls for commands
const CONTROL_FIELD: &str = "field4";

/// Clone-able handle; clones share one connection pool
#[derive(Clone)]
pub struct ThingSpeakClient {
    http: reqwest::Client,
    settings: Arc<ThingSpeakConfig>,
}

impl ThingSpeakClient {
    pub fn new(settings: ThingSpeakConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("telemetry-gateway/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;

        Ok(Self {
            http,
            settings: Arc::new(settings),
        })
    }

    pub fn settings(&self) -> &ThingSpeakConfig {
        &self.settings
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    fn channel_url(&self, path: &str) -> String {
        self.url(&format!("/channels/{}{}", self.settings.channel_id, path))
    }

    /// read the `results` most recent entries, in the order the service returns them
    pub async fn fetch_feeds(&self, results: u32, timeout: Duration) -> Result<Vec<FeedEntry>, GatewayError> {
        debug!(results, "fetching feed entries");
        let results = results.to_string();

        let response = self
            .http
            .get(self.channel_url("/feeds.json"))
            .query(&[
                ("api_key", self.settings.read_api_key.as_str()),
                ("results", results.as_str()),
            ])
            .timeout(timeout)
            .send()
            .await
            .map_err(log_failure)?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "feed read rejected");
            return Err(GatewayError::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(log_failure)?;
        let feed: FeedResponse = serde_json::from_str(&body).map_err(|e| {
            warn!("feed body is not valid json: {}", e);
            GatewayError::from(e)
        })?;

        debug!(entries = feed.feeds.len(), "feed entries received");
        Ok(feed.feeds)
    }

    /// write `cmd` to the control field
    ///
    /// a rejected write (non-200, "0", junk body) is an outcome, not an error.
    /// only transport failures come back as Err.
    pub async fn write_command(&self, cmd: Command) -> Result<CommandOutcome, GatewayError> {
        debug!(cmd = cmd.as_str(), "writing command");

        let response = self
            .http
            .get(self.url("/update"))
            .query(&[
                ("api_key", self.settings.write_api_key.as_str()),
                (CONTROL_FIELD, cmd.as_str()),
            ])
            .timeout(self.settings.command_timeout())
            .send()
            .await
            .map_err(log_failure)?;

        let status_ok = response.status() == reqwest::StatusCode::OK;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(log_failure)?;
        let outcome = CommandOutcome::from_write(status_ok, &body);

        if outcome.ok {
            debug!(entry_id = %outcome.entry_id, "command accepted");
        } else {
            warn!(status, body = %outcome.entry_id, "command write rejected");
        }
        Ok(outcome)
    }

    /// last value written to the control field
    pub async fn read_command(&self) -> Result<CommandState, GatewayError> {
        let response = self
            .http
            .get(self.channel_url("/fields/4/last.txt"))
            .query(&[("api_key", self.settings.read_api_key.as_str())])
            .timeout(self.settings.command_timeout())
            .send()
            .await
            .map_err(log_failure)?;

        let status = response.status();
        if !status.is_success() {
            warn!(status = status.as_u16(), "command read rejected");
            return Err(GatewayError::Status(status.as_u16()));
        }

        let body = response.text().await.map_err(log_failure)?;
        Ok(CommandState::from_body(&body))
    }
}

/// request urls carry api keys, so only the classified error is logged
fn log_failure(e: reqwest::Error) -> GatewayError {
    let err = GatewayError::from(e.without_url());
    warn!("upstream call failed: {}", err);
    err
}
