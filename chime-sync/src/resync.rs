//! Full-state resync over HTTP
//!
//! The push channel carries no history: after a reconnect the client cannot
//! know what it missed, so it fetches the authority's current state
//! directly and lets the reconciler's last-applied-wins rule decide whether
//! the fetch or the locally-held state stands.

use chime_common::{Error, Result, ServerState};
use tracing::debug;

/// Thin HTTP client against the server authority's state endpoint.
pub struct ResyncClient {
    http: reqwest::Client,
    base_url: String,
}

impl ResyncClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Fetch the authority's current full state.
    pub async fn fetch_state(&self) -> Result<ServerState> {
        let url = state_url(&self.base_url);
        debug!(%url, "fetching full state for resync");
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(Error::Transport(format!(
                "state fetch returned {}",
                response.status()
            )));
        }
        response
            .json::<ServerState>()
            .await
            .map_err(|e| Error::Transport(e.to_string()))
    }
}

fn state_url(base: &str) -> String {
    format!("{}/api/playback/state", base.trim_end_matches('/'))
}
