//! Typed client for the panel's UniProxy server API.
//!
//! Every request carries the communication token, node id and node type as
//! query parameters on `{base}/api/v1/server/UniProxy/{op}`. POST bodies are
//! JSON. All operations share the retry policy in [`crate::retry`].

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::StatusCode;
use reqwest::header::{ETAG, IF_NONE_MATCH};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::PanelError;
use crate::retry::{RETRY_DELAYS, ensure_success, send_with_retry};
use crate::types::{NodeConfig, NodeStatus, User, padding_scheme_to_bytes};

/// Per-request timeout, matching the original client.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Control-plane API client.
pub struct Client {
    http: reqwest::Client,
    base_url: String,
    token: String,
    node_id: i64,
    node_type: String,
    /// User-list validator, stored exactly as the panel returned it
    /// (surrounding quotes included).
    user_etag: Mutex<Option<String>>,
    retry_delays: Vec<Duration>,
}

#[derive(Deserialize)]
struct UserList {
    #[serde(default)]
    users: Vec<User>,
}

#[derive(Deserialize)]
struct AliveList {
    #[serde(default)]
    alive: HashMap<String, i64>,
}

impl Client {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        node_id: i64,
        node_type: impl Into<String>,
    ) -> Self {
        let base = base_url.into();
        Self {
            http: reqwest::Client::new(),
            base_url: base.trim_end_matches('/').to_string(),
            token: token.into(),
            node_id,
            node_type: node_type.into(),
            user_etag: Mutex::new(None),
            retry_delays: RETRY_DELAYS.to_vec(),
        }
    }

    /// Override the retry back-off table (used by tests).
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    fn endpoint(&self, op: &str) -> String {
        format!("{}/api/v1/server/UniProxy/{op}", self.base_url)
    }

    fn query(&self) -> [(&'static str, String); 3] {
        [
            ("token", self.token.clone()),
            ("node_id", self.node_id.to_string()),
            ("node_type", self.node_type.clone()),
        ]
    }

    /// Fetch the node configuration.
    ///
    /// Side effect: a returned padding scheme is installed into the session
    /// library; a rejected scheme is logged and otherwise ignored.
    pub async fn fetch_config(&self) -> Result<NodeConfig, PanelError> {
        let resp = send_with_retry(&self.retry_delays, || {
            self.http
                .get(self.endpoint("config"))
                .query(&self.query())
                .timeout(REQUEST_TIMEOUT)
        })
        .await?;
        let config: NodeConfig = ensure_success(resp)?.json().await?;

        if !config.padding_scheme.is_empty() {
            let raw = padding_scheme_to_bytes(&config.padding_scheme);
            if anytls_session::update_padding_scheme(&raw) {
                info!("padding scheme updated");
            } else {
                warn!("padding scheme rejected, keeping the previous one");
            }
        }
        Ok(config)
    }

    /// Fetch the user list with a conditional GET.
    ///
    /// Returns `None` when the panel answers 304, distinguishable from an
    /// empty list, which is `Some(vec![])`.
    pub async fn fetch_users(&self) -> Result<Option<Vec<User>>, PanelError> {
        let etag = self.user_etag.lock().clone();
        let resp = send_with_retry(&self.retry_delays, || {
            let mut req = self
                .http
                .get(self.endpoint("user"))
                .query(&self.query())
                .timeout(REQUEST_TIMEOUT);
            if let Some(validator) = &etag {
                req = req.header(IF_NONE_MATCH, validator.as_str());
            }
            req
        })
        .await?;

        if resp.status() == StatusCode::NOT_MODIFIED {
            debug!("user list unchanged (304)");
            return Ok(None);
        }
        let resp = ensure_success(resp)?;

        if let Some(validator) = resp.headers().get(ETAG) {
            if let Ok(value) = validator.to_str() {
                *self.user_etag.lock() = Some(value.to_string());
            }
        }

        let list: UserList = resp.json().await?;
        info!(count = list.users.len(), "user list fetched");
        Ok(Some(list.users))
    }

    /// Report traffic: `{"<uid>": [upload, download]}`. An empty map is a
    /// no-op success.
    pub async fn push_traffic(&self, data: &HashMap<i64, [u64; 2]>) -> Result<(), PanelError> {
        if data.is_empty() {
            return Ok(());
        }
        let payload: HashMap<String, [u64; 2]> =
            data.iter().map(|(uid, t)| (uid.to_string(), *t)).collect();

        let resp = send_with_retry(&self.retry_delays, || {
            self.http
                .post(self.endpoint("push"))
                .query(&self.query())
                .json(&payload)
                .timeout(REQUEST_TIMEOUT)
        })
        .await?;
        ensure_success(resp)?;
        debug!(users = data.len(), "traffic pushed");
        Ok(())
    }

    /// Report online devices: `{"<uid>": ["<ip>_<node_id>", …]}`.
    pub async fn push_alive(&self, data: &HashMap<i64, Vec<String>>) -> Result<(), PanelError> {
        if data.is_empty() {
            return Ok(());
        }
        let payload: HashMap<String, &Vec<String>> =
            data.iter().map(|(uid, ips)| (uid.to_string(), ips)).collect();

        let resp = send_with_retry(&self.retry_delays, || {
            self.http
                .post(self.endpoint("alive"))
                .query(&self.query())
                .json(&payload)
                .timeout(REQUEST_TIMEOUT)
        })
        .await?;
        ensure_success(resp)?;
        debug!(users = data.len(), "alive list pushed");
        Ok(())
    }

    /// Report node load.
    pub async fn push_status(&self, status: &NodeStatus) -> Result<(), PanelError> {
        let resp = send_with_retry(&self.retry_delays, || {
            self.http
                .post(self.endpoint("status"))
                .query(&self.query())
                .json(status)
                .timeout(REQUEST_TIMEOUT)
        })
        .await?;
        ensure_success(resp)?;
        Ok(())
    }

    /// Fetch fleet-wide online device counts per user. Entries whose key is
    /// not a decimal integer are skipped.
    pub async fn fetch_aliveness(&self) -> Result<HashMap<i64, i64>, PanelError> {
        let resp = send_with_retry(&self.retry_delays, || {
            self.http
                .get(self.endpoint("alivelist"))
                .query(&self.query())
                .timeout(REQUEST_TIMEOUT)
        })
        .await?;
        let list: AliveList = ensure_success(resp)?.json().await?;

        Ok(list
            .alive
            .into_iter()
            .filter_map(|(uid, count)| uid.parse::<i64>().ok().map(|uid| (uid, count)))
            .collect())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url)
            .field("node_id", &self.node_id)
            .field("node_type", &self.node_type)
            .finish_non_exhaustive()
    }
}
