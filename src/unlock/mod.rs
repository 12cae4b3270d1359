//! Unlock signal to the networked lock device.
//!
//! Unlocking is best-effort: callers fire a request and move on. Transport
//! failures are logged here and never reach the module state machines.

use crate::config::DeviceConfig;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capability to open the box. Must return immediately.
pub trait Unlocker: Send + Sync {
    /// Ask the lock to open. `requested_by` names the module, for logs.
    fn request_unlock(&self, requested_by: &str);
}

/// JSON body the lock device answers `/open` and `/status` with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceResponse {
    pub status: String,
    pub opened_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
}

/// Unlocker that POSTs to the device's `/open` endpoint.
///
/// Clones share the set of in-flight requests, so a host can keep one clone
/// and `flush` it before the runtime goes away.
#[derive(Clone)]
pub struct HttpUnlocker {
    client: reqwest::Client,
    open_url: String,
    in_flight: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl HttpUnlocker {
    pub fn new(config: &DeviceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("Failed to build HTTP client for lock device")?;

        Ok(Self {
            client,
            open_url: config.open_url(),
            in_flight: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Requests spawned by `request_unlock` that have not finished yet.
    pub fn pending(&self) -> usize {
        self.in_flight
            .lock()
            .map(|tasks| tasks.iter().filter(|t| !t.is_finished()).count())
            .unwrap_or(0)
    }

    /// Wait up to `timeout` for in-flight unlock requests to finish.
    ///
    /// Returns how many were still running when the timeout hit; those are
    /// aborted.
    pub async fn flush(&self, timeout: Duration) -> usize {
        let tasks: Vec<_> = match self.in_flight.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => return 0,
        };
        if tasks.is_empty() {
            return 0;
        }

        debug!(count = tasks.len(), "Waiting for in-flight unlock requests");
        let aborts: Vec<_> = tasks.iter().map(|t| t.abort_handle()).collect();
        match tokio::time::timeout(timeout, futures::future::join_all(tasks)).await {
            Ok(_) => 0,
            Err(_) => {
                let unfinished = aborts.iter().filter(|a| !a.is_finished()).count();
                for abort in aborts {
                    abort.abort();
                }
                warn!(unfinished, "Unlock requests still running at shutdown, aborted");
                unfinished
            }
        }
    }

    pub fn open_url(&self) -> &str {
        &self.open_url
    }

    /// Send the body-less POST and return whatever JSON came back.
    ///
    /// Non-JSON or empty bodies yield `Value::Null`; only transport errors and
    /// non-success statuses are errors.
    pub async fn send_unlock(&self) -> Result<Value> {
        let response = self
            .client
            .post(&self.open_url)
            .send()
            .await
            .context(format!("Failed to reach lock device at '{}'", self.open_url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("Lock device answered {}", status);
        }

        let body = response
            .text()
            .await
            .context("Failed to read lock device response")?;

        match serde_json::from_str::<Value>(&body) {
            Ok(json) => Ok(json),
            Err(e) => {
                debug!(error = %e, "Lock device response is not JSON");
                Ok(Value::Null)
            }
        }
    }
}

impl Unlocker for HttpUnlocker {
    fn request_unlock(&self, requested_by: &str) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                error!(module = %requested_by, "No async runtime, unlock request dropped");
                return;
            }
        };

        let unlocker = self.clone();
        let requested_by = requested_by.to_string();

        info!(module = %requested_by, url = %self.open_url, "Sending unlock request");

        let task = runtime.spawn(async move {
            match unlocker.send_unlock().await {
                Ok(json) => {
                    info!(module = %requested_by, response = %json, "Lock device acknowledged unlock")
                }
                Err(e) => {
                    warn!(module = %requested_by, error = %e, "Unlock request failed, not retrying")
                }
            }
        });

        if let Ok(mut tasks) = self.in_flight.lock() {
            tasks.retain(|t| !t.is_finished());
            tasks.push(task);
        }
    }
}

/// Dry-run unlocker: logs and does nothing else.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogUnlocker;

impl Unlocker for LogUnlocker {
    fn request_unlock(&self, requested_by: &str) {
        info!(module = %requested_by, "Unlock requested (dry run)");
    }
}

/// Unlocker that only records who asked. Shared clones see the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingUnlocker {
    requests: Arc<Mutex<Vec<String>>>,
}

impl RecordingUnlocker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

impl Unlocker for RecordingUnlocker {
    fn request_unlock(&self, requested_by: &str) {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(requested_by.to_string());
        }
    }
}
