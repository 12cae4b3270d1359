//! Stand-in for the networked box lock.
//!
//! Exposes two routes:
//! - `POST /open`: release the latch, count the opening
//! - `GET /status`: report whether the box has been opened and when

use axum::{extract::State, response::Json, routing::{get, post}, Router};
use chrono::{DateTime, Utc};
use metabox::unlock::DeviceResponse;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// Latch history shared by the handlers.
#[derive(Debug, Default)]
pub struct DeviceState {
    log: Mutex<OpenLog>,
}

#[derive(Debug, Default)]
struct OpenLog {
    opened_count: u64,
    opened_at: Option<DateTime<Utc>>,
}

impl DeviceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn opened_count(&self) -> u64 {
        self.log.lock().await.opened_count
    }
}

/// Create the device router
pub fn create_router(state: Arc<DeviceState>) -> Router {
    Router::new()
        .route("/open", post(open))
        .route("/status", get(status))
        .with_state(state)
}

/// POST /open - Release the latch
async fn open(State(state): State<Arc<DeviceState>>) -> Json<DeviceResponse> {
    let mut log = state.log.lock().await;
    log.opened_count += 1;
    log.opened_at = Some(Utc::now());

    info!(opened_count = log.opened_count, "Latch released");

    Json(DeviceResponse {
        status: "opened".to_string(),
        opened_count: log.opened_count,
        opened_at: log.opened_at,
    })
}

/// GET /status - Report latch history
async fn status(State(state): State<Arc<DeviceState>>) -> Json<DeviceResponse> {
    let log = state.log.lock().await;
    let status = if log.opened_count > 0 { "opened" } else { "idle" };

    Json(DeviceResponse {
        status: status.to_string(),
        opened_count: log.opened_count,
        opened_at: log.opened_at,
    })
}
