//! Read-only status endpoint. The server only sees a [`StatusHandle`]
//! snapshot taken at startup plus the messenger's connection flag; it never
//! calls into devices.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::device::Capability;

#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub name: String,
    pub capability: Capability,
}

/// Everything the status page reports.
#[derive(Clone)]
pub struct StatusHandle {
    pub station: String,
    pub mock: bool,
    pub started_at: OffsetDateTime,
    pub devices: Vec<DeviceInfo>,
    pub connected: Arc<AtomicBool>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub station: String,
    pub mock: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub uptime_secs: i64,
    pub mqtt_connected: bool,
    pub devices: Vec<DeviceInfo>,
}

impl StatusHandle {
    pub fn snapshot(&self) -> StatusResponse {
        let uptime = OffsetDateTime::now_utc() - self.started_at;
        StatusResponse {
            station: self.station.clone(),
            mock: self.mock,
            started_at: self.started_at,
            uptime_secs: uptime.whole_seconds().max(0),
            mqtt_connected: self.connected.load(Ordering::SeqCst),
            devices: self.devices.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: StatusHandle) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn api_status(State(state): State<StatusHandle>) -> impl IntoResponse {
    Json(state.snapshot())
}

async fn healthz() -> &'static str {
    "ok"
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

pub async fn serve(state: StatusHandle, port: u16, shutdown: CancellationToken) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind status port {port}"))?;

    info!(%addr, "status server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("status server error")?;

    info!("status server stopped");
    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================
