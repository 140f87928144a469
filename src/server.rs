//! HTTP API.
//!
//! - `GET /api/v1/ip/{address}/enhanced?threats=&asn=`
//! - `GET /api/v1/ip/enhanced` (caller's own address)
//! - `GET /api/v1/threats/{address}`
//! - `GET /api/v1/asn/{asn}`
//! - `GET /api/v1/services/status`
//!
//! Upstream trouble never changes the status code: only an unparsable
//! address or AS number is rejected.

use crate::address::{extract_client_ip, IpKey};
use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::orchestrator::IntelService;
use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Deserializer};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    service: IntelService,
    client_ip_headers: Arc<[String]>,
    use_first_ip: bool,
}

impl AppState {
    pub fn new(service: IntelService, server: &ServerConfig) -> Self {
        Self {
            service,
            client_ip_headers: server.client_ip_headers.clone().into(),
            use_first_ip: server.use_first_ip,
        }
    }
}

/// Sections of the enhanced report to include. Both default to true, and
/// a value that is not a recognizable flag reads as the default.
#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    #[serde(default = "default_true", deserialize_with = "lenient_flag")]
    threats: bool,
    #[serde(default = "default_true", deserialize_with = "lenient_flag")]
    asn: bool,
}

fn default_true() -> bool {
    true
}

/// Accepts `true/false`, `1/0`, `yes/no` and `on/off` in any case.
fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn lenient_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    Ok(parse_flag(&value).unwrap_or_else(default_true))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/ip/enhanced", get(own_report))
        .route("/api/v1/ip/:address/enhanced", get(enhanced_report))
        .route("/api/v1/threats/:address", get(threats))
        .route("/api/v1/asn/:asn", get(asn))
        .route("/api/v1/services/status", get(services_status))
        .with_state(state)
}

/// Serve the API until the listener fails.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "IP intelligence API listening");

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| anyhow::anyhow!("API server error: {}", e))
}

async fn enhanced_report(
    State(state): State<AppState>,
    Path(address): Path<String>,
    Query(query): Query<ReportQuery>,
) -> Result<Response, ApiError> {
    let ip = IpKey::parse(&address)?;
    Ok(report_response(&state, ip, &query).await)
}

async fn own_report(
    State(state): State<AppState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    Query(query): Query<ReportQuery>,
) -> Result<Response, ApiError> {
    let ip = client_ip(&state, &headers, peer.map(|ConnectInfo(addr)| addr))
        .ok_or(ApiError::UnknownClient)?;
    debug!(ip = %ip, "Resolved caller address");
    Ok(report_response(&state, ip, &query).await)
}

async fn report_response(state: &AppState, ip: IpKey, query: &ReportQuery) -> Response {
    let report = state.service.lookup(ip).await;
    if query.threats && query.asn {
        Json(report.as_ref()).into_response()
    } else {
        Json(report.filtered(query.threats, query.asn)).into_response()
    }
}

async fn threats(
    State(state): State<AppState>,
    Path(address): Path<String>,
) -> Result<Response, ApiError> {
    let ip = IpKey::parse(&address)?;
    let threat = state.service.lookup_threats(ip).await;
    Ok(Json(threat).into_response())
}

async fn asn(
    State(state): State<AppState>,
    Path(asn): Path<String>,
) -> Result<Response, ApiError> {
    let number = parse_asn(&asn).ok_or_else(|| ApiError::InvalidAsn(asn.clone()))?;
    let record = state.service.lookup_asn(number).await;
    Ok(Json(record.as_ref()).into_response())
}

async fn services_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.service.status().clone())
}

/// Accepts "15169", "AS15169" or "as15169".
fn parse_asn(input: &str) -> Option<u32> {
    let trimmed = input.trim();
    let digits = trimmed
        .strip_prefix("AS")
        .or_else(|| trimmed.strip_prefix("as"))
        .unwrap_or(trimmed);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// The caller's address: configured proxy headers first, then the peer.
fn client_ip(state: &AppState, headers: &HeaderMap, peer: Option<SocketAddr>) -> Option<IpKey> {
    let headers: HashMap<String, String> = headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();

    extract_client_ip(&headers, &state.client_ip_headers, state.use_first_ip)
        .or_else(|| peer.map(|addr| IpKey::from(addr.ip())))
}
