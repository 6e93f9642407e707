use crate::admin::AdminState;
use crate::check::{CheckKey, GroupHealth};
use crate::config::ConfigError;
use crate::daemon::{CheckListing, DaemonError, DaemonStatus, ForceTarget, ReloadSummary};
use crate::dns::DnsEntryView;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::net::IpAddr;

type ApiError = (StatusCode, Json<Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    #[serde(flatten)]
    pub daemon: DaemonStatus,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        daemon: state.daemon.status(),
    })
}

pub async fn get_groups(State(state): State<AdminState>) -> Json<Vec<GroupHealth>> {
    Json(state.daemon.group_health())
}

pub async fn get_group(
    State(state): State<AdminState>,
    Path(name): Path<String>,
) -> Result<Json<GroupHealth>, ApiError> {
    state
        .daemon
        .index()
        .group_health(&name)
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("unknown group '{name}'")))
}

pub async fn get_checks(State(state): State<AdminState>) -> Json<Vec<CheckListing>> {
    Json(state.daemon.checks())
}

pub async fn get_dns(State(state): State<AdminState>) -> Json<Vec<DnsEntryView>> {
    Json(state.daemon.dns_entries())
}

#[derive(Debug, Deserialize)]
pub struct ForceRequest {
    pub host: Option<String>,
    pub address: Option<IpAddr>,
    #[serde(default = "default_down")]
    pub down: bool,
}

fn default_down() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct ForceResponse {
    pub down: bool,
    pub keys: Vec<CheckKey>,
}

pub async fn post_force(
    State(state): State<AdminState>,
    Json(request): Json<ForceRequest>,
) -> Result<Json<ForceResponse>, ApiError> {
    let target = match (request.host, request.address) {
        (Some(host), None) => ForceTarget::Host(host),
        (None, Some(address)) => ForceTarget::Address(address),
        _ => {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                "exactly one of 'host' or 'address' is required",
            ))
        }
    };

    let keys = state.daemon.force(&target, request.down);
    Ok(Json(ForceResponse {
        down: request.down,
        keys,
    }))
}

pub async fn post_reload(State(state): State<AdminState>) -> Result<Json<ReloadSummary>, ApiError> {
    let Some(path) = state.config_path.clone() else {
        return Err(api_error(StatusCode::CONFLICT, "daemon was started without a config file"));
    };

    match state.daemon.reload_from(&path) {
        Ok(summary) => Ok(Json(summary)),
        Err(DaemonError::Config(ConfigError::Validation(errors))) => {
            let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
            Err((
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": "configuration rejected", "details": messages })),
            ))
        }
        Err(e) => Err(api_error(StatusCode::BAD_REQUEST, e.to_string())),
    }
}
