//! Probe outcomes.

use crate::check::state::Health;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;

/// Transport-level outcome of a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Response {
    #[default]
    None,
    Connected,
    Failed,
    DnsFailed,
}

/// Why a probe succeeded or failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    Success,
    DnsNotFound,
    DnsTimeout,
    DnsFailure,
    ConnectTimeout,
    ConnectFailure,
    RequestFailure,
    ResponseTimeout,
    ResponseFailure,
    InternalError,
}

impl Reason {
    pub fn is_success(&self) -> bool {
        matches!(self, Reason::Success)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Reason::Success => "success",
            Reason::DnsNotFound => "dns_not_found",
            Reason::DnsTimeout => "dns_timeout",
            Reason::DnsFailure => "dns_failure",
            Reason::ConnectTimeout => "connect_timeout",
            Reason::ConnectFailure => "connect_failure",
            Reason::RequestFailure => "request_failure",
            Reason::ResponseTimeout => "response_timeout",
            Reason::ResponseFailure => "response_failure",
            Reason::InternalError => "internal_error",
        }
    }

    fn response(&self) -> Response {
        match self {
            Reason::Success => Response::Connected,
            Reason::DnsNotFound | Reason::DnsTimeout | Reason::DnsFailure => Response::DnsFailed,
            _ => Response::Failed,
        }
    }
}

/// Opaque load data returned by an aux probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxData(pub String);

/// One immutable probe outcome.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub response: Response,
    pub reason: Reason,
    pub started: Instant,
    pub finished: Instant,
    pub status_code: Option<u16>,
    pub detail: Option<String>,
    pub aux: Option<AuxData>,
}

impl CheckResult {
    pub fn success(started: Instant, finished: Instant) -> Self {
        Self::new(Reason::Success, started, finished)
    }

    pub fn failure(reason: Reason, started: Instant, finished: Instant) -> Self {
        Self::new(reason, started, finished)
    }

    /// Result recorded when the probe itself crashed.
    pub fn internal_error(started: Instant, detail: impl Into<String>) -> Self {
        Self::new(Reason::InternalError, started, Instant::now()).with_detail(detail)
    }

    fn new(reason: Reason, started: Instant, finished: Instant) -> Self {
        Self {
            response: reason.response(),
            reason,
            started,
            finished,
            status_code: None,
            detail: None,
            aux: None,
        }
    }

    pub fn with_status(mut self, code: u16) -> Self {
        self.status_code = Some(code);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_aux(mut self, aux: AuxData) -> Self {
        self.aux = Some(aux);
        self
    }

    /// Reclassify this result, keeping its timestamps.
    pub fn reclassify(mut self, reason: Reason) -> Self {
        self.reason = reason;
        self.response = reason.response();
        self
    }

    pub fn rtt(&self) -> Duration {
        self.finished.saturating_duration_since(self.started)
    }

    pub fn is_success(&self) -> bool {
        self.reason.is_success()
    }
}

/// Serializable form of a terminal result, as published to the result store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub health: Health,
    pub reason: Reason,
    pub response: Response,
    pub status_code: Option<u16>,
    pub rtt_ms: u64,
    pub smoothed_rtt_ms: u64,
    pub slow: bool,
    /// Wall-clock completion time, milliseconds since the Unix epoch.
    pub checked_at_ms: u64,
    pub groups: Vec<String>,
    pub hosts: Vec<String>,
}
