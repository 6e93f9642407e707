//! HTTP GET probe, also used to fetch aux load data.

use crate::check::{AuxData, CheckKey, CheckResult, Reason};
use axum::body::Body;
use axum::http::{header, Request};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use std::time::Duration;
use tokio::time::{self, Instant};
use url::Url;

/// Largest aux body accepted.
const AUX_BODY_LIMIT: usize = 1024 * 1024;

const USER_AGENT: &str = "checkd-health-check";

pub type HttpClient = Client<HttpConnector, Body>;

/// URL probed for `key`: the resolved address, with `check_info` as path.
pub fn probe_url(key: &CheckKey) -> Result<Url, url::ParseError> {
    let base = Url::parse(&format!("http://{}/", key.socket_addr()))?;
    match key.discriminator.as_deref() {
        Some(path) => base.join(path),
        None => Ok(base),
    }
}

fn host_header(hostname: &str, port: u16) -> String {
    if port == 80 {
        hostname.to_string()
    } else {
        format!("{}:{}", hostname, port)
    }
}

/// GET the probe URL. With `want_body`, the response body becomes aux data.
pub async fn probe(client: &HttpClient, key: &CheckKey, hostname: &str, timeout: Duration, want_body: bool) -> CheckResult {
    let started = Instant::now();

    let url = match probe_url(key) {
        Ok(url) => url,
        Err(e) => {
            return CheckResult::failure(Reason::RequestFailure, started, Instant::now())
                .with_detail(format!("invalid probe url: {}", e))
        }
    };

    let request = match Request::builder()
        .method("GET")
        .uri(url.as_str())
        .header(header::HOST, host_header(hostname, key.port))
        .header(header::USER_AGENT, USER_AGENT)
        .body(Body::empty())
    {
        Ok(req) => req,
        Err(e) => {
            return CheckResult::failure(Reason::RequestFailure, started, Instant::now())
                .with_detail(e.to_string())
        }
    };

    let exchange = async {
        let response = match client.request(request).await {
            Ok(response) => response,
            Err(e) => {
                let reason = if e.is_connect() {
                    Reason::ConnectFailure
                } else {
                    Reason::RequestFailure
                };
                return CheckResult::failure(reason, started, Instant::now()).with_detail(e.to_string());
            }
        };

        let status = response.status();
        if !(status.is_success() || status.is_redirection()) {
            return CheckResult::failure(Reason::ResponseFailure, started, Instant::now())
                .with_status(status.as_u16());
        }

        if !want_body {
            return CheckResult::success(started, Instant::now()).with_status(status.as_u16());
        }

        match axum::body::to_bytes(Body::new(response.into_body()), AUX_BODY_LIMIT).await {
            Ok(bytes) => {
                let aux = AuxData(String::from_utf8_lossy(&bytes).into_owned());
                CheckResult::success(started, Instant::now())
                    .with_status(status.as_u16())
                    .with_aux(aux)
            }
            Err(e) => CheckResult::failure(Reason::ResponseFailure, started, Instant::now())
                .with_status(status.as_u16())
                .with_detail(e.to_string()),
        }
    };

    match time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => CheckResult::failure(Reason::ResponseTimeout, started, Instant::now()),
    }
}
