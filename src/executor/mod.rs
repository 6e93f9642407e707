//! Check executors.
//!
//! # Responsibilities
//! - Run one probe for a check key and always return a `CheckResult`
//! - Honour the per-check timeout
//!
//! # Design Decisions
//! - One capability (`Execute`) over a closed set of probe types, selected
//!   by the key's check type
//! - Protocol errors are results, never `Err`

pub mod dns;
pub mod ftp;
pub mod http;
pub mod tcp;

use crate::check::{CheckKey, CheckParams, CheckResult, CheckType};
use crate::dns::Resolve;
use futures_util::future::BoxFuture;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Everything a probe needs to know about its target.
#[derive(Debug, Clone)]
pub struct Probe {
    pub key: CheckKey,
    /// One hostname the key was resolved from (HTTP Host header, DNS name).
    pub hostname: String,
    pub params: Arc<CheckParams>,
}

/// Runs a probe. Implementations must return within `timeout`.
pub trait Execute: Send + Sync + 'static {
    fn execute<'a>(&'a self, probe: &'a Probe, timeout: Duration) -> BoxFuture<'a, CheckResult>;
}

/// The built-in probes.
pub struct ProbeSet {
    client: http::HttpClient,
    resolver: Arc<dyn Resolve>,
}

impl ProbeSet {
    pub fn new(resolver: Arc<dyn Resolve>) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client, resolver }
    }
}

impl Execute for ProbeSet {
    fn execute<'a>(&'a self, probe: &'a Probe, timeout: Duration) -> BoxFuture<'a, CheckResult> {
        Box::pin(async move {
            let key = &probe.key;
            match key.check_type {
                CheckType::None => {
                    let now = Instant::now();
                    CheckResult::success(now, now)
                }
                CheckType::Tcp => tcp::probe(key.socket_addr(), timeout).await,
                CheckType::Ftp => ftp::probe(key.socket_addr(), timeout).await,
                CheckType::Http => http::probe(&self.client, key, &probe.hostname, timeout, false).await,
                CheckType::Aux => http::probe(&self.client, key, &probe.hostname, timeout, true).await,
                CheckType::Dns => {
                    let name = key.discriminator.as_deref().unwrap_or(&probe.hostname);
                    dns::probe(self.resolver.as_ref(), name, key.address, timeout).await
                }
            }
        })
    }
}
