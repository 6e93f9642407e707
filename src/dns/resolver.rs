//! Name resolution seam.

use crate::check::{DualStack, Reason};
use futures_util::future::BoxFuture;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

/// Addresses returned by one lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub addresses: Vec<IpAddr>,
    /// Record TTL, when the resolver knows it.
    pub ttl: Option<Duration>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("no addresses found for {0}")]
    NotFound(String),

    #[error("lookup timed out")]
    Timeout,

    #[error("lookup failed: {0}")]
    Failed(String),
}

impl ResolveError {
    pub fn reason(&self) -> Reason {
        match self {
            ResolveError::NotFound(_) => Reason::DnsNotFound,
            ResolveError::Timeout => Reason::DnsTimeout,
            ResolveError::Failed(_) => Reason::DnsFailure,
        }
    }
}

/// Hostname → addresses.
pub trait Resolve: Send + Sync + 'static {
    fn resolve<'a>(
        &'a self,
        host: &'a str,
        family: DualStack,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<Resolution, ResolveError>>;
}

/// Resolver backed by the operating system (`getaddrinfo` via tokio).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl Resolve for SystemResolver {
    fn resolve<'a>(
        &'a self,
        host: &'a str,
        family: DualStack,
        timeout: Duration,
    ) -> BoxFuture<'a, Result<Resolution, ResolveError>> {
        Box::pin(async move {
            if let Ok(addr) = host.parse::<IpAddr>() {
                return Ok(Resolution {
                    addresses: vec![addr],
                    ttl: None,
                });
            }

            let lookup = tokio::net::lookup_host((host, 0));
            let found = match tokio::time::timeout(timeout, lookup).await {
                Ok(Ok(addrs)) => addrs,
                Ok(Err(e)) => return Err(ResolveError::Failed(e.to_string())),
                Err(_) => return Err(ResolveError::Timeout),
            };

            let mut addresses: Vec<IpAddr> = found
                .map(|sa| sa.ip())
                .filter(|ip| family.accepts(ip))
                .collect();
            addresses.sort();
            addresses.dedup();

            if addresses.is_empty() {
                return Err(ResolveError::NotFound(host.to_string()));
            }
            Ok(Resolution {
                addresses,
                ttl: None,
            })
        })
    }
}
