//! DNS probe: the name must resolve.

use crate::check::{CheckResult, DualStack, Reason};
use crate::dns::Resolve;
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::Instant;

pub async fn probe(resolver: &dyn Resolve, name: &str, address: IpAddr, timeout: Duration) -> CheckResult {
    let started = Instant::now();
    let family = if address.is_ipv4() { DualStack::V4 } else { DualStack::V6 };

    match resolver.resolve(name, family, timeout).await {
        Ok(resolution) if !resolution.addresses.is_empty() => CheckResult::success(started, Instant::now()),
        Ok(_) => CheckResult::failure(Reason::DnsNotFound, started, Instant::now()),
        Err(e) => CheckResult::failure(e.reason(), started, Instant::now()).with_detail(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::{Resolution, ResolveError};
    use futures_util::future::BoxFuture;

    struct Fixed(Result<Resolution, ResolveError>);

    impl Resolve for Fixed {
        fn resolve<'a>(&'a self, _: &'a str, _: DualStack, _: Duration) -> BoxFuture<'a, Result<Resolution, ResolveError>> {
            let answer = self.0.clone();
            Box::pin(async move { answer })
        }
    }

    #[tokio::test]
    async fn test_outcomes() {
        let addr: IpAddr = "10.0.0.53".parse().unwrap();
        let ok = Fixed(Ok(Resolution { addresses: vec![addr], ttl: None }));
        assert!(probe(&ok, "a.example.com", addr, Duration::from_secs(1)).await.is_success());

        let timeout = Fixed(Err(ResolveError::Timeout));
        let result = probe(&timeout, "a.example.com", addr, Duration::from_secs(1)).await;
        assert_eq!(result.reason, Reason::DnsTimeout);
    }
}
