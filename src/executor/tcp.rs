//! TCP connect probe.

use crate::check::{CheckResult, Reason};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{self, Instant};

pub async fn probe(addr: SocketAddr, timeout: Duration) -> CheckResult {
    let started = Instant::now();
    match time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => CheckResult::success(started, Instant::now()),
        Ok(Err(e)) => {
            tracing::debug!(addr = %addr, error = %e, "TCP connect failed");
            CheckResult::failure(Reason::ConnectFailure, started, Instant::now()).with_detail(e.to_string())
        }
        Err(_) => CheckResult::failure(Reason::ConnectTimeout, started, Instant::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_connect_ok_and_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let ok = probe(addr, Duration::from_secs(2)).await;
        assert!(ok.is_success());

        drop(listener);
        let refused = probe(addr, Duration::from_secs(2)).await;
        assert_eq!(refused.reason, Reason::ConnectFailure);
    }
}
