//! FTP greeting probe: connect and expect a `220` banner.

use crate::check::{CheckResult, Reason};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{self, Instant};

pub async fn probe(addr: SocketAddr, timeout: Duration) -> CheckResult {
    let started = Instant::now();
    let deadline = started + timeout;

    let stream = match time::timeout_at(deadline, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return CheckResult::failure(Reason::ConnectFailure, started, Instant::now())
                .with_detail(e.to_string())
        }
        Err(_) => return CheckResult::failure(Reason::ConnectTimeout, started, Instant::now()),
    };

    let mut reader = BufReader::new(stream);
    let mut greeting = String::new();
    let read = time::timeout_at(deadline, reader.read_line(&mut greeting)).await;
    let finished = Instant::now();

    let result = match read {
        Ok(Ok(0)) => CheckResult::failure(Reason::ResponseFailure, started, finished)
            .with_detail("connection closed before greeting"),
        Ok(Ok(_)) if greeting.starts_with("220") => CheckResult::success(started, finished).with_status(220),
        Ok(Ok(_)) => CheckResult::failure(Reason::ResponseFailure, started, finished)
            .with_detail(greeting.trim_end().to_string()),
        Ok(Err(e)) => CheckResult::failure(Reason::ResponseFailure, started, finished).with_detail(e.to_string()),
        Err(_) => CheckResult::failure(Reason::ResponseTimeout, started, finished),
    };

    let mut stream = reader.into_inner();
    let _ = time::timeout(Duration::from_millis(100), stream.write_all(b"QUIT\r\n")).await;
    result
}
