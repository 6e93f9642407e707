//! Shared utilities for integration tests.

#![allow(dead_code)]

use checkd::check::{CheckKey, CheckResult, CheckType, DualStack, ParamOverrides, Reason};
use checkd::config::{DaemonConfig, HostGroupConfig};
use checkd::dns::{Resolution, Resolve, ResolveError};
use checkd::executor::{Execute, Probe};
use futures_util::future::BoxFuture;
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::time::Instant;

/// Executor with scripted outcomes that records every call and the peak
/// per-key overlap.
pub struct ScriptedExecutor {
    delay: Duration,
    default_ok: AtomicBool,
    scripts: Mutex<HashMap<CheckKey, VecDeque<bool>>>,
    running: Mutex<HashMap<CheckKey, usize>>,
    max_overlap: AtomicUsize,
    calls: Mutex<Vec<(CheckKey, Instant)>>,
}

impl ScriptedExecutor {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            default_ok: AtomicBool::new(true),
            scripts: Mutex::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
            max_overlap: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Outcome used once a key's script runs out.
    pub fn set_default(&self, ok: bool) {
        self.default_ok.store(ok, Ordering::SeqCst);
    }

    pub fn script(&self, key: &CheckKey, outcomes: &[bool]) {
        self.scripts
            .lock()
            .unwrap()
            .insert(key.clone(), outcomes.iter().copied().collect());
    }

    pub fn calls(&self) -> Vec<(CheckKey, Instant)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, key: &CheckKey) -> Vec<Instant> {
        self.calls()
            .into_iter()
            .filter(|(k, _)| k == key)
            .map(|(_, at)| at)
            .collect()
    }

    pub fn max_overlap(&self) -> usize {
        self.max_overlap.load(Ordering::SeqCst)
    }
}

impl Execute for ScriptedExecutor {
    fn execute<'a>(&'a self, probe: &'a Probe, _timeout: Duration) -> BoxFuture<'a, CheckResult> {
        Box::pin(async move {
            let key = probe.key.clone();
            let started = Instant::now();
            {
                let mut running = self.running.lock().unwrap();
                let count = running.entry(key.clone()).or_insert(0);
                *count += 1;
                self.max_overlap.fetch_max(*count, Ordering::SeqCst);
            }
            self.calls.lock().unwrap().push((key.clone(), started));

            tokio::time::sleep(self.delay).await;

            if let Some(count) = self.running.lock().unwrap().get_mut(&key) {
                *count -= 1;
            }
            let ok = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(&key)
                .and_then(|s| s.pop_front())
                .unwrap_or_else(|| self.default_ok.load(Ordering::SeqCst));

            if ok {
                CheckResult::success(started, Instant::now())
            } else {
                CheckResult::failure(Reason::ConnectFailure, started, Instant::now())
            }
        })
    }
}

/// Resolver answering from a mutable table.
pub struct StaticResolver {
    hosts: Mutex<HashMap<String, Vec<IpAddr>>>,
    failing: Mutex<HashSet<String>>,
    ttl: Option<Duration>,
    lookups: AtomicUsize,
}

impl StaticResolver {
    pub fn new(ttl: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            hosts: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            ttl,
            lookups: AtomicUsize::new(0),
        })
    }

    pub fn set(&self, host: &str, addresses: &[&str]) {
        let addresses = addresses.iter().map(|a| a.parse().unwrap()).collect();
        self.hosts.lock().unwrap().insert(host.to_string(), addresses);
    }

    /// Make lookups of `host` time out until `fail(host, false)`.
    pub fn fail(&self, host: &str, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(host.to_string());
        } else {
            set.remove(host);
        }
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl Resolve for StaticResolver {
    fn resolve<'a>(
        &'a self,
        host: &'a str,
        _family: DualStack,
        _timeout: Duration,
    ) -> BoxFuture<'a, Result<Resolution, ResolveError>> {
        Box::pin(async move {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.failing.lock().unwrap().contains(host) {
                return Err(ResolveError::Timeout);
            }
            match self.hosts.lock().unwrap().get(host) {
                Some(addresses) => Ok(Resolution {
                    addresses: addresses.clone(),
                    ttl: self.ttl,
                }),
                None => Err(ResolveError::NotFound(host.to_string())),
            }
        })
    }
}

pub fn group(name: &str, hosts: &[&str], check_type: CheckType, port: u16) -> HostGroupConfig {
    HostGroupConfig {
        name: name.to_string(),
        hosts: hosts.iter().map(|h| h.to_string()).collect(),
        check_type,
        port: Some(port),
        check_info: None,
        dual_stack: DualStack::V4,
        params: ParamOverrides::default(),
    }
}

/// A config with fast checks: 1s TTL, 500ms timeout, no retries.
pub fn fast_config(groups: Vec<HostGroupConfig>) -> DaemonConfig {
    let mut config = DaemonConfig::default();
    config.defaults.ttl_ms = 1_000;
    config.defaults.timeout_ms = 500;
    config.defaults.max_retries = 0;
    config.scheduler.monitor_frequency_secs = 1;
    config.host_groups = groups;
    config
}

pub fn key(address: &str, check_type: CheckType, port: u16) -> CheckKey {
    CheckKey {
        address: address.parse().unwrap(),
        port,
        check_type,
        discriminator: None,
    }
}

/// Accept TCP connections on an ephemeral port and close them immediately.
pub async fn start_tcp_backend() -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let _ = socket.shutdown().await;
        }
    });
    (addr, handle)
}

/// Start a programmable HTTP backend on an ephemeral port.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let f = f.clone();
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let (status, body) = f().await;
                let status_text = match status {
                    200 => "200 OK",
                    404 => "404 Not Found",
                    500 => "500 Internal Server Error",
                    503 => "503 Service Unavailable",
                    _ => "200 OK",
                };
                let response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status_text,
                    body.len(),
                    body
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    addr
}

/// Poll `f` every 20ms until it holds or `within` passes.
pub async fn wait_until<F: Fn() -> bool>(within: Duration, f: F) -> bool {
    let deadline = Instant::now() + within;
    while Instant::now() < deadline {
        if f() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    f()
}
