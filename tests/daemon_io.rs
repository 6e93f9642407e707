//! End-to-end tests against real sockets: probes, warm start, admin API.

use checkd::admin::{serve_admin, AdminState};
use checkd::check::{CheckType, Health};
use checkd::config::StorageKind;
use checkd::daemon::Daemon;
use checkd::dns::SystemResolver;
use checkd::executor::ProbeSet;
use checkd::lifecycle::Shutdown;
use checkd::storage::{open_store, MemoryStore};
use common::{fast_config, group, wait_until, ScriptedExecutor, StaticResolver};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

mod common;

fn health_of(daemon: &Daemon) -> Option<Health> {
    daemon.checks().first().map(|c| c.view.health)
}

fn real_daemon(config: checkd::DaemonConfig) -> Arc<Daemon> {
    let resolver = Arc::new(SystemResolver);
    let executor = Arc::new(ProbeSet::new(resolver.clone()));
    Daemon::new(config, Arc::new(MemoryStore::new()), executor, resolver).unwrap()
}

#[tokio::test]
async fn test_tcp_check_follows_backend() {
    let (addr, backend) = common::start_tcp_backend().await;
    let mut config = fast_config(vec![group("svc", &["127.0.0.1"], CheckType::Tcp, addr.port())]);
    config.defaults.ttl_ms = 200;
    config.defaults.timeout_ms = 150;

    let daemon = real_daemon(config);
    daemon.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || health_of(&daemon) == Some(Health::Up)).await);
    assert!(daemon.group_health()[0].healthy);

    backend.abort();
    let _ = backend.await;
    assert!(wait_until(Duration::from_secs(5), || health_of(&daemon) == Some(Health::Down)).await);
    assert!(!daemon.group_health()[0].healthy);
    daemon.stop().await;
}

#[tokio::test]
async fn test_http_check_follows_status_code() {
    let failing = Arc::new(AtomicBool::new(false));
    let flag = failing.clone();
    let addr = common::start_programmable_backend(move || {
        let flag = flag.clone();
        async move {
            if flag.load(Ordering::SeqCst) {
                (503, "unavailable".to_string())
            } else {
                (200, "ok".to_string())
            }
        }
    })
    .await;

    let mut web = group("web", &["127.0.0.1"], CheckType::Http, addr.port());
    web.check_info = Some("/health".into());
    let mut config = fast_config(vec![web]);
    config.defaults.ttl_ms = 200;
    config.defaults.timeout_ms = 150;

    let daemon = real_daemon(config);
    daemon.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || health_of(&daemon) == Some(Health::Up)).await);

    failing.store(true, Ordering::SeqCst);
    assert!(wait_until(Duration::from_secs(5), || health_of(&daemon) == Some(Health::Down)).await);
    let check = daemon.checks().remove(0);
    assert_eq!(check.view.last_reason.as_deref(), Some("response_failure"));
    daemon.stop().await;
}

#[tokio::test]
async fn test_warm_start_restores_results() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fast_config(vec![group("ssh", &["10.0.0.1"], CheckType::Tcp, 22)]);
    config.defaults.ttl_ms = 60_000;
    config.storage.kind = StorageKind::File;
    config.storage.path = dir.path().join("results.json").to_string_lossy().into_owned();

    let first = ScriptedExecutor::new(Duration::ZERO);
    let daemon = Daemon::new(
        config.clone(),
        open_store(&config.storage).unwrap(),
        first.clone(),
        StaticResolver::new(None),
    )
    .unwrap();
    daemon.start().unwrap();
    assert!(wait_until(Duration::from_secs(5), || health_of(&daemon) == Some(Health::Up)).await);
    daemon.stop().await;
    assert_eq!(first.calls().len(), 1);

    let second = ScriptedExecutor::new(Duration::ZERO);
    second.set_default(false);
    let daemon = Daemon::new(
        config.clone(),
        open_store(&config.storage).unwrap(),
        second.clone(),
        StaticResolver::new(None),
    )
    .unwrap();
    daemon.start().unwrap();

    assert_eq!(health_of(&daemon), Some(Health::Up));
    let next = daemon.checks()[0].next_check_ms.unwrap();
    assert!(next > 50_000, "next check in {next}ms");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(second.calls().is_empty());
    daemon.stop().await;
}

async fn start_admin(daemon: Arc<Daemon>, config_path: Option<std::path::PathBuf>) -> (String, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let shutdown = Shutdown::new();
    let state = AdminState { daemon, config_path };
    tokio::spawn(serve_admin(listener, state, shutdown.subscribe()));
    (url, shutdown)
}

#[tokio::test]
async fn test_admin_api() {
    let mut config = fast_config(vec![group("ssh", &["10.0.0.1"], CheckType::Tcp, 22)]);
    config.admin.api_key = "test-key".into();
    config.defaults.ttl_ms = 60_000;

    let daemon = Daemon::new(
        config,
        Arc::new(MemoryStore::new()),
        ScriptedExecutor::new(Duration::ZERO),
        StaticResolver::new(None),
    )
    .unwrap();
    daemon.start().unwrap();
    let (url, shutdown) = start_admin(daemon.clone(), None).await;
    let client = reqwest::Client::new();

    let res = client.get(format!("{url}/admin/status")).send().await.unwrap();
    assert_eq!(res.status(), 401);
    let res = client
        .get(format!("{url}/admin/status"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 401);

    let status: Value = client
        .get(format!("{url}/admin/status"))
        .bearer_auth("test-key")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["checks"], 1);
    assert_eq!(status["generation"], 1);

    let groups: Value = client
        .get(format!("{url}/admin/groups"))
        .bearer_auth("test-key")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(groups.as_array().unwrap().len(), 1);

    let res = client
        .get(format!("{url}/admin/groups/nope"))
        .bearer_auth("test-key")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);

    let res = client
        .post(format!("{url}/admin/force"))
        .bearer_auth("test-key")
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 400);

    let forced: Value = client
        .post(format!("{url}/admin/force"))
        .bearer_auth("test-key")
        .json(&json!({ "address": "10.0.0.1" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(forced["keys"].as_array().unwrap().len(), 1);

    let checks: Value = client
        .get(format!("{url}/admin/checks"))
        .bearer_auth("test-key")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(checks[0]["health"], "down");
    assert_eq!(checks[0]["forced_down"], true);

    let res = client
        .post(format!("{url}/admin/reload"))
        .bearer_auth("test-key")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 409);

    shutdown.trigger();
    daemon.stop().await;
}

#[tokio::test]
async fn test_admin_reload_applies_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("checkd.toml");
    let write = |hosts: &str| {
        std::fs::write(
            &path,
            format!(
                r#"
[admin]
api_key = "test-key"

[[host_groups]]
name = "ssh"
hosts = [{hosts}]
check_type = "tcp"
port = 22
ttl_ms = 60000
"#
            ),
        )
        .unwrap();
    };
    write(r#""10.0.0.1""#);

    let config = checkd::config::load_config(&path).unwrap();
    let daemon = Daemon::new(
        config,
        Arc::new(MemoryStore::new()),
        ScriptedExecutor::new(Duration::ZERO),
        StaticResolver::new(None),
    )
    .unwrap();
    daemon.start().unwrap();
    let (url, shutdown) = start_admin(daemon.clone(), Some(path.clone())).await;
    let client = reqwest::Client::new();

    write(r#""10.0.0.1", "10.0.0.2""#);
    let summary: Value = client
        .post(format!("{url}/admin/reload"))
        .bearer_auth("test-key")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary["added"], 1);
    assert_eq!(summary["removed"], 0);
    assert_eq!(daemon.index().len(), 2);

    write(r#""""#);
    let res = client
        .post(format!("{url}/admin/reload"))
        .bearer_auth("test-key")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 422);
    assert_eq!(daemon.index().len(), 2);

    shutdown.trigger();
    daemon.stop().await;
}
