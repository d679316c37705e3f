//! Acceptance tests for the health service façade.
//!
//! The NSM peer is a recording mock; persistence runs against a temp
//! directory, so the full register → persist → threshold pipeline and the
//! lifecycle flag transitions are exercised end to end.

use async_trait::async_trait;
use nhm_core::config::{NhmConfig, NodeSettings, UserlandSettings};
use nhm_core::error::{NhmError, NhmResult};
use nhm_core::nsm::{
    NodeStateManager, NsmErrorStatus, RestartReason, SHUTDOWN_TYPE_FAST, SHUTDOWN_TYPE_RUNUP,
};
use nhm_core::persistence::{encode_history, FileKeyValueStore, Persistence, HISTORY_FILE_NAME};
use nhm_core::service::HealthService;
use nhm_core::types::{AppErrorStatus, AppStatus, FailedApp, LcInfo, NodeShutdownState};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
enum NsmCall {
    SetAppHealthStatus { app_name: String, running: bool },
    RequestNodeRestart { reason: i32, restart_type: u32 },
}

#[derive(Debug, Clone, Copy)]
enum RestartReply {
    Status(NsmErrorStatus),
    TransportError,
}

// Recording NSM double with configurable replies
#[derive(Clone)]
struct MockNsm {
    calls: Arc<Mutex<Vec<NsmCall>>>,
    restart_reply: Arc<Mutex<RestartReply>>,
    health_call_fails: Arc<Mutex<bool>>,
}

impl MockNsm {
    fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            restart_reply: Arc::new(Mutex::new(RestartReply::Status(NsmErrorStatus::Ok))),
            health_call_fails: Arc::new(Mutex::new(false)),
        }
    }

    fn calls(&self) -> Vec<NsmCall> {
        self.calls.lock().unwrap().clone()
    }

    fn restart_calls(&self) -> Vec<NsmCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, NsmCall::RequestNodeRestart { .. }))
            .collect()
    }

    fn set_restart_reply(&self, reply: RestartReply) {
        *self.restart_reply.lock().unwrap() = reply;
    }

    fn fail_health_calls(&self, fail: bool) {
        *self.health_call_fails.lock().unwrap() = fail;
    }
}

#[async_trait]
impl NodeStateManager for MockNsm {
    async fn register_shutdown_client(
        &mut self,
        _client_addr: &str,
        _object_path: &str,
        _shutdown_mode: u32,
        _timeout_ms: u32,
    ) -> NhmResult<NsmErrorStatus> {
        Ok(NsmErrorStatus::Ok)
    }

    async fn set_app_health_status(
        &mut self,
        app_name: &str,
        running: bool,
    ) -> NhmResult<NsmErrorStatus> {
        if *self.health_call_fails.lock().unwrap() {
            return Err(NhmError::transport("NSM unreachable"));
        }
        self.calls.lock().unwrap().push(NsmCall::SetAppHealthStatus {
            app_name: app_name.to_string(),
            running,
        });
        Ok(NsmErrorStatus::Ok)
    }

    async fn request_node_restart(
        &mut self,
        reason: RestartReason,
        restart_type: u32,
    ) -> NhmResult<NsmErrorStatus> {
        self.calls.lock().unwrap().push(NsmCall::RequestNodeRestart {
            reason: reason.code(),
            restart_type,
        });
        match *self.restart_reply.lock().unwrap() {
            RestartReply::Status(status) => Ok(status),
            RestartReply::TransportError => Err(NhmError::transport("NSM unreachable")),
        }
    }
}

fn config(historic_lc_count: u32, max_failed_apps: u32, no_restart_apps: &[&str]) -> NhmConfig {
    NhmConfig {
        node: NodeSettings {
            historic_lc_count,
            max_failed_apps,
            no_restart_apps: no_restart_apps.iter().map(|s| s.to_string()).collect(),
            ..NodeSettings::default()
        },
        userland: UserlandSettings::default(),
    }
}

fn make_service(dir: &Path, config: &NhmConfig) -> (HealthService, MockNsm) {
    let store = FileKeyValueStore::open(dir);
    let persistence = Persistence::new(Box::new(store), dir, config.node.historic_lc_count);
    let nsm = MockNsm::new();
    let (events, _) = broadcast::channel(64);
    let service = HealthService::new(config, persistence, Box::new(nsm.clone()), events);
    (service, nsm)
}

fn read_flag(dir: &Path) -> NodeShutdownState {
    let store = FileKeyValueStore::open(dir);
    Persistence::new(Box::new(store), dir, 0).read_shutdown_flag()
}

/// Drive `name` to a fail count of `count`, leaving it in the failed state.
async fn fail_times(service: &mut HealthService, name: &str, count: u32) {
    for _ in 1..count {
        service.register_app_status(name, AppStatus::Failed).await;
        service.register_app_status(name, AppStatus::Ok).await;
    }
    service.register_app_status(name, AppStatus::Failed).await;
}

/// History fixture: two previous LCs, both after a clean shutdown, the
/// first with failures of A and B.
fn write_history_fixture(dir: &Path) {
    let previous = vec![
        LcInfo {
            start_state: NodeShutdownState::Shutdown,
            failed_apps: vec![
                FailedApp { name: "A".into(), failcount: 4 },
                FailedApp { name: "B".into(), failcount: 5 },
            ],
        },
        LcInfo {
            start_state: NodeShutdownState::Shutdown,
            failed_apps: Vec::new(),
        },
    ];
    let encoded = encode_history(0x0001_0000, &previous, previous.len() as u32);
    std::fs::write(dir.join(HISTORY_FILE_NAME), encoded).expect("write history fixture");
}

#[tokio::test]
async fn threshold_trips_exactly_once_at_the_limit() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut service, nsm) = make_service(dir.path(), &config(4, 2, &[]));
    service.startup();
    service.activate();

    service.register_app_status("A", AppStatus::Failed).await;
    assert!(nsm.restart_calls().is_empty());

    service.register_app_status("B", AppStatus::Failed).await;
    assert_eq!(
        nsm.restart_calls(),
        vec![NsmCall::RequestNodeRestart {
            reason: RestartReason::ApplicationFailure.code(),
            restart_type: 1,
        }]
    );
}

#[tokio::test]
async fn repeated_failure_reports_do_not_retrip_the_threshold() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut service, nsm) = make_service(dir.path(), &config(4, 2, &[]));
    service.startup();

    service.register_app_status("A", AppStatus::Failed).await;
    service.register_app_status("B", AppStatus::Failed).await;
    service.register_app_status("B", AppStatus::Failed).await;
    assert_eq!(nsm.restart_calls().len(), 1);
}

#[tokio::test]
async fn deny_listed_app_cannot_request_a_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut service, nsm) = make_service(dir.path(), &config(4, 0, &["A1", "A2"]));
    service.startup();

    assert_eq!(service.request_node_restart("A3").await, AppErrorStatus::Ok);
    assert_eq!(nsm.restart_calls().len(), 1);

    assert_eq!(
        service.request_node_restart("A1").await,
        AppErrorStatus::RestartNotPossible
    );
    // The NSM was not contacted for the deny-listed app.
    assert_eq!(nsm.restart_calls().len(), 1);
}

#[tokio::test]
async fn nsm_replies_map_to_restart_results() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut service, nsm) = make_service(dir.path(), &config(4, 0, &[]));
    service.startup();

    nsm.set_restart_reply(RestartReply::Status(NsmErrorStatus::Error));
    assert_eq!(
        service.request_node_restart("app").await,
        AppErrorStatus::RestartNotPossible
    );

    nsm.set_restart_reply(RestartReply::TransportError);
    assert_eq!(service.request_node_restart("app").await, AppErrorStatus::Error);
}

#[tokio::test]
async fn per_app_statistics_with_loaded_history() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_history_fixture(dir.path());

    let (mut service, _nsm) = make_service(dir.path(), &config(5, 0, &[]));
    service.startup();
    fail_times(&mut service, "A", 3).await;
    fail_times(&mut service, "B", 4).await;
    fail_times(&mut service, "C", 5).await;

    let reply = service.read_statistics("A");
    assert_eq!(reply.current_fail_count, 3);
    assert_eq!(reply.total_failures, 7);
    assert_eq!(reply.total_lifecycles, 3);
    assert_eq!(reply.error, AppErrorStatus::Ok);
}

#[tokio::test]
async fn node_statistics_with_loaded_history() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_history_fixture(dir.path());

    let (mut service, _nsm) = make_service(dir.path(), &config(5, 0, &[]));
    service.startup();
    fail_times(&mut service, "A", 3).await;
    fail_times(&mut service, "B", 4).await;
    fail_times(&mut service, "C", 5).await;

    // Only the current LC (flag was never written) counts as unclean.
    let reply = service.read_statistics("");
    assert_eq!(reply.current_fail_count, 3);
    assert_eq!(reply.total_failures, 1);
    assert_eq!(reply.total_lifecycles, 3);
    assert_eq!(reply.error, AppErrorStatus::Ok);
}

#[tokio::test]
async fn node_statistics_respect_the_historic_bound() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_history_fixture(dir.path());

    let (mut service, _nsm) = make_service(dir.path(), &config(1, 0, &[]));
    service.startup();
    fail_times(&mut service, "A", 3).await;
    fail_times(&mut service, "B", 4).await;
    fail_times(&mut service, "C", 5).await;

    let reply = service.read_statistics("");
    assert_eq!(reply.current_fail_count, 3);
    assert_eq!(reply.total_failures, 1);
    assert_eq!(reply.total_lifecycles, 2);
}

#[tokio::test]
async fn lifecycle_flag_transitions() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut service, _nsm) = make_service(dir.path(), &config(4, 0, &[]));

    assert_eq!(read_flag(dir.path()), NodeShutdownState::NotSet);

    service.startup();
    service.activate();
    assert_eq!(read_flag(dir.path()), NodeShutdownState::Started);

    let reply = service.handle_lifecycle_request(SHUTDOWN_TYPE_FAST, 1).await;
    assert_eq!(reply, NsmErrorStatus::Ok);
    assert_eq!(read_flag(dir.path()), NodeShutdownState::Shutdown);

    let reply = service.handle_lifecycle_request(SHUTDOWN_TYPE_RUNUP, 2).await;
    assert_eq!(reply, NsmErrorStatus::Ok);
    assert_eq!(read_flag(dir.path()), NodeShutdownState::Started);
}

#[tokio::test]
async fn every_status_report_is_broadcast_and_forwarded() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut service, nsm) = make_service(dir.path(), &config(4, 0, &[]));
    service.startup();

    let mut events = service.subscribe();

    // Even a report about an unknown, healthy app is broadcast.
    service.register_app_status("app", AppStatus::Ok).await;
    service.register_app_status("app", AppStatus::Failed).await;
    service.register_app_status("app", AppStatus::Restarting).await;

    let event = events.recv().await.expect("event");
    assert_eq!((event.name.as_str(), event.status), ("app", AppStatus::Ok));
    let event = events.recv().await.expect("event");
    assert_eq!((event.name.as_str(), event.status), ("app", AppStatus::Failed));
    let event = events.recv().await.expect("event");
    assert_eq!(
        (event.name.as_str(), event.status),
        ("app", AppStatus::Restarting)
    );

    assert_eq!(
        nsm.calls()
            .into_iter()
            .filter_map(|call| match call {
                NsmCall::SetAppHealthStatus { running, .. } => Some(running),
                _ => None,
            })
            .collect::<Vec<_>>(),
        vec![true, false, false]
    );
}

#[tokio::test]
async fn nsm_forwarding_failure_does_not_stop_tracking() {
    let dir = tempfile::tempdir().expect("tempdir");
    let (mut service, nsm) = make_service(dir.path(), &config(4, 0, &[]));
    service.startup();

    let mut events = service.subscribe();
    nsm.fail_health_calls(true);

    service.register_app_status("app", AppStatus::Failed).await;

    // Signal still emitted, failure still recorded.
    let event = events.recv().await.expect("event");
    assert_eq!(event.status, AppStatus::Failed);
    let reply = service.read_statistics("app");
    assert_eq!(reply.current_fail_count, 1);
}

#[tokio::test]
async fn failures_are_persisted_across_a_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(4, 0, &[]);

    {
        let (mut service, _nsm) = make_service(dir.path(), &cfg);
        service.startup();
        service.activate();
        fail_times(&mut service, "app", 2).await;
    }

    // Next life cycle: the previous one is loaded from disk.
    let (mut service, _nsm) = make_service(dir.path(), &cfg);
    service.startup();

    let reply = service.read_statistics("app");
    assert_eq!(reply.current_fail_count, 0);
    assert_eq!(reply.total_failures, 2);
    // The previous LC started cleanly never being shut down, so node
    // statistics see two unclean starts.
    let reply = service.read_statistics("");
    assert_eq!(reply.total_failures, 2);
    assert_eq!(reply.total_lifecycles, 2);
}
