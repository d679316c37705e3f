//! The health service façade.
//!
//! [`HealthService`] bundles the complete monitor state — failure tracker,
//! restart policy, persistence gateway, and the NSM peer handle — in one
//! owning value constructed at startup. The public operations
//! (`register_app_status`, `read_statistics`, `request_node_restart`), the
//! lifecycle-request handler, and the startup sequence all run against it;
//! the caller serializes access.

use crate::config::NhmConfig;
use crate::nsm::{NodeStateManager, NsmErrorStatus, RestartReason, SHUTDOWN_TYPE_NORMAL, SHUTDOWN_TYPE_RUNUP};
use crate::persistence::{pack_version, Persistence};
use crate::policy::RestartPolicy;
use crate::tracker::{FailureTracker, Statistics};
use crate::types::{AppErrorStatus, AppStatus, NodeShutdownState};
use tokio::sync::broadcast;
use tracing::{error, info};

/// One emission of the `AppHealthStatus` broadcast signal.
#[derive(Debug, Clone)]
pub struct AppHealthEvent {
    pub name: String,
    pub status: AppStatus,
}

/// Reply of the `read_statistics` operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatisticsReply {
    pub current_fail_count: u32,
    pub total_failures: u32,
    pub total_lifecycles: u32,
    pub error: AppErrorStatus,
}

pub struct HealthService {
    tracker: FailureTracker,
    policy: RestartPolicy,
    persistence: Persistence,
    nsm: Box<dyn NodeStateManager>,
    events: broadcast::Sender<AppHealthEvent>,
}

impl HealthService {
    pub fn new(
        config: &NhmConfig,
        persistence: Persistence,
        nsm: Box<dyn NodeStateManager>,
        events: broadcast::Sender<AppHealthEvent>,
    ) -> Self {
        Self {
            tracker: FailureTracker::new(config.node.historic_lc_count),
            policy: RestartPolicy::new(
                config.node.no_restart_apps.clone(),
                config.node.max_failed_apps,
            ),
            persistence,
            nsm,
            events,
        }
    }

    /// Subscribe to the `AppHealthStatus` broadcast signal.
    pub fn subscribe(&self) -> broadcast::Receiver<AppHealthEvent> {
        self.events.subscribe()
    }

    /// First startup step once the public surface is reachable: read the
    /// shutdown flag as the current LC's start state, open the current LC,
    /// and load the previous LCs behind it.
    pub fn startup(&mut self) {
        let start_state = self.persistence.read_shutdown_flag();
        info!(
            previous_shutdown = if start_state == NodeShutdownState::Shutdown {
                "complete"
            } else {
                "incomplete"
            },
            "evaluated shutdown flag"
        );

        self.tracker.begin_lifecycle(start_state);
        let previous = self.persistence.read_history();
        self.tracker.extend_history(previous);
    }

    /// Second startup step once the service is fully functional: reset the
    /// shutdown flag and write the initial history state.
    pub fn activate(&mut self) {
        self.persistence.write_shutdown_flag(NodeShutdownState::Started);
        self.persist_history();
    }

    /// Process an application status report.
    ///
    /// The status is forwarded to the NSM (failures are logged, not fatal)
    /// and broadcast unconditionally. A transition into the failed state
    /// updates the current set and the history, persists it, and then runs
    /// the failed-app threshold check; a transition out of the failed state
    /// only clears the current set.
    pub async fn register_app_status(&mut self, name: &str, status: AppStatus) {
        info!(app = name, status = %status, "processing app status report");

        let running = status == AppStatus::Ok;
        if let Err(err) = self.nsm.set_app_health_status(name, running).await {
            error!(app = name, error = %err, "failed to forward app status to NSM");
        }

        let _ = self.events.send(AppHealthEvent {
            name: name.to_string(),
            status,
        });

        if status == AppStatus::Failed {
            if self.tracker.note_failure(name).is_some() {
                self.persist_history();
                self.check_failed_app_restart().await;
            }
        } else {
            self.tracker.clear_failure(name);
        }
    }

    /// Failure statistics for one application, or for the node when
    /// `app_name` is empty.
    pub fn read_statistics(&self, app_name: &str) -> StatisticsReply {
        let stats: Statistics = if app_name.is_empty() {
            self.tracker.node_statistics()
        } else {
            self.tracker.app_statistics(app_name)
        };

        StatisticsReply {
            current_fail_count: stats.current_fail_count,
            total_failures: stats.total_failures,
            total_lifecycles: stats.total_lifecycles,
            error: AppErrorStatus::Ok,
        }
    }

    /// Handle an app-initiated node restart request.
    pub async fn request_node_restart(&mut self, app_name: &str) -> AppErrorStatus {
        if !self.policy.restart_allowed(app_name) {
            info!(app = app_name, "restart request from app rejected");
            return AppErrorStatus::RestartNotPossible;
        }

        info!(app = app_name, "restart request from app accepted");
        self.request_restart(RestartReason::ApplicationFailure, SHUTDOWN_TYPE_NORMAL)
            .await
    }

    /// Lifecycle request from the NSM: a run-up request transitions the
    /// flag back to `Started`, everything else records an orderly shutdown.
    pub async fn handle_lifecycle_request(
        &mut self,
        shutdown_type: u32,
        request_id: u32,
    ) -> NsmErrorStatus {
        let target = if shutdown_type == SHUTDOWN_TYPE_RUNUP {
            NodeShutdownState::Started
        } else {
            NodeShutdownState::Shutdown
        };
        info!(shutdown_type, request_id, flag = %target, "processing lifecycle request");

        if self.persistence.write_shutdown_flag(target) {
            NsmErrorStatus::Ok
        } else {
            NsmErrorStatus::Error
        }
    }

    /// Request a node restart at the NSM and map its reply.
    async fn request_restart(&mut self, reason: RestartReason, restart_type: u32) -> AppErrorStatus {
        info!(reason = reason.code(), restart_type, "sending restart request to NSM");

        match self.nsm.request_node_restart(reason, restart_type).await {
            Ok(NsmErrorStatus::Ok) => {
                info!("NSM accepted the restart request");
                AppErrorStatus::Ok
            }
            Ok(status) => {
                info!(status = status.code(), "NSM rejected the restart request");
                AppErrorStatus::RestartNotPossible
            }
            Err(err) => {
                error!(error = %err, "sending restart request to NSM failed");
                AppErrorStatus::Error
            }
        }
    }

    /// Request a restart when too many applications are failed at once.
    /// Runs after the history update; the outcome is logged only.
    async fn check_failed_app_restart(&mut self) {
        let failed_count = self.tracker.current_failed_count();
        if self.policy.threshold_reached(failed_count) {
            info!(
                failed_count,
                limit = self.policy.max_failed_apps(),
                "amount of failed apps too high"
            );
            let _ = self
                .request_restart(RestartReason::ApplicationFailure, SHUTDOWN_TYPE_NORMAL)
                .await;
        }
    }

    fn persist_history(&mut self) {
        let version = pack_version(env!("CARGO_PKG_VERSION"));
        if let Err(err) = self
            .persistence
            .write_history(version, self.tracker.lifecycles())
        {
            error!(error = %err, "failed to write life-cycle history");
        }
    }
}
