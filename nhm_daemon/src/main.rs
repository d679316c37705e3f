mod events;
mod nsm_client;
mod probe;
mod supervisor;

use anyhow::Context;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use nhm_core::config::{NhmConfig, DEFAULT_CONFIG_PATH};
use nhm_core::lifecycle::{watchdog_cycle_from_env, ServiceManagerNotifier};
use nhm_core::nsm::{
    NodeStateManager, NsmErrorStatus, LIFECYCLE_CLIENT_OBJECT, LIFECYCLE_CLIENT_TIMEOUT_MS,
    SHUTDOWN_TYPE_FAST, SHUTDOWN_TYPE_NORMAL,
};
use nhm_core::observer::{UnitEvent, UnitObserver};
use nhm_core::prober::UserlandProber;
use nhm_core::service::{AppHealthEvent, HealthService};
use nhm_core::types::AppStatus;
use nhm_core::{FileKeyValueStore, Persistence};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::{interval_at, Instant};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "nhm_daemon")]
#[command(about = "Node Health Monitor daemon")]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<Mutex<HealthService>>,
    pub events: broadcast::Sender<AppHealthEvent>,
    pub unit_events: mpsc::Sender<UnitEvent>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nhm_daemon=info,nhm_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(version = env!("CARGO_PKG_VERSION"), "node health monitor started");

    // Configuration is never fatal; defaults apply on any error.
    let config = NhmConfig::load(&cli.config);

    // Initialize persistence and allocate the check state.
    let store = FileKeyValueStore::open(&config.node.data_dir);
    let persistence = Persistence::new(
        Box::new(store),
        &config.node.data_dir,
        config.node.historic_lc_count,
    );
    let mut prober = UserlandProber::new(&config.userland, Box::new(probe::HttpEndpointDialer));

    let external_addr = config
        .node
        .external_addr
        .clone()
        .unwrap_or_else(|| format!("http://{}", config.node.listen_addr));

    // Connect to the NSM and register as shutdown client. Failure here is
    // fatal: without the NSM the monitor must not offer its services.
    let mut nsm = nsm_client::HttpNodeStateManager::new(&config.node.nsm_endpoint)?;
    let registration = nsm
        .register_shutdown_client(
            &external_addr,
            LIFECYCLE_CLIENT_OBJECT,
            SHUTDOWN_TYPE_FAST | SHUTDOWN_TYPE_NORMAL,
            LIFECYCLE_CLIENT_TIMEOUT_MS,
        )
        .await
        .context("could not connect to NSM")?;
    anyhow::ensure!(
        registration == NsmErrorStatus::Ok,
        "NSM rejected the shutdown client registration (status {})",
        registration.code()
    );
    info!("successfully connected to NSM");

    let (events_tx, _) = broadcast::channel(64);
    let mut service = HealthService::new(&config, persistence, Box::new(nsm), events_tx.clone());

    // Bind the public interface, then establish the runtime state: the
    // current life cycle opens with the persisted flag value and the
    // history of previous life cycles behind it.
    let listener = tokio::net::TcpListener::bind(&config.node.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.node.listen_addr))?;
    info!(addr = %config.node.listen_addr, "public interface listening");
    service.startup();

    let service = Arc::new(Mutex::new(service));
    let (unit_events_tx, mut unit_events_rx) = mpsc::channel::<UnitEvent>(64);
    let state = AppState {
        service: service.clone(),
        events: events_tx.clone(),
        unit_events: unit_events_tx,
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/app_status", post(register_app_status))
        .route("/statistics", get(read_statistics))
        .route("/restart", post(request_node_restart))
        .route("/lifecycle/request", post(lifecycle_request))
        .route("/supervisor/events", post(supervisor_event))
        .route("/events", get(events::app_health_events))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    // Fully functional from here: reset the flag, write the initial
    // history and start the periodic machinery.
    service.lock().await.activate();

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let prober_task = if config.userland.ul_chk_interval != 0 {
        let period = Duration::from_secs(u64::from(config.userland.ul_chk_interval));
        let mut shutdown = shutdown_tx.subscribe();
        Some(tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + period, period);
            loop {
                tokio::select! {
                    _ = ticks.tick() => {
                        prober.run_checks().await;
                    }
                    _ = shutdown.recv() => {
                        prober.release_endpoints();
                        break;
                    }
                }
            }
        }))
    } else {
        None
    };

    // Unit observation is best-effort; the monitor serves without it.
    let observer_task = match &config.node.supervisor_endpoint {
        Some(endpoint) => {
            let link = supervisor::HttpUnitSupervisor::new(endpoint, &external_addr)?;
            let mut observer = UnitObserver::new(Box::new(link));
            if let Err(err) = observer.connect().await {
                warn!(error = %err, "unit observation could not be started");
            }
            let service = service.clone();
            let mut shutdown = shutdown_tx.subscribe();
            Some(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        event = unit_events_rx.recv() => match event {
                            Some(event) => {
                                if let Some((name, status)) = observer.handle_event(event).await {
                                    service.lock().await.register_app_status(&name, status).await;
                                }
                            }
                            None => break,
                        },
                        _ = shutdown.recv() => break,
                    }
                }
                observer.disconnect().await;
            }))
        }
        None => {
            warn!("unit supervisor endpoint not configured, observation disabled");
            // Without an observer nobody drains unit events; closing the
            // receiver lets the route reject pushes instead of queueing.
            drop(unit_events_rx);
            None
        }
    };

    // Tell the service manager we are up, then keep its watchdog fed.
    let notifier = Arc::new(ServiceManagerNotifier::from_env());
    notifier.notify_ready();
    let watchdog_task = watchdog_cycle_from_env().map(|cycle| {
        let notifier = notifier.clone();
        let mut shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut ticks = interval_at(Instant::now() + cycle, cycle);
            loop {
                tokio::select! {
                    _ = ticks.tick() => notifier.notify_watchdog(),
                    _ = shutdown.recv() => break,
                }
            }
        })
    });

    let mut sigterm = signal(SignalKind::terminate())?;
    let shutdown_signal = async move {
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = tokio::signal::ctrl_c() => {}
        }
        info!("received termination signal, going to shut down");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    // Orderly teardown: stop the periodic tasks, disconnect the observer,
    // release the check state.
    let _ = shutdown_tx.send(());
    if let Some(task) = observer_task {
        let _ = task.await;
    }
    if let Some(task) = prober_task {
        let _ = task.await;
    }
    if let Some(task) = watchdog_task {
        let _ = task.await;
    }

    info!("node health monitor stopped");
    Ok(())
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Debug, Deserialize)]
struct RegisterAppStatusRequest {
    name: String,
    status: i32,
}

async fn register_app_status(
    State(state): State<AppState>,
    Json(request): Json<RegisterAppStatusRequest>,
) -> StatusCode {
    let Some(status) = AppStatus::from_code(request.status) else {
        warn!(status = request.status, "rejecting app status report with unknown status");
        return StatusCode::BAD_REQUEST;
    };

    state
        .service
        .lock()
        .await
        .register_app_status(&request.name, status)
        .await;
    StatusCode::OK
}

#[derive(Debug, Deserialize)]
struct StatisticsQuery {
    /// Empty or absent requests the node statistics.
    #[serde(default)]
    app_name: String,
}

#[derive(Debug, Serialize)]
struct StatisticsResponse {
    current_fail_count: u32,
    total_failures: u32,
    total_lifecycles: u32,
    error: i32,
}

async fn read_statistics(
    State(state): State<AppState>,
    Query(query): Query<StatisticsQuery>,
) -> Json<StatisticsResponse> {
    let reply = state.service.lock().await.read_statistics(&query.app_name);
    Json(StatisticsResponse {
        current_fail_count: reply.current_fail_count,
        total_failures: reply.total_failures,
        total_lifecycles: reply.total_lifecycles,
        error: reply.error.code(),
    })
}

#[derive(Debug, Deserialize)]
struct RestartRequest {
    app_name: String,
}

#[derive(Debug, Serialize)]
struct RestartResponse {
    error: i32,
}

async fn request_node_restart(
    State(state): State<AppState>,
    Json(request): Json<RestartRequest>,
) -> Json<RestartResponse> {
    let error = state
        .service
        .lock()
        .await
        .request_node_restart(&request.app_name)
        .await;
    Json(RestartResponse { error: error.code() })
}

#[derive(Debug, Deserialize)]
struct LifecycleRequestBody {
    shutdown_type: u32,
    request_id: u32,
}

#[derive(Debug, Serialize)]
struct LifecycleResponse {
    error: i32,
}

async fn lifecycle_request(
    State(state): State<AppState>,
    Json(request): Json<LifecycleRequestBody>,
) -> Json<LifecycleResponse> {
    let error = state
        .service
        .lock()
        .await
        .handle_lifecycle_request(request.shutdown_type, request.request_id)
        .await;
    Json(LifecycleResponse { error: error.code() })
}

async fn supervisor_event(
    State(state): State<AppState>,
    Json(event): Json<UnitEvent>,
) -> StatusCode {
    match state.unit_events.send(event).await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
