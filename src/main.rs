use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use hearth_bridge_daemon::api::{self, IngressState};
use hearth_bridge_daemon::cloud::{CloudClient, PayloadFetcher};
use hearth_bridge_daemon::config::DaemonConfig;
use hearth_bridge_daemon::event_pipeline::EventPipeline;
use hearth_bridge_daemon::notifier::NotifierBroadcaster;
use hearth_bridge_daemon::registry::{PrinterDescriptor, PrinterRegistry, RoleAssignment};
use hearth_bridge_daemon::sentry_init;
use hearth_bridge_daemon::store::{keys, ConfigStore};

#[tokio::main]
async fn main() {
    let _sentry_guard = sentry_init::init();
    init_tracing();

    info!("========================================");
    info!("Hearth Bridge Daemon starting...");
    info!("Version: v{}", env!("CARGO_PKG_VERSION"));
    info!("Sentry: {}", if _sentry_guard.is_some() { "enabled" } else { "disabled" });
    info!("========================================");

    let config = match DaemonConfig::from_env() {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    sentry_init::set_restaurant_context(&config.restaurant_id);
    info!(restaurant_id = %config.restaurant_id, device_id = %config.device_id, "configured");

    let store = match ConfigStore::open(config.store_path(), &config.restaurant_id).await {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!("failed to open config store: {e}");
            std::process::exit(1);
        }
    };

    let registry = Arc::new(PrinterRegistry::new());
    load_printer_config(&store, &registry).await;

    let http_client = reqwest::Client::new();
    let cloud = Arc::new(CloudClient::new(
        config.cloud_base_url.clone(),
        config.cloud_anon_key.clone(),
        config.restaurant_id.clone(),
        config.device_id.clone(),
    ));
    let fetcher = Arc::new(PayloadFetcher::new(
        http_client,
        config.cloud_base_url.clone(),
        config.cloud_anon_key.clone(),
    ));

    let notifier = NotifierBroadcaster::new();
    let notifier_sweep = notifier.clone();
    tokio::spawn(async move { notifier_sweep.run_staleness_sweep().await });

    let pipeline = EventPipeline::new(config.clone(), cloud, fetcher, registry.clone(), notifier.clone());
    pipeline.clone().run().await;

    let ingress_state = IngressState { registry, config: config.clone(), start_time: Instant::now() };
    let ingress_router = api::router(ingress_state);
    let notifier_router = notifier.router();

    let ingress_bind = config.ingress_bind.clone();
    let notifier_bind = config.notifier_bind.clone();

    let ingress_listener = match tokio::net::TcpListener::bind(&ingress_bind).await {
        Ok(l) => l,
        Err(e) => {
            error!("failed to bind ingress socket {ingress_bind}: {e}");
            std::process::exit(1);
        }
    };
    let notifier_listener = match tokio::net::TcpListener::bind(&notifier_bind).await {
        Ok(l) => l,
        Err(e) => {
            error!("failed to bind notifier socket {notifier_bind}: {e}");
            std::process::exit(1);
        }
    };

    info!(bind = %ingress_bind, "local ingress listening");
    info!(bind = %notifier_bind, "notifier broadcaster listening");

    let ingress_server = tokio::spawn(async move {
        if let Err(e) = axum::serve(ingress_listener, ingress_router)
            .with_graceful_shutdown(shutdown_signal())
            .await
        {
            error!("ingress server error: {e}");
        }
    });
    let notifier_server = tokio::spawn(async move {
        if let Err(e) = axum::serve(notifier_listener, notifier_router)
            .with_graceful_shutdown(shutdown_signal())
            .await
        {
            error!("notifier server error: {e}");
        }
    });

    let _ = tokio::join!(ingress_server, notifier_server);
    info!("shutdown complete, exiting");
}

/// Loads printer descriptors and role assignments persisted by the cloud
/// dashboard's setup flow, falling back to the single-printer legacy
/// migration (§9) when neither key has ever been written.
async fn load_printer_config(store: &Arc<ConfigStore>, registry: &Arc<PrinterRegistry>) {
    let printers: Option<Vec<PrinterDescriptor>> = store
        .get(keys::LOCAL_PRINTERS)
        .await
        .unwrap_or_else(|e| {
            warn!("failed to read {}: {e}", keys::LOCAL_PRINTERS);
            None
        });
    let assignments: Option<Vec<RoleAssignment>> = store
        .get(keys::PRINTER_ASSIGNMENTS)
        .await
        .unwrap_or_else(|e| {
            warn!("failed to read {}: {e}", keys::PRINTER_ASSIGNMENTS);
            None
        });

    match printers {
        Some(printers) if !printers.is_empty() => {
            for printer in printers {
                registry.register(printer).await;
            }
            registry.set_assignments(assignments.unwrap_or_default()).await;
        }
        _ => {
            if let Some(legacy) = load_legacy_printer(store).await {
                registry.migrate_legacy(legacy.transport, legacy.name).await;
                info!("migrated legacy single-printer configuration");
            } else {
                warn!("no printers configured yet; daemon is idle until setup completes");
            }
        }
    }
}

async fn load_legacy_printer(store: &Arc<ConfigStore>) -> Option<PrinterDescriptor> {
    store
        .get::<PrinterDescriptor>(keys::PRINTER)
        .await
        .unwrap_or_else(|e| {
            warn!("failed to read {}: {e}", keys::PRINTER);
            None
        })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received, draining in-flight work");
}

fn init_tracing() {
    let log_dir = dirs::config_dir()
        .map(|p| p.join("hearth-bridge-daemon").join("logs"))
        .unwrap_or_else(|| std::path::PathBuf::from("."));
    std::fs::create_dir_all(&log_dir).ok();

    let file_appender = tracing_appender::rolling::daily(&log_dir, "daemon.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    // Leaked deliberately: the writer guard must outlive `main`, and this
    // runs exactly once at startup.
    Box::leak(Box::new(guard));

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive("hearth_bridge_daemon=info".parse().unwrap())
        .add_directive(tracing::Level::INFO.into());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_ansi(false)
        .with_writer(non_blocking);

    let sentry_layer = sentry_tracing::layer().event_filter(|md| match *md.level() {
        tracing::Level::ERROR => sentry_tracing::EventFilter::Event,
        tracing::Level::WARN => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(sentry_layer)
        .init();
}
