//! GCX onboarding sync service
//!
//! Admits users newly added to each synced department's source group into the
//! assigned group and a welcome group. Runs once, or on a fixed interval when
//! `SYNC_INTERVAL_SECS` is set.

mod config;
mod logging;

use std::sync::Arc;
use std::time::Duration;

use config::Config;
use gcx_connector_entra::{
    BlobGroupIdResolver, DelegatedAccount, EntraConfig, EntraCredentials, EntraDirectory,
    EntraResult, GraphClient, GraphMailSink, SharePointDepartmentSource, TokenCache,
};
use gcx_onboard::{
    DepartmentStatus, LogSink, NotificationSink, Notifier, SyncOrchestrator, SyncRunReport,
    SyncSettings,
};
use tokio::signal;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

/// Queued notifications before the run waits on delivery.
const NOTIFICATION_QUEUE_CAPACITY: usize = 64;

/// Collaborators built from configuration.
struct Services {
    directory: EntraDirectory,
    departments: SharePointDepartmentSource,
    resolver: BlobGroupIdResolver,
    sink: Arc<dyn NotificationSink>,
}

impl Services {
    fn build(config: &Config) -> EntraResult<Self> {
        let entra = EntraConfig::builder()
            .tenant_id(&config.tenant_id)
            .cloud(config.cloud)
            .build()?;
        let app = EntraCredentials::app(&config.client_id, config.client_secret.clone());

        let app_client = graph_client(&entra, app.clone())?;
        let client_for = |account: Option<&DelegatedAccount>| match account {
            Some(account) => graph_client(&entra, app.clone().acting_as(account.clone())),
            None => Ok(Arc::clone(&app_client)),
        };
        let reader = client_for(config.onboard_account.as_ref())?;
        let writer = client_for(config.welcome_account.as_ref())?;

        let sink: Arc<dyn NotificationSink> = match &config.notify_sender {
            Some(sender) if !config.notify_recipients.is_empty() => Arc::new(GraphMailSink::new(
                Arc::clone(&app_client),
                sender,
                config.notify_recipients.clone(),
            )),
            _ => {
                warn!("No notification recipients configured, failures are only logged");
                Arc::new(LogSink)
            }
        };

        Ok(Self {
            directory: EntraDirectory::new(Arc::clone(&reader), writer, entra.page_size),
            departments: SharePointDepartmentSource::new(
                reader,
                &config.site_id,
                &config.department_list_id,
            ),
            resolver: BlobGroupIdResolver::new(
                &config.sync_container_url,
                config.sync_container_sas.clone(),
                &config.sync_file_suffix,
            )?,
            sink,
        })
    }
}

fn graph_client(
    config: &EntraConfig,
    credentials: EntraCredentials,
) -> EntraResult<Arc<GraphClient>> {
    let tokens = Arc::new(TokenCache::new(config, credentials));
    Ok(Arc::new(GraphClient::new(config, tokens)?))
}

#[tokio::main]
async fn main() {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("Configuration error: {e}");
        std::process::exit(1);
    });

    logging::init_logging(&config.log_filter, config.log_format);

    info!(
        cloud = %config.cloud,
        welcome_groups = config.welcome_group_ids.len(),
        batch_size = config.batch_size,
        max_concurrent_departments = config.max_concurrent_departments,
        interval_secs = config.sync_interval.map(|d| d.as_secs()),
        "Starting onboarding sync"
    );

    let services = Services::build(&config).unwrap_or_else(|e| {
        error!(error = %e, "Failed to initialize Graph clients");
        std::process::exit(1);
    });

    let (notifier, worker) = Notifier::spawn(services.sink, NOTIFICATION_QUEUE_CAPACITY);
    let settings = SyncSettings::new(&config.assigned_group_id, config.welcome_group_ids.clone())
        .with_welcome_group_limit(config.welcome_group_limit)
        .with_batch_size(config.batch_size)
        .with_max_concurrent_departments(config.max_concurrent_departments);
    let orchestrator = SyncOrchestrator::new(
        Arc::new(services.directory),
        Arc::new(services.departments),
        Arc::new(services.resolver),
        notifier,
        settings,
    );

    let all_succeeded = match config.sync_interval {
        Some(period) => {
            run_on_interval(&orchestrator, period).await;
            true
        }
        None => {
            let report = orchestrator.run_sync().await;
            log_report(&report);
            report.all_succeeded()
        }
    };

    // Dropping the orchestrator releases its notifier handle.
    drop(orchestrator);
    let stats = worker.shutdown().await;
    info!(
        delivered = stats.delivered,
        failed = stats.failed,
        "Onboarding sync stopped"
    );

    if !all_succeeded {
        std::process::exit(1);
    }
}

/// Runs back to back at most once per `period` until a shutdown signal.
///
/// A run in progress is finished before the signal is honoured.
async fn run_on_interval(orchestrator: &SyncOrchestrator, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let report = orchestrator.run_sync().await;
                log_report(&report);
            }
        }
    }
}

/// One line per department.
fn log_report(report: &SyncRunReport) {
    let elapsed_ms = (report.finished_at - report.started_at).num_milliseconds();

    if let Some(e) = &report.load_error {
        error!(error = %e, elapsed_ms, "Run aborted before any department was processed");
        return;
    }

    for item in &report.skipped_items {
        warn!(error = %item, "Department report: list item skipped");
    }

    for department in &report.departments {
        match &department.status {
            DepartmentStatus::Synced {
                admitted,
                batches,
                cursor,
            } => info!(
                department = %department.abbreviation,
                code = %department.code,
                admitted,
                batches,
                cursor = %cursor.to_rfc3339(),
                "Department report: synced"
            ),
            DepartmentStatus::Failed { phase, error } => error!(
                department = %department.abbreviation,
                code = %department.code,
                candidates = department.candidates.len(),
                phase = %phase,
                error = %error,
                "Department report: failed"
            ),
        }
    }

    info!(
        succeeded = report.succeeded_count(),
        failed = report.failed_count(),
        skipped = report.skipped_items.len(),
        elapsed_ms,
        "Run report"
    );
}

/// Completes on Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, stopping after the current run"),
        _ = terminate => info!("Received SIGTERM, stopping after the current run"),
    }
}
