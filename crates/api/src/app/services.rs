use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use classbook_booking::CancellationPolicy;
use classbook_infra::engine::spawn_purge_task;
use classbook_infra::notify::{
    LogNotifier, NotificationBus, NotificationWorker, Notifier, WebhookNotifier, WorkerHandle,
};
use classbook_infra::store::{InMemoryLedger, Ledger};
use classbook_infra::{EngineConfig, ReservationEngine};

#[cfg(feature = "postgres")]
use classbook_infra::store::PostgresLedger;

use crate::config::AppConfig;

// Type-erased engine shared by every handler
pub type AppEngine = ReservationEngine<Arc<dyn Ledger>, Arc<NotificationBus>>;

/// Which ledger backs the engine.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StoreKind {
    InMemory,
    Postgres,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::InMemory => "in_memory",
            StoreKind::Postgres => "postgres",
        }
    }
}

pub struct AppServices {
    pub engine: Arc<AppEngine>,
    pub store: StoreKind,
    background: Mutex<Vec<JoinHandle<()>>>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl AppServices {
    /// Stop the background purge and the notification worker.
    ///
    /// The worker thread is joined on the blocking pool, off the async executor.
    pub async fn shutdown(&self) {
        if let Ok(mut tasks) = self.background.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        let worker = self.worker.lock().ok().and_then(|mut w| w.take());
        if let Some(worker) = worker {
            if let Err(e) = tokio::task::spawn_blocking(move || worker.shutdown()).await {
                warn!(error = %e, "notification worker did not shut down cleanly");
            }
        }
    }
}

/// Wire ledger, bus, engine, notification worker and background jobs.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let (ledger, store) = build_ledger(config).await?;
    let bus = Arc::new(NotificationBus::new());

    let notifier: Arc<dyn Notifier> = match &config.notify_webhook_url {
        Some(url) => {
            info!(url = %url, "delivering notifications to webhook");
            Arc::new(WebhookNotifier::new(url.clone(), WebhookNotifier::DEFAULT_TIMEOUT)?)
        }
        None => {
            info!("NOTIFY_WEBHOOK_URL not set; notifications are logged only");
            Arc::new(LogNotifier)
        }
    };
    let worker = NotificationWorker::spawn(&bus, notifier, Handle::current())?;

    let engine = Arc::new(ReservationEngine::new(
        ledger,
        bus,
        EngineConfig {
            policy: CancellationPolicy::from_hours(config.cancellation_window_hours),
            max_conflict_retries: config.max_conflict_retries,
        },
    ));

    let mut background = Vec::new();
    if let Some(interval) = config.cleanup_interval {
        info!(interval_secs = interval.as_secs(), "scheduled purge of past events enabled");
        background.push(spawn_purge_task(engine.clone(), interval));
    }

    Ok(AppServices {
        engine,
        store,
        background: Mutex::new(background),
        worker: Mutex::new(Some(worker)),
    })
}

#[cfg(feature = "postgres")]
async fn build_ledger(config: &AppConfig) -> anyhow::Result<(Arc<dyn Ledger>, StoreKind)> {
    if !config.use_persistent_stores {
        return Ok((Arc::new(InMemoryLedger::new()), StoreKind::InMemory));
    }
    let url = config
        .database_url
        .as_deref()
        .ok_or_else(|| anyhow::anyhow!("USE_PERSISTENT_STORES=true requires DATABASE_URL"))?;
    let ledger = PostgresLedger::connect(url).await?;
    info!("using Postgres ledger");
    Ok((Arc::new(ledger), StoreKind::Postgres))
}

#[cfg(not(feature = "postgres"))]
async fn build_ledger(config: &AppConfig) -> anyhow::Result<(Arc<dyn Ledger>, StoreKind)> {
    if config.use_persistent_stores {
        warn!("USE_PERSISTENT_STORES=true but built without the `postgres` feature; using in-memory ledger");
    }
    Ok((Arc::new(InMemoryLedger::new()), StoreKind::InMemory))
}
