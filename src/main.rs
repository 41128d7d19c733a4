use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use mail_ingest::config::{DatabaseTarget, IngestConfig};
use mail_ingest::mail::TlsConnector;
use mail_ingest::poller::{Poller, spawn_poller};
use mail_ingest::store::{EmailSink, EmailStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = IngestConfig::from_env().context("invalid configuration")?;

    let _log_guard = init_tracing(config.log_dir.as_deref())?;

    eprintln!("📬 mail-ingest v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Protocol: {}", config.mail.protocol);
    match config.database.target() {
        DatabaseTarget::Local(path) => eprintln!("   Database: {}", path.display()),
        DatabaseTarget::Remote { url } => eprintln!("   Database: {url}"),
    }
    eprintln!("   Poll interval: {}s\n", config.poll_interval.as_secs());

    let connector = Arc::new(TlsConnector::new(&config.mail).context("building TLS client")?);
    let store: Arc<dyn EmailSink> = Arc::new(EmailStore::new(&config.database));
    let interval = config.poll_interval;
    let poller = Poller::new(Arc::new(config), connector, store);

    let (handle, shutdown) = spawn_poller(poller, interval);

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown requested");
    shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    handle.abort();

    Ok(())
}

/// Console logging, plus a daily rolling file when `log_dir` is set.
fn init_tracing(log_dir: Option<&Path>) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "mail-ingest.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    Ok(guard)
}
