//! Poll cycle: pick the protocol, fetch, decode, and hand each candidate to the sink.
//!
//! A cycle runs on one blocking thread. Saves are awaited from that thread
//! through the runtime handle, so a message is fully stored before the next
//! one is fetched.

use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use secrecy::ExposeSecret;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{DecodeFailurePolicy, IngestConfig, Protocol};
use crate::error::{ConfigError, DecodeError, MailError};
use crate::mail::{Connector, DecoderOptions, FetchSummary, RawMessage, decode, imap, pop3};
use crate::store::{EmailSink, SaveOutcome};

/// Per-cycle counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleStats {
    /// Messages the server reported.
    pub found: usize,
    /// Raw messages retrieved and handed to the decoder.
    pub fetched: usize,
    pub decode_failures: usize,
    pub stored: usize,
    pub rejected: usize,
    /// Insert or commit failures, rolled back.
    pub failed: usize,
    /// Saves that could not reach the database at all.
    pub unsaved: usize,
}

/// How a poll cycle ended.
#[derive(Debug)]
pub enum PollReport {
    /// The configured protocol was not recognized; nothing was fetched.
    Skipped(ConfigError),
    Completed(CycleStats),
    /// The mail session failed part-way; `stats` covers what happened before.
    Failed { reason: String, stats: CycleStats },
}

/// Runs poll cycles against one mailbox.
pub struct Poller {
    config: Arc<IngestConfig>,
    connector: Arc<dyn Connector>,
    sink: Arc<dyn EmailSink>,
}

impl Poller {
    pub fn new(
        config: Arc<IngestConfig>,
        connector: Arc<dyn Connector>,
        sink: Arc<dyn EmailSink>,
    ) -> Self {
        Self {
            config,
            connector,
            sink,
        }
    }

    /// Run one cycle. Never fails: every problem is logged and reported.
    pub async fn poll(&self) -> PollReport {
        let protocol = match self.config.mail.protocol.parse::<Protocol>() {
            Ok(protocol) => protocol,
            Err(e) => {
                warn!("{e}");
                return PollReport::Skipped(e);
            }
        };
        info!("Using {protocol} to fetch emails");

        let config = Arc::clone(&self.config);
        let connector = Arc::clone(&self.connector);
        let sink = Arc::clone(&self.sink);
        let handle = Handle::current();

        let joined = tokio::task::spawn_blocking(move || {
            let mut stats = CycleStats::default();
            let result = run_cycle(
                protocol,
                &config,
                connector.as_ref(),
                sink.as_ref(),
                &handle,
                &mut stats,
            );
            (result, stats)
        })
        .await;

        match joined {
            Ok((Ok(()), stats)) => {
                info!(
                    found = stats.found,
                    stored = stats.stored,
                    rejected = stats.rejected,
                    failed = stats.failed,
                    decode_failures = stats.decode_failures,
                    "Poll cycle complete"
                );
                PollReport::Completed(stats)
            }
            Ok((Err(e), stats)) => {
                error!("Error fetching emails via {protocol}: {e}");
                PollReport::Failed {
                    reason: e.to_string(),
                    stats,
                }
            }
            Err(e) => {
                error!("Email poll task panicked: {e}");
                PollReport::Failed {
                    reason: e.to_string(),
                    stats: CycleStats::default(),
                }
            }
        }
    }
}

fn run_cycle(
    protocol: Protocol,
    config: &IngestConfig,
    connector: &dyn Connector,
    sink: &dyn EmailSink,
    handle: &Handle,
    stats: &mut CycleStats,
) -> Result<(), MailError> {
    let mail = &config.mail;
    let options = DecoderOptions::from(mail);
    let policy = config.decode_failure_policy;

    let (host, port) = match protocol {
        Protocol::Imap => (mail.imap_host.as_str(), mail.imap_port),
        Protocol::Pop3 => (mail.pop_host.as_str(), mail.pop_port),
    };
    let mut stream = connector.connect(host, port)?;

    let mut on_message = |raw: RawMessage| {
        stats.fetched += 1;
        ingest_message(raw, &options, policy, sink, handle, &mut *stats)
    };

    let username = mail.username.as_str();
    let password = mail.password.expose_secret();
    let summary: FetchSummary = match protocol {
        Protocol::Imap => imap::fetch_unseen(stream.as_mut(), username, password, &mut on_message),
        Protocol::Pop3 => pop3::fetch_all(stream.as_mut(), username, password, &mut on_message),
    }?;

    stats.found = summary.found;
    if summary.retrieved < summary.found {
        warn!(
            "Batch ended early: retrieved {} of {} emails",
            summary.retrieved, summary.found
        );
    }
    Ok(())
}

/// Decode one raw message and save each of its candidates in order.
fn ingest_message(
    raw: RawMessage,
    options: &DecoderOptions,
    policy: DecodeFailurePolicy,
    sink: &dyn EmailSink,
    handle: &Handle,
    stats: &mut CycleStats,
) -> ControlFlow<()> {
    let decoded = match decode(&raw.bytes, options) {
        Ok(decoded) => decoded,
        Err(e) => return decode_failed(&raw.label, &e, policy, stats),
    };

    if !decoded.is_multipart() {
        let preview: String = decoded.subject.chars().take(50).collect();
        debug!(
            label = %raw.label,
            "Email from: {}, Subject: {preview}...",
            decoded.sender
        );
    }

    for candidate in decoded.into_candidates() {
        let message = match candidate {
            Ok(message) => message,
            Err(e) => return decode_failed(&raw.label, &e, policy, stats),
        };

        match handle.block_on(sink.save(message)) {
            Ok(SaveOutcome::Stored { .. }) => stats.stored += 1,
            Ok(SaveOutcome::Rejected(_)) => stats.rejected += 1,
            Ok(SaveOutcome::Failed(_)) => stats.failed += 1,
            Err(e) => {
                error!(label = %raw.label, "Failed to save email: {e}");
                stats.unsaved += 1;
            }
        }
    }

    ControlFlow::Continue(())
}

fn decode_failed(
    label: &str,
    error: &DecodeError,
    policy: DecodeFailurePolicy,
    stats: &mut CycleStats,
) -> ControlFlow<()> {
    stats.decode_failures += 1;
    match policy {
        DecodeFailurePolicy::Skip => {
            warn!(label, "Skipping email that failed to decode: {error}");
            ControlFlow::Continue(())
        }
        DecodeFailurePolicy::Abort => {
            error!(label, "Email failed to decode, aborting batch: {error}");
            ControlFlow::Break(())
        }
    }
}

/// Spawn the outer loop: poll, sleep `interval`, repeat until the flag is set.
///
/// Returns a `JoinHandle` and a shutdown flag.
pub fn spawn_poller(poller: Poller, interval: Duration) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(async move {
        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Email poller shutting down");
                return;
            }

            info!("Starting poll");
            poller.poll().await;
            info!("Poll finished, waiting {}s", interval.as_secs());
            tokio::time::sleep(interval).await;
        }
    });

    (handle, shutdown_flag)
}
