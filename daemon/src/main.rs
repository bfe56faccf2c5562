mod cli;
mod error;
mod logging;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, Utc};
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use offerflow::email::{ImapMailbox, Mailbox, MailboxListener};
use offerflow::export::SheetsExporter;
use offerflow::normalizer::AttachmentNormalizer;
use offerflow::offer::{HttpOfferExtractor, SpamClassifier};
use offerflow::{
    load_config, Config, DataLayout, HeavyStageRunner, JobOutcome, JobResult, Orchestrator,
    Result, WorkerPool,
};

use cli::Cli;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config_path = cli.config_path();
    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load {}: {}", config_path.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let log_dir = cli
        .log_dir
        .clone()
        .unwrap_or_else(|| config.log_directory.clone());
    let _guards = match logging::init(cli.log_format, &log_dir) {
        Ok(guards) => guards,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Starting offerflow v{}", env!("CARGO_PKG_VERSION"));
    info!(config = %config_path.display(), "Configuration loaded");

    match run(config, cli.reset).await {
        Ok(()) => {
            info!("offerflow stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "offerflow exited with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config, reset: bool) -> Result<()> {
    let layout = Arc::new(DataLayout::new(&config.data_directory));
    layout.ensure().await?;

    let mailbox = Arc::new(ImapMailbox::new(&config.mailbox)?);

    if reset {
        reset_state(&layout, mailbox.as_ref(), config.mailbox.reset_window_days).await?;
    }

    let normalizer = Arc::new(AttachmentNormalizer::new(&config.ocr));
    let extractor = Arc::new(HttpOfferExtractor::new(&config.extraction)?);
    let exporter = Arc::new(SheetsExporter::new(&config.export)?);
    let runner = Arc::new(HeavyStageRunner::new(
        SpamClassifier::from_config(&config.spam),
        extractor,
        exporter,
    ));

    let pool: Arc<WorkerPool<JobResult>> = Arc::new(WorkerPool::new(
        config.workers.max_workers,
        Duration::from_millis(config.workers.admission_retry_ms),
    ));

    let orchestrator = Arc::new(Orchestrator::new(
        Arc::clone(&layout),
        mailbox.clone() as Arc<dyn Mailbox>,
        normalizer,
        Arc::clone(&pool),
        runner,
    ));

    let results = tokio::spawn(report_results(Arc::clone(&pool)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let listener = MailboxListener::new(
        mailbox.clone() as Arc<dyn Mailbox>,
        orchestrator,
        Duration::from_secs(config.mailbox.idle_timeout_secs),
    );
    let listening = tokio::spawn(listener.run(shutdown_rx));

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Could not listen for Ctrl-C; shutting down");
    }
    info!("Shutdown requested");

    let _ = shutdown_tx.send(true);
    if let Err(e) = listening.await {
        warn!(error = %e, "Listener task ended abnormally");
    }

    // Dispatched jobs still waiting for a slot are let in before admission closes.
    pool.wait_idle().await;
    pool.shutdown();
    results.abort();

    if let Err(e) = mailbox.disconnect().await {
        warn!(error = %e, "Mailbox did not close cleanly");
    }
    Ok(())
}

/// Clears local state, then flags recent mail unseen so the listener picks it up again.
async fn reset_state(
    layout: &DataLayout,
    mailbox: &ImapMailbox,
    window_days: u32,
) -> Result<()> {
    let removed = layout.reset().await?;

    let today = Utc::now().date_naive();
    let since = today
        .checked_sub_days(Days::new(u64::from(window_days)))
        .unwrap_or(today);
    let uids = mailbox.seen_since(since).await?;
    if !uids.is_empty() {
        mailbox.mark_unseen(&uids).await?;
    }

    info!(
        removed_directories = removed,
        requeued_messages = uids.len(),
        %since,
        "Reset complete"
    );
    Ok(())
}

async fn report_results(pool: Arc<WorkerPool<JobResult>>) {
    while let Some(completed) = pool.recv_result().await {
        match completed.output {
            Ok(result) => match &result.outcome {
                JobOutcome::Exported(receipt) => info!(
                    job = %completed.label,
                    sheet = %receipt.sheet_title,
                    "Offer exported"
                ),
                JobOutcome::Spam { keyword } => {
                    info!(job = %completed.label, %keyword, "Spam discarded")
                }
                JobOutcome::Failed { reason } => warn!(
                    job = %completed.label,
                    dir = %result.dir.display(),
                    %reason,
                    "Job failed; working directory kept"
                ),
            },
            Err(e) => error!(
                job = %completed.label,
                error = %e,
                "Job did not run to completion; working directory kept"
            ),
        }
    }
}
