//! Test harness for isolated pipeline runs.
//!
//! The `TestHarness` owns a temporary data directory and spy collaborators, and builds
//! an `Orchestrator` wired to them with short retry and polling budgets.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::Value;
use tempfile::TempDir;

use offerflow::config::OcrConfig;
use offerflow::email::error::Result as MailResult;
use offerflow::email::{Mailbox, RawMessage};
use offerflow::error::{ExportError, ExtractionError};
use offerflow::export::{ExportReceipt, OfferExporter};
use offerflow::normalizer::AttachmentNormalizer;
use offerflow::offer::{OfferExtractor, OfferRecord, SpamClassifier};
use offerflow::pipeline::{
    CombinedRecord, HeavyStageRunner, JobResult, Orchestrator, RetryPolicy, StageTimings,
};
use offerflow::store::{DataLayout, WorkingDirectory};
use offerflow::worker::WorkerPool;

use super::builders::OfferBuilder;

/// Records which UIDs were marked seen.
#[derive(Default)]
pub struct SpyMailbox {
    pub seen: Mutex<Vec<u32>>,
}

#[async_trait]
impl Mailbox for SpyMailbox {
    async fn unseen(&self) -> MailResult<Vec<u32>> {
        Ok(Vec::new())
    }

    async fn fetch(&self, uid: u32) -> MailResult<RawMessage> {
        Ok(RawMessage {
            uid,
            bytes: Vec::new(),
        })
    }

    async fn mark_seen(&self, uid: u32) -> MailResult<()> {
        self.seen.lock().unwrap().push(uid);
        Ok(())
    }

    async fn mark_unseen(&self, _uids: &[u32]) -> MailResult<()> {
        Ok(())
    }

    async fn seen_since(&self, _since: NaiveDate) -> MailResult<Vec<u32>> {
        Ok(Vec::new())
    }

    async fn wait_for_new_mail(&self, _timeout: Duration) -> MailResult<bool> {
        Ok(false)
    }
}

/// Fails with a retryable error `failures` times, then returns `offer`.
/// Tracks call times and how many calls were in flight at once.
pub struct ScriptedExtractor {
    offer: OfferRecord,
    failures: usize,
    latency: Duration,
    pub calls: AtomicUsize,
    pub call_times: Mutex<Vec<Instant>>,
    running: AtomicUsize,
    pub peak_running: AtomicUsize,
}

impl ScriptedExtractor {
    pub fn succeeding() -> Self {
        Self::failing_first(0)
    }

    pub fn failing_first(failures: usize) -> Self {
        Self {
            offer: OfferBuilder::new().build(),
            failures,
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            call_times: Mutex::new(Vec::new()),
            running: AtomicUsize::new(0),
            peak_running: AtomicUsize::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OfferExtractor for ScriptedExtractor {
    async fn summarize(&self, _record: &CombinedRecord) -> Result<OfferRecord, ExtractionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        self.call_times.lock().unwrap().push(Instant::now());

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);

        if call < self.failures {
            Err(ExtractionError::Timeout)
        } else {
            Ok(self.offer.clone())
        }
    }
}

/// One export call, with every `processed_offer_*.json` found on disk at that moment.
pub struct ExportCall {
    pub offer: OfferRecord,
    pub offers_on_disk: Vec<Value>,
}

pub struct SpyExporter {
    layout: Arc<DataLayout>,
    fail: bool,
    pub calls: Mutex<Vec<ExportCall>>,
}

impl SpyExporter {
    pub fn new(layout: Arc<DataLayout>) -> Self {
        Self {
            layout,
            fail: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(layout: Arc<DataLayout>) -> Self {
        Self {
            fail: true,
            ..Self::new(layout)
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl OfferExporter for SpyExporter {
    async fn export(&self, offer: &OfferRecord) -> Result<ExportReceipt, ExportError> {
        let mut offers_on_disk = Vec::new();
        for dir in self.layout.pending().unwrap_or_default() {
            let name = dir.offer_file_name();
            if dir.file(&name).exists() {
                offers_on_disk.push(dir.read_json::<Value>(&name).await.unwrap());
            }
        }
        self.calls.lock().unwrap().push(ExportCall {
            offer: offer.clone(),
            offers_on_disk,
        });

        if self.fail {
            return Err(ExportError::Status {
                status: 503,
                body: "sheets unavailable".to_string(),
            });
        }
        Ok(ExportReceipt {
            sheet_title: offer.supplier_name().unwrap_or("Unknown supplier").to_string(),
            sheet_id: 1,
            updated_cells: 10,
        })
    }
}

/// Test harness providing an isolated data directory and spy collaborators.
pub struct TestHarness {
    temp_dir: TempDir,
    pub layout: Arc<DataLayout>,
    pub mailbox: Arc<SpyMailbox>,
    pub extractor: Arc<ScriptedExtractor>,
    pub exporter: Arc<SpyExporter>,
    pub max_workers: usize,
    pub retry: RetryPolicy,
}

impl TestHarness {
    pub fn new() -> Self {
        Self::with_extractor(ScriptedExtractor::succeeding())
    }

    pub fn with_extractor(extractor: ScriptedExtractor) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let layout = Arc::new(DataLayout::new(temp_dir.path().join("data")));
        let exporter = Arc::new(SpyExporter::new(Arc::clone(&layout)));
        Self {
            temp_dir,
            layout,
            mailbox: Arc::new(SpyMailbox::default()),
            extractor: Arc::new(extractor),
            exporter,
            max_workers: 2,
            retry: RetryPolicy {
                max_attempts: 5,
                base_delay: Duration::from_millis(20),
                max_delay: Duration::from_secs(1),
            },
        }
    }

    pub fn with_failing_exporter(mut self) -> Self {
        self.exporter = Arc::new(SpyExporter::failing(Arc::clone(&self.layout)));
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn data_dir(&self) -> &Path {
        self.layout.root()
    }

    pub fn runner(&self) -> HeavyStageRunner {
        HeavyStageRunner::new(
            SpamClassifier::default(),
            Arc::clone(&self.extractor) as Arc<dyn OfferExtractor>,
            Arc::clone(&self.exporter) as Arc<dyn OfferExporter>,
        )
        .with_retry_policy(self.retry)
        .with_timings(StageTimings {
            flag_poll: Duration::from_millis(10),
            flag_timeout: Duration::from_secs(2),
            verify_poll: Duration::from_millis(10),
            verify_attempts: 5,
        })
    }

    pub fn orchestrator(&self) -> Orchestrator {
        let pool: WorkerPool<JobResult> =
            WorkerPool::new(self.max_workers, Duration::from_millis(10));
        Orchestrator::new(
            Arc::clone(&self.layout),
            Arc::clone(&self.mailbox) as Arc<dyn Mailbox>,
            Arc::new(AttachmentNormalizer::new(&OcrConfig {
                enabled: false,
                ..OcrConfig::default()
            })),
            Arc::new(pool),
            Arc::new(self.runner()),
        )
    }

    /// Working directories still on disk.
    pub fn pending(&self) -> Vec<WorkingDirectory> {
        self.layout.pending().expect("Failed to list working directories")
    }
}

/// Waits for `count` results from the orchestrator's pool.
pub async fn collect_results(orchestrator: &Orchestrator, count: usize) -> Vec<JobResult> {
    let mut results = Vec::with_capacity(count);
    for _ in 0..count {
        let completed = tokio::time::timeout(Duration::from_secs(10), orchestrator.pool().recv_result())
            .await
            .expect("job did not finish in time")
            .expect("result channel closed");
        results.push(completed.output.expect("job panicked"));
    }
    results
}
