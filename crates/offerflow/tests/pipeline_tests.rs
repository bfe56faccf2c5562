//! End-to-end runs of the per-message pipeline against spy collaborators.

mod common;

use std::time::Duration;

use serde_json::Value;

use common::{collect_results, MessageBuilder, OfferBuilder, ScriptedExtractor, TestHarness};
use offerflow::email::MessageHandler;
use offerflow::pipeline::{JobOutcome, Metadata};
use offerflow::store::{Flag, METADATA_FILE};

#[tokio::test]
async fn test_message_without_attachments_is_committed() {
    let harness = TestHarness::new();
    let orchestrator = harness.orchestrator();

    let message = MessageBuilder::new()
        .subject("Zapytanie o blachę")
        .body("Proszę o ofertę na 20 t.")
        .build();
    let job = orchestrator.intake(&message).await.unwrap();

    assert!(job.dir.flag_exists(Flag::ProcessingComplete).await);
    assert!(job.dir.flag_exists(Flag::AllPresent).await);

    let combined: Value = job.dir.read_json(&job.dir.combined_file_name()).await.unwrap();
    assert_eq!(combined["subject"], "Zapytanie o blachę");
    assert_eq!(combined["body"], "Proszę o ofertę na 20 t.");
    assert_eq!(combined["attachments"], serde_json::json!([]));
}

#[tokio::test]
async fn test_csv_attachment_scenario() {
    let harness = TestHarness::new();
    let orchestrator = harness.orchestrator();

    let message = MessageBuilder::new()
        .subject("Invoice #123")
        .body("See attached")
        .attachment("x.csv", "text/csv", b"product,price\nDX51D,4200\nS235,3900\n")
        .build();
    let job = orchestrator.intake(&message).await.unwrap();

    let metadata: Value = job.dir.read_json(METADATA_FILE).await.unwrap();
    assert_eq!(
        metadata["attachments"],
        serde_json::json!([{ "filename": "x.csv", "processed": true }])
    );

    let combined: Value = job.dir.read_json(&job.dir.combined_file_name()).await.unwrap();
    let rows = &combined["attachments"][0]["content"];
    assert_eq!(combined["attachments"][0]["filename"], "x.csv");
    assert_eq!(rows[0]["product"], "DX51D");
    assert_eq!(rows[1]["price"], 3900);
}

#[tokio::test]
async fn test_attachment_identified_by_mime_type_is_normalized() {
    let harness = TestHarness::new();
    let orchestrator = harness.orchestrator();

    let message = MessageBuilder::new()
        .attachment("cennik", "text/csv", b"product,price\nDX51D,4200\n")
        .unnamed_attachment("text/csv", b"product,price\nS235,3900\n")
        .build();
    let job = orchestrator.intake(&message).await.unwrap();

    let metadata: Value = job.dir.read_json(METADATA_FILE).await.unwrap();
    assert_eq!(
        metadata["attachments"],
        serde_json::json!([
            { "filename": "cennik", "processed": true },
            { "filename": "attachment.csv", "processed": true }
        ])
    );

    let combined: Value = job.dir.read_json(&job.dir.combined_file_name()).await.unwrap();
    let prices: Vec<&Value> = combined["attachments"]
        .as_array()
        .unwrap()
        .iter()
        .map(|a| &a["content"][0]["price"])
        .collect();
    assert_eq!(prices.len(), 2);
    assert!(prices.contains(&&serde_json::json!(4200)));
    assert!(prices.contains(&&serde_json::json!(3900)));
}

#[tokio::test]
async fn test_disallowed_attachment_is_not_extracted() {
    let harness = TestHarness::new();
    let orchestrator = harness.orchestrator();

    let message = MessageBuilder::new()
        .attachment("installer.exe", "application/x-msdownload", b"MZ\x90\x00")
        .attachment("archive.zip", "application/zip", b"PK\x03\x04")
        .inline("logo.png", "image/png", b"\x89PNG")
        .build();
    let job = orchestrator.intake(&message).await.unwrap();

    let metadata: Metadata = job.dir.read_json(METADATA_FILE).await.unwrap();
    assert!(metadata.attachments.is_empty());
    assert!(!job.dir.file("installer.exe").exists());
    assert!(!job.dir.file("installer_processed.json").exists());
    assert!(!job.dir.file("logo.png").exists());
}

#[tokio::test]
async fn test_spam_is_discarded_without_export() {
    let harness = TestHarness::new();
    let orchestrator = harness.orchestrator();

    orchestrator
        .handle(
            MessageBuilder::new()
                .uid(77)
                .subject("Security Alert")
                .body("New sign-in from Windows")
                .build(),
        )
        .await;
    let results = collect_results(&orchestrator, 1).await;

    assert!(matches!(results[0].outcome, JobOutcome::Spam { .. }));
    assert!(!results[0].dir.exists());
    assert!(harness.pending().is_empty());
    assert_eq!(harness.exporter.call_count(), 0);
    assert_eq!(harness.extractor.call_count(), 0);
    assert_eq!(*harness.mailbox.seen.lock().unwrap(), vec![77]);
}

#[tokio::test]
async fn test_exported_offer_matches_processed_file() {
    let harness = TestHarness::new();
    let orchestrator = harness.orchestrator();

    orchestrator
        .handle(
            MessageBuilder::new()
                .subject("Oferta OF/2024/117")
                .attachment("cennik.csv", "text/csv", b"produkt,cena\nBlacha,4200\n")
                .build(),
        )
        .await;
    let results = collect_results(&orchestrator, 1).await;

    assert!(matches!(results[0].outcome, JobOutcome::Exported(_)));
    assert!(!results[0].dir.exists());

    let calls = harness.exporter.calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].offers_on_disk.len(), 1);
    assert_eq!(
        serde_json::to_value(&calls[0].offer).unwrap(),
        calls[0].offers_on_disk[0]
    );
    assert_eq!(calls[0].offer, OfferBuilder::new().build().clean());
}

#[tokio::test]
async fn test_extraction_retries_until_success() {
    let harness = TestHarness::with_extractor(ScriptedExtractor::failing_first(3));
    let orchestrator = harness.orchestrator();

    orchestrator.handle(MessageBuilder::new().build()).await;
    let results = collect_results(&orchestrator, 1).await;

    assert!(matches!(results[0].outcome, JobOutcome::Exported(_)));
    assert_eq!(harness.extractor.call_count(), 4);

    let times = harness.extractor.call_times.lock().unwrap();
    let gaps: Vec<Duration> = times.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(gaps.len(), 3);
    assert!(gaps[0] >= Duration::from_millis(20));
    // Each backoff is double the last, so even with scheduler jitter the gaps grow.
    assert!(gaps[1] >= Duration::from_millis(40));
    assert!(gaps[2] >= Duration::from_millis(80));
    assert!(harness.exporter.call_count() == 1);
}

#[tokio::test]
async fn test_export_failure_keeps_working_directory() {
    let harness = TestHarness::new().with_failing_exporter();
    let orchestrator = harness.orchestrator();

    orchestrator.handle(MessageBuilder::new().build()).await;
    let results = collect_results(&orchestrator, 1).await;

    assert!(matches!(results[0].outcome, JobOutcome::Failed { .. }));
    let pending = harness.pending();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].flag_exists(Flag::AllPresent).await);
    assert!(!pending[0].flag_exists(Flag::SheetsProcessed).await);
    assert!(pending[0].file(&pending[0].offer_file_name()).exists());
}

#[tokio::test]
async fn test_unparsable_message_is_left_unseen() {
    let harness = TestHarness::new();
    let orchestrator = harness.orchestrator();

    orchestrator
        .handle(offerflow::email::RawMessage {
            uid: 5,
            bytes: Vec::new(),
        })
        .await;

    assert!(harness.mailbox.seen.lock().unwrap().is_empty());
    assert_eq!(harness.extractor.call_count(), 0);
    for dir in harness.pending() {
        assert!(!dir.flag_exists(Flag::ProcessingComplete).await);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_jobs_respect_pool_size() {
    let harness = TestHarness::with_extractor(
        ScriptedExtractor::succeeding().with_latency(Duration::from_millis(50)),
    )
    .with_max_workers(2);
    let orchestrator = harness.orchestrator();

    for uid in 1..=6 {
        orchestrator
            .handle(MessageBuilder::new().uid(uid).build())
            .await;
        assert!(orchestrator.pool().active() <= 2);
    }
    let results = collect_results(&orchestrator, 6).await;

    assert!(results
        .iter()
        .all(|r| matches!(r.outcome, JobOutcome::Exported(_))));
    assert_eq!(harness.extractor.call_count(), 6);
    assert!(harness.extractor.peak() <= 2);
    assert!(harness.pending().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_handle_returns_while_every_worker_is_busy() {
    let harness = TestHarness::with_extractor(
        ScriptedExtractor::succeeding().with_latency(Duration::from_secs(2)),
    )
    .with_max_workers(1);
    let orchestrator = harness.orchestrator();

    orchestrator
        .handle(MessageBuilder::new().uid(1).build())
        .await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(orchestrator.pool().active(), 1);

    let started = std::time::Instant::now();
    orchestrator
        .handle(MessageBuilder::new().uid(2).build())
        .await;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(*harness.mailbox.seen.lock().unwrap(), vec![1, 2]);
    assert_eq!(orchestrator.pool().waiting(), 1);

    let results = collect_results(&orchestrator, 2).await;
    assert!(results
        .iter()
        .all(|r| matches!(r.outcome, JobOutcome::Exported(_))));
    assert!(harness.extractor.peak() <= 1);
}
