//! Sequence orchestration: ordered partition processing, skip and stop
//! controls, and status derived purely from the job store.

#![allow(clippy::expect_used, clippy::unwrap_used)]

mod support;

use std::sync::Arc;

use strophe_flow::config::EngineConfig;
use strophe_flow::controllers::SeqStartOutcome;
use strophe_flow::error::Result;
use strophe_flow::job::JobStatus;
use strophe_flow::provider::ItemProcessor;

use support::{harness, Harness, PartitionedProvider, RecordingProcessor};

const PARTITIONS: [&str; 3] = ["corpus-a", "corpus-b", "corpus-c"];

fn sequence_engine() -> (Harness, Arc<RecordingProcessor>) {
    let processor = Arc::new(RecordingProcessor::new());
    let h = harness(
        EngineConfig::default().with_chunk_size(10).without_pacing(),
        Arc::new(PartitionedProvider::new(&[
            ("corpus-a", 25),
            ("corpus-b", 8),
            ("corpus-c", 12),
        ])),
        Arc::clone(&processor) as Arc<dyn ItemProcessor>,
        PARTITIONS.iter().map(|p| (*p).to_string()).collect(),
    );
    (h, processor)
}

fn started_partition(outcome: &SeqStartOutcome) -> &str {
    match outcome {
        SeqStartOutcome::Started { partition, .. } => partition,
        other => panic!("expected Started, got {other:?}"),
    }
}

#[tokio::test]
async fn partitions_run_in_order_one_at_a_time() -> Result<()> {
    let (h, processor) = sequence_engine();

    for expected in PARTITIONS {
        let outcome = h.service.seq_start(None).await?;
        assert_eq!(started_partition(&outcome), expected);
        h.drive().await?;
    }
    assert_eq!(h.service.seq_start(None).await?, SeqStartOutcome::Exhausted);

    // 25 + 8 + 12 items across the three corpora, in partition order.
    let seen = processor.seen();
    assert_eq!(seen.len(), 45);
    assert!(seen[0].starts_with("corpus-a"));
    assert!(seen[44].starts_with("corpus-c"));

    let status = h.service.seq_status().await?;
    assert_eq!(status.completed, PARTITIONS.map(String::from).to_vec());
    assert_eq!(status.current, None);

    Ok(())
}

#[tokio::test]
async fn start_after_a_completed_partition_picks_the_next() -> Result<()> {
    let (h, _processor) = sequence_engine();

    let first = h.service.seq_start(None).await?;
    assert_eq!(started_partition(&first), "corpus-a");
    h.drive().await?;

    // A is Completed; an unqualified start must pick B, not A or C.
    let second = h.service.seq_start(None).await?;
    assert_eq!(started_partition(&second), "corpus-b");

    Ok(())
}

#[tokio::test]
async fn start_while_a_partition_is_active_creates_no_second_job() -> Result<()> {
    let (h, _processor) = sequence_engine();

    let first = h.service.seq_start(None).await?;
    let SeqStartOutcome::Started { job_id, .. } = first else {
        panic!("expected Started");
    };

    let again = h.service.seq_start(None).await?;
    assert_eq!(
        again,
        SeqStartOutcome::AlreadyActive {
            partition: "corpus-a".to_string(),
            job_id,
        }
    );

    Ok(())
}

#[tokio::test]
async fn explicit_partition_start_bypasses_the_order() -> Result<()> {
    let (h, processor) = sequence_engine();

    let outcome = h.service.seq_start(Some("corpus-c")).await?;
    assert_eq!(started_partition(&outcome), "corpus-c");
    h.drive().await?;

    assert_eq!(processor.seen().len(), 12);
    let status = h.service.seq_status().await?;
    assert_eq!(status.completed, vec!["corpus-c".to_string()]);

    Ok(())
}

#[tokio::test]
async fn skip_cancels_the_current_partition_and_starts_the_next() -> Result<()> {
    let (h, _processor) = sequence_engine();

    let SeqStartOutcome::Started { job_id: first, .. } = h.service.seq_start(None).await? else {
        panic!("expected Started");
    };

    let skipped_to = h.service.seq_skip().await?;
    assert_eq!(started_partition(&skipped_to), "corpus-b");

    // The Pending job for corpus-a cancelled immediately.
    assert_eq!(
        h.service.get_status(first).await?.status,
        JobStatus::Cancelled
    );

    // Driving now completes corpus-b; corpus-a stays uncompleted.
    h.drive().await?;
    let status = h.service.seq_status().await?;
    assert_eq!(status.completed, vec!["corpus-b".to_string()]);

    Ok(())
}

#[tokio::test]
async fn stop_cancels_everything_active_in_the_sequence() -> Result<()> {
    let (h, _processor) = sequence_engine();
    h.service.seq_start(None).await?;

    assert_eq!(h.service.seq_stop().await?, 1);

    let status = h.service.seq_status().await?;
    assert_eq!(status.current, None);
    assert!(status.completed.is_empty());

    Ok(())
}

#[tokio::test]
async fn status_reports_pending_counts_per_partition() -> Result<()> {
    let (h, _processor) = sequence_engine();

    let status = h.service.seq_status().await?;
    assert_eq!(status.pending_counts.get("corpus-a"), Some(&25));
    assert_eq!(status.pending_counts.get("corpus-b"), Some(&8));
    assert_eq!(status.pending_counts.get("corpus-c"), Some(&12));

    Ok(())
}

#[tokio::test]
async fn a_cancelled_partition_is_eligible_for_restart() -> Result<()> {
    let (h, _processor) = sequence_engine();

    h.service.seq_start(None).await?;
    h.service.seq_stop().await?;

    // Cancelled is not Completed, so an unqualified start retries corpus-a.
    let outcome = h.service.seq_start(None).await?;
    assert_eq!(started_partition(&outcome), "corpus-a");

    Ok(())
}
