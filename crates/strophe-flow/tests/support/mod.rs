//! Shared fixtures for the engine integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use strophe_flow::config::EngineConfig;
use strophe_flow::error::Result;
use strophe_flow::job::{JobScope, StageSkips};
use strophe_flow::provider::{ItemOutcome, ItemProcessor, WorkItem, WorkItemProvider};
use strophe_flow::scheduler::memory::RecordingScheduler;
use strophe_flow::scheduler::ContinuationScheduler;
use strophe_flow::service::FlowService;
use strophe_flow::store::memory::InMemoryJobStore;
use strophe_flow::store::JobStore;

/// Provider over one flat item list, offset-sliced like a real store query.
pub struct ListProvider {
    items: Vec<WorkItem>,
}

impl ListProvider {
    pub fn of_size(n: usize) -> Self {
        Self {
            items: (0..n)
                .map(|i| WorkItem::new(format!("track-{i:04}")))
                .collect(),
        }
    }
}

#[async_trait]
impl WorkItemProvider for ListProvider {
    async fn fetch(
        &self,
        _scope: JobScope,
        _scope_filter: Option<&str>,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<WorkItem>> {
        Ok(slice(&self.items, offset, limit))
    }

    async fn count(&self, _scope: JobScope, _scope_filter: Option<&str>) -> Result<u64> {
        Ok(self.items.len() as u64)
    }
}

/// Provider with a separate item list per partition.
pub struct PartitionedProvider {
    partitions: BTreeMap<String, Vec<WorkItem>>,
}

impl PartitionedProvider {
    pub fn new(sizes: &[(&str, usize)]) -> Self {
        let partitions = sizes
            .iter()
            .map(|(name, n)| {
                let items = (0..*n)
                    .map(|i| WorkItem::new(format!("{name}-track-{i:04}")))
                    .collect();
                ((*name).to_string(), items)
            })
            .collect();
        Self { partitions }
    }
}

#[async_trait]
impl WorkItemProvider for PartitionedProvider {
    async fn fetch(
        &self,
        _scope: JobScope,
        scope_filter: Option<&str>,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<WorkItem>> {
        let items = scope_filter
            .and_then(|partition| self.partitions.get(partition))
            .map(Vec::as_slice)
            .unwrap_or_default();
        Ok(slice(items, offset, limit))
    }

    async fn count(&self, _scope: JobScope, scope_filter: Option<&str>) -> Result<u64> {
        Ok(scope_filter
            .and_then(|partition| self.partitions.get(partition))
            .map_or(0, |items| items.len() as u64))
    }
}

fn slice(items: &[WorkItem], offset: u64, limit: u32) -> Vec<WorkItem> {
    let start = usize::try_from(offset).unwrap_or(usize::MAX);
    items
        .get(start..)
        .unwrap_or_default()
        .iter()
        .take(limit as usize)
        .cloned()
        .collect()
}

/// Processor that records every item id it sees and succeeds them all.
#[derive(Default)]
pub struct RecordingProcessor {
    seen: Mutex<Vec<String>>,
}

impl RecordingProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ItemProcessor for RecordingProcessor {
    async fn process(&self, item: &WorkItem, _skips: StageSkips) -> ItemOutcome {
        self.seen.lock().unwrap().push(item.id.clone());
        ItemOutcome::success()
            .with_enriched()
            .with_annotated()
            .with_quality_bucket("high")
    }
}

/// Processor that fails every item it is given.
#[derive(Default)]
pub struct AlwaysFailingProcessor {
    pub calls: AtomicU64,
}

#[async_trait]
impl ItemProcessor for AlwaysFailingProcessor {
    async fn process(&self, item: &WorkItem, _skips: StageSkips) -> ItemOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        ItemOutcome::failed(format!("no lyrics source for {}", item.id))
    }
}

/// Everything a test needs to drive the engine by hand.
pub struct Harness {
    pub service: FlowService,
    pub store: Arc<InMemoryJobStore>,
    pub scheduler: Arc<RecordingScheduler>,
}

pub fn harness(
    config: EngineConfig,
    provider: Arc<dyn WorkItemProvider>,
    processor: Arc<dyn ItemProcessor>,
    partitions: Vec<String>,
) -> Harness {
    let store = Arc::new(InMemoryJobStore::new());
    let scheduler = Arc::new(RecordingScheduler::new());
    let service = FlowService::new(
        config,
        Arc::clone(&store) as Arc<dyn JobStore>,
        provider,
        processor,
        Arc::clone(&scheduler) as Arc<dyn ContinuationScheduler>,
        partitions,
    )
    .expect("valid engine config");
    Harness {
        service,
        store,
        scheduler,
    }
}

impl Harness {
    /// Drains the scheduler, running every continuation in order. Returns
    /// how many chunk invocations ran.
    pub async fn drive(&self) -> Result<usize> {
        let mut invocations = 0;
        while let Some(next) = self.scheduler.take()? {
            self.service.continue_job(next.job_id).await?;
            invocations += 1;
            assert!(invocations < 1000, "continuation chain did not terminate");
        }
        Ok(invocations)
    }
}
