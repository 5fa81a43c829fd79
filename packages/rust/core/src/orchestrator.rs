//! The pipeline run loop.
//!
//! A run merges newly discovered items into the registry, then walks every
//! tracked item through the phase executors in declaration order. Items are
//! processed concurrently under a semaphore; phases within one item run
//! sequentially under the item's lock. A phase failure is recorded on the
//! record and the loop moves on, so one stubborn item never blocks the
//! rest. Infrastructure failures (the registry itself) abort the run.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use magpie_phases::PhaseExecutor;
use magpie_shared::{MagpieError, Result, RunPrefs};
use magpie_storage::Registry;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use crate::events::{EventSender, PipelineEvent};
use crate::state::StateManager;

/// One failed phase attempt, as reported in the run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub id: String,
    pub phase: String,
    pub message: String,
}

/// Aggregate result of a run, persisted as the run's stats row.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: String,
    pub items: usize,
    pub phases_run: usize,
    pub failures: Vec<ItemFailure>,
    pub elapsed_ms: u64,
}

#[derive(Default)]
struct ItemOutcome {
    phases_run: usize,
    failures: Vec<ItemFailure>,
}

pub struct PipelineOrchestrator {
    state: Arc<StateManager>,
    executors: Arc<Vec<Arc<dyn PhaseExecutor>>>,
    registry: Arc<Registry>,
    events: EventSender,
    concurrency: usize,
}

impl PipelineOrchestrator {
    pub fn new(
        state: Arc<StateManager>,
        executors: Vec<Arc<dyn PhaseExecutor>>,
        events: EventSender,
        concurrency: usize,
    ) -> Self {
        let registry = state.registry();
        Self {
            state,
            executors: Arc::new(executors),
            registry,
            events,
            concurrency: concurrency.max(1),
        }
    }

    /// Runs the pipeline over the union of `discovered` items and
    /// everything already tracked in the registry.
    #[instrument(skip_all, fields(discovered = discovered.len()))]
    pub async fn run(
        &self,
        discovered: BTreeMap<String, String>,
        prefs: &RunPrefs,
    ) -> Result<RunSummary> {
        let started = Instant::now();
        let run_id = self.registry.insert_run().await?;

        for (id, url) in &discovered {
            self.state.load_or_create(id, url).await?;
        }
        let ids = self.state.item_ids();
        info!(run_id = %run_id, items = ids.len(), "pipeline run starting");
        self.events.emit(PipelineEvent::RunStarted {
            run_id: run_id.to_string(),
            items: ids.len(),
        });

        let prefs = Arc::new(prefs.clone());
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();
        for id in ids {
            let state = Arc::clone(&self.state);
            let executors = Arc::clone(&self.executors);
            let events = self.events.clone();
            let prefs = Arc::clone(&prefs);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                process_item(&state, &executors, &events, &prefs, &id).await
            });
        }

        let mut items = 0usize;
        let mut phases_run = 0usize;
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(outcome)) => {
                    items += 1;
                    phases_run += outcome.phases_run;
                    failures.extend(outcome.failures);
                }
                Ok(Err(e)) => {
                    tasks.abort_all();
                    return Err(e);
                }
                Err(e) => {
                    error!(error = %e, "item task aborted");
                }
            }
        }
        failures.sort_by(|a, b| a.id.cmp(&b.id));

        let summary = RunSummary {
            run_id: run_id.to_string(),
            items,
            phases_run,
            failures,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        let stats = serde_json::to_string(&summary)
            .map_err(|e| MagpieError::parse(format!("run stats: {e}")))?;
        self.registry.finish_run(&run_id, &stats).await?;
        info!(
            items = summary.items,
            phases_run = summary.phases_run,
            failures = summary.failures.len(),
            "pipeline run complete"
        );
        Ok(summary)
    }
}

/// Walks one item through every scheduled phase. Phase errors are recorded
/// on the item and reported in the outcome; only registry errors propagate.
async fn process_item(
    state: &StateManager,
    executors: &[Arc<dyn PhaseExecutor>],
    events: &EventSender,
    prefs: &RunPrefs,
    id: &str,
) -> Result<ItemOutcome> {
    let _guard = state.lock_item(id).await;
    let Some(mut record) = state.get(id) else {
        return Ok(ItemOutcome::default());
    };

    let mut outcome = ItemOutcome::default();
    for executor in executors {
        let phase = executor.phase();
        if !state.should_process_phase(&record, phase, prefs) {
            continue;
        }
        events.emit(PipelineEvent::PhaseStarted {
            id: record.id.clone(),
            phase,
        });
        match executor.execute(&mut record).await {
            Ok(()) => {
                phase.mark_done(&mut record);
                record.clear_failure(phase);
                state.update_item(&mut record).await?;
                outcome.phases_run += 1;
                events.emit(PipelineEvent::PhaseCompleted {
                    id: record.id.clone(),
                    phase,
                });
            }
            Err(e) => {
                warn!(id = %record.id, phase = %phase, error = %e, "phase failed, continuing");
                record.record_failure(phase, e.to_string());
                state.update_item(&mut record).await?;
                outcome.failures.push(ItemFailure {
                    id: record.id.clone(),
                    phase: phase.display_name().to_string(),
                    message: e.to_string(),
                });
                events.emit(PipelineEvent::PhaseFailed {
                    id: record.id.clone(),
                    phase,
                    message: e.to_string(),
                });
            }
        }
    }
    Ok(outcome)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
