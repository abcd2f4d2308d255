use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::UsageError;
use crate::models::dataset::DatasetId;
use crate::models::query::{
    FastResult, NarrativeError, NarrativeState, QueryError, QueryExecution, Question,
};
use crate::models::session::SessionContext;
use crate::services::backend::{AnalyticsBackend, NarrativeRequest};

/// Rows forwarded to narrative generation.
pub const DEFAULT_NARRATIVE_ROW_CAP: usize = 50;

/// The single question slot a caller renders from.
///
/// `generation` increases on every submission and reset; only the execution
/// carrying the current generation may be updated.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlotState {
    pub generation: u64,
    pub execution: Option<QueryExecution>,
}

/// What [`QueryOrchestrator::submit`] hands back once the fast result is in.
#[derive(Debug)]
pub struct Submission {
    pub execution_id: Uuid,
    pub generation: u64,
    pub fast: FastResult,
    /// A newer submission or a reset took the slot before the fast result
    /// arrived; the result was not applied.
    pub superseded: bool,
    /// Background narrative task, present only when it was started.
    pub narrative: Option<JoinHandle<()>>,
}

/// Answers questions with a fast chart-ready result and then, off the
/// caller's path, a narrative over the same rows.
pub struct QueryOrchestrator {
    backend: Arc<dyn AnalyticsBackend>,
    row_cap: usize,
    slot: Arc<watch::Sender<SlotState>>,
}

impl QueryOrchestrator {
    pub fn new(backend: Arc<dyn AnalyticsBackend>, row_cap: usize) -> Self {
        let (slot, _) = watch::channel(SlotState::default());
        Self {
            backend,
            row_cap,
            slot: Arc::new(slot),
        }
    }

    pub fn row_cap(&self) -> usize {
        self.row_cap
    }

    /// Submit `question` against `dataset_id`, superseding whatever the slot
    /// held. Returns once the fast result is known; the narrative continues
    /// in the background.
    pub async fn submit(
        &self,
        session: &SessionContext,
        dataset_id: &DatasetId,
        question: &str,
    ) -> Result<Submission, UsageError> {
        let question = Question::new(question)?;
        let execution = self.begin(question.clone(), dataset_id.clone());
        let generation = execution.generation;
        info!(
            execution_id = %execution.id,
            generation,
            dataset_id = %dataset_id,
            question = %question,
            "Query submitted"
        );

        let fast = match self
            .backend
            .execute_query(session, dataset_id, &question)
            .await
        {
            Ok(result) => {
                metrics::counter!("query_executions_total", "outcome" => "ready").increment(1);
                FastResult::Ready(result)
            }
            Err(e) => {
                warn!(generation, error = %e, "Fast query failed");
                metrics::counter!("query_executions_total", "outcome" => "failed").increment(1);
                FastResult::Failed(QueryError(e.to_string()))
            }
        };

        let applied = update_if_current(&self.slot, generation, |exec| {
            exec.fast = fast.clone();
            if matches!(fast, FastResult::Ready(_)) {
                exec.narrative = NarrativeState::InFlight;
            }
        });
        if !applied {
            debug!(generation, "Fast result arrived for a superseded question");
            metrics::counter!("query_executions_total", "outcome" => "superseded").increment(1);
        }

        let narrative = match (&fast, applied) {
            (FastResult::Ready(result), true) => {
                let request = NarrativeRequest {
                    dataset_id: dataset_id.clone(),
                    question,
                    rows: result.rows.iter().take(self.row_cap).cloned().collect(),
                };
                Some(self.spawn_narrative(session.clone(), generation, request))
            }
            _ => None,
        };

        Ok(Submission {
            execution_id: execution.id,
            generation,
            fast,
            superseded: !applied,
            narrative,
        })
    }

    /// Empty the slot. In-flight results for earlier submissions are dropped.
    pub fn reset(&self) {
        self.slot.send_modify(|slot| {
            slot.generation += 1;
            slot.execution = None;
        });
    }

    pub fn current(&self) -> Option<QueryExecution> {
        self.slot.borrow().execution.clone()
    }

    pub fn state(&self) -> SlotState {
        self.slot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SlotState> {
        self.slot.subscribe()
    }

    fn begin(&self, question: Question, dataset_id: DatasetId) -> QueryExecution {
        let mut execution = QueryExecution::new(0, question, dataset_id);
        self.slot.send_modify(|slot| {
            slot.generation += 1;
            execution.generation = slot.generation;
            slot.execution = Some(execution.clone());
        });
        execution
    }

    fn spawn_narrative(
        &self,
        session: SessionContext,
        generation: u64,
        request: NarrativeRequest,
    ) -> JoinHandle<()> {
        let backend = Arc::clone(&self.backend);
        let slot = Arc::clone(&self.slot);
        tokio::spawn(async move {
            let state = match backend.generate_narrative(&session, &request).await {
                Ok(text) => NarrativeState::Ready(text),
                Err(e) => {
                    warn!(generation, error = %e, "Narrative generation failed");
                    NarrativeState::Failed(NarrativeError(e.to_string()))
                }
            };
            let outcome = match &state {
                NarrativeState::Ready(_) => "ready",
                _ => "failed",
            };

            if update_if_current(&slot, generation, |exec| exec.narrative = state) {
                metrics::counter!("narratives_total", "outcome" => outcome).increment(1);
            } else {
                debug!(generation, "Dropping narrative for a superseded question");
                metrics::counter!("narratives_total", "outcome" => "dropped").increment(1);
            }
        })
    }
}

fn update_if_current(
    slot: &watch::Sender<SlotState>,
    generation: u64,
    apply: impl FnOnce(&mut QueryExecution),
) -> bool {
    slot.send_if_modified(|state| match state.execution.as_mut() {
        Some(exec) if state.generation == generation && exec.generation == generation => {
            apply(exec);
            true
        }
        _ => false,
    })
}
