//! Background execution loop.
//!
//! Each poll picks up a batch of pending executions and runs them as
//! independent tasks. A run that fails stays failed; nothing is requeued.

use futures::future::join_all;
use innoflow_core::ExecutionId;
use innoflow_workflow::{EngineError, ExecutionStatus, Orchestrator, WorkflowStore};
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

/// What happened to one picked-up execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// The run started and a node failed.
    Failed { error: String },
    /// Validation failed; the record was failed without running.
    Rejected { errors: Vec<String> },
    /// The execution could not be processed (e.g. another worker took it).
    Skipped { reason: String },
}

/// Polls for pending executions and runs them.
pub struct Worker<S: WorkflowStore> {
    orchestrator: Orchestrator<S>,
    batch_size: usize,
    poll_interval: Duration,
}

impl<S: WorkflowStore + 'static> Worker<S> {
    #[must_use]
    pub fn new(orchestrator: Orchestrator<S>) -> Self {
        Self {
            orchestrator,
            batch_size: 10,
            poll_interval: Duration::from_secs(1),
        }
    }

    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Polls until `shutdown` resolves.
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) {
        let mut interval = tokio::time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            batch_size = self.batch_size,
            poll_interval_ms = self.poll_interval.as_millis(),
            "worker started"
        );
        loop {
            tokio::select! {
                () = &mut shutdown => {
                    info!("shutdown requested, stopping worker");
                    break;
                }
                _ = interval.tick() => {
                    match self.run_once().await {
                        Ok(outcomes) if !outcomes.is_empty() => {
                            debug!(processed = outcomes.len(), "batch finished");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "failed to poll pending executions"),
                    }
                }
            }
        }
    }

    /// Runs one batch of pending executions concurrently.
    ///
    /// # Errors
    ///
    /// Returns an error only if the pending executions could not be listed.
    #[instrument(skip(self))]
    pub async fn run_once(
        &self,
    ) -> innoflow_core::Result<Vec<(ExecutionId, Outcome)>, EngineError> {
        let pending = self
            .orchestrator
            .store()
            .list_pending(self.batch_size)
            .await
            .map_err(EngineError::from)?;

        let tasks = pending.into_iter().map(|execution_id| {
            let orchestrator = self.orchestrator.clone();
            let handle = tokio::spawn(async move { process(&orchestrator, execution_id).await });
            async move {
                let outcome = handle.await.unwrap_or_else(|e| Outcome::Skipped {
                    reason: format!("execution task aborted: {e}"),
                });
                (execution_id, outcome)
            }
        });
        Ok(join_all(tasks).await)
    }
}

#[instrument(skip(orchestrator), fields(execution_id = %execution_id))]
async fn process<S: WorkflowStore>(
    orchestrator: &Orchestrator<S>,
    execution_id: ExecutionId,
) -> Outcome {
    let execution = match orchestrator.store().load_execution(execution_id).await {
        Ok(Some(execution)) if execution.status == ExecutionStatus::Pending => execution,
        Ok(Some(execution)) => {
            return Outcome::Skipped {
                reason: format!("execution is {}", execution.status),
            };
        }
        Ok(None) => {
            return Outcome::Skipped {
                reason: "execution disappeared".to_string(),
            };
        }
        Err(e) => {
            warn!(error = %e, "failed to load execution");
            return Outcome::Skipped {
                reason: e.to_string(),
            };
        }
    };

    if orchestrator.config().validate_before_run {
        let errors = match orchestrator.validate(execution.workflow_id).await {
            Ok(errors) => errors,
            Err(e) if matches!(e.current_context(), EngineError::WorkflowNotFound { .. }) => {
                vec![e.current_context().to_string()]
            }
            Err(e) => {
                // Transient; the record stays pending for the next poll.
                warn!(error = %e, "failed to validate workflow");
                return Outcome::Skipped {
                    reason: e.current_context().to_string(),
                };
            }
        };
        if !errors.is_empty() {
            return match orchestrator.reject(execution_id, errors.clone()).await {
                Ok(_) => Outcome::Rejected { errors },
                Err(e) => {
                    warn!(error = %e, "failed to reject execution");
                    Outcome::Skipped {
                        reason: e.current_context().to_string(),
                    }
                }
            };
        }
    }

    match orchestrator.execute(execution_id).await {
        Ok(_) => Outcome::Completed,
        Err(e) => match e.current_context() {
            EngineError::InvalidState { status, .. } => Outcome::Skipped {
                reason: format!("execution is {status}"),
            },
            other => {
                error!(error = %other, "execution failed");
                Outcome::Failed {
                    error: other.to_string(),
                }
            }
        },
    }
}
