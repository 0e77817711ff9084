//! Owns every running [`Workflow`] and the `task_id -> step` index that lets
//! [`TaskResult`]s land on the right step without scanning every workflow.

use std::collections::HashMap;
use std::sync::Arc;

use tapecore_dispatch::{DispatchContext, Dispatcher, TaskHandlerSet};
use tapecore_task::TaskResult;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::step::{StepPollOutcome, WorkflowCtx};
use crate::tree::Workflow;

struct Inner {
    workflows: Vec<Workflow>,
    /// `task_id -> (workflow_index, step_node_index)`, populated whenever a
    /// step enters `Pending` and cleared when it leaves. Turns result
    /// injection into an O(1) lookup instead of a scan over every pending
    /// step in every workflow.
    task_index: HashMap<Uuid, (usize, usize)>,
    max_concurrent_steps: usize,
}

impl Inner {
    fn add_workflow(&mut self, workflow: Workflow) -> usize {
        self.workflows.push(workflow);
        self.workflows.len() - 1
    }

    async fn poll(&mut self, ctx: &WorkflowCtx) -> usize {
        let mut total = 0;
        for workflow_idx in 0..self.workflows.len() {
            let budget = if self.max_concurrent_steps > 0 {
                let remaining = self.max_concurrent_steps.saturating_sub(total);
                if remaining == 0 {
                    continue;
                }
                remaining
            } else {
                0
            };

            let (polled, changes) = self.workflows[workflow_idx].poll(ctx, budget).await;
            total += polled;

            for (step_idx, outcome) in changes {
                match outcome {
                    StepPollOutcome::EnteredPending(task_id) => {
                        self.task_index.insert(task_id, (workflow_idx, step_idx));
                    }
                    StepPollOutcome::LeftPending => {
                        let task_id = self.workflows[workflow_idx].nodes[step_idx]
                            .step
                            .as_ref()
                            .and_then(|step| step.task_id());
                        if let Some(task_id) = task_id {
                            self.task_index.remove(&task_id);
                        }
                    }
                    StepPollOutcome::Unchanged => {}
                }
            }
        }
        total
    }

    fn all_done(&self) -> bool {
        self.workflows.iter().all(|workflow| workflow.is_done())
    }

    fn handle_task_result(&mut self, result: TaskResult) {
        let task_id = result.task_id();
        let Some(&(workflow_idx, step_idx)) = self.task_index.get(&task_id) else {
            tracing::debug!(%task_id, "task result has no pending step registered for it");
            return;
        };
        if let Some(step) = self.workflows[workflow_idx].nodes[step_idx].step.as_mut() {
            tracing::info!(%task_id, step = step.name(), "task result delivered to step");
            step.set_task_result(result);
        }
    }

    fn reset_steps_with_timeout(&mut self) {
        for workflow in &mut self.workflows {
            for step in workflow.iterate_steps_mut() {
                if step.state() == crate::step::StepState::Timeout {
                    if let Some(task_id) = step.reset() {
                        self.task_index.remove(&task_id);
                    }
                }
            }
        }
    }
}

/// Owns a set of workflows and routes [`TaskResult`]s to their waiting
/// steps. Cheap to clone; every clone shares the same state.
#[derive(Clone)]
pub struct WorkflowManager(Arc<Mutex<Inner>>);

impl WorkflowManager {
    /// Build an empty manager. `max_concurrent_steps` of `0` means a
    /// [`WorkflowManager::poll`] call has no per-call budget and polls
    /// every eligible step in every workflow.
    pub fn new(max_concurrent_steps: usize) -> Self {
        Self(Arc::new(Mutex::new(Inner {
            workflows: Vec::new(),
            task_index: HashMap::new(),
            max_concurrent_steps,
        })))
    }

    /// Register a built [`Workflow`], returning its index.
    pub async fn add_workflow(&self, workflow: Workflow) -> usize {
        self.0.lock().await.add_workflow(workflow)
    }

    /// Poll every workflow once, honoring the configured concurrent-step
    /// budget, returning the total number of steps polled.
    pub async fn poll(&self, ctx: &WorkflowCtx) -> usize {
        self.0.lock().await.poll(ctx).await
    }

    /// Whether every registered workflow has completed.
    pub async fn all_done(&self) -> bool {
        self.0.lock().await.all_done()
    }

    /// Move every timed-out step back to `New` so it gets another attempt.
    pub async fn reset_steps_with_timeout(&self) {
        self.0.lock().await.reset_steps_with_timeout()
    }

    async fn handle_task_result(&self, result: TaskResult) {
        self.0.lock().await.handle_task_result(result);
    }
}

impl TaskHandlerSet for WorkflowManager {
    fn register(self: Arc<Self>, dispatcher: &Dispatcher) {
        let manager = (*self).clone();
        dispatcher.register_task_handler_callback(
            move |result: TaskResult, _envelope: tapecore_task::TaskEnvelope, _ctx: DispatchContext| {
                let manager = manager.clone();
                async move {
                    manager.handle_task_result(result).await;
                    Ok(())
                }
            },
        );
    }
}
