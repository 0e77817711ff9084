//! The arena-backed step tree a [`crate::WorkflowManager`] drives.

use crate::step::{Step, StepPollOutcome, WorkflowCtx};

/// One node of a [`Workflow`]'s tree. Children are referenced by index into
/// the owning workflow's arena rather than by pointer, so the tree carries
/// no reference cycles.
#[derive(Debug)]
pub(crate) struct WorkflowNode {
    pub(crate) step: Option<Step>,
    pub(crate) children: Vec<usize>,
}

/// Errors building a [`Workflow`] with a [`WorkflowBuilder`].
#[derive(Debug, thiserror::Error)]
pub enum WorkflowBuildError {
    /// `then_do` named a parent step that isn't in the tree yet.
    #[error("no such step {0:?} to insert a child after")]
    NoSuchParent(String),
    /// `then_do` named a step that's already in the tree.
    #[error("step {0:?} already exists in this workflow")]
    DuplicateStep(String),
}

/// A tree of [`Step`]s driven together, in the order the tree's structure
/// allows: a step's children don't become eligible until it reaches
/// [`crate::StepState::Done`].
#[derive(Debug)]
pub struct Workflow {
    pub(crate) nodes: Vec<WorkflowNode>,
}

impl Workflow {
    /// Root node index; every [`Workflow`] has at least this one node.
    pub(crate) const ROOT: usize = 0;

    /// Depth-first indices of nodes with a step that is eligible to poll
    /// right now: not done, not failed/timed out, and every ancestor along
    /// its path is `Done`.
    fn incomplete_step_indices(&self) -> Vec<usize> {
        let mut stack = vec![Self::ROOT];
        let mut out = Vec::new();
        while let Some(idx) = stack.pop() {
            let node = &self.nodes[idx];
            match &node.step {
                Some(step) if !step.is_done() && step.is_pending() => out.push(idx),
                Some(step) if step.is_done() => stack.extend(node.children.iter().copied()),
                Some(_failed_or_timed_out) => {}
                None => stack.extend(node.children.iter().copied()),
            }
        }
        out
    }

    /// Every step in the tree, regardless of state.
    pub(crate) fn iterate_steps(&self) -> impl Iterator<Item = &Step> {
        self.nodes.iter().filter_map(|node| node.step.as_ref())
    }

    pub(crate) fn iterate_steps_mut(&mut self) -> impl Iterator<Item = &mut Step> {
        self.nodes.iter_mut().filter_map(|node| node.step.as_mut())
    }

    /// Poll up to `max_count` eligible steps (0 means unbounded), returning
    /// how many were actually polled and the index-affecting outcomes for
    /// steps that changed.
    pub(crate) async fn poll(&mut self, ctx: &WorkflowCtx, max_count: usize) -> (usize, Vec<(usize, StepPollOutcome)>) {
        let indices = self.incomplete_step_indices();
        let mut polled = 0;
        let mut changes = Vec::new();

        for idx in indices {
            let outcome = {
                let step = self.nodes[idx]
                    .step
                    .as_mut()
                    .expect("incomplete_step_indices only yields nodes with a step");
                step.poll(ctx).await
            };
            polled += 1;
            if !matches!(outcome, StepPollOutcome::Unchanged) {
                changes.push((idx, outcome));
            }
            if max_count > 0 && polled == max_count {
                break;
            }
        }

        (polled, changes)
    }

    /// Every step has reached `Done`.
    pub fn is_done(&self) -> bool {
        self.iterate_steps().all(|step| step.is_done())
    }

    /// At least one step is still new or pending.
    pub fn is_pending(&self) -> bool {
        self.iterate_steps().any(|step| step.is_pending())
    }

    /// At least one step has landed in `Error` or `Timeout`.
    pub fn is_failed(&self) -> bool {
        self.iterate_steps().any(|step| step.is_failed())
    }
}

/// Builds a [`Workflow`] one step at a time, wiring each new step as a
/// child of an existing one by name.
#[derive(Debug)]
pub struct WorkflowBuilder {
    workflow: Workflow,
    name_to_index: std::collections::HashMap<String, usize>,
}

impl WorkflowBuilder {
    /// Start a workflow rooted at `root`.
    pub fn new(root: Step) -> Self {
        let mut name_to_index = std::collections::HashMap::new();
        name_to_index.insert(root.name().to_string(), Workflow::ROOT);
        Self {
            workflow: Workflow {
                nodes: vec![WorkflowNode {
                    step: Some(root),
                    children: Vec::new(),
                }],
            },
            name_to_index,
        }
    }

    /// Insert `step` as a child of the step named `after`.
    pub fn then_do(mut self, step: Step, after: &str) -> Result<Self, WorkflowBuildError> {
        let Some(&parent_idx) = self.name_to_index.get(after) else {
            return Err(WorkflowBuildError::NoSuchParent(after.to_string()));
        };
        if self.name_to_index.contains_key(step.name()) {
            return Err(WorkflowBuildError::DuplicateStep(step.name().to_string()));
        }

        let child_idx = self.workflow.nodes.len();
        self.name_to_index.insert(step.name().to_string(), child_idx);
        self.workflow.nodes.push(WorkflowNode {
            step: Some(step),
            children: Vec::new(),
        });
        self.workflow.nodes[parent_idx].children.push(child_idx);

        Ok(self)
    }

    /// Finish building, consuming the builder.
    pub fn build(self) -> Workflow {
        self.workflow
    }
}
