//! A single step's state machine and the behavior trait it drives.

use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tapecore_dispatch::DispatchContext;
use tapecore_task::TaskResult;
use uuid::Uuid;

/// A step's position in its own lifecycle.
///
/// Transitions: `New -> Pending` (task created), `Pending -> Done`
/// (result verified), `{New, Pending} -> Error` (task creation failed, or
/// a result arrived that doesn't verify), `Pending -> Timeout` (no result
/// before the configured deadline), `{Pending, Error, Timeout} -> New`
/// (explicit reset).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    /// Not yet started; about to check completion or create its task.
    New,
    /// A task has been created; waiting on its result.
    Pending,
    /// Verified complete.
    Done,
    /// Task creation failed, or a result arrived that failed verification.
    Error,
    /// No result arrived within the step's timeout.
    Timeout,
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepState::New => "new",
            StepState::Pending => "pending",
            StepState::Done => "done",
            StepState::Error => "error",
            StepState::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

/// What a concrete step actually does, supplied by the workflow author.
///
/// `Step` drives this trait's methods through the state machine above; a
/// `StepBehavior` never touches `StepState` itself.
pub trait StepBehavior: Send + Sync {
    /// Post this step's task, returning the id the dispatcher assigned it.
    /// Returning `None` moves the step straight to `Error`.
    fn create_task<'a>(&'a self, ctx: &'a WorkflowCtx) -> BoxFuture<'a, Option<Uuid>>;

    /// Check whether this step's goal is already satisfied, independent of
    /// any particular task result (e.g. the target already exists). Called
    /// both before creating a task and again once a result has arrived.
    fn verify_done<'a>(&'a self, ctx: &'a WorkflowCtx) -> BoxFuture<'a, bool>;

    /// Run once, after `verify_done` confirms completion, before the step
    /// is marked `Done`. The default does nothing.
    fn post_step<'a>(&'a self, _ctx: &'a WorkflowCtx) -> BoxFuture<'a, ()> {
        Box::pin(async {})
    }
}

/// What a step needs to create and verify its task: a handle back to the
/// dispatcher it should post through. Domain-specific dependencies (DAOs,
/// config, ...) belong on the concrete [`StepBehavior`] itself rather than
/// threaded through here.
pub struct WorkflowCtx {
    /// The dispatcher this workflow's steps post their tasks through.
    pub dispatch: DispatchContext,
}

/// Outcome of polling a step, as far as the owning [`crate::Workflow`] and
/// [`crate::WorkflowManager`] need to know to keep the `task_id` index
/// current.
#[derive(Debug)]
pub(crate) enum StepPollOutcome {
    /// The step's state didn't change in a way that affects indexing.
    Unchanged,
    /// The step just started waiting on `task_id`; index it.
    EnteredPending(Uuid),
    /// The step just stopped waiting on a result; drop it from the index.
    LeftPending,
}

/// One node's worth of work in a [`crate::Workflow`].
pub struct Step {
    name: String,
    behavior: Box<dyn StepBehavior>,
    state: StepState,
    task_id: Option<Uuid>,
    last_result: Option<TaskResult>,
    created_at: Option<Instant>,
    timeout: Duration,
    dirty: bool,
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("task_id", &self.task_id)
            .field("last_result", &self.last_result)
            .field("created_at", &self.created_at)
            .field("timeout", &self.timeout)
            .field("dirty", &self.dirty)
            .finish_non_exhaustive()
    }
}

impl Step {
    /// Build a new step, starting in [`StepState::New`]. `timeout` of
    /// [`Duration::ZERO`] means the step never times out.
    pub fn new(name: impl Into<String>, behavior: Box<dyn StepBehavior>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            behavior,
            state: StepState::New,
            task_id: None,
            last_result: None,
            created_at: None,
            timeout,
            dirty: true,
        }
    }

    /// This step's name, unique within its workflow.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state.
    pub fn state(&self) -> StepState {
        self.state
    }

    /// The task id this step is or was waiting on, if any.
    pub fn task_id(&self) -> Option<Uuid> {
        self.task_id
    }

    /// Whether this step has reached [`StepState::Done`].
    pub fn is_done(&self) -> bool {
        self.state == StepState::Done
    }

    /// Whether this step hasn't finished or failed yet.
    pub fn is_pending(&self) -> bool {
        matches!(self.state, StepState::New | StepState::Pending)
    }

    /// Whether this step has landed in a terminal failure state.
    pub fn is_failed(&self) -> bool {
        matches!(self.state, StepState::Error | StepState::Timeout)
    }

    /// Whether this step's state has changed since the last
    /// [`Step::clear_dirty`] call.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear the dirty flag after a caller has observed this step's state.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Record a task result for this step to re-check on its next poll.
    pub(crate) fn set_task_result(&mut self, result: TaskResult) {
        self.last_result = Some(result);
    }

    fn transition(&mut self, next: StepState) {
        tracing::info!(step = %self.name, from = %self.state, to = %next, "step changed state");
        self.state = next;
        self.dirty = true;
    }

    pub(crate) async fn poll(&mut self, ctx: &WorkflowCtx) -> StepPollOutcome {
        match self.state {
            StepState::New => self.poll_new(ctx).await,
            StepState::Pending => self.poll_pending(ctx).await,
            StepState::Done | StepState::Error | StepState::Timeout => StepPollOutcome::Unchanged,
        }
    }

    async fn poll_new(&mut self, ctx: &WorkflowCtx) -> StepPollOutcome {
        if self.behavior.verify_done(ctx).await {
            self.transition(StepState::Done);
            return StepPollOutcome::Unchanged;
        }

        match self.behavior.create_task(ctx).await {
            Some(task_id) => {
                self.task_id = Some(task_id);
                self.created_at = Some(Instant::now());
                self.transition(StepState::Pending);
                StepPollOutcome::EnteredPending(task_id)
            }
            None => {
                tracing::error!(step = %self.name, "step failed to create task");
                self.transition(StepState::Error);
                StepPollOutcome::Unchanged
            }
        }
    }

    async fn poll_pending(&mut self, ctx: &WorkflowCtx) -> StepPollOutcome {
        if !self.timeout.is_zero() {
            if let Some(created_at) = self.created_at {
                if created_at.elapsed() > self.timeout {
                    self.transition(StepState::Timeout);
                    return StepPollOutcome::LeftPending;
                }
            }
        }

        if self.last_result.is_some() {
            if self.behavior.verify_done(ctx).await {
                self.behavior.post_step(ctx).await;
                self.transition(StepState::Done);
            } else {
                self.transition(StepState::Error);
            }
            return StepPollOutcome::LeftPending;
        }

        StepPollOutcome::Unchanged
    }

    /// Reset a failed/timed-out/pending step back to `New`, clearing its
    /// task id and last result. Returns the task id it was indexed under,
    /// if any, so the caller can drop the matching index entry.
    pub(crate) fn reset(&mut self) -> Option<Uuid> {
        let previous_task_id = self.task_id.take();
        self.created_at = None;
        self.last_result = None;
        self.transition(StepState::New);
        previous_task_id
    }
}
