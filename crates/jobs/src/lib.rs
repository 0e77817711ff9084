#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! A worker pool built around cooperative scheduling rather than a plain
//! thread pool: a [`Job`] can spawn children of itself, and anyone waiting
//! on a job — including a job body waiting on its own children — becomes a
//! helper that pulls and runs other queued jobs instead of blocking idle.
//!
//! Each worker owns a [`tapecore_ring::RingQueue`]; a worker drains its own
//! queue first and steals from a random peer when empty, so the pool scales
//! without a shared lock on the hot path.

mod api;
mod manager;
mod worker;

pub use api::{Job, JobBody, JobContext, JobError, JobManagerConfig};
pub use manager::JobManager;
