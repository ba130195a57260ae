// SPDX-License-Identifier: MIT

//! # Design: Bounded Worker Pool
//!
//! ## Overview
//! A fixed set of worker threads draining a bounded FIFO of jobs.
//!
//! - `submit` appends under the pool lock and wakes exactly one worker.
//! - Workers park on a condvar while the queue is empty; they never spin.
//! - `shutdown` flips the lifecycle to `Stopping`, wakes every worker and
//!   joins them all. Workers drain the queue fully before exiting, so no
//!   accepted job is lost across a shutdown.
//! - Job bodies run outside the lock; a long job stalls neither submission
//!   nor the other workers' dequeues.
//!
//! ```text
//!         +---------+   submit    +--------------------+
//!         | callers | ----------> |  bounded job queue |
//!         +---------+             +---+------+------+--+
//!                                     |      |      |
//!                                 +---v--+ +-v----+ v
//!                                 |  w0  | |  w1  | ... wN
//!                                 +------+ +------+
//! ```
//!
//! ## Failure semantics
//! The pool does not supervise job bodies. A job that panics unwinds its
//! worker thread; that worker is gone for the life of the pool, and the
//! panic surfaces as a logged join failure during `shutdown`.

pub mod closure_job;
pub mod job;
pub mod queue;

pub use closure_job::ClosureJob;
pub use job::{Job, JobPool, PoolError};
