// SPDX-License-Identifier: MIT

//! dispatchd: a small poll-driven connection dispatch daemon.
//!
//! The crate is built from four pieces: a bounded worker pool draining a
//! FIFO job queue ([`job_pool`]), a poll(2)-based readiness multiplexer
//! ([`poller`]), a priority-ordered teardown registry ([`cleanup`]), and
//! the bootstrap glue that wires them to a listening socket ([`server`]).

pub mod cleanup;
pub mod job_pool;
pub mod poller;
pub mod server;
