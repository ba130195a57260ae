// SPDX-License-Identifier: MIT

//! Bootstrap: wires the worker pool, the poller and the teardown registry
//! to a listening socket.
//!
//! The pool and the poller never reference each other; the only bridge is
//! the accept callback, which turns each accepted connection into a job.
//! Every subsystem registers its own teardown with the registry; the
//! priorities encode reverse dependency order, so the poller stops first,
//! then the pool drains, then the listening socket closes, and the log
//! flush runs last.

pub mod connection;
pub mod signals;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::os::fd::AsRawFd;
use std::sync::Arc;

use crate::cleanup::CleanupRegistry;
use crate::job_pool::JobPool;
use crate::poller::{PollFlags, Poller, StopHandle, WatchCallback};
use crate::server::connection::ConnectionJob;

// Cleanup priorities; higher numbers execute first.
const CLEANUP_PRIORITY_POLLER: i32 = 100;
const CLEANUP_PRIORITY_POOL: i32 = 90;
const CLEANUP_PRIORITY_LISTENER: i32 = 80;
const CLEANUP_PRIORITY_LOGGING: i32 = 10;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    pub workers: usize,
    pub queue_capacity: usize,
    pub max_watches: usize,
    pub cleanup_capacity: usize,
    pub poll_timeout_ms: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".into(),
            port: 8080,
            workers: 4,
            queue_capacity: 100,
            max_watches: 64,
            cleanup_capacity: 32,
            poll_timeout_ms: 1000,
        }
    }
}

/// One fully wired server instance. Construct with [`Server::bootstrap`],
/// drive with [`Server::run`], tear down with [`Server::shutdown`].
pub struct Server {
    config: ServerConfig,
    local_addr: SocketAddr,
    pool: Arc<JobPool>,
    poller: Arc<Poller>,
    cleanup: Arc<CleanupRegistry>,
    // Keeps the signalfd open while the poller watches it.
    _signals: signals::ShutdownSignals,
}

impl Server {
    /// Creates and wires every subsystem in initialization order. On
    /// failure, whatever teardown actions were already registered are
    /// executed before the error is returned.
    pub fn bootstrap(config: ServerConfig) -> Result<Self> {
        let cleanup = Arc::new(CleanupRegistry::new(config.cleanup_capacity));

        match Self::bootstrap_inner(config, &cleanup) {
            Ok(server) => Ok(server),
            Err(e) => {
                cleanup.execute();
                Err(e)
            }
        }
    }

    fn bootstrap_inner(config: ServerConfig, cleanup: &Arc<CleanupRegistry>) -> Result<Self> {
        cleanup
            .register_status("log flush", CLEANUP_PRIORITY_LOGGING, || {
                log::logger().flush();
                0
            })
            .context("registering log flush teardown")?;

        let poller = Arc::new(Poller::new(config.max_watches));

        // The signal mask must be in place before any thread is spawned,
        // so the signalfd wiring comes before the pool.
        let signals =
            signals::ShutdownSignals::install(&poller).context("installing shutdown signals")?;

        let pool = Arc::new(
            JobPool::new(config.workers, config.queue_capacity)
                .context("creating the worker pool")?,
        );
        {
            let pool = Arc::clone(&pool);
            cleanup
                .register_check("worker pool", CLEANUP_PRIORITY_POOL, move || {
                    pool.shutdown();
                    !pool.is_running()
                })
                .context("registering worker pool teardown")?;
        }

        let listener = TcpListener::bind((config.bind_addr.as_str(), config.port))
            .with_context(|| format!("binding {}:{}", config.bind_addr, config.port))?;
        listener
            .set_nonblocking(true)
            .context("setting the listener nonblocking")?;
        let local_addr = listener.local_addr().context("reading the bound address")?;
        let listener = Arc::new(listener);
        {
            let listener = Arc::clone(&listener);
            cleanup
                .register_routine("listening socket", CLEANUP_PRIORITY_LISTENER, move || {
                    // The poller teardown already dropped the accept
                    // callback's reference; this drop closes the socket.
                    info!("closing listening socket");
                    drop(listener);
                })
                .context("registering listening socket teardown")?;
        }

        {
            let poller = Arc::clone(&poller);
            cleanup
                .register_routine("poller", CLEANUP_PRIORITY_POLLER, move || {
                    poller.close();
                })
                .context("registering poller teardown")?;
        }

        let accept_cb: Arc<WatchCallback> = {
            let listener = Arc::clone(&listener);
            let pool = Arc::clone(&pool);
            Arc::new(move |_fd, revents| {
                if revents.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
                    warn!("listening socket reported {revents:?}");
                    return;
                }
                accept_ready(&listener, &pool);
            })
        };
        poller
            .add(listener.as_raw_fd(), PollFlags::POLLIN, accept_cb)
            .context("watching the listening socket")?;

        info!("listening on {local_addr}");
        Ok(Self {
            config,
            local_addr,
            pool,
            poller,
            cleanup: Arc::clone(cleanup),
            _signals: signals,
        })
    }

    /// Runs the event loop on the calling thread until a shutdown signal
    /// arrives or [`Server::stop_handle`] is tripped.
    pub fn run(&self) -> Result<()> {
        self.poller
            .run(self.config.poll_timeout_ms)
            .context("event loop failed")
    }

    /// Executes the teardown registry. Call once, after `run` returns.
    pub fn shutdown(&self) {
        info!("server shutting down");
        self.cleanup.execute();
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.poller.stop_handle()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn pool(&self) -> &JobPool {
        &self.pool
    }
}

/// Drains the accept backlog, one job per connection. Accept failures are
/// transient here; the loop stays alive.
fn accept_ready(listener: &TcpListener, pool: &JobPool) {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                debug!("accepted connection from {peer}");
                let job = ConnectionJob::new(stream, peer);
                if let Err(e) = pool.submit(Box::new(job)) {
                    // The stream closes with the dropped job.
                    warn!("dropping connection from {peer}: {e}");
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("accept failed: {e}");
                break;
            }
        }
    }
}
