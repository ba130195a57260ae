// SPDX-License-Identifier: MIT

//! SIGINT/SIGTERM handling, routed through a signalfd watched by the
//! poller instead of an async-signal-unsafe handler. Receipt of either
//! signal trips the poller's stop handle; the loop then winds down at its
//! next iteration boundary.

use anyhow::{Context, Result};
use log::{info, warn};
use nix::sys::signal::{SigSet, Signal};
use nix::sys::signalfd::{SfdFlags, SignalFd};
use std::os::fd::AsRawFd;
use std::sync::{Arc, Mutex};

use crate::poller::{PollFlags, Poller, WatchCallback};

pub struct ShutdownSignals {
    // Kept alive so the descriptor registered with the poller stays open.
    _fd: Arc<Mutex<SignalFd>>,
}

impl ShutdownSignals {
    /// Blocks SIGINT and SIGTERM for the calling thread (threads spawned
    /// afterwards inherit the mask) and registers a signalfd with the
    /// poller. Must run before the worker pool spawns, or a signal may be
    /// delivered to an unmasked worker and kill the process.
    pub fn install(poller: &Poller) -> Result<Self> {
        let mut mask = SigSet::empty();
        mask.add(Signal::SIGINT);
        mask.add(Signal::SIGTERM);
        mask.thread_block().context("blocking the shutdown signals")?;

        let sfd = SignalFd::with_flags(&mask, SfdFlags::SFD_NONBLOCK | SfdFlags::SFD_CLOEXEC)
            .context("creating the signalfd")?;
        let raw_fd = sfd.as_raw_fd();
        let sfd = Arc::new(Mutex::new(sfd));

        let stop = poller.stop_handle();
        let callback: Arc<WatchCallback> = {
            let sfd = Arc::clone(&sfd);
            Arc::new(move |_fd, _revents| {
                let mut sfd = sfd.lock().unwrap();
                match sfd.read_signal() {
                    Ok(Some(siginfo)) => {
                        info!(
                            "received signal {}, stopping the event loop",
                            siginfo.ssi_signo
                        );
                        stop.stop();
                    }
                    // Spurious wakeup on the nonblocking descriptor.
                    Ok(None) => {}
                    Err(e) => warn!("signalfd read failed: {e}"),
                }
            })
        };
        poller
            .add(raw_fd, PollFlags::POLLIN, callback)
            .context("watching the signalfd")?;

        Ok(Self { _fd: sfd })
    }
}
