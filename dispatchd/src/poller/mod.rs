// SPDX-License-Identifier: MIT

//! Poll-based readiness multiplexer.
//!
//! A locked table of watched descriptors and a cooperative event loop:
//! `process_events` snapshots the table, blocks in poll(2) and invokes the
//! callback of every ready descriptor from the snapshot. Callbacks only
//! ever run on the thread driving the loop, so they may touch multiplexer
//! state freely. The price is that a callback that blocks stalls all
//! other readiness notification.
//!
//! `add`/`modify`/`remove` may be called from other threads (typically
//! pool workers re-arming a descriptor) concurrently with the blocking
//! wait; a watch registered during the wait is simply not polled until the
//! next iteration, and a watch removed during the wait may fire once more
//! from the in-flight snapshot.

use log::{debug, error, info, warn};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollTimeout};
use std::os::fd::{BorrowedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;

pub use nix::poll::PollFlags;

/// Callback invoked with the descriptor and its observed readiness.
/// Captured state stands in for a user-data pointer.
pub type WatchCallback = dyn Fn(RawFd, PollFlags) + Send + Sync;

/// Errors returned by [`Poller`] operations.
#[derive(Error, Debug)]
pub enum PollerError {
    #[error("descriptor {fd} is not a valid descriptor")]
    InvalidFd { fd: RawFd },
    #[error("descriptor {fd} is already registered")]
    AlreadyRegistered { fd: RawFd },
    #[error("watch table is full (capacity {capacity})")]
    TableFull { capacity: usize },
    #[error("descriptor {fd} is not registered")]
    NotFound { fd: RawFd },
    #[error("poll failed: {0}")]
    Wait(#[source] Errno),
}

struct Watch {
    fd: RawFd,
    interest: PollFlags,
    callback: Arc<WatchCallback>,
}

/// Clonable handle that stops a [`Poller`] loop from a callback or another
/// thread without holding the poller itself.
#[derive(Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Bounded table of watched descriptors plus the cooperative event loop.
pub struct Poller {
    watches: Mutex<Vec<Watch>>,
    running: Arc<AtomicBool>,
    capacity: usize,
}

impl Poller {
    pub fn new(capacity: usize) -> Self {
        Self {
            watches: Mutex::new(Vec::new()),
            running: Arc::new(AtomicBool::new(false)),
            capacity,
        }
    }

    /// Registers a descriptor. Rejected when the descriptor is negative,
    /// already registered, or the table is at capacity; the table is
    /// unchanged on rejection.
    pub fn add(
        &self,
        fd: RawFd,
        interest: PollFlags,
        callback: Arc<WatchCallback>,
    ) -> Result<(), PollerError> {
        if fd < 0 {
            return Err(PollerError::InvalidFd { fd });
        }

        let mut watches = self.watches.lock().unwrap();
        if watches.iter().any(|w| w.fd == fd) {
            warn!("fd {fd} is already being watched");
            return Err(PollerError::AlreadyRegistered { fd });
        }
        if watches.len() >= self.capacity {
            error!("watch table full, rejecting fd {fd}");
            return Err(PollerError::TableFull {
                capacity: self.capacity,
            });
        }

        watches.push(Watch {
            fd,
            interest,
            callback,
        });
        debug!("added fd {fd} to the watch table");
        Ok(())
    }

    /// Replaces the interest mask of a registered descriptor.
    pub fn modify(&self, fd: RawFd, interest: PollFlags) -> Result<(), PollerError> {
        let mut watches = self.watches.lock().unwrap();
        let watch = watches
            .iter_mut()
            .find(|w| w.fd == fd)
            .ok_or(PollerError::NotFound { fd })?;
        watch.interest = interest;
        debug!("modified interest for fd {fd}");
        Ok(())
    }

    pub fn remove(&self, fd: RawFd) -> Result<(), PollerError> {
        let mut watches = self.watches.lock().unwrap();
        let idx = watches
            .iter()
            .position(|w| w.fd == fd)
            .ok_or(PollerError::NotFound { fd })?;
        watches.remove(idx);
        debug!("removed fd {fd} from the watch table");
        Ok(())
    }

    pub fn watch_count(&self) -> usize {
        self.watches.lock().unwrap().len()
    }

    /// One iteration of the loop: snapshot the table, wait up to
    /// `timeout_ms` (negative blocks indefinitely) and dispatch ready
    /// callbacks. Returns the number of callbacks invoked. An interrupted
    /// wait counts as zero events; an empty table returns zero without
    /// waiting.
    pub fn process_events(&self, timeout_ms: i32) -> Result<usize, PollerError> {
        // Snapshot under the lock, wait without it: callbacks and other
        // threads may mutate the table while poll(2) blocks.
        let snapshot: Vec<(RawFd, PollFlags, Arc<WatchCallback>)> = {
            let watches = self.watches.lock().unwrap();
            watches
                .iter()
                .map(|w| (w.fd, w.interest, Arc::clone(&w.callback)))
                .collect()
        };
        if snapshot.is_empty() {
            return Ok(0);
        }

        let timeout = if timeout_ms < 0 {
            PollTimeout::NONE
        } else {
            PollTimeout::try_from(timeout_ms).unwrap_or(PollTimeout::MAX)
        };

        // SAFETY: each fd was registered by its owner, who keeps it open
        // for as long as it is watched; the borrow lasts only for this call.
        let mut poll_fds: Vec<PollFd> = snapshot
            .iter()
            .map(|(fd, interest, _)| {
                PollFd::new(unsafe { BorrowedFd::borrow_raw(*fd) }, *interest)
            })
            .collect();

        let ready = match poll(&mut poll_fds, timeout) {
            Ok(n) => n,
            // Interrupted by a signal, not an error.
            Err(Errno::EINTR) => return Ok(0),
            Err(e) => {
                error!("poll failed: {e}");
                return Err(PollerError::Wait(e));
            }
        };
        if ready == 0 {
            return Ok(0);
        }

        let mut dispatched = 0;
        for (poll_fd, (fd, _, callback)) in poll_fds.iter().zip(snapshot.iter()) {
            let revents = poll_fd.revents().unwrap_or(PollFlags::empty());
            if revents.is_empty() {
                continue;
            }
            (callback.as_ref())(*fd, revents);
            dispatched += 1;
        }
        Ok(dispatched)
    }

    /// Runs `process_events` until [`Poller::stop`] is observed. A wait
    /// failure clears the running flag and propagates.
    pub fn run(&self, timeout_ms: i32) -> Result<(), PollerError> {
        self.running.store(true, Ordering::SeqCst);
        info!("event loop starting");
        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = self.process_events(timeout_ms) {
                error!("event loop stopping on error: {e}");
                self.running.store(false, Ordering::SeqCst);
                return Err(e);
            }
        }
        info!("event loop stopped");
        Ok(())
    }

    /// Cooperative: takes effect once the current `process_events` returns.
    pub fn stop(&self) {
        info!("event loop stop requested");
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: Arc::clone(&self.running),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops the loop and clears the watch table. Idempotent.
    pub fn close(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.watches.lock().unwrap().clear();
        info!("poller closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;
    use std::sync::atomic::AtomicUsize;

    fn counting_callback() -> (Arc<AtomicUsize>, Arc<WatchCallback>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let cb_hits = Arc::clone(&hits);
        let cb: Arc<WatchCallback> = Arc::new(move |_, _| {
            cb_hits.fetch_add(1, Ordering::SeqCst);
        });
        (hits, cb)
    }

    #[test]
    fn test_ready_descriptor_dispatches_its_callback() {
        let poller = Poller::new(4);
        let (reader, mut writer) = UnixStream::pair().unwrap();
        let (hits, cb) = counting_callback();

        poller.add(reader.as_raw_fd(), PollFlags::POLLIN, cb).unwrap();
        writer.write_all(b"x").unwrap();

        assert_eq!(poller.process_events(100).unwrap(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_duplicate_registration_is_rejected_and_leaves_table_unchanged() {
        let poller = Poller::new(4);
        let (reader, mut writer) = UnixStream::pair().unwrap();
        let (hits, cb) = counting_callback();

        poller.add(reader.as_raw_fd(), PollFlags::POLLIN, cb).unwrap();

        let second: Arc<WatchCallback> = Arc::new(|_, _| {
            panic!("a rejected registration must never be installed");
        });
        let result = poller.add(reader.as_raw_fd(), PollFlags::POLLIN, second);
        assert!(matches!(result, Err(PollerError::AlreadyRegistered { .. })));
        assert_eq!(poller.watch_count(), 1);

        // The first registration still dispatches.
        writer.write_all(b"x").unwrap();
        assert_eq!(poller.process_events(100).unwrap(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_negative_descriptor_is_rejected() {
        let poller = Poller::new(4);
        let cb: Arc<WatchCallback> = Arc::new(|_, _| {});
        assert!(matches!(
            poller.add(-1, PollFlags::POLLIN, cb),
            Err(PollerError::InvalidFd { fd: -1 })
        ));
    }

    #[test]
    fn test_full_table_rejects_registration() {
        let poller = Poller::new(1);
        let (a, _a_peer) = UnixStream::pair().unwrap();
        let (b, _b_peer) = UnixStream::pair().unwrap();

        poller
            .add(a.as_raw_fd(), PollFlags::POLLIN, Arc::new(|_, _| {}))
            .unwrap();
        let result = poller.add(b.as_raw_fd(), PollFlags::POLLIN, Arc::new(|_, _| {}));
        assert!(matches!(result, Err(PollerError::TableFull { capacity: 1 })));
    }

    #[test]
    fn test_modify_and_remove_require_a_registered_descriptor() {
        let poller = Poller::new(4);
        assert!(matches!(
            poller.modify(42, PollFlags::POLLOUT),
            Err(PollerError::NotFound { fd: 42 })
        ));
        assert!(matches!(
            poller.remove(42),
            Err(PollerError::NotFound { fd: 42 })
        ));
    }

    #[test]
    fn test_remove_then_readd_succeeds() {
        let poller = Poller::new(4);
        let (reader, _writer) = UnixStream::pair().unwrap();
        let fd = reader.as_raw_fd();

        poller.add(fd, PollFlags::POLLIN, Arc::new(|_, _| {})).unwrap();
        poller.remove(fd).unwrap();
        poller.add(fd, PollFlags::POLLIN, Arc::new(|_, _| {})).unwrap();
        assert_eq!(poller.watch_count(), 1);
    }

    #[test]
    fn test_quiet_descriptor_times_out_with_zero_events() {
        let poller = Poller::new(4);
        let (reader, _writer) = UnixStream::pair().unwrap();
        let (hits, cb) = counting_callback();

        poller.add(reader.as_raw_fd(), PollFlags::POLLIN, cb).unwrap();
        assert_eq!(poller.process_events(0).unwrap(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_table_returns_zero_without_waiting() {
        let poller = Poller::new(4);
        assert_eq!(poller.process_events(-1).unwrap(), 0);
    }

    #[test]
    fn test_close_clears_the_table_and_is_idempotent() {
        let poller = Poller::new(4);
        let (reader, _writer) = UnixStream::pair().unwrap();
        poller
            .add(reader.as_raw_fd(), PollFlags::POLLIN, Arc::new(|_, _| {}))
            .unwrap();

        poller.close();
        assert_eq!(poller.watch_count(), 0);
        assert!(!poller.is_running());
        poller.close();
    }
}
