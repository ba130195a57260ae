// SPDX-License-Identifier: MIT

//! Priority-ordered teardown registry.
//!
//! Subsystems register a named teardown action with a numeric priority at
//! their own initialization time; at shutdown the registry runs every
//! action once, highest priority first, ties in registration order. A
//! failing action is logged and the rest still run; teardown is
//! best-effort.

use log::{error, info, warn};
use std::sync::Mutex;
use thiserror::Error;

/// The three teardown call shapes, each carrying its own state.
pub enum CleanupAction {
    /// Predicate teardown; returning `false` is a failure.
    Check(Box<dyn FnOnce() -> bool + Send>),
    /// Plain procedure; cannot report failure.
    Routine(Box<dyn FnOnce() + Send>),
    /// Status-returning teardown; nonzero is a failure.
    Status(Box<dyn FnOnce() -> i32 + Send>),
}

impl CleanupAction {
    fn shape(&self) -> &'static str {
        match self {
            CleanupAction::Check(_) => "check",
            CleanupAction::Routine(_) => "routine",
            CleanupAction::Status(_) => "status",
        }
    }
}

struct CleanupEntry {
    name: String,
    priority: i32,
    action: CleanupAction,
}

/// Errors returned by [`CleanupRegistry::register`].
#[derive(Error, Debug)]
pub enum CleanupError {
    #[error("cleanup registry is full (capacity {capacity})")]
    Full { capacity: usize },
    #[error("cleanup has already begun; registration rejected")]
    AlreadyExecuted,
}

struct Inner {
    entries: Vec<CleanupEntry>,
    executed: bool,
}

/// Bounded, append-only list of teardown actions, consumed exactly once.
pub struct CleanupRegistry {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl CleanupRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: Vec::new(),
                executed: false,
            }),
            capacity,
        }
    }

    /// Appends an entry. Higher priorities execute first.
    pub fn register(
        &self,
        name: impl Into<String>,
        priority: i32,
        action: CleanupAction,
    ) -> Result<(), CleanupError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.executed {
            return Err(CleanupError::AlreadyExecuted);
        }
        if inner.entries.len() >= self.capacity {
            return Err(CleanupError::Full {
                capacity: self.capacity,
            });
        }
        inner.entries.push(CleanupEntry {
            name: name.into(),
            priority,
            action,
        });
        Ok(())
    }

    pub fn register_check(
        &self,
        name: impl Into<String>,
        priority: i32,
        f: impl FnOnce() -> bool + Send + 'static,
    ) -> Result<(), CleanupError> {
        self.register(name, priority, CleanupAction::Check(Box::new(f)))
    }

    pub fn register_routine(
        &self,
        name: impl Into<String>,
        priority: i32,
        f: impl FnOnce() + Send + 'static,
    ) -> Result<(), CleanupError> {
        self.register(name, priority, CleanupAction::Routine(Box::new(f)))
    }

    pub fn register_status(
        &self,
        name: impl Into<String>,
        priority: i32,
        f: impl FnOnce() -> i32 + Send + 'static,
    ) -> Result<(), CleanupError> {
        self.register(name, priority, CleanupAction::Status(Box::new(f)))
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs every registered action in descending priority order, ties in
    /// registration order. Consumes the entries; a second call is a logged
    /// no-op. Failures are logged and do not stop the remaining entries.
    pub fn execute(&self) {
        let mut entries = {
            let mut inner = self.inner.lock().unwrap();
            if inner.executed {
                warn!("cleanup already executed; ignoring repeat call");
                return;
            }
            inner.executed = true;
            std::mem::take(&mut inner.entries)
        };

        // Stable sort keeps registration order among equal priorities.
        entries.sort_by_key(|entry| std::cmp::Reverse(entry.priority));

        for entry in entries {
            info!(
                "running {} cleanup '{}' (priority {})",
                entry.action.shape(),
                entry.name,
                entry.priority
            );
            let ok = match entry.action {
                CleanupAction::Check(f) => f(),
                CleanupAction::Routine(f) => {
                    f();
                    true
                }
                CleanupAction::Status(f) => f() == 0,
            };
            if !ok {
                error!("cleanup '{}' failed", entry.name);
            }
        }
        info!("cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recorder() -> Arc<Mutex<Vec<String>>> {
        Arc::new(Mutex::new(Vec::new()))
    }

    fn record(trail: &Arc<Mutex<Vec<String>>>, tag: &str) -> impl FnOnce() + Send + 'static {
        let trail = Arc::clone(trail);
        let tag = tag.to_string();
        move || trail.lock().unwrap().push(tag)
    }

    #[test]
    fn test_entries_execute_in_descending_priority_order() {
        let registry = CleanupRegistry::new(8);
        let trail = recorder();

        registry.register_routine("ten", 10, record(&trail, "10")).unwrap();
        registry.register_routine("ninety", 90, record(&trail, "90")).unwrap();
        registry.register_routine("fifty", 50, record(&trail, "50")).unwrap();

        registry.execute();
        assert_eq!(*trail.lock().unwrap(), vec!["90", "50", "10"]);
    }

    #[test]
    fn test_equal_priorities_keep_registration_order() {
        let registry = CleanupRegistry::new(8);
        let trail = recorder();

        registry.register_routine("a", 50, record(&trail, "a")).unwrap();
        registry.register_routine("b", 50, record(&trail, "b")).unwrap();
        registry.register_routine("c", 50, record(&trail, "c")).unwrap();

        registry.execute();
        assert_eq!(*trail.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_all_three_shapes_run_and_failures_do_not_stop_the_rest() {
        let registry = CleanupRegistry::new(8);
        let trail = recorder();

        let t = Arc::clone(&trail);
        registry
            .register_check("failing check", 30, move || {
                t.lock().unwrap().push("check".into());
                false
            })
            .unwrap();
        let t = Arc::clone(&trail);
        registry
            .register_status("failing status", 20, move || {
                t.lock().unwrap().push("status".into());
                -1
            })
            .unwrap();
        registry
            .register_routine("routine", 10, record(&trail, "routine"))
            .unwrap();

        registry.execute();
        assert_eq!(*trail.lock().unwrap(), vec!["check", "status", "routine"]);
    }

    #[test]
    fn test_registration_after_execute_is_rejected() {
        let registry = CleanupRegistry::new(8);
        registry.register_routine("only", 1, || {}).unwrap();
        registry.execute();

        let late = registry.register_routine("late", 99, || {
            panic!("an entry registered after execute must never run");
        });
        assert!(matches!(late, Err(CleanupError::AlreadyExecuted)));
    }

    #[test]
    fn test_execute_twice_runs_entries_once() {
        let registry = CleanupRegistry::new(8);
        let trail = recorder();
        registry.register_routine("once", 1, record(&trail, "once")).unwrap();

        registry.execute();
        registry.execute();
        assert_eq!(*trail.lock().unwrap(), vec!["once"]);
    }

    #[test]
    fn test_full_registry_rejects_registration() {
        let registry = CleanupRegistry::new(2);
        registry.register_routine("a", 1, || {}).unwrap();
        registry.register_routine("b", 2, || {}).unwrap();
        assert!(matches!(
            registry.register_routine("c", 3, || {}),
            Err(CleanupError::Full { capacity: 2 })
        ));
        assert_eq!(registry.len(), 2);
    }
}
