//! Scope guard that owns every deferred release action of a single
//! pipeline invocation.
//!
//! Actions run in registration order when [`CleanupTracker::conclude`] is
//! called. A tracker that is dropped without concluding (early return,
//! panic, a cancelled future) runs its pending actions from `Drop`, so a
//! registered release is never lost.

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::error::{DistCheckError, Result};

type ReleaseAction = Box<dyn FnOnce() + Send>;

/// Append-only registry of release actions plus a "concluded" flag.
///
/// Not reentrant and not shared: exactly one pipeline invocation owns one
/// tracker.
#[derive(Default)]
pub struct CleanupTracker {
    pending: Vec<ReleaseAction>,
    concluded: bool,
}

impl CleanupTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a release action. Once the tracker has concluded the action
    /// runs immediately instead.
    pub fn register<F>(&mut self, action: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.concluded {
            debug!("cleanup already concluded, running late action now");
            action();
            return;
        }
        self.pending.push(Box::new(action));
    }

    /// Queue recursive removal of `path`. Failures are logged, not raised.
    pub fn register_dir_removal(&mut self, path: PathBuf) {
        self.register(move || match std::fs::remove_dir_all(&path) {
            Ok(()) => debug!(path = %path.display(), "removed working directory"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %path.display(), "failed to remove working directory: {err}"),
        });
    }

    /// Number of actions waiting for [`conclude`](Self::conclude).
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Run every queued action once, in registration order.
    ///
    /// Calling this twice is a programming error and returns
    /// [`DistCheckError::CleanupConcluded`].
    pub fn conclude(&mut self) -> Result<()> {
        if self.concluded {
            return Err(DistCheckError::CleanupConcluded);
        }
        self.concluded = true;
        self.run_pending();
        Ok(())
    }

    fn run_pending(&mut self) {
        let actions = std::mem::take(&mut self.pending);
        debug!(count = actions.len(), "running cleanup actions");
        for action in actions {
            action();
        }
    }
}

impl Drop for CleanupTracker {
    fn drop(&mut self) {
        if !self.concluded {
            self.concluded = true;
            self.run_pending();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn recorder() -> (Arc<Mutex<Vec<u32>>>, impl Fn(u32) -> Box<dyn FnOnce() + Send>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let handle = log.clone();
        let make = move |id: u32| {
            let log = handle.clone();
            Box::new(move || log.lock().unwrap().push(id)) as Box<dyn FnOnce() + Send>
        };
        (log, make)
    }

    #[test]
    fn conclude_runs_actions_in_registration_order_once() {
        let (log, make) = recorder();
        let mut tracker = CleanupTracker::new();
        tracker.register(make(1));
        tracker.register(make(2));
        tracker.register(make(3));
        assert_eq!(tracker.pending(), 3);

        tracker.conclude().expect("first conclude succeeds");
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(tracker.pending(), 0);

        drop(tracker);
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn late_registration_runs_immediately() {
        let (log, make) = recorder();
        let mut tracker = CleanupTracker::new();
        tracker.conclude().unwrap();

        tracker.register(make(7));
        assert_eq!(*log.lock().unwrap(), vec![7]);
        assert_eq!(tracker.pending(), 0);
    }

    #[test]
    fn second_conclude_fails_loudly() {
        let mut tracker = CleanupTracker::new();
        tracker.conclude().unwrap();
        assert!(matches!(
            tracker.conclude(),
            Err(DistCheckError::CleanupConcluded)
        ));
    }

    #[test]
    fn drop_without_conclude_still_releases() {
        let (log, make) = recorder();
        {
            let mut tracker = CleanupTracker::new();
            tracker.register(make(1));
            tracker.register(make(2));
        }
        assert_eq!(*log.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn dir_removal_deletes_tree() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("work");
        std::fs::create_dir_all(root.join("nested")).unwrap();
        std::fs::write(root.join("nested/resource"), b"partial").unwrap();

        let mut tracker = CleanupTracker::new();
        tracker.register_dir_removal(root.clone());
        assert!(root.exists());
        tracker.conclude().unwrap();
        assert!(!root.exists());
    }
}
