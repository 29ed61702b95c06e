//! Stop/resume sync policy
//!
//! Users can pause synchronization for a subtree ("stop") and carve
//! exceptions back out of a paused subtree ("resume"). A path is paused when
//! it or an ancestor is stopped and neither it nor an ancestor is resumed.

use serde::{Deserialize, Serialize};

use super::newtypes::SyncPath;

/// Two ordered sets of local paths controlling which subtrees are paused
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopSyncPolicy {
    #[serde(rename = "stopSyncPaths")]
    stopped: Vec<SyncPath>,
    #[serde(rename = "resumeSyncPaths")]
    resumed: Vec<SyncPath>,
}

impl StopSyncPolicy {
    pub fn new(stopped: Vec<SyncPath>, resumed: Vec<SyncPath>) -> Self {
        let mut policy = Self::default();
        for path in stopped {
            policy.push_unique_stopped(path);
        }
        for path in resumed {
            policy.push_unique_resumed(path);
        }
        policy
    }

    pub fn stopped(&self) -> &[SyncPath] {
        &self.stopped
    }

    pub fn resumed(&self) -> &[SyncPath] {
        &self.resumed
    }

    pub fn is_empty(&self) -> bool {
        self.stopped.is_empty() && self.resumed.is_empty()
    }

    /// Returns true if synchronization is paused for `path`
    pub fn is_paused(&self, path: &SyncPath) -> bool {
        let stopped = self.stopped.iter().any(|s| path.is_within(s));
        stopped && !self.resumed.iter().any(|r| path.is_within(r))
    }

    /// Returns true if some resumed path lies strictly below `path`
    ///
    /// A paused directory with such a descendant must still be walked.
    pub fn has_resumed_below(&self, path: &SyncPath) -> bool {
        self.resumed.iter().any(|r| r != path && r.is_within(path))
    }

    /// Stops syncing `path`, dropping a resume entry for the same path
    pub fn stop(&mut self, path: SyncPath) {
        self.resumed.retain(|p| p != &path);
        self.push_unique_stopped(path);
    }

    /// Resumes syncing `path`, dropping a stop entry for the same path
    pub fn resume(&mut self, path: SyncPath) {
        self.stopped.retain(|p| p != &path);
        self.push_unique_resumed(path);
    }

    /// Removes every entry equal to `root` or nested under it
    ///
    /// Returns true if anything was removed.
    pub fn prune_subtree(&mut self, root: &SyncPath) -> bool {
        let before = self.stopped.len() + self.resumed.len();
        self.stopped.retain(|p| !p.is_within(root));
        self.resumed.retain(|p| !p.is_within(root));
        before != self.stopped.len() + self.resumed.len()
    }

    fn push_unique_stopped(&mut self, path: SyncPath) {
        if !self.stopped.contains(&path) {
            self.stopped.push(path);
        }
    }

    fn push_unique_resumed(&mut self, path: SyncPath) {
        if !self.resumed.contains(&path) {
            self.resumed.push(path);
        }
    }
}
