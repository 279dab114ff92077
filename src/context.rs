//! `GitContext` (C3): the process-wide state shared by every action during
//! a run (spec.md §3 "GitContext").

use std::collections::HashMap;
use std::path::PathBuf;

use crate::action::Action;
use crate::dest_git::CommitEnv;
use crate::graph::CommitGraph;
use crate::patch_cache::PatchCache;
use crate::transcript::TranscriptLog;

/// Shared, mutable state threaded through every action's execution.
/// Actions refer to commits by SHA and look them up here; the context
/// exclusively owns the commit graph and the action queue.
pub struct GitContext {
    pub graph: CommitGraph,
    pub dst_path: PathBuf,
    pub src_repo_path: String,
    pub git_command: String,
    pub git_version: (u32, u32),

    pub cache_path: Option<PathBuf>,
    pub cache: PatchCache,
    pub from_cache: bool,

    pub actions: Vec<Action>,
    pub extra_actions: Vec<Action>,
    pub current_action: i64,
    pub interrupted: bool,
    pub doing: bool,

    pub commit_env: CommitEnv,

    pub out_log: Option<TranscriptLog>,
    pub err_log: Option<TranscriptLog>,
}

impl GitContext {
    pub fn new(
        graph: CommitGraph,
        dst_path: PathBuf,
        src_repo_path: String,
        git_command: String,
        git_version: (u32, u32),
    ) -> Self {
        Self {
            graph,
            dst_path,
            src_repo_path,
            git_command,
            git_version,
            cache_path: None,
            cache: PatchCache::default(),
            from_cache: false,
            actions: Vec::new(),
            extra_actions: Vec::new(),
            current_action: -1,
            interrupted: false,
            doing: false,
            commit_env: CommitEnv::none(),
            out_log: None,
            err_log: None,
        }
    }

    /// Queue an action, respecting the `doing` re-entrance guard: an action
    /// handler running mid-step appends to `extra_actions` instead of the
    /// main queue (spec.md §5 "Dynamic insertion").
    pub fn enqueue(&mut self, action: Action) {
        if self.doing {
            self.extra_actions.push(action);
        } else {
            self.actions.push(action);
        }
    }

    /// Cooperative cancellation: a handler calls this to ask the executor
    /// to stop after the current action completes (spec.md §4.3).
    pub fn interrupt(&mut self) {
        self.interrupted = true;
    }

    pub fn cloned_sha_of(&self, sha: &str) -> Option<String> {
        self.graph.get(sha).and_then(|c| c.cloned_sha.clone())
    }

    /// Snapshot of `sha -> cloned_sha` for every commit the executor has
    /// finished, used by state persistence (`origin2cloned`, spec.md §6).
    pub fn origin2cloned(&self) -> HashMap<String, String> {
        self.graph
            .all_indices()
            .filter_map(|i| {
                let node = self.graph.node(i);
                node.cloned_sha.clone().map(|cloned| (node.sha.clone(), cloned))
            })
            .collect()
    }

    /// Repopulate `cloned_sha` for every descriptor named in a persisted
    /// snapshot (spec.md §6 "`restore_cloned` repopulates ... before
    /// resuming").
    pub fn restore_cloned(&mut self, snapshot: &HashMap<String, String>) {
        for (sha, cloned) in snapshot {
            if let Some(idx) = self.graph.index_of(sha) {
                self.graph.node_mut(idx).cloned_sha = Some(cloned.clone());
            }
        }
    }
}
