//! The executor (C5): walks `ctx.actions` from `ctx.current_action`
//! onward, running each through `Action::execute` and persisting state
//! after every step so a crash or `Interrupt` can be resumed later
//! (spec.md §4.3 "Executor").

use crate::action::{Action, ActionError};
use crate::context::GitContext;
use crate::dest_git::{DestGit, PatchTool};
use crate::state::{SavedState, StateError, StateStore};
use crate::utils::short_sha;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error(transparent)]
    State(#[from] StateError),
}

pub struct Executor<'a, S: StateStore> {
    state_store: &'a S,
}

impl<'a, S: StateStore> Executor<'a, S> {
    pub fn new(state_store: &'a S) -> Self {
        Self { state_store }
    }

    /// Repopulate a freshly-built `GitContext` from a prior run's saved
    /// state (spec.md §6 "`restore_cloned` repopulates ... before
    /// resuming"). The `interrupted` flag is cleared: resuming is an
    /// explicit request to keep going.
    pub fn resume(&self, ctx: &mut GitContext, saved: &SavedState) {
        ctx.actions = saved.actions.clone();
        ctx.current_action = saved.current_action;
        ctx.interrupted = false;
        ctx.restore_cloned(&saved.origin2cloned);
    }

    /// Run the action queue to completion, to an `Interrupt`, or to the
    /// first unrecoverable error. Every step's outcome — success or
    /// failure — is persisted before control returns to the caller, so a
    /// second `run()` over the same `StateStore` continues exactly where
    /// this one stopped.
    pub fn run(
        &self,
        ctx: &mut GitContext,
        git: &dyn DestGit,
        patch_tool: &dyn PatchTool,
    ) -> Result<(), ExecutorError> {
        loop {
            let next = ctx.current_action + 1;
            if next as usize >= ctx.actions.len() {
                break;
            }
            ctx.current_action = next;
            let idx = ctx.current_action as usize;
            let action = ctx.actions[idx].clone();

            log::info!(
                "[{}/{}] {}",
                idx + 1,
                ctx.actions.len(),
                describe(&action)
            );

            ctx.doing = true;
            let result = action.execute(ctx, git, patch_tool);
            ctx.doing = false;

            if !ctx.extra_actions.is_empty() {
                let extra = std::mem::take(&mut ctx.extra_actions);
                for (offset, a) in extra.into_iter().enumerate() {
                    ctx.actions.insert(idx + 1 + offset, a);
                }
            }

            self.persist(ctx)?;
            result?;

            if ctx.interrupted {
                return Ok(());
            }
        }

        self.state_store.clear()?;
        Ok(())
    }

    fn persist(&self, ctx: &GitContext) -> Result<(), ExecutorError> {
        let state = SavedState {
            actions: ctx.actions.clone(),
            current_action: ctx.current_action,
            interrupted: ctx.interrupted,
            origin2cloned: ctx.origin2cloned(),
        };
        self.state_store.save(&state)?;
        Ok(())
    }
}

fn describe(action: &Action) -> String {
    match action {
        Action::CherryPick { commit_sha, .. } => format!("cherry-pick {}", short_sha(commit_sha)),
        Action::MergeCloned { commit_sha, .. } => format!("merge {}", short_sha(commit_sha)),
        Action::SubtreeMerge { commit_sha, prefix, .. } => {
            format!("subtree-merge {} at {prefix}", short_sha(commit_sha))
        }
        Action::Interrupt { reason } => format!("interrupt: {reason}"),
        other => format!("{other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dest_git::{CommitEnv, DestGitError};
    use crate::graph::CommitGraph;
    use std::cell::RefCell;
    use std::path::{Path, PathBuf};

    struct RecordingGit {
        commits: RefCell<u32>,
    }

    impl DestGit for RecordingGit {
        fn init(&self, _path: &Path) -> Result<(), DestGitError> {
            Ok(())
        }
        fn remote_add(&self, _path: &Path, _name: &str, _address: &str) -> Result<(), DestGitError> {
            Ok(())
        }
        fn remote_remove(&self, _path: &Path, _name: &str) -> Result<(), DestGitError> {
            Ok(())
        }
        fn fetch(&self, _path: &Path, _name: &str, _tags: bool) -> Result<(), DestGitError> {
            Ok(())
        }
        fn checkout_force(&self, _path: &Path, _commit_sha: &str) -> Result<(), DestGitError> {
            Ok(())
        }
        fn checkout_orphan(&self, _path: &Path, _name: &str) -> Result<(), DestGitError> {
            Ok(())
        }
        fn reset_mixed(&self, _path: &Path) -> Result<(), DestGitError> {
            Ok(())
        }
        fn merge_no_ff(
            &self,
            _path: &Path,
            _parents: &[String],
            _message: &str,
            _env: &CommitEnv,
        ) -> Result<String, DestGitError> {
            Ok("merged".to_string())
        }
        fn merge_ours_no_commit(&self, _path: &Path, _parent: &str, _allow_unrelated: bool) -> Result<(), DestGitError> {
            Ok(())
        }
        fn read_tree_prefix(&self, _path: &Path, _prefix: &str, _commit_sha: &str) -> Result<(), DestGitError> {
            Ok(())
        }
        fn commit(&self, _path: &Path, _message: &str, _env: &CommitEnv) -> Result<String, DestGitError> {
            Ok("committed".to_string())
        }
        fn cherry_pick(&self, _path: &Path, _commit_sha: &str, _env: &CommitEnv) -> Result<String, DestGitError> {
            *self.commits.borrow_mut() += 1;
            Ok(format!("cloned-{}", self.commits.borrow()))
        }
        fn commit_allow_empty(
            &self,
            _path: &Path,
            _message: &str,
            _use_merge_msg: bool,
            _amend_if_needed: bool,
            _env: &CommitEnv,
        ) -> Result<String, DestGitError> {
            Ok("committed".to_string())
        }
        fn commit_amend(&self, _path: &Path, _message: &str, _env: &CommitEnv) -> Result<String, DestGitError> {
            Ok("amended".to_string())
        }
        fn branch_force(&self, _path: &Path, _name: &str) -> Result<(), DestGitError> {
            Ok(())
        }
        fn branch_delete(&self, _path: &Path, _name: &str) -> Result<(), DestGitError> {
            Ok(())
        }
        fn tag_force(&self, _path: &Path, _name: &str) -> Result<(), DestGitError> {
            Ok(())
        }
        fn tag_delete(&self, _path: &Path, _name: &str) -> Result<(), DestGitError> {
            Ok(())
        }
        fn gc_aggressive(&self, _path: &Path) -> Result<(), DestGitError> {
            Ok(())
        }
        fn am(&self, _path: &Path, _patch_file: &Path, _three_way: bool) -> Result<(), DestGitError> {
            Ok(())
        }
        fn am_abort(&self, _path: &Path) -> Result<(), DestGitError> {
            Ok(())
        }
        fn format_patch_head_minus_1(&self, _path: &Path) -> Result<String, DestGitError> {
            Ok(String::new())
        }
        fn diff_name_status_unmerged(&self, _path: &Path) -> Result<Vec<String>, DestGitError> {
            Ok(Vec::new())
        }
        fn checkout_paths(&self, _path: &Path, _commit_sha: &str, _paths: &[String]) -> Result<(), DestGitError> {
            Ok(())
        }
        fn rev_parse_head(&self, _path: &Path) -> Result<String, DestGitError> {
            Ok("head".to_string())
        }
        fn version(&self) -> Result<(u32, u32), DestGitError> {
            Ok((2, 40))
        }
        fn run_raw(&self, _path: &Path, _program: &str, _args: &[&str]) -> Result<String, DestGitError> {
            Ok(String::new())
        }
    }

    struct NoPatchTool;
    impl PatchTool for NoPatchTool {
        fn apply(&self, _path: &Path, _patch_file: &Path) -> Result<(), DestGitError> {
            Ok(())
        }
    }

    #[test]
    fn runs_every_action_and_clears_state_on_completion() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = tempfile::tempdir().unwrap();
        let store = crate::state::FileStateStore::new(state_dir.path());

        let mut ctx = GitContext::new(
            CommitGraph::default(),
            PathBuf::from(dir.path()),
            "/src".to_string(),
            "git".to_string(),
            (2, 40),
        );
        ctx.actions = vec![
            Action::CherryPick {
                path: ctx.dst_path.clone(),
                commit_sha: "a".to_string(),
                message: "A".to_string(),
            },
            Action::CherryPick {
                path: ctx.dst_path.clone(),
                commit_sha: "b".to_string(),
                message: "B".to_string(),
            },
        ];

        let git = RecordingGit { commits: RefCell::new(0) };
        let patch_tool = NoPatchTool;
        let executor = Executor::new(&store);
        executor.run(&mut ctx, &git, &patch_tool).unwrap();

        assert_eq!(ctx.current_action, 1);
        assert!(store.load().unwrap().is_none(), "state cleared on full completion");
    }

    #[test]
    fn stops_and_persists_on_interrupt() {
        let dir = tempfile::tempdir().unwrap();
        let state_dir = tempfile::tempdir().unwrap();
        let store = crate::state::FileStateStore::new(state_dir.path());

        let mut ctx = GitContext::new(
            CommitGraph::default(),
            PathBuf::from(dir.path()),
            "/src".to_string(),
            "git".to_string(),
            (2, 40),
        );
        ctx.actions = vec![
            Action::Interrupt { reason: "pause here".to_string() },
            Action::CherryPick {
                path: ctx.dst_path.clone(),
                commit_sha: "a".to_string(),
                message: "A".to_string(),
            },
        ];

        let git = RecordingGit { commits: RefCell::new(0) };
        let patch_tool = NoPatchTool;
        let executor = Executor::new(&store);
        executor.run(&mut ctx, &git, &patch_tool).unwrap();

        assert!(ctx.interrupted);
        assert_eq!(ctx.current_action, 0);
        let saved = store.load().unwrap().unwrap();
        assert_eq!(saved.current_action, 0);
        assert!(saved.interrupted);
    }
}
