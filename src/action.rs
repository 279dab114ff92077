//! The action model (C2) and action handlers (C6): a closed, tagged set of
//! operations against a destination repository, each carrying only plain
//! data so the plan is serializable (spec.md §3 "Action").
//!
//! Every variant's `execute` touches only the destination working
//! directory, never the source (spec.md §4.4). Conflict recovery
//! (`MergeCloned`/`CherryPick` hitting a non-empty conflict set) composes a
//! recovery sub-plan and pushes it onto `ctx.extra_actions` for the
//! executor to splice in immediately after the current step (spec.md §4.5,
//! §5 "Dynamic insertion").

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::context::GitContext;
use crate::dest_git::{CommitEnv, DestGit, DestGitError, PatchTool, supports_unrelated_histories};
use crate::identity::{identity_from_env, CommitIdentity};
use crate::patch_format::{self, PatchFileStatus};

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error(transparent)]
    Git(#[from] DestGitError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("commit {0} has no cloned_sha yet")]
    NotYetCloned(String),
    #[error("no cached patch for commit {0}")]
    NoCachedPatch(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Action {
    RemoveDirectory { path: PathBuf },
    ProvideDirectory { path: PathBuf },
    RemoveFile { path: PathBuf },
    InitRepo { path: PathBuf },
    AddRemote { path: PathBuf, name: String, address: String },
    RemoveRemote { path: PathBuf, name: String },
    FetchRemote { path: PathBuf, name: String, tags: bool },
    CheckoutCloned { path: PathBuf, commit_sha: String },
    CheckoutOrphan { path: PathBuf, name: String },
    SetAuthor {
        author_name: String,
        author_email: String,
        authored_date: i64,
        author_tz_offset: i32,
    },
    ResetAuthor {},
    SetCommitter {
        committer_name: String,
        committer_email: String,
        committed_date: i64,
        committer_tz_offset: i32,
    },
    ResetCommitter {},
    MergeCloned {
        path: PathBuf,
        commit_sha: String,
        message: String,
        extra_parents: Vec<String>,
    },
    SubtreeMerge {
        path: PathBuf,
        commit_sha: String,
        message: String,
        parent_sha: String,
        prefix: String,
    },
    CherryPick { path: PathBuf, commit_sha: String, message: String },
    ContinueCommitting { path: PathBuf, commit_sha: String },
    CreateHead { path: PathBuf, name: String },
    DeleteHead { path: PathBuf, name: String },
    CreateTag { path: PathBuf, name: String },
    DeleteTag { path: PathBuf, name: String },
    CollectGarbage { path: PathBuf },
    ApplyPatchFile { path: PathBuf, patch_path: PathBuf },
    HEAD2PatchFile { path: PathBuf, patch_path: PathBuf },
    ApplyCache { path: PathBuf, patch_path: PathBuf, commit_sha: String },
    ApplyCacheOrInterrupt {
        path: PathBuf,
        patch_path: PathBuf,
        commit_sha: String,
        reason: String,
    },
    Interrupt { reason: String },
}

impl Action {
    /// Dispatch this action against the destination repo. `ctx.doing` must
    /// already be `true` for the duration of this call (the executor sets
    /// it) so that any recovery sub-plan this handler composes lands in
    /// `extra_actions` rather than the main queue.
    pub fn execute(
        &self,
        ctx: &mut GitContext,
        git: &dyn DestGit,
        patch_tool: &dyn PatchTool,
    ) -> Result<(), ActionError> {
        match self {
            Action::RemoveDirectory { path } => {
                if path.exists() {
                    std::fs::remove_dir_all(path)?;
                }
                Ok(())
            }
            Action::ProvideDirectory { path } => {
                if !path.exists() {
                    std::fs::create_dir_all(path)?;
                }
                Ok(())
            }
            Action::RemoveFile { path } => {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                Ok(())
            }
            Action::InitRepo { path } => Ok(git.init(path)?),
            Action::AddRemote { path, name, address } => Ok(git.remote_add(path, name, address)?),
            Action::RemoveRemote { path, name } => Ok(git.remote_remove(path, name)?),
            Action::FetchRemote { path, name, tags } => Ok(git.fetch(path, name, *tags)?),
            Action::CheckoutCloned { path, commit_sha } => {
                let cloned = ctx
                    .cloned_sha_of(commit_sha)
                    .ok_or_else(|| ActionError::NotYetCloned(commit_sha.clone()))?;
                Ok(git.checkout_force(path, &cloned)?)
            }
            Action::CheckoutOrphan { path, name } => Ok(git.checkout_orphan(path, name)?),
            Action::SetAuthor {
                author_name,
                author_email,
                authored_date,
                author_tz_offset,
            } => {
                ctx.commit_env.author = Some(CommitIdentity::new(
                    author_name.clone(),
                    author_email.clone(),
                    *authored_date,
                    *author_tz_offset,
                ));
                Ok(())
            }
            Action::ResetAuthor {} => {
                ctx.commit_env.author = None;
                Ok(())
            }
            Action::SetCommitter {
                committer_name,
                committer_email,
                committed_date,
                committer_tz_offset,
            } => {
                ctx.commit_env.committer = Some(CommitIdentity::new(
                    committer_name.clone(),
                    committer_email.clone(),
                    *committed_date,
                    *committer_tz_offset,
                ));
                Ok(())
            }
            Action::ResetCommitter {} => {
                ctx.commit_env.committer = None;
                Ok(())
            }
            Action::MergeCloned {
                path,
                commit_sha,
                message,
                extra_parents,
            } => self.run_merge_cloned(ctx, git, path, commit_sha, message, extra_parents),
            Action::SubtreeMerge {
                path,
                commit_sha,
                message,
                parent_sha,
                prefix,
            } => self.run_subtree_merge(ctx, git, path, commit_sha, message, parent_sha, prefix),
            Action::CherryPick { path, commit_sha, message } => {
                self.run_cherry_pick(ctx, git, path, commit_sha, message)
            }
            Action::ContinueCommitting { path, commit_sha } => {
                self.run_continue_committing(ctx, git, path, commit_sha)
            }
            Action::CreateHead { path, name } => Ok(git.branch_force(path, name)?),
            Action::DeleteHead { path, name } => Ok(git.branch_delete(path, name)?),
            Action::CreateTag { path, name } => Ok(git.tag_force(path, name)?),
            Action::DeleteTag { path, name } => Ok(git.tag_delete(path, name)?),
            Action::CollectGarbage { path } => Ok(git.gc_aggressive(path)?),
            Action::ApplyPatchFile { path, patch_path } => {
                match git.am(path, patch_path, true) {
                    Ok(()) => Ok(()),
                    Err(e) => {
                        let _ = git.am_abort(path);
                        ctx.enqueue(Action::Interrupt {
                            reason: format!("failed to apply patch {}: {e}", patch_path.display()),
                        });
                        Ok(())
                    }
                }
            }
            Action::HEAD2PatchFile { path, patch_path } => {
                let text = git.format_patch_head_minus_1(path)?;
                std::fs::write(patch_path, text)?;
                Ok(())
            }
            Action::ApplyCache { path, commit_sha, .. } => {
                self.run_apply_cache(ctx, git, patch_tool, path, commit_sha)
            }
            Action::ApplyCacheOrInterrupt {
                path,
                commit_sha,
                reason,
                ..
            } => {
                if ctx.cache.get(commit_sha).is_some() {
                    self.run_apply_cache(ctx, git, patch_tool, path, commit_sha)
                } else {
                    ctx.enqueue(Action::Interrupt { reason: reason.clone() });
                    Ok(())
                }
            }
            Action::Interrupt { reason } => {
                log::warn!("{reason}");
                ctx.interrupt();
                Ok(())
            }
        }
    }

    fn run_merge_cloned(
        &self,
        ctx: &mut GitContext,
        git: &dyn DestGit,
        path: &Path,
        commit_sha: &str,
        message: &str,
        extra_parents: &[String],
    ) -> Result<(), ActionError> {
        let cloned_parents: Vec<String> = extra_parents
            .iter()
            .map(|p| ctx.cloned_sha_of(p).unwrap_or_else(|| p.clone()))
            .collect();

        match git.merge_no_ff(path, &cloned_parents, message, &ctx.commit_env) {
            Ok(sha) => {
                record_cloned_sha(ctx, commit_sha, sha);
                Ok(())
            }
            Err(e) => {
                let unmerged = git.diff_name_status_unmerged(path)?;
                if unmerged.is_empty() {
                    Err(e.into())
                } else {
                    self.recover_conflict(ctx, path, commit_sha, &format!("merge conflict on {commit_sha}: {e}"));
                    Ok(())
                }
            }
        }
    }

    fn run_subtree_merge(
        &self,
        ctx: &mut GitContext,
        git: &dyn DestGit,
        path: &Path,
        commit_sha: &str,
        message: &str,
        parent_sha: &str,
        prefix: &str,
    ) -> Result<(), ActionError> {
        let cloned_parent = ctx
            .cloned_sha_of(parent_sha)
            .ok_or_else(|| ActionError::NotYetCloned(parent_sha.to_string()))?;
        let allow_unrelated = supports_unrelated_histories(ctx.git_version);

        git.merge_ours_no_commit(path, &cloned_parent, allow_unrelated)?;
        git.read_tree_prefix(path, ".gic/", &cloned_parent)?;

        let scratch = path.join(".gic");
        let target = path.join(prefix);
        move_tree(&scratch, &target)?;
        if scratch.exists() {
            std::fs::remove_dir_all(&scratch)?;
        }

        let sha = git.commit(path, message, &ctx.commit_env)?;
        record_cloned_sha(ctx, commit_sha, sha);
        Ok(())
    }

    fn run_cherry_pick(
        &self,
        ctx: &mut GitContext,
        git: &dyn DestGit,
        path: &Path,
        commit_sha: &str,
        message: &str,
    ) -> Result<(), ActionError> {
        // Author is preserved by cherry-pick itself; only thread the committer override.
        let cherry_env = CommitEnv {
            author: None,
            committer: ctx.commit_env.committer.clone(),
        };

        match git.cherry_pick(path, commit_sha, &cherry_env) {
            Ok(sha) => {
                record_cloned_sha(ctx, commit_sha, sha);
                Ok(())
            }
            Err(e) => {
                if e.to_string().contains("--allow-empty") {
                    let sha = git.commit_allow_empty(path, message, false, false, &ctx.commit_env)?;
                    record_cloned_sha(ctx, commit_sha, sha);
                    Ok(())
                } else {
                    let unmerged = git.diff_name_status_unmerged(path)?;
                    if unmerged.is_empty() {
                        Err(e.into())
                    } else {
                        self.recover_conflict(ctx, path, commit_sha, &format!("cherry-pick conflict on {commit_sha}: {e}"));
                        Ok(())
                    }
                }
            }
        }
    }

    fn run_continue_committing(
        &self,
        ctx: &mut GitContext,
        git: &dyn DestGit,
        path: &Path,
        commit_sha: &str,
    ) -> Result<(), ActionError> {
        let merge_msg = path.join(".git").join("MERGE_MSG");
        let sha = if merge_msg.exists() {
            let remaining = git.diff_name_status_unmerged(path)?;
            git.checkout_paths(path, commit_sha, &remaining)?;
            git.commit_allow_empty(path, "", false, true, &ctx.commit_env)?
        } else {
            git.commit_allow_empty(path, "", true, true, &ctx.commit_env)?
        };
        record_cloned_sha(ctx, commit_sha, sha);
        Ok(())
    }

    fn run_apply_cache(
        &self,
        ctx: &mut GitContext,
        git: &dyn DestGit,
        patch_tool: &dyn PatchTool,
        path: &Path,
        commit_sha: &str,
    ) -> Result<(), ActionError> {
        let patch_file = ctx
            .cache
            .get(commit_sha)
            .ok_or_else(|| ActionError::NoCachedPatch(commit_sha.to_string()))?
            .to_path_buf();
        let patch_text = std::fs::read_to_string(&patch_file)?;
        let parsed = patch_format::parse(&patch_text);

        let parent_commit = ctx
            .graph
            .get(commit_sha)
            .and_then(|c| c.parents.first().copied())
            .and_then(|idx| ctx.graph.node(idx).cloned_sha.clone());

        for entry in &parsed.files {
            match entry.status {
                PatchFileStatus::Changed | PatchFileStatus::Deleted => {
                    if let Some(parent) = &parent_commit {
                        let _ = git.checkout_paths(path, parent, std::slice::from_ref(&entry.path));
                    }
                }
                PatchFileStatus::Created => {
                    let full = path.join(&entry.path);
                    if full.exists() {
                        std::fs::remove_file(full)?;
                    }
                }
            }
        }

        patch_tool.apply(path, &patch_file)?;

        let merge_msg = path.join(".git").join("MERGE_MSG");
        if merge_msg.exists() {
            std::fs::write(merge_msg, &parsed.message)?;
        } else {
            git.commit_amend(path, &parsed.message, &ctx.commit_env)?;
        }
        Ok(())
    }

    /// Compose and enqueue the conflict-recovery sub-plan (spec.md §4.5).
    fn recover_conflict(&self, ctx: &mut GitContext, path: &Path, commit_sha: &str, reason: &str) {
        let cache_dir = ctx.cache_path.clone().unwrap_or_default();

        if ctx.from_cache {
            ctx.enqueue(Action::ApplyCacheOrInterrupt {
                path: path.to_path_buf(),
                patch_path: cache_dir,
                commit_sha: commit_sha.to_string(),
                reason: reason.to_string(),
            });
        } else {
            if ctx.cache_path.is_some() {
                ctx.enqueue(Action::ApplyCache {
                    path: path.to_path_buf(),
                    patch_path: cache_dir,
                    commit_sha: commit_sha.to_string(),
                });
            }
            ctx.enqueue(Action::Interrupt { reason: reason.to_string() });
        }

        let committer = ctx.commit_env.committer.clone().or_else(|| {
            identity_from_env("GIT_COMMITTER_NAME", "GIT_COMMITTER_EMAIL", "GIT_COMMITTER_DATE").ok()
        });

        if let Some(id) = &committer {
            ctx.enqueue(Action::SetCommitter {
                committer_name: id.name.clone(),
                committer_email: id.email.clone(),
                committed_date: id.timestamp,
                committer_tz_offset: id.tz_offset_seconds,
            });
        }
        ctx.enqueue(Action::ContinueCommitting {
            path: path.to_path_buf(),
            commit_sha: commit_sha.to_string(),
        });
        if committer.is_some() {
            ctx.enqueue(Action::ResetCommitter {});
        }
    }
}

fn record_cloned_sha(ctx: &mut GitContext, original_sha: &str, cloned_sha: String) {
    if let Some(idx) = ctx.graph.index_of(original_sha) {
        ctx.graph.node_mut(idx).cloned_sha = Some(cloned_sha);
    }
}

/// Recursively move every file under `src` to the same relative path under
/// `dst`, creating directories as needed (`SubtreeMerge`'s `.gic/` → prefix
/// move, spec.md §4.4).
fn move_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    if !src.exists() {
        return Ok(());
    }
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if from.is_dir() {
            std::fs::create_dir_all(&to)?;
            move_tree(&from, &to)?;
        } else {
            if let Some(parent) = to.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::rename(&from, &to)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_round_trip_preserves_tag_and_fields() {
        let action = Action::MergeCloned {
            path: PathBuf::from("/tmp/dst"),
            commit_sha: "abc123".into(),
            message: "merge topic".into(),
            extra_parents: vec!["def456".into()],
        };
        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains("\"kind\":\"MergeCloned\""));
        let restored: Action = serde_json::from_str(&json).unwrap();
        match restored {
            Action::MergeCloned { commit_sha, extra_parents, .. } => {
                assert_eq!(commit_sha, "abc123");
                assert_eq!(extra_parents, vec!["def456".to_string()]);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn interrupt_round_trips() {
        let action = Action::Interrupt { reason: "manual review".into() };
        let json = serde_json::to_string(&action).unwrap();
        let restored: Action = serde_json::from_str(&json).unwrap();
        match restored {
            Action::Interrupt { reason } => assert_eq!(reason, "manual review"),
            other => panic!("unexpected variant: {other:?}"),
        }
    }
}
