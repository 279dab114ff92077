//! Resolved runtime configuration and the top-level error aggregation
//! (C13, spec.md §7), mirroring the teacher's `AppError` in `app/mod.rs`.

use std::path::PathBuf;

use crate::action::ActionError;
use crate::dest_git::DestGitError;
use crate::executor::ExecutorError;
use crate::graph::GraphError;
use crate::patch_cache::PatchCacheError;
use crate::planner::PlanError;
use crate::source_repo::SourceRepoError;
use crate::state::StateError;

/// Paths and settings resolved once at startup from CLI flags and the
/// environment, threaded through the rest of the run.
#[derive(Debug, Clone)]
pub struct Config {
    pub git_binary: String,
    pub cache_dir: Option<PathBuf>,
    pub state_dir: PathBuf,
}

impl Config {
    pub fn new(git_binary: Option<String>, cache_dir: Option<PathBuf>, state_dir: PathBuf) -> Self {
        Self {
            git_binary: git_binary.unwrap_or_else(|| "git".to_string()),
            cache_dir,
            state_dir,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GicError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Plan(#[from] PlanError),
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error(transparent)]
    Execution(#[from] ExecutorError),
    #[error(transparent)]
    SourceRepo(#[from] SourceRepoError),
    #[error(transparent)]
    DestGit(#[from] DestGitError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    PatchCache(#[from] PatchCacheError),
    #[error("{0}")]
    Argument(String),
}
