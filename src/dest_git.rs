//! The destination-repository git runner (C10): the thin process wrapper
//! action handlers invoke against. Mirrors the teacher's `GitOps`/`Git`
//! split — a trait for mockability, a `std::process::Command`-backed
//! implementation for real use — generalized to the destination-repo
//! surface spec.md §4.4 names.
//!
//! Author/committer identity is threaded through as an explicit
//! [`CommitEnv`] override on each commit-producing call rather than
//! mutating the process environment (spec.md §9 design note); the
//! `Set*`/`Reset*` actions still exist on the wire for compatibility and
//! populate a `CommitEnv` slot on `GitContext`.

use std::path::Path;
use std::process::Command;

use crate::identity::CommitIdentity;

#[derive(Debug, thiserror::Error)]
pub enum DestGitError {
    #[error("`{program} {args}` failed: {stderr}")]
    CommandFailed {
        program: String,
        args: String,
        stderr: String,
    },
    #[error("failed to execute {0}: {1}")]
    ExecutionFailed(String, #[source] std::io::Error),
    #[error("unparseable output from `{0}`: {1}")]
    ParseError(String, String),
}

/// Optional author/committer override applied to a single git invocation.
#[derive(Debug, Clone, Default)]
pub struct CommitEnv {
    pub author: Option<CommitIdentity>,
    pub committer: Option<CommitIdentity>,
}

impl CommitEnv {
    pub fn none() -> Self {
        Self::default()
    }
}

/// The destination-repo operations the action handlers run against.
/// Every method takes the repository's working directory explicitly
/// (actions always carry their own `path`; spec.md §5 calls this out as
/// the alternative to a globally mutable cwd).
pub trait DestGit {
    fn init(&self, path: &Path) -> Result<(), DestGitError>;
    fn remote_add(&self, path: &Path, name: &str, address: &str) -> Result<(), DestGitError>;
    fn remote_remove(&self, path: &Path, name: &str) -> Result<(), DestGitError>;
    fn fetch(&self, path: &Path, name: &str, tags: bool) -> Result<(), DestGitError>;
    fn checkout_force(&self, path: &Path, commit_sha: &str) -> Result<(), DestGitError>;
    fn checkout_orphan(&self, path: &Path, name: &str) -> Result<(), DestGitError>;
    fn reset_mixed(&self, path: &Path) -> Result<(), DestGitError>;
    fn merge_no_ff(
        &self,
        path: &Path,
        parent_shas: &[String],
        message: &str,
        env: &CommitEnv,
    ) -> Result<String, DestGitError>;
    fn merge_ours_no_commit(
        &self,
        path: &Path,
        parent_sha: &str,
        allow_unrelated_histories: bool,
    ) -> Result<(), DestGitError>;
    fn read_tree_prefix(&self, path: &Path, prefix: &str, commit_sha: &str) -> Result<(), DestGitError>;
    fn commit(&self, path: &Path, message: &str, env: &CommitEnv) -> Result<String, DestGitError>;
    fn cherry_pick(&self, path: &Path, commit_sha: &str, env: &CommitEnv) -> Result<String, DestGitError>;
    fn commit_allow_empty(
        &self,
        path: &Path,
        message: &str,
        amend: bool,
        no_edit: bool,
        env: &CommitEnv,
    ) -> Result<String, DestGitError>;
    fn commit_amend(&self, path: &Path, message: &str, env: &CommitEnv) -> Result<String, DestGitError>;
    fn branch_force(&self, path: &Path, name: &str) -> Result<(), DestGitError>;
    fn branch_delete(&self, path: &Path, name: &str) -> Result<(), DestGitError>;
    fn tag_force(&self, path: &Path, name: &str) -> Result<(), DestGitError>;
    fn tag_delete(&self, path: &Path, name: &str) -> Result<(), DestGitError>;
    fn gc_aggressive(&self, path: &Path) -> Result<(), DestGitError>;
    fn am(&self, path: &Path, patch_path: &Path, committer_date_is_author_date: bool) -> Result<(), DestGitError>;
    fn am_abort(&self, path: &Path) -> Result<(), DestGitError>;
    fn format_patch_head_minus_1(&self, path: &Path) -> Result<String, DestGitError>;
    fn diff_name_status_unmerged(&self, path: &Path) -> Result<Vec<String>, DestGitError>;
    fn checkout_paths(&self, path: &Path, rev: &str, files: &[String]) -> Result<(), DestGitError>;
    fn rev_parse_head(&self, path: &Path) -> Result<String, DestGitError>;
    fn version(&self) -> Result<(u32, u32), DestGitError>;
    /// Escape hatch for non-git filesystem operations a handler needs to run
    /// against the working directory (`SubtreeMerge`'s `mv`/`rm -rf .gic`).
    fn run_raw(&self, path: &Path, program: &str, args: &[&str]) -> Result<String, DestGitError>;
}

/// Thin wrapper over the external `patch` binary, used by `ApplyCache`.
pub trait PatchTool {
    fn apply(&self, path: &Path, patch_file: &Path) -> Result<(), DestGitError>;
}

pub struct SystemDestGit {
    git_binary: String,
}

impl SystemDestGit {
    pub fn new(git_binary: impl Into<String>) -> Self {
        Self {
            git_binary: git_binary.into(),
        }
    }

    fn run(&self, path: &Path, args: &[&str], env: &CommitEnv) -> Result<String, DestGitError> {
        let mut cmd = Command::new(&self.git_binary);
        cmd.current_dir(path).args(args);
        apply_env(&mut cmd, env);

        let output = cmd
            .output()
            .map_err(|e| DestGitError::ExecutionFailed(self.git_binary.clone(), e))?;

        if !output.status.success() {
            return Err(DestGitError::CommandFailed {
                program: self.git_binary.clone(),
                args: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_bare(&self, path: &Path, args: &[&str]) -> Result<String, DestGitError> {
        self.run(path, args, &CommitEnv::none())
    }
}

fn apply_env(cmd: &mut Command, env: &CommitEnv) {
    if let Some(author) = &env.author {
        cmd.env("GIT_AUTHOR_NAME", &author.name);
        cmd.env("GIT_AUTHOR_EMAIL", &author.email);
        cmd.env("GIT_AUTHOR_DATE", author.date_string());
    }
    if let Some(committer) = &env.committer {
        cmd.env("GIT_COMMITTER_NAME", &committer.name);
        cmd.env("GIT_COMMITTER_EMAIL", &committer.email);
        cmd.env("GIT_COMMITTER_DATE", committer.date_string());
    }
}

impl DestGit for SystemDestGit {
    fn init(&self, path: &Path) -> Result<(), DestGitError> {
        std::fs::create_dir_all(path)
            .map_err(|e| DestGitError::ExecutionFailed("mkdir".into(), e))?;
        self.run_bare(path, &["init"])?;
        Ok(())
    }

    fn remote_add(&self, path: &Path, name: &str, address: &str) -> Result<(), DestGitError> {
        self.run_bare(path, &["remote", "add", name, address])?;
        Ok(())
    }

    fn remote_remove(&self, path: &Path, name: &str) -> Result<(), DestGitError> {
        self.run_bare(path, &["remote", "remove", name])?;
        Ok(())
    }

    fn fetch(&self, path: &Path, name: &str, tags: bool) -> Result<(), DestGitError> {
        let tag_flag = if tags { "--tags" } else { "--no-tags" };
        self.run_bare(path, &["fetch", tag_flag, name])?;
        Ok(())
    }

    fn checkout_force(&self, path: &Path, commit_sha: &str) -> Result<(), DestGitError> {
        self.run_bare(path, &["checkout", "-f", commit_sha])?;
        Ok(())
    }

    fn checkout_orphan(&self, path: &Path, name: &str) -> Result<(), DestGitError> {
        self.run_bare(path, &["checkout", "--orphan", name])?;
        self.run_bare(path, &["reset"])?;
        for entry in std::fs::read_dir(path).map_err(|e| DestGitError::ExecutionFailed("readdir".into(), e))? {
            let entry = entry.map_err(|e| DestGitError::ExecutionFailed("readdir".into(), e))?;
            if entry.file_name() == ".git" {
                continue;
            }
            let p = entry.path();
            let remove_result = if p.is_dir() {
                std::fs::remove_dir_all(&p)
            } else {
                std::fs::remove_file(&p)
            };
            remove_result.map_err(|e| DestGitError::ExecutionFailed(format!("remove {}", p.display()), e))?;
        }
        Ok(())
    }

    fn reset_mixed(&self, path: &Path) -> Result<(), DestGitError> {
        self.run_bare(path, &["reset"])?;
        Ok(())
    }

    fn merge_no_ff(
        &self,
        path: &Path,
        parent_shas: &[String],
        message: &str,
        env: &CommitEnv,
    ) -> Result<String, DestGitError> {
        let mut args = vec!["merge", "--no-ff", "-m", message];
        for p in parent_shas {
            args.push(p);
        }
        self.run(path, &args, env)?;
        self.rev_parse_head(path)
    }

    fn merge_ours_no_commit(
        &self,
        path: &Path,
        parent_sha: &str,
        allow_unrelated_histories: bool,
    ) -> Result<(), DestGitError> {
        let mut args = vec!["merge", "-s", "ours", "--no-commit"];
        if allow_unrelated_histories {
            args.push("--allow-unrelated-histories");
        }
        args.push(parent_sha);
        self.run_bare(path, &args)?;
        Ok(())
    }

    fn read_tree_prefix(&self, path: &Path, prefix: &str, commit_sha: &str) -> Result<(), DestGitError> {
        let prefix_arg = format!("--prefix={prefix}");
        self.run_bare(path, &["read-tree", &prefix_arg, "-u", commit_sha])?;
        Ok(())
    }

    fn commit(&self, path: &Path, message: &str, env: &CommitEnv) -> Result<String, DestGitError> {
        self.run(path, &["commit", "-m", message], env)?;
        self.rev_parse_head(path)
    }

    fn cherry_pick(&self, path: &Path, commit_sha: &str, env: &CommitEnv) -> Result<String, DestGitError> {
        self.run(path, &["cherry-pick", commit_sha], env)?;
        self.rev_parse_head(path)
    }

    fn commit_allow_empty(
        &self,
        path: &Path,
        message: &str,
        amend: bool,
        no_edit: bool,
        env: &CommitEnv,
    ) -> Result<String, DestGitError> {
        let mut args = vec!["commit", "--allow-empty"];
        if no_edit {
            args.push("--no-edit");
        } else {
            args.push("-m");
            args.push(message);
        }
        if amend {
            args.push("--amend");
        }
        self.run(path, &args, env)?;
        self.rev_parse_head(path)
    }

    fn commit_amend(&self, path: &Path, message: &str, env: &CommitEnv) -> Result<String, DestGitError> {
        self.run(path, &["commit", "--only", "--amend", "-m", message], env)?;
        self.rev_parse_head(path)
    }

    fn branch_force(&self, path: &Path, name: &str) -> Result<(), DestGitError> {
        self.run_bare(path, &["branch", "-f", name])?;
        Ok(())
    }

    fn branch_delete(&self, path: &Path, name: &str) -> Result<(), DestGitError> {
        self.run_bare(path, &["branch", "-D", name])?;
        Ok(())
    }

    fn tag_force(&self, path: &Path, name: &str) -> Result<(), DestGitError> {
        self.run_bare(path, &["tag", "-f", name])?;
        Ok(())
    }

    fn tag_delete(&self, path: &Path, name: &str) -> Result<(), DestGitError> {
        self.run_bare(path, &["tag", "-d", name])?;
        Ok(())
    }

    fn gc_aggressive(&self, path: &Path) -> Result<(), DestGitError> {
        self.run_bare(path, &["gc", "--aggressive", "--prune=all"])?;
        Ok(())
    }

    fn am(&self, path: &Path, patch_path: &Path, committer_date_is_author_date: bool) -> Result<(), DestGitError> {
        let patch_str = patch_path.to_string_lossy().to_string();
        let mut args = vec!["am"];
        if committer_date_is_author_date {
            args.push("--committer-date-is-author-date");
        }
        args.push(&patch_str);
        self.run_bare(path, &args)?;
        Ok(())
    }

    fn am_abort(&self, path: &Path) -> Result<(), DestGitError> {
        self.run_bare(path, &["am", "--abort"])?;
        Ok(())
    }

    fn format_patch_head_minus_1(&self, path: &Path) -> Result<String, DestGitError> {
        self.run_bare(path, &["format-patch", "--stdout", "HEAD~1"])
    }

    fn diff_name_status_unmerged(&self, path: &Path) -> Result<Vec<String>, DestGitError> {
        let out = self.run_bare(path, &["diff", "--name-only", "--diff-filter=U"])?;
        Ok(out.lines().filter(|l| !l.is_empty()).map(String::from).collect())
    }

    fn checkout_paths(&self, path: &Path, rev: &str, files: &[String]) -> Result<(), DestGitError> {
        if files.is_empty() {
            return Ok(());
        }
        let mut args = vec!["checkout", rev, "--"];
        for f in files {
            args.push(f);
        }
        self.run_bare(path, &args)?;
        Ok(())
    }

    fn rev_parse_head(&self, path: &Path) -> Result<String, DestGitError> {
        Ok(self.run_bare(path, &["rev-parse", "HEAD"])?.trim().to_string())
    }

    fn version(&self) -> Result<(u32, u32), DestGitError> {
        let out = Command::new(&self.git_binary)
            .arg("--version")
            .output()
            .map_err(|e| DestGitError::ExecutionFailed(self.git_binary.clone(), e))?;
        let text = String::from_utf8_lossy(&out.stdout);
        let version_part = text.split_whitespace().nth(2).unwrap_or("0.0.0");
        let mut parts = version_part.split('.');
        let major: u32 = parts.next().unwrap_or("0").parse().unwrap_or(0);
        let minor: u32 = parts.next().unwrap_or("0").parse().unwrap_or(0);
        Ok((major, minor))
    }

    fn run_raw(&self, path: &Path, program: &str, args: &[&str]) -> Result<String, DestGitError> {
        let output = Command::new(program)
            .current_dir(path)
            .args(args)
            .output()
            .map_err(|e| DestGitError::ExecutionFailed(program.to_string(), e))?;
        if !output.status.success() {
            return Err(DestGitError::CommandFailed {
                program: program.to_string(),
                args: args.join(" "),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

pub struct SystemPatchTool;

impl PatchTool for SystemPatchTool {
    fn apply(&self, path: &Path, patch_file: &Path) -> Result<(), DestGitError> {
        let output = Command::new("patch")
            .current_dir(path)
            .arg("-p1")
            .arg("-i")
            .arg(patch_file)
            .output()
            .map_err(|e| DestGitError::ExecutionFailed("patch".into(), e))?;
        if !output.status.success() {
            return Err(DestGitError::CommandFailed {
                program: "patch".into(),
                args: format!("-p1 -i {}", patch_file.display()),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }
        Ok(())
    }
}

/// `true` once `git --version` is at least 2.9, the first release to
/// support `merge --allow-unrelated-histories` (spec.md §4.4 `SubtreeMerge`).
pub fn supports_unrelated_histories((major, minor): (u32, u32)) -> bool {
    (major, minor) >= (2, 9)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_gate_matches_git_2_9_cutoff() {
        assert!(!supports_unrelated_histories((2, 8)));
        assert!(supports_unrelated_histories((2, 9)));
        assert!(supports_unrelated_histories((3, 0)));
    }
}
