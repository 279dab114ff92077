//! The source-repository introspection adapter (spec.md places this out of
//! scope, "specified only via the interfaces the core consumes" — this is
//! that interface). Mirrors the teacher's `GitOps`/`Git` split: a trait for
//! mockability in tests, a thin `Command`-shelling implementation for real
//! use.

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum SourceRepoError {
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("failed to execute git: {0}")]
    ExecutionFailed(#[from] std::io::Error),
    #[error("unparseable git output for {what}: {detail}")]
    ParseError { what: &'static str, detail: String },
}

/// A single ref as yielded by `for-each-ref`: its full path
/// (`refs/heads/main`), short name (`main`), and the commit it points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub full_path: String,
    pub name: String,
    pub target_sha: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitMeta {
    pub sha: String,
    pub parents: Vec<String>,
    pub author_name: String,
    pub author_email: String,
    pub author_date: String,
    pub committer_name: String,
    pub committer_email: String,
    pub committer_date: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffStatus {
    Added,
    Modified,
    Deleted,
    Renamed { from: String },
    Copied { from: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffEntry {
    pub path: String,
    pub status: DiffStatus,
}

/// The surface the graph builder, planner, and conflict-recovery subsystem
/// need from the source repository. Backed by `GitCliSourceRepo` in
/// production, by an in-memory fake in tests.
pub trait SourceRepo {
    fn references(&self) -> Result<Vec<RepoRef>, SourceRepoError>;
    fn commit(&self, sha: &str) -> Result<CommitMeta, SourceRepoError>;
    fn parents(&self, sha: &str) -> Result<Vec<String>, SourceRepoError>;
    fn diff_name_status(&self, a: &str, b: &str) -> Result<Vec<DiffEntry>, SourceRepoError>;
    fn tree_paths(&self, sha: &str) -> Result<Vec<String>, SourceRepoError>;
    fn resolve_ref(&self, name: &str) -> Result<String, SourceRepoError>;
    fn head(&self) -> Result<String, SourceRepoError>;
}

/// `SourceRepo` backed by shelling out to the `git` binary, read-only
/// plumbing commands only.
pub struct GitCliSourceRepo {
    git_binary: String,
    repo_path: std::path::PathBuf,
}

impl GitCliSourceRepo {
    pub fn new(git_binary: impl Into<String>, repo_path: impl AsRef<Path>) -> Self {
        Self {
            git_binary: git_binary.into(),
            repo_path: repo_path.as_ref().to_path_buf(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<String, SourceRepoError> {
        let output = Command::new(&self.git_binary)
            .arg("-C")
            .arg(&self.repo_path)
            .args(args)
            .output()?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SourceRepoError::CommandFailed(format!(
                "git {} failed: {}",
                args.join(" "),
                stderr
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

impl SourceRepo for GitCliSourceRepo {
    fn references(&self) -> Result<Vec<RepoRef>, SourceRepoError> {
        let out = self.run(&[
            "for-each-ref",
            "--format=%(refname)%09%(objectname)",
            "refs/heads",
            "refs/tags",
            "refs/remotes",
            "refs/stash",
        ])?;

        out.lines()
            .filter(|l| !l.is_empty())
            .map(|line| {
                let mut parts = line.splitn(2, '\t');
                let full_path = parts.next().unwrap_or_default().to_string();
                let target_sha = parts
                    .next()
                    .ok_or_else(|| SourceRepoError::ParseError {
                        what: "for-each-ref",
                        detail: line.to_string(),
                    })?
                    .to_string();
                let name = full_path
                    .rsplit_once('/')
                    .map(|(_, n)| n.to_string())
                    .unwrap_or_else(|| full_path.clone());
                Ok(RepoRef {
                    full_path,
                    name,
                    target_sha,
                })
            })
            .collect()
    }

    fn commit(&self, sha: &str) -> Result<CommitMeta, SourceRepoError> {
        const SEP: &str = "\x1f";
        let fmt = format!(
            "%P{sep}%an{sep}%ae{sep}%ad{sep}%cn{sep}%ce{sep}%cd{sep}%B",
            sep = SEP
        );
        let out = self.run(&[
            "log",
            "-1",
            &format!("--format={}", fmt),
            "--date=format:%Y-%m-%d %H:%M:%S%z",
            sha,
        ])?;

        let mut fields = out.splitn(7, SEP);
        let parents = fields
            .next()
            .unwrap_or_default()
            .split_whitespace()
            .map(String::from)
            .collect();
        let author_name = fields.next().unwrap_or_default().to_string();
        let author_email = fields.next().unwrap_or_default().to_string();
        let author_date = fields.next().unwrap_or_default().to_string();
        let committer_name = fields.next().unwrap_or_default().to_string();
        let committer_email = fields.next().unwrap_or_default().to_string();
        let rest = fields.next().unwrap_or_default();
        let (committer_date, message) = rest
            .split_once(SEP)
            .unwrap_or((rest, ""));

        Ok(CommitMeta {
            sha: sha.to_string(),
            parents,
            author_name,
            author_email,
            author_date,
            committer_name,
            committer_email,
            committer_date: committer_date.to_string(),
            message: message.trim_end().to_string(),
        })
    }

    fn parents(&self, sha: &str) -> Result<Vec<String>, SourceRepoError> {
        let out = self.run(&["log", "-1", "--format=%P", sha])?;
        Ok(out.split_whitespace().map(String::from).collect())
    }

    fn diff_name_status(&self, a: &str, b: &str) -> Result<Vec<DiffEntry>, SourceRepoError> {
        let range = format!("{}..{}", a, b);
        let out = self.run(&["diff-tree", "-r", "-M", "--name-status", &range])?;
        out.lines()
            .filter(|l| !l.is_empty())
            .map(|line| {
                let mut parts = line.split('\t');
                let code = parts.next().unwrap_or_default();
                let status = match code.as_bytes().first() {
                    Some(b'A') => DiffStatus::Added,
                    Some(b'M') => DiffStatus::Modified,
                    Some(b'D') => DiffStatus::Deleted,
                    Some(b'R') => DiffStatus::Renamed {
                        from: parts.next().unwrap_or_default().to_string(),
                    },
                    Some(b'C') => DiffStatus::Copied {
                        from: parts.next().unwrap_or_default().to_string(),
                    },
                    _ => {
                        return Err(SourceRepoError::ParseError {
                            what: "diff-tree --name-status",
                            detail: line.to_string(),
                        })
                    }
                };
                let path = parts
                    .next()
                    .ok_or_else(|| SourceRepoError::ParseError {
                        what: "diff-tree --name-status",
                        detail: line.to_string(),
                    })?
                    .to_string();
                Ok(DiffEntry { path, status })
            })
            .collect()
    }

    fn tree_paths(&self, sha: &str) -> Result<Vec<String>, SourceRepoError> {
        let out = self.run(&["ls-tree", "-r", "--name-only", sha])?;
        Ok(out.lines().filter(|l| !l.is_empty()).map(String::from).collect())
    }

    fn resolve_ref(&self, name: &str) -> Result<String, SourceRepoError> {
        let out = self.run(&["rev-parse", name])?;
        Ok(out.trim().to_string())
    }

    fn head(&self) -> Result<String, SourceRepoError> {
        self.resolve_ref("HEAD")
    }
}

/// An in-memory `SourceRepo` fake for graph/planner unit tests. Commits and
/// refs are added explicitly; `parents()`/`commit()` answer purely from
/// what was registered, with no real git process involved.
#[cfg(test)]
#[derive(Default)]
pub struct MockSourceRepo {
    commits: HashMap<String, CommitMeta>,
    refs: Vec<RepoRef>,
    head: Option<String>,
}

#[cfg(test)]
impl MockSourceRepo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_commit(mut self, sha: &str, meta: CommitMeta) -> Self {
        self.commits.insert(
            sha.to_string(),
            CommitMeta {
                sha: sha.to_string(),
                ..meta
            },
        );
        self
    }

    pub fn with_commit_parents(mut self, sha: &str, parents: Vec<&str>) -> Self {
        self.commits.insert(
            sha.to_string(),
            CommitMeta {
                sha: sha.to_string(),
                parents: parents.into_iter().map(String::from).collect(),
                ..Default::default()
            },
        );
        self
    }

    pub fn with_ref(mut self, full_path: &str, target_sha: &str) -> Self {
        let name = full_path
            .rsplit_once('/')
            .map(|(_, n)| n.to_string())
            .unwrap_or_else(|| full_path.to_string());
        self.refs.push(RepoRef {
            full_path: full_path.to_string(),
            name,
            target_sha: target_sha.to_string(),
        });
        self
    }

    pub fn with_head(mut self, sha: &str) -> Self {
        self.head = Some(sha.to_string());
        self
    }
}

#[cfg(test)]
impl SourceRepo for MockSourceRepo {
    fn references(&self) -> Result<Vec<RepoRef>, SourceRepoError> {
        Ok(self.refs.clone())
    }

    fn commit(&self, sha: &str) -> Result<CommitMeta, SourceRepoError> {
        self.commits
            .get(sha)
            .cloned()
            .ok_or_else(|| SourceRepoError::CommandFailed(format!("unknown commit {sha}")))
    }

    fn parents(&self, sha: &str) -> Result<Vec<String>, SourceRepoError> {
        self.commit(sha).map(|c| c.parents)
    }

    fn diff_name_status(&self, _a: &str, _b: &str) -> Result<Vec<DiffEntry>, SourceRepoError> {
        Ok(Vec::new())
    }

    fn tree_paths(&self, _sha: &str) -> Result<Vec<String>, SourceRepoError> {
        Ok(Vec::new())
    }

    fn resolve_ref(&self, name: &str) -> Result<String, SourceRepoError> {
        self.refs
            .iter()
            .find(|r| r.full_path == name || r.name == name)
            .map(|r| r.target_sha.clone())
            .ok_or_else(|| SourceRepoError::CommandFailed(format!("unknown ref {name}")))
    }

    fn head(&self) -> Result<String, SourceRepoError> {
        if let Some(sha) = &self.head {
            return Ok(sha.clone());
        }
        // No explicit HEAD registered: fall back to the first ref added,
        // the common case of a single-branch test fixture.
        self.refs
            .first()
            .map(|r| r.target_sha.clone())
            .ok_or_else(|| SourceRepoError::CommandFailed("no HEAD registered".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mock_reports_registered_parents() {
        let repo = MockSourceRepo::new()
            .with_commit_parents("b", vec!["a"])
            .with_commit_parents("a", vec![]);
        assert_eq!(repo.parents("b").unwrap(), vec!["a".to_string()]);
        assert!(repo.parents("a").unwrap().is_empty());
    }

    #[test]
    fn mock_resolves_refs_by_full_path_or_name() {
        let repo = MockSourceRepo::new().with_ref("refs/heads/main", "deadbeef");
        assert_eq!(repo.resolve_ref("refs/heads/main").unwrap(), "deadbeef");
        assert_eq!(repo.resolve_ref("main").unwrap(), "deadbeef");
    }
}
