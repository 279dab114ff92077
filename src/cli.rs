//! The CLI surface (C12, spec.md §6 "Command-line surface"): a
//! `clap`-derived argument parser translating flags straight into planner
//! directives. Structured the way the teacher's `cli.rs` lays out
//! `#[derive(Parser)]`/`#[derive(Args)]` structs, generalized to gic's own
//! flag set rather than git-reabsorb's plan/apply subcommands.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "gic")]
#[command(about = "Clone a rewritten slice of a git repository's history")]
#[command(version)]
pub struct Cli {
    /// Source repository path or remote URL.
    pub source: String,

    /// Destination path (must be creatable).
    #[arg(short = 'd', long = "destination")]
    pub destination: PathBuf,

    /// Optional plan dump at completion.
    #[arg(short = 'r', long = "result-state")]
    pub result_state: Option<PathBuf>,

    /// SHA of any commit whose history defines the main stream.
    #[arg(short = 'm', long = "main-stream")]
    pub main_stream: Option<String>,

    /// Pause after this commit (repeatable).
    #[arg(short = 'b', long = "break")]
    pub breaks: Vec<String>,

    /// Drop this commit (repeatable).
    #[arg(short = 's', long = "skip")]
    pub skips: Vec<String>,

    /// Restrict the plan to ancestors of this branch (repeatable),
    /// expanded to `refs/heads/<name>`.
    #[arg(short = 'H', long = "head")]
    pub heads: Vec<String>,

    /// Restrict the plan to ancestors of this tag (repeatable), expanded
    /// to `refs/tags/<name>`.
    #[arg(short = 't', long = "tag")]
    pub tags: Vec<String>,

    /// Insert a patch file before a commit (repeatable; two values per
    /// occurrence: the SHA it precedes, then the patch file path).
    #[arg(short = 'i', long = "insert-before", num_args = 2, value_names = ["SHA1", "PATCHFILE"])]
    pub insertions: Vec<String>,

    /// Alternative git binary.
    #[arg(short = 'g', long = "git")]
    pub git_binary: Option<String>,

    /// Directory holding cached patches for `ApplyCache` (spec.md §6
    /// "Patch cache").
    #[arg(long = "patch-cache")]
    pub patch_cache: Option<PathBuf>,

    /// Resume a previously interrupted run instead of starting fresh.
    #[arg(long)]
    pub resume: bool,

    /// Increase verbosity (repeatable: -v debug, -vv trace).
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress all but error-level log output.
    #[arg(short = 'q', long)]
    pub quiet: bool,
}

impl Cli {
    /// Pair up the flat `-i SHA PATCH -i SHA PATCH ...` values into
    /// `(sha, path)` tuples, preserving occurrence order.
    pub fn insertion_pairs(&self) -> Vec<(String, PathBuf)> {
        self.insertions
            .chunks_exact(2)
            .map(|pair| (pair[0].clone(), PathBuf::from(&pair[1])))
            .collect()
    }

    /// Expand `-H`/`-t` into the fully-qualified ref set the graph builder
    /// should restrict itself to, or `None` if neither flag was given
    /// (meaning "every ref").
    pub fn requested_refs(&self) -> Option<std::collections::HashSet<String>> {
        if self.heads.is_empty() && self.tags.is_empty() {
            return None;
        }
        let mut refs = std::collections::HashSet::new();
        refs.extend(self.heads.iter().map(|h| format!("refs/heads/{h}")));
        refs.extend(self.tags.iter().map(|t| format!("refs/tags/{t}")));
        Some(refs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli {
            source: "src".into(),
            destination: PathBuf::from("dst"),
            result_state: None,
            main_stream: None,
            breaks: Vec::new(),
            skips: Vec::new(),
            heads: Vec::new(),
            tags: Vec::new(),
            insertions: Vec::new(),
            git_binary: None,
            patch_cache: None,
            resume: false,
            verbose: 0,
            quiet: false,
        }
    }

    #[test]
    fn insertion_pairs_groups_flat_values() {
        let mut cli = base_cli();
        cli.insertions = vec!["abc123".into(), "one.patch".into(), "def456".into(), "two.patch".into()];
        assert_eq!(
            cli.insertion_pairs(),
            vec![
                ("abc123".to_string(), PathBuf::from("one.patch")),
                ("def456".to_string(), PathBuf::from("two.patch")),
            ]
        );
    }

    #[test]
    fn requested_refs_expands_heads_and_tags() {
        let mut cli = base_cli();
        cli.heads = vec!["main".into()];
        cli.tags = vec!["v1".into()];
        let refs = cli.requested_refs().unwrap();
        assert!(refs.contains("refs/heads/main"));
        assert!(refs.contains("refs/tags/v1"));
    }

    #[test]
    fn no_head_or_tag_flags_means_unrestricted() {
        assert!(base_cli().requested_refs().is_none());
    }
}
