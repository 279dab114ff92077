//! The planner (C4): turns `(graph, directives)` into the ordered action
//! sequence the executor will run (spec.md §4.2).

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;

use crate::action::Action;
use crate::graph::CommitGraph;
use crate::source_repo::{DiffEntry, DiffStatus, SourceRepo, SourceRepoError};

/// Subtree-merge mismatch tolerance (spec.md §4.2a). Undocumented origin;
/// kept verbatim per spec's Open Question on this constant.
const SUBTREE_ACCEPTABLE_MISMATCHES: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error(transparent)]
    Repo(#[from] SourceRepoError),
    #[error("main-stream anchor {0} is not in the commit graph")]
    UnknownMainStreamCommit(String),
    #[error("break(s) never reached: {0:?}")]
    UnusedBreaks(Vec<String>),
    #[error("skip(s) never reached: {0:?}")]
    UnusedSkips(Vec<String>),
    #[error("insertion(s) never applied: {0:?}")]
    UnusedInsertions(Vec<String>),
}

/// User directives that steer the plan (spec.md §4.2 "Inputs").
#[derive(Debug, Clone, Default)]
pub struct PlanDirectives {
    pub main_stream_anchor: Option<String>,
    pub breaks: HashSet<String>,
    pub skips: HashSet<String>,
    /// Order-preserving; multiple patches may target the same SHA.
    pub insertions: Vec<(String, PathBuf)>,
    pub src_remote_address: String,
    pub dst_path: PathBuf,
}

const CLONED_REMOTE: &str = "__cloned__";

pub fn build_plan<R: SourceRepo>(
    repo: &R,
    graph: &mut CommitGraph,
    directives: &PlanDirectives,
) -> Result<Vec<Action>, PlanError> {
    let main_stream_bits = match &directives.main_stream_anchor {
        None => 0,
        Some(sha) => graph
            .get(sha)
            .map(|c| c.roots)
            .ok_or_else(|| PlanError::UnknownMainStreamCommit(sha.clone()))?,
    };

    let mut actions = Vec::new();
    actions.push(Action::RemoveDirectory { path: directives.dst_path.clone() });
    actions.push(Action::ProvideDirectory { path: directives.dst_path.clone() });
    actions.push(Action::InitRepo { path: directives.dst_path.clone() });
    actions.push(Action::AddRemote {
        path: directives.dst_path.clone(),
        name: CLONED_REMOTE.to_string(),
        address: directives.src_remote_address.clone(),
    });
    actions.push(Action::FetchRemote {
        path: directives.dst_path.clone(),
        name: CLONED_REMOTE.to_string(),
        tags: true,
    });

    let mut insertions_by_sha: HashMap<String, VecDeque<PathBuf>> = HashMap::new();
    for (sha, patch) in &directives.insertions {
        insertions_by_sha.entry(sha.clone()).or_default().push_back(patch.clone());
    }

    let mut used_breaks = HashSet::new();
    let mut used_skips = HashSet::new();
    let mut used_insertion_shas = HashSet::new();

    let mut orphan_counter = 0u32;
    let mut prev: Option<usize> = None;
    let mut at_least_one_in_trunk = false;

    for idx in graph.ordered_by_num() {
        let sha = graph.node(idx).sha.clone();
        graph.node_mut(idx).processed = true;

        if main_stream_bits != 0 && (graph.node(idx).roots & main_stream_bits) == 0 {
            graph.node_mut(idx).cloned_sha = Some(sha.clone());
            if let Some(patches) = insertions_by_sha.remove(&sha) {
                if !patches.is_empty() {
                    used_insertion_shas.insert(sha.clone());
                }
            }
            continue;
        }

        let meta = repo.commit(&sha)?;

        // --- Position reset (only when prev_c is set) ---
        // The very first root commit is cherry-picked straight onto the
        // unborn default branch left behind by `InitRepo`; there is nothing
        // to reset to yet.
        if prev.is_some() {
            let parents = graph.node(idx).parents.clone();
            if parents.is_empty() {
                let name = format!("__orphan__{orphan_counter}");
                orphan_counter += 1;
                actions.push(Action::CheckoutOrphan { path: directives.dst_path.clone(), name });
                at_least_one_in_trunk = false;
            } else {
                let first_parent_idx = parents[0];
                let first_parent_sha = graph.node(first_parent_idx).sha.clone();
                let prev_sha = prev.map(|p| graph.node(p).sha.clone());
                if prev_sha.as_deref() != Some(first_parent_sha.as_str()) {
                    let actual = get_actual_parents(graph, first_parent_idx);
                    if let Some(&target_idx) = actual.first() {
                        let target_sha = graph.node(target_idx).sha.clone();
                        actions.push(Action::CheckoutCloned {
                            path: directives.dst_path.clone(),
                            commit_sha: target_sha,
                        });
                    }
                    at_least_one_in_trunk = false;
                }
            }
        }

        // --- Insertions ---
        if let Some(mut patches) = insertions_by_sha.remove(&sha) {
            used_insertion_shas.insert(sha.clone());
            while let Some(patch) = patches.pop_front() {
                actions.push(Action::ApplyPatchFile {
                    path: directives.dst_path.clone(),
                    patch_path: patch,
                });
            }
        }

        // --- Skip decision ---
        let mut skipping = directives.skips.contains(&sha);
        if skipping {
            used_skips.insert(sha.clone());
        }

        let parent_indices = graph.node(idx).parents.clone();
        let mut extra_parents: Vec<usize> = Vec::new();
        if parent_indices.len() > 1 && !skipping {
            for &p in &parent_indices[1..] {
                extra_parents.extend(get_actual_parents(graph, p));
            }
            if extra_parents.is_empty() {
                skipping = true;
            }
        }

        if skipping {
            graph.node_mut(idx).skipped = true;
            let heads = graph.node(idx).heads.clone();
            for head in &heads {
                if head.full_path.starts_with("refs/tags/") {
                    log::warn!("tag {} is lost: its commit {} was skipped", head.name, sha);
                } else if at_least_one_in_trunk {
                    actions.push(Action::CreateHead { path: directives.dst_path.clone(), name: head.name.clone() });
                } else {
                    log::warn!("branch {} is lost: its commit {} was skipped with no trunk yet", head.name, sha);
                }
            }
        } else {
            at_least_one_in_trunk = true;

            if parent_indices.len() > 1 {
                let first_parent_sha = meta.parents.first().cloned().unwrap_or_default();
                let subtree_prefix = if parent_indices.len() == 2 {
                    let second_parent_sha = meta.parents.get(1).cloned().unwrap_or_default();
                    detect_subtree(repo, &second_parent_sha, &sha)?
                } else {
                    None
                };

                actions.push(set_author_action(&meta));
                actions.push(set_committer_action(&meta));

                if let Some(prefix) = subtree_prefix {
                    let parent_sha = extra_parents
                        .first()
                        .map(|&p| graph.node(p).sha.clone())
                        .unwrap_or(first_parent_sha);
                    actions.push(Action::SubtreeMerge {
                        path: directives.dst_path.clone(),
                        commit_sha: sha.clone(),
                        message: meta.message.clone(),
                        parent_sha,
                        prefix,
                    });
                } else {
                    let extra_parent_shas: Vec<String> =
                        extra_parents.iter().map(|&p| graph.node(p).sha.clone()).collect();
                    actions.push(Action::MergeCloned {
                        path: directives.dst_path.clone(),
                        commit_sha: sha.clone(),
                        message: meta.message.clone(),
                        extra_parents: extra_parent_shas,
                    });
                }

                actions.push(Action::ResetAuthor {});
                actions.push(Action::ResetCommitter {});
            } else {
                actions.push(set_committer_action(&meta));
                actions.push(Action::CherryPick {
                    path: directives.dst_path.clone(),
                    commit_sha: sha.clone(),
                    message: meta.message.clone(),
                });
                actions.push(Action::ResetCommitter {});
            }

            let heads = graph.node(idx).heads.clone();
            for head in &heads {
                if head.full_path.starts_with("refs/tags/") {
                    actions.push(Action::CreateTag { path: directives.dst_path.clone(), name: head.name.clone() });
                } else {
                    actions.push(Action::CreateHead { path: directives.dst_path.clone(), name: head.name.clone() });
                }
            }
        }

        // --- Break ---
        if directives.breaks.contains(&sha) {
            used_breaks.insert(sha.clone());
            if at_least_one_in_trunk {
                actions.push(Action::Interrupt { reason: format!("break requested at {sha}") });
                actions.push(set_committer_action(&meta));
                actions.push(Action::ContinueCommitting { path: directives.dst_path.clone(), commit_sha: sha.clone() });
                actions.push(Action::ResetCommitter {});
            } else {
                log::warn!("break at {sha} ignored: no trunk established yet");
            }
        }

        prev = Some(idx);
    }

    // --- Postamble ---
    for k in 0..orphan_counter {
        actions.push(Action::DeleteHead {
            path: directives.dst_path.clone(),
            name: format!("__orphan__{k}"),
        });
    }

    for i in graph.all_indices() {
        let node = graph.node(i);
        for head in &node.heads {
            if head.full_path.starts_with("refs/tags/") && (!node.processed || node.skipped) {
                actions.push(Action::DeleteTag { path: directives.dst_path.clone(), name: head.name.clone() });
            }
        }
    }

    let head_sha = repo.head()?;
    actions.push(Action::CheckoutCloned { path: directives.dst_path.clone(), commit_sha: head_sha });
    actions.push(Action::RemoveRemote { path: directives.dst_path.clone(), name: CLONED_REMOTE.to_string() });
    actions.push(Action::CollectGarbage { path: directives.dst_path.clone() });

    for idx in graph.all_indices() {
        let node = graph.node(idx);
        if !node.processed {
            log::warn!("Commit {} was not cloned!", node.sha);
        }
    }

    let unused_breaks: Vec<String> = directives.breaks.difference(&used_breaks).cloned().collect();
    if !unused_breaks.is_empty() {
        return Err(PlanError::UnusedBreaks(unused_breaks));
    }
    let unused_skips: Vec<String> = directives.skips.difference(&used_skips).cloned().collect();
    if !unused_skips.is_empty() {
        return Err(PlanError::UnusedSkips(unused_skips));
    }
    let all_insertion_shas: HashSet<String> = directives.insertions.iter().map(|(s, _)| s.clone()).collect();
    let unused_insertions: Vec<String> =
        all_insertion_shas.difference(&used_insertion_shas).cloned().collect();
    if !unused_insertions.is_empty() {
        return Err(PlanError::UnusedInsertions(unused_insertions));
    }

    Ok(actions)
}

fn set_author_action(meta: &crate::source_repo::CommitMeta) -> Action {
    let (ts, off) = crate::identity::parse_git_date(&meta.author_date)
        .unwrap_or((0, 0));
    Action::SetAuthor {
        author_name: meta.author_name.clone(),
        author_email: meta.author_email.clone(),
        authored_date: ts,
        author_tz_offset: off,
    }
}

fn set_committer_action(meta: &crate::source_repo::CommitMeta) -> Action {
    let (ts, off) = crate::identity::parse_git_date(&meta.committer_date)
        .unwrap_or((0, 0));
    Action::SetCommitter {
        committer_name: meta.committer_name.clone(),
        committer_email: meta.committer_email.clone(),
        committed_date: ts,
        committer_tz_offset: off,
    }
}

/// Skip-closure DFS (spec.md §4.2b): replace a skipped ancestor with its own
/// actual parents, recursively, preserving the original parent's relative
/// priority. Returns `[]` iff every ancestor is skipped.
fn get_actual_parents(graph: &CommitGraph, start: usize) -> Vec<usize> {
    if !graph.node(start).skipped {
        return vec![start];
    }
    let mut out = Vec::new();
    for &p in &graph.node(start).parents {
        out.extend(get_actual_parents(graph, p));
    }
    out
}

/// Detect whether a two-parent merge looks like `git subtree add --prefix=P`
/// (spec.md §4.2a). `second_parent_sha` is the tip of the history being
/// folded in. Diffing it against the merge (`parent[1].diff(c)`) shows the
/// imported files as renames root -> `P/`, which locates the candidate
/// prefix; every blob in the second parent's tree is then expected to show
/// up renamed or newly-added under that prefix, tolerating a handful of
/// mismatches.
fn detect_subtree<R: SourceRepo>(
    repo: &R,
    second_parent_sha: &str,
    merge_sha: &str,
) -> Result<Option<String>, SourceRepoError> {
    let diff = repo.diff_name_status(second_parent_sha, merge_sha)?;
    let Some(prefix) = find_subtree_prefix(&diff) else {
        return Ok(None);
    };

    let second_parent_tree = repo.tree_paths(second_parent_sha)?;
    if is_subtree_against_parent_tree(&diff, &second_parent_tree, &prefix) {
        Ok(Some(prefix))
    } else {
        Ok(None)
    }
}

fn find_subtree_prefix(diff: &[DiffEntry]) -> Option<String> {
    for entry in diff {
        if let DiffStatus::Renamed { from } = &entry.status {
            if entry.path.len() > from.len() && entry.path.ends_with(from.as_str()) {
                return Some(entry.path[..entry.path.len() - from.len()].to_string());
            }
        }
    }
    None
}

fn is_subtree_against_parent_tree(
    diff: &[DiffEntry],
    parent_tree_paths: &[String],
    prefix: &str,
) -> bool {
    let renamed: HashMap<&str, &str> = diff
        .iter()
        .filter_map(|e| match &e.status {
            DiffStatus::Renamed { from } => Some((from.as_str(), e.path.as_str())),
            _ => None,
        })
        .collect();
    let added: HashSet<&str> = diff
        .iter()
        .filter(|e| e.status == DiffStatus::Added)
        .map(|e| e.path.as_str())
        .collect();

    let mut mismatches = 0usize;
    for path in parent_tree_paths {
        let expected_new = format!("{prefix}{path}");
        let matches_rename = renamed.get(path.as_str()) == Some(&expected_new.as_str());
        let matches_new_file = added.contains(expected_new.as_str());
        if !matches_rename && !matches_new_file {
            mismatches += 1;
            if mismatches > SUBTREE_ACCEPTABLE_MISMATCHES {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::build_git_graph;
    use crate::source_repo::{CommitMeta, MockSourceRepo};

    fn base_directives(dst: &str) -> PlanDirectives {
        PlanDirectives {
            main_stream_anchor: None,
            breaks: HashSet::new(),
            skips: HashSet::new(),
            insertions: Vec::new(),
            src_remote_address: "/src".to_string(),
            dst_path: PathBuf::from(dst),
        }
    }

    fn linear_repo() -> MockSourceRepo {
        MockSourceRepo::new()
            .with_commit("a", CommitMeta { message: "A".into(), ..Default::default() })
            .with_commit_parents("b", vec!["a"])
            .with_commit_parents("c", vec!["b"])
            .with_ref("refs/heads/main", "c")
    }

    #[test]
    fn linear_history_cherry_picks_each_commit() {
        let repo = linear_repo();
        let mut graph = build_git_graph(&repo, false, false, None).unwrap();
        let directives = base_directives("/tmp/out");

        let actions = build_plan(&repo, &mut graph, &directives).unwrap();
        let cherry_picks = actions
            .iter()
            .filter(|a| matches!(a, Action::CherryPick { .. }))
            .count();
        assert_eq!(cherry_picks, 3);
    }

    #[test]
    fn skip_marks_node_and_counts_as_used() {
        let repo = linear_repo();
        let mut graph = build_git_graph(&repo, false, false, None).unwrap();
        let mut directives = base_directives("/tmp/out");
        directives.skips.insert("b".to_string());

        let actions = build_plan(&repo, &mut graph, &directives).unwrap();
        let cherry_picks = actions
            .iter()
            .filter(|a| matches!(a, Action::CherryPick { .. }))
            .count();
        assert_eq!(cherry_picks, 2, "b should not be cherry-picked");
        assert!(graph.get("b").unwrap().skipped);
    }

    #[test]
    fn unused_skip_is_an_error() {
        let repo = linear_repo();
        let mut graph = build_git_graph(&repo, false, false, None).unwrap();
        let mut directives = base_directives("/tmp/out");
        directives.skips.insert("nonexistent".to_string());

        let err = build_plan(&repo, &mut graph, &directives).unwrap_err();
        assert!(matches!(err, PlanError::UnusedSkips(_)));
    }

    #[test]
    fn main_stream_filter_copies_unrelated_root_as_is() {
        let repo = MockSourceRepo::new()
            .with_commit("a", CommitMeta { message: "A".into(), ..Default::default() })
            .with_commit_parents("b", vec!["a"])
            .with_commit("r", CommitMeta { message: "R".into(), ..Default::default() })
            .with_ref("refs/heads/main", "b")
            .with_ref("refs/heads/other", "r");
        let mut graph = build_git_graph(&repo, false, false, None).unwrap();
        let mut directives = base_directives("/tmp/out");
        directives.main_stream_anchor = Some("a".to_string());

        build_plan(&repo, &mut graph, &directives).unwrap();
        assert_eq!(graph.get("r").unwrap().cloned_sha.as_deref(), Some("r"));
    }

    #[test]
    fn skip_closure_returns_empty_when_every_ancestor_skipped() {
        let repo = linear_repo();
        let mut graph = build_git_graph(&repo, false, false, None).unwrap();
        let a = graph.index_of("a").unwrap();
        let b = graph.index_of("b").unwrap();
        graph.node_mut(a).skipped = true;
        graph.node_mut(b).skipped = true;
        assert!(get_actual_parents(&graph, b).is_empty());
    }
}
