//! The commit-graph model and topological numbering (spec §4.1).
//!
//! Ported from `common/git_tools.py`'s `co_build_git_graph`: an iterative
//! DFS over parent edges, seeded from the selected refs, that assigns each
//! commit a topological serial (`num`) only once every one of its parents
//! has been linked *and* numbered, and ORs a per-root bitmask (`roots`)
//! down through the graph as it goes.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::source_repo::{RepoRef, SourceRepo, SourceRepoError};

/// Iterations Between Yields of the graph-building walk (spec §4.1 step 5).
pub const GGB_IBY: u32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error(transparent)]
    Repo(#[from] SourceRepoError),
    #[error("unknown reference(s): {0}")]
    UnknownReferences(String),
    #[error("more than 64 history roots discovered; the roots bitmask cannot represent a main-stream filter for all of them")]
    TooManyRoots,
}

/// One commit in the graph, keyed by the arena index assigned during the
/// build. Parents/children are indices into the same arena, never
/// pointers, so the graph is trivially serializable by SHA alone.
#[derive(Debug, Clone)]
pub struct CommitNode {
    pub sha: String,
    pub parents: Vec<usize>,
    pub children: Vec<usize>,
    pub heads: Vec<RepoRef>,
    /// Topological serial; `None` until every parent has been linked and numbered.
    pub num: Option<usize>,
    /// Bit *i* set iff this commit descends from the *i*-th discovered root.
    pub roots: u64,
    /// The SHA produced in the destination repo, once cloned.
    pub cloned_sha: Option<String>,
    pub processed: bool,
    pub skipped: bool,
}

impl CommitNode {
    fn new(sha: String) -> Self {
        Self {
            sha,
            parents: Vec::new(),
            children: Vec::new(),
            heads: Vec::new(),
            num: None,
            roots: 0,
            cloned_sha: None,
            processed: false,
            skipped: false,
        }
    }
}

/// The built commit graph: an arena of nodes plus a SHA index.
#[derive(Debug, Default)]
pub struct CommitGraph {
    nodes: Vec<CommitNode>,
    index: HashMap<String, usize>,
}

impl CommitGraph {
    pub fn node(&self, idx: usize) -> &CommitNode {
        &self.nodes[idx]
    }

    pub fn node_mut(&mut self, idx: usize) -> &mut CommitNode {
        &mut self.nodes[idx]
    }

    pub fn index_of(&self, sha: &str) -> Option<usize> {
        self.index.get(sha).copied()
    }

    pub fn get(&self, sha: &str) -> Option<&CommitNode> {
        self.index.get(sha).map(|&i| &self.nodes[i])
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn all_indices(&self) -> impl Iterator<Item = usize> {
        0..self.nodes.len()
    }

    /// All commit indices ordered ascending by topological `num`.
    /// Commits without a `num` (should not happen once a build completes
    /// without cycles) sort last, in arena order.
    pub fn ordered_by_num(&self) -> Vec<usize> {
        let mut idxs: Vec<usize> = self.all_indices().collect();
        idxs.sort_by_key(|&i| self.nodes[i].num.unwrap_or(usize::MAX));
        idxs
    }
}

enum Phase {
    NextRef,
    Draining,
    Finished,
}

/// A cooperative, resumable driver for the graph-building walk (spec §4.1,
/// §9's "express as an iterator that produces progress tokens" note).
/// `Iterator::next()` performs up to [`GGB_IBY`] units of work and returns
/// `Some(())` if more remains, `None` once the walk is complete. Callers
/// that don't care about incremental progress just drain it:
/// `for _ in builder {}`.
pub struct GraphBuilder<'a, R: SourceRepo> {
    repo: &'a R,
    skip_remotes: bool,
    skip_stashes: bool,
    requested_refs: Option<HashSet<String>>,
    pending_refs: VecDeque<RepoRef>,
    build_stack: Vec<(String, usize)>,
    to_enum: Option<usize>,
    root_bit: u64,
    next_num: usize,
    graph: CommitGraph,
    phase: Phase,
    error: Option<GraphError>,
}

impl<'a, R: SourceRepo> GraphBuilder<'a, R> {
    pub fn new(
        repo: &'a R,
        skip_remotes: bool,
        skip_stashes: bool,
        refs: Option<HashSet<String>>,
    ) -> Result<Self, GraphError> {
        let all_refs = repo.references()?;
        Ok(Self {
            repo,
            skip_remotes,
            skip_stashes,
            requested_refs: refs,
            pending_refs: all_refs.into_iter().collect(),
            build_stack: Vec::new(),
            to_enum: None,
            root_bit: 1,
            next_num: 0,
            graph: CommitGraph::default(),
            phase: Phase::NextRef,
            error: None,
        })
    }

    /// Run to completion, returning the built graph.
    pub fn build(mut self) -> Result<CommitGraph, GraphError> {
        while self.step_chunk()? {}
        self.finish()
    }

    fn finish(mut self) -> Result<CommitGraph, GraphError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        if let Some(refs) = &self.requested_refs {
            if !refs.is_empty() {
                let mut missing: Vec<&str> = refs.iter().map(String::as_str).collect();
                missing.sort_unstable();
                return Err(GraphError::UnknownReferences(missing.join(", ")));
            }
        }
        Ok(self.graph)
    }

    fn wanted(&mut self, r: &RepoRef) -> bool {
        if self.skip_remotes && r.full_path.starts_with("refs/remotes/") {
            return false;
        }
        if self.skip_stashes && r.full_path.starts_with("refs/stash") {
            return false;
        }
        match &mut self.requested_refs {
            None => true,
            Some(set) => set.remove(&r.full_path),
        }
    }

    fn get_or_create(&mut self, sha: &str) -> usize {
        if let Some(&idx) = self.graph.index.get(sha) {
            return idx;
        }
        let idx = self.graph.nodes.len();
        self.graph.nodes.push(CommitNode::new(sha.to_string()));
        self.graph.index.insert(sha.to_string(), idx);
        idx
    }

    /// Perform up to `GGB_IBY` units of work. Returns `Ok(true)` if more
    /// work remains, `Ok(false)` once the walk is complete. On error,
    /// stashes it and reports "finished" so the caller stops iterating;
    /// `finish()`/`build()` surface the stashed error.
    fn step_chunk(&mut self) -> Result<bool, GraphError> {
        let mut budget = GGB_IBY;

        loop {
            if budget == 0 {
                return Ok(true);
            }

            match self.phase {
                Phase::Finished => return Ok(false),
                Phase::NextRef => {
                    let Some(head) = self.pending_refs.pop_front() else {
                        self.phase = Phase::Finished;
                        return Ok(false);
                    };

                    if !self.wanted(&head) {
                        continue;
                    }

                    let head_idx = if let Some(&idx) = self.graph.index.get(&head.target_sha) {
                        self.graph.nodes[idx].heads.push(head.clone());
                        // Already enumerated via another ref: nothing more to seed.
                        self.phase = Phase::Draining;
                        idx
                    } else {
                        let idx = self.get_or_create(&head.target_sha);
                        self.graph.nodes[idx].heads.push(head.clone());
                        match self.repo.parents(&head.target_sha) {
                            Ok(parents) => {
                                // Pushed in reverse so the LIFO pop order below
                                // restores true git parent order (first parent
                                // first) in `CommitNode::parents`.
                                for p in parents.into_iter().rev() {
                                    self.build_stack.push((p, idx));
                                }
                            }
                            Err(e) => {
                                self.error = Some(e.into());
                                self.phase = Phase::Finished;
                                return Ok(false);
                            }
                        }
                        self.phase = Phase::Draining;
                        idx
                    };
                    let _ = head_idx;
                }
                Phase::Draining => {
                    if let Some(e) = self.to_enum.take() {
                        self.number_one(e);
                        budget -= 1;
                        continue;
                    }
                    let Some((parent_sha, child_idx)) = self.build_stack.pop() else {
                        self.phase = Phase::NextRef;
                        continue;
                    };

                    let parent_idx = if let Some(&idx) = self.graph.index.get(&parent_sha) {
                        // Parent already known: numbering must (re-)start from the
                        // child, since the parent's roots mask may need propagating.
                        self.to_enum = Some(child_idx);
                        let parent_roots = self.graph.nodes[idx].roots;
                        self.graph.nodes[child_idx].roots |= parent_roots;
                        idx
                    } else {
                        let idx = self.get_or_create(&parent_sha);
                        match self.repo.parents(&parent_sha) {
                            Ok(grandparents) => {
                                if grandparents.is_empty() {
                                    if self.root_bit == 0 {
                                        self.error = Some(GraphError::TooManyRoots);
                                        self.phase = Phase::Finished;
                                        return Ok(false);
                                    }
                                    self.graph.nodes[idx].roots = self.root_bit;
                                    self.root_bit = self.root_bit.checked_shl(1).unwrap_or(0);
                                    self.to_enum = Some(idx);
                                } else {
                                    for gp in grandparents.into_iter().rev() {
                                        self.build_stack.push((gp, idx));
                                    }
                                }
                            }
                            Err(e) => {
                                self.error = Some(e.into());
                                self.phase = Phase::Finished;
                                return Ok(false);
                            }
                        }
                        idx
                    };

                    self.graph.nodes[parent_idx].children.push(child_idx);
                    self.graph.nodes[child_idx].parents.push(parent_idx);

                    budget -= 1;
                }
            }
        }
    }

    /// Number a single commit if all of its parents are linked, propagating
    /// `roots` to children and continuing along the first unnumbered child.
    fn number_one(&mut self, idx: usize) {
        let sha = self.graph.nodes[idx].sha.clone();
        let actual_parent_count = match self.repo.parents(&sha) {
            Ok(p) => p.len(),
            Err(e) => {
                self.error = Some(e.into());
                self.phase = Phase::Finished;
                return;
            }
        };

        if self.graph.nodes[idx].parents.len() != actual_parent_count {
            return;
        }

        self.graph.nodes[idx].num = Some(self.next_num);
        self.next_num += 1;

        let roots = self.graph.nodes[idx].roots;
        let children = self.graph.nodes[idx].children.clone();
        let mut continue_from = None;
        for &c in &children {
            self.graph.nodes[c].roots |= roots;
            if continue_from.is_none() && self.graph.nodes[c].num.is_none() {
                continue_from = Some(c);
            }
        }
        self.to_enum = continue_from;
    }
}

impl<'a, R: SourceRepo> Iterator for GraphBuilder<'a, R> {
    type Item = ();

    fn next(&mut self) -> Option<()> {
        match self.step_chunk() {
            Ok(true) => Some(()),
            Ok(false) => None,
            Err(_) => None,
        }
    }
}

/// Build the commit graph reachable from the selected refs.
pub fn build_git_graph<R: SourceRepo>(
    repo: &R,
    skip_remotes: bool,
    skip_stashes: bool,
    refs: Option<HashSet<String>>,
) -> Result<CommitGraph, GraphError> {
    GraphBuilder::new(repo, skip_remotes, skip_stashes, refs)?.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source_repo::{CommitMeta, MockSourceRepo};

    fn linear_repo() -> MockSourceRepo {
        // A -> B -> C, main points at C.
        MockSourceRepo::new()
            .with_commit("a", CommitMeta::default())
            .with_commit_parents("b", vec!["a"])
            .with_commit_parents("c", vec!["b"])
            .with_ref("refs/heads/main", "c")
    }

    #[test]
    fn topological_order_and_roots() {
        let repo = linear_repo();
        let graph = build_git_graph(&repo, false, false, None).unwrap();

        let a = graph.get("a").unwrap();
        let b = graph.get("b").unwrap();
        let c = graph.get("c").unwrap();

        assert_eq!(a.num, Some(0));
        assert_eq!(b.num, Some(1));
        assert_eq!(c.num, Some(2));
        assert_ne!(a.roots, 0);
        assert_eq!(a.roots, b.roots);
        assert_eq!(b.roots, c.roots);
    }

    #[test]
    fn disjoint_histories_get_distinct_root_bits() {
        let repo = MockSourceRepo::new()
            .with_commit("r1", CommitMeta::default())
            .with_commit("r2", CommitMeta::default())
            .with_commit_parents("m", vec!["r1", "r2"])
            .with_ref("refs/heads/main", "m");

        let graph = build_git_graph(&repo, false, false, None).unwrap();
        let r1 = graph.get("r1").unwrap();
        let r2 = graph.get("r2").unwrap();
        let m = graph.get("m").unwrap();

        assert_ne!(r1.roots, r2.roots);
        assert_eq!(m.roots, r1.roots | r2.roots);
    }

    #[test]
    fn unknown_ref_is_an_error() {
        let repo = linear_repo();
        let mut refs = HashSet::new();
        refs.insert("refs/heads/nonexistent".to_string());
        let err = build_git_graph(&repo, false, false, Some(refs)).unwrap_err();
        assert!(matches!(err, GraphError::UnknownReferences(_)));
    }

    #[test]
    fn disconnected_roots_share_no_bit_unless_merged() {
        let repo = MockSourceRepo::new()
            .with_commit("root_a", CommitMeta::default())
            .with_commit("root_b", CommitMeta::default())
            .with_ref("refs/heads/a", "root_a")
            .with_ref("refs/heads/b", "root_b");

        let graph = build_git_graph(&repo, false, false, None).unwrap();
        let a = graph.get("root_a").unwrap();
        let b = graph.get("root_b").unwrap();
        assert_ne!(a.roots, b.roots);
        assert_eq!(a.roots & b.roots, 0);
    }

    #[test]
    fn merge_parents_keep_first_parent_order() {
        let repo = MockSourceRepo::new()
            .with_commit("r1", CommitMeta::default())
            .with_commit("r2", CommitMeta::default())
            .with_commit_parents("m", vec!["r1", "r2"])
            .with_ref("refs/heads/main", "m");

        let graph = build_git_graph(&repo, false, false, None).unwrap();
        let m = graph.get("m").unwrap();
        let r1_idx = graph.index_of("r1").unwrap();
        let r2_idx = graph.index_of("r2").unwrap();
        assert_eq!(m.parents, vec![r1_idx, r2_idx]);
    }
}
