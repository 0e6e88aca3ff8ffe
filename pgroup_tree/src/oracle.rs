//! Structural equivalence oracle.
//!
//! The oracle fingerprints a reconstructed tree with a Weisfeiler-Lehman
//! style refinement. Every node starts from a label, its role or its degree
//! depending on [`Mode`]. For each round the label is folded together with
//! the sorted multiset of its neighbours' labels, each tagged with direction
//! and, in [`Mode::Labeled`], relation type. The sorted multiset of every
//! label seen in every round is then hashed into one `u64`.
//!
//! No pid enters a label, so relabeling a snapshot must not move the hash.
//! The converse does not hold: equal hashes are strong but not conclusive
//! evidence of isomorphism.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;
use serde::{Deserialize, Serialize};

use crate::{
    graph::Graph,
    reconstruct::{EdgeKind, NodeId, Tree},
};

fn default_iterations() -> u32 {
    3
}

/// Which attributes take part in refinement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Node roles and edge relation types are part of every label
    #[default]
    Labeled,
    /// Only shape counts: nodes start from their degree, edges are untyped
    Unlabeled,
}

/// Configuration of the [`Oracle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Number of refinement rounds. Zero compares initial labels only.
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Label-aware or label-blind refinement
    #[serde(default)]
    pub mode: Mode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            mode: Mode::default(),
        }
    }
}

/// Outcome of comparing two trees.
///
/// Two trees are equivalent when their hashes are bit-identical. Otherwise
/// [`Verdict::score`] is nonzero. The score only signals a difference; its
/// magnitude carries no meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Verdict {
    /// Hash of the left tree
    pub left: u64,
    /// Hash of the right tree
    pub right: u64,
}

impl Verdict {
    /// Dissimilarity score, zero if and only if the hashes are equal.
    #[must_use]
    pub const fn score(&self) -> u64 {
        self.left.abs_diff(self.right)
    }

    /// Whether the two trees hashed identically.
    #[must_use]
    pub const fn is_equivalent(&self) -> bool {
        self.left == self.right
    }
}

/// The structural equivalence oracle
#[derive(Debug, Clone, Copy, Default)]
pub struct Oracle {
    config: Config,
}

fn digest<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = FxHasher::default();
    value.hash(&mut hasher);
    hasher.finish()
}

const OUTGOING: u8 = 0;
const INCOMING: u8 = 1;

impl Oracle {
    /// Create a new [`Oracle`]
    #[must_use]
    pub const fn new(config: Config) -> Self {
        Self { config }
    }

    /// Summary hash of `graph`.
    #[must_use]
    pub fn hash(&self, graph: &Graph) -> u64 {
        let count = graph.node_count();
        let mut labels: Vec<u64> = (0..count).map(|id| self.initial(graph, id)).collect();
        let mut seen: Vec<u64> = labels.clone();
        for _ in 0..self.config.iterations {
            labels = (0..count).map(|id| self.refine(graph, &labels, id)).collect();
            seen.extend_from_slice(&labels);
        }
        seen.sort_unstable();
        digest(&(count, graph.edges().len(), seen))
    }

    /// Summary hash of `tree`.
    #[must_use]
    pub fn hash_tree(&self, tree: &Tree) -> u64 {
        self.hash(&tree.graph())
    }

    /// Compare two trees.
    #[must_use]
    pub fn compare(&self, left: &Tree, right: &Tree) -> Verdict {
        Verdict {
            left: self.hash_tree(left),
            right: self.hash_tree(right),
        }
    }

    fn initial(&self, graph: &Graph, id: NodeId) -> u64 {
        match self.config.mode {
            Mode::Labeled => digest(graph.nodes()[id].role.as_str()),
            Mode::Unlabeled => digest(&(graph.successors(id).len(), graph.predecessors(id).len())),
        }
    }

    fn edge(&self, kind: EdgeKind) -> u64 {
        match self.config.mode {
            Mode::Labeled => digest(kind.as_str()),
            Mode::Unlabeled => 0,
        }
    }

    fn refine(&self, graph: &Graph, labels: &[u64], id: NodeId) -> u64 {
        let mut neighbourhood: Vec<(u8, u64, u64)> = graph
            .successors(id)
            .iter()
            .map(|&(to, kind)| (OUTGOING, self.edge(kind), labels[to]))
            .chain(
                graph
                    .predecessors(id)
                    .iter()
                    .map(|&(from, kind)| (INCOMING, self.edge(kind), labels[from])),
            )
            .collect();
        neighbourhood.sort_unstable();
        digest(&(labels[id], neighbourhood))
    }
}
