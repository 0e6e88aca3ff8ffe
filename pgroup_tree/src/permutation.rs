//! The permutation experiment.
//!
//! Takes one snapshot, relabels it over and over and checks that every
//! relabeled copy reconstructs to a tree the [`Oracle`] cannot tell apart
//! from the original. Relabelings are chained: permutation `n` is applied to
//! the output of permutation `n - 1`, never to the base snapshot, so a bug
//! that only shows up after several moves still gets a chance to.

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    oracle::{self, Oracle},
    reconstruct::reconstruct,
    relabel::Relabeling,
    snapshot::{Pid, Snapshot},
};

fn default_iterations() -> usize {
    20
}

/// Configuration of the permutation experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Number of successive relabelings to check
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    /// Whether relabeled ids are also offset out of the snapshot's range
    #[serde(default)]
    pub shift: bool,
    /// Configuration of the structural oracle
    #[serde(default)]
    pub oracle: oracle::Config,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            shift: false,
            oracle: oracle::Config::default(),
        }
    }
}

/// Result of a permutation experiment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    /// Dissimilarity score of each permutation against the base tree
    pub scores: Vec<u64>,
    /// Indexes into `scores` of the permutations that were not equivalent
    pub non_equivalent: Vec<usize>,
    /// Share of permutations that were not equivalent, zero if none ran
    pub fraction: f64,
}

impl Report {
    /// Whether every permutation was equivalent to the base tree.
    #[must_use]
    pub fn all_equivalent(&self) -> bool {
        self.non_equivalent.is_empty()
    }
}

/// Run the permutation experiment over `snapshot`.
///
/// `init_pid` and `0` are never relabeled.
pub fn run<R>(snapshot: &Snapshot, init_pid: Pid, config: &Config, rng: &mut R) -> Report
where
    R: Rng + ?Sized,
{
    let oracle = Oracle::new(config.oracle);
    let base = oracle.hash_tree(&reconstruct(snapshot));

    let mut scores = Vec::with_capacity(config.iterations);
    let mut non_equivalent = Vec::new();
    let mut current = snapshot.clone();
    for index in 0..config.iterations {
        let relabel = Relabeling::random(&current, &[init_pid], config.shift, rng);
        current = relabel.apply(&current);
        let hash = oracle.hash_tree(&reconstruct(&current));
        let verdict = oracle::Verdict {
            left: base,
            right: hash,
        };
        if !verdict.is_equivalent() {
            warn!(
                index,
                score = verdict.score(),
                "relabeled snapshot is not structurally equivalent"
            );
            non_equivalent.push(index);
        }
        scores.push(verdict.score());
    }

    let fraction = if scores.is_empty() {
        0.0
    } else {
        non_equivalent.len() as f64 / scores.len() as f64
    };
    info!(
        permutations = scores.len(),
        non_equivalent = non_equivalent.len(),
        fraction,
        "permutation experiment complete"
    );

    Report {
        scores,
        non_equivalent,
        fraction,
    }
}
