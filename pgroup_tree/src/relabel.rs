//! Pid relabeling.
//!
//! A [`Relabeling`] is a bijection on identifiers applied uniformly to every
//! field of every row of a snapshot. Reconstruction should not care what the
//! numbers are, only how they relate, so a relabeled snapshot must
//! reconstruct to a structurally identical tree. That is the adversarial
//! half of the permutation experiment.
//!
//! Identifiers not in the mapping are left alone. The mapping is built
//! against one snapshot and guarantees it introduces no collisions there: no
//! two identifiers merge and no relabeled id lands on an untouched one.

use std::collections::BTreeSet;

use rand::{Rng, seq::SliceRandom};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::snapshot::{PID_MAX, Pid, Row, Snapshot};

/// Errors produced by [`Relabeling::for_snapshot`]
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Two identifiers would be relabeled to the same value
    #[error("identifiers {first} and {second} both map to {target}")]
    NotInjective {
        /// First source identifier
        first: Pid,
        /// Second source identifier
        second: Pid,
        /// Shared target
        target: Pid,
    },
    /// A relabeled identifier would collide with one left untouched
    #[error("identifier {source_id} maps to {target} which is present and not relabeled")]
    Collision {
        /// Source identifier
        source_id: Pid,
        /// Target identifier, present in the snapshot and not mapped
        target: Pid,
    },
    /// A target lies outside of `[1, PID_MAX)`
    #[error("identifier {source_id} maps to {target}, outside of [1, {PID_MAX})")]
    OutOfRange {
        /// Source identifier
        source_id: Pid,
        /// Target identifier
        target: Pid,
    },
}

/// A collision-free bijection on identifiers, see the module documentation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Relabeling {
    map: FxHashMap<Pid, Pid>,
}

/// Every nonzero identifier mentioned anywhere in `snapshot`, ascending.
fn identifiers(snapshot: &Snapshot) -> BTreeSet<Pid> {
    snapshot
        .rows()
        .iter()
        .flat_map(Row::ids)
        .filter(|id| *id != 0)
        .collect()
}

impl Relabeling {
    /// Build a relabeling of `snapshot` from explicit `(from, to)` pairs.
    ///
    /// # Errors
    ///
    /// Function will error if two sources share a target, if a target is
    /// zero or out of range, or if a target is an identifier of `snapshot`
    /// that is not itself relabeled.
    pub fn for_snapshot<I>(snapshot: &Snapshot, pairs: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (Pid, Pid)>,
    {
        let map: FxHashMap<Pid, Pid> = pairs.into_iter().collect();

        let mut targets: FxHashMap<Pid, Pid> = FxHashMap::default();
        for (&from, &to) in &map {
            if to == 0 || to >= PID_MAX {
                return Err(Error::OutOfRange {
                    source_id: from,
                    target: to,
                });
            }
            if let Some(&first) = targets.get(&to) {
                return Err(Error::NotInjective {
                    first: first.min(from),
                    second: first.max(from),
                    target: to,
                });
            }
            targets.insert(to, from);
        }

        for id in identifiers(snapshot) {
            if map.contains_key(&id) {
                continue;
            }
            if let Some(&from) = targets.get(&id) {
                return Err(Error::Collision {
                    source_id: from,
                    target: id,
                });
            }
        }

        Ok(Self { map })
    }

    /// A uniformly random relabeling of `snapshot`.
    ///
    /// Every nonzero identifier except those in `fixed` is permuted among
    /// the identifiers of the snapshot. When `shift` is set each target is
    /// then offset by a random amount modulo [`PID_MAX`], so long as the
    /// offset value is free; this moves ids outside of the snapshot's
    /// original range.
    pub fn random<R>(snapshot: &Snapshot, fixed: &[Pid], shift: bool, rng: &mut R) -> Self
    where
        R: Rng + ?Sized,
    {
        let sources: Vec<Pid> = identifiers(snapshot)
            .into_iter()
            .filter(|id| !fixed.contains(id))
            .collect();
        let mut targets = sources.clone();
        targets.shuffle(rng);

        if shift {
            let mut taken: FxHashSet<Pid> = targets.iter().copied().collect();
            taken.extend(fixed.iter().copied());
            taken.insert(0);
            for target in &mut targets {
                let offset = rng.random_range(0..PID_MAX);
                let candidate = (*target + offset) % PID_MAX;
                if taken.insert(candidate) {
                    taken.remove(&*target);
                    *target = candidate;
                }
            }
        }

        Self {
            map: sources.into_iter().zip(targets).collect(),
        }
    }

    /// Image of `id`; identifiers outside the mapping map to themselves.
    #[must_use]
    pub fn get(&self, id: Pid) -> Pid {
        self.map.get(&id).copied().unwrap_or(id)
    }

    /// Number of relabeled identifiers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether this relabeling changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Apply to every field of every row, preserving row order.
    #[must_use]
    pub fn apply(&self, snapshot: &Snapshot) -> Snapshot {
        snapshot
            .rows()
            .iter()
            .map(|row| {
                Row::new(
                    self.get(row.pid),
                    self.get(row.pgid),
                    self.get(row.sid),
                    self.get(row.ppid),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::StdRng};

    fn sample() -> Snapshot {
        Snapshot::import([(1, 1, 1, 0), (2, 2, 1, 1), (3, 2, 1, 2), (6, 5, 5, 1)]).unwrap()
    }

    #[test]
    fn explicit_pairs() {
        let snapshot = sample();
        let relabel = Relabeling::for_snapshot(&snapshot, [(2, 3), (3, 2), (6, 600)]).unwrap();
        assert_eq!(
            relabel.apply(&snapshot).export(),
            vec![(1, 1, 1, 0), (3, 3, 1, 1), (2, 3, 1, 3), (600, 5, 5, 1)]
        );
    }

    #[test]
    fn rejects_merges() {
        let err = Relabeling::for_snapshot(&sample(), [(2, 9), (3, 9)]).unwrap_err();
        assert_eq!(
            err,
            Error::NotInjective {
                first: 2,
                second: 3,
                target: 9
            }
        );
    }

    #[test]
    fn rejects_collisions_with_untouched_ids() {
        // 5 appears as a dangling group and session id and is not relabeled.
        let err = Relabeling::for_snapshot(&sample(), [(6, 5)]).unwrap_err();
        assert_eq!(
            err,
            Error::Collision {
                source_id: 6,
                target: 5
            }
        );
    }

    #[test]
    fn rejects_zero() {
        assert!(matches!(
            Relabeling::for_snapshot(&sample(), [(6, 0)]),
            Err(Error::OutOfRange { .. })
        ));
    }

    proptest! {
        #[test]
        fn random_relabeling_is_a_bijection(seed: u64, shift: bool) {
            let snapshot = sample();
            let mut rng = StdRng::seed_from_u64(seed);
            let relabel = Relabeling::random(&snapshot, &[1], shift, &mut rng);

            prop_assert_eq!(relabel.get(1), 1);
            prop_assert_eq!(relabel.get(0), 0);
            // 2, 3, 5 and 6 are relabeled.
            prop_assert_eq!(relabel.len(), 4);

            let images: FxHashSet<Pid> = [2, 3, 5, 6].iter().map(|id| relabel.get(*id)).collect();
            prop_assert_eq!(images.len(), 4);
            prop_assert!(!images.contains(&0));
            prop_assert!(!images.contains(&1));
            prop_assert!(images.iter().all(|id| *id < PID_MAX));
            if !shift {
                prop_assert_eq!(images, [2, 3, 5, 6].into_iter().collect::<FxHashSet<Pid>>());
            }

            // The random relabeling passes its own validation.
            let pairs: Vec<(Pid, Pid)> = [2, 3, 5, 6].iter().map(|id| (*id, relabel.get(*id))).collect();
            prop_assert!(Relabeling::for_snapshot(&snapshot, pairs).is_ok());
        }
    }
}
