//! Grouping of atom indices into perturbation groups and the canonical
//! reordering derived from them.
//!
//! A [Partition] maps each representative atom to the atoms that are
//! symmetry-equivalent to it (the representative included). [Partition::reindex]
//! turns it into a [Reindex] for a structure with a known number of atoms,
//! which places every group contiguously, in ascending order of the
//! representative index, followed by the ungrouped atoms in their original
//! order.

use std::{collections::BTreeMap, error::Error, fmt::Display};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

#[cfg(test)]
mod tests;

#[derive(Debug, PartialEq, Eq, Clone)]
pub enum PartitionError {
    /// `index` is a member of both the `first` and `second` groups
    Overlap {
        index: usize,
        first: usize,
        second: usize,
    },

    /// `index` appears more than once in `group`
    Duplicate { group: usize, index: usize },

    /// `index` in `group` is not a valid index for `natoms` atoms
    OutOfRange {
        group: usize,
        index: usize,
        natoms: usize,
    },

    /// the representative `group` is not a member of its own group
    MissingRepresentative { group: usize },

    /// a group key in a serialized partition is not an atom index
    BadKey(String),

    /// a per-atom array does not have one entry per atom
    LengthMismatch { expected: usize, got: usize },
}

impl Display for PartitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionError::Overlap {
                index,
                first,
                second,
            } => write!(
                f,
                "atom {index} belongs to both group {first} and group {second}"
            ),
            PartitionError::Duplicate { group, index } => {
                write!(f, "atom {index} is repeated in group {group}")
            }
            PartitionError::OutOfRange {
                group,
                index,
                natoms,
            } => write!(
                f,
                "atom {index} in group {group} is out of range for \
                 {natoms} atoms"
            ),
            PartitionError::MissingRepresentative { group } => write!(
                f,
                "representative atom {group} is not a member of its own group"
            ),
            PartitionError::BadKey(k) => {
                write!(f, "group key `{k}` is not an atom index")
            }
            PartitionError::LengthMismatch { expected, got } => write!(
                f,
                "expected one value per atom ({expected}), found {got}"
            ),
        }
    }
}

impl Error for PartitionError {}

/// A validated set of disjoint perturbation groups, keyed by representative
/// atom index. Iteration is always in ascending key order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "BTreeMap<String, Vec<usize>>",
    into = "BTreeMap<String, Vec<usize>>"
)]
pub struct Partition {
    groups: BTreeMap<usize, Vec<usize>>,
}

impl Partition {
    /// Build a [Partition] from `(representative, members)` pairs. Rejects
    /// duplicate members within a group, members shared between groups, and
    /// representatives missing from their own group. A repeated
    /// representative key is reported as an overlap of the representative
    /// with itself.
    pub fn new(
        groups: impl IntoIterator<Item = (usize, Vec<usize>)>,
    ) -> Result<Self, PartitionError> {
        let mut map: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (key, members) in groups {
            if map.insert(key, members).is_some() {
                return Err(PartitionError::Overlap {
                    index: key,
                    first: key,
                    second: key,
                });
            }
        }

        // index -> group that claimed it first
        let mut owner: FxHashMap<usize, usize> = FxHashMap::default();
        for (&key, members) in &map {
            for &index in members {
                match owner.insert(index, key) {
                    Some(prev) if prev == key => {
                        return Err(PartitionError::Duplicate {
                            group: key,
                            index,
                        });
                    }
                    Some(prev) => {
                        return Err(PartitionError::Overlap {
                            index,
                            first: prev,
                            second: key,
                        });
                    }
                    None => {}
                }
            }
            if !members.contains(&key) {
                return Err(PartitionError::MissingRepresentative {
                    group: key,
                });
            }
        }

        Ok(Self { groups: map })
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// the number of groups
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// the representative indices in ascending order
    pub fn representatives(&self) -> impl Iterator<Item = usize> + '_ {
        self.groups.keys().copied()
    }

    /// `(representative, members)` in ascending representative order
    pub fn groups(&self) -> impl Iterator<Item = (usize, &[usize])> {
        self.groups.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    /// the members of the group represented by `key`, if any
    pub fn group(&self, key: usize) -> Option<&[usize]> {
        self.groups.get(&key).map(Vec::as_slice)
    }

    /// the total number of grouped atoms
    pub fn grouped(&self) -> usize {
        self.groups.values().map(Vec::len).sum()
    }

    /// Compute the canonical order for a structure of `natoms` atoms. Fails
    /// if any member index is not below `natoms`.
    pub fn reindex(&self, natoms: usize) -> Result<Reindex, PartitionError> {
        for (&group, members) in &self.groups {
            if let Some(&index) = members.iter().find(|&&i| i >= natoms) {
                return Err(PartitionError::OutOfRange {
                    group,
                    index,
                    natoms,
                });
            }
        }

        let mut order = Vec::with_capacity(natoms);
        let mut reps = Vec::with_capacity(self.groups.len());
        let mut seen = vec![false; natoms];
        for (&key, members) in &self.groups {
            for &m in members {
                if m == key {
                    reps.push((key, order.len()));
                }
                seen[m] = true;
                order.push(m);
            }
        }
        let grouped = order.len();
        order.extend((0..natoms).filter(|&i| !seen[i]));

        Ok(Reindex {
            order,
            reps,
            grouped,
        })
    }
}

impl TryFrom<BTreeMap<String, Vec<usize>>> for Partition {
    type Error = PartitionError;

    fn try_from(
        value: BTreeMap<String, Vec<usize>>,
    ) -> Result<Self, Self::Error> {
        let mut groups = Vec::with_capacity(value.len());
        for (k, v) in value {
            let key = k
                .trim()
                .parse::<usize>()
                .map_err(|_| PartitionError::BadKey(k.clone()))?;
            groups.push((key, v));
        }
        Self::new(groups)
    }
}

impl From<Partition> for BTreeMap<String, Vec<usize>> {
    fn from(value: Partition) -> Self {
        value
            .groups
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }
}

/// One perturbation calculation, derived from a single representative
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Perturbation {
    /// 1-based position of the representative among all representatives.
    /// This is both the tag value and the suffix of the perturbation
    /// directory
    pub number: usize,

    /// index of the representative in the original structure
    pub representative: usize,

    /// index of the representative in canonical order
    pub position: usize,
}

/// The canonical order computed by [Partition::reindex]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reindex {
    order: Vec<usize>,

    /// (representative, canonical position) in ascending representative
    /// order
    reps: Vec<(usize, usize)>,

    grouped: usize,
}

impl Reindex {
    /// the permutation: `order()[i]` is the original index of the atom placed
    /// at position `i`
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// the number of grouped atoms. these occupy positions `0..grouped()`
    pub fn grouped(&self) -> usize {
        self.grouped
    }

    /// Apply the canonical order to a per-atom array, so that
    /// `new[i] = old[order[i]]`
    pub fn permute<T: Clone>(&self, old: &[T]) -> Result<Vec<T>, PartitionError> {
        if old.len() != self.order.len() {
            return Err(PartitionError::LengthMismatch {
                expected: self.order.len(),
                got: old.len(),
            });
        }
        Ok(self.order.iter().map(|&i| old[i].clone()).collect())
    }

    /// the canonical position of the atom originally at `index`
    pub fn position(&self, index: usize) -> Option<usize> {
        self.order.iter().position(|&i| i == index)
    }

    /// the perturbations in ascending representative order
    pub fn perturbations(
        &self,
    ) -> impl ExactSizeIterator<Item = Perturbation> + '_ {
        self.reps
            .iter()
            .enumerate()
            .map(|(i, &(representative, position))| Perturbation {
                number: i + 1,
                representative,
                position,
            })
    }

    /// The tag array, in canonical order, for the `nth` (0-based)
    /// representative: `nth + 1` on that representative and 0 everywhere
    /// else. Returns `None` if there is no such representative.
    pub fn tags(&self, nth: usize) -> Option<Vec<usize>> {
        let &(_, pos) = self.reps.get(nth)?;
        let mut tags = vec![0; self.order.len()];
        tags[pos] = nth + 1;
        Some(tags)
    }
}
