// Copyright 2023 The Arbors Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Ordered and permuted selections over a single source.
//!
//! A `Permuted` set reorders the indices of an underlying `Spread`; `perm`
//! holds offsets into the spread, not backing indices. That indirection
//! lets filter-after-sort and remove-after-sort narrow the spread without
//! rebuilding the permutation from scratch.

use itertools::Itertools;
use thiserror::Error;

use super::spread::Spread;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Index {index} out of bounds for a view of {count} trees")]
pub struct IndexOutOfBounds {
    pub index: usize,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IndexSet {
    Ordered(Spread),
    Permuted {
        spread: Spread,
        /// Offsets into `spread`, one per logical position.
        perm: Vec<usize>,
        /// Whether `perm` has been reordered to group by storage batch.
        batch_grouped: bool,
        /// Maps logical positions back into `perm` when `batch_grouped`.
        restore_order: Option<Vec<usize>>,
    },
}

impl IndexSet {
    pub fn full(n: usize) -> IndexSet {
        IndexSet::Ordered(Spread::full(n))
    }

    /// A permuted view; `perm[i]` is the spread offset shown at logical
    /// position `i`.
    pub fn permuted(spread: Spread, perm: Vec<usize>) -> IndexSet {
        debug_assert_eq!(spread.len(), perm.len());
        IndexSet::Permuted {
            spread,
            perm,
            batch_grouped: false,
            restore_order: None,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            IndexSet::Ordered(spread) => spread.len(),
            IndexSet::Permuted { spread, .. } => spread.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn spread(&self) -> &Spread {
        match self {
            IndexSet::Ordered(spread) => spread,
            IndexSet::Permuted { spread, .. } => spread,
        }
    }

    /// The backing index shown at `logical_pos`. For permuted sets this
    /// resolves `restore_order`, then `perm`, then the spread.
    pub fn get_backing_index(&self, logical_pos: usize) -> usize {
        match self {
            IndexSet::Ordered(spread) => spread.get(logical_pos),
            IndexSet::Permuted {
                spread,
                perm,
                restore_order,
                ..
            } => {
                let perm_pos = match restore_order {
                    Some(restore) => restore[logical_pos],
                    None => logical_pos,
                };
                spread.get(perm[perm_pos])
            }
        }
    }

    /// Validates logical positions and translates them to backing indices.
    /// Input is sorted and deduplicated; any position at or past `len`
    /// fails fast.
    pub fn to_backing_indices_for_mutation(
        &self,
        logical: &[usize],
    ) -> Result<Vec<usize>, IndexOutOfBounds> {
        let count = self.len();
        let mut positions = logical.to_vec();
        positions.sort_unstable();
        positions.dedup();
        if let Some(&max) = positions.last() {
            if max >= count {
                return Err(IndexOutOfBounds { index: max, count });
            }
        }
        Ok(positions
            .iter()
            .map(|&pos| self.get_backing_index(pos))
            .collect())
    }

    /// The permutation in logical order, undoing any batch grouping.
    pub fn logical_perm(&self) -> Option<Vec<usize>> {
        match self {
            IndexSet::Ordered(_) => None,
            IndexSet::Permuted {
                perm,
                restore_order,
                ..
            } => match restore_order {
                Some(restore) => Some(restore.iter().map(|&pos| perm[pos]).collect()),
                None => Some(perm.clone()),
            },
        }
    }

    /// Restricts the selection to backing indices in `keep`, preserving
    /// the current logical order. An ordered set narrows its spread; a
    /// permuted set narrows the spread and rebuilds `perm` to skip
    /// dropped offsets.
    pub fn retain_backing(&self, keep: &Spread) -> IndexSet {
        match self {
            IndexSet::Ordered(spread) => {
                IndexSet::Ordered(spread.intersection(keep)).collapse_if_empty()
            }
            IndexSet::Permuted { spread, .. } => {
                let new_spread = spread.intersection(keep);
                if new_spread.is_empty() {
                    return IndexSet::Ordered(Spread::EMPTY);
                }
                let logical = self.logical_perm().unwrap();
                let perm = logical
                    .iter()
                    .filter_map(|&offset| new_spread.offset_of(spread.get(offset)))
                    .collect_vec();
                IndexSet::permuted(new_spread, perm)
            }
        }
    }

    /// The logical prefix of size `min(n, len)`.
    pub fn head(&self, n: usize) -> IndexSet {
        match self {
            IndexSet::Ordered(spread) => IndexSet::Ordered(spread.head(n)),
            IndexSet::Permuted { .. } => {
                let logical = self.logical_perm().unwrap();
                self.reselect(&logical[..n.min(logical.len())])
            }
        }
        .collapse_if_empty()
    }

    /// The logical suffix of size `min(n, len)`.
    pub fn tail(&self, n: usize) -> IndexSet {
        match self {
            IndexSet::Ordered(spread) => IndexSet::Ordered(spread.tail(n)),
            IndexSet::Permuted { .. } => {
                let logical = self.logical_perm().unwrap();
                let skip = logical.len() - n.min(logical.len());
                self.reselect(&logical[skip..])
            }
        }
        .collapse_if_empty()
    }

    /// Reverses the logical order.
    pub fn reversed(&self) -> IndexSet {
        if self.is_empty() {
            return IndexSet::Ordered(Spread::EMPTY);
        }
        let perm = match self.logical_perm() {
            Some(mut perm) => {
                perm.reverse();
                perm
            }
            None => (0..self.len()).rev().collect_vec(),
        };
        IndexSet::permuted(self.spread().clone(), perm)
    }

    /// Selects a sub-view given spread offsets in the desired logical
    /// order. Duplicates keep their first occurrence; a spread cannot
    /// show the same backing index twice.
    fn reselect(&self, offsets: &[usize]) -> IndexSet {
        let spread = self.spread();
        let kept_backing = offsets
            .iter()
            .map(|&offset| spread.get(offset))
            .unique()
            .collect_vec();
        let new_spread = Spread::from_unsorted(kept_backing.clone());
        let ascending = kept_backing.windows(2).all(|pair| pair[0] < pair[1]);
        if ascending {
            return IndexSet::Ordered(new_spread);
        }
        let perm = kept_backing
            .iter()
            .map(|&backing| new_spread.offset_of(backing).unwrap())
            .collect_vec();
        IndexSet::permuted(new_spread, perm)
    }

    /// Selects logical positions (already validated) in the given order.
    pub fn select_positions(&self, positions: &[usize]) -> IndexSet {
        if positions.is_empty() {
            return IndexSet::Ordered(Spread::EMPTY);
        }
        match self {
            IndexSet::Ordered(_) => self.reselect(positions),
            IndexSet::Permuted { .. } => {
                let logical = self.logical_perm().unwrap();
                let offsets = positions.iter().map(|&pos| logical[pos]).collect_vec();
                self.reselect(&offsets)
            }
        }
    }

    /// Reorders `perm` so that spread offsets are grouped by storage
    /// batch, recording how to restore logical order. No-op for ordered
    /// sets, which are already in batch order.
    pub fn batch_grouped_by(&self, trees_per_batch: usize) -> IndexSet {
        match self {
            IndexSet::Ordered(_) => self.clone(),
            IndexSet::Permuted { spread, .. } => {
                let logical = self.logical_perm().unwrap();
                let mut order = (0..logical.len()).collect_vec();
                order.sort_by_key(|&pos| spread.get(logical[pos]) / trees_per_batch);
                let grouped_perm = order.iter().map(|&pos| logical[pos]).collect_vec();
                // restore_order[logical_pos] is the grouped-perm slot that
                // holds that logical position.
                let mut restore = vec![0; order.len()];
                for (slot, &pos) in order.iter().enumerate() {
                    restore[pos] = slot;
                }
                IndexSet::Permuted {
                    spread: spread.clone(),
                    perm: grouped_perm,
                    batch_grouped: true,
                    restore_order: Some(restore),
                }
            }
        }
    }

    fn collapse_if_empty(self) -> IndexSet {
        if self.is_empty() {
            IndexSet::Ordered(Spread::EMPTY)
        } else {
            self
        }
    }
}
