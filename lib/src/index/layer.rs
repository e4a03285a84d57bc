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

//! Overlay trees referenced by composite selections.
//!
//! The layer only ever grows: removal is represented by absence from the
//! index set, never by a tombstone here. Once a layer is wrapped in an
//! `Arc` it is immutable; extending a flattened composite builds a new
//! layer value from the old one.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::composite::VirtualIndex;
use crate::tree::OwnedTree;

static NEXT_SLOT_ID: AtomicU64 = AtomicU64::new(0);

/// Allocates a fresh insertion slot id. Uniqueness within the process is
/// all that is required.
pub fn allocate_slot_id() -> u64 {
    NEXT_SLOT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Hash key for replacements of overlay entries. Base replacements are
/// keyed by backing index separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VirtualKey {
    Appended(usize),
    Inserted { slot: u64, offset: usize },
}

impl VirtualKey {
    pub fn of(index: &VirtualIndex) -> Option<VirtualKey> {
        match index {
            VirtualIndex::Base(_) => None,
            VirtualIndex::Appended(offset) => Some(VirtualKey::Appended(*offset)),
            VirtualIndex::Inserted { slot, offset } => Some(VirtualKey::Inserted {
                slot: *slot,
                offset: *offset,
            }),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MutationLayer {
    /// Trees appended after the base, addressed by `Appended(offset)`.
    appends: Arc<Vec<OwnedTree>>,
    /// Trees introduced by each insertion slot.
    insertions: HashMap<u64, Arc<Vec<OwnedTree>>>,
    /// Replacements for base elements, keyed by backing index.
    base_replacements: HashMap<usize, OwnedTree>,
    /// Replacements for appended/inserted elements.
    virtual_replacements: HashMap<VirtualKey, OwnedTree>,
}

impl MutationLayer {
    pub fn new() -> Self {
        MutationLayer::default()
    }

    pub fn appends_len(&self) -> usize {
        self.appends.len()
    }

    pub fn insertion_slots(&self) -> impl Iterator<Item = u64> + '_ {
        self.insertions.keys().copied()
    }

    pub fn has_replacements(&self) -> bool {
        !self.base_replacements.is_empty() || !self.virtual_replacements.is_empty()
    }

    /// A copy of this layer with `trees` appended after the existing
    /// appends. Returns the start offset of the new run.
    pub fn with_appends(&self, trees: &[OwnedTree]) -> (MutationLayer, usize) {
        let start = self.appends.len();
        let mut appends = (*self.appends).clone();
        appends.extend(trees.iter().cloned());
        let layer = MutationLayer {
            appends: Arc::new(appends),
            insertions: self.insertions.clone(),
            base_replacements: self.base_replacements.clone(),
            virtual_replacements: self.virtual_replacements.clone(),
        };
        (layer, start)
    }

    /// A copy of this layer carrying `trees` under insertion slot `slot`.
    pub fn with_insertion(&self, slot: u64, trees: Arc<Vec<OwnedTree>>) -> MutationLayer {
        let mut insertions = self.insertions.clone();
        insertions.insert(slot, trees);
        MutationLayer {
            appends: Arc::clone(&self.appends),
            insertions,
            base_replacements: self.base_replacements.clone(),
            virtual_replacements: self.virtual_replacements.clone(),
        }
    }

    /// A copy of this layer in which the element identified by `index`
    /// reads as `tree`.
    pub fn with_replacement(&self, index: VirtualIndex, tree: OwnedTree) -> MutationLayer {
        let mut layer = self.clone();
        match VirtualKey::of(&index) {
            None => {
                let VirtualIndex::Base(backing) = index else {
                    unreachable!();
                };
                layer.base_replacements.insert(backing, tree);
            }
            Some(key) => {
                layer.virtual_replacements.insert(key, tree);
            }
        }
        layer
    }

    /// Resolves overlay data for a virtual index: replacements first, then
    /// appends/insertions. `Base` without a replacement resolves to `None`
    /// and the caller reads the base source.
    pub fn resolve(&self, index: &VirtualIndex) -> Option<&OwnedTree> {
        match index {
            VirtualIndex::Base(backing) => self.base_replacements.get(backing),
            VirtualIndex::Appended(offset) => self
                .virtual_replacements
                .get(&VirtualKey::Appended(*offset))
                .or_else(|| self.appends.get(*offset)),
            VirtualIndex::Inserted { slot, offset } => self
                .virtual_replacements
                .get(&VirtualKey::Inserted {
                    slot: *slot,
                    offset: *offset,
                })
                .or_else(|| self.insertions.get(slot).and_then(|trees| trees.get(*offset))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TreeValue;

    fn tree(n: i64) -> OwnedTree {
        OwnedTree::new(TreeValue::Int(n))
    }

    #[test]
    fn test_slot_ids_are_unique() {
        let a = allocate_slot_id();
        let b = allocate_slot_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_append_resolution() {
        let (layer, start) = MutationLayer::new().with_appends(&[tree(1), tree(2)]);
        assert_eq!(start, 0);
        assert_eq!(layer.resolve(&VirtualIndex::Appended(1)), Some(&tree(2)));
        let (layer, start) = layer.with_appends(&[tree(3)]);
        assert_eq!(start, 2);
        assert_eq!(layer.resolve(&VirtualIndex::Appended(2)), Some(&tree(3)));
    }

    #[test]
    fn test_replacement_wins_over_overlay() {
        let (layer, _) = MutationLayer::new().with_appends(&[tree(1)]);
        let replaced = layer.with_replacement(VirtualIndex::Appended(0), tree(9));
        assert_eq!(replaced.resolve(&VirtualIndex::Appended(0)), Some(&tree(9)));
        // The original layer is untouched.
        assert_eq!(layer.resolve(&VirtualIndex::Appended(0)), Some(&tree(1)));
    }

    #[test]
    fn test_base_resolution_defers_to_source() {
        let layer = MutationLayer::new();
        assert_eq!(layer.resolve(&VirtualIndex::Base(5)), None);
        let replaced = layer.with_replacement(VirtualIndex::Base(5), tree(7));
        assert_eq!(replaced.resolve(&VirtualIndex::Base(5)), Some(&tree(7)));
    }

    #[test]
    fn test_insertion_resolution() {
        let slot = allocate_slot_id();
        let layer =
            MutationLayer::new().with_insertion(slot, Arc::new(vec![tree(10), tree(11)]));
        assert_eq!(
            layer.resolve(&VirtualIndex::Inserted { slot, offset: 1 }),
            Some(&tree(11))
        );
        assert_eq!(
            layer.resolve(&VirtualIndex::Inserted {
                slot: slot + 1,
                offset: 0
            }),
            None
        );
    }
}
