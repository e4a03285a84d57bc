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

//! Lazy iteration over physical results.
//!
//! Trees are produced in logical order in chunks of a budgeted size.
//! Within a chunk, base entries are grouped by storage batch so each
//! needed batch is decoded exactly once, then everything is re-emitted in
//! chunk order. Overlay trees are in memory and simply counted against
//! the budget. The decoded-batch grouping is local to each chunk.

use std::collections::BTreeMap;

use crate::arbor::ArborError;
use crate::execute::{PhysicalResult, RootSource, DEFAULT_SCAN_BUDGET};
use crate::index::{CompositeIndexSet, VirtualIndex};
use crate::tree::OwnedTree;

/// Options controlling lazy iteration.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Maximum trees produced per chunk.
    pub budget: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        ScanOptions {
            budget: DEFAULT_SCAN_BUDGET,
        }
    }
}

/// Iterator over the trees of a [`PhysicalResult`] in logical order. An
/// error ends the iteration after it is yielded.
pub struct TreeIter<'a> {
    result: &'a PhysicalResult,
    composite: CompositeIndexSet,
    budget: usize,
    pos: usize,
    chunk: std::vec::IntoIter<OwnedTree>,
    failed: bool,
}

impl<'a> TreeIter<'a> {
    pub fn new(result: &'a PhysicalResult, budget: usize) -> Self {
        TreeIter {
            result,
            composite: result.composite_view(),
            budget: budget.max(1),
            pos: 0,
            chunk: vec![].into_iter(),
            failed: false,
        }
    }

    fn fill_chunk(&mut self) -> Result<Vec<OwnedTree>, ArborError> {
        let end = (self.pos + self.budget).min(self.composite.len());
        let entries = self.composite.iter_range(self.pos, end);
        self.pos = end;
        let mut out: Vec<Option<OwnedTree>> = vec![None; entries.len()];
        let layer = self.result.layer();
        let mut base_needed: Vec<(usize, usize)> = vec![];
        for (chunk_local, index) in entries.iter().enumerate() {
            if let Some(tree) = layer.and_then(|layer| layer.resolve(index)) {
                out[chunk_local] = Some(tree.clone());
                continue;
            }
            match index {
                VirtualIndex::Base(backing) => base_needed.push((chunk_local, *backing)),
                other => {
                    return Err(ArborError::Execution(format!(
                        "overlay entry {other:?} has no layer"
                    )));
                }
            }
        }
        match self.result.source() {
            RootSource::InMemory { trees, .. } => {
                for (chunk_local, backing) in base_needed {
                    let tree = trees.get(backing).ok_or_else(|| {
                        ArborError::Execution(format!(
                            "backing index {backing} outside the root source"
                        ))
                    })?;
                    out[chunk_local] = Some(tree.clone());
                }
            }
            RootSource::Stored { arbor, .. } => {
                // Grouped by batch, not logical order, so each batch is
                // decoded once per chunk.
                let mut by_batch: BTreeMap<usize, Vec<(usize, usize)>> = BTreeMap::new();
                for (chunk_local, backing) in base_needed {
                    by_batch
                        .entry(arbor.batch_of(backing))
                        .or_default()
                        .push((chunk_local, backing));
                }
                for (batch_index, needed) in by_batch {
                    let decoded = arbor.decode_batch(batch_index)?;
                    let batch_start = batch_index * arbor.trees_per_batch();
                    for (chunk_local, backing) in needed {
                        let tree = decoded.get(backing - batch_start).ok_or_else(|| {
                            ArborError::Execution(format!(
                                "backing index {backing} outside batch {batch_index}"
                            ))
                        })?;
                        out[chunk_local] = Some(tree.clone());
                    }
                }
            }
        }
        out.into_iter()
            .map(|tree| {
                tree.ok_or_else(|| ArborError::Execution("unresolved chunk entry".to_owned()))
            })
            .collect()
    }
}

impl Iterator for TreeIter<'_> {
    type Item = Result<OwnedTree, ArborError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Some(tree) = self.chunk.next() {
                return Some(Ok(tree));
            }
            if self.pos >= self.composite.len() {
                return None;
            }
            match self.fill_chunk() {
                Ok(chunk) => {
                    self.chunk = chunk.into_iter();
                }
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
            }
        }
    }
}
