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

//! Virtual selections over a base source plus mutation overlay.
//!
//! A `CompositeIndexSet` is an ordered sequence of segments. Each segment
//! is a contiguous run of virtual indices: base indices (possibly under an
//! external permutation), appended trees, or inserted trees. Mutations
//! reshape segments; they never copy tree data.

use std::sync::Arc;

use itertools::Itertools;

use super::index_set::{IndexOutOfBounds, IndexSet};
use super::spread::Spread;

/// Identity of one element in a composite view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VirtualIndex {
    /// Element of the base source, in the root source's coordinate space.
    Base(usize),
    /// Element at `offset` in the mutation layer's appends vector.
    Appended(usize),
    /// Element at `offset` in the insertion vector for `slot`.
    Inserted { slot: u64, offset: usize },
}

/// One contiguous run of virtual indices in logical order.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Base {
        spread: Spread,
    },
    /// Base indices under an external permutation. The permutation array
    /// is shared so splits are O(1) slice adjustments.
    PermutedBase {
        spread: Spread,
        perm: Arc<Vec<usize>>,
        perm_start: usize,
        perm_len: usize,
    },
    Appended {
        offsets: Spread,
    },
    Inserted {
        slot: u64,
        offsets: Spread,
    },
}

impl Segment {
    pub fn len(&self) -> usize {
        match self {
            Segment::Base { spread } => spread.len(),
            Segment::PermutedBase { perm_len, .. } => *perm_len,
            Segment::Appended { offsets } => offsets.len(),
            Segment::Inserted { offsets, .. } => offsets.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, local: usize) -> VirtualIndex {
        match self {
            Segment::Base { spread } => VirtualIndex::Base(spread.get(local)),
            Segment::PermutedBase {
                spread,
                perm,
                perm_start,
                ..
            } => VirtualIndex::Base(spread.get(perm[perm_start + local])),
            Segment::Appended { offsets } => VirtualIndex::Appended(offsets.get(local)),
            Segment::Inserted { slot, offsets } => VirtualIndex::Inserted {
                slot: *slot,
                offset: offsets.get(local),
            },
        }
    }

    pub fn iter(&self) -> Box<dyn Iterator<Item = VirtualIndex> + '_> {
        match self {
            Segment::Base { spread } => Box::new(spread.iter().map(VirtualIndex::Base)),
            Segment::PermutedBase {
                spread,
                perm,
                perm_start,
                perm_len,
            } => Box::new(
                perm[*perm_start..*perm_start + *perm_len]
                    .iter()
                    .map(|&offset| VirtualIndex::Base(spread.get(offset))),
            ),
            Segment::Appended { offsets } => {
                Box::new(offsets.iter().map(VirtualIndex::Appended))
            }
            Segment::Inserted { slot, offsets } => {
                let slot = *slot;
                Box::new(offsets.iter().map(move |offset| VirtualIndex::Inserted {
                    slot,
                    offset,
                }))
            }
        }
    }

    /// The prefix of `n` entries. `n` must not exceed the length.
    fn head(&self, n: usize) -> Segment {
        match self {
            Segment::Base { spread } => Segment::Base {
                spread: spread.head(n),
            },
            Segment::PermutedBase {
                spread,
                perm,
                perm_start,
                ..
            } => Segment::PermutedBase {
                spread: spread.clone(),
                perm: Arc::clone(perm),
                perm_start: *perm_start,
                perm_len: n,
            },
            Segment::Appended { offsets } => Segment::Appended {
                offsets: offsets.head(n),
            },
            Segment::Inserted { slot, offsets } => Segment::Inserted {
                slot: *slot,
                offsets: offsets.head(n),
            },
        }
    }

    /// Everything after the first `n` entries. `n` must not exceed the
    /// length.
    fn skip(&self, n: usize) -> Segment {
        match self {
            Segment::Base { spread } => Segment::Base {
                spread: spread.skip(n),
            },
            Segment::PermutedBase {
                spread,
                perm,
                perm_start,
                perm_len,
            } => Segment::PermutedBase {
                spread: spread.clone(),
                perm: Arc::clone(perm),
                perm_start: perm_start + n,
                perm_len: perm_len - n,
            },
            Segment::Appended { offsets } => Segment::Appended {
                offsets: offsets.skip(n),
            },
            Segment::Inserted { slot, offsets } => Segment::Inserted {
                slot: *slot,
                offsets: offsets.skip(n),
            },
        }
    }

    /// Splits into `[0, local)` and `[local, len)` halves. O(1) for
    /// permuted bases.
    fn split_at(&self, local: usize) -> (Option<Segment>, Option<Segment>) {
        let left = (local > 0).then(|| self.head(local));
        let right = (local < self.len()).then(|| self.skip(local));
        (left, right)
    }

    /// Removes the given segment-local offsets (sorted, deduplicated).
    /// Returns `None` when the segment empties.
    fn removing(&self, local_offsets: &[usize]) -> Option<Segment> {
        if local_offsets.is_empty() {
            return Some(self.clone());
        }
        let remaining = match self {
            Segment::Base { spread } => {
                let backing = local_offsets
                    .iter()
                    .map(|&local| spread.get(local))
                    .collect_vec();
                Segment::Base {
                    spread: spread.excluding(&backing),
                }
            }
            Segment::PermutedBase {
                spread,
                perm,
                perm_start,
                perm_len,
            } => {
                // Filter survivors in order; the permutation of what
                // remains is preserved.
                let mut removals = local_offsets.iter().copied().peekable();
                let mut new_perm = Vec::with_capacity(perm_len - local_offsets.len());
                for (local, &offset) in perm[*perm_start..perm_start + perm_len].iter().enumerate()
                {
                    if removals.peek() == Some(&local) {
                        removals.next();
                        continue;
                    }
                    new_perm.push(offset);
                }
                let perm_len = new_perm.len();
                Segment::PermutedBase {
                    spread: spread.clone(),
                    perm: Arc::new(new_perm),
                    perm_start: 0,
                    perm_len,
                }
            }
            Segment::Appended { offsets } => {
                let removed = local_offsets
                    .iter()
                    .map(|&local| offsets.get(local))
                    .collect_vec();
                Segment::Appended {
                    offsets: offsets.excluding(&removed),
                }
            }
            Segment::Inserted { slot, offsets } => {
                let removed = local_offsets
                    .iter()
                    .map(|&local| offsets.get(local))
                    .collect_vec();
                Segment::Inserted {
                    slot: *slot,
                    offsets: offsets.excluding(&removed),
                }
            }
        };
        (!remaining.is_empty()).then_some(remaining)
    }
}

/// An ordered sequence of segments with the total length cached.
#[derive(Debug, Clone, PartialEq)]
pub struct CompositeIndexSet {
    segments: Vec<Segment>,
    len: usize,
}

impl CompositeIndexSet {
    pub fn from_spread(spread: Spread) -> Self {
        let mut composite = CompositeIndexSet {
            segments: vec![],
            len: 0,
        };
        composite.push_segment(Segment::Base { spread });
        composite
    }

    /// Lifts an ordered or permuted selection into a one-segment
    /// composite.
    pub fn from_index_set(set: &IndexSet) -> Self {
        match set.logical_perm() {
            None => CompositeIndexSet::from_spread(set.spread().clone()),
            Some(perm) => {
                let perm_len = perm.len();
                let segment = Segment::PermutedBase {
                    spread: set.spread().clone(),
                    perm: Arc::new(perm),
                    perm_start: 0,
                    perm_len,
                };
                let mut composite = CompositeIndexSet {
                    segments: vec![],
                    len: 0,
                };
                composite.push_segment(segment);
                composite
            }
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    fn push_segment(&mut self, segment: Segment) {
        if segment.is_empty() {
            return;
        }
        self.len += segment.len();
        // Coalesce contiguous appended runs.
        if let (
            Some(Segment::Appended { offsets: last }),
            Segment::Appended { offsets: next },
        ) = (self.segments.last_mut(), &segment)
        {
            if last.last().unwrap() < next.first().unwrap() {
                *last = last.appending(next);
                return;
            }
        }
        self.segments.push(segment);
    }

    /// The virtual index at a logical position. Panics when out of
    /// bounds; callers validate against `len()`.
    pub fn get(&self, logical_pos: usize) -> VirtualIndex {
        let mut remaining = logical_pos;
        for segment in &self.segments {
            if remaining < segment.len() {
                return segment.get(remaining);
            }
            remaining -= segment.len();
        }
        panic!("logical position {logical_pos} out of bounds of composite");
    }

    pub fn iter(&self) -> impl Iterator<Item = VirtualIndex> + '_ {
        self.segments.iter().flat_map(|segment| segment.iter())
    }

    /// Virtual indices for logical positions `start..end`, walking the
    /// segment list once.
    pub fn iter_range(&self, start: usize, end: usize) -> Vec<VirtualIndex> {
        debug_assert!(start <= end && end <= self.len);
        let mut out = Vec::with_capacity(end - start);
        let mut seg_start = 0;
        for segment in &self.segments {
            let seg_end = seg_start + segment.len();
            if seg_end > start && seg_start < end {
                let local_start = start.saturating_sub(seg_start);
                let local_end = (end - seg_start).min(segment.len());
                let sub = segment.skip(local_start).head(local_end - local_start);
                out.extend(sub.iter());
            }
            if seg_end >= end {
                break;
            }
            seg_start = seg_end;
        }
        out
    }

    /// Appends `count` new entries at offsets starting at `append_start`
    /// in the layer's appends vector. Extends the trailing appended
    /// segment when contiguous.
    pub fn appending(&self, append_start: usize, count: usize) -> Self {
        let mut result = self.clone();
        result.push_segment(Segment::Appended {
            offsets: Spread::from_range(append_start..append_start + count),
        });
        result
    }

    /// Removes the given logical positions (deduplicated internally).
    pub fn removing(&self, logical_positions: &[usize]) -> Result<Self, IndexOutOfBounds> {
        let mut positions = logical_positions.to_vec();
        positions.sort_unstable();
        positions.dedup();
        if let Some(&max) = positions.last() {
            if max >= self.len {
                return Err(IndexOutOfBounds {
                    index: max,
                    count: self.len,
                });
            }
        }
        let mut result = CompositeIndexSet {
            segments: vec![],
            len: 0,
        };
        let mut seg_start = 0;
        let mut cursor = 0;
        for segment in &self.segments {
            let seg_end = seg_start + segment.len();
            let begin = cursor;
            while cursor < positions.len() && positions[cursor] < seg_end {
                cursor += 1;
            }
            let local = positions[begin..cursor]
                .iter()
                .map(|&pos| pos - seg_start)
                .collect_vec();
            if let Some(remaining) = segment.removing(&local) {
                result.push_segment(remaining);
            }
            seg_start = seg_end;
        }
        Ok(result)
    }

    /// Splices `count` entries of insertion slot `slot` in before logical
    /// position `position`; `position == len` appends at the tail.
    pub fn inserting(
        &self,
        position: usize,
        slot: u64,
        count: usize,
    ) -> Result<Self, IndexOutOfBounds> {
        if position > self.len {
            return Err(IndexOutOfBounds {
                index: position,
                count: self.len,
            });
        }
        let inserted = Segment::Inserted {
            slot,
            offsets: Spread::from_range(0..count),
        };
        let mut result = CompositeIndexSet {
            segments: vec![],
            len: 0,
        };
        let mut remaining = position;
        let mut placed = false;
        for segment in &self.segments {
            if placed || remaining >= segment.len() {
                if !placed {
                    remaining -= segment.len();
                }
                result.push_segment(segment.clone());
                continue;
            }
            let (left, right) = segment.split_at(remaining);
            if let Some(left) = left {
                result.push_segment(left);
            }
            result.push_segment(inserted.clone());
            placed = true;
            if let Some(right) = right {
                result.push_segment(right);
            }
        }
        if !placed {
            result.push_segment(inserted);
        }
        Ok(result)
    }

    /// The logical prefix of size `min(n, len)`.
    pub fn head(&self, n: usize) -> Self {
        let mut result = CompositeIndexSet {
            segments: vec![],
            len: 0,
        };
        let mut remaining = n;
        for segment in &self.segments {
            if remaining == 0 {
                break;
            }
            if remaining >= segment.len() {
                remaining -= segment.len();
                result.push_segment(segment.clone());
            } else {
                result.push_segment(segment.head(remaining));
                remaining = 0;
            }
        }
        result
    }

    /// The logical suffix of size `min(n, len)`.
    pub fn tail(&self, n: usize) -> Self {
        let mut skip = self.len.saturating_sub(n);
        let mut result = CompositeIndexSet {
            segments: vec![],
            len: 0,
        };
        for segment in &self.segments {
            if skip >= segment.len() {
                skip -= segment.len();
                continue;
            }
            if skip > 0 {
                result.push_segment(segment.skip(skip));
                skip = 0;
            } else {
                result.push_segment(segment.clone());
            }
        }
        result
    }

    /// Selects logical positions in the given order, deduplicating to the
    /// first occurrence. Runs over base indices are re-grouped into
    /// (permuted) base segments; appended and inserted runs are grouped
    /// per ascending run.
    pub fn taking(&self, positions: &[usize]) -> Result<Self, IndexOutOfBounds> {
        let mut result = CompositeIndexSet {
            segments: vec![],
            len: 0,
        };
        let mut base_run: Vec<usize> = vec![];
        let mut deduped = positions.iter().copied().unique().collect_vec();
        if let Some(&max) = deduped.iter().max() {
            if max >= self.len {
                return Err(IndexOutOfBounds {
                    index: max,
                    count: self.len,
                });
            }
        }
        let flush_base = |result: &mut CompositeIndexSet, run: &mut Vec<usize>| {
            if run.is_empty() {
                return;
            }
            let ascending = run.windows(2).all(|pair| pair[0] < pair[1]);
            if ascending {
                result.push_segment(Segment::Base {
                    spread: Spread::from_ordered(run),
                });
            } else {
                let spread = Spread::from_unsorted(run.clone());
                let perm = run
                    .iter()
                    .map(|&backing| spread.offset_of(backing).unwrap())
                    .collect_vec();
                let perm_len = perm.len();
                result.push_segment(Segment::PermutedBase {
                    spread,
                    perm: Arc::new(perm),
                    perm_start: 0,
                    perm_len,
                });
            }
            run.clear();
        };
        for pos in deduped.drain(..) {
            match self.get(pos) {
                VirtualIndex::Base(backing) => base_run.push(backing),
                VirtualIndex::Appended(offset) => {
                    flush_base(&mut result, &mut base_run);
                    result.push_segment(Segment::Appended {
                        offsets: Spread::from_range(offset..offset + 1),
                    });
                }
                VirtualIndex::Inserted { slot, offset } => {
                    flush_base(&mut result, &mut base_run);
                    result.push_segment(Segment::Inserted {
                        slot,
                        offsets: Spread::from_range(offset..offset + 1),
                    });
                }
            }
        }
        flush_base(&mut result, &mut base_run);
        Ok(result)
    }
}
