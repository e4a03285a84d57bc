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

//! Run-length-encoded ordered index sets.
//!
//! A `Spread` holds sorted, non-overlapping, non-adjacent stretches.
//! Selections over large sources stay a handful of stretches in practice,
//! so the stretch vector is inline up to four entries.

use std::fmt::{Debug, Formatter};
use std::ops::Range;

use smallvec::SmallVec;

/// A half-open range `[start, end)` of backing indices.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stretch {
    pub start: usize,
    pub end: usize,
}

impl Debug for Stretch {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

impl Stretch {
    pub fn new(start: usize, end: usize) -> Self {
        assert!(start <= end, "stretch start must not exceed end");
        Stretch { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, index: usize) -> bool {
        self.start <= index && index < self.end
    }
}

type StretchVec = SmallVec<[Stretch; 4]>;

/// An ordered set of indices as sorted, merged stretches, with the total
/// cardinality cached.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Spread {
    stretches: StretchVec,
    len: usize,
}

impl Debug for Spread {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.stretches.iter()).finish()
    }
}

impl Default for Spread {
    fn default() -> Self {
        Spread::EMPTY
    }
}

/// Appends a stretch, merging with the trailing one when they touch.
fn push_stretch(stretches: &mut StretchVec, stretch: Stretch) {
    if stretch.is_empty() {
        return;
    }
    if let Some(last) = stretches.last_mut() {
        debug_assert!(last.end <= stretch.start);
        if last.end == stretch.start {
            last.end = stretch.end;
            return;
        }
    }
    stretches.push(stretch);
}

impl Spread {
    pub const EMPTY: Spread = Spread {
        stretches: SmallVec::new_const(),
        len: 0,
    };

    /// All indices in `[0, n)`.
    pub fn full(n: usize) -> Spread {
        Spread::from_range(0..n)
    }

    pub fn from_range(range: Range<usize>) -> Spread {
        if range.is_empty() {
            return Spread::EMPTY;
        }
        let stretch = Stretch::new(range.start, range.end);
        Spread {
            stretches: smallvec::smallvec![stretch],
            len: stretch.len(),
        }
    }

    /// Builds from sorted indices, ignoring duplicates.
    pub fn from_sorted(indices: &[usize]) -> Spread {
        let mut stretches = StretchVec::new();
        let mut len = 0;
        for &index in indices {
            match stretches.last_mut() {
                Some(last) if index < last.end => {
                    debug_assert!(index >= last.start, "input must be sorted");
                    continue; // duplicate
                }
                Some(last) if index == last.end => {
                    last.end += 1;
                }
                _ => {
                    stretches.push(Stretch::new(index, index + 1));
                }
            }
            len += 1;
        }
        Spread { stretches, len }
    }

    pub fn from_unsorted(mut indices: Vec<usize>) -> Spread {
        indices.sort_unstable();
        indices.dedup();
        Spread::from_sorted(&indices)
    }

    /// Order-preserving constructor for strictly ascending input. Unlike
    /// `from_sorted` it treats a duplicate or descent as a caller bug, so
    /// the resulting spread enumerates exactly the input sequence.
    pub fn from_ordered(indices: &[usize]) -> Spread {
        let mut stretches = StretchVec::new();
        for (pos, &index) in indices.iter().enumerate() {
            if pos > 0 {
                debug_assert!(index > indices[pos - 1], "input must be strictly ascending");
            }
            push_stretch(&mut stretches, Stretch::new(index, index + 1));
        }
        Spread {
            stretches,
            len: indices.len(),
        }
    }

    fn from_stretches(stretches: StretchVec) -> Spread {
        let len = stretches.iter().map(Stretch::len).sum();
        Spread { stretches, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn stretches(&self) -> &[Stretch] {
        &self.stretches
    }

    pub fn first(&self) -> Option<usize> {
        self.stretches.first().map(|stretch| stretch.start)
    }

    pub fn last(&self) -> Option<usize> {
        self.stretches.last().map(|stretch| stretch.end - 1)
    }

    pub fn is_contiguous(&self) -> bool {
        self.stretches.len() <= 1
    }

    /// The covered range if the spread is one unbroken run.
    pub fn as_range(&self) -> Option<Range<usize>> {
        match &self.stretches[..] {
            [] => Some(0..0),
            [single] => Some(single.start..single.end),
            _ => None,
        }
    }

    /// The backing index at logical offset `offset`. Panics when out of
    /// bounds; callers validate against `len()` first.
    pub fn get(&self, mut offset: usize) -> usize {
        for stretch in &self.stretches {
            if offset < stretch.len() {
                return stretch.start + offset;
            }
            offset -= stretch.len();
        }
        panic!("offset {offset} out of bounds of spread");
    }

    pub fn contains(&self, index: usize) -> bool {
        let pos = self
            .stretches
            .partition_point(|stretch| stretch.start <= index);
        pos > 0 && self.stretches[pos - 1].contains(index)
    }

    /// The logical offset of backing index `index`, if present.
    pub fn offset_of(&self, index: usize) -> Option<usize> {
        let pos = self
            .stretches
            .partition_point(|stretch| stretch.start <= index);
        if pos == 0 || !self.stretches[pos - 1].contains(index) {
            return None;
        }
        let preceding: usize = self.stretches[..pos - 1].iter().map(Stretch::len).sum();
        Some(preceding + (index - self.stretches[pos - 1].start))
    }

    /// Removes the given backing indices; they are sorted and deduplicated
    /// internally and indices not present are ignored.
    pub fn excluding(&self, removals: &[usize]) -> Spread {
        if removals.is_empty() {
            return self.clone();
        }
        let mut removals = removals.to_vec();
        removals.sort_unstable();
        removals.dedup();
        let mut stretches = StretchVec::new();
        let mut cursor = removals.iter().copied().peekable();
        for stretch in &self.stretches {
            let mut start = stretch.start;
            while let Some(&removal) = cursor.peek() {
                if removal >= stretch.end {
                    break;
                }
                cursor.next();
                if removal < start {
                    continue;
                }
                push_stretch(&mut stretches, Stretch::new(start, removal));
                start = removal + 1;
            }
            push_stretch(&mut stretches, Stretch::new(start, stretch.end));
        }
        Spread::from_stretches(stretches)
    }

    /// Concatenates `other` after `self`. The caller guarantees `other`
    /// starts at or after `self`'s last index; touching boundary stretches
    /// collapse.
    pub fn appending(&self, other: &Spread) -> Spread {
        if self.is_empty() {
            return other.clone();
        }
        let mut stretches = self.stretches.clone();
        for stretch in &other.stretches {
            push_stretch(&mut stretches, *stretch);
        }
        Spread {
            stretches,
            len: self.len + other.len,
        }
    }

    /// The prefix of size `min(n, len)`.
    pub fn head(&self, n: usize) -> Spread {
        if n >= self.len {
            return self.clone();
        }
        let mut stretches = StretchVec::new();
        let mut remaining = n;
        for stretch in &self.stretches {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(stretch.len());
            push_stretch(&mut stretches, Stretch::new(stretch.start, stretch.start + take));
            remaining -= take;
        }
        Spread {
            stretches,
            len: n,
        }
    }

    /// Everything after the first `n` entries.
    pub fn skip(&self, n: usize) -> Spread {
        if n == 0 {
            return self.clone();
        }
        if n >= self.len {
            return Spread::EMPTY;
        }
        let mut stretches = StretchVec::new();
        let mut remaining = n;
        for stretch in &self.stretches {
            if remaining >= stretch.len() {
                remaining -= stretch.len();
                continue;
            }
            push_stretch(
                &mut stretches,
                Stretch::new(stretch.start + remaining, stretch.end),
            );
            remaining = 0;
        }
        Spread {
            stretches,
            len: self.len - n,
        }
    }

    /// The suffix of size `min(n, len)`.
    pub fn tail(&self, n: usize) -> Spread {
        if n >= self.len {
            return self.clone();
        }
        self.skip(self.len - n)
    }

    /// Set intersection by a two-cursor sweep over both stretch lists.
    pub fn intersection(&self, other: &Spread) -> Spread {
        let mut stretches = StretchVec::new();
        let mut lhs = self.stretches.iter().peekable();
        let mut rhs = other.stretches.iter().peekable();
        while let (Some(a), Some(b)) = (lhs.peek(), rhs.peek()) {
            let start = a.start.max(b.start);
            let end = a.end.min(b.end);
            if start < end {
                push_stretch(&mut stretches, Stretch::new(start, end));
            }
            if a.end <= b.end {
                lhs.next();
            } else {
                rhs.next();
            }
        }
        Spread::from_stretches(stretches)
    }

    pub fn iter(&self) -> SpreadIter<'_> {
        SpreadIter {
            stretches: self.stretches.iter(),
            current: 0..0,
        }
    }
}

impl<'a> IntoIterator for &'a Spread {
    type Item = usize;
    type IntoIter = SpreadIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Ascending iteration without heap allocation.
pub struct SpreadIter<'a> {
    stretches: std::slice::Iter<'a, Stretch>,
    current: Range<usize>,
}

impl Iterator for SpreadIter<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        loop {
            if let Some(index) = self.current.next() {
                return Some(index);
            }
            let stretch = self.stretches.next()?;
            self.current = stretch.start..stretch.end;
        }
    }
}
