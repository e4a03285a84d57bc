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

use arbors_lib::index::{CompositeIndexSet, IndexSet, Spread, VirtualIndex};
use itertools::Itertools;

fn sample_spreads() -> Vec<Spread> {
    vec![
        Spread::EMPTY,
        Spread::full(1),
        Spread::full(17),
        Spread::from_range(5..9),
        Spread::from_sorted(&[0, 2, 4, 6, 8]),
        Spread::from_sorted(&[1, 2, 3, 10, 11, 30]),
        Spread::from_unsorted(vec![13, 2, 7, 2, 40, 41, 42]),
    ]
}

#[test]
fn test_head_len_law() {
    // head(n).len() == min(n, len) for every sample and a range of n.
    for spread in sample_spreads() {
        for n in 0..spread.len() + 3 {
            let head = spread.head(n);
            assert_eq!(head.len(), n.min(spread.len()), "head({n}) of {spread:?}");
            assert_eq!(head.excluding(&[]), head);
        }
    }
}

#[test]
fn test_excluding_laws() {
    // Removing a subset shrinks by exactly the subset size and leaves
    // nothing of the subset behind.
    for spread in sample_spreads() {
        let all = spread.iter().collect_vec();
        for window in [1, 2, 3] {
            for removals in all.chunks(window) {
                let excluded = spread.excluding(removals);
                assert_eq!(excluded.len(), spread.len() - removals.len());
                assert!(excluded
                    .intersection(&Spread::from_sorted(removals))
                    .is_empty());
                // Survivors keep ascending order.
                let survivors = excluded.iter().collect_vec();
                assert!(survivors.windows(2).all(|pair| pair[0] < pair[1]));
            }
        }
    }
}

#[test]
fn test_head_skip_partition() {
    for spread in sample_spreads() {
        for n in 0..spread.len() + 1 {
            let recombined = spread.head(n).appending(&spread.skip(n));
            assert_eq!(recombined, spread, "head({n}) ++ skip({n}) of {spread:?}");
        }
    }
}

#[test]
fn test_get_is_deterministic_across_equivalent_sets() {
    let spread = Spread::from_sorted(&[3, 4, 5, 9, 12]);
    let ordered = IndexSet::Ordered(spread.clone());
    // The identity permutation is an equivalent view.
    let identity = IndexSet::permuted(spread, (0..5).collect());
    for pos in 0..ordered.len() {
        assert_eq!(
            ordered.get_backing_index(pos),
            identity.get_backing_index(pos)
        );
    }
}

#[test]
fn test_composite_round_trip_of_index_set() {
    let sets = vec![
        IndexSet::Ordered(Spread::from_sorted(&[1, 5, 6, 7])),
        IndexSet::permuted(Spread::from_range(0..5), vec![4, 0, 3, 1, 2]),
    ];
    for set in sets {
        let composite = CompositeIndexSet::from_index_set(&set);
        assert_eq!(composite.len(), set.len());
        for pos in 0..set.len() {
            assert_eq!(
                composite.get(pos),
                VirtualIndex::Base(set.get_backing_index(pos)),
            );
        }
    }
}

#[test]
fn test_composite_removal_after_insert_keeps_slots() {
    // Insert in the middle, then remove around the inserted run; the
    // slot's entries drift but stay addressable.
    let composite = CompositeIndexSet::from_spread(Spread::full(6));
    let inserted = composite.inserting(3, 42, 2).unwrap();
    assert_eq!(inserted.len(), 8);
    // Remove one base entry before and one after the insertion.
    let removed = inserted.removing(&[0, 7]).unwrap();
    let virtuals = removed.iter().collect_vec();
    assert_eq!(
        virtuals,
        vec![
            VirtualIndex::Base(1),
            VirtualIndex::Base(2),
            VirtualIndex::Inserted { slot: 42, offset: 0 },
            VirtualIndex::Inserted { slot: 42, offset: 1 },
            VirtualIndex::Base(3),
            VirtualIndex::Base(4),
        ]
    );
}

#[test]
fn test_composite_iter_range_matches_get() {
    let composite = CompositeIndexSet::from_spread(Spread::from_sorted(&[0, 1, 7, 8]))
        .appending(0, 3)
        .inserting(2, 9, 2)
        .unwrap();
    let len = composite.len();
    for start in 0..len + 1 {
        for end in start..len + 1 {
            let range = composite.iter_range(start, end);
            let by_get = (start..end).map(|pos| composite.get(pos)).collect_vec();
            assert_eq!(range, by_get, "range {start}..{end}");
        }
    }
}

#[test]
fn test_composite_head_tail_partition() {
    let composite = CompositeIndexSet::from_spread(Spread::full(4))
        .appending(0, 2)
        .inserting(1, 3, 1)
        .unwrap();
    let len = composite.len();
    for n in 0..len + 1 {
        let head = composite.head(n);
        let tail = composite.tail(len - n);
        let recombined = head.iter().chain(tail.iter()).collect_vec();
        assert_eq!(recombined, composite.iter().collect_vec(), "split at {n}");
    }
}
