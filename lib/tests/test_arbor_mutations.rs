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

use arbors_lib::arbor::{Arbor, ArborError};
use arbors_lib::execute::PhysicalResult;
use arbors_lib::expr::Expr;
use arbors_lib::json::parse_json_tree;
use arbors_lib::tree::{FieldPath, OwnedTree, TreeValue};
use assert_matches::assert_matches;
use itertools::Itertools;
use pretty_assertions::assert_eq;

fn arbor(jsonl: &str) -> Arbor {
    Arbor::read_jsonl_str(jsonl).unwrap()
}

fn tree(json: &str) -> OwnedTree {
    parse_json_tree(json).unwrap()
}

fn ints(arbor: &Arbor, field: &str) -> Vec<i64> {
    let path = FieldPath::root(field);
    arbor
        .to_trees()
        .unwrap()
        .iter()
        .map(|tree| match tree.get_path(&path) {
            Some(TreeValue::Int(value)) => *value,
            other => panic!("expected int {field}, got {other:?}"),
        })
        .collect_vec()
}

#[test]
fn test_mutations_never_disturb_the_receiver() {
    let base = arbor("{\"id\":1}\n{\"id\":2}\n{\"id\":3}\n");
    let before = base.to_trees().unwrap();

    let appended = base.append(vec![tree("{\"id\":4}")]).unwrap();
    let inserted = base.insert(1, vec![tree("{\"id\":9}")]).unwrap();
    let replaced = base.set(0, tree("{\"id\":8}")).unwrap();
    let removed = base.remove(&[2]).unwrap();

    assert_eq!(base.len(), 3);
    assert_eq!(base.to_trees().unwrap(), before);
    assert_eq!(base.get(0).unwrap(), tree("{\"id\":1}"));

    assert_eq!(ints(&appended, "id"), vec![1, 2, 3, 4]);
    assert_eq!(ints(&inserted, "id"), vec![1, 9, 2, 3]);
    assert_eq!(ints(&replaced, "id"), vec![8, 2, 3]);
    assert_eq!(ints(&removed, "id"), vec![1, 2]);
}

#[test]
fn test_chained_mutations_stay_flat() {
    let base = arbor("{\"id\":1}\n{\"id\":2}\n");
    let chained = base
        .append(vec![tree("{\"id\":3}")])
        .unwrap()
        .set(0, tree("{\"id\":10}"))
        .unwrap()
        .insert(1, vec![tree("{\"id\":7}")])
        .unwrap()
        .append(vec![tree("{\"id\":4}")])
        .unwrap();
    // One composite, one layer; never a composite wrapping a composite.
    let PhysicalResult::Composite { layer, indices, .. } = chained.cached_selection() else {
        panic!("expected a composite selection");
    };
    assert_eq!(layer.appends_len(), 2);
    assert_eq!(layer.insertion_slots().count(), 1);
    assert!(layer.has_replacements());
    assert_eq!(indices.len(), 5);
    assert_eq!(ints(&chained, "id"), vec![10, 7, 2, 3, 4]);
}

#[test]
fn test_remove_preserves_sorted_order() {
    let base = arbor("{\"n\":5}\n{\"n\":1}\n{\"n\":4}\n{\"n\":2}\n{\"n\":3}\n");
    let sorted = base.sort_by("n").unwrap();
    let removed = sorted.remove(&[1, 3]).unwrap();
    // Order preservation: the sorted view with positions 1 and 3 skipped.
    let expected = ints(&sorted, "n")
        .into_iter()
        .enumerate()
        .filter(|(pos, _)| *pos != 1 && *pos != 3)
        .map(|(_, value)| value)
        .collect_vec();
    assert_eq!(ints(&removed, "n"), expected);
    assert_eq!(ints(&removed, "n"), vec![1, 3, 5]);
}

#[test]
fn test_set_on_sorted_view() {
    let base = arbor("{\"n\":3}\n{\"n\":1}\n{\"n\":2}\n");
    let sorted = base.sort_by("n").unwrap();
    let replaced = sorted.set(1, tree("{\"n\":99}")).unwrap();
    assert_eq!(ints(&replaced, "n"), vec![1, 99, 3]);
    // The replacement lands on the logical position, not the backing one.
    assert_eq!(ints(&sorted, "n"), vec![1, 2, 3]);
}

#[test]
fn test_insert_at_len_and_out_of_bounds() {
    let base = arbor("{\"id\":1}\n{\"id\":2}\n");
    let at_end = base.insert(2, vec![tree("{\"id\":3}")]).unwrap();
    assert_eq!(ints(&at_end, "id"), vec![1, 2, 3]);
    let err = base.insert(3, vec![tree("{\"id\":3}")]).unwrap_err();
    assert_matches!(
        err,
        ArborError::IndexOutOfBounds(bounds) if bounds.index == 3 && bounds.count == 2
    );
}

#[test]
fn test_mutation_identities() {
    let base = arbor("{\"id\":1}\n{\"id\":2}\n");
    let same = base.append(vec![]).unwrap();
    assert_eq!(same.to_trees().unwrap(), base.to_trees().unwrap());
    let same = base.remove(&[]).unwrap();
    assert_eq!(same.to_trees().unwrap(), base.to_trees().unwrap());
    let same = base.insert(1, vec![]).unwrap();
    assert_eq!(same.to_trees().unwrap(), base.to_trees().unwrap());
}

#[test]
fn test_set_set_last_wins() {
    let base = arbor("{\"id\":1}\n{\"id\":2}\n");
    let twice = base
        .set(1, tree("{\"id\":8}"))
        .unwrap()
        .set(1, tree("{\"id\":9}"))
        .unwrap();
    let once = base.set(1, tree("{\"id\":9}")).unwrap();
    assert_eq!(twice.to_trees().unwrap(), once.to_trees().unwrap());
}

#[test]
fn test_append_then_remove_appended_is_identity() {
    let base = arbor("{\"id\":1}\n{\"id\":2}\n");
    let round_trip = base
        .append(vec![tree("{\"id\":3}")])
        .unwrap()
        .remove(&[2])
        .unwrap();
    assert_eq!(round_trip.to_trees().unwrap(), base.to_trees().unwrap());
}

#[test]
fn test_remove_punches_holes_in_appends() {
    let base = arbor("{\"id\":1}\n");
    let appended = base
        .append(vec![tree("{\"id\":2}"), tree("{\"id\":3}"), tree("{\"id\":4}")])
        .unwrap();
    let removed = appended.remove(&[2]).unwrap();
    assert_eq!(ints(&removed, "id"), vec![1, 2, 4]);
    // A replacement still addresses the surviving appended entry.
    let replaced = removed.set(2, tree("{\"id\":40}")).unwrap();
    assert_eq!(ints(&replaced, "id"), vec![1, 2, 40]);
}

#[test]
fn test_filter_downstream_of_append_materializes_correctly() {
    let base = arbor("{\"n\":1}\n{\"n\":5}\n");
    let appended = base.append(vec![tree("{\"n\":9}")]).unwrap();
    let filtered = appended
        .filter(Expr::field("n").gt(Expr::literal(TreeValue::Int(2))))
        .unwrap();
    let via_materialize = appended
        .materialize()
        .unwrap()
        .filter(Expr::field("n").gt(Expr::literal(TreeValue::Int(2))))
        .unwrap();
    assert_eq!(ints(&filtered, "n"), vec![5, 9]);
    assert_eq!(
        filtered.to_trees().unwrap(),
        via_materialize.to_trees().unwrap()
    );
}

#[test]
fn test_sort_after_removing_everything() {
    let base = arbor("{\"n\":2}\n{\"n\":1}\n");
    let emptied = base.remove(&[0, 1]).unwrap();
    assert!(emptied.is_empty());
    let sorted = emptied.sort_by("n").unwrap();
    assert!(sorted.is_empty());
}

#[test]
fn test_insertion_slot_survives_surrounding_mutations() {
    let base = arbor("{\"id\":1}\n{\"id\":2}\n{\"id\":3}\n");
    let inserted = base
        .insert(1, vec![tree("{\"id\":10}"), tree("{\"id\":11}")])
        .unwrap();
    assert_eq!(ints(&inserted, "id"), vec![1, 10, 11, 2, 3]);
    // Removing before and after the inserted run shifts its position but
    // not its identity.
    let shifted = inserted.remove(&[0, 4]).unwrap();
    assert_eq!(ints(&shifted, "id"), vec![10, 11, 2]);
    // Replace inside the inserted run at its drifted position.
    let replaced = shifted.set(0, tree("{\"id\":100}")).unwrap();
    assert_eq!(ints(&replaced, "id"), vec![100, 11, 2]);
}

#[test]
fn test_concat_materializes_other() {
    let lhs = arbor("{\"id\":1}\n");
    let rhs = arbor("{\"id\":2}\n{\"id\":3}\n").reverse().unwrap();
    let joined = lhs.concat(&rhs).unwrap();
    assert_eq!(ints(&joined, "id"), vec![1, 3, 2]);
}

#[test]
fn test_mutation_errors_are_eager() {
    let base = arbor("{\"id\":1}\n{\"id\":2}\n");
    assert_matches!(
        base.set(2, tree("{}")),
        Err(ArborError::IndexOutOfBounds(bounds)) if bounds.index == 2 && bounds.count == 2
    );
    assert_matches!(
        base.remove(&[5]),
        Err(ArborError::IndexOutOfBounds(bounds)) if bounds.index == 5
    );
}
