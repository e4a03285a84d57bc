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
use arbors_lib::expr::{AggExpr, Expr, KeySpec, SortKey};
use arbors_lib::iter::ScanOptions;
use arbors_lib::json::parse_json_tree;
use arbors_lib::tree::{FieldPath, OwnedTree, TreeValue};
use assert_matches::assert_matches;
use itertools::Itertools;

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

fn lit(n: i64) -> Expr {
    Expr::literal(TreeValue::Int(n))
}

#[test]
fn test_filter_append_head_scenario() {
    // filter(id > 1) then append then head(2): the appended tree stays
    // behind the surviving base trees.
    let base = arbor("{\"id\":1}\n{\"id\":2}\n{\"id\":3}\n");
    let result = base
        .filter(Expr::field("id").gt(lit(1)))
        .unwrap()
        .append(vec![tree("{\"id\":4}")])
        .unwrap()
        .head(2)
        .unwrap();
    assert_eq!(result.len(), 2);
    assert_eq!(ints(&result, "id"), vec![2, 3]);
}

#[test]
fn test_sort_remove_get_scenario() {
    let base = arbor("{\"n\":3}\n{\"n\":1}\n{\"n\":2}\n");
    let result = base.sort_by("n").unwrap().remove(&[0]).unwrap();
    assert_eq!(ints(&result, "n"), vec![2, 3]);
    assert_eq!(result.get(0).unwrap(), tree("{\"n\":2}"));
}

#[test]
fn test_sparse_take_append_get_scenario() {
    // Base virtual indices stay in the original source's coordinate
    // space through take + append.
    let jsonl = (0..100).map(|i| format!("{{\"id\":{i}}}")).join("\n");
    let base = arbor(&jsonl);
    let result = base
        .take(&[50, 70])
        .unwrap()
        .append(vec![tree("{\"id\":999}")])
        .unwrap();
    assert_eq!(result.len(), 3);
    assert_eq!(result.get(0).unwrap(), tree("{\"id\":50}"));
    assert_eq!(result.get(1).unwrap(), tree("{\"id\":70}"));
    assert_eq!(result.get(2).unwrap(), tree("{\"id\":999}"));
}

#[test]
fn test_head_head_law() {
    let base = arbor(&(0..10).map(|i| format!("{{\"id\":{i}}}")).join("\n"));
    let twice = base.head(7).unwrap().head(4).unwrap();
    let once = base.head(4).unwrap();
    assert_eq!(twice.to_trees().unwrap(), once.to_trees().unwrap());
    let twice = base.head(4).unwrap().head(7).unwrap();
    assert_eq!(twice.to_trees().unwrap(), once.to_trees().unwrap());
}

#[test]
fn test_sort_is_idempotent_and_stable() {
    let base = arbor(
        "{\"k\":2,\"tag\":\"a\"}\n{\"k\":1,\"tag\":\"b\"}\n{\"k\":2,\"tag\":\"c\"}\n{\"k\":1,\"tag\":\"d\"}\n",
    );
    let once = base.sort_by("k").unwrap();
    let twice = once.sort_by("k").unwrap();
    assert_eq!(once.to_trees().unwrap(), twice.to_trees().unwrap());
    // Stability: equal keys keep their original relative order.
    let tags = once
        .to_trees()
        .unwrap()
        .iter()
        .map(|tree| match tree.get_path(&FieldPath::root("tag")) {
            Some(TreeValue::String(tag)) => tag.clone(),
            other => panic!("expected tag, got {other:?}"),
        })
        .collect_vec();
    assert_eq!(tags, vec!["b", "d", "a", "c"]);
}

#[test]
fn test_sort_desc_and_multi_key() {
    let base = arbor("{\"a\":1,\"b\":1}\n{\"a\":2,\"b\":1}\n{\"a\":1,\"b\":2}\n");
    let sorted = base
        .sort_by_spec(KeySpec::new(vec![
            SortKey::asc("b"),
            SortKey::desc("a"),
        ]))
        .unwrap();
    let pairs = sorted
        .to_trees()
        .unwrap()
        .iter()
        .map(|tree| {
            (
                tree.get_path(&FieldPath::root("b")).cloned(),
                tree.get_path(&FieldPath::root("a")).cloned(),
            )
        })
        .collect_vec();
    assert_eq!(
        pairs,
        vec![
            (Some(TreeValue::Int(1)), Some(TreeValue::Int(2))),
            (Some(TreeValue::Int(1)), Some(TreeValue::Int(1))),
            (Some(TreeValue::Int(2)), Some(TreeValue::Int(1))),
        ]
    );
}

#[test]
fn test_top_k_matches_sort_then_head() {
    let base = arbor(&(0..50).map(|i| format!("{{\"n\":{}}}", (i * 37) % 50)).join("\n"));
    let top = base.top_k("n", 5).unwrap();
    let reference = base.sort_by("n").unwrap().head(5).unwrap();
    assert_eq!(top.to_trees().unwrap(), reference.to_trees().unwrap());
    assert_eq!(ints(&top, "n"), vec![0, 1, 2, 3, 4]);

    let bottom = base.bottom_k("n", 3).unwrap();
    assert_eq!(ints(&bottom, "n"), vec![49, 48, 47]);
}

#[test]
fn test_shuffle_and_sample_are_seeded() {
    let base = arbor(&(0..20).map(|i| format!("{{\"id\":{i}}}")).join("\n"));
    let shuffled = base.shuffle(Some(7)).unwrap();
    let again = base.shuffle(Some(7)).unwrap();
    assert_eq!(shuffled.to_trees().unwrap(), again.to_trees().unwrap());
    assert_ne!(ints(&shuffled, "id"), ints(&base, "id"));
    // A shuffle is a permutation.
    let mut ids = ints(&shuffled, "id");
    ids.sort_unstable();
    assert_eq!(ids, (0..20).collect_vec());

    let sampled = base.sample(5, Some(3)).unwrap();
    assert_eq!(sampled.len(), 5);
    assert_eq!(
        sampled.to_trees().unwrap(),
        base.sample(5, Some(3)).unwrap().to_trees().unwrap()
    );
    // Sampled positions come out in ascending order.
    let ids = ints(&sampled, "id");
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    // Oversampling is the identity.
    assert_eq!(
        base.sample(100, Some(3)).unwrap().to_trees().unwrap(),
        base.to_trees().unwrap()
    );
}

#[test]
fn test_reverse() {
    let base = arbor("{\"id\":1}\n{\"id\":2}\n{\"id\":3}\n");
    let reversed = base.reverse().unwrap();
    assert_eq!(ints(&reversed, "id"), vec![3, 2, 1]);
    assert_eq!(
        reversed.reverse().unwrap().to_trees().unwrap(),
        base.to_trees().unwrap()
    );
}

#[test]
fn test_select_and_add_field() {
    let base = arbor("{\"a\":1,\"b\":2}\n{\"a\":3,\"b\":4}\n");
    let selected = base
        .select(vec![arbors_lib::expr::SelectExpr::passthrough("b")])
        .unwrap();
    assert_eq!(selected.to_trees().unwrap(), vec![tree("{\"b\":2}"), tree("{\"b\":4}")]);

    let derived = base.add_field("flag", Expr::field("a").gt(lit(1))).unwrap();
    assert_eq!(
        derived.to_trees().unwrap(),
        vec![
            tree("{\"a\":1,\"b\":2,\"flag\":false}"),
            tree("{\"a\":3,\"b\":4,\"flag\":true}"),
        ]
    );
}

#[test]
fn test_explode() {
    let base = arbor("{\"id\":1,\"items\":[10,20]}\n{\"id\":2,\"items\":[]}\n{\"id\":3}\n");
    let exploded = base.explode("items").unwrap();
    assert_eq!(
        exploded.to_trees().unwrap(),
        vec![
            tree("{\"id\":1,\"items\":10}"),
            tree("{\"id\":1,\"items\":20}"),
        ]
    );
    let bound = base.explode_as("items", "item").unwrap();
    assert_eq!(bound.get(0).unwrap(), tree("{\"id\":1,\"items\":[10,20],\"item\":10}"));
}

#[test]
fn test_aggregate() {
    let base = arbor("{\"n\":1}\n{\"n\":4}\n{\"n\":2}\n");
    let result = base
        .agg(vec![
            AggExpr::Count {
                name: "count".to_owned(),
            },
            AggExpr::Sum {
                name: "total".to_owned(),
                path: FieldPath::root("n"),
            },
            AggExpr::Min {
                name: "low".to_owned(),
                path: FieldPath::root("n"),
            },
            AggExpr::Max {
                name: "high".to_owned(),
                path: FieldPath::root("n"),
            },
            AggExpr::Mean {
                name: "mean".to_owned(),
                path: FieldPath::root("n"),
            },
        ])
        .unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(
        result.get(0).unwrap(),
        tree("{\"count\":3,\"total\":7,\"low\":1,\"high\":4,\"mean\":2.3333333333333335}")
    );
}

#[test]
fn test_group_by_and_index_by() {
    let base = arbor(
        "{\"kind\":\"a\",\"n\":1}\n{\"kind\":\"b\",\"n\":2}\n{\"kind\":\"a\",\"n\":3}\n",
    );
    let grouped = base.group_by(vec![FieldPath::root("kind")]).unwrap();
    assert_eq!(grouped.len(), 2);
    assert_eq!(
        grouped.get(0).unwrap(),
        tree(
            "{\"kind\":\"a\",\"count\":2,\"items\":[{\"kind\":\"a\",\"n\":1},{\"kind\":\"a\",\"n\":3}]}"
        )
    );

    let indexed = base.head(2).unwrap().index_by("kind").unwrap();
    assert_eq!(indexed.len(), 1);
    assert_eq!(
        indexed.get(0).unwrap(),
        tree("{\"a\":{\"kind\":\"a\",\"n\":1},\"b\":{\"kind\":\"b\",\"n\":2}}")
    );
}

#[test]
fn test_schema_validation_is_eager() {
    let base = arbor("{\"id\":1}\n{\"id\":2}\n");
    let err = base.filter(Expr::field("missing").gt(lit(0))).unwrap_err();
    assert_matches!(err, ArborError::MissingField { field } if field == "missing");
    let err = base.sort_by("absent").unwrap_err();
    assert_matches!(err, ArborError::MissingField { .. });
}

#[test]
fn test_empty_arbor_boundaries() {
    let empty = Arbor::from_trees(vec![]);
    assert_eq!(empty.len(), 0);
    assert!(empty.is_empty());
    assert_eq!(empty.head(0).unwrap().len(), 0);
    assert_eq!(empty.tail(0).unwrap().len(), 0);
    assert_eq!(empty.take(&[]).unwrap().len(), 0);
    assert_eq!(empty.reverse().unwrap().len(), 0);
    assert_eq!(empty.filter(Expr::field("x").is_null()).unwrap().len(), 0);
    assert_eq!(empty.sort_by("x").unwrap().len(), 0);
    assert_eq!(empty.shuffle(Some(1)).unwrap().len(), 0);
    assert_eq!(empty.sample(3, Some(1)).unwrap().len(), 0);
    assert_eq!(empty.to_trees().unwrap(), Vec::<OwnedTree>::new());
}

#[test]
fn test_take_out_of_bounds() {
    let base = arbor("{\"id\":1}\n{\"id\":2}\n");
    let err = base.take(&[0, 2]).unwrap_err();
    assert_matches!(
        err,
        ArborError::IndexOutOfBounds(bounds) if bounds.index == 2 && bounds.count == 2
    );
}

#[test]
fn test_budgeted_iteration_matches_collect() {
    let base = arbor(&(0..37).map(|i| format!("{{\"id\":{i}}}")).join("\n"));
    let shuffled = base.shuffle(Some(11)).unwrap();
    let all = shuffled.to_trees().unwrap();
    let budgeted: Result<Vec<_>, _> = shuffled
        .iter_with(&ScanOptions { budget: 4 })
        .collect();
    assert_eq!(budgeted.unwrap(), all);
}

#[test]
fn test_describe_mentions_plan_shape() {
    let base = arbor("{\"id\":1}\n");
    let plan = base
        .filter(Expr::field("id").gt(lit(0)))
        .unwrap()
        .head(1)
        .unwrap();
    let text = plan.describe();
    assert!(text.contains("head"), "describe output: {text}");
    assert!(text.contains("filter"), "describe output: {text}");
}
