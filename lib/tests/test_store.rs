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

use std::thread;

use arbors_lib::arbor::{Arbor, ArborError};
use arbors_lib::store::{
    delete, list, open, open_with_options, save_multiple, OpenOptions, SaveOptions, StoreError,
};
use arbors_lib::tree::{FieldPath, OwnedTree, TreeValue};
use assert_matches::assert_matches;
use itertools::Itertools;

fn new_temp_dir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("arbors-test-")
        .tempdir()
        .unwrap()
}

fn arbor(jsonl: &str) -> Arbor {
    Arbor::read_jsonl_str(jsonl).unwrap()
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
fn test_atomic_multi_save_scenario() {
    let temp_dir = new_temp_dir();
    let path = temp_dir.path().join("data.arbors");
    let users = arbor("{\"user\":1}\n{\"user\":2}\n");
    let orders = arbor("{\"order\":10}\n");
    save_multiple(
        &path,
        &[("users", &users), ("orders", &orders)],
        &SaveOptions::default(),
    )
    .unwrap();

    let mut names = list(&path).unwrap();
    names.sort();
    assert_eq!(names, vec!["orders", "users"]);

    let loaded_users = open(&path, "users").unwrap();
    assert_eq!(loaded_users.to_trees().unwrap(), users.to_trees().unwrap());
    let loaded_orders = open(&path, "orders").unwrap();
    assert_eq!(loaded_orders.to_trees().unwrap(), orders.to_trees().unwrap());
}

#[test]
fn test_round_trip_preserves_schema_and_trees() {
    let temp_dir = new_temp_dir();
    let path = temp_dir.path().join("data.arbors");
    let original = arbor("{\"id\":1,\"score\":0.5}\n{\"id\":2,\"score\":3}\n");
    original.save(&path, "items").unwrap();

    let loaded = open(&path, "items").unwrap();
    assert_eq!(loaded.to_trees().unwrap(), original.to_trees().unwrap());
    assert_eq!(loaded.schema(), original.schema());
}

#[test]
fn test_open_missing_name_and_file() {
    let temp_dir = new_temp_dir();
    let path = temp_dir.path().join("data.arbors");
    assert_matches!(
        open(&path, "nope"),
        Err(ArborError::Store(StoreError::FileNotFound { .. }))
    );
    arbor("{\"id\":1}\n").save(&path, "items").unwrap();
    assert_matches!(
        open(&path, "nope"),
        Err(ArborError::Store(StoreError::NotFound { name })) if name == "nope"
    );
}

#[test]
fn test_delete() {
    let temp_dir = new_temp_dir();
    let path = temp_dir.path().join("data.arbors");
    assert!(!delete(&path, "items").unwrap());
    arbor("{\"id\":1}\n").save(&path, "items").unwrap();
    assert!(delete(&path, "items").unwrap());
    assert!(!delete(&path, "items").unwrap());
    assert_eq!(list(&path).unwrap(), Vec::<String>::new());
}

#[test]
fn test_save_multiple_last_write_wins() {
    let temp_dir = new_temp_dir();
    let path = temp_dir.path().join("data.arbors");
    let first = arbor("{\"id\":1}\n");
    let second = arbor("{\"id\":2}\n");
    save_multiple(
        &path,
        &[("items", &first), ("items", &second)],
        &SaveOptions::default(),
    )
    .unwrap();
    let loaded = open(&path, "items").unwrap();
    assert_eq!(ints(&loaded, "id"), vec![2]);
}

#[test]
fn test_save_multiple_empty_is_a_no_op_commit() {
    let temp_dir = new_temp_dir();
    let path = temp_dir.path().join("data.arbors");
    save_multiple(&path, &[], &SaveOptions::default()).unwrap();
    assert_eq!(list(&path).unwrap(), Vec::<String>::new());
}

#[test]
fn test_refresh_sees_external_write() {
    let temp_dir = new_temp_dir();
    let path = temp_dir.path().join("data.arbors");
    arbor("{\"x\":1}\n{\"x\":2}\n").save(&path, "x").unwrap();

    let a1 = open(&path, "x").unwrap();
    assert_eq!(ints(&a1, "x"), vec![1, 2]);

    // Another thread overwrites the name.
    let writer_path = path.clone();
    thread::spawn(move || {
        arbor("{\"x\":9}\n").save(&writer_path, "x").unwrap();
    })
    .join()
    .unwrap();

    // The open handle still reads its snapshot.
    assert_eq!(ints(&a1, "x"), vec![1, 2]);
    // A refresh re-executes against the new state; the old handle is
    // untouched.
    let a2 = a1.refresh().unwrap();
    assert_eq!(ints(&a2, "x"), vec![9]);
    assert_eq!(ints(&a1, "x"), vec![1, 2]);
}

#[test]
fn test_refresh_re_executes_the_plan() {
    let temp_dir = new_temp_dir();
    let path = temp_dir.path().join("data.arbors");
    arbor("{\"n\":3}\n{\"n\":1}\n{\"n\":2}\n").save(&path, "x").unwrap();

    let sorted_head = open(&path, "x")
        .unwrap()
        .sort_by("n")
        .unwrap()
        .head(2)
        .unwrap();
    assert_eq!(ints(&sorted_head, "n"), vec![1, 2]);

    arbor("{\"n\":9}\n{\"n\":0}\n").save(&path, "x").unwrap();
    let refreshed = sorted_head.refresh().unwrap();
    assert_eq!(ints(&refreshed, "n"), vec![0, 9]);
}

#[test]
fn test_refresh_on_in_memory_arbor_fails() {
    let base = arbor("{\"id\":1}\n");
    assert_matches!(base.refresh(), Err(ArborError::Execution(_)));
}

#[test]
fn test_stored_arbor_queries_and_mutations() {
    let temp_dir = new_temp_dir();
    let path = temp_dir.path().join("data.arbors");
    let jsonl = (0..100).map(|i| format!("{{\"id\":{i}}}")).join("\n");
    arbor(&jsonl)
        .save_with_options(&path, "big", &SaveOptions { trees_per_batch: 16 })
        .unwrap();

    let stored = open_with_options(&path, "big", &OpenOptions { scan_budget: 8 }).unwrap();
    assert_eq!(stored.len(), 100);

    // Sparse selection plus append against a stored base; base indices
    // stay in the stored coordinate space.
    let taken = stored
        .take(&[50, 70])
        .unwrap()
        .append(vec![OwnedTree::new(TreeValue::object([(
            "id".to_owned(),
            TreeValue::Int(999),
        )]))])
        .unwrap();
    assert_eq!(ints(&taken, "id"), vec![50, 70, 999]);

    // A permuted scan over many batches decodes correctly.
    let shuffled = stored.shuffle(Some(5)).unwrap();
    let mut ids = ints(&shuffled, "id");
    ids.sort_unstable();
    assert_eq!(ids, (0..100).collect_vec());

    // Sorting a stored arbor reads content through batch decoding.
    let top = stored.top_k("id", 3).unwrap();
    assert_eq!(ints(&top, "id"), vec![0, 1, 2]);
}

#[test]
fn test_save_of_mutated_arbor_materializes() {
    let temp_dir = new_temp_dir();
    let path = temp_dir.path().join("data.arbors");
    let mutated = arbor("{\"id\":1}\n{\"id\":2}\n")
        .insert(1, vec![arbors_lib::json::parse_json_tree("{\"id\":7}").unwrap()])
        .unwrap()
        .set(0, arbors_lib::json::parse_json_tree("{\"id\":0}").unwrap())
        .unwrap();
    mutated.save(&path, "out").unwrap();
    let loaded = open(&path, "out").unwrap();
    assert_eq!(ints(&loaded, "id"), vec![0, 7, 2]);
}
