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

//! JSON/JSONL ingestion. Parse errors are raised eagerly, with line
//! numbers. This is the only production module that touches JSON; the
//! execution hot path never serializes.

use std::fs;
use std::path::Path;

use indexmap::IndexMap;
use thiserror::Error;

use crate::tree::{OwnedTree, TreeValue};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("Invalid JSON on line {line}: {source}")]
    Json {
        line: usize,
        source: serde_json::Error,
    },
    #[error("Failed to read input: {0}")]
    Io(#[from] std::io::Error),
}

pub fn tree_value_from_json(value: serde_json::Value) -> TreeValue {
    match value {
        serde_json::Value::Null => TreeValue::Null,
        serde_json::Value::Bool(v) => TreeValue::Bool(v),
        serde_json::Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                TreeValue::Int(v)
            } else {
                // u64 overflow also lands here; widen to float.
                TreeValue::Float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(v) => TreeValue::String(v),
        serde_json::Value::Array(items) => {
            TreeValue::Array(items.into_iter().map(tree_value_from_json).collect())
        }
        serde_json::Value::Object(entries) => {
            let mut fields = IndexMap::with_capacity(entries.len());
            for (name, value) in entries {
                fields.insert(name, tree_value_from_json(value));
            }
            TreeValue::Object(fields)
        }
    }
}

/// Conversion back to JSON. Used by ingestion round-trip tests and debug
/// validation only; the executor copies values directly.
pub fn tree_value_to_json(value: &TreeValue) -> serde_json::Value {
    match value {
        TreeValue::Null => serde_json::Value::Null,
        TreeValue::Bool(v) => serde_json::Value::Bool(*v),
        TreeValue::Int(v) => serde_json::Value::from(*v),
        TreeValue::Float(v) => {
            serde_json::Number::from_f64(*v).map_or(serde_json::Value::Null, serde_json::Value::Number)
        }
        TreeValue::String(v) => serde_json::Value::String(v.clone()),
        TreeValue::Array(items) => {
            serde_json::Value::Array(items.iter().map(tree_value_to_json).collect())
        }
        TreeValue::Object(fields) => {
            let mut map = serde_json::Map::with_capacity(fields.len());
            for (name, value) in fields {
                map.insert(name.clone(), tree_value_to_json(value));
            }
            serde_json::Value::Object(map)
        }
    }
}

pub fn parse_json_tree(text: &str) -> Result<OwnedTree, ParseError> {
    let value: serde_json::Value =
        serde_json::from_str(text).map_err(|source| ParseError::Json { line: 1, source })?;
    Ok(OwnedTree::new(tree_value_from_json(value)))
}

/// Parses one tree per non-blank line.
pub fn parse_jsonl(text: &str) -> Result<Vec<OwnedTree>, ParseError> {
    let mut trees = vec![];
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(line).map_err(|source| {
            ParseError::Json {
                line: idx + 1,
                source,
            }
        })?;
        trees.push(OwnedTree::new(tree_value_from_json(value)));
    }
    Ok(trees)
}

pub fn read_jsonl_file(path: impl AsRef<Path>) -> Result<Vec<OwnedTree>, ParseError> {
    let text = fs::read_to_string(path)?;
    parse_jsonl(&text)
}
