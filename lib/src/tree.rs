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

//! In-memory representation of a single JSON-like tree.

use std::cmp::Ordering;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use indexmap::IndexMap;

/// A node in a tree. Object fields keep their insertion order.
#[derive(Clone, PartialEq)]
pub enum TreeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<TreeValue>),
    Object(IndexMap<String, TreeValue>),
}

impl Debug for TreeValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TreeValue::Null => write!(f, "null"),
            TreeValue::Bool(v) => write!(f, "{v}"),
            TreeValue::Int(v) => write!(f, "{v}"),
            TreeValue::Float(v) => write!(f, "{v}"),
            TreeValue::String(v) => write!(f, "{v:?}"),
            TreeValue::Array(items) => f.debug_list().entries(items).finish(),
            TreeValue::Object(fields) => f.debug_map().entries(fields).finish(),
        }
    }
}

impl TreeValue {
    pub fn object(fields: impl IntoIterator<Item = (String, TreeValue)>) -> Self {
        TreeValue::Object(fields.into_iter().collect())
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            TreeValue::Null => "null",
            TreeValue::Bool(_) => "bool",
            TreeValue::Int(_) => "int",
            TreeValue::Float(_) => "float",
            TreeValue::String(_) => "string",
            TreeValue::Array(_) => "array",
            TreeValue::Object(_) => "object",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TreeValue::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TreeValue::Int(v) => Some(*v as f64),
            TreeValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn field(&self, name: &str) -> Option<&TreeValue> {
        match self {
            TreeValue::Object(fields) => fields.get(name),
            _ => None,
        }
    }

    /// Rank used by the total value order. Numeric kinds share a rank so
    /// that ints and floats sort together.
    fn kind_rank(&self) -> u8 {
        match self {
            TreeValue::Null => 0,
            TreeValue::Bool(_) => 1,
            TreeValue::Int(_) | TreeValue::Float(_) => 2,
            TreeValue::String(_) => 3,
            TreeValue::Array(_) => 4,
            TreeValue::Object(_) => 5,
        }
    }
}

/// Total order over tree values, used by sorts and top-k. Values of
/// different kinds order by kind rank; ints and floats compare numerically.
pub fn cmp_values(lhs: &TreeValue, rhs: &TreeValue) -> Ordering {
    match (lhs, rhs) {
        (TreeValue::Null, TreeValue::Null) => Ordering::Equal,
        (TreeValue::Bool(a), TreeValue::Bool(b)) => a.cmp(b),
        (TreeValue::Int(a), TreeValue::Int(b)) => a.cmp(b),
        (TreeValue::String(a), TreeValue::String(b)) => a.cmp(b),
        (TreeValue::Array(a), TreeValue::Array(b)) => {
            for (x, y) in a.iter().zip(b) {
                match cmp_values(x, y) {
                    Ordering::Equal => {}
                    other => return other,
                }
            }
            a.len().cmp(&b.len())
        }
        (TreeValue::Object(a), TreeValue::Object(b)) => {
            for ((ka, va), (kb, vb)) in a.iter().zip(b) {
                match ka.cmp(kb).then_with(|| cmp_values(va, vb)) {
                    Ordering::Equal => {}
                    other => return other,
                }
            }
            a.len().cmp(&b.len())
        }
        _ => {
            if let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) {
                a.total_cmp(&b)
            } else {
                lhs.kind_rank().cmp(&rhs.kind_rank())
            }
        }
    }
}

/// A dotted path of object keys, e.g. `user.address.city`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    keys: Vec<String>,
}

impl Debug for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dotted())
    }
}

impl FieldPath {
    pub fn new(keys: Vec<String>) -> Self {
        assert!(!keys.is_empty(), "field path must have at least one key");
        FieldPath { keys }
    }

    pub fn parse(path: &str) -> Self {
        FieldPath::new(path.split('.').map(|key| key.to_owned()).collect())
    }

    pub fn root(path: &str) -> Self {
        FieldPath::new(vec![path.to_owned()])
    }

    /// The top-level key, i.e. the first component.
    pub fn root_key(&self) -> &str {
        &self.keys[0]
    }

    pub fn last_key(&self) -> &str {
        self.keys.last().unwrap()
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    pub fn dotted(&self) -> String {
        self.keys.join(".")
    }

    pub fn lookup<'a>(&self, mut value: &'a TreeValue) -> Option<&'a TreeValue> {
        for key in &self.keys {
            value = value.field(key)?;
        }
        Some(value)
    }
}

impl From<&str> for FieldPath {
    fn from(path: &str) -> Self {
        FieldPath::parse(path)
    }
}

/// A single tree, cheap to clone. Plan nodes and mutation layers hold trees
/// by value; the root is shared.
#[derive(Clone, PartialEq)]
pub struct OwnedTree {
    root: Arc<TreeValue>,
}

impl Debug for OwnedTree {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&*self.root, f)
    }
}

impl OwnedTree {
    pub fn new(root: TreeValue) -> Self {
        OwnedTree {
            root: Arc::new(root),
        }
    }

    pub fn root(&self) -> &TreeValue {
        &self.root
    }

    pub fn get_path(&self, path: &FieldPath) -> Option<&TreeValue> {
        path.lookup(&self.root)
    }

    /// Returns a tree whose top-level object has `name` set to `value`.
    /// A non-object root becomes a single-field object.
    pub fn with_field(&self, name: &str, value: TreeValue) -> OwnedTree {
        let mut fields = match self.root() {
            TreeValue::Object(fields) => fields.clone(),
            _ => IndexMap::new(),
        };
        fields.insert(name.to_owned(), value);
        OwnedTree::new(TreeValue::Object(fields))
    }
}

impl From<TreeValue> for OwnedTree {
    fn from(root: TreeValue) -> Self {
        OwnedTree::new(root)
    }
}
