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

//! Inferred schemas over heterogeneous trees.
//!
//! A schema maps top-level field names to a kind. Kinds form a small
//! lattice: `Null` widens into any kind, `Int` and `Float` widen to
//! `Float`, and any other mix widens to `Any`.

use indexmap::IndexMap;

use crate::tree::{OwnedTree, TreeValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    Null,
    Bool,
    Int,
    Float,
    String,
    Array,
    Object,
    Any,
}

impl Kind {
    pub fn of(value: &TreeValue) -> Kind {
        match value {
            TreeValue::Null => Kind::Null,
            TreeValue::Bool(_) => Kind::Bool,
            TreeValue::Int(_) => Kind::Int,
            TreeValue::Float(_) => Kind::Float,
            TreeValue::String(_) => Kind::String,
            TreeValue::Array(_) => Kind::Array,
            TreeValue::Object(_) => Kind::Object,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Kind::Null => "null",
            Kind::Bool => "bool",
            Kind::Int => "int",
            Kind::Float => "float",
            Kind::String => "string",
            Kind::Array => "array",
            Kind::Object => "object",
            Kind::Any => "any",
        }
    }

    /// Least upper bound in the kind lattice.
    pub fn widen(self, other: Kind) -> Kind {
        match (self, other) {
            (a, b) if a == b => a,
            (Kind::Null, b) => b,
            (a, Kind::Null) => a,
            (Kind::Int, Kind::Float) | (Kind::Float, Kind::Int) => Kind::Float,
            _ => Kind::Any,
        }
    }
}

/// Top-level field names mapped to their widened kinds, in first-seen
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Schema {
    fields: IndexMap<String, Kind>,
}

impl Schema {
    pub fn new(fields: IndexMap<String, Kind>) -> Self {
        Schema { fields }
    }

    /// Single-pass inference over a sample of trees. Non-object roots
    /// contribute nothing; fields missing from some trees keep the kind
    /// seen elsewhere.
    pub fn infer<'a>(trees: impl IntoIterator<Item = &'a OwnedTree>) -> Schema {
        let mut fields: IndexMap<String, Kind> = IndexMap::new();
        for tree in trees {
            if let TreeValue::Object(entries) = tree.root() {
                for (name, value) in entries {
                    let kind = Kind::of(value);
                    match fields.get_mut(name) {
                        Some(existing) => *existing = existing.widen(kind),
                        None => {
                            fields.insert(name.clone(), kind);
                        }
                    }
                }
            }
        }
        Schema { fields }
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, Kind)> {
        self.fields.iter().map(|(name, kind)| (name.as_str(), *kind))
    }

    pub fn kind_of(&self, name: &str) -> Option<Kind> {
        self.fields.get(name).copied()
    }

    pub fn contains_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Widening union of two schemas; field order follows `self` with
    /// `other`'s new fields appended.
    pub fn union(&self, other: &Schema) -> Schema {
        let mut fields = self.fields.clone();
        for (name, kind) in &other.fields {
            match fields.get_mut(name) {
                Some(existing) => *existing = existing.widen(*kind),
                None => {
                    fields.insert(name.clone(), *kind);
                }
            }
        }
        Schema { fields }
    }
}
