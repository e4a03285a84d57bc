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

//! The user-facing arbor handle.
//!
//! An arbor is an immutable value: every chainable operation returns a new
//! handle and leaves the receiver untouched. Operations are eager in their
//! error behavior; the new plan is optimized and executed to a cached
//! selection at call time, so bounds, schema, and cardinality problems
//! surface immediately while tree data stays lazy.

use std::fmt::{Debug, Formatter};
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::instrument;

use crate::execute::{execute, materialize, PhysicalResult};
use crate::expr::{AggExpr, Direction, Expr, KeySpec, SelectExpr, SortKey};
use crate::index::IndexOutOfBounds;
use crate::iter::{ScanOptions, TreeIter};
use crate::json::{parse_json_tree, parse_jsonl, read_jsonl_file, ParseError};
use crate::optimize::{optimize, rebind_scoped};
use crate::plan::LogicalPlan;
use crate::schema::Schema;
use crate::store::{save_multiple, OpenOptions, SaveOptions, StoreError, StoredArbor};
use crate::tree::{FieldPath, OwnedTree, TreeValue};

#[derive(Debug, Error)]
pub enum ArborError {
    #[error(transparent)]
    IndexOutOfBounds(#[from] IndexOutOfBounds),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("Execution failed: {0}")]
    Execution(String),
    #[error("Expected exactly one tree, found {count}")]
    Cardinality { count: usize },
    #[error("Field \"{field}\" is not present in the schema")]
    MissingField { field: String },
    #[error("Field \"{field}\" has kind {actual}, expected {expected}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        actual: &'static str,
    },
}

/// An immutable, chainable handle over an ordered collection of trees.
#[derive(Clone)]
pub struct Arbor {
    plan: Arc<LogicalPlan>,
    selection: Arc<PhysicalResult>,
    schema: Option<Schema>,
}

impl Debug for Arbor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arbor")
            .field("len", &self.len())
            .field("plan", &self.plan.node_name())
            .finish()
    }
}

impl Arbor {
    fn from_plan(plan: Arc<LogicalPlan>) -> Result<Arbor, ArborError> {
        let plan = optimize(plan);
        let selection = execute(&plan)?;
        let schema = match &selection {
            PhysicalResult::Indices { source, .. } => source.schema(),
            // Mutated views may carry overlay trees the base schema does
            // not describe; the schema is recomputed at materialization.
            _ => None,
        };
        Ok(Arbor {
            plan,
            selection: Arc::new(selection),
            schema,
        })
    }

    fn derive(&self, plan: Arc<LogicalPlan>) -> Result<Arbor, ArborError> {
        Arbor::from_plan(plan)
    }

    /// Checks predicate/sort fields against the inferred schema, when one
    /// is known and non-empty.
    fn validate_roots(&self, roots: &[&str]) -> Result<(), ArborError> {
        let Some(schema) = &self.schema else {
            return Ok(());
        };
        if schema.is_empty() {
            return Ok(());
        }
        for root in roots {
            if !schema.contains_field(root) {
                return Err(ArborError::MissingField {
                    field: (*root).to_owned(),
                });
            }
        }
        Ok(())
    }

    // --- Constructors ---

    pub fn from_trees(trees: Vec<OwnedTree>) -> Arbor {
        let schema = Schema::infer(&trees);
        let plan = LogicalPlan::in_memory(trees, Some(schema));
        Arbor::from_plan(plan).expect("in-memory leaf plans cannot fail")
    }

    pub fn read_jsonl_str(text: &str) -> Result<Arbor, ArborError> {
        Ok(Arbor::from_trees(parse_jsonl(text)?))
    }

    pub fn read_jsonl(path: impl AsRef<Path>) -> Result<Arbor, ArborError> {
        Ok(Arbor::from_trees(read_jsonl_file(path)?))
    }

    /// Used by [`crate::store::open`]: an arbor scoped to a store
    /// snapshot, which it keeps alive.
    pub fn open_scoped(stored: StoredArbor, options: &OpenOptions) -> Result<Arbor, ArborError> {
        Arbor::from_plan(LogicalPlan::scoped(stored, options.scan_budget))
    }

    // --- Access ---

    pub fn len(&self) -> usize {
        self.selection.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selection.is_empty()
    }

    pub fn get(&self, index: usize) -> Result<OwnedTree, ArborError> {
        self.selection.get(index)
    }

    pub fn iter(&self) -> TreeIter<'_> {
        self.selection.iter()
    }

    pub fn iter_with(&self, options: &ScanOptions) -> TreeIter<'_> {
        TreeIter::new(&self.selection, options.budget)
    }

    /// All trees in logical order.
    pub fn to_trees(&self) -> Result<Vec<OwnedTree>, ArborError> {
        self.selection.collect_trees()
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    /// Human-readable rendering of the (optimized) plan.
    pub fn describe(&self) -> String {
        self.plan.describe()
    }

    pub fn logical_plan(&self) -> &Arc<LogicalPlan> {
        &self.plan
    }

    /// The cached selection backing this handle.
    pub fn cached_selection(&self) -> &PhysicalResult {
        &self.selection
    }

    /// Fully materializes into a fresh in-memory arbor.
    #[instrument(skip(self))]
    pub fn materialize(&self) -> Result<Arbor, ArborError> {
        let result = materialize(&self.selection)?;
        let PhysicalResult::Indices { source, .. } = &result else {
            unreachable!("materialization produces an in-memory selection");
        };
        let crate::execute::RootSource::InMemory { trees, schema } = source else {
            unreachable!("materialization produces an in-memory selection");
        };
        let plan = Arc::new(LogicalPlan::InMemory {
            trees: Arc::clone(trees),
            schema: schema.clone(),
        });
        let schema = schema.clone();
        Ok(Arbor {
            plan,
            selection: Arc::new(result),
            schema,
        })
    }

    // --- Queries ---

    pub fn filter(&self, predicate: Expr) -> Result<Arbor, ArborError> {
        self.validate_roots(&predicate.referenced_roots())?;
        self.derive(self.plan.filter(predicate))
    }

    pub fn select(&self, exprs: Vec<SelectExpr>) -> Result<Arbor, ArborError> {
        self.derive(self.plan.select(exprs))
    }

    pub fn add_field(&self, name: impl Into<String>, expr: Expr) -> Result<Arbor, ArborError> {
        self.derive(self.plan.add_field(name, expr))
    }

    pub fn explode(&self, path: impl Into<FieldPath>) -> Result<Arbor, ArborError> {
        self.derive(self.plan.explode(path.into(), None))
    }

    pub fn explode_as(
        &self,
        path: impl Into<FieldPath>,
        binding: impl Into<String>,
    ) -> Result<Arbor, ArborError> {
        self.derive(self.plan.explode(path.into(), Some(binding.into())))
    }

    pub fn sort_by(&self, key: impl Into<FieldPath>) -> Result<Arbor, ArborError> {
        self.sort_by_spec(KeySpec::single(key))
    }

    pub fn sort_by_desc(&self, key: impl Into<FieldPath>) -> Result<Arbor, ArborError> {
        self.sort_by_spec(KeySpec::single_desc(key))
    }

    /// Sorts by several keys with per-key directions; keys and
    /// directions are zipped, with missing directions ascending.
    pub fn sort_by_keys(
        &self,
        keys: Vec<FieldPath>,
        directions: Vec<Direction>,
    ) -> Result<Arbor, ArborError> {
        let mut directions = directions.into_iter();
        let sort_keys = keys
            .into_iter()
            .map(|path| SortKey {
                path,
                direction: directions.next().unwrap_or(Direction::Ascending),
            })
            .collect();
        self.sort_by_spec(KeySpec::new(sort_keys))
    }

    pub fn sort_by_spec(&self, keys: KeySpec) -> Result<Arbor, ArborError> {
        self.validate_roots(&keys.referenced_roots())?;
        self.derive(self.plan.sort(keys))
    }

    /// Deterministic when a seed is given; random otherwise.
    pub fn shuffle(&self, seed: Option<u64>) -> Result<Arbor, ArborError> {
        self.derive(self.plan.shuffle(seed.unwrap_or_else(rand::random)))
    }

    pub fn head(&self, n: usize) -> Result<Arbor, ArborError> {
        self.derive(self.plan.head(n))
    }

    pub fn tail(&self, n: usize) -> Result<Arbor, ArborError> {
        self.derive(self.plan.tail(n))
    }

    pub fn take(&self, indices: &[usize]) -> Result<Arbor, ArborError> {
        self.derive(self.plan.take(indices.to_vec()))
    }

    pub fn sample(&self, n: usize, seed: Option<u64>) -> Result<Arbor, ArborError> {
        self.derive(self.plan.sample(n, seed.unwrap_or_else(rand::random)))
    }

    pub fn reverse(&self) -> Result<Arbor, ArborError> {
        self.derive(self.plan.reverse())
    }

    /// The `n` smallest trees under `key`. Plans as sort-then-head, which
    /// the optimizer fuses into a bounded top-k.
    pub fn top_k(&self, key: impl Into<FieldPath>, n: usize) -> Result<Arbor, ArborError> {
        let keys = KeySpec::single(key);
        self.validate_roots(&keys.referenced_roots())?;
        self.derive(self.plan.sort(keys).head(n))
    }

    /// The `n` largest trees under `key`.
    pub fn bottom_k(&self, key: impl Into<FieldPath>, n: usize) -> Result<Arbor, ArborError> {
        let keys = KeySpec::single_desc(key);
        self.validate_roots(&keys.referenced_roots())?;
        self.derive(self.plan.sort(keys).head(n))
    }

    // --- Aggregation and shaping ---

    pub fn agg(&self, exprs: Vec<AggExpr>) -> Result<Arbor, ArborError> {
        self.derive(self.plan.aggregate(exprs))
    }

    pub fn group_by(&self, keys: Vec<FieldPath>) -> Result<Arbor, ArborError> {
        self.derive(self.plan.group_by(keys))
    }

    pub fn index_by(&self, key: impl Into<FieldPath>) -> Result<Arbor, ArborError> {
        self.derive(self.plan.index_by(key.into()))
    }

    // --- Mutations ---

    pub fn append(&self, trees: Vec<OwnedTree>) -> Result<Arbor, ArborError> {
        self.derive(self.plan.append(trees))
    }

    pub fn insert(&self, position: usize, trees: Vec<OwnedTree>) -> Result<Arbor, ArborError> {
        self.derive(self.plan.insert(position, trees))
    }

    pub fn set(&self, index: usize, tree: OwnedTree) -> Result<Arbor, ArborError> {
        self.derive(self.plan.set(index, tree))
    }

    pub fn remove(&self, indices: &[usize]) -> Result<Arbor, ArborError> {
        self.derive(self.plan.remove(indices.to_vec()))
    }

    /// Materializes `other` and appends its trees.
    pub fn concat(&self, other: &Arbor) -> Result<Arbor, ArborError> {
        self.append(other.to_trees()?)
    }

    // --- Storage ---

    pub fn save(&self, path: impl AsRef<Path>, name: &str) -> Result<(), ArborError> {
        self.save_with_options(path, name, &SaveOptions::default())
    }

    pub fn save_with_options(
        &self,
        path: impl AsRef<Path>,
        name: &str,
        options: &SaveOptions,
    ) -> Result<(), ArborError> {
        save_multiple(path, &[(name, self)], options)
    }

    /// Re-executes this arbor's plan against a fresh store snapshot. The
    /// receiver continues to see its original snapshot.
    pub fn refresh(&self) -> Result<Arbor, ArborError> {
        let mut leaf = self.plan.as_ref();
        while let Some(source) = leaf.source() {
            leaf = source;
        }
        let LogicalPlan::Scoped { source, .. } = leaf else {
            return Err(ArborError::Execution(
                "refresh needs a store-backed arbor".to_owned(),
            ));
        };
        let reloaded = source.reload()?;
        Arbor::from_plan(rebind_scoped(&self.plan, &reloaded))
    }
}

/// A single tree with one-row query ergonomics.
#[derive(Clone, PartialEq)]
pub struct Tree {
    tree: OwnedTree,
}

impl Debug for Tree {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&self.tree, f)
    }
}

impl Tree {
    pub fn new(tree: OwnedTree) -> Tree {
        Tree { tree }
    }

    pub fn parse_json(text: &str) -> Result<Tree, ParseError> {
        Ok(Tree::new(parse_json_tree(text)?))
    }

    pub fn root(&self) -> &TreeValue {
        self.tree.root()
    }

    pub fn inner(&self) -> &OwnedTree {
        &self.tree
    }

    pub fn get_path(&self, path: &FieldPath) -> Option<&TreeValue> {
        self.tree.get_path(path)
    }

    /// A plan over this tree as a one-row arbor.
    pub fn plan(&self) -> TreePlan {
        TreePlan {
            arbor: Arbor::from_trees(vec![self.tree.clone()]),
        }
    }

    /// Saves a one-tree arbor under `name`.
    pub fn save(&self, path: impl AsRef<Path>, name: &str) -> Result<(), ArborError> {
        Arbor::from_trees(vec![self.tree.clone()]).save(path, name)
    }
}

impl From<OwnedTree> for Tree {
    fn from(tree: OwnedTree) -> Self {
        Tree::new(tree)
    }
}

/// The subset of plan operations meaningful on a single tree. `filter`
/// yields zero or one rows; `explode` yields zero or more.
#[derive(Debug, Clone)]
pub struct TreePlan {
    arbor: Arbor,
}

impl TreePlan {
    pub fn select(self, exprs: Vec<SelectExpr>) -> Result<TreePlan, ArborError> {
        Ok(TreePlan {
            arbor: self.arbor.select(exprs)?,
        })
    }

    pub fn add_field(self, name: impl Into<String>, expr: Expr) -> Result<TreePlan, ArborError> {
        Ok(TreePlan {
            arbor: self.arbor.add_field(name, expr)?,
        })
    }

    pub fn filter(self, predicate: Expr) -> Result<TreePlan, ArborError> {
        Ok(TreePlan {
            arbor: self.arbor.filter(predicate)?,
        })
    }

    pub fn explode(self, path: impl Into<FieldPath>) -> Result<TreePlan, ArborError> {
        Ok(TreePlan {
            arbor: self.arbor.explode(path)?,
        })
    }

    /// The result as an arbor of zero or more trees.
    pub fn collect(self) -> Arbor {
        self.arbor
    }

    /// The result as a tree, failing unless the cardinality is exactly
    /// one.
    pub fn collect_tree(self) -> Result<Tree, ArborError> {
        let count = self.arbor.len();
        if count != 1 {
            return Err(ArborError::Cardinality { count });
        }
        Ok(Tree::new(self.arbor.get(0)?))
    }
}
