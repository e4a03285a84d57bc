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

//! The immutable tree of operations an arbor is derived by.
//!
//! Nodes hold their children through shared ownership, so deriving a new
//! plan from an existing one is O(1) and never disturbs the original.
//! Tree payloads and index lists are reference counted for the same
//! reason. Insertion slot ids are assigned here, at construction; cloning
//! or rewriting a plan never reallocates them.

use std::fmt::Write as _;
use std::sync::Arc;

use itertools::Itertools;

use crate::expr::{AggExpr, Expr, KeySpec, SelectExpr};
use crate::index::allocate_slot_id;
use crate::schema::Schema;
use crate::store::StoredArbor;
use crate::tree::{FieldPath, OwnedTree};

#[derive(Debug, Clone, PartialEq)]
pub enum LogicalPlan {
    // Leaves
    InMemory {
        trees: Arc<Vec<OwnedTree>>,
        schema: Option<Schema>,
    },
    Scoped {
        source: StoredArbor,
        scan_budget: usize,
    },
    // Queries
    Filter {
        source: Arc<LogicalPlan>,
        predicate: Arc<Expr>,
    },
    Select {
        source: Arc<LogicalPlan>,
        exprs: Arc<Vec<SelectExpr>>,
    },
    AddField {
        source: Arc<LogicalPlan>,
        name: String,
        expr: Arc<Expr>,
    },
    Explode {
        source: Arc<LogicalPlan>,
        path: FieldPath,
        as_binding: Option<String>,
    },
    Sort {
        source: Arc<LogicalPlan>,
        keys: KeySpec,
    },
    /// Bounded sort; produced by the optimizer from `Head` over `Sort`.
    TopK {
        source: Arc<LogicalPlan>,
        keys: KeySpec,
        n: usize,
    },
    Shuffle {
        source: Arc<LogicalPlan>,
        seed: u64,
    },
    Head {
        source: Arc<LogicalPlan>,
        n: usize,
    },
    Tail {
        source: Arc<LogicalPlan>,
        n: usize,
    },
    Take {
        source: Arc<LogicalPlan>,
        indices: Arc<Vec<usize>>,
    },
    Sample {
        source: Arc<LogicalPlan>,
        n: usize,
        seed: u64,
    },
    Reverse {
        source: Arc<LogicalPlan>,
    },
    // Aggregation and shaping
    Aggregate {
        source: Arc<LogicalPlan>,
        exprs: Arc<Vec<AggExpr>>,
    },
    GroupBy {
        source: Arc<LogicalPlan>,
        keys: Arc<Vec<FieldPath>>,
    },
    IndexBy {
        source: Arc<LogicalPlan>,
        key: FieldPath,
    },
    // Mutations
    Append {
        source: Arc<LogicalPlan>,
        trees: Arc<Vec<OwnedTree>>,
    },
    Insert {
        source: Arc<LogicalPlan>,
        slot: u64,
        position: usize,
        trees: Arc<Vec<OwnedTree>>,
    },
    Set {
        source: Arc<LogicalPlan>,
        index: usize,
        tree: OwnedTree,
    },
    Remove {
        source: Arc<LogicalPlan>,
        indices: Arc<Vec<usize>>,
    },
}

impl LogicalPlan {
    pub fn in_memory(trees: Vec<OwnedTree>, schema: Option<Schema>) -> Arc<LogicalPlan> {
        Arc::new(LogicalPlan::InMemory {
            trees: Arc::new(trees),
            schema,
        })
    }

    pub fn scoped(source: StoredArbor, scan_budget: usize) -> Arc<LogicalPlan> {
        Arc::new(LogicalPlan::Scoped {
            source,
            scan_budget,
        })
    }

    pub fn filter(self: &Arc<Self>, predicate: Expr) -> Arc<LogicalPlan> {
        Arc::new(LogicalPlan::Filter {
            source: self.clone(),
            predicate: Arc::new(predicate),
        })
    }

    pub fn select(self: &Arc<Self>, exprs: Vec<SelectExpr>) -> Arc<LogicalPlan> {
        Arc::new(LogicalPlan::Select {
            source: self.clone(),
            exprs: Arc::new(exprs),
        })
    }

    pub fn add_field(self: &Arc<Self>, name: impl Into<String>, expr: Expr) -> Arc<LogicalPlan> {
        Arc::new(LogicalPlan::AddField {
            source: self.clone(),
            name: name.into(),
            expr: Arc::new(expr),
        })
    }

    pub fn explode(
        self: &Arc<Self>,
        path: FieldPath,
        as_binding: Option<String>,
    ) -> Arc<LogicalPlan> {
        Arc::new(LogicalPlan::Explode {
            source: self.clone(),
            path,
            as_binding,
        })
    }

    pub fn sort(self: &Arc<Self>, keys: KeySpec) -> Arc<LogicalPlan> {
        Arc::new(LogicalPlan::Sort {
            source: self.clone(),
            keys,
        })
    }

    pub fn shuffle(self: &Arc<Self>, seed: u64) -> Arc<LogicalPlan> {
        Arc::new(LogicalPlan::Shuffle {
            source: self.clone(),
            seed,
        })
    }

    pub fn head(self: &Arc<Self>, n: usize) -> Arc<LogicalPlan> {
        Arc::new(LogicalPlan::Head {
            source: self.clone(),
            n,
        })
    }

    pub fn tail(self: &Arc<Self>, n: usize) -> Arc<LogicalPlan> {
        Arc::new(LogicalPlan::Tail {
            source: self.clone(),
            n,
        })
    }

    pub fn take(self: &Arc<Self>, indices: Vec<usize>) -> Arc<LogicalPlan> {
        Arc::new(LogicalPlan::Take {
            source: self.clone(),
            indices: Arc::new(indices),
        })
    }

    pub fn sample(self: &Arc<Self>, n: usize, seed: u64) -> Arc<LogicalPlan> {
        Arc::new(LogicalPlan::Sample {
            source: self.clone(),
            n,
            seed,
        })
    }

    pub fn reverse(self: &Arc<Self>) -> Arc<LogicalPlan> {
        Arc::new(LogicalPlan::Reverse {
            source: self.clone(),
        })
    }

    pub fn aggregate(self: &Arc<Self>, exprs: Vec<AggExpr>) -> Arc<LogicalPlan> {
        Arc::new(LogicalPlan::Aggregate {
            source: self.clone(),
            exprs: Arc::new(exprs),
        })
    }

    pub fn group_by(self: &Arc<Self>, keys: Vec<FieldPath>) -> Arc<LogicalPlan> {
        Arc::new(LogicalPlan::GroupBy {
            source: self.clone(),
            keys: Arc::new(keys),
        })
    }

    pub fn index_by(self: &Arc<Self>, key: FieldPath) -> Arc<LogicalPlan> {
        Arc::new(LogicalPlan::IndexBy {
            source: self.clone(),
            key,
        })
    }

    pub fn append(self: &Arc<Self>, trees: Vec<OwnedTree>) -> Arc<LogicalPlan> {
        Arc::new(LogicalPlan::Append {
            source: self.clone(),
            trees: Arc::new(trees),
        })
    }

    /// The insertion slot id is allocated here and survives optimizer
    /// rewrites and plan sharing unchanged.
    pub fn insert(self: &Arc<Self>, position: usize, trees: Vec<OwnedTree>) -> Arc<LogicalPlan> {
        Arc::new(LogicalPlan::Insert {
            source: self.clone(),
            slot: allocate_slot_id(),
            position,
            trees: Arc::new(trees),
        })
    }

    pub fn set(self: &Arc<Self>, index: usize, tree: OwnedTree) -> Arc<LogicalPlan> {
        Arc::new(LogicalPlan::Set {
            source: self.clone(),
            index,
            tree,
        })
    }

    pub fn remove(self: &Arc<Self>, indices: Vec<usize>) -> Arc<LogicalPlan> {
        Arc::new(LogicalPlan::Remove {
            source: self.clone(),
            indices: Arc::new(indices),
        })
    }

    pub fn source(&self) -> Option<&Arc<LogicalPlan>> {
        match self {
            LogicalPlan::InMemory { .. } | LogicalPlan::Scoped { .. } => None,
            LogicalPlan::Filter { source, .. }
            | LogicalPlan::Select { source, .. }
            | LogicalPlan::AddField { source, .. }
            | LogicalPlan::Explode { source, .. }
            | LogicalPlan::Sort { source, .. }
            | LogicalPlan::TopK { source, .. }
            | LogicalPlan::Shuffle { source, .. }
            | LogicalPlan::Head { source, .. }
            | LogicalPlan::Tail { source, .. }
            | LogicalPlan::Take { source, .. }
            | LogicalPlan::Sample { source, .. }
            | LogicalPlan::Reverse { source }
            | LogicalPlan::Aggregate { source, .. }
            | LogicalPlan::GroupBy { source, .. }
            | LogicalPlan::IndexBy { source, .. }
            | LogicalPlan::Append { source, .. }
            | LogicalPlan::Insert { source, .. }
            | LogicalPlan::Set { source, .. }
            | LogicalPlan::Remove { source, .. } => Some(source),
        }
    }

    pub(crate) fn node_name(&self) -> String {
        match self {
            LogicalPlan::InMemory { trees, .. } => format!("in-memory[{}]", trees.len()),
            LogicalPlan::Scoped { source, .. } => {
                format!("scoped[{}, {}]", source.name(), source.len())
            }
            LogicalPlan::Filter { predicate, .. } => format!("filter[{predicate:?}]"),
            LogicalPlan::Select { exprs, .. } => {
                format!(
                    "select[{}]",
                    exprs.iter().map(|e| e.name.as_str()).join(", ")
                )
            }
            LogicalPlan::AddField { name, expr, .. } => format!("add-field[{name} = {expr:?}]"),
            LogicalPlan::Explode { path, .. } => format!("explode[{}]", path.dotted()),
            LogicalPlan::Sort { keys, .. } => format!("sort[{keys:?}]"),
            LogicalPlan::TopK { keys, n, .. } => format!("top-k[{keys:?}, {n}]"),
            LogicalPlan::Shuffle { seed, .. } => format!("shuffle[seed={seed}]"),
            LogicalPlan::Head { n, .. } => format!("head[{n}]"),
            LogicalPlan::Tail { n, .. } => format!("tail[{n}]"),
            LogicalPlan::Take { indices, .. } => format!("take[{} indices]", indices.len()),
            LogicalPlan::Sample { n, seed, .. } => format!("sample[{n}, seed={seed}]"),
            LogicalPlan::Reverse { .. } => "reverse".to_owned(),
            LogicalPlan::Aggregate { exprs, .. } => {
                format!("agg[{}]", exprs.iter().map(|e| e.name()).join(", "))
            }
            LogicalPlan::GroupBy { keys, .. } => {
                format!("group-by[{}]", keys.iter().map(|k| k.dotted()).join(", "))
            }
            LogicalPlan::IndexBy { key, .. } => format!("index-by[{}]", key.dotted()),
            LogicalPlan::Append { trees, .. } => format!("append[{}]", trees.len()),
            LogicalPlan::Insert {
                position, trees, ..
            } => format!("insert[@{position}, {}]", trees.len()),
            LogicalPlan::Set { index, .. } => format!("set[@{index}]"),
            LogicalPlan::Remove { indices, .. } => format!("remove[{} indices]", indices.len()),
        }
    }

    /// Human-readable rendering of the plan tree, one node per line,
    /// children indented under their parent.
    pub fn describe(&self) -> String {
        fn render(plan: &LogicalPlan, depth: usize, out: &mut String) {
            let _ = writeln!(out, "{}{}", "  ".repeat(depth), plan.node_name());
            if let Some(source) = plan.source() {
                render(source, depth + 1, out);
            }
        }
        let mut out = String::new();
        render(self, 0, &mut out);
        out
    }
}

/// Statically provable result length of a plan, when one exists. Rules
/// that need lengths are skipped when this returns `None`.
pub fn plan_length(plan: &LogicalPlan) -> Option<usize> {
    match plan {
        LogicalPlan::InMemory { trees, .. } => Some(trees.len()),
        LogicalPlan::Scoped { source, .. } => Some(source.len()),
        LogicalPlan::Filter { .. }
        | LogicalPlan::Explode { .. }
        | LogicalPlan::GroupBy { .. } => None,
        LogicalPlan::Aggregate { .. } | LogicalPlan::IndexBy { .. } => Some(1),
        LogicalPlan::Select { source, .. }
        | LogicalPlan::AddField { source, .. }
        | LogicalPlan::Sort { source, .. }
        | LogicalPlan::Shuffle { source, .. }
        | LogicalPlan::Reverse { source }
        | LogicalPlan::Set { source, .. } => plan_length(source),
        LogicalPlan::Head { source, n } | LogicalPlan::Tail { source, n } => {
            plan_length(source).map(|len| len.min(*n))
        }
        LogicalPlan::TopK { source, n, .. } => plan_length(source).map(|len| len.min(*n)),
        LogicalPlan::Take { source, indices } => {
            let len = plan_length(source)?;
            let unique = indices.iter().unique().collect_vec();
            if unique.iter().any(|&&index| index >= len) {
                return None;
            }
            Some(unique.len())
        }
        LogicalPlan::Sample { source, n, .. } => plan_length(source).map(|len| len.min(*n)),
        LogicalPlan::Append { source, trees } => {
            plan_length(source).map(|len| len + trees.len())
        }
        LogicalPlan::Insert {
            source,
            position,
            trees,
            ..
        } => {
            let len = plan_length(source)?;
            (*position <= len).then(|| len + trees.len())
        }
        LogicalPlan::Remove { source, indices } => {
            let len = plan_length(source)?;
            let unique = indices.iter().unique().collect_vec();
            if unique.iter().any(|&&index| index >= len) {
                return None;
            }
            Some(len - unique.len())
        }
    }
}
