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

//! Predicates, projection expressions, sort keys, and aggregations.
//!
//! These are the closed forms the executor interprets. Evaluation is pure
//! and total: comparing values of incompatible kinds is `false`, and a
//! missing field reads as `Null`.

use std::cmp::Ordering;
use std::fmt::{Debug, Formatter};

use crate::tree::{cmp_values, FieldPath, TreeValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    fn matches(self, ordering: Ordering) -> bool {
        match self {
            CmpOp::Eq => ordering == Ordering::Equal,
            CmpOp::Ne => ordering != Ordering::Equal,
            CmpOp::Lt => ordering == Ordering::Less,
            CmpOp::Le => ordering != Ordering::Greater,
            CmpOp::Gt => ordering == Ordering::Greater,
            CmpOp::Ge => ordering != Ordering::Less,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

#[derive(Clone, PartialEq)]
pub enum Expr {
    Field(FieldPath),
    Literal(TreeValue),
    Cmp {
        op: CmpOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    IsNull(Box<Expr>),
}

impl Debug for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Field(path) => write!(f, "{}", path.dotted()),
            Expr::Literal(value) => write!(f, "{value:?}"),
            Expr::Cmp { op, lhs, rhs } => write!(f, "({lhs:?} {} {rhs:?})", op.symbol()),
            Expr::And(lhs, rhs) => write!(f, "({lhs:?} && {rhs:?})"),
            Expr::Or(lhs, rhs) => write!(f, "({lhs:?} || {rhs:?})"),
            Expr::Not(inner) => write!(f, "!{inner:?}"),
            Expr::IsNull(inner) => write!(f, "is_null({inner:?})"),
        }
    }
}

impl Expr {
    pub fn field(path: impl Into<FieldPath>) -> Expr {
        Expr::Field(path.into())
    }

    pub fn literal(value: impl Into<TreeValue>) -> Expr {
        Expr::Literal(value.into())
    }

    pub fn cmp(op: CmpOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Cmp {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn eq(self, rhs: Expr) -> Expr {
        Expr::cmp(CmpOp::Eq, self, rhs)
    }

    pub fn ne(self, rhs: Expr) -> Expr {
        Expr::cmp(CmpOp::Ne, self, rhs)
    }

    pub fn lt(self, rhs: Expr) -> Expr {
        Expr::cmp(CmpOp::Lt, self, rhs)
    }

    pub fn le(self, rhs: Expr) -> Expr {
        Expr::cmp(CmpOp::Le, self, rhs)
    }

    pub fn gt(self, rhs: Expr) -> Expr {
        Expr::cmp(CmpOp::Gt, self, rhs)
    }

    pub fn ge(self, rhs: Expr) -> Expr {
        Expr::cmp(CmpOp::Ge, self, rhs)
    }

    pub fn and(self, rhs: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(rhs))
    }

    pub fn or(self, rhs: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(rhs))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    pub fn is_null(self) -> Expr {
        Expr::IsNull(Box::new(self))
    }

    /// Evaluates against a tree root. Missing fields read as `Null`.
    pub fn eval(&self, tree: &TreeValue) -> TreeValue {
        match self {
            Expr::Field(path) => path.lookup(tree).cloned().unwrap_or(TreeValue::Null),
            Expr::Literal(value) => value.clone(),
            Expr::Cmp { op, lhs, rhs } => {
                let lhs = lhs.eval(tree);
                let rhs = rhs.eval(tree);
                TreeValue::Bool(compare(*op, &lhs, &rhs))
            }
            Expr::And(lhs, rhs) => {
                TreeValue::Bool(lhs.eval_bool(tree) && rhs.eval_bool(tree))
            }
            Expr::Or(lhs, rhs) => TreeValue::Bool(lhs.eval_bool(tree) || rhs.eval_bool(tree)),
            Expr::Not(inner) => TreeValue::Bool(!inner.eval_bool(tree)),
            Expr::IsNull(inner) => TreeValue::Bool(inner.eval(tree).is_null()),
        }
    }

    pub fn eval_bool(&self, tree: &TreeValue) -> bool {
        matches!(self.eval(tree), TreeValue::Bool(true))
    }

    /// Top-level field names the expression reads. Used for schema
    /// validation and predicate pushdown.
    pub fn referenced_roots(&self) -> Vec<&str> {
        let mut roots = vec![];
        self.collect_roots(&mut roots);
        roots.sort_unstable();
        roots.dedup();
        roots
    }

    fn collect_roots<'a>(&'a self, roots: &mut Vec<&'a str>) {
        match self {
            Expr::Field(path) => roots.push(path.root_key()),
            Expr::Literal(_) => {}
            Expr::Cmp { lhs, rhs, .. } => {
                lhs.collect_roots(roots);
                rhs.collect_roots(roots);
            }
            Expr::And(lhs, rhs) | Expr::Or(lhs, rhs) => {
                lhs.collect_roots(roots);
                rhs.collect_roots(roots);
            }
            Expr::Not(inner) | Expr::IsNull(inner) => inner.collect_roots(roots),
        }
    }

    /// Static selectivity estimate in `[0, 1]`; smaller means fewer rows
    /// survive. The optimizer orders fused filter conjuncts by this.
    pub fn selectivity(&self) -> f64 {
        match self {
            Expr::Field(_) | Expr::Literal(_) => 0.5,
            Expr::Cmp { op, .. } => match op {
                CmpOp::Eq => 0.1,
                CmpOp::Ne => 0.9,
                _ => 0.3,
            },
            Expr::And(lhs, rhs) => lhs.selectivity() * rhs.selectivity(),
            Expr::Or(lhs, rhs) => (lhs.selectivity() + rhs.selectivity()).min(1.0),
            Expr::Not(inner) => 1.0 - inner.selectivity(),
            Expr::IsNull(_) => 0.1,
        }
    }
}

fn compare(op: CmpOp, lhs: &TreeValue, rhs: &TreeValue) -> bool {
    let comparable = lhs.kind_name() == rhs.kind_name()
        || (lhs.as_f64().is_some() && rhs.as_f64().is_some());
    match op {
        // Equality is structural and total.
        CmpOp::Eq | CmpOp::Ne => op.matches(cmp_values(lhs, rhs)),
        // Ordering across incompatible kinds is not meaningful; the
        // comparison is false rather than kind-rank ordered.
        _ if !comparable => false,
        _ => op.matches(cmp_values(lhs, rhs)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub path: FieldPath,
    pub direction: Direction,
}

impl SortKey {
    pub fn asc(path: impl Into<FieldPath>) -> Self {
        SortKey {
            path: path.into(),
            direction: Direction::Ascending,
        }
    }

    pub fn desc(path: impl Into<FieldPath>) -> Self {
        SortKey {
            path: path.into(),
            direction: Direction::Descending,
        }
    }
}

/// An ordered list of sort keys; earlier keys dominate.
#[derive(Debug, Clone, PartialEq)]
pub struct KeySpec {
    keys: Vec<SortKey>,
}

impl KeySpec {
    pub fn new(keys: Vec<SortKey>) -> Self {
        assert!(!keys.is_empty(), "sort needs at least one key");
        KeySpec { keys }
    }

    pub fn single(path: impl Into<FieldPath>) -> Self {
        KeySpec::new(vec![SortKey::asc(path)])
    }

    pub fn single_desc(path: impl Into<FieldPath>) -> Self {
        KeySpec::new(vec![SortKey::desc(path)])
    }

    pub fn keys(&self) -> &[SortKey] {
        &self.keys
    }

    pub fn referenced_roots(&self) -> Vec<&str> {
        let mut roots: Vec<&str> = self.keys.iter().map(|key| key.path.root_key()).collect();
        roots.sort_unstable();
        roots.dedup();
        roots
    }

    /// Compares two trees under this key spec. Missing fields read as
    /// `Null` and therefore sort first in ascending order.
    pub fn cmp_trees(&self, lhs: &TreeValue, rhs: &TreeValue) -> Ordering {
        for key in &self.keys {
            let null = TreeValue::Null;
            let a = key.path.lookup(lhs).unwrap_or(&null);
            let b = key.path.lookup(rhs).unwrap_or(&null);
            let ordering = match key.direction {
                Direction::Ascending => cmp_values(a, b),
                Direction::Descending => cmp_values(b, a),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

/// One projected output field.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectExpr {
    pub name: String,
    pub expr: Expr,
}

impl SelectExpr {
    pub fn new(name: impl Into<String>, expr: Expr) -> Self {
        SelectExpr {
            name: name.into(),
            expr,
        }
    }

    /// A projection that copies a field through under its own name.
    pub fn passthrough(path: impl Into<FieldPath>) -> Self {
        let path = path.into();
        SelectExpr {
            name: path.last_key().to_owned(),
            expr: Expr::Field(path),
        }
    }

    /// True when this entry copies a top-level field unchanged.
    pub fn is_identity(&self) -> bool {
        match &self.expr {
            Expr::Field(path) => path.keys().len() == 1 && path.root_key() == self.name,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggExpr {
    Count { name: String },
    Sum { name: String, path: FieldPath },
    Min { name: String, path: FieldPath },
    Max { name: String, path: FieldPath },
    Mean { name: String, path: FieldPath },
}

impl AggExpr {
    pub fn name(&self) -> &str {
        match self {
            AggExpr::Count { name }
            | AggExpr::Sum { name, .. }
            | AggExpr::Min { name, .. }
            | AggExpr::Max { name, .. }
            | AggExpr::Mean { name, .. } => name,
        }
    }

    pub fn path(&self) -> Option<&FieldPath> {
        match self {
            AggExpr::Count { .. } => None,
            AggExpr::Sum { path, .. }
            | AggExpr::Min { path, .. }
            | AggExpr::Max { path, .. }
            | AggExpr::Mean { path, .. } => Some(path),
        }
    }
}
