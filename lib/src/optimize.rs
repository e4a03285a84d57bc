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

//! Plan rewriting. Every pass returns a semantically equivalent plan;
//! optimization never fails. Passes run to a fixed point under a bounded
//! rewrite budget.

use std::sync::Arc;

use itertools::Itertools;
use tracing::trace;

use crate::expr::Expr;
use crate::plan::{plan_length, LogicalPlan};
use crate::store::StoredArbor;

const MAX_REWRITE_ROUNDS: usize = 16;

/// Rebuilds a node around a new source, keeping the payload. Leaves have
/// no source and are returned unchanged.
fn with_source(plan: &LogicalPlan, source: Arc<LogicalPlan>) -> LogicalPlan {
    match plan {
        LogicalPlan::InMemory { .. } | LogicalPlan::Scoped { .. } => plan.clone(),
        LogicalPlan::Filter { predicate, .. } => LogicalPlan::Filter {
            source,
            predicate: predicate.clone(),
        },
        LogicalPlan::Select { exprs, .. } => LogicalPlan::Select {
            source,
            exprs: exprs.clone(),
        },
        LogicalPlan::AddField { name, expr, .. } => LogicalPlan::AddField {
            source,
            name: name.clone(),
            expr: expr.clone(),
        },
        LogicalPlan::Explode {
            path, as_binding, ..
        } => LogicalPlan::Explode {
            source,
            path: path.clone(),
            as_binding: as_binding.clone(),
        },
        LogicalPlan::Sort { keys, .. } => LogicalPlan::Sort {
            source,
            keys: keys.clone(),
        },
        LogicalPlan::TopK { keys, n, .. } => LogicalPlan::TopK {
            source,
            keys: keys.clone(),
            n: *n,
        },
        LogicalPlan::Shuffle { seed, .. } => LogicalPlan::Shuffle { source, seed: *seed },
        LogicalPlan::Head { n, .. } => LogicalPlan::Head { source, n: *n },
        LogicalPlan::Tail { n, .. } => LogicalPlan::Tail { source, n: *n },
        LogicalPlan::Take { indices, .. } => LogicalPlan::Take {
            source,
            indices: indices.clone(),
        },
        LogicalPlan::Sample { n, seed, .. } => LogicalPlan::Sample {
            source,
            n: *n,
            seed: *seed,
        },
        LogicalPlan::Reverse { .. } => LogicalPlan::Reverse { source },
        LogicalPlan::Aggregate { exprs, .. } => LogicalPlan::Aggregate {
            source,
            exprs: exprs.clone(),
        },
        LogicalPlan::GroupBy { keys, .. } => LogicalPlan::GroupBy {
            source,
            keys: keys.clone(),
        },
        LogicalPlan::IndexBy { key, .. } => LogicalPlan::IndexBy {
            source,
            key: key.clone(),
        },
        LogicalPlan::Append { trees, .. } => LogicalPlan::Append {
            source,
            trees: trees.clone(),
        },
        LogicalPlan::Insert {
            slot,
            position,
            trees,
            ..
        } => LogicalPlan::Insert {
            source,
            slot: *slot,
            position: *position,
            trees: trees.clone(),
        },
        LogicalPlan::Set { index, tree, .. } => LogicalPlan::Set {
            source,
            index: *index,
            tree: tree.clone(),
        },
        LogicalPlan::Remove { indices, .. } => LogicalPlan::Remove {
            source,
            indices: indices.clone(),
        },
    }
}

/// Walks the plan tree and applies `f` recursively from leaf nodes.
///
/// If `f` returns `None`, the original node is reused. If no nodes were
/// rewritten, returns `None`.
fn transform_plan_bottom_up(
    plan: &Arc<LogicalPlan>,
    mut f: impl FnMut(&Arc<LogicalPlan>) -> Option<Arc<LogicalPlan>>,
) -> Option<Arc<LogicalPlan>> {
    fn transform_child_rec(
        plan: &Arc<LogicalPlan>,
        f: &mut impl FnMut(&Arc<LogicalPlan>) -> Option<Arc<LogicalPlan>>,
    ) -> Option<Arc<LogicalPlan>> {
        let source = plan.source()?;
        transform_rec(source, f).map(|new_source| Arc::new(with_source(plan, new_source)))
    }

    fn transform_rec(
        plan: &Arc<LogicalPlan>,
        f: &mut impl FnMut(&Arc<LogicalPlan>) -> Option<Arc<LogicalPlan>>,
    ) -> Option<Arc<LogicalPlan>> {
        if let Some(transformed) = transform_child_rec(plan, f) {
            // The node was rewritten due to its child. Apply the rule to
            // the new node, and return the rewritten node.
            Some(f(&transformed).unwrap_or(transformed))
        } else {
            f(plan)
        }
    }

    transform_rec(plan, &mut f)
}

/// Flattens a conjunction into its conjunct chain.
fn collect_conjuncts(expr: &Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::And(lhs, rhs) => {
            collect_conjuncts(lhs, out);
            collect_conjuncts(rhs, out);
        }
        other => out.push(other.clone()),
    }
}

/// Rebuilds a conjunction ordered cheapest-first. Ties keep their
/// original position (the sort is stable).
fn conjoin_by_selectivity(mut conjuncts: Vec<Expr>) -> Expr {
    conjuncts.sort_by(|a, b| {
        a.selectivity()
            .partial_cmp(&b.selectivity())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let mut iter = conjuncts.into_iter();
    let first = iter.next().expect("conjunction must have a conjunct");
    iter.fold(first, Expr::and)
}

/// Combines adjacent filters into one conjunction, ordered by estimated
/// selectivity.
fn fuse_filters(plan: &Arc<LogicalPlan>) -> Option<Arc<LogicalPlan>> {
    transform_plan_bottom_up(plan, |node| {
        let LogicalPlan::Filter { source, predicate } = node.as_ref() else {
            return None;
        };
        let LogicalPlan::Filter {
            source: inner_source,
            predicate: inner_predicate,
        } = source.as_ref()
        else {
            return None;
        };
        let mut conjuncts = vec![];
        collect_conjuncts(inner_predicate, &mut conjuncts);
        collect_conjuncts(predicate, &mut conjuncts);
        Some(inner_source.filter(conjoin_by_selectivity(conjuncts)))
    })
}

/// Pushes filters below projections that preserve the referenced fields.
fn push_filters_down(plan: &Arc<LogicalPlan>) -> Option<Arc<LogicalPlan>> {
    transform_plan_bottom_up(plan, |node| {
        let LogicalPlan::Filter { source, predicate } = node.as_ref() else {
            return None;
        };
        match source.as_ref() {
            LogicalPlan::AddField {
                source: inner,
                name,
                expr,
            } => {
                // Safe only when the predicate cannot see the added field.
                if predicate.referenced_roots().contains(&name.as_str()) {
                    return None;
                }
                Some(
                    inner
                        .filter((**predicate).clone())
                        .add_field(name.clone(), (**expr).clone()),
                )
            }
            LogicalPlan::Select {
                source: inner,
                exprs,
            } => {
                let preserved = predicate.referenced_roots().iter().all(|root| {
                    exprs
                        .iter()
                        .any(|entry| entry.is_identity() && entry.name == *root)
                });
                if !preserved {
                    return None;
                }
                Some(inner.filter((**predicate).clone()).select((**exprs).clone()))
            }
            _ => None,
        }
    })
}

/// `head∘head` and `tail∘tail` collapse to the smaller limit.
fn fuse_limits(plan: &Arc<LogicalPlan>) -> Option<Arc<LogicalPlan>> {
    transform_plan_bottom_up(plan, |node| match node.as_ref() {
        LogicalPlan::Head { source, n } => match source.as_ref() {
            LogicalPlan::Head {
                source: inner,
                n: m,
            } => Some(inner.head((*n).min(*m))),
            _ => None,
        },
        LogicalPlan::Tail { source, n } => match source.as_ref() {
            LogicalPlan::Tail {
                source: inner,
                n: m,
            } => Some(inner.tail((*n).min(*m))),
            _ => None,
        },
        _ => None,
    })
}

/// Pushes limits below prefix-preserving operations and fuses
/// `head∘sort` into a bounded top-k.
fn push_limits_down(plan: &Arc<LogicalPlan>) -> Option<Arc<LogicalPlan>> {
    transform_plan_bottom_up(plan, |node| {
        let LogicalPlan::Head { source, n } = node.as_ref() else {
            return None;
        };
        match source.as_ref() {
            LogicalPlan::Sort {
                source: inner,
                keys,
            } => Some(Arc::new(LogicalPlan::TopK {
                source: inner.clone(),
                keys: keys.clone(),
                n: *n,
            })),
            LogicalPlan::TopK {
                source: inner,
                keys,
                n: m,
            } => Some(Arc::new(LogicalPlan::TopK {
                source: inner.clone(),
                keys: keys.clone(),
                n: (*n).min(*m),
            })),
            LogicalPlan::Select {
                source: inner,
                exprs,
            } => Some(inner.head(*n).select((**exprs).clone())),
            LogicalPlan::AddField {
                source: inner,
                name,
                expr,
            } => Some(inner.head(*n).add_field(name.clone(), (**expr).clone())),
            _ => None,
        }
    })
}

/// Drops mutations whose effect cannot be observed downstream.
fn elide_mutations(plan: &Arc<LogicalPlan>) -> Option<Arc<LogicalPlan>> {
    transform_plan_bottom_up(plan, |node| match node.as_ref() {
        // Empty mutations are identities.
        LogicalPlan::Append { source, trees } if trees.is_empty() => Some(source.clone()),
        LogicalPlan::Insert { source, trees, .. } if trees.is_empty() => Some(source.clone()),
        LogicalPlan::Remove { source, indices } if indices.is_empty() => Some(source.clone()),
        // A later set at the same position wins.
        LogicalPlan::Set {
            source,
            index,
            tree,
        } => match source.as_ref() {
            LogicalPlan::Set {
                source: inner,
                index: inner_index,
                ..
            } if index == inner_index => Some(inner.set(*index, tree.clone())),
            _ => None,
        },
        // Removing exactly the trees appended by the child undoes it.
        LogicalPlan::Remove { source, indices } => match source.as_ref() {
            LogicalPlan::Append {
                source: inner,
                trees,
            } => {
                let inner_len = plan_length(inner)?;
                let mut removed = indices.iter().copied().unique().collect_vec();
                removed.sort_unstable();
                let appended = (inner_len..inner_len + trees.len()).collect_vec();
                (removed == appended).then(|| inner.clone())
            }
            _ => None,
        },
        LogicalPlan::Head { source, n } => match source.as_ref() {
            // head(n) over append is untouched when the base alone covers n.
            LogicalPlan::Append { source: inner, .. } => {
                (plan_length(inner)? >= *n).then(|| inner.head(*n))
            }
            // head(n) over a set past the cut is untouched by it.
            LogicalPlan::Set {
                source: inner,
                index,
                ..
            } => (*index >= *n).then(|| inner.head(*n)),
            _ => None,
        },
        LogicalPlan::Tail { source, n } => match source.as_ref() {
            // tail(n) over a set before the kept suffix is untouched.
            LogicalPlan::Set {
                source: inner,
                index,
                ..
            } => {
                let inner_len = plan_length(inner)?;
                (*index < inner_len.saturating_sub(*n)).then(|| inner.tail(*n))
            }
            _ => None,
        },
        _ => None,
    })
}

/// Rebuilds the plan with its scoped leaf bound to a fresh snapshot.
/// Used by refresh; non-scoped plans are returned unchanged.
pub(crate) fn rebind_scoped(
    plan: &Arc<LogicalPlan>,
    stored: &StoredArbor,
) -> Arc<LogicalPlan> {
    match plan.as_ref() {
        LogicalPlan::Scoped { scan_budget, .. } => {
            LogicalPlan::scoped(stored.clone(), *scan_budget)
        }
        _ => match plan.source() {
            Some(source) => Arc::new(with_source(plan, rebind_scoped(source, stored))),
            None => plan.clone(),
        },
    }
}

/// Rewrites the plan to an equivalent plan with lower execution cost.
pub fn optimize(plan: Arc<LogicalPlan>) -> Arc<LogicalPlan> {
    let passes: [(&str, fn(&Arc<LogicalPlan>) -> Option<Arc<LogicalPlan>>); 5] = [
        ("fuse_filters", fuse_filters),
        ("push_filters_down", push_filters_down),
        ("fuse_limits", fuse_limits),
        ("push_limits_down", push_limits_down),
        ("elide_mutations", elide_mutations),
    ];
    let mut current = plan;
    for _ in 0..MAX_REWRITE_ROUNDS {
        let mut changed = false;
        for (name, pass) in &passes {
            if let Some(rewritten) = pass(&current) {
                trace!(pass = name, "plan rewrite fired");
                current = rewritten;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    current
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;
    use crate::expr::{KeySpec, SelectExpr};
    use crate::tree::{OwnedTree, TreeValue};

    fn leaf(n: usize) -> Arc<LogicalPlan> {
        LogicalPlan::in_memory(
            (0..n)
                .map(|i| OwnedTree::new(TreeValue::Int(i as i64)))
                .collect(),
            None,
        )
    }

    fn lit(n: i64) -> Expr {
        Expr::literal(TreeValue::Int(n))
    }

    #[test]
    fn test_fuse_filters_orders_by_selectivity() {
        let range = Expr::field("a").gt(lit(1));
        let eq = Expr::field("b").eq(lit(2));
        let plan = leaf(5).filter(range.clone()).filter(eq.clone());
        let optimized = optimize(plan);
        // One fused filter, equality first.
        let LogicalPlan::Filter { source, predicate } = optimized.as_ref() else {
            panic!("expected filter, got {optimized:?}");
        };
        assert_matches!(source.as_ref(), LogicalPlan::InMemory { .. });
        assert_eq!(**predicate, eq.and(range));
    }

    #[test]
    fn test_push_filter_past_add_field() {
        let pred = Expr::field("a").eq(lit(1));
        let plan = leaf(5).add_field("derived", lit(1)).filter(pred.clone());
        let optimized = optimize(plan);
        let LogicalPlan::AddField { source, .. } = optimized.as_ref() else {
            panic!("expected add-field on top, got {optimized:?}");
        };
        assert_matches!(source.as_ref(), LogicalPlan::Filter { .. });

        // Referencing the added field blocks the pushdown.
        let pred = Expr::field("derived").eq(lit(1));
        let plan = leaf(5).add_field("derived", lit(1)).filter(pred);
        let optimized = optimize(plan);
        assert_matches!(optimized.as_ref(), LogicalPlan::Filter { .. });
    }

    #[test]
    fn test_push_filter_past_identity_select() {
        let pred = Expr::field("a").eq(lit(1));
        let exprs = vec![SelectExpr::passthrough("a"), SelectExpr::passthrough("b")];
        let plan = leaf(5).select(exprs.clone()).filter(pred.clone());
        let optimized = optimize(plan);
        assert_matches!(optimized.as_ref(), LogicalPlan::Select { .. });

        // A renaming projection blocks the pushdown.
        let renamed = vec![SelectExpr::new("a", Expr::field("b"))];
        let plan = leaf(5).select(renamed).filter(pred);
        let optimized = optimize(plan);
        assert_matches!(optimized.as_ref(), LogicalPlan::Filter { .. });
    }

    #[test]
    fn test_fuse_limits() {
        let plan = leaf(10).head(5).head(7);
        let optimized = optimize(plan);
        assert_matches!(optimized.as_ref(), LogicalPlan::Head { n: 5, .. });
        let plan = leaf(10).tail(2).tail(9);
        let optimized = optimize(plan);
        assert_matches!(optimized.as_ref(), LogicalPlan::Tail { n: 2, .. });
    }

    #[test]
    fn test_top_k_fusion() {
        let plan = leaf(10).sort(KeySpec::single("n")).head(3);
        let optimized = optimize(plan);
        let LogicalPlan::TopK { source, n, .. } = optimized.as_ref() else {
            panic!("expected top-k, got {optimized:?}");
        };
        assert_eq!(*n, 3);
        assert_matches!(source.as_ref(), LogicalPlan::InMemory { .. });
    }

    #[test]
    fn test_empty_mutations_elided() {
        let base = leaf(3);
        assert!(Arc::ptr_eq(&optimize(base.append(vec![])), &base));
        assert!(Arc::ptr_eq(&optimize(base.remove(vec![])), &base));
        assert!(Arc::ptr_eq(&optimize(base.insert(1, vec![])), &base));
    }

    #[test]
    fn test_set_set_elision() {
        let a = OwnedTree::new(TreeValue::Int(1));
        let b = OwnedTree::new(TreeValue::Int(2));
        let plan = leaf(3).set(1, a).set(1, b.clone());
        let optimized = optimize(plan);
        let LogicalPlan::Set { source, index, tree } = optimized.as_ref() else {
            panic!("expected set, got {optimized:?}");
        };
        assert_eq!(*index, 1);
        assert_eq!(tree, &b);
        assert_matches!(source.as_ref(), LogicalPlan::InMemory { .. });
    }

    #[test]
    fn test_head_over_append_elision() {
        let tree = OwnedTree::new(TreeValue::Null);
        let plan = leaf(5).append(vec![tree.clone()]).head(3);
        let optimized = optimize(plan);
        let LogicalPlan::Head { source, n: 3 } = optimized.as_ref() else {
            panic!("expected head, got {optimized:?}");
        };
        assert_matches!(source.as_ref(), LogicalPlan::InMemory { .. });

        // head(6) still needs the appended tree.
        let plan = leaf(5).append(vec![tree]).head(6);
        let optimized = optimize(plan);
        let LogicalPlan::Head { source, .. } = optimized.as_ref() else {
            panic!("expected head, got {optimized:?}");
        };
        assert_matches!(source.as_ref(), LogicalPlan::Append { .. });
    }

    #[test]
    fn test_remove_of_appended_tree_elided() {
        let base = leaf(3);
        let plan = base.append(vec![OwnedTree::new(TreeValue::Null)]).remove(vec![3]);
        let optimized = optimize(plan);
        assert!(Arc::ptr_eq(&optimized, &base));
    }

    #[test]
    fn test_head_over_late_set_elision() {
        let tree = OwnedTree::new(TreeValue::Null);
        let plan = leaf(5).set(4, tree.clone()).head(2);
        let optimized = optimize(plan);
        let LogicalPlan::Head { source, .. } = optimized.as_ref() else {
            panic!("expected head, got {optimized:?}");
        };
        assert_matches!(source.as_ref(), LogicalPlan::InMemory { .. });

        // A set inside the prefix is kept.
        let plan = leaf(5).set(1, tree).head(2);
        let optimized = optimize(plan);
        let LogicalPlan::Head { source, .. } = optimized.as_ref() else {
            panic!("expected head, got {optimized:?}");
        };
        assert_matches!(source.as_ref(), LogicalPlan::Set { .. });
    }

    #[test]
    fn test_optimizer_terminates_on_deep_chain() {
        let mut plan = leaf(100);
        for i in 0..40 {
            plan = plan.head(100 - i);
        }
        let optimized = optimize(plan);
        assert_matches!(optimized.as_ref(), LogicalPlan::Head { n: 61, .. });
    }
}
