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

//! Physical execution of logical plans.
//!
//! Query nodes collapse their input into an index selection and produce a
//! new one; mutation nodes produce composite selections over the same
//! root source, extending an existing layer in place of nesting. Content
//! transforms (select, explode, aggregation) and content-sensitive
//! operations downstream of composites produce fully materialized
//! in-memory results, built by direct value copying.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;

use indexmap::IndexMap;
use itertools::Itertools;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha12Rng;
use tracing::debug;

use crate::arbor::ArborError;
use crate::codec;
use crate::expr::{AggExpr, Direction, Expr, KeySpec, SelectExpr};
use crate::index::{
    CompositeIndexSet, IndexOutOfBounds, IndexSet, MutationLayer, Spread, VirtualIndex,
};
use crate::iter::TreeIter;
use crate::plan::LogicalPlan;
use crate::schema::Schema;
use crate::store::StoredArbor;
use crate::tree::{cmp_values, FieldPath, OwnedTree, TreeValue};

pub const DEFAULT_SCAN_BUDGET: usize = 256;

/// The leaf source a selection's base coordinates refer to.
#[derive(Debug, Clone)]
pub enum RootSource {
    InMemory {
        trees: Arc<Vec<OwnedTree>>,
        schema: Option<Schema>,
    },
    Stored {
        arbor: StoredArbor,
        scan_budget: usize,
    },
}

impl RootSource {
    pub fn len(&self) -> usize {
        match self {
            RootSource::InMemory { trees, .. } => trees.len(),
            RootSource::Stored { arbor, .. } => arbor.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn schema(&self) -> Option<Schema> {
        match self {
            RootSource::InMemory { schema, .. } => schema.clone(),
            RootSource::Stored { arbor, .. } => arbor.schema().cloned(),
        }
    }

    pub fn scan_budget(&self) -> usize {
        match self {
            RootSource::InMemory { .. } => DEFAULT_SCAN_BUDGET,
            RootSource::Stored { scan_budget, .. } => *scan_budget,
        }
    }

    /// Batch granularity for grouped decoding; in-memory sources have no
    /// batches.
    pub fn trees_per_batch(&self) -> Option<usize> {
        match self {
            RootSource::InMemory { .. } => None,
            RootSource::Stored { arbor, .. } => Some(arbor.trees_per_batch()),
        }
    }

    /// Fetches one tree by backing index.
    pub fn get(&self, backing_index: usize) -> Result<OwnedTree, ArborError> {
        match self {
            RootSource::InMemory { trees, .. } => {
                trees.get(backing_index).cloned().ok_or_else(|| {
                    ArborError::Execution(format!(
                        "backing index {backing_index} outside the root source"
                    ))
                })
            }
            RootSource::Stored { arbor, .. } => Ok(arbor.get(backing_index)?),
        }
    }
}

/// The output of executing a plan node. Selections stay in the root
/// source's coordinate space; materialized results become fresh in-memory
/// root sources selected in full.
#[derive(Debug, Clone)]
pub enum PhysicalResult {
    /// A pure selection over a single root source.
    Indices { source: RootSource, set: IndexSet },
    /// A permuted or hole-punched selection with no overlay trees.
    CompositeIndices {
        source: RootSource,
        indices: CompositeIndexSet,
    },
    /// A selection plus overlay. Never nests: chained mutations extend
    /// `layer` and `indices` in place.
    Composite {
        source: RootSource,
        layer: Arc<MutationLayer>,
        indices: CompositeIndexSet,
    },
}

impl PhysicalResult {
    pub fn in_memory(trees: Vec<OwnedTree>, schema: Option<Schema>) -> PhysicalResult {
        let len = trees.len();
        PhysicalResult::Indices {
            source: RootSource::InMemory {
                trees: Arc::new(trees),
                schema,
            },
            set: IndexSet::full(len),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            PhysicalResult::Indices { set, .. } => set.len(),
            PhysicalResult::CompositeIndices { indices, .. } => indices.len(),
            PhysicalResult::Composite { indices, .. } => indices.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn source(&self) -> &RootSource {
        match self {
            PhysicalResult::Indices { source, .. }
            | PhysicalResult::CompositeIndices { source, .. }
            | PhysicalResult::Composite { source, .. } => source,
        }
    }

    pub fn layer(&self) -> Option<&Arc<MutationLayer>> {
        match self {
            PhysicalResult::Composite { layer, .. } => Some(layer),
            _ => None,
        }
    }

    /// The selection as a composite view. For `Indices` this lifts the
    /// index set; composites return their own indices.
    pub fn composite_view(&self) -> CompositeIndexSet {
        match self {
            PhysicalResult::Indices { set, .. } => CompositeIndexSet::from_index_set(set),
            PhysicalResult::CompositeIndices { indices, .. }
            | PhysicalResult::Composite { indices, .. } => indices.clone(),
        }
    }

    /// The virtual index shown at a logical position.
    pub fn virtual_index(&self, logical_pos: usize) -> Result<VirtualIndex, ArborError> {
        let count = self.len();
        if logical_pos >= count {
            return Err(IndexOutOfBounds {
                index: logical_pos,
                count,
            }
            .into());
        }
        Ok(match self {
            PhysicalResult::Indices { set, .. } => {
                VirtualIndex::Base(set.get_backing_index(logical_pos))
            }
            PhysicalResult::CompositeIndices { indices, .. }
            | PhysicalResult::Composite { indices, .. } => indices.get(logical_pos),
        })
    }

    /// Resolves a virtual index to a tree: replacements and overlay first,
    /// then the root source.
    pub fn resolve(&self, index: &VirtualIndex) -> Result<OwnedTree, ArborError> {
        if let Some(layer) = self.layer() {
            if let Some(tree) = layer.resolve(index) {
                return Ok(tree.clone());
            }
        }
        match index {
            VirtualIndex::Base(backing) => self.source().get(*backing),
            other => Err(ArborError::Execution(format!(
                "overlay entry {other:?} has no layer"
            ))),
        }
    }

    /// The tree shown at a logical position.
    pub fn get(&self, logical_pos: usize) -> Result<OwnedTree, ArborError> {
        let index = self.virtual_index(logical_pos)?;
        self.resolve(&index)
    }

    pub fn iter(&self) -> TreeIter<'_> {
        TreeIter::new(self, self.source().scan_budget())
    }

    /// All trees in logical order.
    pub fn collect_trees(&self) -> Result<Vec<OwnedTree>, ArborError> {
        self.iter().collect()
    }
}

/// Evaluates a plan to a physical result.
pub fn execute(plan: &LogicalPlan) -> Result<PhysicalResult, ArborError> {
    match plan {
        LogicalPlan::InMemory { trees, schema } => Ok(PhysicalResult::Indices {
            source: RootSource::InMemory {
                trees: Arc::clone(trees),
                schema: schema.clone(),
            },
            set: IndexSet::full(trees.len()),
        }),
        LogicalPlan::Scoped {
            source,
            scan_budget,
        } => Ok(PhysicalResult::Indices {
            source: RootSource::Stored {
                arbor: source.clone(),
                scan_budget: *scan_budget,
            },
            set: IndexSet::full(source.len()),
        }),
        LogicalPlan::Filter { source, predicate } => {
            let input = materialize_if_composite(execute(source)?)?;
            apply_filter(input, predicate)
        }
        LogicalPlan::Select { source, exprs } => {
            let input = execute(source)?;
            apply_select(&input, exprs)
        }
        LogicalPlan::AddField { source, name, expr } => {
            let input = execute(source)?;
            apply_add_field(&input, name, expr)
        }
        LogicalPlan::Explode {
            source,
            path,
            as_binding,
        } => {
            let input = materialize_if_composite(execute(source)?)?;
            apply_explode(&input, path, as_binding.as_deref())
        }
        LogicalPlan::Sort { source, keys } => {
            let input = materialize_if_composite(execute(source)?)?;
            apply_sort(input, keys)
        }
        LogicalPlan::TopK { source, keys, n } => {
            let input = materialize_if_composite(execute(source)?)?;
            apply_top_k(input, keys, *n)
        }
        LogicalPlan::Shuffle { source, seed } => {
            let input = execute(source)?;
            let mut positions = (0..input.len()).collect_vec();
            let mut rng = ChaCha12Rng::seed_from_u64(*seed);
            positions.shuffle(&mut rng);
            apply_positions(input, &positions)
        }
        LogicalPlan::Head { source, n } => {
            let input = execute(source)?;
            Ok(match input {
                PhysicalResult::Indices { source, set } => PhysicalResult::Indices {
                    source,
                    set: set.head(*n),
                },
                PhysicalResult::CompositeIndices { source, indices } => {
                    PhysicalResult::CompositeIndices {
                        source,
                        indices: indices.head(*n),
                    }
                }
                PhysicalResult::Composite {
                    source,
                    layer,
                    indices,
                } => PhysicalResult::Composite {
                    source,
                    layer,
                    indices: indices.head(*n),
                },
            })
        }
        LogicalPlan::Tail { source, n } => {
            let input = execute(source)?;
            Ok(match input {
                PhysicalResult::Indices { source, set } => PhysicalResult::Indices {
                    source,
                    set: set.tail(*n),
                },
                PhysicalResult::CompositeIndices { source, indices } => {
                    PhysicalResult::CompositeIndices {
                        source,
                        indices: indices.tail(*n),
                    }
                }
                PhysicalResult::Composite {
                    source,
                    layer,
                    indices,
                } => PhysicalResult::Composite {
                    source,
                    layer,
                    indices: indices.tail(*n),
                },
            })
        }
        LogicalPlan::Take { source, indices } => {
            let input = execute(source)?;
            let count = input.len();
            if let Some(&max) = indices.iter().max() {
                if max >= count {
                    return Err(IndexOutOfBounds { index: max, count }.into());
                }
            }
            apply_positions(input, indices)
        }
        LogicalPlan::Sample { source, n, seed } => {
            let input = execute(source)?;
            let len = input.len();
            if *n >= len {
                return Ok(input);
            }
            let mut rng = ChaCha12Rng::seed_from_u64(*seed);
            let mut positions = rand::seq::index::sample(&mut rng, len, *n).into_vec();
            positions.sort_unstable();
            apply_positions(input, &positions)
        }
        LogicalPlan::Reverse { source } => {
            let input = execute(source)?;
            match input {
                PhysicalResult::Indices { source, set } => Ok(PhysicalResult::Indices {
                    source,
                    set: set.reversed(),
                }),
                other => {
                    let positions = (0..other.len()).rev().collect_vec();
                    apply_positions(other, &positions)
                }
            }
        }
        LogicalPlan::Aggregate { source, exprs } => {
            let input = execute(source)?;
            apply_aggregate(&input, exprs)
        }
        LogicalPlan::GroupBy { source, keys } => {
            let input = execute(source)?;
            apply_group_by(&input, keys)
        }
        LogicalPlan::IndexBy { source, key } => {
            let input = execute(source)?;
            apply_index_by(&input, key)
        }
        LogicalPlan::Append { source, trees } => {
            let input = execute(source)?;
            if trees.is_empty() {
                return Ok(input);
            }
            Ok(apply_append(input, trees))
        }
        LogicalPlan::Insert {
            source,
            slot,
            position,
            trees,
        } => {
            let input = execute(source)?;
            if trees.is_empty() {
                return Ok(input);
            }
            apply_insert(input, *slot, *position, trees)
        }
        LogicalPlan::Set {
            source,
            index,
            tree,
        } => {
            let input = execute(source)?;
            apply_set(input, *index, tree)
        }
        LogicalPlan::Remove { source, indices } => {
            let input = execute(source)?;
            if indices.is_empty() {
                return Ok(input);
            }
            apply_remove(input, indices)
        }
    }
}

/// Content-sensitive operations downstream of a composite run against a
/// materialized in-memory copy.
fn materialize_if_composite(result: PhysicalResult) -> Result<PhysicalResult, ArborError> {
    match result {
        PhysicalResult::Indices { .. } => Ok(result),
        other => {
            debug!(len = other.len(), "materializing composite selection");
            materialize(&other)
        }
    }
}

/// Builds a fresh in-memory result by copying resolved values in logical
/// order. No serialization is involved.
pub fn materialize(result: &PhysicalResult) -> Result<PhysicalResult, ArborError> {
    let trees = result.collect_trees()?;
    let schema = Schema::infer(&trees);
    Ok(PhysicalResult::in_memory(trees, Some(schema)))
}

fn apply_filter(input: PhysicalResult, predicate: &Expr) -> Result<PhysicalResult, ArborError> {
    let mut survivors = vec![];
    for (pos, tree) in input.iter().enumerate() {
        let tree = tree?;
        if predicate.eval_bool(tree.root()) {
            survivors.push(pos);
        }
    }
    let PhysicalResult::Indices { source, set } = input else {
        unreachable!("filter input was materialized");
    };
    let keep = Spread::from_unsorted(
        survivors
            .iter()
            .map(|&pos| set.get_backing_index(pos))
            .collect(),
    );
    Ok(PhysicalResult::Indices {
        source,
        set: set.retain_backing(&keep),
    })
}

fn apply_sort(input: PhysicalResult, keys: &KeySpec) -> Result<PhysicalResult, ArborError> {
    let trees = input.collect_trees()?;
    let mut positions = (0..trees.len()).collect_vec();
    positions.sort_by(|&a, &b| keys.cmp_trees(trees[a].root(), trees[b].root()));
    apply_positions(input, &positions)
}

struct TopKEntry {
    key: Vec<(TreeValue, Direction)>,
    pos: usize,
}

impl TopKEntry {
    fn cmp_entries(&self, other: &Self) -> Ordering {
        for ((a, direction), (b, _)) in self.key.iter().zip(&other.key) {
            let ordering = match direction {
                Direction::Ascending => cmp_values(a, b),
                Direction::Descending => cmp_values(b, a),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        self.pos.cmp(&other.pos)
    }
}

impl PartialEq for TopKEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_entries(other) == Ordering::Equal
    }
}

impl Eq for TopKEntry {}

impl PartialOrd for TopKEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TopKEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_entries(other)
    }
}

/// Bounded sort: a max-heap of the `n` best entries seen so far. The full
/// input is scanned but never held sorted in memory.
fn apply_top_k(input: PhysicalResult, keys: &KeySpec, n: usize) -> Result<PhysicalResult, ArborError> {
    if n == 0 {
        return apply_positions(input, &[]);
    }
    let null = TreeValue::Null;
    let mut heap: BinaryHeap<TopKEntry> = BinaryHeap::with_capacity(n + 1);
    for (pos, tree) in input.iter().enumerate() {
        let tree = tree?;
        let key = keys
            .keys()
            .iter()
            .map(|sort_key| {
                (
                    sort_key.path.lookup(tree.root()).unwrap_or(&null).clone(),
                    sort_key.direction,
                )
            })
            .collect_vec();
        heap.push(TopKEntry { key, pos });
        if heap.len() > n {
            heap.pop();
        }
    }
    let positions = heap
        .into_sorted_vec()
        .into_iter()
        .map(|entry| entry.pos)
        .collect_vec();
    apply_positions(input, &positions)
}

/// Reorders or narrows a result by logical positions (first occurrence
/// wins for duplicates).
fn apply_positions(input: PhysicalResult, positions: &[usize]) -> Result<PhysicalResult, ArborError> {
    match input {
        PhysicalResult::Indices { source, set } => Ok(PhysicalResult::Indices {
            source,
            set: set.select_positions(positions),
        }),
        PhysicalResult::CompositeIndices { source, indices } => {
            Ok(PhysicalResult::CompositeIndices {
                source,
                indices: indices.taking(positions)?,
            })
        }
        PhysicalResult::Composite {
            source,
            layer,
            indices,
        } => Ok(PhysicalResult::Composite {
            source,
            layer,
            indices: indices.taking(positions)?,
        }),
    }
}

fn apply_select(
    input: &PhysicalResult,
    exprs: &[SelectExpr],
) -> Result<PhysicalResult, ArborError> {
    let mut trees = Vec::with_capacity(input.len());
    for tree in input.iter() {
        let tree = tree?;
        let fields = exprs
            .iter()
            .map(|entry| (entry.name.clone(), entry.expr.eval(tree.root())))
            .collect::<IndexMap<_, _>>();
        trees.push(OwnedTree::new(TreeValue::Object(fields)));
    }
    let schema = Schema::infer(&trees);
    Ok(PhysicalResult::in_memory(trees, Some(schema)))
}

fn apply_add_field(
    input: &PhysicalResult,
    name: &str,
    expr: &Expr,
) -> Result<PhysicalResult, ArborError> {
    let mut trees = Vec::with_capacity(input.len());
    for tree in input.iter() {
        let tree = tree?;
        let value = expr.eval(tree.root());
        trees.push(tree.with_field(name, value));
    }
    let schema = Schema::infer(&trees);
    Ok(PhysicalResult::in_memory(trees, Some(schema)))
}

fn apply_explode(
    input: &PhysicalResult,
    path: &FieldPath,
    as_binding: Option<&str>,
) -> Result<PhysicalResult, ArborError> {
    let mut trees = vec![];
    for tree in input.iter() {
        let tree = tree?;
        let Some(TreeValue::Array(items)) = tree.get_path(path) else {
            // Missing or non-array paths contribute no rows.
            continue;
        };
        let binding = as_binding.unwrap_or_else(|| path.last_key());
        for item in items.clone() {
            trees.push(tree.with_field(binding, item));
        }
    }
    let schema = Schema::infer(&trees);
    Ok(PhysicalResult::in_memory(trees, Some(schema)))
}

fn agg_state_to_value(expr: &AggExpr, count: usize, state: AggState) -> TreeValue {
    match expr {
        AggExpr::Count { .. } => TreeValue::Int(count as i64),
        AggExpr::Sum { .. } => {
            if state.all_int {
                TreeValue::Int(state.sum as i64)
            } else {
                TreeValue::Float(state.sum)
            }
        }
        AggExpr::Min { .. } => state.min.unwrap_or(TreeValue::Null),
        AggExpr::Max { .. } => state.max.unwrap_or(TreeValue::Null),
        AggExpr::Mean { .. } => {
            if state.seen == 0 {
                TreeValue::Null
            } else {
                TreeValue::Float(state.sum / state.seen as f64)
            }
        }
    }
}

#[derive(Default)]
struct AggState {
    sum: f64,
    all_int: bool,
    seen: usize,
    min: Option<TreeValue>,
    max: Option<TreeValue>,
}

fn apply_aggregate(
    input: &PhysicalResult,
    exprs: &[AggExpr],
) -> Result<PhysicalResult, ArborError> {
    let trees = input.collect_trees()?;
    let tree = aggregate_trees(&trees, exprs);
    let schema = Schema::infer(std::slice::from_ref(&tree));
    Ok(PhysicalResult::in_memory(vec![tree], Some(schema)))
}

fn aggregate_trees(trees: &[OwnedTree], exprs: &[AggExpr]) -> OwnedTree {
    let mut fields = IndexMap::new();
    for expr in exprs {
        let mut state = AggState {
            all_int: true,
            ..AggState::default()
        };
        if let Some(path) = expr.path() {
            for tree in trees {
                let Some(value) = tree.get_path(path) else {
                    continue;
                };
                if value.is_null() {
                    continue;
                }
                if let Some(number) = value.as_f64() {
                    state.seen += 1;
                    state.sum += number;
                    if !matches!(value, TreeValue::Int(_)) {
                        state.all_int = false;
                    }
                }
                if state
                    .min
                    .as_ref()
                    .map_or(true, |best| cmp_values(value, best) == Ordering::Less)
                {
                    state.min = Some(value.clone());
                }
                if state
                    .max
                    .as_ref()
                    .map_or(true, |best| cmp_values(value, best) == Ordering::Greater)
                {
                    state.max = Some(value.clone());
                }
            }
        }
        fields.insert(
            expr.name().to_owned(),
            agg_state_to_value(expr, trees.len(), state),
        );
    }
    OwnedTree::new(TreeValue::Object(fields))
}

fn apply_group_by(
    input: &PhysicalResult,
    keys: &[FieldPath],
) -> Result<PhysicalResult, ArborError> {
    let trees = input.collect_trees()?;
    // Group keys are hashed by their encoded bytes; tree values are not
    // hashable directly.
    let mut groups: IndexMap<Vec<u8>, (Vec<TreeValue>, Vec<OwnedTree>)> = IndexMap::new();
    for tree in trees {
        let null = TreeValue::Null;
        let key_values = keys
            .iter()
            .map(|path| tree.get_path(path).unwrap_or(&null).clone())
            .collect_vec();
        let mut encoded = vec![];
        for value in &key_values {
            codec::encode_value(&mut encoded, value);
        }
        groups
            .entry(encoded)
            .or_insert_with(|| (key_values, vec![]))
            .1
            .push(tree);
    }
    let mut output = Vec::with_capacity(groups.len());
    for (_, (key_values, members)) in groups {
        let mut fields = IndexMap::new();
        for (path, value) in keys.iter().zip(key_values) {
            fields.insert(path.last_key().to_owned(), value);
        }
        fields.insert("count".to_owned(), TreeValue::Int(members.len() as i64));
        fields.insert(
            "items".to_owned(),
            TreeValue::Array(members.iter().map(|tree| tree.root().clone()).collect()),
        );
        output.push(OwnedTree::new(TreeValue::Object(fields)));
    }
    let schema = Schema::infer(&output);
    Ok(PhysicalResult::in_memory(output, Some(schema)))
}

fn apply_index_by(input: &PhysicalResult, key: &FieldPath) -> Result<PhysicalResult, ArborError> {
    let trees = input.collect_trees()?;
    let mut fields = IndexMap::new();
    for tree in trees {
        let value = tree.get_path(key).unwrap_or(&TreeValue::Null).clone();
        let name = match &value {
            TreeValue::String(text) => text.clone(),
            TreeValue::Int(number) => number.to_string(),
            TreeValue::Float(number) => number.to_string(),
            TreeValue::Bool(flag) => flag.to_string(),
            other => {
                return Err(ArborError::TypeMismatch {
                    field: key.dotted(),
                    expected: "scalar key",
                    actual: other.kind_name(),
                });
            }
        };
        // Duplicate keys: the last tree wins.
        fields.insert(name, tree.root().clone());
    }
    let tree = OwnedTree::new(TreeValue::Object(fields));
    Ok(PhysicalResult::in_memory(vec![tree], None))
}

fn apply_append(input: PhysicalResult, trees: &Arc<Vec<OwnedTree>>) -> PhysicalResult {
    match input {
        PhysicalResult::Indices { source, set } => {
            let (layer, start) = MutationLayer::new().with_appends(trees);
            let indices = CompositeIndexSet::from_index_set(&set).appending(start, trees.len());
            PhysicalResult::Composite {
                source,
                layer: Arc::new(layer),
                indices,
            }
        }
        PhysicalResult::CompositeIndices { source, indices } => {
            let (layer, start) = MutationLayer::new().with_appends(trees);
            PhysicalResult::Composite {
                source,
                layer: Arc::new(layer),
                indices: indices.appending(start, trees.len()),
            }
        }
        PhysicalResult::Composite {
            source,
            layer,
            indices,
        } => {
            // Flatten: extend the existing layer, never nest.
            let (layer, start) = layer.with_appends(trees);
            PhysicalResult::Composite {
                source,
                layer: Arc::new(layer),
                indices: indices.appending(start, trees.len()),
            }
        }
    }
}

fn apply_remove(input: PhysicalResult, indices: &[usize]) -> Result<PhysicalResult, ArborError> {
    match input {
        PhysicalResult::Indices {
            source,
            set: IndexSet::Ordered(spread),
        } => {
            let backing =
                IndexSet::Ordered(spread.clone()).to_backing_indices_for_mutation(indices)?;
            Ok(PhysicalResult::Indices {
                source,
                set: IndexSet::Ordered(spread.excluding(&backing)),
            })
        }
        PhysicalResult::Indices { source, set } => {
            // A permuted selection keeps its order through the composite
            // form.
            let composite = CompositeIndexSet::from_index_set(&set);
            Ok(PhysicalResult::CompositeIndices {
                source,
                indices: composite.removing(indices)?,
            })
        }
        PhysicalResult::CompositeIndices {
            source,
            indices: composite,
        } => Ok(PhysicalResult::CompositeIndices {
            source,
            indices: composite.removing(indices)?,
        }),
        PhysicalResult::Composite {
            source,
            layer,
            indices: composite,
        } => Ok(PhysicalResult::Composite {
            source,
            layer,
            indices: composite.removing(indices)?,
        }),
    }
}

fn apply_set(
    input: PhysicalResult,
    index: usize,
    tree: &OwnedTree,
) -> Result<PhysicalResult, ArborError> {
    let target = input.virtual_index(index)?;
    match input {
        PhysicalResult::Indices { source, set } => {
            let layer = MutationLayer::new().with_replacement(target, tree.clone());
            Ok(PhysicalResult::Composite {
                source,
                layer: Arc::new(layer),
                indices: CompositeIndexSet::from_index_set(&set),
            })
        }
        PhysicalResult::CompositeIndices { source, indices } => {
            let layer = MutationLayer::new().with_replacement(target, tree.clone());
            Ok(PhysicalResult::Composite {
                source,
                layer: Arc::new(layer),
                indices,
            })
        }
        PhysicalResult::Composite {
            source,
            layer,
            indices,
        } => {
            let layer = layer.with_replacement(target, tree.clone());
            Ok(PhysicalResult::Composite {
                source,
                layer: Arc::new(layer),
                indices,
            })
        }
    }
}

fn apply_insert(
    input: PhysicalResult,
    slot: u64,
    position: usize,
    trees: &Arc<Vec<OwnedTree>>,
) -> Result<PhysicalResult, ArborError> {
    match input {
        PhysicalResult::Indices { source, set } => {
            let layer = MutationLayer::new().with_insertion(slot, Arc::clone(trees));
            let indices =
                CompositeIndexSet::from_index_set(&set).inserting(position, slot, trees.len())?;
            Ok(PhysicalResult::Composite {
                source,
                layer: Arc::new(layer),
                indices,
            })
        }
        PhysicalResult::CompositeIndices { source, indices } => {
            let layer = MutationLayer::new().with_insertion(slot, Arc::clone(trees));
            Ok(PhysicalResult::Composite {
                source,
                layer: Arc::new(layer),
                indices: indices.inserting(position, slot, trees.len())?,
            })
        }
        PhysicalResult::Composite {
            source,
            layer,
            indices,
        } => {
            let layer = layer.with_insertion(slot, Arc::clone(trees));
            Ok(PhysicalResult::Composite {
                source,
                layer: Arc::new(layer),
                indices: indices.inserting(position, slot, trees.len())?,
            })
        }
    }
}
