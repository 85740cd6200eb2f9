use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use gv_graph::{Graph, NodeId};
use gv_table::StatsTable;

use crate::{Dataset, EnsembleError};

/// Fold one union step's node mapping into the accumulated remap.
///
/// Existing entries whose current representative moved in this step are
/// rewritten to the new representative; entries untouched by the step are
/// kept; step entries whose key was not consumed by a rewrite are fresh
/// nodes and are appended. After the last step the result resolves any
/// original node id to its final union representative in one lookup, so
/// table reindexing runs once per dataset instead of once per union step.
#[must_use]
pub fn compose_remap(
    old_to_new: BTreeMap<NodeId, NodeId>,
    step: &BTreeMap<NodeId, NodeId>,
) -> BTreeMap<NodeId, NodeId> {
    let mut merged = BTreeMap::new();
    let mut consumed = BTreeSet::new();

    for (old, current) in old_to_new {
        match step.get(&current) {
            Some(next) => {
                merged.insert(old, *next);
                consumed.insert(current);
            }
            None => {
                merged.insert(old, current);
            }
        }
    }
    for (current, next) in step {
        if !consumed.contains(current) {
            merged.insert(*current, *next);
        }
    }
    merged
}

/// Unify the call graphs of all datasets and sync their tables, operating on
/// private copies. Returns the shared union graph and the synced copies.
pub fn unify(datasets: &[Dataset]) -> Result<(Arc<Graph>, Vec<Dataset>), EnsembleError> {
    let mut copies = datasets.to_vec();
    let union_graph = unify_in_place(&mut copies)?;
    Ok((union_graph, copies))
}

/// In-place variant for callers that already own their copies (both merge
/// strategies do). Every dataset's table is reindexed under the composed
/// remap and re-pointed at the shared union graph as the final step.
pub fn unify_in_place(datasets: &mut [Dataset]) -> Result<Arc<Graph>, EnsembleError> {
    let Some(first) = datasets.first() else {
        return Err(EnsembleError::EmptyInput);
    };

    let mut union_graph = Arc::clone(&first.graph);
    let mut old_to_new = BTreeMap::new();
    for i in 0..datasets.len().saturating_sub(1) {
        let next = &datasets[i + 1];
        // Datasets that already share one graph object need no union step.
        if Arc::ptr_eq(&union_graph, &next.graph) {
            continue;
        }
        let (merged, step) = union_graph.union(&next.graph)?;
        tracing::debug!(
            step = i,
            union_nodes = merged.len(),
            remapped = step.len(),
            "unified call graphs"
        );
        union_graph = Arc::new(merged);
        old_to_new = compose_remap(old_to_new, &step);
    }

    for dataset in datasets.iter_mut() {
        let mut rows = dataset.table.rows().to_vec();
        for key in &mut rows {
            let Some(new_id) = old_to_new.get(&key.node) else {
                continue;
            };
            let expected = dataset.graph.frame(key.node);
            let actual = union_graph.frame(*new_id);
            match (expected, actual) {
                (Some(expected), Some(actual)) if expected == actual => {}
                _ => {
                    return Err(EnsembleError::NodeRemapMismatch {
                        node: key.node,
                        expected: expected.cloned(),
                        actual: actual.cloned(),
                    });
                }
            }
            key.node = *new_id;
        }
        dataset.table.set_rows(rows)?;
        dataset.table.sort_rows();
        dataset.graph = Arc::clone(&union_graph);
        dataset.stats = StatsTable::skeleton(&union_graph);
        dataset.validate()?;
    }

    Ok(union_graph)
}
