use std::collections::BTreeSet;
use std::sync::Arc;

use gv_graph::Graph;
use gv_index::{MetricLists, ProfileId, ProfileMapping, RowKey, position_map_first};
use gv_table::{MetadataTable, PerfTable, StatsTable, TableError};

use crate::{Dataset, EnsembleError, unify_in_place};

/// Options for the row-stack merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackOptions {
    /// Materialize every (union-graph node, instance) pair absent from the
    /// stacked table as an explicit NaN row.
    pub fill_missing: bool,
}

impl Default for StackOptions {
    fn default() -> Self {
        Self { fill_missing: true }
    }
}

/// Merge datasets that share a metric namespace by stacking their tables as
/// additional rows: graphs are unified, instance lists concatenated in
/// caller order, metric lists unioned without duplicates.
///
/// Overlapping instance ids between inputs surface as a duplicate
/// (node, profile) row key and abort the merge.
pub fn stack(datasets: &[Dataset], options: &StackOptions) -> Result<Dataset, EnsembleError> {
    if datasets.is_empty() {
        return Err(EnsembleError::EmptyInput);
    }

    let mut copies = datasets.to_vec();
    resolve_missing_indices(&mut copies);
    let union_graph = unify_in_place(&mut copies)?;

    let mut metrics = MetricLists::new();
    let mut profiles = Vec::new();
    let mut profile_mapping = ProfileMapping::new();
    for dataset in &copies {
        metrics.union_with(&dataset.metrics);
        profiles.extend(dataset.profiles.iter().cloned());
        for (profile, source) in dataset.profile_mapping.iter() {
            if let Some(displaced) = profile_mapping.insert(profile.clone(), source) {
                tracing::warn!(
                    profile = %profile,
                    displaced = %displaced,
                    "profile mapping collision, keeping the later dataset's entry"
                );
            }
        }
    }

    let tables: Vec<&PerfTable> = copies.iter().map(|dataset| &dataset.table).collect();
    let mut table = PerfTable::concat_rows(&tables)?;
    let metas: Vec<&MetadataTable> = copies.iter().map(|dataset| &dataset.metadata).collect();
    let mut metadata = MetadataTable::concat_rows(&metas)?;

    table.check_unique_keys().map_err(|err| match err {
        TableError::DuplicateRowKey { node, profile } => {
            EnsembleError::DuplicateRowKey { node, profile }
        }
        other => EnsembleError::Table(other),
    })?;

    if options.fill_missing {
        table = fill_missing_rows(&table, &union_graph, &profiles)?;
    }
    table.sort_rows();
    metadata.sort_by_profile();

    let merged = Dataset {
        stats: StatsTable::skeleton(&union_graph),
        graph: union_graph,
        table,
        metadata,
        metrics,
        profiles,
        profile_mapping,
    };
    merged.validate()?;
    Ok(merged)
}

/// Bring every dataset to the full index shape: any instance referenced by
/// its table but absent from the profile list or metadata gets registered,
/// so all inputs stack under identical index levels.
fn resolve_missing_indices(datasets: &mut [Dataset]) {
    for dataset in datasets {
        let referenced: Vec<ProfileId> = dataset.table.profile_set().into_iter().collect();
        for profile in &referenced {
            if !dataset.profiles.contains(profile) {
                dataset.profiles.push(profile.clone());
            }
        }
        dataset.metadata.extend_profiles(&referenced);
    }
}

/// Expand the table to the full cross product of union-graph nodes and
/// instance ids, inserting missing-valued rows for absent combinations.
fn fill_missing_rows(
    table: &PerfTable,
    graph: &Arc<Graph>,
    profiles: &[ProfileId],
) -> Result<PerfTable, EnsembleError> {
    let profile_set: BTreeSet<&ProfileId> = profiles.iter().collect();
    let mut full_rows = Vec::with_capacity(graph.len() * profile_set.len());
    for node in graph.node_ids() {
        for profile in &profile_set {
            full_rows.push(RowKey::new(node, (*profile).clone()));
        }
    }

    let existing = position_map_first(table.rows());
    let positions: Vec<Option<usize>> = full_rows
        .iter()
        .map(|key| existing.get(key).copied())
        .collect();
    Ok(table.reindex(full_rows, &positions)?)
}
