use std::collections::BTreeSet;
use std::sync::Arc;

use gv_graph::Graph;
use gv_index::{MetricLists, ProfileId, ProfileMapping};
use gv_table::{MetadataTable, PerfTable, StatsTable};

use crate::EnsembleError;

/// One profiling dataset: a call graph plus the tables and lists keyed to it.
///
/// The graph is held behind an [`Arc`]; after any merge, all participating
/// datasets point at the *same* allocation, and downstream consumers compare
/// graphs with [`Arc::ptr_eq`], never structurally.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub graph: Arc<Graph>,
    pub table: PerfTable,
    pub metadata: MetadataTable,
    pub metrics: MetricLists,
    pub profiles: Vec<ProfileId>,
    pub profile_mapping: ProfileMapping,
    pub stats: StatsTable,
}

impl Dataset {
    pub fn new(
        graph: Graph,
        table: PerfTable,
        metadata: MetadataTable,
        metrics: MetricLists,
        profiles: Vec<ProfileId>,
        profile_mapping: ProfileMapping,
    ) -> Result<Self, EnsembleError> {
        let graph = Arc::new(graph);
        let stats = StatsTable::skeleton(&graph);
        let dataset = Self {
            graph,
            table,
            metadata,
            metrics,
            profiles,
            profile_mapping,
            stats,
        };
        dataset.validate()?;
        Ok(dataset)
    }

    /// Check the table/graph/metric invariants this engine relies on:
    /// every table node belongs to the graph, row keys are unique, and the
    /// metric lists are duplicate-free and disjoint.
    pub fn validate(&self) -> Result<(), EnsembleError> {
        for node in self.table.node_set() {
            if !self.graph.contains(node) {
                return Err(EnsembleError::ForeignNode { node });
            }
        }
        self.table.check_unique_keys()?;
        self.metrics.validate()?;
        Ok(())
    }

    #[must_use]
    pub fn shares_graph_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.graph, &other.graph)
    }

    #[must_use]
    pub fn profile_set(&self) -> BTreeSet<ProfileId> {
        self.profiles.iter().cloned().collect()
    }
}

/// Restrict a dataset to a subset of its execution instances, preserving the
/// graph and all invariants. Requesting an instance the dataset does not have
/// is an error.
pub fn filter_profiles(dataset: &Dataset, keep: &[ProfileId]) -> Result<Dataset, EnsembleError> {
    let known = dataset.profile_set();
    for profile in keep {
        if !known.contains(profile) {
            return Err(EnsembleError::UnknownProfile(profile.clone()));
        }
    }

    let keep_set: BTreeSet<&ProfileId> = keep.iter().collect();
    let positions: Vec<usize> = dataset
        .table
        .rows()
        .iter()
        .enumerate()
        .filter(|(_, key)| keep_set.contains(&key.profile))
        .map(|(idx, _)| idx)
        .collect();

    let mut profile_mapping = dataset.profile_mapping.clone();
    profile_mapping.retain(|profile| keep_set.contains(profile));

    let filtered = Dataset {
        graph: Arc::clone(&dataset.graph),
        table: dataset.table.take_rows(&positions),
        metadata: dataset
            .metadata
            .filter_profiles(|profile| keep_set.contains(profile)),
        metrics: dataset.metrics.clone(),
        profiles: dataset
            .profiles
            .iter()
            .filter(|profile| keep_set.contains(profile))
            .cloned()
            .collect(),
        profile_mapping,
        stats: dataset.stats.clone(),
    };
    filtered.validate()?;
    Ok(filtered)
}
