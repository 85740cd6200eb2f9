use std::collections::{BTreeMap, BTreeSet, HashSet};

use gv_index::{
    MetricLabel, MetricLists, ProfileId, ProfileMapping, RowKey, align_union, position_map_first,
    validate_alignment_plan,
};
use gv_table::{Column, MetadataTable, PerfTable, StatsTable};
use gv_types::Scalar;

use crate::{Dataset, EnsembleError, unify_in_place};

/// Options for the column-join merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinOptions {
    /// One header per input dataset, used to namespace its columns and
    /// instances. Defaults to the positional index ("0", "1", ...).
    pub headers: Option<Vec<String>>,
    /// Metadata column whose values align instances across datasets. Without
    /// it, instances correspond positionally, which requires equal counts
    /// and sorted instance order in every input.
    pub correlation_key: Option<String>,
}

/// Merge datasets with distinct metric namespaces side by side: each input's
/// columns are promoted to (header, name) labels, instances are re-keyed to a
/// shared identity (positional or correlation-key derived), and the tables
/// are outer-joined over the union of (node, instance) row keys.
pub fn join_columns(datasets: &[Dataset], options: &JoinOptions) -> Result<Dataset, EnsembleError> {
    if datasets.is_empty() {
        return Err(EnsembleError::EmptyInput);
    }

    let headers = resolve_headers(datasets.len(), options.headers.as_deref())?;
    check_structures(datasets, options.correlation_key.as_deref())?;

    // Per dataset: old instance id -> shared plain id (the table's second
    // index level after the join). Profile lists and mappings additionally
    // pair the plain id with the dataset header, keeping per-input identity.
    // Derived before unification; it reads only profiles and metadata.
    let mut plain_ids = Vec::with_capacity(datasets.len());
    for (position, dataset) in datasets.iter().enumerate() {
        let ids = match options.correlation_key.as_deref() {
            None => positional_ids(dataset),
            Some(key) => correlated_ids(dataset, key, position)?,
        };
        plain_ids.push(ids);
    }

    let mut copies = datasets.to_vec();
    let union_graph = unify_in_place(&mut copies)?;

    let mut tagged_tables = Vec::with_capacity(copies.len());
    let mut tagged_metas = Vec::with_capacity(copies.len());
    let mut metrics = MetricLists::new();
    let mut profiles = Vec::new();
    let mut profile_mapping = ProfileMapping::new();

    for ((dataset, header), ids) in copies.iter().zip(&headers).zip(&plain_ids) {
        let mut table = dataset.table.clone();
        let rows = table
            .rows()
            .iter()
            .map(|key| {
                let plain = lookup(ids, &key.profile)?;
                Ok(RowKey::new(key.node, plain))
            })
            .collect::<Result<Vec<_>, EnsembleError>>()?;
        table.set_rows(rows)?;
        let mut table = table.promote_columns(header);
        table.sort_rows();
        tagged_tables.push(table);

        metrics.union_with(&dataset.metrics.promoted(header));

        for old in &dataset.profiles {
            profiles.push(lookup(ids, old)?.paired(header));
        }
        for (old, source) in dataset.profile_mapping.iter() {
            profile_mapping.insert(lookup(ids, old)?.paired(header), source);
        }

        let mut meta = dataset.metadata.clone();
        if let Some(key) = options.correlation_key.as_deref() {
            meta.drop_column(&MetricLabel::plain(key));
        }
        let meta_profiles = meta
            .profiles()
            .iter()
            .map(|profile| lookup(ids, profile))
            .collect::<Result<Vec<_>, EnsembleError>>()?;
        meta.set_profiles(meta_profiles)?;
        let mut meta = meta.promote_columns(header);
        meta.sort_by_profile();
        tagged_metas.push(meta);
    }

    let mut table = join_tables(&tagged_tables)?;
    extract_name_column(&mut table, &headers, &union_graph)?;
    table.sort_rows();

    let meta_refs: Vec<&MetadataTable> = tagged_metas.iter().collect();
    let mut metadata = MetadataTable::concat_columns(&meta_refs)?;
    metadata.sort_by_profile();

    metrics.validate()?;

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

fn resolve_headers(count: usize, headers: Option<&[String]>) -> Result<Vec<String>, EnsembleError> {
    let headers = match headers {
        Some(provided) => {
            if provided.len() != count {
                return Err(EnsembleError::HeaderCount {
                    expected: count,
                    actual: provided.len(),
                });
            }
            provided.to_vec()
        }
        None => (0..count).map(|idx| idx.to_string()).collect(),
    };

    let mut seen = HashSet::with_capacity(headers.len());
    for header in &headers {
        if !seen.insert(header) {
            return Err(EnsembleError::DuplicateHeader(header.clone()));
        }
    }
    Ok(headers)
}

/// All structural preconditions, checked before any copying or unification so
/// a failure leaves no partial state behind.
fn check_structures(
    datasets: &[Dataset],
    correlation_key: Option<&str>,
) -> Result<(), EnsembleError> {
    for (position, dataset) in datasets.iter().enumerate() {
        let listed: BTreeSet<&ProfileId> = dataset.profiles.iter().collect();
        for key in dataset.table.rows() {
            if !listed.contains(&key.profile) {
                return Err(EnsembleError::UnknownProfile(key.profile.clone()));
            }
        }
        for profile in &dataset.profiles {
            if !dataset.metadata.profiles().contains(profile) {
                return Err(EnsembleError::UnknownProfile(profile.clone()));
            }
        }
        if let Some(key) = correlation_key
            && dataset.metadata.column(&MetricLabel::plain(key)).is_none()
        {
            return Err(EnsembleError::CorrelationKeyMissing {
                key: key.to_owned(),
                position,
            });
        }
    }

    if correlation_key.is_none() {
        for pair in datasets.windows(2) {
            if pair[0].profiles.len() != pair[1].profiles.len() {
                return Err(EnsembleError::ProfileCountMismatch {
                    left: pair[0].profiles.len(),
                    right: pair[1].profiles.len(),
                });
            }
        }
        // Positional correspondence is only well-defined over a shared sort
        // order of instances.
        for (position, dataset) in datasets.iter().enumerate() {
            let meta_sorted = gv_index::is_sorted(dataset.metadata.profiles());
            if !gv_index::is_sorted(&dataset.profiles) || !meta_sorted || !dataset.table.is_sorted()
            {
                return Err(EnsembleError::UnsortedProfiles { position });
            }
        }
    }
    Ok(())
}

fn positional_ids(dataset: &Dataset) -> BTreeMap<ProfileId, ProfileId> {
    dataset
        .profiles
        .iter()
        .enumerate()
        .map(|(idx, profile)| (profile.clone(), ProfileId::Int64(idx as i64)))
        .collect()
}

fn correlated_ids(
    dataset: &Dataset,
    key: &str,
    position: usize,
) -> Result<BTreeMap<ProfileId, ProfileId>, EnsembleError> {
    let label = MetricLabel::plain(key);
    let mut ids = BTreeMap::new();
    let mut seen = BTreeSet::new();
    for profile in &dataset.profiles {
        let value = dataset.metadata.value(profile, &label);
        let plain = match value {
            Some(Scalar::Int64(v)) => ProfileId::Int64(*v),
            Some(Scalar::Utf8(v)) => ProfileId::Utf8(v.clone()),
            _ => {
                return Err(EnsembleError::InvalidCorrelationValue {
                    key: key.to_owned(),
                    profile: profile.clone(),
                    position,
                });
            }
        };
        // Key values must be injective within one input, or its rows would
        // collapse onto the same (node, instance) key.
        if !seen.insert(plain.clone()) {
            return Err(EnsembleError::DuplicateCorrelationValue {
                key: key.to_owned(),
                value: plain,
                position,
            });
        }
        ids.insert(profile.clone(), plain);
    }
    Ok(ids)
}

fn lookup(
    ids: &BTreeMap<ProfileId, ProfileId>,
    profile: &ProfileId,
) -> Result<ProfileId, EnsembleError> {
    ids.get(profile)
        .cloned()
        .ok_or_else(|| EnsembleError::UnknownProfile(profile.clone()))
}

/// Outer horizontal join: union of row keys, every input's columns gathered
/// onto it. Column labels cannot collide since headers are unique.
fn join_tables(tables: &[PerfTable]) -> Result<PerfTable, EnsembleError> {
    let mut union_rows: Vec<RowKey> = Vec::new();
    for table in tables {
        let plan = align_union(&union_rows, table.rows());
        validate_alignment_plan(&plan)?;
        union_rows = plan.union_labels;
    }

    let mut columns = BTreeMap::new();
    for table in tables {
        let map = position_map_first(table.rows());
        let positions: Vec<Option<usize>> = union_rows
            .iter()
            .map(|key| map.get(key).copied())
            .collect();
        for (label, column) in table.columns() {
            columns.insert(label.clone(), column.reindex_by_positions(&positions)?);
        }
    }
    Ok(PerfTable::new(union_rows, columns)?)
}

/// The node name is shared across headers; surface it once as a top-level
/// column instead of per-header duplicates.
fn extract_name_column(
    table: &mut PerfTable,
    headers: &[String],
    graph: &gv_graph::Graph,
) -> Result<(), EnsembleError> {
    for header in headers {
        table.drop_column(&MetricLabel::tagged(header, "name"));
    }
    let names = table
        .rows()
        .iter()
        .map(|key| {
            let frame = graph
                .frame(key.node)
                .ok_or(EnsembleError::ForeignNode { node: key.node })?;
            Ok(Scalar::Utf8(frame.name().to_owned()))
        })
        .collect::<Result<Vec<_>, EnsembleError>>()?;
    table.insert_column(MetricLabel::plain("name"), Column::from_values(names)?)?;
    Ok(())
}
