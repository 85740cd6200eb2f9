#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use gv_graph::{Graph, NodeId};
use gv_index::{MetricLabel, MetricLists, ProfileId, RowKey, sort_permutation};
use gv_types::{DType, Scalar, TypeError, cast_scalar, infer_dtype};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TableError {
    #[error("column {label} has length {column_len} but the row index has length {index_len}")]
    LengthMismatch {
        label: MetricLabel,
        index_len: usize,
        column_len: usize,
    },
    #[error("duplicate row key (node {node}, profile {profile})")]
    DuplicateRowKey { node: NodeId, profile: ProfileId },
    #[error("column {0} is not present in the table")]
    UnknownColumn(MetricLabel),
    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Serde codec for the column maps: `MetricLabel` is an enum, which JSON
/// cannot use as an object key, so the maps travel as a list of pairs.
mod column_map_serde {
    use std::collections::BTreeMap;

    use gv_index::MetricLabel;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    use super::Column;

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<MetricLabel, Column>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        map.iter().collect::<Vec<_>>().serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<MetricLabel, Column>, D::Error> {
        let pairs = Vec::<(MetricLabel, Column)>::deserialize(deserializer)?;
        Ok(pairs.into_iter().collect())
    }
}

/// Typed column of scalar values. Values are coerced to the column dtype at
/// construction; missing slots carry the dtype-specific missing marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    dtype: DType,
    values: Vec<Scalar>,
}

impl Column {
    pub fn new(dtype: DType, values: Vec<Scalar>) -> Result<Self, TableError> {
        let coerced = values
            .into_iter()
            .map(|value| cast_scalar(value, dtype))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            dtype,
            values: coerced,
        })
    }

    pub fn from_values(values: Vec<Scalar>) -> Result<Self, TableError> {
        let dtype = infer_dtype(&values)?;
        Self::new(dtype, values)
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    #[must_use]
    pub fn value(&self, idx: usize) -> Option<&Scalar> {
        self.values.get(idx)
    }

    /// Gather rows by source position; `None` slots become missing values.
    pub fn reindex_by_positions(&self, positions: &[Option<usize>]) -> Result<Self, TableError> {
        let values = positions
            .iter()
            .map(|slot| match slot {
                Some(idx) => self
                    .values
                    .get(*idx)
                    .cloned()
                    .unwrap_or_else(|| Scalar::missing_for_dtype(self.dtype)),
                None => Scalar::missing_for_dtype(self.dtype),
            })
            .collect::<Vec<_>>();
        Self::new(self.dtype, values)
    }

    /// Gather by a total permutation, e.g. the argsort of the row index.
    #[must_use]
    pub fn take(&self, order: &[usize]) -> Self {
        let values = order
            .iter()
            .map(|idx| {
                self.values
                    .get(*idx)
                    .cloned()
                    .unwrap_or_else(|| Scalar::missing_for_dtype(self.dtype))
            })
            .collect();
        Self {
            dtype: self.dtype,
            values,
        }
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.dtype == other.dtype
            && self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(left, right)| left.semantic_eq(right))
    }
}

/// Performance measurements keyed by (node, profile), metric values as
/// columns. Sparse: absent (node, profile) pairs are absent rows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerfTable {
    rows: Vec<RowKey>,
    #[serde(with = "column_map_serde")]
    columns: BTreeMap<MetricLabel, Column>,
}

impl PerfTable {
    pub fn new(
        rows: Vec<RowKey>,
        columns: BTreeMap<MetricLabel, Column>,
    ) -> Result<Self, TableError> {
        for (label, column) in &columns {
            if column.len() != rows.len() {
                return Err(TableError::LengthMismatch {
                    label: label.clone(),
                    index_len: rows.len(),
                    column_len: column.len(),
                });
            }
        }
        Ok(Self { rows, columns })
    }

    pub fn from_rows(
        rows: Vec<RowKey>,
        columns: Vec<(MetricLabel, Vec<Scalar>)>,
    ) -> Result<Self, TableError> {
        let columns = columns
            .into_iter()
            .map(|(label, values)| Ok((label, Column::from_values(values)?)))
            .collect::<Result<BTreeMap<_, _>, TableError>>()?;
        Self::new(rows, columns)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn rows(&self) -> &[RowKey] {
        &self.rows
    }

    #[must_use]
    pub fn columns(&self) -> &BTreeMap<MetricLabel, Column> {
        &self.columns
    }

    #[must_use]
    pub fn column(&self, label: &MetricLabel) -> Option<&Column> {
        self.columns.get(label)
    }

    #[must_use]
    pub fn value(&self, node: NodeId, profile: &ProfileId, label: &MetricLabel) -> Option<&Scalar> {
        let row = self
            .rows
            .iter()
            .position(|key| key.node == node && key.profile == *profile)?;
        self.columns.get(label)?.value(row)
    }

    #[must_use]
    pub fn node_set(&self) -> BTreeSet<NodeId> {
        self.rows.iter().map(|key| key.node).collect()
    }

    #[must_use]
    pub fn profile_set(&self) -> BTreeSet<ProfileId> {
        self.rows.iter().map(|key| key.profile.clone()).collect()
    }

    /// Replace the row index wholesale; lengths must agree.
    pub fn set_rows(&mut self, rows: Vec<RowKey>) -> Result<(), TableError> {
        if rows.len() != self.rows.len() {
            return Err(TableError::LengthMismatch {
                label: MetricLabel::plain("<row index>"),
                index_len: rows.len(),
                column_len: self.rows.len(),
            });
        }
        self.rows = rows;
        Ok(())
    }

    pub fn check_unique_keys(&self) -> Result<(), TableError> {
        let mut seen = BTreeSet::new();
        for key in &self.rows {
            if !seen.insert(key.clone()) {
                return Err(TableError::DuplicateRowKey {
                    node: key.node,
                    profile: key.profile.clone(),
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn is_sorted(&self) -> bool {
        gv_index::is_sorted(&self.rows)
    }

    /// Restore canonical (node, profile) lexicographic row order.
    pub fn sort_rows(&mut self) {
        if self.is_sorted() {
            return;
        }
        let order = sort_permutation(&self.rows);
        self.rows = order.iter().map(|idx| self.rows[*idx].clone()).collect();
        for column in self.columns.values_mut() {
            *column = column.take(&order);
        }
    }

    /// Rebuild the table on a new row index, gathering values by source
    /// position and injecting missing values where `positions` is `None`.
    pub fn reindex(
        &self,
        rows: Vec<RowKey>,
        positions: &[Option<usize>],
    ) -> Result<Self, TableError> {
        let columns = self
            .columns
            .iter()
            .map(|(label, column)| Ok((label.clone(), column.reindex_by_positions(positions)?)))
            .collect::<Result<BTreeMap<_, _>, TableError>>()?;
        Self::new(rows, columns)
    }

    /// Keep only the rows at the given positions.
    #[must_use]
    pub fn take_rows(&self, positions: &[usize]) -> Self {
        let rows = positions
            .iter()
            .map(|idx| self.rows[*idx].clone())
            .collect();
        let columns = self
            .columns
            .iter()
            .map(|(label, column)| (label.clone(), column.take(positions)))
            .collect();
        Self { rows, columns }
    }

    /// Stack tables as additional rows. The column set is the outer union;
    /// a table missing a column contributes missing values for its rows.
    pub fn concat_rows(tables: &[&Self]) -> Result<Self, TableError> {
        let mut rows = Vec::new();
        let mut labels = Vec::<MetricLabel>::new();
        for table in tables {
            rows.extend(table.rows.iter().cloned());
            for label in table.columns.keys() {
                if !labels.contains(label) {
                    labels.push(label.clone());
                }
            }
        }

        let mut columns = BTreeMap::new();
        for label in labels {
            let mut values = Vec::with_capacity(rows.len());
            for table in tables {
                match table.columns.get(&label) {
                    Some(column) => values.extend(column.values().iter().cloned()),
                    None => values.extend(
                        std::iter::repeat_with(|| Scalar::missing_for_dtype(DType::Float64))
                            .take(table.len()),
                    ),
                }
            }
            columns.insert(label, Column::from_values(values)?);
        }
        Self::new(rows, columns)
    }

    /// Promote every plain column label to its tagged form under `header`.
    #[must_use]
    pub fn promote_columns(self, header: &str) -> Self {
        let columns = self
            .columns
            .into_iter()
            .map(|(label, column)| (label.promote(header), column))
            .collect();
        Self {
            rows: self.rows,
            columns,
        }
    }

    pub fn insert_column(&mut self, label: MetricLabel, column: Column) -> Result<(), TableError> {
        if column.len() != self.rows.len() {
            return Err(TableError::LengthMismatch {
                label,
                index_len: self.rows.len(),
                column_len: column.len(),
            });
        }
        self.columns.insert(label, column);
        Ok(())
    }

    pub fn drop_column(&mut self, label: &MetricLabel) -> Option<Column> {
        self.columns.remove(label)
    }
}

/// Per-profile descriptive attributes, one row per execution instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataTable {
    profiles: Vec<ProfileId>,
    #[serde(with = "column_map_serde")]
    columns: BTreeMap<MetricLabel, Column>,
}

impl MetadataTable {
    pub fn new(
        profiles: Vec<ProfileId>,
        columns: BTreeMap<MetricLabel, Column>,
    ) -> Result<Self, TableError> {
        for (label, column) in &columns {
            if column.len() != profiles.len() {
                return Err(TableError::LengthMismatch {
                    label: label.clone(),
                    index_len: profiles.len(),
                    column_len: column.len(),
                });
            }
        }
        Ok(Self { profiles, columns })
    }

    pub fn from_rows(
        profiles: Vec<ProfileId>,
        columns: Vec<(MetricLabel, Vec<Scalar>)>,
    ) -> Result<Self, TableError> {
        let columns = columns
            .into_iter()
            .map(|(label, values)| Ok((label, Column::from_values(values)?)))
            .collect::<Result<BTreeMap<_, _>, TableError>>()?;
        Self::new(profiles, columns)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    #[must_use]
    pub fn profiles(&self) -> &[ProfileId] {
        &self.profiles
    }

    #[must_use]
    pub fn columns(&self) -> &BTreeMap<MetricLabel, Column> {
        &self.columns
    }

    #[must_use]
    pub fn column(&self, label: &MetricLabel) -> Option<&Column> {
        self.columns.get(label)
    }

    #[must_use]
    pub fn value(&self, profile: &ProfileId, label: &MetricLabel) -> Option<&Scalar> {
        let row = self.profiles.iter().position(|p| p == profile)?;
        self.columns.get(label)?.value(row)
    }

    /// Append rows for profiles the table does not yet cover, with missing
    /// values in every column.
    pub fn extend_profiles(&mut self, profiles: &[ProfileId]) {
        for profile in profiles {
            if self.profiles.contains(profile) {
                continue;
            }
            self.profiles.push(profile.clone());
            for column in self.columns.values_mut() {
                let mut values = column.values().to_vec();
                values.push(Scalar::missing_for_dtype(column.dtype()));
                *column = Column {
                    dtype: column.dtype(),
                    values,
                };
            }
        }
    }

    /// Replace the profile index wholesale; lengths must agree.
    pub fn set_profiles(&mut self, profiles: Vec<ProfileId>) -> Result<(), TableError> {
        if profiles.len() != self.profiles.len() {
            return Err(TableError::LengthMismatch {
                label: MetricLabel::plain("<profile index>"),
                index_len: profiles.len(),
                column_len: self.profiles.len(),
            });
        }
        self.profiles = profiles;
        Ok(())
    }

    pub fn drop_column(&mut self, label: &MetricLabel) -> Option<Column> {
        self.columns.remove(label)
    }

    pub fn sort_by_profile(&mut self) {
        if gv_index::is_sorted(&self.profiles) {
            return;
        }
        let order = sort_permutation(&self.profiles);
        self.profiles = order
            .iter()
            .map(|idx| self.profiles[*idx].clone())
            .collect();
        for column in self.columns.values_mut() {
            *column = column.take(&order);
        }
    }

    /// Stack metadata tables as additional rows, outer-unioning columns.
    pub fn concat_rows(tables: &[&Self]) -> Result<Self, TableError> {
        let mut profiles = Vec::new();
        let mut labels = Vec::<MetricLabel>::new();
        for table in tables {
            profiles.extend(table.profiles.iter().cloned());
            for label in table.columns.keys() {
                if !labels.contains(label) {
                    labels.push(label.clone());
                }
            }
        }

        let mut columns = BTreeMap::new();
        for label in labels {
            let mut values = Vec::with_capacity(profiles.len());
            for table in tables {
                match table.columns.get(&label) {
                    Some(column) => values.extend(column.values().iter().cloned()),
                    None => values.extend(
                        std::iter::repeat(Scalar::Null(gv_types::NullKind::Null))
                            .take(table.len()),
                    ),
                }
            }
            columns.insert(label, Column::from_values(values)?);
        }
        Self::new(profiles, columns)
    }

    /// Join metadata tables side by side over the union of their profiles.
    pub fn concat_columns(tables: &[&Self]) -> Result<Self, TableError> {
        let mut profiles = Vec::<ProfileId>::new();
        for table in tables {
            for profile in &table.profiles {
                if !profiles.contains(profile) {
                    profiles.push(profile.clone());
                }
            }
        }

        let mut columns = BTreeMap::new();
        for table in tables {
            let map = gv_index::position_map_first(&table.profiles);
            let positions: Vec<Option<usize>> = profiles
                .iter()
                .map(|profile| map.get(profile).copied())
                .collect();
            for (label, column) in &table.columns {
                columns.insert(label.clone(), column.reindex_by_positions(&positions)?);
            }
        }
        Self::new(profiles, columns)
    }

    #[must_use]
    pub fn promote_columns(self, header: &str) -> Self {
        let columns = self
            .columns
            .into_iter()
            .map(|(label, column)| (label.promote(header), column))
            .collect();
        Self {
            profiles: self.profiles,
            columns,
        }
    }

    /// Keep only the rows whose profile passes the predicate.
    #[must_use]
    pub fn filter_profiles(&self, mut keep: impl FnMut(&ProfileId) -> bool) -> Self {
        let positions: Vec<usize> = self
            .profiles
            .iter()
            .enumerate()
            .filter(|(_, profile)| keep(profile))
            .map(|(idx, _)| idx)
            .collect();
        let profiles = positions
            .iter()
            .map(|idx| self.profiles[*idx].clone())
            .collect();
        let columns = self
            .columns
            .iter()
            .map(|(label, column)| (label.clone(), column.take(&positions)))
            .collect();
        Self { profiles, columns }
    }
}

/// Aggregated statistics keyed by node, one row per union-graph node.
/// Statistical helpers append derived columns; the merge engine only ever
/// rebuilds the empty skeleton after the graph shape changes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsTable {
    nodes: Vec<NodeId>,
    #[serde(with = "column_map_serde")]
    columns: BTreeMap<MetricLabel, Column>,
    metrics: MetricLists,
}

impl StatsTable {
    /// Empty table over the graph's nodes in depth-first traversal order,
    /// the order statistics are reported in.
    #[must_use]
    pub fn skeleton(graph: &Graph) -> Self {
        Self {
            nodes: graph.preorder(),
            columns: BTreeMap::new(),
            metrics: MetricLists::new(),
        }
    }

    #[must_use]
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    #[must_use]
    pub fn columns(&self) -> &BTreeMap<MetricLabel, Column> {
        &self.columns
    }

    #[must_use]
    pub fn column(&self, label: &MetricLabel) -> Option<&Column> {
        self.columns.get(label)
    }

    #[must_use]
    pub fn metrics(&self) -> &MetricLists {
        &self.metrics
    }

    #[must_use]
    pub fn metrics_mut(&mut self) -> &mut MetricLists {
        &mut self.metrics
    }

    pub fn insert_column(&mut self, label: MetricLabel, column: Column) -> Result<(), TableError> {
        if column.len() != self.nodes.len() {
            return Err(TableError::LengthMismatch {
                label,
                index_len: self.nodes.len(),
                column_len: column.len(),
            });
        }
        self.columns.insert(label, column);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use gv_graph::{Frame, Graph};
    use gv_index::{MetricLabel, ProfileId, RowKey};
    use gv_types::{NullKind, Scalar};

    use super::{Column, MetadataTable, PerfTable, StatsTable, TableError};

    fn keys(graph: &Graph, profiles: &[i64]) -> Vec<RowKey> {
        let mut rows = Vec::new();
        for node in graph.node_ids() {
            for profile in profiles {
                rows.push(RowKey::new(node, ProfileId::from(*profile)));
            }
        }
        rows
    }

    #[test]
    fn reindex_injects_missing_values() {
        let column =
            Column::from_values(vec![Scalar::Int64(10), Scalar::Int64(20)]).expect("column");
        let out = column
            .reindex_by_positions(&[Some(1), None, Some(0)])
            .expect("reindex");
        assert_eq!(
            out.values(),
            &[
                Scalar::Int64(20),
                Scalar::Null(NullKind::Null),
                Scalar::Int64(10)
            ]
        );
    }

    #[test]
    fn sort_rows_orders_by_node_then_profile() {
        let mut graph = Graph::new();
        let root = graph.add_root(Frame::new("main"));
        let child = graph.add_child(root, Frame::new("solve")).expect("child");

        let rows = vec![
            RowKey::new(child, ProfileId::from(1)),
            RowKey::new(root, ProfileId::from(2)),
            RowKey::new(root, ProfileId::from(1)),
        ];
        let mut table = PerfTable::from_rows(
            rows,
            vec![(
                MetricLabel::plain("time"),
                vec![Scalar::Float64(3.0), Scalar::Float64(2.0), Scalar::Float64(1.0)],
            )],
        )
        .expect("table");

        table.sort_rows();
        assert!(table.is_sorted());
        assert_eq!(
            table.rows()[0],
            RowKey::new(root, ProfileId::from(1)),
            "root has the smaller handle"
        );
        assert_eq!(
            table
                .column(&MetricLabel::plain("time"))
                .expect("column")
                .values()[0],
            Scalar::Float64(1.0)
        );
    }

    #[test]
    fn duplicate_keys_are_detected() {
        let mut graph = Graph::new();
        let root = graph.add_root(Frame::new("main"));
        let rows = vec![
            RowKey::new(root, ProfileId::from(1)),
            RowKey::new(root, ProfileId::from(1)),
        ];
        let table = PerfTable::from_rows(
            rows,
            vec![(
                MetricLabel::plain("time"),
                vec![Scalar::Float64(1.0), Scalar::Float64(2.0)],
            )],
        )
        .expect("table");

        let err = table.check_unique_keys().expect_err("must fail");
        assert!(matches!(err, TableError::DuplicateRowKey { .. }));
    }

    #[test]
    fn concat_rows_unions_columns_with_missing_fill() {
        let mut graph = Graph::new();
        graph.add_root(Frame::new("main"));

        let left = PerfTable::from_rows(
            keys(&graph, &[0]),
            vec![(MetricLabel::plain("time"), vec![Scalar::Float64(1.0)])],
        )
        .expect("left");
        let right = PerfTable::from_rows(
            keys(&graph, &[1]),
            vec![(MetricLabel::plain("cycles"), vec![Scalar::Float64(7.0)])],
        )
        .expect("right");

        let out = PerfTable::concat_rows(&[&left, &right]).expect("concat");
        assert_eq!(out.len(), 2);
        assert_eq!(out.columns().len(), 2);
        let time = out.column(&MetricLabel::plain("time")).expect("time");
        assert!(time.values()[1].is_nan());
    }

    #[test]
    fn metadata_joins_align_on_profile_union() {
        let left = MetadataTable::from_rows(
            vec![ProfileId::from(0), ProfileId::from(1)],
            vec![(
                MetricLabel::tagged("h0", "launch"),
                vec![Scalar::from("mon"), Scalar::from("tue")],
            )],
        )
        .expect("left");
        let right = MetadataTable::from_rows(
            vec![ProfileId::from(1)],
            vec![(MetricLabel::tagged("h1", "launch"), vec![Scalar::from("wed")])],
        )
        .expect("right");

        let out = MetadataTable::concat_columns(&[&left, &right]).expect("join");
        assert_eq!(out.profiles().len(), 2);
        assert_eq!(
            out.value(&ProfileId::from(0), &MetricLabel::tagged("h1", "launch")),
            Some(&Scalar::Null(NullKind::Null))
        );
        assert_eq!(
            out.value(&ProfileId::from(1), &MetricLabel::tagged("h1", "launch")),
            Some(&Scalar::from("wed"))
        );
    }

    #[test]
    fn table_round_trips_through_json() {
        let mut graph = Graph::new();
        let root = graph.add_root(Frame::new("main"));
        let rows = vec![
            RowKey::new(root, ProfileId::from(0)),
            RowKey::new(root, ProfileId::from(1)),
        ];
        let table = PerfTable::from_rows(
            rows,
            vec![(
                MetricLabel::plain("time"),
                vec![Scalar::Float64(1.5), Scalar::Null(NullKind::NaN)],
            )],
        )
        .expect("table");

        let text = serde_json::to_string(&table).expect("serialize");
        let back: PerfTable = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(back.rows(), table.rows());
        for (label, column) in table.columns() {
            let restored = back.column(label).expect("column survives");
            assert!(restored.semantic_eq(column), "column {label}");
        }
    }

    #[test]
    fn stats_skeleton_has_one_row_per_node_and_no_columns() {
        let mut graph = Graph::new();
        let root = graph.add_root(Frame::new("main"));
        graph.add_child(root, Frame::new("solve")).expect("child");

        let stats = StatsTable::skeleton(&graph);
        assert_eq!(stats.nodes().len(), 2);
        assert!(stats.columns().is_empty());
        assert!(stats.metrics().is_empty());
    }
}
