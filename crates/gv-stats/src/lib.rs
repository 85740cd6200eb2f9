#![forbid(unsafe_code)]

//! Per-node aggregation over a dataset's performance table. Each helper
//! groups the requested metric columns by node, computes one value per
//! union-graph node, and appends the derived column to the dataset's
//! aggregated-statistics table, classified inclusive/exclusive after its
//! source metric.

use std::collections::BTreeMap;

use gv_ensemble::Dataset;
use gv_graph::NodeId;
use gv_index::{IndexError, MetricLabel};
use gv_table::{Column, TableError};
use gv_types::{DType, NullKind, Scalar, TypeError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StatsError {
    #[error("no columns requested; pass the metric columns to aggregate")]
    EmptyColumns,
    #[error("column {0} is not present in the performance data table")]
    UnknownColumn(MetricLabel),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error(transparent)]
    Type(#[from] TypeError),
}

/// Sample standard deviation (ddof = 1) per node for each requested column.
/// Returns the labels of the appended statistics columns.
pub fn std(dataset: &mut Dataset, columns: &[MetricLabel]) -> Result<Vec<MetricLabel>, StatsError> {
    aggregate(dataset, columns, "_std", |values| sample_variance(values).sqrt())
}

/// Sample variance (ddof = 1) per node for each requested column.
pub fn variance(
    dataset: &mut Dataset,
    columns: &[MetricLabel],
) -> Result<Vec<MetricLabel>, StatsError> {
    aggregate(dataset, columns, "_var", sample_variance)
}

fn aggregate(
    dataset: &mut Dataset,
    columns: &[MetricLabel],
    suffix: &str,
    agg: impl Fn(&[f64]) -> f64,
) -> Result<Vec<MetricLabel>, StatsError> {
    if columns.is_empty() {
        return Err(StatsError::EmptyColumns);
    }
    for label in columns {
        if dataset.table.column(label).is_none() {
            return Err(StatsError::UnknownColumn(label.clone()));
        }
    }

    let mut out_labels = Vec::with_capacity(columns.len());
    for label in columns {
        let column = dataset
            .table
            .column(label)
            .ok_or_else(|| StatsError::UnknownColumn(label.clone()))?;

        let mut groups: BTreeMap<NodeId, Vec<f64>> = BTreeMap::new();
        for (row, key) in dataset.table.rows().iter().enumerate() {
            let Some(value) = column.value(row) else {
                continue;
            };
            if value.is_missing() {
                continue;
            }
            groups.entry(key.node).or_default().push(value.to_f64()?);
        }

        let values: Vec<Scalar> = dataset
            .stats
            .nodes()
            .iter()
            .map(|node| match groups.get(node) {
                Some(samples) => Scalar::Float64(agg(samples)),
                None => Scalar::Null(NullKind::NaN),
            })
            .collect();

        let out_label = derived_label(label, suffix);
        dataset
            .stats
            .insert_column(out_label.clone(), Column::new(DType::Float64, values)?)?;
        if dataset.metrics.is_exclusive(label) {
            dataset.stats.metrics_mut().push_exclusive(out_label.clone());
        } else {
            dataset.stats.metrics_mut().push_inclusive(out_label.clone());
        }
        out_labels.push(out_label);
    }
    Ok(out_labels)
}

fn derived_label(label: &MetricLabel, suffix: &str) -> MetricLabel {
    match label {
        MetricLabel::Plain(name) => MetricLabel::plain(format!("{name}{suffix}")),
        MetricLabel::Tagged { header, name } => {
            MetricLabel::tagged(header.clone(), format!("{name}{suffix}"))
        }
    }
}

/// ddof = 1; a single-sample group yields NaN, like pandas' sample std.
fn sample_variance(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let sum_sq: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    sum_sq / (n - 1.0)
}
