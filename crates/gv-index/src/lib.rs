#![forbid(unsafe_code)]

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;

use gv_graph::NodeId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of one execution instance ("profile" in the domain).
///
/// `Paired` is minted by the column-join merge: the inner key is the shared
/// alignment value (position or correlation-key value) and the header names
/// the contributing dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ProfileId {
    Int64(i64),
    Utf8(String),
    Paired { key: Box<ProfileId>, header: String },
}

impl From<i64> for ProfileId {
    fn from(value: i64) -> Self {
        Self::Int64(value)
    }
}

impl From<&str> for ProfileId {
    fn from(value: &str) -> Self {
        Self::Utf8(value.to_owned())
    }
}

impl From<String> for ProfileId {
    fn from(value: String) -> Self {
        Self::Utf8(value)
    }
}

impl ProfileId {
    /// Wrap this id as the column-join synthetic identity under `header`.
    #[must_use]
    pub fn paired(self, header: impl Into<String>) -> Self {
        Self::Paired {
            key: Box::new(self),
            header: header.into(),
        }
    }
}

impl fmt::Display for ProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int64(v) => write!(f, "{v}"),
            Self::Utf8(v) => write!(f, "{v}"),
            Self::Paired { key, header } => write!(f, "({key}, {header})"),
        }
    }
}

/// Metric column label: plain before a column-join, `(header, name)` after.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum MetricLabel {
    Plain(String),
    Tagged { header: String, name: String },
}

impl MetricLabel {
    #[must_use]
    pub fn plain(name: impl Into<String>) -> Self {
        Self::Plain(name.into())
    }

    #[must_use]
    pub fn tagged(header: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Tagged {
            header: header.into(),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Plain(name) | Self::Tagged { name, .. } => name,
        }
    }

    #[must_use]
    pub fn header(&self) -> Option<&str> {
        match self {
            Self::Plain(_) => None,
            Self::Tagged { header, .. } => Some(header),
        }
    }

    /// Plain -> Tagged promotion under `header`. Already-tagged labels keep
    /// their original header.
    #[must_use]
    pub fn promote(self, header: &str) -> Self {
        match self {
            Self::Plain(name) => Self::Tagged {
                header: header.to_owned(),
                name,
            },
            tagged @ Self::Tagged { .. } => tagged,
        }
    }
}

impl From<&str> for MetricLabel {
    fn from(value: &str) -> Self {
        Self::Plain(value.to_owned())
    }
}

impl From<String> for MetricLabel {
    fn from(value: String) -> Self {
        Self::Plain(value)
    }
}

impl fmt::Display for MetricLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(name) => write!(f, "{name}"),
            Self::Tagged { header, name } => write!(f, "({header}, {name})"),
        }
    }
}

/// Row key of a performance table: (node, execution instance).
/// Lexicographic ordering of `(node, profile)` is the canonical row order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowKey {
    pub node: NodeId,
    pub profile: ProfileId,
}

impl RowKey {
    #[must_use]
    pub fn new(node: NodeId, profile: ProfileId) -> Self {
        Self { node, profile }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("alignment vectors must have equal lengths")]
    InvalidAlignmentVectors,
    #[error("metric {0} appears more than once in a metric list")]
    DuplicateMetric(MetricLabel),
    #[error("metric {0} is listed as both exclusive and inclusive")]
    OverlappingMetric(MetricLabel),
}

/// Exclusive/inclusive partition of a dataset's metric columns.
/// Duplicate-free and disjoint by construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricLists {
    exclusive: Vec<MetricLabel>,
    inclusive: Vec<MetricLabel>,
}

impl MetricLists {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(
        exclusive: Vec<MetricLabel>,
        inclusive: Vec<MetricLabel>,
    ) -> Result<Self, IndexError> {
        let lists = Self {
            exclusive,
            inclusive,
        };
        lists.validate()?;
        Ok(lists)
    }

    pub fn validate(&self) -> Result<(), IndexError> {
        for list in [&self.exclusive, &self.inclusive] {
            let mut seen = HashSet::new();
            for label in list {
                if !seen.insert(label) {
                    return Err(IndexError::DuplicateMetric(label.clone()));
                }
            }
        }
        let exclusive: HashSet<_> = self.exclusive.iter().collect();
        for label in &self.inclusive {
            if exclusive.contains(label) {
                return Err(IndexError::OverlappingMetric(label.clone()));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn exclusive(&self) -> &[MetricLabel] {
        &self.exclusive
    }

    #[must_use]
    pub fn inclusive(&self) -> &[MetricLabel] {
        &self.inclusive
    }

    #[must_use]
    pub fn is_exclusive(&self, label: &MetricLabel) -> bool {
        self.exclusive.contains(label)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exclusive.is_empty() && self.inclusive.is_empty()
    }

    /// Append to the exclusive list unless the label is already classified.
    pub fn push_exclusive(&mut self, label: MetricLabel) {
        if !self.exclusive.contains(&label) && !self.inclusive.contains(&label) {
            self.exclusive.push(label);
        }
    }

    /// Append to the inclusive list unless the label is already classified.
    pub fn push_inclusive(&mut self, label: MetricLabel) {
        if !self.exclusive.contains(&label) && !self.inclusive.contains(&label) {
            self.inclusive.push(label);
        }
    }

    /// Extend with another partition, keeping first-seen order and dropping
    /// labels already present on either side.
    pub fn union_with(&mut self, other: &Self) {
        for label in &other.exclusive {
            if !self.exclusive.contains(label) {
                self.exclusive.push(label.clone());
            }
        }
        for label in &other.inclusive {
            if !self.inclusive.contains(label) {
                self.inclusive.push(label.clone());
            }
        }
    }

    /// Promote every label to its tagged form under `header`.
    #[must_use]
    pub fn promoted(&self, header: &str) -> Self {
        Self {
            exclusive: self
                .exclusive
                .iter()
                .map(|label| label.clone().promote(header))
                .collect(),
            inclusive: self
                .inclusive
                .iter()
                .map(|label| label.clone().promote(header))
                .collect(),
        }
    }
}

/// Ordered mapping from execution instance to its external source descriptor.
/// Order tracks the instance list; inserts are last-write-wins on key
/// collision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileMapping {
    entries: Vec<(ProfileId, String)>,
}

impl ProfileMapping {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Last-write-wins insert; returns the displaced descriptor on collision.
    pub fn insert(&mut self, profile: ProfileId, source: impl Into<String>) -> Option<String> {
        let source = source.into();
        if let Some(slot) = self
            .entries
            .iter_mut()
            .find(|(existing, _)| *existing == profile)
        {
            return Some(std::mem::replace(&mut slot.1, source));
        }
        self.entries.push((profile, source));
        None
    }

    #[must_use]
    pub fn get(&self, profile: &ProfileId) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == profile)
            .map(|(_, source)| source.as_str())
    }

    #[must_use]
    pub fn contains(&self, profile: &ProfileId) -> bool {
        self.get(profile).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ProfileId> {
        self.entries.iter().map(|(profile, _)| profile)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ProfileId, &str)> {
        self.entries
            .iter()
            .map(|(profile, source)| (profile, source.as_str()))
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&ProfileId) -> bool) {
        self.entries.retain(|(profile, _)| keep(profile));
    }
}

impl FromIterator<(ProfileId, String)> for ProfileMapping {
    fn from_iter<T: IntoIterator<Item = (ProfileId, String)>>(iter: T) -> Self {
        let mut mapping = Self::new();
        for (profile, source) in iter {
            mapping.insert(profile, source);
        }
        mapping
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlignmentPlan<K> {
    pub union_labels: Vec<K>,
    pub left_positions: Vec<Option<usize>>,
    pub right_positions: Vec<Option<usize>>,
}

/// First-occurrence position of every label.
#[must_use]
pub fn position_map_first<K: Clone + Eq + Hash>(labels: &[K]) -> HashMap<K, usize> {
    let mut positions = HashMap::with_capacity(labels.len());
    for (idx, label) in labels.iter().enumerate() {
        positions.entry(label.clone()).or_insert(idx);
    }
    positions
}

#[must_use]
pub fn is_sorted<K: Ord>(labels: &[K]) -> bool {
    labels.windows(2).all(|pair| pair[0] <= pair[1])
}

/// Stable argsort: apply the returned permutation to restore canonical order.
#[must_use]
pub fn sort_permutation<K: Ord>(labels: &[K]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..labels.len()).collect();
    order.sort_by(|a, b| labels[*a].cmp(&labels[*b]));
    order
}

/// Union alignment of two label sequences: left labels in order, then unseen
/// right labels in order, with per-side source positions for reindexing.
pub fn align_union<K: Clone + Eq + Hash>(left: &[K], right: &[K]) -> AlignmentPlan<K> {
    let left_map = position_map_first(left);
    let right_map = position_map_first(right);

    let mut union_labels = left.to_vec();
    for label in right {
        if !left_map.contains_key(label) {
            union_labels.push(label.clone());
        }
    }

    let left_positions = union_labels
        .iter()
        .map(|label| left_map.get(label).copied())
        .collect();
    let right_positions = union_labels
        .iter()
        .map(|label| right_map.get(label).copied())
        .collect();

    AlignmentPlan {
        union_labels,
        left_positions,
        right_positions,
    }
}

pub fn validate_alignment_plan<K>(plan: &AlignmentPlan<K>) -> Result<(), IndexError> {
    if plan.left_positions.len() != plan.right_positions.len()
        || plan.left_positions.len() != plan.union_labels.len()
    {
        return Err(IndexError::InvalidAlignmentVectors);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{
        IndexError, MetricLabel, MetricLists, ProfileId, ProfileMapping, align_union, is_sorted,
        sort_permutation, validate_alignment_plan,
    };

    #[test]
    fn union_alignment_preserves_left_then_right_unseen_order() {
        let left: Vec<ProfileId> = vec![1_i64.into(), 2_i64.into(), 4_i64.into()];
        let right: Vec<ProfileId> = vec![2_i64.into(), 3_i64.into(), 4_i64.into()];

        let plan = align_union(&left, &right);
        assert_eq!(
            plan.union_labels,
            vec![
                ProfileId::Int64(1),
                ProfileId::Int64(2),
                ProfileId::Int64(4),
                ProfileId::Int64(3),
            ]
        );
        assert_eq!(plan.left_positions, vec![Some(0), Some(1), Some(2), None]);
        assert_eq!(plan.right_positions, vec![None, Some(0), Some(2), Some(1)]);
        validate_alignment_plan(&plan).expect("plan must be valid");
    }

    #[test]
    fn sortedness_helpers() {
        let labels: Vec<ProfileId> = vec!["a".into(), "a".into(), "b".into()];
        assert!(is_sorted(&labels));

        let unsorted: Vec<ProfileId> = vec![3_i64.into(), 1_i64.into(), 2_i64.into()];
        assert!(!is_sorted(&unsorted));
        assert_eq!(sort_permutation(&unsorted), vec![1, 2, 0]);
    }

    #[test]
    fn metric_lists_reject_overlap() {
        let err = MetricLists::from_parts(
            vec![MetricLabel::plain("time")],
            vec![MetricLabel::plain("time")],
        )
        .expect_err("must fail");
        assert!(matches!(err, IndexError::OverlappingMetric(_)));
    }

    #[test]
    fn metric_union_deduplicates() {
        let mut lists = MetricLists::from_parts(
            vec![MetricLabel::plain("time")],
            vec![MetricLabel::plain("time (inc)")],
        )
        .expect("lists");
        let other = lists.clone();
        lists.union_with(&other);
        assert_eq!(lists.exclusive().len(), 1);
        assert_eq!(lists.inclusive().len(), 1);
    }

    #[test]
    fn promotion_tags_labels_once() {
        let label = MetricLabel::plain("time").promote("h0");
        assert_eq!(label, MetricLabel::tagged("h0", "time"));
        assert_eq!(label.promote("h1"), MetricLabel::tagged("h0", "time"));
    }

    #[test]
    fn profile_mapping_is_last_write_wins_and_ordered() {
        let mut mapping = ProfileMapping::new();
        assert!(mapping.insert(ProfileId::from(1), "a.json").is_none());
        assert!(mapping.insert(ProfileId::from(2), "b.json").is_none());
        assert_eq!(
            mapping.insert(ProfileId::from(1), "c.json"),
            Some("a.json".to_owned())
        );
        assert_eq!(mapping.get(&ProfileId::from(1)), Some("c.json"));
        let keys: Vec<_> = mapping.keys().cloned().collect();
        assert_eq!(keys, vec![ProfileId::Int64(1), ProfileId::Int64(2)]);
    }
}
