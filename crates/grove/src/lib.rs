#![forbid(unsafe_code)]

//! Umbrella crate re-exporting the grove workspace surface.
//!
//! A [`Dataset`] pairs a rooted call [`Graph`] with a performance table keyed
//! by (node, execution instance), per-instance metadata, and
//! inclusive/exclusive metric lists. The ensembling engine combines N
//! datasets into one: [`stack`] appends them as additional rows under a
//! shared metric namespace, [`join_columns`] joins them as additional columns
//! under per-dataset headers. Both unify the call graphs first, so every
//! merged dataset shares a single graph object.

pub use gv_ensemble::{
    Dataset, EnsembleError, JoinOptions, StackOptions, compose_remap, filter_profiles,
    join_columns, stack, unify, unify_in_place,
};
pub use gv_graph::{Frame, Graph, GraphError, NodeId};
pub use gv_index::{
    IndexError, MetricLabel, MetricLists, ProfileId, ProfileMapping, RowKey,
};
pub use gv_stats::{StatsError, std, variance};
pub use gv_table::{Column, MetadataTable, PerfTable, StatsTable, TableError};
pub use gv_types::{DType, NullKind, Scalar, TypeError};
