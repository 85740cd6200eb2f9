#![forbid(unsafe_code)]

//! Ensembling engine: unifies the call graphs of N profile datasets into one
//! union graph, reindexes every performance table under the composed node
//! remap, and merges the datasets either as additional rows (shared metric
//! namespace, distinct execution instances) or as additional columns
//! (distinct metric namespaces under per-dataset headers).

mod columns;
mod dataset;
mod stack;
mod unify;

pub use columns::{JoinOptions, join_columns};
pub use dataset::{Dataset, filter_profiles};
pub use stack::{StackOptions, stack};
pub use unify::{compose_remap, unify, unify_in_place};

use gv_graph::{Frame, GraphError, NodeId};
use gv_index::{IndexError, ProfileId};
use gv_table::TableError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnsembleError {
    #[error("at least one dataset is required")]
    EmptyInput,
    #[error("node {node} referenced by the performance table does not belong to the dataset graph")]
    ForeignNode { node: NodeId },
    #[error("expected {expected} column headers but {actual} were provided")]
    HeaderCount { expected: usize, actual: usize },
    #[error("header {0:?} is assigned to more than one dataset")]
    DuplicateHeader(String),
    #[error("correlation key {key:?} is missing from the metadata table of dataset {position}")]
    CorrelationKeyMissing { key: String, position: usize },
    #[error(
        "correlation key {key:?} has a missing or non-identifier value for profile {profile} in dataset {position}"
    )]
    InvalidCorrelationValue {
        key: String,
        profile: ProfileId,
        position: usize,
    },
    #[error(
        "correlation key {key:?} maps more than one profile of dataset {position} to {value}"
    )]
    DuplicateCorrelationValue {
        key: String,
        value: ProfileId,
        position: usize,
    },
    #[error(
        "profile counts of all datasets must match when no correlation key is given: {left} != {right}"
    )]
    ProfileCountMismatch { left: usize, right: usize },
    #[error("dataset {position} requires sorted profiles for positional correspondence")]
    UnsortedProfiles { position: usize },
    #[error("profile {0} is not present in the dataset")]
    UnknownProfile(ProfileId),
    #[error("remapped node {node} has frame {actual:?} but the original row carried {expected:?}")]
    NodeRemapMismatch {
        node: NodeId,
        expected: Option<Frame>,
        actual: Option<Frame>,
    },
    #[error(
        "duplicate row key (node {node}, profile {profile}) after stacking; input instance ids overlap"
    )]
    DuplicateRowKey { node: NodeId, profile: ProfileId },
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Table(#[from] TableError),
}
