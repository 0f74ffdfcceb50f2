//! Causal DAG type and the regression primitives used to estimate it.

pub mod dag;
pub mod regression;

use thiserror::Error;

pub use dag::{CausalGraph, Edge, EdgeSnapshot, EdgeSpec, GraphSnapshot, Node, NodeId, NodeKind};
pub use regression::{fit_linear, LinearFit, Method};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("node '{0}' already exists")]
    DuplicateNode(String),

    #[error("self-loop on '{0}'")]
    SelfLoop(String),

    #[error("edge {cause} -> {effect} already exists")]
    DuplicateEdge { cause: String, effect: String },

    #[error("edge {cause} -> {effect} would create a cycle")]
    CycleDetected { cause: String, effect: String },
}
