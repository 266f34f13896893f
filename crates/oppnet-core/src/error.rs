//! Error types for the oppnet data model

use thiserror::Error;

use crate::map::NodeId;

/// Top-level error type for the data model
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Map error: {0}")]
    Map(#[from] MapError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Parameter error: {0}")]
    Parameter(#[from] ParameterError),
}

/// Errors raised while building or validating a mobility map
#[derive(Debug, Error, Clone, PartialEq)]
pub enum MapError {
    #[error("Map has no nodes")]
    Empty,

    #[error("Node {0} is a dead end (no outgoing links)")]
    DeadEnd(NodeId),

    #[error("Outgoing link weights of node {node} sum to {sum}, expected 1")]
    WeightSum { node: NodeId, sum: f64 },

    #[error("Node {0} cannot link to itself")]
    SelfLink(NodeId),

    #[error("Node {from} cannot link to node {to} at the same location")]
    SameLocation { from: NodeId, to: NodeId },

    #[error("Node {from} already has a link to the location of node {to}")]
    DuplicateLink { from: NodeId, to: NodeId },

    #[error("Link weight {0} is outside [0, 1]")]
    InvalidWeight(f64),

    #[error("Node {0} is not on the map")]
    UnknownNode(NodeId),

    #[error("A node already exists at ({x}, {y})")]
    DuplicateLocation { x: f64, y: f64 },
}

/// Errors raised by artifacts and artifact containers
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ArtifactError {
    #[error("Resource id must be >= 1, got {0}")]
    InvalidResourceId(u32),

    #[error("Artifact age must be >= 0, got {0}")]
    NegativeAge(f64),

    #[error(
        "Artifact for resource {resource} is not newer than the stored one \
         (stored age {existing}, incoming age {incoming})"
    )]
    NotNewer {
        resource: u32,
        existing: f64,
        incoming: f64,
    },
}

/// Errors raised by setters given out-of-range parameters
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParameterError {
    #[error("Timestep length must be greater than 0, got {0}")]
    NonPositiveTimestep(f64),

    #[error("Movement speed must be greater than 0, got {0}")]
    NonPositiveSpeed(f64),

    #[error("Return bias must be in [0, 1], got {0}")]
    ReturnBiasOutOfRange(f64),

    #[error("Communication range cannot be negative, got {0}")]
    NegativeRange(f64),

    #[error("{name} must be in [0, 1], got {value}")]
    ProbabilityOutOfRange { name: &'static str, value: f64 },

    #[error("{name} cannot be negative, got {value}")]
    Negative { name: &'static str, value: f64 },

    #[error("{name} must be greater than 0, got {value}")]
    NonPositive { name: &'static str, value: f64 },

    #[error("Requested {requested} devices on distinct nodes but the map has only {available} nodes")]
    NotEnoughNodes { requested: usize, available: usize },
}

/// Result type for data-model operations
pub type CoreResult<T> = Result<T, CoreError>;
