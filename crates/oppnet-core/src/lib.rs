//! # Oppnet Core
//!
//! Data model shared by the opportunistic-network simulator.
//!
//! ## Key Types
//!
//! - [`Point`]: Location on the simulation plane
//! - [`MobilityMap`]: Immutable weighted directed graph that mobile objects walk
//! - [`MapBuilder`]: Assembles maps and enforces the link rules
//! - [`Artifact`]: One version of a resource, aged in simulated seconds
//! - [`ArtifactContainer`]: Newest-known version of each resource held by a device
//!
//! Errors are grouped per concern ([`MapError`], [`ArtifactError`],
//! [`ParameterError`]) under [`CoreError`].

pub mod artifact;
pub mod error;
pub mod geometry;
pub mod map;

// Re-export main types
pub use artifact::{Artifact, ArtifactContainer, ResourceId};
pub use error::{ArtifactError, CoreError, CoreResult, MapError, ParameterError};
pub use geometry::{Point, distance, rand_in_range};
pub use map::{MapBuilder, MapNode, MobilityMap, NodeId, NodeLink, WEIGHT_TOLERANCE};
