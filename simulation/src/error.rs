//! Error types for the simulation engine

use oppnet_core::{ArtifactError, MapError, NodeId, ParameterError, ResourceId};
use thiserror::Error;

use crate::device::{DeviceId, DeviceType, Phase};

/// Top-level error type for simulation operations
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("Map error: {0}")]
    Map(#[from] MapError),

    #[error("Artifact error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Parameter error: {0}")]
    Parameter(#[from] ParameterError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Scenario error: {0}")]
    Scenario(#[from] ScenarioError),
}

/// Violations of the session protocol's preconditions
///
/// These indicate a bug in whatever drives the controller; the offending
/// transition is not applied.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("No device at handle {0}")]
    UnknownDevice(usize),

    #[error("Device {0} cannot start a session with itself")]
    SelfPairing(DeviceId),

    #[error("Device {0} is already communicating")]
    AlreadyCommunicating(DeviceId),

    #[error("Device {0} is not communicating")]
    NotCommunicating(DeviceId),

    #[error("Device {device} is in {actual} but {expected} is required")]
    WrongPhase {
        device: DeviceId,
        expected: Phase,
        actual: Phase,
    },

    #[error("Device {device} is not in a session with device {partner}")]
    PartnerMismatch { device: DeviceId, partner: DeviceId },

    #[error("Devices {first} and {second} are not in mutual range")]
    OutOfRange { first: DeviceId, second: DeviceId },

    #[error("Devices {first} and {second} are still in mutual range")]
    StillInRange { first: DeviceId, second: DeviceId },

    #[error("Device {device} still has {remaining}s left in its phase")]
    TimeRemaining { device: DeviceId, remaining: f64 },

    #[error("Neither device {first} nor device {second} is a mobile object")]
    NoMobileParticipant { first: DeviceId, second: DeviceId },

    #[error("Information source {0} cannot receive artifacts")]
    SourceReceiving(DeviceId),

    #[error("Commit failed: {0}")]
    Commit(#[from] ArtifactError),
}

/// Invalid device sets handed to the simulator
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScenarioError {
    #[error("Device {device} references node {node}, which is not on the map")]
    UnknownNode { device: DeviceId, node: NodeId },

    #[error("Device {device} travels from {from} to {to}, which are not linked")]
    NotLinked {
        device: DeviceId,
        from: NodeId,
        to: NodeId,
    },

    #[error("Device {device} is a {actual}, expected a {expected}")]
    WrongDeviceType {
        device: DeviceId,
        expected: DeviceType,
        actual: DeviceType,
    },

    #[error("Two information sources generate resource {0}")]
    DuplicateResource(ResourceId),

    #[error("Two information sources share the location of device {0}")]
    DuplicateLocation(DeviceId),

    #[error("Device id {0} appears more than once")]
    DuplicateDevice(DeviceId),

    #[error("Map error: {0}")]
    Map(#[from] MapError),
}

/// Result type for simulation operations
pub type SimResult<T> = Result<T, SimulationError>;
