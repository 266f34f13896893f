//! # Oppnet Simulation
//!
//! Simulates range-limited wireless devices moving over a weighted map and
//! replicating versioned artifacts whenever two of them are in mutual range.
//!
//! ## Overview
//!
//! - **Mobile objects** walk the map by weighted random choice, with a
//!   tunable bias against turning straight back
//! - **Beacons** sit still and store whatever they receive
//! - **Information sources** sit still and hand out fresh versions of one
//!   resource
//!
//! Contacts run a four-step protocol (initiate, discover, then complete or
//! abort) with configurable setup time, bit rate and failure probabilities.
//! Successful transfers follow a newest-wins rule: a device only takes
//! versions younger than the ones it holds.
//!
//! ## Architecture
//!
//! - **Context** (`context.rs`): device ids, seeded RNG and protocol controller
//! - **Devices** (`device.rs`, `population.rs`): device variants and the device table
//! - **Mobility** (`mobility.rs`): random walk with return bias
//! - **Protocol** (`comm.rs`): session state machine and transfer timing
//! - **Simulator** (`simulator.rs`): fixed-timestep driver with pause control
//! - **Events and monitors** (`events.rs`, `monitor.rs`): observer interfaces and built-ins
//! - **Scenarios** (`scenarios.rs`): ready-made setups
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use oppnet_simulation::*;
//!
//! let context = SimulationContext::seeded(7);
//! let mut sim = scenarios::two_node_ferry(context, 60.0)?;
//! let stats = Arc::new(StatsMonitor::new());
//! sim.add_monitor(stats.clone());
//! sim.run(120.0)?;
//! println!("{} artifacts moved", stats.stats().artifacts_transferred);
//! ```

pub mod comm;
pub mod context;
pub mod device;
pub mod error;
pub mod events;
pub mod mobility;
pub mod monitor;
pub mod population;
pub mod scenarios;
pub mod simulator;

// Re-export main types
pub use comm::{CommConfig, CommunicationController};
pub use context::{DeviceIdAllocator, SimulationContext};
pub use device::{
    DEFAULT_RANGE, Device, DeviceId, DeviceKind, DeviceSnapshot, DeviceType, Phase, Session,
};
pub use error::{ProtocolError, ScenarioError, SimResult, SimulationError};
pub use events::{
    CommunicationEvent, CommunicationEventKind, CommunicationListener, LifecycleEvent,
    SimulationListener,
};
pub use mobility::{DEFAULT_RETURN_BIAS, DEFAULT_SPEED, Mobility, choose_link, choose_link_biased};
pub use monitor::{
    ConsoleMonitor, EventRecorder, MonitorError, MonitorPhase, RecordedEvent, SessionStats,
    StatsMonitor, format_iteration, format_pair,
};
pub use population::{DeviceHandle, Population};
pub use simulator::{DEFAULT_TIMESTEP, PauseHandle, Simulator};

// Re-export the data model for integration
pub use oppnet_core::{
    Artifact, ArtifactContainer, ArtifactError, MapBuilder, MapError, MapNode, MobilityMap,
    NodeId, NodeLink, ParameterError, Point, ResourceId,
};
