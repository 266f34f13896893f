//! Pre-built simulation setups
//!
//! Each function assembles a ready-to-run [`Simulator`] from a context; the
//! caller registers monitors and calls `run`.

use oppnet_core::{MapBuilder, NodeId, Point, ResourceId};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::SimulationContext;
use crate::device::Device;
use crate::error::SimResult;
use crate::simulator::{DEFAULT_TIMESTEP, Simulator};

/// Distance between the two nodes of the ferry scenario
pub const DEFAULT_FERRY_DISTANCE: f64 = 60.0;

/// One mobile object shuttling between two nodes, an information source at the far node
///
/// ```text
/// (home) <=====================> (far)
///  mobile object                  information source R1
/// ```
///
/// Both links have weight 1, so the mobile object walks back and forth and
/// meets the source each time it nears the far node.
pub fn two_node_ferry(context: SimulationContext, distance: f64) -> SimResult<Simulator> {
    let mut context = context;
    let mut builder = MapBuilder::new();
    let home = builder.add_node(Point::new(0.0, 0.0))?;
    let far = builder.add_node(Point::new(distance, 0.0))?;
    builder.add_link_pair(home, far, 1.0, 1.0)?;
    let map = builder.build();

    let mobile = Device::mobile_object(context.ids_mut(), &map, home, far)?;
    let source =
        Device::information_source(context.ids_mut(), Point::new(distance, 0.0), ResourceId::new(1)?);

    let mut sim = Simulator::new(map, context)?;
    sim.set_timestep(DEFAULT_TIMESTEP)?;
    sim.set_mobile_objects(vec![mobile])?;
    sim.set_information_sources(vec![source])?;

    info!(distance, "two-node ferry scenario ready");
    Ok(sim)
}

/// Knobs for [`random_walk`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomWalkConfig {
    pub grid_width: usize,
    pub grid_height: usize,
    pub spacing: f64,
    pub mobile_objects: usize,
    pub information_sources: usize,
    pub beacons: usize,
    pub timestep: f64,
    pub speed: f64,
    pub return_bias: f64,
}

impl Default for RandomWalkConfig {
    fn default() -> Self {
        Self {
            grid_width: 5,
            grid_height: 5,
            spacing: 25.0,
            mobile_objects: 10,
            information_sources: 3,
            beacons: 2,
            timestep: DEFAULT_TIMESTEP,
            speed: crate::mobility::DEFAULT_SPEED,
            return_bias: crate::mobility::DEFAULT_RETURN_BIAS,
        }
    }
}

/// Mobile objects wandering a grid, with sources and beacons on random nodes
pub fn random_walk(context: SimulationContext, config: &RandomWalkConfig) -> SimResult<Simulator> {
    let map = MapBuilder::grid(config.grid_width, config.grid_height, config.spacing)?;
    let mut sim = Simulator::new(map, context)?;
    sim.set_timestep(config.timestep)?;
    sim.generate_random_mobile_objects(config.mobile_objects)?;
    sim.configure_mobile_objects(config.speed, config.return_bias)?;
    sim.generate_random_beacons(config.beacons)?;
    sim.generate_random_information_sources(config.information_sources)?;

    info!(
        nodes = sim.map().len(),
        mobile_objects = config.mobile_objects,
        beacons = config.beacons,
        information_sources = config.information_sources,
        "random walk scenario ready"
    );
    Ok(sim)
}

/// A line of nodes with a source at one end and a beacon in the middle
///
/// ```text
/// n0 - n1 - ... - n(mid) - ... - n(last)
/// R1             beacon
/// ```
///
/// Mobile objects that visit the source leave copies with the beacon, which
/// hands them on to mobile objects that never reach the source themselves.
pub fn beacon_relay(
    context: SimulationContext,
    nodes: usize,
    spacing: f64,
    mobile_objects: usize,
) -> SimResult<Simulator> {
    let mut context = context;
    let map = MapBuilder::line(nodes, spacing)?;
    let source_location = map.try_node(NodeId(0))?.location();
    let beacon_location = map.try_node(NodeId(nodes / 2))?.location();

    let source =
        Device::information_source(context.ids_mut(), source_location, ResourceId::new(1)?);
    let beacon = Device::beacon(context.ids_mut(), beacon_location);

    let mut sim = Simulator::new(map, context)?;
    sim.set_information_sources(vec![source])?;
    sim.set_beacons(vec![beacon])?;
    sim.generate_random_mobile_objects(mobile_objects)?;

    info!(nodes, mobile_objects, "beacon relay scenario ready");
    Ok(sim)
}
