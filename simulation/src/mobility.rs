//! Weighted random-walk mobility with return bias
//!
//! A mobile object always travels along one link, from its `source` node
//! towards its `destination` node. When it reaches the destination it picks
//! the next link from that node's outgoing weights. The return bias `k`
//! scales the weight of the link leading straight back to the node just
//! departed: `k = 1` leaves the weights untouched, `k = 0` forbids turning
//! back whenever another link exists.

use oppnet_core::{MapError, MapNode, MobilityMap, NodeId, NodeLink, ParameterError, Point};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Default movement speed in distance units per simulated second
pub const DEFAULT_SPEED: f64 = 1.51;

/// Default return bias
pub const DEFAULT_RETURN_BIAS: f64 = 0.1;

/// Return weights this close to 1 leave no mass for the other links
const DEGENERATE_RETURN: f64 = 1e-12;

/// Movement state of a mobile object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mobility {
    source: NodeId,
    destination: NodeId,
    speed: f64,
    return_bias: f64,
}

impl Mobility {
    /// Travel from `source` towards `destination` with default speed and bias
    pub fn new(source: NodeId, destination: NodeId) -> Self {
        Self {
            source,
            destination,
            speed: DEFAULT_SPEED,
            return_bias: DEFAULT_RETURN_BIAS,
        }
    }

    pub fn source(&self) -> NodeId {
        self.source
    }

    pub fn destination(&self) -> NodeId {
        self.destination
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn return_bias(&self) -> f64 {
        self.return_bias
    }

    pub fn set_speed(&mut self, speed: f64) -> Result<(), ParameterError> {
        if speed.is_nan() || speed <= 0.0 {
            return Err(ParameterError::NonPositiveSpeed(speed));
        }
        self.speed = speed;
        Ok(())
    }

    pub fn set_return_bias(&mut self, bias: f64) -> Result<(), ParameterError> {
        if !(0.0..=1.0).contains(&bias) {
            return Err(ParameterError::ReturnBiasOutOfRange(bias));
        }
        self.return_bias = bias;
        Ok(())
    }

    /// Move `location` along the map for `dt` simulated seconds
    ///
    /// Nodes reached on the way become the new source and a fresh
    /// destination is drawn at each of them, until the leftover distance no
    /// longer reaches the next node. The object then stops part-way along
    /// the current link.
    pub fn advance<R: Rng + ?Sized>(
        &mut self,
        location: &mut Point,
        map: &MobilityMap,
        dt: f64,
        rng: &mut R,
    ) -> Result<(), MapError> {
        let mut budget = dt * self.speed;
        let mut target = map.try_node(self.destination)?.location();
        let mut remaining = location.distance_to(&target);

        while budget > remaining {
            budget -= remaining;
            *location = target;

            let departed = map.try_node(self.source)?.location();
            let arrived = map.try_node(self.destination)?;
            let link = choose_link_biased(arrived, Some(&departed), self.return_bias, rng)?;

            trace!(
                from = %self.source,
                at = %self.destination,
                next = %link.goes_to(),
                "mobility hop"
            );
            self.source = self.destination;
            self.destination = link.goes_to();
            target = link.destination_location();
            remaining = location.distance_to(&target);
        }

        if remaining > 0.0 {
            *location = location.lerp(&target, budget / remaining);
        }
        Ok(())
    }
}

/// Pick an outgoing link by inverse-CDF sampling over the node's weights
pub fn choose_link<'a, R: Rng + ?Sized>(
    node: &'a MapNode,
    rng: &mut R,
) -> Result<&'a NodeLink, MapError> {
    let links = node.links();
    if links.is_empty() {
        return Err(MapError::DeadEnd(node.id()));
    }
    let weights: Vec<f64> = links.iter().map(NodeLink::weight).collect();
    Ok(&links[sample_index(&weights, rng)])
}

/// Pick an outgoing link, scaling the link back to `previous` by `bias`
///
/// A node with a single link always yields that link. Without a link back
/// to `previous` the choice is unbiased. Otherwise, with `a` the return
/// link's weight, the return link gets `a * k` and every other link its
/// weight times `(1 - k * a) / (1 - a)`, which keeps the total at 1.
pub fn choose_link_biased<'a, R: Rng + ?Sized>(
    node: &'a MapNode,
    previous: Option<&Point>,
    bias: f64,
    rng: &mut R,
) -> Result<&'a NodeLink, MapError> {
    let links = node.links();
    if links.len() == 1 {
        return Ok(&links[0]);
    }

    let return_index = match previous.and_then(|p| node.link_index_to_location(p)) {
        Some(idx) => idx,
        None => return choose_link(node, rng),
    };

    let a = links[return_index].weight();
    if a >= 1.0 - DEGENERATE_RETURN {
        return Ok(&links[return_index]);
    }

    let scale = (1.0 - bias * a) / (1.0 - a);
    let weights: Vec<f64> = links
        .iter()
        .enumerate()
        .map(|(idx, link)| {
            if idx == return_index {
                a * bias
            } else {
                link.weight() * scale
            }
        })
        .collect();

    Ok(&links[sample_index(&weights, rng)])
}

/// Index of the first entry whose cumulative weight exceeds a uniform draw
///
/// Falls back to the last entry with positive weight when rounding leaves
/// the cumulative sum just below the draw.
fn sample_index<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> usize {
    let x: f64 = rng.random();
    let mut cumulative = 0.0;
    for (idx, weight) in weights.iter().enumerate() {
        cumulative += weight;
        if cumulative > x {
            return idx;
        }
    }
    weights
        .iter()
        .rposition(|w| *w > 0.0)
        .unwrap_or(weights.len().saturating_sub(1))
}
