//! Mobility map: a weighted directed graph of located nodes
//!
//! Mobile objects walk the map from node to node. Each node carries an
//! ordered list of outgoing links; a link's weight is the probability of
//! taking it when leaving the node, so the weights of a node's links sum
//! to 1.
//!
//! Maps are assembled with [`MapBuilder`] and are immutable afterwards:
//! - Ring, line and grid shapes for quick experiments
//! - Custom: add nodes and one-way or paired links

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::MapError;
use crate::geometry::Point;

/// Tolerance used when checking that a node's outgoing weights sum to 1
pub const WEIGHT_TOLERANCE: f64 = 1e-9;

/// Index of a node within its map
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub usize);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A weighted, one-way link to another node
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NodeLink {
    to: NodeId,
    to_location: Point,
    weight: f64,
}

impl NodeLink {
    fn new(to: NodeId, to_location: Point, weight: f64) -> Result<Self, MapError> {
        if !(0.0..=1.0).contains(&weight) {
            return Err(MapError::InvalidWeight(weight));
        }
        Ok(Self {
            to,
            to_location,
            weight,
        })
    }

    /// The node this link leads to
    pub fn goes_to(&self) -> NodeId {
        self.to
    }

    /// Location of the node this link leads to
    pub fn destination_location(&self) -> Point {
        self.to_location
    }

    /// Probability of this link being taken
    pub fn weight(&self) -> f64 {
        self.weight
    }
}

/// Links are equal when they lead to the same location
impl PartialEq for NodeLink {
    fn eq(&self, other: &Self) -> bool {
        self.to_location == other.to_location
    }
}

impl std::fmt::Display for NodeLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.to_location, self.weight)
    }
}

/// A located node with its outgoing links
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapNode {
    id: NodeId,
    location: Point,
    links: Vec<NodeLink>,
}

impl MapNode {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn location(&self) -> Point {
        self.location
    }

    /// Outgoing links in insertion order
    pub fn links(&self) -> &[NodeLink] {
        &self.links
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Whether this node has a link leading to `location`
    pub fn is_linked_to_location(&self, location: &Point) -> bool {
        self.link_to_location(location).is_some()
    }

    /// The link leading to `location`, if any
    pub fn link_to_location(&self, location: &Point) -> Option<&NodeLink> {
        self.links.iter().find(|l| l.to_location == *location)
    }

    /// Position of the link leading to `location`, if any
    pub fn link_index_to_location(&self, location: &Point) -> Option<usize> {
        self.links.iter().position(|l| l.to_location == *location)
    }

    /// Sum of outgoing link weights
    pub fn weight_sum(&self) -> f64 {
        self.links.iter().map(|l| l.weight).sum()
    }

    pub fn is_dead_end(&self) -> bool {
        self.links.is_empty()
    }
}

impl std::fmt::Display for MapNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Node {} at {} -> ", self.id, self.location)?;
        if self.links.is_empty() {
            return write!(f, "nothing");
        }
        let links: Vec<String> = self.links.iter().map(|l| l.to_string()).collect();
        write!(f, "{}", links.join("; "))
    }
}

/// An immutable mobility map
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MobilityMap {
    nodes: Vec<MapNode>,
}

impl MobilityMap {
    /// Get a node by id
    pub fn node(&self, id: NodeId) -> Option<&MapNode> {
        self.nodes.get(id.0)
    }

    /// Get a node by id, failing if it is not on this map
    pub fn try_node(&self, id: NodeId) -> Result<&MapNode, MapError> {
        self.node(id).ok_or(MapError::UnknownNode(id))
    }

    pub fn nodes(&self) -> &[MapNode] {
        &self.nodes
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().map(|n| n.id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        id.0 < self.nodes.len()
    }

    pub fn contains_location(&self, location: &Point) -> bool {
        self.nodes.iter().any(|n| n.location == *location)
    }

    pub fn has_dead_ends(&self) -> bool {
        self.nodes.iter().any(MapNode::is_dead_end)
    }

    /// Whether `source` is on the map and links to the location of `destination`
    pub fn is_linked(&self, source: NodeId, destination: NodeId) -> bool {
        match (self.node(source), self.node(destination)) {
            (Some(s), Some(d)) => s.is_linked_to_location(&d.location),
            _ => false,
        }
    }

    /// Check that the map can drive a simulation
    ///
    /// The map must be non-empty, free of dead ends, and every node's
    /// outgoing weights must sum to 1.
    pub fn validate_for_simulation(&self) -> Result<(), MapError> {
        if self.is_empty() {
            return Err(MapError::Empty);
        }
        for node in &self.nodes {
            if node.is_dead_end() {
                return Err(MapError::DeadEnd(node.id));
            }
            let sum = node.weight_sum();
            if (sum - 1.0).abs() > WEIGHT_TOLERANCE {
                return Err(MapError::WeightSum { node: node.id, sum });
            }
        }
        Ok(())
    }

    /// Print a simple text listing of the map
    pub fn visualize(&self) -> String {
        let mut output = String::new();
        output.push_str("Mobility Map:\n");
        output.push_str(&format!("  Nodes: {}\n", self.len()));
        output.push_str(&format!(
            "  Links: {}\n\n",
            self.nodes.iter().map(MapNode::link_count).sum::<usize>()
        ));
        for node in &self.nodes {
            output.push_str(&format!("  {}\n", node));
        }
        output
    }
}

/// Builder for mobility maps
#[derive(Debug, Default)]
pub struct MapBuilder {
    nodes: Vec<MapNode>,
}

impl MapBuilder {
    pub fn new() -> Self {
        Self { nodes: Vec::new() }
    }

    /// Place a node; two nodes may not share a location
    pub fn add_node(&mut self, location: Point) -> Result<NodeId, MapError> {
        if self.nodes.iter().any(|n| n.location == location) {
            return Err(MapError::DuplicateLocation {
                x: location.x,
                y: location.y,
            });
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(MapNode {
            id,
            location,
            links: Vec::new(),
        });
        Ok(id)
    }

    /// Add a one-way link from `from` to `to`
    pub fn add_link_oneway(&mut self, from: NodeId, to: NodeId, weight: f64) -> Result<(), MapError> {
        let to_location = self
            .nodes
            .get(to.0)
            .map(|n| n.location)
            .ok_or(MapError::UnknownNode(to))?;
        let link = NodeLink::new(to, to_location, weight)?;

        let node = self.nodes.get_mut(from.0).ok_or(MapError::UnknownNode(from))?;
        if from == to {
            return Err(MapError::SelfLink(from));
        }
        if node.location == to_location {
            return Err(MapError::SameLocation { from, to });
        }
        if node.links.contains(&link) {
            return Err(MapError::DuplicateLink { from, to });
        }

        trace!(%from, %to, weight, "link added");
        node.links.push(link);
        Ok(())
    }

    /// Add links in both directions
    pub fn add_link_pair(
        &mut self,
        a: NodeId,
        b: NodeId,
        weight_ab: f64,
        weight_ba: f64,
    ) -> Result<(), MapError> {
        self.add_link_oneway(a, b, weight_ab)?;
        self.add_link_oneway(b, a, weight_ba)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn build(self) -> MobilityMap {
        MobilityMap { nodes: self.nodes }
    }

    /// Build a straight line of `n` nodes spaced `spacing` apart on the x axis
    ///
    /// n0 - n1 - n2 - ... ; inner nodes split their weight evenly.
    pub fn line(n: usize, spacing: f64) -> Result<MobilityMap, MapError> {
        let mut builder = Self::new();
        let ids = (0..n)
            .map(|i| builder.add_node(Point::new(i as f64 * spacing, 0.0)))
            .collect::<Result<Vec<_>, _>>()?;

        let mut adjacency: Vec<Vec<NodeId>> = vec![Vec::new(); n];
        for i in 0..n.saturating_sub(1) {
            adjacency[i].push(ids[i + 1]);
            adjacency[i + 1].push(ids[i]);
        }
        builder.link_uniform(&ids, &adjacency)?;
        Ok(builder.build())
    }

    /// Build a ring of `n` nodes on a circle of the given radius
    pub fn ring(n: usize, radius: f64) -> Result<MobilityMap, MapError> {
        let mut builder = Self::new();
        let ids = (0..n)
            .map(|i| {
                let angle = std::f64::consts::TAU * i as f64 / n as f64;
                builder.add_node(Point::new(radius * angle.cos(), radius * angle.sin()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut adjacency: Vec<Vec<NodeId>> = vec![Vec::new(); n];
        if n >= 3 {
            for i in 0..n {
                adjacency[i].push(ids[(i + 1) % n]);
                adjacency[i].push(ids[(i + n - 1) % n]);
            }
        } else if n == 2 {
            adjacency[0].push(ids[1]);
            adjacency[1].push(ids[0]);
        }
        builder.link_uniform(&ids, &adjacency)?;
        Ok(builder.build())
    }

    /// Build a `width` x `height` grid with 4-neighbour links
    pub fn grid(width: usize, height: usize, spacing: f64) -> Result<MobilityMap, MapError> {
        let mut builder = Self::new();
        let mut ids = Vec::with_capacity(width * height);
        for row in 0..height {
            for col in 0..width {
                ids.push(builder.add_node(Point::new(col as f64 * spacing, row as f64 * spacing))?);
            }
        }

        let mut adjacency: Vec<Vec<NodeId>> = vec![Vec::new(); ids.len()];
        for row in 0..height {
            for col in 0..width {
                let idx = row * width + col;
                if col + 1 < width {
                    adjacency[idx].push(ids[idx + 1]);
                }
                if col > 0 {
                    adjacency[idx].push(ids[idx - 1]);
                }
                if row + 1 < height {
                    adjacency[idx].push(ids[idx + width]);
                }
                if row > 0 {
                    adjacency[idx].push(ids[idx - width]);
                }
            }
        }
        builder.link_uniform(&ids, &adjacency)?;
        Ok(builder.build())
    }

    /// Link every node to its neighbours with equal weights
    ///
    /// The last link takes the remainder so each row sums to 1.
    fn link_uniform(&mut self, ids: &[NodeId], adjacency: &[Vec<NodeId>]) -> Result<(), MapError> {
        for (from, neighbours) in ids.iter().zip(adjacency) {
            let k = neighbours.len();
            let share = 1.0 / k as f64;
            let mut assigned = 0.0;
            for (i, to) in neighbours.iter().enumerate() {
                let weight = if i + 1 == k { 1.0 - assigned } else { share };
                assigned += weight;
                self.add_link_oneway(*from, *to, weight)?;
            }
        }
        Ok(())
    }
}
