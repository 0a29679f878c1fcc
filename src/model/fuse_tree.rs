//! The capacity network: a rooted tree of per-phase fuses with charging
//! stations as leaves.
//!
//! Scenario builders assemble an owned tree of [`Fuse`] values;
//! [`FuseTree::new`] flattens it into an arena addressed by [`NodeId`] in
//! depth-first pre-order. Parents are plain indices into the arena, so the
//! tree holds no reference cycles. The shape is frozen after construction;
//! only limits and station status may still change.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TreeError;

use super::phase::{Phase, PhaseCurrents};
use super::station::{ChargingStation, PhaseRotation, StationId};

/// Position of a node in the arena (depth-first pre-order, root is 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub usize);

/// Read-only capabilities shared by fuses and stations.
pub trait CapacityNode {
    /// Short human-readable name, `f<id>` for fuses and `i<id>` for stations.
    fn label(&self) -> String;

    /// Current limit (A) on `phase`.
    fn limit(&self, phase: Phase) -> f64;

    fn is_phase_connected(&self, phase: Phase) -> bool;

    fn limits(&self) -> PhaseCurrents {
        PhaseCurrents::new(
            self.limit(Phase::One),
            self.limit(Phase::Two),
            self.limit(Phase::Three),
        )
    }
}

impl CapacityNode for ChargingStation {
    fn label(&self) -> String {
        format!("i{}", self.id)
    }

    fn limit(&self, phase: Phase) -> f64 {
        self.limits[phase]
    }

    fn is_phase_connected(&self, phase: Phase) -> bool {
        self.connected[phase.index()]
    }
}

/// A fuse owning its children by value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fuse {
    pub id: u32,
    pub limits: PhaseCurrents,
    pub connected: [bool; 3],
    pub children: Vec<FuseTreeNode>,
}

/// A child of a fuse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FuseTreeNode {
    Fuse(Fuse),
    Station(ChargingStation),
}

impl Fuse {
    /// A fully connected fuse with the same limit on every phase.
    pub fn new(id: u32, limit_per_phase: f64) -> Self {
        Self {
            id,
            limits: PhaseCurrents::uniform(limit_per_phase),
            connected: [true; 3],
            children: Vec::new(),
        }
    }

    pub fn add_child(mut self, child: impl Into<FuseTreeNode>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn with_connected(mut self, connected: [bool; 3]) -> Self {
        self.connected = connected;
        self
    }
}

impl CapacityNode for Fuse {
    fn label(&self) -> String {
        format!("f{}", self.id)
    }

    fn limit(&self, phase: Phase) -> f64 {
        self.limits[phase]
    }

    fn is_phase_connected(&self, phase: Phase) -> bool {
        self.connected[phase.index()]
    }
}

impl From<Fuse> for FuseTreeNode {
    fn from(fuse: Fuse) -> Self {
        FuseTreeNode::Fuse(fuse)
    }
}

impl From<ChargingStation> for FuseTreeNode {
    fn from(station: ChargingStation) -> Self {
        FuseTreeNode::Station(station)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Payload {
    Fuse {
        id: u32,
        limits: PhaseCurrents,
        connected: [bool; 3],
    },
    Station(ChargingStation),
}

/// A node in the flattened tree.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    payload: Payload,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    stations: Vec<StationId>,
}

impl TreeNode {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn station(&self) -> Option<&ChargingStation> {
        match &self.payload {
            Payload::Station(station) => Some(station),
            Payload::Fuse { .. } => None,
        }
    }

    pub fn is_station(&self) -> bool {
        matches!(self.payload, Payload::Station(_))
    }

    /// Stations in this node's subtree, in pre-order.
    pub fn stations_below(&self) -> &[StationId] {
        &self.stations
    }
}

impl CapacityNode for TreeNode {
    fn label(&self) -> String {
        match &self.payload {
            Payload::Fuse { id, .. } => format!("f{id}"),
            Payload::Station(station) => station.label(),
        }
    }

    fn limit(&self, phase: Phase) -> f64 {
        match &self.payload {
            Payload::Fuse { limits, .. } => limits[phase],
            Payload::Station(station) => station.limit(phase),
        }
    }

    fn is_phase_connected(&self, phase: Phase) -> bool {
        match &self.payload {
            Payload::Fuse { connected, .. } => connected[phase.index()],
            Payload::Station(station) => station.is_phase_connected(phase),
        }
    }
}

/// Flattened capacity network with cached station and traversal lists.
///
/// # Examples
///
/// ```
/// use ev_charge_sim::model::fuse_tree::{Fuse, FuseTree};
/// use ev_charge_sim::model::station::ChargingStation;
///
/// let root = Fuse::new(0, 50.0)
///     .add_child(ChargingStation::new(0, 32.0))
///     .add_child(ChargingStation::new(1, 32.0));
/// let tree = FuseTree::new(root).ok();
/// assert_eq!(tree.map(|t| t.station_count()), Some(2));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct FuseTree {
    nodes: Vec<TreeNode>,
    stations: Vec<NodeId>,
    post_order: Vec<NodeId>,
    station_index: HashMap<StationId, NodeId>,
}

impl FuseTree {
    /// Flattens `root` and checks its configuration.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::DuplicateStation`] if a station id appears twice,
    /// or [`TreeError::DisconnectedPhase`] if a disconnected phase carries a
    /// non-zero limit.
    pub fn new(root: Fuse) -> Result<Self, TreeError> {
        let mut tree = Self {
            nodes: Vec::new(),
            stations: Vec::new(),
            post_order: Vec::new(),
            station_index: HashMap::new(),
        };
        tree.flatten(FuseTreeNode::Fuse(root), None)?;
        Ok(tree)
    }

    /// A single root fuse of `root_limit` feeding `station_count` stations of
    /// `station_limit`. Station `i` is wired with its phases rotated by `i`.
    pub fn simple(root_limit: f64, station_count: usize, station_limit: f64) -> Result<Self, TreeError> {
        let root = (0..station_count).fold(Fuse::new(0, root_limit), |fuse, i| {
            fuse.add_child(
                ChargingStation::new(i as StationId, station_limit)
                    .with_rotation(PhaseRotation::rotated(i)),
            )
        });
        Self::new(root)
    }

    fn flatten(&mut self, node: FuseTreeNode, parent: Option<NodeId>) -> Result<NodeId, TreeError> {
        let id = NodeId(self.nodes.len());
        let (payload, children) = match node {
            FuseTreeNode::Fuse(fuse) => {
                for (phase, limit) in fuse.limits.iter() {
                    if !fuse.is_phase_connected(phase) && limit != 0.0 {
                        return Err(TreeError::DisconnectedPhase {
                            node: fuse.label(),
                            phase: phase.number(),
                            limit,
                        });
                    }
                }
                let payload = Payload::Fuse {
                    id: fuse.id,
                    limits: fuse.limits,
                    connected: fuse.connected,
                };
                (payload, fuse.children)
            }
            FuseTreeNode::Station(station) => {
                station.sanity_check()?;
                if self.station_index.insert(station.id, id).is_some() {
                    return Err(TreeError::DuplicateStation(station.id));
                }
                self.stations.push(id);
                (Payload::Station(station), Vec::new())
            }
        };

        let own_station = match &payload {
            Payload::Station(station) => vec![station.id],
            Payload::Fuse { .. } => Vec::new(),
        };
        self.nodes.push(TreeNode {
            payload,
            parent,
            children: Vec::new(),
            stations: own_station,
        });

        for child in children {
            let child_id = self.flatten(child, Some(id))?;
            let below = self.nodes[child_id.0].stations.clone();
            let entry = &mut self.nodes[id.0];
            entry.children.push(child_id);
            entry.stations.extend(below);
        }
        self.post_order.push(id);
        Ok(id)
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> Option<&TreeNode> {
        self.nodes.get(id.0)
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(TreeNode::parent)
    }

    /// Strict ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |&n| self.parent(n))
    }

    /// Depth-first pre-order traversal from the root.
    pub fn nodes(&self) -> Dfs<'_> {
        Dfs {
            tree: self,
            stack: if self.nodes.is_empty() {
                Vec::new()
            } else {
                vec![self.root()]
            },
        }
    }

    /// Node ids in post-order: children before their parent.
    pub fn post_order(&self) -> &[NodeId] {
        &self.post_order
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    /// All stations in pre-order.
    pub fn stations(&self) -> impl Iterator<Item = &ChargingStation> + '_ {
        self.stations
            .iter()
            .filter_map(|&n| self.node(n).and_then(TreeNode::station))
    }

    pub fn station(&self, id: StationId) -> Option<&ChargingStation> {
        self.station_node(id)
            .and_then(|n| self.node(n))
            .and_then(TreeNode::station)
    }

    pub fn station_mut(&mut self, id: StationId) -> Option<&mut ChargingStation> {
        let node = self.station_node(id)?;
        match &mut self.nodes.get_mut(node.0)?.payload {
            Payload::Station(station) => Some(station),
            Payload::Fuse { .. } => None,
        }
    }

    pub fn station_node(&self, id: StationId) -> Option<NodeId> {
        self.station_index.get(&id).copied()
    }

    /// Stations beneath `node` (the station itself for a leaf).
    pub fn stations_under(&self, node: NodeId) -> &[StationId] {
        self.node(node).map(TreeNode::stations_below).unwrap_or(&[])
    }

    pub fn label(&self, node: NodeId) -> String {
        self.node(node)
            .map(CapacityNode::label)
            .unwrap_or_else(|| format!("?{}", node.0))
    }

    /// Whether grid phase `phase` reaches station `id`: the station must be
    /// connected on the station phase it maps to, and every fuse above it on
    /// the grid phase.
    pub fn is_grid_phase_connected(&self, id: StationId, phase: Phase) -> bool {
        let Some(node) = self.station_node(id) else {
            return false;
        };
        let Some(station) = self.station(id) else {
            return false;
        };
        station.is_phase_connected(station.rotation.to_station(phase))
            && self.ancestors(node).all(|a| {
                self.node(a)
                    .map(|n| n.is_phase_connected(phase))
                    .unwrap_or(false)
            })
    }

    /// Adjusts the limits of a node. Topology stays fixed.
    ///
    /// # Errors
    ///
    /// Returns [`TreeError::UnknownNode`] if `node` is not in the tree.
    pub fn set_limits(&mut self, node: NodeId, limits: PhaseCurrents) -> Result<(), TreeError> {
        let entry = self
            .nodes
            .get_mut(node.0)
            .ok_or(TreeError::UnknownNode(node))?;
        match &mut entry.payload {
            Payload::Fuse { limits: l, .. } => *l = limits,
            Payload::Station(station) => station.limits = limits,
        }
        Ok(())
    }

    /// Fails unless the tree holds exactly `expected` stations.
    pub fn check_station_count(&self, expected: usize) -> Result<(), TreeError> {
        if self.stations.len() != expected {
            return Err(TreeError::StationCount {
                got: self.stations.len(),
                expected,
            });
        }
        Ok(())
    }

    /// Rebuilds the owned fuse rooted at `node`. `None` for stations.
    pub fn to_fuse(&self, node: NodeId) -> Option<Fuse> {
        let entry = self.node(node)?;
        let Payload::Fuse {
            id,
            limits,
            connected,
        } = &entry.payload
        else {
            return None;
        };
        let children = entry
            .children
            .iter()
            .filter_map(|&c| {
                let child = self.node(c)?;
                match &child.payload {
                    Payload::Station(station) => Some(FuseTreeNode::Station(station.clone())),
                    Payload::Fuse { .. } => self.to_fuse(c).map(FuseTreeNode::Fuse),
                }
            })
            .collect();
        Some(Fuse {
            id: *id,
            limits: *limits,
            connected: *connected,
            children,
        })
    }

    /// A new tree rooted at fuse `node`. `None` for stations or unknown ids.
    pub fn subtree(&self, node: NodeId) -> Option<FuseTree> {
        self.to_fuse(node).and_then(|fuse| FuseTree::new(fuse).ok())
    }
}

impl fmt::Display for FuseTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (id, node) in self.nodes() {
            let depth = self.ancestors(id).count();
            writeln!(f, "{:indent$}{} {}", "", node.label(), node.limits(), indent = depth * 2)?;
        }
        Ok(())
    }
}

/// Depth-first pre-order iterator over a [`FuseTree`].
pub struct Dfs<'a> {
    tree: &'a FuseTree,
    stack: Vec<NodeId>,
}

impl<'a> Iterator for Dfs<'a> {
    type Item = (NodeId, &'a TreeNode);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.stack.pop()?;
        let node = self.tree.node(id)?;
        self.stack.extend(node.children.iter().rev());
        Some((id, node))
    }
}
