//! Node registry: per-node mobility models, built once per session.
//!
//! Nodes keep the order in which the init message listed them; that order
//! defines the receiver order of point-to-multipoint responses.

use std::collections::HashMap;

use crate::control::messages::{NodeInfo, NodeModel};

use super::types::{LegMode, MobilityKind, Mode, NodeId, NodeMobilityModel};

#[derive(Debug, Clone, Default)]
pub struct NodeRegistry {
    nodes: Vec<NodeMobilityModel>,
    index: HashMap<NodeId, usize>,
}

impl NodeRegistry {
    /// Build the registry from the node list of an init message.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid node: duplicate id, invalid
    /// random variable parameters, or a non-positive leg length.
    pub fn from_node_infos(infos: &[NodeInfo]) -> Result<Self, String> {
        let mut registry = NodeRegistry::default();
        for info in infos {
            let model = match &info.model {
                NodeModel::ConstantPositionModel { position } => NodeMobilityModel::constant(info.id, *position),
                NodeModel::RandomWalkModel {
                    position,
                    mode,
                    speed,
                    direction,
                } => {
                    speed.validate().map_err(|e| format!("Node {} speed: {}", info.id, e))?;
                    direction.validate().map_err(|e| format!("Node {} direction: {}", info.id, e))?;
                    match *mode {
                        LegMode::Time(ns) if ns <= 0 => return Err(format!("Node {} leg time {} ns must be positive", info.id, ns)),
                        LegMode::Distance(m) if !(m.is_finite() && m > 0.0) => {
                            return Err(format!("Node {} leg distance {} m must be positive", info.id, m));
                        }
                        _ => {}
                    }
                    NodeMobilityModel::random_walk(info.id, *position, *mode, *speed, *direction)
                }
            };
            registry.insert(model)?;
        }
        Ok(registry)
    }

    pub fn insert(&mut self, model: NodeMobilityModel) -> Result<(), String> {
        if self.index.contains_key(&model.id) {
            return Err(format!("Duplicate node id found: {}", model.id));
        }
        self.index.insert(model.id, self.nodes.len());
        self.nodes.push(model);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn get(&self, id: NodeId) -> Option<&NodeMobilityModel> {
        self.index.get(&id).map(|&i| &self.nodes[i])
    }

    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut NodeMobilityModel> {
        self.index.get(&id).map(|&i| &mut self.nodes[i])
    }

    /// Node ids in registration order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.iter().map(|n| n.id)
    }

    /// Highest nominal node speed, used for the session coherence time.
    pub fn max_nominal_speed(&self) -> f64 {
        self.nodes.iter().map(NodeMobilityModel::nominal_speed).fold(0.0, f64::max)
    }

    /// Modes 2 and 3 assume every node moves at a constant speed; any other
    /// speed model falls back to point-to-point.
    pub fn effective_mode(&self, requested: Mode) -> Mode {
        if requested == Mode::PointToPoint {
            return requested;
        }
        match self.nodes.iter().find(|n| !n.has_constant_speed()) {
            Some(node) => {
                log::warn!(
                    "Node {} has a non-constant speed model; only constant speed is supported in mode {}, switching to mode 1",
                    node.id,
                    requested
                );
                Mode::PointToPoint
            }
            None => requested,
        }
    }

    /// Number of random-walk nodes, for the session summary.
    pub fn mobile_count(&self) -> usize {
        self.nodes.iter().filter(|n| matches!(n.kind, MobilityKind::RandomWalk(_))).count()
    }
}
