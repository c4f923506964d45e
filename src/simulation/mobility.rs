//! Node mobility: advances a node's position and velocity to a requested
//! simulation time.
//!
//! Random-walk nodes move in straight legs. At the start of each leg a speed
//! and a direction are drawn from the node's distributions; the leg lasts a
//! fixed time or a fixed distance. Within a leg the node moves ballistically
//! and bounces off static geometry, keeping its speed.

use log::{debug, warn};
use rand::Rng;

use super::geometry::{StaticGeometry, reflect_horizontal};
use super::types::{LegMode, MobilityKind, NANOS_PER_SECOND, NodeId, NodeMobilityModel, RandomWalk, SimTime, Vec3};

/// A node stops this far in front of a wall before it turns.
const WALL_MARGIN: f64 = 0.01;

/// Consecutive reflections without forward progress after which a node is
/// considered wedged and holds position for the rest of the walk.
const MAX_STALLED_BOUNCES: u32 = 8;

/// Position and velocity of `node` at time `t`.
///
/// Random-walk state is advanced in place. A request for a time earlier than
/// the node's last update cannot be served and returns the last known state.
pub fn resolve<R: Rng>(node: &mut NodeMobilityModel, t: SimTime, rng: &mut R, geometry: &dyn StaticGeometry) -> (Vec3, Vec3) {
    let MobilityKind::RandomWalk(state) = &node.kind else {
        return (node.position, Vec3::ZERO);
    };
    if t < state.last_update {
        warn!(
            "Temporal ordering anomaly for node {}: requested {} ns, last update at {} ns; returning last known state",
            node.id, t, state.last_update
        );
        return (node.position, node.velocity);
    }

    loop {
        let MobilityKind::RandomWalk(state) = &mut node.kind else {
            return (node.position, Vec3::ZERO);
        };
        if state.leg_remaining == 0 {
            match start_leg(state, rng) {
                Some(v) => node.velocity = v,
                None => {
                    debug!("Node {} drew speed 0 on a distance leg, holding position from now on", node.id);
                    node.kind = MobilityKind::ConstantPosition;
                    node.velocity = Vec3::ZERO;
                    return (node.position, Vec3::ZERO);
                }
            }
        }

        let leg_end = state.last_update.saturating_add(state.leg_remaining);
        let leg_finished = leg_end < t;
        let duration = if leg_finished { state.leg_remaining } else { t - state.last_update };
        state.leg_remaining -= duration;
        walk(node, duration, geometry);
        if !leg_finished {
            return (node.position, node.velocity);
        }
    }
}

/// Move `node` for `duration` ns along its current velocity, reflecting off
/// obstacles. No new leg is drawn.
pub fn walk(node: &mut NodeMobilityModel, duration: SimTime, geometry: &dyn StaticGeometry) {
    let NodeMobilityModel {
        id,
        kind,
        position,
        velocity,
    } = node;
    if let MobilityKind::RandomWalk(state) = kind {
        advance(*id, position, velocity, duration, geometry);
        state.last_update = state.last_update.saturating_add(duration);
    }
}

/// Draw speed and direction for a new leg and set its length.
///
/// Returns the new velocity, or `None` when a distance leg drew speed 0 and
/// the node can never finish it.
fn start_leg<R: Rng>(state: &mut RandomWalk, rng: &mut R) -> Option<Vec3> {
    let speed = state.speed.sample(rng);
    let direction = (state.direction.sample(rng) * 1000.0).round() / 1000.0;

    state.leg_remaining = match state.leg {
        LegMode::Time(ns) => ns,
        LegMode::Distance(metres) => {
            if speed == 0.0 {
                return None;
            }
            ((metres / speed).abs() * NANOS_PER_SECOND).round().max(1.0) as SimTime
        }
    };

    Some(Vec3::new(direction.cos() * speed, direction.sin() * speed, 0.0))
}

fn advance(id: NodeId, position: &mut Vec3, velocity: &mut Vec3, duration: SimTime, geometry: &dyn StaticGeometry) {
    let speed = velocity.norm();
    if duration <= 0 || speed == 0.0 {
        return;
    }

    let mut remaining_s = duration as f64 / NANOS_PER_SECOND;
    let mut distance = speed * remaining_s;
    let mut stalled = 0;

    while distance > 0.0 {
        let Some(direction) = velocity.normalized() else {
            return;
        };
        match geometry.intersect(*position, direction, distance) {
            Some(hit) => {
                let step = (hit.distance - WALL_MARGIN).max(0.0);
                if step == 0.0 {
                    stalled += 1;
                    if stalled == MAX_STALLED_BOUNCES {
                        warn!("Node {} is wedged between obstacles, holding position for the rest of the walk", id);
                        return;
                    }
                } else {
                    stalled = 0;
                }
                *position += direction * step;
                *velocity = reflect_horizontal(direction, hit.normal) * speed;
                distance -= step;
                remaining_s -= step / speed;
            }
            None => {
                *position += *velocity * remaining_s;
                return;
            }
        }
    }
}
