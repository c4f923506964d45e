//! Type definitions for the channel-state simulation.
//!
//! Contains the data structures shared across the session:
//! - Vector math for positions and velocities
//! - Mobility model configuration and per-node runtime state
//! - Session configuration derived at init
//! - Per-link results assembled for a channel-state response

use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Neg, Sub};

/// Simulation time and durations in nanoseconds.
pub type SimTime = i64;

/// Node identifier as assigned by the network simulator.
pub type NodeId = u32;

/// Nanoseconds per second.
pub const NANOS_PER_SECOND: f64 = 1e9;

/// Leg bound used for endpoints that never change direction (one hour).
pub const CONSTANT_POSITION_LEG_BOUND: SimTime = 3_600_000_000_000;

/// 3D vector in metres (positions) or metres per second (velocities).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, other: Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn norm(self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Unit vector in the same direction, or `None` for a zero-length vector.
    pub fn normalized(self) -> Option<Vec3> {
        let n = self.norm();
        if n > 0.0 && n.is_finite() { Some(self * (1.0 / n)) } else { None }
    }

    /// Projection onto the horizontal (z = 0) plane.
    pub fn horizontal(self) -> Vec3 {
        Vec3::new(self.x, self.y, 0.0)
    }

    pub fn distance(self, other: Vec3) -> f64 {
        (self - other).norm()
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Vec3) {
        *self = *self + rhs;
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Vec3;
    fn mul(self, rhs: f64) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

impl Neg for Vec3 {
    type Output = Vec3;
    fn neg(self) -> Vec3 {
        Vec3::new(-self.x, -self.y, -self.z)
    }
}

/// Operating mode negotiated at init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One tx/rx pair per engine call.
    PointToPoint,
    /// The transmitter against every other node in one engine call.
    PointToMultipoint,
    /// Same as `PointToMultipoint`, plus future time steps computed ahead.
    PointToMultipointLookahead,
}

impl Mode {
    pub fn as_u8(self) -> u8 {
        match self {
            Mode::PointToPoint => 1,
            Mode::PointToMultipoint => 2,
            Mode::PointToMultipointLookahead => 3,
        }
    }
}

impl TryFrom<u8> for Mode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Mode::PointToPoint),
            2 => Ok(Mode::PointToMultipoint),
            3 => Ok(Mode::PointToMultipointLookahead),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

/// Random variable used for speed (m/s) and direction (radians) draws.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RandomVariable {
    Uniform { min: f64, max: f64 },
    Constant { value: f64 },
    Normal { mean: f64, variance: f64 },
}

impl RandomVariable {
    pub fn sample<R: Rng>(&self, rng: &mut R) -> f64 {
        match *self {
            RandomVariable::Uniform { min, max } => rng.gen_range(min..=max),
            RandomVariable::Constant { value } => value,
            // Parameters are validated at init; fall back to the mean otherwise
            RandomVariable::Normal { mean, variance } => Normal::new(mean, variance.sqrt()).map(|n| n.sample(rng)).unwrap_or(mean),
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, RandomVariable::Constant { .. })
    }

    /// Speed used when sizing the session coherence time: the upper end of
    /// what the variable nominally produces.
    pub fn nominal_magnitude(&self) -> f64 {
        match *self {
            // Sized on the larger bound, not the lower one. A wide range such
            // as [0, 150] m/s can therefore push Tc out of domain at init.
            RandomVariable::Uniform { min, max } => min.abs().max(max.abs()),
            RandomVariable::Constant { value } => value.abs(),
            RandomVariable::Normal { mean, .. } => mean.abs(),
        }
    }

    /// Checks the parameters can be sampled from.
    pub fn validate(&self) -> Result<(), String> {
        match *self {
            RandomVariable::Uniform { min, max } => {
                if !min.is_finite() || !max.is_finite() || min > max {
                    return Err(format!("uniform bounds [{}, {}] are invalid", min, max));
                }
            }
            RandomVariable::Constant { value } => {
                if !value.is_finite() {
                    return Err(format!("constant value {} is not finite", value));
                }
            }
            RandomVariable::Normal { mean, variance } => {
                if !mean.is_finite() || !variance.is_finite() || variance < 0.0 {
                    return Err(format!("normal(mean={}, variance={}) is invalid", mean, variance));
                }
            }
        }
        Ok(())
    }
}

/// How long a random-walk leg lasts before a new speed/direction is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegMode {
    /// Fixed leg duration in nanoseconds.
    Time(SimTime),
    /// Fixed leg length in metres.
    Distance(f64),
}

/// Runtime state of a random-walk node.
#[derive(Debug, Clone, PartialEq)]
pub struct RandomWalk {
    pub leg: LegMode,
    pub speed: RandomVariable,
    pub direction: RandomVariable,
    /// Simulation time up to which position/velocity have been advanced.
    pub last_update: SimTime,
    /// Time left in the current leg; zero means a new leg starts on next advance.
    pub leg_remaining: SimTime,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MobilityKind {
    ConstantPosition,
    RandomWalk(RandomWalk),
}

/// Mobility configuration and current kinematic state of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeMobilityModel {
    pub id: NodeId,
    pub kind: MobilityKind,
    pub position: Vec3,
    pub velocity: Vec3,
}

impl NodeMobilityModel {
    pub fn constant(id: NodeId, position: Vec3) -> Self {
        Self {
            id,
            kind: MobilityKind::ConstantPosition,
            position,
            velocity: Vec3::ZERO,
        }
    }

    pub fn random_walk(id: NodeId, position: Vec3, leg: LegMode, speed: RandomVariable, direction: RandomVariable) -> Self {
        Self {
            id,
            kind: MobilityKind::RandomWalk(RandomWalk {
                leg,
                speed,
                direction,
                last_update: 0,
                leg_remaining: 0,
            }),
            position,
            velocity: Vec3::ZERO,
        }
    }

    #[cfg(test)]
    pub fn is_constant_position(&self) -> bool {
        matches!(self.kind, MobilityKind::ConstantPosition)
    }

    /// Whether the speed draw is deterministic (constant-position nodes count as constant speed 0).
    pub fn has_constant_speed(&self) -> bool {
        match &self.kind {
            MobilityKind::ConstantPosition => true,
            MobilityKind::RandomWalk(walk) => walk.speed.is_constant(),
        }
    }

    pub fn nominal_speed(&self) -> f64 {
        match &self.kind {
            MobilityKind::ConstantPosition => 0.0,
            MobilityKind::RandomWalk(walk) => walk.speed.nominal_magnitude(),
        }
    }

    /// Time until this node may change direction.
    pub fn leg_remaining(&self) -> SimTime {
        match &self.kind {
            MobilityKind::ConstantPosition => CONSTANT_POSITION_LEG_BOUND,
            MobilityKind::RandomWalk(walk) => walk.leg_remaining,
        }
    }
}

/// Radio parameters of the session, in SI units.
#[derive(Debug, Clone, PartialEq)]
pub struct RadioParameters {
    /// Carrier frequency in Hz.
    pub carrier_frequency: f64,
    /// Channel bandwidth in Hz.
    pub bandwidth: f64,
    pub fft_size: u32,
    /// Subcarrier spacing in Hz.
    pub subcarrier_spacing: f64,
}

/// Session configuration, fixed at init apart from the mode downgrade.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub mode: Mode,
    /// Parallelism degree: number of links computed per engine call in look-ahead mode.
    pub sub_mode: u32,
    pub radio: RadioParameters,
    pub coherence_time: SimTime,
    pub max_cache_age: SimTime,
    /// Whether per-subcarrier CSI is reported.
    pub estimate_csi: bool,
}

/// One look-ahead step of a channel-state response.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelStep {
    pub start_time: SimTime,
    pub end_time: SimTime,
    pub tx: NodeId,
    pub tx_position: Vec3,
    pub links: Vec<ChannelLinkResult>,
}

/// Channel state of a single tx→rx link at one look-ahead step.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelLinkResult {
    pub tx: NodeId,
    pub rx: NodeId,
    pub rx_position: Vec3,
    pub valid_from: SimTime,
    pub valid_until: SimTime,
    /// Propagation delay in nanoseconds.
    pub delay: SimTime,
    /// Wideband loss in dB.
    pub loss_db: f64,
    pub csi: Option<LinkCsi>,
}

/// Normalized channel frequency response over the subcarrier grid.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkCsi {
    /// Subcarrier offsets from the carrier in Hz.
    pub frequencies: Vec<i64>,
    pub real: Vec<f64>,
    pub imag: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn vec3_normalization_and_projection() {
        let v = Vec3::new(3.0, 4.0, 12.0);
        assert_eq!(v.norm(), 13.0);
        let h = v.horizontal().normalized().unwrap();
        assert!((h.x - 0.6).abs() < 1e-12 && (h.y - 0.8).abs() < 1e-12 && h.z == 0.0);
        assert!(Vec3::ZERO.normalized().is_none());
    }

    #[test]
    fn mode_conversion_rejects_unknown_values() {
        assert_eq!(Mode::try_from(3), Ok(Mode::PointToMultipointLookahead));
        assert_eq!(Mode::try_from(0), Err(0));
        assert_eq!(Mode::try_from(4), Err(4));
    }

    #[test]
    fn random_variables_sample_within_their_support() {
        let mut rng = StdRng::seed_from_u64(7);
        let uniform = RandomVariable::Uniform { min: 1.0, max: 2.0 };
        for _ in 0..100 {
            let v = uniform.sample(&mut rng);
            assert!((1.0..=2.0).contains(&v));
        }
        assert_eq!(RandomVariable::Constant { value: 1.5 }.sample(&mut rng), 1.5);
        let degenerate = RandomVariable::Normal { mean: 4.0, variance: 0.0 };
        assert_eq!(degenerate.sample(&mut rng), 4.0);
    }

    #[test]
    fn nominal_magnitude_takes_the_larger_uniform_bound() {
        assert_eq!(RandomVariable::Uniform { min: 0.0, max: 150.0 }.nominal_magnitude(), 150.0);
        assert_eq!(RandomVariable::Uniform { min: -4.0, max: 2.0 }.nominal_magnitude(), 4.0);
        assert_eq!(RandomVariable::Normal { mean: -3.0, variance: 1.0 }.nominal_magnitude(), 3.0);
    }

    #[test]
    fn random_variable_validation() {
        assert!(RandomVariable::Uniform { min: 2.0, max: 1.0 }.validate().is_err());
        assert!(RandomVariable::Normal { mean: 0.0, variance: -1.0 }.validate().is_err());
        assert!(RandomVariable::Uniform { min: 1.0, max: 1.0 }.validate().is_ok());
    }

    #[test]
    fn constant_position_leg_bound_is_one_hour() {
        let node = NodeMobilityModel::constant(1, Vec3::ZERO);
        assert_eq!(node.leg_remaining(), 3_600 * 1_000_000_000);
        assert!(node.has_constant_speed());
    }
}
