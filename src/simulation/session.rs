//! Session lifecycle: Uninitialized → Ready → Closed.
//!
//! The controller owns all per-session state and dispatches each inbound
//! message to it. An init while Ready discards the old session and builds a
//! fresh one. Close is terminal.

use log::{debug, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::time::{Duration, Instant};
use thiserror::Error;

use super::cache::max_cache_age;
use super::orchestrator::ActiveSession;
use super::propagation::{AntennaArray, EngineConfig, PathParameters, PropagationError, SceneProvider};
use super::registry::NodeRegistry;
use super::signal_calculations::{CoherenceTimeError, coherence_time};
use super::types::{Mode, NodeId, RadioParameters, SessionConfig, SimTime};
use crate::control::messages::{ChannelStateResponse, Inbound, Outbound, SimInit};

/// Speed floor when sizing the session coherence time, so an all-static
/// scenario still gets a finite value.
const MIN_NOMINAL_SPEED: f64 = 1e-4;

const NANOS_PER_MILLI: SimTime = 1_000_000;

/// Errors that end a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("channel state requested before sim_init")]
    NotInitialized,
    #[error("session already closed")]
    Closed,
    #[error("unknown node id {0}")]
    UnknownNode(NodeId),
    #[error("node {0} requested a channel to itself")]
    SelfLink(NodeId),
    #[error("unsupported mode {0}, expected 1, 2 or 3")]
    InvalidMode(u8),
    #[error("invalid session configuration: {0}")]
    Configuration(String),
    #[error("coherence time out of domain: {0}")]
    Domain(#[from] CoherenceTimeError),
    #[error("no propagation path from node {tx} to node {rx}")]
    NoPropagationPath { tx: NodeId, rx: NodeId },
    #[error(transparent)]
    Propagation(#[from] PropagationError),
}

/// Server-side defaults applied to every session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionDefaults {
    /// Parallelism degree used when the init message carries none.
    pub sub_mode: u32,
    pub max_depth: u32,
    pub diffraction: bool,
    pub estimate_csi: bool,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            sub_mode: 0,
            max_depth: 3,
            diffraction: false,
            estimate_csi: true,
        }
    }
}

enum SessionState {
    Uninitialized,
    Ready(Box<ActiveSession>),
    Closed,
}

/// Processing-time statistics of channel-state requests.
#[derive(Debug, Default, Clone, Copy)]
struct RequestStats {
    count: u64,
    total: Duration,
}

impl RequestStats {
    fn record(&mut self, elapsed: Duration) {
        self.count += 1;
        self.total += elapsed;
    }

    fn mean(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total / self.count as u32
        }
    }
}

pub struct SessionController<'a> {
    provider: &'a dyn SceneProvider,
    defaults: SessionDefaults,
    state: SessionState,
    stats: RequestStats,
}

impl<'a> SessionController<'a> {
    pub fn new(provider: &'a dyn SceneProvider, defaults: SessionDefaults) -> Self {
        Self {
            provider,
            defaults,
            state: SessionState::Uninitialized,
            stats: RequestStats::default(),
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, SessionState::Closed)
    }

    /// The initialized session, if any.
    #[cfg(test)]
    pub fn active(&self) -> Option<&ActiveSession> {
        match &self.state {
            SessionState::Ready(session) => Some(session.as_ref()),
            _ => None,
        }
    }

    /// Process one inbound message and produce its reply.
    pub fn handle(&mut self, message: Inbound) -> Result<Outbound, SessionError> {
        match message {
            Inbound::SimInit(init) => {
                if self.is_closed() {
                    return Err(SessionError::Closed);
                }
                if matches!(self.state, SessionState::Ready(_)) {
                    info!("Re-initialization requested, discarding the current session");
                }
                // A failed init leaves no usable session behind
                self.state = SessionState::Uninitialized;
                let session = self.initialize(&init)?;
                self.state = SessionState::Ready(Box::new(session));
                self.stats = RequestStats::default();
                Ok(Outbound::SimAck)
            }
            Inbound::ChannelStateRequest(request) => {
                let session = match &mut self.state {
                    SessionState::Ready(session) => session,
                    SessionState::Uninitialized => return Err(SessionError::NotInitialized),
                    SessionState::Closed => return Err(SessionError::Closed),
                };
                let started = Instant::now();
                let steps = session.calculate_channel_state(&request)?;
                let elapsed = started.elapsed();
                self.stats.record(elapsed);
                debug!(
                    "Channel state request #{} (tx {}, rx {}, t {} ns) took {:?}, mean {:?}",
                    self.stats.count,
                    request.tx_node,
                    request.rx_node,
                    request.time,
                    elapsed,
                    self.stats.mean()
                );
                Ok(Outbound::ChannelStateResponse(ChannelStateResponse::from(steps)))
            }
            Inbound::SimClose => {
                if self.is_closed() {
                    return Err(SessionError::Closed);
                }
                if let SessionState::Ready(session) = &self.state {
                    let config = session.config();
                    info!(
                        "Session closed: mode {}, sub_mode {}, {} channel requests, mean processing time {:?}",
                        config.mode,
                        config.sub_mode,
                        self.stats.count,
                        self.stats.mean()
                    );
                } else {
                    info!("Session closed before initialization");
                }
                self.state = SessionState::Closed;
                Ok(Outbound::SimAck)
            }
        }
    }

    fn initialize(&self, init: &SimInit) -> Result<ActiveSession, SessionError> {
        let requested_mode = Mode::try_from(init.mode).map_err(SessionError::InvalidMode)?;
        let radio = radio_parameters(init)?;

        let mut opened = self.provider.open(&init.scene)?;
        opened.engine.configure(&EngineConfig {
            carrier_frequency: radio.carrier_frequency,
            bandwidth: radio.bandwidth,
            fft_size: radio.fft_size,
            subcarrier_spacing: radio.subcarrier_spacing,
            tx_array: AntennaArray::isotropic(),
            rx_array: AntennaArray::isotropic(),
        })?;

        let rng = StdRng::seed_from_u64(init.seed);
        let registry = NodeRegistry::from_node_infos(&init.nodes).map_err(SessionError::Configuration)?;
        if registry.is_empty() {
            return Err(SessionError::Configuration("sim_init lists no nodes".to_string()));
        }
        let mode = registry.effective_mode(requested_mode);
        let sub_mode = init.sub_mode.unwrap_or(self.defaults.sub_mode);

        let speed = registry.max_nominal_speed().max(MIN_NOMINAL_SPEED);
        let mut tc = coherence_time(speed, radio.carrier_frequency)?;
        if init.min_coherence_time_ms > 0 {
            let cap = (init.min_coherence_time_ms as SimTime).saturating_mul(NANOS_PER_MILLI);
            tc = tc.min(cap);
        }
        let max_age = max_cache_age(registry.len(), sub_mode, tc);

        info!(
            "Session initialized: scene {}, mode {} (requested {}), sub_mode {}, {} nodes ({} mobile), fc {} MHz, Tc {} ns, max cache age {} ns, seed {}",
            init.scene,
            mode,
            requested_mode,
            sub_mode,
            registry.len(),
            registry.mobile_count(),
            init.frequency,
            tc,
            max_age,
            init.seed
        );

        let config = SessionConfig {
            mode,
            sub_mode,
            radio,
            coherence_time: tc,
            max_cache_age: max_age,
            estimate_csi: self.defaults.estimate_csi,
        };
        Ok(ActiveSession::new(
            config,
            registry,
            opened.engine,
            opened.geometry,
            rng,
            PathParameters::full(self.defaults.max_depth, self.defaults.diffraction),
        ))
    }
}

/// Radio parameters of an init message converted to SI units.
fn radio_parameters(init: &SimInit) -> Result<RadioParameters, SessionError> {
    if !(init.frequency.is_finite() && init.frequency > 0.0) {
        return Err(SessionError::Configuration(format!("carrier frequency {} MHz must be positive", init.frequency)));
    }
    if !(init.channel_bw.is_finite() && init.channel_bw > 0.0) {
        return Err(SessionError::Configuration(format!("channel bandwidth {} MHz must be positive", init.channel_bw)));
    }
    if init.fft_size == 0 {
        return Err(SessionError::Configuration("FFT size must be positive".to_string()));
    }
    if !(init.subcarrier_spacing.is_finite() && init.subcarrier_spacing > 0.0) {
        return Err(SessionError::Configuration(format!(
            "subcarrier spacing {} Hz must be positive",
            init.subcarrier_spacing
        )));
    }
    Ok(RadioParameters {
        carrier_frequency: init.frequency * 1e6,
        bandwidth: init.channel_bw * 1e6,
        fft_size: init.fft_size,
        subcarrier_spacing: init.subcarrier_spacing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::messages::{ChannelStateRequest, NodeInfo, NodeModel};
    use crate::simulation::geometry::SceneGeometry;
    use crate::simulation::propagation::{GeometricEngine, OpenedScene};
    use crate::simulation::types::{LegMode, RandomVariable, Vec3};

    struct FreeSpace;

    impl SceneProvider for FreeSpace {
        fn open(&self, _scene_id: &str) -> Result<OpenedScene, PropagationError> {
            Ok(OpenedScene {
                engine: Box::new(GeometricEngine::new(SceneGeometry::default(), 0.7)),
                geometry: Box::new(SceneGeometry::default()),
            })
        }
    }

    fn init(mode: u8, speed: RandomVariable) -> SimInit {
        SimInit {
            scene: "free_space.json".to_string(),
            mode,
            sub_mode: Some(4),
            frequency: 5210.0,
            channel_bw: 20.0,
            fft_size: 64,
            subcarrier_spacing: 312_500.0,
            min_coherence_time_ms: 100_000,
            seed: 1,
            nodes: vec![
                NodeInfo {
                    id: 0,
                    model: NodeModel::ConstantPositionModel {
                        position: Vec3::new(0.0, 0.0, 1.5),
                    },
                },
                NodeInfo {
                    id: 1,
                    model: NodeModel::RandomWalkModel {
                        position: Vec3::new(10.0, 0.0, 1.5),
                        mode: LegMode::Time(1_000_000_000),
                        speed,
                        direction: RandomVariable::Uniform { min: 0.0, max: 6.283 },
                    },
                },
                NodeInfo {
                    id: 2,
                    model: NodeModel::ConstantPositionModel {
                        position: Vec3::new(0.0, 20.0, 1.5),
                    },
                },
            ],
        }
    }

    fn request(time: SimTime) -> Inbound {
        Inbound::ChannelStateRequest(ChannelStateRequest {
            tx_node: 0,
            rx_node: 1,
            time,
        })
    }

    fn walking() -> RandomVariable {
        RandomVariable::Constant { value: 1.0 }
    }

    #[test]
    fn request_before_init_is_rejected() {
        let mut controller = SessionController::new(&FreeSpace, SessionDefaults::default());
        assert!(matches!(controller.handle(request(0)), Err(SessionError::NotInitialized)));
    }

    #[test]
    fn full_lifecycle() {
        let mut controller = SessionController::new(&FreeSpace, SessionDefaults::default());
        assert_eq!(controller.handle(Inbound::SimInit(init(3, walking()))).unwrap(), Outbound::SimAck);

        let Outbound::ChannelStateResponse(response) = controller.handle(request(1_000)).unwrap() else {
            panic!("expected a channel state response");
        };
        // Mode 3, sub_mode 4, two receivers → two steps
        assert_eq!(response.csi.len(), 2);
        assert_eq!(response.csi[0].rx_nodes.len(), 2);
        assert_eq!(response.csi[0].rx_nodes[0].frequencies.len(), 64);

        assert_eq!(controller.handle(Inbound::SimClose).unwrap(), Outbound::SimAck);
        assert!(controller.is_closed());
        assert!(matches!(controller.handle(request(2_000)), Err(SessionError::Closed)));
        assert!(matches!(controller.handle(Inbound::SimInit(init(1, walking()))), Err(SessionError::Closed)));
        assert!(matches!(controller.handle(Inbound::SimClose), Err(SessionError::Closed)));
    }

    #[test]
    fn invalid_mode_is_rejected() {
        let mut controller = SessionController::new(&FreeSpace, SessionDefaults::default());
        assert!(matches!(
            controller.handle(Inbound::SimInit(init(4, walking()))),
            Err(SessionError::InvalidMode(4))
        ));
        assert!(controller.active().is_none());
    }

    #[test]
    fn speed_outside_coherence_domain_is_fatal() {
        let mut controller = SessionController::new(&FreeSpace, SessionDefaults::default());
        let result = controller.handle(Inbound::SimInit(init(1, RandomVariable::Constant { value: 150.0 })));
        assert!(matches!(result, Err(SessionError::Domain(CoherenceTimeError::SpeedOutOfRange(_)))));
    }

    #[test]
    fn variable_speed_downgrades_to_point_to_point() {
        let mut controller = SessionController::new(&FreeSpace, SessionDefaults::default());
        controller
            .handle(Inbound::SimInit(init(3, RandomVariable::Uniform { min: 0.5, max: 1.5 })))
            .unwrap();
        assert_eq!(controller.active().unwrap().config().mode, Mode::PointToPoint);
    }

    #[test]
    fn coherence_time_is_capped_and_cache_age_derived() {
        let mut controller = SessionController::new(&FreeSpace, SessionDefaults::default());
        let mut message = init(2, walking());
        message.min_coherence_time_ms = 10;
        controller.handle(Inbound::SimInit(message)).unwrap();
        let config = controller.active().unwrap().config();
        // Tc(1 m/s, 5.21 GHz) ≈ 24.3 ms is capped at 10 ms
        assert_eq!(config.coherence_time, 10_000_000);
        assert_eq!(config.max_cache_age, 1_000_000_000);

        controller.handle(Inbound::SimInit(init(2, walking()))).unwrap();
        assert_eq!(controller.active().unwrap().config().coherence_time, 24_340_156);
    }

    #[test]
    fn reinit_starts_a_fresh_session() {
        let mut controller = SessionController::new(&FreeSpace, SessionDefaults::default());
        controller.handle(Inbound::SimInit(init(1, walking()))).unwrap();
        controller.handle(request(1_000)).unwrap();
        assert_eq!(controller.active().unwrap().cache().len(), 2);

        controller.handle(Inbound::SimInit(init(1, walking()))).unwrap();
        assert!(controller.active().unwrap().cache().is_empty());
    }

    #[test]
    fn sub_mode_falls_back_to_server_default() {
        let defaults = SessionDefaults {
            sub_mode: 6,
            ..SessionDefaults::default()
        };
        let mut controller = SessionController::new(&FreeSpace, defaults);
        let mut message = init(1, walking());
        message.sub_mode = None;
        controller.handle(Inbound::SimInit(message)).unwrap();
        assert_eq!(controller.active().unwrap().config().sub_mode, 6);
    }
}
