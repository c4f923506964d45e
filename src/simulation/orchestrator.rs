//! Look-ahead channel-state computation for one request.
//!
//! A request names a transmitter, a receiver that must be covered, and a
//! simulation time. Depending on the session mode the orchestrator computes
//! the link to that receiver only, to every other node, or to every other
//! node for several future coherence intervals. All links of a request are
//! traced by a single engine call.

use log::debug;
use rand::rngs::StdRng;

use super::cache::{CacheEntry, PositionVelocityCache};
use super::geometry::StaticGeometry;
use super::mobility;
use super::propagation::{Entity, EntityRole, PathParameters, PropagationEngine};
use super::registry::NodeRegistry;
use super::session::SessionError;
use super::signal_calculations::{
    link_coherence_time, propagation_delay_ns, subcarrier_frequencies, subcarrier_grid, to_frequency_response, wideband_loss_db,
};
use super::types::{ChannelLinkResult, ChannelStep, LinkCsi, MobilityKind, Mode, NodeId, SessionConfig, SimTime, Vec3};
use crate::control::messages::ChannelStateRequest;

/// Node state resolved for one look-ahead step.
#[derive(Debug, Clone, Copy)]
struct Placement {
    id: NodeId,
    position: Vec3,
    velocity: Vec3,
}

/// All state of an initialized session.
pub struct ActiveSession {
    config: SessionConfig,
    registry: NodeRegistry,
    cache: PositionVelocityCache,
    engine: Box<dyn PropagationEngine>,
    geometry: Box<dyn StaticGeometry>,
    rng: StdRng,
    path_params: PathParameters,
    /// Entity names placed by the previous request.
    placed: Vec<String>,
    frequencies: Vec<f64>,
    grid: Vec<i64>,
}

impl ActiveSession {
    pub fn new(
        config: SessionConfig,
        registry: NodeRegistry,
        engine: Box<dyn PropagationEngine>,
        geometry: Box<dyn StaticGeometry>,
        rng: StdRng,
        path_params: PathParameters,
    ) -> Self {
        let frequencies = subcarrier_frequencies(config.radio.fft_size, config.radio.subcarrier_spacing);
        let grid = subcarrier_grid(config.radio.fft_size, config.radio.subcarrier_spacing);
        Self {
            cache: PositionVelocityCache::new(config.coherence_time, config.max_cache_age),
            config,
            registry,
            engine,
            geometry,
            rng,
            path_params,
            placed: Vec::new(),
            frequencies,
            grid,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[cfg(test)]
    pub fn cache(&self) -> &PositionVelocityCache {
        &self.cache
    }

    /// Compute the channel state for `request`.
    ///
    /// # Errors
    ///
    /// Unknown node ids, a transmitter addressing itself, engine failures and
    /// links without any propagation path are all fatal for the session.
    pub fn calculate_channel_state(&mut self, request: &ChannelStateRequest) -> Result<Vec<ChannelStep>, SessionError> {
        let tx = request.tx_node;
        let t = request.time;
        for id in [tx, request.rx_node] {
            if !self.registry.contains(id) {
                return Err(SessionError::UnknownNode(id));
            }
        }
        if tx == request.rx_node {
            return Err(SessionError::SelfLink(tx));
        }

        self.cache.evict(t);
        for name in self.placed.drain(..) {
            self.engine.remove_entity(&name)?;
        }

        let receivers: Vec<NodeId> = match self.config.mode {
            Mode::PointToPoint => vec![request.rx_node],
            Mode::PointToMultipoint | Mode::PointToMultipointLookahead => self.registry.ids().filter(|&id| id != tx).collect(),
        };
        let num_steps = match self.config.mode {
            Mode::PointToMultipointLookahead => (self.config.sub_mode as usize).div_ceil(receivers.len()).max(1),
            Mode::PointToPoint | Mode::PointToMultipoint => 1,
        };

        // Place every step; new cache entries become visible only afterwards
        let mut pending = Vec::new();
        let mut steps: Vec<(SimTime, Placement, Vec<Placement>)> = Vec::with_capacity(num_steps);
        for i in 0..num_steps {
            let t_i = t.saturating_add((i as SimTime).saturating_mul(self.config.coherence_time));
            let tx_state = self.node_state(tx, t_i, &mut pending)?;
            self.place(format!("tx{}", i), EntityRole::Transmitter, tx_state)?;

            let mut rx_states = Vec::with_capacity(receivers.len());
            for &rx in &receivers {
                let rx_state = self.node_state(rx, t_i, &mut pending)?;
                self.place(format!("rx{}.{}", rx, i), EntityRole::Receiver, rx_state)?;
                rx_states.push(rx_state);
            }
            steps.push((t_i, tx_state, rx_states));
        }
        for (id, entry) in pending {
            self.cache.insert(id, entry);
        }

        let mut paths = self.engine.compute_paths(&self.path_params)?;
        if !paths.has_los() {
            debug!("No line-of-sight path in batch for tx {} at {} ns, re-probing", tx, t);
            let probe = self.engine.compute_paths(&PathParameters::los_only())?;
            paths.merge(probe)?;
        }
        if paths.is_empty() {
            return Err(SessionError::NoPropagationPath { tx, rx: request.rx_node });
        }

        let fc = self.config.radio.carrier_frequency;
        let num_rx = receivers.len();
        let mut result = Vec::with_capacity(num_steps);
        for (i, (t_i, tx_state, rx_states)) in steps.into_iter().enumerate() {
            let mut end_time = t_i.saturating_add(self.config.coherence_time);
            let mut links = Vec::with_capacity(num_rx);
            for (k, rx_state) in rx_states.into_iter().enumerate() {
                let (amplitudes, delays) = paths.impulse_response(i, i * num_rx + k);
                let no_path = SessionError::NoPropagationPath { tx, rx: rx_state.id };
                let delay = propagation_delay_ns(&delays).ok_or(no_path)?;

                let raw = to_frequency_response(&self.frequencies, &amplitudes, &delays, false);
                let loss_db = wideband_loss_db(&raw);
                let csi = self.config.estimate_csi.then(|| {
                    let normalized = to_frequency_response(&self.frequencies, &amplitudes, &delays, true);
                    LinkCsi {
                        frequencies: self.grid.clone(),
                        real: normalized.iter().map(|h| h.re).collect(),
                        imag: normalized.iter().map(|h| h.im).collect(),
                    }
                });

                let mut valid_until = t_i.saturating_add(self.config.coherence_time);
                if self.config.mode == Mode::PointToPoint && self.config.sub_mode > 0 {
                    valid_until = t_i.saturating_add(self.link_ttl(&tx_state, &rx_state, fc));
                    end_time = valid_until;
                }

                links.push(ChannelLinkResult {
                    tx,
                    rx: rx_state.id,
                    rx_position: rx_state.position,
                    valid_from: t_i,
                    valid_until,
                    delay,
                    loss_db,
                    csi,
                });
            }
            result.push(ChannelStep {
                start_time: t_i,
                end_time,
                tx,
                tx_position: tx_state.position,
                links,
            });
        }

        debug!(
            "Channel state for tx {} at {} ns: {} steps x {} receivers, {} cached states",
            tx,
            t,
            result.len(),
            num_rx,
            self.cache.len()
        );
        Ok(result)
    }

    /// Resolve a node from the cache, falling back to its mobility model.
    fn node_state(&mut self, id: NodeId, t: SimTime, pending: &mut Vec<(NodeId, CacheEntry)>) -> Result<Placement, SessionError> {
        if let Some(entry) = self.cache.lookup(id, t) {
            return Ok(Placement {
                id,
                position: entry.position,
                velocity: entry.velocity,
            });
        }
        let node = self.registry.get_mut(id).ok_or(SessionError::UnknownNode(id))?;
        if let MobilityKind::RandomWalk(state) = &node.kind {
            if t < state.last_update {
                debug!("Node {} cached sim times: {:?}", id, self.cache.sim_times(id));
            }
        }
        let (position, velocity) = mobility::resolve(node, t, &mut self.rng, self.geometry.as_ref());
        pending.push((
            id,
            CacheEntry {
                sim_time: t,
                ttl: self.config.coherence_time,
                position,
                velocity,
            },
        ));
        Ok(Placement { id, position, velocity })
    }

    fn place(&mut self, name: String, role: EntityRole, state: Placement) -> Result<(), SessionError> {
        self.engine.add_entity(Entity {
            name: name.clone(),
            role,
            position: state.position,
            velocity: state.velocity,
        })?;
        self.placed.push(name);
        Ok(())
    }

    /// Validity of a point-to-point link: until either endpoint may turn,
    /// shortened to the link coherence time when the endpoints move apart.
    fn link_ttl(&self, tx: &Placement, rx: &Placement, fc: f64) -> SimTime {
        let leg_bound = [tx.id, rx.id]
            .iter()
            .filter_map(|&id| self.registry.get(id))
            .map(|node| node.leg_remaining())
            .min()
            .unwrap_or(self.config.coherence_time);
        let relative_speed = (tx.velocity - rx.velocity).norm();
        let ttl = if relative_speed == 0.0 {
            leg_bound
        } else {
            leg_bound.min(link_coherence_time(relative_speed, fc))
        };
        ttl.max(1)
    }
}
