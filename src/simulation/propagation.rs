//! Radio propagation engine interface and the built-in geometric engine.
//!
//! The orchestrator places transmitter and receiver entities into an engine,
//! asks it once for the multipath components of every transmitter/receiver
//! pair and reads the per-link impulse responses back from the returned
//! [`PathSet`].
//!
//! [`GeometricEngine`] traces the line-of-sight path and first-order specular
//! reflections off flat surfaces of a scene (image method), with free-space
//! amplitudes.

use log::debug;
use num_complex::Complex64;
use std::f64::consts::PI;
use std::path::PathBuf;
use thiserror::Error;

use crate::common::scene::{Point, SceneLoadError, load_scene};

use super::geometry::{SceneGeometry, StaticGeometry};
use super::signal_calculations::{SPEED_OF_LIGHT, wavelength};
use super::types::Vec3;

/// Clearance kept from the reflecting surface when checking a path leg.
const LEG_EPSILON: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum PropagationError {
    #[error("propagation engine used before it was configured")]
    NotConfigured,
    #[error("entity '{0}' is already placed")]
    DuplicateEntity(String),
    #[error("entity '{0}' is not placed")]
    UnknownEntity(String),
    #[error("cannot merge path sets of shape {left:?} and {right:?}")]
    ShapeMismatch { left: (usize, usize), right: (usize, usize) },
    #[error("failed to load scene '{scene}': {source}")]
    Scene {
        scene: String,
        #[source]
        source: SceneLoadError,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRole {
    Transmitter,
    Receiver,
}

/// A transmitter or receiver placed in the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub name: String,
    pub role: EntityRole,
    pub position: Vec3,
    pub velocity: Vec3,
}

/// Planar antenna array description.
#[derive(Debug, Clone, PartialEq)]
pub struct AntennaArray {
    pub num_rows: u32,
    pub num_cols: u32,
    /// Element spacing in wavelengths.
    pub vertical_spacing: f64,
    pub horizontal_spacing: f64,
}

impl AntennaArray {
    /// Single isotropic element.
    pub fn isotropic() -> Self {
        Self {
            num_rows: 1,
            num_cols: 1,
            vertical_spacing: 0.5,
            horizontal_spacing: 0.5,
        }
    }
}

/// Radio parameters the engine is configured with at session init.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub carrier_frequency: f64,
    pub bandwidth: f64,
    pub fft_size: u32,
    pub subcarrier_spacing: f64,
    pub tx_array: AntennaArray,
    pub rx_array: AntennaArray,
}

/// Which interactions the engine should trace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathParameters {
    /// Maximum number of interactions per path.
    pub max_depth: u32,
    pub los: bool,
    pub reflection: bool,
    pub diffraction: bool,
}

impl PathParameters {
    pub fn full(max_depth: u32, diffraction: bool) -> Self {
        Self {
            max_depth,
            los: true,
            reflection: true,
            diffraction,
        }
    }

    /// Re-probe used when a batch came back without any line-of-sight path.
    pub fn los_only() -> Self {
        Self {
            max_depth: 0,
            los: true,
            reflection: false,
            diffraction: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    LineOfSight,
    Reflection { order: u32 },
}

/// One propagation path of a link.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MultipathComponent {
    pub amplitude: Complex64,
    /// Propagation delay in seconds.
    pub delay: f64,
    pub kind: PathKind,
}

/// Multipath components for every transmitter/receiver pair of a batch.
///
/// Transmitters and receivers are indexed in the order they were placed.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PathSet {
    num_tx: usize,
    num_rx: usize,
    links: Vec<Vec<MultipathComponent>>,
}

impl PathSet {
    pub fn new(num_tx: usize, num_rx: usize) -> Self {
        Self {
            num_tx,
            num_rx,
            links: vec![Vec::new(); num_tx * num_rx],
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.num_tx, self.num_rx)
    }

    pub fn push(&mut self, tx: usize, rx: usize, component: MultipathComponent) {
        if let Some(index) = self.index(tx, rx) {
            self.links[index].push(component);
        }
    }

    pub fn link(&self, tx: usize, rx: usize) -> &[MultipathComponent] {
        self.index(tx, rx).map(|i| self.links[i].as_slice()).unwrap_or(&[])
    }

    /// Path amplitudes and delays (seconds) of one link.
    pub fn impulse_response(&self, tx: usize, rx: usize) -> (Vec<Complex64>, Vec<f64>) {
        self.link(tx, rx).iter().map(|c| (c.amplitude, c.delay)).unzip()
    }

    /// True if no link has any path.
    pub fn is_empty(&self) -> bool {
        self.links.iter().all(Vec::is_empty)
    }

    pub fn has_los(&self) -> bool {
        self.links.iter().flatten().any(|c| c.kind == PathKind::LineOfSight)
    }

    pub fn path_count(&self) -> usize {
        self.links.iter().map(Vec::len).sum()
    }

    /// Append the paths of `other`, which must cover the same pairs.
    pub fn merge(&mut self, other: PathSet) -> Result<(), PropagationError> {
        if self.shape() != other.shape() {
            return Err(PropagationError::ShapeMismatch {
                left: self.shape(),
                right: other.shape(),
            });
        }
        for (mine, theirs) in self.links.iter_mut().zip(other.links) {
            mine.extend(theirs);
        }
        Ok(())
    }

    fn index(&self, tx: usize, rx: usize) -> Option<usize> {
        (tx < self.num_tx && rx < self.num_rx).then_some(tx * self.num_rx + rx)
    }
}

/// A radio propagation engine operating on a loaded scene.
pub trait PropagationEngine {
    fn configure(&mut self, config: &EngineConfig) -> Result<(), PropagationError>;

    fn add_entity(&mut self, entity: Entity) -> Result<(), PropagationError>;

    fn remove_entity(&mut self, name: &str) -> Result<(), PropagationError>;

    /// Trace paths between every placed transmitter and every placed receiver.
    fn compute_paths(&mut self, params: &PathParameters) -> Result<PathSet, PropagationError>;
}

/// Line-of-sight plus first-order reflection engine over a [`SceneGeometry`].
///
/// Diffraction is not traced; the flag is accepted and ignored.
#[derive(Debug, Clone)]
pub struct GeometricEngine {
    geometry: SceneGeometry,
    reflection_coefficient: f64,
    config: Option<EngineConfig>,
    entities: Vec<Entity>,
}

impl GeometricEngine {
    pub fn new(geometry: SceneGeometry, reflection_coefficient: f64) -> Self {
        Self {
            geometry,
            reflection_coefficient,
            config: None,
            entities: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    fn free_space_component(fc: f64, length: f64, gain: f64, kind: PathKind) -> MultipathComponent {
        let lambda = wavelength(fc);
        // Near field is clamped to one wavelength
        let length = length.max(lambda);
        let delay = length / SPEED_OF_LIGHT;
        MultipathComponent {
            amplitude: Complex64::from_polar(gain * lambda / (4.0 * PI * length), -2.0 * PI * fc * delay),
            delay,
            kind,
        }
    }

    fn trace_link(&self, fc: f64, tx: Vec3, rx: Vec3, params: &PathParameters, out: &mut Vec<MultipathComponent>) {
        if params.los && self.geometry.line_of_sight(tx, rx) {
            out.push(Self::free_space_component(fc, tx.distance(rx), 1.0, PathKind::LineOfSight));
        }
        if params.reflection && params.max_depth >= 1 {
            for (a, b) in self.geometry.reflecting_segments() {
                if let Some(length) = self.reflected_length(tx, rx, &a, &b) {
                    out.push(Self::free_space_component(
                        fc,
                        length,
                        self.reflection_coefficient,
                        PathKind::Reflection { order: 1 },
                    ));
                }
            }
        }
    }

    /// Unfolded length of the specular path `tx → wall a–b → rx`, if the
    /// reflection point lies on the segment and both legs are unobstructed.
    fn reflected_length(&self, tx: Vec3, rx: Vec3, a: &Point, b: &Point) -> Option<f64> {
        let (ex, ey) = (b.x - a.x, b.y - a.y);
        let e_len = (ex * ex + ey * ey).sqrt();
        if e_len == 0.0 {
            return None;
        }
        let (ux, uy) = (ex / e_len, ey / e_len);

        // Mirror tx across the wall line
        let proj = (tx.x - a.x) * ux + (tx.y - a.y) * uy;
        let image = (2.0 * (a.x + ux * proj) - tx.x, 2.0 * (a.y + uy * proj) - tx.y);

        // Image → rx must cross the segment strictly between its endpoints
        let (dx, dy) = (rx.x - image.0, rx.y - image.1);
        let denom = dx * ey - dy * ex;
        if denom.abs() < f64::EPSILON {
            return None;
        }
        let (wx, wy) = (a.x - image.0, a.y - image.1);
        let s = (wx * ey - wy * ex) / denom;
        let u = (wx * dy - wy * dx) / denom;
        if !(s > 0.0 && s < 1.0) || !(0.0..=1.0).contains(&u) {
            return None;
        }

        let hit = (image.0 + s * dx, image.1 + s * dy);
        let h1 = ((hit.0 - tx.x).powi(2) + (hit.1 - tx.y).powi(2)).sqrt();
        let h2 = ((rx.x - hit.0).powi(2) + (rx.y - hit.1).powi(2)).sqrt();
        let horizontal = h1 + h2;
        if horizontal == 0.0 {
            return None;
        }
        let z = tx.z + (rx.z - tx.z) * h1 / horizontal;
        let point = Vec3::new(hit.0, hit.1, z);

        if !self.leg_clear(tx, point) || !self.leg_clear(point, rx) {
            return None;
        }
        Some((horizontal * horizontal + (rx.z - tx.z).powi(2)).sqrt())
    }

    fn leg_clear(&self, from: Vec3, to: Vec3) -> bool {
        let length = from.distance(to);
        if length <= 2.0 * LEG_EPSILON {
            return true;
        }
        match (to - from).normalized() {
            Some(direction) => self
                .geometry
                .intersect(from + direction * LEG_EPSILON, direction, length - 2.0 * LEG_EPSILON)
                .is_none(),
            None => true,
        }
    }
}

impl PropagationEngine for GeometricEngine {
    fn configure(&mut self, config: &EngineConfig) -> Result<(), PropagationError> {
        debug!(
            "Engine configured: fc {} Hz, bandwidth {} Hz, {} subcarriers at {} Hz, tx array {}x{}, rx array {}x{}",
            config.carrier_frequency,
            config.bandwidth,
            config.fft_size,
            config.subcarrier_spacing,
            config.tx_array.num_rows,
            config.tx_array.num_cols,
            config.rx_array.num_rows,
            config.rx_array.num_cols
        );
        self.config = Some(config.clone());
        Ok(())
    }

    fn add_entity(&mut self, entity: Entity) -> Result<(), PropagationError> {
        if self.entities.iter().any(|e| e.name == entity.name) {
            return Err(PropagationError::DuplicateEntity(entity.name));
        }
        self.entities.push(entity);
        Ok(())
    }

    fn remove_entity(&mut self, name: &str) -> Result<(), PropagationError> {
        let index = self
            .entities
            .iter()
            .position(|e| e.name == name)
            .ok_or_else(|| PropagationError::UnknownEntity(name.to_string()))?;
        self.entities.remove(index);
        Ok(())
    }

    fn compute_paths(&mut self, params: &PathParameters) -> Result<PathSet, PropagationError> {
        let fc = self.config.as_ref().ok_or(PropagationError::NotConfigured)?.carrier_frequency;
        let transmitters: Vec<&Entity> = self.entities.iter().filter(|e| e.role == EntityRole::Transmitter).collect();
        let receivers: Vec<&Entity> = self.entities.iter().filter(|e| e.role == EntityRole::Receiver).collect();

        let mut paths = PathSet::new(transmitters.len(), receivers.len());
        let mut buffer = Vec::new();
        for (i, tx) in transmitters.iter().enumerate() {
            for (j, rx) in receivers.iter().enumerate() {
                buffer.clear();
                self.trace_link(fc, tx.position, rx.position, params, &mut buffer);
                for component in buffer.drain(..) {
                    paths.push(i, j, component);
                }
            }
        }
        debug!(
            "Traced {} paths for {} tx x {} rx (max depth {}, los {}, diffraction {})",
            paths.path_count(),
            transmitters.len(),
            receivers.len(),
            params.max_depth,
            params.los,
            params.diffraction
        );
        Ok(paths)
    }
}

/// Engine and static geometry opened for one scene.
pub struct OpenedScene {
    pub engine: Box<dyn PropagationEngine>,
    pub geometry: Box<dyn StaticGeometry>,
}

/// Resolves a scene identifier from an init message to an engine and its geometry.
pub trait SceneProvider {
    fn open(&self, scene_id: &str) -> Result<OpenedScene, PropagationError>;
}

/// Loads JSON scenes from a directory and runs them on a [`GeometricEngine`].
#[derive(Debug, Clone)]
pub struct SceneDirectoryProvider {
    scene_dir: PathBuf,
}

impl SceneDirectoryProvider {
    pub fn new(scene_dir: impl Into<PathBuf>) -> Self {
        Self { scene_dir: scene_dir.into() }
    }
}

impl SceneProvider for SceneDirectoryProvider {
    fn open(&self, scene_id: &str) -> Result<OpenedScene, PropagationError> {
        let path = self.scene_dir.join(scene_id);
        let scene = load_scene(&path).map_err(|source| PropagationError::Scene {
            scene: scene_id.to_string(),
            source,
        })?;
        debug!("Loaded scene {} with {} obstacles", path.display(), scene.obstacles.len());

        let geometry = SceneGeometry::from_scene(&scene);
        Ok(OpenedScene {
            engine: Box::new(GeometricEngine::new(geometry.clone(), scene.reflection_coefficient)),
            geometry: Box::new(geometry),
        })
    }
}
