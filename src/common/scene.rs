//! Scene loading, parsing, and validation logic.
//!
//! A scene describes the static geometry nodes move in and radio waves
//! propagate through. Obstacles are 2D footprints extruded vertically:
//! thin walls (line segments), solid rectangles and solid circles.
//!
//! Scene files are JSON documents resolved relative to the configured scene
//! directory using the scene identifier sent in the init message.

use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// Default amplitude factor applied per specular reflection.
pub const DEFAULT_REFLECTION_COEFFICIENT: f64 = 0.7;

/// Why a scene file could not be turned into a [`Scene`].
#[derive(Debug)]
pub enum SceneLoadError {
    FileReadError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for SceneLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SceneLoadError::FileReadError(msg) => write!(f, "scene file unreadable: {}", msg),
            SceneLoadError::ParseError(msg) => write!(f, "scene JSON invalid: {}", msg),
            SceneLoadError::ValidationError(msg) => write!(f, "scene geometry rejected: {}", msg),
        }
    }
}

impl std::error::Error for SceneLoadError {}

/// Point in the horizontal plane (metres).
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

/// Solid axis-aligned rectangle footprint.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RectPos {
    #[serde(rename = "top-left-position")]
    pub top_left: Point,
    #[serde(rename = "bottom-right-position")]
    pub bottom_right: Point,
}

/// Solid circular footprint (a vertical cylinder).
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct CirclePos {
    #[serde(rename = "center_position")]
    pub center: Point,
    pub radius: f64,
}

/// Thin wall between two footprint points.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct WallPos {
    pub start: Point,
    pub end: Point,
}

/// One static obstacle, tagged by `type` in the scene file.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum Obstacle {
    #[serde(rename = "wall")]
    Wall {
        #[serde(flatten)]
        position: WallPos,
    },
    #[serde(rename = "rectangle")]
    Rectangle {
        #[serde(flatten)]
        position: RectPos,
    },
    #[serde(rename = "circle")]
    Circle {
        #[serde(flatten)]
        position: CirclePos,
    },
}

/// Static environment of a session.
#[derive(Debug, Deserialize, Clone)]
pub struct Scene {
    /// Static obstacles used for mobility reflection and line-of-sight.
    #[serde(default)]
    pub obstacles: Vec<Obstacle>,
    /// Amplitude factor per specular reflection (0..=1).
    #[serde(default = "default_reflection_coefficient")]
    pub reflection_coefficient: f64,
}

fn default_reflection_coefficient() -> f64 {
    DEFAULT_REFLECTION_COEFFICIENT
}

/// Read, parse and validate the scene file at `path`.
pub fn load_scene(path: &Path) -> Result<Scene, SceneLoadError> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read file: {}", path.display()))
        .map_err(|e| SceneLoadError::FileReadError(format!("{:#}", e)))?;

    parse_scene(&data)
}

/// Parse and validate a scene from its JSON text.
pub fn parse_scene(data: &str) -> Result<Scene, SceneLoadError> {
    let scene: Scene = serde_json::from_str(data)
        .context("Scene is not a valid obstacle list")
        .map_err(|e| SceneLoadError::ParseError(format!("{:#}", e)))?;

    validate_scene(&scene).map_err(SceneLoadError::ValidationError)?;

    Ok(scene)
}

/// Check obstacle geometry and scene-wide parameters.
///
/// Returns a description of the first problem found.
pub fn validate_scene(scene: &Scene) -> Result<(), String> {
    const MAX_OBSTACLES: usize = 100_000;

    if scene.obstacles.len() > MAX_OBSTACLES {
        return Err(format!("Obstacle count {} exceeds maximum of {}", scene.obstacles.len(), MAX_OBSTACLES));
    }

    if !(0.0..=1.0).contains(&scene.reflection_coefficient) {
        return Err(format!(
            "Invalid reflection_coefficient {}, must be within 0-1",
            scene.reflection_coefficient
        ));
    }

    for (idx, obstacle) in scene.obstacles.iter().enumerate() {
        match obstacle {
            Obstacle::Wall { position } => {
                if !is_finite(&position.start) || !is_finite(&position.end) {
                    return Err(format!("Obstacle {} (wall) has non-finite coordinates", idx));
                }
                if position.start == position.end {
                    return Err(format!(
                        "Obstacle {} (wall) is degenerate: start and end are both ({}, {})",
                        idx, position.start.x, position.start.y
                    ));
                }
            }
            Obstacle::Rectangle { position } => {
                if !is_finite(&position.top_left) || !is_finite(&position.bottom_right) {
                    return Err(format!("Obstacle {} (rectangle) has non-finite coordinates", idx));
                }
                let (tl, br) = (position.top_left, position.bottom_right);
                if tl.x >= br.x || tl.y >= br.y {
                    return Err(format!(
                        "Obstacle {} (rectangle) is inverted or empty: ({}, {}) .. ({}, {})",
                        idx, tl.x, tl.y, br.x, br.y
                    ));
                }
            }
            Obstacle::Circle { position } => {
                if !is_finite(&position.center) || !position.radius.is_finite() {
                    return Err(format!("Obstacle {} (circle) has non-finite coordinates", idx));
                }
                if position.radius <= 0.0 {
                    return Err(format!("Obstacle {} (circle) has non-positive radius", idx));
                }
            }
        }
    }

    Ok(())
}

fn is_finite(p: &Point) -> bool {
    p.x.is_finite() && p.y.is_finite()
}
