//! Channel-state simulation core.
//!
//! This module turns channel-state requests into per-link delay, loss and
//! CSI for nodes that move through a static scene. It integrates:
//! - Per-node mobility models and their position/velocity cache
//! - Look-ahead batching of links into a single propagation call
//! - The session lifecycle that owns all of the above
//!
//! ## Module Organization
//!
//! - `types`: Core data structures (vectors, mobility models, session config, link results)
//! - `signal_calculations`: Coherence time, subcarrier grid and frequency response helpers
//! - `geometry`: Ray casting and line-of-sight against scene obstacles
//! - `registry`: Per-session node registry
//! - `cache`: Coherence-bounded position/velocity cache
//! - `mobility`: Random-walk advancement with wall reflection
//! - `propagation`: Propagation engine interface and the geometric engine
//! - `orchestrator`: Look-ahead channel-state computation
//! - `session`: Session state machine

pub mod cache;
pub mod geometry;
pub mod mobility;
pub mod orchestrator;
pub mod propagation;
pub mod registry;
pub mod session;
pub mod signal_calculations;
pub mod types;

pub use propagation::SceneDirectoryProvider;
