//! Shared scene definitions.

pub mod scene;
