//! Server configuration loaded from a TOML file.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::simulation::session::SessionDefaults;

/// Configuration of the channel-state server.
///
/// Every key is optional; missing keys take the values of [`ServerConfig::default`].
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case", default)]
pub struct ServerConfig {
    /// Address the request/reply socket binds to.
    pub bind_address: String,
    /// Directory scene identifiers are resolved against.
    pub scene_dir: PathBuf,
    /// Maximum number of interactions per traced path.
    pub rt_max_depth: u32,
    pub rt_calc_diffraction: bool,
    /// Default parallelism degree (sub_mode) when the init message has none.
    pub rt_max_parallel_links: u32,
    /// Report per-subcarrier CSI in addition to delay and loss.
    pub est_csi: bool,
    /// Debug logging for this crate.
    pub verbose: bool,
    /// Stop after the first session instead of waiting for the next job.
    pub single_run: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:5555".to_string(),
            scene_dir: PathBuf::from("scenes"),
            rt_max_depth: 3,
            rt_calc_diffraction: false,
            rt_max_parallel_links: 0,
            est_csi: true,
            verbose: false,
            single_run: false,
        }
    }
}

impl ServerConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Arguments
    /// * `config_path` - Path to the config.toml file
    ///
    /// # Returns
    /// * `Ok(ServerConfig)` if the file was successfully loaded and parsed
    /// * `Err(String)` with a descriptive error message otherwise
    pub fn load(config_path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(config_path).map_err(|e| format!("Failed to read config file: {}", e))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("Failed to parse config file: {}", e))
    }

    /// Per-session defaults derived from the ray-tracing keys.
    pub fn session_defaults(&self) -> SessionDefaults {
        SessionDefaults {
            sub_mode: self.rt_max_parallel_links,
            max_depth: self.rt_max_depth,
            diffraction: self.rt_calc_diffraction,
            estimate_csi: self.est_csi,
        }
    }
}
