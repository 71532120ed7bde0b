//! Engine configuration.

use std::time::Duration;

use primitives::AdapterConfig;

/// Tuning knobs for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Environment variables primitive handlers may read.
    pub env_allow_list: Vec<String>,
    /// Used for primitives stored without a positive timeout.
    pub default_primitive_timeout: Duration,
    /// Upper bound on the collection size a loop node accepts.
    pub max_loop_iterations: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            env_allow_list: Vec::new(),
            default_primitive_timeout: Duration::from_secs(30),
            max_loop_iterations: 10_000,
        }
    }
}

impl EngineConfig {
    pub fn adapter_config(&self) -> AdapterConfig {
        AdapterConfig {
            default_timeout: self.default_primitive_timeout,
            env_allow_list: self.env_allow_list.clone(),
        }
    }
}
