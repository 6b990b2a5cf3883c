//! # Unified Configuration System
//!
//! Construction parameters for the buffer cache, particle layers and the
//! renderer context. Every struct has sensible defaults, builder-style
//! setters, and can be loaded from TOML or RON through [`Config`].
//!
//! ```toml
//! shutdown_timeout_ms = 1000
//!
//! [cache]
//! reject_pct = 50
//! max_idle_frames = 300
//! buffer_usage = "Dynamic"
//!
//! [default_layer]
//! dynamic_particles = true
//! dynamic_vertices = true
//! ```

use serde::{Serialize, Deserialize};
use std::time::Duration;

pub use crate::config::{Config, ConfigError};
use crate::render::api::BufferUsage;

/// Default oversize acceptance window of the buffer cache, in percent
pub const DEFAULT_REJECT_PCT: u32 = 50;

/// Largest accepted `reject_pct` (a buffer at most 11x the requested size)
pub const MAX_REJECT_PCT: u32 = 1000;

/// # Buffer Cache Configuration
///
/// `reject_pct` bounds how much larger than requested a recycled buffer may
/// be: a request for `n` bytes accepts capacities in `n..=n * (1 + reject_pct / 100)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferCacheConfig {
    /// Oversize acceptance window in percent
    pub reject_pct: u32,
    /// Frames a signaled buffer may stay unused before garbage collection
    /// destroys it (0 keeps buffers forever)
    pub max_idle_frames: u64,
    /// Usage hint for buffers created on a cache miss
    pub buffer_usage: BufferUsage,
}

impl BufferCacheConfig {
    /// Create a configuration with the default acceptance window
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the oversize acceptance window
    pub fn with_reject_pct(mut self, reject_pct: u32) -> Self {
        self.reject_pct = reject_pct;
        self
    }

    /// Set the idle frame limit used by garbage collection
    pub fn with_max_idle_frames(mut self, frames: u64) -> Self {
        self.max_idle_frames = frames;
        self
    }

    /// Set the usage hint of newly created buffers
    pub fn with_buffer_usage(mut self, usage: BufferUsage) -> Self {
        self.buffer_usage = usage;
        self
    }

    /// Largest capacity accepted for a request of `min_size` bytes
    pub fn max_accepted_capacity(&self, min_size: usize) -> usize {
        let extra = min_size.saturating_mul(self.reject_pct as usize) / 100;
        min_size.saturating_add(extra)
    }
}

impl Default for BufferCacheConfig {
    fn default() -> Self {
        Self {
            reject_pct: DEFAULT_REJECT_PCT,
            max_idle_frames: 300,
            buffer_usage: BufferUsage::Dynamic,
        }
    }
}

impl Config for BufferCacheConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.reject_pct > MAX_REJECT_PCT {
            return Err(ConfigError::InvalidValue {
                field: "reject_pct",
                reason: format!("{} exceeds the maximum of {}", self.reject_pct, MAX_REJECT_PCT),
            });
        }
        Ok(())
    }
}

/// # Particle Layer Configuration
///
/// - `dynamic_particles`: the per-particle simulation hook runs on tick
/// - `dynamic_vertices`: vertices are regenerated on every render, even when
///   no allocation changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParticleLayerConfig {
    /// Whether particles are simulated on tick
    pub dynamic_particles: bool,
    /// Whether vertices are regenerated every frame
    pub dynamic_vertices: bool,
}

impl ParticleLayerConfig {
    /// Layer whose particles are simulated and re-emitted every frame
    pub fn dynamic() -> Self {
        Self {
            dynamic_particles: true,
            dynamic_vertices: true,
        }
    }

    /// Layer whose vertices are emitted once and only rebuilt when
    /// allocations change (backgrounds, tile decorations)
    pub fn static_layer() -> Self {
        Self {
            dynamic_particles: false,
            dynamic_vertices: false,
        }
    }

    /// Set whether particles are simulated
    pub fn with_dynamic_particles(mut self, dynamic: bool) -> Self {
        self.dynamic_particles = dynamic;
        self
    }

    /// Set whether vertices are rebuilt every frame
    pub fn with_dynamic_vertices(mut self, dynamic: bool) -> Self {
        self.dynamic_vertices = dynamic;
        self
    }
}

impl Default for ParticleLayerConfig {
    fn default() -> Self {
        Self::dynamic()
    }
}

impl Config for ParticleLayerConfig {}

/// # Renderer Configuration
///
/// Top level configuration of the renderer context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Upper bound spent waiting on each outstanding fence at shutdown
    pub shutdown_timeout_ms: u64,
    /// Buffer cache parameters
    pub cache: BufferCacheConfig,
    /// Flags used by layers added without an explicit configuration
    pub default_layer: ParticleLayerConfig,
}

impl RendererConfig {
    /// Create a renderer configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the buffer cache configuration
    pub fn with_cache(mut self, cache: BufferCacheConfig) -> Self {
        self.cache = cache;
        self
    }

    /// Set the default layer flags
    pub fn with_default_layer(mut self, layer: ParticleLayerConfig) -> Self {
        self.default_layer = layer;
        self
    }

    /// Set the shutdown wait timeout
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Shutdown wait timeout as a [`Duration`]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: 1000,
            cache: BufferCacheConfig::default(),
            default_layer: ParticleLayerConfig::default(),
        }
    }
}

impl Config for RendererConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_acceptance_window() {
        let config = BufferCacheConfig::default();
        assert_eq!(config.max_accepted_capacity(100), 150);
        assert_eq!(config.with_reject_pct(25).max_accepted_capacity(100), 125);
        assert_eq!(BufferCacheConfig::new().with_reject_pct(0).max_accepted_capacity(64), 64);
    }

    #[test]
    fn test_acceptance_window_saturates() {
        let config = BufferCacheConfig::default();
        assert_eq!(config.max_accepted_capacity(usize::MAX), usize::MAX);
    }

    #[test]
    fn test_toml_round_trip() {
        let file = Builder::new().suffix(".toml").tempfile().unwrap();
        let config = RendererConfig::new()
            .with_cache(BufferCacheConfig::new().with_reject_pct(25).with_max_idle_frames(10))
            .with_default_layer(ParticleLayerConfig::static_layer())
            .with_shutdown_timeout(Duration::from_millis(250));

        config.save_to_file(file.path()).unwrap();
        let loaded = RendererConfig::load_from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_ron_round_trip() {
        let file = Builder::new().suffix(".ron").tempfile().unwrap();
        let config = RendererConfig::new()
            .with_cache(BufferCacheConfig::new().with_buffer_usage(BufferUsage::Static));

        config.save_to_file(file.path()).unwrap();
        let loaded = RendererConfig::load_from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "[cache]\nreject_pct = 10\n").unwrap();
        file.flush().unwrap();

        let loaded = RendererConfig::load_from_file(file.path()).unwrap();
        assert_eq!(loaded.cache.reject_pct, 10);
        assert_eq!(loaded.cache.max_idle_frames, 300);
        assert_eq!(loaded.default_layer, ParticleLayerConfig::dynamic());
    }

    #[test]
    fn test_invalid_reject_pct_rejected() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        write!(file, "[cache]\nreject_pct = 5000\n").unwrap();
        file.flush().unwrap();

        let result = RendererConfig::load_from_file(file.path());
        assert!(matches!(result, Err(ConfigError::InvalidValue { field: "reject_pct", .. })));
    }

    #[test]
    fn test_unsupported_format() {
        let file = Builder::new().suffix(".json").tempfile().unwrap();
        let result = RendererConfig::load_from_file(file.path());
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }
}
