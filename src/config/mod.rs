//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → OrchestratorConfig (validated, immutable)
//!     → components built from it at startup
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → server swaps hot-reloadable parts (alert thresholds)
//! ```

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, load_or_default, ConfigError};
pub use schema::{
    AlertThresholds, BreakerConfig, CacheConfig, EventConfig, ListenerConfig, MetricsConfig,
    ObservabilityConfig, OrchestratorConfig, PlanConfig, QuotaConfig, RegistryConfig, RetryConfig,
    SecurityConfig, TimeoutConfig,
};
