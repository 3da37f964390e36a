//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → env.rs (environment overrides)
//!     → validation.rs (semantic checks)
//!     → ShieldConfig (validated, immutable)
//!     → handed to each component's constructor
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require a restart
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod env;
pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, CircuitBreakerConfig, FingerprintConfig, IpBlockerConfig, ListenerConfig,
    ObservabilityConfig, ProtectionConfig, RateLimitConfig, ShieldConfig,
};
