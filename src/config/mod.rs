//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → RelayConfig (validated, immutable)
//!     → shared by value/Arc with all subsystems at startup
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → dedup normalization rules swapped atomically
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; only dedup rules hot-reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AdmissionConfig, ChatParameters, DedupConfig, ListenerConfig, NormalizationRuleConfig,
    ObservabilityConfig, RelayConfig, RoutesConfig, SessionConfig, UpstreamConfig, UpstreamKind,
};
