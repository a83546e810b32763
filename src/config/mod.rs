//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! process environment
//!     → env.rs (typed getters over a string map)
//!     → loader.rs (map variables onto the schema)
//!     → rules.rs (FORWARD_RULES mini-language)
//!     → validation.rs (checks + smart defaults)
//!     → ForwarderConfig (validated, immutable)
//!     → passed by reference to every provisioning step
//! ```
//!
//! # Design Decisions
//! - Config is read once per run; there is no reload
//! - All fields have defaults so an almost empty environment still parses
//! - Parsing never fails; validation is the only fatal step

pub mod env;
pub mod loader;
pub mod rules;
pub mod schema;
pub mod secret;
pub mod validation;

pub use env::Environment;
pub use loader::{load_config, load_from};
pub use rules::{ForwardingRule, RuleError};
pub use schema::{
    ChallengeType, DkimConfig, DomainSet, ForwarderConfig, SecurityConfig, SmtpConfig, SrsConfig,
    SrsSecret, TlsConfig,
};
pub use validation::{derive_defaults, ConfigError};
