//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → tracing events with structured fields
//!
//! logging.rs:
//!     → EnvFilter (RUST_LOG, else DEBUG-derived default)
//!     → fmt layer on stderr (pretty or JSON)
//! ```
//!
//! # Design Decisions
//! - Secrets are never passed as event fields
//! - No metrics endpoint; the container's health check covers liveness

pub mod logging;
