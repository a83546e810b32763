//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → materialise SRS secret → provision every service
//!     → start supervisord → wait for its socket
//!
//! Reconfigure (startup.rs):
//!     Validated config → provision every service → reload changed services
//!
//! Shutdown (shutdown.rs):
//!     Signal received → broadcast → long-running loops exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger shutdown
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Provisioning steps run in order, not concurrently
//! - supervisord starts last, once every file is in place

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{initialize, reconfigure, StartupError};
