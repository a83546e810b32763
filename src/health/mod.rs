//! Container health checking.
//!
//! # Data Flow
//! ```text
//! `mail-forwarder healthcheck`
//!     → probes.rs (process, queue, socket, ping, TCP port probes)
//!     → one CheckResult per component
//!     → HealthReport (healthy only if every check passed)
//!     → exit code 0 / 1
//! ```
//!
//! # Design Decisions
//! - Every check runs even after one fails, so the log names all problems
//! - External tools go through `CommandRunner`; ports are probed directly

pub mod probes;

pub use probes::{CheckResult, HealthChecker, HealthReport};
