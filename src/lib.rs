//! Mail forwarder configuration engine.
//!
//! Turns environment variables into a validated `ForwarderConfig`, renders
//! the configuration of the container's mail daemons from it and keeps
//! certificates fresh.

/// Append one formatted line to a `String`.
macro_rules! push_line {
    ($out:expr) => {
        $out.push('\n')
    };
    ($out:expr, $($arg:tt)*) => {{
        $out.push_str(&format!($($arg)*));
        $out.push('\n');
    }};
}

pub mod config;
pub mod dns;
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod provision;
pub mod report;

pub use config::schema::ForwarderConfig;
pub use lifecycle::Shutdown;
pub use provision::{Paths, Provisioner};
