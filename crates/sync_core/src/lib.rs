//! Live state-synchronization layer for the operator dashboard.
//!
//! A page acquires a [`Subscription`] for an endpoint URL; inbound tagged
//! frames are routed into a per-subscription [`store::ViewStateStore`] and
//! read back as readiness-gated snapshots, while operator commands travel
//! the other way through the same connection.

pub mod command;
pub mod connection;
pub mod router;
pub mod settings;
pub mod store;
pub mod subscription;

pub use command::CommandSender;
pub use connection::Connection;
pub use router::MessageRouter;
pub use settings::{load_settings, ReconnectPolicy, Settings};
pub use store::{MetricsPoint, ViewSnapshot, ViewStateStore};
pub use subscription::Subscription;

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
