//! # Broker Runtime Library
//!
//! Exposes the runtime's modules for the binary and for end-to-end tests.
//! The main entry point is the `main.rs` binary.
//!
//! - `container/` - configuration and service wiring
//! - `launcher/` - broker launcher protocol, client facade and sessions
//! - `adapters/` - backend resolution and completion accounting
//! - `cache` - TTL cache owned by the container

pub mod adapters;
pub mod cache;
pub mod container;
pub mod launcher;

pub use cache::TtlCache;
pub use container::{BrokerConfig, BrokerContainer, ConfigError};
pub use launcher::{BrokerLauncher, BrokerLauncherClient, BrokerSession, ClientError, SessionBrokerLauncher};
