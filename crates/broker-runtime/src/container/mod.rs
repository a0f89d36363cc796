//! # Broker Container
//!
//! Configuration and the wired set of broker services, built once at
//! startup and shared by reference.

pub mod config;
pub mod services;

pub use config::{
    BrokerConfig, CacheConfig, ClientConfig, ConfigError, DispatcherConfig, QueueConfig, RetryConfig,
};
pub use services::BrokerContainer;
