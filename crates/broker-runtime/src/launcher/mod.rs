//! # Broker Launcher
//!
//! The request/response command set clients use to start, attach to and
//! drive broker sessions, carried over the launcher request and response
//! queues.
//!
//! ```text
//! BrokerLauncherClient ──CommandEnvelope──→ [requests] ──→ RequestServer ──→ BrokerLauncher
//!          ↑                                                                       │
//!          └──────── CorrelationTable ←── [responses] ←── ResponseEnvelope ←───────┘
//! ```

pub mod client;
pub mod protocol;
pub mod server;
pub mod session;

pub use client::{BrokerLauncherClient, ClientError};
pub use protocol::{commands, launcher_registry, BrokerLauncher};
pub use server::bind_launcher;
pub use session::{BrokerSession, SessionBrokerLauncher};
