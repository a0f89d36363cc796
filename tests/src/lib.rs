//! # Broker Dispatch Test Suite
//!
//! Cross-crate flows that no single crate can test on its own.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs            # Queue wiring and scripted launchers shared by the flows
//! └── integration/
//!     ├── launcher_flows.rs  # Launcher commands over the request/response queues
//!     ├── dispatch_flows.rs  # Submitted requests through sessions and dispatchers
//!     └── recovery.rs        # Redelivery, dead-lettering and restarts
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p broker-tests
//! cargo test -p broker-tests integration::recovery::
//! ```

pub mod fixtures;
pub mod integration;
