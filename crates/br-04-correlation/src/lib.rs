//! # br-04-correlation
//!
//! Request/response correlation over a pair of queues.
//!
//! ## Flow
//!
//! ```text
//! RequestClient::start_request::<T>(cmd, params)
//!     ├── CorrelationTable::register(request_id)        (before the write)
//!     ├── QueueWriter<CommandEnvelope>::write            ──→ request queue
//!     └── PendingResponse<T>::wait()
//!                                                             │
//!                              RequestServer (MessageHandler) ◄┘
//!                                  ├── handler lookup by cmd_name
//!                                  ├── detached command → TaskTracker task, message acked
//!                                  └── QueueWriter<ResponseEnvelope>::write ──→ response queue
//!                                                                                    │
//! ResponseRouter (MessageHandler) ◄──────────────────────────────────────────────────┘
//!     └── CorrelationTable::receive_response
//!             ├── unknown id        → Err(UnknownRequestId)
//!             ├── unknown command   → pending fails, Err(UnknownCommand)
//!             ├── wrong value kind  → pending fails, Err(TypeMismatch)
//!             └── otherwise         → pending resolves
//! ```
//!
//! ## Command Registry
//!
//! [`CommandRegistry`] is built once at startup and shared by both ends. The
//! client uses it to know which kind of value each command returns; the
//! server uses it to check what its handlers produce.

pub mod client;
pub mod error;
pub mod registry;
pub mod server;
pub mod table;

pub use client::{PendingResponse, RequestClient, ResponseRouter};
pub use error::{CorrelationError, CorrelationResult, HandlerFault};
pub use registry::CommandRegistry;
pub use server::{CommandHandler, RequestServer, DEFAULT_MAX_DETACHED};
pub use table::{sweep_task, CorrelationStats, CorrelationTable};
