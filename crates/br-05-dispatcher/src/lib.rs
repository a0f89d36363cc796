//! # br-05-dispatcher
//!
//! The send/receive engine between the broker queue and backend workers.
//!
//! ## Backend Channel State Machine
//!
//! ```text
//! [NoClient] ──get_client──→ [Creating] ──ok──→ [Ready] ──comm failure──→ [Faulted]
//!                                 │                ↑                          │
//!                                 │                └──────── recreate ────────┘
//!                                 └── max_channel_create_failures ──→ [PermanentlyFailed]
//! ```
//!
//! Recreation is single-flight: one creation per endpoint at a time, and
//! concurrent callers share its result.
//!
//! ## Outcome Classification
//!
//! | Backend result | Outcome | Action |
//! |----------------|---------|--------|
//! | Reply | `Reply` | complete item |
//! | Fault reply | `Fault` | complete item, fault carried as data |
//! | Reply with `ServicePreempted` header | `Preempted` | requeue, stop dispatcher |
//! | Fault with `RetryOperationError` header | `RetryRequested` | requeue, not counted |
//! | Endpoint unreachable / timeout | `CommunicationFailure` | retry, then requeue or fail |
//!
//! ## Queue Item Lifecycle
//!
//! A [`BrokerQueueItem`] records exactly one terminal disposition. The
//! [`QueueItemCompleter`] clears the item, reply and exception from the
//! [`DispatchData`] it completes, so a second completion is a no-op.

pub mod adapters;
pub mod broker_queue;
pub mod client_manager;
pub mod completer;
pub mod dispatcher;
pub mod domain;
pub mod error;
pub mod ports;
pub mod response_handler;

pub use adapters::journal::{InMemoryResponseJournal, NoopJournal};
pub use adapters::loopback::{LoopbackChannel, LoopbackTransport};
pub use adapters::observer::NoopObserver;
pub use broker_queue::BrokerQueue;
pub use client_manager::{BackendClientManager, BackendState, ClientLease};
pub use completer::{QueueItemCompleter, RequeueReason};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use domain::{
    BrokerQueueItem, DispatchData, Disposition, ItemCompletion, Message, PREEMPTION_HEADER,
    RETRY_OPERATION_HEADER,
};
pub use error::{CommunicationError, DispatchError, JournalError, QueueItemError};
pub use ports::{BackendChannel, BackendTransport, ChannelState, CompletionObserver, ResponseJournal};
pub use response_handler::{DispatchOutcome, ResponseHandler};
