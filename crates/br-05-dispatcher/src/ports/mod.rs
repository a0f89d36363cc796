//! Dispatcher ports

pub mod outbound;

pub use outbound::{BackendChannel, BackendTransport, ChannelState, CompletionObserver, ResponseJournal};
