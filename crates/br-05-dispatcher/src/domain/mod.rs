//! Dispatcher domain types

pub mod dispatch_data;
pub mod message;
pub mod queue_item;

pub use dispatch_data::DispatchData;
pub use message::{Message, PREEMPTION_HEADER, RETRY_OPERATION_HEADER};
pub use queue_item::{BrokerQueueItem, Disposition, ItemCompletion};
