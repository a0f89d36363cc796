use crate::domain::{BrokerQueueItem, Disposition};
use crate::ports::CompletionObserver;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct NoopObserver;

impl CompletionObserver for NoopObserver {
    fn on_completed(&self, _item: &BrokerQueueItem, _disposition: Option<&Disposition>, _elapsed: Duration) {}
}
