//! Completion accounting per client.

use br_05_dispatcher::{BrokerQueueItem, CompletionObserver, Disposition};
use broker_telemetry::log_event;
use dashmap::DashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientUsage {
    pub completed: u64,
    pub faulted: u64,
    pub requeued: u64,
    pub busy_time: Duration,
}

#[derive(Debug, Default)]
pub struct MetricsObserver {
    usage: DashMap<String, ClientUsage>,
}

impl MetricsObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn usage(&self, client_id: &str) -> ClientUsage {
        self.usage.get(client_id).map(|u| *u).unwrap_or_default()
    }
}

impl CompletionObserver for MetricsObserver {
    fn on_completed(&self, item: &BrokerQueueItem, disposition: Option<&Disposition>, elapsed: Duration) {
        let mut usage = self.usage.entry(item.client_id().to_string()).or_default();
        match disposition {
            None => usage.requeued += 1,
            Some(Disposition::Reply(reply)) if !reply.is_fault => {
                usage.completed += 1;
                usage.busy_time += elapsed;
            }
            Some(_) => {
                usage.faulted += 1;
                usage.busy_time += elapsed;
            }
        }
        log_event!(trace, "runtime", "Request accounted", client_id = item.client_id(), outcome = disposition.map(Disposition::outcome).unwrap_or("requeued"), elapsed_ms = elapsed.as_millis() as u64);
    }
}
