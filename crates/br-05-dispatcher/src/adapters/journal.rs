//! Response journal adapters

use crate::domain::Disposition;
use crate::error::JournalError;
use crate::ports::ResponseJournal;
use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

/// Journal for non-durable sessions
#[derive(Debug, Default)]
pub struct NoopJournal;

#[async_trait]
impl ResponseJournal for NoopJournal {
    async fn record(&self, _persist_id: Uuid, _disposition: &Disposition) -> Result<(), JournalError> {
        Ok(())
    }
}

/// Keeps dispositions in memory, keyed by persist id.
#[derive(Debug, Default)]
pub struct InMemoryResponseJournal {
    entries: DashMap<Uuid, Disposition>,
}

impl InMemoryResponseJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, persist_id: &Uuid) -> Option<Disposition> {
        self.entries.get(persist_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ResponseJournal for InMemoryResponseJournal {
    async fn record(&self, persist_id: Uuid, disposition: &Disposition) -> Result<(), JournalError> {
        if self.entries.insert(persist_id, disposition.clone()).is_some() {
            return Err(JournalError::WriteFailed(format!(
                "disposition for {persist_id} already recorded"
            )));
        }
        Ok(())
    }
}
