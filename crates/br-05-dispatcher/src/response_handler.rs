//! Classification of backend results

use crate::domain::DispatchData;
use crate::error::DispatchError;
use broker_telemetry::log_event;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Normal reply; complete the item
    Reply,
    /// Application fault; complete the item, fault carried as data
    Fault,
    /// Backend is being reclaimed; requeue and stop dispatching to it
    Preempted,
    /// Backend asked for the whole operation to run again
    RetryRequested,
    /// No reply; candidate for retry
    CommunicationFailure,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ResponseHandler;

impl ResponseHandler {
    pub fn new() -> Self {
        Self
    }

    /// Classify the result recorded on `data`, normalizing its reply and
    /// exception fields for the completer.
    pub fn receive_response(&self, data: &mut DispatchData) -> DispatchOutcome {
        let Some(reply) = data.reply_message.as_mut() else {
            if data.exception.is_none() {
                data.exception = Some(DispatchError::NoReply);
            }
            log_event!(debug, "dispatcher", "Backend call failed", endpoint = %data.endpoint, attempt = data.attempt, message_id = %data.message_id);
            return DispatchOutcome::CommunicationFailure;
        };

        // A reply, fault or not, supersedes any earlier exception
        data.exception = None;

        if reply.is_preempted() {
            reply.is_fault = false;
            data.service_preempted = true;
            log_event!(info, "dispatcher", "Backend preempted", endpoint = %data.endpoint, message_id = %data.message_id);
            return DispatchOutcome::Preempted;
        }
        if reply.is_retry_requested() {
            log_event!(debug, "dispatcher", "Backend requested operation retry", endpoint = %data.endpoint, message_id = %data.message_id);
            return DispatchOutcome::RetryRequested;
        }
        if reply.is_fault {
            DispatchOutcome::Fault
        } else {
            DispatchOutcome::Reply
        }
    }
}
