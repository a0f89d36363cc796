//! Typed client facade over the launcher command set.

use super::protocol::commands;
use br_04_correlation::{CorrelationError, RequestClient};
use shared_types::{
    BrokerInitializationResult, FaultCode, SessionStartInfo, Value, ValueError, WireType,
};
use std::sync::Arc;
use thiserror::Error;

/// Launcher call failures, with remote faults split out by code.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClientError {
    #[error("Broker fault ({code}): {message}")]
    Fault { code: FaultCode, message: String },

    #[error("Parameter encoding failed: {0}")]
    Encode(#[from] ValueError),

    #[error(transparent)]
    Correlation(CorrelationError),
}

impl From<CorrelationError> for ClientError {
    fn from(e: CorrelationError) -> Self {
        match e {
            CorrelationError::Fault(detail) => ClientError::Fault {
                code: detail.code,
                message: detail.message,
            },
            other => ClientError::Correlation(other),
        }
    }
}

impl ClientError {
    pub fn fault_code(&self) -> Option<FaultCode> {
        match self {
            ClientError::Fault { code, .. } => Some(*code),
            _ => None,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Clone)]
pub struct BrokerLauncherClient {
    client: Arc<RequestClient>,
}

impl BrokerLauncherClient {
    pub fn new(client: Arc<RequestClient>) -> Self {
        Self { client }
    }

    pub fn request_client(&self) -> &Arc<RequestClient> {
        &self.client
    }

    pub async fn create(&self, info: SessionStartInfo, session_id: i32) -> ClientResult<BrokerInitializationResult> {
        self.call(commands::CREATE, vec![info.into_value()?, session_id.into_value()?])
            .await
    }

    pub async fn create_durable(
        &self,
        info: SessionStartInfo,
        session_id: i32,
    ) -> ClientResult<BrokerInitializationResult> {
        self.call(commands::CREATE_DURABLE, vec![info.into_value()?, session_id.into_value()?])
            .await
    }

    pub async fn attach(&self, session_id: i32) -> ClientResult<BrokerInitializationResult> {
        self.call(commands::ATTACH, vec![session_id.into_value()?]).await
    }

    pub async fn close(&self, session_id: i32) -> ClientResult<()> {
        self.call(commands::CLOSE, vec![session_id.into_value()?]).await
    }

    pub async fn ping_broker(&self, session_id: i32) -> ClientResult<bool> {
        self.call(commands::PING_BROKER, vec![session_id.into_value()?]).await
    }

    pub async fn get_active_broker_id_list(&self) -> ClientResult<Vec<i64>> {
        self.call(commands::GET_ACTIVE_BROKER_ID_LIST, Vec::new()).await
    }

    pub async fn submit_request(&self, session_id: i32, action: &str, body: Value) -> ClientResult<Value> {
        self.call(
            commands::SUBMIT_REQUEST,
            vec![session_id.into_value()?, Value::String(action.to_string()), body],
        )
        .await
    }

    async fn call<T: WireType>(&self, cmd_name: &str, parameters: Vec<Value>) -> ClientResult<T> {
        Ok(self.client.call(cmd_name, parameters).await?)
    }
}
