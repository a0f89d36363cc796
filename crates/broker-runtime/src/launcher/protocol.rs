//! Launcher command names, response types and the service trait.

use async_trait::async_trait;
use br_04_correlation::{CommandRegistry, HandlerFault};
use shared_types::{BrokerInitializationResult, SessionStartInfo, Value};

pub mod commands {
    pub const CREATE: &str = "Create";
    pub const CREATE_DURABLE: &str = "CreateDurable";
    pub const ATTACH: &str = "Attach";
    pub const CLOSE: &str = "Close";
    pub const PING_BROKER: &str = "PingBroker";
    pub const GET_ACTIVE_BROKER_ID_LIST: &str = "GetActiveBrokerIdList";
    pub const SUBMIT_REQUEST: &str = "SubmitRequest";
}

/// Response type of every launcher command.
pub fn launcher_registry() -> CommandRegistry {
    CommandRegistry::new()
        .with_response_type::<BrokerInitializationResult>(commands::CREATE)
        .with_response_type::<BrokerInitializationResult>(commands::CREATE_DURABLE)
        .with_response_type::<BrokerInitializationResult>(commands::ATTACH)
        .with_response_type::<()>(commands::CLOSE)
        .with_response_type::<bool>(commands::PING_BROKER)
        .with_response_type::<Vec<i64>>(commands::GET_ACTIVE_BROKER_ID_LIST)
        .with_response_type::<Value>(commands::SUBMIT_REQUEST)
}

/// Broker launcher service.
#[async_trait]
pub trait BrokerLauncher: Send + Sync {
    async fn create(&self, info: SessionStartInfo, session_id: i32) -> Result<BrokerInitializationResult, HandlerFault>;

    async fn create_durable(
        &self,
        info: SessionStartInfo,
        session_id: i32,
    ) -> Result<BrokerInitializationResult, HandlerFault>;

    async fn attach(&self, session_id: i32) -> Result<BrokerInitializationResult, HandlerFault>;

    async fn close(&self, session_id: i32) -> Result<(), HandlerFault>;

    async fn ping_broker(&self, session_id: i32) -> Result<bool, HandlerFault>;

    async fn get_active_broker_id_list(&self) -> Result<Vec<i64>, HandlerFault>;

    /// Run one request through the session's dispatchers and return the
    /// backend reply body.
    async fn submit_request(&self, session_id: i32, action: String, body: Value) -> Result<Value, HandlerFault>;
}
