//! Binds launcher commands to a [`BrokerLauncher`].
//!
//! `SubmitRequest` waits on backend dispatch, so it is detached from the
//! request listener. The other commands answer from session state and run
//! inline.

use super::protocol::{commands, BrokerLauncher};
use br_04_correlation::{HandlerFault, RequestServer};
use shared_types::{CommandEnvelope, FaultCode, Value, WireType};
use std::future::Future;
use std::sync::Arc;

/// Register a handler for every launcher command on `server`.
pub fn bind_launcher(server: &mut RequestServer, launcher: Arc<dyn BrokerLauncher>) -> &mut RequestServer {
    bind(server, commands::CREATE, &launcher, |l, cmd| async move {
        l.create(cmd.unpack(0)?, cmd.unpack(1)?).await
    });
    bind(server, commands::CREATE_DURABLE, &launcher, |l, cmd| async move {
        l.create_durable(cmd.unpack(0)?, cmd.unpack(1)?).await
    });
    bind(server, commands::ATTACH, &launcher, |l, cmd| async move {
        l.attach(cmd.unpack(0)?).await
    });
    bind(server, commands::CLOSE, &launcher, |l, cmd| async move {
        l.close(cmd.unpack(0)?).await
    });
    bind(server, commands::PING_BROKER, &launcher, |l, cmd| async move {
        l.ping_broker(cmd.unpack(0)?).await
    });
    bind(server, commands::GET_ACTIVE_BROKER_ID_LIST, &launcher, |l, _cmd| async move {
        l.get_active_broker_id_list().await
    });
    bind(server, commands::SUBMIT_REQUEST, &launcher, |l, cmd| async move {
        l.submit_request(cmd.unpack(0)?, cmd.unpack(1)?, cmd.unpack(2)?).await
    })
    .detach(commands::SUBMIT_REQUEST)
}

fn bind<'s, R, F, Fut>(
    server: &'s mut RequestServer,
    cmd_name: &str,
    launcher: &Arc<dyn BrokerLauncher>,
    call: F,
) -> &'s mut RequestServer
where
    R: WireType,
    F: Fn(Arc<dyn BrokerLauncher>, CommandEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, HandlerFault>> + Send + 'static,
{
    let launcher = Arc::clone(launcher);
    server.register_fn(cmd_name, move |cmd| {
        let pending = call(Arc::clone(&launcher), cmd);
        async move { encode(pending.await?) }
    })
}

fn encode<R: WireType>(result: R) -> Result<Value, HandlerFault> {
    result
        .into_value()
        .map_err(|e| HandlerFault::new(FaultCode::HandlerFailed, e.to_string()))
}
