//! # Recovery Flows
//!
//! The launcher queues are the only durable state. These flows check that
//! work survives a broker that dies mid-message and that bad input is set
//! aside instead of blocking the queue.
//!
//! ## Test Categories
//!
//! 1. **Restart**: a leased command is served by the next broker instance
//! 2. **Poison Input**: undecodable commands are dead-lettered
//! 3. **Shutdown**: sessions close and in-flight submits are cancelled

#[cfg(test)]
mod tests {
    use crate::fixtures::{eventually, fast_config, start_info};
    use br_01_serializer::Serializer;
    use br_03_queue_transport::{poison_queue_name, DurableQueueStore, InMemoryQueueService};
    use br_04_correlation::HandlerFault;
    use br_05_dispatcher::{CommunicationError, LoopbackTransport, Message};
    use broker_runtime::BrokerContainer;
    use shared_types::{CommandEnvelope, FaultCode, Value, WireType};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_leased_command_served_after_restart() {
        let config = fast_config();
        let memory = InMemoryQueueService::new(config.queue.visibility_timeout());
        let request_queue = config.queue.request_queue_name.clone();

        // Broker B is built but not yet listening; its client writes the command.
        let broker = BrokerContainer::build_with_memory(config.clone(), memory.clone())
            .await
            .unwrap();
        let client = broker.client().clone();
        let call = tokio::spawn(async move { client.create(start_info("CcpEcho"), 7).await });
        assert!(eventually(Duration::from_secs(2), || memory.len(&request_queue) == 1).await);

        // Broker A takes the command and dies before handling it.
        let crashed = memory.store(&request_queue);
        let leased = crashed.dequeue_batch(10).await.unwrap();
        assert_eq!(leased.len(), 1);
        drop(leased);

        broker.start();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(broker.launcher().session(7).is_none(), "served while still leased");

        let result = call.await.unwrap().unwrap();
        assert!(!result.broker_unique_id.is_empty());
        assert!(broker.launcher().session(7).is_some());
        assert!(eventually(Duration::from_secs(1), || memory.len(&request_queue) == 0).await);
        broker.shutdown().await;
    }

    #[tokio::test]
    async fn test_restarted_broker_shares_queues() {
        let config = fast_config();
        let memory = InMemoryQueueService::new(config.queue.visibility_timeout());

        let first = BrokerContainer::build_with_memory(config.clone(), memory.clone())
            .await
            .unwrap();
        first.start();
        first.client().create(start_info("CcpEcho"), 1).await.unwrap();
        first.shutdown().await;

        // Commands written while no broker listens wait in the queue.
        let second = BrokerContainer::build_with_memory(config.clone(), memory.clone())
            .await
            .unwrap();
        let client = second.client().clone();
        let call = tokio::spawn(async move { client.create(start_info("CcpEcho"), 2).await });
        assert!(eventually(Duration::from_secs(2), || memory.len(&config.queue.request_queue_name) == 1).await);

        second.start();
        call.await.unwrap().unwrap();
        assert_eq!(second.client().get_active_broker_id_list().await.unwrap(), vec![2]);
        second.shutdown().await;
    }

    #[tokio::test]
    async fn test_undecodable_command_dead_lettered() {
        let config = fast_config();
        let broker = BrokerContainer::build(config.clone()).await.unwrap();
        let memory = broker.memory_queues().clone();
        let request_queue = config.queue.request_queue_name.clone();

        let raw = memory.store(&request_queue);
        raw.create_if_not_exists().await.unwrap();
        raw.enqueue("{\"not\":\"an envelope\"".to_string()).await.unwrap();
        broker.start();

        let poison = poison_queue_name(&request_queue);
        assert!(eventually(Duration::from_secs(2), || memory.len(&poison) == 1).await);
        assert!(broker.client().ping_broker(1).await.is_ok());
        broker.shutdown().await;
    }

    #[tokio::test]
    async fn test_unbound_command_type_dead_lettered() {
        let config = fast_config();
        let broker = BrokerContainer::build(config.clone()).await.unwrap();
        let memory = broker.memory_queues().clone();
        let request_queue = config.queue.request_queue_name.clone();

        // Well-formed JSON carrying an object type outside the allow-list.
        let command = CommandEnvelope::new(
            "Create",
            vec![start_info("CcpEcho").into_value().unwrap(), Value::Int64(1)],
        );
        let payload = Serializer::default()
            .serialize(&command)
            .unwrap()
            .replace("SessionStartInfo", "ShellCommand");
        assert!(payload.contains("ShellCommand"));
        let raw = memory.store(&request_queue);
        raw.create_if_not_exists().await.unwrap();
        raw.enqueue(payload).await.unwrap();
        broker.start();

        let poison = poison_queue_name(&request_queue);
        assert!(eventually(Duration::from_secs(2), || memory.len(&poison) == 1).await);
        assert_eq!(broker.launcher().session_count(), 0);
        broker.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_cancels_inflight_submit() {
        let mut config = fast_config();
        config.dispatcher.backend_endpoints = vec!["loopback://stalled".to_string()];
        let broker = BrokerContainer::build(config).await.unwrap();
        broker.resolver().register_service(
            "stalled",
            Arc::new(LoopbackTransport::new("loopback://stalled", |request: Message| async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, CommunicationError>(Message::reply_to(&request, Value::Null))
            })),
        );
        broker.start();
        broker.client().create(start_info("Stalled"), 1).await.unwrap();

        let session = broker.launcher().session(1).unwrap();
        let submit = tokio::spawn(async move { session.submit("Echo".to_string(), Value::Null).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        broker.shutdown().await;

        match submit.await.unwrap() {
            Err(HandlerFault::Fault(detail)) => assert_eq!(detail.code, FaultCode::Cancelled),
            other => panic!("expected cancellation, got {:?}", other),
        }
        assert_eq!(broker.launcher().session_count(), 0);
    }
}
