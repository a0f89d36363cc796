//! # Launcher Command Flows
//!
//! Drives the launcher command set end to end over the in-memory queues:
//!
//! ```text
//! BrokerLauncherClient ──→ [requests] ──→ RequestServer ──→ ScriptedLauncher
//!          ↑                                                      │
//!          └──── CorrelationTable ←── [responses] ←───────────────┘
//! ```
//!
//! ## Test Categories
//!
//! 1. **Happy Path**: typed results for every command
//! 2. **Faults**: handler faults come back as typed client errors
//! 3. **Correlation**: concurrent requests, unknown and duplicate responses
//! 4. **Timeouts**: abandoned requests leave the table

#[cfg(test)]
mod tests {
    use crate::fixtures::{eventually, start_info, HarnessSettings, LauncherHarness, ScriptedLauncher, RESPONSE_QUEUE};
    use br_03_queue_transport::poison_queue_name;
    use br_04_correlation::CorrelationError;
    use broker_runtime::ClientError;
    use shared_types::{CommandEnvelope, FaultCode, RequestId, ResponseBody, ResponseEnvelope, Value};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    async fn harness(launcher: Arc<ScriptedLauncher>) -> LauncherHarness {
        LauncherHarness::start(launcher, HarnessSettings::default())
            .await
            .unwrap()
    }

    // =========================================================================
    // HAPPY PATH
    // =========================================================================

    #[tokio::test]
    async fn test_create_returns_broker_unique_id() {
        let launcher = Arc::new(ScriptedLauncher::new("X"));
        let harness = harness(Arc::clone(&launcher)).await;

        let result = harness.client.create(start_info("CcpEcho"), 10).await.unwrap();

        assert_eq!(result.broker_unique_id, "X");
        assert_eq!(launcher.calls(), vec![("Create".to_string(), 10)]);
        assert_eq!(launcher.created()[0].service_name, "CcpEcho");
        assert_eq!(harness.table.pending_count(), 0);
        harness.stop().await;
    }

    #[tokio::test]
    async fn test_every_command_round_trips() {
        let launcher = Arc::new(ScriptedLauncher::new("B-1"));
        let harness = harness(Arc::clone(&launcher)).await;
        let client = &harness.client;

        client.create_durable(start_info("Durable"), 4).await.unwrap();
        assert_eq!(client.attach(4).await.unwrap().broker_unique_id, "B-1");
        assert!(client.ping_broker(4).await.unwrap());
        assert!(!client.ping_broker(5).await.unwrap());
        assert_eq!(client.get_active_broker_id_list().await.unwrap(), vec![4]);
        let echoed = client
            .submit_request(4, "Echo", Value::String("hello".into()))
            .await
            .unwrap();
        assert_eq!(echoed, Value::String("hello".into()));
        client.close(4).await.unwrap();

        let commands: Vec<String> = launcher.calls().into_iter().map(|(cmd, _)| cmd).collect();
        assert_eq!(
            commands,
            vec!["CreateDurable", "Attach", "PingBroker", "PingBroker", "SubmitRequest", "Close"]
        );
        harness.stop().await;
    }

    // =========================================================================
    // FAULTS
    // =========================================================================

    #[tokio::test]
    async fn test_handler_fault_reaches_client() {
        let harness = harness(Arc::new(ScriptedLauncher::new("X"))).await;

        let err = harness.client.attach(99).await.unwrap_err();

        assert_eq!(err.fault_code(), Some(FaultCode::ApplicationFault));
        match err {
            ClientError::Fault { message, .. } => assert!(message.contains("99")),
            other => panic!("expected fault, got {:?}", other),
        }
        assert_eq!(harness.table.pending_count(), 0);
        harness.stop().await;
    }

    #[tokio::test]
    async fn test_submit_fault_is_application_fault() {
        let harness = harness(Arc::new(ScriptedLauncher::new("X"))).await;

        let err = harness
            .client
            .submit_request(1, "Fail", Value::Null)
            .await
            .unwrap_err();

        assert_eq!(err.fault_code(), Some(FaultCode::ApplicationFault));
        harness.stop().await;
    }

    #[tokio::test]
    async fn test_non_finite_parameter_refused_before_send() {
        let harness = harness(Arc::new(ScriptedLauncher::new("X"))).await;

        let err = harness
            .client
            .submit_request(2, "Echo", Value::Float64(f64::NAN))
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::Correlation(CorrelationError::Send(_))), "{err:?}");
        assert_eq!(harness.table.pending_count(), 0);
        assert!(harness.client.ping_broker(2).await.unwrap());
        harness.stop().await;
    }

    // =========================================================================
    // CORRELATION
    // =========================================================================

    #[tokio::test]
    async fn test_concurrent_requests_resolve_to_their_own_responses() {
        let harness = harness(Arc::new(ScriptedLauncher::new("X"))).await;

        let calls: Vec<_> = (0..16)
            .map(|session_id| {
                let client = harness.client.clone();
                tokio::spawn(async move { (session_id, client.ping_broker(session_id).await) })
            })
            .collect();

        for call in calls {
            let (session_id, result) = call.await.unwrap();
            assert_eq!(result.unwrap(), session_id % 2 == 0, "session {session_id}");
        }
        assert_eq!(harness.table.pending_count(), 0);
        harness.stop().await;
    }

    #[tokio::test]
    async fn test_unknown_request_id_is_dead_lettered() {
        let harness = harness(Arc::new(ScriptedLauncher::new("X"))).await;
        let stray = ResponseEnvelope {
            version: CommandEnvelope::CURRENT_VERSION,
            request_id: RequestId::new(),
            cmd_name: "PingBroker".to_string(),
            response: ResponseBody::Value(Value::Bool(true)),
        };

        harness.response_writer.write(&stray).await.unwrap();

        let poison = poison_queue_name(RESPONSE_QUEUE);
        assert!(eventually(Duration::from_secs(3), || harness.memory.len(&poison) == 1).await);
        assert!(harness.response_listener.stats().handler_failures.load(Ordering::Relaxed) >= 1);
        assert!(harness.table.stats().protocol_violations.load(Ordering::Relaxed) >= 1);

        // Real traffic is unaffected.
        assert!(harness.client.ping_broker(2).await.unwrap());
        harness.stop().await;
    }

    #[tokio::test]
    async fn test_second_response_for_completed_request_rejected() {
        let harness = harness(Arc::new(ScriptedLauncher::new("X"))).await;
        let pending = harness
            .client
            .request_client()
            .start_request::<bool>("PingBroker", vec![Value::Int64(2)])
            .await
            .unwrap();
        let request_id = pending.request_id();
        assert!(pending.wait().await.unwrap());

        let replay = ResponseEnvelope {
            version: CommandEnvelope::CURRENT_VERSION,
            request_id,
            cmd_name: "PingBroker".to_string(),
            response: ResponseBody::Value(Value::Bool(false)),
        };
        assert!(matches!(
            harness.table.receive_response(replay),
            Err(CorrelationError::UnknownRequestId { .. })
        ));
        harness.stop().await;
    }

    // =========================================================================
    // TIMEOUTS
    // =========================================================================

    #[tokio::test]
    async fn test_unanswered_request_times_out_and_leaves_table() {
        let launcher = Arc::new(ScriptedLauncher::new("X").with_ping_delay(Duration::from_millis(500)));
        let settings = HarnessSettings {
            request_timeout: Duration::from_millis(50),
            ..HarnessSettings::default()
        };
        let harness = LauncherHarness::start(launcher, settings).await.unwrap();

        let err = harness.client.ping_broker(2).await.unwrap_err();

        assert!(matches!(err, ClientError::Correlation(CorrelationError::Timeout { .. })));
        assert_eq!(harness.table.pending_count(), 0);
        harness.stop().await;
    }
}
