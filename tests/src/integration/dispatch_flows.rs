//! # Dispatch Flows
//!
//! Requests submitted to a session, dispatched to loopback backends and
//! completed back to the submitter.
//!
//! ```text
//! submit ──→ BrokerQueue ──→ Dispatcher ──→ BackendChannel
//!   ↑                            │
//!   └── ItemCompletion ←── QueueItemCompleter ←── ResponseHandler
//! ```
//!
//! ## Test Categories
//!
//! 1. **Happy Path**: echo through the full container
//! 2. **Backend Faults**: application faults and retry-requested faults
//! 3. **Communication Failures**: bounded retry, recovery and exhaustion
//! 4. **Preemption**: hand-off between dispatchers and last-dispatcher failure
//! 5. **Concurrency**: submits overlap on the backend while other commands stay responsive

#[cfg(test)]
mod tests {
    use crate::fixtures::{fast_config, start_info};
    use br_04_correlation::HandlerFault;
    use br_05_dispatcher::{
        CommunicationError, InMemoryResponseJournal, LoopbackTransport, Message, PREEMPTION_HEADER,
        RETRY_OPERATION_HEADER,
    };
    use broker_runtime::adapters::{BackendResolver, MetricsObserver};
    use broker_runtime::{BrokerConfig, BrokerContainer, BrokerLauncher, SessionBrokerLauncher};
    use shared_types::{FaultCode, Value};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::{Duration, Instant};
    use tokio_util::sync::CancellationToken;

    // =========================================================================
    // TEST FIXTURES
    // =========================================================================

    struct SessionHarness {
        launcher: SessionBrokerLauncher,
        observer: Arc<MetricsObserver>,
        journal: Arc<InMemoryResponseJournal>,
        _shutdown: CancellationToken,
    }

    /// A launcher whose sessions dispatch to `endpoints`, with the scripted
    /// backends registered under their service names.
    fn sessions(config: &BrokerConfig, backends: Vec<(&str, LoopbackTransport)>) -> SessionHarness {
        let resolver = Arc::new(BackendResolver::new(Duration::from_secs(60), Duration::from_secs(60)));
        for (service, transport) in backends {
            resolver.register_service(service, Arc::new(transport));
        }
        let observer = Arc::new(MetricsObserver::new());
        let journal = Arc::new(InMemoryResponseJournal::new());
        let shutdown = CancellationToken::new();
        let launcher = SessionBrokerLauncher::new(
            config.dispatcher.clone(),
            config.retry.clone(),
            resolver,
            observer.clone(),
            journal.clone(),
            &shutdown,
        );
        SessionHarness {
            launcher,
            observer,
            journal,
            _shutdown: shutdown,
        }
    }

    fn config_with(endpoints: &[&str]) -> BrokerConfig {
        let mut config = fast_config();
        config.dispatcher.backend_endpoints = endpoints.iter().map(|e| e.to_string()).collect();
        config
    }

    /// Backend that fails the first `failures` calls, then echoes.
    fn flaky(failures: u32, calls: Arc<AtomicU32>) -> LoopbackTransport {
        LoopbackTransport::new("loopback://flaky", move |request: Message| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < failures {
                    Err(CommunicationError::ChannelFaulted {
                        endpoint: "loopback://flaky".into(),
                        reason: "connection reset".into(),
                    })
                } else {
                    let body = request.body.clone();
                    Ok(Message::reply_to(&request, body))
                }
            }
        })
    }

    fn fault_code(result: Result<Value, HandlerFault>) -> FaultCode {
        match result {
            Err(HandlerFault::Fault(detail)) => detail.code,
            other => panic!("expected fault, got {:?}", other),
        }
    }

    // =========================================================================
    // HAPPY PATH
    // =========================================================================

    #[tokio::test]
    async fn test_submit_through_container_echoes() {
        let container = BrokerContainer::build(fast_config()).await.unwrap();
        container.start();
        let client = container.client();

        let init = client.create(start_info("CcpEcho"), 1).await.unwrap();
        assert!(!init.broker_unique_id.is_empty());
        assert_eq!(init.broker_epr, vec!["broker://CcpEcho/1".to_string()]);

        let reply = client
            .submit_request(1, "Echo", Value::String("ping".into()))
            .await
            .unwrap();
        assert_eq!(reply, Value::String("ping".into()));
        assert_eq!(container.observer().usage("test-user").completed, 1);
        let metrics = container.render_metrics().unwrap();
        assert!(metrics.contains("broker_dispatcher_backend_call_duration_seconds"));
        assert!(metrics.contains("broker_dispatcher_requests_completed_total"));

        assert_eq!(client.get_active_broker_id_list().await.unwrap(), vec![1]);
        client.close(1).await.unwrap();
        assert!(!client.ping_broker(1).await.unwrap());
        container.shutdown().await;
    }

    #[tokio::test]
    async fn test_durable_session_journals_disposition() {
        let container = BrokerContainer::build(fast_config()).await.unwrap();
        container.start();
        let client = container.client();

        let init = client.create_durable(start_info("CcpEcho"), 3).await.unwrap();
        assert!(init.supports_message_details);
        client.submit_request(3, "Echo", Value::Int64(7)).await.unwrap();

        assert_eq!(container.journal().len(), 1);
        container.shutdown().await;
    }

    // =========================================================================
    // BACKEND FAULTS
    // =========================================================================

    #[tokio::test]
    async fn test_backend_fault_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let backend = LoopbackTransport::new("loopback://faulty", move |request: Message| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, CommunicationError>(Message::fault_reply(&request, "divide by zero")) }
        });
        let harness = sessions(&config_with(&["loopback://faulty"]), vec![("faulty", backend)]);
        harness.launcher.create(start_info("Calc"), 1).await.unwrap();

        let result = harness.launcher.submit_request(1, "Divide".into(), Value::Int64(0)).await;

        match result {
            Err(HandlerFault::Fault(detail)) => {
                assert_eq!(detail.code, FaultCode::ApplicationFault);
                assert_eq!(detail.message, "divide by zero");
            }
            other => panic!("expected fault, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(harness.observer.usage("test-user").faulted, 1);
        harness.launcher.close_all().await;
    }

    #[tokio::test]
    async fn test_retry_requested_fault_redispatches() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let backend = LoopbackTransport::new("loopback://busy", move |request: Message| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                let reply = if n < 3 {
                    Message::fault_reply(&request, "try again").with_header(RETRY_OPERATION_HEADER, "true")
                } else {
                    Message::reply_to(&request, Value::String("done".into()))
                };
                Ok::<_, CommunicationError>(reply)
            }
        });
        // Three retry requests exceed the message retry limit of two.
        let harness = sessions(&config_with(&["loopback://busy"]), vec![("busy", backend)]);
        harness.launcher.create(start_info("Busy"), 1).await.unwrap();

        let reply = harness.launcher.submit_request(1, "Work".into(), Value::Null).await.unwrap();

        assert_eq!(reply, Value::String("done".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        harness.launcher.close_all().await;
    }

    // =========================================================================
    // COMMUNICATION FAILURES
    // =========================================================================

    #[tokio::test]
    async fn test_transient_failures_recover() {
        let calls = Arc::new(AtomicU32::new(0));
        let harness = sessions(
            &config_with(&["loopback://flaky"]),
            vec![("flaky", flaky(1, Arc::clone(&calls)))],
        );
        harness.launcher.create(start_info("Flaky"), 1).await.unwrap();

        let reply = harness
            .launcher
            .submit_request(1, "Echo".into(), Value::String("ok".into()))
            .await
            .unwrap();

        assert_eq!(reply, Value::String("ok".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        harness.launcher.close_all().await;
    }

    #[tokio::test]
    async fn test_communication_failures_exhaust_retry_bound() {
        let calls = Arc::new(AtomicU32::new(0));
        let harness = sessions(
            &config_with(&["loopback://flaky"]),
            vec![("flaky", flaky(u32::MAX, Arc::clone(&calls)))],
        );
        harness.launcher.create(start_info("Down"), 1).await.unwrap();

        let result = harness.launcher.submit_request(1, "Echo".into(), Value::Null).await;

        assert_eq!(fault_code(result), FaultCode::CommunicationExhausted);
        // Two attempts per dispatch cycle, two cycles.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(harness.journal.is_empty());
        harness.launcher.close_all().await;
    }

    #[tokio::test]
    async fn test_backend_that_never_connects_fails_session() {
        let backend = LoopbackTransport::echo("loopback://unreachable");
        backend.fail_next_connects(u32::MAX);
        let harness = sessions(&config_with(&["loopback://unreachable"]), vec![("unreachable", backend)]);
        harness.launcher.create(start_info("Gone"), 1).await.unwrap();

        let result = harness.launcher.submit_request(1, "Echo".into(), Value::Null).await;

        assert_eq!(fault_code(result), FaultCode::CommunicationExhausted);
        let session = harness.launcher.session(1).unwrap();
        assert!(!session.is_alive());
        assert!(!harness.launcher.ping_broker(1).await.unwrap());
        harness.launcher.close_all().await;
    }

    // =========================================================================
    // PREEMPTION
    // =========================================================================

    fn preempting(calls: Arc<AtomicU32>) -> LoopbackTransport {
        LoopbackTransport::new("loopback://preempting", move |request: Message| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok::<_, CommunicationError>(
                    Message::fault_reply(&request, "node reclaimed").with_header(PREEMPTION_HEADER, "true"),
                )
            }
        })
    }

    #[tokio::test]
    async fn test_preempted_request_completes_on_other_backend() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = config_with(&["loopback://preempting", "loopback://echo"]);
        let harness = sessions(&config, vec![("preempting", preempting(Arc::clone(&calls)))]);
        harness.launcher.create(start_info("Mixed"), 1).await.unwrap();

        for i in 0..4 {
            let reply = harness
                .launcher
                .submit_request(1, "Echo".into(), Value::Int64(i))
                .await
                .unwrap();
            assert_eq!(reply, Value::Int64(i));
        }

        // The preempting backend stops after its first preemption.
        assert!(calls.load(Ordering::SeqCst) <= 1);
        assert!(harness.launcher.session(1).unwrap().is_alive());
        harness.launcher.close_all().await;
    }

    #[tokio::test]
    async fn test_preemption_of_last_dispatcher_fails_request() {
        let calls = Arc::new(AtomicU32::new(0));
        let harness = sessions(
            &config_with(&["loopback://preempting"]),
            vec![("preempting", preempting(Arc::clone(&calls)))],
        );
        harness.launcher.create(start_info("Spot"), 1).await.unwrap();

        let result = harness.launcher.submit_request(1, "Echo".into(), Value::Null).await;

        assert_eq!(fault_code(result), FaultCode::CommunicationExhausted);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(harness.launcher.session(1).unwrap().dispatchers()[0].is_service_preempted());

        let refused = harness.launcher.submit_request(1, "Echo".into(), Value::Null).await;
        assert_eq!(fault_code(refused), FaultCode::CommunicationExhausted);
        harness.launcher.close_all().await;
    }

    // =========================================================================
    // CONCURRENCY
    // =========================================================================

    #[tokio::test]
    async fn test_concurrent_submits_overlap_and_ping_stays_responsive() {
        const CALL: Duration = Duration::from_millis(600);
        let mut config = config_with(&["loopback://slow"]);
        config.dispatcher.supports_concurrent_calls = true;
        config.dispatcher.backend_call_timeout_ms = 5_000;
        let container = BrokerContainer::build(config).await.unwrap();
        container.resolver().register_service(
            "slow",
            Arc::new(LoopbackTransport::new("loopback://slow", |request: Message| async move {
                tokio::time::sleep(CALL).await;
                let body = request.body.clone();
                Ok::<_, CommunicationError>(Message::reply_to(&request, body))
            })),
        );
        container.start();
        let client = container.client().clone();
        client.create(start_info("Slow"), 2).await.unwrap();

        let started = Instant::now();
        let submits: Vec<_> = (0..3)
            .map(|i| {
                let client = client.clone();
                tokio::spawn(async move {
                    let reply = client.submit_request(2, "Echo", Value::Int64(i)).await;
                    (i, reply, started.elapsed())
                })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let ping_started = Instant::now();
        assert!(client.ping_broker(2).await.unwrap());
        let ping_latency = ping_started.elapsed();
        assert!(ping_latency < CALL / 2, "ping waited {ping_latency:?} behind submits");

        for submit in submits {
            let (i, reply, elapsed) = submit.await.unwrap();
            assert_eq!(reply.unwrap(), Value::Int64(i));
            assert!(elapsed < CALL * 2, "submit {i} finished after {elapsed:?}");
        }
        container.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_answers_inflight_submit_over_queues() {
        let mut config = config_with(&["loopback://stalled"]);
        config.dispatcher.backend_call_timeout_ms = 30_000;
        let container = BrokerContainer::build(config).await.unwrap();
        container.resolver().register_service(
            "stalled",
            Arc::new(LoopbackTransport::new("loopback://stalled", |request: Message| async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, CommunicationError>(Message::reply_to(&request, Value::Null))
            })),
        );
        container.start();
        let client = container.client().clone();
        client.create(start_info("Stalled"), 1).await.unwrap();

        let submit = tokio::spawn({
            let client = client.clone();
            async move { client.submit_request(1, "Echo", Value::Null).await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        let started = Instant::now();
        container.shutdown().await;
        assert!(started.elapsed() < Duration::from_secs(5), "shutdown took {:?}", started.elapsed());

        // The response listener has stopped, so the cancellation fault waits
        // in the response queue for the next broker's client.
        let responses = container
            .memory_queues()
            .peek_visible(&container.config.queue.response_queue_name);
        assert_eq!(responses.len(), 1);
        assert!(responses[0].contains("Cancelled"), "{}", responses[0]);
        submit.abort();
    }

    // =========================================================================
    // SESSION LIFECYCLE
    // =========================================================================

    #[tokio::test]
    async fn test_close_cancels_waiting_requests() {
        let backend = LoopbackTransport::new("loopback://slow", |request: Message| async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, CommunicationError>(Message::reply_to(&request, Value::Null))
        });
        let mut config = config_with(&["loopback://slow"]);
        config.dispatcher.max_concurrent_calls = 1;
        let harness = Arc::new(sessions(&config, vec![("slow", backend)]));
        harness.launcher.create(start_info("Slow"), 1).await.unwrap();

        let submits: Vec<_> = (0..3)
            .map(|i| {
                let harness = Arc::clone(&harness);
                tokio::spawn(async move { harness.launcher.submit_request(1, "Echo".into(), Value::Int64(i)).await })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(50)).await;
        harness.launcher.close(1).await.unwrap();

        let mut cancelled = 0;
        for submit in submits {
            if let Err(HandlerFault::Fault(detail)) = submit.await.unwrap() {
                if detail.code == FaultCode::Cancelled {
                    cancelled += 1;
                }
            }
        }
        assert!(cancelled >= 2, "only {cancelled} requests cancelled");
        assert!(harness.launcher.session(1).is_none());
    }
}
