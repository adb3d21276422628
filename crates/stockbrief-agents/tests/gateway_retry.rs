//! Retry and concurrency behaviour of the gateway against a scripted transport.

use std::sync::Arc;
use std::time::Duration;

use stockbrief_agents::test_support::{
    sample_payload, test_gateway_config, RecordingClock, ScriptedTransport,
};
use stockbrief_agents::{GatewayError, LlmGateway, TransportError};
use stockbrief_models::config::{GatewayConfig, RetryConfig};
use stockbrief_models::section::SectionKind;

fn rate_limited() -> TransportError {
    TransportError::RateLimited {
        retry_after: None,
        message: "rate_limit_error".to_string(),
    }
}

#[tokio::test]
async fn always_rate_limited_makes_exactly_max_attempts() {
    for max_attempts in [1, 3, 5] {
        let transport = Arc::new(ScriptedTransport::new());
        transport.always_fail(SectionKind::Overview, rate_limited());
        let clock = Arc::new(RecordingClock::default());
        let gateway = LlmGateway::with_clock(
            transport.clone(),
            clock.clone(),
            &test_gateway_config(max_attempts),
        );

        let err = gateway
            .invoke(&sample_payload(SectionKind::Overview), Duration::from_secs(5))
            .await
            .unwrap_err();

        assert_eq!(
            err,
            GatewayError::RateLimited {
                attempts: max_attempts,
                message: "rate_limit_error".to_string()
            }
        );
        assert_eq!(transport.calls(SectionKind::Overview), max_attempts);

        let delays = clock.delays();
        assert_eq!(delays.len() as u32, max_attempts - 1);
        assert!(
            delays.windows(2).all(|w| w[0] <= w[1]),
            "delays decreased: {delays:?}"
        );
    }
}

#[tokio::test]
async fn backoff_grows_and_is_capped() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.always_fail(SectionKind::Technical, rate_limited());
    let clock = Arc::new(RecordingClock::default());
    let config = GatewayConfig {
        requests_per_minute: None,
        retry: RetryConfig {
            max_attempts: 8,
            base_delay_ms: 1_000,
            max_delay_ms: 10_000,
            jitter_ratio: 1.0,
        },
        ..GatewayConfig::default()
    };
    let gateway = LlmGateway::with_clock(transport.clone(), clock.clone(), &config);

    let _ = gateway
        .invoke(&sample_payload(SectionKind::Technical), Duration::from_secs(5))
        .await;

    let delays = clock.delays();
    assert_eq!(delays.len(), 7);
    // first retry waits between base and twice base
    assert!(delays[0] >= Duration::from_secs(1) && delays[0] < Duration::from_secs(2));
    assert!(delays.iter().all(|d| *d <= Duration::from_secs(10)));
    assert_eq!(delays[6], Duration::from_secs(10));
    assert!(delays.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn retry_after_hint_holds_for_later_retries() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.fail_next(
        SectionKind::Overview,
        vec![
            TransportError::RateLimited {
                retry_after: Some(Duration::from_secs(10)),
                message: "slow down".to_string(),
            },
            rate_limited(),
            rate_limited(),
        ],
    );
    let clock = Arc::new(RecordingClock::default());
    let gateway = LlmGateway::with_clock(transport.clone(), clock.clone(), &test_gateway_config(4));

    let response = gateway
        .invoke(&sample_payload(SectionKind::Overview), Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(response.attempts, 4);

    let delays = clock.delays();
    assert_eq!(delays.len(), 3);
    assert_eq!(delays[0], Duration::from_secs(10));
    assert!(
        delays.windows(2).all(|w| w[0] <= w[1]),
        "delays decreased: {delays:?}"
    );
}

#[tokio::test]
async fn server_errors_exhaust_to_unavailable() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.always_fail(
        SectionKind::Financials,
        TransportError::Server {
            status: 529,
            message: "overloaded_error".to_string(),
        },
    );
    let clock = Arc::new(RecordingClock::default());
    let gateway = LlmGateway::with_clock(transport.clone(), clock, &test_gateway_config(3));

    let err = gateway
        .invoke(&sample_payload(SectionKind::Financials), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Unavailable { attempts: 3, .. }));
    assert!(err.to_string().contains("HTTP 529"));
}

#[tokio::test]
async fn invalid_request_fails_immediately() {
    let transport = Arc::new(ScriptedTransport::new());
    transport.always_fail(
        SectionKind::Sentiment,
        TransportError::InvalidRequest("max_tokens too large".to_string()),
    );
    let clock = Arc::new(RecordingClock::default());
    let gateway = LlmGateway::with_clock(transport.clone(), clock.clone(), &test_gateway_config(3));

    let err = gateway
        .invoke(&sample_payload(SectionKind::Sentiment), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert_eq!(err, GatewayError::InvalidRequest("max_tokens too large".to_string()));
    assert_eq!(err.attempts(), 1);
    assert_eq!(transport.calls(SectionKind::Sentiment), 1);
    assert!(clock.delays().is_empty());
}

#[tokio::test(start_paused = true)]
async fn excess_requests_queue_behind_max_in_flight() {
    let transport = Arc::new(ScriptedTransport::new());
    for kind in SectionKind::ALL {
        transport.set_latency(kind, Duration::from_millis(500));
    }
    let config = GatewayConfig {
        max_in_flight: 2,
        ..test_gateway_config(1)
    };
    let gateway = Arc::new(LlmGateway::with_clock(
        transport.clone(),
        Arc::new(RecordingClock::default()),
        &config,
    ));

    let mut handles = Vec::new();
    for kind in SectionKind::ALL {
        let gateway = Arc::clone(&gateway);
        handles.push(tokio::spawn(async move {
            gateway
                .invoke(&sample_payload(kind), Duration::from_secs(5))
                .await
        }));
    }
    for handle in handles {
        assert!(handle.await.unwrap().is_ok());
    }

    assert_eq!(transport.total_calls(), 7);
    assert_eq!(transport.peak_in_flight(), 2);
}

#[tokio::test(start_paused = true)]
async fn pacing_disabled_when_unset() {
    let transport = Arc::new(ScriptedTransport::new());
    let config = GatewayConfig {
        max_in_flight: 8,
        ..test_gateway_config(1)
    };
    let gateway = LlmGateway::with_clock(
        transport.clone(),
        Arc::new(RecordingClock::default()),
        &config,
    );
    for _ in 0..30 {
        gateway
            .invoke(&sample_payload(SectionKind::Overview), Duration::from_secs(5))
            .await
            .unwrap();
    }
    assert_eq!(transport.calls(SectionKind::Overview), 30);
}
