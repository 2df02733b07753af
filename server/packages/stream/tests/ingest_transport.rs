//! Tests for the transport-facing ingest driver: field-defaulting on
//! malformed payloads, transport failure propagation, and the closed-
//! aggregator stop condition.

use std::time::Duration;

use futures::stream;
use serde_json::json;
use tokio::time::sleep;

use roundtable_error::{ErrorType, RoundtableError};
use roundtable_events::UNKNOWN_AGENT;
use roundtable_stream::aggregator::{AggregatorConfig, StreamAggregator};
use roundtable_stream::ingest;

fn test_aggregator() -> StreamAggregator {
    StreamAggregator::with_config(AggregatorConfig {
        debounce: Duration::from_millis(20),
        idle_threshold: Duration::from_millis(500),
        sweep_interval: Duration::from_millis(100),
        finalize_grace: Duration::from_millis(80),
    })
}

#[tokio::test]
async fn malformed_payloads_degrade_to_the_unknown_bucket() {
    let aggregator = test_aggregator();
    let events = stream::iter(vec![
        Ok(json!({ "agent_type": "LEGAL", "token": "Hello" })),
        Ok(json!("not an object")),
        Ok(json!({ "token": "stray" })),
    ]);

    ingest::run(&aggregator, events).await.unwrap();
    sleep(Duration::from_millis(80)).await;

    let snapshot = aggregator.snapshot();
    assert_eq!(snapshot.get("LEGAL").map(|e| e.tokens.as_str()), Some("Hello"));
    assert_eq!(
        snapshot.get(UNKNOWN_AGENT).map(|e| e.tokens.as_str()),
        Some("stray")
    );

    aggregator.shutdown().await;
}

#[tokio::test]
async fn transport_failure_aborts_the_drive() {
    let aggregator = test_aggregator();
    let events = stream::iter(vec![
        Ok(json!({ "agent_type": "LEGAL", "token": "Hel" })),
        Err(RoundtableError::transport("connection reset")),
        Ok(json!({ "agent_type": "LEGAL", "token": "lo" })),
    ]);

    let err = ingest::run(&aggregator, events).await.unwrap_err();
    assert_eq!(err.error_type(), ErrorType::Transport);
    assert_eq!(err.error_type().as_urn(), "urn:roundtable:error:transport");

    // The fragment ahead of the failure was still ingested.
    sleep(Duration::from_millis(80)).await;
    let snapshot = aggregator.snapshot();
    assert_eq!(snapshot.get("LEGAL").map(|e| e.tokens.as_str()), Some("Hel"));

    aggregator.shutdown().await;
}

#[tokio::test]
async fn driving_a_closed_aggregator_stops_with_closed() {
    let aggregator = test_aggregator();
    aggregator.shutdown().await;

    let events = stream::iter(vec![Ok(json!({ "agent_type": "LEGAL", "token": "Hi" }))]);
    let err = ingest::run(&aggregator, events).await.unwrap_err();
    assert_eq!(err.error_type(), ErrorType::Closed);
    assert!(aggregator.snapshot().is_empty());
}
