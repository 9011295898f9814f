//! Contract Test: Fetch Backoff
//!
//! Constraints verified:
//! - Consecutive fetch failures back off 60s, doubling, capped at 3600s
//! - Transport and parse errors share the same backoff path
//! - One successful poll resets the delay to 60s
//! - A worker in a long backoff still stops promptly
//!
//! If this test fails, a broken feed either hammers its source or stalls.

mod common;

use common::*;
use newsrelay_core::{MemoryDefinitionStore, MemorySentStore, MonitorEvent, MonitorRegistry};
use std::sync::Arc;
use std::time::Duration;

fn is_fetch_outcome(event: &MonitorEvent) -> bool {
    matches!(
        event,
        MonitorEvent::FetchFailed { .. } | MonitorEvent::PollSucceeded { .. }
    )
}

#[tokio::test(start_paused = true)]
async fn failures_back_off_exponentially_and_reset_on_success() {
    let mut script: Vec<FetchStep> = (0..8)
        .map(|i| {
            if i % 3 == 2 {
                FetchStep::ParseError
            } else {
                FetchStep::TransportError
            }
        })
        .collect();
    script.push(FetchStep::Items(Vec::new()));
    script.push(FetchStep::TransportError);
    let source = ScriptedFeedSource::new(script);

    let (registry, mut events) = MonitorRegistry::new(
        source.clone(),
        RecordingTransport::new(),
        Arc::new(MemorySentStore::new()),
        Arc::new(MemoryDefinitionStore::new()),
        test_config(),
    )
    .unwrap();
    registry
        .create_feed("440", "https://hooks.example/abc")
        .await
        .unwrap();

    let mut delays = Vec::new();
    let mut last_at = tokio::time::Instant::now();
    let mut gaps = Vec::new();

    for _ in 0..10 {
        let event = wait_for_event(&mut events, Duration::from_secs(7200), is_fetch_outcome).await;
        let now = tokio::time::Instant::now();
        gaps.push((now - last_at).as_secs());
        last_at = now;

        match event {
            MonitorEvent::FetchFailed { retry_in, .. } => delays.push(retry_in.as_secs()),
            MonitorEvent::PollSucceeded { .. } => delays.push(0),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    // 0 marks the successful poll
    assert_eq!(
        delays,
        vec![60, 120, 240, 480, 960, 1920, 3600, 3600, 0, 60]
    );

    // Each fetch happened one announced delay after the previous one; the
    // failure after the success waited the fixed poll interval
    assert_eq!(
        gaps,
        vec![0, 60, 120, 240, 480, 960, 1920, 3600, 3600, 60]
    );
    assert_eq!(source.fetch_count(), 10);

    registry.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn stop_is_prompt_during_long_backoff() {
    let script = (0..7).map(|_| FetchStep::TransportError).collect();
    let source = ScriptedFeedSource::new(script);

    let (registry, mut events) = MonitorRegistry::new(
        source.clone(),
        RecordingTransport::new(),
        Arc::new(MemorySentStore::new()),
        Arc::new(MemoryDefinitionStore::new()),
        test_config(),
    )
    .unwrap();
    registry
        .create_feed("440", "https://hooks.example/abc")
        .await
        .unwrap();

    // Wait for the worker to enter the 3600s backoff
    wait_for_event(&mut events, Duration::from_secs(7200), |e| {
        matches!(e, MonitorEvent::FetchFailed { retry_in, .. } if *retry_in == Duration::from_secs(3600))
    })
    .await;

    let started = tokio::time::Instant::now();
    assert!(registry.stop_feed("440").await.unwrap());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(source.fetch_count(), 7);
}
