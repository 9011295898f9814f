//! Test doubles and common utilities for contract tests
//!
//! The doubles count and record every call so tests can assert on what the
//! registry and its workers actually did.

#![allow(dead_code)]

use newsrelay_core::error::{Error, Result};
use newsrelay_core::traits::{FeedSource, SentStore, StateObserver, WebhookTransport};
use newsrelay_core::{
    FeedItem, FeedState, MemorySentStore, MonitorEvent, RelayConfig, SentArticleRecord,
    WebhookPayload,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// One scripted answer of [`ScriptedFeedSource`]
pub enum FetchStep {
    Items(Vec<FeedItem>),
    TransportError,
    ParseError,
    /// Hang for the given time, then answer with the fallback items
    Stall(Duration),
}

/// A FeedSource answering from a script
///
/// Once the script is exhausted every fetch returns the fallback items.
pub struct ScriptedFeedSource {
    script: Mutex<VecDeque<FetchStep>>,
    fallback: Mutex<Vec<FeedItem>>,
    fetch_count: AtomicUsize,
}

impl ScriptedFeedSource {
    pub fn new(script: Vec<FetchStep>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback: Mutex::new(Vec::new()),
            fetch_count: AtomicUsize::new(0),
        })
    }

    /// A source that always returns the same entries
    pub fn always(items: Vec<FeedItem>) -> Arc<Self> {
        let source = Self::new(Vec::new());
        source.set_fallback(items);
        source
    }

    pub fn set_fallback(&self, items: Vec<FeedItem>) {
        *self.fallback.lock().unwrap() = items;
    }

    /// Get the number of times fetch() was called
    pub fn fetch_count(&self) -> usize {
        self.fetch_count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl FeedSource for ScriptedFeedSource {
    async fn fetch(&self, entity_id: &str) -> Result<Vec<FeedItem>> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);

        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(FetchStep::Items(items)) => Ok(items),
            Some(FetchStep::TransportError) => {
                Err(Error::fetch_transport("connection reset by peer"))
            }
            Some(FetchStep::ParseError) => Err(Error::feed_parse(
                entity_id,
                std::io::Error::new(std::io::ErrorKind::InvalidData, "not a feed"),
            )),
            Some(FetchStep::Stall(duration)) => {
                tokio::time::sleep(duration).await;
                Ok(self.fallback.lock().unwrap().clone())
            }
            None => Ok(self.fallback.lock().unwrap().clone()),
        }
    }

    fn source_name(&self) -> &'static str {
        "scripted"
    }
}

/// One POST seen by [`RecordingTransport`]
#[derive(Debug, Clone)]
pub struct RecordedPost {
    pub webhook_url: String,
    pub payload: WebhookPayload,
    pub at: Instant,
}

/// A WebhookTransport that records every post
///
/// Answers come from the script; once it is exhausted every post succeeds.
pub struct RecordingTransport {
    script: Mutex<VecDeque<Result<()>>>,
    posts: Mutex<Vec<RecordedPost>>,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Self::scripted(Vec::new())
    }

    pub fn scripted(script: Vec<Result<()>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            posts: Mutex::new(Vec::new()),
        })
    }

    pub fn posts(&self) -> Vec<RecordedPost> {
        self.posts.lock().unwrap().clone()
    }

    /// Get the number of times post() was called
    pub fn post_count(&self) -> usize {
        self.posts.lock().unwrap().len()
    }

    /// Titles of all posted payloads, in order
    pub fn posted_titles(&self) -> Vec<String> {
        self.posts()
            .iter()
            .map(|post| post.payload.title().to_string())
            .collect()
    }
}

#[async_trait::async_trait]
impl WebhookTransport for RecordingTransport {
    async fn post(&self, webhook_url: &str, payload: &WebhookPayload) -> Result<()> {
        self.posts.lock().unwrap().push(RecordedPost {
            webhook_url: webhook_url.to_string(),
            payload: payload.clone(),
            at: Instant::now(),
        });
        self.script.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    fn transport_name(&self) -> &'static str {
        "recording"
    }
}

/// A MemorySentStore whose first `failures` batch writes fail
pub struct FailingSentStore {
    inner: MemorySentStore,
    failures: AtomicUsize,
    batches: AtomicUsize,
}

impl FailingSentStore {
    pub fn new(failures: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: MemorySentStore::new(),
            failures: AtomicUsize::new(failures),
            batches: AtomicUsize::new(0),
        })
    }

    /// Get the number of times record_batch() was called
    pub fn batch_count(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SentStore for FailingSentStore {
    async fn is_sent(&self, entity_id: &str, article_id: &str) -> Result<bool> {
        self.inner.is_sent(entity_id, article_id).await
    }

    async fn record_batch(&self, records: Vec<SentArticleRecord>) -> Result<Vec<bool>> {
        self.batches.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::storage("disk full"));
        }
        self.inner.record_batch(records).await
    }

    async fn sent_for(&self, entity_id: &str) -> Result<Vec<SentArticleRecord>> {
        self.inner.sent_for(entity_id).await
    }

    async fn flush(&self) -> Result<()> {
        self.inner.flush().await
    }
}

/// A StateObserver that records notifications
#[derive(Default)]
pub struct RecordingObserver {
    changes: Mutex<Vec<(String, FeedState)>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn changes(&self) -> Vec<(String, FeedState)> {
        self.changes.lock().unwrap().clone()
    }
}

impl StateObserver for RecordingObserver {
    fn on_state_change(&self, entity_id: &str, state: FeedState) {
        self.changes
            .lock()
            .unwrap()
            .push((entity_id.to_string(), state));
    }
}

/// Feed entry with an explicit id
pub fn item(id: &str) -> FeedItem {
    FeedItem {
        id: Some(id.to_string()),
        title: Some(format!("Article {}", id)),
        link: Some(format!("https://store.example/news/{}", id)),
        published: None,
        description_html: Some(format!("<p>Body of {}</p>", id)),
    }
}

/// Default relay configuration with a short stop timeout
pub fn test_config() -> RelayConfig {
    let mut config = RelayConfig::default();
    config.registry.stop_timeout_secs = 5;
    config
}

/// Receive events until one matches, or panic after `within`
pub async fn wait_for_event<F>(
    rx: &mut mpsc::Receiver<MonitorEvent>,
    within: Duration,
    mut predicate: F,
) -> MonitorEvent
where
    F: FnMut(&MonitorEvent) -> bool,
{
    let wait = async {
        while let Some(event) = rx.recv().await {
            if predicate(&event) {
                return event;
            }
        }
        panic!("event channel closed");
    };

    tokio::time::timeout(within, wait)
        .await
        .expect("expected event did not arrive in time")
}

/// Drain every event currently queued
pub fn drain_events(rx: &mut mpsc::Receiver<MonitorEvent>) -> Vec<MonitorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
