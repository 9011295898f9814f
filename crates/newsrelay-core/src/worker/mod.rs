//! Per-feed polling loop
//!
//! One [`FeedWorker`] task runs per monitored entity. It is spawned and
//! controlled by the [`MonitorRegistry`](crate::MonitorRegistry).
//!
//! ## State Machine
//!
//! ```text
//!            fetch error                     pause
//!  Running ──────────────▶ Backoff(delay)   Running/Backoff ─────▶ Paused
//!     ▲                        │                                      │
//!     └──────── sleep ─────────┘            Running ◀──── resume ─────┘
//!
//!  any state ── cancel ──▶ Stopped
//! ```
//!
//! ## Loop Body
//!
//! 1. Wait while paused
//! 2. Fetch the feed via [`FeedSource`]
//! 3. Keep the entries not yet in the [`SentStore`] (recorded before delivery)
//! 4. Deliver each new entry in feed order via [`DeliveryClient`]
//! 5. Sleep the poll interval, or the backoff delay after a failure
//!
//! ## Cancellation
//!
//! Cancellation is cooperative. Sleeps and the pause wait end as soon as the
//! cancel signal fires; a fetch or delivery already in flight is allowed to
//! finish.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::PollConfig;
use crate::delivery::{DeliveryClient, DeliveryOutcome};
use crate::error::Result;
use crate::traits::{FeedSource, SentStore};

/// Events emitted by feed workers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    /// Worker task started
    Started { entity_id: String },

    /// A poll cycle completed
    PollSucceeded {
        entity_id: String,
        /// Entries not seen before
        new_items: usize,
    },

    /// Fetch or parse failed; the worker backs off
    FetchFailed {
        entity_id: String,
        error: String,
        /// Sleep before the next attempt
        retry_in: Duration,
    },

    /// An article reached its webhook
    Delivered {
        entity_id: String,
        article_id: String,
        attempts: u32,
    },

    /// An article could not be delivered and will not be retried
    DeliveryFailed {
        entity_id: String,
        article_id: String,
        reason: String,
    },

    /// Worker task exited
    Stopped { entity_id: String },
}

impl MonitorEvent {
    /// Entity the event belongs to
    pub fn entity_id(&self) -> &str {
        match self {
            MonitorEvent::Started { entity_id }
            | MonitorEvent::PollSucceeded { entity_id, .. }
            | MonitorEvent::FetchFailed { entity_id, .. }
            | MonitorEvent::Delivered { entity_id, .. }
            | MonitorEvent::DeliveryFailed { entity_id, .. }
            | MonitorEvent::Stopped { entity_id } => entity_id,
        }
    }
}

/// Doubling fetch backoff
///
/// Each call to [`Backoff::next_delay`] returns the current delay and doubles
/// it for the next failure, capped at `max`. [`Backoff::reset`] goes back to
/// `initial` after a successful poll.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial.min(max),
        }
    }

    /// Delay to sleep after the current failure
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial.min(self.max);
    }

    /// Delay the next failure will get
    pub fn current(&self) -> Duration {
        self.current
    }
}

/// Signals a worker observes
///
/// Both are `watch` channels owned on the sending side by the registry. A
/// dropped sender counts as cancellation.
#[derive(Debug)]
pub(crate) struct WorkerControl {
    cancel_rx: watch::Receiver<bool>,
    pause_rx: watch::Receiver<bool>,
}

impl WorkerControl {
    pub(crate) fn new(cancel_rx: watch::Receiver<bool>, pause_rx: watch::Receiver<bool>) -> Self {
        Self {
            cancel_rx,
            pause_rx,
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    fn is_paused(&self) -> bool {
        *self.pause_rx.borrow()
    }

    /// Sleep for `duration` unless cancelled first
    ///
    /// Returns `true` if the worker was cancelled.
    async fn sleep(&mut self, duration: Duration) -> bool {
        let cancelled = tokio::select! {
            _ = tokio::time::sleep(duration) => false,
            _ = self.cancel_rx.wait_for(|cancelled| *cancelled) => true,
        };
        cancelled || self.is_cancelled()
    }

    /// Block while paused
    ///
    /// Returns `false` if the worker was cancelled while waiting.
    async fn wait_until_resumed(&mut self) -> bool {
        if !self.is_paused() {
            return !self.is_cancelled();
        }

        let resumed = tokio::select! {
            resumed = self.pause_rx.wait_for(|paused| !*paused) => resumed.is_ok(),
            _ = self.cancel_rx.wait_for(|cancelled| *cancelled) => false,
        };
        resumed && !self.is_cancelled()
    }
}

/// Polling loop for one entity
pub(crate) struct FeedWorker {
    entity_id: String,
    source: Arc<dyn FeedSource>,
    sent_store: Arc<dyn SentStore>,
    delivery: DeliveryClient,
    /// Current webhook; replaced in place when the feed is re-created
    webhook_rx: watch::Receiver<String>,
    control: WorkerControl,
    poll_interval: Duration,
    backoff: Backoff,
    event_tx: mpsc::Sender<MonitorEvent>,
}

impl FeedWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        entity_id: String,
        source: Arc<dyn FeedSource>,
        sent_store: Arc<dyn SentStore>,
        delivery: DeliveryClient,
        webhook_rx: watch::Receiver<String>,
        control: WorkerControl,
        poll: &PollConfig,
        event_tx: mpsc::Sender<MonitorEvent>,
    ) -> Self {
        Self {
            entity_id,
            source,
            sent_store,
            delivery,
            webhook_rx,
            control,
            poll_interval: poll.poll_interval(),
            backoff: Backoff::new(poll.initial_retry_delay(), poll.max_retry_delay()),
            event_tx,
        }
    }

    /// Run until cancelled
    pub(crate) async fn run(mut self) {
        info!(
            "Monitor started for {} (source: {})",
            self.entity_id,
            self.source.source_name()
        );
        self.emit_event(MonitorEvent::Started {
            entity_id: self.entity_id.clone(),
        });

        loop {
            if !self.control.wait_until_resumed().await {
                break;
            }

            let delay = match self.poll_once().await {
                Ok(new_items) => {
                    self.backoff.reset();
                    self.emit_event(MonitorEvent::PollSucceeded {
                        entity_id: self.entity_id.clone(),
                        new_items,
                    });
                    self.poll_interval
                }
                Err(e) => {
                    let retry_in = self.backoff.next_delay();
                    error!(
                        "Poll failed for {}: {}. Retrying in {:?}",
                        self.entity_id, e, retry_in
                    );
                    self.emit_event(MonitorEvent::FetchFailed {
                        entity_id: self.entity_id.clone(),
                        error: e.to_string(),
                        retry_in,
                    });
                    retry_in
                }
            };

            if self.control.sleep(delay).await {
                break;
            }
        }

        info!("Monitor stopped for {}", self.entity_id);
        self.emit_event(MonitorEvent::Stopped {
            entity_id: self.entity_id.clone(),
        });
    }

    /// One fetch, filter and deliver cycle
    ///
    /// # Returns
    ///
    /// - `Ok(usize)`: Number of new entries found
    /// - `Err(Error)`: Fetch, parse or ledger failure (backoff path)
    async fn poll_once(&mut self) -> Result<usize> {
        let items = self.source.fetch(&self.entity_id).await?;
        debug!("Fetched {} entries for {}", items.len(), self.entity_id);

        let fresh = self.sent_store.filter_new(&self.entity_id, items).await?;
        if fresh.is_empty() {
            debug!("No new entries for {}", self.entity_id);
            return Ok(0);
        }
        info!("{} new entries for {}", fresh.len(), self.entity_id);

        for (index, item) in fresh.iter().enumerate() {
            // Entries are already in the ledger, so a stop during a pause
            // gives them up rather than delivering them later.
            if self.control.is_paused() && !self.control.wait_until_resumed().await {
                warn!(
                    "Dropping {} undelivered entries for {}: monitor stopped while paused",
                    fresh.len() - index,
                    self.entity_id
                );
                break;
            }

            let article_id = item.article_id().unwrap_or_default().to_string();
            let webhook_url = self.webhook_rx.borrow().clone();

            match self
                .delivery
                .deliver(&self.entity_id, item, &webhook_url)
                .await
            {
                DeliveryOutcome::Delivered { attempts } => {
                    self.emit_event(MonitorEvent::Delivered {
                        entity_id: self.entity_id.clone(),
                        article_id,
                        attempts,
                    });
                }
                DeliveryOutcome::GaveUp { last_error, .. } => {
                    self.emit_event(MonitorEvent::DeliveryFailed {
                        entity_id: self.entity_id.clone(),
                        article_id,
                        reason: last_error,
                    });
                }
                DeliveryOutcome::Aborted { error } => {
                    self.emit_event(MonitorEvent::DeliveryFailed {
                        entity_id: self.entity_id.clone(),
                        article_id,
                        reason: error,
                    });
                }
            }
        }

        Ok(fresh.len())
    }

    /// Emit a monitor event
    fn emit_event(&self, event: MonitorEvent) {
        if let Err(mpsc::error::TrySendError::Full(_)) = self.event_tx.try_send(event) {
            warn!(
                "Event channel full, dropping event for {}. Consider increasing event_channel_capacity.",
                self.entity_id
            );
        }
    }
}
