//! Monitor registry
//!
//! The registry owns the working set: one [`FeedMonitor`] per monitored
//! entity, each backed by exactly one [`FeedWorker`] task. It is the only
//! place feed definitions are written.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use newsrelay_core::{MonitorRegistry, RelayConfig};
//!
//! let (registry, mut events) = MonitorRegistry::new(
//!     source, transport, sent_store, definitions, RelayConfig::default(),
//! )?;
//!
//! registry.restore_feeds().await?;
//! registry.create_feed("440", "https://discord.com/api/webhooks/...").await?;
//! registry.pause_feed("440").await?;
//! registry.stop_feed("440").await?;
//! ```
//!
//! ## Locking
//!
//! The working-set map sits behind one `std::sync::Mutex` that is only held
//! for map updates, never across an `.await`. Definition store writes and
//! waits for workers happen outside the lock.
//!
//! ## Stopping
//!
//! A monitor being stopped stays in the map, flagged `stopping`, until its
//! worker has exited. While flagged it cannot be re-created, paused or
//! resumed, so the map and the set of live workers never disagree. A worker
//! that outlives the stop timeout keeps its flagged entry, and a background
//! task removes the entry once the worker finally exits.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{PollConfig, RelayConfig};
use crate::delivery::DeliveryClient;
use crate::error::{Error, Result};
use crate::model::{FeedDefinition, FeedState, FeedStatus};
use crate::traits::{DefinitionStore, FeedSource, SentStore, StateObserver, WebhookTransport};
use crate::worker::{FeedWorker, MonitorEvent, WorkerControl};

/// Result of [`MonitorRegistry::create_feed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// A new worker was spawned
    Started,
    /// The feed was already running; its webhook was replaced in place
    Updated,
}

/// Result of [`MonitorRegistry::restore_feeds`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Definitions now running
    pub restored: usize,
    /// Definitions that failed and were skipped
    pub skipped: usize,
}

/// Runtime handle for one running worker
struct FeedMonitor {
    webhook_tx: watch::Sender<String>,
    cancel_tx: watch::Sender<bool>,
    pause_tx: watch::Sender<bool>,
    paused: bool,
    stopping: bool,
    handle: Option<JoinHandle<()>>,
}

impl FeedMonitor {
    /// Flag as stopping, signal the worker and take its handle
    fn begin_stop(&mut self) -> Option<JoinHandle<()>> {
        self.stopping = true;
        self.cancel_tx.send_replace(true);
        self.handle.take()
    }
}

/// Owner of all feed monitors
///
/// ## Lifecycle
///
/// 1. Create with [`MonitorRegistry::new()`]
/// 2. Restore persisted feeds with [`MonitorRegistry::restore_feeds()`]
/// 3. Operate with create/stop/pause/resume
/// 4. Call [`MonitorRegistry::shutdown()`] before exit
///
/// Dropping the registry cancels every worker at its next check.
pub struct MonitorRegistry {
    source: Arc<dyn FeedSource>,
    sent_store: Arc<dyn SentStore>,
    definitions: Arc<dyn DefinitionStore>,
    delivery: DeliveryClient,
    poll: PollConfig,
    stop_timeout: Duration,
    observer: Option<Arc<dyn StateObserver>>,
    monitors: Arc<Mutex<HashMap<String, FeedMonitor>>>,
    event_tx: mpsc::Sender<MonitorEvent>,
}

impl MonitorRegistry {
    /// Create a new registry
    ///
    /// # Parameters
    ///
    /// - `source`: Feed source shared by all workers
    /// - `transport`: Webhook transport shared by all workers
    /// - `sent_store`: Delivery ledger
    /// - `definitions`: Durable feed definitions
    /// - `config`: Relay configuration
    ///
    /// # Returns
    ///
    /// A tuple of (registry, event_receiver) where event_receiver yields
    /// worker events
    pub fn new(
        source: Arc<dyn FeedSource>,
        transport: Arc<dyn WebhookTransport>,
        sent_store: Arc<dyn SentStore>,
        definitions: Arc<dyn DefinitionStore>,
        config: RelayConfig,
    ) -> Result<(Self, mpsc::Receiver<MonitorEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.registry.event_channel_capacity);

        let registry = Self {
            source,
            sent_store,
            definitions,
            delivery: DeliveryClient::new(transport, config.delivery),
            poll: config.poll,
            stop_timeout: config.registry.stop_timeout(),
            observer: None,
            monitors: Arc::new(Mutex::new(HashMap::new())),
            event_tx: tx,
        };

        Ok((registry, rx))
    }

    /// Register a pause/resume observer
    pub fn with_observer(mut self, observer: Arc<dyn StateObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Start monitoring a feed, or update its webhook if already running
    ///
    /// The definition is written first; if that fails the working set is
    /// left untouched. A running worker is never restarted: it picks up the
    /// new webhook for its next delivery.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidInput`: bad entity id or webhook URL, or the feed is
    ///   currently being stopped
    /// - `Error::Storage`: the definition could not be persisted
    pub async fn create_feed(&self, entity_id: &str, webhook_url: &str) -> Result<CreateOutcome> {
        validate_entity_id(entity_id)?;
        validate_webhook_url(webhook_url)?;
        self.ensure_not_stopping(entity_id)?;

        self.definitions
            .upsert(&FeedDefinition::new(entity_id, webhook_url))
            .await?;

        let mut monitors = self.monitors();

        if let Some(monitor) = monitors.get(entity_id) {
            if monitor.stopping {
                return Err(stopping_error(entity_id));
            }
            monitor.webhook_tx.send_replace(webhook_url.to_string());
            info!("Updated webhook for running feed {}", entity_id);
            return Ok(CreateOutcome::Updated);
        }

        let (webhook_tx, webhook_rx) = watch::channel(webhook_url.to_string());
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (pause_tx, pause_rx) = watch::channel(false);

        let worker = FeedWorker::new(
            entity_id.to_string(),
            Arc::clone(&self.source),
            Arc::clone(&self.sent_store),
            self.delivery.clone(),
            webhook_rx,
            WorkerControl::new(cancel_rx, pause_rx),
            &self.poll,
            self.event_tx.clone(),
        );
        let handle = tokio::spawn(worker.run());

        monitors.insert(
            entity_id.to_string(),
            FeedMonitor {
                webhook_tx,
                cancel_tx,
                pause_tx,
                paused: false,
                stopping: false,
                handle: Some(handle),
            },
        );

        info!("Started monitoring {}", entity_id);
        Ok(CreateOutcome::Started)
    }

    /// Stop a feed and delete its definition
    ///
    /// Waits for the worker to exit, up to the configured stop timeout. A
    /// worker that does not exit in time still holds a cancelled signal and
    /// exits at its next check; until then the feed counts as stopping and
    /// cannot be re-created.
    ///
    /// # Returns
    ///
    /// - `Ok(true)`: The feed was stopped and its definition deleted
    /// - `Ok(false)`: No such running feed (or already being stopped)
    /// - `Err(Error)`: Worker stopped but the definition could not be deleted
    pub async fn stop_feed(&self, entity_id: &str) -> Result<bool> {
        let handle = {
            let mut monitors = self.monitors();
            match monitors.get_mut(entity_id) {
                Some(monitor) if !monitor.stopping => monitor.begin_stop(),
                Some(_) => {
                    debug!("Feed {} is already stopping", entity_id);
                    return Ok(false);
                }
                None => {
                    debug!("Stop requested for unknown feed {}", entity_id);
                    return Ok(false);
                }
            }
        };

        self.finish_stop(entity_id, handle, self.stop_timeout).await;
        self.definitions.delete(entity_id).await?;

        info!("Stopped monitoring {}", entity_id);
        Ok(true)
    }

    /// Pause a feed
    ///
    /// # Returns
    ///
    /// `Ok(true)` if the feed went from running to paused, `Ok(false)` if it
    /// was already paused, unknown or being stopped.
    pub async fn pause_feed(&self, entity_id: &str) -> Result<bool> {
        self.set_paused(entity_id, true)
    }

    /// Resume a paused feed
    ///
    /// The worker polls right away instead of waiting out a full interval.
    pub async fn resume_feed(&self, entity_id: &str) -> Result<bool> {
        self.set_paused(entity_id, false)
    }

    /// Start a monitor for every persisted definition
    ///
    /// Definitions that fail to start are logged and skipped; they never stop
    /// the remaining ones from being restored.
    ///
    /// # Errors
    ///
    /// Only a failure to list the definitions at all is returned.
    pub async fn restore_feeds(&self) -> Result<RestoreReport> {
        let definitions = self.definitions.list_definitions().await?;
        let mut report = RestoreReport::default();

        for definition in definitions {
            match self
                .create_feed(&definition.entity_id, &definition.webhook_url)
                .await
            {
                Ok(_) => report.restored += 1,
                Err(e) => {
                    warn!(
                        "Skipping persisted feed {}: {}",
                        definition.entity_id, e
                    );
                    report.skipped += 1;
                }
            }
        }

        info!(
            "Restored {} feed(s), skipped {}",
            report.restored, report.skipped
        );
        Ok(report)
    }

    /// Snapshot of running feeds, sorted by entity id
    pub fn list_feeds(&self) -> Vec<FeedStatus> {
        let monitors = self.monitors();
        let mut feeds: Vec<FeedStatus> = monitors
            .iter()
            .filter(|(_, monitor)| !monitor.stopping)
            .map(|(entity_id, monitor)| FeedStatus {
                entity_id: entity_id.clone(),
                webhook_url: monitor.webhook_tx.borrow().clone(),
                paused: monitor.paused,
            })
            .collect();
        feeds.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        feeds
    }

    /// Whether a feed is running (paused feeds count as running)
    pub fn is_running(&self, entity_id: &str) -> bool {
        self.monitors()
            .get(entity_id)
            .is_some_and(|monitor| !monitor.stopping)
    }

    /// Stop every worker and flush both stores
    ///
    /// Definitions are kept, so the same feeds come back on the next
    /// [`MonitorRegistry::restore_feeds`]. All workers share one stop timeout.
    pub async fn shutdown(&self) -> Result<()> {
        let handles: Vec<(String, JoinHandle<()>)> = {
            let mut monitors = self.monitors();
            monitors
                .iter_mut()
                .filter(|(_, monitor)| !monitor.stopping)
                .filter_map(|(entity_id, monitor)| {
                    monitor
                        .begin_stop()
                        .map(|handle| (entity_id.clone(), handle))
                })
                .collect()
        };

        info!("Shutting down {} monitor(s)", handles.len());
        let deadline = tokio::time::Instant::now() + self.stop_timeout;

        for (entity_id, handle) in handles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            self.finish_stop(&entity_id, Some(handle), remaining).await;
        }

        self.sent_store.flush().await?;
        self.definitions.flush().await?;
        info!("Stores flushed, registry stopped");
        Ok(())
    }

    fn set_paused(&self, entity_id: &str, paused: bool) -> Result<bool> {
        let changed = {
            let mut monitors = self.monitors();
            match monitors.get_mut(entity_id) {
                Some(monitor) if !monitor.stopping && monitor.paused != paused => {
                    monitor.paused = paused;
                    monitor.pause_tx.send_replace(paused);
                    true
                }
                _ => false,
            }
        };

        let state = if paused {
            FeedState::Paused
        } else {
            FeedState::Resumed
        };

        if !changed {
            debug!("Feed {} not {}: unknown or unchanged", entity_id, state);
            return Ok(false);
        }

        info!("Feed {} {}", entity_id, state);
        if let Some(observer) = &self.observer {
            observer.on_state_change(entity_id, state);
        }
        Ok(true)
    }

    /// Wait for a stopping worker, then drop its entry
    ///
    /// A worker still running after `timeout` keeps its `stopping` entry
    /// until it exits.
    async fn finish_stop(
        &self,
        entity_id: &str,
        handle: Option<JoinHandle<()>>,
        timeout: Duration,
    ) {
        let lingering = match handle {
            Some(handle) => join_worker(entity_id, handle, timeout).await,
            None => None,
        };

        match lingering {
            Some(handle) => self.remove_when_exited(entity_id.to_string(), handle),
            None => {
                self.monitors().remove(entity_id);
            }
        }
    }

    fn remove_when_exited(&self, entity_id: String, handle: JoinHandle<()>) {
        let monitors = Arc::clone(&self.monitors);

        tokio::spawn(async move {
            if let Err(e) = handle.await {
                warn!("Worker for {} ended abnormally: {}", entity_id, e);
            }

            let mut monitors = lock_monitors(&monitors);
            if monitors.get(&entity_id).is_some_and(|monitor| monitor.stopping) {
                monitors.remove(&entity_id);
            }
            info!("Lingering worker for {} exited", entity_id);
        });
    }

    fn ensure_not_stopping(&self, entity_id: &str) -> Result<()> {
        match self.monitors().get(entity_id) {
            Some(monitor) if monitor.stopping => Err(stopping_error(entity_id)),
            _ => Ok(()),
        }
    }

    fn monitors(&self) -> MutexGuard<'_, HashMap<String, FeedMonitor>> {
        lock_monitors(&self.monitors)
    }
}

fn lock_monitors(
    monitors: &Mutex<HashMap<String, FeedMonitor>>,
) -> MutexGuard<'_, HashMap<String, FeedMonitor>> {
    monitors.lock().unwrap_or_else(|e| e.into_inner())
}

/// Wait up to `timeout` for a worker to exit
///
/// Returns the handle if the worker is still running.
async fn join_worker(
    entity_id: &str,
    mut handle: JoinHandle<()>,
    timeout: Duration,
) -> Option<JoinHandle<()>> {
    match tokio::time::timeout(timeout, &mut handle).await {
        Ok(Ok(())) => {
            debug!("Worker for {} exited", entity_id);
            None
        }
        Ok(Err(e)) => {
            warn!("Worker for {} ended abnormally: {}", entity_id, e);
            None
        }
        Err(_) => {
            warn!(
                "Worker for {} did not stop within {:?}; keeping it registered until it exits",
                entity_id, timeout
            );
            Some(handle)
        }
    }
}

fn stopping_error(entity_id: &str) -> Error {
    Error::invalid_input(format!("Feed {} is being stopped", entity_id))
}

/// Entity ids are non-empty and limited to `[A-Za-z0-9._-]`
fn validate_entity_id(entity_id: &str) -> Result<()> {
    if entity_id.is_empty() {
        return Err(Error::invalid_input("Entity id must not be empty"));
    }
    if !entity_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
    {
        return Err(Error::invalid_input(format!(
            "Entity id {:?} may only contain letters, digits, '.', '_' and '-'",
            entity_id
        )));
    }
    Ok(())
}

fn validate_webhook_url(webhook_url: &str) -> Result<()> {
    let url = url::Url::parse(webhook_url).map_err(|e| {
        Error::invalid_input(format!("Invalid webhook URL {:?}: {}", webhook_url, e))
    })?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(Error::invalid_input(format!(
            "Webhook URL must be an absolute http(s) URL: {}",
            webhook_url
        )));
    }
    Ok(())
}
