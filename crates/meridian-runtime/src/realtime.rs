//! Realtime subscriptions with debounced refresh.
//!
//! A [`RealtimeChannel`] opens a live feed for a topic. A
//! [`RealtimeSubscription`] drains that feed on a background task and turns
//! each burst of events into a single call to
//! [`RealtimeTarget::on_realtime_quiet`] once the feed has been quiet for
//! the debounce window.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::AdapterError;

/// One inbound event on a live channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    pub topic: String,
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl RealtimeEvent {
    pub fn new(topic: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            kind: kind.into(),
            payload: serde_json::Value::Null,
        }
    }
}

/// An open live channel. The channel is released when the handle drops.
pub struct RealtimeHandle {
    rx: mpsc::Receiver<RealtimeEvent>,
    on_release: Option<Box<dyn FnOnce() + Send>>,
}

impl RealtimeHandle {
    pub fn new(rx: mpsc::Receiver<RealtimeEvent>) -> Self {
        Self {
            rx,
            on_release: None,
        }
    }

    /// Run `release` when the handle is dropped (unsubscribe, close socket).
    pub fn on_release(mut self, release: impl FnOnce() + Send + 'static) -> Self {
        self.on_release = Some(Box::new(release));
        self
    }

    /// Next event, or `None` once the producer side has closed.
    pub async fn recv(&mut self) -> Option<RealtimeEvent> {
        self.rx.recv().await
    }
}

impl Drop for RealtimeHandle {
    fn drop(&mut self) {
        self.rx.close();
        if let Some(release) = self.on_release.take() {
            release();
        }
    }
}

/// Opens live channels.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    async fn open(&self, topic: &str) -> Result<RealtimeHandle, AdapterError>;
}

/// Channel used when nothing was registered.
pub struct UnavailableRealtimeChannel;

#[async_trait]
impl RealtimeChannel for UnavailableRealtimeChannel {
    async fn open(&self, topic: &str) -> Result<RealtimeHandle, AdapterError> {
        Err(AdapterError::Unavailable(format!(
            "no realtime channel registered for {}",
            topic
        )))
    }
}

/// Receives the debounced refresh signal.
#[async_trait]
pub trait RealtimeTarget: Send + Sync {
    async fn on_realtime_quiet(&self);
}

/// A live listener with its pending debounce deadline.
///
/// Dropping or [`stop`](Self::stop)ping the subscription cancels the
/// pending deadline and releases the channel. A refresh that already fired
/// runs to completion.
pub struct RealtimeSubscription {
    id: Uuid,
    topic: String,
    started_at: DateTime<Utc>,
    fired: Arc<AtomicU64>,
    handle: JoinHandle<()>,
}

impl RealtimeSubscription {
    /// Start listening on `channel`. The target is held weakly so a
    /// subscription never keeps its owner alive.
    pub fn start(
        channel: RealtimeHandle,
        topic: impl Into<String>,
        debounce: Duration,
        target: Weak<dyn RealtimeTarget>,
    ) -> Self {
        let id = Uuid::new_v4();
        let topic = topic.into();
        let fired = Arc::new(AtomicU64::new(0));
        info!(
            "Realtime subscription {} started: topic={}, debounce={}ms",
            id,
            topic,
            debounce.as_millis()
        );
        let handle = tokio::spawn(listen(
            id,
            channel,
            debounce,
            target,
            Arc::clone(&fired),
        ));
        Self {
            id,
            topic,
            started_at: Utc::now(),
            fired,
            handle,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Debounced refreshes fired so far.
    pub fn refreshes_fired(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }

    /// Still listening. False after `stop` or once the channel closed.
    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(&self) {
        if !self.handle.is_finished() {
            debug!("Realtime subscription {} stopping", self.id);
        }
        self.handle.abort();
    }
}

impl Drop for RealtimeSubscription {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn listen(
    id: Uuid,
    mut channel: RealtimeHandle,
    debounce: Duration,
    target: Weak<dyn RealtimeTarget>,
    fired: Arc<AtomicU64>,
) {
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            event = channel.recv() => match event {
                Some(event) => {
                    debug!("Realtime {} event {}/{}", id, event.topic, event.kind);
                    deadline = Some(Instant::now() + debounce);
                }
                None => {
                    if deadline.is_some() {
                        fire(id, &target, &fired);
                    }
                    info!("Realtime subscription {} closed by channel", id);
                    return;
                }
            },
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                fire(id, &target, &fired);
            }
        }
    }
}

/// Hand the refresh to its own task so stopping the subscription never
/// cancels a refresh halfway.
fn fire(id: Uuid, target: &Weak<dyn RealtimeTarget>, fired: &AtomicU64) {
    let Some(target) = target.upgrade() else {
        debug!("Realtime {} target dropped, skipping refresh", id);
        return;
    };
    fired.fetch_add(1, Ordering::Relaxed);
    debug!("Realtime {} quiet, refreshing", id);
    tokio::spawn(async move { target.on_realtime_quiet().await });
}
