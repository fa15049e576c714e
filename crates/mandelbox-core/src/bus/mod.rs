// ── Signal bus ──
//
// Process-wide registry of named, typed event streams. Each trigger has
// exactly one publisher capability, claimed once per bus, and any number
// of subscribers. A subscriber that joins late first receives the most
// recent value, then everything published afterwards.

pub mod triggers;

use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::stream::{self, BoxStream};
use futures_util::{StreamExt, future};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, trace, warn};

use crate::error::CoreError;

pub use triggers::{Channels, Trigger, TriggerName};

const DEFAULT_CAPACITY: usize = 256;

// ── Channel ──────────────────────────────────────────────────────

/// Storage behind one trigger: a broadcast sender plus the latest value.
#[doc(hidden)]
pub struct Channel<T> {
    latest: Mutex<Option<T>>,
    tx: broadcast::Sender<T>,
    claimed: AtomicBool,
}

impl<T: Clone + Send + 'static> Channel<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            latest: Mutex::new(None),
            tx,
            claimed: AtomicBool::new(false),
        }
    }

    fn publish(&self, value: T) {
        // Update and send under one lock so a concurrent subscriber sees
        // each value exactly once, either as replay or live.
        let mut latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
        *latest = Some(value.clone());
        let _ = self.tx.send(value);
    }

    fn latest(&self) -> Option<T> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn subscribe(&self, name: TriggerName, replay: bool) -> Subscription<T> {
        let (replayed, rx) = {
            let latest = self.latest.lock().unwrap_or_else(PoisonError::into_inner);
            let replayed = if replay { latest.clone() } else { None };
            (replayed, self.tx.subscribe())
        };

        let live = BroadcastStream::new(rx).filter_map(move |item| {
            future::ready(match item {
                Ok(value) => Some(value),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(trigger = %name, skipped, "subscriber lagged");
                    None
                }
            })
        });

        Subscription {
            inner: stream::iter(replayed).chain(live).boxed(),
        }
    }
}

// ── Subscription ─────────────────────────────────────────────────

/// A stream of values published on one trigger.
pub struct Subscription<T> {
    inner: BoxStream<'static, T>,
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}

// ── Publisher ────────────────────────────────────────────────────

/// The single write capability for trigger `T`.
///
/// Not `Clone`: there is one publisher per trigger per bus. Additional
/// sources are merged in with [`forward`](Self::forward).
pub struct Publisher<T: Trigger> {
    channel: Arc<Channel<T::Payload>>,
    _trigger: PhantomData<fn() -> T>,
}

impl<T: Trigger> Publisher<T> {
    pub fn name(&self) -> TriggerName {
        T::NAME
    }

    /// Publish one value to every current subscriber.
    pub fn publish(&self, payload: T::Payload) {
        trace!(trigger = %T::NAME, "publish");
        self.channel.publish(payload);
    }

    /// Merge another source into this trigger. Each call adds a source;
    /// earlier sources keep publishing.
    pub fn forward<S>(&self, source: S) -> JoinHandle<()>
    where
        S: Stream<Item = T::Payload> + Send + 'static,
    {
        let channel = Arc::clone(&self.channel);
        debug!(trigger = %T::NAME, "source attached");
        tokio::spawn(async move {
            let mut source = std::pin::pin!(source);
            while let Some(payload) = source.next().await {
                channel.publish(payload);
            }
            trace!(trigger = %T::NAME, "source completed");
        })
    }
}

// ── SignalBus ────────────────────────────────────────────────────

/// Shared registry of every trigger. Cheap to clone.
#[derive(Clone)]
pub struct SignalBus {
    channels: Arc<Channels>,
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A bus whose subscribers may fall `capacity` values behind before
    /// they start skipping.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Arc::new(Channels::new(capacity.max(1))),
        }
    }

    /// Take the publisher for `T`. Fails if it was already taken.
    pub fn claim<T: Trigger>(&self) -> Result<Publisher<T>, CoreError> {
        let channel = T::channel(&self.channels);
        if channel.claimed.swap(true, Ordering::AcqRel) {
            return Err(CoreError::PublisherClaimed { trigger: T::NAME });
        }
        debug!(trigger = %T::NAME, "publisher claimed");
        Ok(Publisher {
            channel: Arc::clone(channel),
            _trigger: PhantomData,
        })
    }

    /// Subscribe to `T`, starting with its most recent value if any.
    pub fn subscribe<T: Trigger>(&self) -> Subscription<T::Payload> {
        T::channel(&self.channels).subscribe(T::NAME, true)
    }

    /// Subscribe to `T`, receiving only values published from now on.
    pub fn subscribe_live<T: Trigger>(&self) -> Subscription<T::Payload> {
        T::channel(&self.channels).subscribe(T::NAME, false)
    }

    /// The most recent value published on `T`.
    pub fn latest<T: Trigger>(&self) -> Option<T::Payload> {
        T::channel(&self.channels).latest()
    }
}
