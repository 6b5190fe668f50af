//! In-process event relay between the dispatcher, transform workers and fanout.
//!
//! Handlers are registered per [`EventKind`] when the relay is built. Every
//! registered handler owns a bounded queue and a consumer task; a publish
//! enqueues the envelope on each matching queue, and the consumer runs one
//! independent handler invocation per envelope.
//!
//! ```text
//!  Publisher ──► route(Request, "transform.fr") ──► consumer ──► spawn(handle)
//!            ├─► route(Request, "transform.de") ──► consumer ──► spawn(handle)
//!            └─► route(Response, "fanout")      ──► consumer ──► spawn(handle)
//! ```
//!
//! Each consumer runs at most `capacity` invocations at once. When they are
//! all busy the consumer stops pulling, the queue fills and publishers wait.
//!
//! Delivery is at-least-once and unordered across envelopes. A failed
//! handler invocation is logged and counted; it is never retried and never
//! reported back to the publisher.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use topicast_core::{Envelope, EventKind};
use tracing::{debug, info, warn, Instrument};

use crate::error::RelayError;

/// Shutdown order. Request handlers publish responses, so their consumers
/// drain before the response consumers stop.
const SHUTDOWN_STAGES: [EventKind; 2] = [EventKind::Request, EventKind::Response];

// ---------------------------------------------------------------------------
// EnvelopeHandler
// ---------------------------------------------------------------------------

/// A downstream consumer of envelopes of one kind.
#[async_trait]
pub trait EnvelopeHandler: Send + Sync + 'static {
    /// Stable name used in logs and metrics.
    fn name(&self) -> &str;

    /// Processes one envelope. `publisher` lets the handler emit follow-up
    /// envelopes (e.g. a transform publishing its response).
    async fn handle(&self, envelope: &Envelope, publisher: &Publisher) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

struct Route {
    kind: EventKind,
    handler: String,
    tx: mpsc::Sender<Arc<Envelope>>,
}

/// Cheap, cloneable publish handle.
#[derive(Clone)]
pub struct Publisher {
    routes: Arc<[Route]>,
    closed: Arc<AtomicBool>,
    /// Handed to handlers; keeps publishing follow-ups while the relay drains.
    draining_ok: bool,
}

impl Publisher {
    /// Hands `envelope` to every handler registered for its kind.
    ///
    /// Returns how many handlers accepted it; zero matching handlers is not
    /// an error. If only some matching handlers are gone the envelope still
    /// counts as published and the miss is logged.
    ///
    /// # Errors
    ///
    /// - `RelayError::Closed` after [`EventRelay::shutdown`]
    /// - `RelayError::HandlerGone` when every matching handler stopped consuming
    pub async fn publish(&self, envelope: Envelope) -> Result<usize, RelayError> {
        if !self.draining_ok && self.closed.load(Ordering::Acquire) {
            return Err(RelayError::Closed);
        }

        let kind = envelope.kind;
        let envelope = Arc::new(envelope);
        let mut accepted = 0;
        let mut gone = Vec::new();

        for route in self.routes.iter().filter(|r| r.kind == kind) {
            if route.tx.send(Arc::clone(&envelope)).await.is_ok() {
                accepted += 1;
            } else {
                metrics::counter!("topicast_relay_undelivered_total", "handler" => route.handler.clone())
                    .increment(1);
                gone.push(route.handler.clone());
            }
        }

        if accepted == 0 {
            if let Some(handler) = gone.into_iter().next() {
                warn!(%handler, %kind, "relay handler queue closed");
                return Err(RelayError::HandlerGone { handler });
            }
        } else if !gone.is_empty() {
            warn!(%kind, topic = %envelope.topic, accepted, ?gone, "envelope missed stopped handlers");
        }

        metrics::counter!("topicast_relay_published_total", "kind" => kind.as_str()).increment(1);
        debug!(%kind, topic = %envelope.topic, accepted, "envelope published");
        Ok(accepted)
    }

    /// Number of handlers registered for `kind`.
    #[must_use]
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.routes.iter().filter(|r| r.kind == kind).count()
    }

    fn for_handlers(&self) -> Self {
        Self {
            draining_ok: true,
            ..self.clone()
        }
    }
}

// ---------------------------------------------------------------------------
// EventRelayBuilder
// ---------------------------------------------------------------------------

/// Declarative handler registration, evaluated once at startup.
pub struct EventRelayBuilder {
    capacity: usize,
    subscriptions: Vec<(EventKind, Arc<dyn EnvelopeHandler>)>,
}

impl EventRelayBuilder {
    /// `capacity` bounds both each handler's queue and its concurrent
    /// invocations; publishers wait when both are used up.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscriptions: Vec::new(),
        }
    }

    /// Registers `handler` for envelopes of `kind`. Several handlers may
    /// share a kind; each receives every matching envelope.
    #[must_use]
    pub fn subscribe(mut self, kind: EventKind, handler: Arc<dyn EnvelopeHandler>) -> Self {
        self.subscriptions.push((kind, handler));
        self
    }

    /// Spawns one consumer task per registered handler.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn build(self) -> EventRelay {
        let closed = Arc::new(AtomicBool::new(false));

        let mut receivers = Vec::with_capacity(self.subscriptions.len());
        let mut routes = Vec::with_capacity(self.subscriptions.len());
        for (kind, handler) in self.subscriptions {
            let (tx, rx) = mpsc::channel(self.capacity);
            routes.push(Route {
                kind,
                handler: handler.name().to_string(),
                tx,
            });
            receivers.push((kind, handler, rx));
        }

        let publisher = Publisher {
            routes: routes.into(),
            closed: Arc::clone(&closed),
            draining_ok: false,
        };

        let consumers = receivers
            .into_iter()
            .map(|(kind, handler, rx)| {
                let (stop, stop_rx) = watch::channel(false);
                let task = tokio::spawn(consume(
                    handler,
                    rx,
                    publisher.for_handlers(),
                    self.capacity,
                    stop_rx,
                ));
                Consumer { kind, stop, task }
            })
            .collect();

        EventRelay {
            publisher,
            closed,
            consumers: Mutex::new(consumers),
        }
    }
}

struct Consumer {
    kind: EventKind,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

async fn consume(
    handler: Arc<dyn EnvelopeHandler>,
    mut rx: mpsc::Receiver<Arc<Envelope>>,
    publisher: Publisher,
    limit: usize,
    mut stop: watch::Receiver<bool>,
) {
    let permits = Arc::new(Semaphore::new(limit));
    let mut running = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            Some(_) = running.join_next(), if !running.is_empty() => {}
            next = rx.recv() => {
                let Some(envelope) = next else { break };
                let Ok(permit) = Arc::clone(&permits).acquire_owned().await else { break };
                running.spawn(invoke(Arc::clone(&handler), envelope, publisher.clone(), permit));
            }
        }
    }

    // Envelopes already accepted by `publish` still get handled.
    rx.close();
    let mut drained = 0usize;
    while let Some(envelope) = rx.recv().await {
        let Ok(permit) = Arc::clone(&permits).acquire_owned().await else { break };
        running.spawn(invoke(Arc::clone(&handler), envelope, publisher.clone(), permit));
        drained += 1;
    }
    while running.join_next().await.is_some() {}

    debug!(handler = handler.name(), drained, "relay consumer stopped");
}

async fn invoke(
    handler: Arc<dyn EnvelopeHandler>,
    envelope: Arc<Envelope>,
    publisher: Publisher,
    _permit: OwnedSemaphorePermit,
) {
    let span = tracing::info_span!(
        "relay_handler",
        handler = handler.name(),
        kind = %envelope.kind,
        topic = %envelope.topic,
    );
    async {
        if let Err(err) = handler.handle(&envelope, &publisher).await {
            metrics::counter!(
                "topicast_relay_handler_failures_total",
                "handler" => handler.name().to_string()
            )
            .increment(1);
            warn!(error = %err, "relay handler failed");
        }
    }
    .instrument(span)
    .await;
}

// ---------------------------------------------------------------------------
// EventRelay
// ---------------------------------------------------------------------------

/// Owner of the relay's consumer tasks.
///
/// Dropping the relay tells its consumers to drain and stop but does not
/// wait for them; use [`EventRelay::shutdown`] for an orderly stop.
pub struct EventRelay {
    publisher: Publisher,
    closed: Arc<AtomicBool>,
    consumers: Mutex<Vec<Consumer>>,
}

impl EventRelay {
    #[must_use]
    pub fn builder(capacity: usize) -> EventRelayBuilder {
        EventRelayBuilder::new(capacity)
    }

    /// Returns a publish handle sharing this relay's routes.
    #[must_use]
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// Rejects further publishes with `RelayError::Closed`, then drains the
    /// consumers stage by stage: every envelope already queued is handled and
    /// every invocation finishes before this returns. Follow-ups published by
    /// request handlers while draining still reach the response handlers.
    pub async fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
        let mut pending = std::mem::take(&mut *self.consumers.lock());

        for stage in SHUTDOWN_STAGES {
            let (now, later): (Vec<_>, Vec<_>) =
                pending.into_iter().partition(|consumer| consumer.kind == stage);
            pending = later;

            for consumer in &now {
                consumer.stop.send_replace(true);
            }
            for consumer in now {
                if let Err(err) = consumer.task.await {
                    warn!(error = %err, kind = %stage, "relay consumer panicked");
                }
            }
        }
        info!("event relay drained");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
