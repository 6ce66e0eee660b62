//! Process-wide pub/sub over a fixed-capacity channel with a single
//! consumer task (spec §4.5). Grounded on the original `event/event.go`
//! (per-kind + "all" handler registries, buffered chan(1000), one dispatch
//! loop) and on the teacher's single-consumer actor shape
//! (`brokers/pub-sub/actor.rs`), adapted from an actor-with-commands to a
//! plain publish/subscribe channel since Pluq has no per-client state to
//! own.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    MessagePushed,
    MessagePoped,
    MessageProceeded,
    MessageDiscarded,
    MessageAvailable,
}

#[derive(Debug, Clone)]
pub struct Event {
    pub kind: EventKind,
    pub queue: String,
}

pub type Handler = Box<dyn Fn(&Event) + Send + Sync>;

#[derive(Default)]
struct Registry {
    by_kind: HashMap<EventKind, Vec<Handler>>,
    all: Vec<Handler>,
}

/// Owns the receiving half and the handler registry; runs the single
/// dispatch loop. Construct with [`EventBus::new`], keep the returned
/// `EventBus` for publishing/registering, and spawn its `run` loop once at
/// startup.
pub struct EventBus {
    sender: mpsc::Sender<Event>,
    receiver: parking_lot::Mutex<Option<mpsc::Receiver<Event>>>,
    registry: Arc<RwLock<Registry>>,
}

impl EventBus {
    /// `capacity` bounds the channel (spec §4.5); `publish` applies
    /// backpressure once it fills. Sourced from `RuntimeConfig::global()
    /// .event_bus_capacity` at startup.
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(capacity);
        Arc::new(Self {
            sender,
            receiver: parking_lot::Mutex::new(Some(receiver)),
            registry: Arc::new(RwLock::new(Registry::default())),
        })
    }

    /// Register a handler for one event kind.
    pub fn handle(&self, kind: EventKind, handler: Handler) {
        self.registry.write().by_kind.entry(kind).or_default().push(handler);
    }

    /// Register a handler invoked for every event kind.
    pub fn handle_all(&self, handler: Handler) {
        self.registry.write().all.push(handler);
    }

    /// Publish an event. Blocks (awaits) if the channel is full, applying
    /// backpressure to the publisher — the core relies on this for
    /// `MessageAvailable` delivery ordering.
    pub async fn publish(&self, kind: EventKind, queue: impl Into<String>) {
        let event = Event { kind, queue: queue.into() };
        if self.sender.send(event).await.is_err() {
            tracing::warn!("event bus dispatch loop is gone; dropping event");
        }
    }

    /// Run the single dispatch loop. Consumes the receiver; calling this
    /// twice on the same `EventBus` is a bug (the second call finds no
    /// receiver and returns immediately).
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let Some(mut receiver) = self.receiver.lock().take() else {
            tracing::warn!("event bus dispatch loop already spawned");
            return tokio::spawn(async {});
        };
        let registry = self.registry.clone();
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                let registry = registry.read();
                for handler in &registry.all {
                    handler(&event);
                }
                if let Some(handlers) = registry.by_kind.get(&event.kind) {
                    for handler in handlers {
                        handler(&event);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn dispatches_to_kind_and_all_handlers() {
        let bus = EventBus::new(1000);
        let kind_hits = Arc::new(AtomicUsize::new(0));
        let all_hits = Arc::new(AtomicUsize::new(0));

        let kh = kind_hits.clone();
        bus.handle(EventKind::MessageAvailable, Box::new(move |_| {
            kh.fetch_add(1, Ordering::SeqCst);
        }));
        let ah = all_hits.clone();
        bus.handle_all(Box::new(move |_| {
            ah.fetch_add(1, Ordering::SeqCst);
        }));

        let _task = bus.spawn();
        bus.publish(EventKind::MessageAvailable, "q").await;
        bus.publish(EventKind::MessagePushed, "q").await;

        // give the consumer task a chance to drain
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(kind_hits.load(Ordering::SeqCst), 1);
        assert_eq!(all_hits.load(Ordering::SeqCst), 2);
    }
}
