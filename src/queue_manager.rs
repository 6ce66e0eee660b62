//! QueueManager: orchestrates property lookup, multi-target fan-out, and
//! dequeue-with-wait (spec §4.3). The enqueue/dequeue API surface and the
//! "+1 for first attempt" retry convention are a direct port of the
//! original `queue/queue.go`'s `Manager`; the long-poll race against a
//! deadline and the `MessageAvailable`-driven waiter wakeup are this
//! spec's addition over the original (which had no waiter coordinator),
//! wired through [`crate::waiter::WaiterSet`] and [`crate::event_bus::EventBus`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{PluqError, Result};
use crate::event_bus::{EventBus, EventKind};
use crate::id::IdGenerator;
use crate::message::{EnqueueMeta, EnqueueOptions, Envelope, Message};
use crate::property_tree::{split_path, Properties, PropertyTree};
use crate::storage::{Delivery, MultiDequeuer, MultiEnqueuer, SequentialMultiDequeuer, SequentialMultiEnqueuer, StorageDriver};
use crate::waiter::WaiterSet;

pub struct QueueManager {
    tree: Arc<PropertyTree>,
    driver: Arc<dyn StorageDriver>,
    waiters: Arc<WaiterSet>,
    events: Arc<EventBus>,
    idgen: Arc<IdGenerator>,
}

impl QueueManager {
    pub fn new(
        tree: Arc<PropertyTree>,
        driver: Arc<dyn StorageDriver>,
        events: Arc<EventBus>,
        idgen: Arc<IdGenerator>,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            tree,
            driver,
            waiters: Arc::new(WaiterSet::new()),
            events: events.clone(),
            idgen,
        });

        let dispatcher = manager.clone();
        events.handle(
            EventKind::MessageAvailable,
            Box::new(move |event| {
                let dispatcher = dispatcher.clone();
                let queue = event.queue.clone();
                tokio::spawn(async move {
                    dispatcher.try_wake_waiter(&queue).await;
                });
            }),
        );

        manager
    }

    /// Steps 1-5 of spec §4.4: find an unborrowed, matching waiter; perform
    /// a single dequeue attempt on its behalf; hand off, reset, or drop it
    /// depending on the outcome.
    async fn try_wake_waiter(&self, queue: &str) {
        let Some((id, request)) = self.waiters.find(&self.tree, queue) else {
            return;
        };

        let ephemeral_id = match self.idgen.next() {
            Ok(id) => id,
            Err(_) => {
                self.waiters.remove(id);
                return;
            }
        };

        match self.driver.dequeue(queue, ephemeral_id).await {
            Ok(delivery) => {
                // If the waiter canceled between `find` and here, the
                // dequeue still happened and the envelope is legitimately
                // in flight under `ephemeral_id`; it is reclaimed on its
                // own visibility timeout like any other unacked delivery.
                request.deliver(delivery);
                self.waiters.remove(id);
            }
            Err(PluqError::Empty) => self.waiters.reset(id),
            Err(_) => self.waiters.remove(id),
        }
    }

    /// Resolve `name` to its fan-out targets, merge `caller_properties`
    /// over each target's tree-resolved properties (caller wins for
    /// present fields), and persist one envelope per target.
    pub async fn enqueue(
        &self,
        name: &str,
        message: Message,
        caller_properties: Properties,
    ) -> Result<HashMap<String, EnqueueMeta>> {
        let targets = self.tree.find_targets(&split_path(name));

        let mut batch = Vec::with_capacity(targets.len());
        for (queue, tree_props) in &targets {
            let mut effective = tree_props.clone();
            effective.merge_from(&caller_properties);

            let mut retry = effective.effective_retry();
            retry.incr(); // +1 for first attempt

            let envelope = Envelope::new(queue.clone(), retry, effective.effective_timeout(), message.clone());
            let accum = effective.effective_accum_time();
            let options = EnqueueOptions {
                accum_time: if accum.is_zero() { None } else { Some(accum) },
            };

            let id = self.idgen.next()?;
            batch.push((queue.clone(), id, envelope, options));
        }

        // Both shipped drivers rely on the sequential emulation adapter;
        // a driver offering a genuine multi-insert transaction would be
        // wired in here instead, per spec §9's capability-interface note.
        let metas = SequentialMultiEnqueuer { driver: &*self.driver }.enqueue_all(&batch).await?;

        let mut out = HashMap::with_capacity(metas.len());
        for ((queue, ..), meta) in batch.into_iter().zip(metas) {
            self.events.publish(EventKind::MessagePushed, queue.clone()).await;
            out.insert(queue, meta);
        }
        Ok(out)
    }

    /// Mint an ephemeral id, attempt an immediate dequeue across the
    /// resolved targets, and — on `Empty` with `wait > 0` — register a
    /// waiter parameterized by `name`'s path (not the resolved target
    /// list, which may shift while waiting) and race delivery against the
    /// deadline.
    pub async fn dequeue(&self, name: &str, wait: Duration) -> Result<Delivery> {
        let path = split_path(name);
        let targets: Vec<String> = self.tree.find_targets(&path).into_iter().map(|(q, _)| q).collect();

        let ephemeral_id = self.idgen.next()?;
        let immediate = SequentialMultiDequeuer { driver: &*self.driver }.dequeue_any(&targets, ephemeral_id).await;

        match immediate {
            Ok(delivery) => {
                self.events.publish(EventKind::MessagePoped, delivery.envelope.queue.clone()).await;
                return Ok(delivery);
            }
            Err(PluqError::Empty) if wait.is_zero() => return Err(PluqError::Empty),
            Err(PluqError::Empty) => {}
            Err(e) => return Err(e),
        }

        let (id, rx) = self.waiters.add(path);

        // A message can land between the immediate attempt above and the
        // waiter slot just registered; its `MessageAvailable` would fire
        // before the slot existed and never reach this waiter. Re-check
        // storage directly once more before committing to the wait.
        let retry_ephemeral_id = self.idgen.next()?;
        match SequentialMultiDequeuer { driver: &*self.driver }.dequeue_any(&targets, retry_ephemeral_id).await {
            Ok(delivery) => {
                self.waiters.remove(id);
                self.events.publish(EventKind::MessagePoped, delivery.envelope.queue.clone()).await;
                return Ok(delivery);
            }
            Err(PluqError::Empty) => {}
            Err(e) => {
                self.waiters.remove(id);
                return Err(e);
            }
        }

        tokio::select! {
            result = rx => {
                match result {
                    Ok(delivery) => {
                        self.events.publish(EventKind::MessagePoped, delivery.envelope.queue.clone()).await;
                        Ok(delivery)
                    }
                    Err(_) => Err(PluqError::Empty),
                }
            }
            _ = tokio::time::sleep(wait) => {
                // Canceled waiter deadline maps to Empty at this boundary
                // (spec §7 propagation policy).
                self.waiters.remove(id);
                Err(PluqError::Empty)
            }
        }
    }

    pub async fn ack(&self, ephemeral_id: u64) -> Result<()> {
        self.driver.ack(ephemeral_id).await
    }

    pub async fn reset(&self, ephemeral_id: u64) -> Result<()> {
        self.driver.reset(ephemeral_id).await
    }

    pub fn set_properties(&self, name: &str, properties: Properties) {
        self.tree.set(&split_path(name), properties);
    }

    pub fn get_properties(&self, name: &str, inherit: bool) -> Option<Properties> {
        let path = split_path(name);
        if inherit {
            Some(self.tree.resolve(&path))
        } else {
            self.tree.own_properties(&path)
        }
    }
}
