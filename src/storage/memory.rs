//! In-memory StorageDriver (spec §4.2). Grounded on the original
//! `storage/memory/driver.go`'s scan/scheduling semantics, re-expressed
//! over a `BTreeMap<(available_at, seq), Entry>` instead of a
//! `container/heap`-backed array, per spec §9's documented alternative
//! ("switch to an ordered map keyed by (available_at, unique) with direct
//! removal") — Rust's `BTreeMap` gives that for free, so no lazy-deletion
//! flag is needed. Shape (an `Arc<RwLock<Inner>>` single-struct state) is
//! grounded on `nclav-store`'s `InMemoryStore`.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::clock::Clock;
use crate::error::{PluqError, Result};
use crate::event_bus::{EventBus, EventKind};
use crate::message::{AccumState, Envelope, EnqueueMeta, EnqueueOptions};

use super::{Delivery, StorageDriver};

type ScheduleKey = (u64, u64); // (available_at_nanos, seq)

struct Entry {
    queue: String,
    envelope: Envelope,
    accumulating: bool,
    ephemeral_id: Option<u64>,
}

#[derive(Default)]
struct Inner {
    schedule: BTreeMap<ScheduleKey, Entry>,
    ephemeral_index: HashMap<u64, ScheduleKey>,
    accumulating: HashMap<String, ScheduleKey>,
}

pub struct MemoryDriver {
    inner: RwLock<Inner>,
    clock: Arc<dyn Clock>,
    events: Arc<EventBus>,
    seq: AtomicU64,
}

impl MemoryDriver {
    pub fn new(clock: Arc<dyn Clock>, events: Arc<EventBus>) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            clock,
            events,
            seq: AtomicU64::new(0),
        }
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl StorageDriver for MemoryDriver {
    async fn enqueue(&self, queue: &str, _id: u64, envelope: Envelope, options: EnqueueOptions) -> Result<EnqueueMeta> {
        let now = self.clock.now_nanos();
        let mut inner = self.inner.write().await;

        if let Some(accum_time) = options.accum_time.filter(|d| !d.is_zero()) {
            if let Some(&key) = inner.accumulating.get(queue) {
                if key.0 > now {
                    let entry = inner.schedule.get_mut(&key).expect("accumulating index out of sync");
                    entry.envelope.messages.push(envelope.messages.into_iter().next().expect("envelope carries one message"));
                    return Ok(EnqueueMeta { accum_state: AccumState::Added });
                }
                inner.accumulating.remove(queue);
            }

            let available_at = now + accum_time.as_nanos() as u64;
            let key = (available_at, self.next_seq());
            inner.schedule.insert(
                key,
                Entry {
                    queue: queue.to_string(),
                    envelope,
                    accumulating: true,
                    ephemeral_id: None,
                },
            );
            inner.accumulating.insert(queue.to_string(), key);
            return Ok(EnqueueMeta { accum_state: AccumState::Started });
        }

        let key = (now, self.next_seq());
        inner.schedule.insert(
            key,
            Entry {
                queue: queue.to_string(),
                envelope,
                accumulating: false,
                ephemeral_id: None,
            },
        );
        drop(inner);
        self.events.publish(EventKind::MessageAvailable, queue).await;
        Ok(EnqueueMeta { accum_state: AccumState::Disabled })
    }

    async fn dequeue(&self, queue: &str, new_ephemeral_id: u64) -> Result<Delivery> {
        let now = self.clock.now_nanos();
        let mut inner = self.inner.write().await;

        let mut discarded = Vec::new();
        let mut hit: Option<ScheduleKey> = None;

        for (&key, entry) in inner.schedule.range(..=(now, u64::MAX)) {
            if !entry.envelope.retry.is_valid() {
                discarded.push((key, entry.queue.clone()));
                continue;
            }
            if entry.queue == queue {
                hit = Some(key);
                break;
            }
        }

        for (key, queue) in discarded {
            inner.schedule.remove(&key);
            inner.accumulating.remove(&queue);
            self.events.publish(EventKind::MessageDiscarded, queue).await;
        }

        let Some(old_key) = hit else {
            return Err(PluqError::Empty);
        };

        let mut entry = inner.schedule.remove(&old_key).expect("hit key just observed");
        inner.accumulating.remove(&entry.queue);

        let new_available_at = now + entry.envelope.timeout.as_nanos() as u64;
        entry.envelope.retry.decr();
        entry.accumulating = false;
        entry.ephemeral_id = Some(new_ephemeral_id);
        let envelope = entry.envelope.clone();

        let new_key = (new_available_at, self.next_seq());
        inner.ephemeral_index.insert(new_ephemeral_id, new_key);
        inner.schedule.insert(new_key, entry);

        Ok(Delivery {
            ephemeral_id: new_ephemeral_id,
            envelope,
        })
    }

    async fn ack(&self, ephemeral_id: u64) -> Result<()> {
        let now = self.clock.now_nanos();
        let mut inner = self.inner.write().await;
        let key = *inner
            .ephemeral_index
            .get(&ephemeral_id)
            .ok_or(PluqError::InvalidEphemeralId)?;

        let valid = inner
            .schedule
            .get(&key)
            .map(|e| e.ephemeral_id == Some(ephemeral_id) && key.0 > now)
            .unwrap_or(false);
        if !valid {
            return Err(PluqError::InvalidEphemeralId);
        }

        inner.schedule.remove(&key);
        inner.ephemeral_index.remove(&ephemeral_id);
        Ok(())
    }

    async fn reset(&self, ephemeral_id: u64) -> Result<()> {
        let now = self.clock.now_nanos();
        let mut inner = self.inner.write().await;
        let key = *inner
            .ephemeral_index
            .get(&ephemeral_id)
            .ok_or(PluqError::InvalidEphemeralId)?;

        let valid = inner
            .schedule
            .get(&key)
            .map(|e| e.ephemeral_id == Some(ephemeral_id) && key.0 > now)
            .unwrap_or(false);
        if !valid {
            return Err(PluqError::InvalidEphemeralId);
        }

        let mut entry = inner.schedule.remove(&key).expect("validated above");
        inner.ephemeral_index.remove(&ephemeral_id);
        entry.envelope.retry.incr();
        entry.ephemeral_id = None;
        let queue = entry.queue.clone();

        let new_key = (0, self.next_seq());
        inner.schedule.insert(new_key, entry);
        drop(inner);
        self.events.publish(EventKind::MessageAvailable, queue).await;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::message::Message;
    use crate::retry::Retry;
    use bytes::Bytes;
    use std::time::Duration;

    fn envelope(queue: &str, retry: Retry) -> Envelope {
        Envelope::new(
            queue.to_string(),
            retry,
            Duration::from_secs(1),
            Message {
                body: Bytes::from("x"),
                content_type: "text/plain".to_string(),
                metadata: None,
            },
        )
    }

    fn driver() -> (MemoryDriver, Arc<ManualClock>) {
        let clock = ManualClock::new(1_000_000_000);
        let events = EventBus::new(1000);
        events.spawn();
        (MemoryDriver::new(clock.clone(), events), clock)
    }

    #[tokio::test]
    async fn enqueue_then_dequeue_returns_the_message() {
        let (driver, _clock) = driver();
        driver
            .enqueue("a", 1, envelope("a", Retry::Limited(3)), EnqueueOptions::default())
            .await
            .unwrap();

        let delivery = driver.dequeue("a", 99).await.unwrap();
        assert_eq!(delivery.envelope.messages[0].body, Bytes::from("x"));
        assert_eq!(delivery.envelope.retry, Retry::Limited(2));
    }

    #[tokio::test]
    async fn empty_queue_reports_empty() {
        let (driver, _clock) = driver();
        assert!(matches!(driver.dequeue("nope", 1).await, Err(PluqError::Empty)));
    }

    #[tokio::test]
    async fn ack_removes_the_envelope_permanently() {
        let (driver, _clock) = driver();
        driver
            .enqueue("a", 1, envelope("a", Retry::Limited(3)), EnqueueOptions::default())
            .await
            .unwrap();
        let delivery = driver.dequeue("a", 42).await.unwrap();
        driver.ack(delivery.ephemeral_id).await.unwrap();
        assert!(matches!(driver.ack(delivery.ephemeral_id).await, Err(PluqError::InvalidEphemeralId)));
        assert!(matches!(driver.dequeue("a", 43).await, Err(PluqError::Empty)));
    }

    #[tokio::test]
    async fn reset_makes_the_envelope_immediately_visible_again() {
        let (driver, _clock) = driver();
        driver
            .enqueue("a", 1, envelope("a", Retry::Limited(3)), EnqueueOptions::default())
            .await
            .unwrap();
        let delivery = driver.dequeue("a", 7).await.unwrap();
        driver.reset(delivery.ephemeral_id).await.unwrap();

        let redelivered = driver.dequeue("a", 8).await.unwrap();
        assert_eq!(redelivered.envelope.retry, Retry::Limited(3));
    }

    #[tokio::test]
    async fn exhausted_retry_is_discarded_on_visibility_scan() {
        let (driver, _clock) = driver();
        driver
            .enqueue("a", 1, envelope("a", Retry::Limited(1)), EnqueueOptions::default())
            .await
            .unwrap();
        let delivery = driver.dequeue("a", 1).await.unwrap();
        assert_eq!(delivery.envelope.retry, Retry::Limited(0));
        driver.reset(delivery.ephemeral_id).await.unwrap();

        assert!(matches!(driver.dequeue("a", 2).await, Err(PluqError::Empty)));
    }

    #[tokio::test]
    async fn accumulation_appends_to_the_open_window() {
        let (driver, _clock) = driver();
        let options = EnqueueOptions { accum_time: Some(Duration::from_secs(5)) };

        let first = driver.enqueue("q", 1, envelope("q", Retry::Limited(3)), options).await.unwrap();
        assert_eq!(first.accum_state, AccumState::Started);

        let second = driver.enqueue("q", 2, envelope("q", Retry::Limited(3)), options).await.unwrap();
        assert_eq!(second.accum_state, AccumState::Added);

        let third = driver.enqueue("q", 3, envelope("q", Retry::Limited(3)), options).await.unwrap();
        assert_eq!(third.accum_state, AccumState::Added);
    }
}
