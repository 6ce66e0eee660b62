//! Persistent StorageDriver backed by redb (spec §4.2, §6). redb is the
//! Rust analog to the original's BoltDB backend: a single-file, ACID,
//! ordered-byte-key embedded store. Transaction shape grounded on
//! `nclav-store::RedbStore`; byte layouts follow spec §4.2/§6 exactly so
//! the on-disk format is stable.
//!
//! Key/value layouts (all integers big-endian):
//! - `schedule`: key = `available_at_nanos(8) || queue_name || accumulating(1)`;
//!   value = `message_id(8) || retry(8, i64::MIN means no-limit) || timeout_nanos(8)`.
//! - `message`: key = `message_id(8)`; value = codec-encoded record(s),
//!   appended to in place for accumulation.
//! - `replyIndex`: key = `ephemeral_id(8)`; value = `message_id(8) || schedule_key`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::codec::MessageCodec;
use crate::error::{PluqError, Result};
use crate::event_bus::{EventBus, EventKind};
use crate::message::{AccumState, Envelope, EnqueueMeta, EnqueueOptions};
use crate::retry::Retry;

use super::{Delivery, StorageDriver};

const SCHEDULE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("schedule");
const MESSAGE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("message");
const REPLY_INDEX: TableDefinition<&[u8], &[u8]> = TableDefinition::new("replyIndex");

fn schedule_key(available_at_nanos: u64, queue: &str, accumulating: bool) -> Vec<u8> {
    let mut key = Vec::with_capacity(9 + queue.len());
    key.extend(available_at_nanos.to_be_bytes());
    key.extend_from_slice(queue.as_bytes());
    key.push(accumulating as u8);
    key
}

fn parse_schedule_key(key: &[u8]) -> (u64, &str, bool) {
    let available_at = u64::from_be_bytes(key[0..8].try_into().unwrap());
    let accumulating = key[key.len() - 1] != 0;
    let queue = std::str::from_utf8(&key[8..key.len() - 1]).unwrap_or("");
    (available_at, queue, accumulating)
}

fn encode_retry(retry: Retry) -> i64 {
    match retry {
        Retry::NoLimit => i64::MIN,
        Retry::Limited(n) => n,
    }
}

fn decode_retry(v: i64) -> Retry {
    if v == i64::MIN {
        Retry::NoLimit
    } else {
        Retry::Limited(v)
    }
}

fn schedule_value(message_id: u64, retry: Retry, timeout: Duration) -> Vec<u8> {
    let mut v = Vec::with_capacity(24);
    v.extend(message_id.to_be_bytes());
    v.extend(encode_retry(retry).to_be_bytes());
    v.extend((timeout.as_nanos() as u64).to_be_bytes());
    v
}

fn parse_schedule_value(v: &[u8]) -> (u64, Retry, Duration) {
    let message_id = u64::from_be_bytes(v[0..8].try_into().unwrap());
    let retry = decode_retry(i64::from_be_bytes(v[8..16].try_into().unwrap()));
    let timeout = Duration::from_nanos(u64::from_be_bytes(v[16..24].try_into().unwrap()));
    (message_id, retry, timeout)
}

fn reply_value(message_id: u64, schedule_key: &[u8]) -> Vec<u8> {
    let mut v = Vec::with_capacity(8 + schedule_key.len());
    v.extend(message_id.to_be_bytes());
    v.extend_from_slice(schedule_key);
    v
}

fn parse_reply_value(v: &[u8]) -> (u64, &[u8]) {
    let message_id = u64::from_be_bytes(v[0..8].try_into().unwrap());
    (message_id, &v[8..])
}

pub struct RedbDriver {
    db: Arc<Database>,
    clock: Arc<dyn Clock>,
    codec: Arc<dyn MessageCodec>,
    events: Arc<EventBus>,
    gc_interval: Duration,
}

impl RedbDriver {
    pub fn open(
        path: &Path,
        clock: Arc<dyn Clock>,
        codec: Arc<dyn MessageCodec>,
        events: Arc<EventBus>,
        gc_interval: Duration,
    ) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PluqError::Storage(e.to_string()))?;
        }
        let db = Database::create(path)?;
        {
            let wtxn = db.begin_write()?;
            wtxn.open_table(SCHEDULE)?;
            wtxn.open_table(MESSAGE)?;
            wtxn.open_table(REPLY_INDEX)?;
            wtxn.commit()?;
        }
        Ok(Self {
            db: Arc::new(db),
            clock,
            codec,
            events,
            gc_interval,
        })
    }

    /// Periodically drop replyIndex entries whose lease has expired.
    /// Optimization only: staleness is also detected on access (spec §4.2).
    pub fn spawn_gc(self: &Arc<Self>) -> JoinHandle<()> {
        let driver = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(driver.gc_interval).await;
                if let Err(e) = driver.gc_once() {
                    tracing::warn!(error = %e, "replyIndex gc pass failed");
                }
            }
        })
    }

    fn gc_once(&self) -> Result<()> {
        let now = self.clock.now_nanos();
        let wtxn = self.db.begin_write()?;
        let mut stale = Vec::new();
        {
            let table = wtxn.open_table(REPLY_INDEX)?;
            for entry in table.iter()? {
                let (k, v) = entry?;
                let (_message_id, schedule_key) = parse_reply_value(v.value());
                let (expire_at, _, _) = parse_schedule_key(schedule_key);
                if expire_at <= now {
                    stale.push(k.value().to_vec());
                }
            }
        }
        if !stale.is_empty() {
            let mut table = wtxn.open_table(REPLY_INDEX)?;
            for key in &stale {
                table.remove(key.as_slice())?;
            }
        }
        wtxn.commit()?;
        Ok(())
    }
}

#[async_trait]
impl StorageDriver for RedbDriver {
    async fn enqueue(&self, queue: &str, id: u64, mut envelope: Envelope, options: EnqueueOptions) -> Result<EnqueueMeta> {
        let now = self.clock.now_nanos();
        let wtxn = self.db.begin_write()?;
        let meta;
        {
            let mut schedule = wtxn.open_table(SCHEDULE)?;
            let mut message = wtxn.open_table(MESSAGE)?;

            let mut accum_hit: Option<(Vec<u8>, u64)> = None;
            if let Some(accum_time) = options.accum_time.filter(|d| !d.is_zero()) {
                for entry in schedule.iter()? {
                    let (k, v) = entry?;
                    let key_bytes = k.value().to_vec();
                    let (available_at, q, accumulating) = parse_schedule_key(&key_bytes);
                    if accumulating && q == queue && available_at > now {
                        let (message_id, _retry, _timeout) = parse_schedule_value(v.value());
                        accum_hit = Some((key_bytes, message_id));
                        break;
                    }
                }

                if let Some((_key_bytes, message_id)) = accum_hit {
                    let existing = message
                        .get(message_id.to_be_bytes().as_slice())?
                        .map(|g| g.value().to_vec())
                        .unwrap_or_default();
                    let first = envelope.messages.remove(0);
                    let updated = self.codec.append(&existing, &first);
                    message.insert(message_id.to_be_bytes().as_slice(), updated.as_slice())?;
                    meta = EnqueueMeta { accum_state: AccumState::Added };
                } else {
                    let mut available_at = now + accum_time.as_nanos() as u64;
                    let mut key = schedule_key(available_at, queue, true);
                    while schedule.get(key.as_slice())?.is_some() {
                        available_at += 1;
                        key = schedule_key(available_at, queue, true);
                    }
                    let value = schedule_value(id, envelope.retry, envelope.timeout);
                    schedule.insert(key.as_slice(), value.as_slice())?;
                    let first = envelope.messages.remove(0);
                    message.insert(id.to_be_bytes().as_slice(), self.codec.encode(&first).as_slice())?;
                    meta = EnqueueMeta { accum_state: AccumState::Started };
                }
            } else {
                let mut available_at = now;
                let mut key = schedule_key(available_at, queue, false);
                while schedule.get(key.as_slice())?.is_some() {
                    available_at += 1;
                    key = schedule_key(available_at, queue, false);
                }
                let value = schedule_value(id, envelope.retry, envelope.timeout);
                schedule.insert(key.as_slice(), value.as_slice())?;

                let mut body = Vec::new();
                for m in &envelope.messages {
                    body = self.codec.append(&body, m);
                }
                message.insert(id.to_be_bytes().as_slice(), body.as_slice())?;
                meta = EnqueueMeta { accum_state: AccumState::Disabled };
            }
        }
        wtxn.commit()?;

        if meta.accum_state == AccumState::Disabled {
            self.events.publish(EventKind::MessageAvailable, queue).await;
        }
        Ok(meta)
    }

    async fn dequeue(&self, queue: &str, new_ephemeral_id: u64) -> Result<Delivery> {
        let now = self.clock.now_nanos();
        let wtxn = self.db.begin_write()?;

        let mut discarded_queues = Vec::new();
        let mut hit: Option<(Vec<u8>, u64, Retry, Duration)> = None;
        {
            let schedule = wtxn.open_table(SCHEDULE)?;
            'scan: for entry in schedule.iter()? {
                let (k, v) = entry?;
                let key_bytes = k.value().to_vec();
                let (available_at, q, _accumulating) = parse_schedule_key(&key_bytes);
                if available_at > now {
                    break 'scan;
                }
                let (message_id, retry, timeout) = parse_schedule_value(v.value());
                if !retry.is_valid() {
                    discarded_queues.push((key_bytes, message_id, q.to_string()));
                    continue;
                }
                if q == queue {
                    hit = Some((key_bytes, message_id, retry, timeout));
                    break 'scan;
                }
            }
        }

        if !discarded_queues.is_empty() {
            let mut schedule = wtxn.open_table(SCHEDULE)?;
            let mut message = wtxn.open_table(MESSAGE)?;
            for (key, message_id, _queue) in &discarded_queues {
                schedule.remove(key.as_slice())?;
                message.remove(message_id.to_be_bytes().as_slice())?;
            }
        }

        let Some((old_key, message_id, mut retry, timeout)) = hit else {
            wtxn.commit()?;
            for (_, _, q) in discarded_queues {
                self.events.publish(EventKind::MessageDiscarded, q).await;
            }
            return Err(PluqError::Empty);
        };

        let body = {
            let message = wtxn.open_table(MESSAGE)?;
            message
                .get(message_id.to_be_bytes().as_slice())?
                .map(|g| g.value().to_vec())
                .ok_or(PluqError::MessageMissing(message_id))?
        };
        let messages = self.codec.decode_all(&body)?;

        retry.decr();
        let new_available_at = now + timeout.as_nanos() as u64;
        let new_key = schedule_key(new_available_at, queue, false);
        {
            let mut schedule = wtxn.open_table(SCHEDULE)?;
            schedule.remove(old_key.as_slice())?;
            schedule.insert(new_key.as_slice(), schedule_value(message_id, retry, timeout).as_slice())?;
        }
        {
            let mut reply_index = wtxn.open_table(REPLY_INDEX)?;
            reply_index.insert(
                new_ephemeral_id.to_be_bytes().as_slice(),
                reply_value(message_id, &new_key).as_slice(),
            )?;
        }
        wtxn.commit()?;

        for (_, _, q) in discarded_queues {
            self.events.publish(EventKind::MessageDiscarded, q).await;
        }

        Ok(Delivery {
            ephemeral_id: new_ephemeral_id,
            envelope: Envelope {
                queue: queue.to_string(),
                retry,
                timeout,
                messages,
            },
        })
    }

    async fn ack(&self, ephemeral_id: u64) -> Result<()> {
        let now = self.clock.now_nanos();
        let wtxn = self.db.begin_write()?;

        let (message_id, schedule_key_bytes) = {
            let reply_index = wtxn.open_table(REPLY_INDEX)?;
            let v = reply_index
                .get(ephemeral_id.to_be_bytes().as_slice())?
                .ok_or(PluqError::InvalidEphemeralId)?;
            let (message_id, schedule_key) = parse_reply_value(v.value());
            (message_id, schedule_key.to_vec())
        };

        {
            let schedule = wtxn.open_table(SCHEDULE)?;
            let (expire_at, _, _) = parse_schedule_key(&schedule_key_bytes);
            if expire_at <= now || schedule.get(schedule_key_bytes.as_slice())?.is_none() {
                return Err(PluqError::InvalidEphemeralId);
            }
        }

        {
            let mut schedule = wtxn.open_table(SCHEDULE)?;
            schedule.remove(schedule_key_bytes.as_slice())?;
        }
        {
            let mut message = wtxn.open_table(MESSAGE)?;
            message.remove(message_id.to_be_bytes().as_slice())?;
        }
        {
            let mut reply_index = wtxn.open_table(REPLY_INDEX)?;
            reply_index.remove(ephemeral_id.to_be_bytes().as_slice())?;
        }
        wtxn.commit()?;
        Ok(())
    }

    async fn reset(&self, ephemeral_id: u64) -> Result<()> {
        let now = self.clock.now_nanos();
        let wtxn = self.db.begin_write()?;

        let (message_id, schedule_key_bytes) = {
            let reply_index = wtxn.open_table(REPLY_INDEX)?;
            let v = reply_index
                .get(ephemeral_id.to_be_bytes().as_slice())?
                .ok_or(PluqError::InvalidEphemeralId)?;
            let (message_id, schedule_key) = parse_reply_value(v.value());
            (message_id, schedule_key.to_vec())
        };

        let (expire_at, queue, mut retry, timeout) = {
            let schedule = wtxn.open_table(SCHEDULE)?;
            let (expire_at, queue, _) = parse_schedule_key(&schedule_key_bytes);
            let value = schedule
                .get(schedule_key_bytes.as_slice())?
                .ok_or(PluqError::InvalidEphemeralId)?;
            let (_message_id, retry, timeout) = parse_schedule_value(value.value());
            (expire_at, queue.to_string(), retry, timeout)
        };
        if expire_at <= now {
            return Err(PluqError::InvalidEphemeralId);
        }
        retry.incr();

        let new_key = schedule_key(0, &queue, false);
        {
            let mut schedule = wtxn.open_table(SCHEDULE)?;
            schedule.remove(schedule_key_bytes.as_slice())?;
            schedule.insert(new_key.as_slice(), schedule_value(message_id, retry, timeout).as_slice())?;
        }
        {
            let mut reply_index = wtxn.open_table(REPLY_INDEX)?;
            reply_index.remove(ephemeral_id.to_be_bytes().as_slice())?;
        }
        wtxn.commit()?;

        self.events.publish(EventKind::MessageAvailable, queue).await;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
