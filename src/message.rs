//! Message/Envelope types (spec §3). These are plain data; the wire/byte
//! encoding used to persist them lives in [`crate::codec`].

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::retry::Retry;

#[derive(Debug, Clone)]
pub struct Message {
    pub body: Bytes,
    pub content_type: String,
    pub metadata: Option<HashMap<String, Bytes>>,
}

/// The persistable unit written to storage. Composite when accumulated —
/// more than one Message in `messages`.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub queue: String,
    pub retry: Retry,
    pub timeout: Duration,
    pub messages: Vec<Message>,
}

impl Envelope {
    pub fn new(queue: String, retry: Retry, timeout: Duration, first: Message) -> Self {
        Self {
            queue,
            retry,
            timeout,
            messages: vec![first],
        }
    }

    pub fn is_composite(&self) -> bool {
        self.messages.len() > 1
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnqueueOptions {
    pub accum_time: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccumState {
    Disabled,
    Started,
    Added,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueMeta {
    pub accum_state: AccumState,
}
