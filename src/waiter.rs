//! WaiterSet: the blocked-consumer registry matched against enqueue events
//! (spec §4.4). The read-scan/write-upgrade-with-revalidation discipline is
//! a direct port of the original `queue/wait.go`'s `waiters.find`/`remove`
//! (its `goto START` retry loop becomes an outer `loop` here). Deadline
//! handling itself moves from `wait.go`'s polled `match()` check to a
//! `tokio::select!` race in the caller (`QueueManager::dequeue`), which is
//! the idiomatic async-Rust shape for "wait until delivery or a deadline".

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;

use crate::property_tree::PropertyTree;
use crate::storage::Delivery;

pub struct WaitRequest {
    path: Vec<String>,
    sender: Mutex<Option<oneshot::Sender<Delivery>>>,
}

impl WaitRequest {
    fn matches(&self, tree: &PropertyTree, queue: &str) -> bool {
        tree.find_targets(&self.path).iter().any(|(name, _)| name == queue)
    }

    /// Single-shot synchronous handoff. Returns `false` if the waiter was
    /// already delivered to or canceled.
    pub fn deliver(&self, delivery: Delivery) -> bool {
        match self.sender.lock().take() {
            Some(tx) => tx.send(delivery).is_ok(),
            None => false,
        }
    }

    /// waiting -> canceled. Dropping the sender closes the receiver so a
    /// pending `await` on it observes cancellation.
    pub fn cancel(&self) {
        self.sender.lock().take();
    }
}

struct Slot {
    id: u64,
    borrowed: bool,
    request: Arc<WaitRequest>,
}

#[derive(Default)]
pub struct WaiterSet {
    slots: RwLock<Vec<Slot>>,
    next_id: AtomicU64,
}

impl WaiterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new waiter for `path`. Returns a handle to cancel it and
    /// the receiver half the caller awaits for delivery.
    pub fn add(&self, path: Vec<String>) -> (u64, oneshot::Receiver<Delivery>) {
        let (tx, rx) = oneshot::channel();
        let request = Arc::new(WaitRequest {
            path,
            sender: Mutex::new(Some(tx)),
        });
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.slots.write().push(Slot {
            id,
            borrowed: false,
            request,
        });
        (id, rx)
    }

    pub fn remove(&self, id: u64) {
        loop {
            let pos = self.slots.read().iter().position(|s| s.id == id);
            let Some(i) = pos else { return };
            let mut slots = self.slots.write();
            if slots.get(i).map(|s| s.id) != Some(id) {
                continue;
            }
            slots.remove(i);
            return;
        }
    }

    /// Find the first unborrowed waiter whose path re-resolves (against the
    /// live tree) to include `queue`, and mark it borrowed.
    pub fn find(&self, tree: &PropertyTree, queue: &str) -> Option<(u64, Arc<WaitRequest>)> {
        loop {
            let candidate = {
                let slots = self.slots.read();
                slots.iter().enumerate().find_map(|(i, s)| {
                    if !s.borrowed && s.request.matches(tree, queue) {
                        Some((i, s.id))
                    } else {
                        None
                    }
                })
            };
            let Some((i, id)) = candidate else { return None };

            let mut slots = self.slots.write();
            match slots.get_mut(i) {
                Some(slot) if slot.id == id && !slot.borrowed => {
                    slot.borrowed = true;
                    return Some((id, slot.request.clone()));
                }
                _ => continue,
            }
        }
    }

    /// Unmark a slot as borrowed after a failed dequeue attempt so another
    /// `MessageAvailable` event may pick it up again.
    pub fn reset(&self, id: u64) {
        loop {
            let pos = self.slots.read().iter().position(|s| s.id == id);
            let Some(i) = pos else { return };
            let mut slots = self.slots.write();
            if slots.get(i).map(|s| s.id) != Some(id) {
                continue;
            }
            slots[i].borrowed = false;
            return;
        }
    }
}
