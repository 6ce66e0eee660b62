use std::sync::Arc;

use pluq::clock::{Clock, ManualClock};
use pluq::event_bus::EventBus;
use pluq::id::IdGenerator;
use pluq::property_tree::PropertyTree;
use pluq::queue_manager::QueueManager;
use pluq::storage::memory::MemoryDriver;
use pluq::storage::StorageDriver;

/// A fully wired `QueueManager` over the volatile in-memory driver, plus
/// the `ManualClock` driving it so scenarios can advance time deterministically,
/// and the `EventBus` itself so a test can attach its own observer handlers.
pub fn setup_manager() -> (Arc<QueueManager>, Arc<ManualClock>, Arc<EventBus>) {
    let clock = ManualClock::new(1_700_000_000_000_000_000);
    let events = EventBus::new(1000);
    events.spawn();
    let driver: Arc<dyn StorageDriver> = Arc::new(MemoryDriver::new(clock.clone() as Arc<dyn Clock>, events.clone()));
    let tree = Arc::new(PropertyTree::new());
    let idgen = Arc::new(IdGenerator::new(clock.clone() as Arc<dyn Clock>));
    let manager = QueueManager::new(tree, driver, events.clone(), idgen);
    (manager, clock, events)
}
