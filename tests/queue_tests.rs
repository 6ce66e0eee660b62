mod helpers;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use pluq::error::PluqError;
use pluq::event_bus::EventKind;
use pluq::message::{AccumState, Message};
use pluq::property_tree::Properties;
use pluq::retry::Retry;

use helpers::setup_manager;

fn msg(body: &str) -> Message {
    Message {
        body: Bytes::from(body.to_string()),
        content_type: "text/plain".to_string(),
        metadata: None,
    }
}

mod scenarios {
    use super::*;

    /// S1: push, pop, ack, then the queue reports empty again.
    #[tokio::test]
    async fn push_pop_ack() {
        let (manager, _clock, _events) = setup_manager();

        manager.enqueue("a", msg("hi"), Properties::default()).await.unwrap();

        let delivery = manager.dequeue("a", Duration::ZERO).await.unwrap();
        assert_eq!(delivery.envelope.messages[0].body, Bytes::from("hi"));

        manager.ack(delivery.ephemeral_id).await.unwrap();

        assert!(matches!(manager.dequeue("a", Duration::ZERO).await, Err(PluqError::Empty)));
    }

    /// S2: retry-remaining is decremented on each unacked dequeue, and the
    /// envelope is discarded once it hits zero, raising `MessageDiscarded`.
    #[tokio::test]
    async fn retry_exhaustion() {
        let (manager, clock, events) = setup_manager();
        let discarded = Arc::new(AtomicUsize::new(0));
        let counter = discarded.clone();
        events.handle(
            EventKind::MessageDiscarded,
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        manager.set_properties(
            "a",
            Properties {
                retry: Some(Retry::Limited(1)),
                timeout: Some(Duration::from_millis(10)),
                ..Default::default()
            },
        );
        manager.enqueue("a", msg("x"), Properties::default()).await.unwrap();

        // +1 for current attempt: retry=1 becomes 2 on enqueue, then 1 after this dequeue.
        let first = manager.dequeue("a", Duration::ZERO).await.unwrap();
        assert_eq!(first.envelope.retry, Retry::Limited(1));
        clock.advance(Duration::from_millis(10).as_nanos() as u64);

        let second = manager.dequeue("a", Duration::ZERO).await.unwrap();
        assert_eq!(second.envelope.retry, Retry::Limited(0));
        clock.advance(Duration::from_millis(10).as_nanos() as u64);

        assert!(matches!(manager.dequeue("a", Duration::ZERO).await, Err(PluqError::Empty)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(discarded.load(Ordering::SeqCst), 1);
    }

    /// S3: properties resolve by merging ancestors' fields, descendant wins
    /// only at and below itself.
    #[tokio::test]
    async fn property_inheritance() {
        let (manager, _clock, _events) = setup_manager();

        manager.set_properties("a", Properties { timeout: Some(Duration::from_secs(1)), ..Default::default() });
        manager.set_properties("a/b", Properties { retry: Some(Retry::Limited(3)), ..Default::default() });

        let resolved = manager.get_properties("a/b", true).unwrap();
        assert_eq!(resolved.timeout, Some(Duration::from_secs(1)));
        assert_eq!(resolved.retry, Some(Retry::Limited(3)));
    }

    /// S4: a `recurse` ancestor fans out to every descendant target.
    #[tokio::test]
    async fn recurse_fan_out() {
        let (manager, _clock, _events) = setup_manager();

        manager.set_properties("a", Properties { recurse: Some(true), ..Default::default() });
        manager.set_properties("a/b", Properties::default());
        manager.set_properties("a/c", Properties::default());

        let metas = manager.enqueue("a", msg("x"), Properties::default()).await.unwrap();
        let mut queues: Vec<_> = metas.keys().cloned().collect();
        queues.sort();
        assert_eq!(queues, vec!["a", "a/b", "a/c"]);
    }

    /// S5: concurrent accumulating enqueues within the window collapse into
    /// one composite envelope, `started` then `added`.
    #[tokio::test]
    async fn accumulation() {
        let (manager, clock, _events) = setup_manager();
        manager.set_properties("q", Properties { accum_time: Some(Duration::from_millis(100)), ..Default::default() });

        let m1 = manager.enqueue("q", msg("one"), Properties::default()).await.unwrap();
        assert_eq!(m1["q"].accum_state, AccumState::Started);
        let m2 = manager.enqueue("q", msg("two"), Properties::default()).await.unwrap();
        assert_eq!(m2["q"].accum_state, AccumState::Added);
        let m3 = manager.enqueue("q", msg("three"), Properties::default()).await.unwrap();
        assert_eq!(m3["q"].accum_state, AccumState::Added);

        clock.advance(Duration::from_millis(150).as_nanos() as u64);
        let delivery = manager.dequeue("q", Duration::ZERO).await.unwrap();
        assert!(delivery.envelope.is_composite());
        let bodies: Vec<_> = delivery.envelope.messages.iter().map(|m| m.body.clone()).collect();
        assert_eq!(bodies, vec![Bytes::from("one"), Bytes::from("two"), Bytes::from("three")]);
    }

    /// S6: a dequeue blocked on an empty queue is woken by a later enqueue,
    /// well before its wait deadline.
    #[tokio::test]
    async fn long_poll_wakes_on_enqueue() {
        let (manager, _clock, _events) = setup_manager();

        let waiter = manager.clone();
        let handle = tokio::spawn(async move { waiter.dequeue("q", Duration::from_secs(2)).await });

        tokio::time::sleep(Duration::from_millis(20)).await; // let the waiter register
        manager.enqueue("q", msg("hi"), Properties::default()).await.unwrap();

        let delivery = handle.await.unwrap().unwrap();
        assert_eq!(delivery.envelope.messages[0].body, Bytes::from("hi"));
    }
}

mod invariants {
    use super::*;

    /// Invariant 1: the dequeued envelope carries the enqueued message.
    #[tokio::test]
    async fn dequeued_envelope_contains_the_enqueued_message() {
        let (manager, _clock, _events) = setup_manager();
        manager.enqueue("a", msg("payload"), Properties::default()).await.unwrap();
        let delivery = manager.dequeue("a", Duration::ZERO).await.unwrap();
        assert!(delivery.envelope.messages.iter().any(|m| m.body == Bytes::from("payload")));
    }

    /// Invariant 2: two dequeues issued before ack/timeout never return the
    /// same envelope twice.
    #[tokio::test]
    async fn no_duplicate_delivery_within_unacked_window() {
        let (manager, _clock, _events) = setup_manager();
        manager.enqueue("a", msg("only"), Properties::default()).await.unwrap();
        let _first = manager.dequeue("a", Duration::ZERO).await.unwrap();
        assert!(matches!(manager.dequeue("a", Duration::ZERO).await, Err(PluqError::Empty)));
    }

    /// Invariant 3: after ack, no subsequent dequeue returns that envelope.
    #[tokio::test]
    async fn ack_makes_the_envelope_unreachable() {
        let (manager, clock, _events) = setup_manager();
        manager.set_properties("a", Properties { timeout: Some(Duration::from_millis(1)), ..Default::default() });
        manager.enqueue("a", msg("only"), Properties::default()).await.unwrap();
        let delivery = manager.dequeue("a", Duration::ZERO).await.unwrap();
        manager.ack(delivery.ephemeral_id).await.unwrap();

        clock.advance(Duration::from_secs(1).as_nanos() as u64);
        assert!(matches!(manager.dequeue("a", Duration::ZERO).await, Err(PluqError::Empty)));
    }

    /// Invariant 4: an unacked delivery becomes eligible again after its
    /// timeout, with retry-remaining decremented by exactly one.
    #[tokio::test]
    async fn unacked_delivery_returns_with_retry_decremented() {
        let (manager, clock, _events) = setup_manager();
        manager.set_properties(
            "a",
            Properties { retry: Some(Retry::Limited(5)), timeout: Some(Duration::from_millis(10)), ..Default::default() },
        );
        manager.enqueue("a", msg("only"), Properties::default()).await.unwrap();

        let first = manager.dequeue("a", Duration::ZERO).await.unwrap();
        assert_eq!(first.envelope.retry, Retry::Limited(5));

        clock.advance(Duration::from_millis(10).as_nanos() as u64);
        let second = manager.dequeue("a", Duration::ZERO).await.unwrap();
        assert_eq!(second.envelope.retry, Retry::Limited(4));
    }
}
