// tests/event_log.rs

mod common;

use std::time::Duration;

use stepgraph::events::{EngineEvent, EventLog};
use stepgraph_test_utils::with_timeout;
use uuid::Uuid;

use common::init_tracing;

fn created(id: Uuid) -> EngineEvent {
    EngineEvent::TaskCreated { task_uuid: id }
}

#[tokio::test]
async fn restarted_consumer_resumes_after_last_ack() {
    init_tracing();
    let log = EventLog::new();
    let ids: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();

    {
        let mut sub = log.subscribe_all("scheduler-0");
        for id in &ids {
            log.publish(created(*id));
        }
        let first = with_timeout(sub.next()).await.unwrap();
        let second = with_timeout(sub.next()).await.unwrap();
        sub.ack(first.offset);
        sub.ack(second.offset);
        // Third is read but never acknowledged: the consumer "crashes".
        let third = with_timeout(sub.next()).await.unwrap();
        assert_eq!(third.event, created(ids[2]));
    }

    assert_eq!(log.committed_offset("scheduler-0"), Some(2));

    let mut restarted = log.subscribe_all("scheduler-0");
    let redelivered = with_timeout(restarted.next()).await.unwrap();
    assert_eq!(redelivered.event, created(ids[2]));
    let next = with_timeout(restarted.next()).await.unwrap();
    assert_eq!(next.event, created(ids[3]));
}

#[tokio::test]
async fn compaction_keeps_unacknowledged_entries() {
    init_tracing();
    let log = EventLog::new();
    let mut fast = log.subscribe_all("fast");
    let _slow = log.subscribe_all("slow");

    for _ in 0..5 {
        log.publish(created(Uuid::new_v4()));
    }
    for _ in 0..5 {
        let env = with_timeout(fast.next()).await.unwrap();
        fast.ack(env.offset);
    }

    // `slow` has acknowledged nothing, so nothing may be dropped.
    assert_eq!(log.compact(), 0);
    assert_eq!(log.len(), 5);
}

#[tokio::test]
async fn waiting_consumer_wakes_on_publish_and_close() {
    init_tracing();
    let log = EventLog::new();
    let mut sub = log.subscribe_all("waiter");

    let publisher = log.clone();
    let id = Uuid::new_v4();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        publisher.publish(EngineEvent::CancelRequested { task_uuid: id });
        tokio::time::sleep(Duration::from_millis(20)).await;
        publisher.close();
    });

    let env = with_timeout(sub.next()).await.unwrap();
    assert_eq!(env.event, EngineEvent::CancelRequested { task_uuid: id });
    assert!(with_timeout(sub.next()).await.is_none());
    assert!(log.is_closed());
}
