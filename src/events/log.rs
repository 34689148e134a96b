// src/events/log.rs

//! In-process, acknowledged event log.
//!
//! Offsets are assigned monotonically on publish. Each named consumer has a
//! committed position; a subscription starts reading at that position and
//! moves it forward on [`Subscription::ack`], or past entries its predicate
//! skips while nothing delivered is awaiting an ack. Dropping a subscription
//! without acking and subscribing again under the same name redelivers
//! everything that was not acknowledged.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::Notify;
use tracing::{debug, trace};

use super::{EngineEvent, EventEnvelope};

/// Filter deciding which events a subscription sees.
pub type EventPredicate = Arc<dyn Fn(&EngineEvent) -> bool + Send + Sync>;

#[derive(Debug, Default)]
struct LogState {
    entries: VecDeque<EventEnvelope>,
    /// Offset of `entries[0]`.
    base_offset: u64,
    next_offset: u64,
    /// Consumer name -> first offset not yet acknowledged.
    committed: HashMap<String, u64>,
    closed: bool,
}

impl LogState {
    fn entry(&self, offset: u64) -> Option<&EventEnvelope> {
        let idx = offset.checked_sub(self.base_offset)?;
        self.entries.get(usize::try_from(idx).ok()?)
    }

    /// Move `consumer`'s committed position forward to `next`. Never moves
    /// it back.
    fn advance(&mut self, consumer: &str, next: u64) {
        let slot = self.committed.entry(consumer.to_string()).or_insert(0);
        if next > *slot {
            *slot = next;
        }
    }
}

#[derive(Default)]
struct Inner {
    state: Mutex<LogState>,
    notify: Notify,
}

/// Cloneable handle to a shared event log.
#[derive(Clone, Default)]
pub struct EventLog {
    inner: Arc<Inner>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, LogState> {
        // Every critical section leaves the state consistent, so a panic
        // elsewhere does not invalidate it.
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an event and wake every waiting subscription. Returns the
    /// event's offset.
    pub fn publish(&self, event: EngineEvent) -> u64 {
        let offset = {
            let mut state = self.state();
            let offset = state.next_offset;
            state.next_offset += 1;
            trace!(offset, kind = event.kind(), "publishing event");
            state.entries.push_back(EventEnvelope {
                offset,
                published_at: Utc::now(),
                event,
            });
            offset
        };
        self.inner.notify.notify_waiters();
        offset
    }

    /// Open a subscription for `consumer`, starting after its last
    /// acknowledged offset.
    pub fn subscribe(&self, consumer: impl Into<String>, predicate: EventPredicate) -> Subscription {
        let consumer = consumer.into();
        let cursor = {
            let mut state = self.state();
            let start = state.base_offset;
            *state.committed.entry(consumer.clone()).or_insert(start)
        };
        debug!(consumer = %consumer, cursor, "event subscription opened");
        Subscription {
            log: self.clone(),
            consumer,
            predicate,
            cursor,
            unacked: VecDeque::new(),
        }
    }

    /// Subscribe to every event.
    pub fn subscribe_all(&self, consumer: impl Into<String>) -> Subscription {
        self.subscribe(consumer, Arc::new(|_: &EngineEvent| true))
    }

    /// Drop entries every registered consumer has acknowledged. Returns the
    /// number of entries removed.
    pub fn compact(&self) -> usize {
        let mut state = self.state();
        let Some(low) = state.committed.values().copied().min() else {
            return 0;
        };
        let mut removed = 0;
        while state.base_offset < low && state.entries.pop_front().is_some() {
            state.base_offset += 1;
            removed += 1;
        }
        if removed > 0 {
            debug!(removed, base_offset = state.base_offset, "compacted event log");
        }
        removed
    }

    /// Stop accepting waits: subscriptions return `None` once they have
    /// drained what is already in the log.
    pub fn close(&self) {
        self.state().closed = true;
        self.inner.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.state().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Committed position of `consumer`, if it ever subscribed.
    pub fn committed_offset(&self, consumer: &str) -> Option<u64> {
        self.state().committed.get(consumer).copied()
    }

    fn commit(&self, consumer: &str, next: u64) {
        self.state().advance(consumer, next);
    }
}

impl fmt::Debug for EventLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("EventLog")
            .field("base_offset", &state.base_offset)
            .field("next_offset", &state.next_offset)
            .field("retained", &state.entries.len())
            .field("consumers", &state.committed.len())
            .field("closed", &state.closed)
            .finish()
    }
}

/// A consumer's view of the log.
pub struct Subscription {
    log: EventLog,
    consumer: String,
    predicate: EventPredicate,
    /// Next offset to examine.
    cursor: u64,
    /// Delivered offsets still waiting for an ack, ascending.
    unacked: VecDeque<u64>,
}

impl Subscription {
    pub fn consumer(&self) -> &str {
        &self.consumer
    }

    /// Wait for the next matching event.
    ///
    /// Returns `None` once the log is closed and no matching event remains.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        loop {
            // Register interest before inspecting state so a publish between
            // the check and the await is not missed.
            let mut notified = pin!(self.log.inner.notify.notified());
            notified.as_mut().enable();

            {
                let mut state = self.log.state();
                if self.cursor < state.base_offset {
                    self.cursor = state.base_offset;
                }
                while self.cursor < state.next_offset {
                    let offset = self.cursor;
                    self.cursor += 1;
                    let matched = state
                        .entry(offset)
                        .filter(|envelope| (self.predicate)(&envelope.event))
                        .cloned();
                    if let Some(envelope) = matched {
                        if self.unacked.is_empty() {
                            state.advance(&self.consumer, offset);
                        }
                        self.unacked.push_back(offset);
                        return Some(envelope);
                    }
                }
                // Everything scanned was skipped; an idle consumer must not
                // pin those entries against compaction.
                if self.unacked.is_empty() {
                    state.advance(&self.consumer, self.cursor);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Commit everything up to and including `offset`.
    pub fn ack(&mut self, offset: u64) {
        trace!(consumer = %self.consumer, offset, "ack");
        while self.unacked.front().is_some_and(|&o| o <= offset) {
            self.unacked.pop_front();
        }
        self.log.commit(&self.consumer, offset + 1);
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("consumer", &self.consumer)
            .field("cursor", &self.cursor)
            .field("unacked", &self.unacked.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;

    fn created() -> EngineEvent {
        EngineEvent::TaskCreated {
            task_uuid: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn delivers_in_order_and_waits_for_new_events() {
        let log = EventLog::new();
        let mut sub = log.subscribe_all("c");
        let first = created();
        log.publish(first.clone());

        let env = sub.next().await.unwrap();
        assert_eq!(env.offset, 0);
        assert_eq!(env.event, first);

        let publisher = log.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish(EngineEvent::ShutdownRequested);
        });
        let env = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(env.event, EngineEvent::ShutdownRequested);
    }

    #[tokio::test]
    async fn unacked_events_are_redelivered_after_restart() {
        let log = EventLog::new();
        for _ in 0..3 {
            log.publish(created());
        }

        let mut sub = log.subscribe_all("sched");
        let a = sub.next().await.unwrap();
        sub.ack(a.offset);
        let b = sub.next().await.unwrap();
        assert_eq!(b.offset, 1);
        drop(sub);

        let mut again = log.subscribe_all("sched");
        let redelivered = again.next().await.unwrap();
        assert_eq!(redelivered.offset, 1);
        assert_eq!(log.committed_offset("sched"), Some(1));
    }

    #[tokio::test]
    async fn predicate_filters_events() {
        let log = EventLog::new();
        let target = Uuid::new_v4();
        log.publish(created());
        log.publish(EngineEvent::CancelRequested { task_uuid: target });
        log.close();

        let mut sub = log.subscribe(
            "only-target",
            Arc::new(move |e: &EngineEvent| e.task_uuid() == Some(target)),
        );
        let env = sub.next().await.unwrap();
        assert_eq!(env.offset, 1);
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn compaction_respects_slowest_consumer() {
        let log = EventLog::new();
        let mut fast = log.subscribe_all("fast");
        let _slow = log.subscribe_all("slow");
        for _ in 0..4 {
            log.publish(created());
        }
        for _ in 0..4 {
            let env = fast.next().await.unwrap();
            fast.ack(env.offset);
        }
        assert_eq!(log.compact(), 0);
        assert_eq!(log.len(), 4);

        log.subscribe_all("slow").ack(1);
        assert_eq!(log.compact(), 2);
        assert_eq!(log.len(), 2);

        let mut slow = log.subscribe_all("slow");
        assert_eq!(slow.next().await.unwrap().offset, 2);
    }

    #[tokio::test]
    async fn idle_consumer_does_not_pin_skipped_entries() {
        let log = EventLog::new();
        let mut busy = log.subscribe_all("busy");
        let mut idle = log.subscribe("idle", Arc::new(|_: &EngineEvent| false));
        for _ in 0..3 {
            log.publish(created());
        }
        for _ in 0..3 {
            let env = busy.next().await.unwrap();
            busy.ack(env.offset);
        }

        // Nothing matches, so `next` keeps waiting, but the scan commits.
        let waited = tokio::time::timeout(Duration::from_millis(30), idle.next()).await;
        assert!(waited.is_err());
        assert_eq!(log.committed_offset("idle"), Some(3));
        assert_eq!(log.compact(), 3);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn skipped_entries_do_not_pass_an_unacked_delivery() {
        let log = EventLog::new();
        let target = Uuid::new_v4();
        log.publish(created());
        log.publish(EngineEvent::CancelRequested { task_uuid: target });
        log.publish(created());
        log.close();

        let mut sub = log.subscribe(
            "only-target",
            Arc::new(move |e: &EngineEvent| e.task_uuid() == Some(target)),
        );
        assert_eq!(sub.next().await.unwrap().offset, 1);
        assert_eq!(log.committed_offset("only-target"), Some(1));

        // Offset 1 is still unacked: the trailing skip must not commit past it.
        assert!(sub.next().await.is_none());
        assert_eq!(log.committed_offset("only-target"), Some(1));

        sub.ack(1);
        assert_eq!(log.committed_offset("only-target"), Some(2));
    }

    #[tokio::test]
    async fn close_wakes_waiters() {
        let log = EventLog::new();
        let mut sub = log.subscribe_all("c");
        let closer = log.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            closer.close();
        });
        let next = tokio::time::timeout(Duration::from_secs(2), sub.next())
            .await
            .unwrap();
        assert!(next.is_none());
        assert!(log.is_closed());
    }
}
