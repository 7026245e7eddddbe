//! The subscription table: topic-exact and wildcard subscriptions, and the
//! retained-message store, behind one lock region.
//!
//! All three collections share a single [`parking_lot::Mutex`] rather than
//! one lock each, so a `subscribe`+`send_retained` pair (new subscriber
//! joining while a retained message is in flight) can never interleave with
//! a concurrent `publish`+`store_retained` pair in a way that drops or
//! duplicates the retained delivery.

use std::collections::HashMap;

use parking_lot::Mutex;
use smallvec::SmallVec;

use crate::connection::ConnRef;
use crate::protocol::Publish;
use crate::topic;

/// Most topics have only a handful of live subscribers; this keeps a
/// `subscribers()` snapshot off the heap for the common case.
type SubscriberVec = SmallVec<[ConnRef; 4]>;

/// One subscriber slot. Exact-topic subscriptions are never removed from
/// their `Vec` on unsubscribe — only nulled out — so that concurrent
/// `subscribers()` snapshots taken mid-unsubscribe never observe a vector
/// that shrank out from under an in-progress iteration, and so indices
/// handed out to callers stay valid for the subscription's lifetime.
type Slot = Option<ConnRef>;

#[derive(Default)]
struct Inner {
    /// Exact topic -> subscriber slots.
    exact: HashMap<String, Vec<Slot>>,
    /// Wildcard filter subscriptions, checked sequentially against a
    /// published topic. Unlike `exact`, entries are removed outright on
    /// unsubscribe: nothing indexes into this list from the outside.
    wildcards: Vec<(String, ConnRef)>,
    /// Retained messages, keyed by the exact topic they were published to.
    retained: HashMap<String, Publish>,
}

/// The broker's subscription and retained-message state.
pub struct SubscriptionTable {
    inner: Mutex<Inner>,
}

impl SubscriptionTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn is_wildcard(filter: &str) -> bool {
        filter.split('/').any(|part| part == "+" || part == "#")
    }

    /// Register `conn` as a subscriber of `filter`.
    pub fn add(&self, filter: &str, conn: ConnRef) {
        let mut inner = self.inner.lock();
        if Self::is_wildcard(filter) {
            inner.wildcards.push((filter.to_string(), conn));
        } else {
            inner
                .exact
                .entry(filter.to_string())
                .or_default()
                .push(Some(conn));
        }
    }

    /// Remove `conn`'s subscription to `filter`, if present. Matches by
    /// connection identity, not by value, since two connections are never
    /// considered interchangeable.
    pub fn unsubscribe(&self, filter: &str, conn: &ConnRef) {
        let mut inner = self.inner.lock();
        if Self::is_wildcard(filter) {
            inner
                .wildcards
                .retain(|(f, c)| !(f == filter && ConnRef::ptr_eq(c, conn)));
        } else if let Some(slots) = inner.exact.get_mut(filter) {
            for slot in slots.iter_mut() {
                if slot.as_ref().is_some_and(|c| ConnRef::ptr_eq(c, conn)) {
                    *slot = None;
                }
            }
        }
    }

    /// Remove every subscription belonging to `conn`, across every filter.
    /// Called once when a connection's writer task exits.
    pub fn unsubscribe_all(&self, conn: &ConnRef) {
        let mut inner = self.inner.lock();
        for slots in inner.exact.values_mut() {
            for slot in slots.iter_mut() {
                if slot.as_ref().is_some_and(|c| ConnRef::ptr_eq(c, conn)) {
                    *slot = None;
                }
            }
        }
        inner.wildcards.retain(|(_, c)| !ConnRef::ptr_eq(c, conn));
    }

    /// Snapshot of every connection currently subscribed to something that
    /// matches `published_topic`. Taken and returned while holding the
    /// lock only long enough to clone the `Arc`s; callers must never
    /// deliver to these connections while still holding a reference into
    /// the table itself — there is none, by construction.
    pub fn subscribers(&self, published_topic: &str) -> SubscriberVec {
        let inner = self.inner.lock();
        let mut out = SubscriberVec::new();

        if let Some(slots) = inner.exact.get(published_topic) {
            out.extend(slots.iter().flatten().cloned());
        }

        let topic_parts: Vec<&str> = published_topic.split('/').collect();
        for (filter, conn) in &inner.wildcards {
            let filter_parts: Vec<&str> = filter.split('/').collect();
            if topic::matches_parts(&filter_parts, &topic_parts) {
                out.push(conn.clone());
            }
        }

        out
    }

    /// Store (or, for an empty payload, clear) the retained message for
    /// `publish.topic`.
    pub fn store_retained(&self, publish: &Publish) {
        let mut inner = self.inner.lock();
        if publish.payload.is_empty() {
            inner.retained.remove(publish.topic.as_ref());
        } else {
            inner
                .retained
                .insert(publish.topic.to_string(), publish.clone());
        }
    }

    /// Retained messages that should be delivered to a connection that just
    /// subscribed to `filter`. An exact filter looks up its one possible
    /// entry directly; a wildcard filter scans every retained topic and
    /// tests it against the filter, since retained messages are stored by
    /// exact topic regardless of how a later subscriber reaches them.
    pub fn send_retained(&self, filter: &str) -> Vec<Publish> {
        let inner = self.inner.lock();

        if !Self::is_wildcard(filter) {
            return inner
                .retained
                .get(filter)
                .cloned()
                .into_iter()
                .collect();
        }

        let filter_parts: Vec<&str> = filter.split('/').collect();
        inner
            .retained
            .iter()
            .filter(|(topic, _)| {
                topic::matches_parts(&filter_parts, &topic.split('/').collect::<Vec<_>>())
            })
            .map(|(_, publish)| publish.clone())
            .collect()
    }
}

impl Default for SubscriptionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::fake_connection;

    #[test]
    fn exact_subscriber_receives_exact_topic() {
        let table = SubscriptionTable::new();
        let conn = fake_connection("a");
        table.add("sensors/temp", conn.clone());

        let subs = table.subscribers("sensors/temp");
        assert_eq!(subs.len(), 1);
        assert!(ConnRef::ptr_eq(&subs[0], &conn));
        assert!(table.subscribers("sensors/humidity").is_empty());
    }

    #[test]
    fn wildcard_subscriber_matches_topic() {
        let table = SubscriptionTable::new();
        let conn = fake_connection("a");
        table.add("sensors/+", conn.clone());

        assert_eq!(table.subscribers("sensors/temp").len(), 1);
        assert!(table.subscribers("sensors/temp/extra").is_empty());
    }

    #[test]
    fn duplicate_subscriptions_are_not_deduplicated() {
        let table = SubscriptionTable::new();
        let conn = fake_connection("a");
        table.add("a/b", conn.clone());
        table.add("a/b", conn.clone());

        assert_eq!(table.subscribers("a/b").len(), 2);
    }

    #[test]
    fn unsubscribe_nulls_slot_without_shifting() {
        let table = SubscriptionTable::new();
        let a = fake_connection("a");
        let b = fake_connection("b");
        table.add("a/b", a.clone());
        table.add("a/b", b.clone());

        table.unsubscribe("a/b", &a);

        let subs = table.subscribers("a/b");
        assert_eq!(subs.len(), 1);
        assert!(ConnRef::ptr_eq(&subs[0], &b));
    }

    #[test]
    fn unsubscribe_all_removes_every_filter_for_connection() {
        let table = SubscriptionTable::new();
        let a = fake_connection("a");
        table.add("a/b", a.clone());
        table.add("x/+", a.clone());

        table.unsubscribe_all(&a);

        assert!(table.subscribers("a/b").is_empty());
        assert!(table.subscribers("x/y").is_empty());
    }

    #[test]
    fn empty_payload_deletes_retained_entry() {
        let table = SubscriptionTable::new();
        let retained = Publish {
            dup: false,
            qos: crate::protocol::QoS::AtMostOnce,
            retain: true,
            topic: "a/b".into(),
            packet_id: None,
            payload: bytes::Bytes::from_static(b"hello"),
        };
        table.store_retained(&retained);
        assert_eq!(table.send_retained("a/b").len(), 1);

        let clear = Publish {
            payload: bytes::Bytes::new(),
            ..retained
        };
        table.store_retained(&clear);
        assert!(table.send_retained("a/b").is_empty());
    }

    #[test]
    fn wildcard_subscriber_receives_matching_retained_messages() {
        let table = SubscriptionTable::new();
        let retained = Publish {
            dup: false,
            qos: crate::protocol::QoS::AtMostOnce,
            retain: true,
            topic: "sensors/temp".into(),
            packet_id: None,
            payload: bytes::Bytes::from_static(b"21.5"),
        };
        table.store_retained(&retained);

        let matches = table.send_retained("sensors/+");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].topic.as_ref(), "sensors/temp");

        assert!(table.send_retained("other/+").is_empty());
    }
}
