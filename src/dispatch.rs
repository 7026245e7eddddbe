//! The dispatch pool: a bounded queue of accepted PUBLISHes, drained by a
//! fixed number of worker tasks that fan each one out to its subscribers.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::connection::Post;
use crate::protocol::Packet;
use crate::subscription::SubscriptionTable;

/// Default bound on the dispatch queue. A slow fan-out (many subscribers,
/// or a sluggish one among them) applies backpressure to publishers once
/// this many PUBLISHes are queued, rather than growing without bound.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default number of worker tasks draining the dispatch queue.
///
/// Multiple workers mean PUBLISHes from different publishers can be
/// delivered out of the order they were accepted in; this broker accepts
/// that relaxed ordering in exchange for fan-out throughput. Ordering
/// between two PUBLISHes from the *same* publisher is also not preserved
/// across workers, since nothing pins a given connection's posts to a
/// single worker.
pub const DEFAULT_WORKER_COUNT: usize = 2;

/// Owns the PUBLISH queue and the worker tasks draining it.
pub struct DispatchPool {
    sender: mpsc::Sender<Post>,
    workers: Vec<JoinHandle<()>>,
}

impl DispatchPool {
    /// Spawn `worker_count` workers sharing one bounded queue of capacity
    /// `queue_capacity`, each delivering against `subscriptions`.
    pub fn spawn(
        subscriptions: Arc<SubscriptionTable>,
        queue_capacity: usize,
        worker_count: usize,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let receiver = Arc::new(tokio::sync::Mutex::new(receiver));

        let workers = (0..worker_count.max(1))
            .map(|id| {
                let receiver = receiver.clone();
                let subscriptions = subscriptions.clone();
                tokio::spawn(async move { worker_loop(id, receiver, subscriptions).await })
            })
            .collect();

        Self { sender, workers }
    }

    pub fn sender(&self) -> mpsc::Sender<Post> {
        self.sender.clone()
    }

    /// Abort every worker task. Used during server shutdown.
    pub fn shutdown(&self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

async fn worker_loop(
    id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<Post>>>,
    subscriptions: Arc<SubscriptionTable>,
) {
    loop {
        let post = {
            let mut receiver = receiver.lock().await;
            receiver.recv().await
        };

        let Some(post) = post else {
            debug!(worker = id, "dispatch queue closed, worker exiting");
            return;
        };

        deliver(&subscriptions, post).await;
    }
}

/// The dispatch algorithm for one accepted PUBLISH:
///
/// 1. Capture and clear the retain flag from the frame that will actually
///    be fanned out (subscribers see `retain = false` for a live publish;
///    only a message replayed from the retained store on subscribe carries
///    `retain = true`).
/// 2. If retain was set and the payload is empty, delete any retained
///    message for this topic and suppress delivery entirely — an empty
///    retained publish is a clear-retained request, not a message.
/// 3. Otherwise, snapshot the topic's subscribers and deliver to each.
/// 4. If retain was set and the payload was non-empty, store the published
///    message (with its original retain flag) as the topic's new retained
///    message.
async fn deliver(subscriptions: &Arc<SubscriptionTable>, post: Post) {
    let mut publish = post.publish;
    let should_retain = publish.retain;
    publish.retain = false;

    if should_retain && publish.payload.is_empty() {
        subscriptions.store_retained(&{
            let mut cleared = publish.clone();
            cleared.retain = true;
            cleared
        });
        return;
    }

    let subscribers = subscriptions.subscribers(&publish.topic);
    trace!(topic = %publish.topic, fanout = subscribers.len(), "dispatching publish");

    for subscriber in subscribers {
        subscriber.submit(Packet::Publish(publish.clone())).await;
    }

    if should_retain {
        let mut retained = publish;
        retained.retain = true;
        subscriptions.store_retained(&retained);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::test_support::fake_connection;
    use crate::protocol::{Publish, QoS};
    use bytes::Bytes;

    fn sample_publish(topic: &str, payload: &[u8], retain: bool) -> Publish {
        Publish {
            dup: false,
            qos: QoS::AtMostOnce,
            retain,
            topic: topic.into(),
            packet_id: None,
            payload: Bytes::copy_from_slice(payload),
        }
    }

    #[tokio::test]
    async fn empty_retained_publish_clears_without_delivery() {
        let subscriptions = Arc::new(SubscriptionTable::new());
        subscriptions.store_retained(&sample_publish("a/b", b"hello", true));
        assert_eq!(subscriptions.send_retained("a/b").len(), 1);

        let from = fake_connection("publisher");
        deliver(
            &subscriptions,
            Post {
                publish: sample_publish("a/b", b"", true),
                from,
            },
        )
        .await;

        assert!(subscriptions.send_retained("a/b").is_empty());
    }

    #[tokio::test]
    async fn retained_publish_is_stored_after_delivery() {
        let subscriptions = Arc::new(SubscriptionTable::new());
        let from = fake_connection("publisher");

        deliver(
            &subscriptions,
            Post {
                publish: sample_publish("a/b", b"hello", true),
                from,
            },
        )
        .await;

        let stored = subscriptions.send_retained("a/b");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].payload, Bytes::from_static(b"hello"));
        assert!(stored[0].retain);
    }
}
