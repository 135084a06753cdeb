pub mod event;

use crate::error::TableHubError;
use crate::hub::event::{HubEvent, HubMessage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

pub type SubscriberId = u64;

/// Fire-and-forget broadcast seam used by the engine. Implementations must
/// never block: a broadcast that cannot be queued is dropped and reported
/// through the return value.
pub trait Notifier: Send + Sync {
    fn try_broadcast(&self, topic: &str, event: HubEvent) -> bool;

    /// Same best-effort semantics per topic; returns how many were queued.
    fn try_broadcast_many(&self, topics: &[String], event: HubEvent) -> usize {
        topics
            .iter()
            .filter(|topic| self.try_broadcast(topic, event.clone()))
            .count()
    }
}

/// Discards every broadcast.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn try_broadcast(&self, _topic: &str, _event: HubEvent) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubMetrics {
    pub topics: usize,
    pub subscribers: usize,
    pub accepted: u64,
    pub dropped: u64,
    pub evicted: u64,
}

#[derive(Debug, Default)]
struct HubCounters {
    topics: AtomicUsize,
    subscribers: AtomicUsize,
    accepted: AtomicU64,
    dropped: AtomicU64,
    evicted: AtomicU64,
}

struct Registration {
    topic: String,
    id: SubscriberId,
    sender: mpsc::Sender<Arc<HubMessage>>,
    ack: oneshot::Sender<()>,
}

type Unregistration = (String, SubscriberId);

/// In-process publish/subscribe broker for one topic namespace.
///
/// Registration, unregistration and fan-out all run on one dispatch task,
/// which owns the topic → subscribers map outright. Fan-out only ever
/// `try_send`s into each subscriber's bounded queue; a subscriber whose
/// queue is full is evicted and its channel closed.
pub struct Hub {
    name: &'static str,
    broadcast_tx: mpsc::Sender<Arc<HubMessage>>,
    register_tx: mpsc::Sender<Registration>,
    unregister_tx: mpsc::UnboundedSender<Unregistration>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    subscriber_capacity: usize,
    next_id: AtomicU64,
    counters: Arc<HubCounters>,
}

impl Hub {
    /// Starts the dispatch task. Must be called inside a tokio runtime.
    pub fn start(name: &'static str, queue_capacity: usize, subscriber_capacity: usize) -> Self {
        let (broadcast_tx, broadcast_rx) = mpsc::channel(queue_capacity.max(1));
        let (register_tx, register_rx) = mpsc::channel(64);
        let (unregister_tx, unregister_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let counters = Arc::new(HubCounters::default());
        tokio::spawn(dispatch_loop(
            name,
            broadcast_rx,
            register_rx,
            unregister_rx,
            shutdown_rx,
            Arc::clone(&counters),
        ));
        Self {
            name,
            broadcast_tx,
            register_tx,
            unregister_tx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            subscriber_capacity: subscriber_capacity.max(1),
            next_id: AtomicU64::new(1),
            counters,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Attaches a new subscriber to exactly one topic. Returns once the
    /// dispatch loop has registered it, so later broadcasts reach it.
    pub async fn subscribe(&self, topic: &str) -> Result<Subscription, TableHubError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel(self.subscriber_capacity);
        let (ack, acked) = oneshot::channel();
        let registration = Registration {
            topic: topic.to_string(),
            id,
            sender,
            ack,
        };
        let unavailable = || TableHubError::Unavailable {
            message: format!("{} hub is shut down", self.name),
        };
        self.register_tx
            .send(registration)
            .await
            .map_err(|_| unavailable())?;
        acked.await.map_err(|_| unavailable())?;
        Ok(Subscription {
            id,
            topic: topic.to_string(),
            receiver,
            unregister_tx: self.unregister_tx.clone(),
        })
    }

    pub fn metrics(&self) -> HubMetrics {
        HubMetrics {
            topics: self.counters.topics.load(Ordering::Relaxed),
            subscribers: self.counters.subscribers.load(Ordering::Relaxed),
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            evicted: self.counters.evicted.load(Ordering::Relaxed),
        }
    }

    /// Stops the dispatch loop; every subscriber channel is closed.
    pub fn shutdown(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
    }
}

impl Notifier for Hub {
    fn try_broadcast(&self, topic: &str, event: HubEvent) -> bool {
        let message = match HubMessage::new(topic, &event) {
            Ok(message) => message,
            Err(err) => {
                warn!(hub = self.name, topic, error = %err, "hub message encode failed");
                return false;
            }
        };
        match self.broadcast_tx.try_send(Arc::new(message)) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    hub = self.name,
                    topic,
                    event_action = event.action(),
                    "hub broadcast queue full, dropping"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(hub = self.name, topic, "hub is shut down, dropping broadcast");
                false
            }
        }
    }
}

impl Drop for Hub {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// One live connection's view of a topic. Dropping it unregisters it.
pub struct Subscription {
    id: SubscriberId,
    topic: String,
    receiver: mpsc::Receiver<Arc<HubMessage>>,
    unregister_tx: mpsc::UnboundedSender<Unregistration>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next message, or `None` once the hub closed this subscriber
    /// (evicted or shut down).
    pub async fn recv(&mut self) -> Option<Arc<HubMessage>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<HubMessage>> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self
            .unregister_tx
            .send((std::mem::take(&mut self.topic), self.id));
    }
}

type TopicMap = HashMap<String, HashMap<SubscriberId, mpsc::Sender<Arc<HubMessage>>>>;

async fn dispatch_loop(
    name: &'static str,
    mut broadcast_rx: mpsc::Receiver<Arc<HubMessage>>,
    mut register_rx: mpsc::Receiver<Registration>,
    mut unregister_rx: mpsc::UnboundedReceiver<Unregistration>,
    mut shutdown_rx: oneshot::Receiver<()>,
    counters: Arc<HubCounters>,
) {
    let mut topics: TopicMap = HashMap::new();
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            Some(reg) = register_rx.recv() => {
                topics.entry(reg.topic).or_default().insert(reg.id, reg.sender);
                let _ = reg.ack.send(());
            }
            Some((topic, id)) = unregister_rx.recv() => {
                if let Some(set) = topics.get_mut(&topic) {
                    set.remove(&id);
                    if set.is_empty() {
                        topics.remove(&topic);
                    }
                }
            }
            Some(message) = broadcast_rx.recv() => {
                fan_out(name, &mut topics, &message, &counters);
            }
            else => break,
        }
        publish_sizes(&topics, &counters);
    }
    topics.clear();
    publish_sizes(&topics, &counters);
    debug!(hub = name, "hub dispatch loop stopped");
}

fn fan_out(
    name: &'static str,
    topics: &mut TopicMap,
    message: &Arc<HubMessage>,
    counters: &HubCounters,
) {
    let Some(set) = topics.get_mut(&message.topic) else {
        return;
    };
    set.retain(|id, sender| match sender.try_send(Arc::clone(message)) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            counters.evicted.fetch_add(1, Ordering::Relaxed);
            warn!(
                hub = name,
                topic = %message.topic,
                subscriber = id,
                "subscriber queue full, evicting"
            );
            false
        }
        Err(TrySendError::Closed(_)) => false,
    });
    if set.is_empty() {
        topics.remove(&message.topic);
    }
}

fn publish_sizes(topics: &TopicMap, counters: &HubCounters) {
    counters.topics.store(topics.len(), Ordering::Relaxed);
    counters
        .subscribers
        .store(topics.values().map(HashMap::len).sum(), Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::{Hub, Notifier};
    use crate::hub::event::HubEvent;
    use std::time::Duration;

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_accepted() {
        let hub = Hub::start("tables", 8, 4);
        assert!(hub.try_broadcast("t_none", HubEvent::FetchTable));
        settle().await;
        assert_eq!(hub.metrics().accepted, 1);
        assert_eq!(hub.metrics().subscribers, 0);
    }

    #[tokio::test]
    async fn subscribers_only_see_their_topic() {
        let hub = Hub::start("tables", 8, 4);
        let mut a = hub.subscribe("t_a").await.expect("sub a");
        let mut b = hub.subscribe("t_b").await.expect("sub b");
        assert!(hub.try_broadcast("t_a", HubEvent::FetchTable));
        let got = tokio::time::timeout(Duration::from_secs(1), a.recv())
            .await
            .expect("timely")
            .expect("message");
        assert_eq!(got.topic, "t_a");
        settle().await;
        assert!(b.try_recv().is_none());
    }

    #[tokio::test]
    async fn dropped_subscription_unregisters() {
        let hub = Hub::start("tables", 8, 4);
        let sub = hub.subscribe("t_a").await.expect("sub");
        settle().await;
        assert_eq!(hub.metrics().subscribers, 1);
        drop(sub);
        settle().await;
        assert_eq!(hub.metrics().subscribers, 0);
        assert_eq!(hub.metrics().topics, 0);
    }

    #[tokio::test]
    async fn shutdown_closes_subscribers_and_refuses_new_ones() {
        let hub = Hub::start("users", 8, 4);
        let mut sub = hub.subscribe("7").await.expect("sub");
        hub.shutdown();
        let closed = tokio::time::timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("timely");
        assert!(closed.is_none());
        assert!(hub.subscribe("7").await.is_err());
    }

    #[tokio::test]
    async fn broadcast_many_counts_queued_topics() {
        let hub = Hub::start("users", 8, 4);
        let topics = vec!["1".to_string(), "2".to_string(), "3".to_string()];
        assert_eq!(hub.try_broadcast_many(&topics, HubEvent::FetchDatabases), 3);
    }
}
