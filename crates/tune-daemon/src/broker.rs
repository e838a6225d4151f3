/// Event broker: single-owner fan-out of now-playing events.
///
/// ```text
///   Player event feed ──┐
///                       ├──► broker task ──► watch slot per subscriber ──► SSE stream
///   BrokerHandle ───────┘    (owns `current` + subscriber map)
///     subscribe / unsubscribe / publish / close
/// ```
///
/// The broker task is the only code that touches the subscriber map or the
/// current event, so join, leave and publish are applied one at a time in
/// the order they arrive.  Every subscriber slot holds a single frame: a
/// newer publish overwrites a frame the client has not read yet, so a slow
/// client never holds up the publisher or the other clients.
use std::collections::HashMap;
use std::sync::Arc;

use futures_util::stream::{self, Stream};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use tune_proto::protocol::Event;

/// A serialized event, shared by every subscriber it is delivered to.
pub type Frame = Arc<str>;

pub type SubscriberId = u64;

const REQUEST_QUEUE_CAPACITY: usize = 256;

enum BrokerRequest {
    Subscribe {
        reply: oneshot::Sender<(SubscriberId, watch::Receiver<Option<Frame>>)>,
    },
    Unsubscribe(SubscriberId),
    #[cfg(test)]
    Publish(Event),
    SubscriberCount {
        reply: oneshot::Sender<usize>,
    },
    Close,
}

// ── public handle ─────────────────────────────────────────────────────────────

/// Cloneable handle to the broker task.
#[derive(Clone)]
pub struct BrokerHandle {
    tx: mpsc::Sender<BrokerRequest>,
}

impl BrokerHandle {
    /// Register a new subscriber.  The latest event, if any, is already
    /// waiting in the returned subscription.
    pub async fn subscribe(&self) -> anyhow::Result<Subscription> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(BrokerRequest::Subscribe { reply: reply_tx })
            .await
            .map_err(|_| anyhow::anyhow!("broker task gone"))?;
        let (id, rx) = reply_rx
            .await
            .map_err(|_| anyhow::anyhow!("broker dropped subscribe request"))?;
        Ok(Subscription {
            id,
            rx,
            broker: self.clone(),
        })
    }

    /// Remove a subscriber.  Unknown or already removed ids are ignored.
    /// Outside tests subscribers leave by dropping their [`Subscription`].
    #[cfg(test)]
    pub async fn unsubscribe(&self, id: SubscriberId) {
        let _ = self.tx.send(BrokerRequest::Unsubscribe(id)).await;
    }

    /// Publish directly, bypassing the player feed.
    #[cfg(test)]
    pub async fn publish(&self, event: Event) -> anyhow::Result<()> {
        self.tx
            .send(BrokerRequest::Publish(event))
            .await
            .map_err(|_| anyhow::anyhow!("broker task gone"))
    }

    pub async fn subscriber_count(&self) -> anyhow::Result<usize> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(BrokerRequest::SubscriberCount { reply: reply_tx })
            .await
            .map_err(|_| anyhow::anyhow!("broker task gone"))?;
        reply_rx
            .await
            .map_err(|_| anyhow::anyhow!("broker dropped count request"))
    }

    /// End every subscription and stop the broker task.
    pub async fn close(&self) {
        let _ = self.tx.send(BrokerRequest::Close).await;
    }
}

/// One connected client.  Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriberId,
    rx: watch::Receiver<Option<Frame>>,
    broker: BrokerHandle,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next frame.  `None` once the subscriber has been removed
    /// and any frame still pending has been handed out.
    pub async fn recv(&mut self) -> Option<Frame> {
        loop {
            if self.rx.changed().await.is_err() {
                return None;
            }
            if let Some(frame) = self.rx.borrow_and_update().clone() {
                return Some(frame);
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Frame> {
        stream::unfold(self, |mut sub| async move {
            let frame = sub.recv().await?;
            Some((frame, sub))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // If the queue is full the slot is pruned later instead, on the next
        // publish or subscribe, since the receiver is gone by then.
        let _ = self.broker.tx.try_send(BrokerRequest::Unsubscribe(self.id));
    }
}

// ── broker task ───────────────────────────────────────────────────────────────

pub struct Broker {
    current: Option<Frame>,
    subscribers: HashMap<SubscriberId, watch::Sender<Option<Frame>>>,
    next_id: SubscriberId,
}

impl Broker {
    /// Start the broker task.  `events` is the player's event feed; every
    /// event read from it is published in order.
    pub fn spawn(events: mpsc::Receiver<Event>) -> (BrokerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(REQUEST_QUEUE_CAPACITY);
        let broker = Self {
            current: None,
            subscribers: HashMap::new(),
            next_id: 1,
        };
        let task = tokio::spawn(broker.run(rx, events));
        (BrokerHandle { tx }, task)
    }

    async fn run(
        mut self,
        mut requests: mpsc::Receiver<BrokerRequest>,
        mut events: mpsc::Receiver<Event>,
    ) {
        info!("broker: started");
        let mut feed_open = true;
        loop {
            tokio::select! {
                req = requests.recv() => match req {
                    Some(BrokerRequest::Close) | None => break,
                    Some(req) => self.handle_request(req),
                },
                event = events.recv(), if feed_open => match event {
                    Some(event) => self.publish(event),
                    None => {
                        debug!("broker: event feed closed");
                        feed_open = false;
                    }
                },
            }
        }
        info!(
            "broker: closing, ending {} subscriptions",
            self.subscribers.len()
        );
        self.subscribers.clear();
    }

    fn handle_request(&mut self, req: BrokerRequest) {
        match req {
            BrokerRequest::Subscribe { reply } => self.subscribe(reply),
            BrokerRequest::Unsubscribe(id) => self.unsubscribe(id),
            #[cfg(test)]
            BrokerRequest::Publish(event) => self.publish(event),
            BrokerRequest::SubscriberCount { reply } => {
                let _ = reply.send(self.subscribers.len());
            }
            BrokerRequest::Close => {}
        }
    }

    fn subscribe(
        &mut self,
        reply: oneshot::Sender<(SubscriberId, watch::Receiver<Option<Frame>>)>,
    ) {
        self.prune_closed();
        let id = self.next_id;
        self.next_id += 1;

        let (tx, rx) = watch::channel(None);
        if let Some(frame) = &self.current {
            tx.send_replace(Some(frame.clone()));
        }
        if reply.send((id, rx)).is_err() {
            debug!("broker: subscriber {} left before registration", id);
            return;
        }
        self.subscribers.insert(id, tx);
        debug!(
            "broker: subscriber {} joined ({} total)",
            id,
            self.subscribers.len()
        );
    }

    fn prune_closed(&mut self) {
        self.subscribers.retain(|id, tx| {
            let closed = tx.is_closed();
            if closed {
                debug!("broker: pruning subscriber {} (receiver gone)", id);
            }
            !closed
        });
    }

    fn unsubscribe(&mut self, id: SubscriberId) {
        // Dropping the sender is what ends the subscriber's stream.
        if self.subscribers.remove(&id).is_some() {
            debug!(
                "broker: subscriber {} left ({} total)",
                id,
                self.subscribers.len()
            );
        }
    }

    fn publish(&mut self, event: Event) {
        let frame: Frame = match serde_json::to_string(&event) {
            Ok(json) => json.into(),
            Err(e) => {
                error!("broker: failed to serialize {:?}: {}", event, e);
                return;
            }
        };
        debug!(
            "broker: publish {} to {} subscribers",
            frame,
            self.subscribers.len()
        );
        self.current = Some(frame.clone());
        self.subscribers.retain(|id, tx| {
            if tx.is_closed() {
                debug!("broker: pruning subscriber {} (receiver gone)", id);
                return false;
            }
            tx.send_replace(Some(frame.clone()));
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::time::Duration;

    fn track(name: &str) -> Event {
        Event {
            station: "deep".into(),
            channel: "Deep House".into(),
            track: name.into(),
        }
    }

    fn spawn_broker() -> (BrokerHandle, mpsc::Sender<Event>) {
        let (feed_tx, feed_rx) = mpsc::channel(16);
        let (handle, _task) = Broker::spawn(feed_rx);
        (handle, feed_tx)
    }

    async fn next(sub: &mut Subscription) -> String {
        let frame = tokio::time::timeout(Duration::from_secs(5), sub.recv())
            .await
            .expect("timed out waiting for frame")
            .expect("subscription ended");
        frame.to_string()
    }

    fn pending(sub: &Subscription) -> bool {
        sub.rx.has_changed().unwrap_or(false)
    }

    fn wire(event: &Event) -> String {
        serde_json::to_string(event).unwrap()
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_latest_then_next() {
        let (broker, _feed) = spawn_broker();
        broker.publish(track("D")).await.unwrap();
        broker.publish(track("E")).await.unwrap();

        let mut sub = broker.subscribe().await.unwrap();
        assert_eq!(next(&mut sub).await, wire(&track("E")));
        assert!(!pending(&sub));

        broker.publish(track("F")).await.unwrap();
        assert_eq!(next(&mut sub).await, wire(&track("F")));
    }

    #[tokio::test]
    async fn test_subscriber_before_any_event_waits() {
        let (broker, _feed) = spawn_broker();
        let mut sub = broker.subscribe().await.unwrap();
        assert!(!pending(&sub));

        broker.publish(track("first")).await.unwrap();
        assert_eq!(next(&mut sub).await, wire(&track("first")));
    }

    #[tokio::test]
    async fn test_stuck_subscriber_only_sees_latest() {
        let (broker, _feed) = spawn_broker();
        let mut a = broker.subscribe().await.unwrap();
        let mut b = broker.subscribe().await.unwrap();
        let mut stuck = broker.subscribe().await.unwrap();

        for i in 0..50 {
            let event = track(&format!("track {}", i));
            broker.publish(event.clone()).await.unwrap();
            assert_eq!(next(&mut a).await, wire(&event));
            assert_eq!(next(&mut b).await, wire(&event));
        }

        assert_eq!(next(&mut stuck).await, wire(&track("track 49")));
        assert!(!pending(&stuck));
    }

    #[tokio::test]
    async fn test_publisher_never_waits_on_subscribers() {
        let (broker, _feed) = spawn_broker();
        let _idle = broker.subscribe().await.unwrap();
        let _also_idle = broker.subscribe().await.unwrap();

        let publish_all = async {
            for i in 0..2_000 {
                broker.publish(track(&i.to_string())).await.unwrap();
            }
        };
        tokio::time::timeout(Duration::from_secs(5), publish_all)
            .await
            .expect("publishing stalled on idle subscribers");
        assert_eq!(broker.subscriber_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let (broker, _feed) = spawn_broker();
        let mut gone = broker.subscribe().await.unwrap();
        let mut kept = broker.subscribe().await.unwrap();

        broker.unsubscribe(gone.id()).await;
        broker.unsubscribe(gone.id()).await;
        broker.unsubscribe(9_999).await;
        assert_eq!(broker.subscriber_count().await.unwrap(), 1);
        assert!(gone.recv().await.is_none());

        broker.publish(track("still live")).await.unwrap();
        assert_eq!(next(&mut kept).await, wire(&track("still live")));

        // Drop sends one more unsubscribe for an id that is already gone.
        drop(gone);
        assert_eq!(broker.subscriber_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_drop_unsubscribes() {
        let (broker, _feed) = spawn_broker();
        let sub = broker.subscribe().await.unwrap();
        assert_eq!(broker.subscriber_count().await.unwrap(), 1);
        drop(sub);
        assert_eq!(broker.subscriber_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_feed_events_are_published_in_order() {
        let (broker, feed) = spawn_broker();
        let sub = broker.subscribe().await.unwrap();
        let mut stream = Box::pin(sub.into_stream());

        feed.send(track("one")).await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.as_ref(), wire(&track("one")));

        feed.send(Event::idle()).await.unwrap();
        let second = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(second.as_ref(), "{}");
    }

    #[tokio::test]
    async fn test_close_drains_pending_then_ends() {
        let (broker, _feed) = spawn_broker();
        let mut sub = broker.subscribe().await.unwrap();
        broker.publish(track("last")).await.unwrap();
        broker.close().await;

        assert_eq!(next(&mut sub).await, wire(&track("last")));
        assert!(sub.recv().await.is_none());
        assert!(broker.subscribe().await.is_err());
    }

    #[tokio::test]
    async fn test_idle_event_becomes_current() {
        let (broker, _feed) = spawn_broker();
        broker.publish(track("playing")).await.unwrap();
        broker.publish(Event::idle()).await.unwrap();

        let mut sub = broker.subscribe().await.unwrap();
        assert_eq!(next(&mut sub).await, "{}");
    }

    #[tokio::test]
    async fn test_dropped_subscriber_pruned_on_subscribe_when_queue_full() {
        let (broker, _feed) = spawn_broker();
        let stale = broker.subscribe().await.unwrap();

        // No await between filling the queue and the drop: the broker task
        // cannot run, so the unsubscribe from `Drop` finds the queue full.
        for _ in 0..REQUEST_QUEUE_CAPACITY {
            let (reply, _) = oneshot::channel();
            broker
                .tx
                .try_send(BrokerRequest::SubscriberCount { reply })
                .unwrap();
        }
        drop(stale);
        assert_eq!(broker.subscriber_count().await.unwrap(), 1);

        let _fresh = broker.subscribe().await.unwrap();
        assert_eq!(broker.subscriber_count().await.unwrap(), 1);
    }
}
