// ABOUTME: In-process pub/sub of build-log lines, one topic per app.
// ABOUTME: Sends never block: a slow subscriber loses lines, the pipeline never stalls.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

const SUBSCRIBER_BUFFER: usize = 64;

type SubscriberMap = HashMap<String, HashMap<u64, mpsc::Sender<String>>>;

#[derive(Default)]
pub struct Hub {
    inner: Arc<Mutex<HubInner>>,
}

#[derive(Default)]
struct HubInner {
    subs: SubscriberMap,
    next_id: u64,
}

/// Removes its subscription when dropped.
pub struct Subscription {
    pub rx: mpsc::Receiver<String>,
    app_id: String,
    id: u64,
    inner: Arc<Mutex<HubInner>>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(subs) = inner.subs.get_mut(&self.app_id) {
            subs.remove(&self.id);
            if subs.is_empty() {
                inner.subs.remove(&self.app_id);
            }
        }
    }
}

impl Hub {
    pub fn new() -> Hub {
        Hub::default()
    }

    /// Subscribe to an app's build log. The receiver is buffered; once full,
    /// publishes to this subscriber are dropped rather than queued.
    pub fn subscribe(&self, app_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner
            .subs
            .entry(app_id.to_string())
            .or_default()
            .insert(id, tx);
        Subscription {
            rx,
            app_id: app_id.to_string(),
            id,
            inner: Arc::clone(&self.inner),
        }
    }

    /// Fan a line out to every subscriber of the app, non-blocking.
    pub fn publish(&self, app_id: &str, line: &str) {
        let inner = self.inner.lock().unwrap();
        if let Some(subs) = inner.subs.get(app_id) {
            for tx in subs.values() {
                let _ = tx.try_send(line.to_string());
            }
        }
    }

    /// Drop the app's topic; every subscriber's channel closes, which is the
    /// deploy-finished signal for live streams.
    pub fn close(&self, app_id: &str) {
        self.inner.lock().unwrap().subs.remove(app_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_sees_lines_published_after_subscribe() {
        let hub = Hub::new();
        let mut sub = hub.subscribe("pr-1");
        hub.publish("pr-1", "one");
        hub.publish("pr-1", "two");
        assert_eq!(sub.rx.recv().await.unwrap(), "one");
        assert_eq!(sub.rx.recv().await.unwrap(), "two");
    }

    #[tokio::test]
    async fn topics_are_isolated_per_app() {
        let hub = Hub::new();
        let mut sub = hub.subscribe("pr-1");
        hub.publish("pr-2", "other app");
        hub.publish("pr-1", "mine");
        assert_eq!(sub.rx.recv().await.unwrap(), "mine");
    }

    #[tokio::test]
    async fn slow_subscriber_drops_instead_of_blocking() {
        let hub = Hub::new();
        let mut sub = hub.subscribe("pr-1");
        // Overrun the buffer; publish must not block or fail.
        for i in 0..(SUBSCRIBER_BUFFER + 10) {
            hub.publish("pr-1", &format!("line {i}"));
        }
        let mut received = 0;
        while let Ok(line) = sub.rx.try_recv() {
            assert!(line.starts_with("line "));
            received += 1;
        }
        assert_eq!(received, SUBSCRIBER_BUFFER);
    }

    #[tokio::test]
    async fn close_ends_every_subscriber() {
        let hub = Hub::new();
        let mut a = hub.subscribe("pr-1");
        let mut b = hub.subscribe("pr-1");
        hub.close("pr-1");
        assert!(a.rx.recv().await.is_none());
        assert!(b.rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropping_subscription_unsubscribes() {
        let hub = Hub::new();
        let sub = hub.subscribe("pr-1");
        drop(sub);
        // Publishing afterwards is a no-op rather than a leak or panic.
        hub.publish("pr-1", "nobody home");
        assert!(hub.inner.lock().unwrap().subs.get("pr-1").is_none());
    }
}
