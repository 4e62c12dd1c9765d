//! Live-tail fan-out for raw log lines.
//!
//! The ingestion consumer mirrors every datagram here without blocking;
//! subscribers (e.g. a web tail endpoint) each receive the lines on their
//! own bounded queue. A slow subscriber can delay the others during one
//! broadcast, which is an accepted limitation of the tail path; it can
//! never delay ingestion itself.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tracing::debug;

/// Capacity of the fan-in queue and of each subscriber queue.
const QUEUE_SIZE: usize = 512;

/// Cheap handle used by the consumer to publish raw lines.
#[derive(Clone)]
pub struct TailPublisher {
    tx: mpsc::Sender<String>,
}

impl TailPublisher {
    /// Non-blocking publish; the line is dropped when the fan-in queue is
    /// full so ingestion never stalls on tail consumers.
    pub fn publish(&self, line: String) {
        if self.tx.try_send(line).is_err() {
            debug!("tail: fan-in queue full, dropping line");
        }
    }
}

#[derive(Default)]
struct TailerMap {
    next_id: i64,
    active: HashMap<i64, mpsc::Sender<String>>,
}

/// Republishes raw log lines to dynamically registered subscribers.
#[derive(Clone)]
pub struct TailBroadcaster {
    tailers: Arc<Mutex<TailerMap>>,
    tx: mpsc::Sender<String>,
}

impl TailBroadcaster {
    /// Create the broadcaster and spawn its fan-out task. The task exits on
    /// its own once every publisher handle is gone.
    pub fn start() -> Self {
        let (tx, rx) = mpsc::channel(QUEUE_SIZE);
        let tailers = Arc::new(Mutex::new(TailerMap::default()));
        tokio::spawn(Self::fan_out(tailers.clone(), rx));
        Self { tailers, tx }
    }

    pub fn publisher(&self) -> TailPublisher {
        TailPublisher {
            tx: self.tx.clone(),
        }
    }

    /// Register a new subscriber, returning its id and receiving queue.
    ///
    /// Ids are assigned by probing forward from a wrapping counter so an id
    /// still held by an active subscriber is never reissued.
    pub async fn subscribe(&self) -> (i64, mpsc::Receiver<String>) {
        let mut tailers = self.tailers.lock().await;
        while tailers.active.contains_key(&tailers.next_id) {
            tailers.next_id = tailers.next_id.wrapping_add(1);
        }
        let id = tailers.next_id;

        let (tx, rx) = mpsc::channel(QUEUE_SIZE);
        tailers.active.insert(id, tx);
        debug!(id, "tail: subscriber registered");
        (id, rx)
    }

    /// Remove a subscriber; dropping its sender closes the queue.
    pub async fn unsubscribe(&self, id: i64) {
        if self.tailers.lock().await.active.remove(&id).is_some() {
            debug!(id, "tail: subscriber removed");
        }
    }

    /// Number of currently registered subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.tailers.lock().await.active.len()
    }

    async fn fan_out(tailers: Arc<Mutex<TailerMap>>, mut rx: mpsc::Receiver<String>) {
        while let Some(line) = rx.recv().await {
            let mut map = tailers.lock().await;

            let mut closed = Vec::new();
            for (&id, tailer) in &map.active {
                if tailer.send(line.clone()).await.is_err() {
                    closed.push(id);
                }
            }
            for id in closed {
                map.active.remove(&id);
                debug!(id, "tail: removed closed subscriber");
            }
        }
    }
}
