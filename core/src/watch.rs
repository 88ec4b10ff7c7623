//! Change notification plumbing for the reactive `watch` terminal operation.
//!
//! Table-touched events flow through a broadcast channel. While a
//! transaction is open, events are buffered and delivered only after the
//! commit acknowledgment, so a rollback never surfaces uncommitted reads to
//! a stream observer.

use std::sync::Mutex;

use tokio::sync::broadcast;

const CHANNEL_CAPACITY: usize = 64;

pub struct ChangeNotifier {
    tx: broadcast::Sender<String>,
    /// `Some` while a transaction is buffering events.
    buffer: Mutex<Option<Vec<String>>>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            tx,
            buffer: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Records that a table was touched by a write. Outside a transaction
    /// the event is delivered immediately; inside, it is held until commit.
    pub fn notify(&self, table: &str) {
        let mut buffer = self.buffer.lock().expect("notifier lock poisoned");
        match buffer.as_mut() {
            Some(pending) => pending.push(table.to_string()),
            // A send error only means no subscriber is listening.
            None => {
                let _ = self.tx.send(table.to_string());
            }
        }
    }

    pub fn begin_buffering(&self) {
        let mut buffer = self.buffer.lock().expect("notifier lock poisoned");
        if buffer.is_none() {
            *buffer = Some(Vec::new());
        }
    }

    /// Flushes buffered events to subscribers after a commit acknowledgment.
    pub fn commit(&self) {
        let pending = self
            .buffer
            .lock()
            .expect("notifier lock poisoned")
            .take()
            .unwrap_or_default();
        for table in pending {
            let _ = self.tx.send(table);
        }
    }

    /// Discards buffered events after a rollback.
    pub fn rollback(&self) {
        let _ = self.buffer.lock().expect("notifier lock poisoned").take();
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}
