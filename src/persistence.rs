use crate::error::{PopupError, Result};
use crate::store::SettingsStore;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

pub enum PersistenceEvent {
    Set(Map<String, Value>),
    Remove(String),
    Flush(oneshot::Sender<Option<PopupError>>),
}

/// Applies writes to a [`SettingsStore`] on a background task, in order.
///
/// Callers fire and forget; [`Persister::flush`] waits for everything queued
/// so far and reports the first failure since the previous flush.
#[derive(Debug, Clone)]
pub struct Persister {
    tx: mpsc::UnboundedSender<PersistenceEvent>,
}

impl Persister {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<PersistenceEvent>();

        tokio::spawn(async move {
            let mut pending_error: Option<PopupError> = None;

            while let Some(event) = rx.recv().await {
                let write = match event {
                    PersistenceEvent::Set(values) => {
                        let store = store.clone();
                        tokio::task::spawn_blocking(move || store.set(values)).await
                    }
                    PersistenceEvent::Remove(key) => {
                        let store = store.clone();
                        tokio::task::spawn_blocking(move || store.remove(&key)).await
                    }
                    PersistenceEvent::Flush(reply_tx) => {
                        let _ = reply_tx.send(pending_error.take());
                        continue;
                    }
                };

                let outcome = write.unwrap_or_else(|e| Err(PopupError::Storage(e.to_string())));
                if let Err(e) = outcome {
                    tracing::warn!("settings write failed: {}", e);
                    pending_error.get_or_insert(e);
                }
            }
        });

        Self { tx }
    }

    pub fn set(&self, key: &str, value: Value) {
        let mut values = Map::new();
        values.insert(key.to_string(), value);
        self.set_many(values);
    }

    pub fn set_many(&self, values: Map<String, Value>) {
        let _ = self.tx.send(PersistenceEvent::Set(values));
    }

    pub fn remove(&self, key: &str) {
        let _ = self.tx.send(PersistenceEvent::Remove(key.to_string()));
    }

    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(PersistenceEvent::Flush(tx)).is_err() {
            return Err(PopupError::Storage("persistence task stopped".to_string()));
        }
        match rx.await {
            Ok(None) => Ok(()),
            Ok(Some(e)) => Err(e),
            Err(_) => Err(PopupError::Storage("persistence task stopped".to_string())),
        }
    }
}
