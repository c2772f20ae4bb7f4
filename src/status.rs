use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    pub kind: StatusKind,
    pub text: String,
}

type Slot = Arc<Mutex<Option<(u64, StatusMessage)>>>;

/// A single transient message slot.
///
/// Each message dismisses itself after a fixed delay; showing a new message
/// cancels the previous timer.
#[derive(Debug)]
pub struct StatusBoard {
    slot: Slot,
    generation: u64,
    dismiss_after: Duration,
    timer: Option<JoinHandle<()>>,
}

impl StatusBoard {
    pub fn new(dismiss_after: Duration) -> Self {
        Self {
            slot: Arc::new(Mutex::new(None)),
            generation: 0,
            dismiss_after,
            timer: None,
        }
    }

    pub fn info(&mut self, text: impl Into<String>) {
        self.show(StatusKind::Info, text);
    }

    pub fn success(&mut self, text: impl Into<String>) {
        self.show(StatusKind::Success, text);
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.show(StatusKind::Error, text);
    }

    pub fn show(&mut self, kind: StatusKind, text: impl Into<String>) {
        let text = text.into();
        match kind {
            StatusKind::Error => tracing::warn!("{}", text),
            _ => tracing::info!("{}", text),
        }

        // Re-showing the same non-error message leaves the running timer alone.
        if let Some(current) = self.current() {
            if current.text == text
                && current.kind != StatusKind::Error
                && kind != StatusKind::Error
            {
                return;
            }
        }

        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation += 1;
        let generation = self.generation;
        *lock(&self.slot) = Some((generation, StatusMessage { kind, text }));

        let slot = Arc::clone(&self.slot);
        let delay = self.dismiss_after;
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut slot = lock(&slot);
            if slot.as_ref().is_some_and(|(g, _)| *g == generation) {
                *slot = None;
            }
        }));
    }

    pub fn current(&self) -> Option<StatusMessage> {
        lock(&self.slot).as_ref().map(|(_, message)| message.clone())
    }
}

impl Drop for StatusBoard {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

fn lock(slot: &Slot) -> std::sync::MutexGuard<'_, Option<(u64, StatusMessage)>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
