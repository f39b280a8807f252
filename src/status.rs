use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::view::{ViewSink, ViewUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusChannel {
    /// Outcome of the last search or list operation.
    Result,
    /// Feedback for the API key field.
    Credential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusLevel {
    Info,
    Success,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusMessage {
    pub level: StatusLevel,
    pub kind: String,
    pub text: String,
}

impl StatusMessage {
    pub fn new(level: StatusLevel, kind: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            level,
            kind: kind.into(),
            text: text.into(),
        }
    }
}

/// One status line with an optional auto-clear timer.
///
/// Every update bumps a generation counter and aborts the pending timer, so
/// a timer only ever clears the message it was armed for. The counter and
/// the message share one lock.
#[derive(Clone)]
pub struct StatusBoard {
    inner: Arc<BoardInner>,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    message: Option<StatusMessage>,
}

struct BoardInner {
    channel: StatusChannel,
    clear_after: Duration,
    slot: Mutex<Slot>,
    timer: Mutex<Option<JoinHandle<()>>>,
    sink: Arc<dyn ViewSink>,
}

impl StatusBoard {
    pub fn new(channel: StatusChannel, clear_after: Duration, sink: Arc<dyn ViewSink>) -> Self {
        Self {
            inner: Arc::new(BoardInner {
                channel,
                clear_after,
                slot: Mutex::new(Slot::default()),
                timer: Mutex::new(None),
                sink,
            }),
        }
    }

    pub fn current(&self) -> Option<StatusMessage> {
        self.inner.slot.lock().message.clone()
    }

    /// Shows a message until something replaces it.
    pub fn show(&self, message: StatusMessage) {
        let mut slot = self.inner.advance();
        self.inner.replace(&mut slot, Some(message));
    }

    /// Shows a message that clears itself after the configured delay.
    pub fn flash(&self, message: StatusMessage) {
        let generation = {
            let mut slot = self.inner.advance();
            self.inner.replace(&mut slot, Some(message));
            slot.generation
        };

        let Ok(runtime) = Handle::try_current() else {
            debug!(
                target: "status",
                channel = ?self.inner.channel,
                "no async runtime; status will not auto-clear"
            );
            return;
        };
        let inner = Arc::clone(&self.inner);
        let delay = inner.clear_after;
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            inner.clear_if_current(generation);
        });
        *self.inner.timer.lock() = Some(task);
    }

    pub fn clear(&self) {
        let mut slot = self.inner.advance();
        if slot.message.is_some() {
            self.inner.replace(&mut slot, None);
        }
    }

    /// Drops a pending auto-clear without touching the message.
    pub fn cancel_timer(&self) {
        drop(self.inner.advance());
    }
}

impl BoardInner {
    /// Aborts the pending timer and returns the slot locked under a new
    /// generation.
    fn advance(&self) -> MutexGuard<'_, Slot> {
        if let Some(task) = self.timer.lock().take() {
            task.abort();
        }
        let mut slot = self.slot.lock();
        slot.generation += 1;
        slot
    }

    fn replace(&self, slot: &mut Slot, message: Option<StatusMessage>) {
        slot.message = message.clone();
        self.sink.publish(ViewUpdate::Status {
            channel: self.channel,
            message,
        });
    }

    fn clear_if_current(&self, generation: u64) {
        let mut slot = self.slot.lock();
        if slot.generation != generation || slot.message.is_none() {
            return;
        }
        self.replace(&mut slot, None);
    }
}
