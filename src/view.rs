use parking_lot::Mutex;
use serde::Serialize;

use crate::geocoder::Suggestion;
use crate::map_view::MapFrame;
use crate::markers::MarkerEntry;
use crate::status::{StatusChannel, StatusMessage};

/// Event name the desktop shell emits view updates on.
pub const VIEW_EVENT: &str = "address-mapper://view";

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ViewUpdate {
    Markers {
        entries: Vec<MarkerEntry>,
    },
    Map(MapFrame),
    Suggestions {
        items: Vec<Suggestion>,
    },
    Status {
        channel: StatusChannel,
        message: Option<StatusMessage>,
    },
    Busy {
        busy: bool,
    },
}

/// Receives every state change the front end has to render.
pub trait ViewSink: Send + Sync {
    fn publish(&self, update: ViewUpdate);
}

#[derive(Default)]
pub struct NullSink;

impl ViewSink for NullSink {
    fn publish(&self, _update: ViewUpdate) {}
}

/// Keeps published updates in memory, for headless runs and tests.
#[derive(Default)]
pub struct RecordingSink {
    updates: Mutex<Vec<ViewUpdate>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<ViewUpdate> {
        std::mem::take(&mut *self.updates.lock())
    }

    pub fn len(&self) -> usize {
        self.updates.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.lock().is_empty()
    }
}

impl ViewSink for RecordingSink {
    fn publish(&self, update: ViewUpdate) {
        self.updates.lock().push(update);
    }
}

#[cfg(feature = "desktop")]
pub use desktop::TauriSink;

#[cfg(feature = "desktop")]
mod desktop {
    use tauri::{AppHandle, Emitter};
    use tracing::warn;

    use super::{ViewSink, ViewUpdate, VIEW_EVENT};

    pub struct TauriSink {
        handle: AppHandle,
    }

    impl TauriSink {
        pub fn new(handle: AppHandle) -> Self {
            Self { handle }
        }
    }

    impl ViewSink for TauriSink {
        fn publish(&self, update: ViewUpdate) {
            if let Err(err) = self.handle.emit(VIEW_EVENT, &update) {
                warn!(?err, "failed to emit view update");
            }
        }
    }
}
