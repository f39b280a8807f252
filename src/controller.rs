use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::address;
use crate::config::AppConfig;
use crate::errors::{AppError, AppResult};
use crate::geocoder::{GeocodeError, Geocoder, Suggestion};
use crate::map_view::{LatLng, MapFrame, MapView, TileLayer};
use crate::markers::{AddOutcome, CenterRequest, ClearOutcome, MarkerEntry, MarkerList};
use crate::preferences::{CredentialSource, PreferenceStore};
use crate::status::{StatusBoard, StatusChannel, StatusLevel, StatusMessage};
use crate::telemetry::TelemetryClient;
use crate::view::{ViewSink, ViewUpdate};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Added { index: usize, entry: MarkerEntry },
    Duplicate,
    /// Another search is still running.
    Busy,
    Failed { kind: String, message: String },
}

impl SubmitOutcome {
    fn failed(err: &GeocodeError) -> Self {
        SubmitOutcome::Failed {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SuggestOutcome {
    Shown { items: Vec<Suggestion> },
    Cleared,
    /// A newer query was issued while this one was in flight.
    Superseded,
}

#[derive(Debug, Clone, Serialize)]
pub struct AppSnapshot {
    pub entries: Vec<MarkerEntry>,
    pub suggestions: Vec<Suggestion>,
    pub result_status: Option<StatusMessage>,
    pub credential_status: Option<StatusMessage>,
    pub busy: bool,
    pub has_credential: bool,
    pub credential_source: CredentialSource,
    pub suggestion_min_chars: usize,
    pub tiles: TileLayer,
    pub map: Option<MapFrame>,
}

/// Orchestrates searches, suggestions and list edits, and publishes every
/// resulting state change to the view sink.
#[derive(Clone)]
pub struct MappingController {
    geocoder: Geocoder,
    preferences: PreferenceStore,
    telemetry: TelemetryClient,
    markers: Arc<Mutex<MarkerList>>,
    map: Arc<Mutex<MapView>>,
    suggestions: Arc<Mutex<Vec<Suggestion>>>,
    suggestion_seq: Arc<AtomicU64>,
    suggestion_min_chars: Arc<AtomicUsize>,
    in_flight: Arc<AtomicBool>,
    result_status: StatusBoard,
    credential_status: StatusBoard,
    sink: Arc<dyn ViewSink>,
}

impl MappingController {
    pub fn new(
        config: &AppConfig,
        suggestion_min_chars: usize,
        geocoder: Geocoder,
        preferences: PreferenceStore,
        telemetry: TelemetryClient,
        sink: Arc<dyn ViewSink>,
    ) -> Self {
        let clear_after = Duration::from_millis(config.status_clear_ms);
        Self {
            geocoder,
            preferences,
            telemetry,
            markers: Arc::new(Mutex::new(MarkerList::new())),
            map: Arc::new(Mutex::new(MapView::new(TileLayer::from_config(config)))),
            suggestions: Arc::new(Mutex::new(Vec::new())),
            suggestion_seq: Arc::new(AtomicU64::new(0)),
            suggestion_min_chars: Arc::new(AtomicUsize::new(suggestion_min_chars.max(1))),
            in_flight: Arc::new(AtomicBool::new(false)),
            result_status: StatusBoard::new(StatusChannel::Result, clear_after, Arc::clone(&sink)),
            credential_status: StatusBoard::new(
                StatusChannel::Credential,
                clear_after,
                Arc::clone(&sink),
            ),
            sink,
        }
    }

    pub fn snapshot(&self) -> AppSnapshot {
        let map = self.map.lock();
        AppSnapshot {
            entries: self.markers.lock().entries().to_vec(),
            suggestions: self.suggestions.lock().clone(),
            result_status: self.result_status.current(),
            credential_status: self.credential_status.current(),
            busy: self.in_flight.load(Ordering::SeqCst),
            has_credential: self.preferences.has_credential(),
            credential_source: self.preferences.source(),
            suggestion_min_chars: self.suggestion_min_chars.load(Ordering::Relaxed),
            tiles: map.tiles().clone(),
            map: map.frame(),
        }
    }

    pub fn set_suggestion_min_chars(&self, value: usize) {
        self.suggestion_min_chars
            .store(value.max(1), Ordering::Relaxed);
    }

    pub fn save_credential(&self, input: &str) -> AppResult<()> {
        match self.preferences.save(input) {
            Ok(()) => {
                info!(target: "controller", "geocoder credential saved");
                self.credential_status.flash(StatusMessage::new(
                    StatusLevel::Success,
                    "credential_saved",
                    "API key saved",
                ));
                self.track("credential_saved", json!({}));
                Ok(())
            }
            Err(err) => {
                let text = match &err {
                    AppError::Validation(reason) => reason.clone(),
                    other => format!("could not save the API key: {other}"),
                };
                self.credential_status.show(StatusMessage::new(
                    StatusLevel::Error,
                    "credential_rejected",
                    text,
                ));
                Err(err)
            }
        }
    }

    /// Geocodes `input` and appends it to the list. Never panics through to
    /// the caller; unexpected failures are reported as `Failed`.
    pub async fn submit(&self, input: &str) -> SubmitOutcome {
        match AssertUnwindSafe(self.submit_inner(input))
            .catch_unwind()
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(target: "controller", "search flow panicked");
                let err = GeocodeError::Unexpected("internal error".into());
                self.report_failure(&err);
                SubmitOutcome::failed(&err)
            }
        }
    }

    async fn submit_inner(&self, input: &str) -> SubmitOutcome {
        if input.trim().is_empty() {
            return self.fail(GeocodeError::EmptyAddress);
        }
        if !self.preferences.has_credential() {
            return self.fail(GeocodeError::MissingCredential);
        }
        let Some(_busy) = BusyGuard::acquire(&self.in_flight, self.sink.as_ref()) else {
            debug!(target: "controller", "search already in flight");
            return SubmitOutcome::Busy;
        };

        self.dismiss_suggestions();
        let cleaned = address::clean(input);
        if self.markers.lock().contains(&cleaned) {
            return self.report_duplicate(&cleaned);
        }

        self.result_status.show(StatusMessage::new(
            StatusLevel::Info,
            "searching",
            format!("Searching for {cleaned}..."),
        ));
        let credential = self.preferences.credential();
        let result = match self.geocoder.resolve(&cleaned, credential.as_ref()).await {
            Ok(result) => result,
            Err(err) => return self.fail(err),
        };

        // The list may have changed while the request was in flight.
        let (outcome, entries) = {
            let mut markers = self.markers.lock();
            let outcome = markers.add(&cleaned, result);
            (outcome, markers.entries().to_vec())
        };
        match outcome {
            AddOutcome::Duplicate => self.report_duplicate(&cleaned),
            AddOutcome::Added { index } => {
                self.publish_list(entries.clone(), true);
                let entry = entries[index].clone();
                self.result_status.flash(StatusMessage::new(
                    StatusLevel::Success,
                    "added",
                    format!("Added {}", entry.address),
                ));
                self.track(
                    "marker_added",
                    json!({
                        "address": self.telemetry.fingerprint(&entry.address),
                        "precise": crate::geocoder::street_number_match(&entry.raw_result),
                        "count": entries.len(),
                    }),
                );
                info!(target: "controller", index, total = entries.len(), "marker added");
                SubmitOutcome::Added { index, entry }
            }
        }
    }

    /// Type-ahead lookup. Only the newest query may update the list.
    pub async fn suggest(&self, query: &str) -> SuggestOutcome {
        let token = self.suggestion_seq.fetch_add(1, Ordering::SeqCst) + 1;
        let cleaned = address::clean(query);
        let min_chars = self.suggestion_min_chars.load(Ordering::Relaxed);
        if cleaned.chars().count() < min_chars || !self.preferences.has_credential() {
            self.apply_suggestions(token, Vec::new());
            return SuggestOutcome::Cleared;
        }

        let credential = self.preferences.credential();
        let items = self.geocoder.suggest(&cleaned, credential.as_ref()).await;
        if !self.apply_suggestions(token, items.clone()) {
            debug!(target: "controller", token, "stale suggestions discarded");
            return SuggestOutcome::Superseded;
        }
        if items.is_empty() {
            SuggestOutcome::Cleared
        } else {
            SuggestOutcome::Shown { items }
        }
    }

    /// Submits the address of the suggestion at `index`.
    pub async fn select_suggestion(&self, index: usize) -> AppResult<SubmitOutcome> {
        let address = {
            let suggestions = self.suggestions.lock();
            suggestions
                .get(index)
                .map(|item| item.address.clone())
                .ok_or(AppError::InvalidIndex {
                    index,
                    len: suggestions.len(),
                })?
        };
        self.dismiss_suggestions();
        Ok(self.submit(&address).await)
    }

    pub fn dismiss_suggestions(&self) {
        self.suggestion_seq.fetch_add(1, Ordering::SeqCst);
        let had_items = {
            let mut suggestions = self.suggestions.lock();
            let had_items = !suggestions.is_empty();
            suggestions.clear();
            had_items
        };
        if had_items {
            self.sink.publish(ViewUpdate::Suggestions { items: Vec::new() });
        }
    }

    pub fn remove(&self, index: usize) -> AppResult<MarkerEntry> {
        let (removed, entries) = {
            let mut markers = self.markers.lock();
            let removed = markers.remove(index)?;
            (removed, markers.entries().to_vec())
        };
        self.publish_list(entries, true);
        self.track("marker_removed", json!({ "index": index }));
        Ok(removed)
    }

    pub fn set_label(&self, index: usize, text: &str) -> AppResult<()> {
        let entries = {
            let mut markers = self.markers.lock();
            markers.set_label(index, text)?;
            markers.entries().to_vec()
        };
        self.publish_list(entries, false);
        Ok(())
    }

    pub fn clear_all(&self, confirmed: bool) -> ClearOutcome {
        let outcome = self.markers.lock().clear_all(confirmed);
        if let ClearOutcome::Cleared { removed } = outcome {
            self.publish_list(Vec::new(), true);
            self.result_status.clear();
            self.track("markers_cleared", json!({ "removed": removed }));
        }
        outcome
    }

    pub fn center_on(&self, index: usize) -> AppResult<CenterRequest> {
        let request = self.markers.lock().center_on(index)?;
        let frame = self.map.lock().set_view(
            LatLng {
                lat: request.lat,
                lon: request.lon,
            },
            request.zoom,
        );
        if let Some(frame) = frame {
            self.sink.publish(ViewUpdate::Map(frame));
        }
        Ok(request)
    }

    pub fn mount_map(&self) -> MapFrame {
        let entries = self.markers.lock().entries().to_vec();
        let frame = self.map.lock().mount(&entries);
        self.sink.publish(ViewUpdate::Map(frame.clone()));
        frame
    }

    /// Releases the map session and drops pending status timers.
    pub fn unmount_map(&self) {
        self.map.lock().unmount();
        self.result_status.cancel_timer();
        self.credential_status.cancel_timer();
    }

    /// Mounts the map for the lifetime of the returned guard.
    pub fn attach_map(&self) -> MapMount {
        let frame = self.mount_map();
        MapMount {
            controller: self.clone(),
            frame,
        }
    }

    fn apply_suggestions(&self, token: u64, items: Vec<Suggestion>) -> bool {
        let changed = {
            let mut current = self.suggestions.lock();
            if self.suggestion_seq.load(Ordering::SeqCst) != token {
                return false;
            }
            let changed = *current != items;
            *current = items.clone();
            changed
        };
        if changed {
            self.sink.publish(ViewUpdate::Suggestions { items });
        }
        true
    }

    fn publish_list(&self, entries: Vec<MarkerEntry>, refit: bool) {
        let frame = self.map.lock().sync(&entries, refit);
        self.sink.publish(ViewUpdate::Markers { entries });
        if let Some(frame) = frame {
            self.sink.publish(ViewUpdate::Map(frame));
        }
    }

    fn fail(&self, err: GeocodeError) -> SubmitOutcome {
        self.report_failure(&err);
        SubmitOutcome::failed(&err)
    }

    fn report_failure(&self, err: &GeocodeError) {
        let level = match err {
            GeocodeError::EmptyAddress | GeocodeError::MissingCredential => StatusLevel::Warning,
            _ => StatusLevel::Error,
        };
        self.result_status
            .show(StatusMessage::new(level, err.kind(), err.to_string()));
        self.track("geocode_failed", json!({ "kind": err.kind() }));
    }

    fn report_duplicate(&self, address: &str) -> SubmitOutcome {
        self.result_status.show(StatusMessage::new(
            StatusLevel::Warning,
            "duplicate",
            format!("{address} is already on the map"),
        ));
        self.track(
            "duplicate_rejected",
            json!({ "address": self.telemetry.fingerprint(address) }),
        );
        SubmitOutcome::Duplicate
    }

    fn track(&self, name: &str, payload: Value) {
        if let Err(err) = self.telemetry.record(name, payload) {
            warn!(target: "controller", ?err, event = name, "failed to record telemetry");
        }
    }
}

/// Keeps the map mounted; unmounts when dropped.
pub struct MapMount {
    controller: MappingController,
    frame: MapFrame,
}

impl MapMount {
    pub fn frame(&self) -> &MapFrame {
        &self.frame
    }
}

impl Drop for MapMount {
    fn drop(&mut self) {
        self.controller.unmount_map();
    }
}

struct BusyGuard<'a> {
    flag: &'a AtomicBool,
    sink: &'a dyn ViewSink,
}

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool, sink: &'a dyn ViewSink) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        sink.publish(ViewUpdate::Busy { busy: true });
        Some(Self { flag, sink })
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
        self.sink.publish(ViewUpdate::Busy { busy: false });
    }
}
