pub mod address;
mod commands;
pub mod config;
pub mod controller;
pub mod errors;
pub mod geocoder;
pub mod map_view;
pub mod markers;
pub mod preferences;
pub mod relay;
pub mod secrets;
pub mod settings;
pub mod status;
pub mod telemetry;
pub mod view;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::EndpointMode;
use crate::errors::AppResult;
use crate::geocoder::Geocoder;
use crate::preferences::PreferenceStore;
use crate::relay::RelayHandle;
use crate::settings::{settings_path, RuntimeSettings, UpdateSettingsPayload, UserSettings};

pub use commands::AppHealth;
pub use config::AppConfig;
pub use controller::{AppSnapshot, MapMount, MappingController, SubmitOutcome, SuggestOutcome};
pub use geocoder::{GeocodeError, GeocodeResult, Suggestion};
pub use markers::{CenterRequest, ClearOutcome, MarkerEntry};
pub use secrets::SecretVault;
pub use telemetry::TelemetryClient;
pub use view::{NullSink, RecordingSink, ViewSink, ViewUpdate};

pub const VAULT_SERVICE_NAME: &str = "AddressMapper";

pub struct AppState {
    controller: MappingController,
    config: AppConfig,
    telemetry: TelemetryClient,
    settings: Mutex<UserSettings>,
    settings_path: PathBuf,
    relay: Option<RelayHandle>,
}

impl AppState {
    /// Loads settings, credential and telemetry from `data_dir`, starts the
    /// development relay when configured, and wires the controller.
    pub async fn bootstrap(
        data_dir: &Path,
        config: AppConfig,
        vault: SecretVault,
        sink: Arc<dyn ViewSink>,
    ) -> AppResult<Self> {
        fs::create_dir_all(data_dir)?;
        let settings_path = settings_path(data_dir);
        let settings = UserSettings::load(&settings_path, &config)?;
        let telemetry = TelemetryClient::new(
            data_dir,
            &config,
            settings.telemetry_enabled,
            &settings.telemetry_salt,
        )?;
        let preferences = PreferenceStore::load(vault, config.geocoder_app_id.clone())?;

        let (endpoint, relay) = match config.geocoder_mode {
            EndpointMode::Direct => (config.geocoder_endpoint.clone(), None),
            EndpointMode::Relay => {
                let relay =
                    relay::start(&config.relay_listen_addr, &config.geocoder_upstream_origin)
                        .await?;
                (relay.endpoint(), Some(relay))
            }
        };
        let geocoder = Geocoder::new(&endpoint, config.suggestion_limit)?;
        info!(
            target: "bootstrap",
            mode = ?config.geocoder_mode,
            endpoint = %endpoint,
            "geocoder ready"
        );

        let controller = MappingController::new(
            &config,
            settings.suggestion_min_chars,
            geocoder,
            preferences,
            telemetry.clone(),
            sink,
        );

        if let Err(err) = telemetry.record(
            "app_start",
            json!({
                "version": env!("CARGO_PKG_VERSION"),
                "mode": config.geocoder_mode,
                "has_credential": controller.snapshot().has_credential,
            }),
        ) {
            warn!(?err, "failed to queue telemetry bootstrap event");
        }
        if let Err(err) = telemetry.flush() {
            warn!(?err, "failed to flush telemetry queue");
        }

        Ok(Self {
            controller,
            config,
            telemetry,
            settings: Mutex::new(settings),
            settings_path,
            relay,
        })
    }

    pub fn controller(&self) -> &MappingController {
        &self.controller
    }

    pub fn relay(&self) -> Option<&RelayHandle> {
        self.relay.as_ref()
    }

    pub fn health(&self) -> AppHealth {
        AppHealth {
            settings_path: self.settings_path.to_string_lossy().to_string(),
            telemetry_buffer_path: self.telemetry.buffer_path().to_string_lossy().to_string(),
            telemetry_queue_depth: self.telemetry.queue_depth(),
            credential_source: self.controller.snapshot().credential_source,
            relay_addr: self.relay.as_ref().map(|relay| relay.local_addr().to_string()),
            config: self.config.public_profile(),
            settings: self.settings.lock().runtime_profile(),
        }
    }

    pub fn update_settings(&self, payload: UpdateSettingsPayload) -> AppResult<RuntimeSettings> {
        let mut settings = self.settings.lock();
        settings.apply_patch(&payload);
        settings.persist(&self.settings_path)?;
        self.telemetry.set_enabled(settings.telemetry_enabled);
        self.controller
            .set_suggestion_min_chars(settings.suggestion_min_chars);
        Ok(settings.runtime_profile())
    }

    pub fn record_telemetry_event(
        &self,
        name: String,
        payload: Value,
        flush: bool,
    ) -> AppResult<()> {
        self.telemetry.record(name, payload)?;
        if flush {
            self.telemetry.flush()?;
        }
        Ok(())
    }

    /// Releases the map session and writes out queued telemetry.
    pub fn shutdown(&self) {
        self.controller.unmount_map();
        if let Err(err) = self.telemetry.flush() {
            warn!(?err, "failed to flush telemetry on shutdown");
        }
    }
}

pub fn init_tracing() {
    static INIT: OnceCell<()> = OnceCell::new();
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,address_mapper=debug"));
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    });
}

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use tauri::Manager;

    use crate::view::TauriSink;

    tauri::Builder::default()
        .plugin(tauri_plugin_opener::init())
        .setup(|app| {
            init_tracing();
            let handle = app.handle().clone();
            let data_dir = handle.path().app_data_dir()?;
            let sink: Arc<dyn ViewSink> = Arc::new(TauriSink::new(handle));
            let state = tauri::async_runtime::block_on(AppState::bootstrap(
                &data_dir,
                AppConfig::from_env(),
                SecretVault::new(VAULT_SERVICE_NAME),
                sink,
            ))
            .map_err(|err| -> Box<dyn std::error::Error> { Box::new(err) })?;
            app.manage(state);
            Ok(())
        })
        .on_window_event(|window, event| {
            if let tauri::WindowEvent::Destroyed = event {
                window.state::<AppState>().shutdown();
            }
        })
        .invoke_handler(tauri::generate_handler![
            commands::app_snapshot,
            commands::app_health,
            commands::save_api_key,
            commands::search_address,
            commands::suggest_addresses,
            commands::select_suggestion,
            commands::dismiss_suggestions,
            commands::remove_marker,
            commands::set_marker_label,
            commands::clear_markers,
            commands::center_on_marker,
            commands::map_mounted,
            commands::map_unmounted,
            commands::update_settings,
            commands::record_telemetry_event
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::view::NullSink;

    #[tokio::test]
    async fn bootstrap_persists_settings_and_applies_updates() {
        let dir = tempdir().unwrap();
        let state = AppState::bootstrap(
            dir.path(),
            AppConfig::defaults(),
            SecretVault::in_memory(),
            Arc::new(NullSink),
        )
        .await
        .unwrap();
        assert!(settings_path(dir.path()).exists());
        assert!(state.relay().is_none());

        let updated = state
            .update_settings(UpdateSettingsPayload {
                telemetry_enabled: Some(false),
                suggestion_min_chars: Some(4),
            })
            .unwrap();
        assert!(!updated.telemetry_enabled);
        assert_eq!(updated.suggestion_min_chars, 4);
        assert_eq!(state.controller().snapshot().suggestion_min_chars, 4);

        let health = state.health();
        assert_eq!(health.settings.suggestion_min_chars, 4);
        assert!(!health.config.has_env_app_id);

        let reloaded = UserSettings::load(&settings_path(dir.path()), &AppConfig::defaults())
            .unwrap();
        assert_eq!(reloaded.suggestion_min_chars, 4);
    }

    #[tokio::test]
    async fn relay_mode_starts_local_relay() {
        let dir = tempdir().unwrap();
        let config = AppConfig {
            geocoder_mode: EndpointMode::Relay,
            relay_listen_addr: "127.0.0.1:0".into(),
            ..AppConfig::defaults()
        };
        let state = AppState::bootstrap(
            dir.path(),
            config,
            SecretVault::in_memory(),
            Arc::new(NullSink),
        )
        .await
        .unwrap();
        let relay = state.relay().unwrap();
        assert!(relay.local_addr().port() > 0);
        assert!(state.health().relay_addr.is_some());
    }
}
