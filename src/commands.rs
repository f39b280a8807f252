use serde::Serialize;
#[cfg(feature = "desktop")]
use serde_json::Value;

use crate::config::PublicAppConfig;
#[cfg(feature = "desktop")]
use crate::controller::{AppSnapshot, SubmitOutcome, SuggestOutcome};
#[cfg(feature = "desktop")]
use crate::map_view::MapFrame;
#[cfg(feature = "desktop")]
use crate::markers::{CenterRequest, ClearOutcome, MarkerEntry};
use crate::preferences::CredentialSource;
use crate::settings::RuntimeSettings;
#[cfg(feature = "desktop")]
use crate::settings::UpdateSettingsPayload;
#[cfg(feature = "desktop")]
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct AppHealth {
    pub settings_path: String,
    pub telemetry_buffer_path: String,
    pub telemetry_queue_depth: usize,
    pub credential_source: CredentialSource,
    pub relay_addr: Option<String>,
    pub config: PublicAppConfig,
    pub settings: RuntimeSettings,
}

#[cfg(feature = "desktop")]
#[tauri::command]
pub async fn app_snapshot(state: tauri::State<'_, AppState>) -> Result<AppSnapshot, String> {
    Ok(state.controller().snapshot())
}

#[cfg(feature = "desktop")]
#[tauri::command]
pub async fn app_health(state: tauri::State<'_, AppState>) -> Result<AppHealth, String> {
    Ok(state.health())
}

#[cfg(feature = "desktop")]
#[tauri::command]
pub async fn save_api_key(
    state: tauri::State<'_, AppState>,
    api_key: String,
) -> Result<(), String> {
    state
        .controller()
        .save_credential(&api_key)
        .map_err(|err| err.to_string())
}

#[cfg(feature = "desktop")]
#[tauri::command]
pub async fn search_address(
    state: tauri::State<'_, AppState>,
    address: String,
) -> Result<SubmitOutcome, String> {
    Ok(state.controller().submit(&address).await)
}

#[cfg(feature = "desktop")]
#[tauri::command]
pub async fn suggest_addresses(
    state: tauri::State<'_, AppState>,
    query: String,
) -> Result<SuggestOutcome, String> {
    Ok(state.controller().suggest(&query).await)
}

#[cfg(feature = "desktop")]
#[tauri::command]
pub async fn select_suggestion(
    state: tauri::State<'_, AppState>,
    index: usize,
) -> Result<SubmitOutcome, String> {
    state
        .controller()
        .select_suggestion(index)
        .await
        .map_err(|err| err.to_string())
}

#[cfg(feature = "desktop")]
#[tauri::command]
pub async fn dismiss_suggestions(state: tauri::State<'_, AppState>) -> Result<(), String> {
    state.controller().dismiss_suggestions();
    Ok(())
}

#[cfg(feature = "desktop")]
#[tauri::command]
pub async fn remove_marker(
    state: tauri::State<'_, AppState>,
    index: usize,
) -> Result<MarkerEntry, String> {
    state
        .controller()
        .remove(index)
        .map_err(|err| err.to_string())
}

#[cfg(feature = "desktop")]
#[tauri::command]
pub async fn set_marker_label(
    state: tauri::State<'_, AppState>,
    index: usize,
    label: String,
) -> Result<(), String> {
    state
        .controller()
        .set_label(index, &label)
        .map_err(|err| err.to_string())
}

/// The front end asks the user first and passes the answer through.
#[cfg(feature = "desktop")]
#[tauri::command]
pub async fn clear_markers(
    state: tauri::State<'_, AppState>,
    confirmed: bool,
) -> Result<ClearOutcome, String> {
    Ok(state.controller().clear_all(confirmed))
}

#[cfg(feature = "desktop")]
#[tauri::command]
pub async fn center_on_marker(
    state: tauri::State<'_, AppState>,
    index: usize,
) -> Result<CenterRequest, String> {
    state
        .controller()
        .center_on(index)
        .map_err(|err| err.to_string())
}

#[cfg(feature = "desktop")]
#[tauri::command]
pub async fn map_mounted(state: tauri::State<'_, AppState>) -> Result<MapFrame, String> {
    Ok(state.controller().mount_map())
}

#[cfg(feature = "desktop")]
#[tauri::command]
pub async fn map_unmounted(state: tauri::State<'_, AppState>) -> Result<(), String> {
    state.controller().unmount_map();
    Ok(())
}

#[cfg(feature = "desktop")]
#[tauri::command]
pub async fn update_settings(
    state: tauri::State<'_, AppState>,
    payload: UpdateSettingsPayload,
) -> Result<RuntimeSettings, String> {
    state
        .update_settings(payload)
        .map_err(|err| err.to_string())
}

#[cfg(feature = "desktop")]
#[tauri::command]
pub async fn record_telemetry_event(
    state: tauri::State<'_, AppState>,
    name: String,
    payload: Option<Value>,
    flush: Option<bool>,
) -> Result<(), String> {
    state
        .record_telemetry_event(
            name,
            payload.unwrap_or(Value::Null),
            flush.unwrap_or(false),
        )
        .map_err(|err| err.to_string())
}
