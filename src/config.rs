use std::{env, io};

use secrecy::SecretString;
use serde::Serialize;
use tracing::{debug, warn};

pub const DEFAULT_GEOCODER_ENDPOINT: &str = "https://map.yahooapis.jp/geocode/V1/geoCoder";
pub const DEFAULT_UPSTREAM_ORIGIN: &str = "https://map.yahooapis.jp";
pub const DEFAULT_RELAY_LISTEN_ADDR: &str = "127.0.0.1:5180";
pub const DEFAULT_TILE_URL: &str = "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png";
pub const DEFAULT_ATTRIBUTION: &str = "© OpenStreetMap contributors";

const DEFAULT_TELEMETRY_BUFFER_MAX_BYTES: u64 = 5 * 1024 * 1024;
const DEFAULT_TELEMETRY_BUFFER_MAX_FILES: usize = 5;

/// Where geocoding requests are sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointMode {
    /// Straight to the public endpoint.
    Direct,
    /// Through the local development relay.
    Relay,
}

impl EndpointMode {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "direct" => Some(EndpointMode::Direct),
            "relay" | "proxy" => Some(EndpointMode::Relay),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub geocoder_mode: EndpointMode,
    pub geocoder_endpoint: String,
    pub geocoder_upstream_origin: String,
    pub relay_listen_addr: String,
    pub geocoder_app_id: Option<SecretString>,
    pub suggestion_min_chars: usize,
    pub suggestion_limit: usize,
    pub status_clear_ms: u64,
    pub map_tile_url: String,
    pub map_attribution: String,
    pub map_max_zoom: u8,
    pub telemetry_enabled_by_default: bool,
    pub telemetry_batch_size: usize,
    pub telemetry_buffer_max_bytes: u64,
    pub telemetry_buffer_max_files: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct PublicAppConfig {
    pub geocoder_mode: EndpointMode,
    pub geocoder_endpoint: String,
    pub relay_listen_addr: String,
    pub suggestion_min_chars: usize,
    pub suggestion_limit: usize,
    pub status_clear_ms: u64,
    pub map_tile_url: String,
    pub map_attribution: String,
    pub map_max_zoom: u8,
    pub telemetry_enabled_by_default: bool,
    pub has_env_app_id: bool,
}

impl AppConfig {
    pub fn from_env() -> Self {
        load_dotenv_if_applicable();
        let geocoder_mode = match env::var("GEOCODER_MODE") {
            Ok(value) => EndpointMode::parse(&value).unwrap_or_else(|| {
                warn!(value, "unknown GEOCODER_MODE; using direct endpoint");
                EndpointMode::Direct
            }),
            Err(_) => EndpointMode::Direct,
        };
        Self {
            geocoder_mode,
            geocoder_endpoint: parse_string("GEOCODER_ENDPOINT", DEFAULT_GEOCODER_ENDPOINT),
            geocoder_upstream_origin: parse_string(
                "GEOCODER_UPSTREAM_ORIGIN",
                DEFAULT_UPSTREAM_ORIGIN,
            ),
            relay_listen_addr: parse_string("RELAY_LISTEN_ADDR", DEFAULT_RELAY_LISTEN_ADDR),
            geocoder_app_id: env::var("YAHOO_APP_ID")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .map(|v| SecretString::new(v.trim().into())),
            suggestion_min_chars: parse_usize("SUGGESTION_MIN_CHARS", 2).max(1),
            suggestion_limit: parse_usize("SUGGESTION_LIMIT", 5).clamp(1, 5),
            status_clear_ms: parse_u64("STATUS_CLEAR_MS", 3_000),
            map_tile_url: parse_string("MAP_TILE_URL", DEFAULT_TILE_URL),
            map_attribution: parse_string("MAP_ATTRIBUTION", DEFAULT_ATTRIBUTION),
            map_max_zoom: parse_u8("MAP_MAX_ZOOM", 19),
            telemetry_enabled_by_default: parse_bool("TELEMETRY_ENABLED", true),
            telemetry_batch_size: parse_usize("TELEMETRY_BATCH_SIZE", 25).max(1),
            telemetry_buffer_max_bytes: parse_u64(
                "TELEMETRY_BUFFER_MAX_BYTES",
                DEFAULT_TELEMETRY_BUFFER_MAX_BYTES,
            ),
            telemetry_buffer_max_files: parse_usize(
                "TELEMETRY_BUFFER_MAX_FILES",
                DEFAULT_TELEMETRY_BUFFER_MAX_FILES,
            )
            .max(1),
        }
    }

    /// Built-in defaults, ignoring the environment.
    pub fn defaults() -> Self {
        Self {
            geocoder_mode: EndpointMode::Direct,
            geocoder_endpoint: DEFAULT_GEOCODER_ENDPOINT.to_string(),
            geocoder_upstream_origin: DEFAULT_UPSTREAM_ORIGIN.to_string(),
            relay_listen_addr: DEFAULT_RELAY_LISTEN_ADDR.to_string(),
            geocoder_app_id: None,
            suggestion_min_chars: 2,
            suggestion_limit: 5,
            status_clear_ms: 3_000,
            map_tile_url: DEFAULT_TILE_URL.to_string(),
            map_attribution: DEFAULT_ATTRIBUTION.to_string(),
            map_max_zoom: 19,
            telemetry_enabled_by_default: true,
            telemetry_batch_size: 25,
            telemetry_buffer_max_bytes: DEFAULT_TELEMETRY_BUFFER_MAX_BYTES,
            telemetry_buffer_max_files: DEFAULT_TELEMETRY_BUFFER_MAX_FILES,
        }
    }

    pub fn public_profile(&self) -> PublicAppConfig {
        PublicAppConfig {
            geocoder_mode: self.geocoder_mode,
            geocoder_endpoint: self.geocoder_endpoint.clone(),
            relay_listen_addr: self.relay_listen_addr.clone(),
            suggestion_min_chars: self.suggestion_min_chars,
            suggestion_limit: self.suggestion_limit,
            status_clear_ms: self.status_clear_ms,
            map_tile_url: self.map_tile_url.clone(),
            map_attribution: self.map_attribution.clone(),
            map_max_zoom: self.map_max_zoom,
            telemetry_enabled_by_default: self.telemetry_enabled_by_default,
            has_env_app_id: self.geocoder_app_id.is_some(),
        }
    }
}

fn load_dotenv_if_applicable() {
    if !should_load_dotenv() {
        debug!("skipping .env load outside dev mode");
        return;
    }

    if let Err(err) = dotenvy::dotenv() {
        match &err {
            dotenvy::Error::Io(io_err) if io_err.kind() == io::ErrorKind::NotFound => {}
            _ => debug!(?err, "unable to load .env file"),
        }
    }
}

fn should_load_dotenv() -> bool {
    cfg!(debug_assertions) || parse_bool("ALLOW_DOTENV", false)
}

fn parse_string(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "True"))
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn parse_u8(key: &str, default: u8) -> u8 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u8>().ok())
        .unwrap_or(default)
}
