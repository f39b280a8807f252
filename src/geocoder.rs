use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::address;
use crate::errors::{AppError, AppResult};

/// Remote error codes that mean the request itself is wrong (bad key or
/// parameters); retrying with another candidate cannot help.
const ABORT_CODES: &[&str] = &["E01", "E02"];
const PRECISE_ADDRESS_TYPES: &[&str] = &["地番・戸番", "号"];
const HTTP_TIMEOUT_SECS: u64 = 15;
const MAX_SUGGESTIONS: usize = 5;
const UNKNOWN_ADDRESS: &str = "住所不明";

#[derive(Debug, Clone, Serialize)]
pub struct GeocodeResult {
    pub lat: f64,
    pub lon: f64,
    pub display_name: String,
    pub raw: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Suggestion {
    pub address: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GeocodeError {
    #[error("enter an address to search")]
    EmptyAddress,
    #[error("set a geocoder API key before searching")]
    MissingCredential,
    #[error("no location matched this address; try another spelling")]
    NotFound,
    #[error("geocoder rejected the request ({code}): {}", .message.as_deref().unwrap_or("check the API key and request parameters"))]
    Remote {
        code: String,
        message: Option<String>,
    },
    #[error("could not reach the geocoding service ({0}); check the network or relay settings")]
    Transport(String),
    #[error("unexpected failure while searching: {0}")]
    Unexpected(String),
}

impl GeocodeError {
    pub fn kind(&self) -> &'static str {
        match self {
            GeocodeError::EmptyAddress => "empty_address",
            GeocodeError::MissingCredential => "missing_credential",
            GeocodeError::NotFound => "not_found",
            GeocodeError::Remote { .. } => "remote",
            GeocodeError::Transport(_) => "transport",
            GeocodeError::Unexpected(_) => "unexpected",
        }
    }
}

impl From<AppError> for GeocodeError {
    fn from(err: AppError) -> Self {
        GeocodeError::Unexpected(err.to_string())
    }
}

/// Wire shape of a geocoder reply.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GeocodeResponse {
    #[serde(rename = "Feature", alias = "Features", default)]
    pub features: Option<Vec<Value>>,
    #[serde(rename = "Error", default)]
    pub error: Option<RemoteError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteError {
    #[serde(rename = "Code", default)]
    pub code: Value,
    #[serde(rename = "Message", default)]
    pub message: Option<String>,
}

impl RemoteError {
    pub fn code(&self) -> String {
        match &self.code {
            Value::String(code) => code.trim().to_string(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    fn aborts(&self) -> bool {
        ABORT_CODES.contains(&self.code().as_str())
    }

    fn into_error(self) -> GeocodeError {
        GeocodeError::Remote {
            code: self.code(),
            message: self.message.filter(|m| !m.trim().is_empty()),
        }
    }
}

/// Failure of a single request.
#[derive(Debug)]
pub enum FetchError {
    Transport(String),
    Status {
        status: u16,
        body: Option<GeocodeResponse>,
    },
    Malformed(String),
}

#[async_trait]
pub trait GeocodeTransport: Send + Sync {
    async fn fetch(
        &self,
        query: &str,
        app_id: &str,
        results: Option<usize>,
    ) -> Result<GeocodeResponse, FetchError>;
}

pub struct HttpGeocodeTransport {
    http: Client,
    endpoint: Url,
}

impl HttpGeocodeTransport {
    pub fn new(endpoint: &str) -> AppResult<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|err| AppError::Config(format!("invalid geocoder endpoint: {err}")))?;
        let http = Client::builder()
            .user_agent(concat!("address-mapper/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()?;
        Ok(Self { http, endpoint })
    }

    fn request_url(&self, query: &str, app_id: &str, results: Option<usize>) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("query", query)
                .append_pair("appid", app_id)
                .append_pair("output", "json");
            if let Some(results) = results {
                pairs.append_pair("results", &results.to_string());
            }
        }
        url
    }
}

#[async_trait]
impl GeocodeTransport for HttpGeocodeTransport {
    async fn fetch(
        &self,
        query: &str,
        app_id: &str,
        results: Option<usize>,
    ) -> Result<GeocodeResponse, FetchError> {
        let url = self.request_url(query, app_id, results);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|err| FetchError::Transport(err.without_url().to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| FetchError::Transport(err.without_url().to_string()))?;

        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                body: serde_json::from_str(&body).ok(),
            });
        }
        serde_json::from_str(&body).map_err(|err| FetchError::Malformed(err.to_string()))
    }
}

/// Resolves address text to coordinates by trying normalized candidates in
/// order.
#[derive(Clone)]
pub struct Geocoder {
    transport: Arc<dyn GeocodeTransport>,
    suggestion_limit: usize,
}

impl Geocoder {
    pub fn new(endpoint: &str, suggestion_limit: usize) -> AppResult<Self> {
        let transport = HttpGeocodeTransport::new(endpoint)?;
        Ok(Self::from_transport(Arc::new(transport), suggestion_limit))
    }

    pub fn from_transport(transport: Arc<dyn GeocodeTransport>, suggestion_limit: usize) -> Self {
        Self {
            transport,
            suggestion_limit: suggestion_limit.clamp(1, MAX_SUGGESTIONS),
        }
    }

    pub async fn resolve(
        &self,
        address: &str,
        app_id: Option<&SecretString>,
    ) -> Result<GeocodeResult, GeocodeError> {
        let app_id = app_id
            .map(|secret| secret.expose_secret().trim())
            .filter(|value| !value.is_empty())
            .ok_or(GeocodeError::MissingCredential)?;
        if address.trim().is_empty() {
            return Err(GeocodeError::EmptyAddress);
        }

        let candidates = address::candidates(address);
        let total = candidates.len();
        for (attempt, candidate) in candidates.iter().enumerate() {
            match self.transport.fetch(candidate, app_id, None).await {
                Ok(response) => {
                    if let Some(error) = response.error {
                        if error.aborts() {
                            warn!(
                                target: "geocoder",
                                code = %error.code(),
                                attempt,
                                "geocoder rejected credential or parameters"
                            );
                            return Err(error.into_error());
                        }
                        debug!(
                            target: "geocoder",
                            code = %error.code(),
                            attempt,
                            "geocoder error for candidate; trying next"
                        );
                        continue;
                    }
                    let first = response.features.as_deref().and_then(<[Value]>::first);
                    match first.and_then(|feature| parse_feature(feature, address)) {
                        Some(result) => {
                            info!(
                                target: "geocoder",
                                attempt,
                                candidates = total,
                                "address resolved"
                            );
                            return Ok(result);
                        }
                        None => {
                            debug!(
                                target: "geocoder",
                                attempt,
                                has_features = first.is_some(),
                                "no usable coordinates for candidate"
                            );
                        }
                    }
                }
                Err(FetchError::Status { status, body }) => {
                    if let Some(error) = body.and_then(|b| b.error) {
                        if error.aborts() {
                            return Err(error.into_error());
                        }
                    }
                    if status == StatusCode::UNAUTHORIZED.as_u16()
                        || status == StatusCode::FORBIDDEN.as_u16()
                    {
                        return Err(GeocodeError::Remote {
                            code: format!("HTTP {status}"),
                            message: None,
                        });
                    }
                    warn!(target: "geocoder", status, attempt, "geocoder returned failure status");
                }
                Err(FetchError::Transport(reason)) if attempt == 0 => {
                    // A connection-level failure on the first try is assumed
                    // to affect every candidate.
                    warn!(target: "geocoder", %reason, "geocoder unreachable");
                    return Err(GeocodeError::Transport(reason));
                }
                Err(FetchError::Transport(reason)) => {
                    warn!(target: "geocoder", %reason, attempt, "transport failure for candidate");
                }
                Err(FetchError::Malformed(reason)) => {
                    warn!(target: "geocoder", %reason, attempt, "malformed geocoder response");
                }
            }
        }

        info!(target: "geocoder", candidates = total, "address not found");
        Err(GeocodeError::NotFound)
    }

    /// Advisory lookup for type-ahead. Every failure yields an empty list.
    pub async fn suggest(&self, query: &str, app_id: Option<&SecretString>) -> Vec<Suggestion> {
        let Some(app_id) = app_id
            .map(|secret| secret.expose_secret().trim())
            .filter(|value| !value.is_empty())
        else {
            return Vec::new();
        };
        let cleaned = address::clean(query);
        if cleaned.is_empty() {
            return Vec::new();
        }

        let response = match self
            .transport
            .fetch(&cleaned, app_id, Some(self.suggestion_limit))
            .await
        {
            Ok(response) => response,
            Err(err) => {
                debug!(target: "geocoder", ?err, "suggestion lookup failed");
                return Vec::new();
            }
        };
        if response.error.is_some() {
            return Vec::new();
        }

        response
            .features
            .unwrap_or_default()
            .iter()
            .take(self.suggestion_limit)
            .filter_map(|feature| parse_feature(feature, UNKNOWN_ADDRESS))
            .map(|result| Suggestion {
                address: result.display_name,
                lat: result.lat,
                lon: result.lon,
            })
            .collect()
    }
}

/// Builds a result from one feature; `None` unless both coordinates are
/// present, numeric and in range.
pub fn parse_feature(feature: &Value, fallback_name: &str) -> Option<GeocodeResult> {
    let geometry = feature.get("Geometry")?;
    let (lat, lon) = parse_coordinates(geometry.get("Coordinates")?)?;
    Some(GeocodeResult {
        lat,
        lon,
        display_name: display_name(feature).unwrap_or_else(|| fallback_name.to_string()),
        raw: feature.clone(),
    })
}

/// Coordinates arrive longitude first, either as `"lon,lat"` or `[lon, lat]`.
/// Returns `(lat, lon)`.
pub fn parse_coordinates(value: &Value) -> Option<(f64, f64)> {
    let (lon, lat) = match value {
        Value::String(text) => {
            let mut parts = text.split(',').map(str::trim);
            let lon = parts.next()?.parse::<f64>().ok()?;
            let lat = parts.next()?.parse::<f64>().ok()?;
            (lon, lat)
        }
        Value::Array(items) => (number(items.first()?)?, number(items.get(1)?)?),
        _ => return None,
    };
    let valid = lat.is_finite()
        && lon.is_finite()
        && (-90.0..=90.0).contains(&lat)
        && (-180.0..=180.0).contains(&lon);
    valid.then_some((lat, lon))
}

/// Whether a stored provider payload matched down to the street number.
pub fn street_number_match(raw: &Value) -> bool {
    let house_number = raw
        .pointer("/address/house_number")
        .and_then(Value::as_str)
        .map(|s| !s.trim().is_empty())
        .unwrap_or(false);
    let precise_type = ["/Property/AddressType", "/Properties/AddressType"]
        .iter()
        .filter_map(|path| raw.pointer(path).and_then(Value::as_str))
        .any(|kind| PRECISE_ADDRESS_TYPES.contains(&kind.trim()));
    house_number || precise_type
}

fn display_name(feature: &Value) -> Option<String> {
    ["/Property/Address", "/Properties/Address", "/Name"]
        .iter()
        .filter_map(|path| feature.pointer(path).and_then(Value::as_str))
        .map(str::trim)
        .find(|name| !name.is_empty())
        .map(str::to_string)
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
