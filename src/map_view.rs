use serde::Serialize;
use tracing::debug;

use crate::config::AppConfig;
use crate::markers::MarkerEntry;

pub const DEFAULT_CENTER: LatLng = LatLng {
    lat: 35.6762,
    lon: 139.6503,
};
pub const DEFAULT_ZOOM: u8 = 13;
pub const FIT_PADDING: f64 = 0.1;

#[derive(Debug, Clone, Serialize)]
pub struct TileLayer {
    pub url_template: String,
    pub attribution: String,
    pub max_zoom: u8,
}

impl TileLayer {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            url_template: config.map_tile_url.clone(),
            attribution: config.map_attribution.clone(),
            max_zoom: config.map_max_zoom,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatLng {
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bounds {
    pub south_west: LatLng,
    pub north_east: LatLng,
}

impl Bounds {
    /// Smallest box holding every point; `None` for an empty set.
    pub fn enclosing<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = LatLng>,
    {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bounds = Bounds {
            south_west: first,
            north_east: first,
        };
        for point in iter {
            bounds.south_west.lat = bounds.south_west.lat.min(point.lat);
            bounds.south_west.lon = bounds.south_west.lon.min(point.lon);
            bounds.north_east.lat = bounds.north_east.lat.max(point.lat);
            bounds.north_east.lon = bounds.north_east.lon.max(point.lon);
        }
        Some(bounds)
    }

    /// Grows each side by `ratio` of the box's own height/width.
    pub fn pad(self, ratio: f64) -> Self {
        let lat_buffer = (self.north_east.lat - self.south_west.lat).abs() * ratio;
        let lon_buffer = (self.north_east.lon - self.south_west.lon).abs() * ratio;
        Bounds {
            south_west: LatLng {
                lat: self.south_west.lat - lat_buffer,
                lon: self.south_west.lon - lon_buffer,
            },
            north_east: LatLng {
                lat: self.north_east.lat + lat_buffer,
                lon: self.north_east.lon + lon_buffer,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Viewport {
    Center { center: LatLng, zoom: u8 },
    Fit { bounds: Bounds },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerPopup {
    /// Rendered above the address, emphasized.
    pub label: Option<String>,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapMarker {
    pub position: LatLng,
    pub color: String,
    pub title: String,
    pub popup: MarkerPopup,
}

impl From<&MarkerEntry> for MapMarker {
    fn from(entry: &MarkerEntry) -> Self {
        let label = entry.label().map(str::to_string);
        MapMarker {
            position: LatLng {
                lat: entry.lat,
                lon: entry.lon,
            },
            color: entry.color.clone(),
            title: label.clone().unwrap_or_else(|| entry.address.clone()),
            popup: MarkerPopup {
                label,
                address: entry.address.clone(),
            },
        }
    }
}

/// Everything the front end needs to draw the map.
#[derive(Debug, Clone, Serialize)]
pub struct MapFrame {
    pub session: u64,
    pub tiles: TileLayer,
    pub markers: Vec<MapMarker>,
    pub viewport: Viewport,
}

struct MapSession {
    id: u64,
    markers: Vec<MapMarker>,
    viewport: Viewport,
}

/// Map view model. Markers are rebuilt wholesale on every sync.
pub struct MapView {
    tiles: TileLayer,
    session: Option<MapSession>,
    sessions_opened: u64,
}

impl MapView {
    pub fn new(tiles: TileLayer) -> Self {
        Self {
            tiles,
            session: None,
            sessions_opened: 0,
        }
    }

    pub fn tiles(&self) -> &TileLayer {
        &self.tiles
    }

    pub fn is_mounted(&self) -> bool {
        self.session.is_some()
    }

    /// Opens a session over the current entries, replacing any previous one.
    pub fn mount(&mut self, entries: &[MarkerEntry]) -> MapFrame {
        self.sessions_opened += 1;
        let markers: Vec<MapMarker> = entries.iter().map(MapMarker::from).collect();
        let viewport = fit_viewport(&markers).unwrap_or(Viewport::Center {
            center: DEFAULT_CENTER,
            zoom: DEFAULT_ZOOM,
        });
        debug!(
            target: "map_view",
            session = self.sessions_opened,
            markers = markers.len(),
            "map mounted"
        );
        let frame = MapFrame {
            session: self.sessions_opened,
            tiles: self.tiles.clone(),
            markers: markers.clone(),
            viewport,
        };
        self.session = Some(MapSession {
            id: self.sessions_opened,
            markers,
            viewport,
        });
        frame
    }

    /// Releases the session; returns whether one was open.
    pub fn unmount(&mut self) -> bool {
        let released = self.session.take();
        if let Some(session) = &released {
            debug!(target: "map_view", session = session.id, "map unmounted");
        }
        released.is_some()
    }

    /// Rebuilds every marker. With `refit`, the viewport bounds all markers;
    /// an empty list keeps the current viewport.
    pub fn sync(&mut self, entries: &[MarkerEntry], refit: bool) -> Option<MapFrame> {
        let session = self.session.as_mut()?;
        session.markers = entries.iter().map(MapMarker::from).collect();
        if refit {
            if let Some(viewport) = fit_viewport(&session.markers) {
                session.viewport = viewport;
            }
        }
        self.frame()
    }

    pub fn set_view(&mut self, center: LatLng, zoom: u8) -> Option<MapFrame> {
        let max_zoom = self.tiles.max_zoom;
        let session = self.session.as_mut()?;
        session.viewport = Viewport::Center {
            center,
            zoom: zoom.min(max_zoom),
        };
        self.frame()
    }

    pub fn frame(&self) -> Option<MapFrame> {
        self.session.as_ref().map(|session| MapFrame {
            session: session.id,
            tiles: self.tiles.clone(),
            markers: session.markers.clone(),
            viewport: session.viewport,
        })
    }
}

fn fit_viewport(markers: &[MapMarker]) -> Option<Viewport> {
    Bounds::enclosing(markers.iter().map(|m| m.position)).map(|bounds| Viewport::Fit {
        bounds: bounds.pad(FIT_PADDING),
    })
}
