use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::address;
use crate::errors::{AppError, AppResult};
use crate::geocoder::{street_number_match, GeocodeResult};

pub const PALETTE: [&str; 8] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#FFA07A", "#98D8C8", "#F7DC6F", "#BB8FCE", "#85C1E2",
];
pub const PRECISE_ZOOM: u8 = 18;
pub const COARSE_ZOOM: u8 = 15;

#[derive(Debug, Clone, Serialize)]
pub struct MarkerEntry {
    pub address: String,
    pub lat: f64,
    pub lon: f64,
    pub color: String,
    pub label: String,
    pub raw_result: Value,
}

impl MarkerEntry {
    pub fn label(&self) -> Option<&str> {
        let trimmed = self.label.trim();
        (!trimmed.is_empty()).then_some(self.label.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AddOutcome {
    Added { index: usize },
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClearOutcome {
    Cleared { removed: usize },
    Declined,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CenterRequest {
    pub lat: f64,
    pub lon: f64,
    pub zoom: u8,
}

/// Ordered markers; an entry's identity is its position.
#[derive(Debug, Default)]
pub struct MarkerList {
    entries: Vec<MarkerEntry>,
}

impl MarkerList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[MarkerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| address::same_address(&entry.address, address))
    }

    pub fn add(&mut self, address: &str, result: GeocodeResult) -> AddOutcome {
        if self.contains(address) {
            debug!(target: "markers", "duplicate address rejected");
            return AddOutcome::Duplicate;
        }
        let index = self.entries.len();
        self.entries.push(MarkerEntry {
            address: address::clean(address),
            lat: result.lat,
            lon: result.lon,
            color: PALETTE[index % PALETTE.len()].to_string(),
            label: String::new(),
            raw_result: result.raw,
        });
        AddOutcome::Added { index }
    }

    pub fn remove(&mut self, index: usize) -> AppResult<MarkerEntry> {
        self.check(index)?;
        Ok(self.entries.remove(index))
    }

    pub fn set_label(&mut self, index: usize, text: &str) -> AppResult<()> {
        self.check(index)?;
        self.entries[index].label = text.to_string();
        Ok(())
    }

    pub fn clear_all(&mut self, confirmed: bool) -> ClearOutcome {
        if !confirmed {
            return ClearOutcome::Declined;
        }
        let removed = self.entries.len();
        self.entries.clear();
        ClearOutcome::Cleared { removed }
    }

    pub fn center_on(&self, index: usize) -> AppResult<CenterRequest> {
        self.check(index)?;
        let entry = &self.entries[index];
        let zoom = if street_number_match(&entry.raw_result) {
            PRECISE_ZOOM
        } else {
            COARSE_ZOOM
        };
        Ok(CenterRequest {
            lat: entry.lat,
            lon: entry.lon,
            zoom,
        })
    }

    fn check(&self, index: usize) -> AppResult<()> {
        if index < self.entries.len() {
            Ok(())
        } else {
            Err(AppError::InvalidIndex {
                index,
                len: self.entries.len(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn result(lat: f64, lon: f64, raw: Value) -> GeocodeResult {
        GeocodeResult {
            lat,
            lon,
            display_name: String::new(),
            raw,
        }
    }

    fn filled(addresses: &[&str]) -> MarkerList {
        let mut list = MarkerList::new();
        for (i, address) in addresses.iter().enumerate() {
            let outcome = list.add(address, result(35.0 + i as f64, 139.0, json!({})));
            assert_eq!(outcome, AddOutcome::Added { index: i });
        }
        list
    }

    #[test]
    fn duplicate_normalized_address_is_rejected() {
        let mut list = filled(&["東京都渋谷区1-2-3"]);
        let outcome = list.add(" 東京都渋谷区１ー２ー３ ", result(1.0, 2.0, json!({})));
        assert_eq!(outcome, AddOutcome::Duplicate);
        assert_eq!(list.len(), 1);
        assert_eq!(list.entries()[0].lat, 35.0);
    }

    #[test]
    fn colors_cycle_through_palette() {
        let addresses: Vec<String> = (0..10).map(|i| format!("住所{i}")).collect();
        let refs: Vec<&str> = addresses.iter().map(String::as_str).collect();
        let list = filled(&refs);
        assert_eq!(list.entries()[0].color, PALETTE[0]);
        assert_eq!(list.entries()[7].color, PALETTE[7]);
        assert_eq!(list.entries()[8].color, PALETTE[0]);
        assert_eq!(list.entries()[9].color, PALETTE[1]);
    }

    #[test]
    fn remove_shifts_later_entries_down() {
        let mut list = filled(&["a", "b", "c", "d"]);
        let before: Vec<String> = list.entries().iter().map(|e| e.address.clone()).collect();

        let removed = list.remove(1).unwrap();
        assert_eq!(removed.address, "b");
        assert_eq!(list.len(), 3);
        assert_eq!(list.entries()[0].address, before[0]);
        assert_eq!(list.entries()[1].address, before[2]);
        assert_eq!(list.entries()[2].address, before[3]);
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let mut list = filled(&["a"]);
        assert!(matches!(
            list.remove(3),
            Err(AppError::InvalidIndex { index: 3, len: 1 })
        ));
        assert!(list.set_label(1, "x").is_err());
        assert!(list.center_on(1).is_err());
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn labels_are_free_text() {
        let mut list = filled(&["a", "b"]);
        list.set_label(1, "  実家 🏠 ").unwrap();
        assert_eq!(list.entries()[1].label, "  実家 🏠 ");
        assert_eq!(list.entries()[1].label(), Some("  実家 🏠 "));
        list.set_label(1, "   ").unwrap();
        assert_eq!(list.entries()[1].label(), None);
        assert_eq!(list.entries()[0].label(), None);
    }

    #[test]
    fn clear_requires_confirmation() {
        let mut list = filled(&["a", "b", "c"]);
        assert_eq!(list.clear_all(false), ClearOutcome::Declined);
        assert_eq!(list.len(), 3);
        assert_eq!(list.clear_all(true), ClearOutcome::Cleared { removed: 3 });
        assert!(list.is_empty());
    }

    #[test]
    fn center_zoom_depends_on_street_number_match() {
        let mut list = MarkerList::new();
        list.add(
            "渋谷区道玄坂1-2-3",
            result(35.6591, 139.7036, json!({ "Property": { "AddressType": "地番・戸番" } })),
        );
        list.add(
            "渋谷区",
            result(35.66, 139.70, json!({ "Property": { "AddressType": "市区町村" } })),
        );

        let precise = list.center_on(0).unwrap();
        assert_eq!(precise.zoom, PRECISE_ZOOM);
        assert_eq!((precise.lat, precise.lon), (35.6591, 139.7036));
        assert_eq!(list.center_on(1).unwrap().zoom, COARSE_ZOOM);
    }
}
