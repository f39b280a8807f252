//! Address text normalization.
//!
//! Whether a query matches depends on formatting such as full-width digits
//! or the dash glyph typed between block and lot numbers. Everything here is
//! pure.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Glyphs typed between block and lot numbers. ASCII `-` comes first so it
/// stays literal inside a character class.
const DASH_GLYPHS: &str = "-ー−－‐‑‒–—―";

static NUMBER_RUN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!("[0-9]+(?: ?[{DASH_GLYPHS}] ?[0-9]+)+")).expect("static pattern")
});

static RUN_SEPARATOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(" ?[{DASH_GLYPHS}] ?")).expect("static pattern"));

static BLOCK_LOT_UNIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9]+)-([0-9]+)-([0-9]+)").expect("static pattern"));

static LOT_UNIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([0-9]+)-([0-9]+)(号)?").expect("static pattern"));

/// Trims and collapses every whitespace run (ideographic spaces included)
/// into one ASCII space.
pub fn clean(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Canonical form used for duplicate detection and as the primary query.
///
/// Idempotent: `normalize(&normalize(a)) == normalize(a)`.
pub fn normalize(raw: &str) -> String {
    let folded: String = clean(raw).chars().map(fold_wide_digit).collect();
    fold_number_dashes(&folded)
}

/// Rewrites `1-2-3` into `1丁目2番3号` and a remaining `2-3` into `2番3号`.
pub fn block_lot_form(normalized: &str) -> String {
    let three = BLOCK_LOT_UNIT.replace_all(normalized, "${1}丁目${2}番${3}号");
    LOT_UNIT
        .replace_all(&three, |caps: &Captures<'_>| {
            if caps.get(3).is_some() {
                caps[0].to_string()
            } else {
                format!("{}番{}号", &caps[1], &caps[2])
            }
        })
        .into_owned()
}

/// Query variants ordered from most likely to match to most literal.
///
/// The trimmed input is always the last candidate; the list never holds
/// duplicates or empty strings.
pub fn candidates(raw: &str) -> Vec<String> {
    let normalized = normalize(raw);
    let ordered = [
        block_lot_form(&normalized),
        normalized,
        clean(raw),
        raw.trim().to_string(),
    ];

    let mut out: Vec<String> = Vec::with_capacity(ordered.len());
    for candidate in ordered {
        if candidate.is_empty() || out.contains(&candidate) {
            continue;
        }
        out.push(candidate);
    }
    out
}

/// True when both inputs name the same address after normalization.
pub fn same_address(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

fn fold_wide_digit(ch: char) -> char {
    match ch {
        '０'..='９' => char::from_u32(ch as u32 - 0xFEE0).unwrap_or(ch),
        other => other,
    }
}

// A whole `1ー2 - 3` run is matched at once, so neighbouring separators
// never compete for the digit between them.
fn fold_number_dashes(text: &str) -> String {
    NUMBER_RUN
        .replace_all(text, |caps: &Captures<'_>| {
            RUN_SEPARATOR.replace_all(&caps[0], "-").into_owned()
        })
        .into_owned()
}
