use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// A table cell split into numeric value, unit suffix and the raw text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedCell {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    pub raw: String,
}

/// Render one table row as a single retrievable sentence.
///
/// The rendering is deterministic: the same caption, headers and values
/// always produce the same string, so re-ingesting a table yields
/// byte-identical fragment content. Missing headers fall back to
/// `col_{n}`.
pub fn row_sentence(caption: &str, headers: &[String], values: &[String]) -> String {
    let mut sentence = format!("Table: {}", caption.trim());
    sentence.push_str(" | ");

    for (index, value) in values.iter().enumerate() {
        if index > 0 {
            sentence.push_str("; ");
        }
        let header = headers
            .get(index)
            .map(|h| h.trim())
            .filter(|h| !h.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("col_{}", index + 1));
        sentence.push_str(&header);
        sentence.push('=');
        sentence.push_str(value.trim());
    }

    sentence
}

/// Parse a cell into `{value, unit, raw}`. Cells that are not a plain
/// number with an optional unit suffix keep only `raw`.
pub fn normalize_cell(raw: &str) -> NormalizedCell {
    let trimmed = raw.trim();
    let captures = cell_pattern().captures(trimmed);

    let Some(captures) = captures else {
        return NormalizedCell {
            value: None,
            unit: None,
            raw: trimmed.to_string(),
        };
    };

    let number = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    let unit = captures
        .get(2)
        .map(|m| m.as_str())
        .filter(|u| !u.is_empty())
        .map(str::to_string);

    let value = number.replace(',', "").parse::<f64>().ok();

    NormalizedCell {
        value,
        unit,
        raw: trimmed.to_string(),
    }
}

fn cell_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^([\d.,+-]+)\s*([A-Za-z%]*)$").expect("cell pattern must compile")
    })
}
