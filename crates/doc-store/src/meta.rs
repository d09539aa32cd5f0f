use serde::{Deserialize, Serialize};

/// The retrieval type of a fragment. Prose kinds mirror the source format;
/// `table_row` and `image_caption` mark structured fragments synthesized
/// during ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    Pdf,
    Text,
    Office,
    Hwp,
    Hwpx,
    TableRow,
    ImageCaption,
}

impl FragmentKind {
    /// Every kind that carries document prose (as opposed to synthesized
    /// table rows or caption mirrors).
    pub const PROSE: [FragmentKind; 5] = [
        FragmentKind::Pdf,
        FragmentKind::Text,
        FragmentKind::Office,
        FragmentKind::Hwpx,
        FragmentKind::Hwp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Text => "text",
            Self::Office => "office",
            Self::Hwp => "hwp",
            Self::Hwpx => "hwpx",
            Self::TableRow => "table_row",
            Self::ImageCaption => "image_caption",
        }
    }
}

/// The metadata bag stored with each fragment. Known keys are projected as
/// typed fields; anything else rides in the open tail so foreign keys
/// survive a round trip.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FragmentMeta {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<FragmentKind>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub filepath: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stored_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<usize>,

    #[serde(rename = "startTok", skip_serializing_if = "Option::is_none")]
    pub start_tok: Option<usize>,

    #[serde(rename = "endTok", skip_serializing_if = "Option::is_none")]
    pub end_tok: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_index: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<i64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalized: Option<serde_json::Value>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl FragmentMeta {
    pub fn of_kind(kind: FragmentKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{FragmentKind, FragmentMeta};

    #[test]
    fn kind_serializes_under_the_type_key() {
        let meta = FragmentMeta::of_kind(FragmentKind::TableRow);
        let json = serde_json::to_value(&meta).expect("meta should serialize");
        assert_eq!(json["type"], "table_row");
    }

    #[test]
    fn token_bounds_use_camel_case_keys() {
        let meta = FragmentMeta {
            kind: Some(FragmentKind::Pdf),
            start_tok: Some(0),
            end_tok: Some(800),
            ..FragmentMeta::default()
        };
        let json = serde_json::to_value(&meta).expect("meta should serialize");
        assert_eq!(json["startTok"], 0);
        assert_eq!(json["endTok"], 800);
    }

    #[test]
    fn unknown_keys_round_trip_through_the_open_tail() {
        let json = serde_json::json!({
            "type": "pdf",
            "sha256": "abc",
            "customTag": "kept"
        });
        let meta: FragmentMeta =
            serde_json::from_value(json.clone()).expect("meta should deserialize");
        assert_eq!(meta.extra["customTag"], "kept");

        let back = serde_json::to_value(&meta).expect("meta should serialize");
        assert_eq!(back, json);
    }

    #[test]
    fn empty_bag_parses_with_no_kind() {
        let meta: FragmentMeta =
            serde_json::from_value(serde_json::json!({})).expect("empty bag should parse");
        assert!(meta.kind.is_none());
    }
}
