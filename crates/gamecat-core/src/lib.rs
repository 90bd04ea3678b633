//! Core domain model for gamecat: output rows, per-record status and extracted fields.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "gamecat-core";

/// Placeholder for any field that could not be determined.
pub const NOT_AVAILABLE: &str = "N/A";
/// Price sentinel for free-to-play products.
pub const FREE: &str = "Free";
/// `played_hours` value when the account has no playtime on record.
pub const NO_HOURS: &str = "0";

/// Column order of a freshly created output file.
pub const COLUMNS: [&str; 13] = [
    "game_name",
    "status",
    "detail_url",
    "price",
    "release_date",
    "developer",
    "metascore",
    "review_count",
    "review_rating",
    "tags",
    "pegi",
    "played_hours",
    "russian_voiceover",
];

/// Terminal outcome of one ingestion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Ok,
    NotFound,
    AgeGateBlocked,
    ParseError,
    NetworkError,
}

impl RecordStatus {
    pub const ALL: [RecordStatus; 5] = [
        RecordStatus::Ok,
        RecordStatus::NotFound,
        RecordStatus::AgeGateBlocked,
        RecordStatus::ParseError,
        RecordStatus::NetworkError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RecordStatus::Ok => "ok",
            RecordStatus::NotFound => "not_found",
            RecordStatus::AgeGateBlocked => "age_gate_blocked",
            RecordStatus::ParseError => "parse_error",
            RecordStatus::NetworkError => "network_error",
        }
    }

    pub fn is_failure(self) -> bool {
        self != RecordStatus::Ok
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown record status `{0}`")]
pub struct UnknownStatus(pub String);

impl FromStr for RecordStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecordStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s.trim())
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// A resolved storefront product: the search result the extractor should visit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailRef {
    pub app_id: String,
    pub url: String,
    pub display_name: String,
}

/// Fields parsed from a product detail page. Every value is either real page text or a sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub price: String,
    pub release_date: String,
    pub developer: String,
    pub metascore: String,
    pub review_count: String,
    pub review_rating: String,
    pub tags: String,
    pub pegi: String,
    pub played_hours: String,
    pub russian_voiceover: String,
}

impl ExtractedFields {
    /// All fields set to their "could not determine" sentinel.
    pub fn unavailable() -> Self {
        Self {
            price: NOT_AVAILABLE.to_string(),
            release_date: NOT_AVAILABLE.to_string(),
            developer: NOT_AVAILABLE.to_string(),
            metascore: NOT_AVAILABLE.to_string(),
            review_count: NOT_AVAILABLE.to_string(),
            review_rating: NOT_AVAILABLE.to_string(),
            tags: NOT_AVAILABLE.to_string(),
            pegi: NOT_AVAILABLE.to_string(),
            played_hours: NO_HOURS.to_string(),
            russian_voiceover: NOT_AVAILABLE.to_string(),
        }
    }
}

impl Default for ExtractedFields {
    fn default() -> Self {
        Self::unavailable()
    }
}

/// One persisted output row. Created once per input name and never mutated after it is written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRecord {
    pub game_name: String,
    pub status: RecordStatus,
    pub detail_url: String,
    #[serde(flatten)]
    pub fields: ExtractedFields,
}

impl GameRecord {
    pub fn ok(game_name: impl Into<String>, detail: &DetailRef, fields: ExtractedFields) -> Self {
        Self {
            game_name: game_name.into(),
            status: RecordStatus::Ok,
            detail_url: detail.url.clone(),
            fields,
        }
    }

    /// A failed attempt. `detail_url` is empty when resolution never produced one.
    pub fn failed(
        game_name: impl Into<String>,
        detail_url: Option<&str>,
        status: RecordStatus,
    ) -> Self {
        Self {
            game_name: game_name.into(),
            status,
            detail_url: detail_url.unwrap_or_default().to_string(),
            fields: ExtractedFields::unavailable(),
        }
    }

    /// Cell value for a named column, `None` for columns this version does not produce.
    pub fn value_for(&self, column: &str) -> Option<&str> {
        let value = match column {
            "game_name" => self.game_name.as_str(),
            "status" => self.status.as_str(),
            "detail_url" => self.detail_url.as_str(),
            "price" => self.fields.price.as_str(),
            "release_date" => self.fields.release_date.as_str(),
            "developer" => self.fields.developer.as_str(),
            "metascore" => self.fields.metascore.as_str(),
            "review_count" => self.fields.review_count.as_str(),
            "review_rating" => self.fields.review_rating.as_str(),
            "tags" => self.fields.tags.as_str(),
            "pegi" => self.fields.pegi.as_str(),
            "played_hours" => self.fields.played_hours.as_str(),
            "russian_voiceover" => self.fields.russian_voiceover.as_str(),
            _ => return None,
        };
        Some(value)
    }
}
