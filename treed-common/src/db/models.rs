//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{LanguageCode, SlotId};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

/// One recorded scan; immutable once stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanEvent {
    /// Store-assigned insertion order
    pub seq: i64,
    pub device_id: String,
    pub slot: SlotId,
    pub code: LanguageCode,
    /// Server time at recording
    pub recorded_at: DateTime<Utc>,
}

/// Running scan total for one slot/language pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionCounter {
    pub slot: SlotId,
    pub code: LanguageCode,
    pub count: u64,
}

/// A visitor choosing a narration language without scanning an artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageSelection {
    pub seq: i64,
    pub device_id: String,
    pub code: LanguageCode,
    pub recorded_at: DateTime<Utc>,
}

/// Running selection total for one language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageCounter {
    pub code: LanguageCode,
    pub count: u64,
}
