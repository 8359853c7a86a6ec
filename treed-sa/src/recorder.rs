//! Event recorder: validate, resolve, stamp and store one client event
//!
//! Two kinds of event arrive from the QR clients: an artifact scan (device,
//! artifact, language) and a language selection (device, language) made
//! before any artifact is scanned. Each is recorded all-or-nothing:
//! validation and catalog resolution finish before the store is touched,
//! and the store applies the log append and counter increment in one
//! transaction. No deduplication: a visitor who scans the same artifact
//! twice produces two events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};
use treed_common::time::Clock;
use treed_common::{Catalog, LanguageCode, SlotId};

use crate::error::{Error, Result};
use crate::store::{NewScan, NewSelection, ScanStore};

/// Values the QR clients send when a field has no real value
const NULLISH: &[&str] = &["", "null", "none", "n/a", "na", "undefined"];

/// Client payload as received, before validation
///
/// Field names accept the aliases used by the deployed QR clients
/// (`id`, `statue`, `type`). Any other fields, including client timestamps,
/// are ignored.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct RawScan {
    #[serde(default, alias = "id")]
    pub device_id: Option<Value>,
    #[serde(default, alias = "statue")]
    pub artifact: Option<Value>,
    #[serde(default)]
    pub language: Option<Value>,
    /// Event kind hint: `statue` or `language`
    #[serde(default, alias = "type")]
    pub event: Option<Value>,
}

/// Validated scan input: three present, non-nullish strings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRequest {
    device_id: String,
    artifact: String,
    language: String,
}

impl ScanRequest {
    /// Validate and normalise a scan
    ///
    /// The device id is trimmed and lowercased; artifact and language names
    /// are trimmed and otherwise kept exactly as sent.
    pub fn new(device_id: &str, artifact: &str, language: &str) -> Result<Self> {
        Ok(Self {
            device_id: required("device_id", device_id)?.to_lowercase(),
            artifact: required("artifact", artifact)?.to_string(),
            language: required("language", language)?.to_string(),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn artifact(&self) -> &str {
        &self.artifact
    }

    pub fn language(&self) -> &str {
        &self.language
    }
}

impl TryFrom<RawScan> for ScanRequest {
    type Error = Error;

    fn try_from(raw: RawScan) -> Result<Self> {
        let device_id = device_field(raw.device_id)?;
        let artifact = string_field("artifact", raw.artifact)?;
        let language = string_field("language", raw.language)?;
        Self::new(&device_id, &artifact, &language)
    }
}

/// Validated language selection: device and language name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionRequest {
    device_id: String,
    language: String,
}

impl SelectionRequest {
    pub fn new(device_id: &str, language: &str) -> Result<Self> {
        Ok(Self {
            device_id: required("device_id", device_id)?.to_lowercase(),
            language: required("language", language)?.to_string(),
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn language(&self) -> &str {
        &self.language
    }
}

impl TryFrom<RawScan> for SelectionRequest {
    type Error = Error;

    fn try_from(raw: RawScan) -> Result<Self> {
        let device_id = device_field(raw.device_id)?;
        let language = string_field("language", raw.language)?;
        Self::new(&device_id, &language)
    }
}

/// Either kind of client event, as sent to the legacy `/postdata` route
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Scan(ScanRequest),
    Selection(SelectionRequest),
}

impl TryFrom<RawScan> for ClientEvent {
    type Error = Error;

    /// An explicit `event`/`type` of `statue` or `language` decides the
    /// kind. Otherwise a payload naming an artifact is a scan and one naming
    /// only a language is a selection.
    fn try_from(raw: RawScan) -> Result<Self> {
        let hint = match &raw.event {
            Some(Value::String(s)) => s.trim().to_lowercase(),
            _ => String::new(),
        };
        let is_scan = match hint.as_str() {
            "statue" => true,
            "language" => false,
            _ => has_value(&raw.artifact) || !has_value(&raw.language),
        };

        if is_scan {
            ScanRequest::try_from(raw).map(ClientEvent::Scan)
        } else {
            SelectionRequest::try_from(raw).map(ClientEvent::Selection)
        }
    }
}

fn has_value(value: &Option<Value>) -> bool {
    match value {
        Some(Value::String(s)) => !is_nullish(s.trim()),
        Some(Value::Null) | None => false,
        Some(_) => true,
    }
}

fn device_field(value: Option<Value>) -> Result<String> {
    // Numeric device ids are accepted; names must be strings
    match value {
        Some(Value::String(s)) => Ok(s),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Null) | None => Ok(String::new()),
        Some(other) => Err(Error::InvalidScan(format!(
            "'device_id' must be a string, got {}",
            other
        ))),
    }
}

fn string_field(name: &str, value: Option<Value>) -> Result<String> {
    match value {
        Some(Value::String(s)) => Ok(s),
        Some(Value::Null) | None => Ok(String::new()),
        Some(other) => Err(Error::InvalidScan(format!(
            "'{}' must be a string, got {}",
            name, other
        ))),
    }
}

fn required<'a>(name: &str, value: &'a str) -> Result<&'a str> {
    let trimmed = value.trim();
    if is_nullish(trimmed) {
        return Err(Error::InvalidScan(format!("missing '{}'", name)));
    }
    Ok(trimmed)
}

fn is_nullish(value: &str) -> bool {
    NULLISH.iter().any(|n| value.eq_ignore_ascii_case(n))
}

/// Outcome of a successful `record`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedScan {
    pub seq: i64,
    pub slot: SlotId,
    pub code: LanguageCode,
    pub recorded_at: DateTime<Utc>,
}

/// Outcome of a successful `select_language`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordedSelection {
    pub seq: i64,
    pub code: LanguageCode,
    pub recorded_at: DateTime<Utc>,
}

/// Outcome of recording a [`ClientEvent`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum RecordedEvent {
    Artifact(RecordedScan),
    Language(RecordedSelection),
}

pub struct EventRecorder {
    catalog: Arc<Catalog>,
    store: Arc<dyn ScanStore>,
    clock: Arc<dyn Clock>,
}

impl EventRecorder {
    pub fn new(catalog: Arc<Catalog>, store: Arc<dyn ScanStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            catalog,
            store,
            clock,
        }
    }

    /// Record one scan stamped with server time
    pub async fn record(&self, request: &ScanRequest) -> Result<RecordedScan> {
        let slot = self.catalog.resolve_artifact(request.artifact()).map_err(|e| {
            warn!("Rejected scan from {}: {}", request.device_id(), e);
            e
        })?;
        let code = self.catalog.resolve_language(request.language()).map_err(|e| {
            warn!("Rejected scan from {}: {}", request.device_id(), e);
            e
        })?;

        let scan = NewScan {
            device_id: request.device_id().to_string(),
            slot,
            code,
            recorded_at: self.clock.now(),
        };

        let event = self.store.append_scan(&scan).await.map_err(|e| {
            error!("Failed to store scan {}/{}: {}", scan.slot, scan.code, e);
            e
        })?;

        info!(
            seq = event.seq,
            slot = %event.slot,
            code = %event.code,
            "Recorded scan"
        );

        Ok(RecordedScan {
            seq: event.seq,
            slot: event.slot,
            code: event.code,
            recorded_at: event.recorded_at,
        })
    }

    /// Record one language selection stamped with server time
    pub async fn select_language(&self, request: &SelectionRequest) -> Result<RecordedSelection> {
        let code = self.catalog.resolve_language(request.language()).map_err(|e| {
            warn!("Rejected language selection from {}: {}", request.device_id(), e);
            e
        })?;

        let selection = NewSelection {
            device_id: request.device_id().to_string(),
            code,
            recorded_at: self.clock.now(),
        };

        let stored = self.store.append_selection(&selection).await.map_err(|e| {
            error!("Failed to store language selection {}: {}", selection.code, e);
            e
        })?;

        info!(seq = stored.seq, code = %stored.code, "Recorded language selection");

        Ok(RecordedSelection {
            seq: stored.seq,
            code: stored.code,
            recorded_at: stored.recorded_at,
        })
    }

    pub async fn record_event(&self, event: &ClientEvent) -> Result<RecordedEvent> {
        match event {
            ClientEvent::Scan(request) => self.record(request).await.map(RecordedEvent::Artifact),
            ClientEvent::Selection(request) => self
                .select_language(request)
                .await
                .map(RecordedEvent::Language),
        }
    }
}
