//! Exhibit catalog: artifacts, narration languages and audio durations
//!
//! The catalog maps the display names carried by QR scans to stable internal
//! identifiers, and maps each (slot, language) pair to the length of its
//! narration track. It is built once at startup and never mutated; share it
//! as `Arc<Catalog>`.
//!
//! # File format
//!
//! ```toml
//! [[artifacts]]
//! name = "Ain Ghazal"
//! slot = "st1"
//!
//! [[languages]]
//! name = "English"
//! code = "en"
//!
//! [durations.st1]
//! en = 95
//! ```

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::{Error, Result};

/// Catalog compiled into the binary, used when no catalog file is configured
const BUILTIN_CATALOG: &str = include_str!("../catalog.toml");

// ========================================
// Identifiers
// ========================================

/// Stable short code naming one physical artifact (e.g. `st1`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlotId(String);

impl SlotId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for SlotId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable short code naming one narration language (e.g. `en`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LanguageCode(String);

impl LanguageCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for LanguageCode {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LanguageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ========================================
// Errors
// ========================================

/// Lookup failures against the catalog
///
/// These are configuration errors: the request named something the
/// deployed catalog does not know about. They fail the single call, never
/// the process.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("Unknown artifact: '{0}'")]
    UnknownArtifact(String),

    #[error("Unknown language: '{0}'")]
    UnknownLanguage(String),

    #[error("No audio duration configured for {slot}/{code}")]
    MissingDuration { slot: SlotId, code: LanguageCode },
}

// ========================================
// Configuration (TOML)
// ========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub name: String,
    pub slot: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageEntry {
    pub name: String,
    pub code: String,
}

/// Raw catalog as read from TOML, before validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default)]
    pub artifacts: Vec<ArtifactEntry>,
    #[serde(default)]
    pub languages: Vec<LanguageEntry>,
    /// slot -> language code -> seconds
    #[serde(default)]
    pub durations: BTreeMap<String, BTreeMap<String, f64>>,
}

impl CatalogConfig {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid catalog: {}", e)))
    }
}

// ========================================
// Catalog
// ========================================

/// One artifact x language combination, with display names resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogPair {
    pub slot: SlotId,
    pub code: LanguageCode,
    pub artifact: String,
    pub language: String,
}

/// Immutable, validated exhibit catalog
#[derive(Debug, Clone)]
pub struct Catalog {
    slots_by_name: HashMap<String, SlotId>,
    names_by_slot: HashMap<SlotId, String>,
    codes_by_name: HashMap<String, LanguageCode>,
    names_by_code: HashMap<LanguageCode, String>,
    durations: HashMap<SlotId, HashMap<LanguageCode, Duration>>,
    /// Every pair, sorted by (artifact name, language name)
    pairs: Vec<CatalogPair>,
}

impl Catalog {
    /// Catalog shipped with the service
    pub fn builtin() -> Result<Self> {
        Self::from_config(CatalogConfig::from_toml(BUILTIN_CATALOG)?)
    }

    /// Load and validate a catalog file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read catalog {}: {}", path.display(), e))
        })?;
        Self::from_config(CatalogConfig::from_toml(&content)?)
    }

    /// Validate raw configuration and build lookup tables
    pub fn from_config(config: CatalogConfig) -> Result<Self> {
        let mut slots_by_name = HashMap::with_capacity(config.artifacts.len());
        let mut names_by_slot = HashMap::with_capacity(config.artifacts.len());
        for entry in config.artifacts {
            let slot = SlotId::new(entry.slot.trim());
            if entry.name.is_empty() || slot.as_str().is_empty() {
                return Err(Error::Config(format!(
                    "Artifact entry with empty name or slot: {:?}",
                    entry
                )));
            }
            if names_by_slot.insert(slot.clone(), entry.name.clone()).is_some() {
                return Err(Error::Config(format!("Duplicate artifact slot '{}'", slot)));
            }
            if slots_by_name.insert(entry.name.clone(), slot).is_some() {
                return Err(Error::Config(format!("Duplicate artifact name '{}'", entry.name)));
            }
        }

        let mut codes_by_name = HashMap::with_capacity(config.languages.len());
        let mut names_by_code = HashMap::with_capacity(config.languages.len());
        for entry in config.languages {
            let code = LanguageCode::new(entry.code.trim());
            if entry.name.is_empty() || code.as_str().is_empty() {
                return Err(Error::Config(format!(
                    "Language entry with empty name or code: {:?}",
                    entry
                )));
            }
            if names_by_code.insert(code.clone(), entry.name.clone()).is_some() {
                return Err(Error::Config(format!("Duplicate language code '{}'", code)));
            }
            if codes_by_name.insert(entry.name.clone(), code).is_some() {
                return Err(Error::Config(format!("Duplicate language name '{}'", entry.name)));
            }
        }

        let mut durations: HashMap<SlotId, HashMap<LanguageCode, Duration>> = HashMap::new();
        for (slot, per_language) in config.durations {
            let slot = SlotId::new(slot);
            if !names_by_slot.contains_key(&slot) {
                return Err(Error::Config(format!(
                    "Duration table references unknown slot '{}'",
                    slot
                )));
            }
            for (code, seconds) in per_language {
                let code = LanguageCode::new(code);
                if !names_by_code.contains_key(&code) {
                    return Err(Error::Config(format!(
                        "Duration for {} references unknown language code '{}'",
                        slot, code
                    )));
                }
                if !seconds.is_finite() || seconds <= 0.0 {
                    return Err(Error::Config(format!(
                        "Duration for {}/{} must be positive, got {}",
                        slot, code, seconds
                    )));
                }
                let duration = Duration::try_from_secs_f64(seconds).map_err(|e| {
                    Error::Config(format!(
                        "Duration for {}/{} out of range ({} s): {}",
                        slot, code, seconds, e
                    ))
                })?;
                durations.entry(slot.clone()).or_default().insert(code, duration);
            }
        }

        let mut pairs = Vec::with_capacity(names_by_slot.len() * names_by_code.len());
        for (slot, artifact) in &names_by_slot {
            for (code, language) in &names_by_code {
                pairs.push(CatalogPair {
                    slot: slot.clone(),
                    code: code.clone(),
                    artifact: artifact.clone(),
                    language: language.clone(),
                });
            }
        }
        pairs.sort_by(|a, b| {
            (&a.artifact, &a.language).cmp(&(&b.artifact, &b.language))
        });

        Ok(Self {
            slots_by_name,
            names_by_slot,
            codes_by_name,
            names_by_code,
            durations,
            pairs,
        })
    }

    /// Resolve an artifact display name (exact, case-sensitive)
    pub fn resolve_artifact(&self, name: &str) -> std::result::Result<SlotId, CatalogError> {
        self.slots_by_name
            .get(name)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownArtifact(name.to_string()))
    }

    /// Resolve a language display name (exact, case-sensitive)
    pub fn resolve_language(&self, name: &str) -> std::result::Result<LanguageCode, CatalogError> {
        self.codes_by_name
            .get(name)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownLanguage(name.to_string()))
    }

    /// Narration length for one slot/language pair
    pub fn lookup_duration(
        &self,
        slot: &SlotId,
        code: &LanguageCode,
    ) -> std::result::Result<Duration, CatalogError> {
        self.durations
            .get(slot.as_str())
            .and_then(|per_language| per_language.get(code.as_str()))
            .copied()
            .ok_or_else(|| CatalogError::MissingDuration {
                slot: slot.clone(),
                code: code.clone(),
            })
    }

    pub fn artifact_name(&self, slot: &SlotId) -> Option<&str> {
        self.names_by_slot.get(slot.as_str()).map(String::as_str)
    }

    pub fn language_name(&self, code: &LanguageCode) -> Option<&str> {
        self.names_by_code.get(code.as_str()).map(String::as_str)
    }

    /// All artifact x language pairs in report order
    pub fn pairs(&self) -> &[CatalogPair] {
        &self.pairs
    }

    /// Pairs that have no duration entry
    pub fn missing_durations(&self) -> Vec<&CatalogPair> {
        self.pairs
            .iter()
            .filter(|pair| self.lookup_duration(&pair.slot, &pair.code).is_err())
            .collect()
    }

    pub fn artifact_count(&self) -> usize {
        self.names_by_slot.len()
    }

    pub fn language_count(&self) -> usize {
        self.names_by_code.len()
    }
}
