//! Aggregation reporter
//!
//! Folds classified sessions into per-pair and overall completion rates and
//! attaches the live interaction counters. Every catalog pair appears in the
//! report even when nobody has scanned it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use treed_common::db::{InteractionCounter, LanguageCounter, LanguageSelection, ScanEvent};
use treed_common::{Catalog, LanguageCode, SlotId};

use crate::evaluator::{DataQualityIssue, Evaluation};

/// Session totals for one pair, or for the whole report
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CompletionStat {
    pub total: u64,
    pub completed: u64,
    /// `completed / total`; `None` (serialized `null`) when `total` is 0
    pub rate: Option<f64>,
}

impl CompletionStat {
    pub fn new(total: u64, completed: u64) -> Self {
        let rate = (total > 0).then(|| completed as f64 / total as f64);
        Self {
            total,
            completed,
            rate,
        }
    }

    fn add(&mut self, completed: bool) {
        *self = Self::new(self.total + 1, self.completed + u64::from(completed));
    }

    fn merge(&mut self, other: &CompletionStat) {
        *self = Self::new(self.total + other.total, self.completed + other.completed);
    }
}

impl fmt::Display for CompletionStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rate {
            Some(rate) => write!(
                f,
                "{}/{} completed ({:.1}%)",
                self.completed,
                self.total,
                rate * 100.0
            ),
            None => write!(f, "no data"),
        }
    }
}

/// Report row for one artifact x language pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairReport {
    pub slot: SlotId,
    pub code: LanguageCode,
    pub artifact: String,
    pub language: String,
    /// Raw scan count from the interaction counter
    pub interactions: u64,
    #[serde(flatten)]
    pub stat: CompletionStat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionReport {
    pub generated_at: DateTime<Utc>,
    pub pairs: Vec<PairReport>,
    pub overall: CompletionStat,
    /// Pairs left out of the rates because their data could not be scored
    pub excluded: Vec<DataQualityIssue>,
}

impl CompletionReport {
    pub fn get(&self, slot: &str, code: &str) -> Option<&PairReport> {
        self.pairs
            .iter()
            .find(|p| p.slot.as_str() == slot && p.code.as_str() == code)
    }
}

/// Raw counter value with display names attached
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PairCounter {
    pub slot: SlotId,
    pub code: LanguageCode,
    pub artifact: String,
    pub language: String,
    pub count: u64,
}

/// Compact administrator view of a report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSummary {
    pub generated_at: DateTime<Utc>,
    pub total_scans: u64,
    pub distinct_visitors: usize,
    pub total_sessions: u64,
    pub completed_sessions: u64,
    pub completion_rate: Option<f64>,
    pub pairs_with_data: usize,
    pub excluded_pairs: usize,
}

impl ReportSummary {
    pub fn from_report(report: &CompletionReport, events: &[ScanEvent]) -> Self {
        let visitors: HashSet<&str> = events.iter().map(|e| e.device_id.as_str()).collect();
        Self {
            generated_at: report.generated_at,
            total_scans: events.len() as u64,
            distinct_visitors: visitors.len(),
            total_sessions: report.overall.total,
            completed_sessions: report.overall.completed,
            completion_rate: report.overall.rate,
            pairs_with_data: report.pairs.iter().filter(|p| p.stat.total > 0).count(),
            excluded_pairs: report.excluded.len(),
        }
    }
}

/// Build the completion report
///
/// Pairs are the catalog's pairs plus any pair that appears only in the log
/// or counters (e.g. after an artifact was removed from the catalog); their
/// names fall back to the raw ids.
pub fn summarize(
    catalog: &Catalog,
    evaluation: &Evaluation,
    counters: &[InteractionCounter],
    generated_at: DateTime<Utc>,
) -> CompletionReport {
    let mut stats: HashMap<(&SlotId, &LanguageCode), CompletionStat> = HashMap::new();
    for session in &evaluation.sessions {
        stats
            .entry((&session.slot, &session.code))
            .or_default()
            .add(session.completed);
    }

    let counts: HashMap<(&SlotId, &LanguageCode), u64> = counters
        .iter()
        .map(|c| ((&c.slot, &c.code), c.count))
        .collect();

    let mut keys: BTreeSet<(&SlotId, &LanguageCode)> = catalog
        .pairs()
        .iter()
        .map(|p| (&p.slot, &p.code))
        .collect();
    keys.extend(stats.keys().copied());
    keys.extend(counts.keys().copied());

    let mut overall = CompletionStat::default();
    let mut pairs: Vec<PairReport> = keys
        .into_iter()
        .map(|(slot, code)| {
            let stat = stats.get(&(slot, code)).copied().unwrap_or_default();
            overall.merge(&stat);
            let (artifact, language) = display_names(catalog, slot, code);
            PairReport {
                slot: slot.clone(),
                code: code.clone(),
                artifact,
                language,
                interactions: counts.get(&(slot, code)).copied().unwrap_or(0),
                stat,
            }
        })
        .collect();

    pairs.sort_by(|a, b| {
        (&a.artifact, &a.language, &a.slot, &a.code).cmp(&(&b.artifact, &b.language, &b.slot, &b.code))
    });

    CompletionReport {
        generated_at,
        pairs,
        overall,
        excluded: evaluation.issues.clone(),
    }
}

/// Attach display names to counters, ordered like report rows
pub fn label_counters(catalog: &Catalog, counters: &[InteractionCounter]) -> Vec<PairCounter> {
    let mut labelled: Vec<PairCounter> = counters
        .iter()
        .map(|c| {
            let (artifact, language) = display_names(catalog, &c.slot, &c.code);
            PairCounter {
                slot: c.slot.clone(),
                code: c.code.clone(),
                artifact,
                language,
                count: c.count,
            }
        })
        .collect();
    labelled.sort_by(|a, b| (&a.artifact, &a.language).cmp(&(&b.artifact, &b.language)));
    labelled
}

/// Language selection total with its display name
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageTally {
    pub code: LanguageCode,
    pub language: String,
    pub count: u64,
}

/// Attach display names to language counters, ordered by language name
pub fn label_language_counters(catalog: &Catalog, counters: &[LanguageCounter]) -> Vec<LanguageTally> {
    let mut labelled: Vec<LanguageTally> = counters
        .iter()
        .map(|c| LanguageTally {
            code: c.code.clone(),
            language: catalog
                .language_name(&c.code)
                .unwrap_or(c.code.as_str())
                .to_string(),
            count: c.count,
        })
        .collect();
    labelled.sort_by(|a, b| (&a.language, &a.code).cmp(&(&b.language, &b.code)));
    labelled
}

/// Everything one device has done, counted from the logs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceActivity {
    pub device_id: String,
    /// Scans per slot, then per language code
    pub artifacts: BTreeMap<SlotId, BTreeMap<LanguageCode, u64>>,
    /// Language selections per code
    pub languages: BTreeMap<LanguageCode, u64>,
}

/// Per-device counts, ordered by device id
pub fn device_activity(events: &[ScanEvent], selections: &[LanguageSelection]) -> Vec<DeviceActivity> {
    fn entry<'a>(
        devices: &'a mut BTreeMap<String, DeviceActivity>,
        device_id: &str,
    ) -> &'a mut DeviceActivity {
        devices
            .entry(device_id.to_string())
            .or_insert_with(|| DeviceActivity {
                device_id: device_id.to_string(),
                ..Default::default()
            })
    }

    let mut devices: BTreeMap<String, DeviceActivity> = BTreeMap::new();
    for event in events {
        *entry(&mut devices, &event.device_id)
            .artifacts
            .entry(event.slot.clone())
            .or_default()
            .entry(event.code.clone())
            .or_default() += 1;
    }
    for selection in selections {
        *entry(&mut devices, &selection.device_id)
            .languages
            .entry(selection.code.clone())
            .or_default() += 1;
    }

    devices.into_values().collect()
}

fn display_names(catalog: &Catalog, slot: &SlotId, code: &LanguageCode) -> (String, String) {
    (
        catalog
            .artifact_name(slot)
            .unwrap_or(slot.as_str())
            .to_string(),
        catalog
            .language_name(code)
            .unwrap_or(code.as_str())
            .to_string(),
    )
}
