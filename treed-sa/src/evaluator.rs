//! Completion evaluator
//!
//! Rebuilds listening sessions from the raw scan log and classifies each as
//! completed or not. Nothing is persisted: every run starts from the full
//! log, so a changed duration table or threshold re-scores all history.
//!
//! Listening time is inferred from scan timestamps only. A visitor's scan of
//! an artifact in a language opens a session and their next scan of the same
//! artifact in the same language closes it; the gap between the two is the
//! elapsed listening time. A scan with no following scan is an incomplete
//! session with zero elapsed time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::{debug, warn};
use treed_common::db::ScanEvent;
use treed_common::{Catalog, CatalogError, LanguageCode, SlotId};

/// Fraction of a track a visitor must be inferred to have heard
pub const COMPLETION_THRESHOLD: CompletionThreshold = CompletionThreshold::from_per_mille(900);

/// Completion threshold held in per-mille so comparisons are exact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionThreshold {
    per_mille: u32,
}

impl CompletionThreshold {
    pub const fn from_per_mille(per_mille: u32) -> Self {
        Self { per_mille }
    }

    /// Threshold from a fraction in `0.0..=1.0`, rounded to per-mille
    pub fn from_fraction(fraction: f64) -> Option<Self> {
        if !(0.0..=1.0).contains(&fraction) {
            return None;
        }
        Some(Self::from_per_mille((fraction * 1000.0).round() as u32))
    }

    pub fn fraction(&self) -> f64 {
        f64::from(self.per_mille) / 1000.0
    }

    /// `elapsed >= fraction x duration`, in integer milliseconds
    pub fn is_met(&self, elapsed: Duration, duration: Duration) -> bool {
        elapsed.as_millis() * 1000 >= duration.as_millis() * u128::from(self.per_mille)
    }
}

impl Default for CompletionThreshold {
    fn default() -> Self {
        COMPLETION_THRESHOLD
    }
}

/// Start and inferred length of one session, before classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSpan {
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

/// Rule splitting one visitor's scans of one artifact/language into sessions
pub trait SessionPolicy {
    /// `scans` are ordered by (recorded_at, seq)
    fn sessions(&self, scans: &[&ScanEvent]) -> Vec<SessionSpan>;
}

/// Pair scans in order: each pair is a session lasting the gap between them;
/// a trailing unpaired scan is a zero-length session
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsecutiveScanPairs;

impl SessionPolicy for ConsecutiveScanPairs {
    fn sessions(&self, scans: &[&ScanEvent]) -> Vec<SessionSpan> {
        scans
            .chunks(2)
            .map(|pair| {
                let start = pair[0];
                let elapsed = pair
                    .get(1)
                    .and_then(|end| (end.recorded_at - start.recorded_at).to_std().ok())
                    .unwrap_or_default();
                SessionSpan {
                    started_at: start.recorded_at,
                    elapsed,
                }
            })
            .collect()
    }
}

/// One inferred, classified listening session
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListeningSession {
    pub device_id: String,
    pub slot: SlotId,
    pub code: LanguageCode,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub duration_ms: u64,
    pub completed: bool,
}

/// A pair left out of evaluation because its data could not be scored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DataQualityIssue {
    pub slot: SlotId,
    pub code: LanguageCode,
    /// Scans of this pair that were not scored
    pub events: usize,
    pub reason: String,
}

/// Result of one evaluation run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Evaluation {
    pub sessions: Vec<ListeningSession>,
    pub issues: Vec<DataQualityIssue>,
}

/// Evaluate with the default session policy
pub fn evaluate(
    events: &[ScanEvent],
    catalog: &Catalog,
    threshold: CompletionThreshold,
) -> Evaluation {
    evaluate_with(events, catalog, threshold, &ConsecutiveScanPairs)
}

/// Evaluate with an explicit session policy
pub fn evaluate_with<P: SessionPolicy + ?Sized>(
    events: &[ScanEvent],
    catalog: &Catalog,
    threshold: CompletionThreshold,
    policy: &P,
) -> Evaluation {
    let mut groups: BTreeMap<(&str, &SlotId, &LanguageCode), Vec<&ScanEvent>> = BTreeMap::new();
    for event in events {
        groups
            .entry((event.device_id.as_str(), &event.slot, &event.code))
            .or_default()
            .push(event);
    }

    let mut durations: HashMap<(&SlotId, &LanguageCode), Result<Duration, CatalogError>> =
        HashMap::new();
    let mut excluded: BTreeMap<(&SlotId, &LanguageCode), DataQualityIssue> = BTreeMap::new();
    let mut sessions = Vec::new();

    for ((device_id, slot, code), mut scans) in groups {
        let duration = durations
            .entry((slot, code))
            .or_insert_with(|| catalog.lookup_duration(slot, code));

        let duration = match duration {
            Ok(duration) => *duration,
            Err(e) => {
                let reason = e.to_string();
                excluded
                    .entry((slot, code))
                    .or_insert_with(|| DataQualityIssue {
                        slot: slot.clone(),
                        code: code.clone(),
                        events: 0,
                        reason,
                    })
                    .events += scans.len();
                continue;
            }
        };

        scans.sort_by_key(|scan| (scan.recorded_at, scan.seq));

        for span in policy.sessions(&scans) {
            sessions.push(ListeningSession {
                device_id: device_id.to_string(),
                slot: slot.clone(),
                code: code.clone(),
                started_at: span.started_at,
                elapsed_ms: span.elapsed.as_millis() as u64,
                duration_ms: duration.as_millis() as u64,
                completed: threshold.is_met(span.elapsed, duration),
            });
        }
    }

    sessions.sort_by(|a, b| {
        (a.started_at, &a.device_id, &a.slot, &a.code)
            .cmp(&(b.started_at, &b.device_id, &b.slot, &b.code))
    });

    let issues: Vec<DataQualityIssue> = excluded.into_values().collect();
    for issue in &issues {
        warn!(
            "Excluded {}/{} from completion report ({} scans): {}",
            issue.slot, issue.code, issue.events, issue.reason
        );
    }
    debug!(
        "Evaluated {} scans into {} sessions ({} pairs excluded)",
        events.len(),
        sessions.len(),
        issues.len()
    );

    Evaluation { sessions, issues }
}

#[cfg(test)]
mod tests {
    use super::*;
    use treed_common::catalog::CatalogConfig;
    use treed_common::time::from_millis;

    fn catalog() -> Catalog {
        let config = CatalogConfig::from_toml(
            r#"
            [[artifacts]]
            name = "Ain Ghazal"
            slot = "st1"

            [[artifacts]]
            name = "Imhotep"
            slot = "st15"

            [[languages]]
            name = "English"
            code = "en"

            [[languages]]
            name = "Arabic"
            code = "ar"

            [durations.st1]
            en = 95
            ar = 100
            "#,
        )
        .unwrap();
        Catalog::from_config(config).unwrap()
    }

    fn event(seq: i64, device: &str, slot: &str, code: &str, at_secs: i64) -> ScanEvent {
        ScanEvent {
            seq,
            device_id: device.to_string(),
            slot: SlotId::new(slot),
            code: LanguageCode::new(code),
            recorded_at: from_millis(at_secs * 1000),
        }
    }

    #[test]
    fn test_empty_log_yields_no_sessions() {
        let evaluation = evaluate(&[], &catalog(), COMPLETION_THRESHOLD);
        assert!(evaluation.sessions.is_empty());
        assert!(evaluation.issues.is_empty());
    }

    #[test]
    fn test_reference_scenario() {
        let events = vec![
            event(1, "d1", "st1", "en", 0),
            event(2, "d2", "st1", "en", 0),
            event(3, "d1", "st1", "en", 90),
        ];
        let evaluation = evaluate(&events, &catalog(), COMPLETION_THRESHOLD);

        assert_eq!(evaluation.sessions.len(), 2);
        let d1 = evaluation.sessions.iter().find(|s| s.device_id == "d1").unwrap();
        assert_eq!(d1.elapsed_ms, 90_000);
        assert_eq!(d1.duration_ms, 95_000);
        assert!(d1.completed);

        let d2 = evaluation.sessions.iter().find(|s| s.device_id == "d2").unwrap();
        assert_eq!(d2.elapsed_ms, 0);
        assert!(!d2.completed);
    }

    #[test]
    fn test_threshold_boundary_is_inclusive() {
        // 0.9 x 100s = 90s
        let at_threshold = vec![event(1, "d1", "st1", "ar", 0), event(2, "d1", "st1", "ar", 90)];
        let evaluation = evaluate(&at_threshold, &catalog(), COMPLETION_THRESHOLD);
        assert!(evaluation.sessions[0].completed);

        let one_second_short =
            vec![event(1, "d1", "st1", "ar", 0), event(2, "d1", "st1", "ar", 89)];
        let evaluation = evaluate(&one_second_short, &catalog(), COMPLETION_THRESHOLD);
        assert!(!evaluation.sessions[0].completed);
    }

    #[test]
    fn test_fractional_threshold_boundary() {
        // 0.9 x 95s = 85.5s
        let threshold = COMPLETION_THRESHOLD;
        let duration = Duration::from_secs(95);
        assert!(threshold.is_met(Duration::from_millis(85_500), duration));
        assert!(!threshold.is_met(Duration::from_millis(84_500), duration));
        assert!(!threshold.is_met(Duration::from_millis(85_499), duration));
    }

    #[test]
    fn test_scans_paired_in_order() {
        let events = vec![
            event(1, "d1", "st1", "en", 0),
            event(2, "d1", "st1", "en", 30),
            event(3, "d1", "st1", "en", 100),
            event(4, "d1", "st1", "en", 200),
            event(5, "d1", "st1", "en", 500),
        ];
        let evaluation = evaluate(&events, &catalog(), COMPLETION_THRESHOLD);
        let elapsed: Vec<u64> = evaluation.sessions.iter().map(|s| s.elapsed_ms).collect();
        assert_eq!(elapsed, vec![30_000, 100_000, 0]);
        let completed: Vec<bool> = evaluation.sessions.iter().map(|s| s.completed).collect();
        assert_eq!(completed, vec![false, true, false]);
    }

    #[test]
    fn test_other_language_does_not_close_session() {
        let events = vec![
            event(1, "d1", "st1", "en", 0),
            event(2, "d1", "st1", "ar", 95),
        ];
        let evaluation = evaluate(&events, &catalog(), COMPLETION_THRESHOLD);
        assert_eq!(evaluation.sessions.len(), 2);
        assert!(evaluation.sessions.iter().all(|s| !s.completed));
    }

    #[test]
    fn test_events_sorted_by_time_not_arrival() {
        let events = vec![
            event(7, "d1", "st1", "en", 90),
            event(3, "d1", "st1", "en", 0),
        ];
        let evaluation = evaluate(&events, &catalog(), COMPLETION_THRESHOLD);
        assert_eq!(evaluation.sessions.len(), 1);
        assert_eq!(evaluation.sessions[0].elapsed_ms, 90_000);
    }

    #[test]
    fn test_missing_duration_excludes_only_that_pair() {
        let events = vec![
            event(1, "d1", "st15", "en", 0),
            event(2, "d2", "st15", "en", 10),
            event(3, "d1", "st1", "en", 0),
            event(4, "d1", "st1", "en", 90),
        ];
        let evaluation = evaluate(&events, &catalog(), COMPLETION_THRESHOLD);

        assert_eq!(evaluation.sessions.len(), 1);
        assert_eq!(evaluation.sessions[0].slot, SlotId::new("st1"));

        assert_eq!(evaluation.issues.len(), 1);
        let issue = &evaluation.issues[0];
        assert_eq!(issue.slot, SlotId::new("st15"));
        assert_eq!(issue.code, LanguageCode::new("en"));
        assert_eq!(issue.events, 2);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let events = vec![
            event(1, "d3", "st1", "en", 5),
            event(2, "d1", "st1", "ar", 0),
            event(3, "d2", "st1", "en", 5),
            event(4, "d1", "st1", "ar", 95),
            event(5, "d3", "st1", "en", 99),
        ];
        let first = evaluate(&events, &catalog(), COMPLETION_THRESHOLD);
        let second = evaluate(&events, &catalog(), COMPLETION_THRESHOLD);
        assert_eq!(first, second);

        let order: Vec<&str> = first.sessions.iter().map(|s| s.device_id.as_str()).collect();
        assert_eq!(order, vec!["d1", "d2", "d3"]);
    }

    #[test]
    fn test_threshold_from_fraction() {
        assert_eq!(CompletionThreshold::from_fraction(0.9), Some(COMPLETION_THRESHOLD));
        assert_eq!(CompletionThreshold::from_fraction(1.5), None);
        assert!((COMPLETION_THRESHOLD.fraction() - 0.9).abs() < f64::EPSILON);
    }

    #[test]
    fn test_custom_policy_is_used() {
        struct EverySessionFullLength;
        impl SessionPolicy for EverySessionFullLength {
            fn sessions(&self, scans: &[&ScanEvent]) -> Vec<SessionSpan> {
                scans
                    .iter()
                    .map(|scan| SessionSpan {
                        started_at: scan.recorded_at,
                        elapsed: Duration::from_secs(1_000),
                    })
                    .collect()
            }
        }

        let events = vec![event(1, "d1", "st1", "en", 0)];
        let evaluation =
            evaluate_with(&events, &catalog(), COMPLETION_THRESHOLD, &EverySessionFullLength);
        assert!(evaluation.sessions[0].completed);
    }
}
