//! Recording and analytics tests against a file-backed database
//!
//! Uses the production pool settings (WAL, busy timeout, multiple
//! connections) so concurrent recording exercises real write contention.

use std::sync::Arc;
use tempfile::TempDir;
use tokio::task::JoinSet;
use treed_common::api::{verify_admin, AdminGrant, AuthWindow};
use treed_common::db::init_database;
use treed_common::time::{from_millis, ManualClock, SystemClock};
use treed_common::{Catalog, CatalogError};
use treed_sa::evaluator::COMPLETION_THRESHOLD;
use treed_sa::recorder::{ScanRequest, SelectionRequest};
use treed_sa::store::{ScanStore, SqliteScanStore};
use treed_sa::{Error, ScanAnalytics};

struct Fixture {
    analytics: Arc<ScanAnalytics>,
    store: Arc<SqliteScanStore>,
    clock: Arc<ManualClock>,
    _dir: TempDir,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("treed.db")).await.unwrap();
    let store = Arc::new(SqliteScanStore::new(pool));
    let clock = Arc::new(ManualClock::new(from_millis(1_730_000_000_000)));
    let analytics = Arc::new(ScanAnalytics::new(
        Arc::new(Catalog::builtin().unwrap()),
        store.clone(),
        clock.clone(),
        COMPLETION_THRESHOLD,
    ));
    Fixture {
        analytics,
        store,
        clock,
        _dir: dir,
    }
}

/// Grant from an open gate (secret 0)
fn grant() -> AdminGrant {
    verify_admin("GET", "/api/analytics/completion", None, 0, 0, AuthWindow::default()).unwrap()
}

fn request(device: &str, artifact: &str, language: &str) -> ScanRequest {
    ScanRequest::new(device, artifact, language).unwrap()
}

#[tokio::test]
async fn test_record_increments_counter_and_log_by_one() {
    let f = fixture().await;
    let grant = grant();

    let before = f.analytics.summarize(&grant).await.unwrap();
    let before_pair = before.get("st1", "en").unwrap();
    assert_eq!(before_pair.interactions, 0);
    assert_eq!(before_pair.stat.total, 0);

    f.analytics
        .record(&request("new-visitor", "Ain Ghazal", "English"))
        .await
        .unwrap();

    let after = f.analytics.summarize(&grant).await.unwrap();
    let after_pair = after.get("st1", "en").unwrap();
    assert_eq!(after_pair.interactions, before_pair.interactions + 1);
    assert_eq!(after_pair.stat.total, before_pair.stat.total + 1);
    assert_eq!(f.store.read_all_events().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_unknown_names_leave_no_trace() {
    let f = fixture().await;

    let err = f
        .analytics
        .record(&request("d1", "Sphinx", "English"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Catalog(CatalogError::UnknownArtifact(ref name)) if name == "Sphinx"
    ));

    let err = f
        .analytics
        .record(&request("d1", "Ain Ghazal", "Klingon"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Catalog(CatalogError::UnknownLanguage(_))));

    assert!(f.store.read_all_events().await.unwrap().is_empty());
    assert!(f.store.read_counters().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_names_are_case_sensitive() {
    let f = fixture().await;
    let err = f
        .analytics
        .record(&request("d1", "ain ghazal", "English"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Catalog(CatalogError::UnknownArtifact(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_records_lose_no_updates() {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("treed.db")).await.unwrap();
    let store = Arc::new(SqliteScanStore::new(pool));
    let analytics = Arc::new(ScanAnalytics::new(
        Arc::new(Catalog::builtin().unwrap()),
        store.clone(),
        Arc::new(SystemClock::new()),
        COMPLETION_THRESHOLD,
    ));

    let mut tasks = JoinSet::new();
    for i in 0..100 {
        let analytics = analytics.clone();
        tasks.spawn(async move {
            analytics
                .record(&request(&format!("device-{}", i), "Ain Ghazal", "English"))
                .await
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    let counters = store.read_counters().await.unwrap();
    assert_eq!(counters.len(), 1);
    assert_eq!(counters[0].count, 100);
    assert_eq!(store.read_all_events().await.unwrap().len(), 100);

    let counted = analytics.counters(&grant()).await.unwrap();
    assert_eq!(counted[0].count, 100);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_selections_counted_apart_from_scans() {
    let f = fixture().await;

    let mut tasks = JoinSet::new();
    for i in 0..50 {
        let analytics = f.analytics.clone();
        tasks.spawn(async move {
            let device = format!("device-{}", i);
            analytics
                .select_language(&SelectionRequest::new(&device, "Arabic").unwrap())
                .await?;
            analytics
                .record(&request(&device, "Ain Ghazal", "Arabic"))
                .await
                .map(|_| ())
        });
    }
    while let Some(result) = tasks.join_next().await {
        result.unwrap().unwrap();
    }

    let languages = f.store.read_language_counters().await.unwrap();
    assert_eq!(languages.len(), 1);
    assert_eq!(languages[0].count, 50);
    assert_eq!(f.store.read_all_selections().await.unwrap().len(), 50);

    let counters = f.store.read_counters().await.unwrap();
    assert_eq!(counters[0].count, 50);

    let tallies = f.analytics.languages(&grant()).await.unwrap();
    assert_eq!(tallies[0].language, "Arabic");
    assert_eq!(tallies[0].count, 50);

    let devices = f.analytics.devices(&grant()).await.unwrap();
    assert_eq!(devices.len(), 50);
}

#[tokio::test]
async fn test_reference_scenario_persisted() {
    let f = fixture().await;

    f.analytics.record(&request("d1", "Ain Ghazal", "English")).await.unwrap();
    f.analytics.record(&request("d2", "Ain Ghazal", "English")).await.unwrap();
    f.clock.advance_secs(90);
    f.analytics.record(&request("d1", "Ain Ghazal", "English")).await.unwrap();

    let report = f.analytics.summarize(&grant()).await.unwrap();
    let pair = report.get("st1", "en").unwrap();
    assert_eq!(pair.stat.total, 2);
    assert_eq!(pair.stat.completed, 1);
    assert_eq!(pair.stat.rate, Some(0.5));
    assert_eq!(pair.interactions, 3);
}

#[tokio::test]
async fn test_device_ids_normalised_before_pairing() {
    let f = fixture().await;

    f.analytics.record(&request("Visitor-7", "Ain Ghazal", "English")).await.unwrap();
    f.clock.advance_secs(90);
    f.analytics.record(&request("  visitor-7 ", "Ain Ghazal", "English")).await.unwrap();

    let evaluation = f.analytics.evaluate(&grant()).await.unwrap();
    assert_eq!(evaluation.sessions.len(), 1);
    assert_eq!(evaluation.sessions[0].device_id, "visitor-7");
    assert!(evaluation.sessions[0].completed);
}

#[tokio::test]
async fn test_evaluation_repeatable_on_unchanged_log() {
    let f = fixture().await;
    for (device, secs) in [("a", 0), ("b", 10), ("a", 40), ("c", 50), ("b", 200)] {
        f.clock.set(from_millis(1_730_000_000_000 + secs * 1000));
        f.analytics.record(&request(device, "Ain Ghazal", "English")).await.unwrap();
    }

    let first = f.analytics.evaluate(&grant()).await.unwrap();
    let second = f.analytics.evaluate(&grant()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first.sessions.len(), 3);
}

#[tokio::test]
async fn test_missing_duration_reported_not_fatal() {
    let f = fixture().await;

    // The built-in catalog carries no duration for Mona Lisa in French
    f.analytics.record(&request("d1", "Mona Lisa", "French")).await.unwrap();
    f.analytics.record(&request("d1", "Ain Ghazal", "English")).await.unwrap();

    let report = f.analytics.summarize(&grant()).await.unwrap();
    assert_eq!(report.excluded.len(), 1);
    assert_eq!(report.excluded[0].slot.as_str(), "st24");
    assert_eq!(report.get("st24", "fr").unwrap().interactions, 1);
    assert_eq!(report.get("st24", "fr").unwrap().stat.rate, None);
    assert_eq!(report.get("st1", "en").unwrap().stat.total, 1);
}

#[tokio::test]
async fn test_empty_log_reports_no_data() {
    let f = fixture().await;
    let grant = grant();

    let evaluation = f.analytics.evaluate(&grant).await.unwrap();
    assert!(evaluation.sessions.is_empty());

    let report = f.analytics.summarize(&grant).await.unwrap();
    assert_eq!(
        report.pairs.len(),
        f.analytics.catalog().artifact_count() * f.analytics.catalog().language_count()
    );
    assert!(report.pairs.iter().all(|p| p.stat.rate.is_none()));
    assert_eq!(report.overall.to_string(), "no data");

    let summary = f.analytics.summary(&grant).await.unwrap();
    assert_eq!(summary.total_scans, 0);
    assert_eq!(summary.distinct_visitors, 0);
    assert_eq!(summary.pairs_with_data, 0);
}

#[tokio::test]
async fn test_events_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("treed.db");

    {
        let store = SqliteScanStore::new(init_database(&db_path).await.unwrap());
        let analytics = ScanAnalytics::new(
            Arc::new(Catalog::builtin().unwrap()),
            Arc::new(store),
            Arc::new(SystemClock::new()),
            COMPLETION_THRESHOLD,
        );
        analytics.record(&request("d1", "Ain Ghazal", "English")).await.unwrap();
    }

    let store = SqliteScanStore::new(init_database(&db_path).await.unwrap());
    assert_eq!(store.read_all_events().await.unwrap().len(), 1);
    assert_eq!(store.read_counters().await.unwrap()[0].count, 1);
}
