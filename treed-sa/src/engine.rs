//! Scan analytics service
//!
//! Ties the catalog, store and clock together behind the operations the HTTP
//! layer exposes. Recording is open; everything that reads the log takes an
//! [`AdminGrant`], which only the administrator gate can issue.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use treed_common::api::AdminGrant;
use treed_common::time::Clock;
use treed_common::Catalog;

use crate::error::Result;
use crate::evaluator::{self, CompletionThreshold, Evaluation};
use crate::recorder::{
    ClientEvent, EventRecorder, RecordedEvent, RecordedScan, RecordedSelection, ScanRequest,
    SelectionRequest,
};
use crate::reporter::{
    self, CompletionReport, DeviceActivity, LanguageTally, PairCounter, ReportSummary,
};
use crate::store::ScanStore;

pub struct ScanAnalytics {
    catalog: Arc<Catalog>,
    store: Arc<dyn ScanStore>,
    clock: Arc<dyn Clock>,
    recorder: EventRecorder,
    threshold: CompletionThreshold,
}

impl ScanAnalytics {
    pub fn new(
        catalog: Arc<Catalog>,
        store: Arc<dyn ScanStore>,
        clock: Arc<dyn Clock>,
        threshold: CompletionThreshold,
    ) -> Self {
        let recorder = EventRecorder::new(catalog.clone(), store.clone(), clock.clone());
        Self {
            catalog,
            store,
            clock,
            recorder,
            threshold,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn threshold(&self) -> CompletionThreshold {
        self.threshold
    }

    /// Current server time from the service clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Record one scan
    pub async fn record(&self, request: &ScanRequest) -> Result<RecordedScan> {
        self.recorder.record(request).await
    }

    /// Record one language selection
    pub async fn select_language(&self, request: &SelectionRequest) -> Result<RecordedSelection> {
        self.recorder.select_language(request).await
    }

    /// Record either kind of client event
    pub async fn record_event(&self, event: &ClientEvent) -> Result<RecordedEvent> {
        self.recorder.record_event(event).await
    }

    /// Rebuild and classify every listening session from the full log
    pub async fn evaluate(&self, _grant: &AdminGrant) -> Result<Evaluation> {
        let events = self.store.read_all_events().await?;
        Ok(evaluator::evaluate(&events, &self.catalog, self.threshold))
    }

    /// Full per-pair completion report
    pub async fn summarize(&self, grant: &AdminGrant) -> Result<CompletionReport> {
        let (report, _) = self.report_with_events(grant).await?;
        Ok(report)
    }

    /// Compact summary of the completion report
    pub async fn summary(&self, grant: &AdminGrant) -> Result<ReportSummary> {
        let (report, events) = self.report_with_events(grant).await?;
        let summary = ReportSummary::from_report(&report, &events);
        info!(
            "Summary: {} scans, {} visitors, overall {}",
            summary.total_scans, summary.distinct_visitors, report.overall
        );
        Ok(summary)
    }

    /// Raw interaction counters with display names
    pub async fn counters(&self, _grant: &AdminGrant) -> Result<Vec<PairCounter>> {
        let counters = self.store.read_counters().await?;
        Ok(reporter::label_counters(&self.catalog, &counters))
    }

    /// Language selection counters with display names
    pub async fn languages(&self, _grant: &AdminGrant) -> Result<Vec<LanguageTally>> {
        let counters = self.store.read_language_counters().await?;
        Ok(reporter::label_language_counters(&self.catalog, &counters))
    }

    /// Per-device scan and selection counts
    pub async fn devices(&self, _grant: &AdminGrant) -> Result<Vec<DeviceActivity>> {
        let events = self.store.read_all_events().await?;
        let selections = self.store.read_all_selections().await?;
        let devices = reporter::device_activity(&events, &selections);
        debug!("Built activity for {} devices", devices.len());
        Ok(devices)
    }

    async fn report_with_events(
        &self,
        _grant: &AdminGrant,
    ) -> Result<(CompletionReport, Vec<treed_common::db::ScanEvent>)> {
        let events = self.store.read_all_events().await?;
        let counters = self.store.read_counters().await?;
        let evaluation = evaluator::evaluate(&events, &self.catalog, self.threshold);
        let report = reporter::summarize(&self.catalog, &evaluation, &counters, self.clock.now());
        debug!(
            "Built completion report over {} pairs ({} excluded)",
            report.pairs.len(),
            report.excluded.len()
        );
        Ok((report, events))
    }
}
