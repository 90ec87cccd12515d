//! Integrated runner: the long-lived supervisor over the whole pipeline.
//!
//! One ingest loop runs Reader→Collector→Recorder cycles at a fixed
//! interval; the consolidator ticks on its own cadence in a second task.
//! Both observe one cancellation token. The runner owns every component
//! and moves batches between them by value; no component imports another.

use std::pin::pin;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use engram_config::{EngramPaths, Settings};

use crate::backup::BackupWriter;
use crate::collect::{ActivityCollector, CollectorConfig, StartPosition};
use crate::database::Database;
use crate::database::memory::{InMemoryHotStore, InMemorySummaryStore};
use crate::database::ports::{HotTierStore, SummaryTierStore};
use crate::database::postgres::{
    PostgresHotStore, PostgresServiceRegistry, PostgresSummaryStore,
};
use crate::error::{EngramError, Result};
use crate::journal::{JournalReader, open_source};
use crate::registry::{ServiceRegistry, cold_collection, warm_collection};
use crate::score::ImportanceScorer;
use crate::tier::{ConsolidatorConfig, HotTierRecorder, TierConsolidator};

/// Supervision knobs, mirroring the CLI surface.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    pub interval: StdDuration,
    /// Total run time in hours; 0 runs until stopped.
    pub duration_hours: f64,
    pub backup_to_files: bool,
    pub auto_reset: bool,
    pub error_threshold: u32,
    pub empty_results_threshold: u32,
    pub shutdown_grace: StdDuration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            interval: StdDuration::from_secs(30),
            duration_hours: 24.0,
            backup_to_files: true,
            auto_reset: true,
            error_threshold: 3,
            empty_results_threshold: 3,
            shutdown_grace: StdDuration::from_secs(30),
        }
    }
}

impl RunnerConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            interval: StdDuration::from_secs(settings.runner.interval_secs),
            duration_hours: settings.runner.duration_hours,
            backup_to_files: settings.backup.enabled,
            auto_reset: settings.runner.auto_reset,
            error_threshold: settings.runner.error_threshold,
            empty_results_threshold: settings.runner.empty_results_threshold,
            shutdown_grace: StdDuration::from_secs(settings.runner.shutdown_grace_secs),
        }
    }
}

/// Outcome of one supervised cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Activities collected; `(collected, recorded)` counts.
    Collected { collected: usize, recorded: usize },
    Empty,
    /// A recoverable error was absorbed; counted toward the threshold.
    Errored,
}

/// Totals reported when the runner stops.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunSummary {
    pub cycles: u64,
    pub activities: u64,
    pub recorded: u64,
    pub duration_hours: f64,
    pub state_resets: u64,
}

pub struct IntegratedRunner {
    config: RunnerConfig,
    collector: ActivityCollector,
    recorder: Option<Arc<HotTierRecorder>>,
    backup: Option<BackupWriter>,
    consolidator: Option<Arc<TierConsolidator>>,
    shutdown: CancellationToken,
    consecutive_errors: u32,
    consecutive_empty: u32,
    cycles: u64,
    activities: u64,
    recorded: u64,
}

impl std::fmt::Debug for IntegratedRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntegratedRunner")
            .field("config", &self.config)
            .field("recorder", &self.recorder.is_some())
            .field("backup", &self.backup.is_some())
            .field("consolidator", &self.consolidator.is_some())
            .field("cycles", &self.cycles)
            .finish()
    }
}

impl IntegratedRunner {
    pub fn new(
        config: RunnerConfig,
        collector: ActivityCollector,
        recorder: Option<HotTierRecorder>,
        backup: Option<BackupWriter>,
        consolidator: Option<TierConsolidator>,
    ) -> Self {
        IntegratedRunner {
            config,
            collector,
            recorder: recorder.map(Arc::new),
            backup,
            consolidator: consolidator.map(Arc::new),
            shutdown: CancellationToken::new(),
            consecutive_errors: 0,
            consecutive_empty: 0,
            cycles: 0,
            activities: 0,
            recorded: 0,
        }
    }

    /// Wire the full pipeline from settings. Database initialization
    /// failure degrades to file-only operation: collection continues,
    /// backups are forced on, and the consolidator stays idle.
    pub async fn initialize(settings: &Settings, paths: &EngramPaths) -> Result<Self> {
        if settings.runner.volumes.is_empty() {
            return Err(EngramError::Internal(
                "no volumes configured; pass --volumes".into(),
            ));
        }

        let mut readers = Vec::with_capacity(settings.runner.volumes.len());
        for volume in &settings.runner.volumes {
            let source = open_source(volume).await?;
            readers.push(JournalReader::new(source));
        }

        let activity_dir = settings
            .backup
            .output_dir
            .clone()
            .unwrap_or_else(|| paths.activity_dir());

        let collector_config = CollectorConfig {
            use_state_file: settings.runner.use_state_file,
            state_file: Some(paths.state_file()),
            start_position: StartPosition::Head,
            ..CollectorConfig::default()
        };
        if !settings.runner.use_state_file {
            tracing::info!(
                target: "runner",
                "cursor durability is off; journal positions are lost on restart"
            );
        }
        let collector = ActivityCollector::new(readers, collector_config)?;

        let mut config = RunnerConfig::from_settings(settings);
        let scorer = ImportanceScorer::new();

        let (recorder, consolidator) = match Self::connect_tiers(settings, &scorer).await {
            Ok(pair) => pair,
            Err(err) => {
                tracing::warn!(
                    target: "runner",
                    error = %err,
                    "recorder initialization failed; continuing with file output only"
                );
                config.backup_to_files = true;
                (None, None)
            }
        };

        let backup = if config.backup_to_files {
            Some(BackupWriter::new(
                activity_dir,
                settings.backup.max_file_size_mb,
            )?)
        } else {
            None
        };

        Ok(Self::new(config, collector, recorder, backup, consolidator))
    }

    async fn connect_tiers(
        settings: &Settings,
        scorer: &ImportanceScorer,
    ) -> Result<(Option<HotTierRecorder>, Option<TierConsolidator>)> {
        let database = Database::connect(&settings.database).await?;
        let timeouts = database.timeouts();

        let registry = PostgresServiceRegistry::new(database.pool().clone(), timeouts);
        registry.ensure_schema().await?;

        let registration = crate::registry::ServiceRegistration::hot_tier_recorder();
        let registered = registry.register(&registration).await?;

        let hot_store = PostgresHotStore::new(
            database.pool().clone(),
            registered.collection_name.clone(),
            timeouts,
        )?;
        hot_store.ensure_schema().await?;
        let hot_store: Arc<dyn HotTierStore> = Arc::new(hot_store);

        let summary_store = PostgresSummaryStore::new(
            database.pool().clone(),
            warm_collection(&registered.collection_name),
            cold_collection(&registered.collection_name),
            timeouts,
        )?;
        summary_store.ensure_schema().await?;
        let summary_store: Arc<dyn SummaryTierStore> = Arc::new(summary_store);

        let recorder = HotTierRecorder::new(
            Arc::clone(&hot_store),
            registered.collection_name,
            scorer.clone(),
            settings.runner.ttl_days,
        );

        let consolidator = TierConsolidator::new(
            hot_store,
            summary_store,
            scorer.clone(),
            ConsolidatorConfig::from_settings(&settings.consolidator),
        );

        Ok((Some(recorder), Some(consolidator)))
    }

    /// In-memory wiring for file-less test runs.
    pub fn with_memory_stores(
        config: RunnerConfig,
        collector: ActivityCollector,
        ttl_days: i64,
    ) -> Self {
        let hot: Arc<dyn HotTierStore> = Arc::new(InMemoryHotStore::new());
        let summaries: Arc<dyn SummaryTierStore> = Arc::new(InMemorySummaryStore::new());
        let scorer = ImportanceScorer::new();
        let recorder = HotTierRecorder::new(
            Arc::clone(&hot),
            "activity_hot_test".into(),
            scorer.clone(),
            ttl_days,
        );
        let consolidator =
            TierConsolidator::new(hot, summaries, scorer, ConsolidatorConfig::default());
        Self::new(config, collector, Some(recorder), None, Some(consolidator))
    }

    /// Token the binary's signal handler cancels.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn recorder(&self) -> Option<&Arc<HotTierRecorder>> {
        self.recorder.as_ref()
    }

    /// Run one cycle and apply the auto-reset policy to its outcome.
    pub async fn tick(&mut self) -> CycleOutcome {
        self.cycles += 1;
        let cycle_deadline = Utc::now()
            + Duration::from_std(self.config.interval).unwrap_or_else(|_| Duration::seconds(30));

        let batch = match self.collector.collect(cycle_deadline).await {
            Ok(batch) => batch,
            Err(err) if err.is_structural() => {
                // Structural crashes reset unconditionally and retry once
                // instead of counting toward the threshold.
                tracing::warn!(target: "runner", error = %err, "structural failure in reader; resetting state");
                self.collector.reset_state();
                match self.collector.collect(cycle_deadline).await {
                    Ok(batch) => batch,
                    Err(retry_err) => {
                        tracing::error!(target: "runner", error = %retry_err, "retry after structural reset failed");
                        return CycleOutcome::Errored;
                    }
                }
            }
            Err(err) => {
                tracing::error!(target: "runner", error = %err, "collection cycle failed");
                self.consecutive_errors += 1;
                if self.config.auto_reset && self.consecutive_errors >= self.config.error_threshold
                {
                    tracing::warn!(
                        target: "runner",
                        errors = self.consecutive_errors,
                        "consecutive collection errors reached threshold; resetting collector state"
                    );
                    self.collector.reset_state();
                    self.consecutive_errors = 0;
                }
                return CycleOutcome::Errored;
            }
        };

        self.consecutive_errors = 0;

        if batch.is_empty() {
            self.consecutive_empty += 1;
            tracing::debug!(target: "runner", "no new activities collected");
            if self.config.auto_reset
                && self.consecutive_empty >= self.config.empty_results_threshold
            {
                tracing::warn!(
                    target: "runner",
                    empty_cycles = self.consecutive_empty,
                    "no activities for consecutive cycles; resetting collector state"
                );
                self.collector.reset_state();
                self.consecutive_empty = 0;
            }
            return CycleOutcome::Empty;
        }

        self.consecutive_empty = 0;
        let collected = batch.activities.len();
        self.activities += collected as u64;

        // Backup first (borrowing the batch), then hand ownership to the
        // recorder.
        if let Some(backup) = self.backup.as_mut()
            && let Err(err) = backup.write_batch(&batch.activities)
        {
            tracing::warn!(target: "runner", error = %err, "backup write failed");
        }

        let mut recorded = 0;
        if let Some(recorder) = self.recorder.as_ref() {
            match recorder.store_activities(batch.activities).await {
                Ok(ids) => {
                    recorded = ids.len();
                    if recorded < collected {
                        tracing::warn!(
                            target: "runner",
                            recorded,
                            collected,
                            "partial batch write to hot tier"
                        );
                    }
                }
                Err(err) => {
                    tracing::error!(target: "runner", error = %err, "failed to record batch");
                }
            }
        }
        self.recorded += recorded as u64;

        tracing::info!(
            target: "runner",
            cycle = self.cycles,
            collected,
            recorded,
            total = self.activities,
            "collection cycle complete"
        );
        CycleOutcome::Collected {
            collected,
            recorded,
        }
    }

    /// Supervise until the duration elapses or the token is cancelled.
    pub async fn run(mut self) -> Result<RunSummary> {
        let started = Utc::now();
        let deadline: Option<DateTime<Utc>> = (self.config.duration_hours > 0.0).then(|| {
            started + Duration::milliseconds((self.config.duration_hours * 3_600_000.0) as i64)
        });

        match deadline {
            Some(until) => {
                tracing::info!(target: "runner", %until, "starting integrated runner")
            }
            None => tracing::info!(target: "runner", "starting integrated runner, no deadline"),
        }

        let consolidator_task = self.spawn_consolidator();
        let shutdown = self.shutdown.clone();

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            if let Some(until) = deadline
                && Utc::now() >= until
            {
                tracing::info!(
                    target: "runner",
                    hours = self.config.duration_hours,
                    "configured duration elapsed, stopping"
                );
                break;
            }

            let cycle_started = tokio::time::Instant::now();
            {
                // A shutdown signal lets the in-flight cycle finish inside
                // the grace period; nothing partial is ever written.
                let shutdown_grace = self.config.shutdown_grace;
                let mut cycle = pin!(self.tick());
                tokio::select! {
                    _ = &mut cycle => {}
                    () = shutdown.cancelled() => {
                        if tokio::time::timeout(shutdown_grace, &mut cycle)
                            .await
                            .is_err()
                        {
                            tracing::warn!(
                                target: "runner",
                                grace_secs = shutdown_grace.as_secs(),
                                "in-flight cycle exceeded shutdown grace period"
                            );
                        }
                        break;
                    }
                }
            }

            let elapsed = cycle_started.elapsed();
            if elapsed < self.config.interval {
                tokio::select! {
                    _ = tokio::time::sleep(self.config.interval - elapsed) => {}
                    () = shutdown.cancelled() => break,
                }
            }
        }

        self.shutdown.cancel();
        if let Some(task) = consolidator_task
            && let Err(err) = task.await
        {
            tracing::warn!(target: "runner", error = %err, "consolidator task failed");
        }

        self.stop(started).await
    }

    fn spawn_consolidator(&self) -> Option<JoinHandle<()>> {
        let consolidator = self.consolidator.as_ref().map(Arc::clone)?;
        let shutdown = self.shutdown.clone();
        let period = consolidator
            .cadence()
            .to_std()
            .unwrap_or(StdDuration::from_secs(3_600));

        Some(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(period) => {
                        if let Err(err) = consolidator.run_pass(Utc::now()).await {
                            tracing::warn!(target: "consolidator", error = %err, "consolidation pass failed");
                        }
                    }
                }
            }
        }))
    }

    async fn stop(mut self, started: DateTime<Utc>) -> Result<RunSummary> {
        if let Some(backup) = self.backup.as_mut() {
            backup.close()?;
        }

        let duration_hours = (Utc::now() - started).num_milliseconds() as f64 / 3_600_000.0;
        let summary = RunSummary {
            cycles: self.cycles,
            activities: self.activities,
            recorded: self.recorded,
            duration_hours,
            state_resets: self.collector.counters().state_resets,
        };

        tracing::info!(
            target: "runner",
            cycles = summary.cycles,
            activities = summary.activities,
            recorded = summary.recorded,
            hours = format!("{duration_hours:.2}"),
            per_hour = format!("{:.2}", summary.activities as f64 / duration_hours.max(1e-9)),
            "integrated runner stopped"
        );

        for (volume, counters) in self.collector.reader_counters() {
            tracing::info!(
                target: "runner",
                volume,
                access_errors = counters.access_error_count,
                errors = counters.error_count,
                not_found = counters.not_found_count,
                "journal reader counters"
            );
        }

        if let Some(recorder) = self.recorder.as_ref() {
            match recorder.get_statistics().await {
                Ok(stats) => {
                    tracing::info!(
                        target: "runner",
                        total = stats.tier.total_count,
                        by_type = ?stats.tier.by_type,
                        "hot tier statistics"
                    );
                }
                Err(err) => {
                    tracing::warn!(target: "runner", error = %err, "failed to read hot tier statistics");
                }
            }
        }

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::replay::ReplayJournalSource;
    use engram_model::{RawJournalRecord, ReasonFlags};

    fn collector_over(records: Vec<RawJournalRecord>) -> ActivityCollector {
        let source = ReplayJournalSource::from_records("C:", records);
        let reader = JournalReader::new(Arc::new(source));
        let config = CollectorConfig {
            start_position: StartPosition::First,
            ..CollectorConfig::default()
        };
        ActivityCollector::new(vec![reader], config).unwrap()
    }

    fn record(usn: i64, name: &str) -> RawJournalRecord {
        RawJournalRecord {
            usn,
            file_reference_number: usn as u64,
            parent_reference_number: 0,
            reasons: ReasonFlags::FILE_CREATE,
            name: name.into(),
            timestamp: Utc::now(),
            is_directory: false,
            file_size: None,
        }
    }

    #[tokio::test]
    async fn empty_cycles_trigger_exactly_one_reset_at_threshold() {
        let collector = collector_over(Vec::new());
        let config = RunnerConfig {
            empty_results_threshold: 3,
            ..RunnerConfig::default()
        };
        let mut runner = IntegratedRunner::with_memory_stores(config, collector, 4);

        for _ in 0..3 {
            assert_eq!(runner.tick().await, CycleOutcome::Empty);
        }
        assert_eq!(runner.collector.counters().state_resets, 1);
        assert_eq!(runner.consecutive_empty, 0);

        // Two more empty cycles stay under the threshold.
        runner.tick().await;
        runner.tick().await;
        assert_eq!(runner.collector.counters().state_resets, 1);
    }

    #[tokio::test]
    async fn collected_batches_reach_the_hot_tier() {
        let collector = collector_over(vec![
            record(1, "C:\\Users\\A\\Documents\\a.docx"),
            record(2, "C:\\Users\\A\\Documents\\b.docx"),
        ]);
        let mut runner =
            IntegratedRunner::with_memory_stores(RunnerConfig::default(), collector, 4);

        let outcome = runner.tick().await;
        assert_eq!(
            outcome,
            CycleOutcome::Collected {
                collected: 2,
                recorded: 2
            }
        );

        let recorder = runner.recorder().unwrap();
        let recent = recorder.get_recent(24, 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().all(|a| a.importance_score >= 0.1));
    }

    #[tokio::test]
    async fn successful_cycle_clears_the_empty_streak() {
        let collector = collector_over(vec![record(1, "C:\\a.txt")]);
        let mut runner =
            IntegratedRunner::with_memory_stores(RunnerConfig::default(), collector, 4);

        runner.consecutive_empty = 2;
        runner.tick().await;
        assert_eq!(runner.consecutive_empty, 0);
    }

    #[tokio::test]
    async fn zero_duration_runs_until_cancelled() {
        let collector = collector_over(Vec::new());
        let config = RunnerConfig {
            duration_hours: 0.0,
            interval: StdDuration::from_millis(10),
            ..RunnerConfig::default()
        };
        let runner = IntegratedRunner::with_memory_stores(config, collector, 4);
        let token = runner.shutdown_token();

        let handle = tokio::spawn(runner.run());
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        token.cancel();

        let summary = handle.await.unwrap().unwrap();
        assert!(summary.cycles >= 1);
    }

    #[tokio::test]
    async fn elapsed_duration_stops_the_loop() {
        let collector = collector_over(Vec::new());
        let config = RunnerConfig {
            // ~36 ms of wall clock
            duration_hours: 0.00001,
            interval: StdDuration::from_millis(5),
            ..RunnerConfig::default()
        };
        let runner = IntegratedRunner::with_memory_stores(config, collector, 4);
        let summary = runner.run().await.unwrap();
        assert!(summary.duration_hours >= 0.0);
    }
}
