//! Cycle orchestration
//!
//! Drives one end-to-end pass of the pipeline, fetch through publish, on a
//! fixed interval. Validation gets a bounded retry loop with doubling
//! backoff; every other collaborator failure marks the cycle failed and the
//! process lives on to the next tick.

use crate::config::SchedulerConfig;
use crate::error::CycleError;
use crate::proxy::{
    classify, dedupe, separate_working, Extraction, ProxyCandidate, ProxyExtractor,
    ProxyValidator, ValidatedProxy,
};
use crate::publish::{PublishHandle, PublishSink};
use crate::source::MessageSource;
use crate::storage::{ProxyStore, DEFAULT_RETENTION_DAYS};
use std::fmt;
use tokio::sync::watch;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Phase the pipeline is currently in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Fetching,
    Extracting,
    Deduplicating,
    Validating,
    Classifying,
    Publishing,
    Failed,
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CyclePhase::Idle => "idle",
            CyclePhase::Fetching => "fetching",
            CyclePhase::Extracting => "extracting",
            CyclePhase::Deduplicating => "deduplicating",
            CyclePhase::Validating => "validating",
            CyclePhase::Classifying => "classifying",
            CyclePhase::Publishing => "publishing",
            CyclePhase::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Counters from one finished cycle
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub messages_fetched: usize,
    /// Raw pattern matches across all messages
    pub candidates_found: usize,
    pub unique_candidates: usize,
    pub working_found: usize,
    pub validation_attempts: u32,
    pub published: Option<PublishHandle>,
}

/// Pipeline orchestrator
pub struct Scheduler {
    config: SchedulerConfig,
    channels: Vec<String>,
    source: Box<dyn MessageSource>,
    validator: ProxyValidator,
    sink: Box<dyn PublishSink>,
    store: Box<dyn ProxyStore>,
    phase: CyclePhase,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        channels: Vec<String>,
        source: Box<dyn MessageSource>,
        validator: ProxyValidator,
        sink: Box<dyn PublishSink>,
        store: Box<dyn ProxyStore>,
    ) -> Self {
        Self {
            config,
            channels,
            source,
            validator,
            sink,
            store,
            phase: CyclePhase::Idle,
        }
    }

    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Run cycles until shutdown flips: one immediately, then one per
    /// interval tick. Overlapping work is never started; a tick that fires
    /// while a cycle is still running is skipped.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.config.interval_secs, "scheduler started");

        if let Err(err) = self.run_cycle().await {
            warn!(error = %err, "initial cycle failed");
        }

        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await; // immediate tick, already spent on the initial cycle

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.run_cycle().await {
                        warn!(error = %err, "cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Drive one end-to-end pass of the pipeline
    pub async fn run_cycle(&mut self) -> Result<CycleReport, CycleError> {
        let cycle_id = Uuid::new_v4();
        let started = Instant::now();
        info!(cycle = %cycle_id, "cycle started");

        let result = self.run_cycle_inner(cycle_id).await;

        // The source session never outlives its cycle
        self.source.disconnect().await;

        match &result {
            Ok(report) => {
                self.set_phase(CyclePhase::Idle);
                info!(
                    cycle = %cycle_id,
                    elapsed_secs = started.elapsed().as_secs(),
                    candidates = report.unique_candidates,
                    working = report.working_found,
                    "cycle finished"
                );
            }
            Err(err) => {
                self.set_phase(CyclePhase::Failed);
                warn!(cycle = %cycle_id, error = %err, "cycle failed");
                self.set_phase(CyclePhase::Idle);
            }
        }
        result
    }

    async fn run_cycle_inner(&mut self, cycle_id: Uuid) -> Result<CycleReport, CycleError> {
        let mut report = CycleReport::default();
        let deadline = self
            .config
            .cycle_deadline()
            .map(|limit| Instant::now() + limit);

        self.set_phase(CyclePhase::Fetching);
        self.source.connect().await.map_err(CycleError::Source)?;

        let mut messages = Vec::new();
        for channel in &self.channels {
            let fetched = self
                .source
                .fetch_recent(channel)
                .await
                .map_err(CycleError::Source)?;
            messages.extend(fetched);
        }
        report.messages_fetched = messages.len();
        if messages.is_empty() {
            debug!(cycle = %cycle_id, "no recent messages, nothing to do");
            return Ok(report);
        }

        self.set_phase(CyclePhase::Extracting);
        let mut extraction = Extraction::default();
        for message in &messages {
            extraction.merge(ProxyExtractor::extract(&message.text, &message.hyperlinks));
        }
        report.candidates_found = extraction.found;
        if extraction.candidates.is_empty() {
            debug!(
                cycle = %cycle_id,
                rejected = extraction.rejected,
                "no candidates extracted"
            );
            return Ok(report);
        }

        self.set_phase(CyclePhase::Deduplicating);
        let unique = dedupe(extraction.candidates);
        report.unique_candidates = unique.len();

        self.set_phase(CyclePhase::Validating);
        let (working, attempts) = self.validate_with_retry(&unique, deadline).await;
        report.validation_attempts = attempts;
        report.working_found = working.len();
        if working.is_empty() {
            return Err(CycleError::NoWorkingProxies { attempts });
        }

        self.store
            .save(&working)
            .await
            .map_err(CycleError::Storage)?;

        self.set_phase(CyclePhase::Classifying);
        let classified = classify(working);

        self.set_phase(CyclePhase::Publishing);
        let handle = self
            .sink
            .publish(&classified)
            .await
            .map_err(CycleError::Publish)?;
        report.published = Some(handle);

        let removed = self
            .store
            .prune_older_than(DEFAULT_RETENTION_DAYS)
            .await
            .map_err(CycleError::Storage)?;
        if removed > 0 {
            debug!(cycle = %cycle_id, removed, "stale stored proxies pruned");
        }

        Ok(report)
    }

    /// Validation with a bounded retry loop. The whole candidate set is
    /// re-probed on every attempt; the delay between attempts doubles up to
    /// the configured cap.
    async fn validate_with_retry(
        &self,
        candidates: &[ProxyCandidate],
        deadline: Option<Instant>,
    ) -> (Vec<ValidatedProxy>, u32) {
        let mut backoff = self.config.backoff_initial();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let validated = self.validator.validate_until(candidates, deadline).await;
            let (working, failed) = separate_working(validated);
            if !working.is_empty() {
                return (working, attempt);
            }

            debug!(
                attempt,
                failed = failed.len(),
                "validation attempt found no working proxies"
            );
            if attempt >= self.config.validate_attempts {
                return (Vec::new(), attempt);
            }

            sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.backoff_max());
        }
    }

    fn set_phase(&mut self, phase: CyclePhase) {
        if self.phase != phase {
            debug!(from = %self.phase, to = %phase, "phase transition");
            self.phase = phase;
        }
    }
}
