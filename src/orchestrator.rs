//! Reconciliation cycle driver.
//!
//! One cycle walks `Extracting → Observing → Reconciling → Persisting →
//! Publishing` and returns to `Idle`. Component failures other than plan
//! persistence degrade the cycle instead of aborting it; the loop mode
//! suspends only between cycles.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::TrackerConfig;
use crate::error::{Error, Result};
use crate::extract::{load_documents, Extraction, RequirementExtractor};
use crate::notify::{DeliveryReceipt, NotificationEvent, NotificationPublisher};
use crate::observe::{GitCliHost, ProgressObserver, ReferencePoint};
use crate::plan::{
    normalize_key, ImplementationPlan, ImplementationStep, PlanStore, ProgressSignal,
    ProgressSummary, Requirement,
};
use crate::reconcile::{PlanReconciler, ReconcileOutcome};

/// Where the orchestrator is within a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleState {
    #[default]
    Idle,
    Extracting,
    Observing,
    Reconciling,
    Persisting,
    Publishing,
    Sleeping,
}

impl fmt::Display for CycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CycleState::Idle => "idle",
            CycleState::Extracting => "extracting",
            CycleState::Observing => "observing",
            CycleState::Reconciling => "reconciling",
            CycleState::Persisting => "persisting",
            CycleState::Publishing => "publishing",
            CycleState::Sleeping => "sleeping",
        };
        f.write_str(name)
    }
}

/// Which events a cycle publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Publication {
    Nothing,
    Request,
    Progress,
    /// Progress update followed by the next request.
    All,
}

/// What a cycle does beyond extract, reconcile and persist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOptions {
    /// Query the repository for progress signals.
    pub observe: bool,
    /// Events to publish after persisting.
    pub publish: Publication,
}

impl CycleOptions {
    /// Documents only; no repository, no chat.
    pub fn analyze() -> Self {
        Self {
            observe: false,
            publish: Publication::Nothing,
        }
    }

    /// Documents and repository; no chat.
    pub fn update() -> Self {
        Self {
            observe: true,
            publish: Publication::Nothing,
        }
    }

    /// Observes, then publishes only `publish`.
    pub fn send(publish: Publication) -> Self {
        Self {
            observe: true,
            publish,
        }
    }

    /// Every stage.
    pub fn full() -> Self {
        Self::send(Publication::All)
    }
}

/// Outcome of one cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Correlates log lines of this cycle.
    pub cycle_id: Uuid,
    /// The persisted plan.
    pub plan: ImplementationPlan,
    /// Steps completed by this cycle.
    pub completed: Vec<ImplementationStep>,
    /// Open steps after this cycle.
    pub pending: Vec<ImplementationStep>,
    /// Signals applied, seeded ones first.
    pub signals: Vec<ProgressSignal>,
    /// Messages delivered.
    pub receipts: Vec<DeliveryReceipt>,
    /// Warnings for every degraded stage.
    pub degraded: Vec<String>,
}

impl CycleReport {
    /// Returns true if some stage fell back to partial data.
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    /// Counts of the persisted plan.
    pub fn progress(&self) -> ProgressSummary {
        self.plan.progress()
    }
}

/// Outcome of validating one step.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    /// The cycle that carried the validation.
    pub cycle: CycleReport,
    /// The step as persisted.
    pub step: ImplementationStep,
    /// Whether evidence for the step was found.
    pub passed: bool,
    /// Human-readable reason.
    pub feedback: String,
}

/// Drives reconciliation cycles. Sole writer of its plan file.
pub struct Orchestrator {
    docs_folder: PathBuf,
    store: PlanStore,
    extractor: RequirementExtractor,
    reconciler: PlanReconciler,
    observer: Option<ProgressObserver>,
    since: ReferencePoint,
    publisher: Option<NotificationPublisher>,
    state: CycleState,
}

impl Orchestrator {
    /// Creates an orchestrator with neither repository nor chat attached.
    pub fn new(docs_folder: impl Into<PathBuf>, store: PlanStore) -> Self {
        Self {
            docs_folder: docs_folder.into(),
            store,
            extractor: RequirementExtractor::new(),
            reconciler: PlanReconciler::new(),
            observer: None,
            since: ReferencePoint::default(),
            publisher: None,
            state: CycleState::Idle,
        }
    }

    /// Builds an orchestrator observing the configured git repository.
    pub fn from_config(config: &TrackerConfig) -> Self {
        let host = GitCliHost::new(&config.repo_path).with_timeout(config.observation.timeout());
        let observer = ProgressObserver::new(Arc::new(host))
            .with_min_score(config.observation.min_score)
            .with_retry(config.observation.retry_policy());

        Self::new(&config.docs_folder, PlanStore::new(config.plan_path()))
            .with_observer(observer)
            .with_reference_point(config.observation.reference_point())
    }

    /// Attaches a repository observer.
    pub fn with_observer(mut self, observer: ProgressObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Sets where change history starts.
    pub fn with_reference_point(mut self, since: ReferencePoint) -> Self {
        self.since = since;
        self
    }

    /// Attaches a chat publisher.
    pub fn with_publisher(mut self, publisher: NotificationPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    /// Current state.
    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Plan file location.
    pub fn plan_path(&self) -> &Path {
        self.store.path()
    }

    /// Runs one cycle.
    ///
    /// Fails only when the plan cannot be loaded or saved; nothing is
    /// published in that case.
    pub async fn run_cycle(&mut self, options: CycleOptions) -> Result<CycleReport> {
        let cycle_id = Uuid::new_v4();
        let span = tracing::info_span!("cycle", cycle_id = %cycle_id);
        let result = self.cycle(cycle_id, options).instrument(span).await;
        self.state = CycleState::Idle;
        result
    }

    /// Checks the repository for evidence of one step and reports the result.
    ///
    /// `step_text` must name a current requirement. A passing validation is
    /// persisted as a completion before the result is published.
    pub async fn validate(&mut self, step_text: &str) -> Result<ValidationReport> {
        let cycle_id = Uuid::new_v4();
        let span = tracing::info_span!("cycle", cycle_id = %cycle_id, validate = %step_text);
        let result = self.validate_step(cycle_id, step_text).instrument(span).await;
        self.state = CycleState::Idle;
        result
    }

    /// Runs cycles until `stop` turns true, sleeping `interval` in between.
    ///
    /// A stop request interrupts the sleep only; a running cycle always
    /// completes. Failed cycles are logged and the loop carries on.
    /// Returns the number of cycles run.
    pub async fn run_loop(
        &mut self,
        options: CycleOptions,
        interval: Duration,
        mut stop: watch::Receiver<bool>,
    ) -> usize {
        let mut cycles = 0usize;
        tracing::info!(interval_secs = interval.as_secs(), "starting continuous loop");

        loop {
            if *stop.borrow() {
                break;
            }

            cycles += 1;
            match self.run_cycle(options).await {
                Ok(report) => {
                    let progress = report.progress();
                    tracing::info!(
                        cycle = cycles,
                        done = progress.done,
                        pending = progress.pending,
                        degraded = report.is_degraded(),
                        "cycle finished"
                    );
                }
                Err(e) => {
                    tracing::error!(cycle = cycles, error = %e, "cycle failed");
                }
            }

            if *stop.borrow() {
                break;
            }

            self.state = CycleState::Sleeping;
            tracing::info!(minutes = interval.as_secs() / 60, "sleeping until next cycle");
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
            }
        }

        self.state = CycleState::Idle;
        tracing::info!(cycles, "continuous loop stopped");
        cycles
    }

    async fn cycle(&mut self, cycle_id: Uuid, options: CycleOptions) -> Result<CycleReport> {
        tracing::info!(
            observe = options.observe,
            publish = ?options.publish,
            "starting cycle"
        );
        let prior = self.load_prior()?;
        let mut degraded = Vec::new();

        let extraction = self.extract(&prior, &mut degraded);
        let mut signals = extraction.seeded.clone();

        let mut observed = true;
        if options.observe {
            let targets = open_targets(&prior, &extraction.requirements);
            match self.observe(&targets, &mut degraded).await {
                Some(found) => signals.extend(found),
                None => observed = false,
            }
        }

        let outcome = self.reconcile(&prior, &extraction.requirements, &signals);
        self.persist(&outcome.plan)?;

        let mut report = CycleReport {
            cycle_id,
            plan: outcome.plan,
            completed: outcome.completed,
            pending: outcome.pending,
            signals,
            receipts: Vec::new(),
            degraded,
        };

        if options.publish == Publication::Nothing {
            return Ok(report);
        }
        if !observed {
            tracing::warn!("repository was not observed, skipping publication");
            report
                .degraded
                .push("publication skipped: repository not observed".to_string());
            return Ok(report);
        }

        self.state = CycleState::Publishing;
        if matches!(options.publish, Publication::Progress | Publication::All) {
            let event = NotificationEvent::progress(&report.plan);
            self.deliver(&event, &mut report).await;
        }
        if matches!(options.publish, Publication::Request | Publication::All) {
            match NotificationEvent::next_request(&report.plan, &report.signals) {
                Some(event) => self.deliver(&event, &mut report).await,
                None => tracing::info!("no pending steps to request"),
            }
        }

        Ok(report)
    }

    async fn validate_step(&mut self, cycle_id: Uuid, step_text: &str) -> Result<ValidationReport> {
        let prior = self.load_prior()?;
        let mut degraded = Vec::new();
        let extraction = self.extract(&prior, &mut degraded);

        let wanted = normalize_key(step_text);
        let target = extraction
            .requirements
            .iter()
            .find(|r| normalize_key(&r.text) == wanted)
            .cloned()
            .ok_or_else(|| {
                Error::Configuration(format!("no current requirement named '{}'", step_text))
            })?;
        let key = target.key();

        let mut signals: Vec<ProgressSignal> = extraction
            .seeded
            .iter()
            .filter(|s| s.step == key)
            .cloned()
            .collect();

        let already_done = prior.find(&key).filter(|s| s.is_done()).cloned();
        let mut observed = true;
        if already_done.is_none() && signals.is_empty() {
            match self.observe(std::slice::from_ref(&target), &mut degraded).await {
                Some(found) => signals.extend(found),
                None => observed = false,
            }
        }

        let (passed, feedback) = match (&already_done, signals.first()) {
            (Some(step), _) => (true, already_done_feedback(step)),
            (None, Some(signal)) => (true, validation_feedback(signal)),
            (None, None) => (
                false,
                "Implementation not found in the repository. Please commit your changes."
                    .to_string(),
            ),
        };

        let mut all_signals = extraction.seeded.clone();
        all_signals.extend(signals.into_iter().filter(|s| !extraction.seeded.contains(s)));

        let outcome = self.reconcile(&prior, &extraction.requirements, &all_signals);
        self.persist(&outcome.plan)?;

        let step = outcome
            .plan
            .find(&key)
            .cloned()
            .unwrap_or_else(|| ImplementationStep::new(&target, Utc::now()));
        tracing::info!(step = %step.text, passed, "validation finished");

        let mut report = CycleReport {
            cycle_id,
            plan: outcome.plan,
            completed: outcome.completed,
            pending: outcome.pending,
            signals: all_signals,
            receipts: Vec::new(),
            degraded,
        };

        if observed {
            self.state = CycleState::Publishing;
            let event = NotificationEvent::Validation {
                step: step.clone(),
                passed,
                feedback: feedback.clone(),
            };
            self.deliver(&event, &mut report).await;
        } else {
            tracing::warn!("repository was not observed, skipping publication");
            report
                .degraded
                .push("publication skipped: repository not observed".to_string());
        }

        Ok(ValidationReport {
            cycle: report,
            step,
            passed,
            feedback,
        })
    }

    fn load_prior(&mut self) -> Result<ImplementationPlan> {
        self.store.load().map_err(|e| {
            tracing::error!(error = %e, "cannot load plan");
            e
        })
    }

    fn extract(&mut self, prior: &ImplementationPlan, degraded: &mut Vec<String>) -> Extraction {
        self.state = CycleState::Extracting;

        let documents = match load_documents(&self.docs_folder) {
            Ok(documents) => documents,
            Err(e) => {
                tracing::warn!(
                    dir = ?self.docs_folder,
                    error = %e,
                    "cannot read requirement documents, keeping current requirements"
                );
                degraded.push(format!("documents unreadable: {}", e));
                return Extraction {
                    requirements: current_requirements(prior),
                    seeded: Vec::new(),
                };
            }
        };

        match self.extractor.extract(&documents) {
            Ok(extraction) => extraction,
            Err(e) => {
                tracing::warn!(error = %e, "continuing with no requirements");
                degraded.push(e.to_string());
                Extraction::default()
            }
        }
    }

    /// Returns `None` when the repository could not be observed.
    async fn observe(
        &mut self,
        targets: &[Requirement],
        degraded: &mut Vec<String>,
    ) -> Option<Vec<ProgressSignal>> {
        self.state = CycleState::Observing;
        let Some(observer) = &self.observer else {
            tracing::debug!("no repository observer attached");
            return Some(Vec::new());
        };

        match observer.observe(targets, &self.since).await {
            Ok(signals) => {
                tracing::info!(
                    targets = targets.len(),
                    signals = signals.len(),
                    "observed repository"
                );
                Some(signals)
            }
            Err(e) => {
                tracing::warn!(error = %e, "continuing without repository signals");
                degraded.push(e.to_string());
                None
            }
        }
    }

    fn reconcile(
        &mut self,
        prior: &ImplementationPlan,
        requirements: &[Requirement],
        signals: &[ProgressSignal],
    ) -> ReconcileOutcome {
        self.state = CycleState::Reconciling;
        self.reconciler
            .reconcile(prior, requirements, signals, Utc::now())
    }

    fn persist(&mut self, plan: &ImplementationPlan) -> Result<()> {
        self.state = CycleState::Persisting;
        if let Err(e) = self.store.save(plan) {
            tracing::error!(error = %e, "plan not persisted, nothing will be published");
            return Err(e);
        }

        let progress = plan.progress();
        tracing::info!(
            path = ?self.store.path(),
            done = progress.done,
            pending = progress.pending,
            stale = progress.stale,
            percent = progress.percent(),
            "plan persisted"
        );
        Ok(())
    }

    async fn deliver(&mut self, event: &NotificationEvent, report: &mut CycleReport) {
        let Some(publisher) = self.publisher.as_mut() else {
            tracing::warn!(event = event.kind(), "no chat publisher attached, notification skipped");
            report
                .degraded
                .push(format!("{} not delivered: no chat publisher", event.kind()));
            return;
        };

        match publisher.publish(event).await {
            Ok(Some(receipt)) => report.receipts.push(receipt),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(event = event.kind(), error = %e, "notification not delivered");
                report
                    .degraded
                    .push(format!("{} not delivered: {}", event.kind(), e));
            }
        }
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("docs_folder", &self.docs_folder)
            .field("plan", &self.store.path())
            .field("observer", &self.observer.is_some())
            .field("since", &self.since)
            .field("publisher", &self.publisher)
            .field("state", &self.state)
            .finish()
    }
}

/// Fresh requirements whose step is not already done.
fn open_targets(prior: &ImplementationPlan, requirements: &[Requirement]) -> Vec<Requirement> {
    requirements
        .iter()
        .filter(|r| prior.find(&r.key()).map_or(true, |s| !s.is_done()))
        .cloned()
        .collect()
}

/// Requirements implied by the plan's live steps.
fn current_requirements(plan: &ImplementationPlan) -> Vec<Requirement> {
    plan.steps()
        .filter(|s| !s.stale)
        .enumerate()
        .map(|(order, s)| Requirement::new(s.category.clone(), s.text.clone(), order))
        .collect()
}

fn validation_feedback(signal: &ProgressSignal) -> String {
    if signal.evidence.starts_with("path ") {
        let location = signal
            .files
            .first()
            .map(String::as_str)
            .unwrap_or("a changed path");
        format!(
            "Implementation validated successfully. Found implementation in {} ({}).",
            location, signal.evidence
        )
    } else if signal.evidence.starts_with("commit ") {
        format!(
            "Implementation validated successfully. Found relevant commit message: {}",
            signal.evidence
        )
    } else {
        format!("Implementation validated successfully. Step is {}.", signal.evidence)
    }
}

fn already_done_feedback(step: &ImplementationStep) -> String {
    match step.completed_at {
        Some(at) => format!("Already completed at {}.", at.to_rfc3339()),
        None => "Already completed.".to_string(),
    }
}
