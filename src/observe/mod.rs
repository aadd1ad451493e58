//! Repository observation: turns recent changes into progress signals.
//!
//! The repository is reached through [`RepositoryHost`] and each candidate
//! step is scored against every change with a pluggable [`MatchScorer`].

mod git;
mod scorer;

pub use git::GitCliHost;
pub use scorer::{is_relevant_path, keywords, KeywordOverlapScorer, MatchScore, MatchScorer, MatchSource};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::plan::{ProgressSignal, Requirement};
use crate::retry::RetryPolicy;

/// Default minimum overlap score for a match.
pub const DEFAULT_MIN_SCORE: f64 = 0.5;

/// A single repository change: commit metadata and changed paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Commit id.
    pub id: String,
    /// Commit subject line.
    pub message: String,
    /// Paths changed by the commit.
    pub paths: Vec<String>,
    /// Author timestamp.
    pub committed_at: Option<DateTime<Utc>>,
}

impl Change {
    /// Creates a change without paths or timestamp.
    pub fn new(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            message: message.into(),
            paths: Vec::new(),
            committed_at: None,
        }
    }

    /// Sets the changed paths.
    pub fn with_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.paths = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Abbreviated commit id.
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }
}

/// Where change history starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferencePoint {
    /// Changes from the last N days.
    Lookback(u32),
    /// Changes after a timestamp.
    Since(DateTime<Utc>),
    /// Changes after a revision (exclusive).
    Revision(String),
}

impl Default for ReferencePoint {
    fn default() -> Self {
        ReferencePoint::Lookback(30)
    }
}

impl fmt::Display for ReferencePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferencePoint::Lookback(days) => write!(f, "last {} days", days),
            ReferencePoint::Since(ts) => write!(f, "since {}", ts.to_rfc3339()),
            ReferencePoint::Revision(rev) => write!(f, "after {}", rev),
        }
    }
}

/// Source of change history.
#[async_trait]
pub trait RepositoryHost: Send + Sync {
    /// Lists changes after the reference point, newest first.
    async fn list_changes(&self, since: &ReferencePoint) -> Result<Vec<Change>>;

    /// Returns the name of this host.
    fn name(&self) -> &str;
}

/// Matches open requirements against repository changes.
pub struct ProgressObserver {
    host: Arc<dyn RepositoryHost>,
    scorer: Box<dyn MatchScorer>,
    min_score: f64,
    retry: RetryPolicy,
}

impl ProgressObserver {
    /// Creates an observer with keyword-overlap scoring.
    pub fn new(host: Arc<dyn RepositoryHost>) -> Self {
        Self {
            host,
            scorer: Box::new(KeywordOverlapScorer::new()),
            min_score: DEFAULT_MIN_SCORE,
            retry: RetryPolicy::default(),
        }
    }

    /// Replaces the scoring strategy.
    pub fn with_scorer(mut self, scorer: Box<dyn MatchScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// Sets the minimum score a match needs.
    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    /// Sets the retry policy for host calls.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fetches changes and returns one signal per matched requirement.
    pub async fn observe(
        &self,
        targets: &[Requirement],
        since: &ReferencePoint,
    ) -> Result<Vec<ProgressSignal>> {
        if targets.is_empty() {
            tracing::debug!("no open steps to observe");
            return Ok(Vec::new());
        }

        let changes = self
            .retry
            .run("list_changes", || self.host.list_changes(since))
            .await?;

        tracing::info!(
            host = self.host.name(),
            since = %since,
            changes = changes.len(),
            "fetched repository changes"
        );

        Ok(self.match_changes(targets, &changes))
    }

    /// Scores every target against every change, keeping the best match.
    pub fn match_changes(&self, targets: &[Requirement], changes: &[Change]) -> Vec<ProgressSignal> {
        let mut signals = Vec::new();

        for target in targets {
            let mut best: Option<(MatchScore, &Change)> = None;
            for change in changes {
                let score = self.scorer.score(&target.text, change);
                if best.as_ref().map_or(true, |(b, _)| score.value > b.value) {
                    best = Some((score, change));
                }
            }

            let Some((score, change)) = best else {
                continue;
            };
            if score.value <= 0.0 || score.value < self.min_score {
                continue;
            }

            tracing::debug!(
                step = %target.text,
                score = score.value,
                commit = change.short_id(),
                "matched step"
            );
            let files = change
                .paths
                .iter()
                .filter(|p| is_relevant_path(p))
                .cloned()
                .collect();
            signals.push(ProgressSignal::new(target.key(), score.evidence).with_files(files));
        }

        signals
    }
}

impl fmt::Debug for ProgressObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressObserver")
            .field("host", &self.host.name())
            .field("min_score", &self.min_score)
            .field("retry", &self.retry)
            .finish()
    }
}
