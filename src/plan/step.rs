//! Requirements, implementation steps and progress signals.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Normalizes text for identity comparison: lowercase, single spaces.
pub fn normalize_key(text: &str) -> String {
    text.split_whitespace()
        .map(|w| w.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Identity of a requirement and of the step tracking it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StepKey {
    /// Normalized category name.
    pub category: String,
    /// Normalized requirement text.
    pub text: String,
}

impl StepKey {
    /// Builds a key from display category and text.
    pub fn new(category: &str, text: &str) -> Self {
        Self {
            category: normalize_key(category),
            text: normalize_key(text),
        }
    }
}

impl fmt::Display for StepKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.category, self.text)
    }
}

/// A single requirement statement extracted from documentation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    /// Category header the requirement was found under.
    pub category: String,
    /// Cleaned requirement text.
    pub text: String,
    /// Position in document order across the whole extraction.
    pub order: usize,
}

impl Requirement {
    /// Creates a new requirement.
    pub fn new(category: impl Into<String>, text: impl Into<String>, order: usize) -> Self {
        Self {
            category: category.into(),
            text: text.into(),
            order,
        }
    }

    /// Returns the identity of this requirement.
    pub fn key(&self) -> StepKey {
        StepKey::new(&self.category, &self.text)
    }
}

/// Completion status of a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    /// Not yet observed as implemented.
    #[default]
    Pending,
    /// Observed as implemented. Terminal.
    Done,
}

/// Tracked unit of completion corresponding to one requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationStep {
    /// Category display name.
    pub category: String,
    /// Requirement display text.
    pub text: String,
    /// Current status.
    #[serde(default)]
    pub status: StepStatus,
    /// When the requirement first appeared.
    pub first_seen: DateTime<Utc>,
    /// When the step flipped to done, if it has.
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// The requirement no longer appears in the docs.
    #[serde(default)]
    pub stale: bool,
}

impl ImplementationStep {
    /// Creates a pending step for a requirement first seen at `now`.
    pub fn new(requirement: &Requirement, now: DateTime<Utc>) -> Self {
        Self {
            category: requirement.category.clone(),
            text: requirement.text.clone(),
            status: StepStatus::Pending,
            first_seen: now,
            completed_at: None,
            stale: false,
        }
    }

    /// Returns the identity of this step.
    pub fn key(&self) -> StepKey {
        StepKey::new(&self.category, &self.text)
    }

    /// Returns true if the step is done.
    pub fn is_done(&self) -> bool {
        self.status == StepStatus::Done
    }

    /// Returns true if the step is pending and still backed by a requirement.
    pub fn is_open(&self) -> bool {
        self.status == StepStatus::Pending && !self.stale
    }

    /// Marks the step done. Returns false if it already was.
    pub fn mark_done(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_done() {
            return false;
        }
        self.status = StepStatus::Done;
        self.completed_at = Some(now);
        true
    }
}

/// Evidence from repository activity that a step was completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSignal {
    /// The step the evidence points at.
    pub step: StepKey,
    /// Human-readable evidence.
    pub evidence: String,
    /// Changed files backing the evidence, if any.
    pub files: Vec<String>,
}

impl ProgressSignal {
    /// Creates a new signal.
    pub fn new(step: StepKey, evidence: impl Into<String>) -> Self {
        Self {
            step,
            evidence: evidence.into(),
            files: Vec::new(),
        }
    }

    /// Attaches the changed files behind the evidence.
    pub fn with_files(mut self, files: Vec<String>) -> Self {
        self.files = files;
        self
    }
}
