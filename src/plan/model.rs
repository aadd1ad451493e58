//! The implementation plan: steps grouped by category.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::step::{normalize_key, ImplementationStep, StepKey, StepStatus};

/// Steps of one category, in document order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategorySection {
    /// Category display name.
    pub name: String,
    /// Steps in this category.
    pub steps: Vec<ImplementationStep>,
}

impl CategorySection {
    /// Creates an empty section.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }
}

/// Done/pending counts over steps still backed by a requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressSummary {
    /// Non-stale done steps.
    pub done: usize,
    /// Non-stale pending steps.
    pub pending: usize,
    /// Steps whose requirement disappeared from the docs.
    pub stale: usize,
}

impl ProgressSummary {
    /// Total tracked steps (done + pending).
    pub fn total(&self) -> usize {
        self.done + self.pending
    }

    /// Integer percent complete, 0 when nothing is tracked.
    pub fn percent(&self) -> u32 {
        let total = self.total();
        if total == 0 {
            return 0;
        }
        (self.done * 100 / total) as u32
    }
}

/// Ordered mapping of category to steps for one repository/docs pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationPlan {
    /// When this plan was last produced. `None` for a never-saved plan.
    #[serde(default)]
    pub generated_at: Option<DateTime<Utc>>,
    /// Category sections in order.
    #[serde(default)]
    pub sections: Vec<CategorySection>,
}

impl ImplementationPlan {
    /// Creates an empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the plan has no steps.
    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(|s| s.steps.is_empty())
    }

    /// Iterates over all steps in plan order.
    pub fn steps(&self) -> impl Iterator<Item = &ImplementationStep> {
        self.sections.iter().flat_map(|s| s.steps.iter())
    }

    /// Number of steps, stale included.
    pub fn step_count(&self) -> usize {
        self.steps().count()
    }

    /// Finds a step by identity.
    pub fn find(&self, key: &StepKey) -> Option<&ImplementationStep> {
        self.steps().find(|s| &s.key() == key)
    }

    /// Finds a step by identity for mutation.
    pub fn find_mut(&mut self, key: &StepKey) -> Option<&mut ImplementationStep> {
        self.sections
            .iter_mut()
            .flat_map(|s| s.steps.iter_mut())
            .find(|s| &s.key() == key)
    }

    /// Appends a step to its category section, creating the section if needed.
    ///
    /// A step joining an existing section takes that section's spelling of
    /// the category.
    pub fn push_step(&mut self, mut step: ImplementationStep) {
        let wanted = normalize_key(&step.category);
        match self
            .sections
            .iter_mut()
            .find(|s| normalize_key(&s.name) == wanted)
        {
            Some(section) => {
                step.category = section.name.clone();
                section.steps.push(step);
            }
            None => {
                let mut section = CategorySection::new(step.category.clone());
                section.steps.push(step);
                self.sections.push(section);
            }
        }
    }

    /// Pending steps still backed by a requirement, in plan order.
    pub fn open_steps(&self) -> Vec<&ImplementationStep> {
        self.steps().filter(|s| s.is_open()).collect()
    }

    /// Done steps still backed by a requirement, in plan order.
    pub fn done_steps(&self) -> Vec<&ImplementationStep> {
        self.steps().filter(|s| s.is_done() && !s.stale).collect()
    }

    /// The next step to request: first open step in plan order.
    pub fn next_step(&self) -> Option<&ImplementationStep> {
        self.steps().find(|s| s.is_open())
    }

    /// Computes done/pending/stale counts.
    pub fn progress(&self) -> ProgressSummary {
        let mut summary = ProgressSummary::default();
        for step in self.steps() {
            if step.stale {
                summary.stale += 1;
            } else if step.status == StepStatus::Done {
                summary.done += 1;
            } else {
                summary.pending += 1;
            }
        }
        summary
    }

    /// Copy of the plan without `generated_at`, for content comparison.
    pub fn content(&self) -> ImplementationPlan {
        ImplementationPlan {
            generated_at: None,
            sections: self.sections.clone(),
        }
    }
}
