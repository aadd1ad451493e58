//! Plan persistence as a markdown checklist.
//!
//! The file keeps one `##` section per category and one checkbox line per
//! step. Step metadata rides in a trailing HTML comment so the file still
//! renders as a plain checklist.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tempfile::NamedTempFile;

use super::model::{CategorySection, ImplementationPlan};
use super::step::{ImplementationStep, StepStatus};
use crate::error::{Error, Result};

/// Title line of every plan file.
pub const PLAN_TITLE: &str = "# Implementation Plan";

/// Category used for steps that appear before any section header.
const DEFAULT_CATEGORY: &str = "General";

static STEP_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:[-*+]\s+)?\[([ xX])\]\s+(.*?)\s*$")
        .expect("step line pattern is valid")
});

static SECTION_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^##\s+(.+?)\s*$").expect("section pattern is valid"));

static GENERATED_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[_*]*Generated:[_*]*\s*(\S+?)[_*]*\s*$").expect("generated pattern is valid")
});

/// Loads and saves a plan at a fixed path.
#[derive(Debug, Clone)]
pub struct PlanStore {
    path: PathBuf,
}

impl PlanStore {
    /// Creates a store for the given plan file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the plan file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the plan, or an empty plan if the file does not exist.
    pub fn load(&self) -> Result<ImplementationPlan> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = ?self.path, "no plan file yet, starting empty");
                return Ok(ImplementationPlan::new());
            }
            Err(e) => return Err(Error::persistence(&self.path, e)),
        };

        let plan = parse_plan(&content);
        tracing::debug!(path = ?self.path, steps = plan.step_count(), "loaded plan");
        Ok(plan)
    }

    /// Writes the plan atomically: temp file in the same directory, then rename.
    pub fn save(&self, plan: &ImplementationPlan) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir).map_err(|e| Error::persistence(&self.path, e))?;

        let content = render_plan(plan);
        let mut tmp = NamedTempFile::new_in(&dir).map_err(|e| Error::persistence(&self.path, e))?;
        tmp.write_all(content.as_bytes())
            .map_err(|e| Error::persistence(&self.path, e))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| Error::persistence(&self.path, e))?;
        tmp.persist(&self.path)
            .map_err(|e| Error::persistence(&self.path, e.error))?;

        tracing::info!(path = ?self.path, steps = plan.step_count(), "saved plan");
        Ok(())
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw.trim())
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Renders a plan as the markdown checklist document.
pub fn render_plan(plan: &ImplementationPlan) -> String {
    let mut md = String::new();

    md.push_str(PLAN_TITLE);
    md.push_str("\n\n");

    if let Some(generated_at) = &plan.generated_at {
        md.push_str(&format!("Generated: {}\n\n", format_timestamp(generated_at)));
    }

    for section in &plan.sections {
        md.push_str(&format!("## {}\n\n", section.name));
        for step in &section.steps {
            md.push_str(&render_step(step));
            md.push('\n');
        }
        md.push('\n');
    }

    md
}

fn render_step(step: &ImplementationStep) -> String {
    let checkbox = if step.is_done() { "[x]" } else { "[ ]" };

    let mut meta = vec![format!("first_seen: {}", format_timestamp(&step.first_seen))];
    if let Some(completed_at) = &step.completed_at {
        meta.push(format!("completed_at: {}", format_timestamp(completed_at)));
    }
    if step.stale {
        meta.push("stale".to_string());
    }

    format!("{} {} <!-- {} -->", checkbox, step.text, meta.join("; "))
}

/// Parses a plan document. Unknown lines are ignored.
pub fn parse_plan(content: &str) -> ImplementationPlan {
    let mut plan = ImplementationPlan::new();

    for line in content.lines() {
        if let Some(caps) = GENERATED_LINE.captures(line) {
            plan.generated_at = parse_timestamp(&caps[1]);
            if plan.generated_at.is_none() {
                tracing::warn!(line = %line, "ignoring unparseable generated timestamp");
            }
        } else if let Some(caps) = SECTION_LINE.captures(line) {
            plan.sections.push(CategorySection::new(caps[1].to_string()));
        } else if let Some(caps) = STEP_LINE.captures(line) {
            let done = !caps[1].trim().is_empty();
            let (text, meta) = split_metadata(&caps[2]);
            if text.is_empty() {
                continue;
            }
            let step = parse_step(&plan, done, text.to_string(), meta);

            match plan.sections.last_mut() {
                Some(section) => section.steps.push(step),
                None => {
                    let mut section = CategorySection::new(DEFAULT_CATEGORY);
                    section.steps.push(step);
                    plan.sections.push(section);
                }
            }
        }
    }

    plan
}

/// Splits a step body into its text and the trailing metadata comment.
///
/// Only the last comment on the line counts as metadata, so step text may
/// itself contain comment markers.
fn split_metadata(body: &str) -> (&str, &str) {
    if let Some(inner) = body.strip_suffix("-->") {
        if let Some(start) = inner.rfind("<!--") {
            return (inner[..start].trim(), inner[start + 4..].trim());
        }
    }
    (body.trim(), "")
}

fn parse_step(plan: &ImplementationPlan, done: bool, text: String, meta: &str) -> ImplementationStep {
    let category = plan
        .sections
        .last()
        .map(|s| s.name.clone())
        .unwrap_or_else(|| DEFAULT_CATEGORY.to_string());

    let mut first_seen = None;
    let mut completed_at = None;
    let mut stale = false;

    for field in meta.split(';').map(str::trim).filter(|f| !f.is_empty()) {
        match field.split_once(':') {
            Some(("first_seen", value)) => first_seen = parse_timestamp(value),
            Some(("completed_at", value)) => completed_at = parse_timestamp(value),
            _ if field == "stale" => stale = true,
            _ => tracing::debug!(field = %field, "ignoring unknown step metadata"),
        }
    }

    if !done && completed_at.is_some() {
        tracing::warn!(step = %text, "unchecked step carries completed_at, dropping it");
        completed_at = None;
    }

    ImplementationStep {
        category,
        text,
        status: if done {
            StepStatus::Done
        } else {
            StepStatus::Pending
        },
        first_seen: first_seen
            .or(plan.generated_at)
            .unwrap_or_else(Utc::now),
        completed_at,
        stale,
    }
}
