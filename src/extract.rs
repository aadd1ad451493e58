//! Requirement extraction from markdown documentation.
//!
//! Headers of any level name the category of the list items that follow
//! them. Task-list items (`- [x] ...`) are requirements too; a checked item
//! additionally seeds a completion signal.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};
use crate::plan::{normalize_key, ProgressSignal, Requirement};

/// Category for items that appear before any header.
pub const DEFAULT_CATEGORY: &str = "General";

static HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s{0,3}#{1,6}\s+(.+?)(?:\s+#+)?\s*$").expect("header pattern is valid"));

static TASK_ITEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+\[([ xX])\]\s+(.+)$").expect("task pattern is valid")
});

static LIST_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+(.+)$").expect("list pattern is valid"));

static LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!?\[([^\]]*)\]\([^)]*\)").expect("link pattern is valid"));

static HTML: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<!--.*?-->|<!--|-->|</?[A-Za-z][^>]*>").expect("html pattern is valid"));

static EMPHASIS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*|__|`|~~|\*").expect("emphasis pattern is valid"));

/// A requirement document: file name and markdown text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// File name, used for evidence strings.
    pub name: String,
    /// Raw markdown text.
    pub text: String,
}

impl Document {
    /// Creates a document.
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }
}

/// Result of an extraction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Requirements in document order.
    pub requirements: Vec<Requirement>,
    /// Completion claims from checked task-list items.
    pub seeded: Vec<ProgressSignal>,
}

impl Extraction {
    /// Returns true if nothing was extracted.
    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

/// Loads every `.md` file directly inside `dir`, sorted by file name.
///
/// A missing folder yields no documents.
pub fn load_documents(dir: &Path) -> Result<Vec<Document>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(dir = ?dir, "docs folder does not exist");
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "md") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut docs = Vec::with_capacity(paths.len());
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        docs.push(Document::new(name, fs::read_to_string(&path)?));
    }

    tracing::info!(dir = ?dir, count = docs.len(), "loaded documentation files");
    Ok(docs)
}

/// Removes inline markdown and HTML, collapsing whitespace.
pub fn strip_markup(text: &str) -> String {
    let text = HTML.replace_all(text, " ");
    let text = LINK.replace_all(&text, "$1");
    let text = EMPHASIS.replace_all(&text, "");
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Extracts requirements grouped by category from markdown documents.
#[derive(Debug, Clone, Default)]
pub struct RequirementExtractor;

impl RequirementExtractor {
    /// Creates an extractor.
    pub fn new() -> Self {
        Self
    }

    /// Extracts requirements in document order.
    ///
    /// Returns `Error::Parse` when the documents have text but no headers at
    /// all. Zero documents, or headers without items, yield an empty result.
    pub fn extract(&self, docs: &[Document]) -> Result<Extraction> {
        // Requirements are collected per category in first-appearance order,
        // then flattened so each category's items stay contiguous.
        let mut categories: Vec<(String, Vec<(String, Option<bool>, usize)>)> = Vec::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut saw_header = false;
        let mut saw_text = false;

        for (doc_index, doc) in docs.iter().enumerate() {
            let mut category = DEFAULT_CATEGORY.to_string();
            let mut in_fence = false;

            for line in doc.text.lines() {
                let trimmed = line.trim_start();
                if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
                    in_fence = !in_fence;
                    continue;
                }
                if in_fence || trimmed.is_empty() {
                    continue;
                }
                saw_text = true;

                if let Some(caps) = HEADER.captures(line) {
                    let name = strip_markup(&caps[1]);
                    if !name.is_empty() {
                        category = name;
                        saw_header = true;
                    }
                    continue;
                }

                let (text, checked) = if let Some(caps) = TASK_ITEM.captures(line) {
                    (strip_markup(&caps[2]), Some(!caps[1].trim().is_empty()))
                } else if let Some(caps) = LIST_ITEM.captures(line) {
                    (strip_markup(&caps[1]), None)
                } else {
                    continue;
                };
                if text.is_empty() {
                    continue;
                }

                let identity = (normalize_key(&category), normalize_key(&text));
                if !seen.insert(identity.clone()) {
                    // A repeat can still claim completion.
                    if checked == Some(true) {
                        mark_checked(&mut categories, &identity, doc_index);
                    }
                    continue;
                }

                let slot = match categories
                    .iter()
                    .position(|(name, _)| normalize_key(name) == identity.0)
                {
                    Some(index) => index,
                    None => {
                        categories.push((category.clone(), Vec::new()));
                        categories.len() - 1
                    }
                };
                categories[slot].1.push((text, checked, doc_index));
            }
        }

        if saw_text && !saw_header {
            return Err(Error::Parse(format!(
                "no category headers in {} document(s)",
                docs.len()
            )));
        }

        let mut extraction = Extraction::default();
        for (category, items) in categories {
            for (text, checked, doc_index) in items {
                let requirement =
                    Requirement::new(category.clone(), text, extraction.requirements.len());
                if checked == Some(true) {
                    extraction.seeded.push(ProgressSignal::new(
                        requirement.key(),
                        format!("checked in {}", docs[doc_index].name),
                    ));
                }
                extraction.requirements.push(requirement);
            }
        }

        tracing::info!(
            documents = docs.len(),
            requirements = extraction.requirements.len(),
            seeded = extraction.seeded.len(),
            "extracted requirements"
        );
        Ok(extraction)
    }
}

fn mark_checked(
    categories: &mut [(String, Vec<(String, Option<bool>, usize)>)],
    identity: &(String, String),
    doc_index: usize,
) {
    let items = categories
        .iter_mut()
        .filter(|(name, _)| normalize_key(name) == identity.0)
        .flat_map(|(_, items)| items.iter_mut());
    for item in items {
        if normalize_key(&item.0) == identity.1 {
            item.1 = Some(true);
            item.2 = doc_index;
        }
    }
}
