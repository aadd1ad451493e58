//! Keyword overlap scoring between step text and repository changes.

use std::collections::BTreeSet;

use once_cell::sync::Lazy;
use regex::Regex;

use super::Change;

/// Words that carry no signal about what a step is for.
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "if", "then", "else", "when", "at", "from", "by", "for",
    "with", "about", "against", "between", "into", "through", "during", "before", "after",
    "above", "below", "to", "of", "in", "on", "is", "are", "was", "were", "be", "been", "being",
    "have", "has", "had", "do", "does", "did", "will", "would", "shall", "should", "may",
    "might", "must", "can", "could", "implement", "set", "up", "create", "add", "build",
    "develop", "make", "ui",
];

/// Directory fragments whose files never count as implementation evidence.
const IGNORED_DIRS: &[&str] = &[
    ".git/",
    ".github/",
    "node_modules/",
    "__pycache__/",
    ".vscode/",
    ".idea/",
];

/// Extensions of docs, data and config files.
const IGNORED_EXTENSIONS: &[&str] = &[
    ".log", ".md", ".json", ".lock", ".txt", ".csv", ".yml", ".yaml", ".toml", ".ini", ".cfg",
];

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("word pattern is valid"));

/// Where a match came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchSource {
    /// Keywords found in the commit message.
    Message,
    /// Keywords found in changed file paths.
    Path,
    /// Nothing matched.
    None,
}

/// Result of scoring one step against one change.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchScore {
    /// Score in `0.0..=1.0`.
    pub value: f64,
    /// Which part of the change matched.
    pub source: MatchSource,
    /// Human-readable evidence.
    pub evidence: String,
}

impl MatchScore {
    /// A zero score.
    pub fn none() -> Self {
        Self {
            value: 0.0,
            source: MatchSource::None,
            evidence: String::new(),
        }
    }
}

/// Scores how strongly a change suggests a step is implemented.
pub trait MatchScorer: Send + Sync {
    /// Scores `step_text` against `change`.
    fn score(&self, step_text: &str, change: &Change) -> MatchScore;
}

/// Significant lowercase words of a text.
pub fn keywords(text: &str) -> BTreeSet<String> {
    WORD.find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .filter(|w| w.chars().count() > 2 && !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// Returns false for tooling, docs and config paths.
pub fn is_relevant_path(path: &str) -> bool {
    if IGNORED_DIRS.iter().any(|dir| path.contains(dir)) {
        return false;
    }
    let file_name = path.rsplit('/').next().unwrap_or(path);
    if file_name.starts_with(".env") || file_name == ".DS_Store" {
        return false;
    }
    let lower = file_name.to_lowercase();
    !IGNORED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

fn path_tokens(path: &str) -> BTreeSet<String> {
    WORD.find_iter(&path.to_lowercase())
        .flat_map(|m| {
            m.as_str()
                .split('_')
                .map(str::to_string)
                .collect::<Vec<_>>()
        })
        .filter(|t| !t.is_empty())
        .collect()
}

fn fraction(found: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        found as f64 / total as f64
    }
}

/// Fraction of step keywords present in the commit message or in a changed path.
#[derive(Debug, Clone, Default)]
pub struct KeywordOverlapScorer;

impl KeywordOverlapScorer {
    /// Creates the scorer.
    pub fn new() -> Self {
        Self
    }
}

impl MatchScorer for KeywordOverlapScorer {
    fn score(&self, step_text: &str, change: &Change) -> MatchScore {
        let words = keywords(step_text);
        if words.is_empty() {
            return MatchScore::none();
        }

        let message = change.message.to_lowercase();
        let message_score = fraction(
            words.iter().filter(|w| message.contains(w.as_str())).count(),
            words.len(),
        );

        let mut best_path: Option<(f64, &str)> = None;
        for path in change.paths.iter().filter(|p| is_relevant_path(p)) {
            let tokens = path_tokens(path);
            let score = fraction(words.iter().filter(|w| tokens.contains(*w)).count(), words.len());
            if best_path.map_or(true, |(best, _)| score > best) {
                best_path = Some((score, path));
            }
        }

        match best_path {
            Some((path_score, path)) if path_score > message_score => MatchScore {
                value: path_score,
                source: MatchSource::Path,
                evidence: format!("path {} (commit {})", path, change.short_id()),
            },
            _ if message_score > 0.0 => MatchScore {
                value: message_score,
                source: MatchSource::Message,
                evidence: format!("commit {}: {}", change.short_id(), change.message),
            },
            _ => MatchScore::none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keywords_drop_stop_words_and_short_words() {
        let words = keywords("Implement the User Login UI for an app");
        let expected: BTreeSet<String> = ["app", "login", "user"].iter().map(|s| s.to_string()).collect();
        assert_eq!(words, expected);
    }

    #[test]
    fn relevant_paths_exclude_docs_and_tooling() {
        assert!(is_relevant_path("src/auth/login.rs"));
        assert!(is_relevant_path("web/app.tsx"));
        assert!(!is_relevant_path("docs/login.md"));
        assert!(!is_relevant_path(".github/workflows/ci.yml"));
        assert!(!is_relevant_path("web/node_modules/x/index.js"));
        assert!(!is_relevant_path("Cargo.lock"));
        assert!(!is_relevant_path("config/.env.local"));
        assert!(!is_relevant_path("assets/.DS_Store"));
    }

    #[test]
    fn message_overlap_scores_fraction_of_keywords() {
        let change = Change::new("0123456789", "Add user login form");
        let score = KeywordOverlapScorer::new().score("User login with password reset", &change);

        // keywords: user, login, password, reset
        assert_eq!(score.value, 0.5);
        assert_eq!(score.source, MatchSource::Message);
        assert_eq!(score.evidence, "commit 01234567: Add user login form");
    }

    #[test]
    fn path_overlap_uses_relevant_paths_only() {
        let change = Change::new("89abcdef01", "misc")
            .with_paths(["docs/password_reset.md", "src/password_reset.rs"]);
        let score = KeywordOverlapScorer::new().score("Password reset", &change);

        assert_eq!(score.value, 1.0);
        assert_eq!(score.source, MatchSource::Path);
        assert_eq!(score.evidence, "path src/password_reset.rs (commit 89abcdef)");
    }

    #[test]
    fn step_without_keywords_never_matches() {
        let change = Change::new("0000000000", "set up the ui");
        let score = KeywordOverlapScorer::new().score("Set up the UI", &change);
        assert_eq!(score.value, 0.0);
        assert_eq!(score.source, MatchSource::None);
    }
}
