//! Repository host backed by the local `git` CLI.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, SecondsFormat, Utc};
use tokio::process::Command;

use super::{Change, ReferencePoint, RepositoryHost};
use crate::error::{Error, Result};

/// Default time allowed for one `git log` call.
pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Reads change history with `git log`.
#[derive(Debug, Clone)]
pub struct GitCliHost {
    repo_path: PathBuf,
    timeout: Duration,
}

impl GitCliHost {
    /// Creates a host for the repository at `repo_path`.
    pub fn new(repo_path: impl Into<PathBuf>) -> Self {
        Self {
            repo_path: repo_path.into(),
            timeout: DEFAULT_GIT_TIMEOUT,
        }
    }

    /// Sets the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the repository path.
    pub fn repo_path(&self) -> &Path {
        &self.repo_path
    }

    fn log_args(since: &ReferencePoint) -> Vec<String> {
        let mut args = vec![
            "log".to_string(),
            "--no-color".to_string(),
            "--name-only".to_string(),
            "--pretty=format:%H|%aI|%s".to_string(),
        ];

        match since {
            ReferencePoint::Lookback(days) => {
                let start = Utc::now() - ChronoDuration::days(i64::from(*days));
                args.push(format!(
                    "--since={}",
                    start.to_rfc3339_opts(SecondsFormat::Secs, true)
                ));
            }
            ReferencePoint::Since(ts) => {
                args.push(format!("--since={}", ts.to_rfc3339_opts(SecondsFormat::Secs, true)));
            }
            ReferencePoint::Revision(rev) => args.push(format!("{}..HEAD", rev)),
        }

        args
    }
}

#[async_trait]
impl RepositoryHost for GitCliHost {
    async fn list_changes(&self, since: &ReferencePoint) -> Result<Vec<Change>> {
        let args = Self::log_args(since);
        tracing::debug!(repo = ?self.repo_path, args = ?args, "running git log");

        let output = Command::new("git")
            .current_dir(&self.repo_path)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, output).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(Error::observation_transient(format!(
                    "failed to run git: {}",
                    e
                )))
            }
            Err(_) => {
                return Err(Error::observation_transient(format!(
                    "git log timed out after {}s",
                    self.timeout.as_secs()
                )))
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // A fresh repository has no history yet.
            if stderr.contains("does not have any commits yet") {
                return Ok(Vec::new());
            }
            return Err(Error::observation(format!(
                "git log failed: {}",
                stderr.trim()
            )));
        }

        Ok(parse_log(&String::from_utf8_lossy(&output.stdout)))
    }

    fn name(&self) -> &str {
        "git"
    }
}

fn is_commit_header(line: &str) -> bool {
    match line.split_once('|') {
        Some((sha, _)) => sha.len() >= 40 && sha.chars().all(|c| c.is_ascii_hexdigit()),
        None => false,
    }
}

/// Parses `git log --name-only --pretty=format:%H|%aI|%s` output.
pub(crate) fn parse_log(output: &str) -> Vec<Change> {
    let mut changes: Vec<Change> = Vec::new();

    for line in output.lines() {
        if is_commit_header(line) {
            let mut parts = line.splitn(3, '|');
            let id = parts.next().unwrap_or_default();
            let committed_at = parts
                .next()
                .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
                .map(|ts| ts.with_timezone(&Utc));
            let message = parts.next().unwrap_or_default();

            let mut change = Change::new(id, message);
            change.committed_at = committed_at;
            changes.push(change);
        } else if !line.trim().is_empty() {
            if let Some(change) = changes.last_mut() {
                change.paths.push(line.trim().to_string());
            }
        }
    }

    changes
}
