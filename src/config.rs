//! Tracker configuration.
//!
//! Resolved once at startup from defaults, an optional TOML/YAML file, an
//! environment snapshot and CLI flags, in that order, then validated.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::observe::ReferencePoint;
use crate::retry::RetryPolicy;
use crate::secrets::{EnvLookup, SecretRef, SecretSource};

/// Validation result containing all found issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation errors (fatal).
    pub errors: Vec<String>,
    /// List of validation warnings (non-fatal).
    pub warnings: Vec<String>,
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Adds an error to the result.
    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    /// Adds a warning to the result.
    pub fn add_warning(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    /// Merges another validation result into this one.
    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// Converts to a Result, failing if there are errors.
    pub fn into_result(self) -> Result<Vec<String>> {
        if self.is_valid() {
            Ok(self.warnings)
        } else {
            Err(Error::Configuration(self.errors.join("; ")))
        }
    }
}

/// Trait for validatable configuration types.
pub trait Validate {
    /// Validates the configuration and returns any issues found.
    fn validate(&self) -> ValidationResult;
}

/// Repository observation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservationConfig {
    /// Days of history to scan when no revision is given.
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u32,
    /// Minimum keyword overlap for a match.
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    /// Timeout per repository call, in seconds.
    #[serde(default = "default_observation_timeout")]
    pub timeout_secs: u64,
    /// Retries for transient repository failures.
    #[serde(default = "default_observation_retries")]
    pub max_retries: u32,
    /// Only consider changes after this revision.
    #[serde(default)]
    pub since: Option<String>,
}

fn default_lookback_days() -> u32 {
    30
}

fn default_min_score() -> f64 {
    0.5
}

fn default_observation_timeout() -> u64 {
    30
}

fn default_observation_retries() -> u32 {
    2
}

impl ObservationConfig {
    /// Where change history starts.
    pub fn reference_point(&self) -> ReferencePoint {
        match &self.since {
            Some(rev) => ReferencePoint::Revision(rev.clone()),
            None => ReferencePoint::Lookback(self.lookback_days),
        }
    }

    /// Per-call timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Retry policy for repository calls.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
    }
}

impl Default for ObservationConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            min_score: default_min_score(),
            timeout_secs: default_observation_timeout(),
            max_retries: default_observation_retries(),
            since: None,
        }
    }
}

/// Chat delivery settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Channel to post to.
    #[serde(default = "default_channel")]
    pub channel: String,
    /// Slack Web API base URL.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Timeout per request, in seconds.
    #[serde(default = "default_chat_timeout")]
    pub timeout_secs: u64,
    /// Retries for transient delivery failures.
    #[serde(default = "default_chat_retries")]
    pub max_retries: u32,
    /// Environment variable holding the bot token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
}

fn default_channel() -> String {
    "general".to_string()
}

fn default_api_base() -> String {
    crate::notify::DEFAULT_API_BASE.to_string()
}

fn default_chat_timeout() -> u64 {
    10
}

fn default_chat_retries() -> u32 {
    3
}

fn default_token_env() -> String {
    "SLACK_API_TOKEN".to_string()
}

impl ChatConfig {
    /// Per-request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Retry policy for deliveries.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries)
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            channel: default_channel(),
            api_base: default_api_base(),
            timeout_secs: default_chat_timeout(),
            max_retries: default_chat_retries(),
            token_env: default_token_env(),
        }
    }
}

/// Secrets store hints for the chat token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretsConfig {
    /// AWS region; AWS Secrets Manager is only consulted when set.
    #[serde(default)]
    pub region: Option<String>,
    /// Secret id in AWS Secrets Manager.
    #[serde(default = "default_secret_name")]
    pub secret_name: String,
    /// Key of the token inside the JSON secret.
    #[serde(default = "default_secret_key")]
    pub secret_key: String,
}

fn default_secret_name() -> String {
    "slack-automation-bot".to_string()
}

fn default_secret_key() -> String {
    "SLACK_API_SECRET".to_string()
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            region: None,
            secret_name: default_secret_name(),
            secret_key: default_secret_key(),
        }
    }
}

/// Complete tracker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Folder holding requirement documents.
    #[serde(default = "default_docs_folder")]
    pub docs_folder: PathBuf,
    /// Folder the plan file is written to.
    #[serde(default = "default_output_folder")]
    pub output_folder: PathBuf,
    /// Repository to observe.
    #[serde(default = "default_repo_path")]
    pub repo_path: PathBuf,
    /// Plan file name inside the output folder.
    #[serde(default = "default_plan_file")]
    pub plan_file: String,
    /// Minutes between cycles in loop mode.
    #[serde(default = "default_interval_minutes")]
    pub interval_minutes: u64,
    /// Repository observation settings.
    #[serde(default)]
    pub observation: ObservationConfig,
    /// Chat delivery settings.
    #[serde(default)]
    pub chat: ChatConfig,
    /// Secrets store hints.
    #[serde(default)]
    pub secrets: SecretsConfig,
}

fn default_docs_folder() -> PathBuf {
    PathBuf::from("docs")
}

fn default_output_folder() -> PathBuf {
    PathBuf::from("implementation_plans")
}

fn default_repo_path() -> PathBuf {
    PathBuf::from(".")
}

fn default_plan_file() -> String {
    "implementation_plan.md".to_string()
}

fn default_interval_minutes() -> u64 {
    30
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            docs_folder: default_docs_folder(),
            output_folder: default_output_folder(),
            repo_path: default_repo_path(),
            plan_file: default_plan_file(),
            interval_minutes: default_interval_minutes(),
            observation: ObservationConfig::default(),
            chat: ChatConfig::default(),
            secrets: SecretsConfig::default(),
        }
    }
}

/// Values given on the command line; `None` keeps the lower layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub docs_folder: Option<PathBuf>,
    pub output_folder: Option<PathBuf>,
    pub repo_path: Option<PathBuf>,
    pub channel: Option<String>,
    pub interval_minutes: Option<u64>,
}

impl TrackerConfig {
    /// Parses a config file; YAML for `.yaml`/`.yml`, TOML otherwise.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read config {}: {}", path.display(), e))
        })?;

        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));

        if is_yaml {
            serde_yaml::from_str(&content).map_err(|e| {
                Error::Configuration(format!("invalid YAML in {}: {}", path.display(), e))
            })
        } else {
            toml::from_str(&content).map_err(|e| {
                Error::Configuration(format!("invalid TOML in {}: {}", path.display(), e))
            })
        }
    }

    /// Applies the environment layer.
    pub fn apply_env(&mut self, env: &EnvLookup) -> Result<()> {
        if let Some(channel) = env("SLACK_CHANNEL").filter(|v| !v.trim().is_empty()) {
            self.chat.channel = channel;
        }
        if let Some(region) = env("AWS_REGION").filter(|v| !v.trim().is_empty()) {
            self.secrets.region = Some(region);
        }
        if let Some(name) = env("SLACK_AUTOMATION_BOT").filter(|v| !v.trim().is_empty()) {
            self.secrets.secret_name = name;
        }
        if let Some(raw) = env("PLANWATCH_INTERVAL") {
            self.interval_minutes = raw.trim().parse().map_err(|_| {
                Error::Configuration(format!("PLANWATCH_INTERVAL must be a number of minutes, got '{}'", raw))
            })?;
        }
        Ok(())
    }

    /// Applies the CLI layer.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(docs) = &overrides.docs_folder {
            self.docs_folder = docs.clone();
        }
        if let Some(output) = &overrides.output_folder {
            self.output_folder = output.clone();
        }
        if let Some(repo) = &overrides.repo_path {
            self.repo_path = repo.clone();
        }
        if let Some(channel) = &overrides.channel {
            self.chat.channel = channel.clone();
        }
        if let Some(interval) = overrides.interval_minutes {
            self.interval_minutes = interval;
        }
    }

    /// Resolves every layer and validates the result.
    pub fn load(file: Option<&Path>, env: &EnvLookup, overrides: &ConfigOverrides) -> Result<Self> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(env)?;
        config.apply_overrides(overrides);

        for warning in config.validate().into_result()? {
            tracing::warn!(warning = %warning, "configuration warning");
        }
        Ok(config)
    }

    /// Full path of the plan file.
    pub fn plan_path(&self) -> PathBuf {
        self.output_folder.join(&self.plan_file)
    }

    /// Loop interval.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_minutes.saturating_mul(60))
    }

    /// Where the chat token may come from, in lookup order.
    pub fn chat_token_sources(&self) -> Vec<SecretRef> {
        let mut sources = vec![SecretRef::new(
            "slack-token",
            SecretSource::EnvVar(self.chat.token_env.clone()),
        )];
        if let Some(region) = &self.secrets.region {
            sources.push(SecretRef::new(
                "slack-token",
                SecretSource::AwsSecretsManager {
                    secret_id: self.secrets.secret_name.clone(),
                    region: region.clone(),
                    key: self.secrets.secret_key.clone(),
                },
            ));
        }
        sources
    }
}

impl Validate for TrackerConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.interval_minutes == 0 {
            result.add_error("interval_minutes must be at least 1");
        }
        if self.plan_file.trim().is_empty() {
            result.add_error("plan_file cannot be empty");
        }
        if self.chat.channel.trim().is_empty() {
            result.add_error("chat channel cannot be empty");
        }

        result.merge(self.observation.validate());

        if self.chat.timeout_secs == 0 {
            result.add_error("chat.timeout_secs must be greater than 0");
        }
        if !self.docs_folder.is_dir() {
            result.add_warning(format!(
                "docs folder {} does not exist; no requirements will be extracted",
                self.docs_folder.display()
            ));
        }

        result
    }
}

impl Validate for ObservationConfig {
    fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if !(self.min_score > 0.0 && self.min_score <= 1.0) {
            result.add_error(format!(
                "observation.min_score must be in (0, 1], got {}",
                self.min_score
            ));
        }
        if self.timeout_secs == 0 {
            result.add_error("observation.timeout_secs must be greater than 0");
        }
        if self.lookback_days == 0 && self.since.is_none() {
            result.add_warning("observation.lookback_days = 0 will never find changes");
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn env_with(pairs: &[(&str, &str)]) -> EnvLookup {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Arc::new(move |name| map.get(name).cloned())
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = TrackerConfig::default();
        assert_eq!(config.docs_folder, PathBuf::from("docs"));
        assert_eq!(
            config.plan_path(),
            PathBuf::from("implementation_plans/implementation_plan.md")
        );
        assert_eq!(config.interval(), Duration::from_secs(30 * 60));
        assert_eq!(config.chat.channel, "general");
        assert_eq!(config.chat.api_base, "https://slack.com/api");
        assert_eq!(config.observation.reference_point(), ReferencePoint::Lookback(30));
        assert_eq!(config.secrets.secret_name, "slack-automation-bot");
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: TrackerConfig = toml::from_str(
            r#"
            docs_folder = "requirements"

            [observation]
            since = "v1.0.0"

            [chat]
            channel = "eng-progress"
            "#,
        )
        .unwrap();

        assert_eq!(config.docs_folder, PathBuf::from("requirements"));
        assert_eq!(config.output_folder, PathBuf::from("implementation_plans"));
        assert_eq!(config.chat.channel, "eng-progress");
        assert_eq!(config.chat.max_retries, 3);
        assert_eq!(
            config.observation.reference_point(),
            ReferencePoint::Revision("v1.0.0".to_string())
        );
    }

    #[test]
    fn from_file_picks_format_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let yaml = dir.path().join("planwatch.yaml");
        std::fs::write(&yaml, "interval_minutes: 5\nchat:\n  channel: builds\n").unwrap();
        let toml_path = dir.path().join("planwatch.toml");
        std::fs::write(&toml_path, "interval_minutes = 7\n").unwrap();

        let from_yaml = TrackerConfig::from_file(&yaml).unwrap();
        assert_eq!(from_yaml.interval_minutes, 5);
        assert_eq!(from_yaml.chat.channel, "builds");
        assert_eq!(TrackerConfig::from_file(&toml_path).unwrap().interval_minutes, 7);
    }

    #[test]
    fn malformed_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "interval_minutes = \"soon\"\n").unwrap();

        let err = TrackerConfig::from_file(&path).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn layers_apply_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("planwatch.toml");
        std::fs::write(&path, "interval_minutes = 10\n[chat]\nchannel = \"from-file\"\n").unwrap();

        let env = env_with(&[
            ("SLACK_CHANNEL", "from-env"),
            ("PLANWATCH_INTERVAL", "15"),
            ("AWS_REGION", "eu-west-1"),
            ("SLACK_AUTOMATION_BOT", "team-bot"),
        ]);
        let overrides = ConfigOverrides {
            channel: Some("from-cli".to_string()),
            docs_folder: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let config = TrackerConfig::load(Some(&path), &env, &overrides).unwrap();

        assert_eq!(config.chat.channel, "from-cli");
        assert_eq!(config.interval_minutes, 15);
        assert_eq!(config.secrets.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.secrets.secret_name, "team-bot");
    }

    #[test]
    fn bad_env_interval_is_configuration_error() {
        let mut config = TrackerConfig::default();
        let err = config
            .apply_env(&env_with(&[("PLANWATCH_INTERVAL", "hourly")]))
            .unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn validation_rejects_bad_values() {
        let mut config = TrackerConfig::default();
        config.interval_minutes = 0;
        config.observation.min_score = 1.5;
        config.chat.channel = " ".to_string();

        let result = config.validate();
        assert_eq!(result.errors.len(), 3);
        assert!(matches!(result.into_result(), Err(Error::Configuration(_))));
    }

    #[test]
    fn missing_docs_folder_is_only_a_warning() {
        let mut config = TrackerConfig::default();
        config.docs_folder = PathBuf::from("/definitely/not/here");

        let result = config.validate();
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
    }

    #[test]
    fn token_sources_include_aws_only_with_region() {
        let mut config = TrackerConfig::default();
        assert_eq!(config.chat_token_sources().len(), 1);

        config.secrets.region = Some("us-east-1".to_string());
        let sources = config.chat_token_sources();
        assert_eq!(sources.len(), 2);
        assert_eq!(
            sources[1].source,
            SecretSource::AwsSecretsManager {
                secret_id: "slack-automation-bot".to_string(),
                region: "us-east-1".to_string(),
                key: "SLACK_API_SECRET".to_string(),
            }
        );
    }
}
