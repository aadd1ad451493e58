//! planwatch CLI
//!
//! Keeps an implementation plan in step with requirement docs and reports
//! progress to Slack.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio::sync::watch;

use planwatch::config::{ConfigOverrides, TrackerConfig};
use planwatch::notify::{ChatClient, LogChatClient, NotificationPublisher, SlackClient};
use planwatch::orchestrator::{CycleOptions, Orchestrator, Publication};
use planwatch::secrets::{process_env, SecretsManager};
use planwatch::{Error, Result};

#[derive(Debug, Parser)]
#[command(name = "planwatch", version, about = "Track requirement docs against repository progress")]
struct Cli {
    /// Config file (TOML, or YAML by extension).
    #[arg(long, global = true, env = "PLANWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Repository to observe.
    #[arg(long, global = true)]
    repo: Option<PathBuf>,

    /// Log chat messages instead of sending them.
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Default, Args)]
struct Folders {
    /// Folder holding requirement documents.
    #[arg(long)]
    docs_folder: Option<PathBuf>,

    /// Folder the plan file is written to.
    #[arg(long)]
    output_folder: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SendKind {
    Request,
    Progress,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RunMode {
    Once,
    Loop,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Extract requirements and write the plan.
    Analyze {
        #[command(flatten)]
        folders: Folders,
    },
    /// Check the repository for progress and update the plan.
    Update {
        #[command(flatten)]
        folders: Folders,
    },
    /// Update the plan, then send an implementation request or progress update.
    Send {
        #[arg(value_enum)]
        kind: SendKind,
        #[command(flatten)]
        folders: Folders,
        /// Slack channel to post to.
        #[arg(long)]
        slack_channel: Option<String>,
    },
    /// Run one full cycle or keep cycling.
    Run {
        #[arg(value_enum, default_value = "once")]
        mode: RunMode,
        /// Minutes between cycles in loop mode.
        #[arg(long)]
        interval: Option<u64>,
        #[command(flatten)]
        folders: Folders,
        /// Slack channel to post to.
        #[arg(long)]
        slack_channel: Option<String>,
    },
    /// Check whether one step has been implemented and report the result.
    Validate {
        /// Step text as it appears in the plan.
        #[arg(long)]
        step: String,
        #[command(flatten)]
        folders: Folders,
        /// Slack channel to post to.
        #[arg(long)]
        slack_channel: Option<String>,
    },
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        let (folders, channel, interval) = match &self.command {
            Command::Analyze { folders } | Command::Update { folders } => (folders, None, None),
            Command::Send {
                folders,
                slack_channel,
                ..
            }
            | Command::Validate {
                folders,
                slack_channel,
                ..
            } => (folders, slack_channel.clone(), None),
            Command::Run {
                folders,
                slack_channel,
                interval,
                ..
            } => (folders, slack_channel.clone(), *interval),
        };

        ConfigOverrides {
            docs_folder: folders.docs_folder.clone(),
            output_folder: folders.output_folder.clone(),
            repo_path: self.repo.clone(),
            channel,
            interval_minutes: interval,
        }
    }
}

impl Command {
    fn publishes(&self) -> bool {
        !matches!(self, Command::Analyze { .. } | Command::Update { .. })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let mut secrets = SecretsManager::new();

    match run(cli, &mut secrets).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let message = secrets.redact(&e.to_string());
            tracing::error!(error = %message, "planwatch failed");
            eprintln!("Error: {}", message);
            ExitCode::from(exit_code(&e))
        }
    }
}

fn exit_code(error: &Error) -> u8 {
    match error {
        Error::Configuration(_) | Error::Secret(_) => 2,
        _ => 1,
    }
}

async fn run(cli: Cli, secrets: &mut SecretsManager) -> Result<()> {
    let config = TrackerConfig::load(cli.config.as_deref(), &process_env(), &cli.overrides())?;

    let mut orchestrator = Orchestrator::from_config(&config);
    if cli.command.publishes() {
        orchestrator = orchestrator.with_publisher(publisher(&config, cli.dry_run, secrets).await?);
    }

    match cli.command {
        Command::Analyze { .. } => {
            let report = orchestrator.run_cycle(CycleOptions::analyze()).await?;
            println!("Generated {} implementation steps", report.plan.step_count());
            println!(
                "Saved implementation plan to {}",
                orchestrator.plan_path().display()
            );
        }
        Command::Update { .. } => {
            let report = orchestrator.run_cycle(CycleOptions::update()).await?;
            let progress = report.progress();
            println!(
                "Implementation progress: {}/{} steps completed",
                progress.done,
                progress.total()
            );
        }
        Command::Send { kind, .. } => {
            let publish = match kind {
                SendKind::Request => Publication::Request,
                SendKind::Progress => Publication::Progress,
            };
            let report = orchestrator.run_cycle(CycleOptions::send(publish)).await?;
            let sent = !report.receipts.is_empty();
            match (kind, report.plan.next_step()) {
                (SendKind::Request, None) => println!("No pending steps to implement"),
                (SendKind::Request, Some(step)) if sent => {
                    println!("Sent implementation request for: {}", step.text)
                }
                (SendKind::Request, Some(_)) => println!("Failed to send implementation request"),
                (SendKind::Progress, _) if sent => println!("Sent progress update to Slack"),
                (SendKind::Progress, _) => println!("Failed to send progress update"),
            }
        }
        Command::Run {
            mode: RunMode::Once,
            ..
        } => {
            orchestrator.run_cycle(CycleOptions::full()).await?;
            println!("Planning cycle completed");
        }
        Command::Run {
            mode: RunMode::Loop,
            ..
        } => {
            println!(
                "Starting continuous planning loop with {} minute interval...",
                config.interval_minutes
            );
            let cycles = orchestrator
                .run_loop(CycleOptions::full(), config.interval(), stop_on_ctrl_c())
                .await;
            println!("Planning loop stopped after {} cycles", cycles);
        }
        Command::Validate { step, .. } => {
            let report = orchestrator.validate(&step).await?;
            if report.passed {
                println!("Validation passed for: {}", report.step.text);
            } else {
                println!("Validation failed for: {}", report.step.text);
            }
            println!("{}", report.feedback);
        }
    }

    Ok(())
}

async fn publisher(
    config: &TrackerConfig,
    dry_run: bool,
    secrets: &mut SecretsManager,
) -> Result<NotificationPublisher> {
    let client: Arc<dyn ChatClient> = if dry_run {
        tracing::info!("dry run, chat messages are logged instead of sent");
        Arc::new(LogChatClient::new())
    } else {
        let token = secrets
            .load_first(&config.chat_token_sources())
            .await?
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "no chat token found: set {} or configure secrets.region",
                    config.chat.token_env
                ))
            })?;
        Arc::new(SlackClient::new(token, config.chat.timeout())?.with_api_base(&config.chat.api_base))
    };

    Ok(NotificationPublisher::new(client, &config.chat.channel).with_retry(config.chat.retry_policy()))
}

/// Flips to true on the first Ctrl-C.
fn stop_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("stop requested, finishing current cycle");
                let _ = tx.send(true);
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        }
    });
    rx
}
