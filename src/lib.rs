//! planwatch - keeps an implementation plan in step with requirement docs
//!
//! Requirement documents are turned into a checklist of implementation steps,
//! the repository's recent changes are matched against the open steps, and the
//! resulting plan is persisted as markdown and summarized to a chat channel.

pub mod config;
pub mod error;
pub mod extract;
pub mod notify;
pub mod observe;
pub mod orchestrator;
pub mod plan;
pub mod reconcile;
pub mod retry;
pub mod secrets;

pub use error::{Error, Result};

pub use config::{ConfigOverrides, TrackerConfig, Validate, ValidationResult};
pub use extract::{load_documents, Document, Extraction, RequirementExtractor};
pub use notify::{
    ChatClient, ChatMessage, DeliveryReceipt, LogChatClient, NotificationEvent,
    NotificationPublisher, SlackClient,
};
pub use observe::{Change, GitCliHost, MatchScorer, ProgressObserver, ReferencePoint, RepositoryHost};
pub use orchestrator::{
    CycleOptions, CycleReport, CycleState, Orchestrator, Publication, ValidationReport,
};
pub use plan::{
    ImplementationPlan, ImplementationStep, PlanStore, ProgressSignal, ProgressSummary,
    Requirement, StepKey, StepStatus,
};
pub use reconcile::{PlanReconciler, ReconcileOutcome};
pub use retry::{ExponentialBackoff, RetryPolicy};
pub use secrets::{SecretError, SecretRef, SecretSource, SecretsManager};
