//! Chat notifications for plan events.
//!
//! Events are rendered into a provider-neutral [`ChatMessage`] and handed to
//! a [`ChatClient`]. The [`NotificationPublisher`] delivers each logical
//! event at most once per process.

mod format;
mod slack;

pub use format::{format_event, MAX_CONTEXT_FILES, MAX_LISTED_STEPS, MAX_RELATED_STEPS};
pub use slack::{to_blocks, ChatError, LogChatClient, SlackClient, DEFAULT_API_BASE};

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::plan::{normalize_key, ImplementationPlan, ImplementationStep, ProgressSignal};
use crate::retry::RetryPolicy;

/// Visual emphasis of an action button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ButtonStyle {
    /// Affirmative action.
    Primary,
    /// Destructive or retry action.
    Danger,
}

/// A single interactive button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionButton {
    /// Button label.
    pub label: String,
    /// Identifier reported back when the button is pressed.
    pub action_id: String,
    /// Opaque JSON payload.
    pub value: String,
    /// Button style.
    pub style: ButtonStyle,
}

/// One body element of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageSection {
    /// A block of markdown text.
    Text(String),
    /// Short side-by-side fields.
    Fields(Vec<String>),
}

/// A provider-neutral chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Plain-text fallback for notifications.
    pub fallback: String,
    /// Header line.
    pub header: String,
    /// Body sections in order.
    pub sections: Vec<MessageSection>,
    /// Optional action button.
    pub action: Option<ActionButton>,
}

impl ChatMessage {
    /// Renders the message as plain text.
    pub fn render_text(&self) -> String {
        let mut out = format!("{}\n", self.header);
        for section in &self.sections {
            match section {
                MessageSection::Text(text) => {
                    out.push_str(text.trim_end());
                    out.push('\n');
                }
                MessageSection::Fields(fields) => {
                    out.push_str(&fields.join(" | "));
                    out.push('\n');
                }
            }
        }
        if let Some(action) = &self.action {
            out.push_str(&format!("[{}]\n", action.label));
        }
        out
    }
}

/// Acknowledgment of a delivered message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    /// Channel the message went to.
    pub channel: String,
    /// Provider message id (Slack `ts`).
    pub message_id: String,
}

/// Sends messages to a chat channel.
#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Posts a message and returns the provider acknowledgment.
    async fn post_message(&self, channel: &str, message: &ChatMessage) -> Result<DeliveryReceipt>;

    /// Returns the name of this client.
    fn name(&self) -> &str;
}

/// Background for an implementation request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Completed steps of the same category, capped.
    pub related_done: Vec<String>,
    /// Completed steps beyond the cap.
    pub more_related: usize,
    /// Files changed by this cycle's signals in the same category, capped.
    pub files: Vec<String>,
}

impl RequestContext {
    /// Collects context for `step` from the plan and this cycle's signals.
    pub fn for_step(
        plan: &ImplementationPlan,
        step: &ImplementationStep,
        signals: &[ProgressSignal],
    ) -> Self {
        let category = normalize_key(&step.category);

        let related: Vec<String> = plan
            .done_steps()
            .into_iter()
            .filter(|s| normalize_key(&s.category) == category)
            .map(|s| s.text.clone())
            .collect();
        let more_related = related.len().saturating_sub(MAX_RELATED_STEPS);

        let mut files: Vec<String> = Vec::new();
        for signal in signals.iter().filter(|s| s.step.category == category) {
            for file in &signal.files {
                if files.len() < MAX_CONTEXT_FILES && !files.contains(file) {
                    files.push(file.clone());
                }
            }
        }

        Self {
            related_done: related.into_iter().take(MAX_RELATED_STEPS).collect(),
            more_related,
            files,
        }
    }

    /// Returns true if there is nothing to show.
    pub fn is_empty(&self) -> bool {
        self.related_done.is_empty() && self.files.is_empty()
    }
}

/// A logical notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    /// Ask for the next step to be implemented.
    Request {
        step: ImplementationStep,
        context: RequestContext,
    },
    /// Summarize done and pending steps.
    Progress {
        done: Vec<ImplementationStep>,
        pending: Vec<ImplementationStep>,
    },
    /// Report whether a step's implementation was confirmed.
    Validation {
        step: ImplementationStep,
        passed: bool,
        feedback: String,
    },
}

impl NotificationEvent {
    /// Builds a progress event from the plan's non-stale steps.
    pub fn progress(plan: &ImplementationPlan) -> Self {
        NotificationEvent::Progress {
            done: plan.done_steps().into_iter().cloned().collect(),
            pending: plan.open_steps().into_iter().cloned().collect(),
        }
    }

    /// Builds a request event for the plan's next open step.
    pub fn next_request(plan: &ImplementationPlan, signals: &[ProgressSignal]) -> Option<Self> {
        plan.next_step().map(|step| NotificationEvent::Request {
            context: RequestContext::for_step(plan, step, signals),
            step: step.clone(),
        })
    }

    /// Short kind name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationEvent::Request { .. } => "request",
            NotificationEvent::Progress { .. } => "progress",
            NotificationEvent::Validation { .. } => "validation",
        }
    }

    /// Identity used to suppress duplicate deliveries.
    pub fn dedup_key(&self) -> String {
        match self {
            NotificationEvent::Request { step, .. } => format!("request:{}", step.key()),
            NotificationEvent::Progress { done, pending } => {
                format!("progress:{}/{}", done.len(), pending.len())
            }
            NotificationEvent::Validation { step, passed, .. } => {
                format!("validation:{}:{}", step.key(), passed)
            }
        }
    }
}

impl fmt::Display for NotificationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dedup_key())
    }
}

/// Formats events and delivers each one at most once.
pub struct NotificationPublisher {
    client: Arc<dyn ChatClient>,
    channel: String,
    retry: RetryPolicy,
    delivered: HashSet<String>,
}

impl NotificationPublisher {
    /// Creates a publisher for one channel.
    pub fn new(client: Arc<dyn ChatClient>, channel: impl Into<String>) -> Self {
        Self {
            client,
            channel: channel.into(),
            retry: RetryPolicy::default(),
            delivered: HashSet::new(),
        }
    }

    /// Sets the retry policy for deliveries.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the target channel.
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Delivers `event` unless an identical one was already delivered.
    ///
    /// Returns `Ok(None)` for a suppressed duplicate. A failed delivery is
    /// not remembered, so the same event is attempted again next time.
    pub async fn publish(&mut self, event: &NotificationEvent) -> Result<Option<DeliveryReceipt>> {
        let key = event.dedup_key();
        if self.delivered.contains(&key) {
            tracing::debug!(event = %key, "skipping duplicate notification");
            return Ok(None);
        }

        let message = format_event(event);
        let client = &self.client;
        let channel = self.channel.as_str();
        let receipt = self
            .retry
            .run("post_message", || client.post_message(channel, &message))
            .await?;

        tracing::info!(
            event = event.kind(),
            client = self.client.name(),
            channel = %receipt.channel,
            message_id = %receipt.message_id,
            "notification delivered"
        );
        self.delivered.insert(key);
        Ok(Some(receipt))
    }
}

impl fmt::Debug for NotificationPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationPublisher")
            .field("client", &self.client.name())
            .field("channel", &self.channel)
            .field("delivered", &self.delivered.len())
            .finish()
    }
}
