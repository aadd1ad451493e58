//! Message templates for each notification kind.

use serde_json::json;

use super::{ActionButton, ButtonStyle, ChatMessage, MessageSection, NotificationEvent, RequestContext};
use crate::plan::{ImplementationStep, ProgressSummary};

/// Steps listed per group in a progress update.
pub const MAX_LISTED_STEPS: usize = 5;

/// Completed sibling steps shown in a request.
pub const MAX_RELATED_STEPS: usize = 3;

/// Changed files shown in a request.
pub const MAX_CONTEXT_FILES: usize = 5;

/// Renders an event into a chat message.
pub fn format_event(event: &NotificationEvent) -> ChatMessage {
    match event {
        NotificationEvent::Request { step, context } => format_request(step, context),
        NotificationEvent::Progress { done, pending } => format_progress(done, pending),
        NotificationEvent::Validation {
            step,
            passed,
            feedback,
        } => format_validation(step, *passed, feedback),
    }
}

fn button(label: &str, action_id: &str, step: &ImplementationStep, action: &str, style: ButtonStyle) -> ActionButton {
    ActionButton {
        label: label.to_string(),
        action_id: action_id.to_string(),
        value: json!({ "step": step.text, "category": step.category, "action": action }).to_string(),
        style,
    }
}

fn format_context(context: &RequestContext) -> String {
    let mut text = String::new();
    if !context.related_done.is_empty() {
        text.push_str("Related completed steps:\n");
        for step in &context.related_done {
            text.push_str(&format!("- {}\n", step));
        }
        if context.more_related > 0 {
            text.push_str(&format!("- ...and {} more\n", context.more_related));
        }
    }
    if !context.files.is_empty() {
        text.push_str("Relevant files:\n");
        for file in &context.files {
            text.push_str(&format!("- {}\n", file));
        }
    }
    text
}

fn format_request(step: &ImplementationStep, context: &RequestContext) -> ChatMessage {
    let mut sections = vec![MessageSection::Text(format!("*Task:* {}", step.text))];
    if !context.is_empty() {
        sections.push(MessageSection::Text(format!(
            "*Context:*\n{}",
            format_context(context)
        )));
    }
    sections.push(MessageSection::Fields(vec![format!(
        "*Category:* {}",
        step.category
    )]));

    ChatMessage {
        fallback: format!("Implementation Request: {}", step.text),
        header: "Implementation Request".to_string(),
        sections,
        action: Some(button(
            "Start Implementation",
            "start_implementation",
            step,
            "start",
            ButtonStyle::Primary,
        )),
    }
}

fn step_list(title: &str, marker: &str, steps: &[ImplementationStep]) -> String {
    let mut text = format!("*{}:*\n", title);
    for step in steps.iter().take(MAX_LISTED_STEPS) {
        text.push_str(&format!("{} {}\n", marker, step.text));
    }
    if steps.len() > MAX_LISTED_STEPS {
        text.push_str(&format!("_...and {} more_\n", steps.len() - MAX_LISTED_STEPS));
    }
    text
}

fn format_progress(done: &[ImplementationStep], pending: &[ImplementationStep]) -> ChatMessage {
    let summary = ProgressSummary {
        done: done.len(),
        pending: pending.len(),
        stale: 0,
    };
    let percent = summary.percent();

    let mut sections = vec![MessageSection::Text(format!(
        "*Progress:* {}% complete ({}/{} tasks)",
        percent,
        summary.done,
        summary.total()
    ))];
    if !done.is_empty() {
        sections.push(MessageSection::Text(step_list("Completed Tasks", "✅", done)));
    }
    if !pending.is_empty() {
        sections.push(MessageSection::Text(step_list("Pending Tasks", "⬜", pending)));
    }

    let action = pending.first().map(|next| {
        sections.push(MessageSection::Text(format!("*Next Task:* {}", next.text)));
        button(
            "Start Next Task",
            "start_implementation",
            next,
            "start",
            ButtonStyle::Primary,
        )
    });

    ChatMessage {
        fallback: format!("Implementation Progress: {}% complete", percent),
        header: "Implementation Progress Update".to_string(),
        sections,
        action,
    }
}

fn format_validation(step: &ImplementationStep, passed: bool, feedback: &str) -> ChatMessage {
    let mut sections = vec![
        MessageSection::Text(format!("*Task:* {}", step.text)),
        MessageSection::Text(format!(
            "*Status:* {}",
            if passed { "✅ Valid" } else { "❌ Invalid" }
        )),
    ];
    if !feedback.is_empty() {
        sections.push(MessageSection::Text(format!("*Feedback:*\n{}", feedback)));
    }

    let action = if passed {
        button(
            "Mark as Completed",
            "complete_implementation",
            step,
            "complete",
            ButtonStyle::Primary,
        )
    } else {
        button(
            "Retry Implementation",
            "retry_implementation",
            step,
            "retry",
            ButtonStyle::Danger,
        )
    };

    ChatMessage {
        fallback: format!(
            "Implementation Validation: {}",
            if passed { "Valid" } else { "Invalid" }
        ),
        header: "Implementation Validation Result".to_string(),
        sections,
        action: Some(action),
    }
}
