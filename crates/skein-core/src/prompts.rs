// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Prompt packing for the task agent.

use skein_store::{MessagePart, MessageRecord, TaskRecord};
use tracing::warn;
use uuid::Uuid;

/// System prompt of the task-management agent.
pub fn system_prompt() -> String {
    "You are a Task Management Agent that analyzes user/agent conversations to maintain \
the session's task list.

## Core Responsibilities
1. **New Task Detection**: identify new tasks, goals, or objectives requiring tracking.
2. **Task Assignment**: match messages to existing tasks based on context and content.
3. **Status Management**: update task statuses based on progress and completion signals.

## Task System
- Tasks have a description, a status, and a sequential order (`task_order = 1, 2, ...`) \
within the session. Messages link to tasks via their IDs.
- Statuses: `pending` (created, not started), `running` (actively worked on), \
`success` (completed), `failed` (errored or abandoned).

## Analysis Guidelines
### Planning Detection
- Look for explicit planning language (\"My plan is to...\"), user requirements and \
preferences, and general plans from user or agent. Messages that cause you to create \
or update tasks belong in the planning section.

### New Task Detection
- Avoid creating tasks for simple questions answerable directly.
- Only collect tasks stated by agents/users; do not invent them.
- A user requirement confirmed by the agent's response becomes a valid task; append \
those requirement messages to the planning section.
- Follow the agent's own task granularity; do not split finer or coarser.
- Insert tasks in logical execution order, not mention order, and keep them free of \
overlap.
- When several valid new tasks are mentioned, capture them all.

### Task Assignment
- Match agent responses/actions to existing task descriptions and contexts.
- Not every message needs a link; only attach messages that contribute to a task's \
progress.

### Task Modification
- `running` when work begins, `success` when completion is confirmed, `failed` on \
explicit errors or abandonment.
- Only modify a task's description when the conversation explicitly asks for it and \
the agent confirms.

## Input Format
Markdown with three sections: `## Current Tasks` (orders, descriptions, statuses), \
`## Previous Messages` (history for context, no message ids), and \
`## Current Messages with IDs` (the messages to analyze). A message with an id looks \
like `<message id=N> ... </message>`; N is the message id.

## Report your thinking before calling tools
- In extremely brief sentences, state the plans and tasks the conversation mentions.
- Describe your plan in one or two sentences, then call the tools that realize it.

## Action Guidelines
- Be precise, context-aware, and conservative.
- Use parallel tool calls in the correct order, and call every tool your report needs.
- Call `finish` when the task list is synchronized."
        .to_string()
}

/// Render one message for the prompt.
///
/// Text parts are included (optionally truncated); media and tool parts are
/// rendered as compact tags.  A message whose parts failed to hydrate shows a
/// placeholder — degraded, never omitted, so message indices stay aligned.
pub fn render_message(message: &MessageRecord, truncate_chars: Option<usize>) -> String {
    let body = match &message.parts {
        None => "[parts unavailable]".to_string(),
        Some(parts) => {
            let rendered: Vec<String> = parts
                .iter()
                .map(|p| match p {
                    MessagePart::Text { text } => truncate(text, truncate_chars),
                    MessagePart::Image { filename, .. } => media_tag("image", filename),
                    MessagePart::Audio { filename, .. } => media_tag("audio", filename),
                    MessagePart::Video { filename, .. } => media_tag("video", filename),
                    MessagePart::File { filename, .. } => media_tag("file", filename),
                    MessagePart::ToolCall {
                        tool_name,
                        arguments,
                    } => format!("[tool-call {tool_name}: {}]", truncate(&arguments.to_string(), truncate_chars)),
                    MessagePart::ToolResult { tool_name, content } => format!(
                        "[tool-result {}: {}]",
                        tool_name.as_deref().unwrap_or("unknown"),
                        truncate(&content.to_string(), truncate_chars)
                    ),
                    MessagePart::Data { data } => {
                        format!("[data: {}]", truncate(&data.to_string(), truncate_chars))
                    }
                })
                .collect();
            rendered.join(" ")
        }
    };
    format!("[{}] {body}", message.role)
}

fn media_tag(kind: &str, filename: &Option<String>) -> String {
    match filename {
        Some(name) => format!("[{kind}: {name}]"),
        None => format!("[{kind}]"),
    }
}

fn truncate(text: &str, limit: Option<usize>) -> String {
    match limit {
        Some(limit) if text.chars().count() > limit => {
            let cut: String = text.chars().take(limit).collect();
            format!("{cut}...")
        }
        _ => text.to_string(),
    }
}

/// `## Current Tasks` section: one line per non-planning task.
pub fn pack_task_section(tasks: &[TaskRecord]) -> String {
    tasks
        .iter()
        .map(|t| {
            format!(
                "- task_{} [{}]: {}",
                t.order,
                t.status,
                t.task_description()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// `## Previous Messages` section.  Each message carries a prefix tag showing
/// its existing attachment so the agent does not re-link old messages.
pub fn pack_previous_messages_section(
    planning_task: Option<&TaskRecord>,
    tasks: &[TaskRecord],
    messages: &[MessageRecord],
) -> String {
    messages
        .iter()
        .map(|m| {
            let tag = attachment_tag(m.task_id, planning_task, tasks);
            format!("{tag}\n{}", render_message(m, Some(200)))
        })
        .collect::<Vec<_>>()
        .join("\n---\n")
}

fn attachment_tag(
    task_id: Option<Uuid>,
    planning_task: Option<&TaskRecord>,
    tasks: &[TaskRecord],
) -> String {
    let Some(task_id) = task_id else {
        return "(no task linked)".into();
    };
    if let Some(task) = tasks.iter().find(|t| t.id == task_id) {
        return format!("(append to task_{})", task.order);
    }
    if planning_task.is_some_and(|p| p.id == task_id) {
        return "(append to planning_section)".into();
    }
    warn!(%task_id, "message linked to unknown task");
    "(no task linked)".into()
}

/// `## Current Messages with IDs` section: each batch message wrapped in an
/// id tag, ids 0-based into the batch.
pub fn pack_current_messages_section(messages: &[MessageRecord]) -> String {
    messages
        .iter()
        .enumerate()
        .map(|(i, m)| format!("<message id={i}> {} </message>", render_message(m, None)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The packed first user turn.
pub fn pack_task_input(
    previous_messages: &str,
    current_messages_with_ids: &str,
    current_tasks: &str,
) -> String {
    format!(
        "## Current Tasks:\n{current_tasks}\n\n\
         ## Previous Messages:\n{previous_messages}\n\n\
         ## Current Messages with IDs:\n{current_messages_with_ids}"
    )
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use skein_store::{PartAsset, ProcessStatus, Role};

    fn message(role: Role, parts: Option<Vec<MessagePart>>, task_id: Option<Uuid>) -> MessageRecord {
        MessageRecord {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            role,
            parts_meta: PartAsset::for_key("a", "k"),
            parts,
            parent_id: None,
            task_id,
            status: ProcessStatus::Running,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn task(order: i64, desc: &str) -> TaskRecord {
        TaskRecord {
            id: Uuid::new_v4(),
            session_id: Uuid::new_v4(),
            order,
            data: json!({"task_description": desc}),
            status: ProcessStatus::Pending,
            is_planning: false,
            space_digested: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            message_ids: vec![],
        }
    }

    #[test]
    fn render_includes_role_and_text() {
        let m = message(Role::User, Some(vec![MessagePart::text("hello")]), None);
        assert_eq!(render_message(&m, None), "[user] hello");
    }

    #[test]
    fn render_truncates_long_text() {
        let m = message(Role::User, Some(vec![MessagePart::text("abcdefgh")]), None);
        assert_eq!(render_message(&m, Some(4)), "[user] abcd...");
    }

    #[test]
    fn render_degraded_message_shows_placeholder() {
        let m = message(Role::Assistant, None, None);
        assert_eq!(render_message(&m, None), "[assistant] [parts unavailable]");
    }

    #[test]
    fn render_media_and_tool_parts() {
        let m = message(
            Role::Assistant,
            Some(vec![
                MessagePart::File {
                    asset: PartAsset::for_key("a", "doc.pdf"),
                    filename: Some("doc.pdf".into()),
                },
                MessagePart::ToolCall {
                    tool_name: "search".into(),
                    arguments: json!({"q": "x"}),
                },
            ]),
            None,
        );
        let rendered = render_message(&m, None);
        assert!(rendered.contains("[file: doc.pdf]"));
        assert!(rendered.contains("[tool-call search:"));
    }

    #[test]
    fn task_section_lists_orders_and_statuses() {
        let section = pack_task_section(&[task(1, "collect"), task(2, "report")]);
        assert_eq!(
            section,
            "- task_1 [pending]: collect\n- task_2 [pending]: report"
        );
    }

    #[test]
    fn previous_messages_carry_attachment_tags() {
        let t = task(1, "collect");
        let planning = TaskRecord {
            is_planning: true,
            order: 0,
            ..task(0, "")
        };
        let messages = vec![
            message(Role::User, Some(vec![MessagePart::text("a")]), None),
            message(Role::Assistant, Some(vec![MessagePart::text("b")]), Some(t.id)),
            message(Role::User, Some(vec![MessagePart::text("c")]), Some(planning.id)),
            message(Role::User, Some(vec![MessagePart::text("d")]), Some(Uuid::new_v4())),
        ];
        let section =
            pack_previous_messages_section(Some(&planning), std::slice::from_ref(&t), &messages);
        assert!(section.contains("(no task linked)\n[user] a"));
        assert!(section.contains("(append to task_1)\n[assistant] b"));
        assert!(section.contains("(append to planning_section)\n[user] c"));
        // Unknown task link degrades to "no task linked".
        assert!(section.contains("(no task linked)\n[user] d"));
    }

    #[test]
    fn current_messages_are_wrapped_with_zero_based_ids() {
        let messages = vec![
            message(Role::User, Some(vec![MessagePart::text("first")]), None),
            message(Role::Assistant, Some(vec![MessagePart::text("second")]), None),
        ];
        let section = pack_current_messages_section(&messages);
        assert_eq!(
            section,
            "<message id=0> [user] first </message>\n\
             <message id=1> [assistant] second </message>"
        );
    }

    #[test]
    fn packed_input_has_three_sections_in_order() {
        let packed = pack_task_input("PREV", "CURR", "TASKS");
        let tasks_at = packed.find("## Current Tasks").unwrap();
        let prev_at = packed.find("## Previous Messages").unwrap();
        let curr_at = packed.find("## Current Messages with IDs").unwrap();
        assert!(tasks_at < prev_at && prev_at < curr_at);
    }
}
