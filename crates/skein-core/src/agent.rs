// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::{debug, info};
use uuid::Uuid;

use skein_model::{ChatMessage, CompletionRequest, ModelProvider, ToolSchema};
use skein_store::{Database, MessageRecord};
use skein_tools::{task::FINISH_TOOL, TaskContext, ToolRegistry};

use crate::prompts;

/// The task agent: drives bounded tool-calling turns against the model to
/// keep one session's task list synchronized with a batch of messages.
pub struct TaskAgent {
    db: Database,
    tools: Arc<ToolRegistry>,
    model: Arc<dyn ModelProvider>,
    /// Cap on tool-calling turns per flush.
    max_iterations: usize,
    /// Per-completion timeout; exceeding it fails the flush as a handler
    /// error (the broker's retry policy takes over from there).
    llm_timeout: Duration,
}

impl TaskAgent {
    pub fn new(
        db: Database,
        tools: Arc<ToolRegistry>,
        model: Arc<dyn ModelProvider>,
        max_iterations: usize,
        llm_timeout: Duration,
    ) -> Self {
        Self {
            db,
            tools,
            model,
            max_iterations,
            llm_timeout,
        }
    }

    /// Run the loop for one claimed batch.
    ///
    /// `previous` is the prior-context window; `batch` the claimed messages
    /// in ascending `created_at` order, already marked running by the caller.
    /// Running this twice on the same frozen batch can create duplicate
    /// tasks — the session lock and the latest-wins check guarantee single
    /// execution, not this function.
    pub async fn run(
        &self,
        project_id: Uuid,
        session_id: Uuid,
        previous: &[MessageRecord],
        batch: &[MessageRecord],
    ) -> anyhow::Result<()> {
        let tasks = self.db.fetch_ordered_tasks(session_id).await?;
        let planning_task = self.db.fetch_planning_task(session_id).await?;

        let task_section = prompts::pack_task_section(&tasks);
        let previous_section =
            prompts::pack_previous_messages_section(planning_task.as_ref(), &tasks, previous);
        let current_section = prompts::pack_current_messages_section(batch);
        debug!(
            %task_section,
            %previous_section,
            %current_section,
            "packed agent input"
        );

        let tool_schemas: Vec<ToolSchema> = self
            .tools
            .schemas()
            .into_iter()
            .map(|s| ToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect();

        let batch_ids: Vec<Uuid> = batch.iter().map(|m| m.id).collect();
        let mut dialogue = vec![ChatMessage::user(prompts::pack_task_input(
            &previous_section,
            &current_section,
            &task_section,
        ))];

        let mut iterations = 0;
        while iterations < self.max_iterations {
            let request = CompletionRequest {
                system: prompts::system_prompt(),
                messages: dialogue.clone(),
                tools: tool_schemas.clone(),
            };
            let completion = tokio::time::timeout(self.llm_timeout, self.model.complete(request))
                .await
                .map_err(|_| {
                    anyhow::anyhow!(
                        "model completion timed out after {:.0}s",
                        self.llm_timeout.as_secs_f64()
                    )
                })?
                .context("model completion failed")?;

            dialogue.push(ChatMessage::from_completion(&completion));
            if let Some(text) = completion.content.as_deref() {
                debug!(text, "model response");
            }
            if !completion.has_tool_calls() {
                info!(iterations, "no tool calls; agent loop done");
                break;
            }

            let mut just_finish = false;
            let mut tool_results: Vec<ChatMessage> = Vec::new();
            // The context snapshot is rebuilt lazily: `None` means the next
            // tool call must load a fresh one.
            let mut context: Option<TaskContext> = None;

            for call in &completion.tool_calls {
                if call.name == FINISH_TOOL {
                    just_finish = true;
                    continue;
                }
                let Some(tool) = self.tools.get(&call.name) else {
                    bail!("unknown tool {:?}", call.name);
                };

                let ctx = match context.take() {
                    Some(ctx) => ctx,
                    None => {
                        TaskContext::load(&self.db, project_id, session_id, batch_ids.clone())
                            .await?
                    }
                };

                let result = tool
                    .execute(&ctx, &call.arguments)
                    .await
                    .with_context(|| format!("tool {} failed", call.name))?;
                info!(tool = %call.name, arguments = %call.arguments, %result, "tool call");
                tool_results.push(ChatMessage::tool_result(&call.id, result));

                // A context-invalidating tool (task insertion) shifted the
                // orders; drop the snapshot so the next call loads fresh.
                if !tool.invalidates_context() {
                    context = Some(ctx);
                }
            }

            dialogue.extend(tool_results);
            if just_finish {
                info!(iterations, "finish tool called; agent loop done");
                break;
            }
            iterations += 1;
        }

        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
