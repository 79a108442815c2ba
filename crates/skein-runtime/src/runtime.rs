// Copyright (c) 2025-2026 Skein Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;

use skein_broker::{Binding, Broker, QueueSpec};
use skein_config::Config;
use skein_core::TaskAgent;
use skein_model::ModelProvider;
use skein_store::{Database, FsBlobStore, SessionLockStore};
use skein_tools::events::{SPACE_TASK_EXCHANGE, SPACE_TASK_NEW_COMPLETE};
use skein_tools::task::task_tool_registry;

use crate::consumers::{BufferProcessConsumer, InsertEntryConsumer};
use crate::controller::{FlushController, FlushResult};
use crate::space::{LogDigester, SpaceDigester, SpaceTaskConsumer};
use crate::topology::{
    InsertNewMessage, QUEUE_BUFFER_PROCESS, QUEUE_INSERT_ENTRY, QUEUE_INSERT_RETRY,
    RK_BUFFER_PROCESS, RK_INSERT, RK_INSERT_RETRY, SESSION_MESSAGE_EXCHANGE,
};

/// One process worth of gateways and consumers.
///
/// Everything is constructed by [`build_runtime`] in dependency order and
/// handed around explicitly; nothing global, nothing implicit.
pub struct Runtime {
    pub config: Arc<Config>,
    pub db: Database,
    pub locks: Arc<SessionLockStore>,
    pub broker: Arc<Broker>,
    pub controller: Arc<FlushController>,
}

impl Runtime {
    /// Start all registered consumers.
    pub fn start(&self) -> anyhow::Result<()> {
        self.broker.start()
    }

    /// Stop consumers and await in-flight processing.
    pub async fn shutdown(&self) {
        self.broker.shutdown().await;
    }

    /// Announce a newly inserted message to the buffering pipeline.
    pub fn notify_message_inserted(&self, body: &InsertNewMessage) -> anyhow::Result<()> {
        self.controller.notify_message_inserted(body)
    }

    /// Synchronous "commit now" flush, see [`FlushController::flush_session`].
    pub async fn flush_session(
        &self,
        project_id: uuid::Uuid,
        session_id: uuid::Uuid,
    ) -> FlushResult {
        self.controller.flush_session(project_id, session_id).await
    }
}

/// Build the runtime with the configured model provider and the default
/// (log-only) space digester.
pub async fn build_runtime(config: Config) -> anyhow::Result<Runtime> {
    let model = skein_model::from_config(&config.llm)?;
    build_runtime_with(config, model, Arc::new(LogDigester)).await
}

/// Build the runtime with explicit model and digester implementations.
/// This is the seam tests and embedders use to swap the LLM for a scripted
/// mock or capture digested tasks.
pub async fn build_runtime_with(
    config: Config,
    model: Arc<dyn ModelProvider>,
    digester: Arc<dyn SpaceDigester>,
) -> anyhow::Result<Runtime> {
    let config = Arc::new(config);

    // Gateways, in dependency order: relational store, blob store, lock
    // store, broker.
    let db = if config.database.path == ":memory:" {
        Database::in_memory().await
    } else {
        Database::connect(&config.database.path).await
    }
    .with_context(|| format!("opening database {}", config.database.path))?;
    let blobs = Arc::new(FsBlobStore::new(config.blobs.root.clone()));
    let locks = Arc::new(SessionLockStore::new());
    let broker = Arc::new(Broker::new());

    // Agent stack: tool registry, then the loop driver.
    let tools = Arc::new(task_tool_registry(db.clone(), broker.publisher()));
    let agent = TaskAgent::new(
        db.clone(),
        tools,
        model,
        config.project.task_agent_max_iterations,
        Duration::from_secs(config.llm.timeout_seconds),
    );

    let controller = Arc::new(FlushController::new(
        Arc::clone(&config),
        db.clone(),
        Arc::clone(&locks),
        blobs.clone(),
        broker.publisher(),
        agent,
    ));

    register_consumers(&broker, &config, &controller, db.clone(), blobs, digester)?;
    info!(
        database = %config.database.path,
        blobs = %config.blobs.root,
        "runtime built"
    );

    Ok(Runtime {
        config,
        db,
        locks,
        broker,
        controller,
    })
}

/// Bind the four queues of the pipeline.
fn register_consumers(
    broker: &Broker,
    config: &Arc<Config>,
    controller: &Arc<FlushController>,
    db: Database,
    blobs: Arc<FsBlobStore>,
    digester: Arc<dyn SpaceDigester>,
) -> anyhow::Result<()> {
    let broker_cfg = &config.broker;

    broker.register(
        QueueSpec::new(
            broker_cfg,
            SESSION_MESSAGE_EXCHANGE,
            RK_INSERT,
            QUEUE_INSERT_ENTRY,
        ),
        Binding::Consume(Arc::new(InsertEntryConsumer::new(Arc::clone(controller)))),
    )?;

    // The parking queue: holds contended notifications for the lock-wait
    // interval, then dead-letters them back to the insert route.
    broker.register(
        QueueSpec::new(
            broker_cfg,
            SESSION_MESSAGE_EXCHANGE,
            RK_INSERT_RETRY,
            QUEUE_INSERT_RETRY,
        )
        .with_message_ttl(Duration::from_secs(config.lock.session_lock_wait_seconds))
        .with_dead_letter(SESSION_MESSAGE_EXCHANGE, RK_INSERT),
        Binding::Park,
    )?;

    broker.register(
        QueueSpec::new(
            broker_cfg,
            SESSION_MESSAGE_EXCHANGE,
            RK_BUFFER_PROCESS,
            QUEUE_BUFFER_PROCESS,
        ),
        Binding::Consume(Arc::new(BufferProcessConsumer::new(Arc::clone(controller)))),
    )?;

    broker.register(
        QueueSpec::new(
            broker_cfg,
            SPACE_TASK_EXCHANGE,
            SPACE_TASK_NEW_COMPLETE,
            SPACE_TASK_NEW_COMPLETE,
        ),
        Binding::Consume(Arc::new(SpaceTaskConsumer::new(db, blobs, digester))),
    )?;

    Ok(())
}

// ─── Test support ─────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use async_trait::async_trait;
    use skein_broker::{Consumer, Delivery, Outcome, Publisher};
    use skein_model::ScriptedProvider;
    use skein_store::{encode_parts, BlobStore, MessagePart, NewMessage, PartAsset, Role};
    use std::sync::Mutex;
    use uuid::Uuid;

    /// Records every body routed to it.
    pub struct Sink(pub Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl Consumer for Sink {
        async fn handle(&self, delivery: Delivery) -> anyhow::Result<Outcome> {
            self.0.lock().unwrap().push(delivery.body);
            Ok(Outcome::Ack)
        }
    }

    pub struct ControllerFixture {
        pub db: Database,
        pub locks: Arc<SessionLockStore>,
        pub controller: FlushController,
        pub broker: Broker,
        pub blobs: Arc<FsBlobStore>,
        pub parked: Arc<Mutex<Vec<String>>>,
        _tmp: tempfile::TempDir,
    }

    impl ControllerFixture {
        pub async fn wait_parked(&self, n: usize) {
            for _ in 0..200 {
                if self.parked.lock().unwrap().len() >= n {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            panic!(
                "never saw {n} parked notifications: {:?}",
                self.parked.lock().unwrap()
            );
        }
    }

    /// A controller over in-memory stores, with the retry route captured by
    /// a sink instead of the real parking queue.  The scripted model always
    /// answers with plain text, so every flush succeeds without tool calls.
    pub async fn controller_fixture(config: Config) -> ControllerFixture {
        let tmp = tempfile::tempdir().unwrap();
        let db = Database::in_memory().await.unwrap();
        let blobs = Arc::new(FsBlobStore::new(tmp.path()));
        let locks = Arc::new(SessionLockStore::new());
        let broker = Broker::new();
        let parked = Arc::new(Mutex::new(Vec::new()));
        broker
            .register(
                QueueSpec::new(
                    &config.broker,
                    SESSION_MESSAGE_EXCHANGE,
                    RK_INSERT_RETRY,
                    QUEUE_INSERT_RETRY,
                ),
                Binding::Consume(Arc::new(Sink(parked.clone()))),
            )
            .unwrap();
        broker.start().unwrap();

        let config = Arc::new(config);
        let controller = controller_with(
            &config,
            db.clone(),
            Arc::clone(&locks),
            blobs.clone(),
            broker.publisher(),
        );
        ControllerFixture {
            db,
            locks,
            controller,
            broker,
            blobs,
            parked,
            _tmp: tmp,
        }
    }

    pub fn controller_with(
        config: &Arc<Config>,
        db: Database,
        locks: Arc<SessionLockStore>,
        blobs: Arc<FsBlobStore>,
        publisher: Publisher,
    ) -> FlushController {
        let tools = Arc::new(task_tool_registry(db.clone(), publisher.clone()));
        let agent = TaskAgent::new(
            db.clone(),
            tools,
            Arc::new(ScriptedProvider::new(vec![])),
            config.project.task_agent_max_iterations,
            Duration::from_secs(config.llm.timeout_seconds),
        );
        FlushController::new(Arc::clone(config), db, locks, blobs, publisher, agent)
    }

    /// Insert a pending user message whose single text part is a real blob.
    pub async fn insert_user_message(
        fixture: &ControllerFixture,
        session_id: Uuid,
        text: &str,
    ) -> Uuid {
        let key = format!("messages/{}.json", Uuid::new_v4());
        fixture
            .blobs
            .upload(&key, &encode_parts(&[MessagePart::text(text)]).unwrap())
            .await
            .unwrap();
        fixture
            .db
            .insert_message(NewMessage::new(
                session_id,
                Role::User,
                PartAsset::for_key("assets", &key),
            ))
            .await
            .unwrap()
            .id
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use skein_model::ScriptedProvider;

    #[tokio::test]
    async fn build_runtime_wires_all_queues() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database.path = ":memory:".into();
        config.blobs.root = tmp.path().display().to_string();

        let runtime = build_runtime_with(
            config,
            Arc::new(ScriptedProvider::new(vec![])),
            Arc::new(LogDigester),
        )
        .await
        .unwrap();
        runtime.start().unwrap();
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn build_runtime_uses_mock_provider_from_config() {
        let tmp = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.database.path = ":memory:".into();
        config.blobs.root = tmp.path().display().to_string();
        config.llm.provider = "mock".into();

        let runtime = build_runtime(config).await.unwrap();
        runtime.start().unwrap();
        runtime.shutdown().await;
    }
}
