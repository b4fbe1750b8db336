//! Testing utilities for workflows.
//!
//! - [`TestClients`] - recording in-memory collaborators for the call executor
//! - [`TestEngine`] - stores, a manual clock and an orchestrator in one process
//!
//! # Example
//!
//! ```ignore
//! use weft_sdk::testing::TestEngine;
//! use std::time::Duration;
//!
//! let engine = TestEngine::new();
//! engine.workflows().register_simple("nap", |ctx, _| async move {
//!     ctx.sleep(Duration::from_secs(60)).await?;
//!     Ok(serde_json::Value::Null)
//! })?;
//!
//! let id = engine.start("nap", serde_json::Value::Null).await?;
//! engine.run_until_idle().await?;
//! engine.advance(Duration::from_secs(60));
//! engine.run_until_idle().await?;
//! ```

mod clients;
mod engine;

pub use clients::{
    InMemoryExecutionQueue, RecordingEventPublisher, RecordingTaskClient, RecordingTimerClient,
    RecordingWorkflowClient, ScheduledEvent, TestClients,
};
pub use engine::TestEngine;
