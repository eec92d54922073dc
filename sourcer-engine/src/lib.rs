//! Sourcer Engine
//!
//! The orchestration machinery behind a pipeline run, independent of any
//! transport or database:
//!
//! - `graph` / `engine`: the stage DAG and the engine that walks it
//! - `stage`: the contract every concrete stage implements
//! - `extract`: best-effort recovery of JSON from free-form stage output
//! - `safety`: banned-term index, embedders and the similarity gate
//! - `queue`: job dispatcher and the queue contract
//! - `relay`: publish/subscribe contract for progress events
//! - `sink`: persistence contract for terminal runs
//! - `cancel`: cooperative cancellation signal
//!
//! Every contract ships an in-memory implementation; the orchestrator and
//! runner plug in Postgres and HTTP backed ones.

pub mod cancel;
pub mod engine;
pub mod extract;
pub mod graph;
pub mod queue;
pub mod relay;
pub mod safety;
pub mod sink;
pub mod stage;

pub use cancel::{CancelHandle, CancelSignal, StopReason};
pub use engine::PipelineEngine;
pub use extract::{Extraction, extract};
pub use graph::{GraphError, StageDefinition, StageGraph};
pub use queue::{Dispatcher, JobQueue, MemoryQueue, QueueError};
pub use relay::{EventPublisher, EventRelay, MemoryRelay, RelayError, Subscription};
pub use safety::{BannedTermIndex, Embedder, NgramEmbedder, OllamaEmbedder, SafetyGate};
pub use sink::{MemoryRunStore, PersistenceSink, StoreError};
pub use stage::{ExecutionError, StageContext, StageExecutor, StageOutput};

/// Default pub/sub topic carrying progress events
pub const DEFAULT_TOPIC: &str = "sourcing_updates";

/// Default similarity above which a term is considered unsafe
pub const DEFAULT_SAFETY_THRESHOLD: f32 = 0.8;
