//! Core of the chalkboard lesson pipeline: the lesson data model, the
//! session cache, structured generation over a text backend, the external
//! tool adapters and the resumable stage workflow that ties them together.

pub mod cache;
pub mod curriculum;
pub mod generator;
pub mod graph;
pub mod lesson;
pub mod llm_client;
pub mod prompts;
pub mod session;
pub mod stages;
pub mod state;
pub mod tools;

pub use cache::{CacheError, CacheExt, CacheStore, JsonFileCache, MemoryCache};
pub use generator::{GenerationError, RetryPolicy, StructuredGenerator};
pub use graph::{Node, StepRecorder, Workflow};
pub use session::{Session, SessionPaths};
pub use stages::Toolkit;
pub use state::{PipelineState, Review, StateDelta};
