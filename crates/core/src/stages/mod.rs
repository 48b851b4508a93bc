//! Pipeline Stages
//!
//! One [`Stage`] per workflow node. A stage reads the working state, checks
//! the session cache for its artifact, produces the artifact when the cache
//! has none, and reports what changed as [`StateDelta`]s. Stages never touch
//! routing; the graph decides what runs next.

use crate::cache::CacheStore;
use crate::generator::StructuredGenerator;
use crate::graph::Node;
use crate::prompts::Prompts;
use crate::session::SessionPaths;
use crate::state::{PipelineState, StateDelta};
use crate::tools::{AudioSynthesizer, SceneRenderer, VideoAssembler};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub mod audio;
pub mod cleaner;
pub mod code_critic;
pub mod codegen;
pub mod concatenator;
pub mod critic;
pub mod planner;
pub mod renderer;
pub mod review;
pub mod storyboard;
pub mod teacher;

pub use audio::AudioStage;
pub use cleaner::CleanerStage;
pub use code_critic::CodeCriticStage;
pub use codegen::CodeGenStage;
pub use concatenator::ConcatenatorStage;
pub use critic::CriticStage;
pub use planner::PlannerStage;
pub use renderer::RendererStage;
pub use storyboard::StoryboardStage;
pub use teacher::TeacherStage;

#[async_trait]
pub trait Stage: Send + Sync {
    fn node(&self) -> Node;

    /// Runs the stage once. An error aborts the workflow; recoverable
    /// problems are logged and reported through the returned deltas.
    async fn run(&self, state: &PipelineState, cache: &mut dyn CacheStore) -> Result<Vec<StateDelta>>;
}

/// Everything the stages share: generators, prompts, artifact paths and
/// the external tools.
#[derive(Clone)]
pub struct Toolkit {
    /// Planning, teaching, storyboarding, review and audio timing.
    pub generator: StructuredGenerator,
    pub codegen: StructuredGenerator,
    pub code_review: StructuredGenerator,
    pub prompts: Arc<Prompts>,
    pub paths: SessionPaths,
    pub renderer: Arc<dyn SceneRenderer>,
    /// Speech synthesis is optional; without it steps render silently.
    pub synthesizer: Option<Arc<dyn AudioSynthesizer>>,
    pub assembler: Arc<dyn VideoAssembler>,
    pub tts_lang: String,
}

/// The stage set for the standard pipeline.
pub fn standard(toolkit: Arc<Toolkit>) -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(PlannerStage::new(toolkit.clone())),
        Box::new(TeacherStage::new(toolkit.clone())),
        Box::new(StoryboardStage::new(toolkit.clone())),
        Box::new(CriticStage::new(toolkit.clone())),
        Box::new(AudioStage::new(toolkit.clone())),
        Box::new(CodeGenStage::new(toolkit.clone())),
        Box::new(CodeCriticStage::new(toolkit.clone())),
        Box::new(RendererStage::new(toolkit.clone())),
        Box::new(CleanerStage),
        Box::new(ConcatenatorStage::new(toolkit)),
    ]
}

/// Pretty JSON for embedding a record in a user prompt.
pub(crate) fn to_prompt_json<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
