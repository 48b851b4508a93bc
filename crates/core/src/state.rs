//! Pipeline State
//!
//! The working record threaded through the workflow. Stages never mutate it
//! directly: each returns a list of [`StateDelta`]s that the driver applies.
//! Everything except the topic, curriculum and step index is step-scoped
//! and is wiped by [`StateDelta::ResetStep`] when the pipeline moves on to
//! the next curriculum step.

use crate::cache::{CacheError, CacheExt, CacheStore, keys};
use crate::curriculum::Curriculum;
use crate::lesson::{AudioMetadata, GeneratedCode, Storyboard, TeachingScript};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where an approval loop stands.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    /// Approved by the reviewer, or forcibly released at the iteration cap.
    pub approved: bool,
    /// True when `approved` came from the iteration cap, not the reviewer.
    #[serde(default)]
    pub forced: bool,
    #[serde(default)]
    pub feedback: Option<String>,
    /// Rejections so far for the current step.
    #[serde(default)]
    pub iterations: u32,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineState {
    pub topic: String,
    pub curriculum: Option<Curriculum>,
    pub current_step_index: usize,
    pub current_script: Option<TeachingScript>,
    pub current_storyboard: Option<Storyboard>,
    pub current_audio_metadata: Option<AudioMetadata>,
    pub audio_file_path: Option<PathBuf>,
    pub manim_code: Option<GeneratedCode>,
    pub review: Review,
    pub code_review: Review,
    pub mp4_file_path: Option<PathBuf>,
    pub final_video_path: Option<PathBuf>,
}

/// One field assignment produced by a stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StateDelta {
    Curriculum(Curriculum),
    Script(TeachingScript),
    Storyboard(Storyboard),
    AudioMetadata(AudioMetadata),
    AudioFile(Option<PathBuf>),
    Code(GeneratedCode),
    Review(Review),
    CodeReview(Review),
    StepVideo(Option<PathBuf>),
    /// The current step has its video; move the step index forward by one.
    StepCompleted,
    FinalVideo(PathBuf),
    /// Clear every step-scoped field.
    ResetStep,
}

impl PipelineState {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Self::default()
        }
    }

    /// Rebuilds the state an interrupted run left behind: the step index and
    /// curriculum, plus whatever the current step already has cached.
    pub fn resume(topic: impl Into<String>, cache: &dyn CacheStore) -> Result<Self, CacheError> {
        let mut state = Self::new(topic);
        state.current_step_index = cache.load(keys::CURRENT_STEP_INDEX)?.unwrap_or(0);
        state.curriculum = cache.load(keys::CURRICULUM)?;
        let index = state.current_step_index;
        state.current_script = cache.load(&keys::script(index))?;
        state.current_storyboard = cache.load(&keys::storyboard(index))?;
        state.current_audio_metadata = cache.load(&keys::audio_metadata(index))?;
        Ok(state)
    }

    /// Number of curriculum steps, zero before planning.
    pub fn step_count(&self) -> usize {
        self.curriculum.as_ref().map_or(0, Curriculum::len)
    }

    pub fn steps_remaining(&self) -> bool {
        self.current_step_index < self.step_count()
    }

    pub fn apply(&mut self, deltas: impl IntoIterator<Item = StateDelta>) {
        for delta in deltas {
            match delta {
                StateDelta::Curriculum(curriculum) => self.curriculum = Some(curriculum),
                StateDelta::Script(script) => self.current_script = Some(script),
                StateDelta::Storyboard(storyboard) => self.current_storyboard = Some(storyboard),
                StateDelta::AudioMetadata(meta) => self.current_audio_metadata = Some(meta),
                StateDelta::AudioFile(path) => self.audio_file_path = path,
                StateDelta::Code(code) => self.manim_code = Some(code),
                StateDelta::Review(review) => self.review = review,
                StateDelta::CodeReview(review) => self.code_review = review,
                StateDelta::StepVideo(path) => self.mp4_file_path = path,
                StateDelta::StepCompleted => self.current_step_index += 1,
                StateDelta::FinalVideo(path) => self.final_video_path = Some(path),
                StateDelta::ResetStep => self.reset_step(),
            }
        }
    }

    fn reset_step(&mut self) {
        self.current_script = None;
        self.current_storyboard = None;
        self.current_audio_metadata = None;
        self.audio_file_path = None;
        self.manim_code = None;
        self.review = Review::default();
        self.code_review = Review::default();
        self.mp4_file_path = None;
    }
}
