use super::{Stage, Toolkit};
use crate::cache::{CacheExt, CacheStore, keys};
use crate::graph::Node;
use crate::state::{PipelineState, StateDelta};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Scene class every generated source must define.
pub const SCENE_CLASS: &str = "GeneratedScene";

/// Renders the approved code, lays the narration over it and publishes the
/// step's video under the session's `videos/` directory.
///
/// A render failure is not an error: the stage reports no video and the
/// step index stays put, so the next run retries this step.
pub struct RendererStage {
    kit: Arc<Toolkit>,
}

impl RendererStage {
    pub fn new(kit: Arc<Toolkit>) -> Self {
        Self { kit }
    }

    /// Marks the step done in both the cache and the state.
    fn complete(cache: &mut dyn CacheStore, index: usize, video: PathBuf) -> Result<Vec<StateDelta>> {
        cache.store(&keys::mp4_file_path(index), &video)?;
        cache.store(keys::CURRENT_STEP_INDEX, &(index + 1))?;
        Ok(vec![
            StateDelta::StepVideo(Some(video)),
            StateDelta::StepCompleted,
        ])
    }

    async fn produce(&self, state: &PipelineState, step_id: i64) -> Result<PathBuf> {
        let code = state
            .manim_code
            .as_ref()
            .context("Rendering needs generated code")?;
        let storyboard = state
            .current_storyboard
            .as_ref()
            .context("Rendering needs a storyboard")?;

        let source = self.kit.paths.scene_source(storyboard.scene_id);
        if let Some(parent) = source.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&source, &code.code)
            .await
            .with_context(|| format!("Failed to write {}", source.display()))?;

        let rendered = self.kit.renderer.render(&source, SCENE_CLASS).await?;
        info!(video = %rendered.display(), "Scene rendered");

        let video = match &state.audio_file_path {
            Some(audio) if audio.exists() => self.merge(&rendered, audio).await,
            _ => rendered,
        };

        let target = self.kit.paths.step_video(step_id);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        // The concatenator only picks up videos published under `videos/`.
        tokio::fs::copy(&video, &target).await.with_context(|| {
            format!("Failed to publish {} to {}", video.display(), target.display())
        })?;
        Ok(target)
    }

    /// Lays the narration over `video`. Falls back to the silent video.
    async fn merge(&self, video: &Path, audio: &Path) -> PathBuf {
        let stem = video
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| SCENE_CLASS.to_string());
        let merged = video.with_file_name(format!("{stem}_merged.mp4"));
        match self.kit.assembler.merge_audio(video, audio, &merged).await {
            Ok(()) => merged,
            Err(e) => {
                warn!(error = %e, "Failed to merge narration, using the silent video");
                video.to_path_buf()
            }
        }
    }
}

#[async_trait]
impl Stage for RendererStage {
    fn node(&self) -> Node {
        Node::Renderer
    }

    async fn run(&self, state: &PipelineState, cache: &mut dyn CacheStore) -> Result<Vec<StateDelta>> {
        let index = state.current_step_index;
        let step_id = state
            .curriculum
            .as_ref()
            .and_then(|c| c.step(index))
            .map(|step| step.id)
            .context("Rendering needs a curriculum step")?;

        let key = keys::mp4_file_path(index);
        if let Some(video) = cache.load::<PathBuf>(&key)?.filter(|p| p.exists()) {
            info!(step = step_id, video = %video.display(), "Using cached step video");
            return Self::complete(cache, index, video);
        }

        match self.produce(state, step_id).await {
            Ok(video) => {
                info!(step = step_id, video = %video.display(), "Step video ready");
                Self::complete(cache, index, video)
            }
            Err(e) => {
                error!(step = step_id, "Rendering failed: {e:#}");
                Ok(vec![StateDelta::StepVideo(None)])
            }
        }
    }
}
