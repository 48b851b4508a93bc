use super::{Stage, Toolkit, to_prompt_json};
use crate::cache::{CacheExt, CacheStore, keys};
use crate::graph::Node;
use crate::lesson::{AudioMetadata, TimelineIssue};
use crate::prompts;
use crate::state::{PipelineState, StateDelta};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Plans narration timing and synthesizes the narration to a file.
///
/// Synthesis is best effort. When it is unavailable or fails the step goes
/// on without an audio track.
pub struct AudioStage {
    kit: Arc<Toolkit>,
}

impl AudioStage {
    pub fn new(kit: Arc<Toolkit>) -> Self {
        Self { kit }
    }

    async fn synthesize(&self, narration: &str, scene_id: i64) -> Option<PathBuf> {
        let Some(synthesizer) = &self.kit.synthesizer else {
            warn!("No speech synthesizer configured, continuing without audio");
            return None;
        };
        let output = self.kit.paths.scene_audio(scene_id);
        match synthesizer
            .synthesize(narration, &self.kit.tts_lang, &output)
            .await
        {
            Ok(()) => {
                info!(path = %output.display(), "Narration audio generated");
                Some(output)
            }
            Err(e) => {
                warn!(error = %e, "Speech synthesis failed, continuing without audio");
                None
            }
        }
    }
}

#[async_trait]
impl Stage for AudioStage {
    fn node(&self) -> Node {
        Node::Audio
    }

    async fn run(&self, state: &PipelineState, cache: &mut dyn CacheStore) -> Result<Vec<StateDelta>> {
        let script = state
            .current_script
            .as_ref()
            .context("Audio planning needs a teaching script")?;
        let storyboard = state
            .current_storyboard
            .as_ref()
            .context("Audio planning needs a storyboard")?;

        let key = keys::audio_metadata(state.current_step_index);
        let metadata = match cache.load::<AudioMetadata>(&key)? {
            Some(metadata) => {
                info!(scene = storyboard.scene_id, "Using cached audio timing");
                metadata
            }
            None => {
                info!(scene = storyboard.scene_id, "Planning audio timing");
                let metadata: AudioMetadata = self
                    .kit
                    .generator
                    .generate(
                        self.kit.prompts.get(prompts::AUDIO)?,
                        &format!(
                            "Generate audio timing for:\nNARRATION:\n{}\n\nVISUALS:\n{}",
                            script.narration,
                            to_prompt_json(storyboard)?
                        ),
                    )
                    .await
                    .context("Failed to plan audio timing")?;
                cache.store(&key, &metadata)?;
                metadata
            }
        };

        for issue in metadata.validate_timeline() {
            match issue {
                TimelineIssue::StartsEarly { index } => {
                    warn!(segment = index, "Audio segment starts before the previous one")
                }
                TimelineIssue::Overruns { index, end } => warn!(
                    segment = index,
                    end,
                    total = metadata.total_duration,
                    "Audio segment runs past the total duration"
                ),
            }
        }

        let audio_file = self.synthesize(&script.narration, storyboard.scene_id).await;
        Ok(vec![
            StateDelta::AudioMetadata(metadata),
            StateDelta::AudioFile(audio_file),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::llm_client::MockLLMClient;
    use crate::stages::test_support::{
        FakeSynthesizer, KitBuilder, audio, script, silent_backend, state_at, storyboard,
    };
    use tempfile::TempDir;

    fn ready_state() -> PipelineState {
        let mut state = state_at(0, 1);
        state.current_script = Some(script(1));
        state.current_storyboard = Some(storyboard(7));
        state
    }

    #[tokio::test]
    async fn test_plans_timing_and_synthesizes() {
        let dir = TempDir::new().unwrap();
        let reply = serde_json::to_string(&audio(7)).unwrap();
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .withf(|_, user| user.contains("weighted inputs"))
            .times(1)
            .returning(move |_, _| Ok(reply.clone()));
        let stage = AudioStage::new(KitBuilder::new(dir.path(), mock).build());
        let mut cache = MemoryCache::new();

        let deltas = stage.run(&ready_state(), &mut cache).await.unwrap();

        let expected_file = dir.path().join("audio").join("scene_7.mp3");
        assert_eq!(
            deltas,
            vec![
                StateDelta::AudioMetadata(audio(7)),
                StateDelta::AudioFile(Some(expected_file.clone())),
            ]
        );
        assert!(expected_file.exists());
        assert!(cache.has("step_0_audio_metadata"));
    }

    #[tokio::test]
    async fn test_synthesis_failure_degrades_to_no_audio() {
        let dir = TempDir::new().unwrap();
        let mut kit = KitBuilder::new(dir.path(), silent_backend());
        kit.synthesizer = Some(Arc::new(FakeSynthesizer { fail: true }));
        let stage = AudioStage::new(kit.build());
        let mut cache = MemoryCache::new();
        cache.store(&keys::audio_metadata(0), &audio(7)).unwrap();

        let deltas = stage.run(&ready_state(), &mut cache).await.unwrap();
        assert_eq!(deltas[1], StateDelta::AudioFile(None));
    }

    #[tokio::test]
    async fn test_no_synthesizer_degrades_to_no_audio() {
        let dir = TempDir::new().unwrap();
        let mut kit = KitBuilder::new(dir.path(), silent_backend());
        kit.synthesizer = None;
        let stage = AudioStage::new(kit.build());
        let mut cache = MemoryCache::new();
        cache.store(&keys::audio_metadata(0), &audio(7)).unwrap();

        let deltas = stage.run(&ready_state(), &mut cache).await.unwrap();
        assert_eq!(deltas[0], StateDelta::AudioMetadata(audio(7)));
        assert_eq!(deltas[1], StateDelta::AudioFile(None));
    }

    #[tokio::test]
    async fn test_inconsistent_timeline_is_accepted() {
        let dir = TempDir::new().unwrap();
        let stage = AudioStage::new(KitBuilder::new(dir.path(), silent_backend()).build());
        let mut overrun = audio(7);
        overrun.total_duration = 1.0;
        let mut cache = MemoryCache::new();
        cache.store(&keys::audio_metadata(0), &overrun).unwrap();

        let deltas = stage.run(&ready_state(), &mut cache).await.unwrap();
        assert_eq!(deltas[0], StateDelta::AudioMetadata(overrun));
    }
}
