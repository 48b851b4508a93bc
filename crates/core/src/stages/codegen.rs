use super::{Stage, Toolkit, to_prompt_json};
use crate::cache::{CacheExt, CacheStore, keys};
use crate::graph::Node;
use crate::lesson::GeneratedCode;
use crate::prompts;
use crate::state::{PipelineState, StateDelta};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Writes the animation scene source for the current step.
///
/// Each pass of the code review loop has its own cache entry. After a
/// rejection the previous source and the reviewer's feedback go back to the
/// backend for a fix.
pub struct CodeGenStage {
    kit: Arc<Toolkit>,
}

impl CodeGenStage {
    pub fn new(kit: Arc<Toolkit>) -> Self {
        Self { kit }
    }
}

#[async_trait]
impl Stage for CodeGenStage {
    fn node(&self) -> Node {
        Node::Manim
    }

    async fn run(&self, state: &PipelineState, cache: &mut dyn CacheStore) -> Result<Vec<StateDelta>> {
        let storyboard = state
            .current_storyboard
            .as_ref()
            .context("Code generation needs a storyboard")?;
        let audio = state
            .current_audio_metadata
            .as_ref()
            .context("Code generation needs audio timing")?;

        let iteration = state.code_review.iterations;
        let key = keys::manim_code(state.current_step_index, iteration);
        if let Some(code) = cache.load::<GeneratedCode>(&key)? {
            info!(scene = storyboard.scene_id, iteration, "Using cached scene code");
            return Ok(vec![StateDelta::Code(code)]);
        }

        let context = format!(
            "STORYBOARD:\n{}\n\nAUDIO TIMING:\n{}",
            to_prompt_json(storyboard)?,
            to_prompt_json(audio)?
        );
        let user_prompt = match (&state.manim_code, &state.code_review.feedback) {
            (Some(previous), Some(feedback)) if iteration > 0 => {
                info!(scene = storyboard.scene_id, iteration, "Fixing scene code from review feedback");
                format!(
                    "Fix the Manim code below.\n\nPREVIOUS CODE:\n```python\n{}\n```\n\nREVIEWER FEEDBACK:\n{}\n\nThe code must still implement:\n{}",
                    previous.code, feedback, context
                )
            }
            _ => {
                info!(scene = storyboard.scene_id, "Generating scene code");
                format!("Generate Manim code for:\n{context}")
            }
        };

        let code: GeneratedCode = self
            .kit
            .codegen
            .generate(self.kit.prompts.get(prompts::CODEGEN)?, &user_prompt)
            .await
            .with_context(|| format!("Failed to generate code for scene {}", storyboard.scene_id))?;

        cache.store(&key, &code)?;
        Ok(vec![StateDelta::Code(code)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::llm_client::MockLLMClient;
    use crate::stages::test_support::{KitBuilder, audio, code, silent_backend, state_at, storyboard};
    use crate::state::Review;
    use tempfile::TempDir;

    fn ready_state() -> PipelineState {
        let mut state = state_at(0, 1);
        state.current_storyboard = Some(storyboard(1));
        state.current_audio_metadata = Some(audio(1));
        state
    }

    #[tokio::test]
    async fn test_first_pass_generates_fresh_code() {
        let dir = TempDir::new().unwrap();
        let reply = serde_json::to_string(&code()).unwrap();
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .withf(|system, user| system.contains("GeneratedScene") && user.starts_with("Generate Manim code"))
            .times(1)
            .returning(move |_, _| Ok(reply.clone()));
        let stage = CodeGenStage::new(KitBuilder::new(dir.path(), mock).build());
        let mut cache = MemoryCache::new();

        let deltas = stage.run(&ready_state(), &mut cache).await.unwrap();

        assert_eq!(deltas, vec![StateDelta::Code(code())]);
        assert!(cache.has("step_0_manim_code_0"));
    }

    #[tokio::test]
    async fn test_rejected_code_is_fixed_under_a_new_key() {
        let dir = TempDir::new().unwrap();
        let mut fixed = code();
        fixed.explanation = "fixed".to_string();
        let reply = serde_json::to_string(&fixed).unwrap();
        let mut mock = MockLLMClient::new();
        mock.expect_complete()
            .withf(|_, user| user.contains("PREVIOUS CODE") && user.contains("missing import"))
            .times(1)
            .returning(move |_, _| Ok(reply.clone()));
        let stage = CodeGenStage::new(KitBuilder::new(dir.path(), mock).build());
        let mut cache = MemoryCache::new();
        cache.store(&keys::manim_code(0, 0), &code()).unwrap();

        let mut state = ready_state();
        state.manim_code = Some(code());
        state.code_review = Review {
            approved: false,
            forced: false,
            feedback: Some("missing import".to_string()),
            iterations: 1,
        };

        let deltas = stage.run(&state, &mut cache).await.unwrap();

        assert_eq!(deltas, vec![StateDelta::Code(fixed.clone())]);
        assert_eq!(cache.load::<GeneratedCode>(&keys::manim_code(0, 1)).unwrap(), Some(fixed));
        assert_eq!(cache.load::<GeneratedCode>(&keys::manim_code(0, 0)).unwrap(), Some(code()));
    }

    #[tokio::test]
    async fn test_cached_iteration_skips_backend() {
        let dir = TempDir::new().unwrap();
        let stage = CodeGenStage::new(KitBuilder::new(dir.path(), silent_backend()).build());
        let mut cache = MemoryCache::new();
        cache.store(&keys::manim_code(0, 0), &code()).unwrap();

        let deltas = stage.run(&ready_state(), &mut cache).await.unwrap();
        assert_eq!(deltas, vec![StateDelta::Code(code())]);
    }
}
