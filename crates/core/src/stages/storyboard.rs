use super::{Stage, Toolkit, to_prompt_json};
use crate::cache::{CacheExt, CacheStore, keys};
use crate::graph::Node;
use crate::lesson::Storyboard;
use crate::prompts;
use crate::state::{PipelineState, StateDelta};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Turns the current script into a storyboard.
///
/// After a critic rejection the stage revises the previous storyboard with
/// the critic's feedback and overwrites the cached one, so the cache always
/// holds the latest revision.
pub struct StoryboardStage {
    kit: Arc<Toolkit>,
}

impl StoryboardStage {
    pub fn new(kit: Arc<Toolkit>) -> Self {
        Self { kit }
    }
}

#[async_trait]
impl Stage for StoryboardStage {
    fn node(&self) -> Node {
        Node::Storyboard
    }

    async fn run(&self, state: &PipelineState, cache: &mut dyn CacheStore) -> Result<Vec<StateDelta>> {
        let Some(script) = &state.current_script else {
            warn!(index = state.current_step_index, "No script to storyboard");
            return Ok(vec![]);
        };

        let key = keys::storyboard(state.current_step_index);
        let revision = match (&state.current_storyboard, &state.review) {
            (Some(previous), review) if !review.approved && review.iterations > 0 => {
                Some((previous, review.feedback.as_deref().unwrap_or_default()))
            }
            _ => None,
        };

        let user_prompt = match revision {
            Some((previous, feedback)) => {
                info!(step = script.step_id, iteration = state.review.iterations, "Revising storyboard");
                format!(
                    "Revise this storyboard for the explanation below.\n\nEXPLANATION:\n{}\n\nPREVIOUS STORYBOARD:\n{}\n\nREVIEWER FEEDBACK:\n{}",
                    to_prompt_json(script)?,
                    to_prompt_json(previous)?,
                    feedback
                )
            }
            None => {
                if let Some(storyboard) = cache.load::<Storyboard>(&key)? {
                    info!(step = script.step_id, "Using cached storyboard");
                    return Ok(vec![StateDelta::Storyboard(storyboard)]);
                }
                info!(step = script.step_id, "Creating storyboard");
                format!(
                    "Create a storyboard for this explanation:\n{}",
                    to_prompt_json(script)?
                )
            }
        };

        let storyboard: Storyboard = self
            .kit
            .generator
            .generate(self.kit.prompts.get(prompts::STORYBOARD)?, &user_prompt)
            .await
            .with_context(|| format!("Failed to storyboard step {}", script.step_id))?;

        cache.store(&key, &storyboard)?;
        Ok(vec![StateDelta::Storyboard(storyboard)])
    }
}
