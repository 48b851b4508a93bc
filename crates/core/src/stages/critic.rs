use super::review::{exhausted, force_approve, judge};
use super::{Stage, Toolkit, to_prompt_json};
use crate::cache::{CacheExt, CacheStore, keys};
use crate::graph::Node;
use crate::lesson::Verdict;
use crate::prompts;
use crate::state::{PipelineState, Review, StateDelta};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Reviews the script and storyboard together.
///
/// Only approvals are reused from the cache: a cached rejection would send
/// a resumed run back through a revision it already made.
pub struct CriticStage {
    kit: Arc<Toolkit>,
}

impl CriticStage {
    pub fn new(kit: Arc<Toolkit>) -> Self {
        Self { kit }
    }
}

#[async_trait]
impl Stage for CriticStage {
    fn node(&self) -> Node {
        Node::Critic
    }

    async fn run(&self, state: &PipelineState, cache: &mut dyn CacheStore) -> Result<Vec<StateDelta>> {
        let key = keys::critic(state.current_step_index);
        if let Some(review) = cache.load::<Review>(&key)?.filter(|r| r.approved) {
            info!(index = state.current_step_index, "Using cached storyboard approval");
            return Ok(vec![StateDelta::Review(review)]);
        }

        let review = if exhausted(&state.review) {
            force_approve(&state.review, "storyboard")
        } else {
            let script = state
                .current_script
                .as_ref()
                .context("Critic needs a teaching script")?;
            let storyboard = state
                .current_storyboard
                .as_ref()
                .context("Critic needs a storyboard")?;
            let verdict: Verdict = self
                .kit
                .generator
                .generate(
                    self.kit.prompts.get(prompts::CRITIC)?,
                    &format!(
                        "Review this pair:\nSCRIPT:\n{}\n\nSTORYBOARD:\n{}",
                        to_prompt_json(script)?,
                        to_prompt_json(storyboard)?
                    ),
                )
                .await
                .context("Failed to review the storyboard")?;
            judge(&state.review, verdict, "storyboard")
        };

        cache.store(&key, &review)?;
        Ok(vec![StateDelta::Review(review)])
    }
}
