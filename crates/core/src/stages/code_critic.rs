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

/// Reviews the generated scene source against its storyboard.
pub struct CodeCriticStage {
    kit: Arc<Toolkit>,
}

impl CodeCriticStage {
    pub fn new(kit: Arc<Toolkit>) -> Self {
        Self { kit }
    }
}

#[async_trait]
impl Stage for CodeCriticStage {
    fn node(&self) -> Node {
        Node::CodeCritic
    }

    async fn run(&self, state: &PipelineState, cache: &mut dyn CacheStore) -> Result<Vec<StateDelta>> {
        let iteration = state.code_review.iterations;
        // Keyed by iteration, so a cached verdict always belongs to the code
        // generated on the same pass.
        let key = keys::code_critic(state.current_step_index, iteration);
        if let Some(review) = cache.load::<Review>(&key)? {
            info!(iteration, approved = review.approved, "Using cached code review");
            return Ok(vec![StateDelta::CodeReview(review)]);
        }

        let review = if exhausted(&state.code_review) {
            force_approve(&state.code_review, "code")
        } else {
            let code = state
                .manim_code
                .as_ref()
                .context("Code review needs generated code")?;
            let storyboard = state
                .current_storyboard
                .as_ref()
                .context("Code review needs a storyboard")?;
            let verdict: Verdict = self
                .kit
                .code_review
                .generate(
                    self.kit.prompts.get(prompts::CODE_CRITIC)?,
                    &format!(
                        "Review this Manim code:\n```python\n{}\n```\n\nSTORYBOARD:\n{}",
                        code.code,
                        to_prompt_json(storyboard)?
                    ),
                )
                .await
                .context("Failed to review the scene code")?;
            judge(&state.code_review, verdict, "code")
        };

        cache.store(&key, &review)?;
        Ok(vec![StateDelta::CodeReview(review)])
    }
}
