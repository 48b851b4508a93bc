use super::{Stage, Toolkit, to_prompt_json};
use crate::cache::{CacheExt, CacheStore, keys};
use crate::graph::Node;
use crate::lesson::TeachingScript;
use crate::prompts;
use crate::state::{PipelineState, StateDelta};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Writes the narration script for the current step.
pub struct TeacherStage {
    kit: Arc<Toolkit>,
}

impl TeacherStage {
    pub fn new(kit: Arc<Toolkit>) -> Self {
        Self { kit }
    }
}

#[async_trait]
impl Stage for TeacherStage {
    fn node(&self) -> Node {
        Node::Teacher
    }

    async fn run(&self, state: &PipelineState, cache: &mut dyn CacheStore) -> Result<Vec<StateDelta>> {
        let index = state.current_step_index;
        let Some(step) = state.curriculum.as_ref().and_then(|c| c.step(index)) else {
            warn!(index, "No curriculum step to teach");
            return Ok(vec![]);
        };

        let key = keys::script(index);
        if let Some(script) = cache.load::<TeachingScript>(&key)? {
            info!(step = step.id, "Using cached teaching script");
            return Ok(vec![StateDelta::Script(script)]);
        }

        info!(step = step.id, title = %step.title, "Writing teaching script");
        let script: TeachingScript = self
            .kit
            .generator
            .generate(
                self.kit.prompts.get(prompts::TEACHER)?,
                &format!("Explain this step:\n{}", to_prompt_json(step)?),
            )
            .await
            .with_context(|| format!("Failed to write the script for step {}", step.id))?;

        cache.store(&key, &script)?;
        Ok(vec![StateDelta::Script(script)])
    }
}
