use super::{Stage, Toolkit};
use crate::cache::{CacheExt, CacheStore, keys};
use crate::curriculum::Curriculum;
use crate::graph::Node;
use crate::prompts;
use crate::state::{PipelineState, StateDelta};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Breaks the topic into a curriculum. Runs once per topic.
pub struct PlannerStage {
    kit: Arc<Toolkit>,
}

impl PlannerStage {
    pub fn new(kit: Arc<Toolkit>) -> Self {
        Self { kit }
    }
}

#[async_trait]
impl Stage for PlannerStage {
    fn node(&self) -> Node {
        Node::Planner
    }

    async fn run(&self, state: &PipelineState, cache: &mut dyn CacheStore) -> Result<Vec<StateDelta>> {
        if let Some(curriculum) = cache.load::<Curriculum>(keys::CURRICULUM)? {
            info!(steps = curriculum.len(), "Using cached curriculum");
            return Ok(vec![StateDelta::Curriculum(curriculum)]);
        }

        info!(topic = %state.topic, "Planning curriculum");
        let curriculum: Curriculum = self
            .kit
            .generator
            .generate(
                self.kit.prompts.get(prompts::PLANNER)?,
                &format!("Create a curriculum for the topic: {}", state.topic),
            )
            .await
            .context("Failed to plan the curriculum")?;
        info!(steps = curriculum.len(), "Curriculum planned");

        cache.store(keys::CURRICULUM, &curriculum)?;
        Ok(vec![StateDelta::Curriculum(curriculum)])
    }
}
