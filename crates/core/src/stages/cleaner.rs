use super::Stage;
use crate::cache::CacheStore;
use crate::graph::Node;
use crate::state::{PipelineState, StateDelta};
use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// Clears the step-scoped state before the next step starts.
pub struct CleanerStage;

#[async_trait]
impl Stage for CleanerStage {
    fn node(&self) -> Node {
        Node::Cleaner
    }

    async fn run(&self, state: &PipelineState, _cache: &mut dyn CacheStore) -> Result<Vec<StateDelta>> {
        info!(next_step = state.current_step_index, "Clearing step state");
        Ok(vec![StateDelta::ResetStep])
    }
}
