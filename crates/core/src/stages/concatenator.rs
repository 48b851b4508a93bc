use super::{Stage, Toolkit};
use crate::cache::CacheStore;
use crate::graph::Node;
use crate::state::{PipelineState, StateDelta};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Joins the per-step videos, in curriculum order, into the final video.
///
/// Steps without a video are skipped with a warning; the final video covers
/// whatever was rendered.
pub struct ConcatenatorStage {
    kit: Arc<Toolkit>,
}

impl ConcatenatorStage {
    pub fn new(kit: Arc<Toolkit>) -> Self {
        Self { kit }
    }
}

#[async_trait]
impl Stage for ConcatenatorStage {
    fn node(&self) -> Node {
        Node::Concatenator
    }

    async fn run(&self, state: &PipelineState, _cache: &mut dyn CacheStore) -> Result<Vec<StateDelta>> {
        let Some(curriculum) = &state.curriculum else {
            warn!("No curriculum, nothing to concatenate");
            return Ok(vec![]);
        };

        let mut inputs = Vec::with_capacity(curriculum.len());
        for step in &curriculum.steps {
            let video = self.kit.paths.step_video(step.id);
            if video.exists() {
                inputs.push(video);
            } else {
                warn!(step = step.id, path = %video.display(), "Step video missing, skipping");
            }
        }
        if inputs.is_empty() {
            warn!("No step videos found, skipping concatenation");
            return Ok(vec![]);
        }

        let output = self.kit.paths.final_video();
        info!(videos = inputs.len(), "Concatenating step videos");
        match self.kit.assembler.concat(&inputs, &output).await {
            Ok(()) => {
                info!(path = %output.display(), "Final video created");
                Ok(vec![StateDelta::FinalVideo(output)])
            }
            Err(e) => {
                error!(error = %e, "Concatenation failed");
                Ok(vec![])
            }
        }
    }
}
