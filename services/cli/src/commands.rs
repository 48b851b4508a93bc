use crate::backend;
use crate::config::Config;
use anyhow::{Context, Result};
use chalkboard_core::prompts::Prompts;
use chalkboard_core::tools::locate;
use chalkboard_core::{CacheStore, PipelineState, Session, StepRecorder, Workflow};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// A session wired to its workflow, ready to run.
pub struct Pipeline {
    session: Session,
    workflow: Workflow,
}

impl Pipeline {
    /// Opens the topic's session and builds the workflow for it. Errors here
    /// are setup problems, not workflow failures.
    pub fn prepare(config: &Config, topic: &str) -> Result<Self> {
        let session = Session::open(&config.sessions_dir, topic)
            .with_context(|| format!("Failed to open session for '{topic}'"))?;
        info!(
            topic,
            dir = %session.dir().display(),
            cache = %session.cache().path().display(),
            "Session opened"
        );

        let prompts = match &config.prompts_path {
            Some(dir) => Prompts::builtin().with_overrides(dir)?,
            None => Prompts::builtin(),
        };
        let toolkit = backend::toolkit(config, session.paths().clone(), prompts)?;
        let mut workflow = Workflow::standard(Arc::new(toolkit))?;
        if config.record_steps {
            info!(dir = %session.paths().steps.display(), "Recording state snapshots");
            workflow = workflow.with_recorder(StepRecorder::new(session.paths().steps.clone()));
        }
        Ok(Self { session, workflow })
    }

    /// Resumes from the session cache and runs to the end.
    pub async fn run(mut self) -> Result<PipelineState> {
        let state = PipelineState::resume(self.session.topic(), self.session.cache())
            .context("Failed to read session cache")?;
        if state.current_step_index > 0 {
            info!(
                step = state.current_step_index,
                steps = state.step_count(),
                "Resuming from cached progress"
            );
        }
        self.workflow.run(state, self.session.cache_mut()).await
    }
}

/// Removes `key`, or every key, from the topic's cache.
pub fn clear_cache(sessions_dir: &Path, topic: &str, key: Option<&str>) -> Result<()> {
    let mut session = Session::open(sessions_dir, topic)
        .with_context(|| format!("Failed to open session for '{topic}'"))?;
    let cache = session.cache_mut();
    match key {
        Some(key) => {
            if cache.remove(key)? {
                info!(key, "Removed cache entry");
            } else {
                warn!(key, "No such cache entry");
            }
        }
        None => {
            cache.clear()?;
            info!(topic, "Cleared cache");
        }
    }
    Ok(())
}

/// Logs whether each external program is on PATH. Returns the missing ones.
pub fn check_env(config: &Config) -> Vec<String> {
    let mut programs = vec![config.ffmpeg_bin.as_str(), config.manim_bin.as_str()];
    if let Some(tts) = &config.tts_bin {
        programs.push(tts.as_str());
    }

    let mut missing = Vec::new();
    for program in programs {
        match locate(program) {
            Ok(path) => info!(program, path = %path.display(), "Found"),
            Err(e) => {
                warn!("{e}");
                missing.push(program.to_string());
            }
        }
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;
    use chalkboard_core::CacheExt;
    use tempfile::TempDir;

    fn seeded(base: &Path) {
        let mut session = Session::open(base, "Neural Networks").unwrap();
        let cache = session.cache_mut();
        cache.store("curriculum", &serde_json::json!({"topic": "t", "steps": []})).unwrap();
        cache.store("step_0_critic", &serde_json::json!({"approved": false})).unwrap();
    }

    #[test]
    fn test_clear_single_key() {
        let base = TempDir::new().unwrap();
        seeded(base.path());

        clear_cache(base.path(), "Neural Networks", Some("step_0_critic")).unwrap();

        let session = Session::open(base.path(), "Neural Networks").unwrap();
        assert!(session.cache().has("curriculum"));
        assert!(!session.cache().has("step_0_critic"));
    }

    #[test]
    fn test_clear_everything() {
        let base = TempDir::new().unwrap();
        seeded(base.path());

        clear_cache(base.path(), "Neural Networks", None).unwrap();

        let session = Session::open(base.path(), "Neural Networks").unwrap();
        assert!(session.cache().is_empty());
    }

    #[test]
    fn test_clear_unknown_key_is_not_an_error() {
        let base = TempDir::new().unwrap();
        clear_cache(base.path(), "Neural Networks", Some("nope")).unwrap();
    }
}
