//! System prompts for the generation stages.
//!
//! Every stage has a built-in prompt compiled into the binary. A directory of
//! `<name>.md` files can override any of them by name.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

pub const PLANNER: &str = "planner";
pub const TEACHER: &str = "teacher";
pub const STORYBOARD: &str = "storyboard";
pub const CRITIC: &str = "critic";
pub const AUDIO: &str = "audio";
pub const CODEGEN: &str = "codegen";
pub const CODE_CRITIC: &str = "code_critic";

const BUILTIN: [(&str, &str); 7] = [
    (PLANNER, include_str!("../prompts/planner.md")),
    (TEACHER, include_str!("../prompts/teacher.md")),
    (STORYBOARD, include_str!("../prompts/storyboard.md")),
    (CRITIC, include_str!("../prompts/critic.md")),
    (AUDIO, include_str!("../prompts/audio.md")),
    (CODEGEN, include_str!("../prompts/codegen.md")),
    (CODE_CRITIC, include_str!("../prompts/code_critic.md")),
];

#[derive(Debug, Clone)]
pub struct Prompts {
    templates: HashMap<String, String>,
}

impl Default for Prompts {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Prompts {
    pub fn builtin() -> Self {
        let templates = BUILTIN
            .iter()
            .map(|(name, text)| (name.to_string(), text.to_string()))
            .collect();
        Self { templates }
    }

    /// Replaces built-in prompts with the `*.md` files found in `dir`, keyed
    /// by file stem. Files that match no stage are kept but never used.
    pub fn with_overrides(mut self, dir: &Path) -> Result<Self> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read prompts directory {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("md") {
                let prompt_key = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .context("Could not get file stem")?
                    .to_string();
                let content = std::fs::read_to_string(&path)?;
                info!(prompt = %prompt_key, "Using prompt override");
                self.templates.insert(prompt_key, content);
            }
        }
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Result<&str> {
        self.templates
            .get(name)
            .map(String::as_str)
            .with_context(|| format!("Missing prompt template: '{name}'"))
    }
}
