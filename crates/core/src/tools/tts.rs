use super::{AudioSynthesizer, ToolError, locate, run_captured};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

/// Synthesizes speech with a `gtts-cli`-compatible program:
/// `<program> <text> --lang <lang> --output <file>`.
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    program: String,
}

impl CommandSynthesizer {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl AudioSynthesizer for CommandSynthesizer {
    async fn synthesize(&self, text: &str, lang: &str, output: &Path) -> Result<(), ToolError> {
        let program = locate(&self.program)?;
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        run_captured(
            &self.program,
            Command::new(program)
                .arg(text)
                .arg("--lang")
                .arg(lang)
                .arg("--output")
                .arg(output),
        )
        .await?;
        if !output.exists() {
            return Err(ToolError::NoArtifact {
                program: self.program.clone(),
                expected: output.to_path_buf(),
            });
        }
        Ok(())
    }
}
