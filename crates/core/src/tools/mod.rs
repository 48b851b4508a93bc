//! External Tool Adapters
//!
//! Thin wrappers around the programs the pipeline shells out to: the scene
//! renderer, the speech synthesizer and the video assembler. Each capability
//! is a trait so stages can be exercised without the real programs.

pub mod ffmpeg;
pub mod manim;
pub mod tts;

pub use ffmpeg::FfmpegAssembler;
pub use manim::ManimRenderer;
pub use tts::CommandSynthesizer;

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command;

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("required program '{0}' was not found on PATH")]
    Missing(String),
    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("{program} finished but produced no output at {expected}")]
    NoArtifact { program: String, expected: PathBuf },
    #[error("I/O error while running tools: {0}")]
    Io(#[from] std::io::Error),
}

/// Renders a scene source file into a video.
#[async_trait]
pub trait SceneRenderer: Send + Sync {
    /// Renders `scene` from `source`, returning the path of the produced video.
    async fn render(&self, source: &Path, scene: &str) -> Result<PathBuf, ToolError>;
}

/// Turns narration text into an audio file.
#[async_trait]
pub trait AudioSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, lang: &str, output: &Path) -> Result<(), ToolError>;
}

/// Combines media files.
#[async_trait]
pub trait VideoAssembler: Send + Sync {
    /// Lays `audio` under `video`, writing the result to `output`.
    async fn merge_audio(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), ToolError>;

    /// Joins `inputs` in order into `output`, without re-encoding where possible.
    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ToolError>;
}

/// Resolves `program` against PATH (or as a path, if it contains a separator).
pub fn locate(program: &str) -> Result<PathBuf, ToolError> {
    which::which(program).map_err(|_| ToolError::Missing(program.to_string()))
}

/// Runs a command to completion, capturing its output, and fails on a
/// non-zero exit.
pub(crate) async fn run_captured(program: &str, command: &mut Command) -> Result<Output, ToolError> {
    let output = command.output().await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ToolError::Missing(program.to_string()),
        _ => ToolError::Io(e),
    })?;
    if !output.status.success() {
        return Err(ToolError::Failed {
            program: program.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}
