//! FFmpeg wrapper for merging and concatenating videos.

use super::{ToolError, VideoAssembler, locate, run_captured};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::info;

/// Name of the concat demuxer's input list, written next to the output.
pub const CONCAT_LIST_FILE: &str = "files_to_concat.txt";

#[derive(Debug, Clone)]
pub struct FfmpegAssembler {
    program: String,
}

impl FfmpegAssembler {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for FfmpegAssembler {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

/// Renders the concat demuxer's list. Files inside `dir` are listed by
/// name (ffmpeg runs with `dir` as its working directory); anything else by
/// absolute path.
pub fn concat_list(inputs: &[PathBuf], dir: &Path) -> String {
    inputs
        .iter()
        .map(|input| {
            let entry = match (input.parent(), input.file_name()) {
                (Some(parent), Some(name)) if parent == dir => name.to_string_lossy().into_owned(),
                _ => std::path::absolute(input)
                    .unwrap_or_else(|_| input.clone())
                    .to_string_lossy()
                    .into_owned(),
            };
            format!("file '{}'\n", entry.replace('\'', "'\\''"))
        })
        .collect()
}

#[async_trait]
impl VideoAssembler for FfmpegAssembler {
    async fn merge_audio(&self, video: &Path, audio: &Path, output: &Path) -> Result<(), ToolError> {
        let program = locate(&self.program)?;
        run_captured(
            &self.program,
            Command::new(program)
                .arg("-y")
                .arg("-i")
                .arg(video)
                .arg("-i")
                .arg(audio)
                .args(["-c:v", "copy", "-c:a", "aac", "-shortest"])
                .arg(output),
        )
        .await?;
        info!(output = %output.display(), "Merged audio into video");
        Ok(())
    }

    async fn concat(&self, inputs: &[PathBuf], output: &Path) -> Result<(), ToolError> {
        let program = locate(&self.program)?;
        let dir = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let output_name = output.file_name().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} has no file name", output.display()),
            )
        })?;
        tokio::fs::write(dir.join(CONCAT_LIST_FILE), concat_list(inputs, &dir)).await?;

        // Both paths are relative to `dir`, the process's working directory.
        run_captured(
            &self.program,
            Command::new(program)
                .current_dir(&dir)
                .args(["-y", "-f", "concat", "-safe", "0", "-i", CONCAT_LIST_FILE])
                .args(["-c", "copy"])
                .arg(output_name),
        )
        .await?;
        info!(inputs = inputs.len(), output = %output.display(), "Concatenated videos");
        Ok(())
    }
}
