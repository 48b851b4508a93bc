//! Manim scene rendering.

use super::{SceneRenderer, ToolError, locate};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Low quality (854x480 at 15 fps) keeps iteration fast.
const QUALITY_FLAG: &str = "-ql";
const QUALITY_DIR: &str = "480p15";

/// Renders scenes by running the `manim` command line.
///
/// Output lands under `media_dir` following Manim's own layout,
/// `videos/<module>/<quality>/<Scene>.mp4`.
#[derive(Debug, Clone)]
pub struct ManimRenderer {
    program: String,
    ffmpeg: String,
    media_dir: PathBuf,
}

impl ManimRenderer {
    pub fn new(program: impl Into<String>, ffmpeg: impl Into<String>, media_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ffmpeg: ffmpeg.into(),
            media_dir: media_dir.into(),
        }
    }

    /// The path Manim writes `scene` from `source` to.
    pub fn expected_output(&self, source: &Path, scene: &str) -> PathBuf {
        let module = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.media_dir
            .join("videos")
            .join(module)
            .join(QUALITY_DIR)
            .join(format!("{scene}.mp4"))
    }
}

#[async_trait]
impl SceneRenderer for ManimRenderer {
    async fn render(&self, source: &Path, scene: &str) -> Result<PathBuf, ToolError> {
        // Manim needs ffmpeg to encode; fail early with a clear message.
        locate(&self.ffmpeg)?;
        let program = locate(&self.program)?;

        info!(source = %source.display(), scene, "Starting Manim rendering");
        let mut child = Command::new(&program)
            .arg(QUALITY_FLAG)
            .arg("--disable_caching")
            .arg("--media_dir")
            .arg(&self.media_dir)
            .arg(source)
            .arg(scene)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let readers = [
            child.stdout.take().map(|out| forward_lines(out, "MANIM_OUT")),
            child.stderr.take().map(|err| forward_lines(err, "MANIM_ERR")),
        ];
        let status = child.wait().await?;
        for reader in readers.into_iter().flatten() {
            let _ = reader.await;
        }

        if !status.success() {
            return Err(ToolError::Failed {
                program: self.program.clone(),
                status: status.to_string(),
                stderr: "see MANIM_ERR output above".to_string(),
            });
        }
        info!("Manim execution completed successfully");

        let expected = self.expected_output(source, scene);
        if expected.exists() {
            return Ok(expected);
        }

        warn!(expected = %expected.display(), "Rendered video not at the expected path, searching media directory");
        match newest_video(&self.media_dir) {
            Some(found) => {
                info!(path = %found.display(), "Using most recent video in media directory");
                Ok(found)
            }
            None => Err(ToolError::NoArtifact {
                program: self.program.clone(),
                expected,
            }),
        }
    }
}

/// Forwards a child's output pipe to the log, one event per line.
fn forward_lines<R>(pipe: R, label: &'static str) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!("[{label}] {}", line.trim_end());
        }
    })
}

/// The most recently modified `*.mp4` anywhere under `root`.
pub fn newest_video(root: &Path) -> Option<PathBuf> {
    let pattern = root.join("**").join("*.mp4");
    let entries = glob::glob(&pattern.to_string_lossy()).ok()?;
    entries
        .filter_map(Result::ok)
        .filter_map(|path| {
            let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok()?;
            Some((modified, path))
        })
        .max_by_key(|(modified, _)| *modified)
        .map(|(_, path)| path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    #[test]
    fn test_expected_output_follows_manim_layout() {
        let renderer = ManimRenderer::new("manim", "ffmpeg", "/s/media");
        assert_eq!(
            renderer.expected_output(Path::new("/s/code/scene_4.py"), "GeneratedScene"),
            PathBuf::from("/s/media/videos/scene_4/480p15/GeneratedScene.mp4")
        );
    }

    #[test]
    fn test_newest_video_picks_latest_mtime() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("videos").join("a");
        std::fs::create_dir_all(&nested).unwrap();
        let old = nested.join("old.mp4");
        let new = dir.path().join("new.mp4");
        std::fs::write(&old, b"old").unwrap();
        std::fs::write(&new, b"new").unwrap();
        std::fs::write(dir.path().join("ignore.txt"), b"x").unwrap();

        let now = SystemTime::now();
        std::fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(now - Duration::from_secs(3600))
            .unwrap();
        std::fs::File::options()
            .write(true)
            .open(&new)
            .unwrap()
            .set_modified(now)
            .unwrap();

        assert_eq!(newest_video(dir.path()), Some(new));
    }

    #[test]
    fn test_newest_video_on_empty_tree() {
        let dir = TempDir::new().unwrap();
        assert_eq!(newest_video(dir.path()), None);
    }

    #[tokio::test]
    async fn test_missing_ffmpeg_fails_before_spawning() {
        let dir = TempDir::new().unwrap();
        let renderer = ManimRenderer::new("manim", "chalkboard-no-ffmpeg-here", dir.path());
        let err = renderer
            .render(&dir.path().join("scene_1.py"), "GeneratedScene")
            .await
            .unwrap_err();
        match err {
            ToolError::Missing(name) => assert_eq!(name, "chalkboard-no-ffmpeg-here"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[cfg(unix)]
    fn fake_manim(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("fake-manim");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_render_finds_conventional_output() {
        let dir = TempDir::new().unwrap();
        let media = dir.path().join("media");
        // Arguments: -ql --disable_caching --media_dir <media> <source> <scene>
        let program = fake_manim(
            dir.path(),
            "echo rendering; echo warn >&2; out=\"$4/videos/scene_1/480p15\"; mkdir -p \"$out\"; printf video > \"$out/$6.mp4\"",
        );
        let renderer = ManimRenderer::new(program.to_string_lossy(), "sh", &media);

        let path = renderer
            .render(&dir.path().join("scene_1.py"), "GeneratedScene")
            .await
            .unwrap();
        assert_eq!(path, media.join("videos/scene_1/480p15/GeneratedScene.mp4"));
        assert_eq!(std::fs::read(path).unwrap(), b"video");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_render_falls_back_to_newest_video() {
        let dir = TempDir::new().unwrap();
        let media = dir.path().join("media");
        let program = fake_manim(
            dir.path(),
            "mkdir -p \"$4/elsewhere\"; printf video > \"$4/elsewhere/Other.mp4\"",
        );
        let renderer = ManimRenderer::new(program.to_string_lossy(), "sh", &media);

        let path = renderer
            .render(&dir.path().join("scene_1.py"), "GeneratedScene")
            .await
            .unwrap();
        assert_eq!(path, media.join("elsewhere/Other.mp4"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_render_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let program = fake_manim(dir.path(), "echo 'SyntaxError' >&2; exit 1");
        let renderer = ManimRenderer::new(program.to_string_lossy(), "sh", dir.path().join("media"));

        let err = renderer
            .render(&dir.path().join("scene_1.py"), "GeneratedScene")
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Failed { .. }));
    }
}
