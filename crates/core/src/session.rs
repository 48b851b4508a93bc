//! Session Management
//!
//! A session is the on-disk home of one topic: its cache file and the
//! directories the stages write artifacts into. Running the same topic again
//! reopens the same directory, which is how a run resumes.
//!
//! ```text
//! sessions/neural_networks/
//! ├── cache.json
//! ├── audio/    scene_<scene_id>.mp3
//! ├── code/     scene_<scene_id>.py
//! ├── media/    renderer working tree
//! ├── steps/    optional per-stage state snapshots
//! └── videos/   scene_<step_id>.mp4, final_complete_video.mp4
//! ```

use crate::cache::{CacheError, JsonFileCache};
use std::path::{Path, PathBuf};

pub const CACHE_FILE: &str = "cache.json";
pub const FINAL_VIDEO_FILE: &str = "final_complete_video.mp4";

/// Turns a topic into a directory name: alphanumerics, spaces and
/// underscores survive, everything else becomes `_`, spaces become `_`, and
/// the result is lowercased.
pub fn session_name(topic: &str) -> String {
    topic
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .to_lowercase()
}

/// The artifact directories of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    pub root: PathBuf,
    pub audio: PathBuf,
    pub videos: PathBuf,
    pub code: PathBuf,
    pub media: PathBuf,
    pub steps: PathBuf,
}

impl SessionPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            audio: root.join("audio"),
            videos: root.join("videos"),
            code: root.join("code"),
            media: root.join("media"),
            steps: root.join("steps"),
            root,
        }
    }

    pub fn cache_file(&self) -> PathBuf {
        self.root.join(CACHE_FILE)
    }

    pub fn final_video(&self) -> PathBuf {
        self.videos.join(FINAL_VIDEO_FILE)
    }

    /// Where the per-step video for the curriculum step with `step_id` lives.
    pub fn step_video(&self, step_id: i64) -> PathBuf {
        self.videos.join(format!("scene_{step_id}.mp4"))
    }

    pub fn scene_audio(&self, scene_id: i64) -> PathBuf {
        self.audio.join(format!("scene_{scene_id}.mp3"))
    }

    pub fn scene_source(&self, scene_id: i64) -> PathBuf {
        self.code.join(format!("scene_{scene_id}.py"))
    }
}

/// One topic's session: its directory layout plus its cache.
#[derive(Debug)]
pub struct Session {
    topic: String,
    paths: SessionPaths,
    cache: JsonFileCache,
}

impl Session {
    /// Opens (creating if needed) the session for `topic` under `base_dir`.
    pub fn open(base_dir: &Path, topic: &str) -> Result<Self, CacheError> {
        let paths = SessionPaths::new(base_dir.join(session_name(topic)));
        std::fs::create_dir_all(&paths.root).map_err(|source| CacheError::Io {
            path: paths.root.clone(),
            source,
        })?;
        let cache = JsonFileCache::open(paths.cache_file())?;
        Ok(Self {
            topic: topic.to_string(),
            paths,
            cache,
        })
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn dir(&self) -> &Path {
        &self.paths.root
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }

    /// A path inside the session directory.
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.paths.root.join(relative)
    }

    pub fn cache(&self) -> &JsonFileCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut JsonFileCache {
        &mut self.cache
    }
}
