//! Per-step lesson records.
//!
//! These are the structured records the text-generation backend produces for
//! one curriculum step: the narration script, the visual storyboard, the
//! audio timing plan, the generated animation code and the reviewers'
//! verdicts. Every record derives `JsonSchema` so its schema can be handed to
//! the backend alongside the prompt.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Narration for one curriculum step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TeachingScript {
    pub step_id: i64,
    pub title: String,
    pub narration: String,
    pub key_points: Vec<String>,
    pub analogy: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Dot,
    Line,
    Arrow,
    Text,
    Axes,
    Surface,
    Group,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Position {
    Left,
    Right,
    Center,
    Top,
    Bottom,
}

/// Something drawn on screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VisualObject {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ObjectKind,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub position: Option<Position>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    FadeIn,
    Move,
    Transform,
    Highlight,
    FadeOut,
}

/// One beat of the animation, applied to a visual object by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AnimationStep {
    pub action: Action,
    pub target: String,
    pub description: String,
}

/// The visual plan for one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Storyboard {
    pub scene_id: i64,
    pub title: String,
    pub objects: Vec<VisualObject>,
    pub animations: Vec<AnimationStep>,
    /// Scene length in seconds.
    pub duration: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VoiceStyle {
    Calm,
    Explanatory,
    Enthusiastic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AudioSegment {
    pub text: String,
    pub start_time: f64,
    pub duration: f64,
}

/// Timed narration segments for a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AudioMetadata {
    pub scene_id: i64,
    pub voice_style: VoiceStyle,
    pub segments: Vec<AudioSegment>,
    pub total_duration: f64,
}

/// A violation of the segment timing rules.
#[derive(Debug, Clone, PartialEq)]
pub enum TimelineIssue {
    /// Segment `index` starts before the segment preceding it.
    StartsEarly { index: usize },
    /// Segment `index` runs past `total_duration`.
    Overruns { index: usize, end: f64 },
}

const TIMELINE_EPSILON: f64 = 1e-6;

impl AudioMetadata {
    /// Checks that start times never decrease and that every segment ends
    /// within the total duration.
    pub fn validate_timeline(&self) -> Vec<TimelineIssue> {
        let mut issues = Vec::new();
        let mut previous_start = f64::NEG_INFINITY;
        for (index, segment) in self.segments.iter().enumerate() {
            if segment.start_time + TIMELINE_EPSILON < previous_start {
                issues.push(TimelineIssue::StartsEarly { index });
            }
            let end = segment.start_time + segment.duration;
            if end > self.total_duration + TIMELINE_EPSILON {
                issues.push(TimelineIssue::Overruns { index, end });
            }
            previous_start = segment.start_time;
        }
        issues
    }
}

/// Source text for one rendering unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct GeneratedCode {
    /// The full scene source, imports included.
    pub code: String,
    pub explanation: String,
}

/// A reviewer's answer: accept the artifact, or reject it with feedback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Verdict {
    pub approved: bool,
    pub feedback: String,
}
