//! Workflow Graph
//!
//! The pipeline is a finite-state machine over stage nodes. Routing is a
//! single ordered transition table: for the node that just ran, the first
//! row whose guard holds for the current state picks the next node. The
//! driver loop runs one stage at a time, applies its deltas, and follows the
//! table until it reaches [`Node::End`].
//!
//! ```text
//! planner ─┬─► teacher ─► storyboard ─► critic ─┬─► audio ─► manim ─► code_critic ─┬─► renderer ─┬─► cleaner ─► teacher
//!          │                  ▲                 │             ▲                     │             │
//!          │                  └──── rejected ───┘             └────── rejected ─────┘             │
//!          └────────────────────────────────────────────────────────────────────────────────────┴─► concatenator ─► end
//! ```

use crate::cache::CacheStore;
use crate::stages::{self, Stage, Toolkit};
use crate::state::PipelineState;
use anyhow::{Context, Result, bail};
use chrono::Local;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Node {
    Planner,
    Teacher,
    Storyboard,
    Critic,
    Audio,
    Manim,
    CodeCritic,
    Renderer,
    Cleaner,
    Concatenator,
    End,
}

impl Node {
    pub fn as_str(&self) -> &'static str {
        match self {
            Node::Planner => "planner",
            Node::Teacher => "teacher",
            Node::Storyboard => "storyboard",
            Node::Critic => "critic",
            Node::Audio => "audio",
            Node::Manim => "manim",
            Node::CodeCritic => "code_critic",
            Node::Renderer => "renderer",
            Node::Cleaner => "cleaner",
            Node::Concatenator => "concatenator",
            Node::End => "end",
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A predicate over the working state. Guards read state fields only, never
/// the cache, so a forced approval releases its loop on the same pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    Always,
    CurriculumDone,
    Approved,
    CodeApproved,
    VideoMissing,
    StepsRemaining,
}

impl Guard {
    pub fn holds(&self, state: &PipelineState) -> bool {
        match self {
            Guard::Always => true,
            Guard::CurriculumDone => {
                state.curriculum.is_some() && state.current_step_index >= state.step_count()
            }
            Guard::Approved => state.review.approved,
            Guard::CodeApproved => state.code_review.approved,
            Guard::VideoMissing => state.mp4_file_path.is_none(),
            Guard::StepsRemaining => state.steps_remaining(),
        }
    }
}

/// `(from, guard, to)` rows, tried in order for each `from`.
pub const TRANSITIONS: &[(Node, Guard, Node)] = &[
    (Node::Planner, Guard::CurriculumDone, Node::Concatenator),
    (Node::Planner, Guard::Always, Node::Teacher),
    (Node::Teacher, Guard::Always, Node::Storyboard),
    (Node::Storyboard, Guard::Always, Node::Critic),
    (Node::Critic, Guard::Approved, Node::Audio),
    (Node::Critic, Guard::Always, Node::Storyboard),
    (Node::Audio, Guard::Always, Node::Manim),
    (Node::Manim, Guard::Always, Node::CodeCritic),
    (Node::CodeCritic, Guard::CodeApproved, Node::Renderer),
    (Node::CodeCritic, Guard::Always, Node::Manim),
    // A failed render ends the run; the next run resumes at this step.
    (Node::Renderer, Guard::VideoMissing, Node::Concatenator),
    (Node::Renderer, Guard::StepsRemaining, Node::Cleaner),
    (Node::Renderer, Guard::Always, Node::Concatenator),
    (Node::Cleaner, Guard::Always, Node::Teacher),
    (Node::Concatenator, Guard::Always, Node::End),
];

/// Picks the node that follows `from`.
pub fn next_node(from: Node, state: &PipelineState) -> Node {
    TRANSITIONS
        .iter()
        .find(|(node, guard, _)| *node == from && guard.holds(state))
        .map_or(Node::End, |(_, _, to)| *to)
}

/// Writes a JSON snapshot of the state after every stage.
#[derive(Debug, Clone)]
pub struct StepRecorder {
    dir: PathBuf,
}

impl StepRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Writes `step_<NN>_<stage>.json`, returning its path.
    pub fn record(&self, number: usize, node: Node, state: &PipelineState) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let mut snapshot = serde_json::to_value(state)?;
        if let Value::Object(map) = &mut snapshot {
            map.insert(
                "_metadata".to_string(),
                json!({
                    "step_name": node.as_str(),
                    "step_number": number,
                    "timestamp": Local::now().to_rfc3339(),
                }),
            );
        }
        let path = self.dir.join(format!("step_{number:02}_{node}.json"));
        std::fs::write(&path, serde_json::to_string_pretty(&snapshot)?)?;
        Ok(path)
    }
}

/// The compiled workflow: one stage per node plus the transition table.
pub struct Workflow {
    stages: HashMap<Node, Box<dyn Stage>>,
    recorder: Option<StepRecorder>,
}

impl Workflow {
    /// Builds a workflow from explicit stages. Every node except `End` must
    /// be covered exactly once.
    pub fn new(stage_list: Vec<Box<dyn Stage>>) -> Result<Self> {
        let mut stages = HashMap::new();
        for stage in stage_list {
            let node = stage.node();
            if stages.insert(node, stage).is_some() {
                bail!("Duplicate stage for node '{node}'");
            }
        }
        for (from, _, to) in TRANSITIONS {
            for node in [from, to] {
                if *node != Node::End && !stages.contains_key(node) {
                    bail!("No stage registered for node '{node}'");
                }
            }
        }
        Ok(Self {
            stages,
            recorder: None,
        })
    }

    /// The standard pipeline wired to `toolkit`.
    pub fn standard(toolkit: Arc<Toolkit>) -> Result<Self> {
        Self::new(stages::standard(toolkit))
    }

    pub fn with_recorder(mut self, recorder: StepRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Runs from the planner until the terminal node.
    pub async fn run(&self, mut state: PipelineState, cache: &mut dyn CacheStore) -> Result<PipelineState> {
        let mut node = Node::Planner;
        let mut executed = 0usize;
        while node != Node::End {
            let stage = self
                .stages
                .get(&node)
                .with_context(|| format!("No stage registered for node '{node}'"))?;
            debug!(%node, step = state.current_step_index, "Entering stage");
            let deltas = stage
                .run(&state, cache)
                .await
                .with_context(|| format!("Stage '{node}' failed"))?;
            state.apply(deltas);
            executed += 1;

            if let Some(recorder) = &self.recorder {
                if let Err(e) = recorder.record(executed, node, &state) {
                    warn!(error = %e, "Failed to record state snapshot");
                }
            }

            let next = next_node(node, &state);
            match (node, next) {
                (Node::Planner, Node::Concatenator) => {
                    info!("All steps already completed, skipping to concatenation")
                }
                (Node::Renderer, Node::Cleaner) => {
                    info!(step = state.current_step_index, "Looping to next step")
                }
                (Node::Renderer, Node::Concatenator) if state.mp4_file_path.is_none() => {
                    warn!(step = state.current_step_index, "Rendering failed, concatenating what exists")
                }
                (Node::Renderer, Node::Concatenator) => info!("All steps completed, concatenating"),
                _ => {}
            }
            node = next;
        }
        info!(stages = executed, "Workflow finished");
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::curriculum::{Curriculum, Difficulty, Step};
    use crate::state::{Review, StateDelta};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    fn curriculum(steps: usize) -> Curriculum {
        Curriculum {
            topic: "t".to_string(),
            steps: (1..=steps as i64)
                .map(|id| Step {
                    id,
                    title: format!("s{id}"),
                    goal: "g".to_string(),
                    difficulty: Difficulty::Intuitive,
                })
                .collect(),
        }
    }

    fn state_at(index: usize, steps: usize) -> PipelineState {
        let mut state = PipelineState::new("t");
        state.curriculum = Some(curriculum(steps));
        state.current_step_index = index;
        state.mp4_file_path = Some(PathBuf::from("v.mp4"));
        state
    }

    #[test]
    fn test_renderer_routes_by_remaining_steps() {
        for steps in 0..5 {
            for index in 0..=6 {
                let expected = if index < steps {
                    Node::Cleaner
                } else {
                    Node::Concatenator
                };
                assert_eq!(
                    next_node(Node::Renderer, &state_at(index, steps)),
                    expected,
                    "index {index}, steps {steps}"
                );
            }
        }
    }

    #[test]
    fn test_renderer_without_video_goes_to_concatenator() {
        let mut state = state_at(0, 3);
        state.mp4_file_path = None;
        assert_eq!(next_node(Node::Renderer, &state), Node::Concatenator);
    }

    #[test]
    fn test_planner_skips_to_concatenation_when_done() {
        assert_eq!(next_node(Node::Planner, &state_at(2, 2)), Node::Concatenator);
        assert_eq!(next_node(Node::Planner, &state_at(1, 2)), Node::Teacher);
        assert_eq!(next_node(Node::Planner, &PipelineState::new("t")), Node::Teacher);
    }

    #[test]
    fn test_review_loops_follow_state_flags() {
        let mut state = state_at(0, 1);
        assert_eq!(next_node(Node::Critic, &state), Node::Storyboard);
        assert_eq!(next_node(Node::CodeCritic, &state), Node::Manim);

        state.review = Review {
            approved: true,
            forced: true,
            feedback: None,
            iterations: 2,
        };
        state.code_review.approved = true;
        assert_eq!(next_node(Node::Critic, &state), Node::Audio);
        assert_eq!(next_node(Node::CodeCritic, &state), Node::Renderer);
    }

    #[test]
    fn test_fixed_edges() {
        let state = PipelineState::new("t");
        assert_eq!(next_node(Node::Teacher, &state), Node::Storyboard);
        assert_eq!(next_node(Node::Storyboard, &state), Node::Critic);
        assert_eq!(next_node(Node::Audio, &state), Node::Manim);
        assert_eq!(next_node(Node::Manim, &state), Node::CodeCritic);
        assert_eq!(next_node(Node::Cleaner, &state), Node::Teacher);
        assert_eq!(next_node(Node::Concatenator, &state), Node::End);
        assert_eq!(next_node(Node::End, &state), Node::End);
    }

    /// A stage that logs its visits and replays a fixed script of deltas.
    struct Scripted {
        node: Node,
        visits: Arc<Mutex<Vec<Node>>>,
        respond: fn(&PipelineState) -> Vec<StateDelta>,
    }

    #[async_trait]
    impl Stage for Scripted {
        fn node(&self) -> Node {
            self.node
        }

        async fn run(&self, state: &PipelineState, _cache: &mut dyn CacheStore) -> Result<Vec<StateDelta>> {
            self.visits.lock().unwrap().push(self.node);
            Ok((self.respond)(state))
        }
    }

    fn scripted_workflow(visits: &Arc<Mutex<Vec<Node>>>) -> Workflow {
        let stage = |node, respond: fn(&PipelineState) -> Vec<StateDelta>| -> Box<dyn Stage> {
            Box::new(Scripted {
                node,
                visits: visits.clone(),
                respond,
            })
        };
        Workflow::new(vec![
            stage(Node::Planner, |_| vec![StateDelta::Curriculum(curriculum(2))]),
            stage(Node::Teacher, |_| vec![]),
            stage(Node::Storyboard, |_| vec![]),
            stage(Node::Critic, |s| {
                let iterations = s.review.iterations;
                vec![StateDelta::Review(Review {
                    approved: iterations >= 1,
                    forced: false,
                    feedback: None,
                    iterations: iterations + 1,
                })]
            }),
            stage(Node::Audio, |_| vec![]),
            stage(Node::Manim, |_| vec![]),
            stage(Node::CodeCritic, |_| {
                vec![StateDelta::CodeReview(Review {
                    approved: true,
                    ..Review::default()
                })]
            }),
            stage(Node::Renderer, |_| {
                vec![
                    StateDelta::StepVideo(Some(PathBuf::from("v.mp4"))),
                    StateDelta::StepCompleted,
                ]
            }),
            stage(Node::Cleaner, |_| vec![StateDelta::ResetStep]),
            stage(Node::Concatenator, |_| {
                vec![StateDelta::FinalVideo(PathBuf::from("final.mp4"))]
            }),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_driver_walks_two_steps() {
        let visits = Arc::new(Mutex::new(Vec::new()));
        let workflow = scripted_workflow(&visits);
        let mut cache = MemoryCache::new();

        let final_state = workflow.run(PipelineState::new("t"), &mut cache).await.unwrap();

        assert_eq!(final_state.current_step_index, 2);
        assert_eq!(final_state.final_video_path, Some(PathBuf::from("final.mp4")));
        let step = [
            Node::Teacher,
            Node::Storyboard,
            Node::Critic,
            Node::Storyboard,
            Node::Critic,
            Node::Audio,
            Node::Manim,
            Node::CodeCritic,
            Node::Renderer,
        ];
        let mut expected = vec![Node::Planner];
        expected.extend(step);
        expected.push(Node::Cleaner);
        expected.extend(step);
        expected.push(Node::Concatenator);
        assert_eq!(*visits.lock().unwrap(), expected);
    }

    #[tokio::test]
    async fn test_recorder_writes_numbered_snapshots() {
        let dir = TempDir::new().unwrap();
        let visits = Arc::new(Mutex::new(Vec::new()));
        let workflow = scripted_workflow(&visits).with_recorder(StepRecorder::new(dir.path()));

        workflow
            .run(PipelineState::new("t"), &mut MemoryCache::new())
            .await
            .unwrap();

        let first: Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("step_01_planner.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(first["_metadata"]["step_name"], "planner");
        assert_eq!(first["_metadata"]["step_number"], 1);
        assert_eq!(first["curriculum"]["steps"].as_array().unwrap().len(), 2);
        assert!(dir.path().join("step_21_concatenator.json").exists());
    }

    #[test]
    fn test_new_rejects_incomplete_stage_sets() {
        let visits = Arc::new(Mutex::new(Vec::new()));
        let only_planner: Vec<Box<dyn Stage>> = vec![Box::new(Scripted {
            node: Node::Planner,
            visits,
            respond: |_| vec![],
        })];
        assert!(Workflow::new(only_planner).is_err());
    }
}
