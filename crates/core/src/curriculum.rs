//! Curriculum Model
//!
//! A curriculum breaks a topic into an ordered learning path. It is produced
//! once per topic by the planner stage and is read-only afterwards; every
//! other stage works on the step selected by the pipeline's step index.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How a step approaches its material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Intuitive,
    Visual,
    Mathematical,
    Applied,
}

/// A single learning step within a curriculum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Step {
    pub id: i64,
    pub title: String,
    /// What the learner should understand after this step.
    pub goal: String,
    pub difficulty: Difficulty,
}

/// The ordered learning path for a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Curriculum {
    pub topic: String,
    pub steps: Vec<Step>,
}

impl Curriculum {
    /// Number of steps in the learning path.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the step at `index`, if the curriculum has that many steps.
    pub fn step(&self, index: usize) -> Option<&Step> {
        self.steps.get(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Curriculum {
        Curriculum {
            topic: "Neural Networks".to_string(),
            steps: vec![
                Step {
                    id: 1,
                    title: "The Perceptron".to_string(),
                    goal: "See a neuron as a decision boundary.".to_string(),
                    difficulty: Difficulty::Intuitive,
                },
                Step {
                    id: 2,
                    title: "Gradient Descent".to_string(),
                    goal: "Follow the slope downhill.".to_string(),
                    difficulty: Difficulty::Mathematical,
                },
            ],
        }
    }

    #[test]
    fn test_step_lookup() {
        let curriculum = sample();
        assert_eq!(curriculum.len(), 2);
        assert_eq!(curriculum.step(1).map(|s| s.id), Some(2));
        assert!(curriculum.step(2).is_none());
    }

    #[test]
    fn test_difficulty_uses_snake_case() {
        let json = serde_json::to_value(Difficulty::Mathematical).unwrap();
        assert_eq!(json, "mathematical");

        let parsed: Step = serde_json::from_value(serde_json::json!({
            "id": 3,
            "title": "Backprop",
            "goal": "Blame flows backwards.",
            "difficulty": "applied"
        }))
        .unwrap();
        assert_eq!(parsed.difficulty, Difficulty::Applied);
    }

    #[test]
    fn test_unknown_difficulty_is_rejected() {
        let result: Result<Step, _> = serde_json::from_value(serde_json::json!({
            "id": 1,
            "title": "x",
            "goal": "y",
            "difficulty": "impossible"
        }));
        assert!(result.is_err());
    }
}
