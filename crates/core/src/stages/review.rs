//! Bounded approval loops shared by the storyboard and code critics.

use crate::lesson::Verdict;
use crate::state::Review;
use tracing::{info, warn};

/// Rejections allowed per loop before the artifact is approved regardless.
pub const MAX_ITERATIONS: u32 = 2;

/// Whether the loop has run out of rejections.
pub fn exhausted(current: &Review) -> bool {
    current.iterations >= MAX_ITERATIONS
}

/// Releases the loop at the iteration cap.
pub fn force_approve(current: &Review, subject: &str) -> Review {
    warn!(subject, iterations = current.iterations, "Max review iterations reached, forcing approval");
    Review {
        approved: true,
        forced: true,
        feedback: Some(format!("Auto-approved after {} iterations", current.iterations)),
        iterations: current.iterations,
    }
}

/// Folds a reviewer's verdict into the loop. A rejection counts one
/// iteration; an approval leaves the count alone.
pub fn judge(current: &Review, verdict: Verdict, subject: &str) -> Review {
    if verdict.approved {
        info!(subject, "Approved");
        Review {
            approved: true,
            forced: false,
            feedback: Some(verdict.feedback),
            iterations: current.iterations,
        }
    } else {
        info!(subject, feedback = %verdict.feedback, "Rejected");
        Review {
            approved: false,
            forced: false,
            feedback: Some(verdict.feedback),
            iterations: current.iterations + 1,
        }
    }
}
