//! Branch resolution for free-text answers.
//!
//! The engine consults a [`BranchStrategy`] when a branching question
//! receives custom input. The built-in strategy never overrides the linear
//! progression; a real classifier can be swapped in without touching the
//! engine's contract.

use async_trait::async_trait;

use crate::error::QuizmillError;

#[async_trait]
pub trait BranchStrategy: Send + Sync {
    /// Returns the question to jump to, or `None` to continue the default
    /// linear progression.
    async fn next_question(
        &self,
        quiz_id: &str,
        question_id: &str,
        custom_input: &str,
    ) -> Result<Option<String>, QuizmillError>;
}

/// Conservative default: every free-text answer continues linearly.
pub struct DefaultProgression;

#[async_trait]
impl BranchStrategy for DefaultProgression {
    async fn next_question(
        &self,
        _quiz_id: &str,
        _question_id: &str,
        _custom_input: &str,
    ) -> Result<Option<String>, QuizmillError> {
        Ok(None)
    }
}
