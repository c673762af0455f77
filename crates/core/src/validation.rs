//! Submission payload and its validation rules.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;

/// Longest prompt accepted, in characters.
pub const MAX_PROMPT_CHARS: usize = 10_000;

/// The request payload a client submits. Immutable once a job is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct JobInput {
    #[validate(length(
        min = 1,
        max = 10000,
        message = "prompt must be between 1 and 10000 characters"
    ))]
    pub prompt: String,
}

impl JobInput {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }

    /// Validate the payload, returning `CoreError::InvalidInput` on failure.
    pub fn check(&self) -> Result<(), CoreError> {
        self.validate()
            .map_err(|e| CoreError::InvalidInput(e.to_string()))?;
        if self.prompt.trim().is_empty() {
            return Err(CoreError::InvalidInput(
                "prompt must not be blank".to_string(),
            ));
        }
        Ok(())
    }
}
