//! Outcome of running a single subagent to completion (or failure).

use serde::{Deserialize, Serialize};

/// Result of executing one [`super::task::Task`] through a [`crate::domain::ports::Runner`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubResult {
    pub success: bool,
    pub result: Option<String>,
    pub error: Option<String>,
    pub turns: u32,
    pub tool_calls: u32,
    pub tokens_used: Option<u64>,
    pub sub_id: String,
}

impl SubResult {
    pub fn ok(sub_id: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            success: true,
            result: Some(result.into()),
            error: None,
            turns: 1,
            tool_calls: 0,
            tokens_used: None,
            sub_id: sub_id.into(),
        }
    }

    pub fn err(sub_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            turns: 0,
            tool_calls: 0,
            tokens_used: None,
            sub_id: sub_id.into(),
        }
    }

    /// Manager-generated timeout messages are canonical: this is how every
    /// other component recognizes "this failure was a timeout" without a
    /// separate out-of-band flag.
    pub fn timeout(sub_id: impl Into<String>, after_secs: u64) -> Self {
        Self::err(sub_id, format!("timed out after {after_secs}s"))
    }

    pub fn is_timeout(&self) -> bool {
        self.error
            .as_deref()
            .is_some_and(|e| e.starts_with("timed out after"))
    }

    pub fn with_tokens(mut self, tokens: u64) -> Self {
        self.tokens_used = Some(tokens);
        self
    }

    pub fn with_turns(mut self, turns: u32) -> Self {
        self.turns = turns;
        self
    }

    pub fn with_tool_calls(mut self, tool_calls: u32) -> Self {
        self.tool_calls = tool_calls;
        self
    }
}
