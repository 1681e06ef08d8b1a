// SPDX-License-Identifier: MIT OR Apache-2.0
//! The LLM client contract consumed by analysis workers, its response
//! sanitizer, and a scripted test double.
//!
//! Prompt shape and response parsing heuristics tuned to a specific
//! model are intentionally absent here: this crate only implements the
//! client-side shape of the interface (trait + sanitizer) so the
//! pipeline is runnable without a live provider.
#![warn(missing_docs)]

pub mod sanitize;

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tri_core::TriError;

/// Errors an [`LlmClient`] may return.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LlmError {
    /// The provider timed out or returned a transient 5xx.
    #[error("llm call timed out or returned a transient error")]
    Unavailable,
    /// The response could not be parsed as JSON even after sanitization.
    #[error("malformed response: {reason}")]
    Malformed {
        /// What went wrong.
        reason: String,
    },
}

impl From<LlmError> for TriError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Unavailable => TriError::TransientExternal {
                code: tri_core::ErrorCode::LlmUnavailable,
                message: e.to_string(),
                attempt: 1,
            },
            LlmError::Malformed { .. } => TriError::InvalidPayload {
                code: tri_core::ErrorCode::MalformedLlmResponse,
                message: e.to_string(),
            },
        }
    }
}

/// Synchronous (from the pipeline's perspective: one request, one
/// response) query interface to the LLM. `query` may fail transiently;
/// callers retry.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Sends `prompt` and returns the raw response text, unsanitized.
    async fn query(&self, prompt: &str) -> Result<String, LlmError>;
}

/// Parses `raw` as a candidate-relationship response, sanitizing first.
/// Returns [`LlmError::Malformed`] if the sanitized text still does not
/// parse as JSON.
pub fn parse_response(raw: &str) -> Result<serde_json::Value, LlmError> {
    let cleaned = sanitize::sanitize(raw);
    serde_json::from_str(&cleaned).map_err(|e| LlmError::Malformed { reason: e.to_string() })
}

/// Builds the self-correction follow-up prompt sent after a first
/// malformed response (§4.2 step 2's "second prompt with the error").
#[must_use]
pub fn correction_prompt(original_prompt: &str, parse_error: &str) -> String {
    format!(
        "Your previous response could not be parsed as JSON: {parse_error}\n\
         Reply with ONLY a single JSON object, no prose, no code fences.\n\
         Original request:\n{original_prompt}"
    )
}

/// A scripted [`LlmClient`]. Built via [`ScriptedLlm::new`] it replays a
/// fixed sequence of responses, one per call, then returns
/// [`LlmError::Unavailable`] once exhausted (for tests exercising the
/// malformed-then-corrected sequence analysis workers must handle). Built
/// via [`ScriptedLlm::always`] it repeats the same response forever, so a
/// single instance shared across many jobs (any number of analysis
/// workers, each querying any number of times) behaves the same on every
/// call.
pub struct ScriptedLlm {
    responses: Mutex<VecDeque<Result<String, LlmError>>>,
    repeat: Option<Result<String, LlmError>>,
}

impl ScriptedLlm {
    /// Builds a scripted client that returns `responses` in order, one
    /// per [`LlmClient::query`] call, then [`LlmError::Unavailable`]
    /// once exhausted.
    #[must_use]
    pub fn new(responses: Vec<Result<String, LlmError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            repeat: None,
        }
    }

    /// Convenience constructor for a client that always returns `text`,
    /// on every call, without exhausting.
    #[must_use]
    pub fn always(text: impl Into<String>) -> Self {
        Self {
            responses: Mutex::new(VecDeque::new()),
            repeat: Some(Ok(text.into())),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn query(&self, _prompt: &str) -> Result<String, LlmError> {
        let mut responses = self.responses.lock().unwrap();
        if let Some(next) = responses.pop_front() {
            return next;
        }
        drop(responses);
        match &self.repeat {
            Some(response) => response.clone(),
            None => Err(LlmError::Unavailable),
        }
    }
}
