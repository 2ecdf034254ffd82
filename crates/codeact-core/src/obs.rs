//! Structured observability hooks for the evaluation lifecycle.
//!
//! This module provides:
//! - Evaluation-scoped tracing spans via the `EvaluationSpan` RAII guard
//! - Emission functions for lifecycle events: start, finish, policy
//!   violation, tool call, deadline expiry
//!
//! Snippet text is never logged. A SHA-256 digest identifies it instead.

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::error::ErrorKind;

/// RAII guard that enters an evaluation-scoped span.
///
/// # Example
///
/// ```ignore
/// let _span = EvaluationSpan::enter("3f1c…", "9b2e…");
/// // tracing calls now carry evaluation_id and snippet_digest
/// ```
pub struct EvaluationSpan {
    _span: tracing::span::EnteredSpan,
}

impl EvaluationSpan {
    pub fn enter(evaluation_id: &str, snippet_digest: &str) -> Self {
        let span = tracing::info_span!(
            "codeact.evaluation",
            evaluation_id = %evaluation_id,
            snippet = %snippet_digest,
        );
        Self {
            _span: span.entered(),
        }
    }
}

/// Hex SHA-256 of a snippet, for correlating logs without logging code.
pub fn snippet_digest(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

pub fn emit_evaluation_started(evaluation_id: &str, tools: usize, authorized_imports: usize) {
    info!(
        event = "evaluation.started",
        evaluation_id = %evaluation_id,
        tools = tools,
        authorized_imports = authorized_imports,
    );
}

/// Emit event: evaluation finished, with outcome and cost.
pub fn emit_evaluation_finished(
    evaluation_id: &str,
    duration_ms: u64,
    operations: u64,
    error: Option<ErrorKind>,
) {
    info!(
        event = "evaluation.finished",
        evaluation_id = %evaluation_id,
        duration_ms = duration_ms,
        operations = operations,
        success = error.is_none(),
        error_kind = error.map(ErrorKind::as_str),
    );
}

/// Emit event: the snippet hit the capability policy (warning level).
pub fn emit_policy_violation(evaluation_id: &str, kind: ErrorKind, message: &str) {
    warn!(
        event = "evaluation.policy_violation",
        evaluation_id = %evaluation_id,
        kind = %kind,
        message = %message,
    );
}

pub fn emit_tool_invoked(tool_name: &str, ok: bool) {
    info!(event = "tool.invoked", tool = %tool_name, ok = ok);
}

/// Emit event: an evaluation ran past its deadline and was cancelled.
pub fn emit_deadline_exceeded(evaluation_id: &str, deadline_ms: u64) {
    warn!(
        event = "evaluation.deadline_exceeded",
        evaluation_id = %evaluation_id,
        deadline_ms = deadline_ms,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evaluation_span_create() {
        let _span = EvaluationSpan::enter("test-evaluation", "digest");
    }

    #[test]
    fn test_snippet_digest_is_stable_hex() {
        let a = snippet_digest("1 + 2");
        assert_eq!(a, snippet_digest("1 + 2"));
        assert_ne!(a, snippet_digest("1 + 3"));
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
