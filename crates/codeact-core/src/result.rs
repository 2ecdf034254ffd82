//! The outcome of one evaluation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EvaluationError;
use crate::value::Value;

/// How far an evaluation got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Parsing,
    Binding,
    Evaluating,
    Succeeded,
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Parsing => "parsing",
            Phase::Binding => "binding",
            Phase::Evaluating => "evaluating",
            Phase::Succeeded => "succeeded",
            Phase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Value or error, plus whatever the snippet printed.
///
/// Exactly one of `value` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub value: Option<Value>,
    pub captured_output: String,
    pub error: Option<EvaluationError>,
    pub phase: Phase,
    /// The snippet ended by calling a final-answer tool.
    pub is_final_answer: bool,
    /// Operations charged against the budget.
    pub operations: u64,
    /// Where the evaluation stopped when it failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_in: Option<Phase>,
}

impl EvaluationResult {
    pub fn succeeded(value: Value, captured_output: String) -> Self {
        Self {
            value: Some(value),
            captured_output,
            error: None,
            phase: Phase::Succeeded,
            is_final_answer: false,
            operations: 0,
            failed_in: None,
        }
    }

    /// A failure that happened during `phase`.
    pub fn failed(phase: Phase, error: EvaluationError, captured_output: String) -> Self {
        Self {
            value: None,
            captured_output,
            error: Some(error),
            phase: Phase::Failed,
            is_final_answer: false,
            operations: 0,
            failed_in: Some(phase),
        }
    }

    pub fn with_operations(mut self, operations: u64) -> Self {
        self.operations = operations;
        self
    }

    pub fn with_final_answer(mut self, is_final_answer: bool) -> Self {
        self.is_final_answer = is_final_answer;
        self
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Borrow the outcome as a `Result`.
    pub fn outcome(&self) -> Result<&Value, &EvaluationError> {
        match (&self.value, &self.error) {
            (_, Some(error)) => Err(error),
            (Some(value), None) => Ok(value),
            (None, None) => Ok(&Value::None),
        }
    }

    pub fn into_outcome(self) -> Result<Value, EvaluationError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.value.unwrap_or(Value::None)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_exactly_one_of_value_and_error() {
        let ok = EvaluationResult::succeeded(Value::Int(3), String::new());
        assert!(ok.is_success());
        assert_eq!(ok.phase, Phase::Succeeded);
        assert_eq!(ok.outcome(), Ok(&Value::Int(3)));

        let err = EvaluationResult::failed(
            Phase::Parsing,
            EvaluationError::new(ErrorKind::SyntaxInvalid, "invalid syntax"),
            String::new(),
        );
        assert!(!err.is_success());
        assert!(err.value.is_none());
        assert_eq!(err.phase, Phase::Failed);
        assert_eq!(err.failed_in, Some(Phase::Parsing));
        assert_eq!(
            err.into_outcome().unwrap_err().kind,
            ErrorKind::SyntaxInvalid
        );
    }

    #[test]
    fn test_result_serialises_to_json() {
        let result = EvaluationResult::succeeded(Value::from("hi"), "printed\n".to_string())
            .with_operations(7);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["phase"], "succeeded");
        assert_eq!(json["operations"], 7);
        assert!(json.get("failed_in").is_none());
        let back: EvaluationResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }
}
