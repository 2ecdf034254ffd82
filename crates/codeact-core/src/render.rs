//! Turning evaluation results into what the caller hands back to a model.

use crate::error::EvaluationError;
use crate::result::EvaluationResult;
use crate::tool::ValueType;
use crate::value::Value;

/// A successful result shaped for its declared output type.
#[derive(Debug, Clone, PartialEq)]
pub enum Rendered {
    Text(String),
    Value(Value),
}

impl Rendered {
    /// Text form regardless of variant.
    pub fn into_text(self) -> String {
        match self {
            Rendered::Text(text) => text,
            Rendered::Value(value) => value.to_string(),
        }
    }
}

/// Render `result` for a tool declaring `output_type`.
///
/// Failures always render as text.
pub fn render(result: &EvaluationResult, output_type: ValueType) -> Rendered {
    let value = match result.outcome() {
        Ok(value) => value,
        Err(error) => return Rendered::Text(render_error(error)),
    };
    match output_type {
        ValueType::String => Rendered::Text(value.to_string()),
        ValueType::Image if value.as_image().is_some() => Rendered::Value(value.clone()),
        ValueType::Image => Rendered::Text(value.to_string()),
        _ => Rendered::Value(value.clone()),
    }
}

/// `"{Kind}: {message}"`, then the location and a caret line when known.
pub fn render_error(error: &EvaluationError) -> String {
    let mut text = error.to_string();
    if let Some(span) = &error.location {
        text.push_str(&format!(
            "\n  at line {}, column {}:\n    {}\n    ",
            span.line, span.column, span.source_line
        ));
        let indent = span.column.saturating_sub(1);
        let width = if span.end_line == span.line {
            span.end_column.saturating_sub(span.column).max(1)
        } else {
            1
        };
        text.push_str(&" ".repeat(indent));
        text.push_str(&"^".repeat(width));
    }
    text
}

/// The observation for one step: printed output, then the value or error.
pub fn render_observation(result: &EvaluationResult) -> String {
    let mut parts = Vec::new();
    if !result.captured_output.is_empty() {
        parts.push(format!("Print outputs:\n{}", result.captured_output));
    }
    match result.outcome() {
        Ok(value) => parts.push(format!("Last output from code snippet:\n{value}")),
        Err(error) => parts.push(render_error(error)),
    }
    parts.join("\n")
}

/// Keep `text` under `max` characters by cutting out its middle.
pub fn truncate_content(text: &str, max: usize) -> String {
    let len = text.chars().count();
    if len <= max {
        return text.to_string();
    }
    let half = max / 2;
    let head: String = text.chars().take(half).collect();
    let tail: String = text.chars().skip(len - half).collect();
    format!(
        "{head}\n..._This content has been truncated to stay below {max} characters_...\n{tail}"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, SourceSpan};
    use crate::result::Phase;
    use crate::value::ImageData;

    fn blocked_import() -> EvaluationError {
        EvaluationError::new(ErrorKind::ImportBlocked, "Import of os is not allowed.")
            .with_location(SourceSpan {
                line: 2,
                column: 1,
                end_line: 2,
                end_column: 10,
                source_line: "import os".to_string(),
            })
    }

    #[test]
    fn test_render_error_with_location() {
        assert_eq!(
            render_error(&blocked_import()),
            "ImportBlocked: Import of os is not allowed.\n  at line 2, column 1:\n    import os\n    ^^^^^^^^^"
        );
    }

    #[test]
    fn test_render_error_without_location() {
        let err = EvaluationError::runtime("ZeroDivisionError: division by zero");
        assert_eq!(
            render_error(&err),
            "RuntimeFault: ZeroDivisionError: division by zero"
        );
    }

    #[test]
    fn test_render_by_output_type() {
        let ok = EvaluationResult::succeeded(Value::Int(5), String::new());
        assert_eq!(render(&ok, ValueType::String), Rendered::Text("5".into()));
        assert_eq!(render(&ok, ValueType::Integer), Rendered::Value(Value::Int(5)));
        assert_eq!(render(&ok, ValueType::Image), Rendered::Text("5".into()));

        let image = Value::from(ImageData::new("png", 1, 1, vec![1]));
        let ok = EvaluationResult::succeeded(image.clone(), String::new());
        assert_eq!(render(&ok, ValueType::Image), Rendered::Value(image));

        let failed = EvaluationResult::failed(Phase::Evaluating, blocked_import(), String::new());
        assert!(matches!(
            render(&failed, ValueType::Any),
            Rendered::Text(text) if text.starts_with("ImportBlocked:")
        ));
    }

    #[test]
    fn test_render_observation() {
        let ok = EvaluationResult::succeeded(Value::from("done"), "step 1\n".to_string());
        assert_eq!(
            render_observation(&ok),
            "Print outputs:\nstep 1\n\nLast output from code snippet:\ndone"
        );

        let quiet = EvaluationResult::succeeded(Value::None, String::new());
        assert_eq!(
            render_observation(&quiet),
            "Last output from code snippet:\nNone"
        );
    }

    #[test]
    fn test_truncate_content_keeps_both_ends() {
        assert_eq!(truncate_content("short", 10), "short");
        let text = "a".repeat(10) + &"b".repeat(10);
        let cut = truncate_content(&text, 8);
        assert!(cut.starts_with("aaaa\n"));
        assert!(cut.ends_with("\nbbbb"));
        assert!(cut.contains("truncated to stay below 8 characters"));
    }
}
