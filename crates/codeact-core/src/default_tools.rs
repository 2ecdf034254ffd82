//! Tools most agents start with.

use std::collections::{BTreeSet, VecDeque};
use std::io::{BufRead, Write};
use std::sync::Mutex;

use crate::render::render_error;
use crate::sandbox::Sandbox;
use crate::tool::{Tool, ToolArgs, ToolError, ToolSpec, ValueType};
use crate::value::Value;

/// Ends the evaluation with `answer` as its result.
pub struct FinalAnswerTool {
    spec: ToolSpec,
}

impl FinalAnswerTool {
    pub fn new() -> Self {
        Self {
            spec: ToolSpec::new(
                "final_answer",
                "Provides a final answer to the given problem.",
                ValueType::Any,
            )
            .with_input("answer", ValueType::Any, "The final answer to the problem"),
        }
    }
}

impl Default for FinalAnswerTool {
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for FinalAnswerTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn forward(&self, args: &ToolArgs) -> Result<Value, ToolError> {
        Ok(args.get("answer").cloned().unwrap_or(Value::None))
    }

    fn is_final_answer(&self) -> bool {
        true
    }
}

/// Where a [`UserInputTool`] gets its answers.
pub trait InputSource: Send + Sync {
    fn ask(&self, question: &str) -> Result<String, ToolError>;
}

/// Prompt on stdout, answer from stdin.
#[derive(Debug, Default)]
pub struct StdinSource;

impl InputSource for StdinSource {
    fn ask(&self, question: &str) -> Result<String, ToolError> {
        let unavailable = |e: std::io::Error| ToolError::Unavailable {
            tool_name: "user_input".to_string(),
            reason: e.to_string(),
        };
        let mut stdout = std::io::stdout().lock();
        write!(stdout, "{question} => Type your answer here: ").map_err(unavailable)?;
        stdout.flush().map_err(unavailable)?;

        let mut line = String::new();
        std::io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(unavailable)?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Answers taken in order from a fixed script.
#[derive(Debug, Default)]
pub struct ScriptedSource {
    answers: Mutex<VecDeque<String>>,
}

impl ScriptedSource {
    pub fn new(answers: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().map(Into::into).collect()),
        }
    }
}

impl InputSource for ScriptedSource {
    fn ask(&self, question: &str) -> Result<String, ToolError> {
        let mut answers = self
            .answers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        answers.pop_front().ok_or_else(|| {
            ToolError::failed("user_input", format!("no scripted answer left for {question:?}"))
        })
    }
}

/// Asks the user a question.
pub struct UserInputTool {
    spec: ToolSpec,
    source: Box<dyn InputSource>,
}

impl UserInputTool {
    pub fn new(source: impl InputSource + 'static) -> Self {
        Self {
            spec: ToolSpec::new(
                "user_input",
                "Asks for user's input on a specific question",
                ValueType::String,
            )
            .with_input("question", ValueType::String, "The question to ask the user"),
            source: Box::new(source),
        }
    }
}

impl Tool for UserInputTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn forward(&self, args: &ToolArgs) -> Result<Value, ToolError> {
        let question = args
            .get("question")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::invalid("user_input", "'question' must be a string"))?;
        self.source.ask(question).map(Value::Str)
    }
}

/// Evaluates a nested snippet and reports its printed output and value.
pub struct PythonInterpreterTool {
    spec: ToolSpec,
    sandbox: Sandbox,
    authorized_imports: Vec<String>,
}

impl PythonInterpreterTool {
    /// Authorise the sandbox's allowed modules plus `extra_imports`.
    pub fn new(sandbox: Sandbox, extra_imports: impl IntoIterator<Item = String>) -> Self {
        let authorized: BTreeSet<String> = sandbox
            .policy()
            .allowed_modules()
            .map(str::to_string)
            .chain(extra_imports)
            .collect();
        let authorized_imports: Vec<String> = authorized.into_iter().collect();
        let listed = authorized_imports
            .iter()
            .map(|m| format!("'{m}'"))
            .collect::<Vec<_>>()
            .join(", ");
        let spec = ToolSpec::new(
            "python_interpreter",
            format!(
                "This is a tool that evaluates python code. It can be used to perform calculations. \
                 Imports are limited to: [{listed}]."
            ),
            ValueType::String,
        )
        .with_input(
            "code",
            ValueType::String,
            "The python code to run in interpreter",
        );
        Self {
            spec,
            sandbox,
            authorized_imports,
        }
    }

    pub fn authorized_imports(&self) -> &[String] {
        &self.authorized_imports
    }
}

impl Tool for PythonInterpreterTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn forward(&self, args: &ToolArgs) -> Result<Value, ToolError> {
        let code = args
            .get("code")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::invalid("python_interpreter", "'code' must be a string"))?;
        let imports: Vec<&str> = self.authorized_imports.iter().map(String::as_str).collect();
        let result = self.sandbox.execute(code, &[], &imports);
        match result.outcome() {
            Ok(value) => Ok(Value::Str(format!(
                "Stdout:\n{}\nOutput: {value}",
                result.captured_output
            ))),
            Err(error) => Err(ToolError::failed("python_interpreter", render_error(error))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::bind_arguments;

    #[test]
    fn test_final_answer_passes_value_through() {
        let tool = FinalAnswerTool::new();
        let args = bind_arguments(tool.spec(), vec![Value::Int(7)], vec![]).unwrap();
        assert_eq!(tool.forward(&args).unwrap(), Value::Int(7));
        assert!(tool.is_final_answer());
    }

    #[test]
    fn test_scripted_user_input() {
        let tool = UserInputTool::new(ScriptedSource::new(["blue"]));
        let args = bind_arguments(tool.spec(), vec![Value::from("Favourite colour?")], vec![])
            .unwrap();
        assert_eq!(tool.forward(&args).unwrap(), Value::from("blue"));
        assert!(matches!(
            tool.forward(&args),
            Err(ToolError::Failed { .. })
        ));
    }

    #[test]
    fn test_python_interpreter_reports_stdout_and_value() {
        let tool = PythonInterpreterTool::new(Sandbox::default(), Vec::new());
        assert!(tool.authorized_imports().iter().any(|m| m == "math"));
        assert!(tool.spec().description.contains("'math'"));

        let args = bind_arguments(
            tool.spec(),
            vec![Value::from("print('hi')\n6 * 7")],
            vec![],
        )
        .unwrap();
        assert_eq!(
            tool.forward(&args).unwrap(),
            Value::from("Stdout:\nhi\n\nOutput: 42")
        );
    }

    #[test]
    fn test_python_interpreter_surfaces_errors() {
        let tool = PythonInterpreterTool::new(Sandbox::default(), Vec::new());
        let args = bind_arguments(tool.spec(), vec![Value::from("import os")], vec![]).unwrap();
        let err = tool.forward(&args).unwrap_err();
        assert!(err.to_string().contains("ImportBlocked"));
    }
}
