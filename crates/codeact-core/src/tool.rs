//! Tool bindings: typed callables injected into a snippet's namespace.
//!
//! A tool declares its inputs in order; a call from a snippet binds
//! positional arguments to inputs in that order and keywords by name, and
//! checks each against the declared type before [`Tool::forward`] runs.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::value::Value;

/// Arguments bound to a tool's declared inputs.
pub type ToolArgs = BTreeMap<String, Value>;

/// Type tag for tool inputs and outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Integer,
    Number,
    Boolean,
    Image,
    Array,
    Object,
    Any,
}

impl ValueType {
    /// Does `value` satisfy this type? `None` is handled by the caller
    /// (nullability is a property of the input, not the type).
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ValueType::Any => true,
            ValueType::String => matches!(value, Value::Str(_)),
            ValueType::Integer => matches!(value, Value::Int(_) | Value::Bool(_)),
            ValueType::Number => matches!(value, Value::Int(_) | Value::Float(_) | Value::Bool(_)),
            ValueType::Boolean => matches!(value, Value::Bool(_)),
            ValueType::Image => matches!(value, Value::Image(_)),
            ValueType::Array => matches!(value, Value::List(_) | Value::Tuple(_)),
            ValueType::Object => matches!(value, Value::Dict(_)),
        }
    }

    /// The narrowest tag describing `value`.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Str(_) => ValueType::String,
            Value::Int(_) => ValueType::Integer,
            Value::Float(_) => ValueType::Number,
            Value::Bool(_) => ValueType::Boolean,
            Value::Image(_) => ValueType::Image,
            Value::List(_) | Value::Tuple(_) | Value::Set(_) => ValueType::Array,
            Value::Dict(_) => ValueType::Object,
            Value::None | Value::Opaque(_) => ValueType::Any,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Integer => "integer",
            ValueType::Number => "number",
            ValueType::Boolean => "boolean",
            ValueType::Image => "image",
            ValueType::Array => "array",
            ValueType::Object => "object",
            ValueType::Any => "any",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One declared tool input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInput {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ValueType,
    pub description: String,
    #[serde(default)]
    pub nullable: bool,
}

/// Tool schema: name, description, ordered inputs, output type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub inputs: Vec<ToolInput>,
    pub output_type: ValueType,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        output_type: ValueType,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            inputs: Vec::new(),
            output_type,
        }
    }

    pub fn with_input(
        mut self,
        name: impl Into<String>,
        kind: ValueType,
        description: impl Into<String>,
    ) -> Self {
        self.inputs.push(ToolInput {
            name: name.into(),
            kind,
            description: description.into(),
            nullable: false,
        });
        self
    }

    pub fn with_nullable_input(
        mut self,
        name: impl Into<String>,
        kind: ValueType,
        description: impl Into<String>,
    ) -> Self {
        self.inputs.push(ToolInput {
            name: name.into(),
            kind,
            description: description.into(),
            nullable: true,
        });
        self
    }

    pub fn input(&self, name: &str) -> Option<&ToolInput> {
        self.inputs.iter().find(|i| i.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ToolError {
    #[error("invalid arguments for tool '{tool_name}': {reason}")]
    InvalidArguments { tool_name: String, reason: String },

    #[error("tool '{tool_name}' failed: {reason}")]
    Failed { tool_name: String, reason: String },

    #[error("tool '{tool_name}' is unavailable: {reason}")]
    Unavailable { tool_name: String, reason: String },
}

impl ToolError {
    pub fn failed(tool_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            tool_name: tool_name.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid(tool_name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArguments {
            tool_name: tool_name.into(),
            reason: reason.into(),
        }
    }
}

/// A callable capability handed to the evaluator by its caller.
pub trait Tool: Send + Sync {
    fn spec(&self) -> &ToolSpec;

    fn forward(&self, args: &ToolArgs) -> Result<Value, ToolError>;

    /// Calling a final-answer tool ends the evaluation with its result.
    fn is_final_answer(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        &self.spec().name
    }
}

impl fmt::Debug for dyn Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name())
            .field("final_answer", &self.is_final_answer())
            .finish()
    }
}

/// Bind call-site arguments to `spec`'s declared inputs.
pub fn bind_arguments(
    spec: &ToolSpec,
    positional: Vec<Value>,
    keywords: Vec<(String, Value)>,
) -> Result<ToolArgs, ToolError> {
    if positional.len() > spec.inputs.len() {
        return Err(ToolError::invalid(
            &spec.name,
            format!(
                "takes {} positional argument(s) but {} were given",
                spec.inputs.len(),
                positional.len()
            ),
        ));
    }

    let mut args = ToolArgs::new();
    for (input, value) in spec.inputs.iter().zip(positional) {
        args.insert(input.name.clone(), value);
    }
    for (name, value) in keywords {
        if spec.input(&name).is_none() {
            return Err(ToolError::invalid(
                &spec.name,
                format!("unexpected argument '{name}'"),
            ));
        }
        if args.insert(name.clone(), value).is_some() {
            return Err(ToolError::invalid(
                &spec.name,
                format!("got multiple values for argument '{name}'"),
            ));
        }
    }

    for input in &spec.inputs {
        match args.get(&input.name) {
            None if input.nullable => {}
            None => {
                return Err(ToolError::invalid(
                    &spec.name,
                    format!("missing required argument '{}'", input.name),
                ))
            }
            Some(Value::None) if input.nullable => {}
            Some(value) if !input.kind.accepts(value) => {
                return Err(ToolError::invalid(
                    &spec.name,
                    format!(
                        "argument '{}' expects {}, got {}",
                        input.name,
                        input.kind,
                        value.type_name()
                    ),
                ))
            }
            Some(_) => {}
        }
    }
    Ok(args)
}

type ToolFn = dyn Fn(&ToolArgs) -> Result<Value, ToolError> + Send + Sync;

/// A tool backed by a closure.
pub struct FnTool {
    spec: ToolSpec,
    func: Box<ToolFn>,
    final_answer: bool,
}

impl FnTool {
    pub fn new<F>(spec: ToolSpec, func: F) -> Self
    where
        F: Fn(&ToolArgs) -> Result<Value, ToolError> + Send + Sync + 'static,
    {
        Self {
            spec,
            func: Box::new(func),
            final_answer: false,
        }
    }

    /// Mark this tool as terminal.
    pub fn final_answer(mut self) -> Self {
        self.final_answer = true;
        self
    }
}

impl Tool for FnTool {
    fn spec(&self) -> &ToolSpec {
        &self.spec
    }

    fn forward(&self, args: &ToolArgs) -> Result<Value, ToolError> {
        (self.func)(args)
    }

    fn is_final_answer(&self) -> bool {
        self.final_answer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_spec() -> ToolSpec {
        ToolSpec::new("search", "Search the web", ValueType::String)
            .with_input("query", ValueType::String, "what to search")
            .with_nullable_input("limit", ValueType::Integer, "max hits")
    }

    #[test]
    fn test_positional_binds_in_declared_order() {
        let args = bind_arguments(
            &search_spec(),
            vec![Value::from("rust"), Value::Int(3)],
            vec![],
        )
        .unwrap();
        assert_eq!(args["query"], Value::from("rust"));
        assert_eq!(args["limit"], Value::Int(3));
    }

    #[test]
    fn test_keywords_and_nullable_inputs() {
        let args = bind_arguments(
            &search_spec(),
            vec![],
            vec![("query".to_string(), Value::from("rust"))],
        )
        .unwrap();
        assert_eq!(args.len(), 1);

        let args = bind_arguments(
            &search_spec(),
            vec![Value::from("q"), Value::None],
            vec![],
        )
        .unwrap();
        assert_eq!(args["limit"], Value::None);
    }

    #[test]
    fn test_binding_errors() {
        let spec = search_spec();
        let missing = bind_arguments(&spec, vec![], vec![]).unwrap_err();
        assert!(missing.to_string().contains("missing required argument 'query'"));

        let unknown = bind_arguments(
            &spec,
            vec![Value::from("q")],
            vec![("page".to_string(), Value::Int(1))],
        )
        .unwrap_err();
        assert!(unknown.to_string().contains("unexpected argument 'page'"));

        let mismatch = bind_arguments(&spec, vec![Value::Int(1)], vec![]).unwrap_err();
        assert!(mismatch.to_string().contains("expects string, got int"));

        let duplicate = bind_arguments(
            &spec,
            vec![Value::from("q")],
            vec![("query".to_string(), Value::from("again"))],
        )
        .unwrap_err();
        assert!(duplicate.to_string().contains("multiple values"));

        let too_many = bind_arguments(
            &spec,
            vec![Value::from("q"), Value::Int(1), Value::Int(2)],
            vec![],
        )
        .unwrap_err();
        assert!(matches!(too_many, ToolError::InvalidArguments { .. }));
    }

    #[test]
    fn test_fn_tool_forwards() {
        let tool = FnTool::new(
            ToolSpec::new("double", "Double a number", ValueType::Integer).with_input(
                "n",
                ValueType::Integer,
                "number",
            ),
            |args| Ok(Value::Int(args["n"].as_i64().unwrap_or_default() * 2)),
        );
        let args = bind_arguments(tool.spec(), vec![Value::Int(21)], vec![]).unwrap();
        assert_eq!(tool.forward(&args).unwrap(), Value::Int(42));
        assert!(!tool.is_final_answer());
        assert_eq!(tool.name(), "double");
    }

    #[test]
    fn test_value_type_tags() {
        assert!(ValueType::Number.accepts(&Value::Int(1)));
        assert!(!ValueType::Integer.accepts(&Value::Float(1.0)));
        assert_eq!(ValueType::of(&Value::Float(1.0)), ValueType::Number);
        assert_eq!(
            serde_json::to_string(&ValueType::Image).unwrap(),
            "\"image\""
        );
    }
}
