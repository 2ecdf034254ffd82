//! codeact core library
//!
//! A restricted evaluator for model-written Python snippets. A snippet sees
//! only the built-ins, modules and syntax its [`CapabilityPolicy`] allows,
//! plus the tools its caller binds, and every run ends in a typed
//! [`EvaluationResult`].

pub mod config;
pub mod default_tools;
pub mod error;
mod interp;
pub mod metrics;
pub mod namespace;
pub mod obs;
pub mod policy;
mod pyfmt;
pub mod render;
pub mod result;
pub mod sandbox;
pub mod session;
pub mod telemetry;
pub mod tool;
pub mod value;

pub use config::{ConfigError, EvaluatorConfig};
pub use default_tools::{
    FinalAnswerTool, InputSource, PythonInterpreterTool, ScriptedSource, StdinSource,
    UserInputTool,
};
pub use error::{ErrorKind, EvaluationError, SourceSpan};
pub use namespace::{ExecutionNamespace, ModuleBinding, ModuleMember, NamespaceBuilder};
pub use policy::{
    CapabilityPolicy, NodeKind, BASE_BUILTINS, BASE_BUILTIN_MODULES, DENIED_BUILTINS,
};
pub use render::{render, render_error, render_observation, truncate_content, Rendered};
pub use result::{EvaluationResult, Phase};
pub use sandbox::{evaluate, execute_snippet, execute_snippet_in_session, Sandbox};
pub use session::{SessionError, SessionState};
pub use telemetry::init_tracing;
pub use tool::{bind_arguments, FnTool, Tool, ToolArgs, ToolError, ToolInput, ToolSpec, ValueType};
pub use value::{ImageData, Value};
