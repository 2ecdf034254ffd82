//! Per-evaluation namespace: static tools, policy-filtered built-ins and
//! the set of authorised imports.
//!
//! A namespace is built fresh for every evaluation and never reused. The
//! builder only assembles what the snippet may reach; the evaluator is the
//! only thing that introduces new bindings.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::{ErrorKind, EvaluationError};
use crate::interp::builtins;
use crate::policy::{is_reflective_name, CapabilityPolicy};
use crate::tool::Tool;
use crate::value::Value;

/// A member of a caller-supplied module.
#[derive(Debug, Clone)]
pub enum ModuleMember {
    Tool(Arc<dyn Tool>),
    Value(Value),
    Submodule(ModuleBinding),
}

/// A concrete implementation for an importable module name, e.g. a
/// `requests` module whose `get` is a tool the caller controls.
#[derive(Debug, Clone)]
pub struct ModuleBinding {
    name: String,
    members: BTreeMap<String, ModuleMember>,
}

impl ModuleBinding {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: BTreeMap::new(),
        }
    }

    /// Expose `tool` under its own name.
    pub fn with_tool(self, tool: Arc<dyn Tool>) -> Self {
        let name = tool.name().to_string();
        self.with_function(name, tool)
    }

    /// Expose `tool` under `name`.
    pub fn with_function(mut self, name: impl Into<String>, tool: Arc<dyn Tool>) -> Self {
        self.members.insert(name.into(), ModuleMember::Tool(tool));
        self
    }

    pub fn with_value(mut self, name: impl Into<String>, value: Value) -> Self {
        self.members.insert(name.into(), ModuleMember::Value(value));
        self
    }

    /// Nest `module` under this one. Its name is the last dotted component.
    pub fn with_submodule(mut self, module: ModuleBinding) -> Self {
        let short = module
            .name
            .rsplit('.')
            .next()
            .unwrap_or(module.name.as_str())
            .to_string();
        let full = format!("{}.{}", self.name, short);
        self.members
            .insert(short, ModuleMember::Submodule(module.renamed(full)));
        self
    }

    fn renamed(mut self, name: String) -> Self {
        let members = std::mem::take(&mut self.members);
        self.members = members
            .into_iter()
            .map(|(short, member)| match member {
                ModuleMember::Submodule(sub) => {
                    let full = format!("{name}.{short}");
                    (short, ModuleMember::Submodule(sub.renamed(full)))
                }
                other => (short, other),
            })
            .collect();
        self.name = name;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn member(&self, name: &str) -> Option<&ModuleMember> {
        self.members.get(name)
    }

    pub fn members(&self) -> impl Iterator<Item = (&str, &ModuleMember)> {
        self.members.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Walk dotted `path` (relative to this module) through submodules.
    pub fn resolve(&self, path: &[&str]) -> Option<&ModuleBinding> {
        match path.split_first() {
            None => Some(self),
            Some((head, rest)) => match self.members.get(*head) {
                Some(ModuleMember::Submodule(sub)) => sub.resolve(rest),
                _ => None,
            },
        }
    }
}

/// The flattened set of names visible to one snippet.
#[derive(Debug, Clone)]
pub struct ExecutionNamespace {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    builtins: BTreeSet<String>,
    authorized_imports: BTreeSet<String>,
    modules: BTreeMap<String, ModuleBinding>,
}

impl ExecutionNamespace {
    /// Build a namespace from static tools and authorised imports.
    pub fn build(
        policy: &CapabilityPolicy,
        static_tools: &[Arc<dyn Tool>],
        authorized_imports: &BTreeSet<String>,
    ) -> Result<Self, EvaluationError> {
        NamespaceBuilder::new(policy)
            .tools(static_tools.iter().cloned())
            .authorize_all(authorized_imports.iter().cloned())
            .build()
    }

    pub fn tool(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn tools(&self) -> impl Iterator<Item = &Arc<dyn Tool>> {
        self.tools.values()
    }

    /// Built-ins reachable by name. Shadowed built-ins are not listed.
    pub fn has_builtin(&self, name: &str) -> bool {
        self.builtins.contains(name)
    }

    pub fn builtin_names(&self) -> impl Iterator<Item = &str> {
        self.builtins.iter().map(String::as_str)
    }

    pub fn authorized_imports(&self) -> &BTreeSet<String> {
        &self.authorized_imports
    }

    /// A caller-supplied implementation for a dotted module name.
    pub fn module_binding(&self, dotted: &str) -> Option<&ModuleBinding> {
        let mut parts = dotted.split('.');
        let top = self.modules.get(parts.next()?)?;
        let rest: Vec<&str> = parts.collect();
        top.resolve(&rest)
    }
}

/// Incremental construction of an [`ExecutionNamespace`].
pub struct NamespaceBuilder<'p> {
    policy: &'p CapabilityPolicy,
    tools: Vec<Arc<dyn Tool>>,
    authorized_imports: BTreeSet<String>,
    modules: Vec<ModuleBinding>,
}

impl<'p> NamespaceBuilder<'p> {
    pub fn new(policy: &'p CapabilityPolicy) -> Self {
        Self {
            policy,
            tools: Vec::new(),
            authorized_imports: BTreeSet::new(),
            modules: Vec::new(),
        }
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn authorize(mut self, module: impl Into<String>) -> Self {
        self.authorized_imports.insert(module.into());
        self
    }

    pub fn authorize_all(mut self, modules: impl IntoIterator<Item = String>) -> Self {
        self.authorized_imports.extend(modules);
        self
    }

    pub fn module(mut self, binding: ModuleBinding) -> Self {
        self.modules.push(binding);
        self
    }

    pub fn modules(mut self, bindings: impl IntoIterator<Item = ModuleBinding>) -> Self {
        self.modules.extend(bindings);
        self
    }

    pub fn build(self) -> Result<ExecutionNamespace, EvaluationError> {
        let mut tools = BTreeMap::new();
        for tool in self.tools {
            let name = tool.name().to_string();
            if !is_identifier(&name) || is_reflective_name(&name) {
                return Err(EvaluationError::new(
                    ErrorKind::RuntimeFault,
                    format!("Tool name '{name}' is not a valid identifier."),
                ));
            }
            if tools.insert(name.clone(), tool).is_some() {
                return Err(EvaluationError::new(
                    ErrorKind::RuntimeFault,
                    format!("Two static tools share the name '{name}'."),
                ));
            }
        }

        let builtins = self
            .policy
            .allowed_builtins()
            .filter(|name| builtins::is_implemented(name) && !tools.contains_key(*name))
            .map(str::to_string)
            .collect();

        let mut modules = BTreeMap::new();
        for binding in self.modules {
            let name = binding.name().to_string();
            if name.contains('.') {
                return Err(EvaluationError::runtime(format!(
                    "Module binding '{name}' must be a top-level name; nest it with with_submodule."
                )));
            }
            if modules.insert(name.clone(), binding).is_some() {
                return Err(EvaluationError::runtime(format!(
                    "Two module bindings share the name '{name}'."
                )));
            }
        }

        tracing::debug!(
            tools = tools.len(),
            modules = modules.len(),
            authorized_imports = self.authorized_imports.len(),
            "namespace built"
        );

        Ok(ExecutionNamespace {
            tools,
            builtins,
            authorized_imports: self.authorized_imports,
            modules,
        })
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_alphabetic())
        && chars.all(|c| c == '_' || c.is_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{FnTool, ToolSpec, ValueType};

    fn tool(name: &str) -> Arc<dyn Tool> {
        Arc::new(FnTool::new(
            ToolSpec::new(name, "test tool", ValueType::Any),
            |_| Ok(Value::None),
        ))
    }

    #[test]
    fn test_tools_shadow_builtins() {
        let policy = CapabilityPolicy::standard();
        let ns = ExecutionNamespace::build(&policy, &[tool("len")], &BTreeSet::new()).unwrap();
        assert!(ns.tool("len").is_some());
        assert!(!ns.has_builtin("len"));
        assert!(ns.has_builtin("print"));
    }

    #[test]
    fn test_duplicate_tool_names_fail_fast() {
        let policy = CapabilityPolicy::standard();
        let err = ExecutionNamespace::build(&policy, &[tool("search"), tool("search")], &BTreeSet::new())
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::RuntimeFault);
        assert!(err.message.contains("search"));
    }

    #[test]
    fn test_reflective_tool_names_rejected() {
        let policy = CapabilityPolicy::standard();
        assert!(ExecutionNamespace::build(&policy, &[tool("__import__")], &BTreeSet::new()).is_err());
        assert!(ExecutionNamespace::build(&policy, &[tool("not valid")], &BTreeSet::new()).is_err());
    }

    #[test]
    fn test_builtins_follow_policy() {
        let policy = CapabilityPolicy::standard().without_builtin("print");
        let ns = NamespaceBuilder::new(&policy).build().unwrap();
        assert!(!ns.has_builtin("print"));
        assert!(!ns.has_builtin("open"));
        assert!(ns.has_builtin("sorted"));
    }

    #[test]
    fn test_module_bindings_resolve_submodules() {
        let policy = CapabilityPolicy::standard();
        let ns = NamespaceBuilder::new(&policy)
            .authorize("requests")
            .module(
                ModuleBinding::new("requests")
                    .with_function("get", tool("fetch"))
                    .with_submodule(
                        ModuleBinding::new("adapters").with_value("DEFAULT_RETRIES", Value::Int(0)),
                    ),
            )
            .build()
            .unwrap();
        assert!(ns.authorized_imports().contains("requests"));
        let adapters = ns.module_binding("requests.adapters").unwrap();
        assert_eq!(adapters.name(), "requests.adapters");
        assert!(matches!(
            adapters.member("DEFAULT_RETRIES"),
            Some(ModuleMember::Value(Value::Int(0)))
        ));
        assert!(ns.module_binding("requests.missing").is_none());
        assert!(ns.module_binding("os").is_none());
    }
}
