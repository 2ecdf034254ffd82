//! Capability policy: which built-ins, modules, attributes and syntax a
//! snippet may reach.
//!
//! The policy is pure data plus predicates. It is immutable once built,
//! cheap to clone, and shared read-only across sessions. Reflective names are
//! denied before any allow-list is consulted, so no allow-list entry can ever
//! re-open them.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Modules every evaluation may import.
pub const BASE_BUILTIN_MODULES: &[&str] = &[
    "collections",
    "datetime",
    "itertools",
    "math",
    "queue",
    "random",
    "re",
    "stat",
    "statistics",
    "time",
    "unicodedata",
];

/// Built-in names with no ambient-environment access.
pub const BASE_BUILTINS: &[&str] = &[
    "abs",
    "all",
    "any",
    "bin",
    "bool",
    "callable",
    "chr",
    "dict",
    "divmod",
    "enumerate",
    "filter",
    "float",
    "format",
    "getattr",
    "hasattr",
    "hex",
    "int",
    "isinstance",
    "iter",
    "len",
    "list",
    "map",
    "max",
    "min",
    "next",
    "oct",
    "ord",
    "pow",
    "print",
    "range",
    "repr",
    "reversed",
    "round",
    "set",
    "sorted",
    "str",
    "sum",
    "tuple",
    "type",
    "zip",
    // exception classes
    "ArithmeticError",
    "AssertionError",
    "AttributeError",
    "Exception",
    "ImportError",
    "IndexError",
    "KeyError",
    "LookupError",
    "ModuleNotFoundError",
    "NameError",
    "NotImplementedError",
    "OverflowError",
    "RecursionError",
    "RuntimeError",
    "StopIteration",
    "TimeoutError",
    "TypeError",
    "ValueError",
    "ZeroDivisionError",
];

/// Built-ins that are never reachable: ambient I/O, code loading,
/// interpreter reflection, or object-model hooks this runtime does not
/// provide.
pub const DENIED_BUILTINS: &[&str] = &[
    "__build_class__",
    "__import__",
    "aiter",
    "anext",
    "ascii",
    "breakpoint",
    "bytearray",
    "bytes",
    "classmethod",
    "compile",
    "complex",
    "copyright",
    "credits",
    "delattr",
    "dir",
    "eval",
    "exec",
    "exit",
    "frozenset",
    "globals",
    "hash",
    "help",
    "id",
    "input",
    "issubclass",
    "license",
    "locals",
    "memoryview",
    "object",
    "open",
    "property",
    "quit",
    "setattr",
    "slice",
    "staticmethod",
    "super",
    "vars",
];

/// Non-dunder attributes that expose frames, code objects or the type
/// hierarchy.
const REFLECTIVE_ATTRIBUTES: &[&str] = &[
    "co_code",
    "f_back",
    "f_builtins",
    "f_globals",
    "f_locals",
    "format_map",
    "func_code",
    "func_globals",
    "gi_code",
    "gi_frame",
    "mro",
    "tb_frame",
];

const STR_ATTRS: &[&str] = &[
    "capitalize",
    "casefold",
    "center",
    "count",
    "endswith",
    "find",
    "format",
    "index",
    "isalnum",
    "isalpha",
    "isdecimal",
    "isdigit",
    "islower",
    "isnumeric",
    "isspace",
    "istitle",
    "isupper",
    "join",
    "ljust",
    "lower",
    "lstrip",
    "partition",
    "removeprefix",
    "removesuffix",
    "replace",
    "rfind",
    "rindex",
    "rjust",
    "rpartition",
    "rsplit",
    "rstrip",
    "split",
    "splitlines",
    "startswith",
    "strip",
    "swapcase",
    "title",
    "upper",
    "zfill",
];

const LIST_ATTRS: &[&str] = &[
    "append", "clear", "copy", "count", "extend", "index", "insert", "pop", "remove", "reverse",
    "sort",
];

const DICT_ATTRS: &[&str] = &[
    "clear",
    "copy",
    "get",
    "items",
    "keys",
    "pop",
    "popitem",
    "setdefault",
    "update",
    "values",
];

const SET_ATTRS: &[&str] = &[
    "add",
    "clear",
    "copy",
    "difference",
    "discard",
    "intersection",
    "isdisjoint",
    "issubset",
    "issuperset",
    "pop",
    "remove",
    "symmetric_difference",
    "union",
    "update",
];

const COUNTER_ATTRS: &[&str] = &[
    "clear",
    "copy",
    "elements",
    "get",
    "items",
    "keys",
    "most_common",
    "pop",
    "setdefault",
    "total",
    "update",
    "values",
];

const DEQUE_ATTRS: &[&str] = &[
    "append",
    "appendleft",
    "clear",
    "copy",
    "count",
    "extend",
    "extendleft",
    "index",
    "pop",
    "popleft",
    "reverse",
    "rotate",
];

const TUPLE_ATTRS: &[&str] = &["count", "index"];
const INT_ATTRS: &[&str] = &["bit_length"];
const FLOAT_ATTRS: &[&str] = &["is_integer"];
const RANGE_ATTRS: &[&str] = &["count", "index", "start", "step", "stop"];
const IMAGE_ATTRS: &[&str] = &["format", "height", "size", "width"];
const TOOL_ATTRS: &[&str] = &["description", "inputs", "name", "output_type"];
const EXCEPTION_ATTRS: &[&str] = &["args"];
const MATCH_ATTRS: &[&str] = &["end", "group", "groupdict", "groups", "span", "start"];
const PATTERN_ATTRS: &[&str] = &[
    "findall", "finditer", "fullmatch", "match", "pattern", "search", "split", "sub",
];

/// Runtime types whose members are defined by the object itself (a module's
/// exports) rather than by a fixed table.
const DELEGATED_TYPES: &[&str] = &["module"];

fn attribute_table(object_type: &str) -> Option<&'static [&'static str]> {
    match object_type {
        "str" => Some(STR_ATTRS),
        "list" => Some(LIST_ATTRS),
        "dict" | "defaultdict" => Some(DICT_ATTRS),
        "Counter" => Some(COUNTER_ATTRS),
        "deque" => Some(DEQUE_ATTRS),
        "set" => Some(SET_ATTRS),
        "tuple" => Some(TUPLE_ATTRS),
        "int" | "bool" => Some(INT_ATTRS),
        "float" => Some(FLOAT_ATTRS),
        "range" => Some(RANGE_ATTRS),
        "image" => Some(IMAGE_ATTRS),
        "tool" => Some(TOOL_ATTRS),
        "exception" => Some(EXCEPTION_ATTRS),
        "match" => Some(MATCH_ATTRS),
        "pattern" => Some(PATTERN_ATTRS),
        _ => None,
    }
}

/// Dunder names and known reflection hooks. Denied unconditionally.
pub fn is_reflective_name(name: &str) -> bool {
    name.starts_with("__") || REFLECTIVE_ATTRIBUTES.contains(&name)
}

/// Syntax node kinds the evaluator has a rule for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    // statements
    Expr,
    Assign,
    AugAssign,
    AnnAssign,
    Delete,
    If,
    For,
    While,
    Break,
    Continue,
    Pass,
    FunctionDef,
    Return,
    Import,
    ImportFrom,
    Assert,
    Raise,
    Try,
    // expressions
    Constant,
    Name,
    BinOp,
    UnaryOp,
    BoolOp,
    Compare,
    IfExp,
    Call,
    Attribute,
    Subscript,
    Slice,
    List,
    Tuple,
    Dict,
    Set,
    ListComp,
    SetComp,
    DictComp,
    GeneratorExp,
    Lambda,
    JoinedStr,
    FormattedValue,
    Starred,
    NamedExpr,
}

impl NodeKind {
    pub const ALL: [NodeKind; 42] = [
        NodeKind::Expr,
        NodeKind::Assign,
        NodeKind::AugAssign,
        NodeKind::AnnAssign,
        NodeKind::Delete,
        NodeKind::If,
        NodeKind::For,
        NodeKind::While,
        NodeKind::Break,
        NodeKind::Continue,
        NodeKind::Pass,
        NodeKind::FunctionDef,
        NodeKind::Return,
        NodeKind::Import,
        NodeKind::ImportFrom,
        NodeKind::Assert,
        NodeKind::Raise,
        NodeKind::Try,
        NodeKind::Constant,
        NodeKind::Name,
        NodeKind::BinOp,
        NodeKind::UnaryOp,
        NodeKind::BoolOp,
        NodeKind::Compare,
        NodeKind::IfExp,
        NodeKind::Call,
        NodeKind::Attribute,
        NodeKind::Subscript,
        NodeKind::Slice,
        NodeKind::List,
        NodeKind::Tuple,
        NodeKind::Dict,
        NodeKind::Set,
        NodeKind::ListComp,
        NodeKind::SetComp,
        NodeKind::DictComp,
        NodeKind::GeneratorExp,
        NodeKind::Lambda,
        NodeKind::JoinedStr,
        NodeKind::FormattedValue,
        NodeKind::Starred,
        NodeKind::NamedExpr,
    ];

    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Does `pattern` (an allow-list entry) cover module `name`?
///
/// `pkg` covers `pkg` and `pkg.sub`; `pkg.*` does the same; `*` covers
/// everything.
fn module_pattern_matches(pattern: &str, name: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    let base = pattern.strip_suffix(".*").unwrap_or(pattern);
    name == base
        || name
            .strip_prefix(base)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// The allow-lists governing one evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityPolicy {
    allowed_builtins: BTreeSet<String>,
    allowed_modules: BTreeSet<String>,
    allowed_nodes: BTreeSet<NodeKind>,
}

impl Default for CapabilityPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

impl CapabilityPolicy {
    /// Nothing allowed. Useful as a base for hand-built policies.
    pub fn empty() -> Self {
        Self {
            allowed_builtins: BTreeSet::new(),
            allowed_modules: BTreeSet::new(),
            allowed_nodes: BTreeSet::new(),
        }
    }

    /// Base built-ins, base modules, every supported node kind.
    pub fn standard() -> Self {
        Self {
            allowed_builtins: BASE_BUILTINS.iter().map(|s| (*s).to_string()).collect(),
            allowed_modules: BASE_BUILTIN_MODULES
                .iter()
                .map(|s| (*s).to_string())
                .collect(),
            allowed_nodes: NodeKind::ALL.iter().copied().collect(),
        }
    }

    /// Allow a built-in. Denied and reflective names are ignored.
    pub fn with_builtin(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if Self::is_builtin_denied(&name) {
            tracing::warn!(builtin = %name, "ignoring denied builtin in policy");
        } else {
            self.allowed_builtins.insert(name);
        }
        self
    }

    pub fn without_builtin(mut self, name: &str) -> Self {
        self.allowed_builtins.remove(name);
        self
    }

    pub fn with_module(mut self, name: impl Into<String>) -> Self {
        self.allowed_modules.insert(name.into());
        self
    }

    pub fn without_module(mut self, name: &str) -> Self {
        self.allowed_modules.remove(name);
        self
    }

    pub fn with_node(mut self, kind: NodeKind) -> Self {
        self.allowed_nodes.insert(kind);
        self
    }

    pub fn without_node(mut self, kind: NodeKind) -> Self {
        self.allowed_nodes.remove(&kind);
        self
    }

    /// Names that are never reachable, regardless of allow-lists.
    pub fn is_builtin_denied(name: &str) -> bool {
        is_reflective_name(name) || DENIED_BUILTINS.contains(&name)
    }

    pub fn is_builtin_allowed(&self, name: &str) -> bool {
        !Self::is_builtin_denied(name) && self.allowed_builtins.contains(name)
    }

    /// `name` may be imported if the base allow-list or the per-evaluation
    /// `authorized_imports` covers it. Dunder module names are never
    /// importable.
    pub fn is_module_allowed(&self, name: &str, authorized_imports: &BTreeSet<String>) -> bool {
        if name.is_empty() || name.split('.').any(|part| part.is_empty() || is_reflective_name(part))
        {
            return false;
        }
        self.allowed_modules
            .iter()
            .chain(authorized_imports.iter())
            .any(|pattern| module_pattern_matches(pattern, name))
    }

    /// Attribute access is decided per concrete runtime type.
    pub fn is_attribute_allowed(&self, object_type: &str, attribute: &str) -> bool {
        if is_reflective_name(attribute) {
            return false;
        }
        match attribute_table(object_type) {
            Some(allowed) => allowed.contains(&attribute),
            None => DELEGATED_TYPES.contains(&object_type),
        }
    }

    pub fn is_node_allowed(&self, kind: NodeKind) -> bool {
        self.allowed_nodes.contains(&kind)
    }

    pub fn allowed_builtins(&self) -> impl Iterator<Item = &str> {
        self.allowed_builtins.iter().map(String::as_str)
    }

    pub fn allowed_modules(&self) -> impl Iterator<Item = &str> {
        self.allowed_modules.iter().map(String::as_str)
    }

    pub fn allowed_nodes(&self) -> impl Iterator<Item = NodeKind> + '_ {
        self.allowed_nodes.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authorized(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_standard_allows_pure_builtins_only() {
        let policy = CapabilityPolicy::standard();
        assert!(policy.is_builtin_allowed("len"));
        assert!(policy.is_builtin_allowed("print"));
        assert!(policy.is_builtin_allowed("ValueError"));
        assert!(!policy.is_builtin_allowed("open"));
        assert!(!policy.is_builtin_allowed("eval"));
        assert!(!policy.is_builtin_allowed("__import__"));
        assert!(!policy.is_builtin_allowed("not_a_builtin"));
    }

    #[test]
    fn test_denied_builtins_cannot_be_allowed() {
        let policy = CapabilityPolicy::standard()
            .with_builtin("exec")
            .with_builtin("__import__");
        assert!(!policy.is_builtin_allowed("exec"));
        assert!(!policy.is_builtin_allowed("__import__"));
    }

    #[test]
    fn test_without_builtin_removes() {
        let policy = CapabilityPolicy::standard().without_builtin("print");
        assert!(!policy.is_builtin_allowed("print"));
    }

    #[test]
    fn test_module_allow_list_and_authorized_union() {
        let policy = CapabilityPolicy::standard();
        let none = BTreeSet::new();
        assert!(policy.is_module_allowed("math", &none));
        assert!(policy.is_module_allowed("collections.abc", &none));
        assert!(!policy.is_module_allowed("os", &none));
        assert!(!policy.is_module_allowed("mathx", &none));
        assert!(policy.is_module_allowed("requests", &authorized(&["requests"])));
        assert!(policy.is_module_allowed("requests.adapters", &authorized(&["requests"])));
    }

    #[test]
    fn test_module_wildcards() {
        let policy = CapabilityPolicy::standard();
        assert!(policy.is_module_allowed("numpy", &authorized(&["numpy.*"])));
        assert!(policy.is_module_allowed("numpy.linalg", &authorized(&["numpy.*"])));
        assert!(!policy.is_module_allowed("numpyx", &authorized(&["numpy.*"])));
        assert!(policy.is_module_allowed("anything.at.all", &authorized(&["*"])));
        assert!(!policy.is_module_allowed("__main__", &authorized(&["*"])));
        assert!(!policy.is_module_allowed("pkg..x", &authorized(&["*"])));
    }

    #[test]
    fn test_attributes_checked_per_type() {
        let policy = CapabilityPolicy::standard();
        assert!(policy.is_attribute_allowed("str", "upper"));
        assert!(!policy.is_attribute_allowed("str", "encode"));
        assert!(policy.is_attribute_allowed("list", "append"));
        assert!(!policy.is_attribute_allowed("list", "upper"));
        assert!(policy.is_attribute_allowed("module", "sqrt"));
        assert!(!policy.is_attribute_allowed("function", "anything"));
    }

    #[test]
    fn test_reflective_attributes_always_blocked() {
        let policy = CapabilityPolicy::standard();
        for attr in ["__class__", "__globals__", "__subclasses__", "gi_frame", "mro"] {
            assert!(!policy.is_attribute_allowed("module", attr), "{attr}");
            assert!(!policy.is_attribute_allowed("str", attr), "{attr}");
        }
    }

    #[test]
    fn test_node_kinds() {
        let policy = CapabilityPolicy::standard();
        assert!(NodeKind::ALL.iter().all(|k| policy.is_node_allowed(*k)));
        let strict = policy.without_node(NodeKind::While);
        assert!(!strict.is_node_allowed(NodeKind::While));
        assert!(CapabilityPolicy::empty().allowed_nodes().next().is_none());
        for (i, kind) in NodeKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn test_policy_serde_roundtrip() {
        let policy = CapabilityPolicy::standard().with_module("json");
        let json = serde_json::to_string(&policy).unwrap();
        let back: CapabilityPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, back);
    }
}
