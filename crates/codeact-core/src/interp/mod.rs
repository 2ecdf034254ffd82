//! Tree-walking evaluator for the restricted snippet language.
//!
//! The snippet is parsed with the Python grammar and walked node by node.
//! Every name lookup, attribute access, import and syntax node is checked
//! against the [`CapabilityPolicy`] as it is reached; a violation aborts the
//! whole snippet. Everything else that goes wrong surfaces as a catchable
//! exception, and escapes as a `RuntimeFault` or `UndefinedName` if nothing
//! catches it.

pub(crate) mod builtins;
mod expr;
pub(crate) mod fault;
mod methods;
pub(crate) mod modules;
pub(crate) mod object;
mod ops;
mod stmt;
mod strings;
mod subscript;

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use rustpython_parser::{ast, Parse};

use self::fault::{exc, policy, recursion_error, type_error, EvalResult, ExcKind, Fault, Unwind};
use self::object::{
    Args, Dict, Function, FunctionBody, IterObj, Method, Object, RangeObj, Scope, ScopeKind,
    ScopeRef,
};
use crate::config::EvaluatorConfig;
use crate::error::{ErrorKind, EvaluationError, LineIndex};
use crate::metrics::METRICS;
use crate::namespace::ExecutionNamespace;
use crate::obs;
use crate::policy::{is_reflective_name, CapabilityPolicy, NodeKind};
use crate::tool::{bind_arguments, Tool};
use crate::value::Value;

/// Parse `code` as a module body.
pub(crate) fn parse(code: &str) -> Result<Vec<ast::Stmt>, EvaluationError> {
    ast::Suite::parse(code, "<snippet>").map_err(|err| {
        let offset = usize::from(err.offset);
        EvaluationError::new(ErrorKind::SyntaxInvalid, err.error.to_string())
            .with_location(LineIndex::new(code).span(offset, offset))
    })
}

/// How an evaluation ended, when it did not fail.
#[derive(Debug)]
pub(crate) struct Completion {
    pub value: Value,
    pub is_final_answer: bool,
}

#[derive(Debug)]
pub(crate) struct RunOutput {
    pub outcome: Result<Completion, EvaluationError>,
    pub captured_output: String,
    pub operations: u64,
    /// Portable module-level bindings at the end of a successful run.
    pub globals: BTreeMap<String, Value>,
}

/// Lazily advanced iteration state for `for` loops and materialisation.
pub(crate) enum Cursor {
    Items(std::vec::IntoIter<Object>),
    /// A list read by position, so appends and removals during the loop
    /// are seen.
    List { items: Rc<RefCell<Vec<Object>>>, pos: usize },
    /// Keys snapshotted at the start; the table must keep its size.
    Keys {
        table: Rc<RefCell<Dict>>,
        keys: std::vec::IntoIter<Object>,
        len: usize,
        what: &'static str,
    },
    Range { next: i64, remaining: usize, step: i64 },
    Shared(Rc<RefCell<IterObj>>),
}

impl Cursor {
    fn next_item(&mut self) -> EvalResult<Option<Object>> {
        Ok(match self {
            Cursor::Items(items) => items.next(),
            Cursor::List { items, pos } => {
                let item = items.borrow().get(*pos).cloned();
                *pos += 1;
                item
            }
            Cursor::Keys {
                table,
                keys,
                len,
                what,
            } => {
                if table.borrow().len() != *len {
                    return Err(exc(
                        ExcKind::RuntimeError,
                        format!("{what} changed size during iteration"),
                    ));
                }
                keys.next()
            }
            Cursor::Range {
                next,
                remaining,
                step,
            } => {
                if *remaining == 0 {
                    return Ok(None);
                }
                let value = *next;
                *remaining -= 1;
                *next = next.wrapping_add(*step);
                Some(Object::Int(value))
            }
            Cursor::Shared(it) => it.borrow_mut().next_item(),
        })
    }

    fn size_hint(&self) -> usize {
        match self {
            Cursor::Items(items) => items.len(),
            Cursor::List { items, pos } => items.borrow().len().saturating_sub(*pos),
            Cursor::Keys { keys, .. } => keys.len(),
            Cursor::Range { remaining, .. } => *remaining,
            Cursor::Shared(it) => {
                let it = it.borrow();
                it.items.len().saturating_sub(it.pos)
            }
        }
    }
}

const CANCEL_POLL_INTERVAL: u64 = 1024;

/// Deepest expression nesting evaluated before `RecursionError`.
const MAX_EXPR_DEPTH: usize = 2000;

pub(crate) struct Interpreter<'a> {
    namespace: &'a ExecutionNamespace,
    policy: &'a CapabilityPolicy,
    config: &'a EvaluatorConfig,
    lines: LineIndex<'a>,
    allowed_nodes: [bool; NodeKind::ALL.len()],
    globals: HashMap<String, Object>,
    frame: Option<ScopeRef>,
    output: String,
    operations: u64,
    next_poll: u64,
    depth: usize,
    expr_depth: usize,
    rng: StdRng,
    cancel: Option<&'a AtomicBool>,
    handling: Vec<Object>,
    started: Instant,
    export_globals: bool,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        source: &'a str,
        namespace: &'a ExecutionNamespace,
        policy: &'a CapabilityPolicy,
        config: &'a EvaluatorConfig,
        cancel: Option<&'a AtomicBool>,
    ) -> Self {
        let mut allowed_nodes = [false; NodeKind::ALL.len()];
        for kind in policy.allowed_nodes() {
            allowed_nodes[kind.index()] = true;
        }
        Self {
            namespace,
            policy,
            config,
            lines: LineIndex::new(source),
            allowed_nodes,
            globals: HashMap::new(),
            frame: None,
            output: String::new(),
            operations: 0,
            next_poll: CANCEL_POLL_INTERVAL,
            depth: 0,
            expr_depth: 0,
            rng: StdRng::from_entropy(),
            cancel,
            handling: Vec::new(),
            started: Instant::now(),
            export_globals: false,
        }
    }

    /// Pre-bind module-level names from a session. The run then reports
    /// its portable globals in [`RunOutput::globals`].
    pub fn seed_globals<'v>(&mut self, vars: impl IntoIterator<Item = (&'v String, &'v Value)>) {
        self.export_globals = true;
        for (name, value) in vars {
            if is_reflective_name(name) || self.namespace.tool(name).is_some() {
                continue;
            }
            self.globals.insert(name.clone(), Object::from_value(value));
        }
    }

    pub fn run(mut self, suite: &[ast::Stmt]) -> RunOutput {
        let finished = match self.exec_module(suite) {
            Ok(value) => Ok((value, false)),
            Err(Unwind::FinalAnswer(value)) => Ok((value, true)),
            Err(Unwind::Fault(fault)) => Err(*fault),
        };
        let outcome = finished
            .and_then(|(value, is_final_answer)| {
                Ok(Completion {
                    value: value.try_to_value()?,
                    is_final_answer,
                })
            })
            .map_err(|fault| self.to_error(fault));
        let globals = if outcome.is_ok() && self.export_globals {
            self.portable_globals()
        } else {
            BTreeMap::new()
        };
        RunOutput {
            outcome,
            captured_output: std::mem::take(&mut self.output),
            operations: self.operations,
            globals,
        }
    }

    fn exec_module(&mut self, suite: &[ast::Stmt]) -> EvalResult<Object> {
        let mut last = Object::None;
        for stmt in suite {
            last = Object::None;
            if let ast::Stmt::Expr(ast::StmtExpr { value, range }) = stmt {
                self.enter_node(NodeKind::Expr)
                    .map_err(|u| u.at(*range))?;
                last = self.eval_expr(value)?;
                continue;
            }
            match self.exec_stmt(stmt)? {
                Flow::Next => {}
                Flow::Return(value) => return Ok(value),
                Flow::Break | Flow::Continue => {
                    return Err(Unwind::from(Fault::fatal("'break' or 'continue' outside loop"))
                        .at(ast::Ranged::range(stmt)))
                }
            }
        }
        Ok(last)
    }

    fn to_error(&self, fault: Fault) -> EvaluationError {
        let error = EvaluationError::new(fault.kind, fault.message);
        match fault.range {
            Some(range) => error.with_location(
                self.lines
                    .span(usize::from(range.start()), usize::from(range.end())),
            ),
            None => error,
        }
    }

    fn portable_globals(&self) -> BTreeMap<String, Value> {
        self.globals
            .iter()
            .filter(|(_, v)| v.is_portable())
            .map(|(k, v)| (k.clone(), v.to_value()))
            .collect()
    }

    // ------------------------------------------------------------------
    // Budget and policy gates
    // ------------------------------------------------------------------

    /// Count `units` operations against the budget and poll for
    /// cancellation.
    pub(crate) fn charge(&mut self, units: usize) -> EvalResult<()> {
        self.operations = self.operations.saturating_add(units as u64);
        if self.operations > self.config.max_operations {
            return Err(Fault::fatal(format!(
                "Reached the max number of operations of {}. Maybe there is an infinite loop somewhere in the code, or you're just asking too many calculations.",
                self.config.max_operations
            ))
            .into());
        }
        if self.operations >= self.next_poll {
            self.next_poll = self.operations + CANCEL_POLL_INTERVAL;
            self.check_cancelled()?;
        }
        Ok(())
    }

    pub(crate) fn check_cancelled(&self) -> EvalResult<()> {
        if self.cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            return Err(Fault::fatal("Evaluation was cancelled before it finished.").into());
        }
        Ok(())
    }

    /// Tick the budget and check that `kind` is allowed.
    pub(crate) fn enter_node(&mut self, kind: NodeKind) -> EvalResult<()> {
        self.charge(1)?;
        if self.allowed_nodes[kind.index()] {
            Ok(())
        } else {
            Err(policy(
                ErrorKind::NodeBlocked,
                format!("{kind} is not allowed by the capability policy."),
            ))
        }
    }

    /// `what` carries its own verb: "Class definitions are".
    pub(crate) fn unsupported(&self, what: &str) -> Unwind {
        policy(ErrorKind::NodeBlocked, format!("{what} not supported."))
    }

    /// Track one level of expression nesting around `eval`.
    pub(crate) fn nested<T>(&mut self, eval: impl FnOnce(&mut Self) -> EvalResult<T>) -> EvalResult<T> {
        if self.expr_depth >= MAX_EXPR_DEPTH {
            return Err(recursion_error(" during evaluation"));
        }
        self.expr_depth += 1;
        let result = eval(self);
        self.expr_depth -= 1;
        result
    }

    pub(crate) fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    pub(crate) fn write_output(&mut self, text: &str) -> EvalResult<()> {
        self.charge(text.len() / 64)?;
        self.output.push_str(text);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Names
    // ------------------------------------------------------------------

    pub(crate) fn lookup(&self, name: &str) -> EvalResult<Object> {
        if is_reflective_name(name) {
            return Err(policy(
                ErrorKind::NameBlocked,
                format!("Access to name '{name}' is not allowed."),
            ));
        }
        let mut scope = self.frame.clone();
        while let Some(current) = scope {
            let parent = {
                let current = current.borrow();
                if let Some(value) = current.vars.get(name) {
                    return Ok(value.clone());
                }
                current.parent.clone()
            };
            scope = parent;
        }
        if let Some(value) = self.globals.get(name) {
            return Ok(value.clone());
        }
        if let Some(tool) = self.namespace.tool(name) {
            return Ok(Object::Tool(Arc::clone(tool)));
        }
        if self.namespace.has_builtin(name) {
            if let Some(builtin) = builtins::lookup(name) {
                return Ok(builtin);
            }
        }
        if CapabilityPolicy::is_builtin_denied(name) || builtins::is_implemented(name) {
            return Err(policy(
                ErrorKind::NameBlocked,
                format!(
                    "Forbidden function evaluation: '{name}' is not among the explicitly allowed tools or defined/imported in the preceding code."
                ),
            ));
        }
        Err(exc(
            ExcKind::NameError,
            format!("name '{name}' is not defined"),
        ))
    }

    fn check_binding(&self, name: &str) -> EvalResult<()> {
        if is_reflective_name(name) {
            return Err(policy(
                ErrorKind::NameBlocked,
                format!("Assignment to name '{name}' is not allowed."),
            ));
        }
        if self.namespace.tool(name).is_some() {
            return Err(exc(
                ExcKind::RuntimeError,
                format!("Cannot assign to name '{name}': doing this would erase the existing tool!"),
            ));
        }
        Ok(())
    }

    pub(crate) fn assign_name(&mut self, name: &str, value: Object) -> EvalResult<()> {
        self.check_binding(name)?;
        match &self.frame {
            Some(scope) => {
                scope.borrow_mut().vars.insert(name.to_string(), value);
            }
            None => {
                self.globals.insert(name.to_string(), value);
            }
        }
        Ok(())
    }

    /// `name := value` binds in the nearest function scope, skipping
    /// comprehension scopes.
    pub(crate) fn assign_walrus(&mut self, name: &str, value: Object) -> EvalResult<()> {
        self.check_binding(name)?;
        let mut scope = self.frame.clone();
        while let Some(current) = scope {
            let parent = {
                let mut current = current.borrow_mut();
                if matches!(current.kind, ScopeKind::Function) {
                    current.vars.insert(name.to_string(), value);
                    return Ok(());
                }
                current.parent.clone()
            };
            scope = parent;
        }
        self.globals.insert(name.to_string(), value);
        Ok(())
    }

    pub(crate) fn delete_name(&mut self, name: &str) -> EvalResult<()> {
        self.check_binding(name)?;
        let removed = match &self.frame {
            Some(scope) => scope.borrow_mut().vars.remove(name),
            None => self.globals.remove(name),
        };
        match removed {
            Some(_) => Ok(()),
            None => Err(exc(
                ExcKind::NameError,
                format!("name '{name}' is not defined"),
            )),
        }
    }

    /// Run `body` with a fresh comprehension scope on top of the current
    /// frame.
    pub(crate) fn with_comprehension_scope<T>(
        &mut self,
        body: impl FnOnce(&mut Self) -> EvalResult<T>,
    ) -> EvalResult<T> {
        let scope = Scope::new(ScopeKind::Comprehension, self.frame.clone());
        let saved = self.frame.replace(scope);
        let result = body(self);
        self.frame = saved;
        result
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    pub(crate) fn call(&mut self, callee: &Object, args: Args) -> EvalResult<Object> {
        match callee {
            Object::Builtin(builtin) => (builtin.func)(self, args),
            Object::Type(ty) => builtins::construct(self, *ty, args),
            Object::Function(function) => self.call_function(function, args),
            Object::Method(method) => methods::call_method(self, &method.receiver, &method.name, args),
            Object::Tool(tool) => self.call_tool(tool, args),
            other => Err(type_error(format!(
                "'{}' object is not callable",
                other.type_name()
            ))),
        }
    }

    pub(crate) fn call_function(&mut self, function: &Rc<Function>, args: Args) -> EvalResult<Object> {
        if self.depth >= self.config.max_call_depth {
            return Err(recursion_error(""));
        }
        let scope = Scope::new(ScopeKind::Function, function.closure.clone());
        let vars = bind_parameters(function, args)?;
        scope.borrow_mut().vars = vars;

        let saved = self.frame.replace(scope);
        self.depth += 1;
        let result = match &function.body {
            FunctionBody::Block(body) => match self.exec_block(body) {
                Ok(Flow::Return(value)) => Ok(value),
                Ok(_) => Ok(Object::None),
                Err(unwind) => Err(unwind),
            },
            FunctionBody::Lambda(body) => self.eval_expr(body),
        };
        self.depth -= 1;
        self.frame = saved;
        result
    }

    fn call_tool(&mut self, tool: &Arc<dyn Tool>, args: Args) -> EvalResult<Object> {
        let positional = args
            .positional
            .iter()
            .map(Object::try_to_value)
            .collect::<Result<Vec<_>, _>>()?;
        let keywords = args
            .keywords
            .iter()
            .map(|(k, v)| v.try_to_value().map(|v| (k.clone(), v)))
            .collect::<Result<Vec<_>, _>>()?;
        let bound = bind_arguments(tool.spec(), positional, keywords)
            .map_err(|err| type_error(err.to_string()))?;

        METRICS.inc_tool_calls();
        let result = tool.forward(&bound);
        obs::emit_tool_invoked(tool.name(), result.is_ok());
        let value = result.map_err(|err| exc(ExcKind::RuntimeError, err.to_string()))?;

        let object = Object::from_value(&value);
        if tool.is_final_answer() {
            return Err(Unwind::FinalAnswer(object));
        }
        Ok(object)
    }

    /// Call `callee` with positional arguments only.
    pub(crate) fn call_with(&mut self, callee: &Object, positional: Vec<Object>) -> EvalResult<Object> {
        self.call(callee, Args::new(positional))
    }

    // ------------------------------------------------------------------
    // Iteration
    // ------------------------------------------------------------------

    pub(crate) fn cursor(&self, obj: &Object) -> EvalResult<Cursor> {
        let items = match obj {
            Object::List(items) => {
                return Ok(Cursor::List {
                    items: Rc::clone(items),
                    pos: 0,
                })
            }
            Object::Tuple(items) => items.to_vec(),
            Object::Str(s) => s
                .chars()
                .map(|c| Object::str_from(c.to_string()))
                .collect(),
            Object::Dict(table) | Object::Set(table) => {
                let keys = table.borrow().keys();
                return Ok(Cursor::Keys {
                    table: Rc::clone(table),
                    len: keys.len(),
                    keys: keys.into_iter(),
                    what: if matches!(obj, Object::Set(_)) { "Set" } else { "dictionary" },
                });
            }
            Object::Deque(d) => d.borrow().iter().cloned().collect(),
            Object::Range(r) => {
                return Ok(Cursor::Range {
                    next: r.start,
                    remaining: r.len(),
                    step: r.step,
                })
            }
            Object::Iter(it) => return Ok(Cursor::Shared(Rc::clone(it))),
            other => {
                return Err(type_error(format!(
                    "'{}' object is not iterable",
                    other.type_name()
                )))
            }
        };
        Ok(Cursor::Items(items.into_iter()))
    }

    /// Advance a cursor by one, counting the step against the budget.
    pub(crate) fn advance(&mut self, cursor: &mut Cursor) -> EvalResult<Option<Object>> {
        self.charge(1)?;
        cursor.next_item()
    }

    /// Materialise an iterable.
    pub(crate) fn iterate(&mut self, obj: &Object) -> EvalResult<Vec<Object>> {
        let mut cursor = self.cursor(obj)?;
        self.charge(cursor.size_hint())?;
        let mut out = Vec::with_capacity(cursor.size_hint());
        while let Some(item) = cursor.next_item()? {
            out.push(item);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Attributes
    // ------------------------------------------------------------------

    pub(crate) fn check_attribute(&self, obj: &Object, attr: &str) -> EvalResult<()> {
        if self.policy.is_attribute_allowed(obj.attr_type(), attr) {
            Ok(())
        } else {
            Err(policy(
                ErrorKind::AttributeBlocked,
                format!(
                    "Access to attribute '{attr}' of '{}' object is not allowed.",
                    obj.type_name()
                ),
            ))
        }
    }

    pub(crate) fn get_attribute(&mut self, obj: &Object, attr: &str) -> EvalResult<Object> {
        self.check_attribute(obj, attr)?;
        match obj {
            Object::Module(module) => modules::module_attribute(self, module, attr),
            Object::Tool(tool) => Ok(tool_attribute(tool.as_ref(), attr)),
            Object::Exception(e) => Ok(Object::tuple(e.args.clone())),
            Object::Range(r) => Ok(match attr {
                "start" => Object::Int(r.start),
                "stop" => Object::Int(r.stop),
                "step" => Object::Int(r.step),
                _ => bound_method(obj, attr),
            }),
            Object::Image(img) => Ok(match attr {
                "format" => Object::str_from(img.format.as_str()),
                "width" => Object::Int(i64::from(img.width)),
                "height" => Object::Int(i64::from(img.height)),
                _ => Object::tuple(vec![
                    Object::Int(i64::from(img.width)),
                    Object::Int(i64::from(img.height)),
                ]),
            }),
            Object::Pattern(p) if attr == "pattern" => Ok(Object::str_from(p.source.as_str())),
            _ => Ok(bound_method(obj, attr)),
        }
    }

    /// `hasattr(obj, attr)`. Reflective names still abort.
    pub(crate) fn has_attribute(&mut self, obj: &Object, attr: &str) -> EvalResult<bool> {
        if is_reflective_name(attr) {
            self.check_attribute(obj, attr)?;
        }
        if !self.policy.is_attribute_allowed(obj.attr_type(), attr) {
            return Ok(false);
        }
        match obj {
            Object::Module(module) => Ok(modules::module_has(self, module, attr)),
            _ => Ok(true),
        }
    }

    pub(crate) fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub(crate) fn reseed(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
    }

    pub(crate) fn namespace(&self) -> &'a ExecutionNamespace {
        self.namespace
    }

    pub(crate) fn capability_policy(&self) -> &'a CapabilityPolicy {
        self.policy
    }
}

pub(crate) use self::fault::Flow;

fn bound_method(receiver: &Object, name: &str) -> Object {
    Object::Method(Rc::new(Method {
        receiver: receiver.clone(),
        name: name.to_string(),
    }))
}

fn tool_attribute(tool: &dyn Tool, attr: &str) -> Object {
    let spec = tool.spec();
    match attr {
        "name" => Object::str_from(spec.name.as_str()),
        "description" => Object::str_from(spec.description.as_str()),
        "output_type" => Object::str_from(spec.output_type.as_str()),
        _ => {
            let mut inputs = Dict::default();
            for input in &spec.inputs {
                let mut schema = Dict::default();
                for (k, v) in [
                    ("type", Object::str_from(input.kind.as_str())),
                    ("description", Object::str_from(input.description.as_str())),
                    ("nullable", Object::Bool(input.nullable)),
                ] {
                    schema.insert(
                        object::HashKey::Str(Rc::from(k)),
                        Object::str_from(k),
                        v,
                    );
                }
                inputs.insert(
                    object::HashKey::Str(Rc::from(input.name.as_str())),
                    Object::str_from(input.name.as_str()),
                    Object::dict(schema),
                );
            }
            Object::dict(inputs)
        }
    }
}

fn bind_parameters(function: &Function, args: Args) -> EvalResult<HashMap<String, Object>> {
    let params = &function.params;
    let name = &function.name;
    let given = args.positional.len();
    let mut vars = HashMap::new();

    let mut positional = args.positional.into_iter();
    for param in &params.positional {
        match positional.next() {
            Some(value) => {
                vars.insert(param.name.clone(), value);
            }
            None => break,
        }
    }
    let extra: Vec<Object> = positional.collect();
    match &params.vararg {
        Some(vararg) => {
            vars.insert(vararg.clone(), Object::tuple(extra));
        }
        None if !extra.is_empty() => {
            return Err(type_error(format!(
                "{name}() takes {} positional argument{} but {given} were given",
                params.positional.len(),
                if params.positional.len() == 1 { "" } else { "s" }
            )));
        }
        None => {}
    }

    let mut extra_keywords = Dict::default();
    for (key, value) in args.keywords {
        let positional_idx = params.positional.iter().position(|p| p.name == key);
        let is_named = match positional_idx {
            Some(idx) => idx >= params.posonly,
            None => params.kwonly.iter().any(|p| p.name == key),
        };
        if is_named {
            if vars.contains_key(&key) {
                return Err(type_error(format!(
                    "{name}() got multiple values for argument '{key}'"
                )));
            }
            vars.insert(key, value);
        } else if params.kwarg.is_some() {
            let key_obj = Object::str_from(key.as_str());
            extra_keywords.insert(key_obj.hash_key()?, key_obj, value);
        } else {
            return Err(type_error(format!(
                "{name}() got an unexpected keyword argument '{key}'"
            )));
        }
    }

    for param in &params.positional {
        if !vars.contains_key(&param.name) {
            match &param.default {
                Some(default) => {
                    vars.insert(param.name.clone(), default.clone());
                }
                None => {
                    return Err(type_error(format!(
                        "{name}() missing required positional argument: '{}'",
                        param.name
                    )))
                }
            }
        }
    }
    for param in &params.kwonly {
        if !vars.contains_key(&param.name) {
            match &param.default {
                Some(default) => {
                    vars.insert(param.name.clone(), default.clone());
                }
                None => {
                    return Err(type_error(format!(
                        "{name}() missing required keyword-only argument: '{}'",
                        param.name
                    )))
                }
            }
        }
    }
    if let Some(kwarg) = &params.kwarg {
        vars.insert(kwarg.clone(), Object::dict(extra_keywords));
    }
    Ok(vars)
}

/// Wrap `items` as an eagerly evaluated iterator object.
pub(crate) fn make_iter(kind: &'static str, items: Vec<Object>) -> Object {
    IterObj::new(kind, items)
}

/// A `range` object, validating the step.
pub(crate) fn make_range(start: i64, stop: i64, step: i64) -> EvalResult<Object> {
    if step == 0 {
        return Err(fault::value_error("range() arg 3 must not be zero"));
    }
    Ok(Object::Range(RangeObj { start, stop, step }))
}
