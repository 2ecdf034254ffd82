//! Runtime objects.
//!
//! Objects are single-threaded and may alias (two names can refer to the
//! same list). They never leave the evaluation thread; anything that does is
//! detached into a [`Value`] first.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use rustpython_parser::ast;

use super::fault::{recursion_error, type_error, EvalResult, ExcKind, Fault};
use super::modules::NativeModule;
use super::Interpreter;
use crate::namespace::ModuleBinding;
use crate::pyfmt::{float_repr, str_repr};
use crate::tool::Tool;
use crate::value::{ImageData, Value};

pub(crate) type NativeFn = fn(&mut Interpreter<'_>, Args) -> EvalResult<Object>;

/// Deepest container nesting `repr`, `==`, hashing and detaching will walk
/// before raising `RecursionError`.
pub(crate) const MAX_NESTING: usize = 1000;

/// Deepest nesting a portable object may have. Session files must reload
/// within `serde_json`'s nesting limit.
pub(crate) const MAX_PORTABLE_DEPTH: usize = 32;

const NO_ARGUMENT: &Object = &Object::None;

/// A walk went deeper than [`MAX_NESTING`].
#[derive(Debug)]
pub(crate) struct TooDeep;

/// A function implemented natively: a built-in or a native module member.
pub(crate) struct BuiltinFn {
    pub name: &'static str,
    pub func: NativeFn,
}

/// Call-site arguments after star-expansion.
#[derive(Debug, Default)]
pub(crate) struct Args {
    pub positional: Vec<Object>,
    pub keywords: Vec<(String, Object)>,
}

impl Args {
    pub fn new(positional: Vec<Object>) -> Self {
        Self {
            positional,
            keywords: Vec::new(),
        }
    }

    pub fn take_kw(&mut self, name: &str) -> Option<Object> {
        let idx = self.keywords.iter().position(|(k, _)| k == name)?;
        Some(self.keywords.remove(idx).1)
    }

    /// Fail on leftover keywords or a positional count outside `min..=max`.
    pub fn expect(&self, func: &str, min: usize, max: usize) -> EvalResult<()> {
        if let Some((name, _)) = self.keywords.first() {
            return Err(type_error(format!(
                "{func}() got an unexpected keyword argument '{name}'"
            )));
        }
        let n = self.positional.len();
        if n < min || n > max {
            let expected = if min == max {
                format!("exactly {min}")
            } else if n < min {
                format!("at least {min}")
            } else {
                format!("at most {max}")
            };
            let plural = if (if n < min { min } else { max }) == 1 { "" } else { "s" };
            return Err(type_error(format!(
                "{func}() takes {expected} argument{plural} ({n} given)"
            )));
        }
        Ok(())
    }

    pub fn get(&self, idx: usize) -> Option<&Object> {
        self.positional.get(idx)
    }

    /// Positional `idx`, or `None` if absent or explicitly `None`.
    pub fn optional(&self, idx: usize) -> Option<&Object> {
        self.positional.get(idx).filter(|o| !matches!(o, Object::None))
    }

    pub fn first(&self) -> &Object {
        self.positional.first().unwrap_or(NO_ARGUMENT)
    }

    /// Positional `idx` as a string.
    pub fn str_at(&self, idx: usize, func: &str) -> EvalResult<Rc<str>> {
        match self.positional.get(idx) {
            Some(Object::Str(s)) => Ok(s.clone()),
            Some(other) => Err(type_error(format!(
                "{func}() argument {} must be str, not {}",
                idx + 1,
                other.type_name()
            ))),
            None => Err(type_error(format!(
                "{func}() missing required argument {}",
                idx + 1
            ))),
        }
    }

    /// Positional `idx` as an integer.
    pub fn int_at(&self, idx: usize, func: &str) -> EvalResult<i64> {
        match self.positional.get(idx) {
            Some(obj) => obj.as_int().ok_or_else(|| {
                type_error(format!(
                    "'{}' object cannot be interpreted as an integer",
                    obj.type_name()
                ))
            }),
            None => Err(type_error(format!(
                "{func}() missing required argument {}",
                idx + 1
            ))),
        }
    }

    /// Optional integer at `idx`; `None` when absent or `None`.
    pub fn opt_int_at(&self, idx: usize, func: &str) -> EvalResult<Option<i64>> {
        match self.optional(idx) {
            Some(_) => self.int_at(idx, func).map(Some),
            None => Ok(None),
        }
    }

    /// Move keyword `name` into positional slot `idx` if it was given by
    /// keyword, padding with `None`.
    pub fn keyword_to_positional(&mut self, name: &str, idx: usize) {
        if let Some(value) = self.take_kw(name) {
            while self.positional.len() < idx {
                self.positional.push(Object::None);
            }
            if self.positional.len() == idx {
                self.positional.push(value);
            } else {
                self.positional[idx] = value;
            }
        }
    }
}

#[derive(Debug)]
pub(crate) enum ScopeKind {
    Function,
    Comprehension,
}

/// A local scope. Module-level names live on the interpreter itself.
#[derive(Debug)]
pub(crate) struct Scope {
    pub vars: HashMap<String, Object>,
    pub parent: Option<ScopeRef>,
    pub kind: ScopeKind,
}

pub(crate) type ScopeRef = Rc<RefCell<Scope>>;

impl Scope {
    pub fn new(kind: ScopeKind, parent: Option<ScopeRef>) -> ScopeRef {
        Rc::new(RefCell::new(Scope {
            vars: HashMap::new(),
            parent,
            kind,
        }))
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Param {
    pub name: String,
    pub default: Option<Object>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct Params {
    pub positional: Vec<Param>,
    pub posonly: usize,
    pub vararg: Option<String>,
    pub kwonly: Vec<Param>,
    pub kwarg: Option<String>,
}

pub(crate) enum FunctionBody {
    Block(Rc<Vec<ast::Stmt>>),
    Lambda(Rc<ast::Expr>),
}

/// A function defined by the snippet.
pub(crate) struct Function {
    pub name: String,
    pub params: Params,
    pub body: FunctionBody,
    pub closure: Option<ScopeRef>,
}

/// `receiver.name`, not yet called.
pub(crate) struct Method {
    pub receiver: Object,
    pub name: String,
}

pub(crate) enum ModuleSource {
    Native(&'static NativeModule),
    Bound(ModuleBinding),
    /// Importable but with no implementation in this runtime.
    Unavailable,
}

pub(crate) struct Module {
    pub name: String,
    pub source: ModuleSource,
}

pub(crate) struct ExceptionObj {
    pub kind: ExcKind,
    pub args: Vec<Object>,
}

impl ExceptionObj {
    /// `str(exc)`.
    pub fn message(&self) -> String {
        match self.args.as_slice() {
            [] => String::new(),
            [single] => single.str(),
            many => tuple_repr(many),
        }
    }
}

pub(crate) struct MatchObj {
    pub text: Rc<str>,
    /// Byte spans per group; group 0 is the whole match.
    pub spans: Vec<Option<(usize, usize)>>,
    pub names: Rc<Vec<Option<String>>>,
}

impl MatchObj {
    pub fn group_text(&self, group: usize) -> Option<&str> {
        self.spans
            .get(group)
            .copied()
            .flatten()
            .and_then(|(s, e)| self.text.get(s..e))
    }

    pub fn group_index(&self, name: &str) -> Option<usize> {
        self.names
            .iter()
            .position(|n| n.as_deref() == Some(name))
    }

    /// Character-based span of `group`, `(-1, -1)` if it did not take part.
    pub fn char_span(&self, group: usize) -> (i64, i64) {
        match self.spans.get(group).copied().flatten() {
            Some((s, e)) => (
                self.text[..s].chars().count() as i64,
                self.text[..e].chars().count() as i64,
            ),
            None => (-1, -1),
        }
    }
}

pub(crate) struct PatternObj {
    pub source: String,
    /// `re` flag bits the pattern was compiled with.
    pub flags: i64,
    pub regex: regex::Regex,
}

/// An eagerly materialised iterator (`map`, generator expressions, ...).
pub(crate) struct IterObj {
    pub kind: &'static str,
    pub items: Vec<Object>,
    pub pos: usize,
}

impl IterObj {
    pub fn new(kind: &'static str, items: Vec<Object>) -> Object {
        Object::Iter(Rc::new(RefCell::new(IterObj {
            kind,
            items,
            pos: 0,
        })))
    }

    pub fn next_item(&mut self) -> Option<Object> {
        let item = self.items.get(self.pos).cloned()?;
        self.pos += 1;
        Some(item)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RangeObj {
    pub start: i64,
    pub stop: i64,
    pub step: i64,
}

impl RangeObj {
    pub fn len(&self) -> usize {
        let (start, stop, step) = (
            i128::from(self.start),
            i128::from(self.stop),
            i128::from(self.step),
        );
        let n = if step > 0 && stop > start {
            (stop - start + step - 1) / step
        } else if step < 0 && stop < start {
            (start - stop - step - 1) / (-step)
        } else {
            0
        };
        usize::try_from(n).unwrap_or(usize::MAX)
    }

    pub fn get(&self, idx: usize) -> i64 {
        self.start + (idx as i64) * self.step
    }

    pub fn contains(&self, value: i64) -> bool {
        let in_bounds = if self.step > 0 {
            value >= self.start && value < self.stop
        } else {
            value <= self.start && value > self.stop
        };
        in_bounds && (i128::from(value) - i128::from(self.start)) % i128::from(self.step) == 0
    }
}

/// Built-in classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TypeObj {
    NoneType,
    Bool,
    Int,
    Float,
    Str,
    List,
    Tuple,
    Dict,
    Set,
    Range,
    Exception(ExcKind),
    Other(&'static str),
}

impl TypeObj {
    pub fn name(self) -> &'static str {
        match self {
            TypeObj::NoneType => "NoneType",
            TypeObj::Bool => "bool",
            TypeObj::Int => "int",
            TypeObj::Float => "float",
            TypeObj::Str => "str",
            TypeObj::List => "list",
            TypeObj::Tuple => "tuple",
            TypeObj::Dict => "dict",
            TypeObj::Set => "set",
            TypeObj::Range => "range",
            TypeObj::Exception(kind) => kind.name(),
            TypeObj::Other(name) => name,
        }
    }
}

/// Special dict behaviours from `collections`.
#[derive(Clone, Default)]
pub(crate) enum DictFlavor {
    #[default]
    Plain,
    Counter,
    /// `defaultdict` with its factory.
    Default(Object),
}

/// Hashable identity of a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum HashKey {
    None,
    Int(i64),
    Float(u64),
    Str(Rc<str>),
    Tuple(Vec<HashKey>),
    Range(i64, i64, i64),
    Type(&'static str),
    Ident(usize),
}

/// Insertion-ordered hash table backing `dict` and `set`.
#[derive(Default)]
pub(crate) struct Dict {
    entries: Vec<Option<(Object, Object)>>,
    index: HashMap<HashKey, usize>,
    pub flavor: DictFlavor,
}

impl Dict {
    pub fn with_flavor(flavor: DictFlavor) -> Self {
        Self {
            flavor,
            ..Self::default()
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn get(&self, key: &HashKey) -> Option<&Object> {
        let idx = *self.index.get(key)?;
        self.entries[idx].as_ref().map(|(_, v)| v)
    }

    pub fn contains(&self, key: &HashKey) -> bool {
        self.index.contains_key(key)
    }

    /// Insert or overwrite. An existing key keeps its original key object.
    pub fn insert(&mut self, hash: HashKey, key: Object, value: Object) {
        match self.index.get(&hash) {
            Some(&idx) => {
                if let Some(entry) = self.entries[idx].as_mut() {
                    entry.1 = value;
                }
            }
            None => {
                self.index.insert(hash, self.entries.len());
                self.entries.push(Some((key, value)));
            }
        }
    }

    pub fn remove(&mut self, hash: &HashKey) -> Option<(Object, Object)> {
        let idx = self.index.remove(hash)?;
        let entry = self.entries[idx].take();
        if self.entries.len() > 32 && self.index.len() * 2 < self.entries.len() {
            self.compact();
        }
        entry
    }

    fn compact(&mut self) {
        let entries = std::mem::take(&mut self.entries);
        let mut hashes: HashMap<usize, HashKey> =
            self.index.drain().map(|(k, idx)| (idx, k)).collect();
        for (old_idx, entry) in entries.into_iter().enumerate() {
            if let (Some(entry), Some(hash)) = (entry, hashes.remove(&old_idx)) {
                self.index.insert(hash, self.entries.len());
                self.entries.push(Some(entry));
            }
        }
    }

    pub fn pop_first(&mut self) -> Option<(Object, Object)> {
        let hash = self
            .index
            .iter()
            .min_by_key(|(_, idx)| **idx)
            .map(|(k, _)| k.clone())?;
        self.remove(&hash)
    }

    pub fn pop_last(&mut self) -> Option<(Object, Object)> {
        let hash = self
            .index
            .iter()
            .max_by_key(|(_, idx)| **idx)
            .map(|(k, _)| k.clone())?;
        self.remove(&hash)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }

    /// Empty the table, yielding the live entries.
    pub fn drain(&mut self) -> impl Iterator<Item = (Object, Object)> + '_ {
        self.index.clear();
        self.entries.drain(..).flatten()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Object, &Object)> {
        self.entries.iter().flatten().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> Vec<Object> {
        self.iter().map(|(k, _)| k.clone()).collect()
    }

    pub fn values(&self) -> Vec<Object> {
        self.iter().map(|(_, v)| v.clone()).collect()
    }

    pub fn items(&self) -> Vec<(Object, Object)> {
        self.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// A shallow copy sharing keys and values.
    pub fn copy(&self) -> Dict {
        let mut out = Dict::with_flavor(self.flavor.clone());
        for (k, v) in self.iter() {
            if let Ok(hash) = k.hash_key() {
                out.insert(hash, k.clone(), v.clone());
            }
        }
        out
    }
}

/// A runtime object.
#[derive(Clone)]
pub(crate) enum Object {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(Rc<RefCell<Vec<Object>>>),
    Tuple(Rc<Vec<Object>>),
    Dict(Rc<RefCell<Dict>>),
    Set(Rc<RefCell<Dict>>),
    Deque(Rc<RefCell<VecDeque<Object>>>),
    Range(RangeObj),
    Iter(Rc<RefCell<IterObj>>),
    Type(TypeObj),
    Builtin(&'static BuiltinFn),
    Function(Rc<Function>),
    Method(Rc<Method>),
    Tool(Arc<dyn Tool>),
    Module(Rc<Module>),
    Image(Arc<ImageData>),
    Exception(Rc<ExceptionObj>),
    Match(Rc<MatchObj>),
    Pattern(Rc<PatternObj>),
    Opaque(Rc<str>),
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

/// Children moved out of a dying container, dropped one at a time.
enum Garbage {
    Object(Object),
    Scope(ScopeRef),
}

impl Drop for Object {
    // Deeply nested containers are torn down with a worklist; the native
    // stack only ever holds one level.
    fn drop(&mut self) {
        let mut pending = Vec::new();
        self.release_children(&mut pending);
        while let Some(garbage) = pending.pop() {
            match garbage {
                Garbage::Object(mut obj) => obj.release_children(&mut pending),
                Garbage::Scope(scope) => {
                    if let Ok(scope) = Rc::try_unwrap(scope) {
                        let scope = scope.into_inner();
                        pending.extend(scope.vars.into_values().map(Garbage::Object));
                        pending.extend(scope.parent.map(Garbage::Scope));
                    }
                }
            }
        }
    }
}

impl Object {
    pub fn str_from(s: impl Into<Rc<str>>) -> Object {
        Object::Str(s.into())
    }

    pub fn list(items: Vec<Object>) -> Object {
        Object::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Object>) -> Object {
        Object::Tuple(Rc::new(items))
    }

    pub fn dict(dict: Dict) -> Object {
        Object::Dict(Rc::new(RefCell::new(dict)))
    }

    pub fn set(dict: Dict) -> Object {
        Object::Set(Rc::new(RefCell::new(dict)))
    }

    pub fn exception(kind: ExcKind, message: String) -> Object {
        Object::Exception(Rc::new(ExceptionObj {
            kind,
            args: vec![Object::str_from(message)],
        }))
    }

    /// The name `type(x).__name__` would give.
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::None => "NoneType",
            Object::Bool(_) => "bool",
            Object::Int(_) => "int",
            Object::Float(_) => "float",
            Object::Str(_) => "str",
            Object::List(_) => "list",
            Object::Tuple(_) => "tuple",
            Object::Dict(d) => match d.borrow().flavor {
                DictFlavor::Plain => "dict",
                DictFlavor::Counter => "Counter",
                DictFlavor::Default(_) => "defaultdict",
            },
            Object::Set(_) => "set",
            Object::Deque(_) => "deque",
            Object::Range(_) => "range",
            Object::Iter(it) => it.borrow().kind,
            Object::Type(_) => "type",
            Object::Builtin(_) => "builtin_function_or_method",
            Object::Function(_) => "function",
            Object::Method(_) => "method",
            Object::Tool(_) => "tool",
            Object::Module(_) => "module",
            Object::Image(_) => "image",
            Object::Exception(e) => e.kind.name(),
            Object::Match(_) => "re.Match",
            Object::Pattern(_) => "re.Pattern",
            Object::Opaque(_) => "object",
        }
    }

    /// The key used for attribute policy checks.
    pub fn attr_type(&self) -> &'static str {
        match self {
            Object::Exception(_) => "exception",
            Object::Match(_) => "match",
            Object::Pattern(_) => "pattern",
            other => other.type_name(),
        }
    }

    pub fn type_obj(&self) -> TypeObj {
        match self {
            Object::None => TypeObj::NoneType,
            Object::Bool(_) => TypeObj::Bool,
            Object::Int(_) => TypeObj::Int,
            Object::Float(_) => TypeObj::Float,
            Object::Str(_) => TypeObj::Str,
            Object::List(_) => TypeObj::List,
            Object::Tuple(_) => TypeObj::Tuple,
            Object::Dict(d) if matches!(d.borrow().flavor, DictFlavor::Plain) => TypeObj::Dict,
            Object::Set(_) => TypeObj::Set,
            Object::Range(_) => TypeObj::Range,
            Object::Exception(e) => TypeObj::Exception(e.kind),
            other => TypeObj::Other(other.type_name()),
        }
    }

    /// `isinstance(self, ty)`.
    pub fn is_instance(&self, ty: TypeObj) -> bool {
        match (ty, self) {
            (TypeObj::Int, Object::Int(_) | Object::Bool(_)) => true,
            (TypeObj::Dict, Object::Dict(_)) => true,
            (TypeObj::Exception(want), Object::Exception(e)) => e.kind.is_subclass_of(want),
            (ty, obj) => obj.type_obj() == ty,
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Object::None => false,
            Object::Bool(b) => *b,
            Object::Int(i) => *i != 0,
            Object::Float(f) => *f != 0.0,
            Object::Str(s) => !s.is_empty(),
            Object::List(l) => !l.borrow().is_empty(),
            Object::Tuple(t) => !t.is_empty(),
            Object::Dict(d) | Object::Set(d) => !d.borrow().is_empty(),
            Object::Deque(d) => !d.borrow().is_empty(),
            Object::Range(r) => r.len() > 0,
            _ => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Object::Int(i) => Some(*i),
            Object::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Object::Float(f) => Some(*f),
            Object::Int(i) => Some(*i as f64),
            Object::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Object::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Object::Type(_)
                | Object::Builtin(_)
                | Object::Function(_)
                | Object::Method(_)
                | Object::Tool(_)
        )
    }

    /// Identity for `is`: pointer equality for reference types, value
    /// equality for immutable scalars.
    pub fn is(&self, other: &Object) -> bool {
        match (self, other) {
            (Object::None, Object::None) => true,
            (Object::Bool(a), Object::Bool(b)) => a == b,
            (Object::Int(a), Object::Int(b)) => a == b,
            (Object::Float(a), Object::Float(b)) => a.to_bits() == b.to_bits(),
            (Object::Str(a), Object::Str(b)) => a == b,
            (Object::Type(a), Object::Type(b)) => a == b,
            (Object::Range(a), Object::Range(b)) => a == b,
            (Object::Builtin(a), Object::Builtin(b)) => std::ptr::eq(*a, *b),
            _ => match (self.identity(), other.identity()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    fn identity(&self) -> Option<usize> {
        Some(match self {
            Object::List(r) => Rc::as_ptr(r) as *const u8 as usize,
            Object::Tuple(r) => Rc::as_ptr(r) as *const u8 as usize,
            Object::Dict(r) | Object::Set(r) => Rc::as_ptr(r) as *const u8 as usize,
            Object::Deque(r) => Rc::as_ptr(r) as *const u8 as usize,
            Object::Iter(r) => Rc::as_ptr(r) as *const u8 as usize,
            Object::Function(r) => Rc::as_ptr(r) as *const u8 as usize,
            Object::Method(r) => Rc::as_ptr(r) as *const u8 as usize,
            Object::Tool(r) => Arc::as_ptr(r) as *const u8 as usize,
            Object::Module(r) => Rc::as_ptr(r) as *const u8 as usize,
            Object::Image(r) => Arc::as_ptr(r) as *const u8 as usize,
            Object::Exception(r) => Rc::as_ptr(r) as *const u8 as usize,
            Object::Match(r) => Rc::as_ptr(r) as *const u8 as usize,
            Object::Pattern(r) => Rc::as_ptr(r) as *const u8 as usize,
            Object::Opaque(r) => Rc::as_ptr(r) as *const u8 as usize,
            _ => return None,
        })
    }

    pub fn hash_key(&self) -> EvalResult<HashKey> {
        self.hash_key_at(0)
    }

    fn hash_key_at(&self, depth: usize) -> EvalResult<HashKey> {
        if depth > MAX_NESTING {
            return Err(recursion_error(""));
        }
        Ok(match self {
            Object::None => HashKey::None,
            Object::Bool(b) => HashKey::Int(i64::from(*b)),
            Object::Int(i) => HashKey::Int(*i),
            Object::Float(f) => {
                if f.fract() == 0.0 && f.abs() < 9.2e18 {
                    HashKey::Int(*f as i64)
                } else {
                    HashKey::Float(f.to_bits())
                }
            }
            Object::Str(s) => HashKey::Str(s.clone()),
            Object::Tuple(items) => HashKey::Tuple(
                items
                    .iter()
                    .map(|item| item.hash_key_at(depth + 1))
                    .collect::<EvalResult<Vec<_>>>()?,
            ),
            Object::Range(r) => HashKey::Range(r.start, r.stop, r.step),
            Object::Type(t) => HashKey::Type(t.name()),
            Object::Builtin(b) => HashKey::Ident(*b as *const BuiltinFn as usize),
            Object::List(_) | Object::Dict(_) | Object::Set(_) | Object::Deque(_) => {
                return Err(type_error(format!(
                    "unhashable type: '{}'",
                    self.type_name()
                )))
            }
            other => match other.identity() {
                Some(id) => HashKey::Ident(id),
                None => {
                    return Err(type_error(format!(
                        "unhashable type: '{}'",
                        other.type_name()
                    )))
                }
            },
        })
    }

    /// `str(self)`.
    pub fn str(&self) -> String {
        match self {
            Object::Str(s) => s.to_string(),
            Object::Exception(e) => e.message(),
            other => other.repr(),
        }
    }

    /// `str(self)`, raising `RecursionError` like [`Object::try_repr`].
    pub fn try_str(&self) -> EvalResult<String> {
        match self {
            Object::Str(s) => Ok(s.to_string()),
            Object::Exception(e) => Ok(e.message()),
            other => other.try_repr(),
        }
    }

    /// `repr(self)`. Nesting past [`MAX_NESTING`] is cut short with `...`.
    pub fn repr(&self) -> String {
        let mut out = String::new();
        if self.repr_into(&mut out, &mut Vec::new(), 0).is_err() {
            out.push_str("...");
        }
        out
    }

    /// `repr(self)` for snippet-visible text.
    pub fn try_repr(&self) -> EvalResult<String> {
        let mut out = String::new();
        self.repr_into(&mut out, &mut Vec::new(), 0)
            .map_err(|TooDeep| recursion_error(" while getting the repr of an object"))?;
        Ok(out)
    }

    fn repr_into(&self, out: &mut String, seen: &mut Vec<usize>, depth: usize) -> Result<(), TooDeep> {
        if depth > MAX_NESTING {
            return Err(TooDeep);
        }
        if let Some(id) = self.container_identity() {
            if seen.contains(&id) {
                out.push_str(match self {
                    Object::Dict(_) => "{...}",
                    _ => "[...]",
                });
                return Ok(());
            }
            seen.push(id);
        }
        let written = self.repr_body(out, seen, depth + 1);
        if self.container_identity().is_some() {
            seen.pop();
        }
        written
    }

    fn repr_body(&self, out: &mut String, seen: &mut Vec<usize>, depth: usize) -> Result<(), TooDeep> {
        match self {
            Object::None => out.push_str("None"),
            Object::Bool(true) => out.push_str("True"),
            Object::Bool(false) => out.push_str("False"),
            Object::Int(i) => out.push_str(&i.to_string()),
            Object::Float(f) => out.push_str(&float_repr(*f)),
            Object::Str(s) => out.push_str(&str_repr(s)),
            Object::List(items) => {
                out.push('[');
                repr_seq(&items.borrow(), out, seen, depth)?;
                out.push(']');
            }
            Object::Tuple(items) => {
                out.push('(');
                repr_seq(items, out, seen, depth)?;
                if items.len() == 1 {
                    out.push(',');
                }
                out.push(')');
            }
            Object::Dict(d) => {
                let d = d.borrow();
                match &d.flavor {
                    DictFlavor::Plain => repr_pairs(d.iter(), out, seen, depth)?,
                    DictFlavor::Counter => {
                        out.push_str("Counter(");
                        if !d.is_empty() {
                            let mut pairs: Vec<(&Object, &Object)> = d.iter().collect();
                            pairs.sort_by(|a, b| {
                                let (x, y) = (a.1.as_float(), b.1.as_float());
                                y.partial_cmp(&x).unwrap_or(std::cmp::Ordering::Equal)
                            });
                            repr_pairs(pairs.into_iter(), out, seen, depth)?;
                        }
                        out.push(')');
                    }
                    DictFlavor::Default(factory) => {
                        out.push_str("defaultdict(");
                        factory.repr_into(out, seen, depth)?;
                        out.push_str(", ");
                        repr_pairs(d.iter(), out, seen, depth)?;
                        out.push(')');
                    }
                }
            }
            Object::Set(d) => {
                let d = d.borrow();
                if d.is_empty() {
                    out.push_str("set()");
                } else {
                    out.push('{');
                    repr_seq(&d.keys(), out, seen, depth)?;
                    out.push('}');
                }
            }
            Object::Deque(d) => {
                out.push_str("deque([");
                let items: Vec<Object> = d.borrow().iter().cloned().collect();
                repr_seq(&items, out, seen, depth)?;
                out.push_str("])");
            }
            Object::Range(r) if r.step == 1 => {
                out.push_str(&format!("range({}, {})", r.start, r.stop));
            }
            Object::Range(r) => {
                out.push_str(&format!("range({}, {}, {})", r.start, r.stop, r.step));
            }
            Object::Iter(it) => out.push_str(&format!("<{} object>", it.borrow().kind)),
            Object::Type(t) => out.push_str(&format!("<class '{}'>", t.name())),
            Object::Builtin(b) => out.push_str(&format!("<built-in function {}>", b.name)),
            Object::Function(f) => out.push_str(&format!("<function {}>", f.name)),
            Object::Method(m) => out.push_str(&format!(
                "<built-in method {} of {} object>",
                m.name,
                m.receiver.type_name()
            )),
            Object::Tool(t) => out.push_str(&format!("<tool '{}'>", t.name())),
            Object::Module(m) => out.push_str(&format!("<module '{}'>", m.name)),
            Object::Image(img) => out.push_str(&img.to_string()),
            Object::Exception(e) => {
                out.push_str(e.kind.name());
                out.push('(');
                repr_seq(&e.args, out, seen, depth)?;
                out.push(')');
            }
            Object::Match(m) => {
                let (s, e) = m.char_span(0);
                out.push_str(&format!(
                    "<re.Match object; span=({s}, {e}), match={}>",
                    str_repr(m.group_text(0).unwrap_or_default())
                ));
            }
            Object::Pattern(p) => out.push_str(&format!("re.compile({})", str_repr(&p.source))),
            Object::Opaque(s) => out.push_str(s),
        }
        Ok(())
    }

    fn container_identity(&self) -> Option<usize> {
        match self {
            Object::List(_) | Object::Dict(_) | Object::Set(_) | Object::Deque(_) => {
                self.identity()
            }
            _ => None,
        }
    }

    /// Detach into a portable value. Cycles, unportable objects and nesting
    /// past [`MAX_NESTING`] become `Opaque` reprs.
    pub fn to_value(&self) -> Value {
        self.to_value_inner(&mut Vec::new(), 0)
            .unwrap_or_else(|TooDeep| Value::Opaque(self.repr()))
    }

    /// Detach a value that leaves the evaluation (a result or tool
    /// argument). Nesting past [`MAX_NESTING`] raises `RecursionError`.
    pub fn try_to_value(&self) -> Result<Value, Fault> {
        self.to_value_inner(&mut Vec::new(), 0)
            .map_err(|TooDeep| Fault::recursion(" while detaching a value"))
    }

    fn to_value_inner(&self, seen: &mut Vec<usize>, depth: usize) -> Result<Value, TooDeep> {
        if depth > MAX_NESTING {
            return Err(TooDeep);
        }
        if let Some(id) = self.container_identity() {
            if seen.contains(&id) {
                return Ok(Value::Opaque(self.repr()));
            }
            seen.push(id);
        }
        let depth = depth + 1;
        let value = match self {
            Object::None => Ok(Value::None),
            Object::Bool(b) => Ok(Value::Bool(*b)),
            Object::Int(i) => Ok(Value::Int(*i)),
            Object::Float(f) => Ok(Value::Float(*f)),
            Object::Str(s) => Ok(Value::Str(s.to_string())),
            Object::List(items) => items
                .borrow()
                .iter()
                .map(|o| o.to_value_inner(seen, depth))
                .collect::<Result<Vec<_>, TooDeep>>()
                .map(Value::List),
            Object::Deque(items) => items
                .borrow()
                .iter()
                .map(|o| o.to_value_inner(seen, depth))
                .collect::<Result<Vec<_>, TooDeep>>()
                .map(Value::List),
            Object::Tuple(items) => items
                .iter()
                .map(|o| o.to_value_inner(seen, depth))
                .collect::<Result<Vec<_>, TooDeep>>()
                .map(Value::Tuple),
            Object::Dict(d) => d
                .borrow()
                .iter()
                .map(|(k, v)| -> Result<(Value, Value), TooDeep> {
                    Ok((k.to_value_inner(seen, depth)?, v.to_value_inner(seen, depth)?))
                })
                .collect::<Result<Vec<_>, TooDeep>>()
                .map(Value::Dict),
            Object::Set(d) => d
                .borrow()
                .iter()
                .map(|(k, _)| k.to_value_inner(seen, depth))
                .collect::<Result<Vec<_>, TooDeep>>()
                .map(Value::Set),
            Object::Image(img) => Ok(Value::Image(img.clone())),
            other => Ok(Value::Opaque(other.repr())),
        };
        if self.container_identity().is_some() {
            seen.pop();
        }
        value
    }

    /// Can this object be detached without loss? Nesting deeper than
    /// [`MAX_PORTABLE_DEPTH`] is not portable.
    pub fn is_portable(&self) -> bool {
        self.is_portable_inner(&mut Vec::new(), 0)
    }

    fn is_portable_inner(&self, seen: &mut Vec<usize>, depth: usize) -> bool {
        if depth > MAX_PORTABLE_DEPTH {
            return false;
        }
        if let Some(id) = self.container_identity() {
            if seen.contains(&id) {
                return false;
            }
            seen.push(id);
        }
        let depth = depth + 1;
        let portable = match self {
            Object::None
            | Object::Bool(_)
            | Object::Int(_)
            | Object::Float(_)
            | Object::Str(_)
            | Object::Image(_) => true,
            Object::List(items) => items.borrow().iter().all(|o| o.is_portable_inner(seen, depth)),
            Object::Deque(items) => items.borrow().iter().all(|o| o.is_portable_inner(seen, depth)),
            Object::Tuple(items) => items.iter().all(|o| o.is_portable_inner(seen, depth)),
            Object::Dict(d) | Object::Set(d) => d
                .borrow()
                .iter()
                .all(|(k, v)| k.is_portable_inner(seen, depth) && v.is_portable_inner(seen, depth)),
            _ => false,
        };
        if self.container_identity().is_some() {
            seen.pop();
        }
        portable
    }

    /// Move out the children of containers this handle solely owns.
    fn release_children(&mut self, pending: &mut Vec<Garbage>) {
        match self {
            Object::List(items) => {
                if let Some(items) = Rc::get_mut(items) {
                    pending.extend(items.get_mut().drain(..).map(Garbage::Object));
                }
            }
            Object::Tuple(items) => {
                if let Some(items) = Rc::get_mut(items) {
                    pending.extend(items.drain(..).map(Garbage::Object));
                }
            }
            Object::Deque(items) => {
                if let Some(items) = Rc::get_mut(items) {
                    pending.extend(items.get_mut().drain(..).map(Garbage::Object));
                }
            }
            Object::Dict(d) | Object::Set(d) => {
                if let Some(d) = Rc::get_mut(d) {
                    let d = d.get_mut();
                    if let DictFlavor::Default(factory) = std::mem::take(&mut d.flavor) {
                        pending.push(Garbage::Object(factory));
                    }
                    for (k, v) in d.drain() {
                        pending.push(Garbage::Object(k));
                        pending.push(Garbage::Object(v));
                    }
                }
            }
            Object::Iter(it) => {
                if let Some(it) = Rc::get_mut(it) {
                    pending.extend(it.get_mut().items.drain(..).map(Garbage::Object));
                }
            }
            Object::Method(method) => {
                if let Some(method) = Rc::get_mut(method) {
                    let receiver = std::mem::replace(&mut method.receiver, Object::None);
                    pending.push(Garbage::Object(receiver));
                }
            }
            Object::Exception(e) => {
                if let Some(e) = Rc::get_mut(e) {
                    pending.extend(e.args.drain(..).map(Garbage::Object));
                }
            }
            Object::Function(f) => {
                if let Some(f) = Rc::get_mut(f) {
                    pending.extend(f.closure.take().map(Garbage::Scope));
                    let params = f.params.positional.iter_mut().chain(f.params.kwonly.iter_mut());
                    for param in params {
                        pending.extend(param.default.take().map(Garbage::Object));
                    }
                }
            }
            _ => {}
        }
    }

    pub fn from_value(value: &Value) -> Object {
        match value {
            Value::None => Object::None,
            Value::Bool(b) => Object::Bool(*b),
            Value::Int(i) => Object::Int(*i),
            Value::Float(f) => Object::Float(*f),
            Value::Str(s) => Object::str_from(s.as_str()),
            Value::List(items) => Object::list(items.iter().map(Object::from_value).collect()),
            Value::Tuple(items) => Object::tuple(items.iter().map(Object::from_value).collect()),
            Value::Dict(pairs) => {
                let mut dict = Dict::default();
                for (k, v) in pairs {
                    let key = Object::from_value(k);
                    let hash = key
                        .hash_key()
                        .unwrap_or_else(|_| HashKey::Str(Rc::from(k.repr())));
                    dict.insert(hash, key, Object::from_value(v));
                }
                Object::dict(dict)
            }
            Value::Set(items) => {
                let mut dict = Dict::default();
                for item in items {
                    let key = Object::from_value(item);
                    let hash = key
                        .hash_key()
                        .unwrap_or_else(|_| HashKey::Str(Rc::from(item.repr())));
                    dict.insert(hash, key, Object::None);
                }
                Object::set(dict)
            }
            Value::Image(img) => Object::Image(img.clone()),
            Value::Opaque(repr) => Object::Opaque(Rc::from(repr.as_str())),
        }
    }
}

fn repr_seq(items: &[Object], out: &mut String, seen: &mut Vec<usize>, depth: usize) -> Result<(), TooDeep> {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        item.repr_into(out, seen, depth)?;
    }
    Ok(())
}

fn repr_pairs<'o>(
    pairs: impl Iterator<Item = (&'o Object, &'o Object)>,
    out: &mut String,
    seen: &mut Vec<usize>,
    depth: usize,
) -> Result<(), TooDeep> {
    out.push('{');
    for (i, (k, v)) in pairs.enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        k.repr_into(out, seen, depth)?;
        out.push_str(": ");
        v.repr_into(out, seen, depth)?;
    }
    out.push('}');
    Ok(())
}

fn tuple_repr(items: &[Object]) -> String {
    Object::tuple(items.to_vec()).repr()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> Object {
        Object::str_from(text)
    }

    #[test]
    fn test_repr_matches_python() {
        let list = Object::list(vec![Object::Int(1), Object::Float(0.5), s("x"), Object::None]);
        assert_eq!(list.repr(), "[1, 0.5, 'x', None]");
        assert_eq!(Object::tuple(vec![Object::Int(1)]).repr(), "(1,)");
        assert_eq!(Object::set(Dict::default()).repr(), "set()");
        assert_eq!(Object::Type(TypeObj::Int).repr(), "<class 'int'>");
        assert_eq!(
            Object::exception(ExcKind::ValueError, "bad".into()).repr(),
            "ValueError('bad')"
        );
        assert_eq!(
            Object::Range(RangeObj { start: 0, stop: 5, step: 1 }).repr(),
            "range(0, 5)"
        );
    }

    #[test]
    fn test_self_referential_list_repr() {
        let list = Object::list(vec![Object::Int(1)]);
        if let Object::List(items) = &list {
            items.borrow_mut().push(list.clone());
        }
        assert_eq!(list.repr(), "[1, [...]]");
        assert!(!list.is_portable());
    }

    #[test]
    fn test_deep_nesting_is_dropped_without_recursion() {
        let worker = std::thread::Builder::new()
            .stack_size(256 * 1024)
            .spawn(|| {
                let mut nested = Object::list(vec![]);
                for _ in 0..200_000 {
                    nested = Object::tuple(vec![Object::list(vec![nested])]);
                }
                assert!(!nested.is_portable());
                drop(nested);
            })
            .unwrap();
        worker.join().unwrap();
    }

    #[test]
    fn test_portability_stops_at_depth_limit() {
        let mut nested = Object::Int(1);
        for _ in 0..MAX_PORTABLE_DEPTH {
            nested = Object::list(vec![nested]);
        }
        assert!(nested.is_portable());
        assert!(!Object::list(vec![nested]).is_portable());
    }

    #[test]
    fn test_numeric_keys_collapse() {
        let mut dict = Dict::default();
        dict.insert(Object::Int(1).hash_key().unwrap(), Object::Int(1), s("a"));
        dict.insert(Object::Float(1.0).hash_key().unwrap(), Object::Float(1.0), s("b"));
        dict.insert(Object::Bool(true).hash_key().unwrap(), Object::Bool(true), s("c"));
        assert_eq!(dict.len(), 1);
        assert_eq!(Object::dict(dict).repr(), "{1: 'c'}");
    }

    #[test]
    fn test_unhashable_containers() {
        assert!(Object::list(vec![]).hash_key().is_err());
        assert!(Object::tuple(vec![Object::Int(1), s("a")]).hash_key().is_ok());
        assert!(Object::tuple(vec![Object::list(vec![])]).hash_key().is_err());
    }

    #[test]
    fn test_dict_preserves_order_through_removal() {
        let mut dict = Dict::default();
        for i in 0..100 {
            dict.insert(HashKey::Int(i), Object::Int(i), Object::None);
        }
        for i in 0..90 {
            dict.remove(&HashKey::Int(i));
        }
        let keys: Vec<i64> = dict.keys().iter().filter_map(Object::as_int).collect();
        assert_eq!(keys, (90..100).collect::<Vec<_>>());
        assert_eq!(dict.pop_first().map(|(k, _)| k.as_int()), Some(Some(90)));
        assert_eq!(dict.pop_last().map(|(k, _)| k.as_int()), Some(Some(99)));
    }

    #[test]
    fn test_value_roundtrip_and_truthiness() {
        let value = Value::Dict(vec![
            (Value::Str("a".into()), Value::List(vec![Value::Int(1)])),
            (Value::Int(2), Value::Set(vec![Value::Bool(true)])),
        ]);
        let obj = Object::from_value(&value);
        assert_eq!(obj.to_value(), value);
        assert!(obj.truthy());
        assert!(!Object::list(vec![]).truthy());
        assert!(!Object::Float(0.0).truthy());
        assert!(!s("").truthy());
    }

    #[test]
    fn test_range_len_and_contains() {
        let r = RangeObj { start: 10, stop: 0, step: -3 };
        assert_eq!(r.len(), 4);
        assert!(r.contains(7));
        assert!(!r.contains(8));
        assert_eq!(RangeObj { start: 0, stop: 0, step: 1 }.len(), 0);
    }

    #[test]
    fn test_isinstance_rules() {
        assert!(Object::Bool(true).is_instance(TypeObj::Int));
        assert!(!Object::Int(1).is_instance(TypeObj::Bool));
        assert!(Object::exception(ExcKind::KeyError, String::new())
            .is_instance(TypeObj::Exception(ExcKind::LookupError)));
    }
}
