//! Import resolution and the modules implemented natively by this runtime.
//!
//! A module name resolves, in order, to a caller-supplied binding, a native
//! module, or an unavailable placeholder. The policy check always comes
//! first: nothing is resolved for a name the policy rejects.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use regex::{Captures, Regex, RegexBuilder};
use rustpython_parser::ast::Operator;
use sha2::{Digest, Sha256};

use super::builtins::{float_to_int, sort_objects};
use super::fault::{exc, policy, type_error, value_error, EvalResult, ExcKind};
use super::methods::mapping_pairs;
use super::object::{
    Args, BuiltinFn, Dict, DictFlavor, MatchObj, Module, ModuleSource, Object, PatternObj,
};
use super::ops::{binary, equals};
use super::{make_iter, Interpreter};
use crate::error::ErrorKind;
use crate::namespace::ModuleMember;
use crate::pyfmt::float_repr;

/// A module implemented in this crate.
pub(crate) struct NativeModule {
    pub name: &'static str,
    pub functions: &'static [BuiltinFn],
    pub constants: &'static [&'static str],
    pub constant: fn(&str) -> Option<Object>,
}

impl NativeModule {
    fn member(&'static self, name: &str) -> Option<Object> {
        self.functions
            .iter()
            .find(|f| f.name == name)
            .map(Object::Builtin)
            .or_else(|| (self.constant)(name))
    }

    fn exports(&'static self) -> impl Iterator<Item = &'static str> {
        self.functions
            .iter()
            .map(|f| f.name)
            .chain(self.constants.iter().copied())
    }
}

/// Modules that always need an explicit authorisation even though they are
/// implemented here.
const AUTHORIZED_ONLY: &[&str] = &["json"];

fn no_constants(_: &str) -> Option<Object> {
    None
}

static NATIVE_MODULES: &[&NativeModule] = &[
    &MATH,
    &STATISTICS,
    &RANDOM,
    &RE,
    &TIME,
    &JSON,
    &COLLECTIONS,
    &ITERTOOLS,
];

// ----------------------------------------------------------------------
// Resolution
// ----------------------------------------------------------------------

/// `import dotted`, after the policy check.
pub(crate) fn import(interp: &mut Interpreter<'_>, dotted: &str) -> EvalResult<Object> {
    let allowed = interp
        .capability_policy()
        .is_module_allowed(dotted, interp.namespace().authorized_imports());
    let native_gate = AUTHORIZED_ONLY.contains(&dotted)
        && !interp.namespace().authorized_imports().iter().any(|m| m == dotted || m == "*");
    if !allowed || native_gate {
        let mut authorized: Vec<&str> = interp
            .capability_policy()
            .allowed_modules()
            .chain(interp.namespace().authorized_imports().iter().map(String::as_str))
            .collect();
        authorized.sort_unstable();
        authorized.dedup();
        let listing = authorized
            .iter()
            .map(|m| format!("'{m}'"))
            .collect::<Vec<_>>()
            .join(", ");
        tracing::debug!(module = dotted, "import rejected by policy");
        return Err(policy(
            ErrorKind::ImportBlocked,
            format!("Import of {dotted} is not allowed. Authorized imports are: [{listing}]"),
        ));
    }
    resolve(interp, dotted)
}

fn resolve(interp: &Interpreter<'_>, dotted: &str) -> EvalResult<Object> {
    let source = if let Some(binding) = interp.namespace().module_binding(dotted) {
        ModuleSource::Bound(binding.clone())
    } else if let Some(native) = NATIVE_MODULES.iter().copied().find(|m| m.name == dotted) {
        ModuleSource::Native(native)
    } else if dotted.contains('.')
        && NATIVE_MODULES
            .iter()
            .any(|m| dotted.split('.').next() == Some(m.name))
    {
        return Err(exc(
            ExcKind::ModuleNotFoundError,
            format!("No module named '{dotted}'"),
        ));
    } else {
        ModuleSource::Unavailable
    };
    Ok(Object::Module(Rc::new(Module {
        name: dotted.to_string(),
        source,
    })))
}

/// The top-level package `import a.b` binds as `a`.
pub(crate) fn top_level(interp: &mut Interpreter<'_>, top: &str) -> EvalResult<Object> {
    resolve(interp, top)
}

pub(crate) fn import_member(
    interp: &mut Interpreter<'_>,
    module: &Object,
    dotted: &str,
    member: &str,
) -> EvalResult<Object> {
    let Object::Module(m) = module else {
        return Err(type_error(format!("'{dotted}' is not a module")));
    };
    if matches!(m.source, ModuleSource::Unavailable) || module_has(interp, m, member) {
        return module_attribute(interp, m, member);
    }
    Err(exc(
        ExcKind::ImportError,
        format!("cannot import name '{member}' from '{dotted}'"),
    ))
}

/// Names bound by `from module import *`.
pub(crate) fn star_exports(
    interp: &mut Interpreter<'_>,
    module: &Object,
) -> EvalResult<Vec<(String, Object)>> {
    let Object::Module(m) = module else {
        return Err(type_error("star import from a non-module"));
    };
    match &m.source {
        ModuleSource::Native(native) => Ok(native
            .exports()
            .filter_map(|name| native.member(name).map(|obj| (name.to_string(), obj)))
            .collect()),
        ModuleSource::Bound(binding) => {
            let mut out = Vec::new();
            for (name, _) in binding.members() {
                if !name.starts_with('_') {
                    out.push((name.to_string(), module_attribute(interp, m, name)?));
                }
            }
            Ok(out)
        }
        ModuleSource::Unavailable => Err(unavailable(&m.name)),
    }
}

fn unavailable(module: &str) -> super::fault::Unwind {
    exc(
        ExcKind::NotImplementedError,
        format!("Module '{module}' is allowed but is not available in this runtime."),
    )
}

pub(crate) fn module_attribute(
    _interp: &mut Interpreter<'_>,
    module: &Rc<Module>,
    attr: &str,
) -> EvalResult<Object> {
    let missing = || {
        exc(
            ExcKind::AttributeError,
            format!("module '{}' has no attribute '{attr}'", module.name),
        )
    };
    if attr.starts_with('_') {
        return Err(policy(
            ErrorKind::AttributeBlocked,
            format!("Access to attribute '{attr}' of 'module' object is not allowed."),
        ));
    }
    match &module.source {
        ModuleSource::Native(native) => native.member(attr).ok_or_else(missing),
        ModuleSource::Bound(binding) => match binding.member(attr) {
            Some(ModuleMember::Tool(tool)) => Ok(Object::Tool(tool.clone())),
            Some(ModuleMember::Value(value)) => Ok(Object::from_value(value)),
            Some(ModuleMember::Submodule(sub)) => Ok(Object::Module(Rc::new(Module {
                name: sub.name().to_string(),
                source: ModuleSource::Bound(sub.clone()),
            }))),
            None => Err(missing()),
        },
        ModuleSource::Unavailable => Err(unavailable(&module.name)),
    }
}

pub(crate) fn module_has(_interp: &Interpreter<'_>, module: &Rc<Module>, attr: &str) -> bool {
    if attr.starts_with('_') {
        return false;
    }
    match &module.source {
        ModuleSource::Native(native) => native.member(attr).is_some(),
        ModuleSource::Bound(binding) => binding.member(attr).is_some(),
        ModuleSource::Unavailable => false,
    }
}

// ----------------------------------------------------------------------
// Shared argument helpers
// ----------------------------------------------------------------------

fn real(obj: &Object, func: &str) -> EvalResult<f64> {
    obj.as_float().ok_or_else(|| {
        type_error(format!(
            "{func}() must be a real number, not {}",
            obj.type_name()
        ))
    })
}

fn real_at(args: &Args, idx: usize, func: &str) -> EvalResult<f64> {
    match args.get(idx) {
        Some(obj) => real(obj, func),
        None => Err(type_error(format!("{func}() missing required argument {}", idx + 1))),
    }
}

fn domain_error() -> super::fault::Unwind {
    value_error("math domain error")
}

fn range_error() -> super::fault::Unwind {
    exc(ExcKind::OverflowError, "math range error")
}

fn overflow() -> super::fault::Unwind {
    exc(
        ExcKind::OverflowError,
        "integer result does not fit in 64 bits",
    )
}

/// Apply `f` and translate NaN and infinity results into Python's errors.
fn float_result(x: f64, out: f64) -> EvalResult<Object> {
    if out.is_nan() && !x.is_nan() {
        return Err(domain_error());
    }
    if out.is_infinite() && x.is_finite() {
        return Err(range_error());
    }
    Ok(Object::Float(out))
}

fn unary(args: &Args, func: &str, f: fn(f64) -> f64) -> EvalResult<Object> {
    args.expect(func, 1, 1)?;
    let x = real_at(args, 0, func)?;
    float_result(x, f(x))
}

fn int_arg(obj: &Object, func: &str) -> EvalResult<i64> {
    match obj {
        Object::Float(_) => Err(type_error(format!(
            "{func}() 'float' object cannot be interpreted as an integer"
        ))),
        other => other.as_int().ok_or_else(|| {
            type_error(format!(
                "'{}' object cannot be interpreted as an integer",
                other.type_name()
            ))
        }),
    }
}

fn gcd(mut a: i64, mut b: i64) -> i64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a.abs()
}

fn str_key(name: &str) -> EvalResult<(super::object::HashKey, Object)> {
    let key = Object::str_from(name);
    Ok((key.hash_key()?, key))
}

// ----------------------------------------------------------------------
// math
// ----------------------------------------------------------------------

fn math_constant(name: &str) -> Option<Object> {
    Some(Object::Float(match name {
        "pi" => std::f64::consts::PI,
        "e" => std::f64::consts::E,
        "tau" => std::f64::consts::TAU,
        "inf" => f64::INFINITY,
        "nan" => f64::NAN,
        _ => return None,
    }))
}

fn rounding(args: &Args, func: &str, f: fn(f64) -> f64) -> EvalResult<Object> {
    args.expect(func, 1, 1)?;
    match args.first() {
        Object::Float(x) => float_to_int(f(*x)).map(Object::Int),
        Object::Int(i) => Ok(Object::Int(*i)),
        Object::Bool(b) => Ok(Object::Int(i64::from(*b))),
        other => Err(type_error(format!(
            "must be real number, not {}",
            other.type_name()
        ))),
    }
}

fn math_log(_: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("log", 1, 2)?;
    let x = real_at(&args, 0, "log")?;
    if x <= 0.0 {
        return Err(domain_error());
    }
    match args.get(1) {
        None => Ok(Object::Float(x.ln())),
        Some(base) => {
            let base = real(base, "log")?;
            if base <= 0.0 || base == 1.0 {
                return Err(if base == 1.0 {
                    exc(ExcKind::ZeroDivisionError, "float division by zero")
                } else {
                    domain_error()
                });
            }
            Ok(Object::Float(x.ln() / base.ln()))
        }
    }
}

fn positive_log(args: &Args, func: &str, f: fn(f64) -> f64) -> EvalResult<Object> {
    args.expect(func, 1, 1)?;
    let x = real_at(args, 0, func)?;
    if x <= 0.0 {
        return Err(domain_error());
    }
    Ok(Object::Float(f(x)))
}

fn math_factorial(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("factorial", 1, 1)?;
    let n = int_arg(args.first(), "factorial")?;
    if n < 0 {
        return Err(value_error("factorial() not defined for negative values"));
    }
    interp.charge(n.min(64) as usize)?;
    let mut acc: i64 = 1;
    for i in 2..=n {
        acc = acc.checked_mul(i).ok_or_else(overflow)?;
    }
    Ok(Object::Int(acc))
}

fn math_gcd(_: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    let mut acc = 0;
    for arg in &args.positional {
        acc = gcd(acc, int_arg(arg, "gcd")?);
    }
    Ok(Object::Int(acc))
}

fn math_lcm(_: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    let mut acc: i64 = 1;
    for arg in &args.positional {
        let n = int_arg(arg, "lcm")?;
        if n == 0 || acc == 0 {
            acc = 0;
            continue;
        }
        acc = (acc / gcd(acc, n)).checked_mul(n).ok_or_else(overflow)?.abs();
    }
    Ok(Object::Int(acc))
}

fn math_comb(_: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("comb", 2, 2)?;
    let n = int_arg(&args.positional[0], "comb")?;
    let k = int_arg(&args.positional[1], "comb")?;
    if n < 0 || k < 0 {
        return Err(value_error("n and k must be non-negative integers"));
    }
    if k > n {
        return Ok(Object::Int(0));
    }
    let k = k.min(n - k);
    let mut acc: i128 = 1;
    for i in 0..k {
        acc = acc * i128::from(n - i) / i128::from(i + 1);
        if acc > i128::from(i64::MAX) {
            return Err(overflow());
        }
    }
    Ok(Object::Int(acc as i64))
}

fn math_perm(_: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("perm", 1, 2)?;
    let n = int_arg(&args.positional[0], "perm")?;
    let k = match args.optional(1) {
        Some(k) => int_arg(k, "perm")?,
        None => n,
    };
    if n < 0 || k < 0 {
        return Err(value_error("n and k must be non-negative integers"));
    }
    if k > n {
        return Ok(Object::Int(0));
    }
    let mut acc: i64 = 1;
    for i in 0..k {
        acc = acc.checked_mul(n - i).ok_or_else(overflow)?;
    }
    Ok(Object::Int(acc))
}

fn math_isqrt(_: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("isqrt", 1, 1)?;
    let n = int_arg(args.first(), "isqrt")?;
    if n < 0 {
        return Err(value_error("isqrt() argument must be nonnegative"));
    }
    let mut root = (n as f64).sqrt() as i64;
    while root.saturating_mul(root) > n {
        root -= 1;
    }
    while (root + 1).saturating_mul(root + 1) <= n {
        root += 1;
    }
    Ok(Object::Int(root))
}

fn math_prod(interp: &mut Interpreter<'_>, mut args: Args) -> EvalResult<Object> {
    let start = args.take_kw("start").unwrap_or(Object::Int(1));
    args.expect("prod", 1, 1)?;
    let mut acc = start;
    for item in interp.iterate(args.first())? {
        acc = binary(interp, Operator::Mult, &acc, &item)?;
    }
    Ok(acc)
}

fn math_fsum(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("fsum", 1, 1)?;
    // Neumaier compensated summation.
    let (mut sum, mut compensation) = (0.0_f64, 0.0_f64);
    for item in interp.iterate(args.first())? {
        let x = real(&item, "fsum")?;
        let t = sum + x;
        compensation += if sum.abs() >= x.abs() {
            (sum - t) + x
        } else {
            (x - t) + sum
        };
        sum = t;
    }
    Ok(Object::Float(sum + compensation))
}

fn math_isclose(_: &mut Interpreter<'_>, mut args: Args) -> EvalResult<Object> {
    let rel_tol = match args.take_kw("rel_tol") {
        Some(v) => real(&v, "isclose")?,
        None => 1e-9,
    };
    let abs_tol = match args.take_kw("abs_tol") {
        Some(v) => real(&v, "isclose")?,
        None => 0.0,
    };
    args.expect("isclose", 2, 2)?;
    if rel_tol < 0.0 || abs_tol < 0.0 {
        return Err(value_error("tolerances must be non-negative"));
    }
    let a = real_at(&args, 0, "isclose")?;
    let b = real_at(&args, 1, "isclose")?;
    if a == b {
        return Ok(Object::Bool(true));
    }
    if a.is_infinite() || b.is_infinite() {
        return Ok(Object::Bool(false));
    }
    let diff = (b - a).abs();
    Ok(Object::Bool(
        diff <= (rel_tol * b).abs() || diff <= (rel_tol * a).abs() || diff <= abs_tol,
    ))
}

fn math_hypot(_: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    let mut acc = 0.0_f64;
    for arg in &args.positional {
        acc = acc.hypot(real(arg, "hypot")?);
    }
    Ok(Object::Float(acc))
}

fn math_binary(args: &Args, func: &str, f: fn(f64, f64) -> f64) -> EvalResult<Object> {
    args.expect(func, 2, 2)?;
    let a = real_at(args, 0, func)?;
    let b = real_at(args, 1, func)?;
    let out = f(a, b);
    if out.is_nan() && !a.is_nan() && !b.is_nan() {
        return Err(domain_error());
    }
    if out.is_infinite() && a.is_finite() && b.is_finite() {
        return Err(range_error());
    }
    Ok(Object::Float(out))
}

fn math_modf(_: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("modf", 1, 1)?;
    let x = real_at(&args, 0, "modf")?;
    Ok(Object::tuple(vec![
        Object::Float(x.fract()),
        Object::Float(x.trunc()),
    ]))
}

static MATH_FUNCTIONS: &[BuiltinFn] = &[
    BuiltinFn { name: "acos", func: |_, a| unary(&a, "acos", f64::acos) },
    BuiltinFn { name: "asin", func: |_, a| unary(&a, "asin", f64::asin) },
    BuiltinFn { name: "atan", func: |_, a| unary(&a, "atan", f64::atan) },
    BuiltinFn { name: "atan2", func: |_, a| math_binary(&a, "atan2", f64::atan2) },
    BuiltinFn { name: "ceil", func: |_, a| rounding(&a, "ceil", f64::ceil) },
    BuiltinFn { name: "comb", func: math_comb },
    BuiltinFn { name: "copysign", func: |_, a| math_binary(&a, "copysign", f64::copysign) },
    BuiltinFn { name: "cos", func: |_, a| unary(&a, "cos", f64::cos) },
    BuiltinFn { name: "cosh", func: |_, a| unary(&a, "cosh", f64::cosh) },
    BuiltinFn { name: "degrees", func: |_, a| unary(&a, "degrees", f64::to_degrees) },
    BuiltinFn { name: "exp", func: |_, a| unary(&a, "exp", f64::exp) },
    BuiltinFn { name: "fabs", func: |_, a| unary(&a, "fabs", f64::abs) },
    BuiltinFn { name: "factorial", func: math_factorial },
    BuiltinFn { name: "floor", func: |_, a| rounding(&a, "floor", f64::floor) },
    BuiltinFn {
        name: "fmod",
        func: |_, a| {
            math_binary(&a, "fmod", |x, y| if y == 0.0 { f64::NAN } else { x % y })
        },
    },
    BuiltinFn { name: "fsum", func: math_fsum },
    BuiltinFn { name: "gcd", func: math_gcd },
    BuiltinFn { name: "hypot", func: math_hypot },
    BuiltinFn { name: "isclose", func: math_isclose },
    BuiltinFn {
        name: "isfinite",
        func: |_, a| {
            a.expect("isfinite", 1, 1)?;
            Ok(Object::Bool(real_at(&a, 0, "isfinite")?.is_finite()))
        },
    },
    BuiltinFn {
        name: "isinf",
        func: |_, a| {
            a.expect("isinf", 1, 1)?;
            Ok(Object::Bool(real_at(&a, 0, "isinf")?.is_infinite()))
        },
    },
    BuiltinFn {
        name: "isnan",
        func: |_, a| {
            a.expect("isnan", 1, 1)?;
            Ok(Object::Bool(real_at(&a, 0, "isnan")?.is_nan()))
        },
    },
    BuiltinFn { name: "isqrt", func: math_isqrt },
    BuiltinFn { name: "lcm", func: math_lcm },
    BuiltinFn { name: "log", func: math_log },
    BuiltinFn { name: "log10", func: |_, a| positive_log(&a, "log10", f64::log10) },
    BuiltinFn { name: "log2", func: |_, a| positive_log(&a, "log2", f64::log2) },
    BuiltinFn { name: "modf", func: math_modf },
    BuiltinFn { name: "perm", func: math_perm },
    BuiltinFn { name: "pow", func: |_, a| math_binary(&a, "pow", f64::powf) },
    BuiltinFn { name: "prod", func: math_prod },
    BuiltinFn { name: "radians", func: |_, a| unary(&a, "radians", f64::to_radians) },
    BuiltinFn { name: "sin", func: |_, a| unary(&a, "sin", f64::sin) },
    BuiltinFn { name: "sinh", func: |_, a| unary(&a, "sinh", f64::sinh) },
    BuiltinFn { name: "sqrt", func: |_, a| unary(&a, "sqrt", f64::sqrt) },
    BuiltinFn { name: "tan", func: |_, a| unary(&a, "tan", f64::tan) },
    BuiltinFn { name: "tanh", func: |_, a| unary(&a, "tanh", f64::tanh) },
    BuiltinFn { name: "trunc", func: |_, a| rounding(&a, "trunc", f64::trunc) },
];

static MATH: NativeModule = NativeModule {
    name: "math",
    functions: MATH_FUNCTIONS,
    constants: &["e", "inf", "nan", "pi", "tau"],
    constant: math_constant,
};

// ----------------------------------------------------------------------
// statistics
// ----------------------------------------------------------------------

/// Numeric data points, remembering whether every one was an integer.
struct Sample {
    values: Vec<f64>,
    all_ints: bool,
    int_sum: i128,
}

fn sample(interp: &mut Interpreter<'_>, args: &Args, func: &str) -> EvalResult<Sample> {
    args.expect(func, 1, 1)?;
    let items = interp.iterate(args.first())?;
    let mut out = Sample {
        values: Vec::with_capacity(items.len()),
        all_ints: true,
        int_sum: 0,
    };
    for item in &items {
        match item {
            Object::Int(i) => out.int_sum += i128::from(*i),
            Object::Bool(b) => out.int_sum += i128::from(*b),
            _ => out.all_ints = false,
        }
        out.values.push(real(item, func)?);
    }
    Ok(out)
}

/// An int when integer data gives an integral result, like Python does.
fn typed(sample: &Sample, value: f64) -> Object {
    if sample.all_ints && value.fract() == 0.0 && value.abs() < 9.0e15 {
        Object::Int(value as i64)
    } else {
        Object::Float(value)
    }
}

fn stats_mean(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    let data = sample(interp, &args, "mean")?;
    let n = data.values.len();
    if n == 0 {
        return Err(value_error("mean requires at least one data point"));
    }
    if data.all_ints && data.int_sum % n as i128 == 0 {
        return i64::try_from(data.int_sum / n as i128)
            .map(Object::Int)
            .map_err(|_| overflow());
    }
    Ok(Object::Float(data.values.iter().sum::<f64>() / n as f64))
}

fn stats_fmean(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    let data = sample(interp, &args, "fmean")?;
    if data.values.is_empty() {
        return Err(value_error("fmean requires at least one data point"));
    }
    Ok(Object::Float(
        data.values.iter().sum::<f64>() / data.values.len() as f64,
    ))
}

fn sorted_data(interp: &mut Interpreter<'_>, args: &Args, func: &str) -> EvalResult<Vec<Object>> {
    args.expect(func, 1, 1)?;
    let items = interp.iterate(args.first())?;
    if items.is_empty() {
        return Err(value_error("no median for empty data"));
    }
    sort_objects(interp, items, None, false)
}

fn stats_median(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    let items = sorted_data(interp, &args, "median")?;
    let n = items.len();
    if n % 2 == 1 {
        return Ok(items[n / 2].clone());
    }
    let lo = real(&items[n / 2 - 1], "median")?;
    let hi = real(&items[n / 2], "median")?;
    Ok(Object::Float((lo + hi) / 2.0))
}

fn stats_median_low(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    let items = sorted_data(interp, &args, "median_low")?;
    let n = items.len();
    Ok(items[if n % 2 == 1 { n / 2 } else { n / 2 - 1 }].clone())
}

fn stats_median_high(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    let items = sorted_data(interp, &args, "median_high")?;
    Ok(items[items.len() / 2].clone())
}

/// Values in first-seen order with their counts.
fn tally(interp: &mut Interpreter<'_>, source: &Object) -> EvalResult<Vec<(Object, i64)>> {
    let mut counts = Dict::default();
    for item in interp.iterate(source)? {
        let hash = item.hash_key()?;
        let next = counts.get(&hash).and_then(Object::as_int).unwrap_or(0) + 1;
        counts.insert(hash, item, Object::Int(next));
    }
    Ok(counts
        .items()
        .into_iter()
        .map(|(k, v)| (k, v.as_int().unwrap_or(0)))
        .collect())
}

fn stats_mode(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("mode", 1, 1)?;
    let counts = tally(interp, args.first())?;
    let mut best: Option<(Object, i64)> = None;
    for (item, count) in counts {
        if best.as_ref().map_or(true, |(_, c)| count > *c) {
            best = Some((item, count));
        }
    }
    best.map(|(item, _)| item)
        .ok_or_else(|| value_error("no mode for empty data"))
}

fn stats_multimode(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("multimode", 1, 1)?;
    let counts = tally(interp, args.first())?;
    let top = counts.iter().map(|(_, c)| *c).max().unwrap_or(0);
    Ok(Object::list(
        counts
            .into_iter()
            .filter(|(_, c)| *c == top)
            .map(|(item, _)| item)
            .collect(),
    ))
}

fn sum_of_squares(values: &[f64]) -> f64 {
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|x| (x - mean) * (x - mean)).sum()
}

fn spread(interp: &mut Interpreter<'_>, args: &Args, func: &str, sample_based: bool) -> EvalResult<(Sample, f64)> {
    let data = sample(interp, args, func)?;
    let n = data.values.len();
    let min = if sample_based { 2 } else { 1 };
    if n < min {
        let what = if func.contains("variance") { "variance" } else { func };
        return Err(value_error(if sample_based {
            format!("{what} requires at least two data points")
        } else {
            format!("{what} requires at least one data point")
        }));
    }
    let denominator = (if sample_based { n - 1 } else { n }) as f64;
    let variance = sum_of_squares(&data.values) / denominator;
    Ok((data, variance))
}

fn stats_variance(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    let (data, variance) = spread(interp, &args, "variance", true)?;
    Ok(typed(&data, variance))
}

fn stats_pvariance(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    let (data, variance) = spread(interp, &args, "pvariance", false)?;
    Ok(typed(&data, variance))
}

fn stats_stdev(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    let (_, variance) = spread(interp, &args, "stdev", true)?;
    Ok(Object::Float(variance.sqrt()))
}

fn stats_pstdev(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    let (_, variance) = spread(interp, &args, "pstdev", false)?;
    Ok(Object::Float(variance.sqrt()))
}

static STATISTICS: NativeModule = NativeModule {
    name: "statistics",
    functions: &[
        BuiltinFn { name: "fmean", func: stats_fmean },
        BuiltinFn { name: "mean", func: stats_mean },
        BuiltinFn { name: "median", func: stats_median },
        BuiltinFn { name: "median_high", func: stats_median_high },
        BuiltinFn { name: "median_low", func: stats_median_low },
        BuiltinFn { name: "mode", func: stats_mode },
        BuiltinFn { name: "multimode", func: stats_multimode },
        BuiltinFn { name: "pstdev", func: stats_pstdev },
        BuiltinFn { name: "pvariance", func: stats_pvariance },
        BuiltinFn { name: "stdev", func: stats_stdev },
        BuiltinFn { name: "variance", func: stats_variance },
    ],
    constants: &[],
    constant: no_constants,
};

// ----------------------------------------------------------------------
// random
// ----------------------------------------------------------------------

fn random_seed(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("seed", 0, 1)?;
    let seed = match args.first() {
        Object::None => rand::random::<u64>(),
        Object::Int(i) => *i as u64,
        Object::Bool(b) => u64::from(*b),
        Object::Float(f) => f.to_bits(),
        Object::Str(s) => {
            let digest = Sha256::digest(s.as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            u64::from_le_bytes(bytes)
        }
        other => {
            return Err(type_error(format!(
                "The only supported seed types are: None, int, float, str, not {}",
                other.type_name()
            )))
        }
    };
    interp.reseed(seed);
    Ok(Object::None)
}

fn random_random(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("random", 0, 0)?;
    Ok(Object::Float(interp.rng().gen::<f64>()))
}

fn random_uniform(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("uniform", 2, 2)?;
    let a = real_at(&args, 0, "uniform")?;
    let b = real_at(&args, 1, "uniform")?;
    let t = interp.rng().gen::<f64>();
    Ok(Object::Float(a + (b - a) * t))
}

fn random_randint(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("randint", 2, 2)?;
    let a = args.int_at(0, "randint")?;
    let b = args.int_at(1, "randint")?;
    if a > b {
        return Err(value_error(format!(
            "empty range in randrange({a}, {})",
            b.saturating_add(1)
        )));
    }
    Ok(Object::Int(interp.rng().gen_range(a..=b)))
}

fn random_randrange(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("randrange", 1, 3)?;
    let (start, stop) = match args.opt_int_at(1, "randrange")? {
        Some(stop) => (args.int_at(0, "randrange")?, stop),
        None => (0, args.int_at(0, "randrange")?),
    };
    let step = args.opt_int_at(2, "randrange")?.unwrap_or(1);
    if step == 0 {
        return Err(value_error("zero step for randrange()"));
    }
    let count = if step > 0 {
        (stop - start + step - 1) / step
    } else {
        (start - stop - step - 1) / -step
    };
    if count <= 0 {
        return Err(value_error(format!(
            "empty range in randrange({start}, {stop}, {step})"
        )));
    }
    let pick = interp.rng().gen_range(0..count);
    Ok(Object::Int(start + pick * step))
}

fn random_choice(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("choice", 1, 1)?;
    let items = interp.iterate(args.first())?;
    if items.is_empty() {
        return Err(exc(
            ExcKind::IndexError,
            "Cannot choose from an empty sequence",
        ));
    }
    let pick = interp.rng().gen_range(0..items.len());
    Ok(items[pick].clone())
}

fn random_choices(interp: &mut Interpreter<'_>, mut args: Args) -> EvalResult<Object> {
    let weights = args.take_kw("weights").filter(|w| !matches!(w, Object::None));
    let k = match args.take_kw("k") {
        Some(k) => int_arg(&k, "choices")?,
        None => 1,
    };
    args.expect("choices", 1, 2)?;
    let weights = weights.or_else(|| args.optional(1).cloned());
    let population = interp.iterate(args.first())?;
    if population.is_empty() {
        return Err(exc(
            ExcKind::IndexError,
            "Cannot choose from an empty sequence",
        ));
    }
    let k = usize::try_from(k).unwrap_or(0);
    interp.charge(k)?;
    let cumulative = match weights {
        Some(w) => {
            let mut total = 0.0;
            let mut out = Vec::new();
            for weight in interp.iterate(&w)? {
                total += real(&weight, "choices")?;
                out.push(total);
            }
            if out.len() != population.len() {
                return Err(value_error(
                    "The number of weights does not match the population",
                ));
            }
            if total <= 0.0 {
                return Err(value_error("Total of weights must be greater than zero"));
            }
            Some(out)
        }
        None => None,
    };
    let mut picked = Vec::with_capacity(k);
    for _ in 0..k {
        let idx = match &cumulative {
            Some(cumulative) => {
                let total = cumulative.last().copied().unwrap_or(0.0);
                let target = interp.rng().gen::<f64>() * total;
                cumulative
                    .iter()
                    .position(|c| target < *c)
                    .unwrap_or(population.len() - 1)
            }
            None => interp.rng().gen_range(0..population.len()),
        };
        picked.push(population[idx].clone());
    }
    Ok(Object::list(picked))
}

fn random_shuffle(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("shuffle", 1, 1)?;
    let Object::List(items) = args.first() else {
        return Err(type_error(format!(
            "'{}' object does not support item assignment",
            args.first().type_name()
        )));
    };
    let mut shuffled = items.borrow().clone();
    interp.charge(shuffled.len())?;
    shuffled.shuffle(interp.rng());
    *items.borrow_mut() = shuffled;
    Ok(Object::None)
}

fn random_sample(interp: &mut Interpreter<'_>, mut args: Args) -> EvalResult<Object> {
    args.keyword_to_positional("k", 1);
    args.expect("sample", 2, 2)?;
    let population = interp.iterate(args.first())?;
    let k = args.int_at(1, "sample")?;
    let k = usize::try_from(k)
        .ok()
        .filter(|k| *k <= population.len())
        .ok_or_else(|| value_error("Sample larger than population or is negative"))?;
    interp.charge(k)?;
    let picked = rand::seq::index::sample(interp.rng(), population.len(), k)
        .into_iter()
        .map(|i| population[i].clone())
        .collect();
    Ok(Object::list(picked))
}

fn random_gauss(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("gauss", 0, 2)?;
    let mu = match args.get(0) {
        Some(v) => real(v, "gauss")?,
        None => 0.0,
    };
    let sigma = match args.get(1) {
        Some(v) => real(v, "gauss")?,
        None => 1.0,
    };
    // Box-Muller transform.
    let u1: f64 = 1.0 - interp.rng().gen::<f64>();
    let u2: f64 = interp.rng().gen::<f64>();
    let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
    Ok(Object::Float(mu + sigma * z))
}

static RANDOM: NativeModule = NativeModule {
    name: "random",
    functions: &[
        BuiltinFn { name: "choice", func: random_choice },
        BuiltinFn { name: "choices", func: random_choices },
        BuiltinFn { name: "gauss", func: random_gauss },
        BuiltinFn { name: "normalvariate", func: random_gauss },
        BuiltinFn { name: "randint", func: random_randint },
        BuiltinFn { name: "random", func: random_random },
        BuiltinFn { name: "randrange", func: random_randrange },
        BuiltinFn { name: "sample", func: random_sample },
        BuiltinFn { name: "seed", func: random_seed },
        BuiltinFn { name: "shuffle", func: random_shuffle },
        BuiltinFn { name: "uniform", func: random_uniform },
    ],
    constants: &[],
    constant: no_constants,
};

// ----------------------------------------------------------------------
// re
// ----------------------------------------------------------------------

const FLAG_IGNORECASE: i64 = 2;
const FLAG_MULTILINE: i64 = 8;
const FLAG_DOTALL: i64 = 16;
const FLAG_VERBOSE: i64 = 64;
const FLAG_ASCII: i64 = 256;

fn re_constant(name: &str) -> Option<Object> {
    Some(Object::Int(match name {
        "I" | "IGNORECASE" => FLAG_IGNORECASE,
        "M" | "MULTILINE" => FLAG_MULTILINE,
        "S" | "DOTALL" => FLAG_DOTALL,
        "X" | "VERBOSE" => FLAG_VERBOSE,
        "A" | "ASCII" => FLAG_ASCII,
        _ => return None,
    }))
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Anchor {
    Anywhere,
    Start,
    Full,
}

fn build_regex(source: &str, flags: i64, anchor: Anchor) -> EvalResult<Regex> {
    // A verbose pattern may end in a comment; keep the wrapper's closing
    // parenthesis on its own line.
    let close = if flags & FLAG_VERBOSE != 0 { "\n)" } else { ")" };
    let pattern = match anchor {
        Anchor::Anywhere => source.to_string(),
        Anchor::Start => format!("\\A(?:{source}{close}"),
        Anchor::Full => format!("\\A(?:{source}{close}\\z"),
    };
    RegexBuilder::new(&pattern)
        .case_insensitive(flags & FLAG_IGNORECASE != 0)
        .multi_line(flags & FLAG_MULTILINE != 0)
        .dot_matches_new_line(flags & FLAG_DOTALL != 0)
        .ignore_whitespace(flags & FLAG_VERBOSE != 0)
        .build()
        .map_err(|e| value_error(format!("invalid regular expression: {e}")))
}

fn compile(pattern: &Object, flags: i64) -> EvalResult<Rc<PatternObj>> {
    match pattern {
        Object::Pattern(p) => {
            if flags != 0 {
                return Err(value_error(
                    "cannot process flags argument with a compiled pattern",
                ));
            }
            Ok(p.clone())
        }
        Object::Str(source) => Ok(Rc::new(PatternObj {
            source: source.to_string(),
            flags,
            regex: build_regex(source, flags, Anchor::Anywhere)?,
        })),
        other => Err(type_error(format!(
            "first argument must be string or compiled pattern, not {}",
            other.type_name()
        ))),
    }
}

fn match_object(regex: &Regex, text: &Rc<str>, caps: &Captures<'_>) -> Object {
    Object::Match(Rc::new(MatchObj {
        text: text.clone(),
        spans: (0..caps.len())
            .map(|i| caps.get(i).map(|m| (m.start(), m.end())))
            .collect(),
        names: Rc::new(regex.capture_names().map(|n| n.map(str::to_string)).collect()),
    }))
}

/// Expand a Python replacement template (`\1`, `\g<name>`) for one match.
fn expand_template(template: &str, caps: &Captures<'_>) -> EvalResult<String> {
    let group = |key: &str| -> EvalResult<String> {
        let found = match key.parse::<usize>() {
            Ok(idx) if idx < caps.len() => caps.get(idx),
            Ok(_) => return Err(value_error(format!("invalid group reference {key}"))),
            Err(_) => caps.name(key),
        };
        Ok(found.map_or(String::new(), |m| m.as_str().to_string()))
    };
    let mut out = String::new();
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(d) if d.is_ascii_digit() => {
                let mut key = d.to_string();
                if let Some(next) = chars.peek().copied().filter(char::is_ascii_digit) {
                    key.push(next);
                    chars.next();
                }
                out.push_str(&group(&key)?);
            }
            Some('g') if chars.peek() == Some(&'<') => {
                chars.next();
                let key: String = chars.by_ref().take_while(|c| *c != '>').collect();
                out.push_str(&group(&key)?);
            }
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => return Err(value_error("bad escape (end of pattern)")),
        }
    }
    Ok(out)
}

fn group_or_empty(caps: &Captures<'_>, idx: usize) -> Object {
    Object::str_from(caps.get(idx).map_or("", |m| m.as_str()))
}

/// Run `op` against a compiled pattern. `args` start after the pattern.
fn pattern_op(interp: &mut Interpreter<'_>, p: &Rc<PatternObj>, op: &str, mut args: Args) -> EvalResult<Object> {
    match op {
        "search" | "match" | "fullmatch" => {
            args.keyword_to_positional("string", 0);
            args.expect(op, 1, 1)?;
            let text = args.str_at(0, op)?;
            interp.charge(text.len() / 64 + 1)?;
            let anchored;
            let regex = match op {
                "search" => &p.regex,
                "match" => {
                    anchored = build_regex(&p.source, p.flags, Anchor::Start)?;
                    &anchored
                }
                _ => {
                    anchored = build_regex(&p.source, p.flags, Anchor::Full)?;
                    &anchored
                }
            };
            Ok(regex
                .captures(&text)
                .map_or(Object::None, |caps| match_object(regex, &text, &caps)))
        }
        "findall" | "finditer" => {
            args.keyword_to_positional("string", 0);
            args.expect(op, 1, 1)?;
            let text = args.str_at(0, op)?;
            let mut out = Vec::new();
            for caps in p.regex.captures_iter(&text) {
                interp.charge(1)?;
                out.push(match (op, caps.len()) {
                    ("finditer", _) => match_object(&p.regex, &text, &caps),
                    (_, 1) => group_or_empty(&caps, 0),
                    (_, 2) => group_or_empty(&caps, 1),
                    (_, n) => Object::tuple((1..n).map(|i| group_or_empty(&caps, i)).collect()),
                });
            }
            Ok(if op == "finditer" {
                make_iter("callable_iterator", out)
            } else {
                Object::list(out)
            })
        }
        "sub" => {
            args.keyword_to_positional("repl", 0);
            args.keyword_to_positional("string", 1);
            args.keyword_to_positional("count", 2);
            args.expect("sub", 2, 3)?;
            let repl = args.positional[0].clone();
            let text = args.str_at(1, "sub")?;
            let limit = args.opt_int_at(2, "sub")?.unwrap_or(0);
            let mut out = String::with_capacity(text.len());
            let mut last = 0;
            for (n, caps) in p.regex.captures_iter(&text).enumerate() {
                if limit > 0 && n as i64 >= limit {
                    break;
                }
                interp.charge(1)?;
                let Some(whole) = caps.get(0) else { continue };
                out.push_str(&text[last..whole.start()]);
                let replacement = match &repl {
                    Object::Str(template) => expand_template(template, &caps)?,
                    func if func.is_callable() => {
                        let m = match_object(&p.regex, &text, &caps);
                        match &interp.call_with(func, vec![m])? {
                            Object::Str(s) => s.to_string(),
                            other => {
                                return Err(type_error(format!(
                                    "expected str instance, {} found",
                                    other.type_name()
                                )))
                            }
                        }
                    }
                    other => {
                        return Err(type_error(format!(
                            "expected str instance, {} found",
                            other.type_name()
                        )))
                    }
                };
                out.push_str(&replacement);
                last = whole.end();
            }
            out.push_str(&text[last..]);
            Ok(Object::str_from(out))
        }
        "split" => {
            args.keyword_to_positional("string", 0);
            args.keyword_to_positional("maxsplit", 1);
            args.expect("split", 1, 2)?;
            let text = args.str_at(0, "split")?;
            let maxsplit = args.opt_int_at(1, "split")?.unwrap_or(0);
            let mut out = Vec::new();
            let mut last = 0;
            for (n, caps) in p.regex.captures_iter(&text).enumerate() {
                if maxsplit > 0 && n as i64 >= maxsplit {
                    break;
                }
                interp.charge(1)?;
                let Some(whole) = caps.get(0) else { continue };
                out.push(Object::str_from(&text[last..whole.start()]));
                for i in 1..caps.len() {
                    out.push(caps.get(i).map_or(Object::None, |m| Object::str_from(m.as_str())));
                }
                last = whole.end();
            }
            out.push(Object::str_from(&text[last..]));
            Ok(Object::list(out))
        }
        _ => Err(exc(
            ExcKind::AttributeError,
            format!("'re.Pattern' object has no attribute '{op}'"),
        )),
    }
}

/// Methods of a compiled pattern.
pub(crate) fn pattern_method(
    interp: &mut Interpreter<'_>,
    p: &Rc<PatternObj>,
    name: &str,
    args: Args,
) -> EvalResult<Object> {
    pattern_op(interp, p, name, args)
}

/// `re.<op>(pattern, ..., flags=0)` where `flags` sits at positional `flags_at`.
fn re_call(interp: &mut Interpreter<'_>, mut args: Args, op: &str, flags_at: usize) -> EvalResult<Object> {
    args.keyword_to_positional("flags", flags_at);
    args.keyword_to_positional("pattern", 0);
    let flags = if args.positional.len() > flags_at {
        let flags = args.positional.remove(flags_at);
        match flags {
            Object::None => 0,
            other => int_arg(&other, op)?,
        }
    } else {
        0
    };
    if args.positional.is_empty() {
        return Err(type_error(format!(
            "{op}() missing required argument 'pattern' (pos 1)"
        )));
    }
    let pattern = args.positional.remove(0);
    let compiled = compile(&pattern, flags)?;
    pattern_op(interp, &compiled, op, args)
}

fn re_compile(_: &mut Interpreter<'_>, mut args: Args) -> EvalResult<Object> {
    args.keyword_to_positional("flags", 1);
    args.expect("compile", 1, 2)?;
    let flags = args.opt_int_at(1, "compile")?.unwrap_or(0);
    compile(args.first(), flags).map(Object::Pattern)
}

fn re_escape(_: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("escape", 1, 1)?;
    let text = args.str_at(0, "escape")?;
    Ok(Object::str_from(regex::escape(&text)))
}

static RE: NativeModule = NativeModule {
    name: "re",
    functions: &[
        BuiltinFn { name: "compile", func: re_compile },
        BuiltinFn { name: "escape", func: re_escape },
        BuiltinFn { name: "findall", func: |i, a| re_call(i, a, "findall", 2) },
        BuiltinFn { name: "finditer", func: |i, a| re_call(i, a, "finditer", 2) },
        BuiltinFn { name: "fullmatch", func: |i, a| re_call(i, a, "fullmatch", 2) },
        BuiltinFn { name: "match", func: |i, a| re_call(i, a, "match", 2) },
        BuiltinFn { name: "search", func: |i, a| re_call(i, a, "search", 2) },
        BuiltinFn { name: "split", func: |i, a| re_call(i, a, "split", 3) },
        BuiltinFn { name: "sub", func: |i, a| re_call(i, a, "sub", 4) },
    ],
    constants: &[
        "A", "ASCII", "DOTALL", "I", "IGNORECASE", "M", "MULTILINE", "S", "VERBOSE", "X",
    ],
    constant: re_constant,
};

// ----------------------------------------------------------------------
// time
// ----------------------------------------------------------------------

const SLEEP_SLICE: Duration = Duration::from_millis(10);

fn time_time(_: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("time", 0, 0)?;
    let now = chrono::Utc::now();
    Ok(Object::Float(now.timestamp_micros() as f64 / 1e6))
}

fn time_monotonic(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("perf_counter", 0, 0)?;
    Ok(Object::Float(interp.elapsed_secs()))
}

fn time_sleep(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("sleep", 1, 1)?;
    let secs = real_at(&args, 0, "sleep")?;
    if secs < 0.0 {
        return Err(value_error("sleep length must be non-negative"));
    }
    let mut remaining = Duration::try_from_secs_f64(secs)
        .map_err(|_| exc(ExcKind::OverflowError, "sleep length is too large"))?;
    while !remaining.is_zero() {
        interp.check_cancelled()?;
        let step = remaining.min(SLEEP_SLICE);
        std::thread::sleep(step);
        remaining -= step;
    }
    interp.check_cancelled()?;
    Ok(Object::None)
}

fn time_strftime(_: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("strftime", 1, 1)?;
    let format = args.str_at(0, "strftime")?;
    let items = chrono::format::StrftimeItems::new(&*format);
    if items.clone().any(|item| matches!(item, chrono::format::Item::Error)) {
        return Err(value_error(format!("Invalid format string: {format}")));
    }
    Ok(Object::str_from(
        chrono::Local::now().format_with_items(items).to_string(),
    ))
}

static TIME: NativeModule = NativeModule {
    name: "time",
    functions: &[
        BuiltinFn { name: "monotonic", func: time_monotonic },
        BuiltinFn { name: "perf_counter", func: time_monotonic },
        BuiltinFn { name: "sleep", func: time_sleep },
        BuiltinFn { name: "strftime", func: time_strftime },
        BuiltinFn { name: "time", func: time_time },
    ],
    constants: &[],
    constant: no_constants,
};

// ----------------------------------------------------------------------
// json
// ----------------------------------------------------------------------

struct JsonStyle {
    indent: Option<String>,
    sort_keys: bool,
    ensure_ascii: bool,
}

fn json_string(text: &str, ensure_ascii: bool, out: &mut String) {
    out.push('"');
    for c in text.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{08}' => out.push_str("\\b"),
            '\u{0c}' => out.push_str("\\f"),
            c if (c as u32) < 0x20 || (ensure_ascii && !c.is_ascii()) => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{unit:04x}"));
                }
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn json_key(key: &Object) -> EvalResult<String> {
    Ok(match key {
        Object::Str(s) => s.to_string(),
        Object::None => "null".to_string(),
        Object::Bool(b) => if *b { "true" } else { "false" }.to_string(),
        Object::Int(i) => i.to_string(),
        Object::Float(f) => float_repr(*f),
        other => {
            return Err(type_error(format!(
                "keys must be str, int, float, bool or None, not {}",
                other.type_name()
            )))
        }
    })
}

fn json_dump(
    interp: &mut Interpreter<'_>,
    value: &Object,
    style: &JsonStyle,
    level: usize,
    out: &mut String,
) -> EvalResult<()> {
    interp.charge(1)?;
    if level > 200 {
        return Err(value_error("Circular reference detected"));
    }
    let (open_sep, item_sep, close_sep) = match &style.indent {
        Some(indent) => (
            format!("\n{}", indent.repeat(level + 1)),
            format!(",\n{}", indent.repeat(level + 1)),
            format!("\n{}", indent.repeat(level)),
        ),
        None => (String::new(), ", ".to_string(), String::new()),
    };
    match value {
        Object::None => out.push_str("null"),
        Object::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Object::Int(i) => out.push_str(&i.to_string()),
        Object::Float(f) if f.is_nan() => out.push_str("NaN"),
        Object::Float(f) if f.is_infinite() => {
            out.push_str(if *f > 0.0 { "Infinity" } else { "-Infinity" })
        }
        Object::Float(f) => out.push_str(&float_repr(*f)),
        Object::Str(s) => json_string(s, style.ensure_ascii, out),
        Object::List(_) | Object::Tuple(_) | Object::Deque(_) => {
            let items = interp.iterate(value)?;
            if items.is_empty() {
                out.push_str("[]");
                return Ok(());
            }
            out.push('[');
            out.push_str(&open_sep);
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(&item_sep);
                }
                json_dump(interp, item, style, level + 1, out)?;
            }
            out.push_str(&close_sep);
            out.push(']');
        }
        Object::Dict(d) => {
            let mut entries = d
                .borrow()
                .items()
                .into_iter()
                .map(|(k, v)| Ok((json_key(&k)?, v)))
                .collect::<EvalResult<Vec<_>>>()?;
            if entries.is_empty() {
                out.push_str("{}");
                return Ok(());
            }
            if style.sort_keys {
                entries.sort_by(|a, b| a.0.cmp(&b.0));
            }
            out.push('{');
            out.push_str(&open_sep);
            for (i, (key, item)) in entries.iter().enumerate() {
                if i > 0 {
                    out.push_str(&item_sep);
                }
                json_string(key, style.ensure_ascii, out);
                out.push_str(": ");
                json_dump(interp, item, style, level + 1, out)?;
            }
            out.push_str(&close_sep);
            out.push('}');
        }
        other => {
            return Err(type_error(format!(
                "Object of type {} is not JSON serializable",
                other.type_name()
            )))
        }
    }
    Ok(())
}

fn json_dumps(interp: &mut Interpreter<'_>, mut args: Args) -> EvalResult<Object> {
    let indent = match args.take_kw("indent").as_ref() {
        None | Some(Object::None) => None,
        Some(Object::Str(s)) => Some(s.to_string()),
        Some(other) => Some(" ".repeat(usize::try_from(int_arg(other, "dumps")?).unwrap_or(0))),
    };
    let sort_keys = args.take_kw("sort_keys").is_some_and(|v| v.truthy());
    let ensure_ascii = args.take_kw("ensure_ascii").map_or(true, |v| v.truthy());
    args.expect("dumps", 1, 1)?;
    let style = JsonStyle {
        indent,
        sort_keys,
        ensure_ascii,
    };
    let mut out = String::new();
    json_dump(interp, args.first(), &style, 0, &mut out)?;
    Ok(Object::str_from(out))
}

fn from_json(value: serde_json::Value) -> EvalResult<Object> {
    Ok(match value {
        serde_json::Value::Null => Object::None,
        serde_json::Value::Bool(b) => Object::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Object::Int(i),
            None => Object::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Object::str_from(s),
        serde_json::Value::Array(items) => Object::list(
            items
                .into_iter()
                .map(from_json)
                .collect::<EvalResult<_>>()?,
        ),
        serde_json::Value::Object(map) => {
            let mut dict = Dict::default();
            for (k, v) in map {
                let (hash, key) = str_key(&k)?;
                dict.insert(hash, key, from_json(v)?);
            }
            Object::dict(dict)
        }
    })
}

fn json_loads(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("loads", 1, 1)?;
    let text = args.str_at(0, "loads")?;
    interp.charge(text.len() / 64 + 1)?;
    let parsed: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| value_error(format!("Invalid JSON document: {e}")))?;
    from_json(parsed)
}

static JSON: NativeModule = NativeModule {
    name: "json",
    functions: &[
        BuiltinFn { name: "dumps", func: json_dumps },
        BuiltinFn { name: "loads", func: json_loads },
    ],
    constants: &[],
    constant: no_constants,
};

// ----------------------------------------------------------------------
// collections
// ----------------------------------------------------------------------

fn collections_counter(interp: &mut Interpreter<'_>, mut args: Args) -> EvalResult<Object> {
    let keywords = std::mem::take(&mut args.keywords);
    args.expect("Counter", 0, 1)?;
    let mut counts = Dict::with_flavor(DictFlavor::Counter);
    match args.get(0) {
        None | Some(Object::None) => {}
        Some(source @ Object::Dict(_)) => {
            for (k, v) in mapping_pairs(interp, source)? {
                counts.insert(k.hash_key()?, k, v);
            }
        }
        Some(source) => {
            for item in interp.iterate(source)? {
                let hash = item.hash_key()?;
                let next = counts.get(&hash).and_then(Object::as_int).unwrap_or(0) + 1;
                counts.insert(hash, item, Object::Int(next));
            }
        }
    }
    for (k, v) in keywords {
        let (hash, key) = str_key(&k)?;
        counts.insert(hash, key, v);
    }
    Ok(Object::dict(counts))
}

fn collections_defaultdict(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("defaultdict", 0, 2)?;
    let factory = args.first().clone();
    if !matches!(factory, Object::None) && !factory.is_callable() {
        return Err(type_error("first argument must be callable or None"));
    }
    let mut dict = Dict::with_flavor(match factory {
        Object::None => DictFlavor::Plain,
        factory => DictFlavor::Default(factory),
    });
    if let Some(source) = args.get(1) {
        for (k, v) in mapping_pairs(interp, source)? {
            dict.insert(k.hash_key()?, k, v);
        }
    }
    Ok(Object::dict(dict))
}

fn collections_ordered_dict(interp: &mut Interpreter<'_>, mut args: Args) -> EvalResult<Object> {
    let keywords = std::mem::take(&mut args.keywords);
    args.expect("OrderedDict", 0, 1)?;
    let mut dict = Dict::default();
    if let Some(source) = args.get(0) {
        for (k, v) in mapping_pairs(interp, source)? {
            dict.insert(k.hash_key()?, k, v);
        }
    }
    for (k, v) in keywords {
        let (hash, key) = str_key(&k)?;
        dict.insert(hash, key, v);
    }
    Ok(Object::dict(dict))
}

fn collections_deque(interp: &mut Interpreter<'_>, mut args: Args) -> EvalResult<Object> {
    if args.take_kw("maxlen").is_some_and(|m| !matches!(m, Object::None)) {
        return Err(type_error("deque() maxlen is not supported in this runtime"));
    }
    args.expect("deque", 0, 1)?;
    let items: VecDeque<Object> = match args.get(0) {
        Some(source) => interp.iterate(source)?.into(),
        None => VecDeque::new(),
    };
    Ok(Object::Deque(Rc::new(RefCell::new(items))))
}

static COLLECTIONS: NativeModule = NativeModule {
    name: "collections",
    functions: &[
        BuiltinFn { name: "Counter", func: collections_counter },
        BuiltinFn { name: "OrderedDict", func: collections_ordered_dict },
        BuiltinFn { name: "defaultdict", func: collections_defaultdict },
        BuiltinFn { name: "deque", func: collections_deque },
    ],
    constants: &[],
    constant: no_constants,
};

// ----------------------------------------------------------------------
// itertools
// ----------------------------------------------------------------------
//
// Everything is eager, so the infinite iterators (`count`, `cycle`,
// unbounded `repeat`) are absent.

fn pool(interp: &mut Interpreter<'_>, args: &Args, func: &str) -> EvalResult<(Vec<Object>, usize)> {
    args.expect(func, 1, 2)?;
    let items = interp.iterate(args.first())?;
    let r = match args.opt_int_at(1, func)? {
        Some(r) => usize::try_from(r).map_err(|_| value_error("r must be non-negative"))?,
        None => items.len(),
    };
    Ok((items, r))
}

/// Index tuples of `r`-combinations of `n` items, optionally with repeats.
fn combination_indices(n: usize, r: usize, repeats: bool, emit: &mut dyn FnMut(&[usize]) -> EvalResult<()>) -> EvalResult<()> {
    if (!repeats && r > n) || (n == 0 && r > 0) {
        return Ok(());
    }
    let mut idx: Vec<usize> = if repeats { vec![0; r] } else { (0..r).collect() };
    loop {
        emit(&idx)?;
        let limit = |i: usize| if repeats { n - 1 } else { i + n - r };
        let Some(i) = (0..r).rev().find(|&i| idx[i] != limit(i)) else {
            return Ok(());
        };
        idx[i] += 1;
        for j in i + 1..r {
            idx[j] = if repeats { idx[i] } else { idx[j - 1] + 1 };
        }
    }
}

fn itertools_combinations(interp: &mut Interpreter<'_>, mut args: Args) -> EvalResult<Object> {
    args.keyword_to_positional("r", 1);
    args.expect("combinations", 2, 2)?;
    let (items, r) = pool(interp, &args, "combinations")?;
    let mut out = Vec::new();
    combination_indices(items.len(), r, false, &mut |idx| {
        interp.charge(1)?;
        out.push(Object::tuple(idx.iter().map(|&i| items[i].clone()).collect()));
        Ok(())
    })?;
    Ok(make_iter("itertools.combinations", out))
}

fn itertools_combinations_with_replacement(interp: &mut Interpreter<'_>, mut args: Args) -> EvalResult<Object> {
    args.keyword_to_positional("r", 1);
    args.expect("combinations_with_replacement", 2, 2)?;
    let (items, r) = pool(interp, &args, "combinations_with_replacement")?;
    let mut out = Vec::new();
    combination_indices(items.len(), r, true, &mut |idx| {
        interp.charge(1)?;
        out.push(Object::tuple(idx.iter().map(|&i| items[i].clone()).collect()));
        Ok(())
    })?;
    Ok(make_iter("itertools.combinations_with_replacement", out))
}

fn itertools_permutations(interp: &mut Interpreter<'_>, mut args: Args) -> EvalResult<Object> {
    args.keyword_to_positional("r", 1);
    let (items, r) = pool(interp, &args, "permutations")?;
    let n = items.len();
    let mut out = Vec::new();
    if r <= n {
        // Choose `r` positions, then walk every ordering of each choice in
        // lexicographic index order.
        let mut used = vec![false; n];
        let mut current = Vec::with_capacity(r);
        fn walk(
            interp: &mut Interpreter<'_>,
            items: &[Object],
            r: usize,
            used: &mut [bool],
            current: &mut Vec<usize>,
            out: &mut Vec<Object>,
        ) -> EvalResult<()> {
            if current.len() == r {
                interp.charge(1)?;
                out.push(Object::tuple(current.iter().map(|&i| items[i].clone()).collect()));
                return Ok(());
            }
            for i in 0..items.len() {
                if !used[i] {
                    used[i] = true;
                    current.push(i);
                    walk(interp, items, r, used, current, out)?;
                    current.pop();
                    used[i] = false;
                }
            }
            Ok(())
        }
        walk(interp, &items, r, &mut used, &mut current, &mut out)?;
    }
    Ok(make_iter("itertools.permutations", out))
}

fn itertools_product(interp: &mut Interpreter<'_>, mut args: Args) -> EvalResult<Object> {
    let repeat = match args.take_kw("repeat") {
        Some(r) => usize::try_from(int_arg(&r, "product")?)
            .map_err(|_| value_error("repeat argument cannot be negative"))?,
        None => 1,
    };
    args.expect("product", 0, usize::MAX)?;
    let mut pools = Vec::new();
    for source in &args.positional {
        pools.push(interp.iterate(source)?);
    }
    let pools: Vec<Vec<Object>> = std::iter::repeat(pools).take(repeat).flatten().collect();
    let mut rows: Vec<Vec<Object>> = vec![Vec::new()];
    for pool in &pools {
        let mut next = Vec::with_capacity(rows.len() * pool.len());
        for row in &rows {
            for item in pool {
                interp.charge(1)?;
                let mut extended = row.clone();
                extended.push(item.clone());
                next.push(extended);
            }
        }
        rows = next;
    }
    Ok(make_iter(
        "itertools.product",
        rows.into_iter().map(Object::tuple).collect(),
    ))
}

fn itertools_chain(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("chain", 0, usize::MAX)?;
    let mut out = Vec::new();
    for source in &args.positional {
        out.extend(interp.iterate(source)?);
    }
    Ok(make_iter("itertools.chain", out))
}

fn itertools_accumulate(interp: &mut Interpreter<'_>, mut args: Args) -> EvalResult<Object> {
    let initial = args.take_kw("initial").filter(|v| !matches!(v, Object::None));
    args.keyword_to_positional("func", 1);
    args.expect("accumulate", 1, 2)?;
    let func = args.optional(1).cloned();
    let mut out = Vec::new();
    let mut acc = initial.clone();
    if let Some(start) = initial {
        out.push(start);
    }
    for item in interp.iterate(args.first())? {
        let next = match acc {
            None => item,
            Some(prev) => match &func {
                Some(func) => interp.call_with(func, vec![prev, item])?,
                None => binary(interp, Operator::Add, &prev, &item)?,
            },
        };
        out.push(next.clone());
        acc = Some(next);
    }
    Ok(make_iter("itertools.accumulate", out))
}

fn itertools_groupby(interp: &mut Interpreter<'_>, mut args: Args) -> EvalResult<Object> {
    args.keyword_to_positional("key", 1);
    args.expect("groupby", 1, 2)?;
    let key = args.optional(1).cloned();
    let mut groups: Vec<(Object, Vec<Object>)> = Vec::new();
    for item in interp.iterate(args.first())? {
        let k = match &key {
            Some(key) => interp.call_with(key, vec![item.clone()])?,
            None => item.clone(),
        };
        match groups.last_mut() {
            Some((last, members)) if equals(last, &k)? => members.push(item),
            _ => groups.push((k, vec![item])),
        }
    }
    Ok(make_iter(
        "itertools.groupby",
        groups
            .into_iter()
            .map(|(k, members)| Object::tuple(vec![k, make_iter("itertools._grouper", members)]))
            .collect(),
    ))
}

fn itertools_islice(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("islice", 2, 4)?;
    let items = interp.iterate(args.first())?;
    let bound = |idx: usize| -> EvalResult<Option<usize>> {
        match args.opt_int_at(idx, "islice")? {
            Some(v) => usize::try_from(v).map(Some).map_err(|_| {
                value_error("Indices for islice() must be None or an integer: 0 <= x <= sys.maxsize.")
            }),
            None => Ok(None),
        }
    };
    let (start, stop, step) = if args.positional.len() == 2 {
        (0, bound(1)?, 1)
    } else {
        (
            bound(1)?.unwrap_or(0),
            bound(2)?,
            bound(3)?.unwrap_or(1),
        )
    };
    if step == 0 {
        return Err(value_error("Step for islice() must be a positive integer or None."));
    }
    let stop = stop.unwrap_or(items.len()).min(items.len());
    let picked = (start..stop).step_by(step).map(|i| items[i].clone()).collect();
    Ok(make_iter("itertools.islice", picked))
}

fn itertools_zip_longest(interp: &mut Interpreter<'_>, mut args: Args) -> EvalResult<Object> {
    let fill = args.take_kw("fillvalue").unwrap_or(Object::None);
    args.expect("zip_longest", 0, usize::MAX)?;
    let columns = args
        .positional
        .iter()
        .map(|source| interp.iterate(source))
        .collect::<EvalResult<Vec<_>>>()?;
    let rows = columns.iter().map(Vec::len).max().unwrap_or(0);
    let out = (0..rows)
        .map(|row| {
            Object::tuple(
                columns
                    .iter()
                    .map(|c| c.get(row).cloned().unwrap_or_else(|| fill.clone()))
                    .collect(),
            )
        })
        .collect();
    Ok(make_iter("itertools.zip_longest", out))
}

fn itertools_repeat(interp: &mut Interpreter<'_>, mut args: Args) -> EvalResult<Object> {
    args.keyword_to_positional("times", 1);
    args.expect("repeat", 2, 2)?;
    let times = usize::try_from(args.int_at(1, "repeat")?).unwrap_or(0);
    interp.charge(times)?;
    Ok(make_iter("itertools.repeat", vec![args.first().clone(); times]))
}

fn itertools_starmap(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("starmap", 2, 2)?;
    let func = args.positional[0].clone();
    let mut out = Vec::new();
    for row in interp.iterate(&args.positional[1])? {
        let call_args = interp.iterate(&row)?;
        out.push(interp.call_with(&func, call_args)?);
    }
    Ok(make_iter("itertools.starmap", out))
}

fn while_predicate(interp: &mut Interpreter<'_>, args: &Args, func: &str, keep_prefix: bool) -> EvalResult<Object> {
    args.expect(func, 2, 2)?;
    let predicate = args.positional[0].clone();
    let items = interp.iterate(&args.positional[1])?;
    let mut split = items.len();
    for (i, item) in items.iter().enumerate() {
        if !interp.call_with(&predicate, vec![item.clone()])?.truthy() {
            split = i;
            break;
        }
    }
    let kind = if keep_prefix { "itertools.takewhile" } else { "itertools.dropwhile" };
    let picked = if keep_prefix {
        items[..split].to_vec()
    } else {
        items[split..].to_vec()
    };
    Ok(make_iter(kind, picked))
}

fn itertools_compress(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("compress", 2, 2)?;
    let data = interp.iterate(&args.positional[0])?;
    let selectors = interp.iterate(&args.positional[1])?;
    let out = data
        .into_iter()
        .zip(selectors)
        .filter(|(_, s)| s.truthy())
        .map(|(d, _)| d)
        .collect();
    Ok(make_iter("itertools.compress", out))
}

fn itertools_pairwise(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("pairwise", 1, 1)?;
    let items = interp.iterate(args.first())?;
    let out = items
        .windows(2)
        .map(|pair| Object::tuple(pair.to_vec()))
        .collect();
    Ok(make_iter("itertools.pairwise", out))
}

static ITERTOOLS: NativeModule = NativeModule {
    name: "itertools",
    functions: &[
        BuiltinFn { name: "accumulate", func: itertools_accumulate },
        BuiltinFn { name: "chain", func: itertools_chain },
        BuiltinFn { name: "combinations", func: itertools_combinations },
        BuiltinFn {
            name: "combinations_with_replacement",
            func: itertools_combinations_with_replacement,
        },
        BuiltinFn { name: "compress", func: itertools_compress },
        BuiltinFn { name: "dropwhile", func: |i, a| while_predicate(i, &a, "dropwhile", false) },
        BuiltinFn { name: "groupby", func: itertools_groupby },
        BuiltinFn { name: "islice", func: itertools_islice },
        BuiltinFn { name: "pairwise", func: itertools_pairwise },
        BuiltinFn { name: "permutations", func: itertools_permutations },
        BuiltinFn { name: "product", func: itertools_product },
        BuiltinFn { name: "repeat", func: itertools_repeat },
        BuiltinFn { name: "starmap", func: itertools_starmap },
        BuiltinFn { name: "takewhile", func: |i, a| while_predicate(i, &a, "takewhile", true) },
        BuiltinFn { name: "zip_longest", func: itertools_zip_longest },
    ],
    constants: &[],
    constant: no_constants,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_modules_have_unique_names() {
        let mut names: Vec<&str> = NATIVE_MODULES.iter().map(|m| m.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), NATIVE_MODULES.len());
    }

    #[test]
    fn test_anchored_patterns() {
        let start = build_regex("a+", 0, Anchor::Start).unwrap();
        assert!(start.is_match("aab"));
        assert!(!start.is_match("baa"));

        let full = build_regex("a+", 0, Anchor::Full).unwrap();
        assert!(full.is_match("aaa"));
        assert!(!full.is_match("aab"));

        let verbose = build_regex("a+  # letters", FLAG_VERBOSE, Anchor::Full).unwrap();
        assert!(verbose.is_match("aa"));
    }

    #[test]
    fn test_expand_template_groups() {
        let re = Regex::new(r"(?P<word>\w+)-(\d+)").unwrap();
        let caps = re.captures("abc-42").unwrap();
        assert_eq!(expand_template(r"\2:\1", &caps).unwrap(), "42:abc");
        assert_eq!(expand_template(r"\g<word>!", &caps).unwrap(), "abc!");
        assert_eq!(expand_template(r"a\nb", &caps).unwrap(), "a\nb");
        assert!(expand_template(r"\9", &caps).is_err());
    }

    #[test]
    fn test_combination_indices() {
        let mut seen = Vec::new();
        combination_indices(4, 2, false, &mut |idx| {
            seen.push(idx.to_vec());
            Ok(())
        })
        .unwrap();
        assert_eq!(seen.len(), 6);
        assert_eq!(seen[0], vec![0, 1]);
        assert_eq!(seen[5], vec![2, 3]);

        let mut count = 0;
        combination_indices(3, 2, true, &mut |_| {
            count += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(count, 6);
    }

    #[test]
    fn test_json_string_escapes() {
        let mut out = String::new();
        json_string("a\"b\né", true, &mut out);
        assert_eq!(out, r#""a\"b\n\u00e9""#);

        let mut raw = String::new();
        json_string("é", false, &mut raw);
        assert_eq!(raw, "\"é\"");
    }
}
