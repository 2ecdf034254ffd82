//! Built-in functions and classes.
//!
//! Only names listed here can ever be reached as built-ins; the policy then
//! narrows that set per evaluation.

use std::cmp::Ordering;
use std::rc::Rc;

use rustpython_parser::ast::Operator;

use super::fault::{exc, type_error, value_error, EvalResult, ExcKind, Unwind};
use super::methods::{mapping_pairs, set_from};
use super::object::{Args, BuiltinFn, Dict, ExceptionObj, Object, TypeObj};
use super::ops::{binary, cmp_objects};
use super::{make_iter, make_range, strings, Interpreter};
use crate::pyfmt::round_half_even;

static FUNCTIONS: &[BuiltinFn] = &[
    BuiltinFn { name: "abs", func: builtin_abs },
    BuiltinFn { name: "all", func: builtin_all },
    BuiltinFn { name: "any", func: builtin_any },
    BuiltinFn { name: "bin", func: builtin_bin },
    BuiltinFn { name: "callable", func: builtin_callable },
    BuiltinFn { name: "chr", func: builtin_chr },
    BuiltinFn { name: "divmod", func: builtin_divmod },
    BuiltinFn { name: "enumerate", func: builtin_enumerate },
    BuiltinFn { name: "filter", func: builtin_filter },
    BuiltinFn { name: "format", func: builtin_format },
    BuiltinFn { name: "getattr", func: builtin_getattr },
    BuiltinFn { name: "hasattr", func: builtin_hasattr },
    BuiltinFn { name: "hex", func: builtin_hex },
    BuiltinFn { name: "isinstance", func: builtin_isinstance },
    BuiltinFn { name: "iter", func: builtin_iter },
    BuiltinFn { name: "len", func: builtin_len },
    BuiltinFn { name: "map", func: builtin_map },
    BuiltinFn { name: "max", func: builtin_max },
    BuiltinFn { name: "min", func: builtin_min },
    BuiltinFn { name: "next", func: builtin_next },
    BuiltinFn { name: "oct", func: builtin_oct },
    BuiltinFn { name: "ord", func: builtin_ord },
    BuiltinFn { name: "pow", func: builtin_pow },
    BuiltinFn { name: "print", func: builtin_print },
    BuiltinFn { name: "repr", func: builtin_repr },
    BuiltinFn { name: "reversed", func: builtin_reversed },
    BuiltinFn { name: "round", func: builtin_round },
    BuiltinFn { name: "sorted", func: builtin_sorted },
    BuiltinFn { name: "sum", func: builtin_sum },
    BuiltinFn { name: "type", func: builtin_type },
    BuiltinFn { name: "zip", func: builtin_zip },
];

/// The object a built-in name refers to.
pub(crate) fn lookup(name: &str) -> Option<Object> {
    let ty = match name {
        "bool" => TypeObj::Bool,
        "int" => TypeObj::Int,
        "float" => TypeObj::Float,
        "str" => TypeObj::Str,
        "list" => TypeObj::List,
        "tuple" => TypeObj::Tuple,
        "dict" => TypeObj::Dict,
        "set" => TypeObj::Set,
        "range" => TypeObj::Range,
        other => match ExcKind::from_name(other) {
            Some(kind) => TypeObj::Exception(kind),
            None => return FUNCTIONS.iter().find(|f| f.name == name).map(Object::Builtin),
        },
    };
    Some(Object::Type(ty))
}

/// Does this runtime provide built-in `name`?
pub(crate) fn is_implemented(name: &str) -> bool {
    lookup(name).is_some()
}

// ----------------------------------------------------------------------
// Sorting
// ----------------------------------------------------------------------

/// Stable merge sort with a comparator that may fail.
pub(crate) fn merge_sort_by<T>(
    mut items: Vec<T>,
    cmp: &mut dyn FnMut(&T, &T) -> EvalResult<Ordering>,
) -> EvalResult<Vec<T>> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let right = items.split_off(items.len() / 2);
    let left = merge_sort_by(items, cmp)?;
    let right = merge_sort_by(right, cmp)?;

    let mut out = Vec::with_capacity(left.len() + right.len());
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_right = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => cmp(r, l)? == Ordering::Less,
            (Some(_), None) => {
                out.extend(left);
                break;
            }
            (None, _) => {
                out.extend(right);
                break;
            }
        };
        let next = if take_right { right.next() } else { left.next() };
        out.extend(next);
    }
    Ok(out)
}

/// `sorted(items, key=key, reverse=reverse)`.
pub(crate) fn sort_objects(
    interp: &mut Interpreter<'_>,
    items: Vec<Object>,
    key: Option<&Object>,
    reverse: bool,
) -> EvalResult<Vec<Object>> {
    let n = items.len();
    interp.charge(n * (usize::BITS - n.leading_zeros()) as usize)?;
    let keys = match key {
        Some(key) if !matches!(key, Object::None) => items
            .iter()
            .map(|item| interp.call_with(key, vec![item.clone()]))
            .collect::<EvalResult<Vec<_>>>()?,
        _ => items.clone(),
    };
    let decorated: Vec<(Object, Object)> = keys.into_iter().zip(items).collect();
    let sorted = merge_sort_by(decorated, &mut |a, b| {
        let ordering = cmp_objects(&a.0, &b.0, "<")?;
        Ok(if reverse { ordering.reverse() } else { ordering })
    })?;
    Ok(sorted.into_iter().map(|(_, item)| item).collect())
}

// ----------------------------------------------------------------------
// Classes
// ----------------------------------------------------------------------

pub(crate) fn float_to_int(value: f64) -> EvalResult<i64> {
    if value.is_nan() {
        return Err(value_error("cannot convert float NaN to integer"));
    }
    if value.is_infinite() {
        return Err(exc(
            ExcKind::OverflowError,
            "cannot convert float infinity to integer",
        ));
    }
    let truncated = value.trunc();
    if truncated >= 9.223_372_036_854_775_807e18 || truncated < -9.223_372_036_854_775_808e18 {
        return Err(exc(
            ExcKind::OverflowError,
            "integer result does not fit in 64 bits",
        ));
    }
    Ok(truncated as i64)
}

fn parse_int(text: &str, base: u32) -> EvalResult<i64> {
    let invalid = || {
        value_error(format!(
            "invalid literal for int() with base {base}: {}",
            crate::pyfmt::str_repr(text)
        ))
    };
    let trimmed = text.trim();
    let (negative, unsigned) = match trimmed.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
    };
    let lower = unsigned.to_ascii_lowercase();
    let prefixed = |prefix: &str, radix: u32| {
        lower
            .strip_prefix(prefix)
            .map(|rest| (rest.to_string(), radix))
    };
    let (digits, radix) = match base {
        0 => prefixed("0x", 16)
            .or_else(|| prefixed("0o", 8))
            .or_else(|| prefixed("0b", 2))
            .unwrap_or((lower.clone(), 10)),
        16 => prefixed("0x", 16).unwrap_or((lower.clone(), 16)),
        8 => prefixed("0o", 8).unwrap_or((lower.clone(), 8)),
        2 => prefixed("0b", 2).unwrap_or((lower.clone(), 2)),
        other => (lower.clone(), other),
    };
    let digits = digits.strip_prefix('_').unwrap_or(&digits).to_string();
    if digits.is_empty()
        || digits.ends_with('_')
        || digits.contains("__")
        || !digits.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    {
        return Err(invalid());
    }
    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    let magnitude = i128::from_str_radix(&cleaned, radix).map_err(|_| invalid())?;
    let value = if negative { -magnitude } else { magnitude };
    i64::try_from(value).map_err(|_| {
        exc(
            ExcKind::OverflowError,
            "integer result does not fit in 64 bits",
        )
    })
}

fn parse_float(text: &str) -> EvalResult<f64> {
    let trimmed = text.trim();
    let lower = trimmed.to_ascii_lowercase();
    let (sign, body) = match lower.strip_prefix('-') {
        Some(rest) => (-1.0, rest),
        None => (1.0, lower.strip_prefix('+').unwrap_or(&lower)),
    };
    match body {
        "inf" | "infinity" => return Ok(sign * f64::INFINITY),
        "nan" => return Ok(f64::NAN),
        _ => {}
    }
    let valid_underscores = !body.starts_with('_') && !body.ends_with('_') && !body.contains("__");
    let cleaned: String = body.chars().filter(|c| *c != '_').collect();
    match cleaned.parse::<f64>() {
        Ok(value) if valid_underscores && !cleaned.is_empty() && cleaned.chars().any(|c| c.is_ascii_digit()) => {
            Ok(sign * value)
        }
        _ => Err(value_error(format!(
            "could not convert string to float: {}",
            crate::pyfmt::str_repr(text)
        ))),
    }
}

/// Call a built-in class.
pub(crate) fn construct(interp: &mut Interpreter<'_>, ty: TypeObj, mut args: Args) -> EvalResult<Object> {
    let name = ty.name();
    match ty {
        TypeObj::Bool => {
            args.expect(name, 0, 1)?;
            Ok(Object::Bool(args.first().truthy()))
        }
        TypeObj::Int => {
            args.keyword_to_positional("base", 1);
            args.expect(name, 0, 2)?;
            match (args.get(0), args.get(1)) {
                (None, _) => Ok(Object::Int(0)),
                (Some(Object::Str(s)), base) => {
                    let base = match base {
                        Some(b) => b.as_int().ok_or_else(|| type_error("int() base must be an integer"))?,
                        None => 10,
                    };
                    if base != 0 && !(2..=36).contains(&base) {
                        return Err(value_error("int() base must be >= 2 and <= 36, or 0"));
                    }
                    parse_int(s, base as u32).map(Object::Int)
                }
                (Some(_), Some(_)) => Err(type_error("int() can't convert non-string with explicit base")),
                (Some(Object::Float(f)), None) => float_to_int(*f).map(Object::Int),
                (Some(other), None) => other.as_int().map(Object::Int).ok_or_else(|| {
                    type_error(format!(
                        "int() argument must be a string or a real number, not '{}'",
                        other.type_name()
                    ))
                }),
            }
        }
        TypeObj::Float => {
            args.expect(name, 0, 1)?;
            match args.get(0) {
                None => Ok(Object::Float(0.0)),
                Some(Object::Str(s)) => parse_float(s).map(Object::Float),
                Some(other) => other.as_float().map(Object::Float).ok_or_else(|| {
                    type_error(format!(
                        "float() argument must be a string or a real number, not '{}'",
                        other.type_name()
                    ))
                }),
            }
        }
        TypeObj::Str => {
            args.expect(name, 0, 1)?;
            Ok(match args.get(0) {
                None => Object::str_from(""),
                Some(value) => Object::str_from(value.try_str()?),
            })
        }
        TypeObj::List => {
            args.expect(name, 0, 1)?;
            match args.get(0) {
                None => Ok(Object::list(Vec::new())),
                Some(source) => Ok(Object::list(interp.iterate(source)?)),
            }
        }
        TypeObj::Tuple => {
            args.expect(name, 0, 1)?;
            match args.get(0) {
                None => Ok(Object::tuple(Vec::new())),
                Some(source) => Ok(Object::tuple(interp.iterate(source)?)),
            }
        }
        TypeObj::Set => {
            args.expect(name, 0, 1)?;
            match args.get(0) {
                None => Ok(Object::set(Dict::default())),
                Some(source) => Ok(Object::set(set_from(interp, source)?)),
            }
        }
        TypeObj::Dict => {
            let keywords = std::mem::take(&mut args.keywords);
            args.expect(name, 0, 1)?;
            let mut dict = Dict::default();
            if let Some(source) = args.get(0) {
                for (k, v) in mapping_pairs(interp, source)? {
                    dict.insert(k.hash_key()?, k, v);
                }
            }
            for (k, v) in keywords {
                let key = Object::str_from(k.as_str());
                dict.insert(key.hash_key()?, key, v);
            }
            Ok(Object::dict(dict))
        }
        TypeObj::Range => {
            args.expect(name, 1, 3)?;
            let ints: Vec<i64> = (0..args.positional.len())
                .map(|i| args.int_at(i, name))
                .collect::<EvalResult<_>>()?;
            match ints.as_slice() {
                [stop] => make_range(0, *stop, 1),
                [start, stop] => make_range(*start, *stop, 1),
                [start, stop, step] => make_range(*start, *stop, *step),
                _ => Err(type_error("range expected at most 3 arguments")),
            }
        }
        TypeObj::Exception(kind) => {
            args.expect(name, 0, usize::MAX)?;
            Ok(Object::Exception(Rc::new(ExceptionObj {
                kind,
                args: args.positional,
            })))
        }
        TypeObj::NoneType | TypeObj::Other(_) => {
            Err(type_error(format!("cannot create '{name}' instances")))
        }
    }
}

// ----------------------------------------------------------------------
// Functions
// ----------------------------------------------------------------------

fn builtin_abs(_: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("abs", 1, 1)?;
    match args.first() {
        Object::Float(f) => Ok(Object::Float(f.abs())),
        other => match other.as_int() {
            Some(i) => i.checked_abs().map(Object::Int).ok_or_else(|| {
                exc(
                    ExcKind::OverflowError,
                    "integer result does not fit in 64 bits",
                )
            }),
            None => Err(type_error(format!(
                "bad operand type for abs(): '{}'",
                other.type_name()
            ))),
        },
    }
}

fn builtin_all(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("all", 1, 1)?;
    Ok(Object::Bool(interp.iterate(args.first())?.iter().all(Object::truthy)))
}

fn builtin_any(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("any", 1, 1)?;
    Ok(Object::Bool(interp.iterate(args.first())?.iter().any(Object::truthy)))
}

fn radix_string(args: &Args, func: &str) -> EvalResult<Object> {
    args.expect(func, 1, 1)?;
    let value = args.int_at(0, func)?;
    let magnitude = value.unsigned_abs();
    let digits = match func {
        "bin" => format!("0b{magnitude:b}"),
        "oct" => format!("0o{magnitude:o}"),
        _ => format!("0x{magnitude:x}"),
    };
    let sign = if value < 0 { "-" } else { "" };
    Ok(Object::str_from(format!("{sign}{digits}")))
}

fn builtin_bin(_: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    radix_string(&args, "bin")
}

fn builtin_oct(_: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    radix_string(&args, "oct")
}

fn builtin_hex(_: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    radix_string(&args, "hex")
}

fn builtin_callable(_: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("callable", 1, 1)?;
    Ok(Object::Bool(args.first().is_callable()))
}

fn builtin_chr(_: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("chr", 1, 1)?;
    let code = args.int_at(0, "chr")?;
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .map(|c| Object::str_from(c.to_string()))
        .ok_or_else(|| value_error("chr() arg not in range(0x110000)"))
}

fn builtin_ord(_: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("ord", 1, 1)?;
    let text = args.str_at(0, "ord")?;
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(Object::Int(i64::from(u32::from(c)))),
        _ => Err(type_error(format!(
            "ord() expected a character, but string of length {} found",
            text.chars().count()
        ))),
    }
}

fn builtin_divmod(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("divmod", 2, 2)?;
    let (a, b) = (&args.positional[0], &args.positional[1]);
    let quotient = binary(interp, Operator::FloorDiv, a, b)?;
    let remainder = binary(interp, Operator::Mod, a, b)?;
    Ok(Object::tuple(vec![quotient, remainder]))
}

fn builtin_enumerate(interp: &mut Interpreter<'_>, mut args: Args) -> EvalResult<Object> {
    args.keyword_to_positional("start", 1);
    args.expect("enumerate", 1, 2)?;
    let start = args.opt_int_at(1, "enumerate")?.unwrap_or(0);
    let items = interp.iterate(args.first())?;
    let pairs = items
        .into_iter()
        .enumerate()
        .map(|(i, item)| Object::tuple(vec![Object::Int(start + i as i64), item]))
        .collect();
    Ok(make_iter("enumerate", pairs))
}

fn builtin_filter(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("filter", 2, 2)?;
    let predicate = args.positional[0].clone();
    let mut out = Vec::new();
    for item in interp.iterate(&args.positional[1])? {
        let keep = match &predicate {
            Object::None => item.truthy(),
            func => interp.call_with(func, vec![item.clone()])?.truthy(),
        };
        if keep {
            out.push(item);
        }
    }
    Ok(make_iter("filter", out))
}

fn builtin_format(_: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("format", 1, 2)?;
    let spec = match args.get(1) {
        Some(_) => args.str_at(1, "format")?.to_string(),
        None => String::new(),
    };
    strings::format_value(args.first(), &spec).map(Object::str_from)
}

fn builtin_getattr(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("getattr", 2, 3)?;
    let name = args.str_at(1, "getattr")?;
    match interp.get_attribute(args.first(), &name) {
        Err(Unwind::Fault(fault)) if fault.is_catchable() => match args.get(2) {
            Some(default) => Ok(default.clone()),
            None => Err(Unwind::Fault(fault)),
        },
        other => other,
    }
}

fn builtin_hasattr(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("hasattr", 2, 2)?;
    let name = args.str_at(1, "hasattr")?;
    interp.has_attribute(args.first(), &name).map(Object::Bool)
}

fn builtin_isinstance(_: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("isinstance", 2, 2)?;
    fn check(obj: &Object, class: &Object) -> EvalResult<bool> {
        match class {
            Object::Type(ty) => Ok(obj.is_instance(*ty)),
            Object::Tuple(classes) => {
                for class in classes.iter() {
                    if check(obj, class)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            _ => Err(type_error(
                "isinstance() arg 2 must be a type, a tuple of types, or a union",
            )),
        }
    }
    check(args.first(), &args.positional[1]).map(Object::Bool)
}

fn builtin_iter(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("iter", 1, 1)?;
    match args.first() {
        it @ Object::Iter(_) => Ok(it.clone()),
        other => {
            let kind = match other {
                Object::List(_) => "list_iterator",
                Object::Tuple(_) => "tuple_iterator",
                Object::Str(_) => "str_ascii_iterator",
                Object::Dict(_) => "dict_keyiterator",
                Object::Set(_) => "set_iterator",
                Object::Range(_) => "range_iterator",
                _ => "iterator",
            };
            Ok(make_iter(kind, interp.iterate(other)?))
        }
    }
}

fn builtin_len(_: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("len", 1, 1)?;
    let len = match args.first() {
        Object::Str(s) => s.chars().count(),
        Object::List(items) => items.borrow().len(),
        Object::Tuple(items) => items.len(),
        Object::Dict(d) | Object::Set(d) => d.borrow().len(),
        Object::Deque(d) => d.borrow().len(),
        Object::Range(r) => r.len(),
        other => {
            return Err(type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            )))
        }
    };
    Ok(Object::Int(len as i64))
}

fn builtin_map(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("map", 2, usize::MAX)?;
    let func = args.positional[0].clone();
    let columns = args.positional[1..]
        .iter()
        .map(|source| interp.iterate(source))
        .collect::<EvalResult<Vec<_>>>()?;
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(rows);
    for row in 0..rows {
        let call_args = columns.iter().map(|column| column[row].clone()).collect();
        out.push(interp.call_with(&func, call_args)?);
    }
    Ok(make_iter("map", out))
}

fn extreme(interp: &mut Interpreter<'_>, mut args: Args, func: &str, want: Ordering) -> EvalResult<Object> {
    let key = args.take_kw("key").filter(|k| !matches!(k, Object::None));
    let default = args.take_kw("default");
    args.expect(func, 1, usize::MAX)?;
    let items = if args.positional.len() == 1 {
        interp.iterate(args.first())?
    } else {
        if default.is_some() {
            return Err(type_error(format!(
                "Cannot specify a default for {func}() with multiple positional arguments"
            )));
        }
        args.positional
    };
    let mut best: Option<(Object, Object)> = None;
    for item in items {
        let rank = match &key {
            Some(key) => interp.call_with(key, vec![item.clone()])?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_rank, _)) => cmp_objects(&rank, best_rank, if want == Ordering::Greater { ">" } else { "<" })? == want,
        };
        if replace {
            best = Some((rank, item));
        }
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => Err(value_error(format!("{func}() iterable argument is empty"))),
    }
}

fn builtin_max(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    extreme(interp, args, "max", Ordering::Greater)
}

fn builtin_min(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    extreme(interp, args, "min", Ordering::Less)
}

fn builtin_next(_: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("next", 1, 2)?;
    let Object::Iter(it) = args.first() else {
        return Err(type_error(format!(
            "'{}' object is not an iterator",
            args.first().type_name()
        )));
    };
    let next = it.borrow_mut().next_item();
    match (next, args.get(1)) {
        (Some(item), _) => Ok(item),
        (None, Some(default)) => Ok(default.clone()),
        (None, None) => Err(exc(ExcKind::StopIteration, "")),
    }
}

fn builtin_pow(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("pow", 2, 3)?;
    let (base, exponent) = (&args.positional[0], &args.positional[1]);
    let Some(modulus) = args.optional(2) else {
        return binary(interp, Operator::Pow, base, exponent);
    };
    let (Some(b), Some(e), Some(m)) = (base.as_int(), exponent.as_int(), modulus.as_int()) else {
        return Err(type_error(
            "pow() 3rd argument not allowed unless all arguments are integers",
        ));
    };
    if m == 0 {
        return Err(value_error("pow() 3rd argument cannot be 0"));
    }
    if e < 0 {
        return Err(value_error("pow() negative exponent with modulus is not supported"));
    }
    let m128 = i128::from(m);
    let mut result: i128 = 1;
    let mut base = i128::from(b).rem_euclid(m128);
    let mut e = e;
    while e > 0 {
        if e & 1 == 1 {
            result = (result * base).rem_euclid(m128);
        }
        base = (base * base).rem_euclid(m128);
        e >>= 1;
    }
    // Python's result takes the sign of the modulus.
    if m < 0 && result > 0 {
        result += m128;
    }
    Ok(Object::Int(result as i64))
}

fn builtin_print(interp: &mut Interpreter<'_>, mut args: Args) -> EvalResult<Object> {
    let text_kw = |value: Option<Object>, default: &str, name: &str| -> EvalResult<String> {
        match &value {
            None | Some(Object::None) => Ok(default.to_string()),
            Some(Object::Str(s)) => Ok(s.to_string()),
            Some(other) => Err(type_error(format!(
                "{name} must be None or a string, not {}",
                other.type_name()
            ))),
        }
    };
    let sep = text_kw(args.take_kw("sep"), " ", "sep")?;
    let end = text_kw(args.take_kw("end"), "\n", "end")?;
    args.take_kw("flush");
    if args.take_kw("file").is_some() {
        return Err(type_error("print() does not support the 'file' argument here"));
    }
    args.expect("print", 0, usize::MAX)?;
    let mut line = args
        .positional
        .iter()
        .map(Object::try_str)
        .collect::<EvalResult<Vec<_>>>()?
        .join(&sep);
    line.push_str(&end);
    interp.write_output(&line)?;
    Ok(Object::None)
}

fn builtin_repr(_: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("repr", 1, 1)?;
    Ok(Object::str_from(args.first().try_repr()?))
}

fn builtin_reversed(interp: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("reversed", 1, 1)?;
    let source = args.first();
    match source {
        Object::List(_)
        | Object::Tuple(_)
        | Object::Str(_)
        | Object::Range(_)
        | Object::Deque(_)
        | Object::Dict(_) => {
            let mut items = interp.iterate(source)?;
            items.reverse();
            Ok(make_iter("reversed", items))
        }
        other => Err(type_error(format!(
            "'{}' object is not reversible",
            other.type_name()
        ))),
    }
}

fn builtin_round(_: &mut Interpreter<'_>, mut args: Args) -> EvalResult<Object> {
    args.keyword_to_positional("ndigits", 1);
    args.expect("round", 1, 2)?;
    let ndigits = args.opt_int_at(1, "round")?;
    match (args.first(), ndigits) {
        (Object::Float(f), None) => float_to_int(round_half_even(*f)).map(Object::Int),
        (Object::Float(f), Some(n)) => Ok(Object::Float(round_float(*f, n))),
        (other, digits) => {
            let Some(i) = other.as_int() else {
                return Err(type_error(format!(
                    "type {} doesn't define __round__ method",
                    other.type_name()
                )));
            };
            match digits {
                Some(n) if n < 0 => {
                    let scale = 10i64.checked_pow(u32::try_from(-n).unwrap_or(u32::MAX));
                    Ok(Object::Int(match scale {
                        Some(scale) => {
                            let rounded = round_half_even(i as f64 / scale as f64);
                            (rounded as i64).saturating_mul(scale)
                        }
                        None => 0,
                    }))
                }
                _ => Ok(Object::Int(i)),
            }
        }
    }
}

fn round_float(value: f64, ndigits: i64) -> f64 {
    if !value.is_finite() {
        return value;
    }
    if ndigits >= 0 {
        let digits = usize::try_from(ndigits.min(300)).unwrap_or(300);
        format!("{value:.digits$}").parse().unwrap_or(value)
    } else {
        let scale = 10f64.powi(i32::try_from(-ndigits).unwrap_or(i32::MAX));
        round_half_even(value / scale) * scale
    }
}

fn builtin_sorted(interp: &mut Interpreter<'_>, mut args: Args) -> EvalResult<Object> {
    let key = args.take_kw("key");
    let reverse = args.take_kw("reverse").is_some_and(|r| r.truthy());
    args.expect("sorted", 1, 1)?;
    let items = interp.iterate(args.first())?;
    Ok(Object::list(sort_objects(interp, items, key.as_ref(), reverse)?))
}

fn builtin_sum(interp: &mut Interpreter<'_>, mut args: Args) -> EvalResult<Object> {
    args.keyword_to_positional("start", 1);
    args.expect("sum", 1, 2)?;
    let mut total = args.get(1).cloned().unwrap_or(Object::Int(0));
    if matches!(total, Object::Str(_)) {
        return Err(type_error(
            "sum() can't sum strings [use ''.join(seq) instead]",
        ));
    }
    for item in interp.iterate(args.first())? {
        total = binary(interp, Operator::Add, &total, &item)?;
    }
    Ok(total)
}

fn builtin_type(_: &mut Interpreter<'_>, args: Args) -> EvalResult<Object> {
    args.expect("type", 1, 1)?;
    Ok(Object::Type(args.first().type_obj()))
}

fn builtin_zip(interp: &mut Interpreter<'_>, mut args: Args) -> EvalResult<Object> {
    let strict = args.take_kw("strict").is_some_and(|s| s.truthy());
    args.expect("zip", 0, usize::MAX)?;
    let columns = args
        .positional
        .iter()
        .map(|source| interp.iterate(source))
        .collect::<EvalResult<Vec<_>>>()?;
    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    if strict && columns.iter().any(|c| c.len() != rows) {
        return Err(value_error("zip() arguments have different lengths"));
    }
    let out = (0..rows)
        .map(|row| Object::tuple(columns.iter().map(|c| c[row].clone()).collect()))
        .collect();
    Ok(make_iter("zip", out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_covers_policy_builtins() {
        for name in crate::policy::BASE_BUILTINS {
            assert!(is_implemented(name), "missing builtin {name}");
        }
        assert!(!is_implemented("open"));
        assert!(!is_implemented("eval"));
    }

    #[test]
    fn test_parse_int_forms() {
        assert_eq!(parse_int(" 42 ", 10).unwrap(), 42);
        assert_eq!(parse_int("-1_000", 10).unwrap(), -1000);
        assert_eq!(parse_int("0xff", 16).unwrap(), 255);
        assert_eq!(parse_int("0b101", 0).unwrap(), 5);
        assert_eq!(parse_int("z", 36).unwrap(), 35);
        assert!(parse_int("4.5", 10).is_err());
        assert!(parse_int("", 10).is_err());
        assert!(parse_int("1__0", 10).is_err());
        assert!(parse_int("99999999999999999999", 10).is_err());
    }

    #[test]
    fn test_parse_float_forms() {
        assert_eq!(parse_float("3.5").unwrap(), 3.5);
        assert_eq!(parse_float(" -1e3 ").unwrap(), -1000.0);
        assert!(parse_float("inf").unwrap().is_infinite());
        assert!(parse_float("nan").unwrap().is_nan());
        assert!(parse_float("abc").is_err());
        assert!(parse_float(".").is_err());
    }

    #[test]
    fn test_merge_sort_is_stable_and_fallible() {
        let items = vec![(1, 'a'), (0, 'b'), (1, 'c'), (0, 'd')];
        let sorted = merge_sort_by(items, &mut |a, b| Ok(a.0.cmp(&b.0))).unwrap();
        assert_eq!(sorted, vec![(0, 'b'), (0, 'd'), (1, 'a'), (1, 'c')]);

        let failing = merge_sort_by(vec![1, 2, 3], &mut |_, _| Err(type_error("nope")));
        assert!(failing.is_err());
    }

    #[test]
    fn test_round_float_digits() {
        assert_eq!(round_float(2.675, 2), 2.67);
        assert_eq!(round_float(1234.5, -2), 1200.0);
    }
}
