//! Operators with Python's numeric and container semantics.

use std::cmp::Ordering;

use rustpython_parser::ast::{CmpOp, Operator, UnaryOp};

use super::fault::{exc, recursion_error, type_error, value_error, EvalResult, ExcKind, Unwind};
use super::object::{Dict, DictFlavor, Object, MAX_NESTING};
use super::Interpreter;
use crate::pyfmt::{format_float, format_int, format_str, FormatSpec};

#[derive(Clone, Copy)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn of(obj: &Object) -> Option<Num> {
        match obj {
            Object::Int(i) => Some(Num::Int(*i)),
            Object::Bool(b) => Some(Num::Int(i64::from(*b))),
            Object::Float(f) => Some(Num::Float(*f)),
            _ => None,
        }
    }

    fn float(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }
}

pub(crate) fn operator_symbol(op: Operator) -> &'static str {
    match op {
        Operator::Add => "+",
        Operator::Sub => "-",
        Operator::Mult => "*",
        Operator::MatMult => "@",
        Operator::Div => "/",
        Operator::Mod => "%",
        Operator::Pow => "**",
        Operator::LShift => "<<",
        Operator::RShift => ">>",
        Operator::BitOr => "|",
        Operator::BitXor => "^",
        Operator::BitAnd => "&",
        Operator::FloorDiv => "//",
    }
}

fn unsupported(op: Operator, a: &Object, b: &Object) -> Unwind {
    type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        operator_symbol(op),
        a.type_name(),
        b.type_name()
    ))
}

fn overflow() -> Unwind {
    exc(
        ExcKind::OverflowError,
        "integer result does not fit in 64 bits",
    )
}

fn zero_division(message: &str) -> Unwind {
    exc(ExcKind::ZeroDivisionError, message)
}

/// `a <op> b`.
pub(crate) fn binary(
    interp: &mut Interpreter<'_>,
    op: Operator,
    a: &Object,
    b: &Object,
) -> EvalResult<Object> {
    if let (Some(x), Some(y)) = (Num::of(a), Num::of(b)) {
        if let (Object::Bool(p), Object::Bool(q)) = (a, b) {
            match op {
                Operator::BitAnd => return Ok(Object::Bool(p & q)),
                Operator::BitOr => return Ok(Object::Bool(p | q)),
                Operator::BitXor => return Ok(Object::Bool(p ^ q)),
                _ => {}
            }
        }
        return match (x, y) {
            (Num::Int(x), Num::Int(y)) => int_arith(op, x, y),
            _ => float_arith(op, a, b, x.float(), y.float()),
        };
    }

    match (op, a, b) {
        (Operator::Add, _, _) => concat(interp, a, b),
        (Operator::Mult, _, _) => repeat(interp, a, b),
        (Operator::Mod, Object::Str(template), _) => {
            percent_format(template, b).map(Object::str_from)
        }
        (
            Operator::Sub | Operator::BitAnd | Operator::BitOr | Operator::BitXor,
            Object::Set(x),
            Object::Set(y),
        ) => {
            let (x, y) = (x.borrow(), y.borrow());
            let out = match op {
                Operator::Sub => set_difference(&x, &y),
                Operator::BitAnd => set_intersection(&x, &y),
                Operator::BitOr => set_union(&x, &y),
                _ => set_symmetric_difference(&x, &y),
            };
            Ok(Object::set(out))
        }
        (Operator::BitOr, Object::Dict(x), Object::Dict(y)) => {
            let mut out = x.borrow().copy();
            out.flavor = DictFlavor::Plain;
            for (k, v) in y.borrow().iter() {
                out.insert(k.hash_key()?, k.clone(), v.clone());
            }
            Ok(Object::dict(out))
        }
        _ => Err(unsupported(op, a, b)),
    }
}

fn int_arith(op: Operator, a: i64, b: i64) -> EvalResult<Object> {
    let value = match op {
        Operator::Add => a.checked_add(b).ok_or_else(overflow)?,
        Operator::Sub => a.checked_sub(b).ok_or_else(overflow)?,
        Operator::Mult => a.checked_mul(b).ok_or_else(overflow)?,
        Operator::Div => {
            if b == 0 {
                return Err(zero_division("division by zero"));
            }
            return Ok(Object::Float(a as f64 / b as f64));
        }
        Operator::FloorDiv => {
            if b == 0 {
                return Err(zero_division("integer division or modulo by zero"));
            }
            let q = a.checked_div(b).ok_or_else(overflow)?;
            if a % b != 0 && ((a < 0) != (b < 0)) {
                q - 1
            } else {
                q
            }
        }
        Operator::Mod => {
            if b == 0 {
                return Err(zero_division("integer modulo by zero"));
            }
            let r = a.wrapping_rem(b);
            if r != 0 && ((r < 0) != (b < 0)) {
                r + b
            } else {
                r
            }
        }
        Operator::Pow => return int_pow(a, b),
        Operator::LShift => {
            if b < 0 {
                return Err(value_error("negative shift count"));
            }
            if a == 0 {
                0
            } else if b >= 64 {
                return Err(overflow());
            } else {
                let wide = i128::from(a) << b;
                i64::try_from(wide).map_err(|_| overflow())?
            }
        }
        Operator::RShift => {
            if b < 0 {
                return Err(value_error("negative shift count"));
            }
            if b >= 64 {
                if a < 0 {
                    -1
                } else {
                    0
                }
            } else {
                a >> b
            }
        }
        Operator::BitAnd => a & b,
        Operator::BitOr => a | b,
        Operator::BitXor => a ^ b,
        Operator::MatMult => {
            return Err(unsupported(op, &Object::Int(a), &Object::Int(b)));
        }
    };
    Ok(Object::Int(value))
}

fn int_pow(base: i64, exp: i64) -> EvalResult<Object> {
    if exp < 0 {
        if base == 0 {
            return Err(zero_division("0.0 cannot be raised to a negative power"));
        }
        return Ok(Object::Float((base as f64).powf(exp as f64)));
    }
    match base {
        0 | 1 => return Ok(Object::Int(if exp == 0 { 1 } else { base })),
        -1 => return Ok(Object::Int(if exp % 2 == 0 { 1 } else { -1 })),
        _ => {}
    }
    let exp = u32::try_from(exp).map_err(|_| overflow())?;
    base.checked_pow(exp).map(Object::Int).ok_or_else(overflow)
}

/// Python's float `divmod`.
pub(crate) fn float_divmod(a: f64, b: f64) -> (f64, f64) {
    let mut rem = a % b;
    let mut div = (a - rem) / b;
    if rem != 0.0 {
        if (b < 0.0) != (rem < 0.0) {
            rem += b;
            div -= 1.0;
        }
    } else {
        rem = 0.0_f64.copysign(b);
    }
    let floordiv = if div != 0.0 {
        let mut f = div.floor();
        if div - f > 0.5 {
            f += 1.0;
        }
        f
    } else {
        0.0_f64.copysign(a / b)
    };
    (floordiv, rem)
}

fn float_arith(op: Operator, a_obj: &Object, b_obj: &Object, a: f64, b: f64) -> EvalResult<Object> {
    let value = match op {
        Operator::Add => a + b,
        Operator::Sub => a - b,
        Operator::Mult => a * b,
        Operator::Div => {
            if b == 0.0 {
                return Err(zero_division("float division by zero"));
            }
            a / b
        }
        Operator::FloorDiv => {
            if b == 0.0 {
                return Err(zero_division("float floor division by zero"));
            }
            float_divmod(a, b).0
        }
        Operator::Mod => {
            if b == 0.0 {
                return Err(zero_division("float modulo by zero"));
            }
            float_divmod(a, b).1
        }
        Operator::Pow => {
            if a == 0.0 && b < 0.0 {
                return Err(zero_division("0.0 cannot be raised to a negative power"));
            }
            if a < 0.0 && b.fract() != 0.0 && b.is_finite() {
                return Err(value_error(
                    "complex results are not supported: negative number raised to a fractional power",
                ));
            }
            let result = a.powf(b);
            if result.is_infinite() && a.is_finite() && b.is_finite() {
                return Err(exc(
                    ExcKind::OverflowError,
                    "(34, 'Numerical result out of range')",
                ));
            }
            result
        }
        _ => return Err(unsupported(op, a_obj, b_obj)),
    };
    Ok(Object::Float(value))
}

fn concat(interp: &mut Interpreter<'_>, a: &Object, b: &Object) -> EvalResult<Object> {
    match (a, b) {
        (Object::Str(x), Object::Str(y)) => {
            interp.charge(x.len() + y.len())?;
            Ok(Object::str_from(format!("{x}{y}")))
        }
        (Object::List(x), Object::List(y)) => {
            let mut out = x.borrow().clone();
            out.extend(y.borrow().iter().cloned());
            interp.charge(out.len())?;
            Ok(Object::list(out))
        }
        (Object::Tuple(x), Object::Tuple(y)) => {
            let mut out = x.to_vec();
            out.extend(y.iter().cloned());
            interp.charge(out.len())?;
            Ok(Object::tuple(out))
        }
        (Object::Str(_) | Object::List(_) | Object::Tuple(_), other) => Err(type_error(format!(
            "can only concatenate {} (not \"{}\") to {}",
            a.type_name(),
            other.type_name(),
            a.type_name()
        ))),
        _ => Err(unsupported(Operator::Add, a, b)),
    }
}

fn repeat(interp: &mut Interpreter<'_>, a: &Object, b: &Object) -> EvalResult<Object> {
    let (seq, count) = match (a, b) {
        (Object::Str(_) | Object::List(_) | Object::Tuple(_), n) => (a, n),
        (n, Object::Str(_) | Object::List(_) | Object::Tuple(_)) => (b, n),
        _ => return Err(unsupported(Operator::Mult, a, b)),
    };
    let Some(count) = count.as_int() else {
        return Err(type_error(format!(
            "can't multiply sequence by non-int of type '{}'",
            count.type_name()
        )));
    };
    let count = usize::try_from(count).unwrap_or(0);
    match seq {
        Object::Str(s) => {
            interp.charge(s.len().saturating_mul(count))?;
            Ok(Object::str_from(s.repeat(count)))
        }
        Object::List(items) => {
            let items = items.borrow().clone();
            interp.charge(items.len().saturating_mul(count))?;
            Ok(Object::list(repeat_items(&items, count)))
        }
        Object::Tuple(items) => {
            interp.charge(items.len().saturating_mul(count))?;
            Ok(Object::tuple(repeat_items(items, count)))
        }
        _ => Err(unsupported(Operator::Mult, a, b)),
    }
}

fn repeat_items(items: &[Object], count: usize) -> Vec<Object> {
    let mut out = Vec::with_capacity(items.len() * count);
    for _ in 0..count {
        out.extend(items.iter().cloned());
    }
    out
}

pub(crate) fn set_union(a: &Dict, b: &Dict) -> Dict {
    let mut out = a.copy();
    for (k, _) in b.iter() {
        if let Ok(hash) = k.hash_key() {
            out.insert(hash, k.clone(), Object::None);
        }
    }
    out
}

pub(crate) fn set_intersection(a: &Dict, b: &Dict) -> Dict {
    let mut out = Dict::default();
    for (k, _) in a.iter() {
        if let Ok(hash) = k.hash_key() {
            if b.contains(&hash) {
                out.insert(hash, k.clone(), Object::None);
            }
        }
    }
    out
}

pub(crate) fn set_difference(a: &Dict, b: &Dict) -> Dict {
    let mut out = Dict::default();
    for (k, _) in a.iter() {
        if let Ok(hash) = k.hash_key() {
            if !b.contains(&hash) {
                out.insert(hash, k.clone(), Object::None);
            }
        }
    }
    out
}

pub(crate) fn set_symmetric_difference(a: &Dict, b: &Dict) -> Dict {
    let mut out = set_difference(a, b);
    for (k, _) in b.iter() {
        if let Ok(hash) = k.hash_key() {
            if !a.contains(&hash) {
                out.insert(hash, k.clone(), Object::None);
            }
        }
    }
    out
}

pub(crate) fn is_subset(a: &Dict, b: &Dict) -> bool {
    a.iter()
        .all(|(k, _)| k.hash_key().map(|h| b.contains(&h)).unwrap_or(false))
}

/// `<op> operand` for `-`, `+` and `~`. `not` is handled by the caller.
pub(crate) fn unary(op: UnaryOp, operand: &Object) -> EvalResult<Object> {
    match (op, operand) {
        (UnaryOp::Not, v) => Ok(Object::Bool(!v.truthy())),
        (UnaryOp::USub, Object::Float(f)) => Ok(Object::Float(-f)),
        (UnaryOp::USub, v) if v.as_int().is_some() => v
            .as_int()
            .and_then(i64::checked_neg)
            .map(Object::Int)
            .ok_or_else(overflow),
        (UnaryOp::UAdd, Object::Float(f)) => Ok(Object::Float(*f)),
        (UnaryOp::UAdd, v) if v.as_int().is_some() => Ok(Object::Int(v.as_int().unwrap_or(0))),
        (UnaryOp::Invert, v) if v.as_int().is_some() => Ok(Object::Int(!v.as_int().unwrap_or(0))),
        (op, v) => {
            let symbol = match op {
                UnaryOp::USub => "-",
                UnaryOp::UAdd => "+",
                _ => "~",
            };
            Err(type_error(format!(
                "bad operand type for unary {symbol}: '{}'",
                v.type_name()
            )))
        }
    }
}

/// `a == b`. Nesting past [`MAX_NESTING`] raises `RecursionError`.
pub(crate) fn equals(a: &Object, b: &Object) -> EvalResult<bool> {
    equals_at(a, b, 0)
}

fn equals_at(a: &Object, b: &Object, depth: usize) -> EvalResult<bool> {
    if depth > MAX_NESTING {
        return Err(recursion_error(" in comparison"));
    }
    if let (Some(x), Some(y)) = (Num::of(a), Num::of(b)) {
        return Ok(match (x, y) {
            (Num::Int(x), Num::Int(y)) => x == y,
            _ => x.float() == y.float(),
        });
    }
    match (a, b) {
        (Object::None, Object::None) => Ok(true),
        (Object::Str(x), Object::Str(y)) => Ok(x == y),
        (Object::List(x), Object::List(y)) => {
            if a.is(b) {
                return Ok(true);
            }
            let (x, y) = (x.borrow(), y.borrow());
            Ok(x.len() == y.len() && all_equal(x.iter().zip(y.iter()), depth)?)
        }
        (Object::Tuple(x), Object::Tuple(y)) => {
            Ok(x.len() == y.len() && all_equal(x.iter().zip(y.iter()), depth)?)
        }
        (Object::Deque(x), Object::Deque(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            Ok(x.len() == y.len() && all_equal(x.iter().zip(y.iter()), depth)?)
        }
        (Object::Dict(x), Object::Dict(y)) => {
            if a.is(b) {
                return Ok(true);
            }
            let (x, y) = (x.borrow(), y.borrow());
            if x.len() != y.len() {
                return Ok(false);
            }
            for (k, v) in x.iter() {
                let Some(w) = k.hash_key().ok().and_then(|h| y.get(&h)) else {
                    return Ok(false);
                };
                if !equals_at(v, w, depth + 1)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Object::Set(x), Object::Set(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            Ok(x.len() == y.len() && is_subset(&x, &y))
        }
        (Object::Range(x), Object::Range(y)) => {
            let n = x.len();
            Ok(n == y.len() && (n == 0 || (x.start == y.start && (n == 1 || x.step == y.step))))
        }
        (Object::Image(x), Object::Image(y)) => Ok(x == y),
        _ => Ok(a.is(b)),
    }
}

fn all_equal<'o>(
    pairs: impl Iterator<Item = (&'o Object, &'o Object)>,
    depth: usize,
) -> EvalResult<bool> {
    for (p, q) in pairs {
        if !equals_at(p, q, depth + 1)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Whether any of `items` equals `item`.
pub(crate) fn any_equal<'o>(
    items: impl IntoIterator<Item = &'o Object>,
    item: &Object,
) -> EvalResult<bool> {
    for x in items {
        if equals(x, item)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn compare_symbol(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Lt => "<",
        CmpOp::LtE => "<=",
        CmpOp::Gt => ">",
        CmpOp::GtE => ">=",
        CmpOp::Eq => "==",
        CmpOp::NotEq => "!=",
        CmpOp::Is => "is",
        CmpOp::IsNot => "is not",
        CmpOp::In => "in",
        CmpOp::NotIn => "not in",
    }
}

/// One link of a (possibly chained) comparison.
pub(crate) fn compare(op: CmpOp, a: &Object, b: &Object) -> EvalResult<bool> {
    match op {
        CmpOp::Eq => equals(a, b),
        CmpOp::NotEq => equals(a, b).map(|eq| !eq),
        CmpOp::Is => Ok(a.is(b)),
        CmpOp::IsNot => Ok(!a.is(b)),
        CmpOp::In => contains(b, a),
        CmpOp::NotIn => contains(b, a).map(|found| !found),
        CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE => order(op, a, b),
    }
}

fn order(op: CmpOp, a: &Object, b: &Object) -> EvalResult<bool> {
    if let (Some(x), Some(y)) = (Num::of(a), Num::of(b)) {
        return Ok(match (x, y) {
            (Num::Int(x), Num::Int(y)) => match op {
                CmpOp::Lt => x < y,
                CmpOp::LtE => x <= y,
                CmpOp::Gt => x > y,
                _ => x >= y,
            },
            _ => {
                let (x, y) = (x.float(), y.float());
                match op {
                    CmpOp::Lt => x < y,
                    CmpOp::LtE => x <= y,
                    CmpOp::Gt => x > y,
                    _ => x >= y,
                }
            }
        });
    }
    if let (Object::Set(x), Object::Set(y)) = (a, b) {
        let (x, y) = (x.borrow(), y.borrow());
        return Ok(match op {
            CmpOp::Lt => x.len() < y.len() && is_subset(&x, &y),
            CmpOp::LtE => is_subset(&x, &y),
            CmpOp::Gt => y.len() < x.len() && is_subset(&y, &x),
            _ => is_subset(&y, &x),
        });
    }
    let ordering = cmp_objects(a, b, compare_symbol(op))?;
    Ok(match op {
        CmpOp::Lt => ordering == Ordering::Less,
        CmpOp::LtE => ordering != Ordering::Greater,
        CmpOp::Gt => ordering == Ordering::Greater,
        _ => ordering != Ordering::Less,
    })
}

/// Total order used by `sorted`, `min` and `max`.
pub(crate) fn cmp_objects(a: &Object, b: &Object, symbol: &str) -> EvalResult<Ordering> {
    cmp_at(a, b, symbol, 0)
}

fn cmp_at(a: &Object, b: &Object, symbol: &str, depth: usize) -> EvalResult<Ordering> {
    if depth > MAX_NESTING {
        return Err(recursion_error(" in comparison"));
    }
    if let (Some(x), Some(y)) = (Num::of(a), Num::of(b)) {
        return Ok(match (x, y) {
            (Num::Int(x), Num::Int(y)) => x.cmp(&y),
            _ => x.float().partial_cmp(&y.float()).unwrap_or(Ordering::Equal),
        });
    }
    match (a, b) {
        (Object::Str(x), Object::Str(y)) => Ok(x.cmp(y)),
        (Object::List(x), Object::List(y)) => {
            let (x, y) = (x.borrow().clone(), y.borrow().clone());
            cmp_seq(&x, &y, symbol, depth)
        }
        (Object::Tuple(x), Object::Tuple(y)) => cmp_seq(x, y, symbol, depth),
        _ => Err(type_error(format!(
            "'{symbol}' not supported between instances of '{}' and '{}'",
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn cmp_seq(x: &[Object], y: &[Object], symbol: &str, depth: usize) -> EvalResult<Ordering> {
    for (p, q) in x.iter().zip(y.iter()) {
        if !equals_at(p, q, depth + 1)? {
            return cmp_at(p, q, symbol, depth + 1);
        }
    }
    Ok(x.len().cmp(&y.len()))
}

/// `item in container`.
pub(crate) fn contains(container: &Object, item: &Object) -> EvalResult<bool> {
    match container {
        Object::Str(haystack) => match item {
            Object::Str(needle) => Ok(haystack.contains(&**needle)),
            other => Err(type_error(format!(
                "'in <string>' requires string as left operand, not {}",
                other.type_name()
            ))),
        },
        Object::List(items) => any_equal(items.borrow().iter(), item),
        Object::Tuple(items) => any_equal(items.iter(), item),
        Object::Deque(items) => any_equal(items.borrow().iter(), item),
        Object::Dict(d) | Object::Set(d) => {
            let hash = item.hash_key()?;
            Ok(d.borrow().contains(&hash))
        }
        Object::Range(r) => Ok(match item {
            Object::Float(f) if f.fract() == 0.0 => r.contains(*f as i64),
            other => other.as_int().is_some_and(|i| r.contains(i)),
        }),
        Object::Iter(it) => {
            let mut it = it.borrow_mut();
            while let Some(x) = it.next_item() {
                if equals(&x, item)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => Err(type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

/// printf-style `template % args`.
pub(crate) fn percent_format(template: &str, args: &Object) -> EvalResult<String> {
    let mut values: Vec<Object> = match args {
        Object::Tuple(items) => items.to_vec(),
        other => vec![other.clone()],
    };
    values.reverse();
    let mapping = match args {
        Object::Dict(_) => Some(args.clone()),
        _ => None,
    };
    let mut used_mapping = false;

    let chars: Vec<char> = template.chars().collect();
    let mut out = String::with_capacity(template.len());
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        i += 1;
        if c != '%' {
            out.push(c);
            continue;
        }

        let mut key: Option<String> = None;
        if chars.get(i) == Some(&'(') {
            let close = chars[i..]
                .iter()
                .position(|&ch| ch == ')')
                .ok_or_else(|| value_error("incomplete format key"))?;
            key = Some(chars[i + 1..i + close].iter().collect());
            i += close + 1;
        }

        let mut spec = FormatSpec::default();
        while let Some(&flag) = chars.get(i) {
            match flag {
                '-' => spec.align = Some('<'),
                '+' => spec.sign = '+',
                ' ' => {
                    if spec.sign != '+' {
                        spec.sign = ' ';
                    }
                }
                '#' => spec.alternate = true,
                '0' => {
                    if spec.align.is_none() {
                        spec.fill = '0';
                        spec.align = Some('=');
                    }
                }
                _ => break,
            }
            i += 1;
        }
        if spec.align == Some('<') {
            spec.fill = ' ';
        }

        let mut width = String::new();
        while let Some(d) = chars.get(i).filter(|c| c.is_ascii_digit()) {
            width.push(*d);
            i += 1;
        }
        spec.width = width.parse().unwrap_or(0);
        if chars.get(i) == Some(&'.') {
            i += 1;
            let mut precision = String::new();
            while let Some(d) = chars.get(i).filter(|c| c.is_ascii_digit()) {
                precision.push(*d);
                i += 1;
            }
            spec.precision = Some(precision.parse().unwrap_or(0));
        }
        while matches!(chars.get(i), Some('h' | 'l' | 'L')) {
            i += 1;
        }

        let Some(&conversion) = chars.get(i) else {
            return Err(value_error("incomplete format"));
        };
        i += 1;
        if conversion == '%' {
            out.push('%');
            continue;
        }

        let value = match (&key, &mapping) {
            (Some(k), Some(Object::Dict(d))) => {
                used_mapping = true;
                let hash = Object::str_from(k.as_str()).hash_key()?;
                d.borrow()
                    .get(&hash)
                    .cloned()
                    .ok_or_else(|| exc(ExcKind::KeyError, Object::str_from(k.as_str()).repr()))?
            }
            (Some(_), _) => return Err(type_error("format requires a mapping")),
            (None, _) => values
                .pop()
                .ok_or_else(|| type_error("not enough arguments for format string"))?,
        };
        out.push_str(&percent_one(conversion, &value, spec)?);
    }

    if !values.is_empty() && !used_mapping && mapping.is_none() {
        return Err(type_error(
            "not all arguments converted during string formatting",
        ));
    }
    Ok(out)
}

fn percent_one(conversion: char, value: &Object, mut spec: FormatSpec) -> EvalResult<String> {
    let fmt_err = |e: String| value_error(e);
    match conversion {
        's' | 'r' | 'a' => {
            let text = if conversion == 's' {
                value.try_str()?
            } else {
                value.try_repr()?
            };
            spec.sign = '-';
            if spec.align == Some('=') {
                spec.align = None;
                spec.fill = ' ';
            }
            format_str(&text, &spec).map_err(fmt_err)
        }
        'd' | 'i' | 'u' => {
            let n = match value {
                Object::Float(f) if f.is_finite() => f.trunc() as i64,
                other => other.as_int().ok_or_else(|| {
                    type_error(format!(
                        "%{conversion} format: a real number is required, not {}",
                        other.type_name()
                    ))
                })?,
            };
            spec.precision = None;
            spec.kind = Some('d');
            format_int(n, &spec).map_err(fmt_err)
        }
        'x' | 'X' | 'o' => {
            let n = value.as_int().ok_or_else(|| {
                type_error(format!(
                    "%{conversion} format: an integer is required, not {}",
                    value.type_name()
                ))
            })?;
            spec.precision = None;
            spec.kind = Some(conversion);
            format_int(n, &spec).map_err(fmt_err)
        }
        'e' | 'E' | 'f' | 'F' | 'g' | 'G' => {
            let f = value.as_float().ok_or_else(|| {
                type_error(format!("must be real number, not {}", value.type_name()))
            })?;
            spec.precision = Some(spec.precision.unwrap_or(6));
            spec.kind = Some(conversion);
            format_float(f, &spec).map_err(fmt_err)
        }
        'c' => {
            let text = match value {
                Object::Str(s) if s.chars().count() == 1 => s.to_string(),
                other => other
                    .as_int()
                    .and_then(|i| u32::try_from(i).ok())
                    .and_then(char::from_u32)
                    .map(String::from)
                    .ok_or_else(|| type_error("%c requires an int or a unicode character"))?,
            };
            spec.sign = '-';
            spec.align = spec.align.filter(|a| *a != '=');
            format_str(&text, &spec).map_err(fmt_err)
        }
        other => Err(value_error(format!(
            "unsupported format character '{other}'"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(text: &str) -> Object {
        Object::str_from(text)
    }

    #[test]
    fn test_int_floor_semantics() {
        assert!(matches!(int_arith(Operator::FloorDiv, -7, 2), Ok(Object::Int(-4))));
        assert!(matches!(int_arith(Operator::Mod, -7, 2), Ok(Object::Int(1))));
        assert!(matches!(int_arith(Operator::Mod, 7, -2), Ok(Object::Int(-1))));
        assert!(matches!(int_arith(Operator::Div, 7, 2), Ok(Object::Float(f)) if f == 3.5));
        assert!(matches!(int_arith(Operator::Pow, 2, -1), Ok(Object::Float(f)) if f == 0.5));
        assert!(int_arith(Operator::Pow, 10, 40).is_err());
        assert!(int_arith(Operator::Add, i64::MAX, 1).is_err());
    }

    #[test]
    fn test_float_divmod_matches_python() {
        assert_eq!(float_divmod(7.5, 2.0), (3.0, 1.5));
        assert_eq!(float_divmod(-7.5, 2.0), (-4.0, 0.5));
        assert_eq!(float_divmod(7.5, -2.0), (-4.0, -0.5));
    }

    #[test]
    fn test_equality_crosses_numeric_types() {
        assert!(equals(&Object::Int(1), &Object::Float(1.0)).unwrap());
        assert!(equals(&Object::Bool(true), &Object::Int(1)).unwrap());
        assert!(!equals(&Object::Int(1), &s("1")).unwrap());
        assert!(equals(
            &Object::list(vec![Object::Int(1), s("a")]),
            &Object::list(vec![Object::Float(1.0), s("a")])
        )
        .unwrap());
        assert!(!equals(
            &Object::list(vec![Object::Int(1)]),
            &Object::tuple(vec![Object::Int(1)])
        )
        .unwrap());
    }

    #[test]
    fn test_distinct_self_referential_lists_raise_on_equality() {
        let a = Object::list(vec![]);
        let b = Object::list(vec![]);
        for list in [&a, &b] {
            if let Object::List(items) = list {
                items.borrow_mut().push(list.clone());
            }
        }
        assert!(equals(&a, &a).unwrap());
        assert!(matches!(
            equals(&a, &b),
            Err(Unwind::Fault(fault)) if fault.message.starts_with("RecursionError")
        ));
        assert!(compare(CmpOp::NotEq, &a, &b).is_err());
    }

    #[test]
    fn test_heterogeneous_ordering_is_type_error() {
        assert!(compare(CmpOp::Lt, &Object::Int(1), &s("a")).is_err());
        assert!(compare(CmpOp::Lt, &Object::Int(1), &Object::Float(1.5)).unwrap());
        assert!(compare(CmpOp::Lt, &s("abc"), &s("abd")).unwrap());
        assert!(compare(
            CmpOp::Lt,
            &Object::tuple(vec![Object::Int(1), Object::Int(2)]),
            &Object::tuple(vec![Object::Int(1), Object::Int(3)])
        )
        .unwrap());
    }

    #[test]
    fn test_membership() {
        assert!(contains(&s("hello"), &s("ell")).unwrap());
        assert!(contains(&s("hello"), &Object::Int(1)).is_err());
        assert!(contains(&Object::list(vec![Object::Int(2)]), &Object::Float(2.0)).unwrap());
        assert!(contains(&Object::Int(3), &Object::Int(3)).is_err());
    }

    #[test]
    fn test_percent_format() {
        let args = Object::tuple(vec![s("x"), Object::Int(42), Object::Float(3.14159)]);
        assert_eq!(
            percent_format("%s=%05d (%.2f) 100%%", &args).unwrap(),
            "x=00042 (3.14) 100%"
        );
        assert_eq!(percent_format("%-4s|", &s("ab")).unwrap(), "ab  |");
        assert_eq!(percent_format("%r", &s("ab")).unwrap(), "'ab'");
        assert_eq!(percent_format("%x", &Object::Int(255)).unwrap(), "ff");
        assert!(percent_format("%s %s", &s("one")).is_err());
        assert!(percent_format("%s", &Object::tuple(vec![s("a"), s("b")])).is_err());
    }

    #[test]
    fn test_unary() {
        assert!(matches!(unary(UnaryOp::USub, &Object::Bool(true)), Ok(Object::Int(-1))));
        assert!(matches!(unary(UnaryOp::Invert, &Object::Int(5)), Ok(Object::Int(-6))));
        assert!(unary(UnaryOp::USub, &s("a")).is_err());
        assert!(unary(UnaryOp::USub, &Object::Int(i64::MIN)).is_err());
    }
}
