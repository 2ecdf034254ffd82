//! Methods on built-in containers, numbers and regex results.

use std::collections::VecDeque;
use std::rc::Rc;

use super::builtins::{merge_sort_by, sort_objects};
use super::fault::{exc, type_error, value_error, EvalResult, ExcKind};
use super::object::{Args, Dict, DictFlavor, MatchObj, Object};
use super::ops::{equals, set_difference, set_intersection, set_symmetric_difference, set_union, is_subset};
use super::{make_iter, modules, strings, Interpreter};

fn no_attribute(receiver: &Object, name: &str) -> super::fault::Unwind {
    exc(
        ExcKind::AttributeError,
        format!("'{}' object has no attribute '{name}'", receiver.type_name()),
    )
}

pub(crate) fn call_method(
    interp: &mut Interpreter<'_>,
    receiver: &Object,
    name: &str,
    args: Args,
) -> EvalResult<Object> {
    interp.charge(1)?;
    match receiver {
        Object::Str(s) => strings::call_str_method(interp, s, name, args),
        Object::List(_) => list_method(interp, receiver, name, args),
        Object::Tuple(items) => sequence_method(items, receiver, name, &args),
        Object::Dict(_) => dict_method(interp, receiver, name, args),
        Object::Set(_) => set_method(interp, receiver, name, args),
        Object::Deque(_) => deque_method(interp, receiver, name, args),
        Object::Int(_) | Object::Bool(_) if name == "bit_length" => {
            args.expect(name, 0, 0)?;
            let value = receiver.as_int().unwrap_or_default();
            Ok(Object::Int(i64::from(64 - value.unsigned_abs().leading_zeros())))
        }
        Object::Float(f) if name == "is_integer" => {
            args.expect(name, 0, 0)?;
            Ok(Object::Bool(f.is_finite() && f.fract() == 0.0))
        }
        Object::Range(r) => match name {
            "count" => {
                args.expect(name, 1, 1)?;
                let hit = args.first().as_int().is_some_and(|i| r.contains(i));
                Ok(Object::Int(i64::from(hit)))
            }
            "index" => {
                args.expect(name, 1, 1)?;
                match args.first().as_int() {
                    Some(i) if r.contains(i) => Ok(Object::Int((i - r.start) / r.step)),
                    _ => Err(value_error(format!("{} is not in range", args.first().repr()))),
                }
            }
            _ => Err(no_attribute(receiver, name)),
        },
        Object::Match(m) => match_method(m, name, args),
        Object::Pattern(p) => modules::pattern_method(interp, p, name, args),
        _ => Err(no_attribute(receiver, name)),
    }
}

fn sequence_method(items: &[Object], receiver: &Object, name: &str, args: &Args) -> EvalResult<Object> {
    match name {
        "count" => {
            args.expect(name, 1, 1)?;
            let mut count = 0;
            for x in items {
                if equals(x, args.first())? {
                    count += 1;
                }
            }
            Ok(Object::Int(count))
        }
        "index" => {
            args.expect(name, 1, 3)?;
            let len = items.len() as i64;
            let norm = |i: i64| (if i < 0 { (i + len).max(0) } else { i.min(len) }) as usize;
            let start = args.opt_int_at(1, name)?.map_or(0, norm);
            let end = args.opt_int_at(2, name)?.map_or(items.len(), norm);
            for (i, x) in items.iter().enumerate().take(end).skip(start) {
                if equals(x, args.first())? {
                    return Ok(Object::Int(i as i64));
                }
            }
            Err(value_error(format!(
                "{}.index(x): x not in {}",
                receiver.type_name(),
                receiver.type_name()
            )))
        }
        _ => Err(no_attribute(receiver, name)),
    }
}

fn list_method(interp: &mut Interpreter<'_>, receiver: &Object, name: &str, mut args: Args) -> EvalResult<Object> {
    let Object::List(list) = receiver else {
        return Err(no_attribute(receiver, name));
    };
    match name {
        "append" => {
            args.expect(name, 1, 1)?;
            list.borrow_mut().push(args.first().clone());
            Ok(Object::None)
        }
        "extend" => {
            args.expect(name, 1, 1)?;
            let items = interp.iterate(args.first())?;
            list.borrow_mut().extend(items);
            Ok(Object::None)
        }
        "insert" => {
            args.expect(name, 2, 2)?;
            let mut items = list.borrow_mut();
            let len = items.len() as i64;
            let idx = args.int_at(0, name)?;
            let idx = (if idx < 0 { (idx + len).max(0) } else { idx.min(len) }) as usize;
            items.insert(idx, args.positional[1].clone());
            Ok(Object::None)
        }
        "pop" => {
            args.expect(name, 0, 1)?;
            let mut items = list.borrow_mut();
            if items.is_empty() {
                return Err(exc(ExcKind::IndexError, "pop from empty list"));
            }
            let len = items.len() as i64;
            let idx = args.opt_int_at(0, name)?.unwrap_or(-1);
            let idx = if idx < 0 { idx + len } else { idx };
            if idx < 0 || idx >= len {
                return Err(exc(ExcKind::IndexError, "pop index out of range"));
            }
            Ok(items.remove(idx as usize))
        }
        "remove" => {
            args.expect(name, 1, 1)?;
            let mut found = None;
            for (idx, x) in list.borrow().iter().enumerate() {
                if equals(x, args.first())? {
                    found = Some(idx);
                    break;
                }
            }
            match found {
                Some(idx) => {
                    list.borrow_mut().remove(idx);
                    Ok(Object::None)
                }
                None => Err(value_error("list.remove(x): x not in list")),
            }
        }
        "clear" => {
            args.expect(name, 0, 0)?;
            list.borrow_mut().clear();
            Ok(Object::None)
        }
        "copy" => {
            args.expect(name, 0, 0)?;
            Ok(Object::list(list.borrow().clone()))
        }
        "reverse" => {
            args.expect(name, 0, 0)?;
            list.borrow_mut().reverse();
            Ok(Object::None)
        }
        "sort" => {
            let key = args.take_kw("key");
            let reverse = args.take_kw("reverse").is_some_and(|r| r.truthy());
            args.expect(name, 0, 0)?;
            let items = list.borrow().clone();
            let sorted = sort_objects(interp, items, key.as_ref(), reverse)?;
            *list.borrow_mut() = sorted;
            Ok(Object::None)
        }
        "count" | "index" => {
            let items = list.borrow().clone();
            sequence_method(&items, receiver, name, &args)
        }
        _ => Err(no_attribute(receiver, name)),
    }
}

fn dict_method(interp: &mut Interpreter<'_>, receiver: &Object, name: &str, mut args: Args) -> EvalResult<Object> {
    let Object::Dict(dict) = receiver else {
        return Err(no_attribute(receiver, name));
    };
    let is_counter = matches!(dict.borrow().flavor, DictFlavor::Counter);
    match name {
        "get" => {
            args.expect(name, 1, 2)?;
            let hash = args.first().hash_key()?;
            let found = dict.borrow().get(&hash).cloned();
            Ok(found.unwrap_or_else(|| args.get(1).cloned().unwrap_or(Object::None)))
        }
        "keys" => {
            args.expect(name, 0, 0)?;
            Ok(Object::list(dict.borrow().keys()))
        }
        "values" => {
            args.expect(name, 0, 0)?;
            Ok(Object::list(dict.borrow().values()))
        }
        "items" => {
            args.expect(name, 0, 0)?;
            let items = dict
                .borrow()
                .items()
                .into_iter()
                .map(|(k, v)| Object::tuple(vec![k, v]))
                .collect();
            Ok(Object::list(items))
        }
        "pop" => {
            args.expect(name, 1, 2)?;
            let hash = args.first().hash_key()?;
            let removed = dict.borrow_mut().remove(&hash);
            match (removed, args.get(1)) {
                (Some((_, v)), _) => Ok(v),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(exc(ExcKind::KeyError, args.first().repr())),
            }
        }
        "popitem" => {
            args.expect(name, 0, 0)?;
            let popped = dict.borrow_mut().pop_last();
            match popped {
                Some((k, v)) => Ok(Object::tuple(vec![k, v])),
                None => Err(exc(ExcKind::KeyError, "'popitem(): dictionary is empty'")),
            }
        }
        "setdefault" => {
            args.expect(name, 1, 2)?;
            let key = args.first().clone();
            let hash = key.hash_key()?;
            let existing = dict.borrow().get(&hash).cloned();
            match existing {
                Some(v) => Ok(v),
                None => {
                    let default = args.get(1).cloned().unwrap_or(Object::None);
                    dict.borrow_mut().insert(hash, key, default.clone());
                    Ok(default)
                }
            }
        }
        "update" => {
            let keywords = std::mem::take(&mut args.keywords);
            args.expect(name, 0, 1)?;
            let mut pairs = match args.optional(0) {
                Some(source) if is_counter && !matches!(source, Object::Dict(_)) => interp
                    .iterate(source)?
                    .into_iter()
                    .map(|item| (item, Object::Int(1)))
                    .collect(),
                Some(source) => mapping_pairs(interp, source)?,
                None => Vec::new(),
            };
            pairs.extend(
                keywords
                    .into_iter()
                    .map(|(k, v)| (Object::str_from(k.as_str()), v)),
            );
            for (k, v) in pairs {
                let hash = k.hash_key()?;
                let value = if is_counter {
                    let current = dict.borrow().get(&hash).cloned().unwrap_or(Object::Int(0));
                    super::ops::binary(interp, rustpython_parser::ast::Operator::Add, &current, &v)?
                } else {
                    v
                };
                dict.borrow_mut().insert(hash, k, value);
            }
            Ok(Object::None)
        }
        "clear" => {
            args.expect(name, 0, 0)?;
            dict.borrow_mut().clear();
            Ok(Object::None)
        }
        "copy" => {
            args.expect(name, 0, 0)?;
            Ok(Object::dict(dict.borrow().copy()))
        }
        "most_common" if is_counter => {
            args.expect(name, 0, 1)?;
            let pairs = dict.borrow().items();
            let mut pairs = merge_sort_by(pairs, &mut |a, b| super::ops::cmp_objects(&b.1, &a.1, "<"))?;
            if let Some(n) = args.opt_int_at(0, name)? {
                pairs.truncate(usize::try_from(n).unwrap_or(0));
            }
            Ok(Object::list(
                pairs
                    .into_iter()
                    .map(|(k, v)| Object::tuple(vec![k, v]))
                    .collect(),
            ))
        }
        "elements" if is_counter => {
            args.expect(name, 0, 0)?;
            let mut out = Vec::new();
            for (k, v) in dict.borrow().items() {
                let count = v.as_int().unwrap_or(0).max(0) as usize;
                interp.charge(count)?;
                out.extend(std::iter::repeat(k).take(count));
            }
            Ok(make_iter("itertools.chain", out))
        }
        "total" if is_counter => {
            args.expect(name, 0, 0)?;
            let values = dict.borrow().values();
            let mut total = Object::Int(0);
            for v in values {
                total = super::ops::binary(interp, rustpython_parser::ast::Operator::Add, &total, &v)?;
            }
            Ok(total)
        }
        _ => Err(no_attribute(receiver, name)),
    }
}

/// Key/value pairs from a mapping or an iterable of pairs.
pub(crate) fn mapping_pairs(interp: &mut Interpreter<'_>, source: &Object) -> EvalResult<Vec<(Object, Object)>> {
    if let Object::Dict(d) = source {
        return Ok(d.borrow().items());
    }
    let mut pairs = Vec::new();
    for (i, item) in interp.iterate(source)?.into_iter().enumerate() {
        let parts = interp.iterate(&item).map_err(|_| {
            type_error(format!(
                "cannot convert dictionary update sequence element #{i} to a sequence"
            ))
        })?;
        match <[Object; 2]>::try_from(parts) {
            Ok([k, v]) => pairs.push((k, v)),
            Err(parts) => {
                return Err(value_error(format!(
                    "dictionary update sequence element #{i} has length {}; 2 is required",
                    parts.len()
                )))
            }
        }
    }
    Ok(pairs)
}

/// Build a set-backing table from any iterable.
pub(crate) fn set_from(interp: &mut Interpreter<'_>, source: &Object) -> EvalResult<Dict> {
    if let Object::Set(d) = source {
        return Ok(d.borrow().copy());
    }
    let mut out = Dict::default();
    for item in interp.iterate(source)? {
        out.insert(item.hash_key()?, item, Object::None);
    }
    Ok(out)
}

fn set_method(interp: &mut Interpreter<'_>, receiver: &Object, name: &str, args: Args) -> EvalResult<Object> {
    let Object::Set(set) = receiver else {
        return Err(no_attribute(receiver, name));
    };
    match name {
        "add" => {
            args.expect(name, 1, 1)?;
            let item = args.first().clone();
            set.borrow_mut().insert(item.hash_key()?, item, Object::None);
            Ok(Object::None)
        }
        "discard" | "remove" => {
            args.expect(name, 1, 1)?;
            let hash = args.first().hash_key()?;
            let removed = set.borrow_mut().remove(&hash);
            if removed.is_none() && name == "remove" {
                return Err(exc(ExcKind::KeyError, args.first().repr()));
            }
            Ok(Object::None)
        }
        "pop" => {
            args.expect(name, 0, 0)?;
            let popped = set.borrow_mut().pop_first();
            popped
                .map(|(k, _)| k)
                .ok_or_else(|| exc(ExcKind::KeyError, "'pop from an empty set'"))
        }
        "clear" => {
            args.expect(name, 0, 0)?;
            set.borrow_mut().clear();
            Ok(Object::None)
        }
        "copy" => {
            args.expect(name, 0, 0)?;
            Ok(Object::set(set.borrow().copy()))
        }
        "update" => {
            for other in &args.positional {
                let other = set_from(interp, other)?;
                let mut set = set.borrow_mut();
                for (k, _) in other.items() {
                    set.insert(k.hash_key()?, k, Object::None);
                }
            }
            Ok(Object::None)
        }
        "union" | "intersection" | "difference" | "symmetric_difference" => {
            let mut acc = set.borrow().copy();
            for other in &args.positional {
                let other = set_from(interp, other)?;
                acc = match name {
                    "union" => set_union(&acc, &other),
                    "intersection" => set_intersection(&acc, &other),
                    "difference" => set_difference(&acc, &other),
                    _ => set_symmetric_difference(&acc, &other),
                };
            }
            Ok(Object::set(acc))
        }
        "issubset" | "issuperset" | "isdisjoint" => {
            args.expect(name, 1, 1)?;
            let other = set_from(interp, args.first())?;
            let mine = set.borrow();
            Ok(Object::Bool(match name {
                "issubset" => is_subset(&mine, &other),
                "issuperset" => is_subset(&other, &mine),
                _ => set_intersection(&mine, &other).is_empty(),
            }))
        }
        _ => Err(no_attribute(receiver, name)),
    }
}

fn deque_method(interp: &mut Interpreter<'_>, receiver: &Object, name: &str, args: Args) -> EvalResult<Object> {
    let Object::Deque(deque) = receiver else {
        return Err(no_attribute(receiver, name));
    };
    match name {
        "append" | "appendleft" => {
            args.expect(name, 1, 1)?;
            let item = args.first().clone();
            let mut deque = deque.borrow_mut();
            if name == "append" {
                deque.push_back(item);
            } else {
                deque.push_front(item);
            }
            Ok(Object::None)
        }
        "extend" | "extendleft" => {
            args.expect(name, 1, 1)?;
            let items = interp.iterate(args.first())?;
            let mut deque = deque.borrow_mut();
            for item in items {
                if name == "extend" {
                    deque.push_back(item);
                } else {
                    deque.push_front(item);
                }
            }
            Ok(Object::None)
        }
        "pop" | "popleft" => {
            args.expect(name, 0, 0)?;
            let mut deque = deque.borrow_mut();
            let item = if name == "pop" {
                deque.pop_back()
            } else {
                deque.pop_front()
            };
            item.ok_or_else(|| exc(ExcKind::IndexError, "pop from an empty deque"))
        }
        "rotate" => {
            args.expect(name, 0, 1)?;
            let n = args.opt_int_at(0, name)?.unwrap_or(1);
            let mut deque = deque.borrow_mut();
            let len = deque.len() as i64;
            if len > 0 {
                let steps = n.rem_euclid(len) as usize;
                deque.rotate_right(steps);
            }
            Ok(Object::None)
        }
        "reverse" => {
            args.expect(name, 0, 0)?;
            let mut deque = deque.borrow_mut();
            let reversed: VecDeque<Object> = deque.drain(..).rev().collect();
            *deque = reversed;
            Ok(Object::None)
        }
        "clear" => {
            args.expect(name, 0, 0)?;
            deque.borrow_mut().clear();
            Ok(Object::None)
        }
        "copy" => {
            args.expect(name, 0, 0)?;
            Ok(Object::Deque(Rc::new(std::cell::RefCell::new(deque.borrow().clone()))))
        }
        "count" | "index" => {
            let items: Vec<Object> = deque.borrow().iter().cloned().collect();
            sequence_method(&items, receiver, name, &args)
        }
        _ => Err(no_attribute(receiver, name)),
    }
}

fn group_number(m: &MatchObj, group: &Object) -> EvalResult<usize> {
    let idx = match group {
        Object::Str(name) => m.group_index(name),
        other => other.as_int().and_then(|i| usize::try_from(i).ok()),
    };
    match idx {
        Some(idx) if idx < m.spans.len() => Ok(idx),
        _ => Err(exc(ExcKind::IndexError, "no such group")),
    }
}

fn group_value(m: &MatchObj, idx: usize, default: &Object) -> Object {
    m.group_text(idx)
        .map_or_else(|| default.clone(), Object::str_from)
}

fn match_method(m: &Rc<MatchObj>, name: &str, mut args: Args) -> EvalResult<Object> {
    match name {
        "group" => {
            if args.positional.is_empty() {
                return Ok(group_value(m, 0, &Object::None));
            }
            let mut groups = Vec::with_capacity(args.positional.len());
            for group in &args.positional {
                groups.push(group_value(m, group_number(m, group)?, &Object::None));
            }
            Ok(if groups.len() == 1 {
                groups.remove(0)
            } else {
                Object::tuple(groups)
            })
        }
        "groups" | "groupdict" => {
            args.keyword_to_positional("default", 0);
            args.expect(name, 0, 1)?;
            let default = args.first().clone();
            if name == "groups" {
                return Ok(Object::tuple(
                    (1..m.spans.len())
                        .map(|i| group_value(m, i, &default))
                        .collect(),
                ));
            }
            let mut out = Dict::default();
            for (i, group_name) in m.names.iter().enumerate() {
                if let Some(group_name) = group_name {
                    let key = Object::str_from(group_name.as_str());
                    out.insert(key.hash_key()?, key, group_value(m, i, &default));
                }
            }
            Ok(Object::dict(out))
        }
        "span" | "start" | "end" => {
            args.expect(name, 0, 1)?;
            let idx = match args.get(0) {
                Some(group) => group_number(m, group)?,
                None => 0,
            };
            let (start, end) = m.char_span(idx);
            Ok(match name {
                "span" => Object::tuple(vec![Object::Int(start), Object::Int(end)]),
                "start" => Object::Int(start),
                _ => Object::Int(end),
            })
        }
        _ => Err(exc(
            ExcKind::AttributeError,
            format!("'re.Match' object has no attribute '{name}'"),
        )),
    }
}
