//! Indexing and slicing: `x[i]`, `x[a:b:c]`, and their assignment and
//! deletion forms.

use rustpython_parser::ast;

use super::fault::{exc, type_error, value_error, EvalResult, ExcKind};
use super::object::{DictFlavor, Object, RangeObj};
use super::Interpreter;
use crate::policy::NodeKind;

/// An evaluated subscript.
pub(crate) enum Index {
    Item(Object),
    Slice(SliceSpec),
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct SliceSpec {
    pub start: Option<i64>,
    pub stop: Option<i64>,
    pub step: Option<i64>,
}

impl SliceSpec {
    /// Concrete positions selected from a sequence of `len` items.
    pub fn indices(&self, len: usize) -> EvalResult<Vec<usize>> {
        let len = len as i64;
        let step = self.step.unwrap_or(1);
        if step == 0 {
            return Err(value_error("slice step cannot be zero"));
        }
        let (lower, upper) = if step < 0 { (-1, len - 1) } else { (0, len) };
        let clamp = |bound: Option<i64>, default: i64| match bound {
            None => default,
            Some(mut b) => {
                if b < 0 {
                    b += len;
                    b.max(lower)
                } else {
                    b.min(upper)
                }
            }
        };
        let start = clamp(self.start, if step < 0 { upper } else { lower });
        let stop = clamp(self.stop, if step < 0 { lower } else { upper });

        let mut out = Vec::new();
        let mut i = start;
        while (step > 0 && i < stop) || (step < 0 && i > stop) {
            out.push(i as usize);
            i += step;
        }
        Ok(out)
    }

    /// Contiguous `start..end` bounds, for step-1 slices.
    fn bounds(&self, len: usize) -> EvalResult<(usize, usize)> {
        let indices = self.indices(len)?;
        Ok(match (indices.first(), indices.last()) {
            (Some(&first), Some(&last)) => (first, last + 1),
            _ => {
                let start = SliceSpec {
                    stop: None,
                    ..*self
                }
                .indices(len)?
                .first()
                .copied()
                .unwrap_or(len);
                (start, start)
            }
        })
    }
}

fn slice_bound(obj: &Object) -> EvalResult<Option<i64>> {
    match obj {
        Object::None => Ok(None),
        other => other.as_int().map(Some).ok_or_else(|| {
            type_error("slice indices must be integers or None or have an __index__ method")
        }),
    }
}

/// Normalise a possibly negative index against `len`.
fn position(index: &Object, len: usize, type_name: &str) -> EvalResult<usize> {
    let Some(i) = index.as_int() else {
        return Err(type_error(format!(
            "{type_name} indices must be integers or slices, not {}",
            index.type_name()
        )));
    };
    let len = len as i64;
    let i = if i < 0 { i + len } else { i };
    if i < 0 || i >= len {
        return Err(exc(
            ExcKind::IndexError,
            format!("{type_name} index out of range"),
        ));
    }
    Ok(i as usize)
}

impl Interpreter<'_> {
    pub(crate) fn eval_index(&mut self, slice: &ast::Expr) -> EvalResult<Index> {
        match slice {
            ast::Expr::Slice(ast::ExprSlice {
                lower, upper, step, ..
            }) => {
                self.enter_node(NodeKind::Slice)?;
                let mut bound = |expr: &Option<Box<ast::Expr>>| -> EvalResult<Option<i64>> {
                    match expr {
                        Some(expr) => slice_bound(&self.eval_expr(expr)?),
                        None => Ok(None),
                    }
                };
                let start = bound(lower)?;
                let stop = bound(upper)?;
                let step = bound(step)?;
                Ok(Index::Slice(SliceSpec { start, stop, step }))
            }
            other => Ok(Index::Item(self.eval_expr(other)?)),
        }
    }

    pub(crate) fn get_item(&mut self, container: &Object, index: &Index) -> EvalResult<Object> {
        match (container, index) {
            (Object::List(items), Index::Item(i)) => {
                let items = items.borrow();
                Ok(items[position(i, items.len(), "list")?].clone())
            }
            (Object::List(items), Index::Slice(spec)) => {
                let items = items.borrow();
                let picked = spec.indices(items.len())?;
                self.charge(picked.len())?;
                Ok(Object::list(picked.into_iter().map(|i| items[i].clone()).collect()))
            }
            (Object::Tuple(items), Index::Item(i)) => Ok(items[position(i, items.len(), "tuple")?].clone()),
            (Object::Tuple(items), Index::Slice(spec)) => {
                let picked = spec.indices(items.len())?;
                self.charge(picked.len())?;
                Ok(Object::tuple(picked.into_iter().map(|i| items[i].clone()).collect()))
            }
            (Object::Str(s), Index::Item(i)) => {
                let chars: Vec<char> = s.chars().collect();
                let at = position(i, chars.len(), "string")?;
                Ok(Object::str_from(chars[at].to_string()))
            }
            (Object::Str(s), Index::Slice(spec)) => {
                let chars: Vec<char> = s.chars().collect();
                let picked = spec.indices(chars.len())?;
                self.charge(picked.len())?;
                Ok(Object::str_from(picked.into_iter().map(|i| chars[i]).collect::<String>()))
            }
            (Object::Deque(items), Index::Item(i)) => {
                let items = items.borrow();
                Ok(items[position(i, items.len(), "deque")?].clone())
            }
            (Object::Range(r), Index::Item(i)) => Ok(Object::Int(r.get(position(i, r.len(), "range object")?))),
            (Object::Range(r), Index::Slice(spec)) => {
                let step = spec.step.unwrap_or(1);
                let picked = spec.indices(r.len())?;
                let start = picked.first().map_or(r.start, |&i| r.get(i));
                let stop = match picked.last() {
                    Some(&last) => r.get(last) + r.step * step,
                    None => start,
                };
                Ok(Object::Range(RangeObj {
                    start,
                    stop,
                    step: r.step * step,
                }))
            }
            (Object::Dict(d), Index::Item(key)) => {
                let hash = key.hash_key()?;
                let (found, flavor) = {
                    let d = d.borrow();
                    (d.get(&hash).cloned(), d.flavor.clone())
                };
                match (found, flavor) {
                    (Some(value), _) => Ok(value),
                    (None, DictFlavor::Counter) => Ok(Object::Int(0)),
                    (None, DictFlavor::Default(factory)) => {
                        let value = self.call_with(&factory, Vec::new())?;
                        d.borrow_mut().insert(hash, key.clone(), value.clone());
                        Ok(value)
                    }
                    (None, DictFlavor::Plain) => Err(exc(ExcKind::KeyError, key.repr())),
                }
            }
            (Object::Match(m), Index::Item(group)) => {
                let idx = match group {
                    Object::Str(name) => m.group_index(name),
                    other => other.as_int().and_then(|i| usize::try_from(i).ok()),
                };
                match idx {
                    Some(idx) if idx < m.spans.len() => Ok(m
                        .group_text(idx)
                        .map_or(Object::None, Object::str_from)),
                    _ => Err(exc(ExcKind::IndexError, "no such group")),
                }
            }
            (Object::Dict(_) | Object::Match(_), Index::Slice(_)) => {
                Err(type_error("unhashable type: 'slice'"))
            }
            (other, _) => Err(type_error(format!(
                "'{}' object is not subscriptable",
                other.type_name()
            ))),
        }
    }

    pub(crate) fn set_item(&mut self, container: &Object, index: Index, value: Object) -> EvalResult<()> {
        match (container, index) {
            (Object::List(items), Index::Item(i)) => {
                let mut items = items.borrow_mut();
                let at = position(&i, items.len(), "list assignment")?;
                items[at] = value;
                Ok(())
            }
            (Object::List(items), Index::Slice(spec)) => {
                let replacement = self.iterate(&value)?;
                let len = items.borrow().len();
                if spec.step.unwrap_or(1) == 1 {
                    let (start, end) = spec.bounds(len)?;
                    items.borrow_mut().splice(start..end.max(start), replacement);
                    return Ok(());
                }
                let picked = spec.indices(len)?;
                if picked.len() != replacement.len() {
                    return Err(value_error(format!(
                        "attempt to assign sequence of size {} to extended slice of size {}",
                        replacement.len(),
                        picked.len()
                    )));
                }
                let mut items = items.borrow_mut();
                for (i, item) in picked.into_iter().zip(replacement) {
                    items[i] = item;
                }
                Ok(())
            }
            (Object::Dict(d), Index::Item(key)) => {
                let hash = key.hash_key()?;
                d.borrow_mut().insert(hash, key, value);
                Ok(())
            }
            (Object::Deque(items), Index::Item(i)) => {
                let mut items = items.borrow_mut();
                let at = position(&i, items.len(), "deque")?;
                items[at] = value;
                Ok(())
            }
            (other, _) => Err(type_error(format!(
                "'{}' object does not support item assignment",
                other.type_name()
            ))),
        }
    }

    pub(crate) fn del_item(&mut self, container: &Object, index: Index) -> EvalResult<()> {
        match (container, index) {
            (Object::List(items), Index::Item(i)) => {
                let mut items = items.borrow_mut();
                let at = position(&i, items.len(), "list assignment")?;
                items.remove(at);
                Ok(())
            }
            (Object::List(items), Index::Slice(spec)) => {
                let mut items = items.borrow_mut();
                let mut picked = spec.indices(items.len())?;
                picked.sort_unstable();
                for i in picked.into_iter().rev() {
                    items.remove(i);
                }
                Ok(())
            }
            (Object::Dict(d), Index::Item(key)) => {
                let hash = key.hash_key()?;
                match d.borrow_mut().remove(&hash) {
                    Some(_) => Ok(()),
                    None => Err(exc(ExcKind::KeyError, key.repr())),
                }
            }
            (Object::Deque(items), Index::Item(i)) => {
                let mut items = items.borrow_mut();
                let at = position(&i, items.len(), "deque")?;
                items.remove(at);
                Ok(())
            }
            (other, _) => Err(type_error(format!(
                "'{}' object doesn't support item deletion",
                other.type_name()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(start: Option<i64>, stop: Option<i64>, step: Option<i64>) -> SliceSpec {
        SliceSpec { start, stop, step }
    }

    #[test]
    fn test_slice_indices_follow_python() {
        assert_eq!(spec(Some(1), Some(3), None).indices(5).unwrap(), vec![1, 2]);
        assert_eq!(spec(None, None, Some(-1)).indices(4).unwrap(), vec![3, 2, 1, 0]);
        assert_eq!(spec(Some(-2), None, None).indices(5).unwrap(), vec![3, 4]);
        assert_eq!(spec(None, None, Some(2)).indices(5).unwrap(), vec![0, 2, 4]);
        assert_eq!(spec(Some(10), Some(20), None).indices(5).unwrap(), Vec::<usize>::new());
        assert!(spec(None, None, Some(0)).indices(5).is_err());
    }

    #[test]
    fn test_empty_slice_bounds_for_insertion() {
        assert_eq!(spec(Some(2), Some(2), None).bounds(5).unwrap(), (2, 2));
        assert_eq!(spec(Some(9), None, None).bounds(3).unwrap(), (3, 3));
    }
}
