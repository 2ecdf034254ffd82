//! Expression evaluation.

use std::rc::Rc;

use rustpython_parser::ast::{self, Ranged};

use super::fault::{exc, policy, type_error, EvalResult, ExcKind};
use super::object::{Args, Dict, Function, FunctionBody, Object};
use super::{make_iter, ops, strings, Interpreter};
use crate::error::ErrorKind;
use crate::policy::NodeKind;

impl Interpreter<'_> {
    pub(crate) fn eval_expr(&mut self, expr: &ast::Expr) -> EvalResult<Object> {
        self.nested(|this| this.eval_expr_inner(expr))
            .map_err(|u| u.at(expr.range()))
    }

    fn eval_expr_inner(&mut self, expr: &ast::Expr) -> EvalResult<Object> {
        match expr {
            ast::Expr::Constant(ast::ExprConstant { value, .. }) => {
                self.enter_node(NodeKind::Constant)?;
                self.constant(value)
            }
            ast::Expr::Name(ast::ExprName { id, .. }) => {
                self.enter_node(NodeKind::Name)?;
                self.lookup(id.as_str())
            }
            ast::Expr::BinOp(ast::ExprBinOp {
                left, op, right, ..
            }) => {
                self.enter_node(NodeKind::BinOp)?;
                let left = self.eval_expr(left)?;
                let right = self.eval_expr(right)?;
                ops::binary(self, *op, &left, &right)
            }
            ast::Expr::UnaryOp(ast::ExprUnaryOp { op, operand, .. }) => {
                self.enter_node(NodeKind::UnaryOp)?;
                let operand = self.eval_expr(operand)?;
                ops::unary(*op, &operand)
            }
            ast::Expr::BoolOp(ast::ExprBoolOp { op, values, .. }) => {
                self.enter_node(NodeKind::BoolOp)?;
                let mut last = Object::None;
                for value in values {
                    last = self.eval_expr(value)?;
                    let stop = match op {
                        ast::BoolOp::And => !last.truthy(),
                        ast::BoolOp::Or => last.truthy(),
                    };
                    if stop {
                        break;
                    }
                }
                Ok(last)
            }
            ast::Expr::Compare(ast::ExprCompare {
                left,
                ops: operators,
                comparators,
                ..
            }) => {
                self.enter_node(NodeKind::Compare)?;
                let mut current = self.eval_expr(left)?;
                for (op, comparator) in operators.iter().zip(comparators) {
                    let next = self.eval_expr(comparator)?;
                    if !ops::compare(*op, &current, &next)? {
                        return Ok(Object::Bool(false));
                    }
                    current = next;
                }
                Ok(Object::Bool(true))
            }
            ast::Expr::IfExp(ast::ExprIfExp {
                test, body, orelse, ..
            }) => {
                self.enter_node(NodeKind::IfExp)?;
                if self.eval_expr(test)?.truthy() {
                    self.eval_expr(body)
                } else {
                    self.eval_expr(orelse)
                }
            }
            ast::Expr::Call(ast::ExprCall {
                func,
                args,
                keywords,
                ..
            }) => {
                self.enter_node(NodeKind::Call)?;
                let callee = self.eval_expr(func)?;
                let args = self.eval_arguments(args, keywords)?;
                self.call(&callee, args)
            }
            ast::Expr::Attribute(ast::ExprAttribute { value, attr, .. }) => {
                self.enter_node(NodeKind::Attribute)?;
                let object = self.eval_expr(value)?;
                self.get_attribute(&object, attr.as_str())
            }
            ast::Expr::Subscript(ast::ExprSubscript { value, slice, .. }) => {
                self.enter_node(NodeKind::Subscript)?;
                let container = self.eval_expr(value)?;
                let index = self.eval_index(slice)?;
                self.get_item(&container, &index)
            }
            ast::Expr::List(ast::ExprList { elts, .. }) => {
                self.enter_node(NodeKind::List)?;
                Ok(Object::list(self.eval_elements(elts)?))
            }
            ast::Expr::Tuple(ast::ExprTuple { elts, .. }) => {
                self.enter_node(NodeKind::Tuple)?;
                Ok(Object::tuple(self.eval_elements(elts)?))
            }
            ast::Expr::Set(ast::ExprSet { elts, .. }) => {
                self.enter_node(NodeKind::Set)?;
                let mut set = Dict::default();
                for item in self.eval_elements(elts)? {
                    set.insert(item.hash_key()?, item, Object::None);
                }
                Ok(Object::set(set))
            }
            ast::Expr::Dict(ast::ExprDict { keys, values, .. }) => {
                self.enter_node(NodeKind::Dict)?;
                self.eval_dict(keys, values)
            }
            ast::Expr::ListComp(ast::ExprListComp {
                elt, generators, ..
            }) => {
                self.enter_node(NodeKind::ListComp)?;
                Ok(Object::list(self.collect_comprehension(elt, generators)?))
            }
            ast::Expr::GeneratorExp(ast::ExprGeneratorExp {
                elt, generators, ..
            }) => {
                self.enter_node(NodeKind::GeneratorExp)?;
                let items = self.collect_comprehension(elt, generators)?;
                Ok(make_iter("generator", items))
            }
            ast::Expr::SetComp(ast::ExprSetComp {
                elt, generators, ..
            }) => {
                self.enter_node(NodeKind::SetComp)?;
                let mut set = Dict::default();
                for item in self.collect_comprehension(elt, generators)? {
                    set.insert(item.hash_key()?, item, Object::None);
                }
                Ok(Object::set(set))
            }
            ast::Expr::DictComp(ast::ExprDictComp {
                key,
                value,
                generators,
                ..
            }) => {
                self.enter_node(NodeKind::DictComp)?;
                let mut dict = Dict::default();
                let mut emit = |this: &mut Self| -> EvalResult<()> {
                    let k = this.eval_expr(key)?;
                    let v = this.eval_expr(value)?;
                    dict.insert(k.hash_key()?, k, v);
                    Ok(())
                };
                self.with_comprehension_scope(|this| this.run_generators(generators, &mut emit))?;
                Ok(Object::dict(dict))
            }
            ast::Expr::Lambda(ast::ExprLambda { args, body, .. }) => {
                self.enter_node(NodeKind::Lambda)?;
                let params = self.build_params(args)?;
                Ok(Object::Function(Rc::new(Function {
                    name: "<lambda>".to_string(),
                    params,
                    body: FunctionBody::Lambda(Rc::new((**body).clone())),
                    closure: self.frame.clone(),
                })))
            }
            ast::Expr::JoinedStr(ast::ExprJoinedStr { values, .. }) => {
                self.enter_node(NodeKind::JoinedStr)?;
                let mut out = String::new();
                for part in values {
                    match part {
                        ast::Expr::Constant(ast::ExprConstant {
                            value: ast::Constant::Str(text),
                            ..
                        }) => out.push_str(text),
                        other => out.push_str(&self.eval_expr(other)?.try_str()?),
                    }
                }
                self.charge(out.len() / 64)?;
                Ok(Object::str_from(out))
            }
            ast::Expr::FormattedValue(ast::ExprFormattedValue {
                value,
                conversion,
                format_spec,
                ..
            }) => {
                self.enter_node(NodeKind::FormattedValue)?;
                let value = self.eval_expr(value)?;
                let value = match conversion {
                    ast::ConversionFlag::Str => Object::str_from(value.try_str()?),
                    ast::ConversionFlag::Repr => Object::str_from(value.try_repr()?),
                    ast::ConversionFlag::Ascii => Object::str_from(strings::ascii(&value.try_repr()?)),
                    _ => value,
                };
                let spec = match format_spec {
                    Some(spec) => self.eval_expr(spec)?.str(),
                    None => String::new(),
                };
                Ok(Object::str_from(strings::format_value(&value, &spec)?))
            }
            ast::Expr::NamedExpr(ast::ExprNamedExpr { target, value, .. }) => {
                self.enter_node(NodeKind::NamedExpr)?;
                let value = self.eval_expr(value)?;
                match target.as_ref() {
                    ast::Expr::Name(ast::ExprName { id, .. }) => {
                        self.assign_walrus(id.as_str(), value.clone())?;
                        Ok(value)
                    }
                    _ => Err(policy(
                        ErrorKind::SyntaxInvalid,
                        "assignment expression target must be a name",
                    )),
                }
            }
            ast::Expr::Starred(_) => Err(policy(
                ErrorKind::SyntaxInvalid,
                "can't use starred expression here",
            )),
            ast::Expr::Slice(_) => Err(self.unsupported("Slices outside a subscript are")),
            ast::Expr::Await(_) => Err(self.unsupported("'await' is")),
            ast::Expr::Yield(_) | ast::Expr::YieldFrom(_) => Err(self.unsupported("'yield' is")),
        }
    }

    fn constant(&self, value: &ast::Constant) -> EvalResult<Object> {
        Ok(match value {
            ast::Constant::None => Object::None,
            ast::Constant::Bool(b) => Object::Bool(*b),
            ast::Constant::Str(s) => Object::str_from(s.as_str()),
            ast::Constant::Int(i) => match i.to_string().parse::<i64>() {
                Ok(i) => Object::Int(i),
                Err(_) => {
                    return Err(exc(
                        ExcKind::OverflowError,
                        "integer literal does not fit in 64 bits",
                    ))
                }
            },
            ast::Constant::Float(f) => Object::Float(*f),
            ast::Constant::Tuple(items) => Object::tuple(
                items
                    .iter()
                    .map(|item| self.constant(item))
                    .collect::<EvalResult<Vec<_>>>()?,
            ),
            ast::Constant::Ellipsis => Object::Opaque(Rc::from("Ellipsis")),
            ast::Constant::Bytes(_) => return Err(self.unsupported("Bytes literals are")),
            _ => return Err(self.unsupported("Complex literals are")),
        })
    }

    /// Evaluate list/tuple/set elements, expanding `*iterable`.
    fn eval_elements(&mut self, elts: &[ast::Expr]) -> EvalResult<Vec<Object>> {
        let mut out = Vec::with_capacity(elts.len());
        for elt in elts {
            match elt {
                ast::Expr::Starred(ast::ExprStarred { value, .. }) => {
                    self.enter_node(NodeKind::Starred)?;
                    let iterable = self.eval_expr(value)?;
                    out.extend(self.iterate(&iterable)?);
                }
                other => out.push(self.eval_expr(other)?),
            }
        }
        Ok(out)
    }

    fn eval_dict(&mut self, keys: &[Option<ast::Expr>], values: &[ast::Expr]) -> EvalResult<Object> {
        let mut dict = Dict::default();
        for (key, value) in keys.iter().zip(values) {
            match key {
                Some(key) => {
                    let k = self.eval_expr(key)?;
                    let v = self.eval_expr(value)?;
                    dict.insert(k.hash_key()?, k, v);
                }
                None => match &self.eval_expr(value)? {
                    Object::Dict(other) => {
                        for (k, v) in other.borrow().items() {
                            dict.insert(k.hash_key()?, k, v);
                        }
                    }
                    other => {
                        return Err(type_error(format!(
                            "'{}' object is not a mapping",
                            other.type_name()
                        )))
                    }
                },
            }
        }
        Ok(Object::dict(dict))
    }

    pub(crate) fn eval_arguments(&mut self, args: &[ast::Expr], keywords: &[ast::Keyword]) -> EvalResult<Args> {
        let mut out = Args::new(self.eval_elements(args)?);
        for keyword in keywords {
            let value = self.eval_expr(&keyword.value)?;
            match &keyword.arg {
                Some(name) => push_keyword(&mut out, name.as_str(), value)?,
                None => match &value {
                    Object::Dict(d) => {
                        for (k, v) in d.borrow().items() {
                            match k.as_str() {
                                Some(name) => push_keyword(&mut out, name, v)?,
                                None => return Err(type_error("keywords must be strings")),
                            }
                        }
                    }
                    other => {
                        return Err(type_error(format!(
                            "argument after ** must be a mapping, not {}",
                            other.type_name()
                        )))
                    }
                },
            }
        }
        Ok(out)
    }

    fn collect_comprehension(
        &mut self,
        elt: &ast::Expr,
        generators: &[ast::Comprehension],
    ) -> EvalResult<Vec<Object>> {
        let mut out = Vec::new();
        let mut emit = |this: &mut Self| -> EvalResult<()> {
            out.push(this.eval_expr(elt)?);
            Ok(())
        };
        self.with_comprehension_scope(|this| this.run_generators(generators, &mut emit))?;
        Ok(out)
    }

    fn run_generators(
        &mut self,
        generators: &[ast::Comprehension],
        emit: &mut dyn FnMut(&mut Self) -> EvalResult<()>,
    ) -> EvalResult<()> {
        let Some((first, rest)) = generators.split_first() else {
            return emit(self);
        };
        if first.is_async {
            return Err(self.unsupported("Async comprehensions are"));
        }
        let iterable = self.eval_expr(&first.iter)?;
        let mut cursor = self.cursor(&iterable)?;
        'items: while let Some(item) = self.advance(&mut cursor)? {
            self.assign_target(&first.target, item)?;
            for condition in &first.ifs {
                if !self.eval_expr(condition)?.truthy() {
                    continue 'items;
                }
            }
            self.run_generators(rest, emit)?;
        }
        Ok(())
    }
}

fn push_keyword(args: &mut Args, name: &str, value: Object) -> EvalResult<()> {
    if args.keywords.iter().any(|(k, _)| k == name) {
        return Err(type_error(format!(
            "got multiple values for keyword argument '{name}'"
        )));
    }
    args.keywords.push((name.to_string(), value));
    Ok(())
}
