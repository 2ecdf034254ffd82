//! Statement execution.

use std::rc::Rc;

use rustpython_parser::ast::{self, Ranged};

use super::fault::{exc, policy, type_error, value_error, EvalResult, ExcKind, Fault, Flow, Unwind};
use super::object::{ExceptionObj, Function, FunctionBody, Object, Param, Params, TypeObj};
use super::{modules, ops, Interpreter};
use crate::error::ErrorKind;
use crate::policy::{is_reflective_name, NodeKind};

impl Interpreter<'_> {
    pub(crate) fn exec_block(&mut self, body: &[ast::Stmt]) -> EvalResult<Flow> {
        for stmt in body {
            match self.exec_stmt(stmt)? {
                Flow::Next => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Next)
    }

    pub(crate) fn exec_stmt(&mut self, stmt: &ast::Stmt) -> EvalResult<Flow> {
        let range = stmt.range();
        self.nested(|this| this.exec_stmt_inner(stmt))
            .map_err(|u| u.at(range))
    }

    fn exec_stmt_inner(&mut self, stmt: &ast::Stmt) -> EvalResult<Flow> {
        match stmt {
            ast::Stmt::Expr(ast::StmtExpr { value, .. }) => {
                self.enter_node(NodeKind::Expr)?;
                self.eval_expr(value)?;
            }
            ast::Stmt::Assign(ast::StmtAssign { targets, value, .. }) => {
                self.enter_node(NodeKind::Assign)?;
                let value = self.eval_expr(value)?;
                for target in targets {
                    self.assign_target(target, value.clone())?;
                }
            }
            ast::Stmt::AugAssign(ast::StmtAugAssign {
                target, op, value, ..
            }) => {
                self.enter_node(NodeKind::AugAssign)?;
                self.exec_aug_assign(target, *op, value)?;
            }
            ast::Stmt::AnnAssign(ast::StmtAnnAssign { target, value, .. }) => {
                self.enter_node(NodeKind::AnnAssign)?;
                if let Some(value) = value {
                    let value = self.eval_expr(value)?;
                    self.assign_target(target, value)?;
                }
            }
            ast::Stmt::Delete(ast::StmtDelete { targets, .. }) => {
                self.enter_node(NodeKind::Delete)?;
                for target in targets {
                    self.delete_target(target)?;
                }
            }
            ast::Stmt::If(ast::StmtIf {
                test, body, orelse, ..
            }) => {
                self.enter_node(NodeKind::If)?;
                let branch = if self.eval_expr(test)?.truthy() {
                    body
                } else {
                    orelse
                };
                return self.exec_block(branch);
            }
            ast::Stmt::For(ast::StmtFor {
                target,
                iter,
                body,
                orelse,
                ..
            }) => {
                self.enter_node(NodeKind::For)?;
                return self.exec_for(target, iter, body, orelse);
            }
            ast::Stmt::While(ast::StmtWhile {
                test, body, orelse, ..
            }) => {
                self.enter_node(NodeKind::While)?;
                return self.exec_while(test, body, orelse);
            }
            ast::Stmt::Break(_) => {
                self.enter_node(NodeKind::Break)?;
                return Ok(Flow::Break);
            }
            ast::Stmt::Continue(_) => {
                self.enter_node(NodeKind::Continue)?;
                return Ok(Flow::Continue);
            }
            ast::Stmt::Pass(_) => self.enter_node(NodeKind::Pass)?,
            ast::Stmt::FunctionDef(def) => {
                self.enter_node(NodeKind::FunctionDef)?;
                self.exec_function_def(def)?;
            }
            ast::Stmt::Return(ast::StmtReturn { value, .. }) => {
                self.enter_node(NodeKind::Return)?;
                let value = match value {
                    Some(value) => self.eval_expr(value)?,
                    None => Object::None,
                };
                return Ok(Flow::Return(value));
            }
            ast::Stmt::Import(ast::StmtImport { names, .. }) => {
                self.enter_node(NodeKind::Import)?;
                for alias in names {
                    self.exec_import(alias)?;
                }
            }
            ast::Stmt::ImportFrom(ast::StmtImportFrom {
                module,
                names,
                level,
                ..
            }) => {
                self.enter_node(NodeKind::ImportFrom)?;
                let level = level.as_ref().map_or(0, |l| l.to_u32());
                let module = module.as_ref().map(|m| m.as_str()).unwrap_or_default();
                if level > 0 {
                    return Err(policy(
                        ErrorKind::ImportBlocked,
                        format!("Relative import of '{}{module}' is not allowed.", ".".repeat(level as usize)),
                    ));
                }
                self.exec_import_from(module, names)?;
            }
            ast::Stmt::Assert(ast::StmtAssert { test, msg, .. }) => {
                self.enter_node(NodeKind::Assert)?;
                if !self.eval_expr(test)?.truthy() {
                    let args = match msg {
                        Some(msg) => vec![self.eval_expr(msg)?],
                        None => Vec::new(),
                    };
                    return Err(raise_object(Object::Exception(Rc::new(ExceptionObj {
                        kind: ExcKind::AssertionError,
                        args,
                    }))));
                }
            }
            ast::Stmt::Raise(ast::StmtRaise { exc, cause, .. }) => {
                self.enter_node(NodeKind::Raise)?;
                return Err(self.exec_raise(exc.as_deref(), cause.as_deref())?);
            }
            ast::Stmt::Try(ast::StmtTry {
                body,
                handlers,
                orelse,
                finalbody,
                ..
            }) => {
                self.enter_node(NodeKind::Try)?;
                return self.exec_try(body, handlers, orelse, finalbody);
            }
            ast::Stmt::ClassDef(_) => return Err(self.unsupported("Class definitions are")),
            ast::Stmt::With(_) | ast::Stmt::AsyncWith(_) => {
                return Err(self.unsupported("The 'with' statement is"))
            }
            ast::Stmt::Global(_) | ast::Stmt::Nonlocal(_) => {
                return Err(self.unsupported("'global' and 'nonlocal' declarations are"))
            }
            ast::Stmt::AsyncFunctionDef(_) | ast::Stmt::AsyncFor(_) => {
                return Err(self.unsupported("Async code is"))
            }
            ast::Stmt::Match(_) => return Err(self.unsupported("The 'match' statement is")),
            _ => return Err(self.unsupported("This statement is")),
        }
        Ok(Flow::Next)
    }

    // ------------------------------------------------------------------
    // Assignment
    // ------------------------------------------------------------------

    pub(crate) fn assign_target(&mut self, target: &ast::Expr, value: Object) -> EvalResult<()> {
        match target {
            ast::Expr::Name(ast::ExprName { id, .. }) => {
                self.enter_node(NodeKind::Name)?;
                self.assign_name(id.as_str(), value)
            }
            ast::Expr::Tuple(ast::ExprTuple { elts, .. }) => {
                self.enter_node(NodeKind::Tuple)?;
                self.unpack(elts, value)
            }
            ast::Expr::List(ast::ExprList { elts, .. }) => {
                self.enter_node(NodeKind::List)?;
                self.unpack(elts, value)
            }
            ast::Expr::Subscript(ast::ExprSubscript {
                value: container,
                slice,
                ..
            }) => {
                self.enter_node(NodeKind::Subscript)?;
                let container = self.eval_expr(container)?;
                let index = self.eval_index(slice)?;
                self.set_item(&container, index, value)
            }
            ast::Expr::Attribute(ast::ExprAttribute { attr, .. }) => Err(policy(
                ErrorKind::AttributeBlocked,
                format!("Assignment to attribute '{attr}' is not allowed."),
            )),
            _ => Err(policy(
                ErrorKind::SyntaxInvalid,
                "cannot assign to expression",
            )),
        }
    }

    fn unpack(&mut self, targets: &[ast::Expr], value: Object) -> EvalResult<()> {
        let items = self.iterate(&value)?;
        let starred = targets
            .iter()
            .position(|t| matches!(t, ast::Expr::Starred(_)));
        match starred {
            None => {
                if items.len() != targets.len() {
                    return Err(value_error(if items.len() > targets.len() {
                        format!("too many values to unpack (expected {})", targets.len())
                    } else {
                        format!(
                            "not enough values to unpack (expected {}, got {})",
                            targets.len(),
                            items.len()
                        )
                    }));
                }
                for (target, item) in targets.iter().zip(items) {
                    self.assign_target(target, item)?;
                }
            }
            Some(star) => {
                let after = targets.len() - star - 1;
                if items.len() < targets.len() - 1 {
                    return Err(value_error(format!(
                        "not enough values to unpack (expected at least {}, got {})",
                        targets.len() - 1,
                        items.len()
                    )));
                }
                let mut items = items;
                let tail = items.split_off(items.len() - after);
                let middle = items.split_off(star);
                for (target, item) in targets[..star].iter().zip(items) {
                    self.assign_target(target, item)?;
                }
                if let ast::Expr::Starred(ast::ExprStarred { value: inner, .. }) = &targets[star] {
                    self.enter_node(NodeKind::Starred)?;
                    self.assign_target(inner, Object::list(middle))?;
                }
                for (target, item) in targets[star + 1..].iter().zip(tail) {
                    self.assign_target(target, item)?;
                }
            }
        }
        Ok(())
    }

    fn exec_aug_assign(&mut self, target: &ast::Expr, op: ast::Operator, value: &ast::Expr) -> EvalResult<()> {
        match target {
            ast::Expr::Name(ast::ExprName { id, .. }) => {
                self.enter_node(NodeKind::Name)?;
                let current = self.lookup(id.as_str())?;
                let rhs = self.eval_expr(value)?;
                let updated = self.inplace(op, &current, &rhs)?;
                self.assign_name(id.as_str(), updated)
            }
            ast::Expr::Subscript(ast::ExprSubscript {
                value: container,
                slice,
                ..
            }) => {
                self.enter_node(NodeKind::Subscript)?;
                let container = self.eval_expr(container)?;
                let index = self.eval_index(slice)?;
                let current = self.get_item(&container, &index)?;
                let rhs = self.eval_expr(value)?;
                let updated = self.inplace(op, &current, &rhs)?;
                self.set_item(&container, index, updated)
            }
            ast::Expr::Attribute(ast::ExprAttribute { attr, .. }) => Err(policy(
                ErrorKind::AttributeBlocked,
                format!("Assignment to attribute '{attr}' is not allowed."),
            )),
            _ => Err(policy(
                ErrorKind::SyntaxInvalid,
                "illegal expression for augmented assignment",
            )),
        }
    }

    /// `a op= b`: mutating containers update in place.
    fn inplace(&mut self, op: ast::Operator, current: &Object, rhs: &Object) -> EvalResult<Object> {
        match (op, current) {
            (ast::Operator::Add, Object::List(items)) => {
                let extra = self.iterate(rhs)?;
                items.borrow_mut().extend(extra);
                Ok(current.clone())
            }
            (ast::Operator::BitOr, Object::Set(set)) | (ast::Operator::BitOr, Object::Dict(set))
                if std::mem::discriminant(current) == std::mem::discriminant(rhs) =>
            {
                let merged = match rhs {
                    Object::Set(other) | Object::Dict(other) => other.borrow().items(),
                    _ => Vec::new(),
                };
                let mut set = set.borrow_mut();
                for (k, v) in merged {
                    set.insert(k.hash_key()?, k, v);
                }
                Ok(current.clone())
            }
            _ => ops::binary(self, op, current, rhs),
        }
    }

    fn delete_target(&mut self, target: &ast::Expr) -> EvalResult<()> {
        match target {
            ast::Expr::Name(ast::ExprName { id, .. }) => {
                self.enter_node(NodeKind::Name)?;
                self.delete_name(id.as_str())
            }
            ast::Expr::Subscript(ast::ExprSubscript { value, slice, .. }) => {
                self.enter_node(NodeKind::Subscript)?;
                let container = self.eval_expr(value)?;
                let index = self.eval_index(slice)?;
                self.del_item(&container, index)
            }
            ast::Expr::Tuple(ast::ExprTuple { elts, .. })
            | ast::Expr::List(ast::ExprList { elts, .. }) => {
                for elt in elts {
                    self.delete_target(elt)?;
                }
                Ok(())
            }
            ast::Expr::Attribute(ast::ExprAttribute { attr, .. }) => Err(policy(
                ErrorKind::AttributeBlocked,
                format!("Deleting attribute '{attr}' is not allowed."),
            )),
            _ => Err(policy(ErrorKind::SyntaxInvalid, "cannot delete expression")),
        }
    }

    // ------------------------------------------------------------------
    // Loops
    // ------------------------------------------------------------------

    fn exec_for(
        &mut self,
        target: &ast::Expr,
        iter: &ast::Expr,
        body: &[ast::Stmt],
        orelse: &[ast::Stmt],
    ) -> EvalResult<Flow> {
        let iterable = self.eval_expr(iter)?;
        let mut cursor = self.cursor(&iterable)?;
        while let Some(item) = self.advance(&mut cursor)? {
            self.assign_target(target, item)?;
            match self.exec_block(body)? {
                Flow::Break => return Ok(Flow::Next),
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Next | Flow::Continue => {}
            }
        }
        self.exec_block(orelse)
    }

    fn exec_while(&mut self, test: &ast::Expr, body: &[ast::Stmt], orelse: &[ast::Stmt]) -> EvalResult<Flow> {
        let mut iterations = 0u64;
        while self.eval_expr(test)?.truthy() {
            iterations += 1;
            if iterations > self.config.max_while_iterations {
                return Err(Fault::fatal(format!(
                    "Maximum number of {} iterations in While loop exceeded",
                    self.config.max_while_iterations
                ))
                .into());
            }
            match self.exec_block(body)? {
                Flow::Break => return Ok(Flow::Next),
                Flow::Return(value) => return Ok(Flow::Return(value)),
                Flow::Next | Flow::Continue => {}
            }
        }
        self.exec_block(orelse)
    }

    // ------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------

    fn exec_function_def(&mut self, def: &ast::StmtFunctionDef) -> EvalResult<()> {
        if !def.decorator_list.is_empty() {
            return Err(self.unsupported("Decorators are"));
        }
        let name = def.name.as_str();
        let params = self.build_params(&def.args)?;
        let function = Function {
            name: name.to_string(),
            params,
            body: FunctionBody::Block(Rc::new(def.body.clone())),
            closure: self.frame.clone(),
        };
        self.assign_name(name, Object::Function(Rc::new(function)))
    }

    pub(crate) fn build_params(&mut self, args: &ast::Arguments) -> EvalResult<Params> {
        let mut params = Params {
            posonly: args.posonlyargs.len(),
            ..Params::default()
        };
        for arg in args.posonlyargs.iter().chain(args.args.iter()) {
            let param = self.param(arg)?;
            params.positional.push(param);
        }
        for arg in &args.kwonlyargs {
            let param = self.param(arg)?;
            params.kwonly.push(param);
        }
        params.vararg = args
            .vararg
            .as_ref()
            .map(|a| param_name(a.arg.as_str()))
            .transpose()?;
        params.kwarg = args
            .kwarg
            .as_ref()
            .map(|a| param_name(a.arg.as_str()))
            .transpose()?;
        Ok(params)
    }

    fn param(&mut self, arg: &ast::ArgWithDefault) -> EvalResult<Param> {
        let name = param_name(arg.def.arg.as_str())?;
        let default = match &arg.default {
            Some(default) => Some(self.eval_expr(default)?),
            None => None,
        };
        Ok(Param { name, default })
    }

    // ------------------------------------------------------------------
    // Imports
    // ------------------------------------------------------------------

    fn exec_import(&mut self, alias: &ast::Alias) -> EvalResult<()> {
        let dotted = alias.name.as_str();
        let module = modules::import(self, dotted)?;
        match &alias.asname {
            Some(asname) => self.assign_name(asname.as_str(), module),
            None => {
                let top = dotted.split('.').next().unwrap_or(dotted);
                let top_module = if top == dotted {
                    module
                } else {
                    modules::top_level(self, top)?
                };
                self.assign_name(top, top_module)
            }
        }
    }

    fn exec_import_from(&mut self, dotted: &str, names: &[ast::Alias]) -> EvalResult<()> {
        let module = modules::import(self, dotted)?;
        for alias in names {
            let member = alias.name.as_str();
            if member == "*" {
                for (name, value) in modules::star_exports(self, &module)? {
                    self.assign_name(&name, value)?;
                }
                continue;
            }
            if is_reflective_name(member) {
                return Err(policy(
                    ErrorKind::NameBlocked,
                    format!("Import of '{member}' from '{dotted}' is not allowed."),
                ));
            }
            let value = modules::import_member(self, &module, dotted, member)?;
            let binding = alias.asname.as_ref().map_or(member, |a| a.as_str());
            self.assign_name(binding, value)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Exceptions
    // ------------------------------------------------------------------

    fn exec_raise(&mut self, exception: Option<&ast::Expr>, cause: Option<&ast::Expr>) -> EvalResult<Unwind> {
        let Some(exception) = exception else {
            return match self.handling.last() {
                Some(active) => Ok(raise_object(active.clone())),
                None => Err(exc(ExcKind::RuntimeError, "No active exception to reraise")),
            };
        };
        let raised = self.eval_expr(exception)?;
        if let Some(cause) = cause {
            self.eval_expr(cause)?;
        }
        let object = match raised {
            Object::Exception(_) => raised,
            Object::Type(TypeObj::Exception(kind)) => Object::Exception(Rc::new(ExceptionObj {
                kind,
                args: Vec::new(),
            })),
            _ => return Err(type_error("exceptions must derive from BaseException")),
        };
        Ok(raise_object(object))
    }

    fn exec_try(
        &mut self,
        body: &[ast::Stmt],
        handlers: &[ast::ExceptHandler],
        orelse: &[ast::Stmt],
        finalbody: &[ast::Stmt],
    ) -> EvalResult<Flow> {
        let outcome = match self.exec_block(body) {
            Ok(Flow::Next) => self.exec_block(orelse),
            Ok(flow) => Ok(flow),
            Err(Unwind::Fault(fault)) if fault.is_catchable() => self.handle(fault, handlers),
            Err(unwind) => Err(unwind),
        };

        // Policy violations, exhausted budgets and final answers skip
        // `finally` and unwind to the top.
        match &outcome {
            Err(Unwind::Fault(fault)) if !fault.is_catchable() => return outcome,
            Err(Unwind::FinalAnswer(_)) => return outcome,
            _ => {}
        }
        if !finalbody.is_empty() {
            match self.exec_block(finalbody)? {
                Flow::Next => {}
                flow => return Ok(flow),
            }
        }
        outcome
    }

    fn handle(&mut self, fault: Box<Fault>, handlers: &[ast::ExceptHandler]) -> EvalResult<Flow> {
        let Some(exception) = fault.exception.clone() else {
            return Err(Unwind::Fault(fault));
        };
        for handler in handlers {
            let ast::ExceptHandler::ExceptHandler(handler) = handler;
            let matched = match &handler.type_ {
                None => true,
                Some(class) => {
                    let class = self.eval_expr(class)?;
                    exception_matches(&exception, &class)?
                }
            };
            if !matched {
                continue;
            }
            if let Some(name) = &handler.name {
                self.assign_name(name.as_str(), exception.clone())?;
            }
            self.handling.push(exception);
            let result = self.exec_block(&handler.body);
            self.handling.pop();
            if let Some(name) = &handler.name {
                // The bound name does not outlive the handler.
                let _ = self.delete_name(name.as_str());
            }
            return result;
        }
        Err(Unwind::Fault(fault))
    }
}

fn raise_object(object: Object) -> Unwind {
    Fault::raised(object).into()
}

fn param_name(name: &str) -> EvalResult<String> {
    if is_reflective_name(name) {
        return Err(policy(
            ErrorKind::NameBlocked,
            format!("Parameter name '{name}' is not allowed."),
        ));
    }
    Ok(name.to_string())
}

fn exception_matches(exception: &Object, class: &Object) -> EvalResult<bool> {
    match class {
        Object::Type(TypeObj::Exception(kind)) => Ok(exception.is_instance(TypeObj::Exception(*kind))),
        Object::Tuple(classes) => {
            for class in classes.iter() {
                if exception_matches(exception, class)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        _ => Err(type_error(
            "catching classes that do not inherit from BaseException is not allowed",
        )),
    }
}
