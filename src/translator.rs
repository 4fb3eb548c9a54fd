//! Translation from surface expressions to executable functions.
//!
//! The translator resolves names lexically, creates one function per
//! lambda (nested ones in encounter order, so the unit's member list is
//! topologically sorted with respect to nesting), builds the
//! evaluator-node bodies, and runs the analyzer so the unit is ready for
//! the profiling interpreter.

use std::sync::Arc;

use crate::analysis;
use crate::error::CompilerError;
use crate::expression::Expr;
use crate::function::{registry, CompilationState, Function, FunctionId, FunctionIr, Unit, UnitIr};
use crate::node::{CallDispatcher, Node};
use crate::variables::{VarId, Variable};

/// Translate a top-level lambda into an executable function. `resolve`
/// maps free-function names to already defined functions; `self_name`,
/// when given, additionally resolves to the function being built.
pub fn translate(
    lambda: &Expr,
    resolve: &dyn Fn(&str) -> Option<FunctionId>,
    self_name: Option<&str>,
) -> Result<Arc<Function>, CompilerError> {
    let Expr::Lambda { params, body } = lambda else {
        return Err(CompilerError::new("a definition must be a lambda"));
    };
    let top = registry().register(|id| Function::top_level(id, params.len()));

    let mut translation = Translation {
        unit: UnitIr::default(),
        members: vec![Arc::clone(&top)],
        resolve,
        self_name,
        self_id: top.id(),
        scope: Vec::new(),
    };
    translation.member_skeleton(0, top.id(), params)?;
    let top_body = translation.translate(body, 0)?;
    translation.unit.functions[0].body = top_body;

    let Translation {
        mut unit, members, ..
    } = translation;
    analysis::analyze(&mut unit)?;

    let member_ids = members.iter().map(|member| member.id()).collect();
    top.install_unit(Unit::new(unit, member_ids));
    for member in &members {
        member.transition(CompilationState::Invalid, CompilationState::Profiling);
    }
    Ok(top)
}

struct Translation<'a> {
    unit: UnitIr,
    members: Vec<Arc<Function>>,
    resolve: &'a dyn Fn(&str) -> Option<FunctionId>,
    self_name: Option<&'a str>,
    self_id: FunctionId,
    /// Lexical scope: innermost bindings last.
    scope: Vec<(String, VarId)>,
}

impl Translation<'_> {
    /// Allocate a member's declared parameters and IR skeleton, and bring
    /// the parameters into scope.
    fn member_skeleton(
        &mut self,
        member: usize,
        function: FunctionId,
        params: &[String],
    ) -> Result<(), CompilerError> {
        let mut declared = Vec::with_capacity(params.len());
        for name in params {
            if params.iter().filter(|other| *other == name).count() > 1 {
                return Err(CompilerError::new(format!("duplicate parameter: {}", name)));
            }
            let variable = self.unit.alloc_var(Variable::declared(name.clone(), member));
            self.scope.push((name.clone(), variable));
            declared.push(variable);
        }
        self.unit
            .functions
            .push(FunctionIr::new(function, declared));
        Ok(())
    }

    fn translate(&mut self, expr: &Expr, member: usize) -> Result<Node, CompilerError> {
        match expr {
            Expr::Const(value) => Ok(Node::constant(value.clone())),
            Expr::Var(name) => Ok(Node::get_var(self.lookup(name)?)),
            Expr::Set(name, value) => {
                let value = self.translate(value, member)?;
                Ok(Node::set_var(self.lookup(name)?, value))
            }
            Expr::Let { name, init, body } => {
                let init = self.translate(init, member)?;
                let variable = self.unit.alloc_var(Variable::let_bound(name.clone(), member));
                self.scope.push((name.clone(), variable));
                let body = self.translate(body, member);
                self.scope.pop();
                Ok(Node::let_bound(variable, init, body?))
            }
            Expr::If(condition, when_true, when_false) => Ok(Node::if_else(
                self.translate(condition, member)?,
                self.translate(when_true, member)?,
                self.translate(when_false, member)?,
            )),
            Expr::While(condition, body) => Ok(Node::while_loop(
                self.translate(condition, member)?,
                self.translate(body, member)?,
            )),
            Expr::Block(expressions) => {
                let translated = expressions
                    .iter()
                    .map(|each| self.translate(each, member))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Node::block(translated))
            }
            Expr::Return(value) => Ok(Node::ret(self.translate(value, member)?)),
            Expr::Call { callee, args } => {
                if args.len() > 2 {
                    return Err(CompilerError::new(format!(
                        "unsupported call arity: {}",
                        args.len()
                    )));
                }
                let dispatcher = match callee.as_ref() {
                    Expr::Direct(target) => match target.as_ref() {
                        Expr::FreeFunction(name) => {
                            CallDispatcher::Direct(self.resolve_free(name)?)
                        }
                        _ => {
                            return Err(CompilerError::new(
                                "direct call target must be a free function",
                            ))
                        }
                    },
                    other => {
                        CallDispatcher::Expression(Box::new(self.translate(other, member)?))
                    }
                };
                let args = args
                    .iter()
                    .map(|each| self.translate(each, member))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Node::call(dispatcher, args))
            }
            Expr::Prim1(primitive, argument) => Ok(Node::primitive1(
                primitive.clone(),
                self.translate(argument, member)?,
            )),
            Expr::Prim2(primitive, argument1, argument2) => Ok(Node::primitive2(
                primitive.clone(),
                self.translate(argument1, member)?,
                self.translate(argument2, member)?,
            )),
            Expr::Lambda { params, body } => {
                let index = self.unit.functions.len();
                let top = self.self_id;
                let nested =
                    registry().register(|id| Function::nested(id, top, index, params.len()));
                self.members.push(Arc::clone(&nested));
                let outer_scope_len = self.scope.len();
                self.member_skeleton(index, nested.id(), params)?;
                let nested_body = self.translate(body, index);
                self.scope.truncate(outer_scope_len);
                self.unit.functions[index].body = nested_body?;
                Ok(Node::closure(index, nested.id()))
            }
            Expr::FreeFunction(name) => Ok(Node::free_function_ref(self.resolve_free(name)?)),
            Expr::Direct(_) => Err(CompilerError::new(
                "direct reference is only valid as a call target",
            )),
        }
    }

    fn lookup(&self, name: &str) -> Result<VarId, CompilerError> {
        self.scope
            .iter()
            .rev()
            .find(|(bound, _)| bound == name)
            .map(|(_, variable)| *variable)
            .ok_or_else(|| CompilerError::new(format!("undefined variable: {}", name)))
    }

    fn resolve_free(&self, name: &str) -> Result<FunctionId, CompilerError> {
        if self.self_name == Some(name) {
            return Ok(self.self_id);
        }
        (self.resolve)(name)
            .ok_or_else(|| CompilerError::new(format!("undefined function: {}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::{add, call, const_, lambda, let_, var};
    use crate::node::NodeKind;

    fn no_free_functions(_: &str) -> Option<FunctionId> {
        None
    }

    #[test]
    fn test_translates_constant_lambda() {
        let function = translate(&lambda(&[], const_(42)), &no_free_functions, None).unwrap();
        assert!(function.is_top_level());
        assert_eq!(function.declared_arity(), 0);
        assert_eq!(function.state(), CompilationState::Profiling);
        let ir = function.unit_ir();
        assert!(matches!(ir.functions[0].body.kind, NodeKind::Constant(_)));
    }

    #[test]
    fn test_rejects_non_lambda_definition() {
        assert!(translate(&const_(1), &no_free_functions, None).is_err());
    }

    #[test]
    fn test_rejects_undefined_variable() {
        let err = translate(&lambda(&[], var("x")), &no_free_functions, None).unwrap_err();
        assert!(err.message().contains("undefined variable: x"));
    }

    #[test]
    fn test_rejects_duplicate_parameter() {
        let err = translate(
            &lambda(&["x", "x"], var("x")),
            &no_free_functions,
            None,
        )
        .unwrap_err();
        assert!(err.message().contains("duplicate parameter: x"));
    }

    #[test]
    fn test_rejects_oversized_call_arity() {
        let err = translate(
            &lambda(
                &["f"],
                call(var("f"), vec![const_(1), const_(2), const_(3)]),
            ),
            &no_free_functions,
            None,
        )
        .unwrap_err();
        assert!(err.message().contains("unsupported call arity: 3"));
    }

    #[test]
    fn test_let_scopes_its_name_to_the_body() {
        let err = translate(
            &lambda(&[], let_("t", var("t"), const_(1))),
            &no_free_functions,
            None,
        )
        .unwrap_err();
        assert!(err.message().contains("undefined variable: t"));
    }

    #[test]
    fn test_nested_lambda_becomes_a_unit_member() {
        let function = translate(
            &lambda(&["x"], lambda(&[], var("x"))),
            &no_free_functions,
            None,
        )
        .unwrap();
        let ir = function.unit_ir();
        assert_eq!(ir.functions.len(), 2);
        // The nested member was closure-converted and indexed.
        assert_eq!(ir.functions[1].synthetic_params.len(), 1);
        assert_eq!(ir.functions[1].frame_size, 1);
        let nested = registry().get(ir.functions[1].function);
        assert!(!nested.is_top_level());
        assert_eq!(nested.top(), function.id());
        assert_eq!(nested.state(), CompilationState::Profiling);
    }

    #[test]
    fn test_self_reference_resolves_to_the_function_itself() {
        let function = translate(
            &lambda(
                &["n"],
                call(
                    crate::expression::direct(Expr::FreeFunction("me".to_string())),
                    vec![add(var("n"), const_(1))],
                ),
            ),
            &no_free_functions,
            Some("me"),
        )
        .unwrap();
        let ir = function.unit_ir();
        match &ir.functions[0].body.kind {
            NodeKind::Call { dispatcher, .. } => match dispatcher {
                CallDispatcher::Direct(target) => assert_eq!(*target, function.id()),
                _ => unreachable!(),
            },
            _ => unreachable!(),
        }
    }
}
