//! Static type inference over the evaluator-node tree.
//!
//! A simple bottom-up pass, with one wrinkle: an assignment may widen a
//! variable's type, which can change the type of any expression reading
//! that variable, so the pass reruns until no annotation widens. Widening
//! is monotone within the finite lattice, which bounds the reruns.
//!
//! An expression's inferred type records what static analysis alone knows
//! about its value, as opposed to the observed type recorded from runtime
//! profiles.

use crate::error::CompilerError;
use crate::function::UnitIr;
use crate::node::{CallDispatcher, Node, NodeKind};
use crate::types::{ExpressionType, ValueKind};

/// Infer types for one unit member. Parameters are (re)seeded as unknown;
/// their types strengthen only through observation, not inference.
pub fn infer_types(unit: &mut UnitIr, member: usize) -> Result<(), CompilerError> {
    let declared = unit.functions[member].declared_params.clone();
    for each in declared {
        unit.var_mut(each).inferred_type = ExpressionType::Unknown;
    }
    loop {
        let mut pass = InferencePass {
            revisit: false,
            return_types: Vec::new(),
        };
        let mut body = std::mem::replace(&mut unit.functions[member].body, Node::nil());
        let result = pass.infer(unit, member, &mut body);
        for each in pass.return_types.drain(..) {
            body.unify_inferred_type(each);
        }
        unit.functions[member].body = body;
        result?;
        if !pass.revisit {
            return Ok(());
        }
    }
}

struct InferencePass {
    revisit: bool,
    /// Types of `return` values, folded into the body type after the walk.
    return_types: Vec<ExpressionType>,
}

impl InferencePass {
    fn infer(
        &mut self,
        unit: &mut UnitIr,
        member: usize,
        node: &mut Node,
    ) -> Result<ExpressionType, CompilerError> {
        let inferred = match &mut node.kind {
            NodeKind::Constant(value) => ExpressionType::Known(value.kind()),
            NodeKind::GetVar(variable) => {
                let variable_type = unit.var(*variable).inferred_type;
                if node.unify_inferred_type(variable_type) {
                    self.revisit = true;
                }
                return Ok(variable_type);
            }
            NodeKind::SetVar { variable, value } => {
                let value_type = self.infer(unit, member, value)?;
                if unit.var_mut(*variable).unify_inferred_type(value_type) {
                    self.revisit = true;
                }
                value_type
            }
            NodeKind::Let {
                variable,
                initializer,
                body,
            } => {
                let initializer_type = self.infer(unit, member, initializer)?;
                unit.var_mut(*variable).unify_inferred_type(initializer_type);
                self.infer(unit, member, body)?
            }
            NodeKind::If {
                condition,
                true_branch,
                false_branch,
                ..
            } => {
                let condition_type = self.infer(unit, member, condition)?;
                check_condition(condition_type, "if")?;
                let true_type = self.infer(unit, member, true_branch)?;
                let false_type = self.infer(unit, member, false_branch)?;
                true_type.union(false_type)
            }
            NodeKind::While { condition, body } => {
                let condition_type = self.infer(unit, member, condition)?;
                check_condition(condition_type, "while")?;
                self.infer(unit, member, body)?
            }
            NodeKind::Block(expressions) => {
                let mut block_type = ExpressionType::Known(ValueKind::Ref);
                for each in expressions.iter_mut() {
                    block_type = self.infer(unit, member, each)?;
                }
                block_type
            }
            NodeKind::Return(value) => {
                let value_type = self.infer(unit, member, value)?;
                self.return_types.push(value_type);
                ExpressionType::Known(ValueKind::Void)
            }
            NodeKind::Call {
                dispatcher, args, ..
            } => {
                if let CallDispatcher::Expression(callee) = dispatcher {
                    self.infer(unit, member, callee)?;
                }
                for each in args.iter_mut() {
                    self.infer(unit, member, each)?;
                }
                ExpressionType::Unknown
            }
            NodeKind::Primitive1 {
                primitive,
                argument,
            } => {
                let primitive = primitive.clone();
                let argument_type = self.infer(unit, member, argument)?;
                primitive.inferred_type(argument_type)
            }
            NodeKind::Primitive2 {
                primitive,
                argument1,
                argument2,
            } => {
                let primitive = primitive.clone();
                let type1 = self.infer(unit, member, argument1)?;
                let type2 = self.infer(unit, member, argument2)?;
                primitive.inferred_type(type1, type2)
            }
            NodeKind::Closure { .. } | NodeKind::FreeFunctionRef(_) => {
                ExpressionType::Known(ValueKind::Ref)
            }
        };
        node.unify_inferred_type(inferred);
        Ok(inferred)
    }
}

fn check_condition(condition: ExpressionType, form: &str) -> Result<(), CompilerError> {
    match condition.kind() {
        Some(kind) if kind != ValueKind::Bool && kind != ValueKind::Ref => Err(
            CompilerError::new(format!("{}() condition is not a boolean", form)),
        ),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{registry, Function, FunctionIr, UnitIr};
    use crate::primitives;
    use crate::value::Value;
    use crate::variables::Variable;

    fn unit_with_body(params: &[&str], build: impl FnOnce(&mut UnitIr, &[crate::variables::VarId]) -> Node) -> UnitIr {
        let f = registry().register(|id| Function::top_level(id, params.len()));
        let mut unit = UnitIr::default();
        let vars: Vec<_> = params
            .iter()
            .map(|name| unit.alloc_var(Variable::declared(*name, 0)))
            .collect();
        unit.functions.push(FunctionIr::new(f.id(), vars.clone()));
        unit.functions[0].body = build(&mut unit, &vars);
        unit
    }

    #[test]
    fn test_constant_infers_its_kind() {
        let mut unit = unit_with_body(&[], |_, _| Node::constant(Value::Int(42)));
        infer_types(&mut unit, 0).unwrap();
        assert_eq!(
            unit.functions[0].body.inferred_type,
            ExpressionType::Known(ValueKind::Int)
        );
    }

    #[test]
    fn test_if_joins_branches_pessimistically() {
        // (if x 1 "s") infers ref; the unknown condition passes the check.
        let mut unit = unit_with_body(&["x"], |_, vars| {
            Node::if_else(
                Node::get_var(vars[0]),
                Node::constant(Value::Int(1)),
                Node::constant(Value::str("s")),
            )
        });
        infer_types(&mut unit, 0).unwrap();
        assert_eq!(
            unit.functions[0].body.inferred_type,
            ExpressionType::Known(ValueKind::Ref)
        );
    }

    #[test]
    fn test_if_condition_of_known_non_boolean_kind_is_rejected() {
        let mut unit = unit_with_body(&[], |_, _| {
            Node::if_else(
                Node::constant(Value::Int(1)),
                Node::constant(Value::Int(1)),
                Node::constant(Value::Int(0)),
            )
        });
        let err = infer_types(&mut unit, 0).unwrap_err();
        assert!(err.message().contains("if() condition is not a boolean"));
    }

    #[test]
    fn test_primitive_condition_is_accepted() {
        let mut unit = unit_with_body(&["x"], |_, vars| {
            Node::if_else(
                Node::primitive2(
                    primitives::less_than(),
                    Node::get_var(vars[0]),
                    Node::constant(Value::Int(0)),
                ),
                Node::constant(Value::Int(1)),
                Node::constant(Value::Int(0)),
            )
        });
        infer_types(&mut unit, 0).unwrap();
        assert_eq!(
            unit.functions[0].body.inferred_type,
            ExpressionType::Known(ValueKind::Int)
        );
    }

    #[test]
    fn test_let_variable_takes_initializer_type() {
        let mut unit = unit_with_body(&[], |unit, _| {
            let t = unit.alloc_var(Variable::let_bound("t", 0));
            Node::let_bound(t, Node::constant(Value::Int(1)), Node::get_var(t))
        });
        infer_types(&mut unit, 0).unwrap();
        assert_eq!(
            unit.functions[0].body.inferred_type,
            ExpressionType::Known(ValueKind::Int)
        );
    }

    #[test]
    fn test_assignment_widening_reaches_fixed_point() {
        // (let (t 1) (begin (set! t "s") t)): the read of t must reflect
        // the widened type after the pass reruns.
        let mut unit = unit_with_body(&[], |unit, _| {
            let t = unit.alloc_var(Variable::let_bound("t", 0));
            Node::let_bound(
                t,
                Node::constant(Value::Int(1)),
                Node::block(vec![
                    Node::set_var(t, Node::constant(Value::str("s"))),
                    Node::get_var(t),
                ]),
            )
        });
        infer_types(&mut unit, 0).unwrap();
        assert_eq!(
            unit.functions[0].body.inferred_type,
            ExpressionType::Known(ValueKind::Ref)
        );
    }

    #[test]
    fn test_inference_is_idempotent() {
        let mut unit = unit_with_body(&["x"], |_, vars| {
            Node::primitive2(
                primitives::add(),
                Node::get_var(vars[0]),
                Node::constant(Value::Int(1)),
            )
        });
        infer_types(&mut unit, 0).unwrap();
        let first = unit.functions[0].body.inferred_type;
        infer_types(&mut unit, 0).unwrap();
        assert_eq!(unit.functions[0].body.inferred_type, first);
    }

    #[test]
    fn test_return_folds_into_body_type() {
        // (begin (if x (return "early") nil) 1): body type must include ref.
        let mut unit = unit_with_body(&["x"], |_, vars| {
            Node::block(vec![
                Node::if_else(
                    Node::get_var(vars[0]),
                    Node::ret(Node::constant(Value::str("early"))),
                    Node::nil(),
                ),
                Node::constant(Value::Int(1)),
            ])
        });
        infer_types(&mut unit, 0).unwrap();
        assert_eq!(
            unit.functions[0].body.inferred_type,
            ExpressionType::Known(ValueKind::Ref)
        );
    }

    #[test]
    fn test_call_infers_unknown() {
        let mut unit = unit_with_body(&["f"], |_, vars| {
            Node::call(
                crate::node::CallDispatcher::Expression(Box::new(Node::get_var(vars[0]))),
                vec![],
            )
        });
        infer_types(&mut unit, 0).unwrap();
        assert!(unit.functions[0].body.inferred_type.is_unknown());
    }
}
