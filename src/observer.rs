//! Observed-type analysis from recorded runtime profiles.
//!
//! Runs after a function body has been executed a number of times under
//! the profiling interpreter. The traversal mirrors the inferencer but
//! fills in observed types, reading actual observations only from the
//! profiles recorded at calls and variables; constants and primitives
//! contribute their deterministic static kinds. `if` uses the
//! opportunistic join over the branches whose counters are non-zero, so a
//! branch that never ran does not forbid specialization.

use crate::function::UnitIr;
use crate::node::{CallDispatcher, Node, NodeKind};
use crate::types::{ExpressionType, ValueKind};

/// Fill in observed types for one unit member.
pub fn observe_types(unit: &mut UnitIr, member: usize) {
    let params: Vec<_> = unit.functions[member].all_params().collect();
    for each in params {
        let observed = unit.var(each).profile().observed_type();
        unit.var_mut(each).observed_type = observed;
    }
    let mut pass = ObservationPass {
        return_types: Vec::new(),
    };
    let mut body = std::mem::replace(&mut unit.functions[member].body, Node::nil());
    pass.observe(unit, &mut body);
    for each in pass.return_types.drain(..) {
        body.unify_observed_type(each);
    }
    unit.functions[member].body = body;
}

struct ObservationPass {
    /// Observed types of `return` values; they describe the values the
    /// enclosing function produces, so they fold into the body type.
    return_types: Vec<ExpressionType>,
}

impl ObservationPass {
    fn observe(&mut self, unit: &mut UnitIr, node: &mut Node) -> ExpressionType {
        match &mut node.kind {
            // A constant's kind is deterministic; claim it without a profile.
            NodeKind::Constant(_) => {
                let inferred = node.inferred_type;
                node.unify_observed_type(inferred);
                inferred
            }
            NodeKind::GetVar(variable) => {
                let observed = unit.var(*variable).observed_type;
                node.unify_observed_type(observed);
                observed
            }
            NodeKind::SetVar { value, .. } => {
                // The variable's observed type already covers everything
                // the value expression was seen to produce; only the node
                // annotation needs the value type.
                let value_type = self.observe(unit, value);
                node.unify_observed_type(value_type);
                value_type
            }
            NodeKind::Let {
                variable,
                initializer,
                body,
            } => {
                self.observe(unit, initializer);
                let recorded = unit.var(*variable).profile().observed_type();
                unit.var_mut(*variable).unify_observed_type(recorded);
                let body_type = self.observe(unit, body);
                node.unify_observed_type(body_type);
                body_type
            }
            NodeKind::If {
                condition,
                true_branch,
                false_branch,
                counters,
            } => {
                let true_taken = counters.true_count() > 0;
                let false_taken = counters.false_count() > 0;
                self.observe(unit, condition);
                let true_type = self.observe(unit, true_branch);
                let false_type = self.observe(unit, false_branch);
                let effective_true = if true_taken {
                    true_type
                } else {
                    ExpressionType::Unknown
                };
                let effective_false = if false_taken {
                    false_type
                } else {
                    ExpressionType::Unknown
                };
                let unified = effective_true.opportunistic_union(effective_false);
                node.unify_observed_type(unified);
                unified
            }
            NodeKind::While { condition, body } => {
                self.observe(unit, condition);
                let body_type = self.observe(unit, body);
                node.unify_observed_type(body_type);
                body_type
            }
            NodeKind::Block(expressions) => {
                let mut block_type = ExpressionType::Known(ValueKind::Ref);
                for each in expressions.iter_mut() {
                    block_type = self.observe(unit, each);
                }
                node.unify_observed_type(block_type);
                block_type
            }
            NodeKind::Return(value) => {
                let value_type = self.observe(unit, value);
                self.return_types.push(value_type);
                let void = ExpressionType::Known(ValueKind::Void);
                node.unify_observed_type(void);
                void
            }
            NodeKind::Call {
                dispatcher,
                args,
                profile,
            } => {
                let observed = if profile.has_data() {
                    profile.observed_type()
                } else {
                    ExpressionType::Unknown
                };
                if let CallDispatcher::Expression(callee) = dispatcher {
                    self.observe(unit, callee);
                }
                for each in args.iter_mut() {
                    self.observe(unit, each);
                }
                if !observed.is_unknown() {
                    node.unify_observed_type(observed);
                }
                observed
            }
            // A primitive's result kind is deterministic, like a constant's.
            NodeKind::Primitive1 {
                primitive,
                argument,
            } => {
                let result = primitive.inferred_type(ExpressionType::Unknown);
                self.observe(unit, argument);
                if !result.is_unknown() {
                    node.unify_observed_type(result);
                }
                result
            }
            NodeKind::Primitive2 {
                primitive,
                argument1,
                argument2,
            } => {
                let result =
                    primitive.inferred_type(ExpressionType::Unknown, ExpressionType::Unknown);
                self.observe(unit, argument1);
                self.observe(unit, argument2);
                if !result.is_unknown() {
                    node.unify_observed_type(result);
                }
                result
            }
            NodeKind::Closure { .. } | NodeKind::FreeFunctionRef(_) => {
                let inferred = node.inferred_type;
                node.unify_observed_type(inferred);
                inferred
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{registry, Function, FunctionIr, UnitIr};
    use crate::inference::infer_types;
    use crate::value::Value;
    use crate::variables::Variable;

    fn unit_with_body(
        params: &[&str],
        build: impl FnOnce(&mut UnitIr, &[crate::variables::VarId]) -> Node,
    ) -> UnitIr {
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
    fn test_never_taken_branch_does_not_pollute() {
        let mut unit = unit_with_body(&["x"], |_, vars| {
            Node::if_else(
                Node::get_var(vars[0]),
                Node::constant(Value::Int(1)),
                Node::constant(Value::str("false")),
            )
        });
        infer_types(&mut unit, 0).unwrap();
        // Only the true branch ever ran.
        if let NodeKind::If { counters, .. } = &unit.functions[0].body.kind {
            counters.record(true);
            counters.record(true);
        }
        observe_types(&mut unit, 0);
        assert_eq!(
            unit.functions[0].body.observed_type,
            ExpressionType::Known(ValueKind::Int)
        );
    }

    #[test]
    fn test_both_branches_taken_join_opportunistically() {
        let mut unit = unit_with_body(&["x"], |_, vars| {
            Node::if_else(
                Node::get_var(vars[0]),
                Node::constant(Value::Int(1)),
                Node::constant(Value::str("false")),
            )
        });
        infer_types(&mut unit, 0).unwrap();
        if let NodeKind::If { counters, .. } = &unit.functions[0].body.kind {
            counters.record(true);
            counters.record(false);
        }
        observe_types(&mut unit, 0);
        assert_eq!(
            unit.functions[0].body.observed_type,
            ExpressionType::Known(ValueKind::Ref)
        );
    }

    #[test]
    fn test_unprofiled_call_stays_unknown() {
        let mut unit = unit_with_body(&["f"], |_, vars| {
            Node::call(
                CallDispatcher::Expression(Box::new(Node::get_var(vars[0]))),
                vec![],
            )
        });
        infer_types(&mut unit, 0).unwrap();
        observe_types(&mut unit, 0);
        assert!(unit.functions[0].body.observed_type.is_unknown());
    }

    #[test]
    fn test_profiled_call_reports_recorded_kind() {
        let mut unit = unit_with_body(&["f"], |_, vars| {
            Node::call(
                CallDispatcher::Expression(Box::new(Node::get_var(vars[0]))),
                vec![],
            )
        });
        infer_types(&mut unit, 0).unwrap();
        if let NodeKind::Call { profile, .. } = &unit.functions[0].body.kind {
            profile.record(&Value::Int(3));
        }
        observe_types(&mut unit, 0);
        assert_eq!(
            unit.functions[0].body.observed_type,
            ExpressionType::Known(ValueKind::Int)
        );
    }

    #[test]
    fn test_parameter_observation_comes_from_profile() {
        let mut unit = unit_with_body(&["x"], |_, vars| Node::get_var(vars[0]));
        let x = unit.functions[0].declared_params[0];
        unit.var(x).profile().record(&Value::Int(5));
        infer_types(&mut unit, 0).unwrap();
        observe_types(&mut unit, 0);
        assert_eq!(
            unit.var(x).observed_type,
            ExpressionType::Known(ValueKind::Int)
        );
        assert_eq!(unit.var(x).specialized_kind(), ValueKind::Int);
        assert_eq!(
            unit.functions[0].body.observed_type,
            ExpressionType::Known(ValueKind::Int)
        );
    }

    #[test]
    fn test_unprofiled_parameter_stays_ref() {
        let mut unit = unit_with_body(&["x"], |_, vars| Node::get_var(vars[0]));
        infer_types(&mut unit, 0).unwrap();
        observe_types(&mut unit, 0);
        let x = unit.functions[0].declared_params[0];
        assert!(unit.var(x).observed_type.is_unknown());
        assert_eq!(unit.var(x).specialized_kind(), ValueKind::Ref);
    }
}
