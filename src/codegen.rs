//! Code generation: one generic form per function, plus a specialized form
//! when profiling justifies it.
//!
//! The generic form treats every value as an opaque reference and uses
//! only unchecked instructions. The specialized form assigns each
//! expression and frame slot the most precise kind implied by its observed
//! type, strengthened by inference, and widens to `Ref` at any join where
//! kinds disagree. The places where a statically chosen primitive kind
//! meets a dynamically produced value (a store into a primitive-kind
//! slot, a call result, the function return) are emitted as checked
//! instructions that abort with the square-peg signal instead of
//! continuing with a wrong-kind value.

use std::sync::Arc;

use crate::code::{CallSite, CallTargetDesc, CodeBlock, CodeWriter, Instr};
use crate::function::{Specialization, UnitIr};
use crate::node::{CallDispatcher, Node, NodeKind};
use crate::types::{ExpressionType, ValueKind};
use crate::value::{Closure, Value};

/// Generate the compiled forms for one unit member: the generic entry and,
/// when at least one parameter has a non-`Ref` specialized kind, the
/// specialized entry.
pub fn generate(unit: &UnitIr, member: usize) -> (CodeBlock, Option<Specialization>) {
    let generic = Generator::new(unit, member, false).generate();
    let specialization = if is_specialization_eligible(unit, member) {
        let return_kind = specialized_return_kind(unit, member);
        let code = Generator::new(unit, member, true).generate();
        let param_kinds = unit.functions[member]
            .all_params()
            .map(|param| unit.var(param).specialized_kind())
            .collect();
        Some(Specialization {
            code: Arc::new(code),
            param_kinds,
            return_kind,
        })
    } else {
        None
    };
    (generic, specialization)
}

/// A function is worth specializing iff at least one parameter slot has a
/// primitive specialized kind.
pub fn is_specialization_eligible(unit: &UnitIr, member: usize) -> bool {
    unit.functions[member]
        .all_params()
        .any(|param| unit.var(param).specialized_kind() != ValueKind::Ref)
}

/// The specialized return kind: the join of the body's kind and the kinds
/// of all `return` values in it. `Void` contributes nothing, so a body
/// that always returns early folds down to its `return` kinds alone.
pub fn specialized_return_kind(unit: &UnitIr, member: usize) -> ValueKind {
    let body = &unit.functions[member].body;
    let mut kind = annotation_kind(body);
    collect_return_kinds(body, &mut kind);
    if kind == ValueKind::Void {
        ValueKind::Ref
    } else {
        kind
    }
}

fn collect_return_kinds(node: &Node, kind: &mut ValueKind) {
    match &node.kind {
        NodeKind::Return(value) => {
            *kind = kind.join(annotation_kind(value));
            collect_return_kinds(value, kind);
        }
        NodeKind::Constant(_) | NodeKind::GetVar(_) | NodeKind::FreeFunctionRef(_) => {}
        NodeKind::SetVar { value, .. } => collect_return_kinds(value, kind),
        NodeKind::Let {
            initializer, body, ..
        } => {
            collect_return_kinds(initializer, kind);
            collect_return_kinds(body, kind);
        }
        NodeKind::If {
            condition,
            true_branch,
            false_branch,
            ..
        } => {
            collect_return_kinds(condition, kind);
            collect_return_kinds(true_branch, kind);
            collect_return_kinds(false_branch, kind);
        }
        NodeKind::While { condition, body } => {
            collect_return_kinds(condition, kind);
            collect_return_kinds(body, kind);
        }
        NodeKind::Block(expressions) => {
            for each in expressions {
                collect_return_kinds(each, kind);
            }
        }
        NodeKind::Call {
            dispatcher, args, ..
        } => {
            if let CallDispatcher::Expression(callee) = dispatcher {
                collect_return_kinds(callee, kind);
            }
            for each in args {
                collect_return_kinds(each, kind);
            }
        }
        NodeKind::Primitive1 { argument, .. } => collect_return_kinds(argument, kind),
        NodeKind::Primitive2 {
            argument1,
            argument2,
            ..
        } => {
            collect_return_kinds(argument1, kind);
            collect_return_kinds(argument2, kind);
        }
        // A nested closure's returns belong to the nested function.
        NodeKind::Closure { .. } => {}
    }
}

/// The kind a node's annotations imply: observed, strengthened by
/// inference, `Ref` when neither knows.
fn annotation_kind(node: &Node) -> ValueKind {
    node.observed_type
        .kind()
        .or_else(|| node.inferred_type.kind())
        .unwrap_or(ValueKind::Ref)
}

struct Generator<'a> {
    unit: &'a UnitIr,
    member: usize,
    specialized: bool,
    return_kind: ValueKind,
    writer: CodeWriter,
}

impl<'a> Generator<'a> {
    fn new(unit: &'a UnitIr, member: usize, specialized: bool) -> Self {
        let return_kind = if specialized {
            specialized_return_kind(unit, member)
        } else {
            ValueKind::Ref
        };
        Generator {
            unit,
            member,
            specialized,
            return_kind,
            writer: CodeWriter::new(),
        }
    }

    fn generate(mut self) -> CodeBlock {
        let function = &self.unit.functions[self.member];
        let body_kind = self.emit(&function.body);
        self.emit_return(body_kind);
        self.writer
            .finish(function.implementation_arity(), function.frame_size)
    }

    /// Emit code leaving the node's value on the stack; returns its static
    /// kind.
    fn emit(&mut self, node: &Node) -> ValueKind {
        match &node.kind {
            NodeKind::Constant(value) => {
                self.writer.write(Instr::Const(value.clone()));
                self.kind_or_ref(value.kind())
            }
            NodeKind::GetVar(variable) => {
                let var = self.unit.var(*variable);
                self.writer.write(Instr::LoadLocal(var.index()));
                self.kind_or_ref(var.specialized_kind())
            }
            NodeKind::SetVar { variable, value } => {
                let value_kind = self.emit(value);
                self.writer.write(Instr::Dup);
                self.emit_store(*variable, value_kind);
                value_kind
            }
            NodeKind::Let {
                variable,
                initializer,
                body,
            } => {
                let initializer_kind = self.emit(initializer);
                self.emit_store(*variable, initializer_kind);
                self.emit(body)
            }
            NodeKind::If {
                condition,
                true_branch,
                false_branch,
                ..
            } => {
                let branch = self.emit_condition(condition);
                let true_kind = self.emit(true_branch);
                let jump_end = self.writer.write(Instr::Jump(0));
                let false_side = self.writer.position();
                self.writer.patch_branch(branch, false_side);
                let false_kind = self.emit(false_branch);
                let end = self.writer.position();
                self.writer.patch_branch(jump_end, end);
                // Differing branch kinds widen to Ref; a void branch (one
                // that always returns) contributes nothing to the join.
                self.kind_or_ref(true_kind.join(false_kind))
            }
            NodeKind::While { condition, body } => {
                let loop_start = self.writer.position();
                let branch = self.emit_condition(condition);
                self.emit(body);
                self.writer.write(Instr::Pop);
                self.writer.write(Instr::Jump(loop_start));
                let exit = self.writer.position();
                self.writer.patch_branch(branch, exit);
                self.writer.write(Instr::Const(Value::Nil));
                ValueKind::Ref
            }
            NodeKind::Block(expressions) => match expressions.split_last() {
                None => {
                    self.writer.write(Instr::Const(Value::Nil));
                    ValueKind::Ref
                }
                Some((last, rest)) => {
                    for each in rest {
                        self.emit(each);
                        self.writer.write(Instr::Pop);
                    }
                    self.emit(last)
                }
            },
            NodeKind::Return(value) => {
                let value_kind = self.emit(value);
                self.emit_return(value_kind);
                ValueKind::Void
            }
            NodeKind::Call {
                dispatcher, args, ..
            } => {
                let target = match dispatcher {
                    CallDispatcher::Direct(function) => CallTargetDesc::Direct(*function),
                    CallDispatcher::Expression(callee) => {
                        self.emit(callee);
                        CallTargetDesc::Dynamic
                    }
                };
                let arg_kinds: Vec<ValueKind> = args.iter().map(|each| self.emit(each)).collect();
                let result_kind = self.kind_or_ref(annotation_kind(node));
                self.writer.write(Instr::Call(CallSite {
                    target,
                    arg_kinds,
                    result_kind,
                }));
                result_kind
            }
            NodeKind::Primitive1 {
                primitive,
                argument,
            } => {
                let argument_kind = self.emit(argument);
                if self.specialized {
                    if let Some(produced) = primitive.emit(&mut self.writer, argument_kind) {
                        return produced;
                    }
                }
                self.writer.write(Instr::Primitive1(primitive.clone()));
                self.kind_or_ref(
                    primitive
                        .inferred_type(ExpressionType::Known(argument_kind))
                        .kind()
                        .unwrap_or(ValueKind::Ref),
                )
            }
            NodeKind::Primitive2 {
                primitive,
                argument1,
                argument2,
            } => {
                let kind1 = self.emit(argument1);
                let kind2 = self.emit(argument2);
                if self.specialized {
                    if let Some(produced) = primitive.emit(&mut self.writer, (kind1, kind2)) {
                        return produced;
                    }
                }
                self.writer.write(Instr::Primitive2(primitive.clone()));
                self.kind_or_ref(
                    primitive
                        .inferred_type(ExpressionType::Known(kind1), ExpressionType::Known(kind2))
                        .kind()
                        .unwrap_or(ValueKind::Ref),
                )
            }
            NodeKind::Closure {
                function,
                captured_indices,
                ..
            } => {
                self.writer.write(Instr::MakeClosure {
                    function: *function,
                    capture_indices: captured_indices.clone(),
                });
                ValueKind::Ref
            }
            NodeKind::FreeFunctionRef(function) => {
                self.writer.write(Instr::Const(Value::Closure(Arc::new(
                    Closure::new(*function, Vec::new()),
                ))));
                ValueKind::Ref
            }
        }
    }

    /// Emit an `if`/`while` condition and the branch to the false side;
    /// returns the branch instruction's position for patching. A
    /// boolean-valued primitive that offers a fused form for the static
    /// argument kinds gets the combined compare-and-branch.
    fn emit_condition(&mut self, condition: &Node) -> usize {
        if self.specialized {
            if let NodeKind::Primitive2 {
                primitive,
                argument1,
                argument2,
            } = &condition.kind
            {
                let kinds = (self.static_kind(argument1), self.static_kind(argument2));
                if let Some(op) = primitive.fused_branch(kinds) {
                    self.emit(argument1);
                    self.emit(argument2);
                    return self.writer.write(Instr::BranchUnless { op, target: 0 });
                }
            }
        }
        self.emit(condition);
        self.writer.write(Instr::BranchIfFalse(0))
    }

    fn emit_store(&mut self, variable: crate::variables::VarId, value_kind: ValueKind) {
        let var = self.unit.var(variable);
        let slot_kind = self.kind_or_ref(var.specialized_kind());
        if slot_kind == ValueKind::Ref || slot_kind == value_kind {
            self.writer.write(Instr::StoreLocal(var.index()));
        } else {
            // A primitive-kind slot receiving a value the static kinds do
            // not guarantee: verify at runtime, abort on mismatch.
            self.writer.write(Instr::StoreLocalChecked {
                index: var.index(),
                kind: slot_kind,
            });
        }
    }

    fn emit_return(&mut self, value_kind: ValueKind) {
        if self.return_kind == ValueKind::Ref || value_kind == self.return_kind {
            self.writer.write(Instr::Return);
        } else {
            self.writer.write(Instr::ReturnChecked(self.return_kind));
        }
    }

    /// The static kind this generator assigns a node, without emitting it.
    /// Mirrors the kinds `emit` reports.
    fn static_kind(&self, node: &Node) -> ValueKind {
        if !self.specialized {
            return ValueKind::Ref;
        }
        match &node.kind {
            NodeKind::Constant(value) => value.kind(),
            NodeKind::GetVar(variable) => self.unit.var(*variable).specialized_kind(),
            NodeKind::SetVar { value, .. } => self.static_kind(value),
            NodeKind::Let { body, .. } => self.static_kind(body),
            NodeKind::If {
                true_branch,
                false_branch,
                ..
            } => self
                .static_kind(true_branch)
                .join(self.static_kind(false_branch)),
            NodeKind::While { .. } => ValueKind::Ref,
            NodeKind::Block(expressions) => expressions
                .last()
                .map(|last| self.static_kind(last))
                .unwrap_or(ValueKind::Ref),
            NodeKind::Return(_) => ValueKind::Void,
            NodeKind::Call { .. } => annotation_kind(node),
            NodeKind::Primitive1 {
                primitive,
                argument,
            } => primitive
                .inferred_type(ExpressionType::Known(self.static_kind(argument)))
                .kind()
                .unwrap_or(ValueKind::Ref),
            NodeKind::Primitive2 {
                primitive,
                argument1,
                argument2,
            } => primitive
                .inferred_type(
                    ExpressionType::Known(self.static_kind(argument1)),
                    ExpressionType::Known(self.static_kind(argument2)),
                )
                .kind()
                .unwrap_or(ValueKind::Ref),
            NodeKind::Closure { .. } | NodeKind::FreeFunctionRef(_) => ValueKind::Ref,
        }
    }

    /// In the generic form every kind is an opaque reference.
    fn kind_or_ref(&self, kind: ValueKind) -> ValueKind {
        if self.specialized {
            kind
        } else {
            ValueKind::Ref
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis;
    use crate::function::{registry, Function, FunctionIr};
    use crate::inference::infer_types;
    use crate::machine;
    use crate::observer::observe_types;
    use crate::primitives;
    use crate::variables::Variable;

    /// Build, analyze, infer, and observe a single-function unit.
    fn prepared_unit(
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
        analysis::analyze(&mut unit).unwrap();
        infer_types(&mut unit, 0).unwrap();
        observe_types(&mut unit, 0);
        unit
    }

    #[test]
    fn test_generic_form_runs_a_constant() {
        let unit = prepared_unit(&[], |_, _| Node::constant(Value::Int(42)));
        let (generic, spec) = generate(&unit, 0);
        assert!(spec.is_none());
        assert_eq!(machine::run(&generic, &[]).unwrap(), Value::Int(42));
    }

    #[test]
    fn test_specialization_requires_a_primitive_parameter_kind() {
        let unit = prepared_unit(&["x"], |_, vars| Node::get_var(vars[0]));
        assert!(!is_specialization_eligible(&unit, 0));
    }

    #[test]
    fn test_profiled_parameter_enables_specialization() {
        let unit = prepared_unit(&["x"], |unit, vars| {
            unit.var(vars[0]).profile().record(&Value::Int(1));
            Node::primitive2(
                primitives::add(),
                Node::get_var(vars[0]),
                Node::constant(Value::Int(1)),
            )
        });
        let (generic, spec) = generate(&unit, 0);
        let spec = spec.expect("an int parameter should specialize");
        assert_eq!(spec.param_kinds, vec![ValueKind::Int]);
        assert_eq!(spec.return_kind, ValueKind::Int);
        // Both forms compute the same value.
        assert_eq!(machine::run(&generic, &[Value::Int(4)]).unwrap(), Value::Int(5));
        assert_eq!(
            machine::run(&spec.code, &[Value::Int(4)]).unwrap(),
            Value::Int(5)
        );
        // The specialized form uses the unboxed add.
        assert!(spec
            .code
            .instructions
            .iter()
            .any(|instr| matches!(instr, Instr::AddInt)));
        assert!(!generic
            .instructions
            .iter()
            .any(|instr| matches!(instr, Instr::AddInt)));
    }

    #[test]
    fn test_fused_branch_in_specialized_form() {
        let unit = prepared_unit(&["x"], |unit, vars| {
            unit.var(vars[0]).profile().record(&Value::Int(1));
            Node::if_else(
                Node::primitive2(
                    primitives::less_than(),
                    Node::get_var(vars[0]),
                    Node::constant(Value::Int(0)),
                ),
                Node::constant(Value::Int(1)),
                Node::constant(Value::Int(2)),
            )
        });
        let (generic, spec) = generate(&unit, 0);
        let spec = spec.unwrap();
        assert!(spec
            .code
            .instructions
            .iter()
            .any(|instr| matches!(instr, Instr::BranchUnless { .. })));
        assert!(!generic
            .instructions
            .iter()
            .any(|instr| matches!(instr, Instr::BranchUnless { .. })));
        assert_eq!(
            machine::run(&spec.code, &[Value::Int(-1)]).unwrap(),
            Value::Int(1)
        );
        assert_eq!(
            machine::run(&spec.code, &[Value::Int(3)]).unwrap(),
            Value::Int(2)
        );
    }

    #[test]
    fn test_specialized_return_pegs_on_poison_branch() {
        // Profiled only through the int branch; the string branch pegs.
        let unit = prepared_unit(&["x"], |unit, vars| {
            unit.var(vars[0]).profile().record(&Value::Int(1));
            let body = Node::if_else(
                Node::primitive2(
                    primitives::less_than(),
                    Node::get_var(vars[0]),
                    Node::constant(Value::Int(0)),
                ),
                Node::constant(Value::str("error")),
                Node::constant(Value::Int(1)),
            );
            if let NodeKind::If { counters, .. } = &body.kind {
                counters.record(false);
            }
            body
        });
        let (_, spec) = generate(&unit, 0);
        let spec = spec.unwrap();
        assert_eq!(spec.return_kind, ValueKind::Int);
        assert_eq!(
            machine::run(&spec.code, &[Value::Int(5)]).unwrap(),
            Value::Int(1)
        );
        match machine::run(&spec.code, &[Value::Int(-1)]) {
            Err(machine::Abort::SquarePeg(value)) => assert_eq!(value, Value::str("error")),
            other => panic!("expected a square peg, got {:?}", other),
        }
    }

    #[test]
    fn test_generic_form_never_contains_checked_instructions() {
        let unit = prepared_unit(&["x"], |unit, vars| {
            unit.var(vars[0]).profile().record(&Value::Int(1));
            Node::let_bound(
                unit.alloc_var(Variable::let_bound("t", 0)),
                Node::get_var(vars[0]),
                Node::constant(Value::Int(1)),
            )
        });
        let (generic, _) = generate(&unit, 0);
        assert!(generic.instructions.iter().all(|instr| !matches!(
            instr,
            Instr::StoreLocalChecked { .. } | Instr::ReturnChecked(_)
        )));
    }
}
