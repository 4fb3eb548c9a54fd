//! Pre-execution static analysis: scope validation, closure conversion,
//! and frame-index assignment.
//!
//! The three passes run in that order over a whole unit, entered through
//! the top-level member and recursing into closure nodes. They run once
//! after translation (taking a function from `Invalid` to `Profiling`) and
//! again at the start of compilation; all three are idempotent on an
//! already converted tree.

use rustc_hash::FxHashSet;

use crate::error::CompilerError;
use crate::function::UnitIr;
use crate::node::{CallDispatcher, Node, NodeKind};
use crate::variables::{VarId, Variable};

/// Run all three passes over the unit.
pub fn analyze(unit: &mut UnitIr) -> Result<(), CompilerError> {
    validate_scopes(unit)?;
    convert_closures(unit);
    assign_indices(unit);
    Ok(())
}

/// Verify that every variable reference is to a variable in scope at that
/// point, and that no binder shadows a variable already bound.
pub fn validate_scopes(unit: &UnitIr) -> Result<(), CompilerError> {
    let mut scope: FxHashSet<VarId> = FxHashSet::default();
    scope.extend(unit.functions[0].all_params());
    validate_node(unit, &unit.functions[0].body, &mut scope)
}

fn validate_node(
    unit: &UnitIr,
    node: &Node,
    scope: &mut FxHashSet<VarId>,
) -> Result<(), CompilerError> {
    match &node.kind {
        NodeKind::Constant(_) | NodeKind::FreeFunctionRef(_) => Ok(()),
        NodeKind::GetVar(variable) => check_in_scope(unit, *variable, scope),
        NodeKind::SetVar { variable, value } => {
            validate_node(unit, value, scope)?;
            check_in_scope(unit, *variable, scope)
        }
        NodeKind::Let {
            variable,
            initializer,
            body,
        } => {
            validate_node(unit, initializer, scope)?;
            if !scope.insert(*variable) {
                return Err(CompilerError::new(format!(
                    "let variable is already bound: {}",
                    unit.var(*variable).name()
                )));
            }
            validate_node(unit, body, scope)?;
            scope.remove(variable);
            Ok(())
        }
        NodeKind::If {
            condition,
            true_branch,
            false_branch,
            ..
        } => {
            validate_node(unit, condition, scope)?;
            validate_node(unit, true_branch, scope)?;
            validate_node(unit, false_branch, scope)
        }
        NodeKind::While { condition, body } => {
            validate_node(unit, condition, scope)?;
            validate_node(unit, body, scope)
        }
        NodeKind::Block(expressions) => {
            for each in expressions {
                validate_node(unit, each, scope)?;
            }
            Ok(())
        }
        NodeKind::Return(value) => validate_node(unit, value, scope),
        NodeKind::Call {
            dispatcher, args, ..
        } => {
            if let CallDispatcher::Expression(callee) = dispatcher {
                validate_node(unit, callee, scope)?;
            }
            for each in args {
                validate_node(unit, each, scope)?;
            }
            Ok(())
        }
        NodeKind::Primitive1 { argument, .. } => validate_node(unit, argument, scope),
        NodeKind::Primitive2 {
            argument1,
            argument2,
            ..
        } => {
            validate_node(unit, argument1, scope)?;
            validate_node(unit, argument2, scope)
        }
        NodeKind::Closure { member, .. } => {
            // The nested function inherits the scope; its own parameters
            // are visible in its body only.
            let params: Vec<VarId> = unit.functions[*member].all_params().collect();
            for each in &params {
                if !scope.insert(*each) {
                    return Err(CompilerError::new(format!(
                        "closure parameter is already bound: {}",
                        unit.var(*each).name()
                    )));
                }
            }
            validate_node(unit, &unit.functions[*member].body, scope)?;
            for each in &params {
                scope.remove(each);
            }
            Ok(())
        }
    }
}

fn check_in_scope(
    unit: &UnitIr,
    variable: VarId,
    scope: &FxHashSet<VarId>,
) -> Result<(), CompilerError> {
    if scope.contains(&variable) {
        Ok(())
    } else {
        Err(CompilerError::new(format!(
            "referenced variable is not in scope: {}",
            unit.var(variable).name()
        )))
    }
}

/// Closure conversion: for each function, copy down every free variable it
/// references (directly or through its nested closures) as a synthetic
/// parameter, rewrite references to the copies, and wire each nested
/// function's copies to the enclosing variable that supplies the value at
/// closure creation. Copies keep insertion order so their positions are
/// stable across nested closures that share them.
pub fn convert_closures(unit: &mut UnitIr) {
    convert_function(unit, 0);
}

fn convert_function(unit: &mut UnitIr, member: usize) {
    // Seed with existing copies so reconversion finds them instead of
    // minting duplicates.
    let mut copies: Vec<(VarId, VarId)> = unit.functions[member]
        .synthetic_params
        .iter()
        .map(|copy| {
            let original = unit
                .var(*copy)
                .original()
                .expect("synthetic parameter is not a copied variable");
            (original, *copy)
        })
        .collect();

    let mut body = std::mem::replace(&mut unit.functions[member].body, Node::nil());
    convert_node(unit, member, &mut copies, &mut body);
    unit.functions[member].body = body;
    unit.functions[member].synthetic_params = copies.iter().map(|(_, copy)| *copy).collect();
}

fn convert_node(unit: &mut UnitIr, member: usize, copies: &mut Vec<(VarId, VarId)>, node: &mut Node) {
    match &mut node.kind {
        NodeKind::Constant(_) | NodeKind::FreeFunctionRef(_) => {}
        NodeKind::GetVar(variable) => {
            if unit.var(*variable).host() != member {
                *variable = copy_down(unit, member, copies, *variable);
            }
        }
        NodeKind::SetVar { variable, value } => {
            convert_node(unit, member, copies, value);
            if unit.var(*variable).host() != member {
                *variable = copy_down(unit, member, copies, *variable);
            }
        }
        NodeKind::Let {
            initializer, body, ..
        } => {
            convert_node(unit, member, copies, initializer);
            convert_node(unit, member, copies, body);
        }
        NodeKind::If {
            condition,
            true_branch,
            false_branch,
            ..
        } => {
            convert_node(unit, member, copies, condition);
            convert_node(unit, member, copies, true_branch);
            convert_node(unit, member, copies, false_branch);
        }
        NodeKind::While { condition, body } => {
            convert_node(unit, member, copies, condition);
            convert_node(unit, member, copies, body);
        }
        NodeKind::Block(expressions) => {
            for each in expressions {
                convert_node(unit, member, copies, each);
            }
        }
        NodeKind::Return(value) => convert_node(unit, member, copies, value),
        NodeKind::Call {
            dispatcher, args, ..
        } => {
            if let CallDispatcher::Expression(callee) = dispatcher {
                convert_node(unit, member, copies, callee);
            }
            for each in args {
                convert_node(unit, member, copies, each);
            }
        }
        NodeKind::Primitive1 { argument, .. } => convert_node(unit, member, copies, argument),
        NodeKind::Primitive2 {
            argument1,
            argument2,
            ..
        } => {
            convert_node(unit, member, copies, argument1);
            convert_node(unit, member, copies, argument2);
        }
        NodeKind::Closure { member: nested, .. } => {
            let nested = *nested;
            convert_function(unit, nested);
            // The nested function's copies are now in place; supply each of
            // them from here, copying down in turn what is still free.
            let nested_copies = unit.functions[nested].synthetic_params.clone();
            for copy in nested_copies {
                let original = unit
                    .var(copy)
                    .original()
                    .expect("synthetic parameter is not a copied variable");
                let supplier = if unit.var(original).host() == member {
                    original
                } else {
                    copy_down(unit, member, copies, original)
                };
                unit.var_mut(copy).set_supplier(supplier);
            }
        }
    }
}

/// Find or create this function's copy of a free variable. `original` is
/// always the underlying definition, never another copy.
fn copy_down(
    unit: &mut UnitIr,
    member: usize,
    copies: &mut Vec<(VarId, VarId)>,
    original: VarId,
) -> VarId {
    if let Some((_, copy)) = copies.iter().find(|(o, _)| *o == original) {
        return *copy;
    }
    let name = unit.var(original).name().to_string();
    let copy = unit.alloc_var(Variable::copied(name, member, original));
    copies.push((original, copy));
    copy
}

/// Assign frame indices: synthetic parameters first, then declared
/// parameters, then let-bound variables through a stack-like allocator
/// that releases on let exit. Records each function's frame size and each
/// closure node's capture template (the supplier variables of the
/// enclosing function and their indices).
pub fn assign_indices(unit: &mut UnitIr) {
    index_function(unit, 0);
}

fn index_function(unit: &mut UnitIr, member: usize) {
    let params: Vec<VarId> = unit.functions[member].all_params().collect();
    for (index, each) in params.iter().enumerate() {
        unit.var_mut(*each).set_index(index);
    }
    let mut next = params.len();
    let mut high = next;

    let mut body = std::mem::replace(&mut unit.functions[member].body, Node::nil());
    index_node(unit, &mut body, &mut next, &mut high);
    unit.functions[member].body = body;
    unit.functions[member].frame_size = high;
}

fn index_node(unit: &mut UnitIr, node: &mut Node, next: &mut usize, high: &mut usize) {
    match &mut node.kind {
        NodeKind::Constant(_) | NodeKind::GetVar(_) | NodeKind::FreeFunctionRef(_) => {}
        NodeKind::SetVar { value, .. } => index_node(unit, value, next, high),
        NodeKind::Let {
            variable,
            initializer,
            body,
        } => {
            index_node(unit, initializer, next, high);
            unit.var_mut(*variable).set_index(*next);
            *next += 1;
            *high = (*high).max(*next);
            index_node(unit, body, next, high);
            *next -= 1;
        }
        NodeKind::If {
            condition,
            true_branch,
            false_branch,
            ..
        } => {
            index_node(unit, condition, next, high);
            index_node(unit, true_branch, next, high);
            index_node(unit, false_branch, next, high);
        }
        NodeKind::While { condition, body } => {
            index_node(unit, condition, next, high);
            index_node(unit, body, next, high);
        }
        NodeKind::Block(expressions) => {
            for each in expressions {
                index_node(unit, each, next, high);
            }
        }
        NodeKind::Return(value) => index_node(unit, value, next, high),
        NodeKind::Call {
            dispatcher, args, ..
        } => {
            if let CallDispatcher::Expression(callee) = dispatcher {
                index_node(unit, callee, next, high);
            }
            for each in args {
                index_node(unit, each, next, high);
            }
        }
        NodeKind::Primitive1 { argument, .. } => index_node(unit, argument, next, high),
        NodeKind::Primitive2 {
            argument1,
            argument2,
            ..
        } => {
            index_node(unit, argument1, next, high);
            index_node(unit, argument2, next, high);
        }
        NodeKind::Closure {
            member: nested,
            captured_suppliers,
            captured_indices,
            ..
        } => {
            let nested = *nested;
            index_function(unit, nested);
            let suppliers: Vec<VarId> = unit.functions[nested]
                .synthetic_params
                .iter()
                .map(|copy| {
                    unit.var(*copy)
                        .supplier()
                        .expect("copied variable has no supplier")
                })
                .collect();
            let indices: Vec<usize> = suppliers.iter().map(|v| unit.var(*v).index()).collect();
            *captured_suppliers = suppliers;
            *captured_indices = indices;
        }
    }
}
