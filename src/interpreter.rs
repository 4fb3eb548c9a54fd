//! The tree-walking execution tiers.
//!
//! The profiling interpreter records, at every call and every variable
//! access, the kind of the value produced, counts `if` branches, and
//! counts invocations; crossing the invocation threshold schedules
//! compilation of the enclosing top-level unit. The plain interpreter is
//! the same walker with recording switched off; it is the call target
//! while a unit is being compiled.
//!
//! Conditions are strict booleans and arithmetic is strict integers; a
//! mismatch raises a runtime error that unwinds to the outermost
//! invocation. `return` unwinds to the function boundary only.

use std::sync::Arc;

use crate::compiler;
use crate::dispatch;
use crate::error::RuntimeError;
use crate::function::{registry, Function, FunctionIr, UnitIr};
use crate::node::{CallDispatcher, Node, NodeKind};
use crate::value::{Closure, Value};

/// Internal non-local exits of the tree walker.
enum Unwind {
    /// A `return` travelling to the function boundary.
    Return(Value),
    /// A runtime error travelling to the outermost invocation.
    Error(RuntimeError),
}

impl From<RuntimeError> for Unwind {
    fn from(err: RuntimeError) -> Self {
        Unwind::Error(err)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Profiling,
    Plain,
}

/// The recording tree walker: the initial execution tier.
pub struct ProfilingInterpreter;

impl ProfilingInterpreter {
    /// Execute one call, recording profiles, and schedule compilation of
    /// the enclosing unit once this function's invocation count crosses
    /// the threshold.
    pub fn interpret(function: &Arc<Function>, args: &[Value]) -> Result<Value, RuntimeError> {
        let ir = function.unit_ir();
        let member = &ir.functions[function.member_index()];
        function.profile().record_invocation();
        for (param, value) in member.all_params().zip(args.iter()) {
            ir.var(param).profile().record(value);
        }
        let result = run(&ir, member, args, Mode::Profiling)?;
        if function.profile().invocation_count() > compiler::PROFILING_TARGET {
            compiler::schedule_compilation(&registry().get(function.top()))?;
        }
        Ok(result)
    }
}

/// The non-recording tree walker: the call target while compiling.
pub struct Interpreter;

impl Interpreter {
    /// Execute one call with no profiling.
    pub fn interpret(function: &Arc<Function>, args: &[Value]) -> Result<Value, RuntimeError> {
        let ir = function.unit_ir();
        let member = &ir.functions[function.member_index()];
        run(&ir, member, args, Mode::Plain)
    }
}

fn run(ir: &UnitIr, member: &FunctionIr, args: &[Value], mode: Mode) -> Result<Value, RuntimeError> {
    if args.len() != member.implementation_arity() {
        return Err(RuntimeError::arity_mismatch(
            member.implementation_arity(),
            args.len(),
        ));
    }
    let mut frame = vec![Value::Nil; member.frame_size.max(args.len())];
    frame[..args.len()].clone_from_slice(args);
    match eval(ir, &mut frame, &member.body, mode) {
        Ok(value) | Err(Unwind::Return(value)) => Ok(value),
        Err(Unwind::Error(err)) => Err(err),
    }
}

fn eval(ir: &UnitIr, frame: &mut [Value], node: &Node, mode: Mode) -> Result<Value, Unwind> {
    match &node.kind {
        NodeKind::Constant(value) => Ok(value.clone()),
        NodeKind::GetVar(variable) => {
            let var = ir.var(*variable);
            let value = frame[var.index()].clone();
            if mode == Mode::Profiling {
                var.profile().record(&value);
            }
            Ok(value)
        }
        NodeKind::SetVar { variable, value } => {
            let new_value = eval(ir, frame, value, mode)?;
            let var = ir.var(*variable);
            if mode == Mode::Profiling {
                var.profile().record(&new_value);
            }
            frame[var.index()] = new_value.clone();
            Ok(new_value)
        }
        NodeKind::Let {
            variable,
            initializer,
            body,
        } => {
            let initial = eval(ir, frame, initializer, mode)?;
            let var = ir.var(*variable);
            if mode == Mode::Profiling {
                var.profile().record(&initial);
            }
            frame[var.index()] = initial;
            eval(ir, frame, body, mode)
        }
        NodeKind::If {
            condition,
            true_branch,
            false_branch,
            counters,
        } => {
            let test = eval(ir, frame, condition, mode)?;
            let taken = match test {
                Value::Bool(b) => b,
                other => {
                    return Err(RuntimeError::new(format!(
                        "if() condition is not a boolean: {}",
                        other
                    ))
                    .into())
                }
            };
            if mode == Mode::Profiling {
                counters.record(taken);
            }
            if taken {
                eval(ir, frame, true_branch, mode)
            } else {
                eval(ir, frame, false_branch, mode)
            }
        }
        NodeKind::While { condition, body } => {
            loop {
                let test = eval(ir, frame, condition, mode)?;
                let proceed = match test {
                    Value::Bool(b) => b,
                    other => {
                        return Err(RuntimeError::new(format!(
                            "while() condition is not a boolean: {}",
                            other
                        ))
                        .into())
                    }
                };
                if !proceed {
                    break;
                }
                eval(ir, frame, body, mode)?;
            }
            Ok(Value::Nil)
        }
        NodeKind::Block(expressions) => {
            let mut result = Value::Nil;
            for each in expressions {
                result = eval(ir, frame, each, mode)?;
            }
            Ok(result)
        }
        NodeKind::Return(value) => {
            let result = eval(ir, frame, value, mode)?;
            Err(Unwind::Return(result))
        }
        NodeKind::Call {
            dispatcher,
            args,
            profile,
        } => {
            let callee = match dispatcher {
                CallDispatcher::Direct(_) => None,
                CallDispatcher::Expression(expr) => Some(eval(ir, frame, expr, mode)?),
            };
            let mut arg_values = Vec::with_capacity(args.len());
            for each in args {
                arg_values.push(eval(ir, frame, each, mode)?);
            }
            let result = match dispatcher {
                CallDispatcher::Direct(target) => dispatch::call_function(*target, &arg_values)?,
                CallDispatcher::Expression(_) => {
                    let callee = callee.expect("dynamic callee was not evaluated");
                    dispatch::call_value(&callee, &arg_values)?
                }
            };
            if mode == Mode::Profiling {
                profile.record(&result);
            }
            Ok(result)
        }
        NodeKind::Primitive1 {
            primitive,
            argument,
        } => {
            let value = eval(ir, frame, argument, mode)?;
            Ok(primitive.apply(value)?)
        }
        NodeKind::Primitive2 {
            primitive,
            argument1,
            argument2,
        } => {
            let value1 = eval(ir, frame, argument1, mode)?;
            let value2 = eval(ir, frame, argument2, mode)?;
            Ok(primitive.apply(value1, value2)?)
        }
        NodeKind::Closure {
            function,
            captured_indices,
            ..
        } => {
            let captured: Vec<Value> = captured_indices
                .iter()
                .map(|index| frame[*index].clone())
                .collect();
            Ok(Value::Closure(Arc::new(Closure::new(*function, captured))))
        }
        NodeKind::FreeFunctionRef(function) => {
            Ok(Value::Closure(Arc::new(Closure::new(*function, Vec::new()))))
        }
    }
}
