//! Executor for compiled code.
//!
//! Runs a [`CodeBlock`] over an operand stack and a frame of value slots.
//! Execution either produces a value, fails with a runtime error, or, in
//! specialized code only, aborts with the square-peg signal carrying the
//! value that did not fit its statically chosen kind. The signal is
//! converted into a generic retry by the dispatch layer; it never crosses
//! a call boundary.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::code::{CallTargetDesc, CodeBlock, Instr};
use crate::dispatch;
use crate::error::RuntimeError;
use crate::types::ValueKind;
use crate::value::{Closure, Value};

/// Why a compiled frame stopped without producing a value.
#[derive(Debug)]
pub enum Abort {
    /// A value escaped its statically chosen kind at a checked site.
    SquarePeg(Value),
    /// An ordinary runtime error.
    Error(RuntimeError),
}

impl From<RuntimeError> for Abort {
    fn from(err: RuntimeError) -> Self {
        Abort::Error(err)
    }
}

pub type Exec<T> = Result<T, Abort>;

/// Execute a compiled form with the given implementation arguments.
pub fn run(code: &CodeBlock, args: &[Value]) -> Exec<Value> {
    if args.len() != code.arity {
        return Err(RuntimeError::arity_mismatch(code.arity, args.len()).into());
    }
    let mut frame: Vec<Value> = vec![Value::Nil; code.frame_size.max(args.len())];
    frame[..args.len()].clone_from_slice(args);
    let mut stack: Vec<Value> = Vec::new();
    let mut pc = 0usize;

    while let Some(instr) = code.instructions.get(pc) {
        match instr {
            Instr::Const(value) => stack.push(value.clone()),
            Instr::LoadLocal(index) => stack.push(frame[*index].clone()),
            Instr::StoreLocal(index) => {
                frame[*index] = pop(&mut stack)?;
            }
            Instr::StoreLocalChecked { index, kind } => {
                let value = pop(&mut stack)?;
                if !value.is_of_kind(*kind) {
                    return Err(Abort::SquarePeg(value));
                }
                frame[*index] = value;
            }
            Instr::Dup => {
                let top = peek(&stack)?.clone();
                stack.push(top);
            }
            Instr::Pop => {
                pop(&mut stack)?;
            }
            Instr::Jump(target) => {
                pc = *target;
                continue;
            }
            Instr::BranchIfFalse(target) => {
                let test = pop(&mut stack)?;
                match test {
                    Value::Bool(true) => {}
                    Value::Bool(false) => {
                        pc = *target;
                        continue;
                    }
                    other => {
                        return Err(RuntimeError::new(format!(
                            "condition is not a boolean: {}",
                            other
                        ))
                        .into())
                    }
                }
            }
            Instr::BranchUnless { op, target } => {
                let rhs = pop(&mut stack)?.as_int()?;
                let lhs = pop(&mut stack)?.as_int()?;
                if !op.eval(lhs, rhs) {
                    pc = *target;
                    continue;
                }
            }
            Instr::AddInt => {
                let rhs = pop(&mut stack)?.as_int()?;
                let lhs = pop(&mut stack)?.as_int()?;
                stack.push(Value::Int(lhs + rhs));
            }
            Instr::SubInt => {
                let rhs = pop(&mut stack)?.as_int()?;
                let lhs = pop(&mut stack)?.as_int()?;
                stack.push(Value::Int(lhs - rhs));
            }
            Instr::MulInt => {
                let rhs = pop(&mut stack)?.as_int()?;
                let lhs = pop(&mut stack)?.as_int()?;
                stack.push(Value::Int(lhs * rhs));
            }
            Instr::NegInt => {
                let value = pop(&mut stack)?.as_int()?;
                stack.push(Value::Int(-value));
            }
            Instr::CmpInt(op) => {
                let rhs = pop(&mut stack)?.as_int()?;
                let lhs = pop(&mut stack)?.as_int()?;
                stack.push(Value::Bool(op.eval(lhs, rhs)));
            }
            Instr::NotBool => {
                let value = pop(&mut stack)?.as_bool()?;
                stack.push(Value::Bool(!value));
            }
            Instr::Primitive1(primitive) => {
                let argument = pop(&mut stack)?;
                stack.push(primitive.apply(argument)?);
            }
            Instr::Primitive2(primitive) => {
                let argument2 = pop(&mut stack)?;
                let argument1 = pop(&mut stack)?;
                stack.push(primitive.apply(argument1, argument2)?);
            }
            Instr::Call(site) => {
                let count = site.arg_kinds.len();
                let mut args: SmallVec<[Value; 2]> = SmallVec::with_capacity(count);
                for _ in 0..count {
                    args.push(pop(&mut stack)?);
                }
                args.reverse();
                let result = match &site.target {
                    CallTargetDesc::Direct(function) => {
                        dispatch::call_from_site(*function, site, &args)?
                    }
                    CallTargetDesc::Dynamic => {
                        let callee = pop(&mut stack)?;
                        dispatch::call_value(&callee, &args)?
                    }
                };
                if site.result_kind != ValueKind::Ref && !result.is_of_kind(site.result_kind) {
                    return Err(Abort::SquarePeg(result));
                }
                stack.push(result);
            }
            Instr::MakeClosure {
                function,
                capture_indices,
            } => {
                let captured: Vec<Value> = capture_indices
                    .iter()
                    .map(|index| frame[*index].clone())
                    .collect();
                stack.push(Value::Closure(Arc::new(Closure::new(*function, captured))));
            }
            Instr::Return => return Ok(pop(&mut stack)?),
            Instr::ReturnChecked(kind) => {
                let value = pop(&mut stack)?;
                if value.is_of_kind(*kind) {
                    return Ok(value);
                }
                return Err(Abort::SquarePeg(value));
            }
        }
        pc += 1;
    }
    Err(RuntimeError::new("compiled code ended without a return").into())
}

fn pop(stack: &mut Vec<Value>) -> Result<Value, RuntimeError> {
    stack
        .pop()
        .ok_or_else(|| RuntimeError::new("compiled code underflowed its operand stack"))
}

fn peek(stack: &[Value]) -> Result<&Value, RuntimeError> {
    stack
        .last()
        .ok_or_else(|| RuntimeError::new("compiled code underflowed its operand stack"))
}
