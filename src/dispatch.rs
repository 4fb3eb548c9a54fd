//! The dynamic dispatch machinery.
//!
//! Every invocation of a function, from any tier, enters through the
//! function's mutable call target: first the profiling interpreter, then
//! the plain interpreter while the unit compiles, and finally the compiled
//! forms. When a specialization exists, the call is routed through the
//! specialization guard: the specialized entry runs iff every
//! specialized-typed argument is of its declared kind, and a square-peg
//! signal escaping it is converted into exactly one retry through the
//! generic entry with the original argument list.
//!
//! Compiled call sites carry their static signature; when it equals the
//! callee's specialization signature the site bypasses the guard and
//! enters the specialized form directly, otherwise it goes through the
//! mutable target like everybody else.

use smallvec::SmallVec;

use crate::code::CallSite;
use crate::error::RuntimeError;
use crate::function::{registry, CallTarget, CompiledForms, FunctionId};
use crate::interpreter::{Interpreter, ProfilingInterpreter};
use crate::machine::{self, Abort};
use crate::types::ValueKind;
use crate::value::{Closure, Value};

/// Invoke a function through its mutable call target. `args` are the full
/// implementation arguments: captured values first, declared ones after.
pub fn call_function(function: FunctionId, args: &[Value]) -> Result<Value, RuntimeError> {
    let function = registry().get(function);
    match function.target() {
        CallTarget::ProfilingInterpreter => ProfilingInterpreter::interpret(&function, args),
        CallTarget::PlainInterpreter => Interpreter::interpret(&function, args),
        CallTarget::Compiled(forms) => run_compiled(&forms, args),
    }
}

/// Invoke a callee value: it must be a closure.
pub fn call_value(callee: &Value, args: &[Value]) -> Result<Value, RuntimeError> {
    call_closure(callee.as_closure()?, args)
}

/// Invoke a closure with declared arguments, prepending its captured
/// values.
pub fn call_closure(closure: &Closure, args: &[Value]) -> Result<Value, RuntimeError> {
    let function = registry().get(closure.function());
    if args.len() != function.declared_arity() {
        return Err(RuntimeError::arity_mismatch(function.declared_arity(), args.len()));
    }
    if closure.captured().is_empty() {
        return call_function(closure.function(), args);
    }
    let mut full: SmallVec<[Value; 4]> = SmallVec::with_capacity(closure.captured().len() + args.len());
    full.extend(closure.captured().iter().cloned());
    full.extend(args.iter().cloned());
    call_function(closure.function(), &full)
}

/// Invoke a direct callee from a compiled call site. The dispatcher
/// answers with the specialized entry when the site's static signature
/// matches the callee's specialization exactly, and with the guarded
/// mutable-target pipeline otherwise.
pub fn call_from_site(
    function: FunctionId,
    site: &CallSite,
    args: &[Value],
) -> Result<Value, RuntimeError> {
    let function = registry().get(function);
    match function.target() {
        CallTarget::ProfilingInterpreter => ProfilingInterpreter::interpret(&function, args),
        CallTarget::PlainInterpreter => Interpreter::interpret(&function, args),
        CallTarget::Compiled(forms) => {
            if let Some(spec) = &forms.specialized {
                if spec.matches_signature(&site.arg_kinds, site.result_kind) {
                    return match machine::run(&spec.code, args) {
                        Ok(value) => Ok(value),
                        Err(Abort::SquarePeg(_)) => run_generic(&forms, args),
                        Err(Abort::Error(err)) => Err(err),
                    };
                }
            }
            run_compiled(&forms, args)
        }
    }
}

/// The specialization guard over a function's compiled forms.
fn run_compiled(forms: &CompiledForms, args: &[Value]) -> Result<Value, RuntimeError> {
    if let Some(spec) = &forms.specialized {
        if guard_admits(&spec.param_kinds, args) {
            return match machine::run(&spec.code, args) {
                Ok(value) => Ok(value),
                Err(Abort::SquarePeg(_)) => run_generic(forms, args),
                Err(Abort::Error(err)) => Err(err),
            };
        }
    }
    run_generic(forms, args)
}

fn run_generic(forms: &CompiledForms, args: &[Value]) -> Result<Value, RuntimeError> {
    match machine::run(&forms.generic, args) {
        Ok(value) => Ok(value),
        Err(Abort::Error(err)) => Err(err),
        // Generic code contains no checked instructions.
        Err(Abort::SquarePeg(value)) => Err(RuntimeError::new(format!(
            "square peg escaped generic code: {}",
            value
        ))),
    }
}

/// Whether the guard admits these arguments into the specialized entry:
/// every non-`Ref` parameter slot must hold an argument of exactly its
/// declared kind.
pub fn guard_admits(param_kinds: &[ValueKind], args: &[Value]) -> bool {
    param_kinds.len() == args.len()
        && param_kinds
            .iter()
            .zip(args.iter())
            .all(|(kind, value)| value.is_of_kind(*kind))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_admits_matching_kinds() {
        assert!(guard_admits(&[ValueKind::Int], &[Value::Int(1)]));
        assert!(guard_admits(
            &[ValueKind::Int, ValueKind::Ref],
            &[Value::Int(1), Value::str("x")]
        ));
    }

    #[test]
    fn test_guard_rejects_mismatched_kind() {
        assert!(!guard_admits(&[ValueKind::Int], &[Value::str("1")]));
        assert!(!guard_admits(&[ValueKind::Bool], &[Value::Int(0)]));
    }

    #[test]
    fn test_guard_ref_slot_admits_anything() {
        assert!(guard_admits(&[ValueKind::Ref], &[Value::Int(1)]));
        assert!(guard_admits(&[ValueKind::Ref], &[Value::Bool(true)]));
        assert!(guard_admits(&[ValueKind::Ref], &[Value::Nil]));
    }

    #[test]
    fn test_guard_checks_arity() {
        assert!(!guard_admits(&[ValueKind::Int], &[]));
        assert!(!guard_admits(&[], &[Value::Int(1)]));
        assert!(guard_admits(&[], &[]));
    }

    #[test]
    fn test_call_value_rejects_non_callable() {
        let err = call_value(&Value::Int(3), &[]).unwrap_err();
        assert!(err.message().contains("not a callable"));
    }
}
