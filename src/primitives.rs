//! The primitive contract and the standard primitives.
//!
//! A primitive declares its arity through the trait it implements, an
//! inference rule over argument types, an interpretation over values, and a
//! per-argument-kind code emission. Boolean-valued binary primitives may
//! additionally offer a fused compare-and-branch form for `if` conditions,
//! yielding the branch operation that jumps to the false side.

use std::fmt;
use std::sync::Arc;

use crate::code::{CodeWriter, CompareOp, Instr};
use crate::error::RuntimeError;
use crate::types::{ExpressionType, ValueKind};
use crate::value::Value;

/// A unary primitive operation.
pub trait Primitive1: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// The inference rule: result type from the argument's inferred type.
    fn inferred_type(&self, argument: ExpressionType) -> ExpressionType;

    /// The interpretation.
    fn apply(&self, argument: Value) -> Result<Value, RuntimeError>;

    /// Emit code for an argument of the given static kind (the argument is
    /// already on the stack) and return the produced kind, or `None` to ask
    /// the generator for the generic application of this primitive.
    fn emit(&self, writer: &mut CodeWriter, argument_kind: ValueKind) -> Option<ValueKind> {
        let _ = (writer, argument_kind);
        None
    }
}

/// A binary primitive operation.
pub trait Primitive2: fmt::Debug + Send + Sync {
    fn name(&self) -> &'static str;

    /// The inference rule: result type from the arguments' inferred types.
    fn inferred_type(
        &self,
        argument1: ExpressionType,
        argument2: ExpressionType,
    ) -> ExpressionType;

    /// The interpretation.
    fn apply(&self, argument1: Value, argument2: Value) -> Result<Value, RuntimeError>;

    /// Emit code for arguments of the given static kinds (both already on
    /// the stack, left one deeper) and return the produced kind, or `None`
    /// to ask the generator for the generic application.
    fn emit(
        &self,
        writer: &mut CodeWriter,
        argument_kinds: (ValueKind, ValueKind),
    ) -> Option<ValueKind> {
        let _ = (writer, argument_kinds);
        None
    }

    /// For a boolean-valued primitive used as an `if` condition: the
    /// compare-and-branch operation usable for the given argument kinds.
    /// The emitted instruction branches to the false side when the
    /// comparison fails.
    fn fused_branch(&self, argument_kinds: (ValueKind, ValueKind)) -> Option<CompareOp> {
        let _ = argument_kinds;
        None
    }
}

fn int_argument(primitive: &'static str, value: Value) -> Result<i64, RuntimeError> {
    match value {
        Value::Int(n) => Ok(n),
        other => Err(RuntimeError::new(format!(
            "{} expects an integer, got {}",
            primitive, other
        ))),
    }
}

fn bool_argument(primitive: &'static str, value: Value) -> Result<bool, RuntimeError> {
    match value {
        Value::Bool(b) => Ok(b),
        other => Err(RuntimeError::new(format!(
            "{} expects a boolean, got {}",
            primitive, other
        ))),
    }
}

macro_rules! int_binary_primitive {
    ($type_name:ident, $name:literal, $op:tt, $instr:expr) => {
        #[derive(Debug)]
        pub struct $type_name;

        impl Primitive2 for $type_name {
            fn name(&self) -> &'static str {
                $name
            }

            fn inferred_type(&self, _: ExpressionType, _: ExpressionType) -> ExpressionType {
                ExpressionType::Known(ValueKind::Int)
            }

            fn apply(&self, a: Value, b: Value) -> Result<Value, RuntimeError> {
                let a = int_argument($name, a)?;
                let b = int_argument($name, b)?;
                Ok(Value::Int(a $op b))
            }

            fn emit(
                &self,
                writer: &mut CodeWriter,
                argument_kinds: (ValueKind, ValueKind),
            ) -> Option<ValueKind> {
                if argument_kinds == (ValueKind::Int, ValueKind::Int) {
                    writer.write($instr);
                    Some(ValueKind::Int)
                } else {
                    None
                }
            }
        }
    };
}

int_binary_primitive!(Add, "+", +, Instr::AddInt);
int_binary_primitive!(Sub, "-", -, Instr::SubInt);
int_binary_primitive!(Mul, "*", *, Instr::MulInt);

macro_rules! int_compare_primitive {
    ($type_name:ident, $name:literal, $op:tt, $compare:expr) => {
        #[derive(Debug)]
        pub struct $type_name;

        impl Primitive2 for $type_name {
            fn name(&self) -> &'static str {
                $name
            }

            fn inferred_type(&self, _: ExpressionType, _: ExpressionType) -> ExpressionType {
                ExpressionType::Known(ValueKind::Bool)
            }

            fn apply(&self, a: Value, b: Value) -> Result<Value, RuntimeError> {
                let a = int_argument($name, a)?;
                let b = int_argument($name, b)?;
                Ok(Value::Bool(a $op b))
            }

            fn emit(
                &self,
                writer: &mut CodeWriter,
                argument_kinds: (ValueKind, ValueKind),
            ) -> Option<ValueKind> {
                if argument_kinds == (ValueKind::Int, ValueKind::Int) {
                    writer.write(Instr::CmpInt($compare));
                    Some(ValueKind::Bool)
                } else {
                    None
                }
            }

            fn fused_branch(
                &self,
                argument_kinds: (ValueKind, ValueKind),
            ) -> Option<CompareOp> {
                if argument_kinds == (ValueKind::Int, ValueKind::Int) {
                    Some($compare)
                } else {
                    None
                }
            }
        }
    };
}

int_compare_primitive!(LessThan, "<", <, CompareOp::Lt);
int_compare_primitive!(GreaterThan, ">", >, CompareOp::Gt);
int_compare_primitive!(IntEq, "=", ==, CompareOp::Eq);

/// Integer negation.
#[derive(Debug)]
pub struct Negate;

impl Primitive1 for Negate {
    fn name(&self) -> &'static str {
        "neg"
    }

    fn inferred_type(&self, _: ExpressionType) -> ExpressionType {
        ExpressionType::Known(ValueKind::Int)
    }

    fn apply(&self, argument: Value) -> Result<Value, RuntimeError> {
        Ok(Value::Int(-int_argument("neg", argument)?))
    }

    fn emit(&self, writer: &mut CodeWriter, argument_kind: ValueKind) -> Option<ValueKind> {
        if argument_kind == ValueKind::Int {
            writer.write(Instr::NegInt);
            Some(ValueKind::Int)
        } else {
            None
        }
    }
}

/// Boolean negation.
#[derive(Debug)]
pub struct Not;

impl Primitive1 for Not {
    fn name(&self) -> &'static str {
        "not"
    }

    fn inferred_type(&self, _: ExpressionType) -> ExpressionType {
        ExpressionType::Known(ValueKind::Bool)
    }

    fn apply(&self, argument: Value) -> Result<Value, RuntimeError> {
        Ok(Value::Bool(!bool_argument("not", argument)?))
    }

    fn emit(&self, writer: &mut CodeWriter, argument_kind: ValueKind) -> Option<ValueKind> {
        if argument_kind == ValueKind::Bool {
            writer.write(Instr::NotBool);
            Some(ValueKind::Bool)
        } else {
            None
        }
    }
}

pub fn add() -> Arc<dyn Primitive2> {
    Arc::new(Add)
}

pub fn sub() -> Arc<dyn Primitive2> {
    Arc::new(Sub)
}

pub fn mul() -> Arc<dyn Primitive2> {
    Arc::new(Mul)
}

pub fn less_than() -> Arc<dyn Primitive2> {
    Arc::new(LessThan)
}

pub fn greater_than() -> Arc<dyn Primitive2> {
    Arc::new(GreaterThan)
}

pub fn int_eq() -> Arc<dyn Primitive2> {
    Arc::new(IntEq)
}

pub fn negate() -> Arc<dyn Primitive1> {
    Arc::new(Negate)
}

pub fn not() -> Arc<dyn Primitive1> {
    Arc::new(Not)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ExpressionType::{Known, Unknown};

    #[test]
    fn test_add_applies_to_integers() {
        assert_eq!(Add.apply(Value::Int(2), Value::Int(3)).unwrap(), Value::Int(5));
    }

    #[test]
    fn test_add_rejects_non_integers() {
        let err = Add.apply(Value::Int(2), Value::str("3")).unwrap_err();
        assert!(err.message().contains("+ expects an integer"));
    }

    #[test]
    fn test_arithmetic_inference_is_int() {
        assert_eq!(
            Add.inferred_type(Unknown, Unknown),
            Known(ValueKind::Int)
        );
        assert_eq!(
            Sub.inferred_type(Known(ValueKind::Ref), Known(ValueKind::Int)),
            Known(ValueKind::Int)
        );
    }

    #[test]
    fn test_comparison_inference_is_bool() {
        assert_eq!(
            LessThan.inferred_type(Unknown, Unknown),
            Known(ValueKind::Bool)
        );
    }

    #[test]
    fn test_less_than_applies() {
        assert_eq!(
            LessThan.apply(Value::Int(1), Value::Int(2)).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            LessThan.apply(Value::Int(2), Value::Int(2)).unwrap(),
            Value::Bool(false)
        );
    }

    #[test]
    fn test_fused_branch_only_for_int_arguments() {
        assert_eq!(
            LessThan.fused_branch((ValueKind::Int, ValueKind::Int)),
            Some(CompareOp::Lt)
        );
        assert_eq!(
            LessThan.fused_branch((ValueKind::Ref, ValueKind::Int)),
            None
        );
        assert_eq!(Add.fused_branch((ValueKind::Int, ValueKind::Int)), None);
    }

    #[test]
    fn test_specialized_emission_only_for_int_arguments() {
        let mut writer = CodeWriter::new();
        assert_eq!(
            Add.emit(&mut writer, (ValueKind::Int, ValueKind::Int)),
            Some(ValueKind::Int)
        );
        assert_eq!(Add.emit(&mut writer, (ValueKind::Ref, ValueKind::Int)), None);
    }

    #[test]
    fn test_negate() {
        assert_eq!(Negate.apply(Value::Int(5)).unwrap(), Value::Int(-5));
        assert!(Negate.apply(Value::Bool(true)).is_err());
    }

    #[test]
    fn test_not() {
        assert_eq!(Not.apply(Value::Bool(true)).unwrap(), Value::Bool(false));
        assert!(Not.apply(Value::Int(0)).is_err());
    }
}
