//! The surface expression language and its builder helpers.
//!
//! Definitions are built programmatically: an [`Expr`] tree assembled with
//! the constructor functions below and handed to the translator through a
//! [`crate::library::Library`]. Names are resolved lexically by the
//! translator; a free-function placeholder stands in for a definition's
//! own name, which is how direct recursion is expressed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::primitives::{self, Primitive1, Primitive2};
use crate::value::Value;

/// A surface expression.
#[derive(Debug, Clone)]
pub enum Expr {
    Const(Value),
    Var(String),
    Set(String, Box<Expr>),
    Let {
        name: String,
        init: Box<Expr>,
        body: Box<Expr>,
    },
    If(Box<Expr>, Box<Expr>, Box<Expr>),
    While(Box<Expr>, Box<Expr>),
    Block(Vec<Expr>),
    Return(Box<Expr>),
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Prim1(Arc<dyn Primitive1>, Box<Expr>),
    Prim2(Arc<dyn Primitive2>, Box<Expr>, Box<Expr>),
    Lambda {
        params: Vec<String>,
        body: Box<Expr>,
    },
    /// A reference to a named top-level function (or the definition being
    /// built, when used as the self-reference placeholder).
    FreeFunction(String),
    /// A call target naming a top-level function to be called directly,
    /// without evaluating a closure value.
    Direct(Box<Expr>),
}

/// A constant.
pub fn const_(value: impl Into<Value>) -> Expr {
    Expr::Const(value.into())
}

/// A variable reference.
pub fn var(name: &str) -> Expr {
    Expr::Var(name.to_string())
}

/// An assignment to a variable in scope.
pub fn set(name: &str, value: Expr) -> Expr {
    Expr::Set(name.to_string(), Box::new(value))
}

/// A let binding scoped to `body`.
pub fn let_(name: &str, init: Expr, body: Expr) -> Expr {
    Expr::Let {
        name: name.to_string(),
        init: Box::new(init),
        body: Box::new(body),
    }
}

static NEXT_TEMP: AtomicU64 = AtomicU64::new(0);

/// Bind the value of `init` to a fresh temporary and hand the reference to
/// the body builder.
pub fn bind(init: Expr, body: impl FnOnce(Expr) -> Expr) -> Expr {
    let name = format!("t{}", NEXT_TEMP.fetch_add(1, Ordering::Relaxed));
    let reference = var(&name);
    let_(&name, init, body(reference))
}

/// A two-armed conditional.
pub fn if_(condition: Expr, when_true: Expr, when_false: Expr) -> Expr {
    Expr::If(
        Box::new(condition),
        Box::new(when_true),
        Box::new(when_false),
    )
}

/// A while loop.
pub fn while_(condition: Expr, body: Expr) -> Expr {
    Expr::While(Box::new(condition), Box::new(body))
}

/// A sequence evaluating to its last expression.
pub fn block(expressions: Vec<Expr>) -> Expr {
    Expr::Block(expressions)
}

/// An early return from the enclosing function.
pub fn ret(value: Expr) -> Expr {
    Expr::Return(Box::new(value))
}

/// A call. Arities 0 through 2 are supported.
pub fn call(callee: Expr, args: Vec<Expr>) -> Expr {
    Expr::Call {
        callee: Box::new(callee),
        args,
    }
}

/// Mark a callee for direct dispatch by function id. The callee must be a
/// free-function reference.
pub fn direct(callee: Expr) -> Expr {
    Expr::Direct(Box::new(callee))
}

/// A lambda.
pub fn lambda(params: &[&str], body: Expr) -> Expr {
    Expr::Lambda {
        params: params.iter().map(|name| name.to_string()).collect(),
        body: Box::new(body),
    }
}

pub fn add(a: Expr, b: Expr) -> Expr {
    Expr::Prim2(primitives::add(), Box::new(a), Box::new(b))
}

pub fn sub(a: Expr, b: Expr) -> Expr {
    Expr::Prim2(primitives::sub(), Box::new(a), Box::new(b))
}

pub fn mul(a: Expr, b: Expr) -> Expr {
    Expr::Prim2(primitives::mul(), Box::new(a), Box::new(b))
}

pub fn less_than(a: Expr, b: Expr) -> Expr {
    Expr::Prim2(primitives::less_than(), Box::new(a), Box::new(b))
}

pub fn greater_than(a: Expr, b: Expr) -> Expr {
    Expr::Prim2(primitives::greater_than(), Box::new(a), Box::new(b))
}

pub fn int_eq(a: Expr, b: Expr) -> Expr {
    Expr::Prim2(primitives::int_eq(), Box::new(a), Box::new(b))
}

pub fn negate(a: Expr) -> Expr {
    Expr::Prim1(primitives::negate(), Box::new(a))
}

pub fn not_(a: Expr) -> Expr {
    Expr::Prim1(primitives::not(), Box::new(a))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_generates_fresh_names() {
        let first = bind(const_(1), |t| t);
        let second = bind(const_(2), |t| t);
        let name = |expr: &Expr| match expr {
            Expr::Let { name, .. } => name.clone(),
            _ => unreachable!(),
        };
        assert_ne!(name(&first), name(&second));
    }

    #[test]
    fn test_bind_passes_the_reference_through() {
        let expr = bind(const_(1), |t| add(t.clone(), t));
        match expr {
            Expr::Let { name, body, .. } => match *body {
                Expr::Prim2(_, a, _) => match *a {
                    Expr::Var(var_name) => assert_eq!(var_name, name),
                    _ => unreachable!(),
                },
                _ => unreachable!(),
            },
            _ => unreachable!(),
        }
    }
}
