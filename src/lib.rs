//! # Taper: an adaptive three-tier expression-language runtime
//!
//! Taper executes a small Lisp-like expression language through three
//! execution forms sharing one entry point per function: a profiling
//! tree-walking interpreter, a plain tree-walking interpreter, and
//! compiled code produced by a type-specializing compiler.
//!
//! ## Quick start
//!
//! ```
//! use taper::expression::{add, const_, lambda, var};
//! use taper::{Library, Value};
//!
//! let mut library = Library::new();
//! let inc = library
//!     .define("inc", |_| lambda(&["n"], add(var("n"), const_(1))))
//!     .unwrap();
//! assert_eq!(inc.invoke1(41).unwrap(), Value::Int(42));
//! ```
//!
//! ## Architecture
//!
//! A definition flows through several stages:
//!
//! 1. **Builder**: assemble a surface [`expression::Expr`] tree
//! 2. **Translator**: resolve names, build the evaluator-node tree, run
//!    the analyzer (scope validation, closure conversion, indexing)
//! 3. **Profiling interpreter**: execute and record value profiles,
//!    branch counters, and invocation counts
//! 4. **Compiler**: past the invocation threshold, infer and observe
//!    types over the whole compilation unit and emit a generic form plus,
//!    when profiles justify it, a type-specialized form
//! 5. **Dispatch**: retarget the function's mutable call target; a
//!    specialization guard routes each call, and specialized code that
//!    meets a value outside its type assumptions aborts to the generic
//!    form through the square-peg signal
//!
//! Specialization is driven entirely by observed behavior, so code that
//! later violates its profile still computes the right answer; it only
//! pays the generic price for it.

pub mod analysis;
pub mod code;
pub mod codegen;
pub mod compiler;
pub mod dispatch;
pub mod error;
pub mod expression;
pub mod function;
pub mod inference;
pub mod interpreter;
pub mod library;
pub mod machine;
pub mod node;
pub mod observer;
pub mod primitives;
pub mod translator;
pub mod types;
pub mod value;
pub mod variables;

pub use error::{CompilerError, RuntimeError};
pub use expression::Expr;
pub use function::{CompilationState, Function, FunctionId};
pub use library::{Library, UserFunction};
pub use types::{ExpressionType, ValueKind};
pub use value::{Closure, Value};
