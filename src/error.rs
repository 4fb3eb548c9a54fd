//! Typed errors for the runtime.
//!
//! Two failure kinds cross the crate boundary: `CompilerError` for problems
//! detected while translating or compiling a function, and `RuntimeError`
//! for problems detected while executing one. Specialized code additionally
//! unwinds with an internal square-peg signal; that signal never escapes
//! the dispatch machinery and is defined alongside it, not here.

use std::error::Error as StdError;
use std::fmt;

/// An error detected while translating, analyzing, or compiling a function.
///
/// Compiler errors surface to whoever defined or (indirectly) compiled the
/// function. They are never raised by plain execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerError {
    message: String,
}

impl CompilerError {
    pub fn new(message: impl Into<String>) -> Self {
        CompilerError {
            message: message.into(),
        }
    }

    /// The descriptive message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for CompilerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "compile error: {}", self.message)
    }
}

impl StdError for CompilerError {}

/// An error detected while executing a function, in any execution tier.
///
/// This is the only user-visible failure kind of the runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    message: String,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>) -> Self {
        RuntimeError {
            message: message.into(),
        }
    }

    /// A type mismatch at a primitive or another kind-sensitive site.
    pub fn type_mismatch(expected: &str, got: impl fmt::Display) -> Self {
        RuntimeError::new(format!("expected {}, got {}", expected, got))
    }

    /// A call applied to a value that is not callable.
    pub fn not_a_callable(got: impl fmt::Display) -> Self {
        RuntimeError::new(format!("not a callable: {}", got))
    }

    /// A call with an arity the callee does not accept.
    pub fn arity_mismatch(expected: usize, got: usize) -> Self {
        RuntimeError::new(format!(
            "expected {} argument{}, got {}",
            expected,
            if expected == 1 { "" } else { "s" },
            got
        ))
    }

    /// The descriptive message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "runtime error: {}", self.message)
    }
}

impl StdError for RuntimeError {}

impl From<CompilerError> for RuntimeError {
    fn from(err: CompilerError) -> Self {
        RuntimeError::new(err.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compiler_error_display() {
        let err = CompilerError::new("referenced variable is not in scope: x");
        assert_eq!(
            err.to_string(),
            "compile error: referenced variable is not in scope: x"
        );
    }

    #[test]
    fn test_runtime_error_type_mismatch() {
        let err = RuntimeError::type_mismatch("integer", "\"foo\"");
        assert_eq!(err.message(), "expected integer, got \"foo\"");
    }

    #[test]
    fn test_runtime_error_arity_singular() {
        let err = RuntimeError::arity_mismatch(1, 3);
        assert_eq!(err.message(), "expected 1 argument, got 3");
    }

    #[test]
    fn test_runtime_error_arity_plural() {
        let err = RuntimeError::arity_mismatch(2, 0);
        assert_eq!(err.message(), "expected 2 arguments, got 0");
    }

    #[test]
    fn test_compiler_error_converts_to_runtime_error() {
        let err: RuntimeError = CompilerError::new("bad unit").into();
        assert_eq!(err.message(), "bad unit");
    }

    #[test]
    fn test_errors_are_std_errors() {
        let boxed: Box<dyn StdError> = Box::new(RuntimeError::new("boom"));
        assert_eq!(boxed.to_string(), "runtime error: boom");
    }
}
