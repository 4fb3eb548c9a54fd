//! Named top-level definitions.
//!
//! A [`Library`] holds named lambda definitions. Defining a function hands
//! the builder a self-reference placeholder, so a definition can call
//! itself directly; previously defined names are also in scope as free
//! functions. The result of a definition is a [`UserFunction`]: the
//! invocable, named wrapper over the top-level function.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::compiler;
use crate::dispatch;
use crate::error::{CompilerError, RuntimeError};
use crate::expression::Expr;
use crate::function::{Function, FunctionId};
use crate::translator;
use crate::value::Value;

/// A collection of named top-level function definitions.
#[derive(Default)]
pub struct Library {
    bindings: FxHashMap<String, Arc<Function>>,
}

impl Library {
    pub fn new() -> Self {
        Library {
            bindings: FxHashMap::default(),
        }
    }

    /// Define a named function. The builder receives a placeholder
    /// expression referring to the definition itself, usable for direct
    /// recursion: `call(direct(self_ref), ...)`.
    pub fn define(
        &mut self,
        name: &str,
        build: impl FnOnce(Expr) -> Expr,
    ) -> Result<UserFunction, CompilerError> {
        if self.bindings.contains_key(name) {
            return Err(CompilerError::new(format!(
                "function is already defined: {}",
                name
            )));
        }
        let lambda = build(Expr::FreeFunction(name.to_string()));
        let resolve = |wanted: &str| self.bindings.get(wanted).map(|f| f.id());
        let function = translator::translate(&lambda, &resolve, Some(name))?;
        function.set_name(name);
        self.bindings.insert(name.to_string(), Arc::clone(&function));
        Ok(UserFunction::new(name, function))
    }

    /// Look up a previously defined function.
    pub fn get(&self, name: &str) -> Option<UserFunction> {
        self.bindings
            .get(name)
            .map(|function| UserFunction::new(name, Arc::clone(function)))
    }
}

/// A named, invocable top-level function.
#[derive(Debug, Clone)]
pub struct UserFunction {
    name: String,
    function: Arc<Function>,
}

impl UserFunction {
    fn new(name: &str, function: Arc<Function>) -> Self {
        UserFunction {
            name: name.to_string(),
            function,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> FunctionId {
        self.function.id()
    }

    /// The underlying function implementation.
    pub fn function(&self) -> &Arc<Function> {
        &self.function
    }

    pub fn invoke0(&self) -> Result<Value, RuntimeError> {
        self.invoke(&[])
    }

    pub fn invoke1(&self, arg: impl Into<Value>) -> Result<Value, RuntimeError> {
        self.invoke(&[arg.into()])
    }

    pub fn invoke2(
        &self,
        arg1: impl Into<Value>,
        arg2: impl Into<Value>,
    ) -> Result<Value, RuntimeError> {
        self.invoke(&[arg1.into(), arg2.into()])
    }

    /// Invoke with the given arguments through the function's current call
    /// target.
    pub fn invoke(&self, args: &[Value]) -> Result<Value, RuntimeError> {
        if args.len() != self.function.declared_arity() {
            return Err(RuntimeError::arity_mismatch(
                self.function.declared_arity(),
                args.len(),
            ));
        }
        dispatch::call_function(self.function.id(), args)
    }

    /// Compile this function's unit now, regardless of the profiling
    /// counter.
    pub fn force_compile(&self) -> Result<(), CompilerError> {
        compiler::schedule_compilation(&self.function)
    }

    pub fn is_compiled(&self) -> bool {
        self.function.is_compiled()
    }
}
