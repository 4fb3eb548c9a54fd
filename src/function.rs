//! Functions, the compilation unit they form, and the process-wide registry.
//!
//! A [`Function`] holds together all executable representations of one
//! lambda expression: the evaluator-node tree (the definitive form) and,
//! once compiled, the generic and optionally specialized compiled forms.
//! It is not a function value of the implemented language; for that see
//! [`crate::value::Closure`], which pairs a function id with captured
//! values.
//!
//! A top-level function owns its compilation unit: the topologically
//! ordered list of every function nested inside it, and the unit IR (all
//! member bodies plus the variable arena) published as an `Arc` snapshot.
//! Compilation analyzes and annotates a private clone of the snapshot and
//! publishes the result atomically, so annotations never change under a
//! running interpreter frame; frames in flight simply finish on the
//! superseded snapshot. Everything outside the unit refers to functions by
//! registry id, which keeps the object graph acyclic.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, RwLock};

use crate::code::CodeBlock;
use crate::node::Node;
use crate::types::ValueKind;
use crate::variables::{FunctionProfile, VarId, Variable};

/// Registry id of a function. Unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FunctionId(pub u32);

/// Compilation lifecycle of a function. Transitions are one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilationState {
    /// Created but not yet analyzed.
    Invalid,
    /// Executing under the profiling interpreter.
    Profiling,
    /// Its unit is being compiled; the plain interpreter is installed.
    Compiling,
    /// Compiled code is installed.
    Compiled,
}

/// The current content of a function's mutable call target.
#[derive(Debug, Clone)]
pub enum CallTarget {
    ProfilingInterpreter,
    PlainInterpreter,
    Compiled(Arc<CompiledForms>),
}

/// The compiled forms of one function.
#[derive(Debug)]
pub struct CompiledForms {
    pub generic: Arc<CodeBlock>,
    pub specialized: Option<Specialization>,
}

/// A specialized compiled form: its code and the signature the
/// specialization guard tests against.
#[derive(Debug)]
pub struct Specialization {
    pub code: Arc<CodeBlock>,
    /// Kind of each implementation parameter (synthetic then declared).
    /// `Ref` slots accept anything; non-`Ref` slots are guarded.
    pub param_kinds: Vec<ValueKind>,
    pub return_kind: ValueKind,
}

impl Specialization {
    /// Whether a signature with these argument and result kinds matches
    /// this specialization exactly.
    pub fn matches_signature(&self, arg_kinds: &[ValueKind], result_kind: ValueKind) -> bool {
        self.param_kinds.as_slice() == arg_kinds && self.return_kind == result_kind
    }
}

/// The IR of one unit member: its parameter lists, body, and frame size.
#[derive(Debug, Clone)]
pub struct FunctionIr {
    /// Registry id of the member.
    pub function: FunctionId,
    /// Parameters from the definition.
    pub declared_params: Vec<VarId>,
    /// Copied variables prepended by closure conversion.
    pub synthetic_params: Vec<VarId>,
    pub body: Node,
    pub frame_size: usize,
}

impl FunctionIr {
    pub fn new(function: FunctionId, declared_params: Vec<VarId>) -> Self {
        FunctionIr {
            function,
            declared_params,
            synthetic_params: Vec::new(),
            body: Node::nil(),
            frame_size: 0,
        }
    }

    /// All parameters: synthetic first, then declared.
    pub fn all_params(&self) -> impl Iterator<Item = VarId> + '_ {
        self.synthetic_params
            .iter()
            .chain(self.declared_params.iter())
            .copied()
    }

    /// Parameter count after closure conversion.
    pub fn implementation_arity(&self) -> usize {
        self.synthetic_params.len() + self.declared_params.len()
    }
}

/// The IR of a whole compilation unit: member bodies in encounter
/// (topological) order, member 0 being the top-level function, plus the
/// variable arena they share.
#[derive(Debug, Clone, Default)]
pub struct UnitIr {
    pub functions: Vec<FunctionIr>,
    pub variables: Vec<Variable>,
}

impl UnitIr {
    pub fn var(&self, id: VarId) -> &Variable {
        &self.variables[id.0 as usize]
    }

    pub fn var_mut(&mut self, id: VarId) -> &mut Variable {
        &mut self.variables[id.0 as usize]
    }

    pub fn alloc_var(&mut self, variable: Variable) -> VarId {
        let id = VarId(self.variables.len() as u32);
        self.variables.push(variable);
        id
    }
}

/// The unit-level state a top-level function owns.
#[derive(Debug)]
pub struct Unit {
    ir: RwLock<Arc<UnitIr>>,
    /// Registry ids of all members, index-aligned with `UnitIr::functions`.
    members: Vec<FunctionId>,
}

impl Unit {
    pub fn new(ir: UnitIr, members: Vec<FunctionId>) -> Self {
        Unit {
            ir: RwLock::new(Arc::new(ir)),
            members,
        }
    }

    pub fn members(&self) -> &[FunctionId] {
        &self.members
    }

    /// The currently published IR snapshot.
    pub fn ir(&self) -> Arc<UnitIr> {
        self.ir
            .read()
            .map(|guard| Arc::clone(&guard))
            .unwrap_or_else(|poisoned| Arc::clone(&poisoned.into_inner()))
    }

    /// Publish a new IR snapshot.
    pub fn publish_ir(&self, ir: Arc<UnitIr>) {
        match self.ir.write() {
            Ok(mut guard) => *guard = ir,
            Err(poisoned) => *poisoned.into_inner() = ir,
        }
    }
}

/// One function implementation: its identity, profile, compilation state,
/// and the mutable call target every invocation enters through.
#[derive(Debug)]
pub struct Function {
    id: FunctionId,
    /// Registry id of the topmost enclosing function (itself, if top-level).
    top: FunctionId,
    /// Index within the unit's member list.
    member_index: usize,
    /// Parameter count from the definition, before closure conversion.
    declared_arity: usize,
    name: OnceLock<String>,
    profile: FunctionProfile,
    state: Mutex<CompilationState>,
    target: RwLock<CallTarget>,
    /// Present on top-level functions only.
    unit: OnceLock<Unit>,
}

impl Function {
    pub fn top_level(id: FunctionId, declared_arity: usize) -> Self {
        Function::new(id, id, 0, declared_arity)
    }

    pub fn nested(
        id: FunctionId,
        top: FunctionId,
        member_index: usize,
        declared_arity: usize,
    ) -> Self {
        Function::new(id, top, member_index, declared_arity)
    }

    fn new(id: FunctionId, top: FunctionId, member_index: usize, declared_arity: usize) -> Self {
        Function {
            id,
            top,
            member_index,
            declared_arity,
            name: OnceLock::new(),
            profile: FunctionProfile::new(),
            state: Mutex::new(CompilationState::Invalid),
            target: RwLock::new(CallTarget::ProfilingInterpreter),
            unit: OnceLock::new(),
        }
    }

    pub fn id(&self) -> FunctionId {
        self.id
    }

    pub fn top(&self) -> FunctionId {
        self.top
    }

    pub fn is_top_level(&self) -> bool {
        self.top == self.id
    }

    pub fn member_index(&self) -> usize {
        self.member_index
    }

    pub fn declared_arity(&self) -> usize {
        self.declared_arity
    }

    pub fn name(&self) -> Option<&str> {
        self.name.get().map(|s| s.as_str())
    }

    pub fn set_name(&self, name: impl Into<String>) {
        let _ = self.name.set(name.into());
    }

    pub fn profile(&self) -> &FunctionProfile {
        &self.profile
    }

    /// Install the unit. Only valid on a top-level function, once.
    pub fn install_unit(&self, unit: Unit) {
        assert!(self.is_top_level(), "unit installed on a nested function");
        assert!(self.unit.set(unit).is_ok(), "unit installed twice");
    }

    /// The unit, if this is an initialized top-level function.
    pub fn unit(&self) -> Option<&Unit> {
        self.unit.get()
    }

    /// The published IR snapshot of this function's unit.
    pub fn unit_ir(&self) -> Arc<UnitIr> {
        match self.unit.get() {
            Some(unit) => unit.ir(),
            None => registry()
                .get(self.top)
                .unit()
                .expect("unit not installed on top-level function")
                .ir(),
        }
    }

    pub fn state(&self) -> CompilationState {
        *self.lock_state()
    }

    pub fn is_compiled(&self) -> bool {
        self.state() == CompilationState::Compiled
    }

    /// Step the state machine. Returns whether the transition happened;
    /// any other current state leaves the function untouched.
    pub fn transition(&self, from: CompilationState, to: CompilationState) -> bool {
        let mut state = self.lock_state();
        if *state == from {
            *state = to;
            true
        } else {
            false
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, CompilationState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// A snapshot of the mutable call target (acquire).
    pub fn target(&self) -> CallTarget {
        self.target
            .read()
            .map(|guard| guard.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Replace the mutable call target (release).
    pub fn retarget(&self, target: CallTarget) {
        match self.target.write() {
            Ok(mut guard) => *guard = target,
            Err(poisoned) => *poisoned.into_inner() = target,
        }
    }

    /// The current compiled forms, if any.
    pub fn compiled_forms(&self) -> Option<Arc<CompiledForms>> {
        match self.target() {
            CallTarget::Compiled(forms) => Some(forms),
            _ => None,
        }
    }
}

/// The process-wide function registry. Inserts are serialized; lookups
/// clone the `Arc` out of an uncontended read lock.
#[derive(Debug, Default)]
pub struct Registry {
    functions: RwLock<Vec<Arc<Function>>>,
    next_id: AtomicUsize,
}

impl Registry {
    fn new() -> Self {
        Registry {
            functions: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }

    /// Register a new function, handing the constructor its dense id.
    pub fn register(&self, make: impl FnOnce(FunctionId) -> Function) -> Arc<Function> {
        let mut functions = self
            .functions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let id = FunctionId(functions.len() as u32);
        self.next_id.store(functions.len() + 1, Ordering::Relaxed);
        let function = Arc::new(make(id));
        assert_eq!(function.id(), id, "function registered under a foreign id");
        functions.push(Arc::clone(&function));
        function
    }

    pub fn get(&self, id: FunctionId) -> Arc<Function> {
        let functions = self
            .functions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&functions[id.0 as usize])
    }

    pub fn len(&self) -> usize {
        self.next_id.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// The process-wide registry.
pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}
