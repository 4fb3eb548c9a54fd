//! Variables and runtime profiles.
//!
//! Variables live in a unit-wide arena and are addressed by [`VarId`];
//! evaluator nodes and parameter lists refer to them by id only. A variable
//! is declared (a parameter), let-bound (a stack-allocated local), or
//! copied (synthesized by closure conversion to copy down the value of a
//! free variable).
//!
//! Profiles accumulate monotonically and are recorded through shared
//! references while interpreters run; occasional lost updates are
//! acceptable and only delay specialization.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Mutex;

use crate::types::{ExpressionType, ValueKind};
use crate::value::Value;

/// Index of a variable in its unit's variable arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VarId(pub u32);

/// What introduced a variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariableKind {
    /// A parameter declared by the function definition.
    Declared,
    /// A variable introduced by a `let` in the function body.
    LetBound,
    /// A synthetic parameter created by closure conversion. `original` is
    /// the free variable this one copies; `supplier` is the variable in the
    /// enclosing function whose frame slot provides the value at closure
    /// creation (set by the converter of the enclosing function).
    Copied {
        original: VarId,
        supplier: Option<VarId>,
    },
}

/// A variable of some function in a compilation unit.
#[derive(Debug)]
pub struct Variable {
    name: String,
    /// Member index of the host function within its unit.
    host: usize,
    kind: VariableKind,
    /// Frame index, assigned by the indexer.
    index: Option<usize>,
    pub inferred_type: ExpressionType,
    pub observed_type: ExpressionType,
    profile: ValueProfile,
}

impl Variable {
    pub fn declared(name: impl Into<String>, host: usize) -> Self {
        Variable::new(name, host, VariableKind::Declared)
    }

    pub fn let_bound(name: impl Into<String>, host: usize) -> Self {
        Variable::new(name, host, VariableKind::LetBound)
    }

    pub fn copied(name: impl Into<String>, host: usize, original: VarId) -> Self {
        Variable::new(
            name,
            host,
            VariableKind::Copied {
                original,
                supplier: None,
            },
        )
    }

    fn new(name: impl Into<String>, host: usize, kind: VariableKind) -> Self {
        Variable {
            name: name.into(),
            host,
            kind,
            index: None,
            inferred_type: ExpressionType::Unknown,
            observed_type: ExpressionType::Unknown,
            profile: ValueProfile::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> usize {
        self.host
    }

    pub fn kind(&self) -> &VariableKind {
        &self.kind
    }

    pub fn is_copied(&self) -> bool {
        matches!(self.kind, VariableKind::Copied { .. })
    }

    /// The frame index. Only valid after the indexer has run.
    pub fn index(&self) -> usize {
        self.index.expect("variable has no frame index yet")
    }

    pub fn has_index(&self) -> bool {
        self.index.is_some()
    }

    pub fn set_index(&mut self, index: usize) {
        self.index = Some(index);
    }

    /// For a copied variable, the original free variable.
    pub fn original(&self) -> Option<VarId> {
        match self.kind {
            VariableKind::Copied { original, .. } => Some(original),
            _ => None,
        }
    }

    /// For a copied variable, the supplier in the enclosing function.
    pub fn supplier(&self) -> Option<VarId> {
        match self.kind {
            VariableKind::Copied { supplier, .. } => supplier,
            _ => None,
        }
    }

    pub fn set_supplier(&mut self, var: VarId) {
        match &mut self.kind {
            VariableKind::Copied { supplier, .. } => *supplier = Some(var),
            _ => panic!("supplier set on a non-copied variable"),
        }
    }

    pub fn profile(&self) -> &ValueProfile {
        &self.profile
    }

    /// Merge an incoming inferred type; true if the annotation widened.
    pub fn unify_inferred_type(&mut self, incoming: ExpressionType) -> bool {
        let (merged, widened) = self.inferred_type.unify(incoming);
        self.inferred_type = merged;
        widened
    }

    /// Merge an incoming observed type; true if the annotation widened.
    pub fn unify_observed_type(&mut self, incoming: ExpressionType) -> bool {
        let (merged, widened) = self.observed_type.unify(incoming);
        self.observed_type = merged;
        widened
    }

    /// The kind used for this variable's frame slot in specialized code:
    /// the observed kind, failing that the inferred kind, failing that
    /// `Ref`.
    pub fn specialized_kind(&self) -> ValueKind {
        self.observed_type
            .kind()
            .or_else(|| self.inferred_type.kind())
            .unwrap_or(ValueKind::Ref)
    }
}

impl Clone for Variable {
    fn clone(&self) -> Self {
        Variable {
            name: self.name.clone(),
            host: self.host,
            kind: self.kind.clone(),
            index: self.index,
            inferred_type: self.inferred_type,
            observed_type: self.observed_type,
            profile: self.profile.clone(),
        }
    }
}

const KIND_BIT_INT: u8 = 1;
const KIND_BIT_BOOL: u8 = 2;
const KIND_BIT_REF: u8 = 4;

/// What a profile has seen about the identity of reference values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefObservation {
    None,
    Single(usize),
    Many,
}

/// A record of the values observed at a program point: the set of kinds
/// seen, and for reference values whether a single object accounts for all
/// of them (the monomorphic case an inline cache could exploit).
#[derive(Debug)]
pub struct ValueProfile {
    kinds: AtomicU8,
    count: AtomicU64,
    refs: Mutex<RefObservation>,
}

impl ValueProfile {
    pub fn new() -> Self {
        ValueProfile {
            kinds: AtomicU8::new(0),
            count: AtomicU64::new(0),
            refs: Mutex::new(RefObservation::None),
        }
    }

    /// Record one observed value.
    pub fn record(&self, value: &Value) {
        let bit = match value.kind() {
            ValueKind::Int => KIND_BIT_INT,
            ValueKind::Bool => KIND_BIT_BOOL,
            ValueKind::Ref => KIND_BIT_REF,
            ValueKind::Void => return,
        };
        self.kinds.fetch_or(bit, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        if let Some(identity) = value.ref_identity() {
            if let Ok(mut refs) = self.refs.lock() {
                *refs = match *refs {
                    RefObservation::None => RefObservation::Single(identity),
                    RefObservation::Single(seen) if seen == identity => {
                        RefObservation::Single(seen)
                    }
                    _ => RefObservation::Many,
                };
            }
        }
    }

    /// Whether anything was recorded.
    pub fn has_data(&self) -> bool {
        self.count.load(Ordering::Relaxed) > 0
    }

    pub fn observation_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// The join of all kinds seen, if any value was recorded.
    pub fn observed_kind(&self) -> Option<ValueKind> {
        let mask = self.kinds.load(Ordering::Relaxed);
        let mut result: Option<ValueKind> = None;
        for (bit, kind) in [
            (KIND_BIT_INT, ValueKind::Int),
            (KIND_BIT_BOOL, ValueKind::Bool),
            (KIND_BIT_REF, ValueKind::Ref),
        ] {
            if mask & bit != 0 {
                result = Some(match result {
                    None => kind,
                    Some(acc) => acc.join(kind),
                });
            }
        }
        result
    }

    /// The observed type: known if any value was recorded, else unknown.
    pub fn observed_type(&self) -> ExpressionType {
        match self.observed_kind() {
            Some(kind) => ExpressionType::Known(kind),
            None => ExpressionType::Unknown,
        }
    }

    /// Whether every reference value seen so far was the same object.
    pub fn is_monomorphic_ref(&self) -> bool {
        self.refs
            .lock()
            .map(|refs| matches!(*refs, RefObservation::Single(_)))
            .unwrap_or(false)
    }
}

impl Default for ValueProfile {
    fn default() -> Self {
        ValueProfile::new()
    }
}

impl Clone for ValueProfile {
    fn clone(&self) -> Self {
        ValueProfile {
            kinds: AtomicU8::new(self.kinds.load(Ordering::Relaxed)),
            count: AtomicU64::new(self.count.load(Ordering::Relaxed)),
            refs: Mutex::new(
                self.refs
                    .lock()
                    .map(|refs| *refs)
                    .unwrap_or(RefObservation::Many),
            ),
        }
    }
}

/// Per-function execution profile: the invocation counter. Per-parameter
/// value profiles live on the parameter variables themselves.
#[derive(Debug)]
pub struct FunctionProfile {
    invocations: AtomicU64,
}

impl FunctionProfile {
    pub fn new() -> Self {
        FunctionProfile {
            invocations: AtomicU64::new(0),
        }
    }

    /// Count one invocation; returns the new total.
    pub fn record_invocation(&self) -> u64 {
        self.invocations.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn invocation_count(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }
}

impl Default for FunctionProfile {
    fn default() -> Self {
        FunctionProfile::new()
    }
}
