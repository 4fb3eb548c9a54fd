//! The compiled-code form: a linear instruction sequence for a small stack
//! machine, plus the writer the code generator emits through.
//!
//! Generic code uses only unchecked instructions and can never raise the
//! square-peg signal. Specialized code additionally uses the kind-checked
//! store, return, and call-result forms; those are the only points where a
//! runtime value can fail its statically chosen kind, and each of them
//! aborts the frame with the offending value rather than continuing.

use std::sync::Arc;

use crate::function::FunctionId;
use crate::primitives::{Primitive1, Primitive2};
use crate::types::ValueKind;
use crate::value::Value;

/// An integer comparison, used by the fused compare-and-branch form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

impl CompareOp {
    pub fn eval(self, lhs: i64, rhs: i64) -> bool {
        match self {
            CompareOp::Lt => lhs < rhs,
            CompareOp::Le => lhs <= rhs,
            CompareOp::Gt => lhs > rhs,
            CompareOp::Ge => lhs >= rhs,
            CompareOp::Eq => lhs == rhs,
            CompareOp::Ne => lhs != rhs,
        }
    }
}

/// The identity of a compiled call site's callee.
#[derive(Debug, Clone)]
pub enum CallTargetDesc {
    /// A known top-level function, called by registry id.
    Direct(FunctionId),
    /// The callee is a closure value evaluated onto the stack below the
    /// arguments.
    Dynamic,
}

/// A call-site descriptor produced by the code generator: the callee's
/// identity, the static kinds of the emitted arguments, and the kind the
/// surrounding code expects the result to have. The dispatcher resolves the
/// descriptor at call time, answering with the callee's specialized entry
/// when the signature matches exactly and with the guarded generic pipeline
/// otherwise. A non-`Ref` result kind makes the site verify the returned
/// value, aborting with a square peg on mismatch.
#[derive(Debug, Clone)]
pub struct CallSite {
    pub target: CallTargetDesc,
    pub arg_kinds: Vec<ValueKind>,
    pub result_kind: ValueKind,
}

/// One instruction of the compiled form.
#[derive(Debug, Clone)]
pub enum Instr {
    /// Push a constant.
    Const(Value),
    /// Push the value of a frame slot.
    LoadLocal(usize),
    /// Pop into a frame slot.
    StoreLocal(usize),
    /// Pop into a frame slot declared with a primitive kind; abort with a
    /// square peg if the value is not of that kind.
    StoreLocalChecked { index: usize, kind: ValueKind },
    /// Duplicate the top of the stack.
    Dup,
    /// Discard the top of the stack.
    Pop,
    /// Unconditional jump.
    Jump(usize),
    /// Pop a boolean and jump when it is false. A non-boolean is a runtime
    /// error, matching the interpreters' condition contract.
    BranchIfFalse(usize),
    /// Fused compare-and-branch: pop two integers and jump to the false
    /// side when the comparison fails.
    BranchUnless { op: CompareOp, target: usize },
    /// Unboxed integer arithmetic.
    AddInt,
    SubInt,
    MulInt,
    NegInt,
    /// Pop two integers, push the comparison result.
    CmpInt(CompareOp),
    /// Boolean negation.
    NotBool,
    /// Generic application of a unary primitive.
    Primitive1(Arc<dyn Primitive1>),
    /// Generic application of a binary primitive.
    Primitive2(Arc<dyn Primitive2>),
    /// Call through a dispatcher-produced descriptor.
    Call(CallSite),
    /// Create a closure over the listed frame slots.
    MakeClosure {
        function: FunctionId,
        capture_indices: Vec<usize>,
    },
    /// Return the top of the stack.
    Return,
    /// Return the top of the stack, which must be of the given kind; abort
    /// with a square peg otherwise.
    ReturnChecked(ValueKind),
}

/// A complete compiled form of one function.
#[derive(Debug, Clone)]
pub struct CodeBlock {
    pub instructions: Vec<Instr>,
    /// Number of implementation arguments the entry expects (synthetic
    /// parameters followed by declared parameters).
    pub arity: usize,
    pub frame_size: usize,
}

/// The writer the generator emits instructions through. Branch targets are
/// written as placeholders and patched once the target position is known.
#[derive(Debug, Default)]
pub struct CodeWriter {
    instructions: Vec<Instr>,
}

impl CodeWriter {
    pub fn new() -> Self {
        CodeWriter {
            instructions: Vec::new(),
        }
    }

    /// Append an instruction; returns its position.
    pub fn write(&mut self, instr: Instr) -> usize {
        self.instructions.push(instr);
        self.instructions.len() - 1
    }

    /// The position the next instruction will get.
    pub fn position(&self) -> usize {
        self.instructions.len()
    }

    /// Point a previously written branch at `target`.
    pub fn patch_branch(&mut self, at: usize, target: usize) {
        match &mut self.instructions[at] {
            Instr::Jump(t)
            | Instr::BranchIfFalse(t)
            | Instr::BranchUnless { target: t, .. } => *t = target,
            other => panic!("patching a non-branch instruction: {:?}", other),
        }
    }

    pub fn finish(self, arity: usize, frame_size: usize) -> CodeBlock {
        CodeBlock {
            instructions: self.instructions,
            arity,
            frame_size,
        }
    }
}
