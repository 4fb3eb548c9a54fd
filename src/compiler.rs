//! The compilation-unit driver.
//!
//! A unit is a top-level function together with every function nested in
//! it; it compiles as one batch. The trigger is the profiling threshold;
//! the transition into `Compiling` is the latch that makes racing triggers
//! no-ops, and compilation itself runs synchronously on the thread that
//! won the transition.
//!
//! Compilation never mutates the published IR in place. It snapshots the
//! unit, reruns the analyzer on the private copy, layers inference and
//! observation on top, generates code for every member, then publishes the
//! annotated IR and swaps every member's call target, with a publication
//! fence after the group swap. Frames already executing keep the snapshot
//! they started with. A failure leaves the unit in `Compiling` with the
//! plain interpreter installed and surfaces the error to the caller that
//! tripped the threshold.

use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

use crate::analysis;
use crate::codegen;
use crate::error::CompilerError;
use crate::function::{
    registry, CallTarget, CompilationState, CompiledForms, Function, Unit,
};
use crate::inference;
use crate::observer;

/// Interpreted executions of a function before its unit is queued for
/// compilation.
pub const PROFILING_TARGET: u64 = 10;

/// Compile the unit of the given top-level function, if it is still
/// profiling. Idempotent: once any thread wins the `Profiling` →
/// `Compiling` transition, every later call is a no-op.
pub fn schedule_compilation(top: &Arc<Function>) -> Result<(), CompilerError> {
    if !top.is_top_level() {
        return Err(CompilerError::new(
            "compilation scheduled on a nested function",
        ));
    }
    if !top.transition(CompilationState::Profiling, CompilationState::Compiling) {
        return Ok(());
    }
    let unit = top
        .unit()
        .ok_or_else(|| CompilerError::new("function has no compilation unit"))?;

    // The whole cluster steps down to the plain interpreter while its
    // code is built.
    for id in unit.members() {
        let member = registry().get(*id);
        if member.id() != top.id() {
            member.transition(CompilationState::Profiling, CompilationState::Compiling);
        }
        member.retarget(CallTarget::PlainInterpreter);
    }

    compile_unit(unit)
}

fn compile_unit(unit: &Unit) -> Result<(), CompilerError> {
    let snapshot = unit.ir();
    let mut work = (*snapshot).clone();

    analysis::validate_scopes(&work)?;
    analysis::convert_closures(&mut work);
    analysis::assign_indices(&mut work);
    for member in 0..work.functions.len() {
        inference::infer_types(&mut work, member)?;
        observer::observe_types(&mut work, member);
    }

    let mut results = Vec::with_capacity(work.functions.len());
    for member in 0..work.functions.len() {
        let (generic, specialized) = codegen::generate(&work, member);
        results.push((
            work.functions[member].function,
            CompiledForms {
                generic: Arc::new(generic),
                specialized,
            },
        ));
    }

    // Publish the annotated IR, then swap every member's call target as a
    // group and fence so no thread keeps calling a stale mixture.
    unit.publish_ir(Arc::new(work));
    for (id, forms) in results {
        let function = registry().get(id);
        function.retarget(CallTarget::Compiled(Arc::new(forms)));
        function.transition(CompilationState::Compiling, CompilationState::Compiled);
    }
    fence(Ordering::SeqCst);
    Ok(())
}
