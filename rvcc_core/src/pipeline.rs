//! Ties the individual passes and backend stages together into the fixed order
//! spec §5 describes: mem2reg, SCCP, CSE, LICM, ADCE, inlining, tail-call
//! optimization, return unification on the IR side, then instruction selection,
//! register allocation, and lowering on the backend side.

use log::debug;

use crate::ir::module::Module;
use crate::lowering;
use crate::mir::function::MFunction;
use crate::pass::{adce, cse, inline, licm, mem2reg, sccp, tco, unify_return};
use crate::regalloc;
use crate::target::TargetAdapter;
use crate::verify::verify_function;
use crate::{isel, ir::function::Function};
use rvcc_common::RvccResult;

/// Knobs the pipeline driver threads into individual passes. Only inlining has
/// any today; this exists so a caller configuring one pass doesn't also have to
/// know every other pass's defaults are fine as-is.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub inline_thresholds: inline::InlineThresholds,
    /// Bound on alternating rounds of SCCP/CSE/LICM/ADCE cleanup, both before and
    /// after inlining. Mirrors `pass::inline`'s own `MAX_ROUNDS` termination guard.
    pub max_cleanup_rounds: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { inline_thresholds: inline::InlineThresholds::default(), max_cleanup_rounds: 8 }
    }
}

/// Runs the scalar cleanup passes (SCCP, CSE, LICM, ADCE) on one function to a
/// local fixpoint, bounded by `max_rounds`. mem2reg is not part of this loop: once
/// promoted out of memory, a register never becomes an alloca again, so it only
/// needs to run once, first.
fn cleanup_to_fixpoint(f: &mut Function, max_rounds: usize) {
    for _ in 0..max_rounds {
        let changed = sccp::run(f) + cse::run(f) + licm::run(f) + adce::run(f);
        if changed == 0 {
            break;
        }
    }
}

/// Runs the full optimization pipeline over every function in `module`, in spec
/// order, then verifies every function still satisfies the IR's invariants.
pub fn optimize_module(module: &mut Module, config: &PipelineConfig) -> RvccResult<()> {
    for f in &mut module.functions {
        mem2reg::run(f);
        cleanup_to_fixpoint(f, config.max_cleanup_rounds);
    }

    let inlined = inline::run(module, config.inline_thresholds);
    debug!("pipeline: inlined {inlined} call sites");

    if inlined > 0 {
        for f in &mut module.functions {
            cleanup_to_fixpoint(f, config.max_cleanup_rounds);
        }
    }

    for f in &mut module.functions {
        let self_global = module.globals.intern(f.sig.name.clone());
        tco::run(f, self_global);
        unify_return::run(f);
    }

    for f in &module.functions {
        verify_function(f)?;
    }
    Ok(())
}

/// Runs the backend over an already-optimized module: instruction selection,
/// linear-scan register allocation, then phi/stack/frame lowering, per function.
pub fn compile_module<T: TargetAdapter>(module: &Module, target: &T) -> Vec<MFunction> {
    let mut machine_fns = isel::select_module(module, target);
    for mf in &mut machine_fns {
        regalloc::allocate_function(mf, target);
        lowering::run(mf, target);
    }
    machine_fns
}
