//! Verification of the universal IR invariants (spec §8.1). Every pass that mutates
//! a function is expected to re-establish these before returning (spec §7); tests and
//! the pipeline driver call `verify_function` between passes in debug builds.

use hashbrown::{HashMap, HashSet};

use crate::analysis::cfg::Cfg;
use crate::analysis::dominators::Dominators;
use crate::ir::function::Function;
use crate::ir::instruction::Instruction;
use crate::ir::operand::{BlockId, RegId};
use rvcc_common::{RvccError, RvccResult};

/// Terminator invariant + SSA invariant + Phi consistency, checked together since
/// they all require one pass over the function's blocks.
pub fn verify_function(f: &Function) -> RvccResult<()> {
    verify_terminators(f)?;
    verify_ssa(f)?;
    let cfg = Cfg::build(f);
    verify_phi_consistency(f, &cfg)?;
    Ok(())
}

fn verify_terminators(f: &Function) -> RvccResult<()> {
    for block in f.blocks_in_order() {
        let term_count = block.insts.iter().filter(|i| i.is_terminator()).count();
        if term_count != 1 {
            return Err(RvccError::invariant(format!(
                "block {} has {} terminators, expected exactly 1",
                block.id, term_count
            )));
        }
        if !block.insts.last().is_some_and(|i| i.is_terminator()) {
            return Err(RvccError::invariant(format!("block {} does not end with its terminator", block.id)));
        }
        for (idx, inst) in block.insts.iter().enumerate() {
            if inst.is_terminator() && idx != block.insts.len() - 1 {
                return Err(RvccError::invariant(format!(
                    "block {} has an instruction after its terminator",
                    block.id
                )));
            }
        }
    }
    Ok(())
}

/// Each register is defined by exactly one instruction, and (to the extent checkable
/// without full dominance-at-use tracking for every operand) every use names a
/// register that was defined somewhere in the function.
fn verify_ssa(f: &Function) -> RvccResult<()> {
    let mut defs: HashMap<RegId, BlockId> = HashMap::new();
    for block in f.blocks_in_order() {
        for inst in &block.insts {
            if let Some(d) = inst.def() {
                if let Some(prev) = defs.insert(d, block.id) {
                    return Err(RvccError::invariant(format!(
                        "register {d} redefined in block {} (first defined in {prev})",
                        block.id
                    )));
                }
            }
        }
    }

    let dominators = Dominators::forward(f);
    for block in f.blocks_in_order() {
        for inst in &block.insts {
            if let Instruction::Phi { incoming, .. } = inst {
                for (pred, val) in incoming {
                    if let Some(r) = val.as_reg() {
                        let def_block = *defs.get(&r).ok_or_else(|| {
                            RvccError::invariant(format!("phi uses undefined register {r}"))
                        })?;
                        if !dominators.dominates(def_block, *pred) {
                            return Err(RvccError::invariant(format!(
                                "phi incoming value {r} from {pred} is not dominated by its definition in {def_block}"
                            )));
                        }
                    }
                }
                continue;
            }
            for use_op in inst.uses() {
                if let Some(r) = use_op.as_reg() {
                    let def_block = *defs.get(&r).ok_or_else(|| {
                        RvccError::invariant(format!("use of undefined register {r} in block {}", block.id))
                    })?;
                    if !dominators.dominates(def_block, block.id) {
                        return Err(RvccError::invariant(format!(
                            "use of {r} in block {} is not dominated by its definition in {def_block}",
                            block.id
                        )));
                    }
                }
            }
        }
    }
    Ok(())
}

fn verify_phi_consistency(f: &Function, cfg: &Cfg) -> RvccResult<()> {
    for block in f.blocks_in_order() {
        let preds: HashSet<BlockId> = cfg.predecessors(block.id).iter().copied().collect();
        for inst in block.phis() {
            if let Instruction::Phi { incoming, .. } = inst {
                let labels: HashSet<BlockId> = incoming.iter().map(|(l, _)| *l).collect();
                if labels != preds {
                    return Err(RvccError::invariant(format!(
                        "phi in block {} has incoming labels {labels:?}, expected predecessors {preds:?}",
                        block.id
                    )));
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instruction::Instruction;
    use crate::ir::operand::Operand;
    use crate::ir::types::DataType;

    #[test]
    fn single_block_ret_is_valid() {
        let mut f = Function::new("f", DataType::I32, &[]);
        f.block_mut(f.entry()).insts.push(Instruction::Ret { value: Some(Operand::ImmI32(0)) });
        assert!(verify_function(&f).is_ok());
    }

    #[test]
    fn missing_terminator_is_rejected() {
        let mut f = Function::new("f", DataType::I32, &[]);
        let r = f.fresh_reg();
        f.block_mut(f.entry())
            .insts
            .push(Instruction::Alloca { dest: r, ty: DataType::I32, dims: vec![] });
        assert!(verify_function(&f).is_err());
    }
}
