//! Aggressive dead-code elimination (spec §4.2.8): liveness seeded from
//! side-effecting instructions, propagated backward through both data dependence
//! (operand defs) and control dependence (the branches that decide whether a live
//! instruction's block executes at all).
//!
//! Control dependence is derived from the reverse (post-)dominance frontier: a
//! standard result is that `Y` is control-dependent on `X` exactly when `Y` is in
//! `postdom.frontier(X)`. We invert that map once to ask, per block, "which branches
//! decide whether I run" and keep those live too. Branch *folding* — collapsing a
//! conditional whose outcome nothing live depends on into an unconditional jump — is
//! left undone; see DESIGN.md.

use hashbrown::{HashMap, HashSet};
use log::debug;
use std::collections::VecDeque;

use crate::analysis::cfg::Cfg;
use crate::analysis::dominators::Dominators;
use crate::ir::function::Function;
use crate::ir::instruction::Instruction;
use crate::ir::operand::{BlockId, RegId};

/// Runs ADCE over `f`, returning the number of instructions removed.
pub fn run(f: &mut Function) -> usize {
    let cfg = Cfg::build(f);
    let post_dom = Dominators::reverse(f);

    // control_dependents_of[X] = blocks control-dependent on X's branch.
    // controllers_of[B] = the inverse: branches B depends on.
    let mut controllers_of: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
    for &x in &cfg.order {
        for dependent in post_dom.frontier(x) {
            controllers_of.entry(dependent).or_default().push(x);
        }
    }

    let def_site: HashMap<RegId, (BlockId, usize)> = {
        let mut m = HashMap::new();
        for block in f.blocks_in_order() {
            for (i, inst) in block.insts.iter().enumerate() {
                if let Some(d) = inst.def() {
                    m.insert(d, (block.id, i));
                }
            }
        }
        m
    };

    let mut live: HashSet<(BlockId, usize)> = HashSet::new();
    let mut live_blocks: HashSet<BlockId> = HashSet::new();
    let mut worklist: VecDeque<(BlockId, usize)> = VecDeque::new();

    for block in f.blocks_in_order() {
        for (i, inst) in block.insts.iter().enumerate() {
            if inst.has_side_effect() {
                worklist.push_back((block.id, i));
            }
        }
    }

    while let Some((b, i)) = worklist.pop_front() {
        if !live.insert((b, i)) {
            continue;
        }
        live_blocks.insert(b);
        let inst = &f.block(b).insts[i];
        for u in inst.uses() {
            if let Some(r) = u.as_reg() {
                if let Some(&site) = def_site.get(&r) {
                    worklist.push_back(site);
                }
            }
        }
        for controller in controllers_of.get(&b).cloned().unwrap_or_default() {
            if let Some(term_idx) = f.block(controller).insts.iter().position(|i| i.is_terminator()) {
                worklist.push_back((controller, term_idx));
            }
        }
    }

    // Every block's own terminator stays — we don't fold dead branches (see module
    // doc) — but it must still be visited so its condition register's defs count as
    // live once the block itself is live.
    for &b in &live_blocks {
        if let Some(term_idx) = f.block(b).insts.iter().position(|i| i.is_terminator()) {
            worklist.push_back((b, term_idx));
        }
    }
    while let Some((b, i)) = worklist.pop_front() {
        if !live.insert((b, i)) {
            continue;
        }
        let inst = &f.block(b).insts[i];
        for u in inst.uses() {
            if let Some(r) = u.as_reg() {
                if let Some(&site) = def_site.get(&r) {
                    worklist.push_back(site);
                }
            }
        }
    }

    let mut removed = 0;
    for block in f.block_order.clone() {
        let id = block;
        let before = f.block(id).insts.len();
        let mut kept = Vec::with_capacity(before);
        for (i, inst) in f.block(id).insts.clone().into_iter().enumerate() {
            if inst.is_terminator() || inst.has_side_effect() || live.contains(&(id, i)) {
                kept.push(inst);
            }
        }
        removed += before - kept.len();
        f.block_mut(id).insts = kept;
    }
    debug!("adce: removed {removed} dead instructions");
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instruction::{IntCond, Instruction};
    use crate::ir::operand::Operand;
    use crate::ir::types::DataType;
    use crate::verify::verify_function;

    #[test]
    fn removes_dead_pure_computation() {
        let mut f = Function::new("f", DataType::I32, &[(DataType::I32, false)]);
        let entry = f.entry();
        let p0 = f.sig.params[0].1;
        let dead = f.fresh_reg();
        f.block_mut(entry).insts.push(Instruction::IntBin {
            dest: dead,
            op: crate::ir::instruction::IntBinOp::Mul,
            ty: DataType::I32,
            lhs: Operand::Register(p0, DataType::I32),
            rhs: Operand::ImmI32(2),
        });
        f.block_mut(entry).insts.push(Instruction::Ret { value: Some(Operand::ImmI32(0)) });

        let removed = run(&mut f);
        assert_eq!(removed, 1);
        verify_function(&f).unwrap();
    }

    #[test]
    fn keeps_control_dependence_of_live_store() {
        // if (c) store_to_global(a); — the store is live, so the branch and its
        // condition must survive even though nothing else uses `c`.
        let mut f = Function::new("f", DataType::Void, &[(DataType::I32, false); 2]);
        let entry = f.entry();
        let then_b = f.create_block();
        let end = f.create_block();
        let (c, a) = (f.sig.params[0].1, f.sig.params[1].1);
        let cmp = f.fresh_reg();
        f.block_mut(entry).insts.push(Instruction::Icmp {
            dest: cmp,
            cond: IntCond::Ne,
            lhs: Operand::Register(c, DataType::I32),
            rhs: Operand::ImmI32(0),
        });
        f.block_mut(entry).insts.push(Instruction::BrCond {
            cond: Operand::Register(cmp, DataType::I1),
            true_label: then_b,
            false_label: end,
        });
        f.block_mut(then_b)
            .insts
            .push(Instruction::Store { val: Operand::Register(a, DataType::I32), ptr: Operand::Global(crate::ir::operand::GlobalId(0)) });
        f.block_mut(then_b).insts.push(Instruction::BrUncond { label: end });
        f.block_mut(end).insts.push(Instruction::Ret { value: None });

        let removed = run(&mut f);
        assert_eq!(removed, 0);
        assert!(f.block(entry).insts.iter().any(|i| matches!(i, Instruction::Icmp { .. })));
    }
}
