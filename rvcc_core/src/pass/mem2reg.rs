//! Memory-to-register promotion (spec §4.2.4): promotes allocas used only by
//! load/store into SSA values, inserting Phis at the iterated dominance frontier of
//! their defining blocks.

use hashbrown::{HashMap, HashSet};
use log::debug;

use crate::analysis::dominators::Dominators;
use crate::ir::function::Function;
use crate::ir::instruction::Instruction;
use crate::ir::operand::{BlockId, Operand, RegId};
use crate::ir::types::DataType;

struct Candidate {
    reg: RegId,
    ty: DataType,
}

/// Runs mem2reg over `f`, returning the number of allocas promoted.
pub fn run(f: &mut Function) -> usize {
    let candidates = find_candidates(f);
    if candidates.is_empty() {
        return 0;
    }

    let (fast, general): (Vec<&Candidate>, Vec<&Candidate>) =
        candidates.iter().partition(|c| is_fast_path(f, c.reg));

    for c in &fast {
        promote_fast_path(f, c.reg);
    }

    if !general.is_empty() {
        promote_general(f, &general);
    }

    debug!("mem2reg: promoted {} allocas ({} fast-path)", candidates.len(), fast.len());
    candidates.len()
}

fn find_candidates(f: &Function) -> Vec<Candidate> {
    let entry = f.block(f.entry());
    let allocas: Vec<(RegId, DataType)> = entry
        .insts
        .iter()
        .filter_map(|i| match i {
            Instruction::Alloca { dest, ty, dims } if dims.is_empty() => Some((*dest, *ty)),
            _ => None,
        })
        .collect();

    allocas
        .into_iter()
        .filter(|(reg, _)| is_promotable(f, *reg))
        .map(|(reg, ty)| Candidate { reg, ty })
        .collect()
}

/// Only loads/stores (with the alloca as the *pointer* operand) may reference the
/// alloca's register; any other appearance disqualifies it.
fn is_promotable(f: &Function, reg: RegId) -> bool {
    for block in f.blocks_in_order() {
        for inst in &block.insts {
            match inst {
                Instruction::Alloca { .. } => {}
                Instruction::Load { ptr, .. } => {
                    if ptr.as_reg() != Some(reg) && mentions(ptr, reg) {
                        return false;
                    }
                }
                Instruction::Store { val, ptr } => {
                    if mentions(val, reg) {
                        return false;
                    }
                    if ptr.as_reg() != Some(reg) && mentions(ptr, reg) {
                        return false;
                    }
                }
                other => {
                    if other.uses().iter().any(|u| mentions(u, reg)) {
                        return false;
                    }
                }
            }
        }
    }
    true
}

fn mentions(op: &Operand, reg: RegId) -> bool {
    op.as_reg() == Some(reg)
}

fn is_fast_path(f: &Function, reg: RegId) -> bool {
    let mut store_count = 0;
    let mut store_in_entry = false;
    for block in f.blocks_in_order() {
        for inst in &block.insts {
            if let Instruction::Store { ptr, .. } = inst {
                if ptr.as_reg() == Some(reg) {
                    store_count += 1;
                    store_in_entry = block.id == f.entry();
                }
            }
        }
    }
    store_count == 1 && store_in_entry
}

fn promote_fast_path(f: &mut Function, reg: RegId) {
    let mut replacement: Option<Operand> = None;
    for block in f.block_order.clone() {
        let b = f.block_mut(block);
        b.insts.retain_mut(|inst| match inst {
            Instruction::Alloca { dest, .. } if *dest == reg => false,
            Instruction::Store { val, ptr } if ptr.as_reg() == Some(reg) => {
                replacement = Some(*val);
                false
            }
            _ => true,
        });
    }
    let Some(replacement) = replacement else { return };
    for block in f.block_order.clone() {
        for inst in &mut f.block_mut(block).insts {
            if let Instruction::Load { dest, ptr, .. } = inst {
                if ptr.as_reg() == Some(reg) {
                    let dest = *dest;
                    substitute_in_function(f, dest, replacement);
                    return promote_fast_path_remove_load(f, reg);
                }
            }
        }
    }
}

fn promote_fast_path_remove_load(f: &mut Function, reg: RegId) {
    for block in f.block_order.clone() {
        f.block_mut(block)
            .insts
            .retain(|inst| !matches!(inst, Instruction::Load { ptr, .. } if ptr.as_reg() == Some(reg)));
    }
}

fn zero_for(ty: DataType) -> Operand {
    if ty.is_float() {
        Operand::ImmF32(0.0)
    } else {
        Operand::ImmI32(0)
    }
}

fn promote_general(f: &mut Function, candidates: &[&Candidate]) {
    let dom = Dominators::forward(f);

    // Defining blocks (those containing a store) per candidate.
    let mut defining: HashMap<RegId, Vec<BlockId>> = HashMap::new();
    for block in f.blocks_in_order() {
        for inst in &block.insts {
            if let Instruction::Store { ptr, .. } = inst {
                if let Some(r) = ptr.as_reg() {
                    if candidates.iter().any(|c| c.reg == r) {
                        defining.entry(r).or_default().push(block.id);
                    }
                }
            }
        }
    }

    // Insert Phis at the iterated dominance frontier; remember which candidate each
    // inserted Phi belongs to.
    let mut phi_owner: HashMap<RegId, RegId> = HashMap::new();
    for c in candidates {
        let seeds = defining.get(&c.reg).cloned().unwrap_or_default();
        let frontier = dom.iterated_frontier(seeds);
        for block in frontier {
            let dest = f.fresh_reg();
            f.block_mut(block).push_phi(Instruction::Phi { dest, ty: c.ty, incoming: Vec::new() });
            phi_owner.insert(dest, c.reg);
        }
    }

    let candidate_set: HashSet<RegId> = candidates.iter().map(|c| c.reg).collect();
    let candidate_ty: HashMap<RegId, DataType> = candidates.iter().map(|c| (c.reg, c.ty)).collect();

    let mut stacks: HashMap<RegId, Vec<Operand>> = candidates.iter().map(|c| (c.reg, Vec::new())).collect();
    let mut load_subst: HashMap<RegId, Operand> = HashMap::new();

    rename(f, &dom, f.entry(), &candidate_set, &candidate_ty, &phi_owner, &mut stacks, &mut load_subst);

    // Substitute every load's result with the value live at that point, then strip
    // the now-dead allocas/stores/loads for promoted variables.
    for block in f.block_order.clone() {
        for inst in &mut f.block_mut(block).insts {
            for u in inst.uses_mut() {
                if let Some(r) = u.as_reg() {
                    if let Some(repl) = load_subst.get(&r) {
                        *u = *repl;
                    }
                }
            }
        }
    }
    for block in f.block_order.clone() {
        f.block_mut(block).insts.retain(|inst| match inst {
            Instruction::Alloca { dest, .. } => !candidate_set.contains(dest),
            Instruction::Store { ptr, .. } => ptr.as_reg().map(|r| !candidate_set.contains(&r)).unwrap_or(true),
            Instruction::Load { ptr, .. } => ptr.as_reg().map(|r| !candidate_set.contains(&r)).unwrap_or(true),
            _ => true,
        });
    }
}

#[allow(clippy::too_many_arguments)]
fn rename(
    f: &mut Function,
    dom: &Dominators,
    block: BlockId,
    candidate_set: &HashSet<RegId>,
    candidate_ty: &HashMap<RegId, DataType>,
    phi_owner: &HashMap<RegId, RegId>,
    stacks: &mut HashMap<RegId, Vec<Operand>>,
    load_subst: &mut HashMap<RegId, Operand>,
) {
    let mut pushed: Vec<RegId> = Vec::new();

    let insts = f.block(block).insts.clone();
    for inst in &insts {
        match inst {
            Instruction::Phi { dest, .. } => {
                if let Some(&var) = phi_owner.get(dest) {
                    stacks.get_mut(&var).unwrap().push(Operand::Register(*dest, candidate_ty[&var]));
                    pushed.push(var);
                }
            }
            Instruction::Store { val, ptr } => {
                if let Some(r) = ptr.as_reg() {
                    if candidate_set.contains(&r) {
                        stacks.get_mut(&r).unwrap().push(*val);
                        pushed.push(r);
                    }
                }
            }
            Instruction::Load { dest, ptr, .. } => {
                if let Some(r) = ptr.as_reg() {
                    if candidate_set.contains(&r) {
                        let top = stacks[&r].last().copied().unwrap_or_else(|| zero_for(candidate_ty[&r]));
                        load_subst.insert(*dest, top);
                    }
                }
            }
            _ => {}
        }
    }

    // Patch successors' Phis with this block's current top-of-stack value.
    for succ in f.block(block).successors() {
        for inst in f.block_mut(succ).phis_mut() {
            if let Instruction::Phi { dest, incoming, ty } = inst {
                if let Some(&var) = phi_owner.get(dest) {
                    let val = stacks[&var].last().copied().unwrap_or_else(|| zero_for(*ty));
                    if !incoming.iter().any(|(l, _)| *l == block) {
                        incoming.push((block, val));
                    }
                }
            }
        }
    }

    for child in dom.children(block) {
        rename(f, dom, child, candidate_set, candidate_ty, phi_owner, stacks, load_subst);
    }

    for var in pushed {
        stacks.get_mut(&var).unwrap().pop();
    }
}

fn substitute_in_function(f: &mut Function, old: RegId, new: Operand) {
    for block in f.block_order.clone() {
        for inst in &mut f.block_mut(block).insts {
            for u in inst.uses_mut() {
                if u.as_reg() == Some(old) {
                    *u = new;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instruction::{IntCond, Instruction};
    use crate::verify::verify_function;

    /// int g(int c, int a, int b) { int x; if (c) x=a; else x=b; return x; }
    #[test]
    fn promotes_across_diamond_with_phi() {
        let mut f = Function::new("g", DataType::I32, &[(DataType::I32, false); 3]);
        let entry = f.entry();
        let then_b = f.create_block();
        let else_b = f.create_block();
        let merge = f.create_block();
        let (c, a, b) = (f.sig.params[0].1, f.sig.params[1].1, f.sig.params[2].1);

        let x = f.fresh_reg();
        f.block_mut(entry).insts.push(Instruction::Alloca { dest: x, ty: DataType::I32, dims: vec![] });
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
            false_label: else_b,
        });
        f.block_mut(then_b).insts.push(Instruction::Store { val: Operand::Register(a, DataType::I32), ptr: Operand::Register(x, DataType::Ptr) });
        f.block_mut(then_b).insts.push(Instruction::BrUncond { label: merge });
        f.block_mut(else_b).insts.push(Instruction::Store { val: Operand::Register(b, DataType::I32), ptr: Operand::Register(x, DataType::Ptr) });
        f.block_mut(else_b).insts.push(Instruction::BrUncond { label: merge });
        let load = f.fresh_reg();
        f.block_mut(merge).insts.push(Instruction::Load { dest: load, ty: DataType::I32, ptr: Operand::Register(x, DataType::Ptr) });
        f.block_mut(merge).insts.push(Instruction::Ret { value: Some(Operand::Register(load, DataType::I32)) });

        run(&mut f);
        verify_function(&f).expect("valid SSA after mem2reg");

        let merge_block = f.block(merge);
        assert!(merge_block.insts.iter().any(|i| i.is_phi()), "expected a phi in the merge block");
        assert!(!f.block(entry).insts.iter().any(|i| matches!(i, Instruction::Alloca { .. })));
    }

    #[test]
    fn fast_path_single_entry_store() {
        let mut f = Function::new("f", DataType::I32, &[]);
        let entry = f.entry();
        let x = f.fresh_reg();
        f.block_mut(entry).insts.push(Instruction::Alloca { dest: x, ty: DataType::I32, dims: vec![] });
        f.block_mut(entry)
            .insts
            .push(Instruction::Store { val: Operand::ImmI32(42), ptr: Operand::Register(x, DataType::Ptr) });
        let load = f.fresh_reg();
        f.block_mut(entry).insts.push(Instruction::Load { dest: load, ty: DataType::I32, ptr: Operand::Register(x, DataType::Ptr) });
        f.block_mut(entry).insts.push(Instruction::Ret { value: Some(Operand::Register(load, DataType::I32)) });

        run(&mut f);
        verify_function(&f).unwrap();
        match f.block(entry).insts.last() {
            Some(Instruction::Ret { value: Some(Operand::ImmI32(42)) }) => {}
            other => panic!("expected ret i32 42, got {other:?}"),
        }
    }
}
