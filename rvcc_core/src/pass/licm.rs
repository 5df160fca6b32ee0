//! Loop-invariant code motion (spec §4.2.7): hoists pure instructions, invariant
//! global loads, and speculatively-guarded integer division/modulo whose operands
//! are all loop-invariant into a (possibly synthesized) preheader.
//!
//! Integer division/modulo are pure in the SSA sense but can trap on a zero divisor,
//! so hoisting one out of a loop that might execute zero times changes observable
//! behavior. A `Div`/`Mod` with a known-nonzero-constant divisor hoists directly; one
//! whose divisor is merely loop-invariant (not a compile-time constant) hoists behind
//! a speculation guard: a diamond is spliced into the preheader chain that checks the
//! divisor against zero, takes the division only on the nonzero arm, and merges the
//! result with `0` on the other arm through a Phi reusing the original destination
//! register. A divisor that provably divides by zero, or isn't loop-invariant at all,
//! is left in the loop body.
//!
//! A `Load` is invariant if the address it reads is a global this function never
//! stores to (directly, or through a `Gep` chain rooted at that global) and the
//! function contains no `Call` — a call's callee is opaque here (no interprocedural
//! modref analysis is in scope), so any call conservatively marks every global as
//! possibly-stored for the remainder of this function.

use hashbrown::HashSet;
use log::debug;

use crate::analysis::cfg::Cfg;
use crate::analysis::dominators::Dominators;
use crate::analysis::loop_info::LoopInfo;
use crate::ir::function::Function;
use crate::ir::instruction::{Instruction, IntBinOp, IntCond};
use crate::ir::operand::{BlockId, GlobalId, Operand, RegId};
use crate::ir::types::DataType;

const MAX_ITERS: usize = 8;

/// Which globals this function might write to. `Some(set)` when every store's
/// target could be traced to a specific global; `None` once any `Call` appears,
/// since the callee might write through an alias of any global.
enum GlobalMutation {
    Known(HashSet<GlobalId>),
    Unknown,
}

fn classify_global_mutation(f: &Function) -> GlobalMutation {
    if f.blocks_in_order().any(|b| b.insts.iter().any(|i| matches!(i, Instruction::Call { .. }))) {
        return GlobalMutation::Unknown;
    }
    let mut stored = HashSet::new();
    for b in f.blocks_in_order() {
        for inst in &b.insts {
            if let Instruction::Store { ptr, .. } = inst {
                if let Some(g) = root_global(*ptr, f) {
                    stored.insert(g);
                }
            }
        }
    }
    GlobalMutation::Known(stored)
}

/// Traces an address operand back to the global it's ultimately rooted in, through
/// a chain of `Gep`s off that global, if any.
fn root_global(op: Operand, f: &Function) -> Option<GlobalId> {
    match op {
        Operand::Global(g) => Some(g),
        Operand::Register(r, _) => f.blocks_in_order().find_map(|b| {
            b.insts.iter().find_map(|i| match i {
                Instruction::Gep { dest, base, .. } if *dest == r => root_global(*base, f),
                _ => None,
            })
        }),
        _ => None,
    }
}

fn is_invariant_global_load(ptr: Operand, f: &Function, mutation: &GlobalMutation) -> bool {
    match mutation {
        GlobalMutation::Unknown => false,
        GlobalMutation::Known(stored) => root_global(ptr, f).is_some_and(|g| !stored.contains(&g)),
    }
}

/// Runs LICM to a small fixpoint, returning the number of instructions hoisted.
pub fn run(f: &mut Function) -> usize {
    let mut total = 0;
    for _ in 0..MAX_ITERS {
        let cfg = Cfg::build(f);
        let dom = Dominators::forward(f);
        let loops = LoopInfo::build(f, &cfg, &dom);
        if loops.loops.is_empty() {
            break;
        }

        let mut order: Vec<usize> = (0..loops.loops.len()).collect();
        order.sort_by_key(|&i| std::cmp::Reverse(loops.loops[i].depth(&loops.loops)));

        let mut hoisted_this_round = 0;
        for &i in &order {
            hoisted_this_round += hoist_loop(f, &cfg, &loops.loops[i]);
            if hoisted_this_round > 0 {
                // CFG/dominators are now stale (preheader insertion); restart the
                // outer loop to recompute before touching another loop.
                break;
            }
        }
        total += hoisted_this_round;
        if hoisted_this_round == 0 {
            break;
        }
    }
    debug!("licm: hoisted {total} invariant instructions");
    total
}

fn hoist_loop(f: &mut Function, cfg: &Cfg, l: &crate::analysis::loop_info::Loop) -> usize {
    let preheader = match l.preheader(cfg) {
        Some(p) => p,
        None => synthesize_preheader(f, cfg, l.header, &l.body),
    };
    let mutation = classify_global_mutation(f);

    let mut invariant_regs: HashSet<RegId> = HashSet::new();
    let mut hoisted = 0;
    // The end of the chain that now precedes the header: a plain hoist appends to
    // it; a guarded div/mod hoist splices a diamond after it and moves the tail to
    // the diamond's merge block.
    let mut tail = preheader;

    let body_order: Vec<BlockId> = f.block_order.iter().copied().filter(|b| l.body.contains(b)).collect();
    // Process in a stable order; a second inner pass catches chains where an
    // instruction becomes invariant only after an earlier one in program order was
    // hoisted.
    for _ in 0..2 {
        for &block in &body_order {
            let insts = f.block(block).insts.clone();
            let mut keep = Vec::with_capacity(insts.len());
            for inst in insts {
                if inst.is_phi() {
                    keep.push(inst);
                    continue;
                }
                match classify_invariant(&inst, &l.body, f, &invariant_regs, &mutation) {
                    Hoistability::No => keep.push(inst),
                    Hoistability::Plain => {
                        if let Some(dest) = inst.def() {
                            invariant_regs.insert(dest);
                        }
                        f.block_mut(tail).insert_before_terminator(inst);
                        hoisted += 1;
                    }
                    Hoistability::GuardedDivMod => {
                        let Instruction::IntBin { dest, op, ty, lhs, rhs } = inst else { unreachable!() };
                        tail = hoist_guarded_div(f, tail, dest, op, ty, lhs, rhs);
                        invariant_regs.insert(dest);
                        hoisted += 1;
                    }
                }
            }
            f.block_mut(block).insts = keep;
        }
    }
    hoisted
}

enum Hoistability {
    No,
    Plain,
    GuardedDivMod,
}

fn classify_invariant(inst: &Instruction, body: &HashSet<BlockId>, f: &Function, invariant: &HashSet<RegId>, mutation: &GlobalMutation) -> Hoistability {
    let operand_invariant = |op: Operand| match op.as_reg() {
        None => true,
        Some(r) => invariant.contains(&r) || defined_outside(r, body, f),
    };

    match inst {
        Instruction::Load { ptr, .. } => {
            if is_invariant_global_load(*ptr, f, mutation) && operand_invariant(*ptr) {
                Hoistability::Plain
            } else {
                Hoistability::No
            }
        }
        Instruction::IntBin { op: IntBinOp::Div | IntBinOp::Mod, lhs, rhs, .. } => {
            if !operand_invariant(*lhs) || !operand_invariant(*rhs) {
                return Hoistability::No;
            }
            match rhs.as_const_i32() {
                Some(v) if v != 0 => Hoistability::Plain,
                Some(_) => Hoistability::No,
                None => Hoistability::GuardedDivMod,
            }
        }
        _ if inst.is_pure() => {
            if inst.uses().iter().all(|u| operand_invariant(*u)) {
                Hoistability::Plain
            } else {
                Hoistability::No
            }
        }
        _ => Hoistability::No,
    }
}

/// Splices a diamond after `tail`: checks `rhs != 0`, performs the division only on
/// the nonzero arm, and merges with `0` on the other arm through a Phi that reuses
/// `dest` — so every existing use of the original instruction's destination inside
/// the loop body keeps working unchanged. Returns the merge block, the new tail.
fn hoist_guarded_div(f: &mut Function, tail: BlockId, dest: RegId, op: IntBinOp, ty: DataType, lhs: Operand, rhs: Operand) -> BlockId {
    let succ = match f.block_mut(tail).terminator_mut() {
        Some(Instruction::BrUncond { label }) => *label,
        other => unreachable!("preheader chain tail must end in an unconditional branch, got {other:?}"),
    };

    let div_arm = f.create_block();
    let zero_arm = f.create_block();
    let merge = f.create_block();

    let cmp = f.fresh_reg();
    f.block_mut(tail).insts.pop();
    f.block_mut(tail).insts.push(Instruction::Icmp { dest: cmp, cond: IntCond::Ne, lhs: rhs, rhs: Operand::ImmI32(0) });
    f.block_mut(tail).insts.push(Instruction::BrCond { cond: Operand::Register(cmp, DataType::I1), true_label: div_arm, false_label: zero_arm });

    let div_result = f.fresh_reg();
    f.block_mut(div_arm).insts.push(Instruction::IntBin { dest: div_result, op, ty, lhs, rhs });
    f.block_mut(div_arm).insts.push(Instruction::BrUncond { label: merge });

    f.block_mut(zero_arm).insts.push(Instruction::BrUncond { label: merge });

    f.block_mut(merge).insts.push(Instruction::Phi {
        dest,
        ty,
        incoming: vec![(div_arm, Operand::Register(div_result, ty)), (zero_arm, Operand::ImmI32(0))],
    });
    f.block_mut(merge).insts.push(Instruction::BrUncond { label: succ });

    merge
}

fn defined_outside(reg: RegId, body: &HashSet<BlockId>, f: &Function) -> bool {
    for &b in body {
        if f.block(b).insts.iter().any(|i| i.def() == Some(reg)) {
            return false;
        }
    }
    true
}

/// Creates a new preheader block, redirects every non-loop predecessor edge that
/// targeted `header` to it instead, and patches `header`'s Phis' incoming labels
/// accordingly.
fn synthesize_preheader(f: &mut Function, cfg: &Cfg, header: BlockId, body: &HashSet<BlockId>) -> BlockId {
    let outside_preds: Vec<BlockId> = cfg.predecessors(header).iter().copied().filter(|p| !body.contains(p)).collect();

    let preheader = f.create_block();
    f.block_mut(preheader).insts.push(Instruction::BrUncond { label: header });

    for pred in &outside_preds {
        retarget(f.block_mut(*pred), header, preheader);
    }
    for phi in f.block_mut(header).phis_mut() {
        if let Instruction::Phi { incoming, .. } = phi {
            for (label, _) in incoming.iter_mut() {
                if outside_preds.contains(label) {
                    *label = preheader;
                }
            }
        }
    }
    preheader
}

fn retarget(block: &mut crate::ir::block::Block, from: BlockId, to: BlockId) {
    if let Some(term) = block.terminator_mut() {
        match term {
            Instruction::BrUncond { label } if *label == from => *label = to,
            Instruction::BrCond { true_label, false_label, .. } => {
                if *true_label == from {
                    *true_label = to;
                }
                if *false_label == from {
                    *false_label = to;
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instruction::{IntCond, Instruction};
    use crate::ir::operand::Operand;
    use crate::ir::types::DataType;
    use crate::verify::verify_function;

    /// for (i = 0; i < n; i++) { t = a * b; use(t) }  — `a * b` is loop-invariant.
    fn loop_with_invariant() -> (Function, RegId) {
        let mut f = Function::new("f", DataType::I32, &[(DataType::I32, false); 3]);
        let entry = f.entry();
        let cond = f.create_block();
        let body = f.create_block();
        let step = f.create_block();
        let end = f.create_block();
        let (n, a, b) = (f.sig.params[0].1, f.sig.params[1].1, f.sig.params[2].1);
        f.block_mut(entry).insts.push(Instruction::BrUncond { label: cond });

        let i_phi = f.fresh_reg();
        let cmp = f.fresh_reg();
        f.block_mut(cond).insts.push(Instruction::Phi {
            dest: i_phi,
            ty: DataType::I32,
            incoming: vec![(entry, Operand::ImmI32(0)), (step, Operand::Register(i_phi, DataType::I32))],
        });
        f.block_mut(cond).insts.push(Instruction::Icmp {
            dest: cmp,
            cond: IntCond::Slt,
            lhs: Operand::Register(i_phi, DataType::I32),
            rhs: Operand::Register(n, DataType::I32),
        });
        f.block_mut(cond).insts.push(Instruction::BrCond {
            cond: Operand::Register(cmp, DataType::I1),
            true_label: body,
            false_label: end,
        });

        let t = f.fresh_reg();
        f.block_mut(body).insts.push(Instruction::IntBin {
            dest: t,
            op: IntBinOp::Mul,
            ty: DataType::I32,
            lhs: Operand::Register(a, DataType::I32),
            rhs: Operand::Register(b, DataType::I32),
        });
        f.block_mut(body).insts.push(Instruction::BrUncond { label: step });
        f.block_mut(step).insts.push(Instruction::BrUncond { label: cond });
        f.block_mut(end).insts.push(Instruction::Ret { value: Some(Operand::ImmI32(0)) });
        (f, t)
    }

    #[test]
    fn hoists_invariant_multiply_to_preheader() {
        let (mut f, _t) = loop_with_invariant();
        let hoisted = run(&mut f);
        assert_eq!(hoisted, 1);
        verify_function(&f).expect("valid SSA after LICM");
        // entry's unconditional successor is now the synthesized preheader, which
        // carries the hoisted multiply.
        let preheader_id = match f.block(f.entry()).terminator() {
            Some(Instruction::BrUncond { label }) => *label,
            other => panic!("expected entry to jump to a preheader, got {other:?}"),
        };
        assert!(f.block(preheader_id).insts.iter().any(|i| matches!(i, Instruction::IntBin { op: IntBinOp::Mul, .. })));
    }

    /// for (i = 0; i < n; i++) { t = n / d; use(t) } — `n` and `d` are both params,
    /// so the divisor is loop-invariant but not a compile-time constant: this must
    /// hoist behind a zero-guard diamond, not stay in the loop body.
    #[test]
    fn hoists_invariant_division_behind_a_zero_guard() {
        let mut f = Function::new("f", DataType::I32, &[(DataType::I32, false); 2]);
        let entry = f.entry();
        let cond = f.create_block();
        let body = f.create_block();
        let end = f.create_block();
        let (n, d) = (f.sig.params[0].1, f.sig.params[1].1);
        f.block_mut(entry).insts.push(Instruction::BrUncond { label: cond });
        let i_phi = f.fresh_reg();
        let cmp = f.fresh_reg();
        f.block_mut(cond).insts.push(Instruction::Phi {
            dest: i_phi,
            ty: DataType::I32,
            incoming: vec![(entry, Operand::ImmI32(0)), (body, Operand::Register(i_phi, DataType::I32))],
        });
        f.block_mut(cond).insts.push(Instruction::Icmp {
            dest: cmp,
            cond: IntCond::Slt,
            lhs: Operand::Register(i_phi, DataType::I32),
            rhs: Operand::Register(n, DataType::I32),
        });
        f.block_mut(cond).insts.push(Instruction::BrCond {
            cond: Operand::Register(cmp, DataType::I1),
            true_label: body,
            false_label: end,
        });
        let t = f.fresh_reg();
        f.block_mut(body).insts.push(Instruction::IntBin {
            dest: t,
            op: IntBinOp::Div,
            ty: DataType::I32,
            lhs: Operand::Register(n, DataType::I32),
            rhs: Operand::Register(d, DataType::I32),
        });
        f.block_mut(body).insts.push(Instruction::BrUncond { label: cond });
        f.block_mut(end).insts.push(Instruction::Ret { value: Some(Operand::ImmI32(0)) });

        let hoisted = run(&mut f);
        assert_eq!(hoisted, 1);
        verify_function(&f).expect("valid SSA after a guarded LICM hoist");
        assert!(!f.block(body).insts.iter().any(|i| matches!(i, Instruction::IntBin { op: IntBinOp::Div, .. })));
        // The guard's zero-check and the merging Phi both now live somewhere on the
        // path from entry to the loop header.
        assert!(f.blocks_in_order().any(|b| b.insts.iter().any(|i| matches!(i, Instruction::Icmp { cond: IntCond::Ne, .. }))));
        assert!(f.blocks_in_order().any(|b| b.insts.iter().any(|i| matches!(i, Instruction::Phi { dest, .. } if *dest == t))));
    }

    /// for (i = 0; i < n; i++) { t = n / i; use(t) } — the divisor is the induction
    /// variable itself, defined inside the loop body, so it is never invariant and
    /// the division must stay put regardless of the zero-guard machinery.
    #[test]
    fn does_not_hoist_division_whose_divisor_is_loop_variant() {
        let mut f = Function::new("f", DataType::I32, &[(DataType::I32, false); 1]);
        let entry = f.entry();
        let cond = f.create_block();
        let body = f.create_block();
        let end = f.create_block();
        let n = f.sig.params[0].1;
        f.block_mut(entry).insts.push(Instruction::BrUncond { label: cond });
        let i_phi = f.fresh_reg();
        let cmp = f.fresh_reg();
        f.block_mut(cond).insts.push(Instruction::Phi {
            dest: i_phi,
            ty: DataType::I32,
            incoming: vec![(entry, Operand::ImmI32(0)), (body, Operand::Register(i_phi, DataType::I32))],
        });
        f.block_mut(cond).insts.push(Instruction::Icmp {
            dest: cmp,
            cond: IntCond::Slt,
            lhs: Operand::Register(i_phi, DataType::I32),
            rhs: Operand::Register(n, DataType::I32),
        });
        f.block_mut(cond).insts.push(Instruction::BrCond {
            cond: Operand::Register(cmp, DataType::I1),
            true_label: body,
            false_label: end,
        });
        let t = f.fresh_reg();
        f.block_mut(body).insts.push(Instruction::IntBin {
            dest: t,
            op: IntBinOp::Div,
            ty: DataType::I32,
            lhs: Operand::Register(n, DataType::I32),
            rhs: Operand::Register(i_phi, DataType::I32),
        });
        f.block_mut(body).insts.push(Instruction::BrUncond { label: cond });
        f.block_mut(end).insts.push(Instruction::Ret { value: Some(Operand::ImmI32(0)) });

        let hoisted = run(&mut f);
        assert_eq!(hoisted, 0);
    }

    /// for (i = 0; i < n; i++) { t = *g; use(t) } — `g` is a global the function
    /// never stores to, so the load is invariant and must hoist to the preheader.
    #[test]
    fn hoists_load_from_a_global_never_stored_to() {
        let mut globals = crate::ir::operand::GlobalTable::new();
        let g = globals.intern("g");
        let mut f = Function::new("f", DataType::I32, &[(DataType::I32, false); 1]);
        let entry = f.entry();
        let cond = f.create_block();
        let body = f.create_block();
        let end = f.create_block();
        let n = f.sig.params[0].1;
        f.block_mut(entry).insts.push(Instruction::BrUncond { label: cond });
        let i_phi = f.fresh_reg();
        let cmp = f.fresh_reg();
        f.block_mut(cond).insts.push(Instruction::Phi {
            dest: i_phi,
            ty: DataType::I32,
            incoming: vec![(entry, Operand::ImmI32(0)), (body, Operand::Register(i_phi, DataType::I32))],
        });
        f.block_mut(cond).insts.push(Instruction::Icmp {
            dest: cmp,
            cond: IntCond::Slt,
            lhs: Operand::Register(i_phi, DataType::I32),
            rhs: Operand::Register(n, DataType::I32),
        });
        f.block_mut(cond).insts.push(Instruction::BrCond {
            cond: Operand::Register(cmp, DataType::I1),
            true_label: body,
            false_label: end,
        });
        let t = f.fresh_reg();
        f.block_mut(body).insts.push(Instruction::Load { dest: t, ty: DataType::I32, ptr: Operand::Global(g) });
        f.block_mut(body).insts.push(Instruction::BrUncond { label: cond });
        f.block_mut(end).insts.push(Instruction::Ret { value: Some(Operand::ImmI32(0)) });

        let hoisted = run(&mut f);
        assert_eq!(hoisted, 1);
        verify_function(&f).expect("valid SSA after hoisting a global load");
        assert!(!f.blocks_in_order().any(|b| b.id == body && b.insts.iter().any(|i| matches!(i, Instruction::Load { .. }))));
    }

    /// Same shape, but the function also stores to `g` (outside the loop): the load
    /// can no longer be assumed invariant and must stay in the loop body.
    #[test]
    fn does_not_hoist_load_from_a_global_this_function_stores_to() {
        let mut globals = crate::ir::operand::GlobalTable::new();
        let g = globals.intern("g");
        let mut f = Function::new("f", DataType::I32, &[(DataType::I32, false); 1]);
        let entry = f.entry();
        let cond = f.create_block();
        let body = f.create_block();
        let end = f.create_block();
        let n = f.sig.params[0].1;
        f.block_mut(entry)
            .insts
            .push(Instruction::Store { val: Operand::ImmI32(0), ptr: Operand::Global(g) });
        f.block_mut(entry).insts.push(Instruction::BrUncond { label: cond });
        let i_phi = f.fresh_reg();
        let cmp = f.fresh_reg();
        f.block_mut(cond).insts.push(Instruction::Phi {
            dest: i_phi,
            ty: DataType::I32,
            incoming: vec![(entry, Operand::ImmI32(0)), (body, Operand::Register(i_phi, DataType::I32))],
        });
        f.block_mut(cond).insts.push(Instruction::Icmp {
            dest: cmp,
            cond: IntCond::Slt,
            lhs: Operand::Register(i_phi, DataType::I32),
            rhs: Operand::Register(n, DataType::I32),
        });
        f.block_mut(cond).insts.push(Instruction::BrCond {
            cond: Operand::Register(cmp, DataType::I1),
            true_label: body,
            false_label: end,
        });
        let t = f.fresh_reg();
        f.block_mut(body).insts.push(Instruction::Load { dest: t, ty: DataType::I32, ptr: Operand::Global(g) });
        f.block_mut(body).insts.push(Instruction::BrUncond { label: cond });
        f.block_mut(end).insts.push(Instruction::Ret { value: Some(Operand::ImmI32(0)) });

        let hoisted = run(&mut f);
        assert_eq!(hoisted, 0);
    }
}
