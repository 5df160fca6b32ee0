//! Tail-call elimination (spec §4.2.10): rewrites a self-recursive call in tail
//! position into a back edge, turning recursion into iteration. Only direct
//! self-recursion is handled — mutual recursion would need a call graph and is out
//! of scope here (see DESIGN.md).

use hashbrown::HashSet;
use log::debug;

use crate::ir::function::Function;
use crate::ir::instruction::{CallArg, Instruction};
use crate::ir::operand::{BlockId, GlobalId, Operand, RegId};

/// Runs TCO over `f`. Returns the number of tail-call sites rewritten.
pub fn run(f: &mut Function, self_global: GlobalId) -> usize {
    let sites = find_tail_calls(f, self_global);
    if sites.is_empty() {
        return 0;
    }

    let original_entry = f.entry();
    let header = f.create_block();

    // Move the original body into the new loop header; the entry block becomes a
    // trivial jump into it.
    let body = std::mem::take(&mut f.block_mut(original_entry).insts);
    f.block_mut(header).insts = body;
    f.block_mut(original_entry).insts.push(Instruction::BrUncond { label: header });

    // One Phi per parameter, seeded with the value coming from the real entry.
    let mut phi_regs = Vec::with_capacity(f.sig.params.len());
    let mut subst: Vec<(RegId, RegId)> = Vec::new();
    for &(ty, orig_reg) in f.sig.params.clone().iter() {
        let phi_dest = f.fresh_reg();
        f.block_mut(header).push_phi(Instruction::Phi {
            dest: phi_dest,
            ty,
            incoming: vec![(original_entry, Operand::Register(orig_reg, ty))],
        });
        phi_regs.push(phi_dest);
        subst.push((orig_reg, phi_dest));
    }

    // Every other use of a parameter register (i.e. everything but the seed Phi
    // incoming values we just inserted) now refers to the loop-carried value.
    for block in f.block_order.clone() {
        if block == original_entry {
            continue;
        }
        for inst in &mut f.block_mut(block).insts {
            let is_seed_phi = matches!(inst, Instruction::Phi { incoming, .. } if incoming.len() == 1 && incoming[0].0 == original_entry);
            if is_seed_phi {
                continue;
            }
            for u in inst.uses_mut() {
                if let Some(r) = u.as_reg() {
                    if let Some(&(_, new)) = subst.iter().find(|(old, _)| *old == r) {
                        let ty = u.ty();
                        *u = Operand::Register(new, ty);
                    }
                }
            }
        }
    }

    let mut rewritten = 0;
    for site in sites {
        let block = if site.block == original_entry { header } else { site.block };
        let insts = &mut f.block_mut(block).insts;
        let Instruction::Call { args, .. } = insts[site.call_index].clone() else { continue };
        // Append this call's arguments as the back-edge value for each parameter Phi.
        for (i, arg) in args.iter().enumerate() {
            if let Instruction::Phi { incoming, .. } = f.block_mut(header).insts.get_mut(i).expect("param phi") {
                incoming.push((block, arg.value));
            }
        }
        let b = f.block_mut(block);
        b.insts.truncate(site.call_index);
        b.insts.push(Instruction::BrUncond { label: header });
        rewritten += 1;
    }

    debug!("tco: rewrote {rewritten} self tail calls into loop back edges");
    rewritten
}

struct TailCall {
    block: BlockId,
    call_index: usize,
}

/// Registers that are either an `alloca`'s own result or a `gep` off one,
/// transitively — any of these point into this frame's stack slots and dangle
/// once the slot is reused by the next loop iteration.
fn alloca_derived_regs(f: &Function) -> HashSet<RegId> {
    let mut derived: HashSet<RegId> = HashSet::new();
    loop {
        let mut changed = false;
        for block in f.blocks_in_order() {
            for inst in &block.insts {
                match inst {
                    Instruction::Alloca { dest, .. } => {
                        changed |= derived.insert(*dest);
                    }
                    Instruction::Gep { dest, base, .. } => {
                        if base.as_reg().is_some_and(|r| derived.contains(&r)) {
                            changed |= derived.insert(*dest);
                        }
                    }
                    _ => {}
                }
            }
        }
        if !changed {
            break;
        }
    }
    derived
}

fn find_tail_calls(f: &Function, self_global: GlobalId) -> Vec<TailCall> {
    let alloca_derived = alloca_derived_regs(f);
    let mut out = Vec::new();
    for block in f.blocks_in_order() {
        if block.insts.len() < 2 {
            continue;
        }
        let n = block.insts.len();
        let (call, ret) = (&block.insts[n - 2], &block.insts[n - 1]);
        let is_match = match (call, ret) {
            (Instruction::Call { dest: Some(d), func, args, .. }, Instruction::Ret { value: Some(v) }) => {
                *func == self_global
                    && v.as_reg() == Some(*d)
                    && !args_alias_alloca(args, &alloca_derived)
            }
            (Instruction::Call { dest: None, func, args, .. }, Instruction::Ret { value: None }) => {
                *func == self_global && !args_alias_alloca(args, &alloca_derived)
            }
            _ => false,
        };
        if is_match {
            out.push(TailCall { block: block.id, call_index: n - 2 });
        }
    }
    out
}

fn args_alias_alloca(args: &[CallArg], alloca_derived: &HashSet<RegId>) -> bool {
    args.iter().any(|a| a.value.as_reg().is_some_and(|r| alloca_derived.contains(&r)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instruction::{IntBinOp, IntCond};
    use crate::ir::types::DataType;
    use crate::verify::verify_function;

    /// int fact_acc(int n, int acc) { if (n <= 1) return acc; return fact_acc(n-1, n*acc); }
    #[test]
    fn rewrites_self_tail_call_into_loop() {
        let mut f = Function::new("fact_acc", DataType::I32, &[(DataType::I32, false); 2]);
        let entry = f.entry();
        let then_b = f.create_block();
        let else_b = f.create_block();
        let (n, acc) = (f.sig.params[0].1, f.sig.params[1].1);

        let cmp = f.fresh_reg();
        f.block_mut(entry).insts.push(Instruction::Icmp {
            dest: cmp,
            cond: IntCond::Sle,
            lhs: Operand::Register(n, DataType::I32),
            rhs: Operand::ImmI32(1),
        });
        f.block_mut(entry).insts.push(Instruction::BrCond {
            cond: Operand::Register(cmp, DataType::I1),
            true_label: then_b,
            false_label: else_b,
        });
        f.block_mut(then_b).insts.push(Instruction::Ret { value: Some(Operand::Register(acc, DataType::I32)) });

        let n_minus_1 = f.fresh_reg();
        let n_times_acc = f.fresh_reg();
        f.block_mut(else_b).insts.push(Instruction::IntBin {
            dest: n_minus_1,
            op: IntBinOp::Sub,
            ty: DataType::I32,
            lhs: Operand::Register(n, DataType::I32),
            rhs: Operand::ImmI32(1),
        });
        f.block_mut(else_b).insts.push(Instruction::IntBin {
            dest: n_times_acc,
            op: IntBinOp::Mul,
            ty: DataType::I32,
            lhs: Operand::Register(n, DataType::I32),
            rhs: Operand::Register(acc, DataType::I32),
        });
        let call_dest = f.fresh_reg();
        let mut globals = crate::ir::operand::GlobalTable::new();
        let self_id = globals.intern("fact_acc");
        f.block_mut(else_b).insts.push(Instruction::Call {
            dest: Some(call_dest),
            func: self_id,
            ret_ty: DataType::I32,
            args: vec![
                CallArg { ty: DataType::I32, value: Operand::Register(n_minus_1, DataType::I32) },
                CallArg { ty: DataType::I32, value: Operand::Register(n_times_acc, DataType::I32) },
            ],
        });
        f.block_mut(else_b).insts.push(Instruction::Ret { value: Some(Operand::Register(call_dest, DataType::I32)) });

        let n_rewritten = run(&mut f, self_id);
        assert_eq!(n_rewritten, 1);
        verify_function(&f).expect("valid SSA after TCO");
        assert!(!f.blocks_in_order().any(|b| b.insts.iter().any(|i| matches!(i, Instruction::Call { .. }))));
    }

    /// void f(int n) { int local; if (n <= 0) return; f2(&local); f(n-1); }
    /// The recursive call itself passes a plain int, but an earlier call in the
    /// same block also reads the alloca — not what's being tested here. The real
    /// case: `f(n-1, &local)` — passing the address of a local straight into the
    /// tail call must block the rewrite, since the slot is reused next iteration.
    #[test]
    fn refuses_tail_call_passing_an_alloca_derived_pointer() {
        let mut f = Function::new("f", DataType::Void, &[(DataType::I32, false)]);
        let entry = f.entry();
        let n = f.sig.params[0].1;

        let local = f.fresh_reg();
        f.block_mut(entry).insts.push(Instruction::Alloca { dest: local, ty: DataType::I32, dims: vec![] });

        let n_minus_1 = f.fresh_reg();
        f.block_mut(entry).insts.push(Instruction::IntBin {
            dest: n_minus_1,
            op: IntBinOp::Sub,
            ty: DataType::I32,
            lhs: Operand::Register(n, DataType::I32),
            rhs: Operand::ImmI32(1),
        });

        let mut globals = crate::ir::operand::GlobalTable::new();
        let self_id = globals.intern("f");
        f.block_mut(entry).insts.push(Instruction::Call {
            dest: None,
            func: self_id,
            ret_ty: DataType::Void,
            args: vec![
                CallArg { ty: DataType::I32, value: Operand::Register(n_minus_1, DataType::I32) },
                CallArg { ty: DataType::Ptr, value: Operand::Register(local, DataType::Ptr) },
            ],
        });
        f.block_mut(entry).insts.push(Instruction::Ret { value: None });

        let n_rewritten = run(&mut f, self_id);
        assert_eq!(n_rewritten, 0);
        assert!(f.blocks_in_order().any(|b| b.insts.iter().any(|i| matches!(i, Instruction::Call { .. }))));
    }
}
