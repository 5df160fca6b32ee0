//! Phi elimination (spec §4.5.2): after register allocation every `Phi`'s
//! destination and incoming values are concrete physical registers (or immediates),
//! so eliminating them is just inserting a copy at the end of each predecessor —
//! sequentialized so a cyclic rotation of registers (`a<-b, b<-a`) doesn't clobber
//! itself, using one scratch register per class (the same one register allocation
//! holds back from its allocatable pool) to break cycles.

use hashbrown::{HashMap, HashSet};

use crate::mir::block::MBlockId;
use crate::mir::function::MFunction;
use crate::mir::instruction::MInstruction;
use crate::mir::operand::{MOperand, MReg};
use crate::target::{RegClass, TargetRegisterInfo};

pub fn run(f: &mut MFunction, target: &dyn TargetRegisterInfo) {
    let mut block_copies: HashMap<MBlockId, Vec<(MReg, Vec<(MBlockId, MOperand)>)>> = HashMap::new();

    for &b in &f.block_order.clone() {
        let phis: Vec<(MReg, Vec<(MBlockId, MOperand)>)> = f
            .block(b)
            .insts
            .iter()
            .take_while(|i| i.is_phi())
            .filter_map(|i| match i {
                MInstruction::Phi { dest, incoming } => Some((*dest, incoming.clone())),
                _ => None,
            })
            .collect();
        if phis.is_empty() {
            continue;
        }
        f.block_mut(b).insts.retain(|i| !i.is_phi());
        block_copies.insert(b, phis);
    }

    let scratch_int = MReg::physical(*target.allocatable(RegClass::Int).last().unwrap(), crate::mir::types::MDataType::I64);
    let scratch_float = MReg::physical(*target.allocatable(RegClass::Float).last().unwrap(), crate::mir::types::MDataType::F64);

    for (succ, phis) in block_copies {
        let preds: HashSet<MBlockId> = phis.iter().flat_map(|(_, incoming)| incoming.iter().map(|(p, _)| *p)).collect();
        for pred in preds {
            let pairs: Vec<(MReg, MOperand)> = phis
                .iter()
                .filter_map(|(dest, incoming)| incoming.iter().find(|(p, _)| *p == pred).map(|(_, v)| (*dest, *v)))
                .collect();
            let moves = sequentialize(pairs, scratch_int, scratch_float);
            let block = f.block_mut(pred);
            for inst in moves {
                block.insert_before_terminator(inst);
            }
        }
        let _ = succ;
    }
}

/// Classic parallel-copy sequentialization: emit moves whose destination is not
/// needed as anyone else's source first; when only cycles remain, save one
/// register's value to scratch, redirect its consumer to read the scratch, and
/// continue.
fn sequentialize(mut pending: Vec<(MReg, MOperand)>, scratch_int: MReg, scratch_float: MReg) -> Vec<MInstruction> {
    let mut result = Vec::new();
    pending.retain(|(d, s)| s.as_reg() != Some(*d));

    while !pending.is_empty() {
        let ready = pending.iter().position(|(d, _)| !pending.iter().any(|(_, s)| s.as_reg() == Some(*d)));
        if let Some(idx) = ready {
            let (d, s) = pending.remove(idx);
            result.push(MInstruction::Move { dest: d, src: s });
        } else {
            let (d, _) = pending[0];
            let scratch = if d.ty.is_float() { scratch_float } else { scratch_int };
            result.push(MInstruction::Move { dest: scratch, src: MOperand::Reg(d) });
            for (_, src) in pending.iter_mut() {
                if *src == MOperand::Reg(d) {
                    *src = MOperand::Reg(scratch);
                }
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::types::MDataType;
    use crate::target::riscv64::Riscv64;

    #[test]
    fn breaks_a_two_cycle_with_a_scratch_register() {
        let a = MReg::physical(10, MDataType::I32);
        let b = MReg::physical(11, MDataType::I32);
        let target = Riscv64::default();
        let scratch_int = MReg::physical(*target.allocatable(RegClass::Int).last().unwrap(), MDataType::I64);
        let scratch_float = MReg::physical(*target.allocatable(RegClass::Float).last().unwrap(), MDataType::F64);
        let moves = sequentialize(vec![(a, MOperand::Reg(b)), (b, MOperand::Reg(a))], scratch_int, scratch_float);
        assert_eq!(moves.len(), 3);
    }

    #[test]
    fn non_cyclic_copies_need_no_scratch() {
        let a = MReg::physical(10, MDataType::I32);
        let b = MReg::physical(11, MDataType::I32);
        let c = MReg::physical(12, MDataType::I32);
        let target = Riscv64::default();
        let scratch_int = MReg::physical(*target.allocatable(RegClass::Int).last().unwrap(), MDataType::I64);
        let scratch_float = MReg::physical(*target.allocatable(RegClass::Float).last().unwrap(), MDataType::F64);
        let moves = sequentialize(vec![(a, MOperand::Reg(b)), (b, MOperand::Reg(c))], scratch_int, scratch_float);
        assert_eq!(moves.len(), 2);
    }
}
