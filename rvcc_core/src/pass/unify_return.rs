//! Return unification (spec §4.2.11): collapses every `Ret` in a function into a
//! single exit block feeding a Phi, giving later passes (post-dominance, LICM's
//! preheader reasoning) exactly one block to treat as "the" exit.

use log::debug;

use crate::ir::function::Function;
use crate::ir::instruction::Instruction;
use crate::ir::operand::Operand;
use crate::ir::types::DataType;

/// Runs return unification. Returns `true` if the function had more than one `Ret`
/// and was rewritten.
pub fn run(f: &mut Function) -> bool {
    let ret_blocks = f.ret_instructions();
    if ret_blocks.len() <= 1 {
        return false;
    }

    let exit = f.create_block();
    let mut incoming = Vec::with_capacity(ret_blocks.len());
    for block in &ret_blocks {
        let value = match f.block_mut(*block).insts.pop() {
            Some(Instruction::Ret { value }) => value,
            other => unreachable!("ret_instructions() named a block without a Ret terminator: {other:?}"),
        };
        f.block_mut(*block).insts.push(Instruction::BrUncond { label: exit });
        if let Some(v) = value {
            incoming.push((*block, v));
        }
    }

    if incoming.is_empty() {
        f.block_mut(exit).insts.push(Instruction::Ret { value: None });
    } else {
        let ty = f.sig.ret_ty;
        if ty == DataType::Void {
            f.block_mut(exit).insts.push(Instruction::Ret { value: None });
        } else {
            let dest = f.fresh_reg();
            f.block_mut(exit).push_phi(Instruction::Phi { dest, ty, incoming });
            f.block_mut(exit).insts.push(Instruction::Ret { value: Some(Operand::Register(dest, ty)) });
        }
    }

    debug!("unify_return: merged {} return points into block {}", ret_blocks.len(), exit);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instruction::{IntCond, Instruction};
    use crate::verify::verify_function;

    #[test]
    fn merges_two_returns_through_a_phi() {
        let mut f = Function::new("f", DataType::I32, &[(DataType::I32, false)]);
        let entry = f.entry();
        let then_b = f.create_block();
        let else_b = f.create_block();
        let p0 = f.sig.params[0].1;
        let cmp = f.fresh_reg();
        f.block_mut(entry).insts.push(Instruction::Icmp {
            dest: cmp,
            cond: IntCond::Sgt,
            lhs: Operand::Register(p0, DataType::I32),
            rhs: Operand::ImmI32(0),
        });
        f.block_mut(entry).insts.push(Instruction::BrCond {
            cond: Operand::Register(cmp, DataType::I1),
            true_label: then_b,
            false_label: else_b,
        });
        f.block_mut(then_b).insts.push(Instruction::Ret { value: Some(Operand::ImmI32(1)) });
        f.block_mut(else_b).insts.push(Instruction::Ret { value: Some(Operand::ImmI32(0)) });

        let changed = run(&mut f);
        assert!(changed);
        verify_function(&f).expect("valid SSA after return unification");
        assert_eq!(f.ret_instructions().len(), 1);
    }

    #[test]
    fn single_return_is_left_alone() {
        let mut f = Function::new("f", DataType::I32, &[]);
        f.block_mut(f.entry()).insts.push(Instruction::Ret { value: Some(Operand::ImmI32(0)) });
        assert!(!run(&mut f));
    }
}
