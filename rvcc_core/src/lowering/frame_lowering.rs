//! Prologue/epilogue emission (spec §4.5.3): saves `ra`/`fp`, carves out the frame,
//! and restores both on every return. Frame layout, low to high address from the
//! post-prologue `sp`: outgoing-argument area, locals, spill slots, then the
//! 16-byte `fp`/`ra` save area; `fp` is set to point at the save area's base, so
//! the caller's own frame (its outgoing-argument area, where our overflow
//! parameters live) is always reachable at `fp + 16 + 8*k` regardless of how big
//! this function's own frame is (spec-grounded choice, see `isel::call_conv`).

use crate::mir::function::MFunction;
use crate::mir::instruction::MInstruction;
use crate::mir::operand::{MOperand, MReg};
use crate::mir::types::MDataType;
use crate::target::riscv64::{RvInstr, RvOp};
use crate::target::TargetAdapter;

const SAVE_AREA_SIZE: i64 = 16;

/// `body_size` is the value `FrameInfo::calculate_offsets` returned; callers run
/// that (and `stack_lowering`, which depends on the same offsets) before this.
pub fn run(f: &mut MFunction, target: &dyn TargetAdapter, body_size: i64) {
    let needs_frame = body_size > 0 || function_has_call(f);
    if !needs_frame {
        return;
    }
    let total = align16(body_size + SAVE_AREA_SIZE);

    let sp = MReg::physical(target.stack_pointer(), MDataType::I64);
    let fp = MReg::physical(target.frame_pointer(), MDataType::I64);
    let ra = MReg::physical(target.return_address(), MDataType::I64);

    let mut prologue = Vec::new();
    prologue.push(addi(sp, sp, -total));
    prologue.push(store_64(sp, body_size, fp));
    prologue.push(store_64(sp, body_size + 8, ra));
    prologue.push(addi(fp, sp, body_size));

    let epilogue = vec![load_64(fp, sp, body_size), load_64(ra, sp, body_size + 8), addi(sp, sp, total)];

    let entry = f.entry();
    let mut entry_insts = std::mem::take(&mut f.block_mut(entry).insts);
    prologue.append(&mut entry_insts);
    f.block_mut(entry).insts = prologue;

    for b in f.block_order.clone() {
        let insts = std::mem::take(&mut f.block_mut(b).insts);
        let mut out = Vec::with_capacity(insts.len() + epilogue.len());
        for inst in insts {
            if matches!(&inst, MInstruction::Target(t) if t.op == RvOp::Ret) {
                out.extend(epilogue.clone());
            }
            out.push(inst);
        }
        f.block_mut(b).insts = out;
    }
}

fn function_has_call(f: &MFunction) -> bool {
    f.blocks_in_order().any(|b| b.insts.iter().any(|i| i.is_call()))
}

fn align16(v: i64) -> i64 {
    (v + 15) & !15
}

fn addi(dest: MReg, src: MReg, imm: i64) -> MInstruction {
    let mut i = RvInstr::new(RvOp::Addi);
    i.defs.push(dest);
    i.uses.push(MOperand::Reg(src));
    i.imm = Some(imm);
    MInstruction::Target(i)
}

fn store_64(base: MReg, offset: i64, src: MReg) -> MInstruction {
    let mut i = RvInstr::new(RvOp::Sd);
    i.uses.push(MOperand::Reg(base));
    i.uses.push(MOperand::Reg(src));
    i.imm = Some(offset);
    MInstruction::Target(i)
}

fn load_64(dest: MReg, base: MReg, offset: i64) -> MInstruction {
    let mut i = RvInstr::new(RvOp::Ld);
    i.defs.push(dest);
    i.uses.push(MOperand::Reg(base));
    i.imm = Some(offset);
    MInstruction::Target(i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::riscv64::Riscv64;

    #[test]
    fn leaf_function_with_no_locals_gets_no_frame() {
        let target = Riscv64::default();
        let mut f = MFunction::new("f", None);
        f.block_mut(f.entry()).insts.push(MInstruction::Target(RvInstr::new(RvOp::Ret)));
        let body_size = f.frame.calculate_offsets();
        run(&mut f, &target, body_size);
        assert_eq!(f.block(f.entry()).insts.len(), 1);
    }

    #[test]
    fn function_with_a_local_gets_prologue_and_epilogue() {
        let target = Riscv64::default();
        let mut f = MFunction::new("f", None);
        f.frame.create_local(0, 16, 8);
        f.block_mut(f.entry()).insts.push(MInstruction::Target(RvInstr::new(RvOp::Ret)));
        let body_size = f.frame.calculate_offsets();
        run(&mut f, &target, body_size);
        let insts = &f.block(f.entry()).insts;
        assert!(insts.len() > 1);
        assert!(matches!(&insts[0], MInstruction::Target(i) if i.op == RvOp::Addi));
        assert!(matches!(insts.last().unwrap(), MInstruction::Target(i) if i.op == RvOp::Ret));
    }
}
