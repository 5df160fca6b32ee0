//! Stack object lowering (spec §4.5.3): once `FrameInfo::calculate_offsets` has
//! assigned every local and spill slot a concrete position, expand the
//! not-yet-offset pseudo ops (`LSlot`/`SSlot`/`FrameAddr`) into real loads, stores,
//! and address computations against `sp`. `sp` doesn't move within a function body
//! (no dynamic alloca in scope), so every object is reachable at a fixed
//! `offset(sp)` for the whole function.

use crate::mir::function::MFunction;
use crate::mir::instruction::MInstruction;
use crate::mir::operand::{MOperand, MReg};
use crate::mir::types::MDataType;
use crate::target::riscv64::{RvInstr, RvOp};
use crate::target::{RegClass, TargetAdapter};

pub fn run(f: &mut MFunction, target: &dyn TargetAdapter) {
    for b in f.block_order.clone() {
        let insts = std::mem::take(&mut f.block_mut(b).insts);
        let mut out = Vec::with_capacity(insts.len());
        for inst in insts {
            match inst {
                MInstruction::LSlot { dest, frame_index } => {
                    let offset = f.frame.spill_offset(frame_index).expect("spill slot offset not yet computed");
                    emit_load(target, dest, offset, &mut out);
                }
                MInstruction::SSlot { frame_index, src } => {
                    let offset = f.frame.spill_offset(frame_index).expect("spill slot offset not yet computed");
                    emit_store(target, src, offset, &mut out);
                }
                MInstruction::FrameAddr { dest, local } => {
                    let offset = f.frame.local_offset(local).expect("local offset not yet computed");
                    emit_addr(target, dest, offset, &mut out);
                }
                other => out.push(other),
            }
        }
        f.block_mut(b).insts = out;
    }
}

/// Materializes `base + offset` into a scratch/dest register when `offset` doesn't
/// fit a 12-bit signed immediate, otherwise just returns it unchanged for the
/// caller to fold into the load/store's own immediate field.
fn resolve_offset(target: &dyn TargetAdapter, base: crate::mir::operand::PhysReg, offset: i64, out: &mut Vec<MInstruction>) -> (MReg, i64) {
    if (-2048..2048).contains(&offset) {
        (MReg::physical(base, MDataType::I64), offset)
    } else {
        let scratch = MReg::physical(*target.allocatable(RegClass::Int).last().unwrap(), MDataType::I64);
        out.extend(target.materialize_immediate(scratch, offset));
        let mut add = RvInstr::new(RvOp::Add);
        add.defs.push(scratch);
        add.uses.push(MOperand::Reg(MReg::physical(base, MDataType::I64)));
        add.uses.push(MOperand::Reg(scratch));
        out.push(MInstruction::Target(add));
        (scratch, 0)
    }
}

fn emit_load(target: &dyn TargetAdapter, dest: MReg, offset: i64, out: &mut Vec<MInstruction>) {
    let (base, imm) = resolve_offset(target, target.stack_pointer(), offset, out);
    let op = match (dest.ty.is_float(), dest.ty.size_bytes()) {
        (true, 4) => RvOp::Flw,
        (true, _) => RvOp::Fld,
        (false, 4) => RvOp::Lw,
        (false, _) => RvOp::Ld,
    };
    let mut i = RvInstr::new(op);
    i.defs.push(dest);
    i.uses.push(MOperand::Reg(base));
    i.imm = Some(imm);
    out.push(MInstruction::Target(i));
}

fn emit_store(target: &dyn TargetAdapter, src: MOperand, offset: i64, out: &mut Vec<MInstruction>) {
    let ty = match src {
        MOperand::Reg(r) => r.ty,
        MOperand::ImmF32(_) => MDataType::F32,
        MOperand::ImmF64(_) => MDataType::F64,
        _ => MDataType::I64,
    };
    let src_reg = match src {
        MOperand::Reg(r) => r,
        other => {
            let class = if ty.is_float() { RegClass::Float } else { RegClass::Int };
            let scratch = MReg::physical(*target.allocatable(class).last().unwrap(), ty);
            out.push(target.r#move(scratch, other));
            scratch
        }
    };
    let (base, imm) = resolve_offset(target, target.stack_pointer(), offset, out);
    let op = match (ty.is_float(), ty.size_bytes()) {
        (true, 4) => RvOp::Fsw,
        (true, _) => RvOp::Fsd,
        (false, 4) => RvOp::Sw,
        (false, _) => RvOp::Sd,
    };
    let mut i = RvInstr::new(op);
    i.uses.push(MOperand::Reg(base));
    i.uses.push(MOperand::Reg(src_reg));
    i.imm = Some(imm);
    out.push(MInstruction::Target(i));
}

fn emit_addr(target: &dyn TargetAdapter, dest: MReg, offset: i64, out: &mut Vec<MInstruction>) {
    if (-2048..2048).contains(&offset) {
        let mut i = RvInstr::new(RvOp::Addi);
        i.defs.push(dest);
        i.uses.push(MOperand::Reg(MReg::physical(target.stack_pointer(), MDataType::I64)));
        i.imm = Some(offset);
        out.push(MInstruction::Target(i));
    } else {
        out.extend(target.materialize_immediate(dest, offset));
        let mut add = RvInstr::new(RvOp::Add);
        add.defs.push(dest);
        add.uses.push(MOperand::Reg(MReg::physical(target.stack_pointer(), MDataType::I64)));
        add.uses.push(MOperand::Reg(dest));
        out.push(MInstruction::Target(add));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mir::types::MDataType;
    use crate::target::riscv64::Riscv64;

    #[test]
    fn lslot_and_sslot_become_sp_relative_loads_and_stores() {
        let target = Riscv64::default();
        let mut f = MFunction::new("f", None);
        f.frame.create_local(0, 4, 4);
        let fi = f.frame.create_spill_slot(8, 8);
        f.frame.calculate_offsets();

        let v = MReg::physical(5, MDataType::I64);
        f.block_mut(f.entry()).insts.push(MInstruction::SSlot { frame_index: fi, src: MOperand::Reg(v) });
        f.block_mut(f.entry()).insts.push(MInstruction::LSlot { dest: v, frame_index: fi });

        run(&mut f, &target);

        let insts = &f.block(f.entry()).insts;
        assert_eq!(insts.len(), 2);
        assert!(matches!(&insts[0], MInstruction::Target(i) if i.op == RvOp::Sd));
        assert!(matches!(&insts[1], MInstruction::Target(i) if i.op == RvOp::Ld));
    }

    #[test]
    fn frame_addr_becomes_an_addi_against_sp() {
        let target = Riscv64::default();
        let mut f = MFunction::new("f", None);
        f.frame.create_local(0, 16, 8);
        f.frame.calculate_offsets();
        let dest = MReg::physical(5, MDataType::PTR);
        f.block_mut(f.entry()).insts.push(MInstruction::FrameAddr { dest, local: 0 });

        run(&mut f, &target);

        let insts = &f.block(f.entry()).insts;
        assert_eq!(insts.len(), 1);
        assert!(matches!(&insts[0], MInstruction::Target(i) if i.op == RvOp::Addi));
    }
}
