//! The RV64 integer/float calling convention (spec §6.1): the first eight
//! integer-class and eight float-class arguments travel in `a0-a7`/`fa0-fa7`;
//! anything past that spills to the stack, at a fixed, frame-size-independent
//! offset — incoming overflow parameters sit just above the saved `ra`/`fp` pair
//! (`fp + 16 + 8*k`), outgoing overflow arguments sit at the bottom of this
//! function's own frame (`sp + 8*k`), which `FrameInfo`'s `param_area_size`
//! reserves for exactly this purpose.

use crate::mir::function::MFunction;
use crate::mir::instruction::MInstruction;
use crate::mir::operand::{MOperand, MReg};
use crate::mir::types::MDataType;
use crate::target::riscv64::{RvInstr, RvOp};
use crate::target::{RegClass, TargetAdapter};

fn load_op(ty: MDataType) -> RvOp {
    match (ty.is_float(), ty.size_bytes()) {
        (true, 4) => RvOp::Flw,
        (true, _) => RvOp::Fld,
        (false, 4) => RvOp::Lw,
        (false, _) => RvOp::Ld,
    }
}

fn store_op(ty: MDataType) -> RvOp {
    match (ty.is_float(), ty.size_bytes()) {
        (true, 4) => RvOp::Fsw,
        (true, _) => RvOp::Fsd,
        (false, 4) => RvOp::Sw,
        (false, _) => RvOp::Sd,
    }
}

/// Emits the entry-block copies (or stack loads) that bring each parameter into a
/// fresh vreg, in declaration order.
pub fn place_incoming_params(f: &mut MFunction, target: &dyn TargetAdapter, param_tys: &[MDataType], entry: &mut Vec<MInstruction>) -> Vec<MReg> {
    let mut int_idx = 0usize;
    let mut float_idx = 0usize;
    let mut stack_idx = 0usize;
    let mut regs = Vec::with_capacity(param_tys.len());
    for &ty in param_tys {
        let class = target.class_of(ty);
        let arg_regs = target.arg_regs(class);
        let idx = match class {
            RegClass::Int => &mut int_idx,
            RegClass::Float => &mut float_idx,
        };
        let dest = f.fresh_vreg(ty);
        if *idx < arg_regs.len() {
            let phys = arg_regs[*idx];
            *idx += 1;
            entry.push(target.r#move(dest, MOperand::Reg(MReg::physical(phys, ty))));
        } else {
            let offset = 16 + 8 * stack_idx as i64;
            stack_idx += 1;
            let mut i = RvInstr::new(load_op(ty));
            i.defs.push(dest);
            i.uses.push(MOperand::Reg(MReg::physical(target.frame_pointer(), MDataType::I64)));
            i.imm = Some(offset);
            entry.push(MInstruction::Target(i));
        }
        regs.push(dest);
    }
    regs
}

/// Stages a call's arguments: register-class arguments become the `uses` a `Call`
/// instruction reads directly; overflow arguments are stored into this function's
/// outgoing-argument area first. Returns the `uses` list for the `RvInstr::Call`.
///
/// Register-class arguments are staged through a fresh temp vreg first and only
/// moved into the fixed `a0-a7`/`fa0-fa7` registers as the last step, right
/// before the call: those registers are themselves allocatable, and physical
/// registers have no modeled liveness in this regalloc (see DESIGN.md), so
/// moving straight into `a1` while staging a later argument that still reads
/// the vreg regalloc happened to assign to `a1` would silently clobber it.
pub fn stage_outgoing_args(f: &mut MFunction, target: &dyn TargetAdapter, block: &mut Vec<MInstruction>, args: &[MOperand]) -> smallvec::SmallVec<[MOperand; 2]> {
    let mut int_idx = 0usize;
    let mut float_idx = 0usize;
    let mut stack_idx = 0usize;
    let mut uses = smallvec::SmallVec::new();
    let mut reg_args: Vec<(MReg, MReg)> = Vec::new();
    for &arg in args {
        let ty = operand_ty(arg);
        let class = target.class_of(ty);
        let arg_regs = target.arg_regs(class);
        let idx = match class {
            RegClass::Int => &mut int_idx,
            RegClass::Float => &mut float_idx,
        };
        if *idx < arg_regs.len() {
            let phys = arg_regs[*idx];
            *idx += 1;
            let tmp = f.fresh_vreg(ty);
            block.push(target.r#move(tmp, arg));
            reg_args.push((MReg::physical(phys, ty), tmp));
        } else {
            let offset = 8 * stack_idx as i64;
            stack_idx += 1;
            f.frame.set_param_area_size(8 * stack_idx as u32);
            // `sw`/`sd` need a register source; route an immediate through a vreg first.
            let src = match arg {
                MOperand::Reg(r) => r,
                other => {
                    let tmp = f.fresh_vreg(ty);
                    block.push(target.r#move(tmp, other));
                    tmp
                }
            };
            let mut i = RvInstr::new(store_op(ty));
            i.uses.push(MOperand::Reg(MReg::physical(target.stack_pointer(), MDataType::I64)));
            i.uses.push(MOperand::Reg(src));
            i.imm = Some(offset);
            block.push(MInstruction::Target(i));
        }
    }
    for (phys_reg, tmp) in reg_args {
        block.push(target.r#move(phys_reg, MOperand::Reg(tmp)));
        uses.push(MOperand::Reg(phys_reg));
    }
    uses
}

fn operand_ty(op: MOperand) -> MDataType {
    match op {
        MOperand::Reg(r) => r.ty,
        MOperand::ImmI32(_) => MDataType::I32,
        MOperand::ImmI64(_) => MDataType::I64,
        MOperand::ImmF32(_) => MDataType::F32,
        MOperand::ImmF64(_) => MDataType::F64,
        MOperand::FrameIndex(_) => MDataType::PTR,
    }
}
