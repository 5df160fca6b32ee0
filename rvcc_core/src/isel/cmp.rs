//! Synthesizing `Icmp`/`Fcmp` results into a 0/1 integer register: RV64 only has
//! `slt`/`sltu` and the three F-extension compare instructions (`feq.s`/`flt.s`/
//! `fle.s`), so every other predicate is built from those plus boolean algebra on
//! the int register file (spec §4.4's "ICMP/FCMP expansion").

use crate::ir::instruction::{FloatCond, IntCond};
use crate::mir::function::MFunction;
use crate::mir::instruction::MInstruction;
use crate::mir::operand::{MOperand, MReg};
use crate::mir::types::MDataType;
use crate::target::riscv64::{RvInstr, RvOp, X_ZERO};

fn emit(f: &mut MFunction, block: &mut Vec<MInstruction>, op: RvOp, dest: MReg, uses: &[MOperand], imm: Option<i64>) {
    let mut i = RvInstr::new(op);
    i.defs.push(dest);
    i.uses.extend_from_slice(uses);
    i.imm = imm;
    let _ = f;
    block.push(MInstruction::Target(i));
}

fn zero() -> MOperand {
    MOperand::Reg(MReg::physical(X_ZERO, MDataType::I64))
}

/// Lowers an integer comparison, returning the vreg holding the 0/1 result.
pub fn lower_icmp(f: &mut MFunction, block: &mut Vec<MInstruction>, cond: IntCond, a: MOperand, b: MOperand) -> MReg {
    let dest = f.fresh_vreg(MDataType::I32);
    match cond {
        IntCond::Slt => emit(f, block, RvOp::Slt, dest, &[a, b], None),
        IntCond::Sgt => emit(f, block, RvOp::Slt, dest, &[b, a], None),
        IntCond::Ult => emit(f, block, RvOp::Sltu, dest, &[a, b], None),
        IntCond::Ugt => emit(f, block, RvOp::Sltu, dest, &[b, a], None),
        IntCond::Sle => {
            let t = f.fresh_vreg(MDataType::I32);
            emit(f, block, RvOp::Slt, t, &[b, a], None);
            emit(f, block, RvOp::Xori, dest, &[MOperand::Reg(t)], Some(1));
        }
        IntCond::Sge => {
            let t = f.fresh_vreg(MDataType::I32);
            emit(f, block, RvOp::Slt, t, &[a, b], None);
            emit(f, block, RvOp::Xori, dest, &[MOperand::Reg(t)], Some(1));
        }
        IntCond::Ule => {
            let t = f.fresh_vreg(MDataType::I32);
            emit(f, block, RvOp::Sltu, t, &[b, a], None);
            emit(f, block, RvOp::Xori, dest, &[MOperand::Reg(t)], Some(1));
        }
        IntCond::Uge => {
            let t = f.fresh_vreg(MDataType::I32);
            emit(f, block, RvOp::Sltu, t, &[a, b], None);
            emit(f, block, RvOp::Xori, dest, &[MOperand::Reg(t)], Some(1));
        }
        IntCond::Eq => {
            let t = f.fresh_vreg(MDataType::I32);
            emit(f, block, RvOp::Xor, t, &[a, b], None);
            emit(f, block, RvOp::Sltiu, dest, &[MOperand::Reg(t)], Some(1));
        }
        IntCond::Ne => {
            let t = f.fresh_vreg(MDataType::I32);
            emit(f, block, RvOp::Xor, t, &[a, b], None);
            emit(f, block, RvOp::Sltu, dest, &[zero(), MOperand::Reg(t)], None);
        }
    }
    dest
}

/// Lowers a float comparison. Ordered predicates map near-directly onto the F
/// extension; unordered ones are `Not(complementary-ordered-predicate)` since
/// `feq.s`/`flt.s`/`fle.s` are already false whenever either operand is `NaN`
/// (see module doc).
pub fn lower_fcmp(f: &mut MFunction, block: &mut Vec<MInstruction>, cond: FloatCond, a: MOperand, b: MOperand) -> MReg {
    let not = |f: &mut MFunction, block: &mut Vec<MInstruction>, src: MReg| -> MReg {
        let dest = f.fresh_vreg(MDataType::I32);
        emit(f, block, RvOp::Sltiu, dest, &[MOperand::Reg(src)], Some(1));
        dest
    };
    match cond {
        FloatCond::Oeq => {
            let dest = f.fresh_vreg(MDataType::I32);
            emit(f, block, RvOp::FeqS, dest, &[a, b], None);
            dest
        }
        FloatCond::Olt => {
            let dest = f.fresh_vreg(MDataType::I32);
            emit(f, block, RvOp::FltS, dest, &[a, b], None);
            dest
        }
        FloatCond::Ole => {
            let dest = f.fresh_vreg(MDataType::I32);
            emit(f, block, RvOp::FleS, dest, &[a, b], None);
            dest
        }
        FloatCond::Ogt => {
            let dest = f.fresh_vreg(MDataType::I32);
            emit(f, block, RvOp::FltS, dest, &[b, a], None);
            dest
        }
        FloatCond::Oge => {
            let dest = f.fresh_vreg(MDataType::I32);
            emit(f, block, RvOp::FleS, dest, &[b, a], None);
            dest
        }
        FloatCond::Ord => {
            let sa = f.fresh_vreg(MDataType::I32);
            let sb = f.fresh_vreg(MDataType::I32);
            emit(f, block, RvOp::FeqS, sa, &[a, a], None);
            emit(f, block, RvOp::FeqS, sb, &[b, b], None);
            let dest = f.fresh_vreg(MDataType::I32);
            emit(f, block, RvOp::And, dest, &[MOperand::Reg(sa), MOperand::Reg(sb)], None);
            dest
        }
        FloatCond::One => {
            let ord = lower_fcmp(f, block, FloatCond::Ord, a, b);
            let eq = lower_fcmp(f, block, FloatCond::Oeq, a, b);
            let not_eq = not(f, block, eq);
            let dest = f.fresh_vreg(MDataType::I32);
            emit(f, block, RvOp::And, dest, &[MOperand::Reg(ord), MOperand::Reg(not_eq)], None);
            dest
        }
        FloatCond::Uno => {
            let ord = lower_fcmp(f, block, FloatCond::Ord, a, b);
            not(f, block, ord)
        }
        FloatCond::Ueq => {
            let one = lower_fcmp(f, block, FloatCond::One, a, b);
            not(f, block, one)
        }
        FloatCond::Une => {
            let eq = lower_fcmp(f, block, FloatCond::Oeq, a, b);
            not(f, block, eq)
        }
        FloatCond::Ult => {
            let oge = lower_fcmp(f, block, FloatCond::Oge, a, b);
            not(f, block, oge)
        }
        FloatCond::Uge => {
            let olt = lower_fcmp(f, block, FloatCond::Olt, a, b);
            not(f, block, olt)
        }
        FloatCond::Ule => {
            let ogt = lower_fcmp(f, block, FloatCond::Ogt, a, b);
            not(f, block, ogt)
        }
        FloatCond::Ugt => {
            let ole = lower_fcmp(f, block, FloatCond::Ole, a, b);
            not(f, block, ole)
        }
    }
}
