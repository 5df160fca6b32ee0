//! Sparse conditional constant propagation (spec §4.2.5): a worklist fixpoint over
//! a lattice of {Top, Const(v), Bottom} per register, folding pure arithmetic and
//! collapsing branches whose condition resolves to a constant.

use hashbrown::{HashMap, HashSet};
use log::debug;

use crate::ir::function::Function;
use crate::ir::instruction::{Conversion, FloatBinOp, FloatCond, Instruction, IntBinOp, IntCond};
use crate::ir::operand::{BlockId, Operand, RegId};
use crate::ir::types::DataType;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Lattice {
    Top,
    ConstI(i32),
    ConstF(f32),
    Bottom,
}

impl Lattice {
    fn meet(self, other: Lattice) -> Lattice {
        match (self, other) {
            (Lattice::Top, x) | (x, Lattice::Top) => x,
            (Lattice::Bottom, _) | (_, Lattice::Bottom) => Lattice::Bottom,
            (Lattice::ConstI(a), Lattice::ConstI(b)) if a == b => Lattice::ConstI(a),
            (Lattice::ConstF(a), Lattice::ConstF(b)) if a == b => Lattice::ConstF(a),
            _ => Lattice::Bottom,
        }
    }

    fn as_operand(self, ty: DataType) -> Option<Operand> {
        match self {
            Lattice::ConstI(v) => Some(Operand::ImmI32(v)),
            Lattice::ConstF(v) => Some(Operand::ImmF32(v)),
            _ => {
                let _ = ty;
                None
            }
        }
    }
}

/// Runs SCCP over `f` in place. Returns the number of instructions folded or
/// branches simplified.
pub fn run(f: &mut Function) -> usize {
    let mut values: HashMap<RegId, Lattice> = HashMap::new();
    // Function arguments are unknown at every call site this pass can see (it
    // never looks at callers), so they start at Bottom, not Top — Top would
    // mean "no value has reached here yet", which is false from instruction one.
    for &(_, reg) in &f.sig.params {
        values.insert(reg, Lattice::Bottom);
    }
    let mut executable: HashSet<BlockId> = HashSet::new();
    executable.insert(f.entry());

    let mut block_worklist: Vec<BlockId> = vec![f.entry()];
    let mut ssa_worklist: Vec<RegId> = Vec::new();

    while !block_worklist.is_empty() || !ssa_worklist.is_empty() {
        while let Some(b) = block_worklist.pop() {
            let insts = f.block(b).insts.clone();
            for inst in &insts {
                visit(inst, &mut executable, &mut values, &mut block_worklist, &mut ssa_worklist);
            }
        }
        while let Some(r) = ssa_worklist.pop() {
            for b in f.block_order.clone() {
                if !executable.contains(&b) {
                    continue;
                }
                let insts = f.block(b).insts.clone();
                for inst in &insts {
                    if inst.uses().iter().any(|u| u.as_reg() == Some(r)) {
                        visit(inst, &mut executable, &mut values, &mut block_worklist, &mut ssa_worklist);
                    }
                }
            }
        }
    }

    rewrite(f, &values)
}

fn visit(
    inst: &Instruction,
    executable: &mut HashSet<BlockId>,
    values: &mut HashMap<RegId, Lattice>,
    block_worklist: &mut Vec<BlockId>,
    ssa_worklist: &mut Vec<RegId>,
) {
    let lat_of = |op: &Operand, values: &HashMap<RegId, Lattice>| -> Lattice {
        match op {
            Operand::ImmI32(v) => Lattice::ConstI(*v),
            Operand::ImmF32(v) => Lattice::ConstF(*v),
            Operand::Register(r, _) => values.get(r).copied().unwrap_or(Lattice::Top),
            _ => Lattice::Bottom,
        }
    };

    let mut set = |reg: RegId, new: Lattice, values: &mut HashMap<RegId, Lattice>, ssa_worklist: &mut Vec<RegId>| {
        let cur = values.get(&reg).copied().unwrap_or(Lattice::Top);
        let merged = cur.meet(new);
        if merged != cur {
            values.insert(reg, merged);
            ssa_worklist.push(reg);
        }
    };

    match inst {
        Instruction::Phi { dest, incoming, .. } => {
            let mut acc = Lattice::Top;
            for (label, val) in incoming {
                if executable.contains(label) {
                    acc = acc.meet(lat_of(val, values));
                }
            }
            set(*dest, acc, values, ssa_worklist);
        }
        Instruction::IntBin { dest, op, lhs, rhs, .. } => {
            let l = lat_of(lhs, values);
            let r = lat_of(rhs, values);
            let v = match (l, r) {
                (Lattice::ConstI(a), Lattice::ConstI(b)) => fold_int(*op, a, b),
                (Lattice::Top, _) | (_, Lattice::Top) => Lattice::Top,
                _ => Lattice::Bottom,
            };
            set(*dest, v, values, ssa_worklist);
        }
        Instruction::FloatBin { dest, op, lhs, rhs, .. } => {
            let l = lat_of(lhs, values);
            let r = lat_of(rhs, values);
            let v = match (l, r) {
                (Lattice::ConstF(a), Lattice::ConstF(b)) => fold_float(*op, a, b),
                (Lattice::Top, _) | (_, Lattice::Top) => Lattice::Top,
                _ => Lattice::Bottom,
            };
            set(*dest, v, values, ssa_worklist);
        }
        Instruction::Icmp { dest, cond, lhs, rhs } => {
            let l = lat_of(lhs, values);
            let r = lat_of(rhs, values);
            let v = match (l, r) {
                (Lattice::ConstI(a), Lattice::ConstI(b)) => Lattice::ConstI(fold_icmp(*cond, a, b) as i32),
                (Lattice::Top, _) | (_, Lattice::Top) => Lattice::Top,
                _ => Lattice::Bottom,
            };
            set(*dest, v, values, ssa_worklist);
        }
        Instruction::Fcmp { dest, cond, lhs, rhs } => {
            let l = lat_of(lhs, values);
            let r = lat_of(rhs, values);
            let v = match (l, r) {
                (Lattice::ConstF(a), Lattice::ConstF(b)) => Lattice::ConstI(fold_fcmp(*cond, a, b) as i32),
                (Lattice::Top, _) | (_, Lattice::Top) => Lattice::Top,
                _ => Lattice::Bottom,
            };
            set(*dest, v, values, ssa_worklist);
        }
        Instruction::Convert { dest, kind, src, .. } => {
            let s = lat_of(src, values);
            let v = match (kind, s) {
                (Conversion::Zext, Lattice::ConstI(a)) => Lattice::ConstI(a),
                (Conversion::Sitofp, Lattice::ConstI(a)) => Lattice::ConstF(a as f32),
                (Conversion::Fptosi, Lattice::ConstF(a)) => Lattice::ConstI(a as i32),
                (_, Lattice::Top) => Lattice::Top,
                _ => Lattice::Bottom,
            };
            set(*dest, v, values, ssa_worklist);
        }
        Instruction::BrCond { cond, true_label, false_label } => {
            match lat_of(cond, values) {
                Lattice::ConstI(v) => {
                    let target = if v != 0 { *true_label } else { *false_label };
                    mark_executable(target, executable, block_worklist);
                }
                Lattice::Bottom => {
                    mark_executable(*true_label, executable, block_worklist);
                    mark_executable(*false_label, executable, block_worklist);
                }
                Lattice::Top => {}
                Lattice::ConstF(_) => unreachable!("branch condition is always i1/i32"),
            }
        }
        Instruction::BrUncond { label } => mark_executable(*label, executable, block_worklist),
        Instruction::Load { dest, .. } | Instruction::Alloca { dest, .. } | Instruction::Gep { dest, .. } => {
            set(*dest, Lattice::Bottom, values, ssa_worklist);
        }
        Instruction::Call { dest: Some(dest), .. } => {
            set(*dest, Lattice::Bottom, values, ssa_worklist);
        }
        _ => {}
    }
}

fn mark_executable(b: BlockId, executable: &mut HashSet<BlockId>, block_worklist: &mut Vec<BlockId>) {
    if executable.insert(b) {
        block_worklist.push(b);
    }
}

fn fold_int(op: IntBinOp, a: i32, b: i32) -> Lattice {
    let v = match op {
        IntBinOp::Add => a.wrapping_add(b),
        IntBinOp::Sub => a.wrapping_sub(b),
        IntBinOp::Mul => a.wrapping_mul(b),
        IntBinOp::Div => {
            if b == 0 {
                return Lattice::Bottom;
            }
            a.wrapping_div(b)
        }
        IntBinOp::Mod => {
            if b == 0 {
                return Lattice::Bottom;
            }
            a.wrapping_rem(b)
        }
        IntBinOp::Shl => a.wrapping_shl(b as u32),
        IntBinOp::AShr => a.wrapping_shr(b as u32),
        IntBinOp::LShr => ((a as u32) >> (b as u32)) as i32,
        IntBinOp::And => a & b,
        IntBinOp::Or => a | b,
        IntBinOp::Xor => a ^ b,
    };
    Lattice::ConstI(v)
}

fn fold_float(op: FloatBinOp, a: f32, b: f32) -> Lattice {
    let v = match op {
        FloatBinOp::FAdd => a + b,
        FloatBinOp::FSub => a - b,
        FloatBinOp::FMul => a * b,
        FloatBinOp::FDiv => a / b,
    };
    Lattice::ConstF(v)
}

fn fold_icmp(cond: IntCond, a: i32, b: i32) -> bool {
    match cond {
        IntCond::Eq => a == b,
        IntCond::Ne => a != b,
        IntCond::Slt => a < b,
        IntCond::Sle => a <= b,
        IntCond::Sgt => a > b,
        IntCond::Sge => a >= b,
        IntCond::Ult => (a as u32) < (b as u32),
        IntCond::Ule => (a as u32) <= (b as u32),
        IntCond::Ugt => (a as u32) > (b as u32),
        IntCond::Uge => (a as u32) >= (b as u32),
    }
}

fn fold_fcmp(cond: FloatCond, a: f32, b: f32) -> bool {
    match cond {
        FloatCond::Oeq | FloatCond::Ueq => a == b,
        FloatCond::One | FloatCond::Une => a != b,
        FloatCond::Ogt | FloatCond::Ugt => a > b,
        FloatCond::Oge | FloatCond::Uge => a >= b,
        FloatCond::Olt | FloatCond::Ult => a < b,
        FloatCond::Ole | FloatCond::Ule => a <= b,
        FloatCond::Ord => !a.is_nan() && !b.is_nan(),
        FloatCond::Uno => a.is_nan() || b.is_nan(),
    }
}

/// Rewrites every instruction whose destination resolved to a constant into an
/// immediate-producing no-op form; branches with a constant condition collapse to
/// `BrUncond`. Dead-arm removal and unreachable-block pruning are ADCE/CFG-cleanup's
/// job, not SCCP's.
fn rewrite(f: &mut Function, values: &HashMap<RegId, Lattice>) -> usize {
    let mut folded = 0;
    for block in f.block_order.clone() {
        let b = f.block_mut(block);
        for inst in &mut b.insts {
            if let Some(dest) = inst.def() {
                if let Some(ty) = inst.def_ty() {
                    if let Some(Lattice::ConstI(_) | Lattice::ConstF(_)) = values.get(&dest).copied() {
                        if let Some(v) = values[&dest].as_operand(ty) {
                            *inst = const_producer(dest, ty, v);
                            folded += 1;
                        }
                    }
                }
            }
            if let Instruction::BrCond { cond, true_label, false_label } = inst {
                if let Some(v) = cond.as_const_i32() {
                    *inst = Instruction::BrUncond { label: if v != 0 { *true_label } else { *false_label } };
                    folded += 1;
                }
            }
        }
    }
    debug!("sccp: folded {folded} instructions/branches");
    folded
}

/// A degenerate identity instruction representing "this register is now always this
/// constant" — implemented as an `IntBin`/`FloatBin` add-with-zero so downstream
/// consumers that look at `def()`/`def_ty()` keep working until CSE/ADCE clean it up.
fn const_producer(dest: RegId, ty: DataType, v: Operand) -> Instruction {
    if ty.is_float() {
        Instruction::FloatBin { dest, op: FloatBinOp::FAdd, ty, lhs: v, rhs: Operand::ImmF32(0.0) }
    } else {
        Instruction::IntBin { dest, op: IntBinOp::Add, ty, lhs: v, rhs: Operand::ImmI32(0) }
    }
}
