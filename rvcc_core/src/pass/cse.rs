//! Common subexpression elimination (spec §4.2.6): a scoped-hashtable value
//! numbering walk over the dominator tree. An expression computed at block B is
//! reusable at any block dominated by B, so the scope for each key is exactly the
//! dominator subtree rooted where it was first computed.

use hashbrown::HashMap;
use log::debug;

use crate::analysis::dominators::Dominators;
use crate::ir::function::Function;
use crate::ir::instruction::{Conversion, FloatBinOp, FloatCond, Instruction, IntBinOp, IntCond};
use crate::ir::operand::{GlobalId, Operand, RegId};
use crate::ir::types::DataType;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Key {
    IntBin(IntBinOp, DataType, OpKey, OpKey),
    FloatBin(FloatBinOp, DataType, OpKey, OpKey),
    Icmp(IntCond, OpKey, OpKey),
    Fcmp(FloatCond, OpKey, OpKey),
    Convert(ConvKey, DataType, OpKey),
    Gep(OpKey, Vec<OpKey>, DataType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum OpKey {
    Reg(u32),
    ImmI32(i32),
    ImmF32Bits(u32),
    Global(u32),
    Label(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ConvKey {
    Zext,
    Sitofp,
    Fptosi,
}

fn op_key(op: &Operand) -> OpKey {
    match op {
        Operand::Register(r, _) => OpKey::Reg(r.0),
        Operand::ImmI32(v) => OpKey::ImmI32(*v),
        Operand::ImmF32(v) => OpKey::ImmF32Bits(v.to_bits()),
        Operand::Global(GlobalId(g)) => OpKey::Global(*g),
        Operand::Label(b) => OpKey::Label(b.0),
    }
}

/// Commutative binary ops: normalize operand order so `a+b` and `b+a` share a key.
fn is_commutative(op: IntBinOp) -> bool {
    matches!(op, IntBinOp::Add | IntBinOp::Mul | IntBinOp::And | IntBinOp::Or | IntBinOp::Xor)
}

fn key_of(inst: &Instruction) -> Option<Key> {
    match inst {
        Instruction::IntBin { op, ty, lhs, rhs, .. } => {
            let (a, b) = (op_key(lhs), op_key(rhs));
            let (a, b) = if is_commutative(*op) && b < a { (b, a) } else { (a, b) };
            Some(Key::IntBin(*op, *ty, a, b))
        }
        Instruction::FloatBin { op, ty, lhs, rhs, .. } => Some(Key::FloatBin(*op, *ty, op_key(lhs), op_key(rhs))),
        Instruction::Icmp { cond, lhs, rhs, .. } => Some(Key::Icmp(*cond, op_key(lhs), op_key(rhs))),
        Instruction::Fcmp { cond, lhs, rhs, .. } => Some(Key::Fcmp(*cond, op_key(lhs), op_key(rhs))),
        Instruction::Convert { kind, dest_ty, src, .. } => {
            let k = match kind {
                Conversion::Zext => ConvKey::Zext,
                Conversion::Sitofp => ConvKey::Sitofp,
                Conversion::Fptosi => ConvKey::Fptosi,
            };
            Some(Key::Convert(k, *dest_ty, op_key(src)))
        }
        Instruction::Gep { base, indices, elem_ty, .. } => {
            Some(Key::Gep(op_key(base), indices.iter().map(op_key).collect(), *elem_ty))
        }
        _ => None,
    }
}

impl PartialOrd for OpKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for OpKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        fn rank(k: &OpKey) -> (u8, i64) {
            match k {
                OpKey::Reg(r) => (0, *r as i64),
                OpKey::ImmI32(v) => (1, *v as i64),
                OpKey::ImmF32Bits(v) => (2, *v as i64),
                OpKey::Global(g) => (3, *g as i64),
                OpKey::Label(b) => (4, *b as i64),
            }
        }
        rank(self).cmp(&rank(other))
    }
}

/// Runs CSE over `f`, returning the number of redundant instructions removed.
pub fn run(f: &mut Function) -> usize {
    let dom = Dominators::forward(f);
    let mut scope: HashMap<Key, Operand> = HashMap::new();
    let mut subst: HashMap<RegId, Operand> = HashMap::new();
    walk(f, &dom, f.entry(), &mut scope, &mut subst);

    let mut removed = 0;
    for block in f.block_order.clone() {
        for inst in &mut f.block_mut(block).insts {
            for u in inst.uses_mut() {
                if let Some(r) = u.as_reg() {
                    if let Some(repl) = subst.get(&r) {
                        *u = *repl;
                    }
                }
            }
        }
    }
    for block in f.block_order.clone() {
        let before = f.block(block).insts.len();
        f.block_mut(block).insts.retain(|inst| inst.def().map(|d| !subst.contains_key(&d)).unwrap_or(true));
        removed += before - f.block(block).insts.len();
    }
    debug!("cse: eliminated {removed} redundant instructions");
    removed
}

fn walk(
    f: &Function,
    dom: &Dominators,
    block: crate::ir::operand::BlockId,
    scope: &mut HashMap<Key, Operand>,
    subst: &mut HashMap<RegId, Operand>,
) {
    let mut introduced = Vec::new();
    for inst in &f.block(block).insts {
        let Some(key) = key_of(inst) else { continue };
        let Some(dest) = inst.def() else { continue };
        let ty = inst.def_ty().unwrap_or(DataType::I32);
        if let Some(existing) = scope.get(&key) {
            subst.insert(dest, *existing);
        } else {
            scope.insert(key.clone(), Operand::Register(dest, ty));
            introduced.push(key);
        }
    }
    for child in dom.children(block) {
        walk(f, dom, child, scope, subst);
    }
    for key in introduced {
        scope.remove(&key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instruction::Instruction;

    #[test]
    fn eliminates_duplicate_add_in_same_block() {
        let mut f = Function::new("f", DataType::I32, &[(DataType::I32, false)]);
        let entry = f.entry();
        let p0 = f.sig.params[0].1;
        let a = f.fresh_reg();
        let b = f.fresh_reg();
        f.block_mut(entry).insts.push(Instruction::IntBin {
            dest: a,
            op: IntBinOp::Add,
            ty: DataType::I32,
            lhs: Operand::Register(p0, DataType::I32),
            rhs: Operand::ImmI32(1),
        });
        f.block_mut(entry).insts.push(Instruction::IntBin {
            dest: b,
            op: IntBinOp::Add,
            ty: DataType::I32,
            lhs: Operand::Register(p0, DataType::I32),
            rhs: Operand::ImmI32(1),
        });
        f.block_mut(entry)
            .insts
            .push(Instruction::Ret { value: Some(Operand::Register(b, DataType::I32)) });

        let removed = run(&mut f);
        assert_eq!(removed, 1);
        match f.block(entry).insts.last() {
            Some(Instruction::Ret { value: Some(Operand::Register(r, _)) }) => assert_eq!(*r, a),
            other => panic!("expected ret of the first add's result, got {other:?}"),
        }
    }

    #[test]
    fn commutative_operands_share_a_key() {
        let mut f = Function::new("f", DataType::I32, &[(DataType::I32, false), (DataType::I32, false)]);
        let entry = f.entry();
        let (p0, p1) = (f.sig.params[0].1, f.sig.params[1].1);
        let a = f.fresh_reg();
        let b = f.fresh_reg();
        f.block_mut(entry).insts.push(Instruction::IntBin {
            dest: a,
            op: IntBinOp::Add,
            ty: DataType::I32,
            lhs: Operand::Register(p0, DataType::I32),
            rhs: Operand::Register(p1, DataType::I32),
        });
        f.block_mut(entry).insts.push(Instruction::IntBin {
            dest: b,
            op: IntBinOp::Add,
            ty: DataType::I32,
            lhs: Operand::Register(p1, DataType::I32),
            rhs: Operand::Register(p0, DataType::I32),
        });
        f.block_mut(entry)
            .insts
            .push(Instruction::Ret { value: Some(Operand::Register(b, DataType::I32)) });

        let removed = run(&mut f);
        assert_eq!(removed, 1);
    }
}
