//! Builds one `SelectionDag` per basic block (spec §4.3). Any operand whose defining
//! instruction is not in this block becomes a `Leaf` — instruction selection resolves
//! those against the cross-block `RegId -> MReg` table it accumulates as it visits
//! blocks in order, so the DAG itself never needs to see outside its own block.

use hashbrown::HashMap;
use smallvec::{smallvec, SmallVec};

use crate::ir::block::Block;
use crate::ir::instruction::Instruction;
use crate::ir::operand::{Operand, RegId};
use crate::ir::types::DataType;

use super::node::{DagNode, DagOp, NodeId};
use super::SelectionDag;

pub struct BlockDag {
    pub dag: SelectionDag,
    /// The final control node (`BrCond`/`BrUncond`/`Ret`) — the schedule root.
    pub root: NodeId,
    /// Every register this block defines, and the node computing its value.
    pub defs: HashMap<RegId, NodeId>,
}

pub fn build_block(block: &Block) -> BlockDag {
    let mut dag = SelectionDag::new();
    let mut defs: HashMap<RegId, NodeId> = HashMap::new();
    let mut chain: NodeId = dag.entry_token;

    let operand_node = |dag: &mut SelectionDag, defs: &HashMap<RegId, NodeId>, op: Operand| -> NodeId {
        match op {
            Operand::Register(r, _) => {
                if let Some(id) = defs.get(&r) {
                    *id
                } else {
                    dag.get_or_insert(DagNode { op: DagOp::Leaf(r), operands: SmallVec::new(), ty: op.ty(), ir_dest: None })
                }
            }
            Operand::ImmI32(v) => {
                dag.get_or_insert(DagNode { op: DagOp::ConstI(v as i64), operands: SmallVec::new(), ty: DataType::I32, ir_dest: None })
            }
            Operand::ImmF32(v) => dag.get_or_insert(DagNode {
                op: DagOp::ConstF(v.to_bits()),
                operands: SmallVec::new(),
                ty: DataType::F32,
                ir_dest: None,
            }),
            // Globals and labels never flow through the value DAG: calls carry their
            // callee in `DagOp::Call` itself, and branch targets live on the control node.
            Operand::Global(_) | Operand::Label(_) => {
                dag.get_or_insert(DagNode { op: DagOp::ConstI(0), operands: SmallVec::new(), ty: op.ty(), ir_dest: None })
            }
        }
    };

    for inst in &block.insts {
        if inst.is_phi() {
            // Phis are block-entry SSA merges, not intra-block data; isel materializes
            // them directly as `MInstruction::Phi` outside the DAG.
            continue;
        }
        match inst {
            Instruction::Load { dest, ty, ptr } => {
                let ptr_n = operand_node(&mut dag, &defs, *ptr);
                let id = dag.get_or_insert(DagNode {
                    op: DagOp::Load,
                    operands: smallvec![chain, ptr_n],
                    ty: *ty,
                    ir_dest: Some(*dest),
                });
                chain = id;
                defs.insert(*dest, id);
            }
            Instruction::Store { val, ptr } => {
                let val_n = operand_node(&mut dag, &defs, *val);
                let ptr_n = operand_node(&mut dag, &defs, *ptr);
                let id = dag.get_or_insert(DagNode {
                    op: DagOp::Store,
                    operands: smallvec![chain, ptr_n, val_n],
                    ty: DataType::Void,
                    ir_dest: None,
                });
                chain = id;
            }
            Instruction::Alloca { dest, ty, dims } => {
                let elems: u32 = dims.iter().product::<u32>().max(1);
                let size = ty.size_bytes() * elems;
                let id = dag.get_or_insert(DagNode {
                    op: DagOp::Alloca { ir_reg: *dest, size, align: ty.size_bytes().max(4) },
                    operands: SmallVec::new(),
                    ty: DataType::Ptr,
                    ir_dest: Some(*dest),
                });
                defs.insert(*dest, id);
            }
            Instruction::Gep { dest, base, indices, dims, elem_ty } => {
                let base_n = operand_node(&mut dag, &defs, *base);
                let mut operands: SmallVec<[NodeId; 3]> = smallvec![base_n];
                for idx in indices {
                    operands.push(operand_node(&mut dag, &defs, *idx));
                }
                let id = dag.get_or_insert(DagNode {
                    op: DagOp::Gep { dims: dims.clone(), elem_ty: *elem_ty },
                    operands,
                    ty: DataType::Ptr,
                    ir_dest: Some(*dest),
                });
                defs.insert(*dest, id);
            }
            Instruction::IntBin { dest, op, ty, lhs, rhs } => {
                let l = operand_node(&mut dag, &defs, *lhs);
                let r = operand_node(&mut dag, &defs, *rhs);
                let id = dag.get_or_insert(DagNode { op: DagOp::IntBin(*op), operands: smallvec![l, r], ty: *ty, ir_dest: Some(*dest) });
                defs.insert(*dest, id);
            }
            Instruction::FloatBin { dest, op, ty, lhs, rhs } => {
                let l = operand_node(&mut dag, &defs, *lhs);
                let r = operand_node(&mut dag, &defs, *rhs);
                let id =
                    dag.get_or_insert(DagNode { op: DagOp::FloatBin(*op), operands: smallvec![l, r], ty: *ty, ir_dest: Some(*dest) });
                defs.insert(*dest, id);
            }
            Instruction::Icmp { dest, cond, lhs, rhs } => {
                let l = operand_node(&mut dag, &defs, *lhs);
                let r = operand_node(&mut dag, &defs, *rhs);
                let id = dag.get_or_insert(DagNode { op: DagOp::Icmp(*cond), operands: smallvec![l, r], ty: DataType::I1, ir_dest: Some(*dest) });
                defs.insert(*dest, id);
            }
            Instruction::Fcmp { dest, cond, lhs, rhs } => {
                let l = operand_node(&mut dag, &defs, *lhs);
                let r = operand_node(&mut dag, &defs, *rhs);
                let id = dag.get_or_insert(DagNode { op: DagOp::Fcmp(*cond), operands: smallvec![l, r], ty: DataType::I1, ir_dest: Some(*dest) });
                defs.insert(*dest, id);
            }
            Instruction::Convert { dest, kind, dest_ty, src } => {
                let s = operand_node(&mut dag, &defs, *src);
                let id = dag.get_or_insert(DagNode { op: DagOp::Convert(kind.clone()), operands: smallvec![s], ty: *dest_ty, ir_dest: Some(*dest) });
                defs.insert(*dest, id);
            }
            Instruction::Call { dest, func, ret_ty, args } => {
                let mut operands: SmallVec<[NodeId; 3]> = smallvec![chain];
                for a in args {
                    operands.push(operand_node(&mut dag, &defs, a.value));
                }
                let id = dag.get_or_insert(DagNode {
                    op: DagOp::Call { callee: *func, ret_ty: *ret_ty },
                    operands,
                    ty: *ret_ty,
                    ir_dest: *dest,
                });
                chain = id;
                if let Some(d) = dest {
                    defs.insert(*d, id);
                }
            }
            Instruction::BrCond { cond, true_label, false_label } => {
                let c = operand_node(&mut dag, &defs, *cond);
                let id = dag.get_or_insert(DagNode {
                    op: DagOp::BrCond { true_label: *true_label, false_label: *false_label },
                    operands: smallvec![chain, c],
                    ty: DataType::Void,
                    ir_dest: None,
                });
                return BlockDag { dag, root: id, defs };
            }
            Instruction::BrUncond { label } => {
                let id = dag.get_or_insert(DagNode {
                    op: DagOp::BrUncond(*label),
                    operands: smallvec![chain],
                    ty: DataType::Void,
                    ir_dest: None,
                });
                return BlockDag { dag, root: id, defs };
            }
            Instruction::Ret { value } => {
                let mut operands: SmallVec<[NodeId; 3]> = smallvec![chain];
                if let Some(v) = value {
                    operands.push(operand_node(&mut dag, &defs, *v));
                }
                let id = dag.get_or_insert(DagNode { op: DagOp::Ret, operands, ty: DataType::Void, ir_dest: None });
                return BlockDag { dag, root: id, defs };
            }
            Instruction::Phi { .. } => unreachable!("filtered above"),
        }
    }
    unreachable!("block has no terminator")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instruction::IntBinOp;

    #[test]
    fn duplicate_pure_expressions_share_one_node() {
        let mut block = Block::new(crate::ir::operand::BlockId(0));
        let a = RegId(0);
        let b = RegId(1);
        let c = RegId(2);
        let d = RegId(3);
        block.insts.push(Instruction::IntBin {
            dest: c,
            op: IntBinOp::Add,
            ty: DataType::I32,
            lhs: Operand::Register(a, DataType::I32),
            rhs: Operand::Register(b, DataType::I32),
        });
        block.insts.push(Instruction::IntBin {
            dest: d,
            op: IntBinOp::Add,
            ty: DataType::I32,
            lhs: Operand::Register(a, DataType::I32),
            rhs: Operand::Register(b, DataType::I32),
        });
        block.insts.push(Instruction::Ret { value: Some(Operand::Register(d, DataType::I32)) });

        let built = build_block(&block);
        assert_eq!(built.defs[&c], built.defs[&d]);
    }

    #[test]
    fn loads_chain_in_program_order() {
        let mut block = Block::new(crate::ir::operand::BlockId(0));
        let p = RegId(0);
        let v1 = RegId(1);
        let v2 = RegId(2);
        block.insts.push(Instruction::Load { dest: v1, ty: DataType::I32, ptr: Operand::Register(p, DataType::Ptr) });
        block.insts.push(Instruction::Store { val: Operand::Register(v1, DataType::I32), ptr: Operand::Register(p, DataType::Ptr) });
        block.insts.push(Instruction::Load { dest: v2, ty: DataType::I32, ptr: Operand::Register(p, DataType::Ptr) });
        block.insts.push(Instruction::Ret { value: Some(Operand::Register(v2, DataType::I32)) });

        let built = build_block(&block);
        // The second load must not be CSE'd with the first: its chain operand differs
        // (it follows the intervening store).
        assert_ne!(built.defs[&v1], built.defs[&v2]);
    }
}
