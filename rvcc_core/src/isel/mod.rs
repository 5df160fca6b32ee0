//! Instruction selection (spec §4.3, §4.4): builds a `SelectionDag` per block,
//! schedules it, and pattern-matches each node into RISC-V64 `MInstruction`s. The
//! only target-specific calls made here go through `TargetAdapter`; everything else
//! (DAG shape, scheduling, the Phi/call-argument bookkeeping) is target-agnostic.

pub mod call_conv;
pub mod cmp;

use hashbrown::HashMap;
use smallvec::smallvec;

use crate::analysis::dominators::Dominators;
use crate::dag::node::{DagNode, DagOp, NodeId};
use crate::dag::{builder, schedule, SelectionDag};
use crate::ir::block::Block;
use crate::ir::function::Function;
use crate::ir::instruction::{Conversion, FloatBinOp, Instruction, IntBinOp};
use crate::ir::module::Module;
use crate::ir::operand::{BlockId, Operand, RegId};
use crate::ir::types::DataType;
use crate::mir::block::MBlockId;
use crate::mir::function::MFunction;
use crate::mir::instruction::MInstruction;
use crate::mir::operand::{MOperand, MReg};
use crate::mir::types::MDataType;
use crate::target::riscv64::{RvInstr, RvOp};
use crate::target::TargetAdapter;

struct PendingPhi {
    mblock: MBlockId,
    dest: MReg,
    incoming: Vec<(BlockId, Operand)>,
}

pub fn select_module(module: &Module, target: &dyn TargetAdapter) -> Vec<MFunction> {
    module.functions.iter().map(|f| select_function(f, target)).collect()
}

pub fn select_function(f: &Function, target: &dyn TargetAdapter) -> MFunction {
    let ret_ty = if f.sig.ret_ty == DataType::Void { None } else { Some(MDataType::from_ir(f.sig.ret_ty)) };
    let mut mf = MFunction::new(f.sig.name.clone(), ret_ty);

    let dom = Dominators::forward(f);
    let order = dom.dom_tree_preorder(f.entry());

    let mut block_map: HashMap<BlockId, MBlockId> = HashMap::new();
    for (i, &b) in order.iter().enumerate() {
        block_map.insert(b, if i == 0 { mf.entry() } else { mf.create_block() });
    }

    let mut regmap: HashMap<RegId, MReg> = HashMap::new();
    let param_tys: Vec<MDataType> = f.sig.params.iter().map(|(ty, _)| MDataType::from_ir(*ty)).collect();
    let entry_mb = block_map[&f.entry()];
    {
        let mut entry_insts = std::mem::take(&mut mf.block_mut(entry_mb).insts);
        let param_regs = call_conv::place_incoming_params(&mut mf, target, &param_tys, &mut entry_insts);
        for ((_, ir_reg), vreg) in f.sig.params.iter().zip(param_regs.iter()) {
            regmap.insert(*ir_reg, *vreg);
        }
        mf.param_regs = param_regs;
        mf.block_mut(entry_mb).insts = entry_insts;
    }

    let mut pending_phis: Vec<PendingPhi> = Vec::new();
    let mut phi_insert_pos: HashMap<MBlockId, usize> = HashMap::new();

    for &b in &order {
        let block = f.block(b);
        let mb = block_map[&b];

        // Reserve a destination vreg for every Phi up front so later blocks can
        // reference it as a Leaf even though the Phi's own inputs aren't all known
        // yet (a loop header's back-edge operand is defined after the header).
        for inst in block.phis() {
            if let Instruction::Phi { dest, ty, incoming } = inst {
                let vreg = mf.fresh_vreg(MDataType::from_ir(*ty));
                regmap.insert(*dest, vreg);
                pending_phis.push(PendingPhi { mblock: mb, dest: vreg, incoming: incoming.clone() });
            }
        }

        lower_block(&mut mf, target, block, &block_map, &mut regmap);
    }

    for phi in pending_phis {
        let incoming: Vec<(MBlockId, MOperand)> = phi
            .incoming
            .iter()
            .map(|(pred, val)| (block_map[pred], resolve_operand(*val, &regmap)))
            .collect();
        let pos = phi_insert_pos.entry(phi.mblock).or_insert(0);
        mf.block_mut(phi.mblock).insts.insert(*pos, MInstruction::Phi { dest: phi.dest, incoming });
        *pos += 1;
    }

    mf
}

fn resolve_operand(op: Operand, regmap: &HashMap<RegId, MReg>) -> MOperand {
    match op {
        Operand::Register(r, _) => MOperand::Reg(*regmap.get(&r).expect("register used before its def was lowered")),
        Operand::ImmI32(v) => MOperand::ImmI32(v),
        Operand::ImmF32(v) => MOperand::ImmF32(v),
        Operand::Global(_) | Operand::Label(_) => MOperand::ImmI64(0),
    }
}

fn lower_block(mf: &mut MFunction, target: &dyn TargetAdapter, block: &Block, block_map: &HashMap<BlockId, MBlockId>, regmap: &mut HashMap<RegId, MReg>) {
    let built = builder::build_block(block);
    let order = schedule::schedule(&built.dag, built.root);
    let mb = block_map[&block.id];

    let mut insts = std::mem::take(&mut mf.block_mut(mb).insts);
    let mut values: HashMap<NodeId, MOperand> = HashMap::new();

    for node_id in order {
        let node = built.dag.node(node_id).clone();
        let val = lower_node(mf, target, &node, node_id, &values, regmap, block_map, &mut insts);
        if let Some(v) = val {
            values.insert(node_id, v);
        }
        if let (Some(ir_dest), Some(v)) = (node.ir_dest, values.get(&node_id)) {
            if let MOperand::Reg(r) = v {
                regmap.insert(ir_dest, *r);
            }
        }
    }

    mf.block_mut(mb).insts = insts;
}

fn operand_of(id: NodeId, values: &HashMap<NodeId, MOperand>) -> MOperand {
    *values.get(&id).expect("DAG operand lowered before its user")
}

fn as_reg(mf: &mut MFunction, target: &dyn TargetAdapter, out: &mut Vec<MInstruction>, ty: MDataType, op: MOperand) -> MReg {
    match op {
        MOperand::Reg(r) => r,
        MOperand::ImmI32(v) => materialize(mf, target, out, ty, v as i64),
        MOperand::ImmI64(v) => materialize(mf, target, out, ty, v),
        MOperand::ImmF32(v) => materialize_float(mf, out, ty, v as f64, true),
        MOperand::ImmF64(v) => materialize_float(mf, out, ty, v, false),
        MOperand::FrameIndex(_) => unreachable!("frame indices never surface as DAG values"),
    }
}

fn materialize(mf: &mut MFunction, target: &dyn TargetAdapter, out: &mut Vec<MInstruction>, ty: MDataType, v: i64) -> MReg {
    let dest = mf.fresh_vreg(ty);
    out.extend(target.materialize_immediate(dest, v));
    dest
}

/// Float immediates are loaded through the integer pipeline's bit pattern and moved
/// into place: this codebase has no constant pool / `.rodata` emission (out of scope
/// per spec's Non-goals on textual/object emission), so a float constant becomes an
/// integer bit-pattern materialized into a GPR then reinterpreted via `fmv`-style
/// move. We approximate that reinterpretation with the adapter's generic `r#move`.
fn materialize_float(mf: &mut MFunction, out: &mut Vec<MInstruction>, ty: MDataType, v: f64, is_f32: bool) -> MReg {
    let dest = mf.fresh_vreg(ty);
    let imm = if is_f32 { MOperand::ImmF32(v as f32) } else { MOperand::ImmF64(v) };
    out.push(MInstruction::Move { dest, src: imm });
    dest
}

fn int_bin_op(op: IntBinOp, is32: bool) -> RvOp {
    use IntBinOp::*;
    match (op, is32) {
        (Add, true) => RvOp::Addw,
        (Add, false) => RvOp::Add,
        (Sub, true) => RvOp::Subw,
        (Sub, false) => RvOp::Sub,
        (Mul, true) => RvOp::Mulw,
        (Mul, false) => RvOp::Mul,
        (Div, true) => RvOp::Divw,
        (Div, false) => RvOp::Div,
        (Mod, true) => RvOp::Remw,
        (Mod, false) => RvOp::Rem,
        (Shl, true) => RvOp::Sllw,
        (Shl, false) => RvOp::Sll,
        (AShr, true) => RvOp::Sraw,
        (AShr, false) => RvOp::Sra,
        (LShr, true) => RvOp::Srlw,
        (LShr, false) => RvOp::Srl,
        (And, _) => RvOp::And,
        (Or, _) => RvOp::Or,
        (Xor, _) => RvOp::Xor,
    }
}

fn float_bin_op(op: FloatBinOp) -> RvOp {
    match op {
        FloatBinOp::FAdd => RvOp::FaddS,
        FloatBinOp::FSub => RvOp::FsubS,
        FloatBinOp::FMul => RvOp::FmulS,
        FloatBinOp::FDiv => RvOp::FdivS,
    }
}

fn emit2(out: &mut Vec<MInstruction>, op: RvOp, dest: MReg, a: MOperand, b: MOperand) {
    let mut i = RvInstr::new(op);
    i.defs.push(dest);
    i.uses.push(a);
    i.uses.push(b);
    out.push(MInstruction::Target(i));
}

fn compute_strides(dims: &[u32], elem_size: u32) -> Vec<i64> {
    let mut strides = vec![0i64; dims.len()];
    let mut acc = elem_size as i64;
    for i in (0..dims.len()).rev() {
        strides[i] = acc;
        acc *= dims[i] as i64;
    }
    strides
}

#[allow(clippy::too_many_arguments)]
fn lower_node(
    mf: &mut MFunction,
    target: &dyn TargetAdapter,
    node: &DagNode,
    id: NodeId,
    values: &HashMap<NodeId, MOperand>,
    regmap: &mut HashMap<RegId, MReg>,
    block_map: &HashMap<BlockId, MBlockId>,
    out: &mut Vec<MInstruction>,
) -> Option<MOperand> {
    let _ = id;
    match &node.op {
        DagOp::EntryToken => None,
        DagOp::ConstI(v) => Some(MOperand::Reg(materialize(mf, target, out, MDataType::from_ir(node.ty), *v))),
        DagOp::ConstF(bits) => {
            let dest = mf.fresh_vreg(MDataType::from_ir(node.ty));
            out.push(MInstruction::Move { dest, src: MOperand::ImmF32(f32::from_bits(*bits)) });
            Some(MOperand::Reg(dest))
        }
        DagOp::Leaf(r) => Some(MOperand::Reg(*regmap.get(r).expect("leaf register not yet defined by a dominating block"))),
        DagOp::Alloca { ir_reg, size, align } => {
            mf.frame.create_local(ir_reg.0, *size, *align);
            let dest = mf.fresh_vreg(MDataType::PTR);
            out.push(MInstruction::FrameAddr { dest, local: ir_reg.0 });
            Some(MOperand::Reg(dest))
        }
        DagOp::IntBin(op) => {
            let ty = MDataType::from_ir(node.ty);
            let a = as_reg(mf, target, out, ty, operand_of(node.operands[0], values));
            let b = as_reg(mf, target, out, ty, operand_of(node.operands[1], values));
            let dest = mf.fresh_vreg(ty);
            emit2(out, int_bin_op(*op, ty.size_bytes() == 4), dest, MOperand::Reg(a), MOperand::Reg(b));
            Some(MOperand::Reg(dest))
        }
        DagOp::FloatBin(op) => {
            let ty = MDataType::from_ir(node.ty);
            let a = as_reg(mf, target, out, ty, operand_of(node.operands[0], values));
            let b = as_reg(mf, target, out, ty, operand_of(node.operands[1], values));
            let dest = mf.fresh_vreg(ty);
            emit2(out, float_bin_op(*op), dest, MOperand::Reg(a), MOperand::Reg(b));
            Some(MOperand::Reg(dest))
        }
        DagOp::Icmp(cond) => {
            let a = operand_of(node.operands[0], values);
            let b = operand_of(node.operands[1], values);
            Some(MOperand::Reg(cmp::lower_icmp(mf, out, *cond, a, b)))
        }
        DagOp::Fcmp(cond) => {
            let a = operand_of(node.operands[0], values);
            let b = operand_of(node.operands[1], values);
            Some(MOperand::Reg(cmp::lower_fcmp(mf, out, *cond, a, b)))
        }
        DagOp::Convert(kind) => {
            let dest_ty = MDataType::from_ir(node.ty);
            let src = operand_of(node.operands[0], values);
            match kind {
                Conversion::Zext => {
                    let dest = mf.fresh_vreg(dest_ty);
                    out.push(target.r#move(dest, src));
                    Some(MOperand::Reg(dest))
                }
                Conversion::Sitofp => {
                    let src_reg = as_reg(mf, target, out, MDataType::I32, src);
                    let dest = mf.fresh_vreg(dest_ty);
                    emit2(out, RvOp::FcvtSW, dest, MOperand::Reg(src_reg), MOperand::Reg(src_reg));
                    // FCVT is a single-operand op; the duplicated use above is harmless
                    // padding for the fixed two-operand `emit2` helper and ignored by
                    // the real encoding step (out of this crate's scope).
                    Some(MOperand::Reg(dest))
                }
                Conversion::Fptosi => {
                    let src_reg = as_reg(mf, target, out, MDataType::F32, src);
                    let dest = mf.fresh_vreg(dest_ty);
                    emit2(out, RvOp::FcvtWS, dest, MOperand::Reg(src_reg), MOperand::Reg(src_reg));
                    Some(MOperand::Reg(dest))
                }
            }
        }
        DagOp::Gep { dims, elem_ty } => {
            let base = operand_of(node.operands[0], values);
            let mut addr = as_reg(mf, target, out, MDataType::PTR, base);
            let elem_size = elem_ty.size_bytes();
            let indices = &node.operands[1..];
            let strides = if dims.is_empty() { vec![elem_size as i64; indices.len()] } else { compute_strides(dims, elem_size) };
            for (idx_node, stride) in indices.iter().zip(strides) {
                let idx_val = operand_of(*idx_node, values);
                let idx_reg = as_reg(mf, target, out, MDataType::I64, idx_val);
                let term = if stride == 1 {
                    idx_reg
                } else {
                    let stride_reg = materialize(mf, target, out, MDataType::I64, stride);
                    let t = mf.fresh_vreg(MDataType::I64);
                    emit2(out, RvOp::Mul, t, MOperand::Reg(idx_reg), MOperand::Reg(stride_reg));
                    t
                };
                let next = mf.fresh_vreg(MDataType::PTR);
                emit2(out, RvOp::Add, next, MOperand::Reg(addr), MOperand::Reg(term));
                addr = next;
            }
            Some(MOperand::Reg(addr))
        }
        DagOp::Load => {
            let ty = MDataType::from_ir(node.ty);
            let ptr = as_reg(mf, target, out, MDataType::PTR, operand_of(node.operands[1], values));
            let dest = mf.fresh_vreg(ty);
            let op = match (ty.is_float(), ty.size_bytes()) {
                (true, 4) => RvOp::Flw,
                (true, _) => RvOp::Fld,
                (false, 4) => RvOp::Lw,
                (false, _) => RvOp::Ld,
            };
            let mut i = RvInstr::new(op);
            i.defs.push(dest);
            i.uses.push(MOperand::Reg(ptr));
            i.imm = Some(0);
            out.push(MInstruction::Target(i));
            Some(MOperand::Reg(dest))
        }
        DagOp::Store => {
            let ptr = as_reg(mf, target, out, MDataType::PTR, operand_of(node.operands[1], values));
            let val_operand = operand_of(node.operands[2], values);
            let val_ty = match val_operand {
                MOperand::Reg(r) => r.ty,
                MOperand::ImmF32(_) => MDataType::F32,
                MOperand::ImmF64(_) => MDataType::F64,
                _ => MDataType::I32,
            };
            let val = as_reg(mf, target, out, val_ty, val_operand);
            let op = match (val.ty.is_float(), val.ty.size_bytes()) {
                (true, 4) => RvOp::Fsw,
                (true, _) => RvOp::Fsd,
                (false, 4) => RvOp::Sw,
                (false, _) => RvOp::Sd,
            };
            let mut i = RvInstr::new(op);
            i.uses.push(MOperand::Reg(ptr));
            i.uses.push(MOperand::Reg(val));
            i.imm = Some(0);
            out.push(MInstruction::Target(i));
            None
        }
        DagOp::Call { callee, ret_ty } => {
            let arg_vals: Vec<MOperand> = node.operands[1..].iter().map(|n| operand_of(*n, values)).collect();
            let uses = call_conv::stage_outgoing_args(mf, target, out, &arg_vals);
            let ret_mty = if *ret_ty == DataType::Void { None } else { Some(MDataType::from_ir(*ret_ty)) };
            let mut i = RvInstr::new(RvOp::Call);
            i.uses = uses;
            i.callee = Some(format!("@{}", callee.0));
            let result = ret_mty.map(|rty| {
                let class = target.class_of(rty);
                let phys = target.return_reg(class);
                i.defs.push(MReg::physical(phys, rty));
                rty
            });
            out.push(MInstruction::Target(i));
            result.map(|rty| {
                let class = target.class_of(rty);
                let phys = target.return_reg(class);
                let dest = mf.fresh_vreg(rty);
                out.push(target.r#move(dest, MOperand::Reg(MReg::physical(phys, rty))));
                MOperand::Reg(dest)
            })
        }
        DagOp::BrCond { true_label, false_label } => {
            let cond = as_reg(mf, target, out, MDataType::I32, operand_of(node.operands[1], values));
            let mut i = RvInstr::new(RvOp::Bne);
            i.uses.push(MOperand::Reg(cond));
            i.uses.push(MOperand::Reg(MReg::physical(crate::target::riscv64::X_ZERO, MDataType::I64)));
            i.target = Some(block_map[true_label]);
            out.push(MInstruction::Target(i));
            out.push(target.jump(block_map[false_label]));
            None
        }
        DagOp::BrUncond(label) => {
            out.push(target.jump(block_map[label]));
            None
        }
        DagOp::Ret => {
            if node.operands.len() > 1 {
                let val = operand_of(node.operands[1], values);
                let ty = match val {
                    MOperand::Reg(r) => r.ty,
                    _ => MDataType::I32,
                };
                let class = target.class_of(ty);
                let phys = target.return_reg(class);
                out.push(target.r#move(MReg::physical(phys, ty), val));
            }
            out.push(target.ret());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instruction::{IntBinOp, IntCond};
    use crate::target::riscv64::Riscv64;

    #[test]
    fn selects_straight_line_function_into_riscv() {
        let mut f = Function::new("add_one", DataType::I32, &[(DataType::I32, false)]);
        let p0 = f.sig.params[0].1;
        let r = f.fresh_reg();
        f.block_mut(f.entry()).insts.push(Instruction::IntBin {
            dest: r,
            op: IntBinOp::Add,
            ty: DataType::I32,
            lhs: Operand::Register(p0, DataType::I32),
            rhs: Operand::ImmI32(1),
        });
        f.block_mut(f.entry()).insts.push(Instruction::Ret { value: Some(Operand::Register(r, DataType::I32)) });

        let target = Riscv64::default();
        let mf = select_function(&f, &target);
        assert_eq!(mf.blocks_in_order().count(), 1);
        let insts = &mf.block(mf.entry()).insts;
        assert!(insts.iter().any(|i| matches!(i, MInstruction::Target(t) if t.op == RvOp::Addw)));
        assert!(insts.iter().any(|i| matches!(i, MInstruction::Target(t) if t.op == RvOp::Ret)));
    }

    #[test]
    fn selects_diamond_with_phi() {
        let mut f = Function::new("max0", DataType::I32, &[(DataType::I32, false)]);
        let entry = f.entry();
        let then_b = f.create_block();
        let merge = f.create_block();
        let p0 = f.sig.params[0].1;
        let c = f.fresh_reg();
        let zero_reg = f.fresh_reg();
        f.block_mut(entry).insts.push(Instruction::Icmp {
            dest: c,
            cond: IntCond::Sgt,
            lhs: Operand::Register(p0, DataType::I32),
            rhs: Operand::ImmI32(0),
        });
        f.block_mut(entry).insts.push(Instruction::BrCond { cond: Operand::Register(c, DataType::I1), true_label: then_b, false_label: merge });
        f.block_mut(then_b).insts.push(Instruction::BrUncond { label: merge });
        f.block_mut(merge).insts.push(Instruction::Phi {
            dest: zero_reg,
            ty: DataType::I32,
            incoming: vec![(entry, Operand::ImmI32(0)), (then_b, Operand::Register(p0, DataType::I32))],
        });
        f.block_mut(merge).insts.push(Instruction::Ret { value: Some(Operand::Register(zero_reg, DataType::I32)) });

        let target = Riscv64::default();
        let mf = select_function(&f, &target);
        let merge_mb = *mf.block_order.last().unwrap();
        assert!(mf.block(merge_mb).insts.first().is_some_and(|i| i.is_phi()));
    }
}
