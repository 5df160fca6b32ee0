//! SelectionDAG nodes (spec §3.6, §4.3): one DAG per basic block. Side-effecting
//! nodes (`Load`/`Store`/`Call`) each take the previous effectful node as their
//! first operand — a `TokenFactor`-free chain, since every block here has exactly
//! one memory-ordered stream rather than the multiple parallel chains a full
//! SelectionDAG merges with an explicit `TokenFactor` node.

use smallvec::SmallVec;

use crate::ir::instruction::{Conversion, FloatBinOp, FloatCond, IntBinOp, IntCond};
use crate::ir::operand::{BlockId, GlobalId, RegId};
use crate::ir::types::DataType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DagOp {
    EntryToken,
    ConstI(i64),
    /// f32 bit pattern, since `f32` isn't `Eq`/`Hash`.
    ConstF(u32),
    /// A value already computed elsewhere (an incoming parameter, or a register
    /// defined by a predecessor block / Phi) — opaque to this block's DAG.
    Leaf(RegId),
    /// Reserves stack space for an IR `alloca`; its value is the object's address,
    /// resolved to a real `FrameIndex` during instruction selection.
    Alloca { ir_reg: RegId, size: u32, align: u32 },
    IntBin(IntBinOp),
    FloatBin(FloatBinOp),
    Icmp(IntCond),
    Fcmp(FloatCond),
    Convert(Conversion),
    /// operands = `[base, index...]`.
    Gep { dims: Vec<u32>, elem_ty: DataType },
    /// operands = `[chain]`.
    Load,
    /// operands = `[chain, value]`.
    Store,
    /// operands = `[chain, arg...]`.
    Call { callee: GlobalId, ret_ty: DataType },
    /// operands = `[chain, cond]`.
    BrCond { true_label: BlockId, false_label: BlockId },
    BrUncond(BlockId),
    /// operands = `[chain, value?]`.
    Ret,
}

impl DagOp {
    pub fn is_effectful(&self) -> bool {
        matches!(self, DagOp::Load | DagOp::Store | DagOp::Call { .. })
    }

    pub fn is_control(&self) -> bool {
        matches!(self, DagOp::BrCond { .. } | DagOp::BrUncond(_) | DagOp::Ret)
    }
}

#[derive(Debug, Clone)]
pub struct DagNode {
    pub op: DagOp,
    pub operands: SmallVec<[NodeId; 3]>,
    pub ty: DataType,
    /// The original IR register this node's value corresponds to, if it defines
    /// one — kept so isel can record "this vreg now holds this node's result".
    pub ir_dest: Option<RegId>,
}
