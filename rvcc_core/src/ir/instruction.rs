//! The closed instruction set (spec §3.3). Each variant carries the operands it
//! reads, the register it defines (if any), and opcode-specific side data.

use super::operand::{BlockId, GlobalId, Operand, RegId};
use super::types::DataType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntBinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Shl,
    AShr,
    LShr,
    And,
    Or,
    Xor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatBinOp {
    FAdd,
    FSub,
    FMul,
    FDiv,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntCond {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FloatCond {
    Oeq,
    Ogt,
    Oge,
    Olt,
    Ole,
    One,
    Ord,
    Ueq,
    Ugt,
    Uge,
    Ult,
    Ule,
    Une,
    Uno,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Conversion {
    /// `i1 -> i32` (or wider integer) widening used when a boolean feeds an
    /// integer context.
    Zext,
    /// Signed integer to float.
    Sitofp,
    /// Float to signed integer (round toward zero, per the RV64 `FCVT.W.S` default;
    /// see SPEC_FULL.md §F and spec.md's Open Questions).
    Fptosi,
}

/// A function-call argument: its declared type paired with the operand passed.
#[derive(Debug, Clone, PartialEq)]
pub struct CallArg {
    pub ty: DataType,
    pub value: Operand,
}

/// Array dimensions attached to `Alloca`/`Gep`/global declarations — the only place
/// the IR carries aggregate shape (spec §3.1).
pub type Dims = Vec<u32>;

#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    // ---- Memory ----
    Load { dest: RegId, ty: DataType, ptr: Operand },
    Store { val: Operand, ptr: Operand },
    Alloca { dest: RegId, ty: DataType, dims: Dims },
    Gep { dest: RegId, base: Operand, indices: Vec<Operand>, dims: Dims, elem_ty: DataType },

    // ---- Arithmetic / logical ----
    IntBin { dest: RegId, op: IntBinOp, ty: DataType, lhs: Operand, rhs: Operand },
    FloatBin { dest: RegId, op: FloatBinOp, ty: DataType, lhs: Operand, rhs: Operand },

    // ---- Comparison ----
    Icmp { dest: RegId, cond: IntCond, lhs: Operand, rhs: Operand },
    Fcmp { dest: RegId, cond: FloatCond, lhs: Operand, rhs: Operand },

    // ---- Conversion ----
    Convert { dest: RegId, kind: Conversion, dest_ty: DataType, src: Operand },

    // ---- Control flow (terminators) ----
    BrCond { cond: Operand, true_label: BlockId, false_label: BlockId },
    BrUncond { label: BlockId },
    Ret { value: Option<Operand> },

    // ---- Call ----
    Call { dest: Option<RegId>, func: GlobalId, ret_ty: DataType, args: Vec<CallArg> },

    // ---- SSA merge ----
    Phi { dest: RegId, ty: DataType, incoming: Vec<(BlockId, Operand)> },
}

impl Instruction {
    pub fn is_terminator(&self) -> bool {
        matches!(self, Instruction::BrCond { .. } | Instruction::BrUncond { .. } | Instruction::Ret { .. })
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, Instruction::Phi { .. })
    }

    /// Instructions whose removal/duplication is never observable beyond their own
    /// result: no memory effect, no control transfer. Used by CSE/ADCE/LICM to
    /// distinguish "pure" candidates from effectful ones.
    pub fn is_pure(&self) -> bool {
        matches!(
            self,
            Instruction::IntBin { .. }
                | Instruction::FloatBin { .. }
                | Instruction::Icmp { .. }
                | Instruction::Fcmp { .. }
                | Instruction::Convert { .. }
                | Instruction::Gep { .. }
        )
    }

    pub fn has_side_effect(&self) -> bool {
        matches!(self, Instruction::Store { .. } | Instruction::Call { .. } | Instruction::Ret { .. })
    }

    /// The register this instruction defines, if any.
    pub fn def(&self) -> Option<RegId> {
        match self {
            Instruction::Load { dest, .. }
            | Instruction::Alloca { dest, .. }
            | Instruction::Gep { dest, .. }
            | Instruction::IntBin { dest, .. }
            | Instruction::FloatBin { dest, .. }
            | Instruction::Icmp { dest, .. }
            | Instruction::Fcmp { dest, .. }
            | Instruction::Convert { dest, .. }
            | Instruction::Phi { dest, .. } => Some(*dest),
            Instruction::Call { dest, .. } => *dest,
            Instruction::Store { .. }
            | Instruction::BrCond { .. }
            | Instruction::BrUncond { .. }
            | Instruction::Ret { .. } => None,
        }
    }

    pub fn def_ty(&self) -> Option<DataType> {
        match self {
            Instruction::Load { ty, .. } => Some(*ty),
            Instruction::Alloca { .. } => Some(DataType::Ptr),
            Instruction::Gep { .. } => Some(DataType::Ptr),
            Instruction::IntBin { ty, .. } | Instruction::FloatBin { ty, .. } => Some(*ty),
            Instruction::Icmp { .. } | Instruction::Fcmp { .. } => Some(DataType::I1),
            Instruction::Convert { dest_ty, .. } => Some(*dest_ty),
            Instruction::Phi { ty, .. } => Some(*ty),
            Instruction::Call { ret_ty, dest, .. } => dest.map(|_| *ret_ty),
            _ => None,
        }
    }

    /// All operands read by this instruction, in evaluation order. Phi incoming
    /// values are included; their labels are not (use `successors`/`phi_incoming`
    /// for those).
    pub fn uses(&self) -> Vec<Operand> {
        match self {
            Instruction::Load { ptr, .. } => vec![*ptr],
            Instruction::Store { val, ptr } => vec![*val, *ptr],
            Instruction::Alloca { .. } => vec![],
            Instruction::Gep { base, indices, .. } => {
                let mut v = vec![*base];
                v.extend(indices.iter().copied());
                v
            }
            Instruction::IntBin { lhs, rhs, .. } | Instruction::FloatBin { lhs, rhs, .. } => vec![*lhs, *rhs],
            Instruction::Icmp { lhs, rhs, .. } | Instruction::Fcmp { lhs, rhs, .. } => vec![*lhs, *rhs],
            Instruction::Convert { src, .. } => vec![*src],
            Instruction::BrCond { cond, .. } => vec![*cond],
            Instruction::BrUncond { .. } => vec![],
            Instruction::Ret { value } => value.iter().copied().collect(),
            Instruction::Call { args, .. } => args.iter().map(|a| a.value).collect(),
            Instruction::Phi { incoming, .. } => incoming.iter().map(|(_, v)| *v).collect(),
        }
    }

    pub fn uses_mut(&mut self) -> Vec<&mut Operand> {
        match self {
            Instruction::Load { ptr, .. } => vec![ptr],
            Instruction::Store { val, ptr } => vec![val, ptr],
            Instruction::Alloca { .. } => vec![],
            Instruction::Gep { base, indices, .. } => {
                let mut v = vec![base];
                v.extend(indices.iter_mut());
                v
            }
            Instruction::IntBin { lhs, rhs, .. } | Instruction::FloatBin { lhs, rhs, .. } => vec![lhs, rhs],
            Instruction::Icmp { lhs, rhs, .. } | Instruction::Fcmp { lhs, rhs, .. } => vec![lhs, rhs],
            Instruction::Convert { src, .. } => vec![src],
            Instruction::BrCond { cond, .. } => vec![cond],
            Instruction::BrUncond { .. } => vec![],
            Instruction::Ret { value } => value.iter_mut().collect(),
            Instruction::Call { args, .. } => args.iter_mut().map(|a| &mut a.value).collect(),
            Instruction::Phi { incoming, .. } => incoming.iter_mut().map(|(_, v)| v).collect(),
        }
    }

    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Instruction::BrCond { true_label, false_label, .. } => vec![*true_label, *false_label],
            Instruction::BrUncond { label } => vec![*label],
            Instruction::Ret { .. } => vec![],
            _ => vec![],
        }
    }
}
