//! Basic blocks: an ordered instruction sequence with Phis, if any, occupying a
//! contiguous prefix, terminated by exactly one terminator (spec §3.4).

use super::instruction::Instruction;
use super::operand::BlockId;

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub id: BlockId,
    pub insts: Vec<Instruction>,
}

impl Block {
    pub fn new(id: BlockId) -> Self {
        Self { id, insts: Vec::new() }
    }

    pub fn phis(&self) -> impl Iterator<Item = &Instruction> {
        self.insts.iter().take_while(|i| i.is_phi())
    }

    pub fn phis_mut(&mut self) -> impl Iterator<Item = &mut Instruction> {
        self.insts.iter_mut().take_while(|i| i.is_phi())
    }

    pub fn terminator(&self) -> Option<&Instruction> {
        self.insts.last().filter(|i| i.is_terminator())
    }

    pub fn terminator_mut(&mut self) -> Option<&mut Instruction> {
        if self.insts.last().is_some_and(|i| i.is_terminator()) {
            self.insts.last_mut()
        } else {
            None
        }
    }

    pub fn successors(&self) -> Vec<BlockId> {
        self.terminator().map(|t| t.successors()).unwrap_or_default()
    }

    /// Inserts `inst` at the position just before the terminator (the phi-elimination
    /// and LICM-guard insertion point throughout the pipeline).
    pub fn insert_before_terminator(&mut self, inst: Instruction) {
        let pos = self.insts.iter().position(|i| i.is_terminator()).unwrap_or(self.insts.len());
        self.insts.insert(pos, inst);
    }

    /// Pushes a non-Phi instruction after the existing Phi prefix and before whatever
    /// else is in the block (used by mem2reg-style Phi insertion, which always runs
    /// before the block body is otherwise touched).
    pub fn push_phi(&mut self, inst: Instruction) {
        debug_assert!(inst.is_phi());
        let pos = self.insts.iter().take_while(|i| i.is_phi()).count();
        self.insts.insert(pos, inst);
    }
}
