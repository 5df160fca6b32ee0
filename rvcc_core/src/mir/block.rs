//! Machine basic blocks: same shape as the IR's `Block` (a Phi prefix, a body, one
//! terminator) but over `MInstruction`.

use std::fmt;

use super::instruction::MInstruction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MBlockId(pub u32);

impl fmt::Display for MBlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mbb{}", self.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MBlock {
    pub id: MBlockId,
    pub insts: Vec<MInstruction>,
}

impl MBlock {
    pub fn new(id: MBlockId) -> Self {
        MBlock { id, insts: Vec::new() }
    }

    pub fn phis(&self) -> impl Iterator<Item = &MInstruction> {
        self.insts.iter().take_while(|i| i.is_phi())
    }

    pub fn terminator(&self) -> Option<&MInstruction> {
        self.insts.last().filter(|i| i.is_terminator())
    }

    pub fn successors(&self) -> Vec<MBlockId> {
        self.terminator().map(|t| t.successors()).unwrap_or_default()
    }

    pub fn insert_before_terminator(&mut self, inst: MInstruction) {
        let pos = self.insts.iter().position(|i| i.is_terminator()).unwrap_or(self.insts.len());
        self.insts.insert(pos, inst);
    }
}
