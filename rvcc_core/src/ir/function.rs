//! `Function`: a map `blockId -> Block` plus signature and register-id counter
//! (spec §3.4). A `Function` exclusively owns its blocks and their instructions.

use hashbrown::HashMap;

use super::block::Block;
use super::operand::{BlockId, RegId};
use super::types::DataType;

/// The function header: name, return type, and `(type, register)` parameter pairs.
/// Parameter registers are pre-allocated at function creation, per spec §3.4.
#[derive(Debug, Clone)]
pub struct Signature {
    pub name: String,
    pub ret_ty: DataType,
    pub params: Vec<(DataType, RegId)>,
    /// True for parameters that are themselves addresses (array/pointer params).
    pub param_is_ptr: Vec<bool>,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub sig: Signature,
    pub blocks: HashMap<BlockId, Block>,
    /// Insertion order of block ids, since `HashMap` has none of its own; block 0 is
    /// the entry by convention and is always first.
    pub block_order: Vec<BlockId>,
    next_reg: u32,
    next_block: u32,
}

impl Function {
    pub fn new(name: impl Into<String>, ret_ty: DataType, param_tys: &[(DataType, bool)]) -> Self {
        let mut next_reg = 0u32;
        let mut params = Vec::with_capacity(param_tys.len());
        let mut param_is_ptr = Vec::with_capacity(param_tys.len());
        for (ty, is_ptr) in param_tys {
            let r = RegId(next_reg);
            next_reg += 1;
            params.push((*ty, r));
            param_is_ptr.push(*is_ptr);
        }
        let mut f = Function {
            sig: Signature { name: name.into(), ret_ty, params, param_is_ptr },
            blocks: HashMap::new(),
            block_order: Vec::new(),
            next_reg,
            next_block: 0,
        };
        let entry = f.create_block();
        debug_assert_eq!(entry, BlockId(0));
        f
    }

    pub fn create_block(&mut self) -> BlockId {
        let id = BlockId(self.next_block);
        self.next_block += 1;
        self.blocks.insert(id, Block::new(id));
        self.block_order.push(id);
        id
    }

    pub fn remove_block(&mut self, id: BlockId) {
        self.blocks.remove(&id);
        self.block_order.retain(|b| *b != id);
    }

    pub fn entry(&self) -> BlockId {
        BlockId(0)
    }

    pub fn fresh_register(&mut self) -> u32 {
        let id = self.next_reg;
        self.next_reg += 1;
        id
    }

    pub fn fresh_reg(&mut self) -> RegId {
        RegId(self.fresh_register())
    }

    pub fn block(&self, id: BlockId) -> &Block {
        self.blocks.get(&id).expect("block id not present in function")
    }

    pub fn block_mut(&mut self, id: BlockId) -> &mut Block {
        self.blocks.get_mut(&id).expect("block id not present in function")
    }

    /// Blocks in a deterministic, insertion-stable order (entry first). Most passes
    /// iterate this rather than the raw hash map to keep output reproducible.
    pub fn blocks_in_order(&self) -> impl Iterator<Item = &Block> {
        self.block_order.iter().filter_map(move |id| self.blocks.get(id))
    }

    pub fn ret_instructions(&self) -> Vec<BlockId> {
        self.blocks_in_order()
            .filter(|b| matches!(b.terminator(), Some(crate::ir::instruction::Instruction::Ret { .. })))
            .map(|b| b.id)
            .collect()
    }
}
