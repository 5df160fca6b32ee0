//! Control-flow graph construction (spec §4.2.2): walk each block's terminator,
//! delete blocks unreachable from the entry.

use hashbrown::HashMap;

use crate::ir::function::Function;
use crate::ir::operand::BlockId;

#[derive(Debug, Clone, Default)]
pub struct Cfg {
    succs: HashMap<BlockId, Vec<BlockId>>,
    preds: HashMap<BlockId, Vec<BlockId>>,
    /// Blocks in the function, in the order `Function::blocks_in_order` reports,
    /// restricted to those reachable from the entry. Unreachable blocks are *not*
    /// removed from the `Function` itself here — that is ADCE's job post-fixpoint
    /// (spec §4.2.8); `Cfg::build` just ignores them in its successor/predecessor
    /// maps like the live analysis manager would.
    pub order: Vec<BlockId>,
}

impl Cfg {
    pub fn build(f: &Function) -> Self {
        let mut succs = HashMap::new();
        let mut preds: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
        for block in f.blocks_in_order() {
            let s = block.successors();
            for &t in &s {
                preds.entry(t).or_default().push(block.id);
            }
            succs.insert(block.id, s);
        }

        // BFS from entry to determine the reachable order; unreachable ids are
        // dropped from `order` (but not deleted from the function).
        let mut order = Vec::new();
        let mut visited = hashbrown::HashSet::new();
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(f.entry());
        visited.insert(f.entry());
        while let Some(b) = queue.pop_front() {
            order.push(b);
            for &s in succs.get(&b).into_iter().flatten() {
                if visited.insert(s) {
                    queue.push_back(s);
                }
            }
        }

        Cfg { succs, preds, order }
    }

    pub fn successors(&self, b: BlockId) -> &[BlockId] {
        self.succs.get(&b).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn predecessors(&self, b: BlockId) -> &[BlockId] {
        self.preds.get(&b).map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn is_reachable(&self, b: BlockId) -> bool {
        self.order.contains(&b)
    }

    /// Exit blocks: those whose terminator is `Ret`, restricted to reachable blocks.
    pub fn exits(&self, f: &Function) -> Vec<BlockId> {
        self.order
            .iter()
            .copied()
            .filter(|b| self.succs.get(b).map(|s| s.is_empty()).unwrap_or(true))
            .filter(|b| f.blocks.contains_key(b))
            .collect()
    }
}

/// Removes blocks unreachable from the entry from the `Function` itself, per the
/// CFG analysis's "unreachable blocks discovered by a BFS from entry are deleted"
/// contract. Call sites that just need read-only reachability should use
/// `Cfg::build` + `Cfg::is_reachable` instead of mutating.
pub fn prune_unreachable(f: &mut Function) {
    let cfg = Cfg::build(f);
    let reachable: hashbrown::HashSet<BlockId> = cfg.order.iter().copied().collect();
    let to_remove: Vec<BlockId> = f.block_order.iter().copied().filter(|b| !reachable.contains(b)).collect();
    for b in to_remove {
        f.remove_block(b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instruction::Instruction;
    use crate::ir::operand::Operand;
    use crate::ir::types::DataType;

    #[test]
    fn unreachable_block_excluded_from_order() {
        let mut f = Function::new("f", DataType::I32, &[]);
        let dead = f.create_block();
        f.block_mut(f.entry()).insts.push(Instruction::Ret { value: Some(Operand::ImmI32(0)) });
        f.block_mut(dead).insts.push(Instruction::Ret { value: Some(Operand::ImmI32(1)) });
        let cfg = Cfg::build(&f);
        assert!(cfg.order.contains(&f.entry()));
        assert!(!cfg.order.contains(&dead));
    }
}
