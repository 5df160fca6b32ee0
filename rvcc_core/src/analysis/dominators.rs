//! Forward dominance and reverse (post-)dominance over a `Function`'s CFG, built on
//! top of the generic Lengauer–Tarjan solver (spec §4.2.1, GLOSSARY "Reverse
//! dominance").

use hashbrown::HashMap;

use super::cfg::Cfg;
use super::dom_solver::{self, DomResult};
use crate::ir::function::Function;
use crate::ir::operand::BlockId;

#[derive(Debug, Clone)]
pub struct Dominators {
    index_of: HashMap<BlockId, usize>,
    block_of: Vec<BlockId>,
    result: DomResult,
}

impl Dominators {
    /// Forward dominance: entry = the function's entry block.
    pub fn forward(f: &Function) -> Self {
        let cfg = Cfg::build(f);
        Self::build(f, &cfg, &[f.entry()], false)
    }

    /// Post-dominance: entries are the function's `Ret` blocks (and, since a CFG may
    /// have no reachable return at all in a diverging function, any reachable block
    /// with no successors acts as an implicit exit too).
    pub fn reverse(f: &Function) -> Self {
        let cfg = Cfg::build(f);
        let exits = cfg.exits(f);
        Self::build(f, &cfg, &exits, true)
    }

    fn build(f: &Function, cfg: &Cfg, entry_points: &[BlockId], rev: bool) -> Self {
        let block_of: Vec<BlockId> = cfg.order.clone();
        let index_of: HashMap<BlockId, usize> = block_of.iter().enumerate().map(|(i, b)| (*b, i)).collect();

        let n = block_of.len();
        let mut graph = vec![Vec::new(); n];
        for (i, &b) in block_of.iter().enumerate() {
            let neighbors = if rev { cfg.predecessors(b) } else { cfg.successors(b) };
            for &nb in neighbors {
                if let Some(&j) = index_of.get(&nb) {
                    graph[i].push(j);
                }
            }
        }
        let entries: Vec<usize> = entry_points.iter().filter_map(|b| index_of.get(b).copied()).collect();
        let result = dom_solver::solve(&graph, &entries);
        let _ = f;
        Dominators { index_of, block_of, result }
    }

    pub fn idom(&self, b: BlockId) -> Option<BlockId> {
        let i = *self.index_of.get(&b)?;
        Some(self.block_of[self.result.imm_dom[i]])
    }

    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let (Some(ia), Some(mut ib)) = (self.index_of.get(&a).copied(), self.index_of.get(&b).copied()) else {
            return a == b;
        };
        loop {
            if ia == ib {
                return true;
            }
            let next = self.result.imm_dom[ib];
            if next == ib {
                return false;
            }
            ib = next;
        }
    }

    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    pub fn frontier(&self, b: BlockId) -> Vec<BlockId> {
        let Some(&i) = self.index_of.get(&b) else { return Vec::new() };
        self.result.dom_frontier[i].iter().map(|&j| self.block_of[j]).collect()
    }

    pub fn children(&self, b: BlockId) -> Vec<BlockId> {
        let Some(&i) = self.index_of.get(&b) else { return Vec::new() };
        self.result.dom_tree[i].iter().map(|&j| self.block_of[j]).collect()
    }

    /// Iterated dominance frontier of a set of blocks: the fixpoint of repeatedly
    /// unioning in the frontier of every block in the working set (used by mem2reg's
    /// Phi placement, spec §4.2.4).
    pub fn iterated_frontier(&self, seeds: impl IntoIterator<Item = BlockId>) -> hashbrown::HashSet<BlockId> {
        let mut result = hashbrown::HashSet::new();
        let mut worklist: Vec<BlockId> = seeds.into_iter().collect();
        while let Some(b) = worklist.pop() {
            for f in self.frontier(b) {
                if result.insert(f) {
                    worklist.push(f);
                }
            }
        }
        result
    }

    /// DFS preorder over the dominator tree starting at `root`, used by the
    /// dominator-tree CSE pass and mem2reg's renaming walk.
    pub fn dom_tree_preorder(&self, root: BlockId) -> Vec<BlockId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(b) = stack.pop() {
            out.push(b);
            let mut children = self.children(b);
            children.reverse();
            stack.extend(children);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instruction::{IntCond, Instruction};
    use crate::ir::operand::Operand;
    use crate::ir::types::DataType;

    fn diamond() -> Function {
        let mut f = Function::new("f", DataType::I32, &[(DataType::I32, false)]);
        let entry = f.entry();
        let then_b = f.create_block();
        let else_b = f.create_block();
        let merge = f.create_block();
        let p0 = f.sig.params[0].1;
        let c = f.fresh_reg();
        f.block_mut(entry).insts.push(Instruction::Icmp {
            dest: c,
            cond: IntCond::Sgt,
            lhs: Operand::Register(p0, DataType::I32),
            rhs: Operand::ImmI32(0),
        });
        f.block_mut(entry).insts.push(Instruction::BrCond {
            cond: Operand::Register(c, DataType::I1),
            true_label: then_b,
            false_label: else_b,
        });
        f.block_mut(then_b).insts.push(Instruction::BrUncond { label: merge });
        f.block_mut(else_b).insts.push(Instruction::BrUncond { label: merge });
        f.block_mut(merge).insts.push(Instruction::Ret { value: Some(Operand::ImmI32(0)) });
        f
    }

    #[test]
    fn diamond_idoms() {
        let f = diamond();
        let dom = Dominators::forward(&f);
        assert_eq!(dom.idom(f.entry()), Some(f.entry()));
        assert!(dom.strictly_dominates(f.entry(), BlockId(3)));
        assert_eq!(dom.idom(BlockId(3)), Some(f.entry()));
    }

    #[test]
    fn merge_block_frontier_is_empty_but_branches_feed_it() {
        let f = diamond();
        let dom = Dominators::forward(&f);
        assert!(dom.frontier(BlockId(3)).is_empty());
        assert!(dom.frontier(BlockId(1)).contains(&BlockId(3)));
        assert!(dom.frontier(BlockId(2)).contains(&BlockId(3)));
    }
}
