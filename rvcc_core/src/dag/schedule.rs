//! Topological scheduling (spec §4.3): turns a `SelectionDag` back into one linear
//! node order, respecting both data dependencies and the chain threaded through
//! effectful nodes, which `isel` then lowers node-by-node into `MInstruction`s.

use hashbrown::HashSet;

use super::{NodeId, SelectionDag};

/// Post-order DFS from `root` over each node's operands. Because the builder only
/// ever creates a node after all of its operands exist (source order), this always
/// reproduces the original instruction order for nodes reachable from `root` — the
/// scheduler exists to make that ordering an explicit, checkable property of the DAG
/// rather than an implicit one left over from how it happened to be built.
pub fn schedule(dag: &SelectionDag, root: NodeId) -> Vec<NodeId> {
    let mut order = Vec::new();
    let mut visited = HashSet::new();
    visit(dag, root, &mut visited, &mut order);
    order
}

fn visit(dag: &SelectionDag, id: NodeId, visited: &mut HashSet<NodeId>, order: &mut Vec<NodeId>) {
    if !visited.insert(id) {
        return;
    }
    let node = dag.node(id);
    for &operand in &node.operands {
        visit(dag, operand, visited, order);
    }
    order.push(id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::builder::build_block;
    use crate::ir::block::Block;
    use crate::ir::instruction::{Instruction, IntBinOp};
    use crate::ir::operand::{BlockId, Operand, RegId};
    use crate::ir::types::DataType;

    #[test]
    fn schedule_orders_operands_before_their_users() {
        let mut block = Block::new(BlockId(0));
        let a = RegId(0);
        let b = RegId(1);
        let c = RegId(2);
        block.insts.push(Instruction::IntBin {
            dest: c,
            op: IntBinOp::Add,
            ty: DataType::I32,
            lhs: Operand::Register(a, DataType::I32),
            rhs: Operand::Register(b, DataType::I32),
        });
        block.insts.push(Instruction::Ret { value: Some(Operand::Register(c, DataType::I32)) });

        let built = build_block(&block);
        let order = schedule(&built.dag, built.root);
        let add_pos = order.iter().position(|n| *n == built.defs[&c]).unwrap();
        let ret_pos = order.iter().position(|n| *n == built.root).unwrap();
        assert!(add_pos < ret_pos);
    }
}
