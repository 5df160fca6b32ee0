//! SelectionDAG instruction selection (spec §3.6, §4.3): each basic block is lowered
//! into a small per-block DAG with folding-set CSE, then scheduled back into a linear
//! order for `isel` to pattern-match into RISC-V64 `MInstruction`s.

pub mod builder;
pub mod node;
pub mod schedule;

use hashbrown::HashMap;
use smallvec::SmallVec;

pub use node::{DagNode, DagOp, NodeId};

/// A folding set keyed on `(op, operands)`: two pure nodes with the same opcode and
/// the same operand node ids are the same value, so the second occurrence reuses the
/// first node instead of allocating a duplicate (spec's "folding-set-based CSE").
#[derive(Debug, Default)]
pub struct SelectionDag {
    nodes: Vec<DagNode>,
    cse: HashMap<(DagOp, SmallVec<[NodeId; 3]>), NodeId>,
    pub entry_token: NodeId,
}

impl SelectionDag {
    pub fn new() -> Self {
        let mut dag = SelectionDag { nodes: Vec::new(), cse: HashMap::new(), entry_token: NodeId(0) };
        let entry = dag.push_uncached(DagNode {
            op: DagOp::EntryToken,
            operands: SmallVec::new(),
            ty: crate::ir::types::DataType::Void,
            ir_dest: None,
        });
        dag.entry_token = entry;
        dag
    }

    fn push_uncached(&mut self, node: DagNode) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    /// Inserts a node, deduplicating pure (non-effectful, non-control) nodes through
    /// the folding set. Effectful/control nodes are never shared even if structurally
    /// identical, since their position in the chain is itself part of their identity.
    pub fn get_or_insert(&mut self, node: DagNode) -> NodeId {
        if node.op.is_effectful() || node.op.is_control() {
            return self.push_uncached(node);
        }
        let key = (node.op.clone(), node.operands.clone());
        if let Some(id) = self.cse.get(&key) {
            return *id;
        }
        let id = self.push_uncached(node);
        self.cse.insert(key, id);
        id
    }

    pub fn node(&self, id: NodeId) -> &DagNode {
        &self.nodes[id.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
