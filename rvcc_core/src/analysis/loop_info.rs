//! Natural-loop detection over the dominator tree (spec §4.2.3).

use hashbrown::{HashMap, HashSet};

use super::cfg::Cfg;
use super::dominators::Dominators;
use crate::ir::function::Function;
use crate::ir::operand::BlockId;

#[derive(Debug, Clone)]
pub struct Loop {
    pub header: BlockId,
    pub latches: Vec<BlockId>,
    pub body: HashSet<BlockId>,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

impl Loop {
    pub fn depth(&self, loops: &[Loop]) -> u32 {
        let mut d = 1;
        let mut cur = self.parent;
        while let Some(p) = cur {
            d += 1;
            cur = loops[p].parent;
        }
        d
    }

    pub fn contains(&self, b: BlockId) -> bool {
        self.body.contains(&b)
    }

    /// Successors of body blocks that leave the loop.
    pub fn exit_blocks(&self, cfg: &Cfg) -> HashSet<BlockId> {
        let mut exits = HashSet::new();
        for &b in &self.body {
            for &s in cfg.successors(b) {
                if !self.body.contains(&s) {
                    exits.insert(s);
                }
            }
        }
        exits
    }

    /// Predecessors inside the loop of an exit block — the blocks whose branch
    /// actually leaves the loop.
    pub fn exiting_blocks(&self, cfg: &Cfg) -> HashSet<BlockId> {
        let mut exiting = HashSet::new();
        for &b in &self.body {
            for &s in cfg.successors(b) {
                if !self.body.contains(&s) {
                    exiting.insert(b);
                }
            }
        }
        exiting
    }

    /// The loop's preheader: its header's unique non-loop predecessor, if there is
    /// exactly one.
    pub fn preheader(&self, cfg: &Cfg) -> Option<BlockId> {
        let outside: Vec<BlockId> =
            cfg.predecessors(self.header).iter().copied().filter(|p| !self.body.contains(p)).collect();
        if outside.len() == 1 {
            Some(outside[0])
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoopInfo {
    pub loops: Vec<Loop>,
    /// Each block's innermost containing loop, if any.
    pub block_loop: HashMap<BlockId, usize>,
}

impl LoopInfo {
    pub fn build(f: &Function, cfg: &Cfg, dom: &Dominators) -> Self {
        // Back edges: u -> v where v dominates u.
        let mut by_header: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
        for &u in &cfg.order {
            for &v in cfg.successors(u) {
                if dom.dominates(v, u) {
                    by_header.entry(v).or_default().push(u);
                }
            }
        }

        let mut loops = Vec::new();
        for (header, latches) in by_header {
            let body = natural_loop_body(header, &latches, cfg);
            loops.push(Loop { header, latches, body, parent: None, children: Vec::new() });
        }

        // Nest by header-containment: outer contains inner iff outer's body
        // contains inner's header (excluding self).
        let n = loops.len();
        for i in 0..n {
            let mut best: Option<usize> = None;
            for j in 0..n {
                if i == j {
                    continue;
                }
                if loops[j].body.contains(&loops[i].header) {
                    let better = match best {
                        None => true,
                        Some(b) => loops[j].body.len() < loops[b].body.len(),
                    };
                    if better {
                        best = Some(j);
                    }
                }
            }
            loops[i].parent = best;
        }
        for i in 0..n {
            if let Some(p) = loops[i].parent {
                loops[p].children.push(i);
            }
        }

        let mut block_loop: HashMap<BlockId, usize> = HashMap::new();
        for (i, l) in loops.iter().enumerate() {
            for &b in &l.body {
                let replace = match block_loop.get(&b) {
                    None => true,
                    Some(&cur) => loops[i].body.len() < loops[cur].body.len(),
                };
                if replace {
                    block_loop.insert(b, i);
                }
            }
        }

        let _ = f;
        LoopInfo { loops, block_loop }
    }

    pub fn loop_of(&self, b: BlockId) -> Option<&Loop> {
        self.block_loop.get(&b).map(|&i| &self.loops[i])
    }

    pub fn depth_of(&self, b: BlockId) -> u32 {
        self.loop_of(b).map(|l| l.depth(&self.loops)).unwrap_or(0)
    }
}

/// Body of the natural loop with the given header and latches: header, plus every
/// node that can reach a latch via edges staying inside (i.e. without leaving
/// through the header — standard "reverse BFS from latches, stopping at header").
fn natural_loop_body(header: BlockId, latches: &[BlockId], cfg: &Cfg) -> HashSet<BlockId> {
    let mut body = HashSet::new();
    body.insert(header);
    let mut worklist: Vec<BlockId> = latches.to_vec();
    for &l in latches {
        body.insert(l);
    }
    while let Some(b) = worklist.pop() {
        for &p in cfg.predecessors(b) {
            if body.insert(p) {
                worklist.push(p);
            }
        }
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instruction::{IntCond, Instruction};
    use crate::ir::operand::Operand;
    use crate::ir::types::DataType;

    /// for (i = 0; i < n; i++) {} — cond/body/step/end shape.
    fn counted_loop() -> Function {
        let mut f = Function::new("f", DataType::I32, &[(DataType::I32, false)]);
        let entry = f.entry();
        let cond = f.create_block();
        let body = f.create_block();
        let step = f.create_block();
        let end = f.create_block();
        f.block_mut(entry).insts.push(Instruction::BrUncond { label: cond });

        let i_phi = f.fresh_reg();
        let n = f.sig.params[0].1;
        let cmp = f.fresh_reg();
        f.block_mut(cond).insts.push(Instruction::Phi {
            dest: i_phi,
            ty: DataType::I32,
            incoming: vec![(entry, Operand::ImmI32(0)), (step, Operand::Register(i_phi, DataType::I32))],
        });
        f.block_mut(cond).insts.push(Instruction::Icmp {
            dest: cmp,
            cond: IntCond::Slt,
            lhs: Operand::Register(i_phi, DataType::I32),
            rhs: Operand::Register(n, DataType::I32),
        });
        f.block_mut(cond).insts.push(Instruction::BrCond {
            cond: Operand::Register(cmp, DataType::I1),
            true_label: body,
            false_label: end,
        });
        f.block_mut(body).insts.push(Instruction::BrUncond { label: step });
        f.block_mut(step).insts.push(Instruction::BrUncond { label: cond });
        f.block_mut(end).insts.push(Instruction::Ret { value: Some(Operand::ImmI32(0)) });
        f
    }

    #[test]
    fn detects_single_natural_loop() {
        let f = counted_loop();
        let cfg = Cfg::build(&f);
        let dom = Dominators::forward(&f);
        let li = LoopInfo::build(&f, &cfg, &dom);
        assert_eq!(li.loops.len(), 1);
        let l = &li.loops[0];
        assert_eq!(l.header, BlockId(1));
        assert!(l.body.contains(&BlockId(1)));
        assert!(l.body.contains(&BlockId(2)));
        assert!(l.body.contains(&BlockId(3)));
        assert!(!l.body.contains(&BlockId(4)));
    }

    #[test]
    fn preheader_is_unique_outside_predecessor() {
        let f = counted_loop();
        let cfg = Cfg::build(&f);
        let dom = Dominators::forward(&f);
        let li = LoopInfo::build(&f, &cfg, &dom);
        let l = &li.loops[0];
        assert_eq!(l.preheader(&cfg), Some(f.entry()));
    }
}
