//! The analysis manager (spec §5, §9): caches per-function analyses keyed by
//! function identity, invalidated wholesale whenever a mutating transform touches
//! that function, rebuilt lazily on the next `get`.
//!
//! A function's "identity" here is its index in the owning `Module::functions`
//! vector combined with a generation counter bumped on every `invalidate`, so a
//! stale cache entry from before a mutation can never be handed back silently.

use hashbrown::HashMap;

use super::cfg::Cfg;
use super::dominators::Dominators;
use super::loop_info::LoopInfo;
use crate::ir::function::Function;

#[derive(Default)]
struct FunctionAnalyses {
    generation: u64,
    cfg: Option<(u64, Cfg)>,
    dom: Option<(u64, Dominators)>,
    post_dom: Option<(u64, Dominators)>,
    loops: Option<(u64, LoopInfo)>,
}

/// Keyed by a caller-chosen function identity (typically its index in
/// `Module::functions`, which is stable across passes that don't reorder functions).
#[derive(Default)]
pub struct AnalysisCache {
    per_function: HashMap<usize, FunctionAnalyses>,
}

impl AnalysisCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every cached analysis for `key`. The next `get_*` rebuilds from
    /// scratch. Any pass that mutates a function must call this before returning.
    pub fn invalidate(&mut self, key: usize) {
        let entry = self.per_function.entry(key).or_default();
        entry.generation += 1;
        entry.cfg = None;
        entry.dom = None;
        entry.post_dom = None;
        entry.loops = None;
    }

    pub fn get_cfg(&mut self, key: usize, f: &Function) -> &Cfg {
        let entry = self.per_function.entry(key).or_default();
        let gen = entry.generation;
        if entry.cfg.as_ref().map(|(g, _)| *g != gen).unwrap_or(true) {
            entry.cfg = Some((gen, Cfg::build(f)));
        }
        &entry.cfg.as_ref().unwrap().1
    }

    pub fn get_dominators(&mut self, key: usize, f: &Function) -> &Dominators {
        let entry = self.per_function.entry(key).or_default();
        let gen = entry.generation;
        if entry.dom.as_ref().map(|(g, _)| *g != gen).unwrap_or(true) {
            entry.dom = Some((gen, Dominators::forward(f)));
        }
        &entry.dom.as_ref().unwrap().1
    }

    pub fn get_post_dominators(&mut self, key: usize, f: &Function) -> &Dominators {
        let entry = self.per_function.entry(key).or_default();
        let gen = entry.generation;
        if entry.post_dom.as_ref().map(|(g, _)| *g != gen).unwrap_or(true) {
            entry.post_dom = Some((gen, Dominators::reverse(f)));
        }
        &entry.post_dom.as_ref().unwrap().1
    }

    pub fn get_loop_info(&mut self, key: usize, f: &Function) -> &LoopInfo {
        // Needs CFG + dominators first; compute them outside the borrow of `entry`.
        let cfg = self.get_cfg(key, f).clone();
        let dom = self.get_dominators(key, f).clone();
        let entry = self.per_function.entry(key).or_default();
        let gen = entry.generation;
        if entry.loops.as_ref().map(|(g, _)| *g != gen).unwrap_or(true) {
            entry.loops = Some((gen, LoopInfo::build(f, &cfg, &dom)));
        }
        &entry.loops.as_ref().unwrap().1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instruction::Instruction;
    use crate::ir::operand::Operand;
    use crate::ir::types::DataType;

    #[test]
    fn invalidate_forces_rebuild() {
        let mut f = Function::new("f", DataType::I32, &[]);
        f.block_mut(f.entry()).insts.push(Instruction::Ret { value: Some(Operand::ImmI32(0)) });
        let mut cache = AnalysisCache::new();
        let _ = cache.get_cfg(0, &f);
        cache.invalidate(0);
        let second = f.create_block();
        f.block_mut(second).insts.push(Instruction::Ret { value: None });
        let cfg = cache.get_cfg(0, &f);
        // Rebuilt CFG doesn't crash on the new block even though it's unreachable.
        assert!(cfg.successors(f.entry()).is_empty());
    }
}
