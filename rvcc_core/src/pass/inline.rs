//! Function inlining (spec §4.2.9): replaces small, non-recursive call sites with a
//! copy of the callee's body, iterated to a module-level fixpoint so a call chain
//! `a -> b -> c` can fully flatten when each link is individually inlinable.

use hashbrown::HashMap;
use log::debug;

use crate::ir::function::Function;
use crate::ir::instruction::Instruction;
use crate::ir::module::Module;
use crate::ir::operand::{BlockId, Operand, RegId};

/// Size/growth knobs threaded in from `PipelineConfig` (spec SPEC_FULL.md §F).
#[derive(Debug, Clone, Copy)]
pub struct InlineThresholds {
    /// Callees at or below this instruction count are always inlined.
    pub small_callee: usize,
    /// Leaf callees (no calls of their own) get a looser budget.
    pub leaf_callee: usize,
    /// A caller stops accepting further inlining once it grows past this size.
    pub caller_growth_cap: usize,
    /// Upper bound on call sites visited per fixpoint round, as a termination guard.
    pub max_call_sites_per_round: usize,
}

impl Default for InlineThresholds {
    fn default() -> Self {
        Self { small_callee: 15, leaf_callee: 30, caller_growth_cap: 200, max_call_sites_per_round: 50 }
    }
}

const MAX_ROUNDS: usize = 8;

/// Runs inlining to a module-level fixpoint, returning the number of call sites
/// inlined.
pub fn run(module: &mut Module, thresholds: InlineThresholds) -> usize {
    let mut total = 0;
    for _round in 0..MAX_ROUNDS {
        let mut inlined_this_round = 0;
        for caller_idx in 0..module.functions.len() {
            loop {
                if module.functions[caller_idx].size() > thresholds.caller_growth_cap {
                    break;
                }
                if inlined_this_round >= thresholds.max_call_sites_per_round {
                    break;
                }
                let Some(site) = find_inlinable_call(module, caller_idx, &thresholds) else { break };
                inline_at(module, caller_idx, site);
                inlined_this_round += 1;
            }
        }
        total += inlined_this_round;
        if inlined_this_round == 0 {
            break;
        }
    }
    debug!("inline: {total} call sites inlined");
    total
}

struct CallSite {
    block: BlockId,
    index: usize,
    callee_name: String,
}

fn find_inlinable_call(module: &Module, caller_idx: usize, thresholds: &InlineThresholds) -> Option<CallSite> {
    let caller = &module.functions[caller_idx];
    for block in caller.blocks_in_order() {
        for (idx, inst) in block.insts.iter().enumerate() {
            if let Instruction::Call { func, .. } = inst {
                let name = module.globals.name(*func).to_string();
                if name == caller.sig.name {
                    continue; // never inline direct self-recursion
                }
                let Some(callee) = module.find_function(&name) else { continue };
                let size = callee.size();
                let is_leaf = callee.blocks_in_order().all(|b| !b.insts.iter().any(|i| matches!(i, Instruction::Call { .. })));
                let fits = size <= thresholds.small_callee || (is_leaf && size <= thresholds.leaf_callee);
                if fits {
                    return Some(CallSite { block: block.id, index: idx, callee_name: name });
                }
            }
        }
    }
    None
}

fn inline_at(module: &mut Module, caller_idx: usize, site: CallSite) {
    let callee = module.find_function(&site.callee_name).expect("callee looked up by find_inlinable_call").clone();
    let caller = &mut module.functions[caller_idx];

    let (call_dest, args): (Option<RegId>, Vec<Operand>) = match &caller.block(site.block).insts[site.index] {
        Instruction::Call { dest, args, .. } => (*dest, args.iter().map(|a| a.value).collect()),
        _ => unreachable!("call site index must point at a Call"),
    };

    // Pre-pass: allocate a fresh caller register for every callee-internal def, and
    // map callee parameter registers directly onto the call's argument operands.
    let mut operand_map: HashMap<RegId, Operand> = HashMap::new();
    for (i, (ty, reg)) in callee.sig.params.iter().enumerate() {
        operand_map.insert(*reg, args.get(i).copied().unwrap_or(Operand::ImmI32(0)));
        let _ = ty;
    }
    for block in callee.blocks_in_order() {
        for inst in &block.insts {
            if let Some(d) = inst.def() {
                if !operand_map.contains_key(&d) {
                    let fresh = caller.fresh_reg();
                    let ty = inst.def_ty().unwrap_or(crate::ir::types::DataType::I32);
                    operand_map.insert(d, Operand::Register(fresh, ty));
                }
            }
        }
    }

    let mut block_map: HashMap<BlockId, BlockId> = HashMap::new();
    for block in callee.blocks_in_order() {
        block_map.insert(block.id, caller.create_block());
    }

    // Split the call's block: everything before the call stays; everything after
    // (including the original terminator) moves to a fresh continuation block.
    let post = caller.create_block();
    {
        let b = caller.block_mut(site.block);
        let mut tail: Vec<Instruction> = b.insts.split_off(site.index + 1);
        b.insts.pop(); // drop the Call itself
        caller.block_mut(post).insts.append(&mut tail);
    }
    caller.block_mut(site.block).insts.push(Instruction::BrUncond { label: block_map[&callee.entry()] });

    let mut ret_incoming: Vec<(BlockId, Operand)> = Vec::new();
    for block in callee.blocks_in_order() {
        let mapped_id = block_map[&block.id];
        for inst in &block.insts {
            let mut cloned = remap(inst, &operand_map, &block_map);
            if let Instruction::Ret { value } = &cloned {
                if let Some(v) = value {
                    ret_incoming.push((mapped_id, *v));
                }
                cloned = Instruction::BrUncond { label: post };
            }
            caller.block_mut(mapped_id).insts.push(cloned);
        }
    }

    if let Some(dest) = call_dest {
        if !ret_incoming.is_empty() {
            let ty = callee.sig.ret_ty;
            caller.block_mut(post).push_phi(Instruction::Phi { dest, ty, incoming: ret_incoming });
        }
    }
}

fn remap(inst: &Instruction, operand_map: &HashMap<RegId, Operand>, block_map: &HashMap<BlockId, BlockId>) -> Instruction {
    let mut cloned = inst.clone();
    if let Some(old_dest) = cloned.def() {
        if let Some(Operand::Register(new_reg, _)) = operand_map.get(&old_dest) {
            set_dest(&mut cloned, *new_reg);
        }
    }
    for u in cloned.uses_mut() {
        if let Some(r) = u.as_reg() {
            if let Some(repl) = operand_map.get(&r) {
                *u = *repl;
            }
        }
    }
    remap_labels(&mut cloned, block_map);
    cloned
}

fn set_dest(inst: &mut Instruction, new: RegId) {
    match inst {
        Instruction::Load { dest, .. }
        | Instruction::Alloca { dest, .. }
        | Instruction::Gep { dest, .. }
        | Instruction::IntBin { dest, .. }
        | Instruction::FloatBin { dest, .. }
        | Instruction::Icmp { dest, .. }
        | Instruction::Fcmp { dest, .. }
        | Instruction::Convert { dest, .. }
        | Instruction::Phi { dest, .. } => *dest = new,
        Instruction::Call { dest, .. } => *dest = Some(new),
        _ => {}
    }
}

fn remap_labels(inst: &mut Instruction, block_map: &HashMap<BlockId, BlockId>) {
    match inst {
        Instruction::BrCond { true_label, false_label, .. } => {
            *true_label = block_map[true_label];
            *false_label = block_map[false_label];
        }
        Instruction::BrUncond { label } => *label = block_map[label],
        Instruction::Phi { incoming, .. } => {
            for (label, _) in incoming.iter_mut() {
                *label = block_map[label];
            }
        }
        _ => {}
    }
}

impl Function {
    /// Rough size metric used for inlining budgets: total instruction count.
    pub fn size(&self) -> usize {
        self.blocks_in_order().map(|b| b.insts.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::operand::Operand;
    use crate::ir::types::DataType;
    use crate::verify::verify_function;

    #[test]
    fn inlines_small_callee_and_merges_return() {
        let mut module = Module::new();
        let mut callee = Function::new("add_one", DataType::I32, &[(DataType::I32, false)]);
        let p0 = callee.sig.params[0].1;
        let r = callee.fresh_reg();
        callee.block_mut(callee.entry()).insts.push(Instruction::IntBin {
            dest: r,
            op: crate::ir::instruction::IntBinOp::Add,
            ty: DataType::I32,
            lhs: Operand::Register(p0, DataType::I32),
            rhs: Operand::ImmI32(1),
        });
        callee.block_mut(callee.entry()).insts.push(Instruction::Ret { value: Some(Operand::Register(r, DataType::I32)) });
        module.functions.push(callee);

        let mut caller = Function::new("main", DataType::I32, &[]);
        let func = module.globals.intern("add_one");
        let call_dest = caller.fresh_reg();
        caller.block_mut(caller.entry()).insts.push(Instruction::Call {
            dest: Some(call_dest),
            func,
            ret_ty: DataType::I32,
            args: vec![crate::ir::instruction::CallArg { ty: DataType::I32, value: Operand::ImmI32(41) }],
        });
        caller.block_mut(caller.entry()).insts.push(Instruction::Ret { value: Some(Operand::Register(call_dest, DataType::I32)) });
        module.functions.push(caller);

        let caller_idx = module.functions.iter().position(|f| f.sig.name == "main").unwrap();
        let n = run(&mut module, InlineThresholds::default());
        assert_eq!(n, 1);
        let inlined = &module.functions[caller_idx];
        verify_function(inlined).expect("valid SSA after inlining");
        assert!(!inlined.blocks_in_order().any(|b| b.insts.iter().any(|i| matches!(i, Instruction::Call { .. }))));
    }
}
