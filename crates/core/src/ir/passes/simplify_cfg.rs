//! Control-flow graph cleanup.
//!
//! Folds constant conditional branches, collapses branches whose arms
//! agree, merges straight-line block pairs, and drops unreachable blocks
//! from the graph.

use crate::ir::{BlockId, Inst, IrFunction};

/// Runs CFG simplification to a fixpoint; returns whether anything changed.
pub fn run(func: &mut IrFunction) -> bool {
    let mut changed = false;
    loop {
        let round = fold_branches(func) | merge_pairs(func) | prune_unreachable(func);
        if !round {
            break;
        }
        changed = true;
    }
    changed
}

/// `CondBr` on a constant, or with equal arms, becomes `Br`.
fn fold_branches(func: &mut IrFunction) -> bool {
    let mut changed = false;
    for bi in 0..func.blocks.len() {
        let Some(term) = func.terminator(BlockId(bi as u32)) else {
            continue;
        };
        let &Inst::CondBr {
            cond,
            taken,
            fallthrough,
        } = func.inst(term)
        else {
            continue;
        };
        let target = if taken == fallthrough {
            Some(taken)
        } else if let &Inst::Const(c) = func.inst(cond) {
            Some(if c != 0 { taken } else { fallthrough })
        } else {
            None
        };
        if let Some(target) = target {
            *func.inst_mut(term) = Inst::Br { target };
            changed = true;
        }
    }
    changed
}

/// Merges `a -> b` when `a` ends in `Br b`, `b` has exactly one predecessor,
/// and `b` is an ordinary body block.
fn merge_pairs(func: &mut IrFunction) -> bool {
    let mut changed = false;
    loop {
        let preds = func.pred_counts();
        let mut merged = false;
        for ai in 0..func.blocks.len() {
            let a = BlockId(ai as u32);
            let Some(term) = func.terminator(a) else {
                continue;
            };
            let &Inst::Br { target: b } = func.inst(term) else {
                continue;
            };
            if b == a || b == func.entry_block || preds[b.0 as usize] != 1 {
                continue;
            }
            // Splice b's instructions over a's branch.
            let tail = std::mem::take(&mut func.blocks[b.0 as usize].insts);
            let a_insts = &mut func.blocks[ai].insts;
            let _ = a_insts.pop();
            a_insts.extend(tail);
            merged = true;
            changed = true;
            break;
        }
        if !merged {
            break;
        }
    }
    changed
}

/// Empties blocks no path from the entry reaches.
fn prune_unreachable(func: &mut IrFunction) -> bool {
    let reachable = func.reachable_blocks();
    let mut changed = false;
    for (bi, block) in func.blocks.iter_mut().enumerate() {
        if !reachable[bi] && !block.insts.is_empty() {
            block.insts.clear();
            changed = true;
        }
    }
    changed
}
