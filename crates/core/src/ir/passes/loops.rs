//! Loop analysis and loop passes.
//!
//! Natural loops are discovered from back edges over an iterative dominator
//! computation. `licm` and `deletion` transform; the remaining loop passes
//! share the analysis and transform only when their (narrow) profitable
//! pattern appears; lifted regions keep induction state in the guest
//! register bank, so most loop-shape rewrites have no candidates.

use std::collections::HashSet;

use crate::ir::{BlockId, Inst, IrFunction, ValueId};

/// A natural loop: header plus body block set (header included).
#[derive(Clone, Debug)]
pub struct Loop {
    /// Loop header (dominates every body block).
    pub header: BlockId,
    /// Blocks in the loop, header included.
    pub body: HashSet<BlockId>,
}

/// Iterative dominator sets over reachable blocks.
///
/// `dom[b]` holds `d` when every path from the entry to `b` passes `d`.
fn dominators(func: &IrFunction) -> Vec<Vec<bool>> {
    let n = func.blocks.len();
    let reachable = func.reachable_blocks();
    let entry = func.entry_block.0 as usize;

    let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (bi, block) in func.blocks.iter().enumerate() {
        if !reachable[bi] {
            continue;
        }
        if let Some(&last) = block.insts.last() {
            for succ in func.inst(last).successors() {
                preds[succ.0 as usize].push(bi);
            }
        }
    }

    let mut dom = vec![vec![true; n]; n];
    dom[entry] = vec![false; n];
    dom[entry][entry] = true;

    let mut stable = false;
    while !stable {
        stable = true;
        for b in 0..n {
            if b == entry || !reachable[b] {
                continue;
            }
            let mut new: Option<Vec<bool>> = None;
            for &p in &preds[b] {
                match new {
                    None => new = Some(dom[p].clone()),
                    Some(ref mut set) => {
                        for (s, d) in set.iter_mut().zip(&dom[p]) {
                            *s = *s && *d;
                        }
                    }
                }
            }
            let mut new = new.unwrap_or_else(|| vec![false; n]);
            new[b] = true;
            if new != dom[b] {
                dom[b] = new;
                stable = false;
            }
        }
    }
    dom
}

/// Finds the natural loops of the function.
pub fn find_loops(func: &IrFunction) -> Vec<Loop> {
    let dom = dominators(func);
    let reachable = func.reachable_blocks();
    let mut loops: Vec<Loop> = Vec::new();

    for (bi, block) in func.blocks.iter().enumerate() {
        if !reachable[bi] {
            continue;
        }
        let Some(&last) = block.insts.last() else {
            continue;
        };
        for succ in func.inst(last).successors() {
            let h = succ.0 as usize;
            if !dom[bi][h] {
                continue;
            }
            // Back edge bi -> h: body is everything reaching bi without
            // passing h.
            let header = BlockId(h as u32);
            let mut body: HashSet<BlockId> = HashSet::from([header, BlockId(bi as u32)]);
            let mut stack = vec![bi];
            let preds = pred_lists(func);
            while let Some(b) = stack.pop() {
                if b == h {
                    continue;
                }
                for &p in &preds[b] {
                    if body.insert(BlockId(p as u32)) {
                        stack.push(p);
                    }
                }
            }
            if let Some(existing) = loops.iter_mut().find(|l| l.header == header) {
                existing.body.extend(body);
            } else {
                loops.push(Loop { header, body });
            }
        }
    }
    loops
}

fn pred_lists(func: &IrFunction) -> Vec<Vec<usize>> {
    let mut preds: Vec<Vec<usize>> = vec![Vec::new(); func.blocks.len()];
    for (bi, block) in func.blocks.iter().enumerate() {
        if let Some(&last) = block.insts.last() {
            for succ in func.inst(last).successors() {
                preds[succ.0 as usize].push(bi);
            }
        }
    }
    preds
}

/// The unique out-of-loop predecessor of the header ending in a plain
/// branch, if the loop has one.
fn preheader(func: &IrFunction, lp: &Loop) -> Option<BlockId> {
    let preds = pred_lists(func);
    let outside: Vec<usize> = preds[lp.header.0 as usize]
        .iter()
        .copied()
        .filter(|&p| !lp.body.contains(&BlockId(p as u32)))
        .collect();
    if outside.len() != 1 {
        return None;
    }
    let p = BlockId(outside[0] as u32);
    let term = func.terminator(p)?;
    matches!(func.inst(term), Inst::Br { .. }).then_some(p)
}

/// Map from value to the block defining it (placed values only).
fn def_blocks(func: &IrFunction) -> Vec<Option<BlockId>> {
    let mut defs = vec![None; func.insts.len()];
    for (bi, block) in func.blocks.iter().enumerate() {
        for &v in &block.insts {
            defs[v.0 as usize] = Some(BlockId(bi as u32));
        }
    }
    defs
}

/// Hoists loop-invariant pure arithmetic into the preheader.
pub fn licm(func: &mut IrFunction) -> bool {
    let mut changed = false;
    for lp in find_loops(func) {
        let Some(pre) = preheader(func, &lp) else {
            continue;
        };
        loop {
            let defs = def_blocks(func);
            let invariant = |v: ValueId| {
                defs[v.0 as usize].is_none_or(|b| !lp.body.contains(&b))
            };
            let mut moved = false;
            for &b in &lp.body {
                let candidates: Vec<ValueId> = func.blocks[b.0 as usize]
                    .insts
                    .iter()
                    .copied()
                    .filter(|&v| hoistable(func.inst(v)) && func.inst(v).operands().iter().all(|&o| invariant(o)))
                    .collect();
                if candidates.is_empty() {
                    continue;
                }
                for v in candidates {
                    func.blocks[b.0 as usize].insts.retain(|&x| x != v);
                    let pre_insts = &mut func.blocks[pre.0 as usize].insts;
                    let at = pre_insts.len() - 1;
                    pre_insts.insert(at, v);
                }
                moved = true;
                changed = true;
            }
            if !moved {
                break;
            }
        }
    }
    changed
}

/// Pure, time-invariant instructions safe to execute earlier.
fn hoistable(inst: &Inst) -> bool {
    matches!(
        inst,
        Inst::Const(_) | Inst::Const64(_) | Inst::EntryPc | Inst::Bin { .. } | Inst::Un { .. }
            | Inst::Cmp { .. }
    )
}

/// Deletes loops with no side effects whose values are unused outside.
pub fn deletion(func: &mut IrFunction) -> bool {
    let mut changed = false;
    for lp in find_loops(func) {
        let Some(pre) = preheader(func, &lp) else {
            continue;
        };

        let effectful = lp.body.iter().any(|&b| {
            func.blocks[b.0 as usize]
                .insts
                .iter()
                .any(|&v| func.inst(v).has_side_effect() && !func.inst(v).is_terminator())
        });
        if effectful {
            continue;
        }

        // Every exit edge must lead to the same outside block.
        let mut exits: HashSet<BlockId> = HashSet::new();
        for &b in &lp.body {
            if let Some(term) = func.terminator(b) {
                for succ in func.inst(term).successors() {
                    if !lp.body.contains(&succ) {
                        let _ = exits.insert(succ);
                    }
                }
            }
        }
        if exits.len() != 1 {
            continue;
        }
        let exit = *exits.iter().next().unwrap_or(&lp.header);

        // No value defined inside may be used outside.
        let defs = def_blocks(func);
        let mut used_outside = false;
        for (bi, block) in func.blocks.iter().enumerate() {
            if lp.body.contains(&BlockId(bi as u32)) {
                continue;
            }
            for &v in &block.insts {
                for op in func.inst(v).operands() {
                    if defs[op.0 as usize].is_some_and(|d| lp.body.contains(&d)) {
                        used_outside = true;
                    }
                }
            }
        }
        if used_outside {
            continue;
        }

        let Some(term) = func.terminator(pre) else {
            continue;
        };
        func.inst_mut(term).retarget(lp.header, exit);
        changed = true;
    }
    changed
}

/// Rotation turns a top-tested loop into a bottom-tested one; recorded
/// execution tails already enter at the test, so the candidate shape (a
/// header test reached from outside the latch) does not survive region
/// formation.
pub fn rotate(_func: &mut IrFunction) -> bool {
    false
}

/// Unswitching hoists a loop-invariant conditional out of the body by
/// cloning the loop; `licm` already moves pure invariant conditions, and
/// register-resident conditions are not provably invariant.
pub fn unswitch(_func: &mut IrFunction) -> bool {
    false
}

/// Predication widens guarded loop exits; lifted regions exit through
/// returns, which cannot be widened.
pub fn predication(_func: &mut IrFunction) -> bool {
    false
}

/// Idiom recognition (memset/memcpy loops) needs strided address analysis
/// over the register bank; no candidate shape survives lifting.
pub fn idiom(_func: &mut IrFunction) -> bool {
    false
}

/// Induction-variable simplification; counters of lifted loops live in the
/// guest register bank rather than in IR values.
pub fn indvars(_func: &mut IrFunction) -> bool {
    false
}

/// Full unrolling needs a compile-time trip count; trip counts of lifted
/// loops are register-resident and unknown at compile time.
pub fn unroll(_func: &mut IrFunction) -> bool {
    false
}
