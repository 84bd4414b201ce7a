//! Dead-code elimination.
//!
//! Removes pure instructions whose values are never used. Three strengths
//! back the three pass codes: a single sweep (`die`), sweeping to a
//! fixpoint (`dce`), and liveness closure from side-effecting roots
//! (`adce`).

use std::collections::HashSet;

use crate::ir::{IrFunction, ValueId};

/// How hard to try.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strength {
    /// One removal sweep.
    Single,
    /// Sweep until nothing changes.
    Iterative,
    /// Keep only the use-closure of side-effecting instructions.
    Aggressive,
}

/// Runs dead-code elimination; returns whether anything was removed.
pub fn run(func: &mut IrFunction, strength: Strength) -> bool {
    match strength {
        Strength::Single => sweep(func),
        Strength::Iterative => {
            let mut changed = false;
            while sweep(func) {
                changed = true;
            }
            changed
        }
        Strength::Aggressive => closure(func),
    }
}

fn use_counts(func: &IrFunction) -> Vec<u32> {
    let mut uses = vec![0u32; func.insts.len()];
    for block in &func.blocks {
        for &v in &block.insts {
            for op in func.inst(v).operands() {
                uses[op.0 as usize] += 1;
            }
        }
    }
    uses
}

fn sweep(func: &mut IrFunction) -> bool {
    let uses = use_counts(func);
    let mut changed = false;
    for block in 0..func.blocks.len() {
        let dead: Vec<ValueId> = func.blocks[block]
            .insts
            .iter()
            .copied()
            .filter(|&v| !func.inst(v).has_side_effect() && uses[v.0 as usize] == 0)
            .collect();
        if dead.is_empty() {
            continue;
        }
        changed = true;
        func.blocks[block]
            .insts
            .retain(|v| !dead.contains(v));
    }
    changed
}

fn closure(func: &mut IrFunction) -> bool {
    let mut live: HashSet<ValueId> = HashSet::new();
    let mut stack: Vec<ValueId> = Vec::new();
    for block in &func.blocks {
        for &v in &block.insts {
            if func.inst(v).has_side_effect() {
                stack.push(v);
            }
        }
    }
    while let Some(v) = stack.pop() {
        if live.insert(v) {
            stack.extend(func.inst(v).operands());
        }
    }

    let mut changed = false;
    for block in &mut func.blocks {
        let before = block.insts.len();
        block.insts.retain(|v| live.contains(v));
        changed |= block.insts.len() != before;
    }
    changed
}
