//! Value numbering.
//!
//! Block-local common-subexpression elimination: within one block, a pure
//! instruction structurally identical to an earlier one is replaced by the
//! earlier value. Register and memory reads are excluded (writes between
//! two reads change their value); the promotion pass handles those.

use std::collections::HashMap;

use crate::ir::{Inst, IrFunction, ValueId};

/// Runs block-local value numbering; returns whether anything changed.
pub fn run(func: &mut IrFunction) -> bool {
    let mut changed = false;
    for bi in 0..func.blocks.len() {
        let mut table: HashMap<Inst, ValueId> = HashMap::new();
        // (duplicate, original) pairs; rewrites are deferred because the
        // block cannot be mutated while it is being walked. Pairing at scan
        // time keeps every replacement pointing at an earlier definition.
        let mut dups: Vec<(ValueId, ValueId)> = Vec::new();
        for &v in &func.blocks[bi].insts {
            let inst = func.inst(v).clone();
            if !numberable(&inst) {
                continue;
            }
            match table.get(&inst) {
                Some(&first) => dups.push((v, first)),
                None => {
                    let _ = table.insert(inst, v);
                }
            }
        }
        for (dup, keep) in dups {
            func.replace_all_uses(dup, keep);
            func.blocks[bi].insts.retain(|&x| x != dup);
            changed = true;
        }
    }
    changed
}

fn numberable(inst: &Inst) -> bool {
    matches!(
        inst,
        Inst::Const(_) | Inst::Const64(_) | Inst::EntryPc | Inst::Bin { .. } | Inst::Un { .. }
            | Inst::Cmp { .. }
    )
}
