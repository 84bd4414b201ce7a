//! Register promotion, dead-store elimination, and load forwarding.
//!
//! Lifted code reads and writes the guest register bank for every operand,
//! so the biggest cleanup wins come from forwarding stored values to later
//! reads and dropping stores that are overwritten unread. All three passes
//! work block-locally; cross-block state stays in the bank.

use std::collections::HashMap;

use crate::common::reg::{RegClass, FP_BASE};
use crate::ir::{Inst, IrFunction, ValueId};

/// Byte-accurate register coverage: starting word slot and width in words.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct Span {
    start: u16,
    words: u16,
}

fn span_of(slot: u16, class: RegClass) -> Span {
    match class {
        RegClass::Int => Span {
            start: slot,
            words: 1,
        },
        RegClass::Float => Span {
            start: FP_BASE + slot,
            words: 1,
        },
        RegClass::Int64 | RegClass::Double => Span {
            start: FP_BASE + slot,
            words: 2,
        },
    }
}

fn overlaps(a: Span, b: Span) -> bool {
    a.start < b.start + b.words && b.start < a.start + a.words
}

/// Forwards register writes (and earlier reads) to later reads within a
/// block; returns whether anything changed.
pub fn promote(func: &mut IrFunction) -> bool {
    let mut changed = false;
    for bi in 0..func.blocks.len() {
        let mut known: HashMap<Span, ValueId> = HashMap::new();
        let mut rewrites: Vec<(ValueId, ValueId)> = Vec::new();
        for &v in &func.blocks[bi].insts {
            match func.inst(v) {
                Inst::ReadReg { slot, class } => {
                    let span = span_of(*slot, *class);
                    if let Some(&val) = known.get(&span) {
                        rewrites.push((v, val));
                    } else {
                        let _ = known.insert(span, v);
                    }
                }
                Inst::WriteReg { slot, class, val } => {
                    let span = span_of(*slot, *class);
                    known.retain(|&s, _| !overlaps(s, span));
                    let _ = known.insert(span, *val);
                }
                Inst::CallRegion { .. } => known.clear(),
                _ => {}
            }
        }
        for (read, val) in rewrites {
            func.replace_all_uses(read, val);
            func.blocks[bi].insts.retain(|&x| x != read);
            changed = true;
        }
    }
    changed
}

/// Removes register stores overwritten within the block before any
/// overlapping read; returns whether anything changed.
pub fn dse(func: &mut IrFunction) -> bool {
    let mut changed = false;
    for bi in 0..func.blocks.len() {
        let mut covered: Vec<Span> = Vec::new();
        let mut dead: Vec<ValueId> = Vec::new();
        for &v in func.blocks[bi].insts.iter().rev() {
            match func.inst(v) {
                Inst::WriteReg { slot, class, .. } => {
                    let span = span_of(*slot, *class);
                    if covered.contains(&span) {
                        dead.push(v);
                    } else {
                        covered.push(span);
                    }
                }
                Inst::ReadReg { slot, class } => {
                    let span = span_of(*slot, *class);
                    covered.retain(|&s| !overlaps(s, span));
                }
                Inst::CallRegion { .. } => covered.clear(),
                _ => {}
            }
        }
        if !dead.is_empty() {
            func.blocks[bi].insts.retain(|v| !dead.contains(v));
            changed = true;
        }
    }
    changed
}

/// Forwards memory stores (and earlier loads) to later loads of the same
/// address value within a block; any other store invalidates, since two
/// address values may alias.
pub fn forward_memory(func: &mut IrFunction) -> bool {
    let mut changed = false;
    for bi in 0..func.blocks.len() {
        let mut known: HashMap<(ValueId, crate::ir::MemWidth), ValueId> = HashMap::new();
        let mut rewrites: Vec<(ValueId, ValueId)> = Vec::new();
        for &v in &func.blocks[bi].insts {
            match func.inst(v) {
                Inst::Load { width, addr } => {
                    let key = (*addr, *width);
                    if let Some(&val) = known.get(&key) {
                        rewrites.push((v, val));
                    } else {
                        let _ = known.insert(key, v);
                    }
                }
                Inst::Store { width, addr, val } => {
                    let key = (*addr, *width);
                    let val = *val;
                    known.clear();
                    // Narrow stores zero-extend on reload; only full-width
                    // stored values can stand in for the load result.
                    if matches!(width, crate::ir::MemWidth::Word | crate::ir::MemWidth::Dword) {
                        let _ = known.insert(key, val);
                    }
                }
                Inst::CallRegion { .. } => known.clear(),
                _ => {}
            }
        }
        for (load, val) in rewrites {
            func.replace_all_uses(load, val);
            func.blocks[bi].insts.retain(|&x| x != load);
            changed = true;
        }
    }
    changed
}
