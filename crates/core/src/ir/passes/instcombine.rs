//! Instruction combining.
//!
//! Constant folding and algebraic identities over the 32-bit integer
//! operations, plus operand canonicalization for commutative operations
//! (constants to the right) so folding and value numbering see one shape.

use crate::ir::{BinOp, CmpOp, Inst, IrFunction};
use crate::common::bits;

/// Folds constants and applies identities; returns whether anything changed.
pub fn run(func: &mut IrFunction) -> bool {
    let mut changed = false;
    // Arena order is a topological order of uses within a block, so one
    // forward sweep folds chains.
    for i in 0..func.insts.len() {
        let inst = func.insts[i].clone();
        let new = match inst {
            Inst::Bin { op, lhs, rhs } => {
                let lc = constant_of(func, lhs);
                let rc = constant_of(func, rhs);
                match (lc, rc) {
                    (Some(a), Some(b)) => fold_bin(op, a, b).map(Inst::Const),
                    (_, Some(b)) if identity_bin(op, b) => {
                        // `x op neutral` is `x`: point every use at x and
                        // let DCE collect the husk.
                        func.replace_all_uses(crate::ir::ValueId(i as u32), lhs);
                        changed = true;
                        None
                    }
                    _ => None,
                }
            }
            Inst::Cmp { op, lhs, rhs } => {
                match (constant_of(func, lhs), constant_of(func, rhs)) {
                    (Some(a), Some(b)) => {
                        fold_cmp(op, a, b).map(|r| Inst::Const(u32::from(r)))
                    }
                    _ => None,
                }
            }
            Inst::Un { op, val } => constant_of(func, val)
                .and_then(|a| fold_un(op, a))
                .map(Inst::Const),
            _ => None,
        };
        if let Some(new) = new {
            if func.insts[i] != new {
                func.insts[i] = new;
                changed = true;
            }
        }
    }
    changed
}

/// Moves constants of commutative operations to the right-hand side.
pub fn reassociate(func: &mut IrFunction) -> bool {
    let mut changed = false;
    for i in 0..func.insts.len() {
        if let Inst::Bin { op, lhs, rhs } = func.insts[i] {
            let commutes = matches!(
                op,
                BinOp::Add | BinOp::And | BinOp::Or | BinOp::Xor | BinOp::Mul64 | BinOp::Add64 | BinOp::And64
            );
            if commutes
                && matches!(func.inst(lhs), Inst::Const(_) | Inst::Const64(_))
                && !matches!(func.inst(rhs), Inst::Const(_) | Inst::Const64(_))
            {
                func.insts[i] = Inst::Bin {
                    op,
                    lhs: rhs,
                    rhs: lhs,
                };
                changed = true;
            }
        }
    }
    changed
}

fn constant_of(func: &IrFunction, v: crate::ir::ValueId) -> Option<u32> {
    match func.inst(v) {
        Inst::Const(c) => Some(*c),
        _ => None,
    }
}

fn fold_bin(op: BinOp, a: u32, b: u32) -> Option<u32> {
    Some(match op {
        BinOp::Add => a.wrapping_add(b),
        BinOp::Sub => a.wrapping_sub(b),
        BinOp::And => a & b,
        BinOp::Or => a | b,
        BinOp::Xor => a ^ b,
        BinOp::Shl => bits::shl32(a, b),
        BinOp::Lshr => bits::lshr32(a, b),
        BinOp::Ashr => bits::ashr32(a, b),
        BinOp::Udiv => bits::udiv32(a, b),
        BinOp::Sdiv => bits::sdiv32(a, b),
        BinOp::Urem => bits::urem32(a, b),
        BinOp::Srem => bits::srem32(a, b),
        _ => return None,
    })
}

/// Whether `x op c` is just `x`.
fn identity_bin(op: BinOp, c: u32) -> bool {
    match op {
        BinOp::Add | BinOp::Sub | BinOp::Or | BinOp::Xor | BinOp::Shl | BinOp::Lshr
        | BinOp::Ashr => c == 0,
        BinOp::And => c == u32::MAX,
        BinOp::Udiv | BinOp::Sdiv => c == 1,
        _ => false,
    }
}

fn fold_cmp(op: CmpOp, a: u32, b: u32) -> Option<bool> {
    Some(match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Slt => (a as i32) < (b as i32),
        CmpOp::Ult => a < b,
        // Lifted regions feed float compares from registers, never from
        // integer constants; leave those alone.
        _ => return None,
    })
}

fn fold_un(op: crate::ir::UnOp, a: u32) -> Option<u32> {
    use crate::ir::UnOp;
    Some(match op {
        UnOp::Not => !a,
        UnOp::Sext8 => bits::sext8(a),
        UnOp::Sext16 => bits::sext16(a),
        _ => return None,
    })
}
