//! Backend interface and the IR-evaluating reference backend.
//!
//! The pipeline hands finished modules to a [`JitBackend`] and installs the
//! callable it returns. The in-tree [`EvalBackend`] executes the IR
//! directly; a native code generator plugs in behind the same trait.

use std::sync::Arc;

use super::{BinOp, BlockId, CmpOp, FuncId, Inst, IrFunction, IrModule, MemWidth, UnOp, ValueId};
use crate::common::bits;
use crate::common::reg::{RegClass, FP_BASE};
use crate::common::{GuestMemory, RegisterBank};

/// An installed region entry point.
///
/// Calling convention mirrors the lifted signature: guest registers, guest
/// data memory, and the entry PC in; the guest PC at which interpretation
/// must resume out.
pub type RegionFn = Arc<dyn Fn(&mut RegisterBank, &mut GuestMemory, u32) -> u32 + Send + Sync>;

/// A host backend turning IR modules into callable region entries.
///
/// The module is consumed; the backend owns whatever it lowers it into.
pub trait JitBackend: Send + Sync {
    /// Compiles `module` and returns the entry callable for its first
    /// function.
    fn compile(&self, module: IrModule) -> Result<RegionFn, String>;
}

/// Reference backend: validates the module and executes its IR directly.
#[derive(Debug, Default)]
pub struct EvalBackend;

impl JitBackend for EvalBackend {
    fn compile(&self, module: IrModule) -> Result<RegionFn, String> {
        if module.functions.is_empty() {
            return Err("empty module".into());
        }
        validate(&module)?;
        let module = Arc::new(module);
        let func = FuncId(0);
        Ok(Arc::new(move |regs, mem, entry_pc| {
            run_function(&module, func, regs, mem, entry_pc)
        }))
    }
}

/// Structural checks: reachable blocks are sealed, successor and operand
/// references are in range, and intra-module calls resolve.
pub fn validate(module: &IrModule) -> Result<(), String> {
    for f in &module.functions {
        let reachable = f.reachable_blocks();
        for (bi, block) in f.blocks.iter().enumerate() {
            if !reachable[bi] {
                continue;
            }
            let Some(&last) = block.insts.last() else {
                return Err(format!("{}: block {bi} is empty", f.name));
            };
            if !f.inst(last).is_terminator() {
                return Err(format!("{}: block {bi} is not sealed", f.name));
            }
            for (pos, &v) in block.insts.iter().enumerate() {
                let inst = f.inst(v);
                if inst.is_terminator() && pos + 1 != block.insts.len() {
                    return Err(format!("{}: terminator mid-block in {bi}", f.name));
                }
                for succ in inst.successors() {
                    if succ.0 as usize >= f.blocks.len() {
                        return Err(format!("{}: successor out of range in {bi}", f.name));
                    }
                }
                for op in inst.operands() {
                    if op.0 as usize >= f.insts.len() {
                        return Err(format!("{}: operand out of range in {bi}", f.name));
                    }
                }
                if let Inst::CallRegion { entry, .. } = inst {
                    if module.function_by_entry(*entry).is_none() {
                        return Err(format!("{}: unresolved call to r{entry}", f.name));
                    }
                }
            }
        }
    }
    Ok(())
}

#[inline]
fn f32v(bits: u64) -> f32 {
    f32::from_bits(bits as u32)
}

#[inline]
fn f64v(bits: u64) -> f64 {
    f64::from_bits(bits)
}

/// Executes `func` against guest state and returns the resume PC.
pub fn run_function(
    module: &IrModule,
    func: FuncId,
    regs: &mut RegisterBank,
    mem: &mut GuestMemory,
    entry_pc: u32,
) -> u32 {
    let f: &IrFunction = module.function(func);
    let mut vals: Vec<u64> = vec![0; f.insts.len()];
    let mut exit_slot: u32 = 0;
    let mut block = f.entry_block;

    'blocks: loop {
        let insts = &f.blocks[block.0 as usize].insts;
        for &vid in insts {
            let v = |id: ValueId| vals[id.0 as usize];
            let out = match f.inst(vid) {
                Inst::Nop => 0,
                Inst::Const(c) => u64::from(*c),
                Inst::Const64(c) => *c,
                Inst::EntryPc => u64::from(entry_pc),
                Inst::ReadReg { slot, class } => match class {
                    RegClass::Int => u64::from(regs.raw(*slot)),
                    RegClass::Float => u64::from(regs.raw(FP_BASE + *slot)),
                    RegClass::Int64 | RegClass::Double => regs.raw64(FP_BASE + *slot),
                },
                Inst::WriteReg { slot, class, val } => {
                    let x = v(*val);
                    match class {
                        RegClass::Int => regs.write(*slot, x as u32),
                        RegClass::Float => regs.write(FP_BASE + *slot, x as u32),
                        RegClass::Int64 | RegClass::Double => regs.write64(FP_BASE + *slot, x),
                    }
                    0
                }
                Inst::Bin { op, lhs, rhs } => {
                    let (a64, b64) = (v(*lhs), v(*rhs));
                    let (a, b) = (a64 as u32, b64 as u32);
                    match op {
                        BinOp::Add => u64::from(a.wrapping_add(b)),
                        BinOp::Sub => u64::from(a.wrapping_sub(b)),
                        BinOp::And => u64::from(a & b),
                        BinOp::Or => u64::from(a | b),
                        BinOp::Xor => u64::from(a ^ b),
                        BinOp::Shl => u64::from(bits::shl32(a, b)),
                        BinOp::Lshr => u64::from(bits::lshr32(a, b)),
                        BinOp::Ashr => u64::from(bits::ashr32(a, b)),
                        BinOp::Udiv => u64::from(bits::udiv32(a, b)),
                        BinOp::Sdiv => u64::from(bits::sdiv32(a, b)),
                        BinOp::Urem => u64::from(bits::urem32(a, b)),
                        BinOp::Srem => u64::from(bits::srem32(a, b)),
                        BinOp::Add64 => a64.wrapping_add(b64),
                        BinOp::And64 => a64 & b64,
                        BinOp::Shl64 => a64.wrapping_shl(b),
                        BinOp::Lshr64 => a64.wrapping_shr(b),
                        BinOp::Mul64 => a64.wrapping_mul(b64),
                        BinOp::FAdd32 => u64::from((f32v(a64) + f32v(b64)).to_bits()),
                        BinOp::FSub32 => u64::from((f32v(a64) - f32v(b64)).to_bits()),
                        BinOp::FMul32 => u64::from((f32v(a64) * f32v(b64)).to_bits()),
                        BinOp::FDiv32 => u64::from((f32v(a64) / f32v(b64)).to_bits()),
                        BinOp::FAdd64 => (f64v(a64) + f64v(b64)).to_bits(),
                        BinOp::FSub64 => (f64v(a64) - f64v(b64)).to_bits(),
                        BinOp::FMul64 => (f64v(a64) * f64v(b64)).to_bits(),
                        BinOp::FDiv64 => (f64v(a64) / f64v(b64)).to_bits(),
                    }
                }
                Inst::Un { op, val } => {
                    let x64 = v(*val);
                    let x = x64 as u32;
                    match op {
                        UnOp::Not => u64::from(!x),
                        UnOp::Sext8 => u64::from(bits::sext8(x)),
                        UnOp::Sext16 => u64::from(bits::sext16(x)),
                        UnOp::Sext32To64 => (i64::from(x as i32)) as u64,
                        UnOp::Zext32To64 => u64::from(x),
                        UnOp::Trunc64To32 => u64::from(x),
                        UnOp::SiToF32 => u64::from(((x as i32) as f32).to_bits()),
                        UnOp::SiToF64 => (f64::from(x as i32)).to_bits(),
                        UnOp::F32ToF64 => f64::from(f32v(x64)).to_bits(),
                        UnOp::F64ToF32 => u64::from((f64v(x64) as f32).to_bits()),
                        UnOp::F32ToSi => u64::from((f32v(x64) as i32) as u32),
                        UnOp::F64ToSi => u64::from((f64v(x64) as i32) as u32),
                        UnOp::FNeg32 => u64::from((-f32v(x64)).to_bits()),
                        UnOp::FNeg64 => (-f64v(x64)).to_bits(),
                        UnOp::FAbs32 => u64::from(f32v(x64).abs().to_bits()),
                        UnOp::FAbs64 => f64v(x64).abs().to_bits(),
                        UnOp::FSqrt32 => u64::from(f32v(x64).sqrt().to_bits()),
                        UnOp::FSqrt64 => f64v(x64).sqrt().to_bits(),
                    }
                }
                Inst::Cmp { op, lhs, rhs } => {
                    let (a64, b64) = (v(*lhs), v(*rhs));
                    let (a, b) = (a64 as u32, b64 as u32);
                    let r = match op {
                        CmpOp::Eq => a == b,
                        CmpOp::Ne => a != b,
                        CmpOp::Slt => (a as i32) < (b as i32),
                        CmpOp::Ult => a < b,
                        CmpOp::FOeq32 => f32v(a64) == f32v(b64),
                        CmpOp::FOeq64 => f64v(a64) == f64v(b64),
                        CmpOp::FUeq64 => {
                            let (x, y) = (f64v(a64), f64v(b64));
                            x.is_nan() || y.is_nan() || x == y
                        }
                        CmpOp::FOlt32 => f32v(a64) < f32v(b64),
                        CmpOp::FOlt64 => f64v(a64) < f64v(b64),
                        CmpOp::FUlt32 => {
                            let (x, y) = (f32v(a64), f32v(b64));
                            x.is_nan() || y.is_nan() || x < y
                        }
                        CmpOp::FUlt64 => {
                            let (x, y) = (f64v(a64), f64v(b64));
                            x.is_nan() || y.is_nan() || x < y
                        }
                        CmpOp::FOle32 => f32v(a64) <= f32v(b64),
                        CmpOp::FOle64 => f64v(a64) <= f64v(b64),
                        CmpOp::FUle32 => {
                            let (x, y) = (f32v(a64), f32v(b64));
                            x.is_nan() || y.is_nan() || x <= y
                        }
                        CmpOp::FUle64 => {
                            let (x, y) = (f64v(a64), f64v(b64));
                            x.is_nan() || y.is_nan() || x <= y
                        }
                        CmpOp::FUno32 => f32v(a64).is_nan() || f32v(b64).is_nan(),
                        CmpOp::FUno64 => f64v(a64).is_nan() || f64v(b64).is_nan(),
                    };
                    u64::from(r)
                }
                Inst::Load { width, addr } => {
                    let a = v(*addr) as u32;
                    match width {
                        MemWidth::Byte => u64::from(mem.read_u8(a)),
                        MemWidth::Half => u64::from(mem.read_u16(a)),
                        MemWidth::Word => u64::from(mem.read_u32(a)),
                        MemWidth::Dword => mem.read_u64(a),
                    }
                }
                Inst::Store { width, addr, val } => {
                    let a = v(*addr) as u32;
                    let x = v(*val);
                    match width {
                        MemWidth::Byte => mem.write_u8(a, x as u8),
                        MemWidth::Half => mem.write_u16(a, x as u16),
                        MemWidth::Word => mem.write_u32(a, x as u32),
                        MemWidth::Dword => mem.write_u64(a, x),
                    }
                    0
                }
                Inst::ReadExit => u64::from(exit_slot),
                Inst::WriteExit { val } => {
                    exit_slot = v(*val) as u32;
                    0
                }
                Inst::CallRegion { entry, pc } => {
                    let callee = module
                        .function_by_entry(*entry)
                        .unwrap_or_else(|| unreachable!("validated call"));
                    u64::from(run_function(module, callee, regs, mem, v(*pc) as u32))
                }
                Inst::Br { target } => {
                    block = *target;
                    continue 'blocks;
                }
                Inst::CondBr {
                    cond,
                    taken,
                    fallthrough,
                } => {
                    block = if v(*cond) as u32 != 0 { *taken } else { *fallthrough };
                    continue 'blocks;
                }
                Inst::Ret { val } => return v(*val) as u32,
                Inst::Switch { on, default, cases } => {
                    let x = v(*on) as u32;
                    block = cases
                        .iter()
                        .find(|&&(c, _)| c == x)
                        .map_or(*default, |&(_, b)| b);
                    continue 'blocks;
                }
            };
            vals[vid.0 as usize] = out;
        }
        unreachable!("validated blocks end with a terminator");
    }
}

/// An installed region: the guest entry address and its callable.
pub struct CompiledRegion {
    entry: u32,
    func: RegionFn,
}

impl std::fmt::Debug for CompiledRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledRegion")
            .field("entry", &self.entry)
            .finish_non_exhaustive()
    }
}

impl CompiledRegion {
    /// Wraps an installed entry point.
    pub fn new(entry: u32, func: RegionFn) -> Self {
        Self { entry, func }
    }

    /// The region's guest entry address.
    pub fn entry(&self) -> u32 {
        self.entry
    }

    /// Invokes the region against guest state.
    pub fn call(&self, regs: &mut RegisterBank, mem: &mut GuestMemory, pc: u32) -> u32 {
        (self.func)(regs, mem, pc)
    }
}

impl Clone for CompiledRegion {
    fn clone(&self) -> Self {
        Self {
            entry: self.entry,
            func: Arc::clone(&self.func),
        }
    }
}
