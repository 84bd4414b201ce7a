//! Intermediate representation.
//!
//! This module defines the compiler IR regions are lifted into, plus:
//! 1. **Emitter:** The region lifter (`emitter`).
//! 2. **Optimizer:** Pass enumeration and pipeline (`opt`, `passes`).
//! 3. **Backend:** The `JitBackend` interface and the in-tree evaluating
//!    backend (`exec`).
//!
//! IR entities are addressed by stable indices into arenas owned by each
//! function: instructions live in `IrFunction::insts` and blocks reference
//! them by [`ValueId`]. Terminators are ordinary arena instructions (the
//! last instruction of a sealed block), so block splitting never invalidates
//! an instruction reference.
//!
//! Every function has the region signature: given the guest register bank,
//! guest data memory, and an entry PC, it performs the region's effects and
//! returns the guest PC at which interpretation must resume.

/// Region lifter.
pub mod emitter;
/// The backend interface and the IR-evaluating reference backend.
pub mod exec;
/// Pass enumeration and the optimization pipeline.
pub mod opt;
/// Individual optimization passes.
pub mod passes;

use crate::common::reg::RegClass;

/// Index of an instruction in its function's arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

/// Index of a basic block in its function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

/// Index of a function in its module.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FuncId(pub u32);

/// Two-operand integer/float operations. 32-bit integer operations consume
/// and produce the low 32 bits of a value; 64-bit operations use all 64.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum BinOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Shl,
    Lshr,
    Ashr,
    Udiv,
    Sdiv,
    Urem,
    Srem,
    Add64,
    And64,
    Shl64,
    Lshr64,
    Mul64,
    FAdd32,
    FSub32,
    FMul32,
    FDiv32,
    FAdd64,
    FSub64,
    FMul64,
    FDiv64,
}

/// One-operand operations and conversions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum UnOp {
    /// 32-bit bitwise complement.
    Not,
    Sext8,
    Sext16,
    Sext32To64,
    Zext32To64,
    Trunc64To32,
    /// Signed i32 to f32.
    SiToF32,
    /// Signed i32 to f64.
    SiToF64,
    F32ToF64,
    F64ToF32,
    /// f32 to signed i32 (saturating).
    F32ToSi,
    /// f64 to signed i32 (saturating).
    F64ToSi,
    FNeg32,
    FNeg64,
    FAbs32,
    FAbs64,
    FSqrt32,
    FSqrt64,
}

/// Comparisons; result is the 32-bit value 0 or 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum CmpOp {
    Eq,
    Ne,
    Slt,
    Ult,
    FOeq32,
    FOeq64,
    FUeq64,
    FOlt32,
    FOlt64,
    FUlt32,
    FUlt64,
    FOle32,
    FOle64,
    FUle32,
    FUle64,
    FUno32,
    FUno64,
}

/// Memory access width.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum MemWidth {
    Byte,
    Half,
    Word,
    Dword,
}

/// An IR instruction.
///
/// Register access classes follow the emitter's register model: `Int` slots
/// are absolute bank indices; `Float`/`Double`/`Int64` indices are relative
/// to the FP bank base.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Inst {
    /// No effect; also the remnant of a neutralized instruction.
    Nop,
    /// 32-bit constant.
    Const(u32),
    /// 64-bit constant (masks for doubleword bit manipulation).
    Const64(u64),
    /// The entry-PC argument of the region function.
    EntryPc,
    /// Guest register read.
    ReadReg {
        /// Bank slot (class-relative).
        slot: u16,
        /// Access width/interpretation.
        class: RegClass,
    },
    /// Guest register write.
    WriteReg {
        /// Bank slot (class-relative).
        slot: u16,
        /// Access width/interpretation.
        class: RegClass,
        /// Value stored.
        val: ValueId,
    },
    /// Two-operand operation.
    Bin {
        /// Operation.
        op: BinOp,
        /// Left operand.
        lhs: ValueId,
        /// Right operand.
        rhs: ValueId,
    },
    /// One-operand operation.
    Un {
        /// Operation.
        op: UnOp,
        /// Operand.
        val: ValueId,
    },
    /// Comparison producing 0 or 1.
    Cmp {
        /// Predicate.
        op: CmpOp,
        /// Left operand.
        lhs: ValueId,
        /// Right operand.
        rhs: ValueId,
    },
    /// Guest memory load (zero-extended into the value).
    Load {
        /// Access width.
        width: MemWidth,
        /// Guest address.
        addr: ValueId,
    },
    /// Guest memory store.
    Store {
        /// Access width.
        width: MemWidth,
        /// Guest address.
        addr: ValueId,
        /// Value stored (low bits per width).
        val: ValueId,
    },
    /// Read the function's exit/entry slot.
    ReadExit,
    /// Write the function's exit/entry slot.
    WriteExit {
        /// Value stored.
        val: ValueId,
    },
    /// Direct call to the function lifted at `entry` in the same module;
    /// yields the callee's resume PC.
    CallRegion {
        /// Callee region entry address.
        entry: u32,
        /// PC argument passed through.
        pc: ValueId,
    },
    /// Unconditional branch.
    Br {
        /// Successor block.
        target: BlockId,
    },
    /// Conditional branch; taken when `cond` is nonzero.
    CondBr {
        /// Condition value.
        cond: ValueId,
        /// Successor when nonzero.
        taken: BlockId,
        /// Successor when zero.
        fallthrough: BlockId,
    },
    /// Return the guest resume PC.
    Ret {
        /// Resume PC value.
        val: ValueId,
    },
    /// Multiway branch on a 32-bit value.
    Switch {
        /// Scrutinee.
        on: ValueId,
        /// Successor when no case matches.
        default: BlockId,
        /// `(value, successor)` cases.
        cases: Vec<(u32, BlockId)>,
    },
}

impl Inst {
    /// Whether this instruction ends a block.
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Inst::Br { .. } | Inst::CondBr { .. } | Inst::Ret { .. } | Inst::Switch { .. }
        )
    }

    /// Whether the instruction has observable effects beyond its value.
    pub fn has_side_effect(&self) -> bool {
        matches!(
            self,
            Inst::WriteReg { .. }
                | Inst::Store { .. }
                | Inst::WriteExit { .. }
                | Inst::CallRegion { .. }
        ) || self.is_terminator()
    }

    /// Operand values, in order.
    pub fn operands(&self) -> Vec<ValueId> {
        match *self {
            Inst::Nop
            | Inst::Const(_)
            | Inst::Const64(_)
            | Inst::EntryPc
            | Inst::ReadReg { .. }
            | Inst::ReadExit => Vec::new(),
            Inst::WriteReg { val, .. }
            | Inst::Un { val, .. }
            | Inst::WriteExit { val }
            | Inst::Ret { val } => vec![val],
            Inst::Bin { lhs, rhs, .. } | Inst::Cmp { lhs, rhs, .. } => vec![lhs, rhs],
            Inst::Load { addr, .. } => vec![addr],
            Inst::Store { addr, val, .. } => vec![addr, val],
            Inst::CallRegion { pc, .. } => vec![pc],
            Inst::Br { .. } => Vec::new(),
            Inst::CondBr { cond, .. } => vec![cond],
            Inst::Switch { on, .. } => vec![on],
        }
    }

    /// Rewrites every operand equal to `from` into `to`.
    pub fn replace_operand(&mut self, from: ValueId, to: ValueId) {
        let fix = |v: &mut ValueId| {
            if *v == from {
                *v = to;
            }
        };
        match self {
            Inst::WriteReg { val, .. }
            | Inst::Un { val, .. }
            | Inst::WriteExit { val }
            | Inst::Ret { val } => fix(val),
            Inst::Bin { lhs, rhs, .. } | Inst::Cmp { lhs, rhs, .. } => {
                fix(lhs);
                fix(rhs);
            }
            Inst::Load { addr, .. } => fix(addr),
            Inst::Store { addr, val, .. } => {
                fix(addr);
                fix(val);
            }
            Inst::CallRegion { pc, .. } => fix(pc),
            Inst::CondBr { cond, .. } => fix(cond),
            Inst::Switch { on, .. } => fix(on),
            _ => {}
        }
    }

    /// Successor blocks of a terminator (empty for non-terminators).
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Inst::Br { target } => vec![*target],
            Inst::CondBr {
                taken, fallthrough, ..
            } => vec![*taken, *fallthrough],
            Inst::Switch { default, cases, .. } => {
                let mut s = vec![*default];
                s.extend(cases.iter().map(|&(_, b)| b));
                s
            }
            _ => Vec::new(),
        }
    }

    /// Rewrites every successor equal to `from` into `to`.
    pub fn retarget(&mut self, from: BlockId, to: BlockId) {
        let fix = |b: &mut BlockId| {
            if *b == from {
                *b = to;
            }
        };
        match self {
            Inst::Br { target } => fix(target),
            Inst::CondBr {
                taken, fallthrough, ..
            } => {
                fix(taken);
                fix(fallthrough);
            }
            Inst::Switch { default, cases, .. } => {
                fix(default);
                for (_, b) in cases {
                    fix(b);
                }
            }
            _ => {}
        }
    }
}

/// A basic block: ordered instruction references; once sealed, the last one
/// is a terminator.
#[derive(Clone, Debug, Default)]
pub struct Block {
    /// Instruction references in execution order.
    pub insts: Vec<ValueId>,
}

/// A lifted region function.
#[derive(Clone, Debug)]
pub struct IrFunction {
    /// Function name (`r<entry>`).
    pub name: String,
    /// Entry address; 0 for a multi-entry function.
    pub entry_pc: u32,
    /// Instruction arena.
    pub insts: Vec<Inst>,
    /// Basic blocks.
    pub blocks: Vec<Block>,
    /// The function's entry block.
    pub entry_block: BlockId,
}

impl IrFunction {
    /// Creates an empty function with one (entry) block.
    pub fn new(name: String, entry_pc: u32) -> Self {
        Self {
            name,
            entry_pc,
            insts: Vec::new(),
            blocks: vec![Block::default()],
            entry_block: BlockId(0),
        }
    }

    /// Adds an instruction to the arena without placing it in a block.
    pub fn push_inst(&mut self, inst: Inst) -> ValueId {
        let id = ValueId(self.insts.len() as u32);
        self.insts.push(inst);
        id
    }

    /// Creates a new, empty block.
    pub fn new_block(&mut self) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block::default());
        id
    }

    /// Borrows an instruction.
    #[inline]
    pub fn inst(&self, v: ValueId) -> &Inst {
        &self.insts[v.0 as usize]
    }

    /// Mutably borrows an instruction.
    #[inline]
    pub fn inst_mut(&mut self, v: ValueId) -> &mut Inst {
        &mut self.insts[v.0 as usize]
    }

    /// Appends an arena instruction to a block.
    pub fn append(&mut self, block: BlockId, v: ValueId) {
        self.blocks[block.0 as usize].insts.push(v);
    }

    /// Locates the block and position holding `v`.
    pub fn find_value(&self, v: ValueId) -> Option<(BlockId, usize)> {
        for (bi, block) in self.blocks.iter().enumerate() {
            if let Some(pos) = block.insts.iter().position(|&x| x == v) {
                return Some((BlockId(bi as u32), pos));
            }
        }
        None
    }

    /// The terminator of a block, if the block is sealed.
    pub fn terminator(&self, block: BlockId) -> Option<ValueId> {
        let last = *self.blocks[block.0 as usize].insts.last()?;
        self.inst(last).is_terminator().then_some(last)
    }

    /// Splits `block` before position `at`, moving the tail (including the
    /// terminator) into a fresh block; the original block is re-sealed with
    /// a branch to the tail. Returns the tail block.
    pub fn split_block(&mut self, block: BlockId, at: usize) -> BlockId {
        let tail_insts = self.blocks[block.0 as usize].insts.split_off(at);
        let tail = self.new_block();
        self.blocks[tail.0 as usize].insts = tail_insts;
        let br = self.push_inst(Inst::Br { target: tail });
        self.append(block, br);
        tail
    }

    /// Number of predecessors of every block.
    pub fn pred_counts(&self) -> Vec<u32> {
        let mut counts = vec![0u32; self.blocks.len()];
        for block in &self.blocks {
            if let Some(&last) = block.insts.last() {
                for succ in self.inst(last).successors() {
                    counts[succ.0 as usize] += 1;
                }
            }
        }
        counts
    }

    /// Rewrites every use of `from` into `to` across the function.
    pub fn replace_all_uses(&mut self, from: ValueId, to: ValueId) {
        for inst in &mut self.insts {
            inst.replace_operand(from, to);
        }
    }

    /// Blocks reachable from the entry block.
    pub fn reachable_blocks(&self) -> Vec<bool> {
        let mut seen = vec![false; self.blocks.len()];
        let mut stack = vec![self.entry_block];
        seen[self.entry_block.0 as usize] = true;
        while let Some(b) = stack.pop() {
            if let Some(&last) = self.blocks[b.0 as usize].insts.last() {
                for succ in self.inst(last).successors() {
                    if !seen[succ.0 as usize] {
                        seen[succ.0 as usize] = true;
                        stack.push(succ);
                    }
                }
            }
        }
        seen
    }

    /// Number of instructions placed in reachable blocks.
    pub fn live_inst_count(&self) -> usize {
        let reachable = self.reachable_blocks();
        self.blocks
            .iter()
            .enumerate()
            .filter(|(i, _)| reachable[*i])
            .map(|(_, b)| b.insts.len())
            .sum()
    }
}

/// A module: one or more region functions compiled together.
#[derive(Clone, Debug, Default)]
pub struct IrModule {
    /// Functions in the module.
    pub functions: Vec<IrFunction>,
}

impl IrModule {
    /// Adds a function, returning its id.
    pub fn add_function(&mut self, func: IrFunction) -> FuncId {
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(func);
        id
    }

    /// Borrows a function.
    #[inline]
    pub fn function(&self, id: FuncId) -> &IrFunction {
        &self.functions[id.0 as usize]
    }

    /// Finds the function lifted at `entry`, if present.
    pub fn function_by_entry(&self, entry: u32) -> Option<FuncId> {
        self.functions
            .iter()
            .position(|f| f.entry_pc == entry && entry != 0)
            .map(|i| FuncId(i as u32))
    }

    /// Total instructions placed in reachable blocks across all functions.
    pub fn live_inst_count(&self) -> usize {
        self.functions.iter().map(IrFunction::live_inst_count).sum()
    }
}
