//! Region lifter.
//!
//! Lifts an OI region into one IR function whose control-flow graph mirrors
//! the guest region:
//! 1. **Lowering:** One rule per OI opcode, accumulating instructions into
//!    the current block; branches get placeholder successors.
//! 2. **Discontinuity exits:** When consecutive recorded addresses are not
//!    natural successors, an exit returning the predecessor's fall-through
//!    PC is inserted and a fresh block begins.
//! 3. **Branch patching:** After lowering, every static branch target inside
//!    the region is wired to the block containing it (splitting blocks as
//!    needed); targets outside the region become exits.
//! 4. **Indirect-return speculation:** `jumpr` returns are rewritten into a
//!    switch over the known call-site return points of the enclosing guest
//!    function.
//! 5. **Multi-entry trampolines:** With more than one entry address, a
//!    dispatch block switches on the entry-PC argument.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use super::{BinOp, BlockId, CmpOp, FuncId, Inst, IrFunction, IrModule, MemWidth, UnOp, ValueId};
use crate::common::reg::{RegClass, CC_REG, FP_BASE, IJMP_REG, LDI_TRACK_REG};
use crate::common::{Error, OiInstList, Result};
use crate::isa::{decode, disasm, is_control_flow, is_indirect_branch, possible_targets, Opcode};
use crate::isa::decode::OiInst;
use crate::machine::MethodMap;

/// Lifts OI regions into IR functions.
///
/// Holds cross-region knowledge: recorded call sites per guest function
/// (feeding indirect-return speculation) and direct transitions out of each
/// compiled region.
pub struct RegionEmitter {
    call_target_list: HashMap<u32, BTreeSet<u32>>,
    return_points: HashSet<u32>,
    direct_transitions: HashMap<u32, Vec<u32>>,
}

impl Default for RegionEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RegionEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionEmitter")
            .field("call_targets", &self.call_target_list.len())
            .finish_non_exhaustive()
    }
}

struct LiftCtx {
    func: IrFunction,
    cur: BlockId,
    body_entry: BlockId,
    trampoline: Option<BlockId>,
    ir_memory_map: BTreeMap<u32, ValueId>,
    ir_branch_map: HashMap<u32, ValueId>,
    ir_ibranch_map: HashMap<u32, ValueId>,
    last_emitted: Option<(u32, OiInst)>,
    ldi_reg: u16,
}

impl LiftCtx {
    fn emit(&mut self, inst: Inst) -> ValueId {
        let id = self.func.push_inst(inst);
        self.func.append(self.cur, id);
        id
    }

    fn imm(&mut self, v: u32) -> ValueId {
        self.emit(Inst::Const(v))
    }

    /// Register load; integer register 0 reads as constant zero.
    fn load_reg(&mut self, slot: u16, class: RegClass) -> ValueId {
        if class == RegClass::Int && slot == 0 {
            return self.imm(0);
        }
        self.emit(Inst::ReadReg { slot, class })
    }

    /// Register store; stores to integer register 0 are emitted (harmless).
    fn store_reg(&mut self, slot: u16, class: RegClass, val: ValueId) -> ValueId {
        self.emit(Inst::WriteReg { slot, class, val })
    }

    fn bin(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.emit(Inst::Bin { op, lhs, rhs })
    }

    fn un(&mut self, op: UnOp, val: ValueId) -> ValueId {
        self.emit(Inst::Un { op, val })
    }

    fn cmp(&mut self, op: CmpOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.emit(Inst::Cmp { op, lhs, rhs })
    }

    /// Exit the function toward `addr`: through the trampoline slot when one
    /// exists, otherwise a plain return.
    fn direct_exit(&mut self, addr: u32) {
        let v = self.imm(addr);
        if let Some(tramp) = self.trampoline {
            let _ = self.emit(Inst::WriteExit { val: v });
            let _ = self.emit(Inst::Br { target: tramp });
        } else {
            let _ = self.emit(Inst::Ret { val: v });
        }
    }

    /// Exit toward a runtime value.
    fn value_exit(&mut self, val: ValueId) -> Option<ValueId> {
        if let Some(tramp) = self.trampoline {
            let _ = self.emit(Inst::WriteExit { val });
            let _ = self.emit(Inst::Br { target: tramp });
            None
        } else {
            Some(self.emit(Inst::Ret { val }))
        }
    }

    /// The block whose head is the lifted instruction at guest address
    /// `addr`, splitting its containing block when it is mid-block. Guest
    /// addresses outside the region become synthesized exit blocks.
    fn block_for_target(&mut self, addr: u32) -> BlockId {
        if let Some(&v) = self.ir_memory_map.get(&addr) {
            let (block, idx) = self
                .func
                .find_value(v)
                .unwrap_or_else(|| unreachable!("mapped value not placed"));
            if idx == 0 {
                block
            } else {
                self.func.split_block(block, idx)
            }
        } else {
            let saved = self.cur;
            let block = self.func.new_block();
            self.cur = block;
            self.direct_exit(addr);
            self.cur = saved;
            block
        }
    }
}

impl RegionEmitter {
    /// Creates an emitter with empty cross-region state.
    pub fn new() -> Self {
        Self {
            call_target_list: HashMap::new(),
            return_points: HashSet::new(),
            direct_transitions: HashMap::new(),
        }
    }

    /// Direct call targets recorded while lifting the region at `entry`.
    pub fn direct_transitions(&self, entry: u32) -> Vec<u32> {
        self.direct_transitions.get(&entry).cloned().unwrap_or_default()
    }

    /// Lifts `region` into a function added to `module`.
    ///
    /// `entries` carries the region's entry addresses; more than one builds
    /// the dispatch trampoline. Fails on instructions with no lowering rule.
    pub fn emit_region(
        &mut self,
        entries: &[u32],
        region: &OiInstList,
        methods: &MethodMap,
        module: &mut IrModule,
    ) -> Result<FuncId> {
        let entry_pc = if entries.len() == 1 { entries[0] } else { 0 };

        let mut ctx = LiftCtx {
            func: IrFunction::new(format!("r{entry_pc}"), entry_pc),
            cur: BlockId(0),
            body_entry: BlockId(0),
            trampoline: None,
            ir_memory_map: BTreeMap::new(),
            ir_branch_map: HashMap::new(),
            ir_ibranch_map: HashMap::new(),
            last_emitted: None,
            ldi_reg: 0,
        };

        // Block 0 is the function entry; it must keep zero predecessors, so
        // the body starts in its own block.
        ctx.body_entry = ctx.func.new_block();
        ctx.cur = ctx.body_entry;
        if entries.len() > 1 {
            ctx.trampoline = Some(ctx.func.new_block());
        }

        for &(pc, word) in region {
            let inst = decode(word);

            // Split the block when the recorded stream jumps: the previous
            // instruction cannot fall through to this address.
            if let Some((last_pc, last_inst)) = ctx.last_emitted {
                let nat = possible_targets(last_pc, &last_inst);
                if nat[0] != pc && nat[1] != pc {
                    ctx.direct_exit(last_pc.wrapping_add(4));
                    let nb = ctx.func.new_block();
                    ctx.cur = nb;
                }
            }

            let mark = ctx.func.insts.len();
            self.lower(&mut ctx, pc, &inst, entry_pc, module)?;
            if ctx.func.insts.len() == mark {
                let _ = ctx.emit(Inst::Nop);
            }
            let _ = ctx.ir_memory_map.insert(pc, ValueId(mark as u32));

            ctx.last_emitted = Some((pc, inst));
        }

        let last_pc = region.last().map_or(0, |&(pc, _)| pc);
        ctx.direct_exit(last_pc.wrapping_add(4));

        self.process_branches_targets(&mut ctx, region, methods);

        if entries.len() > 1 {
            self.add_multiple_entries_support(&mut ctx, entries);
        } else {
            let entry = ctx.func.entry_block;
            let target = ctx.body_entry;
            let br = ctx.func.push_inst(Inst::Br { target });
            ctx.func.append(entry, br);
        }

        Ok(module.add_function(ctx.func))
    }

    /// Patches branch successors and rewrites indirect returns once every
    /// instruction of the region has been lifted.
    fn process_branches_targets(
        &mut self,
        ctx: &mut LiftCtx,
        region: &OiInstList,
        methods: &MethodMap,
    ) {
        for &(pc, word) in region {
            let inst = decode(word);
            if is_control_flow(&inst) {
                self.update_branch_target(ctx, pc, possible_targets(pc, &inst));
            }
            if is_indirect_branch(&inst) && inst.opcode == Opcode::Jumpr {
                self.improve_indirect_branch(ctx, pc, methods);
            }
        }
    }

    fn update_branch_target(&mut self, ctx: &mut LiftCtx, pc: u32, targets: [u32; 2]) {
        let Some(&branch) = ctx.ir_branch_map.get(&pc) else {
            return;
        };
        for (i, &target) in targets.iter().enumerate() {
            if target == 0 {
                continue;
            }
            let block = ctx.block_for_target(target);
            match ctx.func.inst_mut(branch) {
                Inst::Br { target: t } => *t = block,
                Inst::CondBr {
                    taken, fallthrough, ..
                } => {
                    if i == 0 {
                        *taken = block;
                    } else {
                        *fallthrough = block;
                    }
                }
                _ => {}
            }
        }
    }

    /// Rewrites the `jumpr` return at `pc` into a switch over the known
    /// return points of the enclosing guest function.
    fn improve_indirect_branch(&mut self, ctx: &mut LiftCtx, pc: u32, methods: &MethodMap) {
        let Some(&ret) = ctx.ir_ibranch_map.get(&pc) else {
            return;
        };
        let &Inst::Ret { val: target_val } = ctx.func.inst(ret) else {
            return;
        };

        let function_entry = methods.find(pc);
        let sites = self
            .call_target_list
            .get(&function_entry)
            .filter(|_| function_entry != 0)
            .cloned()
            .unwrap_or_default();

        if sites.is_empty() {
            // No speculation possible; under a trampoline the raw return
            // still has to route through the exit slot.
            if let Some(tramp) = ctx.trampoline {
                let (block, idx) = ctx
                    .func
                    .find_value(ret)
                    .unwrap_or_else(|| unreachable!("indirect return not placed"));
                let store = ctx.func.push_inst(Inst::WriteExit { val: target_val });
                ctx.func.blocks[block.0 as usize].insts.insert(idx, store);
                *ctx.func.inst_mut(ret) = Inst::Br { target: tramp };
            }
            return;
        }

        let (block, idx) = ctx
            .func
            .find_value(ret)
            .unwrap_or_else(|| unreachable!("indirect return not placed"));
        let ret_bb = ctx.func.split_block(block, idx);
        let if_bb = ctx.func.new_block();
        let head_br = ctx
            .func
            .terminator(block)
            .unwrap_or_else(|| unreachable!("split block unsealed"));
        ctx.func.inst_mut(head_br).retarget(ret_bb, if_bb);

        let mut cases = Vec::new();
        for site in sites {
            let return_pc = site.wrapping_add(4);
            if ctx.ir_memory_map.contains_key(&return_pc) {
                let _ = self.return_points.insert(return_pc);
                let target = ctx.block_for_target(return_pc);
                cases.push((return_pc, target));
            }
        }

        let if_false = ctx.func.new_block();
        let saved = ctx.cur;
        ctx.cur = if_false;
        if ctx.trampoline.is_some() {
            let _ = ctx.value_exit(target_val);
        } else {
            let br = ctx.func.push_inst(Inst::Br { target: ret_bb });
            ctx.func.append(if_false, br);
        }
        ctx.cur = saved;

        let switch = ctx.func.push_inst(Inst::Switch {
            on: target_val,
            default: if_false,
            cases,
        });
        ctx.func.append(if_bb, switch);
    }

    /// Builds the entry-dispatch trampoline for a multi-entry function.
    fn add_multiple_entries_support(&mut self, ctx: &mut LiftCtx, entries: &[u32]) {
        let tramp = ctx.trampoline.unwrap_or_else(|| unreachable!("no trampoline"));

        let real_entry = ctx.func.push_inst(Inst::ReadExit);
        ctx.func.append(tramp, real_entry);

        let fail = ctx.func.new_block();
        let fail_ret = ctx.func.push_inst(Inst::Ret { val: real_entry });
        ctx.func.append(fail, fail_ret);

        // Entries that head a block with more than two predecessors, or that
        // are known return points, are already well-served.
        let preds = ctx.func.pred_counts();
        let mut kept = Vec::new();
        for &addr in entries {
            if let Some(&v) = ctx.ir_memory_map.get(&addr) {
                if let Some((block, idx)) = ctx.func.find_value(v) {
                    if idx == 0 && preds[block.0 as usize] > 2 {
                        continue;
                    }
                }
            }
            if self.return_points.contains(&addr) {
                continue;
            }
            kept.push(addr);
        }

        let mut cases = Vec::new();
        for addr in kept {
            let block = ctx.block_for_target(addr);
            cases.push((addr, block));
        }
        let switch = ctx.func.push_inst(Inst::Switch {
            on: real_entry,
            default: fail,
            cases,
        });
        ctx.func.append(tramp, switch);

        let entry = ctx.func.entry_block;
        let pc_arg = ctx.func.push_inst(Inst::EntryPc);
        ctx.func.append(entry, pc_arg);
        let store = ctx.func.push_inst(Inst::WriteExit { val: pc_arg });
        ctx.func.append(entry, store);
        let br = ctx.func.push_inst(Inst::Br { target: tramp });
        ctx.func.append(entry, br);
    }

    /// Emits a conditional branch with placeholder successors and opens the
    /// fall-through block.
    fn cond_branch(ctx: &mut LiftCtx, pc: u32, cond: ValueId) {
        let next = ctx.func.new_block();
        let br = ctx.emit(Inst::CondBr {
            cond,
            taken: next,
            fallthrough: next,
        });
        let _ = ctx.ir_branch_map.insert(pc, br);
        ctx.cur = next;
    }

    /// Lowers one decoded instruction at `pc` into the current block.
    fn lower(
        &mut self,
        ctx: &mut LiftCtx,
        pc: u32,
        inst: &OiInst,
        region_entry: u32,
        module: &IrModule,
    ) -> Result<()> {
        use Opcode::*;
        use RegClass::{Double, Float, Int, Int64};

        let rs = u16::from(inst.rs);
        let rt = u16::from(inst.rt);
        let rd = u16::from(inst.rd);
        let rv = u16::from(inst.rv);
        let imm = i32::from(inst.imm) as u32;
        let uimm14 = (inst.imm as u32) & 0x3FFF;

        match inst.opcode {
            Nop => {
                let _ = ctx.emit(Inst::Nop);
            }

            Ldi => {
                ctx.ldi_reg = rt;
                let idx = ctx.imm(u32::from(inst.rt));
                let _ = ctx.store_reg(LDI_TRACK_REG, Int, idx);
                let old = ctx.load_reg(rt, Int);
                let mask = ctx.imm(0xFFFF_C000);
                let hi = ctx.bin(BinOp::And, old, mask);
                let lo = ctx.imm(uimm14);
                let res = ctx.bin(BinOp::Or, hi, lo);
                let _ = ctx.store_reg(rt, Int, res);
            }
            Ldihi => {
                let target = ctx.ldi_reg;
                let old = ctx.load_reg(target, Int);
                let mask = ctx.imm(0x3FFF);
                let lo = ctx.bin(BinOp::And, old, mask);
                let hi = ctx.imm(inst.addrs << 14);
                let res = ctx.bin(BinOp::Or, lo, hi);
                let _ = ctx.store_reg(target, Int, res);
            }

            Add | Sub | And | Or | Xor => {
                let a = ctx.load_reg(rs, Int);
                let b = ctx.load_reg(rt, Int);
                let op = match inst.opcode {
                    Add => BinOp::Add,
                    Sub => BinOp::Sub,
                    And => BinOp::And,
                    Or => BinOp::Or,
                    _ => BinOp::Xor,
                };
                let res = ctx.bin(op, a, b);
                let _ = ctx.store_reg(rd, Int, res);
            }
            Nor => {
                let a = ctx.load_reg(rs, Int);
                let b = ctx.load_reg(rt, Int);
                let or = ctx.bin(BinOp::Or, a, b);
                let res = ctx.un(UnOp::Not, or);
                let _ = ctx.store_reg(rd, Int, res);
            }
            Addi => {
                let a = ctx.load_reg(rs, Int);
                let b = ctx.imm(imm);
                let res = ctx.bin(BinOp::Add, a, b);
                let _ = ctx.store_reg(rt, Int, res);
            }
            Andi | Ori | Xori => {
                let a = ctx.load_reg(rs, Int);
                let b = ctx.imm(uimm14);
                let op = match inst.opcode {
                    Andi => BinOp::And,
                    Ori => BinOp::Or,
                    _ => BinOp::Xor,
                };
                let res = ctx.bin(op, a, b);
                let _ = ctx.store_reg(rt, Int, res);
            }

            Shl | Shr | Asr => {
                let x = ctx.load_reg(rt, Int);
                let s = ctx.imm(u32::from(inst.rs));
                let op = match inst.opcode {
                    Shl => BinOp::Shl,
                    Shr => BinOp::Lshr,
                    _ => BinOp::Ashr,
                };
                let res = ctx.bin(op, x, s);
                let _ = ctx.store_reg(rd, Int, res);
            }
            Shlr | Shrr | Asrr => {
                let raw = ctx.load_reg(rs, Int);
                let mask = ctx.imm(0x1F);
                let s = ctx.bin(BinOp::And, raw, mask);
                let x = ctx.load_reg(rt, Int);
                let op = match inst.opcode {
                    Shlr => BinOp::Shl,
                    Shrr => BinOp::Lshr,
                    _ => BinOp::Ashr,
                };
                let res = ctx.bin(op, x, s);
                let _ = ctx.store_reg(rd, Int, res);
            }
            Ror => {
                let x = ctx.load_reg(rt, Int);
                let s1 = ctx.imm(u32::from(inst.rs));
                let right = ctx.bin(BinOp::Lshr, x, s1);
                let s2 = ctx.imm(32u32.wrapping_sub(u32::from(inst.rs)));
                let left = ctx.bin(BinOp::Shl, x, s2);
                let res = ctx.bin(BinOp::Or, right, left);
                let _ = ctx.store_reg(rd, Int, res);
            }

            Slt | Sltu => {
                let a = ctx.load_reg(rs, Int);
                let b = ctx.load_reg(rt, Int);
                let op = if inst.opcode == Slt { CmpOp::Slt } else { CmpOp::Ult };
                let res = ctx.cmp(op, a, b);
                let _ = ctx.store_reg(rd, Int, res);
            }
            Slti => {
                let a = ctx.load_reg(rs, Int);
                let b = ctx.imm(imm);
                let res = ctx.cmp(CmpOp::Slt, a, b);
                let _ = ctx.store_reg(rt, Int, res);
            }
            Sltiu => {
                let a = ctx.load_reg(rs, Int);
                let b = ctx.imm(uimm14);
                let res = ctx.cmp(CmpOp::Ult, a, b);
                let _ = ctx.store_reg(rt, Int, res);
            }

            Mul | Mulu => {
                let a = ctx.load_reg(rs, Int);
                let b = ctx.load_reg(rt, Int);
                let ext = if inst.opcode == Mul {
                    UnOp::Sext32To64
                } else {
                    UnOp::Zext32To64
                };
                let wa = ctx.un(ext, a);
                let wb = ctx.un(ext, b);
                let prod = ctx.bin(BinOp::Mul64, wa, wb);
                if inst.rd != 0 {
                    let mask = ctx.imm(0xFFFF_FFFF);
                    let lo = ctx.bin(BinOp::And64, prod, mask);
                    let lo32 = ctx.un(UnOp::Trunc64To32, lo);
                    let _ = ctx.store_reg(rd, Int, lo32);
                }
                if inst.rv != 0 {
                    let sh = ctx.imm(32);
                    let hi = ctx.bin(BinOp::Lshr64, prod, sh);
                    let mask = ctx.imm(0xFFFF_FFFF);
                    let masked = ctx.bin(BinOp::And64, hi, mask);
                    let hi32 = ctx.un(UnOp::Trunc64To32, masked);
                    let _ = ctx.store_reg(rv, Int, hi32);
                }
            }
            Div => {
                let a = ctx.load_reg(rs, Int);
                let b = ctx.load_reg(rt, Int);
                let res = ctx.bin(BinOp::Sdiv, a, b);
                let _ = ctx.store_reg(rd, Int, res);
            }
            Divu => {
                // The widened operands are computed and then unused; the
                // divide itself is 32-bit and the remainder is signed.
                let a = ctx.load_reg(rs, Int);
                let b = ctx.load_reg(rt, Int);
                let _wa = ctx.un(UnOp::Sext32To64, a);
                let _wb = ctx.un(UnOp::Sext32To64, b);
                let a2 = ctx.load_reg(rs, Int);
                let b2 = ctx.load_reg(rt, Int);
                let quot = ctx.bin(BinOp::Udiv, a2, b2);
                let _ = ctx.store_reg(rd, Int, quot);
                if inst.rv != 0 {
                    let a3 = ctx.load_reg(rs, Int);
                    let b3 = ctx.load_reg(rt, Int);
                    let rem = ctx.bin(BinOp::Srem, a3, b3);
                    let _ = ctx.store_reg(rv, Int, rem);
                }
            }
            Mod | Modu => {
                let a = ctx.load_reg(rs, Int);
                let b = ctx.load_reg(rt, Int);
                let op = if inst.opcode == Mod { BinOp::Srem } else { BinOp::Urem };
                let res = ctx.bin(op, a, b);
                let _ = ctx.store_reg(rv, Int, res);
            }
            Ext => {
                let total = u32::from(inst.rs) + u32::from(inst.rt) + 1;
                let shl_amt = ctx.imm(32u32.wrapping_sub(total));
                let x = ctx.load_reg(rd, Int);
                let shifted = ctx.bin(BinOp::Shl, x, shl_amt);
                let shr_amt = ctx.imm(32u32.wrapping_sub(u32::from(inst.rt) + 1));
                let res = ctx.bin(BinOp::Lshr, shifted, shr_amt);
                let _ = ctx.store_reg(rv, Int, res);
            }
            Ijmphi => {
                let zero = ctx.imm(0);
                let page = ctx.imm(inst.addrs << 12);
                let res = ctx.bin(BinOp::Or, zero, page);
                let _ = ctx.store_reg(IJMP_REG, Int, res);
            }
            Seb | Seh => {
                let x = ctx.load_reg(rt, Int);
                let op = if inst.opcode == Seb { UnOp::Sext8 } else { UnOp::Sext16 };
                let res = ctx.un(op, x);
                let _ = ctx.store_reg(rs, Int, res);
            }

            Movz | Movn | Movzd | Movnd => {
                let c = ctx.load_reg(rt, Int);
                let zero = ctx.imm(0);
                let op = if matches!(inst.opcode, Movz | Movzd) { CmpOp::Eq } else { CmpOp::Ne };
                let cond = ctx.cmp(op, c, zero);
                let taken = ctx.func.new_block();
                let merge = ctx.func.new_block();
                let _ = ctx.emit(Inst::CondBr {
                    cond,
                    taken,
                    fallthrough: merge,
                });
                ctx.cur = taken;
                if matches!(inst.opcode, Movz | Movn) {
                    let v = ctx.load_reg(rs, Int);
                    let _ = ctx.store_reg(rd, Int, v);
                } else {
                    let v = ctx.load_reg(rs, Double);
                    let _ = ctx.store_reg(rd, Double, v);
                }
                let _ = ctx.emit(Inst::Br { target: merge });
                ctx.cur = merge;
            }
            Movt | Movf | Movts | Movtd | Movfs | Movfd => {
                let cc = ctx.load_reg(CC_REG, Int);
                let zero = ctx.imm(0);
                let op = if matches!(inst.opcode, Movt | Movts | Movtd) {
                    CmpOp::Ne
                } else {
                    CmpOp::Eq
                };
                let cond = ctx.cmp(op, cc, zero);
                let taken = ctx.func.new_block();
                let merge = ctx.func.new_block();
                let _ = ctx.emit(Inst::CondBr {
                    cond,
                    taken,
                    fallthrough: merge,
                });
                ctx.cur = taken;
                let class = match inst.opcode {
                    Movt | Movf => Int,
                    Movts | Movfs => Float,
                    _ => Double,
                };
                let v = ctx.load_reg(rt, class);
                let _ = ctx.store_reg(rs, class, v);
                let _ = ctx.emit(Inst::Br { target: merge });
                ctx.cur = merge;
            }

            Ldw | Ldh | Ldhu | Ldb | Ldbu => {
                let base = ctx.load_reg(rs, Int);
                let off = ctx.imm(imm);
                let addr = ctx.bin(BinOp::Add, base, off);
                let (width, ext) = match inst.opcode {
                    Ldw => (MemWidth::Word, None),
                    Ldh => (MemWidth::Half, Some(UnOp::Sext16)),
                    Ldhu => (MemWidth::Half, None),
                    Ldb => (MemWidth::Byte, Some(UnOp::Sext8)),
                    _ => (MemWidth::Byte, None),
                };
                let mut v = ctx.emit(Inst::Load { width, addr });
                if let Some(op) = ext {
                    v = ctx.un(op, v);
                }
                let _ = ctx.store_reg(rt, Int, v);
            }
            Stw => {
                let base = ctx.load_reg(rs, Int);
                let off = ctx.imm(imm);
                let addr = ctx.bin(BinOp::Add, base, off);
                let val = ctx.load_reg(rt, Int);
                let _ = ctx.emit(Inst::Store {
                    width: MemWidth::Word,
                    addr,
                    val,
                });
            }
            Sth | Stb => {
                let x = ctx.load_reg(rt, Int);
                let (mask, width) = if inst.opcode == Sth {
                    (0xFFFFu32, MemWidth::Half)
                } else {
                    (0xFF, MemWidth::Byte)
                };
                let m = ctx.imm(mask);
                let val = ctx.bin(BinOp::And, x, m);
                let base = ctx.load_reg(rs, Int);
                let off = ctx.imm(imm);
                let addr = ctx.bin(BinOp::Add, base, off);
                let _ = ctx.emit(Inst::Store { width, addr, val });
            }

            Movs | Movd => {
                let class = if inst.opcode == Movs { Float } else { Double };
                let v = ctx.load_reg(rt, class);
                let _ = ctx.store_reg(rs, class, v);
            }
            Cvtds => {
                let v = ctx.load_reg(rt, Float);
                let res = ctx.un(UnOp::F32ToF64, v);
                let _ = ctx.store_reg(rs, Double, res);
            }
            Cvtdw => {
                let v = ctx.load_reg(rt, Float);
                let res = ctx.un(UnOp::SiToF64, v);
                let _ = ctx.store_reg(rs, Double, res);
            }
            Cvtsw => {
                let v = ctx.load_reg(rt, Float);
                let res = ctx.un(UnOp::SiToF32, v);
                let _ = ctx.store_reg(rs, Float, res);
            }
            Cvtsd => {
                let v = ctx.load_reg(rt, Double);
                let res = ctx.un(UnOp::F64ToF32, v);
                let _ = ctx.store_reg(rs, Float, res);
            }
            Truncwd => {
                let v = ctx.load_reg(rt, Double);
                let res = ctx.un(UnOp::F64ToSi, v);
                let _ = ctx.store_reg(rs, Float, res);
            }
            Truncws => {
                let v = ctx.load_reg(rt, Float);
                let res = ctx.un(UnOp::F32ToSi, v);
                let _ = ctx.store_reg(rs, Float, res);
            }

            Mtc1 => {
                let v = ctx.load_reg(rs, Int);
                let _ = ctx.store_reg(rt, Float, v);
            }
            Mfc1 => {
                let v = ctx.load_reg(rt, Float);
                let _ = ctx.store_reg(rs, Int, v);
            }
            Mflc1 | Mfhc1 => {
                let d = ctx.load_reg(rt, Double);
                let word = if inst.opcode == Mflc1 {
                    let mask = ctx.imm(0xFFFF_FFFF);
                    ctx.bin(BinOp::And64, d, mask)
                } else {
                    let sh = ctx.imm(32);
                    ctx.bin(BinOp::Lshr64, d, sh)
                };
                let res = ctx.un(UnOp::Trunc64To32, word);
                let _ = ctx.store_reg(rs, Int, res);
            }
            Mtlc1 => {
                let d = ctx.load_reg(rt, Double);
                let mask = ctx.emit(Inst::Const64(0xFFFF_FFFF_0000_0000));
                let hi = ctx.bin(BinOp::And64, d, mask);
                let w = ctx.load_reg(rs, Int);
                let wz = ctx.un(UnOp::Zext32To64, w);
                let res = ctx.bin(BinOp::Add64, hi, wz);
                let _ = ctx.store_reg(rt, Double, res);
            }
            Mthc1 => {
                let d = ctx.load_reg(rt, Double);
                let mask = ctx.imm(0xFFFF_FFFF);
                let lo = ctx.bin(BinOp::And64, d, mask);
                let w = ctx.load_reg(rs, Int);
                let wz = ctx.un(UnOp::Zext32To64, w);
                let sh = ctx.imm(32);
                let hi = ctx.bin(BinOp::Shl64, wz, sh);
                let res = ctx.bin(BinOp::Add64, lo, hi);
                let _ = ctx.store_reg(rt, Double, res);
            }

            Adds | Subs | Muls | Divs => {
                let a = ctx.load_reg(rs, Float);
                let b = ctx.load_reg(rt, Float);
                let op = match inst.opcode {
                    Adds => BinOp::FAdd32,
                    Subs => BinOp::FSub32,
                    Muls => BinOp::FMul32,
                    _ => BinOp::FDiv32,
                };
                let res = ctx.bin(op, a, b);
                let _ = ctx.store_reg(rd, Float, res);
            }
            Addd | Subd | Muld | Divd => {
                let a = ctx.load_reg(rs, Double);
                let b = ctx.load_reg(rt, Double);
                let op = match inst.opcode {
                    Addd => BinOp::FAdd64,
                    Subd => BinOp::FSub64,
                    Muld => BinOp::FMul64,
                    _ => BinOp::FDiv64,
                };
                let res = ctx.bin(op, a, b);
                let _ = ctx.store_reg(rd, Double, res);
            }
            Negs | Abss | Sqrts => {
                let v = ctx.load_reg(rt, Float);
                let op = match inst.opcode {
                    Negs => UnOp::FNeg32,
                    Abss => UnOp::FAbs32,
                    _ => UnOp::FSqrt32,
                };
                let res = ctx.un(op, v);
                let _ = ctx.store_reg(rs, Float, res);
            }
            Negd | Absd | Sqrtd => {
                let v = ctx.load_reg(rt, Double);
                let op = match inst.opcode {
                    Negd => UnOp::FNeg64,
                    Absd => UnOp::FAbs64,
                    _ => UnOp::FSqrt64,
                };
                let res = ctx.un(op, v);
                let _ = ctx.store_reg(rs, Double, res);
            }
            Madds | Msubs => {
                let a = ctx.load_reg(rs, Float);
                let b = ctx.load_reg(rt, Float);
                let c = ctx.load_reg(rv, Float);
                let prod = ctx.bin(BinOp::FMul32, a, b);
                let op = if inst.opcode == Madds { BinOp::FAdd32 } else { BinOp::FSub32 };
                let res = ctx.bin(op, prod, c);
                let _ = ctx.store_reg(rd, Float, res);
            }
            Maddd | Msubd => {
                let a = ctx.load_reg(rs, Double);
                let b = ctx.load_reg(rt, Double);
                let c = ctx.load_reg(rv, Double);
                let prod = ctx.bin(BinOp::FMul64, a, b);
                let op = if inst.opcode == Maddd { BinOp::FAdd64 } else { BinOp::FSub64 };
                let res = ctx.bin(op, prod, c);
                let _ = ctx.store_reg(rd, Double, res);
            }

            Ceqs | Colts | Cults | Coles | Cules | Cuns => {
                let a = ctx.load_reg(rs, Float);
                let b = ctx.load_reg(rt, Float);
                let op = match inst.opcode {
                    Ceqs => CmpOp::FOeq32,
                    Colts => CmpOp::FOlt32,
                    Cults => CmpOp::FUlt32,
                    Coles => CmpOp::FOle32,
                    Cules => CmpOp::FUle32,
                    _ => CmpOp::FUno32,
                };
                let res = ctx.cmp(op, a, b);
                let _ = ctx.store_reg(CC_REG, Int, res);
            }
            Ceqd | Cueqd | Coltd | Cultd | Coled | Culed | Cund => {
                let a = ctx.load_reg(rs, Double);
                let b = ctx.load_reg(rt, Double);
                let op = match inst.opcode {
                    Ceqd => CmpOp::FOeq64,
                    Cueqd => CmpOp::FUeq64,
                    Coltd => CmpOp::FOlt64,
                    Cultd => CmpOp::FUlt64,
                    Coled => CmpOp::FOle64,
                    Culed => CmpOp::FUle64,
                    _ => CmpOp::FUno64,
                };
                let res = ctx.cmp(op, a, b);
                let _ = ctx.store_reg(CC_REG, Int, res);
            }

            Ldc1 | Lwc1 => {
                let base = ctx.load_reg(rs, Int);
                let off = ctx.imm(imm);
                let addr = ctx.bin(BinOp::Add, base, off);
                if inst.opcode == Ldc1 {
                    let v = ctx.emit(Inst::Load {
                        width: MemWidth::Dword,
                        addr,
                    });
                    let _ = ctx.store_reg(rt, Int64, v);
                } else {
                    let v = ctx.emit(Inst::Load {
                        width: MemWidth::Word,
                        addr,
                    });
                    let _ = ctx.store_reg(rt, Float, v);
                }
            }
            Lwxc1 | Ldxc1 => {
                let a = ctx.load_reg(rs, Int);
                let b = ctx.load_reg(rt, Int);
                let addr = ctx.bin(BinOp::Add, a, b);
                if inst.opcode == Lwxc1 {
                    let v = ctx.emit(Inst::Load {
                        width: MemWidth::Word,
                        addr,
                    });
                    let _ = ctx.store_reg(rd, Float, v);
                } else {
                    let v = ctx.emit(Inst::Load {
                        width: MemWidth::Dword,
                        addr,
                    });
                    let _ = ctx.store_reg(rd, Int64, v);
                }
            }
            Swc1 => {
                let base = ctx.load_reg(rs, Int);
                let off = ctx.imm(imm);
                let addr = ctx.bin(BinOp::Add, base, off);
                // Raw word view of the FP slot, as the register model allows.
                let val = ctx.load_reg(FP_BASE + rt, Int);
                let _ = ctx.emit(Inst::Store {
                    width: MemWidth::Word,
                    addr,
                    val,
                });
            }
            Swxc1 => {
                let a = ctx.load_reg(rs, Int);
                let b = ctx.load_reg(rt, Int);
                let addr = ctx.bin(BinOp::Add, a, b);
                let val = ctx.load_reg(FP_BASE + rd, Int);
                let _ = ctx.emit(Inst::Store {
                    width: MemWidth::Word,
                    addr,
                    val,
                });
            }
            Sdc1 => {
                let base = ctx.load_reg(rs, Int);
                let off = ctx.imm(imm);
                let addr = ctx.bin(BinOp::Add, base, off);
                let val = ctx.load_reg(rt, Int64);
                let _ = ctx.emit(Inst::Store {
                    width: MemWidth::Dword,
                    addr,
                    val,
                });
            }
            Sdxc1 => {
                let a = ctx.load_reg(rs, Int);
                let b = ctx.load_reg(rt, Int);
                let addr = ctx.bin(BinOp::Add, a, b);
                let val = ctx.load_reg(FP_BASE + rd, Int64);
                let _ = ctx.emit(Inst::Store {
                    width: MemWidth::Dword,
                    addr,
                    val,
                });
            }

            Jeqz | Jnez => {
                let a = ctx.load_reg(rs, Int);
                let zero = ctx.imm(0);
                let op = if inst.opcode == Jeqz { CmpOp::Eq } else { CmpOp::Ne };
                let cond = ctx.cmp(op, a, zero);
                Self::cond_branch(ctx, pc, cond);
            }
            Jeq | Jne => {
                let a = ctx.load_reg(rs, Int);
                let b = ctx.load_reg(rt, Int);
                let op = if inst.opcode == Jeq { CmpOp::Eq } else { CmpOp::Ne };
                let cond = ctx.cmp(op, a, b);
                Self::cond_branch(ctx, pc, cond);
            }
            Jlez => {
                let x = ctx.load_reg(rt, Int);
                let zero = ctx.imm(0);
                let is_zero = ctx.cmp(CmpOp::Eq, x, zero);
                let signbit = ctx.imm(0x8000_0000);
                let sign = ctx.bin(BinOp::And, x, signbit);
                let zero2 = ctx.imm(0);
                let is_neg = ctx.cmp(CmpOp::Ne, sign, zero2);
                let cond = ctx.bin(BinOp::Or, is_zero, is_neg);
                Self::cond_branch(ctx, pc, cond);
            }
            Jgez | Jltz => {
                let x = ctx.load_reg(rt, Int);
                let signbit = ctx.imm(0x8000_0000);
                let sign = ctx.bin(BinOp::And, x, signbit);
                let zero = ctx.imm(0);
                let op = if inst.opcode == Jgez { CmpOp::Eq } else { CmpOp::Ne };
                let cond = ctx.cmp(op, sign, zero);
                Self::cond_branch(ctx, pc, cond);
            }
            Jgtz => {
                let x = ctx.load_reg(rt, Int);
                let signbit = ctx.imm(0x8000_0000);
                let sign = ctx.bin(BinOp::And, x, signbit);
                let zero = ctx.imm(0);
                let non_neg = ctx.cmp(CmpOp::Eq, sign, zero);
                let zero2 = ctx.imm(0);
                let non_zero = ctx.cmp(CmpOp::Ne, x, zero2);
                let cond = ctx.bin(BinOp::And, non_neg, non_zero);
                Self::cond_branch(ctx, pc, cond);
            }
            Bc1t | Bc1f => {
                let cc = ctx.load_reg(CC_REG, Int);
                let expect = ctx.imm(u32::from(inst.opcode == Bc1t));
                let cond = ctx.cmp(CmpOp::Eq, cc, expect);
                Self::cond_branch(ctx, pc, cond);
            }

            Jump => {
                let next = ctx.func.new_block();
                let br = ctx.emit(Inst::Br { target: next });
                let _ = ctx.ir_branch_map.insert(pc, br);
                ctx.cur = next;
            }
            Jumpr => {
                let target = ctx.load_reg(rt, Int);
                let ret = ctx.emit(Inst::Ret { val: target });
                let _ = ctx.ir_ibranch_map.insert(pc, ret);
                let next = ctx.func.new_block();
                ctx.cur = next;
            }
            Call => {
                let guest_target = (pc & 0xF000_0000) | (inst.addrs << 2);
                self.direct_transitions
                    .entry(region_entry)
                    .or_default()
                    .push(guest_target);

                let link = ctx.imm(pc.wrapping_add(4));
                let _ = ctx.store_reg(31, Int, link);

                if module.function_by_entry(guest_target).is_some() {
                    let pc_arg = ctx.imm(guest_target);
                    let next = ctx.emit(Inst::CallRegion {
                        entry: guest_target,
                        pc: pc_arg,
                    });
                    // The callee resumes interpretation somewhere; keep
                    // running natively only when it resumed exactly at our
                    // return address.
                    let expect = ctx.imm(pc.wrapping_add(4));
                    let ok_cond = ctx.cmp(CmpOp::Eq, expect, next);
                    let ok = ctx.func.new_block();
                    let wrong = ctx.func.new_block();
                    let _ = ctx.emit(Inst::CondBr {
                        cond: ok_cond,
                        taken: ok,
                        fallthrough: wrong,
                    });
                    ctx.cur = wrong;
                    let _ = ctx.emit(Inst::Ret { val: next });
                    ctx.cur = ok;
                } else {
                    let _ = self
                        .call_target_list
                        .entry(guest_target)
                        .or_default()
                        .insert(pc);
                    let after = ctx.func.new_block();
                    let br = ctx.emit(Inst::Br { target: after });
                    let _ = ctx.ir_branch_map.insert(pc, br);
                    ctx.cur = after;
                }
            }
            Callr => {
                let link = ctx.imm(pc.wrapping_add(4));
                let _ = ctx.store_reg(31, Int, link);
                let target = ctx.load_reg(rt, Int);
                if let Some(ret) = ctx.value_exit(target) {
                    let _ = ctx.ir_ibranch_map.insert(pc, ret);
                }
                let next = ctx.func.new_block();
                ctx.cur = next;
            }
            Ijmp => {
                let ij = ctx.load_reg(IJMP_REG, Int);
                let page_mask = ctx.imm(0xFFFF_F000);
                let page = ctx.bin(BinOp::And, ij, page_mask);
                let off = ctx.imm(imm & 0xFFF);
                let slot_base = ctx.bin(BinOp::Or, page, off);
                let _ = ctx.store_reg(IJMP_REG, Int, slot_base);
                let idx = ctx.load_reg(rt, Int);
                let ptr = ctx.bin(BinOp::Add, slot_base, idx);
                let target = ctx.emit(Inst::Load {
                    width: MemWidth::Word,
                    addr: ptr,
                });
                if let Some(ret) = ctx.value_exit(target) {
                    let _ = ctx.ir_ibranch_map.insert(pc, ret);
                }
                let next = ctx.func.new_block();
                ctx.cur = next;
            }

            Syscall => {
                // The interpreter performs the system call; hand the PC back.
                let v = ctx.imm(pc);
                let _ = ctx.emit(Inst::Ret { val: v });
                let next = ctx.func.new_block();
                ctx.cur = next;
            }

            Invalid => {
                return Err(Error::UnsupportedInst {
                    pc,
                    mnemonic: disasm::mnemonic(inst.opcode).to_string(),
                });
            }
        }
        Ok(())
    }
}
