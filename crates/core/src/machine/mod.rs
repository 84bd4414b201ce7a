//! Guest machine state.
//!
//! This module defines the central `Machine` structure holding all guest
//! architectural state, plus:
//! 1. **Interpretation:** Sequential single-step execution (`interp`).
//! 2. **Syscalls:** The Linux emulation bridge (`syscall`).
//! 3. **Loading:** ELF and flat-image loaders (`loader`).

/// Sequential interpreter.
pub mod interp;
/// Guest binary loading.
pub mod loader;
/// Linux syscall emulation.
pub mod syscall;

use crate::common::{Error, GuestMemory, RegisterBank, Result};
use crate::config::Config;
use crate::isa::INST_SIZE;

/// Map from guest PCs to the entry of the containing guest function.
///
/// Populated from the guest binary's symbol table; consulted by the lifter's
/// indirect-return speculation.
#[derive(Debug, Default, Clone)]
pub struct MethodMap {
    // (start, end) half-open, sorted by start.
    ranges: Vec<(u32, u32)>,
}

impl MethodMap {
    /// Registers a function covering `[start, end)`.
    pub fn add(&mut self, start: u32, end: u32) {
        let pos = self.ranges.partition_point(|&(s, _)| s < start);
        self.ranges.insert(pos, (start, end));
    }

    /// Returns the entry of the function containing `pc`, or 0 if unknown.
    pub fn find(&self, pc: u32) -> u32 {
        let idx = self.ranges.partition_point(|&(s, _)| s <= pc);
        if idx == 0 {
            return 0;
        }
        let (start, end) = self.ranges[idx - 1];
        if pc < end { start } else { 0 }
    }
}

/// Result of one interpreted step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepEvent {
    /// A non-branch instruction retired.
    Continue,
    /// A control-flow instruction retired; the formation unit should observe
    /// the new PC.
    Branch,
    /// The guest requested exit with the given status.
    Exited(u32),
}

/// Guest machine: register bank, data memory, code image, and PC state.
#[derive(Debug)]
pub struct Machine {
    /// Unified guest register bank.
    pub regs: RegisterBank,
    /// Guest data memory.
    pub mem: GuestMemory,
    code: Vec<u32>,
    code_base: u32,
    pc: u32,
    last_pc: u32,
    methods: MethodMap,
}

impl Machine {
    /// Creates a machine with zeroed registers and empty code.
    pub fn new(config: &Config) -> Self {
        Self {
            regs: RegisterBank::new(),
            mem: GuestMemory::new(config.machine.mem_size, config.machine.data_mem_offset),
            code: Vec::new(),
            code_base: 0,
            pc: 0,
            last_pc: 0,
            methods: MethodMap::default(),
        }
    }

    /// Current program counter.
    #[inline]
    pub fn pc(&self) -> u32 {
        self.pc
    }

    /// Redirects execution to `pc`.
    #[inline]
    pub fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
    }

    /// Address of the most recently executed instruction.
    #[inline]
    pub fn last_pc(&self) -> u32 {
        self.last_pc
    }

    /// Reads integer register `idx`.
    #[inline]
    pub fn register(&self, idx: u16) -> u32 {
        self.regs.read(idx)
    }

    /// Writes integer register `idx`.
    #[inline]
    pub fn set_register(&mut self, idx: u16, val: u32) {
        self.regs.write(idx, val);
    }

    /// The guest address where data memory begins.
    #[inline]
    pub fn data_mem_offset(&self) -> u32 {
        self.mem.data_mem_offset()
    }

    /// Fetches the raw instruction word at `pc`.
    pub fn inst_at(&self, pc: u32) -> Result<u32> {
        let off = pc.wrapping_sub(self.code_base) / INST_SIZE;
        self.code
            .get(off as usize)
            .copied()
            .ok_or(Error::BadFetch(pc))
    }

    /// Entry of the guest function containing `pc`, or 0 if unknown.
    pub fn find_method(&self, pc: u32) -> u32 {
        self.methods.find(pc)
    }

    /// The function-boundary map loaded from the guest binary.
    pub fn methods(&self) -> &MethodMap {
        &self.methods
    }

    /// Splits the machine into the state a compiled region runs against.
    #[inline]
    pub fn state_mut(&mut self) -> (&mut RegisterBank, &mut GuestMemory) {
        (&mut self.regs, &mut self.mem)
    }

    /// Installs the code image: `words` fetched from `base` upward.
    pub fn install_code(&mut self, base: u32, words: Vec<u32>) {
        self.code_base = base;
        self.code = words;
    }

    /// Replaces the function-boundary map.
    pub fn install_methods(&mut self, methods: MethodMap) {
        self.methods = methods;
    }

    pub(crate) fn retire(&mut self, executed_pc: u32, next_pc: u32) {
        self.last_pc = executed_pc;
        self.pc = next_pc;
    }
}
