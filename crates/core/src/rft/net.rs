//! NET (*Next Executing Tail*) region formation.
//!
//! Called after every interpreted branch. Cold backward-branch targets
//! accumulate hotness; crossing the threshold starts recording. While
//! recording, the straight-line bytes between the previous branch target
//! and the last executed PC extend the region until a stop condition closes
//! it: a repeated address (relaxed mode), a backward branch (strict mode),
//! or an address already belonging to another region. Native entries are
//! dispatched to directly.

use std::collections::{HashMap, HashSet};

use crate::common::{BranchTargets, OiInstList, Result};
use crate::config::{FormationConfig, FormationPolicy};
use crate::isa::{decode, is_control_flow, possible_targets};
use crate::machine::Machine;
use crate::manager::Manager;

/// NET formation state.
#[derive(Debug)]
pub struct Net {
    hotness_threshold: u32,
    region_limit: usize,
    relaxed: bool,
    policy: FormationPolicy,

    recording: bool,
    entry_pc: u32,
    region: OiInstList,
    recorded: HashSet<u32>,
    exec_freq: HashMap<u32, u32>,
    last_target: u32,
}

impl Net {
    /// Creates a formation unit from configuration.
    pub fn new(config: &FormationConfig) -> Self {
        Self {
            hotness_threshold: config.hotness_threshold,
            region_limit: config.region_limit_size,
            relaxed: config.relaxed,
            policy: config.policy,
            recording: false,
            entry_pc: 0,
            region: Vec::new(),
            recorded: HashSet::new(),
            exec_freq: HashMap::new(),
            last_target: 0,
        }
    }

    /// Whether a recording is in progress.
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Observed execution count of a branch target.
    pub fn exec_freq(&self, pc: u32) -> u32 {
        self.exec_freq.get(&pc).copied().unwrap_or(0)
    }

    /// Observes the branch the machine just took.
    ///
    /// `machine.last_pc()` is the branch instruction; `machine.pc()` is its
    /// destination. May hand a finished region to the manager and may
    /// redirect the machine into compiled code.
    pub fn on_branch(&mut self, machine: &mut Machine, manager: &Manager) -> Result<()> {
        if self.recording {
            let backward = machine.pc() < machine.last_pc();
            let mut addr = self.last_target;
            while addr <= machine.last_pc() {
                if (self.relaxed && self.recorded.contains(&addr))
                    || (!self.relaxed && backward)
                    || manager.is_region_entry(addr)
                {
                    self.finish_region_formation(manager);
                    break;
                }

                let word = machine.inst_at(addr)?;
                self.insert_instruction(addr, word);

                if self.policy == FormationPolicy::Limited && self.region.len() >= self.region_limit
                {
                    self.finish_region_formation(manager);
                    break;
                }
                addr = addr.wrapping_add(4);
            }
        } else if machine.pc() < machine.last_pc() && !manager.is_region_entry(machine.pc()) {
            let freq = self.exec_freq.entry(machine.pc()).or_insert(0);
            *freq += 1;
            if *freq > self.hotness_threshold {
                self.start_region_formation(machine.pc());
            }
        }

        if manager.is_native_region_entry(machine.pc()) {
            if self.recording {
                self.finish_region_formation(manager);
            }

            let next = manager.jump_to_region(machine.pc(), machine);
            machine.set_pc(next);

            let freq = self.exec_freq.entry(next).or_insert(0);
            *freq += 1;
            if *freq > self.hotness_threshold {
                self.start_region_formation(next);
            }
        }

        self.last_target = machine.pc();
        Ok(())
    }

    fn start_region_formation(&mut self, pc: u32) {
        tracing::debug!(entry = format_args!("{pc:#x}"), "region formation started");
        self.recording = true;
        self.entry_pc = pc;
        self.region.clear();
        self.recorded.clear();
    }

    fn insert_instruction(&mut self, pc: u32, word: u32) {
        self.region.push((pc, word));
        let _ = self.recorded.insert(pc);
    }

    /// Transfers the recorded buffer and its branch-target map to the
    /// manager and clears the recording state.
    fn finish_region_formation(&mut self, manager: &Manager) {
        if !self.region.is_empty() {
            let mut targets = BranchTargets::new();
            for &(pc, word) in &self.region {
                let inst = decode(word);
                if is_control_flow(&inst) {
                    let _ = targets.insert(pc, possible_targets(pc, &inst));
                }
            }
            let region = std::mem::take(&mut self.region);
            let inserted = manager.add_oi_region(self.entry_pc, region, targets);
            if inserted {
                tracing::debug!(
                    entry = format_args!("{:#x}", self.entry_pc),
                    "region handed to pipeline"
                );
            }
        }
        self.recording = false;
        self.entry_pc = 0;
        self.region.clear();
        self.recorded.clear();
    }
}
