//! Configuration system for the translator.
//!
//! This module defines all configuration structures and enums used to
//! parameterize the translator. It provides:
//! 1. **Defaults:** Baseline constants (memory size, hotness threshold,
//!    region limit, code-cache size).
//! 2. **Structures:** Hierarchical config for the guest machine, region
//!    formation, and the compilation pipeline.
//! 3. **Enums:** Optimization politic and formation policy.
//!
//! Configuration is supplied as JSON (`--config` on the CLI) or built with
//! `Config::default()`.

use serde::Deserialize;

/// Default configuration constants for the translator.
mod defaults {
    /// Guest data-memory size (64 MiB).
    pub const MEM_SIZE: usize = 64 * 1024 * 1024;

    /// Guest address where the data-memory buffer begins.
    ///
    /// Guest addresses are translated by subtracting this offset before
    /// indexing the buffer.
    pub const DATA_MEM_OFFSET: u32 = 0x1000_0000;

    /// Number of times a backward-branch target must be observed before a
    /// region is recorded at it.
    pub const HOTNESS_THRESHOLD: u32 = 50;

    /// Maximum number of instructions recorded into one region under the
    /// limited formation policy.
    pub const REGION_LIMIT_SIZE: usize = 512;

    /// Number of background compilation workers.
    pub const NUM_THREADS: usize = 1;
}

/// Optimization politic: how aggressively the default solver schedules
/// passes when the database has no better answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptPolitic {
    /// No optimization; lifted IR is compiled as-is.
    None,
    /// A small scalar pipeline.
    #[default]
    Normal,
    /// The full scalar pipeline plus loop passes.
    Aggressive,
}

/// Region-formation sizing policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormationPolicy {
    /// Regions grow until a stop condition ends them.
    #[default]
    Unlimited,
    /// Recording stops and finalizes once the buffer reaches
    /// `region_limit_size` instructions.
    Limited,
}

/// Guest machine configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Guest data-memory size in bytes.
    pub mem_size: usize,
    /// Guest address of the start of data memory.
    pub data_mem_offset: u32,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            mem_size: defaults::MEM_SIZE,
            data_mem_offset: defaults::DATA_MEM_OFFSET,
        }
    }
}

/// Region-formation configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FormationConfig {
    /// Hotness threshold for promoting a branch target to a region entry.
    pub hotness_threshold: u32,
    /// Region size cap applied under [`FormationPolicy::Limited`].
    pub region_limit_size: usize,
    /// Relaxed mode: recording stops on a repeated address (self-loop)
    /// instead of on any backward branch.
    pub relaxed: bool,
    /// Sizing policy.
    pub policy: FormationPolicy,
}

impl Default for FormationConfig {
    fn default() -> Self {
        Self {
            hotness_threshold: defaults::HOTNESS_THRESHOLD,
            region_limit_size: defaults::REGION_LIMIT_SIZE,
            relaxed: false,
            policy: FormationPolicy::Unlimited,
        }
    }
}

/// Compilation pipeline configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Number of background compilation workers. Zero disables background
    /// compilation entirely (pure interpretation).
    pub num_threads: usize,
    /// Optimization politic used by the default solver.
    pub politic: OptPolitic,
    /// Emit per-region lifecycle logging.
    pub verbose: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_threads: defaults::NUM_THREADS,
            politic: OptPolitic::Normal,
            verbose: false,
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Guest machine parameters.
    pub machine: MachineConfig,
    /// Region-formation parameters.
    pub formation: FormationConfig,
    /// Pipeline parameters.
    pub pipeline: PipelineConfig,
}
