//! Optimization pass registry and pipeline.
//!
//! `optimize` builds a function-pass pipeline from a pass-code list and runs
//! it over every function of a module. Pass codes arrive from the AOS solver
//! or its database; codes outside the enumeration are a configuration bug
//! and fail fatally at the conversion boundary.

use super::passes;
use super::IrModule;
use crate::common::{Error, Result};

/// Optimization pass codes.
///
/// The numbering is part of the AOS database format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum Pass {
    Dce = 0,
    SimplifyCfg = 1,
    Reassociate = 2,
    Gvn = 3,
    Die = 4,
    Mem2Reg = 5,
    Licm = 6,
    MemCpyOpt = 7,
    LoopUnswitch = 8,
    IndVars = 9,
    LoopDeletion = 10,
    LoopPredication = 11,
    LoopUnroll = 12,
    InstCombine = 13,
    Dse = 14,
    Adce = 15,
    LoopIdiom = 16,
    BasicAa = 17,
    DomTree = 18,
    LoopRotate = 19,
    None = 20,
}

impl Pass {
    /// All pass codes, in numbering order.
    pub const ALL: [Pass; 21] = [
        Pass::Dce,
        Pass::SimplifyCfg,
        Pass::Reassociate,
        Pass::Gvn,
        Pass::Die,
        Pass::Mem2Reg,
        Pass::Licm,
        Pass::MemCpyOpt,
        Pass::LoopUnswitch,
        Pass::IndVars,
        Pass::LoopDeletion,
        Pass::LoopPredication,
        Pass::LoopUnroll,
        Pass::InstCombine,
        Pass::Dse,
        Pass::Adce,
        Pass::LoopIdiom,
        Pass::BasicAa,
        Pass::DomTree,
        Pass::LoopRotate,
        Pass::None,
    ];

    /// The database/config code of this pass.
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for Pass {
    type Error = Error;

    fn try_from(code: u16) -> Result<Self> {
        Pass::ALL
            .get(code as usize)
            .copied()
            .ok_or(Error::InvalidPass(code))
    }
}

/// Optimization level of the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum OptLevel {
    /// Function-pass pipeline populated from the pass list.
    #[default]
    Basic,
}

/// Runs `pass_list` over every function in the module.
pub fn optimize(module: &mut IrModule, pass_list: &[Pass], level: OptLevel) {
    match level {
        OptLevel::Basic => {
            for func in &mut module.functions {
                for &pass in pass_list {
                    let _ = run_pass(pass, func);
                }
            }
        }
    }
}

/// Runs one pass over one function; returns whether anything changed.
pub fn run_pass(pass: Pass, func: &mut super::IrFunction) -> bool {
    match pass {
        Pass::Dce => passes::dce::run(func, passes::dce::Strength::Iterative),
        Pass::Die => passes::dce::run(func, passes::dce::Strength::Single),
        Pass::Adce => passes::dce::run(func, passes::dce::Strength::Aggressive),
        Pass::SimplifyCfg => passes::simplify_cfg::run(func),
        Pass::Reassociate => passes::instcombine::reassociate(func),
        Pass::InstCombine => passes::instcombine::run(func),
        Pass::Gvn => passes::gvn::run(func),
        Pass::Mem2Reg => passes::mem2reg::promote(func),
        Pass::Dse => passes::mem2reg::dse(func),
        Pass::MemCpyOpt => passes::mem2reg::forward_memory(func),
        Pass::Licm => passes::loops::licm(func),
        Pass::LoopDeletion => passes::loops::deletion(func),
        Pass::LoopRotate => passes::loops::rotate(func),
        Pass::LoopUnswitch => passes::loops::unswitch(func),
        Pass::LoopPredication => passes::loops::predication(func),
        Pass::LoopUnroll => passes::loops::unroll(func),
        Pass::LoopIdiom => passes::loops::idiom(func),
        Pass::IndVars => passes::loops::indvars(func),
        // Analysis requests; nothing to transform.
        Pass::BasicAa | Pass::DomTree | Pass::None => false,
    }
}
