//! Pass-schedule solvers.
//!
//! A solver decides which optimization passes a region gets. The contract
//! is small: deterministic for a given fingerprint, legal pass codes only,
//! and free to consult previous outcomes.

use std::time::Duration;

use super::database::{Data, Database};
use super::Dna;
use crate::common::Result;
use crate::config::OptPolitic;
use crate::ir::opt::Pass;
use crate::ir::IrModule;

/// Pass-schedule selection policy.
pub trait AosSolver: Send {
    /// Chooses the pass schedule for a region. Must be deterministic for a
    /// given `dna`.
    fn solve(&mut self, dna: &Dna, module: &IrModule) -> Result<Vec<Pass>>;

    /// Records a measured outcome for a schedule.
    fn record(&mut self, dna: &Dna, passes: &[Pass], compile_time: Duration, exec_time: Duration);

    /// The solver's current database (for persistence).
    fn database(&self) -> &Database;
}

/// Default solver: reuse the database's previous schedule for a known
/// fingerprint, otherwise derive one from the optimization politic.
#[derive(Debug)]
pub struct PoliticSolver {
    politic: OptPolitic,
    db: Database,
}

impl PoliticSolver {
    /// Creates a solver with an empty database.
    pub fn new(politic: OptPolitic) -> Self {
        Self {
            politic,
            db: Database::new(),
        }
    }

    /// Creates a solver over a previously persisted database.
    pub fn with_database(politic: OptPolitic, db: Database) -> Self {
        Self { politic, db }
    }

    /// The politic's baseline schedule.
    fn default_passes(politic: OptPolitic) -> Vec<Pass> {
        match politic {
            OptPolitic::None => Vec::new(),
            OptPolitic::Normal => vec![
                Pass::Mem2Reg,
                Pass::Dce,
                Pass::SimplifyCfg,
                Pass::InstCombine,
            ],
            OptPolitic::Aggressive => vec![
                Pass::Mem2Reg,
                Pass::Gvn,
                Pass::Reassociate,
                Pass::InstCombine,
                Pass::Dce,
                Pass::SimplifyCfg,
                Pass::Licm,
                Pass::Dse,
                Pass::Adce,
            ],
        }
    }
}

impl AosSolver for PoliticSolver {
    fn solve(&mut self, dna: &Dna, _module: &IrModule) -> Result<Vec<Pass>> {
        if let Some(data) = self.db.get(dna.as_str()) {
            return data
                .set_opts
                .iter()
                .map(|&code| Pass::try_from(code))
                .collect();
        }
        Ok(Self::default_passes(self.politic))
    }

    fn record(&mut self, dna: &Dna, passes: &[Pass], compile_time: Duration, exec_time: Duration) {
        self.db.insert(Data {
            dna: dna.as_str().to_string(),
            set_opts: passes.iter().map(|p| p.code()).collect(),
            compile_time: compile_time.as_secs_f64(),
            exec_time: exec_time.as_secs_f64(),
        });
    }

    fn database(&self) -> &Database {
        &self.db
    }
}
