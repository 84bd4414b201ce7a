//! Top-level simulator.
//!
//! Owns the guest machine, the formation unit, and the manager side by
//! side, and drives the interpret → observe → dispatch loop until the guest
//! exits.

use crate::common::Result;
use crate::config::Config;
use crate::machine::{Machine, StepEvent};
use crate::manager::Manager;
use crate::rft::Net;

/// Simulator: machine + region formation + pipeline manager.
#[derive(Debug)]
pub struct Simulator {
    /// Guest machine state.
    pub machine: Machine,
    /// Region-formation unit observing branches.
    pub net: Net,
    /// Pipeline manager and code cache.
    pub manager: Manager,
}

impl Simulator {
    /// Builds a simulator around an already-loaded machine.
    pub fn new(machine: Machine, config: &Config) -> Self {
        let manager = Manager::new(config);
        manager.set_methods(machine.methods().clone());
        Self {
            machine,
            net: Net::new(&config.formation),
            manager,
        }
    }

    /// Executes one instruction, feeding branches to region formation.
    ///
    /// Returns the guest exit status once the program exits.
    pub fn step(&mut self) -> Result<Option<u32>> {
        match self.machine.step()? {
            StepEvent::Continue => Ok(None),
            StepEvent::Branch => {
                self.net.on_branch(&mut self.machine, &self.manager)?;
                Ok(None)
            }
            StepEvent::Exited(status) => Ok(Some(status)),
        }
    }

    /// Runs until the guest exits; returns its exit status.
    pub fn run(&mut self) -> Result<u32> {
        loop {
            if let Some(status) = self.step()? {
                return Ok(status);
            }
        }
    }

    /// Runs until the guest exits or `max_steps` instructions retire.
    pub fn run_for(&mut self, max_steps: u64) -> Result<Option<u32>> {
        for _ in 0..max_steps {
            if let Some(status) = self.step()? {
                return Ok(Some(status));
            }
        }
        Ok(None)
    }
}
