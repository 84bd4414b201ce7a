//! Manager, code cache, and pipeline behavior.

use std::sync::Arc;
use std::time::Duration;

use mockall::mock;
use oidbt_core::aos::{AosSolver, Database, Dna, PoliticSolver};
use oidbt_core::common::BranchTargets;
use oidbt_core::config::OptPolitic;
use oidbt_core::ir::exec::{CompiledRegion, EvalBackend, JitBackend, RegionFn};
use oidbt_core::ir::opt::Pass;
use oidbt_core::ir::IrModule;
use oidbt_core::isa::encode;
use oidbt_core::machine::loader;
use oidbt_core::manager::{CodeCache, Manager};

use crate::common::{region_from, test_config};
use pretty_assertions::assert_eq;

#[test]
fn add_oi_region_is_idempotent() {
    let mut config = test_config();
    config.pipeline.num_threads = 0;
    let manager = Manager::new(&config);

    let region = region_from(0x1000, &[encode::add(3, 1, 2)]);
    assert!(manager.add_oi_region(0x1000, region.clone(), BranchTargets::new()));
    assert!(!manager.add_oi_region(0x1000, region, BranchTargets::new()));
    assert_eq!(manager.num_oi_regions(), 1);
    assert!(manager.is_region_entry(0x1000));
    assert!(!manager.is_native_region_entry(0x1000));
}

#[test]
fn code_cache_installs_each_entry_once() {
    let cache = CodeCache::new();
    let f: RegionFn = Arc::new(|_, _, pc| pc + 4);
    assert!(cache.install(CompiledRegion::new(0x1000, Arc::clone(&f))));
    assert!(!cache.install(CompiledRegion::new(0x1000, f)));
    assert_eq!(cache.len(), 1);
    assert!(cache.contains(0x1000));
    assert!(cache.lookup(0x1000).is_some());
}

#[test]
fn code_cache_rejects_slot_collisions() {
    use oidbt_core::manager::NATIVE_REGION_SIZE;
    let cache = CodeCache::new();
    let f: RegionFn = Arc::new(|_, _, pc| pc);
    let other = 0x10u32 + NATIVE_REGION_SIZE as u32;
    assert!(cache.install(CompiledRegion::new(0x10, f)));
    // Same slot, different guest PC: visible as occupied, but never
    // dispatched to the wrong region.
    assert!(cache.contains(other));
    assert!(cache.lookup(other).is_none());
    assert!(cache.lookup(0x10).is_some());
}

#[test]
fn pipeline_compiles_and_dispatches() {
    let config = test_config();
    let manager = Manager::new(&config);
    let region = region_from(0x1000, &[encode::add(3, 1, 2)]);

    assert!(manager.add_oi_region(0x1000, region.clone(), BranchTargets::new()));
    manager.drain();

    assert!(manager.is_native_region_entry(0x1000));
    assert_eq!(manager.num_oi_regions(), 0);
    assert_eq!(manager.compiled_entries(), vec![0x1000]);
    assert_eq!(manager.compiled_oi_region(0x1000), Some(region));

    let mut machine = loader::load_flat(&[encode::add(3, 1, 2)], 0x1000, &config);
    machine.set_register(1, 30);
    machine.set_register(2, 12);
    assert_eq!(manager.jump_to_region(0x1000, &mut machine), 0x1004);
    assert_eq!(machine.register(3), 42);

    let stats = manager.stats();
    assert_eq!(stats.compiled_regions, 1);
    assert_eq!(stats.oi_compiled, 1);
    assert!(stats.native_compiled > 0);
}

struct FailingBackend;

impl JitBackend for FailingBackend {
    fn compile(&self, _module: IrModule) -> Result<RegionFn, String> {
        Err("no codegen for this target".into())
    }
}

#[test]
fn backend_failure_drops_the_region_quietly() {
    let config = test_config();
    let manager = Manager::with_parts(
        &config,
        Box::new(FailingBackend),
        Box::new(PoliticSolver::new(OptPolitic::Normal)),
    );

    let region = region_from(0x1000, &[encode::add(3, 1, 2)]);
    assert!(manager.add_oi_region(0x1000, region, BranchTargets::new()));
    manager.drain();

    assert!(!manager.is_native_region_entry(0x1000));
    assert_eq!(manager.num_oi_regions(), 0);
    assert_eq!(manager.stats().compiled_regions, 0);
}

mock! {
    Solver {}

    impl AosSolver for Solver {
        fn solve(
            &mut self,
            dna: &Dna,
            module: &IrModule,
        ) -> oidbt_core::common::Result<Vec<Pass>>;
        fn record(
            &mut self,
            dna: &Dna,
            passes: &[Pass],
            compile_time: Duration,
            exec_time: Duration,
        );
        fn database(&self) -> &Database;
    }
}

#[test]
fn solver_is_consulted_once_per_region_and_outcomes_recorded() {
    let mut solver = MockSolver::new();
    solver
        .expect_solve()
        .times(1)
        .returning(|_, _| Ok(vec![Pass::Mem2Reg, Pass::Dce]));
    solver.expect_record().times(1).return_const(());

    let config = test_config();
    let manager = Manager::with_parts(&config, Box::new(EvalBackend), Box::new(solver));

    let region = region_from(0x2000, &[encode::addi(1, 1, 5)]);
    assert!(manager.add_oi_region(0x2000, region, BranchTargets::new()));
    manager.drain();
    assert!(manager.is_native_region_entry(0x2000));
}
