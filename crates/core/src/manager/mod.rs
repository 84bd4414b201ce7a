//! Region manager and compilation pipeline.
//!
//! The manager owns every region-shaped piece of shared state and the
//! background workers that move regions through it:
//! 1. **Region tables:** Pending regions (`OIRegions`) and installed
//!    regions (`CompiledOIRegions`) behind separate locks, plus the
//!    per-region branch-target maps.
//! 2. **Code cache:** The atomic dispatch table of native entries.
//! 3. **Pipeline:** Worker threads performing lift → solve → optimize →
//!    compile → install, with cooperative shutdown.
//! 4. **Dispatch:** `jump_to_region` runs installed code against the
//!    machine and returns the resume PC.

/// Code cache (native dispatch table).
pub mod cache;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use crate::aos::{AosSolver, Dna, PoliticSolver};
use crate::common::{BranchTargets, Error, OiInstList};
use crate::config::Config;
use crate::ir::emitter::RegionEmitter;
use crate::ir::exec::{CompiledRegion, EvalBackend, JitBackend};
use crate::ir::opt::{optimize, OptLevel};
use crate::ir::IrModule;
use crate::machine::{Machine, MethodMap};
use crate::stats::DbtStats;

pub use cache::{CodeCache, NATIVE_REGION_SIZE};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(std::sync::PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(std::sync::PoisonError::into_inner)
}

struct Shared {
    oi_regions: RwLock<HashMap<u32, OiInstList>>,
    br_targets: RwLock<HashMap<u32, BranchTargets>>,
    compiled_oi_regions: RwLock<HashMap<u32, OiInstList>>,

    queue: Mutex<VecDeque<u32>>,
    queue_cv: Condvar,
    idle_cv: Condvar,
    in_flight: AtomicUsize,

    cache: CodeCache,
    emitter: Mutex<RegionEmitter>,
    solver: Mutex<Box<dyn AosSolver>>,
    backend: Box<dyn JitBackend>,
    methods: RwLock<MethodMap>,
    stats: Mutex<DbtStats>,

    verbose: bool,
    is_running: AtomicBool,
    is_finished: AtomicBool,
    workers_alive: AtomicUsize,
}

/// Pipeline orchestrator: region storage, code cache, and workers.
pub struct Manager {
    shared: Arc<Shared>,
    workers: Vec<std::thread::JoinHandle<()>>,
    num_threads: usize,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("num_threads", &self.num_threads)
            .finish_non_exhaustive()
    }
}

impl Manager {
    /// Creates a manager with the in-tree backend and the politic solver,
    /// spawning the configured number of workers.
    pub fn new(config: &Config) -> Self {
        Self::with_parts(
            config,
            Box::new(EvalBackend),
            Box::new(PoliticSolver::new(config.pipeline.politic)),
        )
    }

    /// Creates a manager over an explicit backend and solver.
    pub fn with_parts(
        config: &Config,
        backend: Box<dyn JitBackend>,
        solver: Box<dyn AosSolver>,
    ) -> Self {
        let num_threads = config.pipeline.num_threads;
        let shared = Arc::new(Shared {
            oi_regions: RwLock::new(HashMap::new()),
            br_targets: RwLock::new(HashMap::new()),
            compiled_oi_regions: RwLock::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            queue_cv: Condvar::new(),
            idle_cv: Condvar::new(),
            in_flight: AtomicUsize::new(0),
            cache: CodeCache::new(),
            emitter: Mutex::new(RegionEmitter::new()),
            solver: Mutex::new(solver),
            backend,
            methods: RwLock::new(MethodMap::default()),
            stats: Mutex::new(DbtStats::default()),
            verbose: config.pipeline.verbose,
            is_running: AtomicBool::new(true),
            is_finished: AtomicBool::new(false),
            workers_alive: AtomicUsize::new(num_threads),
        });

        let mut workers = Vec::with_capacity(num_threads);
        for id in 0..num_threads {
            let shared = Arc::clone(&shared);
            workers.push(
                std::thread::Builder::new()
                    .name(format!("oidbt-worker-{id}"))
                    .spawn(move || run_pipeline(&shared))
                    .unwrap_or_else(|e| panic!("failed to spawn pipeline worker: {e}")),
            );
        }

        Self {
            shared,
            workers,
            num_threads,
        }
    }

    /// Shares the guest function-boundary map with the pipeline.
    pub fn set_methods(&self, methods: MethodMap) {
        *write(&self.shared.methods) = methods;
    }

    /// Number of background workers.
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Atomically inserts a region if it is not already known; wakes the
    /// workers. Returns `true` on insert.
    pub fn add_oi_region(&self, entry: u32, region: OiInstList, targets: BranchTargets) -> bool {
        {
            let mut pending = write(&self.shared.oi_regions);
            if pending.contains_key(&entry)
                || read(&self.shared.compiled_oi_regions).contains_key(&entry)
                || self.shared.cache.contains(entry)
            {
                return false;
            }
            let _ = pending.insert(entry, region);
            let _ = write(&self.shared.br_targets).insert(entry, targets);
        }
        lock(&self.shared.queue).push_back(entry);
        self.shared.queue_cv.notify_one();
        true
    }

    /// Whether `pc` is a known region entry (pending or native).
    pub fn is_region_entry(&self, pc: u32) -> bool {
        read(&self.shared.oi_regions).contains_key(&pc) || self.shared.cache.contains(pc)
    }

    /// Whether `pc` has installed native code.
    #[inline]
    pub fn is_native_region_entry(&self, pc: u32) -> bool {
        self.shared.cache.contains(pc)
    }

    /// Runs the installed region for `pc` against the machine and returns
    /// the guest PC at which interpretation must resume.
    pub fn jump_to_region(&self, pc: u32, machine: &mut Machine) -> u32 {
        match self.shared.cache.lookup(pc) {
            Some(region) => {
                let (regs, mem) = machine.state_mut();
                region.call(regs, mem, pc)
            }
            None => pc,
        }
    }

    /// Number of regions waiting for (or in) compilation.
    pub fn num_oi_regions(&self) -> usize {
        read(&self.shared.oi_regions).len()
    }

    /// Entry addresses of every installed region.
    pub fn compiled_entries(&self) -> Vec<u32> {
        read(&self.shared.compiled_oi_regions).keys().copied().collect()
    }

    /// The recorded instruction list of an installed region.
    pub fn compiled_oi_region(&self, entry: u32) -> Option<OiInstList> {
        read(&self.shared.compiled_oi_regions).get(&entry).cloned()
    }

    /// Average pending-region length in instructions.
    pub fn avg_region_size(&self) -> f64 {
        let pending = read(&self.shared.oi_regions);
        if pending.is_empty() {
            return 0.0;
        }
        let total: usize = pending.values().map(Vec::len).sum();
        total as f64 / pending.len() as f64
    }

    /// Whether `pc` is covered by any pending region's instruction list.
    pub fn in_code_cache(&self, pc: u32) -> bool {
        read(&self.shared.oi_regions)
            .values()
            .any(|region| region.iter().any(|&(addr, _)| addr == pc))
    }

    /// Direct call targets recorded while lifting the region at `entry`.
    pub fn direct_transitions(&self, entry: u32) -> Vec<u32> {
        lock(&self.shared.emitter).direct_transitions(entry)
    }

    /// Snapshot of the pipeline counters.
    pub fn stats(&self) -> DbtStats {
        lock(&self.shared.stats).clone()
    }

    /// Persists the solver's outcome database.
    pub fn save_aos_database(&self, path: &std::path::Path) -> crate::common::Result<()> {
        lock(&self.shared.solver).database().save(path)
    }

    /// Whether every worker has exited.
    pub fn is_finished(&self) -> bool {
        self.shared.is_finished.load(Ordering::Acquire)
    }

    /// Blocks until the pipeline has no pending or in-flight regions.
    ///
    /// Meaningful only with at least one worker.
    pub fn drain(&self) {
        let mut queue = lock(&self.shared.queue);
        while !queue.is_empty() || self.shared.in_flight.load(Ordering::Acquire) != 0 {
            let (q, _) = self
                .shared
                .idle_cv
                .wait_timeout(queue, Duration::from_millis(10))
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            queue = q;
        }
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.shared.is_running.store(false, Ordering::Release);
        self.shared.queue_cv.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
        self.shared.is_finished.store(true, Ordering::Release);
        lock(&self.shared.stats).report();
    }
}

/// Worker loop: pull pending entries (FIFO) and push each through
/// lift → solve → optimize → compile → install.
fn run_pipeline(shared: &Shared) {
    loop {
        let entry = {
            let mut queue = lock(&shared.queue);
            loop {
                if let Some(entry) = queue.pop_front() {
                    let _ = shared.in_flight.fetch_add(1, Ordering::AcqRel);
                    break entry;
                }
                if !shared.is_running.load(Ordering::Acquire) {
                    drop(queue);
                    finish_worker(shared);
                    return;
                }
                let (q, _) = shared
                    .queue_cv
                    .wait_timeout(queue, Duration::from_millis(50))
                    .unwrap_or_else(std::sync::PoisonError::into_inner);
                queue = q;
            }
        };

        process_region(shared, entry);

        let _ = shared.in_flight.fetch_sub(1, Ordering::AcqRel);
        shared.idle_cv.notify_all();
    }
}

fn finish_worker(shared: &Shared) {
    if shared.workers_alive.fetch_sub(1, Ordering::AcqRel) == 1 {
        shared.is_finished.store(true, Ordering::Release);
    }
}

fn process_region(shared: &Shared, entry: u32) {
    let Some(region) = read(&shared.oi_regions).get(&entry).cloned() else {
        return;
    };
    let methods = read(&shared.methods).clone();

    let started = Instant::now();
    let mut module = IrModule::default();
    let lifted = lock(&shared.emitter).emit_region(&[entry], &region, &methods, &mut module);
    if let Err(err) = lifted {
        if matches!(err, Error::UnsupportedInst { .. }) {
            // The lifted function would be incorrect; this cannot be
            // skipped.
            tracing::error!(%err, "fatal lift failure");
            std::process::exit(1);
        }
        tracing::warn!(entry = format_args!("{entry:#x}"), %err, "region dropped");
        let _ = write(&shared.oi_regions).remove(&entry);
        return;
    }

    let dna = Dna::of_region(entry, &region);
    let passes = match lock(&shared.solver).solve(&dna, &module) {
        Ok(passes) => passes,
        Err(err) => {
            tracing::error!(%err, "fatal pass-schedule failure");
            std::process::exit(1);
        }
    };

    let lifted_size = module.live_inst_count();
    optimize(&mut module, &passes, OptLevel::Basic);
    let optimized_size = module.live_inst_count();
    let compile_time = started.elapsed();

    match shared.backend.compile(module) {
        Ok(func) => {
            let _ = shared.cache.install(CompiledRegion::new(entry, func));
            if let Some(region) = write(&shared.oi_regions).remove(&entry) {
                let _ = write(&shared.compiled_oi_regions).insert(entry, region);
            }

            let mut stats = lock(&shared.stats);
            stats.compiled_regions += 1;
            stats.oi_compiled += region.len() as u64;
            stats.native_compiled += optimized_size as u64;
            if lifted_size > 0 {
                stats.opt_size_ratio_sum += optimized_size as f64 / lifted_size as f64;
            }
            drop(stats);

            lock(&shared.solver).record(&dna, &passes, compile_time, Duration::ZERO);

            if shared.verbose {
                tracing::info!(
                    entry = format_args!("{entry:#x}"),
                    insts = region.len(),
                    ir_before = lifted_size,
                    ir_after = optimized_size,
                    compile_ms = compile_time.as_secs_f64() * 1e3,
                    "region installed"
                );
            }
        }
        Err(reason) => {
            // Recoverable: interpretation keeps running this region.
            tracing::warn!(
                entry = format_args!("{entry:#x}"),
                %reason,
                "backend failed; region dropped"
            );
            let _ = write(&shared.oi_regions).remove(&entry);
        }
    }
}
