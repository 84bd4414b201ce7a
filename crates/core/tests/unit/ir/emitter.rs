//! Region lifting semantics.
//!
//! Every test drives the lifted function through the evaluating backend and
//! checks guest-visible state against the interpreter's semantics.

use oidbt_core::common::{GuestMemory, RegisterBank};
use oidbt_core::config::Config;
use oidbt_core::ir::emitter::RegionEmitter;
use oidbt_core::ir::exec::{run_function, validate, EvalBackend, JitBackend};
use oidbt_core::ir::{Inst, IrModule};
use oidbt_core::isa::encode::{self, enc_i, enc_r4};
use oidbt_core::isa::opcode::major;
use oidbt_core::machine::{loader, MethodMap, StepEvent};

use crate::common::{bank_snapshot, lift_region, region_from, test_config, CODE_BASE};
use pretty_assertions::assert_eq;

fn fresh_state() -> (RegisterBank, GuestMemory) {
    (RegisterBank::new(), GuestMemory::new(0x1_0000, 0x1000_0000))
}

#[test]
fn single_add_region() {
    let region = region_from(0x1000, &[encode::add(3, 1, 2)]);
    let (module, func) = lift_region(0x1000, &region);
    let (mut regs, mut mem) = fresh_state();
    regs.write(1, 7);
    regs.write(2, 5);
    let next = run_function(&module, func, &mut regs, &mut mem, 0x1000);
    assert_eq!(next, 0x1004);
    assert_eq!(regs.read(3), 12);
}

#[test]
fn straight_line_lift_matches_the_interpreter() {
    let config = Config {
        machine: oidbt_core::config::MachineConfig {
            mem_size: 0x1_0000,
            data_mem_offset: 0x1000_0000,
        },
        ..Config::default()
    };
    let program = [
        enc_i(major::STW, 1, 3, 0x40),
        enc_i(major::LDH, 1, 5, 0x40),
        enc_i(major::XORI, 3, 6, 0x3FF),
        enc_r4(major::MUL, 3, 4, 7, 8),
        encode::sub(9, 7, 5),
        encode::addi(10, 4, -100),
    ];
    let scratch = 0x1000_2000u32;
    let preset = |machine: &mut oidbt_core::Machine| {
        machine.set_register(1, scratch);
        machine.set_register(3, 0x1234_5678);
        machine.set_register(4, -5i32 as u32);
    };

    // Interpreted run.
    let mut interp = loader::load_flat(&program, 0x1000_1000, &config);
    preset(&mut interp);
    for _ in 0..program.len() {
        assert_eq!(interp.step().expect("step"), StepEvent::Continue);
    }

    // Lifted run against identical initial state.
    let region = region_from(0x1000_1000, &program);
    let (module, func) = lift_region(0x1000_1000, &region);
    let mut lifted = loader::load_flat(&program, 0x1000_1000, &config);
    preset(&mut lifted);
    let entry = lifted.pc();
    let (regs, mem) = lifted.state_mut();
    let next = run_function(&module, func, regs, mem, entry);

    assert_eq!(next, 0x1000_1000 + 4 * program.len() as u32);
    assert_eq!(
        bank_snapshot(&lifted.regs),
        bank_snapshot(&interp.regs),
        "register banks diverged"
    );
    for addr in (scratch..scratch + 0x100).step_by(4) {
        assert_eq!(lifted.mem.read_u32(addr), interp.mem.read_u32(addr));
    }
}

#[test]
fn discontinuity_gets_an_exit() {
    // Two non-adjacent straight-line fragments: the function must leave at
    // the seam with the predecessor's fall-through PC.
    let region = vec![
        (0x1000, encode::addi(1, 1, 1)),
        (0x2000, encode::addi(2, 2, 1)),
    ];
    let (module, func) = lift_region(0x1000, &region);
    let (mut regs, mut mem) = fresh_state();
    let next = run_function(&module, func, &mut regs, &mut mem, 0x1000);
    assert_eq!(next, 0x1004);
    assert_eq!(regs.read(1), 1);
    assert_eq!(regs.read(2), 0, "the second fragment must not execute");
}

#[test]
fn memory_mapped_load() {
    let region = region_from(0x1000, &[encode::ldw(2, 1, 0x10)]);
    let (module, func) = lift_region(0x1000, &region);
    let (mut regs, mut mem) = fresh_state();
    regs.write(1, 0x1000_0100);
    mem.write_u32(0x1000_0110, 0xFEED_BACC);
    let next = run_function(&module, func, &mut regs, &mut mem, 0x1000);
    assert_eq!(next, 0x1004);
    assert_eq!(regs.read(2), 0xFEED_BACC);
}

#[test]
fn backward_branch_loops_natively() {
    // addi r1, r1, 1; jne r1, r2, -2: a counted self-loop.
    let region = region_from(0x1000, &[encode::addi(1, 1, 1), encode::jne(1, 2, -2)]);
    let (module, func) = lift_region(0x1000, &region);
    let (mut regs, mut mem) = fresh_state();
    regs.write(2, 5);
    let next = run_function(&module, func, &mut regs, &mut mem, 0x1000);
    assert_eq!(next, 0x1008);
    assert_eq!(regs.read(1), 5, "the loop must run to the bound natively");
}

#[test]
fn branch_target_mid_block_splits() {
    // Loop back into the middle of the first block.
    let region = region_from(
        0x1000,
        &[
            encode::addi(1, 1, 1),
            encode::addi(2, 2, 1),
            encode::jne(2, 3, -2), // -> 0x1004
        ],
    );
    let (module, func) = lift_region(0x1000, &region);
    let (mut regs, mut mem) = fresh_state();
    regs.write(3, 3);
    let next = run_function(&module, func, &mut regs, &mut mem, 0x1000);
    assert_eq!(next, 0x100C);
    assert_eq!(regs.read(1), 1, "the head runs once");
    assert_eq!(regs.read(2), 3, "the loop body runs to the bound");
}

#[test]
fn branches_have_no_unresolved_successors() {
    let region = region_from(
        0x1000,
        &[
            encode::addi(1, 1, 1),
            encode::jeqz(1, 3),
            encode::addi(2, 2, 1),
            encode::jne(1, 2, -3),
        ],
    );
    let (module, func) = lift_region(0x1000, &region);
    // Structural check: the module validates, and every conditional branch
    // has distinct, sealed successors.
    validate(&module).expect("valid module");
    let f = &module.functions[func.0 as usize];
    let mut cond_branches = 0;
    for inst in &f.insts {
        if let Inst::CondBr {
            taken, fallthrough, ..
        } = inst
        {
            cond_branches += 1;
            assert_ne!(taken, fallthrough, "placeholder successor survived");
        }
    }
    assert_eq!(cond_branches, 2);
}

#[test]
fn divu_discards_the_widened_operands() {
    let region = region_from(0x1000, &[enc_r4(major::DIVU, 1, 2, 3, 4)]);
    let (module, func) = lift_region(0x1000, &region);

    // The latent quirk, preserved: widening casts are emitted and unused,
    // the divide is 32-bit unsigned, the remainder signed.
    let f = &module.functions[func.0 as usize];
    let widenings = f
        .insts
        .iter()
        .filter(|i| matches!(i, Inst::Un { op: oidbt_core::ir::UnOp::Sext32To64, .. }))
        .count();
    assert_eq!(widenings, 2);

    let (mut regs, mut mem) = fresh_state();
    regs.write(1, -7i32 as u32);
    regs.write(2, 2);
    let _ = run_function(&module, func, &mut regs, &mut mem, 0x1000);
    assert_eq!(regs.read(3), 0xFFFF_FFF9 / 2);
    assert_eq!(regs.read(4), -1i32 as u32);
}

#[test]
fn syscall_returns_its_own_pc() {
    let region = region_from(0x1000, &[encode::addi(1, 1, 1), encode::syscall()]);
    let (module, func) = lift_region(0x1000, &region);
    let (mut regs, mut mem) = fresh_state();
    let next = run_function(&module, func, &mut regs, &mut mem, 0x1000);
    assert_eq!(next, 0x1004, "interpretation resumes at the syscall");
    assert_eq!(regs.read(1), 1);
}

#[test]
fn indirect_return_speculation_stays_native() {
    // Tail through a call: the jumpr return to the recorded call site's
    // return point must continue inside the region.
    let callee = 0x2000;
    let region = vec![
        (0x1000, encode::addi(1, 1, 1)),
        (0x1004, encode::call(callee)),
        (callee, encode::addi(2, 2, 1)),
        (callee + 4, encode::jumpr(31)),
        (0x1008, encode::addi(3, 3, 1)),
    ];
    let mut methods = MethodMap::default();
    methods.add(callee, callee + 0x10);

    let mut emitter = RegionEmitter::new();
    let mut module = IrModule::default();
    let func = emitter
        .emit_region(&[0x1000], &region, &methods, &mut module)
        .expect("lift");

    let (mut regs, mut mem) = fresh_state();
    let next = run_function(&module, func, &mut regs, &mut mem, 0x1000);
    // Without speculation the function would stop at the jumpr and return
    // 0x1008; with it, the tail after the call site runs natively.
    assert_eq!(next, 0x100C);
    assert_eq!((regs.read(1), regs.read(2), regs.read(3)), (1, 1, 1));
    assert_eq!(regs.read(31), 0x1008);
}

#[test]
fn jumpr_without_call_sites_exits_to_the_interpreter() {
    let region = vec![
        (0x2000, encode::addi(2, 2, 1)),
        (0x2004, encode::jumpr(31)),
    ];
    let (module, func) = lift_region(0x2000, &region);
    let (mut regs, mut mem) = fresh_state();
    regs.write(31, 0xBEE0);
    let next = run_function(&module, func, &mut regs, &mut mem, 0x2000);
    assert_eq!(next, 0xBEE0);
}

#[test]
fn multi_entry_trampoline_dispatches_on_the_pc_argument() {
    let region = region_from(0x1000, &[encode::addi(1, 1, 1), encode::addi(2, 2, 1)]);
    let mut emitter = RegionEmitter::new();
    let mut module = IrModule::default();
    let func = emitter
        .emit_region(&[0x1000, 0x1004], &region, &MethodMap::default(), &mut module)
        .expect("lift");

    let (mut regs, mut mem) = fresh_state();
    let next = run_function(&module, func, &mut regs, &mut mem, 0x1004);
    assert_eq!(next, 0x1008);
    assert_eq!(regs.read(1), 0, "the first entry must be skipped");
    assert_eq!(regs.read(2), 1);

    let (mut regs, mut mem) = fresh_state();
    let next = run_function(&module, func, &mut regs, &mut mem, 0x1000);
    assert_eq!(next, 0x1008);
    assert_eq!((regs.read(1), regs.read(2)), (1, 1));

    // Unknown entries fall out with the requested PC.
    let (mut regs, mut mem) = fresh_state();
    let next = run_function(&module, func, &mut regs, &mut mem, 0x9999);
    assert_eq!(next, 0x9999);
}

#[test]
fn direct_calls_run_the_callee_function() {
    let mut emitter = RegionEmitter::new();
    let mut module = IrModule::default();

    // Callee: increments r2, then returns through the link register.
    let callee = region_from(0x2000, &[encode::addi(2, 2, 1), encode::jumpr(31)]);
    let _ = emitter
        .emit_region(&[0x2000], &callee, &MethodMap::default(), &mut module)
        .expect("callee");

    // Caller: the callee is already in the module, so the call becomes a
    // direct function call with a resume-PC compare.
    let caller = vec![
        (0x1000, encode::call(0x2000)),
        (0x1004, encode::addi(3, 3, 1)),
    ];
    let func = emitter
        .emit_region(&[0x1000], &caller, &MethodMap::default(), &mut module)
        .expect("caller");

    let (mut regs, mut mem) = fresh_state();
    let next = run_function(&module, func, &mut regs, &mut mem, 0x1000);
    // The callee ran natively and returned to the link address; the caller
    // hands control back there.
    assert_eq!(next, 0x1004);
    assert_eq!(regs.read(2), 1);
    assert_eq!(regs.read(31), 0x1004);
    assert_eq!(regs.read(3), 0);
}

#[test]
fn direct_calls_bail_out_on_unexpected_resume() {
    let mut emitter = RegionEmitter::new();
    let mut module = IrModule::default();

    // Callee without an indirect return: it falls out at its own
    // fall-through PC rather than the caller's link address.
    let callee = region_from(0x2000, &[encode::addi(2, 2, 1)]);
    let _ = emitter
        .emit_region(&[0x2000], &callee, &MethodMap::default(), &mut module)
        .expect("callee");

    let caller = vec![(0x1000, encode::call(0x2000))];
    let func = emitter
        .emit_region(&[0x1000], &caller, &MethodMap::default(), &mut module)
        .expect("caller");

    let (mut regs, mut mem) = fresh_state();
    let next = run_function(&module, func, &mut regs, &mut mem, 0x1000);
    assert_eq!(next, 0x2004, "the mismatching resume PC is surfaced");
    assert_eq!(regs.read(2), 1);
}

#[test]
fn unknown_opcode_is_a_fatal_lift_error() {
    let region = vec![(0x1000, 0xFFFF_FFFF)];
    let mut emitter = RegionEmitter::new();
    let mut module = IrModule::default();
    let err = emitter
        .emit_region(&[0x1000], &region, &MethodMap::default(), &mut module)
        .expect_err("must fail");
    assert!(matches!(
        err,
        oidbt_core::common::Error::UnsupportedInst { pc: 0x1000, .. }
    ));
}

#[test]
fn lifted_regions_compile_through_the_backend() {
    let region = region_from(0x1000, &[encode::add(3, 1, 2)]);
    let (module, _) = lift_region(0x1000, &region);
    let func = EvalBackend.compile(module).expect("backend");
    let (mut regs, mut mem) = fresh_state();
    regs.write(1, 2);
    regs.write(2, 2);
    assert_eq!(func(&mut regs, &mut mem, 0x1000), 0x1004);
    assert_eq!(regs.read(3), 4);
}

#[test]
fn no_stores_outside_guest_state() {
    // A memory-heavy region only touches its own addresses: check by
    // diffing a generously sized buffer.
    let config = test_config();
    let program = [
        enc_i(major::STW, 1, 2, 0),
        enc_i(major::STB, 1, 2, 8),
        encode::addi(1, 1, 4),
        enc_i(major::STH, 1, 2, 0),
    ];
    let region = region_from(CODE_BASE, &program);
    let (module, func) = lift_region(CODE_BASE, &region);
    let mut machine = loader::load_flat(&program, CODE_BASE, &config);
    machine.set_register(1, 0x1000_2000);
    machine.set_register(2, 0xA1B2_C3D4);
    let before: Vec<u8> = (0..64).map(|i| machine.mem.read_u8(0x1000_2000 + i)).collect();
    let (regs, mem) = machine.state_mut();
    let _ = run_function(&module, func, regs, mem, CODE_BASE);
    let after: Vec<u8> = (0..64).map(|i| machine.mem.read_u8(0x1000_2000 + i)).collect();

    let changed: Vec<u32> = (0..64u32).filter(|&i| before[i as usize] != after[i as usize]).collect();
    for idx in changed {
        assert!(
            idx < 6 || idx == 8,
            "store outside the region's footprint at +{idx}"
        );
    }
}

#[test]
fn register_model_snapshot_is_confined_to_the_bank() {
    // Every register write a lifted ALU region performs lands inside the
    // bank; nothing else in guest state moves.
    let region = region_from(
        0x1000,
        &[encode::addi(1, 1, 1), encode::add(2, 1, 1), encode::sub(3, 2, 1)],
    );
    let (module, func) = lift_region(0x1000, &region);
    let (mut regs, mut mem) = fresh_state();
    let mem_before: Vec<u8> = (0..256).map(|i| mem.read_u8(0x1000_0000 + i)).collect();
    let _ = run_function(&module, func, &mut regs, &mut mem, 0x1000);
    let mem_after: Vec<u8> = (0..256).map(|i| mem.read_u8(0x1000_0000 + i)).collect();
    assert_eq!(mem_before, mem_after);
}
