//! End-to-end scenarios: interpret, promote, dispatch.

use oidbt_core::isa::encode::{self, enc_ldi};

use crate::common::{TestContext, CODE_BASE};
use pretty_assertions::assert_eq;

/// Inner counted loop, outer counted loop, exit syscall.
///
/// ```text
/// 0:  outer:  ldi  r3, 0
/// 4:  inner:  addi r3, r3, 1
/// 8:          jne  r3, r2, -2     ; -> inner
/// 12:         addi r1, r1, 1
/// 16:         jne  r1, r6, -5     ; -> outer
/// 20:         syscall             ; exit(r5)
/// ```
fn nested_loop_program() -> Vec<u32> {
    vec![
        enc_ldi(3, 0),
        encode::addi(3, 3, 1),
        encode::jne(3, 2, -2),
        encode::addi(1, 1, 1),
        encode::jne(1, 6, -5),
        encode::syscall(),
    ]
}

fn prepare(ctx: &mut TestContext, inner: u32, outer: u32) {
    ctx.set_reg(2, inner);
    ctx.set_reg(6, outer);
    ctx.set_reg(4, 4001); // exit
    ctx.set_reg(5, 0);
}

#[test]
fn loop_promotion_dispatches_natively() {
    let mut ctx = TestContext::new(&nested_loop_program());
    prepare(&mut ctx, 20, 400);

    // Run in slices; once the inner loop has been handed to the pipeline,
    // wait for the compile so the remaining passes dispatch natively.
    let mut status = None;
    let mut drained = false;
    for _ in 0..100_000 {
        status = ctx.run_for(500);
        if status.is_some() {
            break;
        }
        if !drained
            && (ctx.sim.manager.num_oi_regions() > 0
                || !ctx.sim.manager.compiled_entries().is_empty())
        {
            ctx.sim.manager.drain();
            drained = true;
        }
    }

    assert_eq!(status, Some(0));
    assert!(drained, "the hot inner loop never reached the pipeline");

    let inner_entry = CODE_BASE + 4;
    assert!(ctx.sim.manager.is_native_region_entry(inner_entry));
    assert_eq!(
        ctx.sim.manager.compiled_oi_region(inner_entry).map(|r| r.len()),
        Some(2),
        "the inner loop body is the recorded region"
    );

    // Dispatch through the native entry happened: the hotness counter of
    // the loop's exit PC is only bumped on the dispatch return path.
    assert!(ctx.sim.net.exec_freq(CODE_BASE + 12) > 0);

    // Guest-visible results match pure interpretation.
    assert_eq!(ctx.reg(1), 400);
    assert_eq!(ctx.reg(3), 20);
}

#[test]
fn native_and_interpreted_runs_agree() {
    let mut native = TestContext::new(&nested_loop_program());
    prepare(&mut native, 10, 200);
    let native_status = native.run();

    let mut config = crate::common::test_config();
    config.pipeline.num_threads = 0; // pure interpretation
    let mut interp = TestContext::with_config(&nested_loop_program(), &config);
    prepare(&mut interp, 10, 200);
    let interp_status = interp.run();

    assert_eq!(native_status, interp_status);
    assert_eq!(native.reg(1), interp.reg(1));
    assert_eq!(native.reg(3), interp.reg(3));
}

#[test]
fn zero_workers_means_pure_interpretation() {
    let mut config = crate::common::test_config();
    config.pipeline.num_threads = 0;
    let mut ctx = TestContext::with_config(&nested_loop_program(), &config);
    prepare(&mut ctx, 5, 50);

    assert_eq!(ctx.run(), 0);
    // Regions were formed but nothing was compiled.
    assert!(ctx.sim.manager.compiled_entries().is_empty());
    assert_eq!(ctx.reg(1), 50);
}

#[test]
fn syscall_exit_status_propagates() {
    let mut ctx = TestContext::new(&[encode::syscall()]);
    ctx.set_reg(4, 4001);
    ctx.set_reg(5, 7);
    assert_eq!(ctx.run(), 7);
}

#[test]
fn hotness_is_monotone_and_regions_form_once() {
    let mut ctx = TestContext::new(&nested_loop_program());
    prepare(&mut ctx, 8, 100);

    let inner_entry = CODE_BASE + 4;
    let mut last = 0;
    loop {
        match ctx.run_for(200) {
            Some(status) => {
                assert_eq!(status, 0);
                break;
            }
            None => {
                let now = ctx.sim.net.exec_freq(inner_entry);
                assert!(now >= last, "hotness went backwards");
                last = now;
            }
        }
    }

    // The inner loop produced exactly one region for its entry.
    ctx.sim.manager.drain();
    let compiled = ctx.sim.manager.compiled_entries();
    assert_eq!(compiled.iter().filter(|&&e| e == inner_entry).count(), 1);
}

#[test]
fn relaxed_formation_records_loop_bodies_eagerly() {
    let mut config = crate::common::test_config();
    config.formation.relaxed = true;
    let mut ctx = TestContext::with_config(&nested_loop_program(), &config);
    prepare(&mut ctx, 30, 300);

    let mut drained = false;
    loop {
        match ctx.run_for(500) {
            Some(status) => {
                assert_eq!(status, 0);
                break;
            }
            None if !drained && ctx.sim.manager.num_oi_regions() > 0 => {
                ctx.sim.manager.drain();
                drained = true;
            }
            None => {}
        }
    }
    assert!(!ctx.sim.manager.compiled_entries().is_empty());
    assert_eq!(ctx.reg(1), 300);
    assert_eq!(ctx.reg(3), 30);
}

#[test]
fn limited_policy_caps_the_region() {
    let mut config = crate::common::test_config();
    config.formation.policy = oidbt_core::config::FormationPolicy::Limited;
    config.formation.region_limit_size = 1;
    let mut ctx = TestContext::with_config(&nested_loop_program(), &config);
    prepare(&mut ctx, 10, 200);

    let mut drained = false;
    loop {
        match ctx.run_for(500) {
            Some(status) => {
                assert_eq!(status, 0);
                break;
            }
            None if !drained
                && (ctx.sim.manager.num_oi_regions() > 0
                    || !ctx.sim.manager.compiled_entries().is_empty()) =>
            {
                ctx.sim.manager.drain();
                drained = true;
            }
            None => {}
        }
    }

    for entry in ctx.sim.manager.compiled_entries() {
        let region = ctx.sim.manager.compiled_oi_region(entry).expect("region");
        assert_eq!(region.len(), 1, "limited formation must cap the buffer");
    }
    assert_eq!(ctx.reg(1), 200);
}

#[test]
fn region_discontinuity_program_stays_correct() {
    // The recorded tail includes a forward jump; the discontinuous region
    // still executes correctly end to end.
    //
    // 0: addi r1, r1, 1
    // 4: jump 16
    // 8: addi r9, r9, 1      (skipped)
    // 12: nop                (skipped)
    // 16: addi r3, r3, 1
    // 20: jne r3, r2, -6     ; -> 0
    // 24: syscall
    let program = vec![
        encode::addi(1, 1, 1),
        encode::jump(CODE_BASE + 16),
        encode::addi(9, 9, 1),
        encode::nop(),
        encode::addi(3, 3, 1),
        encode::jne(3, 2, -6),
        encode::syscall(),
    ];
    let mut config = crate::common::test_config();
    config.formation.relaxed = true;
    let mut ctx = TestContext::with_config(&program, &config);
    ctx.set_reg(2, 500);
    ctx.set_reg(4, 4001);
    ctx.set_reg(5, 0);

    let mut drained = false;
    loop {
        match ctx.run_for(500) {
            Some(status) => {
                assert_eq!(status, 0);
                break;
            }
            None if !drained
                && (ctx.sim.manager.num_oi_regions() > 0
                    || !ctx.sim.manager.compiled_entries().is_empty()) =>
            {
                ctx.sim.manager.drain();
                drained = true;
            }
            None => {}
        }
    }

    assert_eq!(ctx.reg(3), 500);
    assert_eq!(ctx.reg(1), 500);
    assert_eq!(ctx.reg(9), 0, "skipped instructions must never run");
}

#[test]
fn syscall_region_returns_to_the_interpreter() {
    // A region ending in a syscall returns the syscall PC; the interpreter
    // then performs the call. Exercised through a loop whose body ends in a
    // (non-exit) fstat syscall.
    //
    // 0: addi r1, r1, 1
    // 4: ldi r4, 4108        ; fstat -> r2 = -1
    // 8: syscall
    // 12: jne r1, r6, -4     ; -> 0
    // 16: ldi r4, 4001
    // 20: syscall            ; exit(r5)
    let program = vec![
        encode::addi(1, 1, 1),
        enc_ldi(4, 4108),
        encode::syscall(),
        encode::jne(1, 6, -4),
        enc_ldi(4, 4001),
        encode::syscall(),
    ];
    let mut config = crate::common::test_config();
    config.formation.relaxed = true;
    let mut ctx = TestContext::with_config(&program, &config);
    ctx.set_reg(6, 300);
    ctx.set_reg(5, 0);

    let mut drained = false;
    loop {
        match ctx.run_for(500) {
            Some(status) => {
                assert_eq!(status, 0);
                break;
            }
            None if !drained
                && (ctx.sim.manager.num_oi_regions() > 0
                    || !ctx.sim.manager.compiled_entries().is_empty()) =>
            {
                ctx.sim.manager.drain();
                drained = true;
            }
            None => {}
        }
    }
    assert_eq!(ctx.reg(1), 300);
    assert_eq!(ctx.reg(2), u32::MAX, "fstat reports -1");
}

#[test]
fn loads_and_stores_work_under_dispatch() {
    // Memory-touching loop body: sum an array through the code cache.
    //
    // 0: loop: ldw  r3, r1+0        ; r3 = *p
    // 4:       add  r5, r5, r3      ; sum += r3
    // 8:       addi r1, r1, 4       ; p += 4
    // 12:      jne  r1, r2, -4      ; while p != end
    // 16:      syscall
    let program = vec![
        encode::ldw(3, 1, 0),
        encode::add(5, 5, 3),
        encode::addi(1, 1, 4),
        encode::jne(1, 2, -4),
        encode::syscall(),
    ];

    let array = CODE_BASE + 0x400;
    let count = 200u32;
    let mut config = crate::common::test_config();
    config.formation.relaxed = true;
    let mut ctx = TestContext::with_config(&program, &config);
    for i in 0..count {
        ctx.machine().mem.write_u32(array + i * 4, i + 1);
    }
    ctx.set_reg(1, array);
    ctx.set_reg(2, array + count * 4);
    ctx.set_reg(4, 4001);
    ctx.set_reg(5, 0);

    let mut drained = false;
    loop {
        match ctx.run_for(500) {
            Some(status) => {
                assert_eq!(status, 0);
                break;
            }
            None if !drained
                && (ctx.sim.manager.num_oi_regions() > 0
                    || !ctx.sim.manager.compiled_entries().is_empty()) =>
            {
                ctx.sim.manager.drain();
                drained = true;
            }
            None => {}
        }
    }
    assert_eq!(ctx.reg(5), count * (count + 1) / 2);
}
