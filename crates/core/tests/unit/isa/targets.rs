//! Branch-target arithmetic and control-flow predicates.

use oidbt_core::isa::decode::decode;
use oidbt_core::isa::encode;
use oidbt_core::isa::{is_control_flow, is_indirect_branch, possible_targets};

use rstest::rstest;

#[test]
fn conditional_branch_targets() {
    let pc = 0x1008;
    let inst = decode(encode::jne(1, 2, -2));
    assert_eq!(possible_targets(pc, &inst), [0x1000, 0x100C]);

    let inst = decode(encode::jeq(1, 2, 5));
    assert_eq!(possible_targets(pc, &inst), [0x1008 + 20 + 4, 0x100C]);
}

#[test]
fn jump_splices_the_window() {
    let inst = decode(encode::jump(0x0040_0000));
    assert_eq!(possible_targets(0x1000_0004, &inst), [0x1040_0000, 0]);
}

#[test]
fn call_targets_the_callee() {
    let inst = decode(encode::call(0x2000));
    assert_eq!(possible_targets(0x1000, &inst), [0x2000, 0]);
}

#[test]
fn indirect_branches_have_no_static_targets() {
    let inst = decode(encode::jumpr(31));
    assert_eq!(possible_targets(0x1000, &inst), [0, 0]);
}

#[test]
fn straight_line_falls_through() {
    let inst = decode(encode::add(3, 1, 2));
    assert_eq!(possible_targets(0x1000, &inst), [0x1004, 0]);
    let inst = decode(encode::syscall());
    assert_eq!(possible_targets(0x1000, &inst), [0x1004, 0]);
}

#[rstest]
#[case(encode::jne(1, 2, -2), true, false)]
#[case(encode::jump(0x2000), true, false)]
#[case(encode::call(0x2000), true, false)]
#[case(encode::jumpr(31), true, true)]
#[case(encode::add(3, 1, 2), false, false)]
#[case(encode::syscall(), false, false)]
fn predicates(#[case] word: u32, #[case] control: bool, #[case] indirect: bool) {
    let inst = decode(word);
    assert_eq!(is_control_flow(&inst), control);
    assert_eq!(is_indirect_branch(&inst), indirect);
}
