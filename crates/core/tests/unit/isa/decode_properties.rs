//! Decode properties over every instruction format.
//!
//! Verifies field extraction round-trips through the format encoders for
//! arbitrary register indices and immediates.

use oidbt_core::isa::decode::decode;
use oidbt_core::isa::encode;
use oidbt_core::isa::opcode::{funct, major};
use oidbt_core::isa::Opcode;

use proptest::prelude::*;
use rstest::rstest;

proptest! {
    #[test]
    fn r3_fields_round_trip(rs in 0u32..64, rt in 0u32..64, rd in 0u32..64) {
        let inst = decode(encode::enc_r3(funct::ADD, rs, rt, rd));
        prop_assert_eq!(inst.opcode, Opcode::Add);
        prop_assert_eq!(u32::from(inst.rs), rs);
        prop_assert_eq!(u32::from(inst.rt), rt);
        prop_assert_eq!(u32::from(inst.rd), rd);
    }

    #[test]
    fn r4_fields_round_trip(rs in 0u32..64, rt in 0u32..64, rd in 0u32..64, rv in 0u32..64) {
        let inst = decode(encode::enc_r4(major::DIVU, rs, rt, rd, rv));
        prop_assert_eq!(inst.opcode, Opcode::Divu);
        prop_assert_eq!(u32::from(inst.rs), rs);
        prop_assert_eq!(u32::from(inst.rt), rt);
        prop_assert_eq!(u32::from(inst.rd), rd);
        prop_assert_eq!(u32::from(inst.rv), rv);
    }

    #[test]
    fn imm14_sign_extends(rs in 0u32..64, rt in 0u32..64, imm in -8192i32..8192) {
        let inst = decode(encode::enc_i(major::ADDI, rs, rt, imm));
        prop_assert_eq!(inst.opcode, Opcode::Addi);
        prop_assert_eq!(i32::from(inst.imm), imm);
    }

    #[test]
    fn j_field_round_trips(addrs in 0u32..(1 << 26)) {
        let inst = decode(encode::enc_j(major::JUMP, addrs));
        prop_assert_eq!(inst.opcode, Opcode::Jump);
        prop_assert_eq!(inst.addrs, addrs);
    }

    #[test]
    fn ldi_target_round_trips(rt in 0u32..64, imm in 0i32..8192) {
        let inst = decode(encode::enc_ldi(rt, imm));
        prop_assert_eq!(inst.opcode, Opcode::Ldi);
        prop_assert_eq!(u32::from(inst.rt), rt);
        prop_assert_eq!(i32::from(inst.imm), imm);
    }
}

#[rstest]
#[case(encode::nop(), Opcode::Nop)]
#[case(encode::syscall(), Opcode::Syscall)]
#[case(encode::enc_r3(funct::JUMPR, 0, 31, 0), Opcode::Jumpr)]
#[case(encode::enc_r3(funct::SQRTD, 0, 2, 0), Opcode::Sqrtd)]
#[case(encode::enc_r3(funct::CUND, 4, 6, 0), Opcode::Cund)]
#[case(encode::enc_i(major::IJMP, 0, 7, 0x21), Opcode::Ijmp)]
#[case(encode::enc_j(major::IJMPHI, 0x1234), Opcode::Ijmphi)]
#[case(encode::enc_j(major::LDIHI, 0x3FFFF), Opcode::Ldihi)]
#[case(encode::enc_i(major::LDC1, 3, 8, -8), Opcode::Ldc1)]
fn opcode_selection(#[case] word: u32, #[case] expected: Opcode) {
    assert_eq!(decode(word).opcode, expected);
}

#[test]
fn unknown_encodings_decode_to_invalid() {
    assert_eq!(decode(0x0000_00FE).opcode, Opcode::Invalid);
    assert_eq!(decode(0xFFFF_FFFF).opcode, Opcode::Invalid);
}
