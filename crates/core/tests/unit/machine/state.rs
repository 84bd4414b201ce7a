//! Register bank and guest memory behavior.

use oidbt_core::common::reg::{CC_REG, FP_BASE};
use oidbt_core::common::{GuestMemory, RegisterBank};

use pretty_assertions::assert_eq;

#[test]
fn r0_reads_zero_but_the_slot_is_writable() {
    let mut bank = RegisterBank::new();
    bank.write(0, 0xDEAD_BEEF);
    assert_eq!(bank.read(0), 0);
    assert_eq!(bank.raw(0), 0xDEAD_BEEF);
}

#[test]
fn fp_singles_live_in_the_bank_at_the_fp_base() {
    let mut bank = RegisterBank::new();
    bank.write_f32(2, 1.5);
    assert_eq!(bank.raw(FP_BASE + 2), 1.5f32.to_bits());
}

#[test]
fn doubles_cover_two_words_at_the_element_address() {
    let mut bank = RegisterBank::new();
    bank.write_f64(4, -2.25);
    let bits = (-2.25f64).to_bits();
    assert_eq!(bank.raw(FP_BASE + 4), bits as u32);
    assert_eq!(bank.raw(FP_BASE + 5), (bits >> 32) as u32);
    assert_eq!(bank.read_f64(4), -2.25);
}

#[test]
fn condition_code_is_an_ordinary_slot() {
    let mut bank = RegisterBank::new();
    bank.write(CC_REG, 1);
    assert_eq!(bank.read(CC_REG), 1);
}

#[test]
fn memory_translates_through_the_offset() {
    let mut mem = GuestMemory::new(0x1000, 0x1000_0000);
    mem.write_u32(0x1000_0010, 0xCAFE_F00D);
    assert_eq!(mem.read_u32(0x1000_0010), 0xCAFE_F00D);
    assert_eq!(mem.read_u8(0x1000_0010), 0x0D);
    assert_eq!(mem.read_u16(0x1000_0012), 0xCAFE);
}

#[test]
fn unaligned_accesses_are_supported() {
    let mut mem = GuestMemory::new(0x100, 0);
    mem.write_u32(1, 0x1122_3344);
    assert_eq!(mem.read_u32(1), 0x1122_3344);
    assert_eq!(mem.read_u16(3), 0x1122);
    mem.write_u64(9, 0x0102_0304_0506_0708);
    assert_eq!(mem.read_u64(9), 0x0102_0304_0506_0708);
}

#[test]
fn cstr_reads_stop_at_nul() {
    let mut mem = GuestMemory::new(0x100, 0);
    mem.write_slice(0x10, b"file.txt\0r\0");
    assert_eq!(mem.read_cstr(0x10), b"file.txt");
    assert_eq!(mem.read_cstr(0x19), b"r");
}
