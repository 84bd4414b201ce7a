//! Format-level instruction encoders.
//!
//! Inverse of [`decode`](super::decode::decode) at the format level, used by
//! tests and small tools to assemble guest code without an external
//! assembler. Field widths are masked, not validated.

use super::opcode::{funct, major};

/// Encodes an R3-format instruction (`major=0`, operation in `funct`).
pub fn enc_r3(fct: u32, rs: u32, rt: u32, rd: u32) -> u32 {
    (major::R3 << 26) | ((rs & 0x3F) << 20) | ((rt & 0x3F) << 14) | ((rd & 0x3F) << 8) | (fct & 0xFF)
}

/// Encodes an R4-format instruction.
pub fn enc_r4(maj: u32, rs: u32, rt: u32, rd: u32, rv: u32) -> u32 {
    (maj << 26) | ((rs & 0x3F) << 20) | ((rt & 0x3F) << 14) | ((rd & 0x3F) << 8) | ((rv & 0x3F) << 2)
}

/// Encodes an I- or BR-format instruction with a 14-bit immediate.
pub fn enc_i(maj: u32, rs: u32, rt: u32, imm: i32) -> u32 {
    (maj << 26) | ((rs & 0x3F) << 20) | ((rt & 0x3F) << 14) | ((imm as u32) & 0x3FFF)
}

/// Encodes the LDI format (`rt` in the high register slot).
pub fn enc_ldi(rt: u32, imm: i32) -> u32 {
    (major::LDI << 26) | ((rt & 0x3F) << 20) | ((imm as u32) & 0x3FFF)
}

/// Encodes a J-format instruction with a 26-bit field.
pub fn enc_j(maj: u32, addrs: u32) -> u32 {
    (maj << 26) | (addrs & 0x03FF_FFFF)
}

/// `add rd, rs, rt`
pub fn add(rd: u32, rs: u32, rt: u32) -> u32 {
    enc_r3(funct::ADD, rs, rt, rd)
}

/// `sub rd, rs, rt`
pub fn sub(rd: u32, rs: u32, rt: u32) -> u32 {
    enc_r3(funct::SUB, rs, rt, rd)
}

/// `addi rt, rs, imm`
pub fn addi(rt: u32, rs: u32, imm: i32) -> u32 {
    enc_i(major::ADDI, rs, rt, imm)
}

/// `ldw rt, imm(rs)`
pub fn ldw(rt: u32, rs: u32, imm: i32) -> u32 {
    enc_i(major::LDW, rs, rt, imm)
}

/// `stw rt, imm(rs)`
pub fn stw(rt: u32, rs: u32, imm: i32) -> u32 {
    enc_i(major::STW, rs, rt, imm)
}

/// `ldi rt, imm`
pub fn ldi(rt: u32, imm: i32) -> u32 {
    enc_ldi(rt, imm)
}

/// `jne rs, rt, word_offset`
pub fn jne(rs: u32, rt: u32, off: i32) -> u32 {
    enc_i(major::JNE, rs, rt, off)
}

/// `jeq rs, rt, word_offset`
pub fn jeq(rs: u32, rt: u32, off: i32) -> u32 {
    enc_i(major::JEQ, rs, rt, off)
}

/// `jeqz rs, word_offset`
pub fn jeqz(rs: u32, off: i32) -> u32 {
    enc_i(major::JEQZ, rs, 0, off)
}

/// `jnez rs, word_offset`
pub fn jnez(rs: u32, off: i32) -> u32 {
    enc_i(major::JNEZ, rs, 0, off)
}

/// `jump target` (byte address within the current window)
pub fn jump(target: u32) -> u32 {
    enc_j(major::JUMP, target >> 2)
}

/// `call target` (byte address within the current window)
pub fn call(target: u32) -> u32 {
    enc_j(major::CALL, target >> 2)
}

/// `jumpr rt`
pub fn jumpr(rt: u32) -> u32 {
    enc_r3(funct::JUMPR, 0, rt, 0)
}

/// `syscall`
pub fn syscall() -> u32 {
    major::SYSCALL << 26
}

/// `nop`
pub fn nop() -> u32 {
    0
}
