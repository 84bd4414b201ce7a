//! Syscall bridge against the host.

use oidbt_core::isa::encode::{self, enc_ldi, enc_r3};
use oidbt_core::isa::opcode::funct;

use crate::common::{TestContext, CODE_BASE};
use pretty_assertions::assert_eq;

#[test]
fn open_write_close_against_the_host() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("guest-out.txt");
    let path_str = path.to_str().expect("utf8 path");

    // open(r5 = filename ptr, mode "w" after the NUL) -> r2 = fd
    // write(r5 = fd, r6 = buf, r7 = len)
    // close(r5 = fd)
    // exit(r5 = 0)
    let program = vec![
        enc_ldi(4, 4005),
        encode::syscall(),
        enc_r3(funct::ADD, 2, 0, 5), // r5 = fd
        enc_ldi(4, 4004),
        encode::syscall(),
        enc_r3(funct::ADD, 2, 0, 5),
        enc_ldi(4, 4006),
        encode::syscall(),
        enc_ldi(4, 4001),
        enc_ldi(5, 0),
        encode::syscall(),
    ];

    let name_ptr = CODE_BASE + 0x500;
    let buf_ptr = CODE_BASE + 0x600;
    let payload = b"hello from the guest\n";

    // The bridge opens without O_CREAT; the file must exist.
    std::fs::write(&path, b"").expect("precreate");

    let mut ctx = TestContext::new(&program);
    {
        let mem = &mut ctx.machine().mem;
        mem.write_slice(name_ptr, path_str.as_bytes());
        mem.write_u8(name_ptr + path_str.len() as u32, 0);
        mem.write_slice(name_ptr + path_str.len() as u32 + 1, b"w\0");
        mem.write_slice(buf_ptr, payload);
    }
    ctx.set_reg(5, name_ptr);
    ctx.set_reg(6, buf_ptr);
    ctx.set_reg(7, payload.len() as u32);

    assert_eq!(ctx.run(), 0);
    // The write syscall reported the full length.
    let written = std::fs::read(&path).expect("host file");
    assert_eq!(written, payload);
}

#[test]
fn open_with_unknown_mode_fails() {
    let program = vec![
        enc_ldi(4, 4005),
        encode::syscall(),
        enc_ldi(4, 4001),
        enc_ldi(5, 0),
        encode::syscall(),
    ];
    let name_ptr = CODE_BASE + 0x500;
    let mut ctx = TestContext::new(&program);
    ctx.machine().mem.write_slice(name_ptr, b"whatever\0x\0");
    ctx.set_reg(5, name_ptr);

    assert_eq!(ctx.run(), 0);
    assert_eq!(ctx.reg(2), u32::MAX, "unknown mode yields -1");
}

#[test]
fn fstat_is_stubbed() {
    let program = vec![
        enc_ldi(4, 4108),
        encode::syscall(),
        enc_ldi(4, 4001),
        enc_ldi(5, 0),
        encode::syscall(),
    ];
    let mut ctx = TestContext::new(&program);
    assert_eq!(ctx.run(), 0);
    assert_eq!(ctx.reg(2), u32::MAX);
}
