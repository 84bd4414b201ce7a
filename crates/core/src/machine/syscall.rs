//! Linux syscall emulation.
//!
//! Emulates the small set of guest OS calls OI programs use against the
//! host. Syscall numbers are `r4 - 4000`; arguments arrive in `r5`, `r6`,
//! `r7` and the result is written to `r2`. Guest pointer arguments are
//! translated through the data-memory offset.

use std::ffi::CString;

use super::Machine;
use crate::common::{Error, Result};

/// Guest syscall numbers after subtracting the 4000 base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyscallKind {
    Exit,
    Read,
    Write,
    Open,
    Close,
    Fstat,
}

impl SyscallKind {
    fn from_guest(num: u32) -> Option<Self> {
        match num {
            1 => Some(Self::Exit),
            3 => Some(Self::Read),
            4 => Some(Self::Write),
            5 => Some(Self::Open),
            6 => Some(Self::Close),
            108 => Some(Self::Fstat),
            _ => None,
        }
    }
}

/// Emulates the syscall currently requested by the machine's registers.
///
/// Returns `Some(status)` for `exit`, `None` otherwise. Unknown syscall
/// numbers are fatal to the guest (the driver exits with status 2).
pub fn process(m: &mut Machine) -> Result<Option<u32>> {
    let num = m.register(4).wrapping_sub(4000);
    let kind = SyscallKind::from_guest(num).ok_or(Error::UnsupportedSyscall(num))?;

    match kind {
        SyscallKind::Exit => {
            let status = m.register(5);
            tracing::debug!(status, "guest exit");
            Ok(Some(status))
        }
        SyscallKind::Read => {
            let fd = m.register(5) as i32;
            let len = m.register(7) as usize;
            let buf = m.mem.slice_mut(m.regs.read(6), len);
            // SAFETY: the buffer is a live, writable slice of guest memory
            // of exactly `len` bytes.
            let r = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), len) };
            m.set_register(2, r as u32);
            Ok(None)
        }
        SyscallKind::Write => {
            let fd = m.register(5) as i32;
            let len = m.register(7) as usize;
            let buf = m.mem.slice(m.register(6), len);
            // SAFETY: the buffer is a live slice of guest memory of exactly
            // `len` bytes.
            let r = unsafe { libc::write(fd, buf.as_ptr().cast(), len) };
            m.set_register(2, r as u32);
            Ok(None)
        }
        SyscallKind::Open => {
            let name_addr = m.register(5);
            let filename = m.mem.read_cstr(name_addr).to_vec();
            // The mode string ("r" or "w") follows the filename's NUL.
            let mode_addr = name_addr.wrapping_add(filename.len() as u32).wrapping_add(1);
            let mode = m.mem.read_cstr(mode_addr).to_vec();

            let r = match mode.as_slice() {
                b"r" => open_host(&filename, libc::O_RDONLY),
                b"w" => open_host(&filename, libc::O_WRONLY),
                _ => -1,
            };
            m.set_register(2, r as u32);
            Ok(None)
        }
        SyscallKind::Close => {
            // SAFETY: plain descriptor close; the fd value came from the
            // guest and the host validates it.
            let r = unsafe { libc::close(m.register(5) as i32) };
            m.set_register(2, r as u32);
            Ok(None)
        }
        SyscallKind::Fstat => {
            m.set_register(2, -1i32 as u32);
            Ok(None)
        }
    }
}

fn open_host(filename: &[u8], flags: i32) -> i32 {
    let Ok(path) = CString::new(filename) else {
        return -1;
    };
    // SAFETY: `path` is a valid NUL-terminated string for the duration of
    // the call.
    unsafe { libc::open(path.as_ptr(), flags) }
}
