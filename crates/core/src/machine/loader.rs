//! Guest binary loading.
//!
//! This module builds a ready-to-run [`Machine`] from a guest image. It
//! performs:
//! 1. **ELF loading:** Allocated sections into guest data memory, executable
//!    sections into the code buffer, function symbols into the method map.
//! 2. **Flat loading:** Raw instruction words at a fixed base, used by tests
//!    and microbenchmarks.
//! 3. **Initial state:** Entry PC and a stack pointer near the top of guest
//!    memory.

use object::{Object, ObjectSection, ObjectSymbol, SectionKind, SymbolKind};

use super::{Machine, MethodMap};
use crate::common::{Error, Result};
use crate::config::Config;
use crate::isa::INST_SIZE;

/// Guest stack-pointer register (`r29`, MIPS convention).
const REG_SP: u16 = 29;

/// Bytes reserved above the initial stack pointer.
const STACK_PAD: u32 = 64;

/// Loads an OI ELF image into a fresh machine.
///
/// Allocated sections are copied into guest data memory at their virtual
/// addresses; executable sections additionally populate the code buffer the
/// interpreter fetches from. `FUNC` symbols define the method map used by
/// indirect-return speculation.
pub fn load_elf(bytes: &[u8], config: &Config) -> Result<Machine> {
    let file = object::File::parse(bytes).map_err(|e| Error::Loader(e.to_string()))?;

    let mut machine = Machine::new(config);

    // Code buffer bounds: the span of all executable sections.
    let mut code_lo = u32::MAX;
    let mut code_hi = 0u32;
    for section in file.sections() {
        if section.kind() == SectionKind::Text && section.size() > 0 {
            code_lo = code_lo.min(section.address() as u32);
            code_hi = code_hi.max((section.address() + section.size()) as u32);
        }
    }
    if code_lo == u32::MAX {
        return Err(Error::Loader("no executable sections".into()));
    }

    let mut code = vec![0u32; ((code_hi - code_lo) / INST_SIZE) as usize];

    for section in file.sections() {
        let addr = section.address() as u32;
        let kind = section.kind();
        let loadable = matches!(
            kind,
            SectionKind::Text | SectionKind::Data | SectionKind::ReadOnlyData
        );
        if !loadable || section.size() == 0 {
            continue;
        }
        let data = section.data().map_err(|e| Error::Loader(e.to_string()))?;

        // Everything loadable lands in data memory so pointer-shaped reads
        // (jump tables, rodata) work. Sections outside the data window are
        // code-only.
        let dmo = config.machine.data_mem_offset;
        let in_data = addr >= dmo
            && (u64::from(addr) + data.len() as u64)
                <= u64::from(dmo) + config.machine.mem_size as u64;
        if in_data {
            machine.mem.write_slice(addr, data);
        }

        if kind == SectionKind::Text {
            for (i, chunk) in data.chunks_exact(4).enumerate() {
                let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                code[((addr - code_lo) / INST_SIZE) as usize + i] = word;
            }
        }
    }

    machine.install_code(code_lo, code);

    let mut methods = MethodMap::default();
    for symbol in file.symbols() {
        if symbol.kind() == SymbolKind::Text && symbol.size() > 0 {
            let start = symbol.address() as u32;
            methods.add(start, start + symbol.size() as u32);
        }
    }
    machine.install_methods(methods);

    machine.set_pc(file.entry() as u32);
    let sp = config.machine.data_mem_offset + config.machine.mem_size as u32 - STACK_PAD;
    machine.set_register(REG_SP, sp);

    tracing::info!(
        entry = format_args!("{:#x}", machine.pc()),
        code_base = format_args!("{code_lo:#x}"),
        code_bytes = code_hi - code_lo,
        "guest image loaded"
    );
    Ok(machine)
}

/// Loads raw instruction words at `base` into a fresh machine.
///
/// The words are installed as the code image and mirrored into data memory
/// when the base lies inside it. The PC is set to `base`.
pub fn load_flat(words: &[u32], base: u32, config: &Config) -> Machine {
    let mut machine = Machine::new(config);

    let dmo = config.machine.data_mem_offset;
    let in_data = base >= dmo && (base as u64 + words.len() as u64 * 4) <= dmo as u64 + config.machine.mem_size as u64;
    if in_data {
        for (i, word) in words.iter().enumerate() {
            machine.mem.write_u32(base + (i as u32) * 4, *word);
        }
    }

    machine.install_code(base, words.to_vec());
    machine.set_pc(base);
    let sp = dmo + config.machine.mem_size as u32 - STACK_PAD;
    machine.set_register(REG_SP, sp);
    machine
}
