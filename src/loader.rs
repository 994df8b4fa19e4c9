use std::{fs, path::Path};

use anyhow::{Context, Result, bail};
use goblin::{
    Object,
    elf::{Elf, header, program_header},
};
use log::{debug, info};

use crate::memory::{MemoryImage, MemorySegment};

/// Program run when no image is given: store a zero byte, load it back into
/// a0 and halt.
pub const BUILTIN_IMAGE: [u32; 5] = [
    0x0000_0297, // auipc t0, 0
    0x0002_8823, // sb    $0, 16(t0)
    0x0102_c503, // lbu   a0, 16(t0)
    0x0010_0073, // ebreak
    0xdead_beef, // data
];

#[derive(Debug)]
pub struct LoadedImage {
    pub memory: MemoryImage,
    pub entry: u32,
}

fn ram(base: u32, size: usize) -> Result<MemoryImage> {
    if size == 0 || base as u64 + size as u64 > u32::MAX as u64 + 1 {
        bail!("RAM at {base:#010x} with size {size:#x} does not fit in the address space");
    }
    Ok(MemoryImage::new(vec![MemorySegment::ram(base, size)]))
}

/// Load `path` as an ELF executable or, failing the ELF magic, as a raw
/// binary placed at `base`. Without a path the built-in image is used.
pub fn load(path: Option<&Path>, base: u32, size: usize) -> Result<LoadedImage> {
    let Some(path) = path else {
        info!("no image given, using the built-in image");
        return load_builtin(base, size);
    };

    let bytes = fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
    let loaded = if bytes.starts_with(header::ELFMAG) {
        match Object::parse(&bytes).with_context(|| format!("cannot parse {}", path.display()))? {
            Object::Elf(elf) => load_elf(&elf, &bytes, base, size)?,
            other => bail!("Unsupported object format: {other:?}"),
        }
    } else {
        load_raw(&bytes, base, size)?
    };

    info!(
        "loaded {} ({} bytes), entry {:#010x}",
        path.display(),
        bytes.len(),
        loaded.entry
    );
    Ok(loaded)
}

pub fn load_builtin(base: u32, size: usize) -> Result<LoadedImage> {
    let bytes: Vec<u8> = BUILTIN_IMAGE.iter().flat_map(|w| w.to_le_bytes()).collect();
    load_raw(&bytes, base, size)
}

pub fn load_raw(bytes: &[u8], base: u32, size: usize) -> Result<LoadedImage> {
    if bytes.len() > size {
        bail!(
            "image of {} bytes does not fit in {size:#x} bytes of RAM",
            bytes.len()
        );
    }
    let mut memory = ram(base, size)?;
    memory.write_data(base, bytes)?;
    Ok(LoadedImage {
        memory,
        entry: base,
    })
}

pub fn load_elf(elf: &Elf, file_bytes: &[u8], base: u32, size: usize) -> Result<LoadedImage> {
    if elf.is_64 || !elf.little_endian {
        bail!("expected a 32-bit little-endian ELF");
    }
    if elf.header.e_machine != header::EM_RISCV {
        bail!(
            "expected a RISC-V ELF, found machine {}",
            header::machine_to_str(elf.header.e_machine)
        );
    }

    let mut memory = ram(base, size)?;
    let ram_start = base as u64;
    let ram_end = ram_start + size as u64;

    for ph in &elf.program_headers {
        if ph.p_type != program_header::PT_LOAD || ph.p_memsz == 0 {
            continue;
        }

        if ph.p_memsz < ph.p_filesz {
            bail!(
                "Segment memsz ({}) smaller than filesz ({}) at vaddr {:#x}",
                ph.p_memsz,
                ph.p_filesz,
                ph.p_vaddr
            );
        }

        let offset = ph.p_offset as usize;
        let file_size = ph.p_filesz as usize;
        let mem_size = ph.p_memsz as usize;

        if offset
            .checked_add(file_size)
            .is_none_or(|end| end > file_bytes.len())
        {
            bail!(
                "Segment at offset {:#x} with size {:#x} exceeds file ({} bytes)",
                ph.p_offset,
                ph.p_filesz,
                file_bytes.len()
            );
        }
        let contents = &file_bytes[offset..offset + file_size];

        let vaddr = u32::try_from(ph.p_vaddr)
            .with_context(|| format!("segment vaddr {:#x} is not 32-bit", ph.p_vaddr))?;
        let seg_start = vaddr as u64;
        let seg_end = seg_start + mem_size as u64;

        if seg_start >= ram_start && seg_end <= ram_end {
            // RAM starts zeroed, so only the file part needs copying.
            memory.write_data(vaddr, contents)?;
            debug!("segment {vaddr:#010x}+{mem_size:#x} placed in RAM");
        } else if seg_start < ram_end && seg_end > ram_start {
            bail!("segment {vaddr:#010x}+{mem_size:#x} straddles the RAM boundary");
        } else {
            let mut data = vec![0u8; mem_size];
            data[..file_size].copy_from_slice(contents);
            memory
                .add_segment(MemorySegment {
                    vaddr,
                    data,
                    flags: ph.p_flags,
                })
                .with_context(|| format!("cannot map segment at {vaddr:#010x}"))?;
            debug!("segment {vaddr:#010x}+{mem_size:#x} mapped with flags {:#x}", ph.p_flags);
        }
    }

    let entry = u32::try_from(elf.entry)
        .with_context(|| format!("entry point {:#x} is not 32-bit", elf.entry))?;
    Ok(LoadedImage { memory, entry })
}
