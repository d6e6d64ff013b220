//! PE header inspection of EFI loaders

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use isoboot_core::{Error, Result};

pub const MACHINE_AMD64: u16 = 0x8664;
pub const MACHINE_I386: u16 = 0x014c;

const LFANEW_OFFSET: u64 = 0x3C;

/// Machine field from the COFF header of `path`
pub fn machine_type(path: &Path) -> Result<u16> {
    let mut file = File::open(path)?;

    let mut dos = [0u8; 2];
    file.read_exact(&mut dos)?;
    if &dos != b"MZ" {
        return Err(Error::UnsupportedArchitecture {
            path: path.display().to_string(),
            machine: 0,
        });
    }

    let mut offset = [0u8; 4];
    file.seek(SeekFrom::Start(LFANEW_OFFSET))?;
    file.read_exact(&mut offset)?;
    let pe_offset = u64::from(u32::from_le_bytes(offset));

    let mut header = [0u8; 6];
    file.seek(SeekFrom::Start(pe_offset))?;
    file.read_exact(&mut header)?;
    if &header[..4] != b"PE\0\0" {
        return Err(Error::UnsupportedArchitecture {
            path: path.display().to_string(),
            machine: 0,
        });
    }
    Ok(u16::from_le_bytes([header[4], header[5]]))
}

pub fn is_supported_machine(machine: u16) -> bool {
    matches!(machine, MACHINE_AMD64 | MACHINE_I386)
}

/// Fail unless the loader targets x86-64 or x86
pub fn ensure_supported(path: &Path) -> Result<u16> {
    let machine = machine_type(path)?;
    if !is_supported_machine(machine) {
        return Err(Error::UnsupportedArchitecture {
            path: path.display().to_string(),
            machine,
        });
    }
    Ok(machine)
}

#[cfg(test)]
pub(crate) fn pe_image(machine: u16) -> Vec<u8> {
    let mut bytes = vec![0u8; 0x100];
    bytes[0..2].copy_from_slice(b"MZ");
    bytes[0x3C..0x40].copy_from_slice(&0x80u32.to_le_bytes());
    bytes[0x80..0x84].copy_from_slice(b"PE\0\0");
    bytes[0x84..0x86].copy_from_slice(&machine.to_le_bytes());
    bytes
}
