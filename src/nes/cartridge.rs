use std::{fs, io, path::Path};

use thiserror::Error;

pub const HEADER_SIZE: usize = 16;
pub const TRAINER_SIZE: usize = 512;
pub const PRG_BANK_SIZE: usize = 16 * 1024;
pub const CHR_BANK_SIZE: usize = 8 * 1024;

const FLAG_VERTICAL_MIRRORING: u8 = 0x01;
const FLAG_BATTERY: u8 = 0x02;
const FLAG_TRAINER: u8 = 0x04;
const FLAG_FOUR_SCREEN: u8 = 0x08;

#[derive(Debug, Error)]
pub enum CartridgeError {
    #[error("failed to read ROM {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("ROM is too small to contain an iNES header ({len} bytes)")]
    HeaderTooShort { len: usize },

    #[error("invalid iNES header magic, expected NES<EOF>")]
    BadMagic,

    #[error("invalid PRG ROM: header declares zero banks")]
    NoPrgBanks,

    #[error("ROM truncated: expected {expected} bytes of {section} data but only {actual} remain")]
    Truncated {
        section: &'static str,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirroring {
    Horizontal,
    Vertical,
    FourScreen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Ntsc,
    Pal,
}

#[derive(Debug, Clone)]
pub struct Cartridge {
    mapper_id: u16,
    mirroring: Mirroring,
    has_battery_backed_ram: bool,
    ram_bank_count: u8,
    region: Region,
    prg_rom: Vec<u8>,
    chr_rom: Vec<u8>,
}

impl Cartridge {
    pub fn from_file(path: &Path) -> Result<Self, CartridgeError> {
        let bytes = fs::read(path).map_err(|source| CartridgeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_bytes(&bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CartridgeError> {
        if bytes.len() < HEADER_SIZE {
            return Err(CartridgeError::HeaderTooShort { len: bytes.len() });
        }
        if &bytes[0..4] != b"NES\x1A" {
            return Err(CartridgeError::BadMagic);
        }

        let prg_banks = bytes[4] as usize;
        let chr_banks = bytes[5] as usize;
        let flags6 = bytes[6];
        let flags7 = bytes[7];

        if prg_banks == 0 {
            return Err(CartridgeError::NoPrgBanks);
        }

        let mapper_id = ((flags6 as u16) >> 4) | ((flags7 as u16) & 0xF0);
        let mirroring = if (flags6 & FLAG_FOUR_SCREEN) != 0 {
            Mirroring::FourScreen
        } else if (flags6 & FLAG_VERTICAL_MIRRORING) != 0 {
            Mirroring::Vertical
        } else {
            Mirroring::Horizontal
        };
        let region = if (bytes[9] & 0x01) != 0 {
            Region::Pal
        } else {
            Region::Ntsc
        };

        let mut cursor = HEADER_SIZE;
        if (flags6 & FLAG_TRAINER) != 0 {
            cursor += TRAINER_SIZE;
        }

        let prg_rom = take_section(bytes, &mut cursor, prg_banks * PRG_BANK_SIZE, "PRG")?;
        let chr_rom = take_section(bytes, &mut cursor, chr_banks * CHR_BANK_SIZE, "CHR")?;

        Ok(Self {
            mapper_id,
            mirroring,
            has_battery_backed_ram: (flags6 & FLAG_BATTERY) != 0,
            ram_bank_count: bytes[8],
            region,
            prg_rom,
            chr_rom,
        })
    }

    pub fn prg_bank(&self, n: usize) -> Option<&[u8]> {
        self.prg_rom.chunks_exact(PRG_BANK_SIZE).nth(n)
    }

    pub fn chr_bank(&self, n: usize) -> Option<&[u8]> {
        self.chr_rom.chunks_exact(CHR_BANK_SIZE).nth(n)
    }

    pub fn prg_bank_count(&self) -> usize {
        self.prg_rom.len() / PRG_BANK_SIZE
    }

    pub fn chr_bank_count(&self) -> usize {
        self.chr_rom.len() / CHR_BANK_SIZE
    }

    pub fn mapper_id(&self) -> u16 {
        self.mapper_id
    }

    pub fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    pub fn has_battery_backed_ram(&self) -> bool {
        self.has_battery_backed_ram
    }

    /// 8KB PRG-RAM banks as declared by header byte 8 (0 is commonly used to mean one).
    pub fn ram_bank_count(&self) -> u8 {
        self.ram_bank_count
    }

    pub fn region(&self) -> Region {
        self.region
    }
}

fn take_section(
    bytes: &[u8],
    cursor: &mut usize,
    len: usize,
    section: &'static str,
) -> Result<Vec<u8>, CartridgeError> {
    let remaining = bytes.len().saturating_sub(*cursor);
    if remaining < len {
        return Err(CartridgeError::Truncated {
            section,
            expected: len,
            actual: remaining,
        });
    }
    let data = bytes[*cursor..*cursor + len].to_vec();
    *cursor += len;
    Ok(data)
}

#[cfg(test)]
pub(crate) fn build_ines(prg_banks: &[Vec<u8>], chr_banks: &[Vec<u8>], flags6: u8) -> Vec<u8> {
    let mut rom = Vec::new();
    rom.extend_from_slice(b"NES\x1A");
    rom.push(prg_banks.len() as u8);
    rom.push(chr_banks.len() as u8);
    rom.push(flags6);
    rom.extend_from_slice(&[0u8; 9]);
    for bank in prg_banks {
        rom.extend_from_slice(bank);
    }
    for bank in chr_banks {
        rom.extend_from_slice(bank);
    }
    rom
}
