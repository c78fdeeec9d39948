use thiserror::Error;

use super::cartridge::CartridgeError;

#[derive(Debug, Error)]
pub enum EmuError {
    #[error(transparent)]
    Cartridge(#[from] CartridgeError),

    #[error("illegal opcode ${opcode:02X} at ${addr:04X}")]
    IllegalOpcode { opcode: u8, addr: u16 },

    #[error("unsupported feature: {0}")]
    Unsupported(#[from] Unsupported),

    #[error("no cartridge loaded")]
    NoCartridge,
}

/// Hardware features this core refuses to emulate partially.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Unsupported {
    #[error("mapper {0} requires bank switching")]
    Mapper(u16),

    #[error("{0} PRG-ROM banks, at most 2 fixed banks are supported")]
    PrgBanks(usize),

    #[error("8x16 sprites")]
    TallSprites,
}
