use tracing::debug;

use super::cartridge::PRG_BANK_SIZE;
use super::controller::{Controller, ControllerPort};
use super::ppu::Ppu;

const MEMORY_SIZE: usize = 0x10000;
const RAM_SIZE: usize = 0x0800;
const RAM_MIRROR_END: u16 = 0x1FFF;
const PPU_REGISTER_END: u16 = 0x3FFF;
const OAM_DMA: u16 = 0x4014;
const JOYPAD1: u16 = 0x4016;
const JOYPAD2: u16 = 0x4017;
const PRG_LOWER: usize = 0x8000;
const PRG_UPPER: usize = 0xC000;

/// CPU address space. Owns the 64KB backing array together with the devices
/// mapped into it.
pub struct Bus {
    memory: Box<[u8]>,
    ppu: Ppu,
    controllers: [Controller; 2],
    oam_dma_pending: bool,
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus {
    pub fn new() -> Self {
        Self {
            memory: vec![0u8; MEMORY_SIZE].into_boxed_slice(),
            ppu: Ppu::new(),
            controllers: [Controller::default(); 2],
            oam_dma_pending: false,
        }
    }

    pub fn reset(&mut self) {
        self.ppu.reset();
        for controller in &mut self.controllers {
            controller.reset();
        }
        self.oam_dma_pending = false;
    }

    /// Maps two 16KB banks into 0x8000-0xBFFF and 0xC000-0xFFFF.
    pub fn load_prg(&mut self, lower: &[u8], upper: &[u8]) {
        for (base, bank) in [(PRG_LOWER, lower), (PRG_UPPER, upper)] {
            let len = bank.len().min(PRG_BANK_SIZE);
            let window = &mut self.memory[base..base + PRG_BANK_SIZE];
            window.fill(0);
            window[..len].copy_from_slice(&bank[..len]);
        }
    }

    pub fn ppu(&self) -> &Ppu {
        &self.ppu
    }

    pub fn ppu_mut(&mut self) -> &mut Ppu {
        &mut self.ppu
    }

    pub fn controller(&self, port: ControllerPort) -> &Controller {
        &self.controllers[port.index()]
    }

    pub fn controller_mut(&mut self, port: ControllerPort) -> &mut Controller {
        &mut self.controllers[port.index()]
    }

    /// True once after each write to 0x4014.
    pub fn take_oam_dma(&mut self) -> bool {
        std::mem::take(&mut self.oam_dma_pending)
    }

    pub fn read(&mut self, addr: u16) -> u8 {
        match addr {
            0x2000..=PPU_REGISTER_END => {
                let reg = ppu_register(addr);
                match reg {
                    0x2002 | 0x2004 | 0x2007 => self.ppu.cpu_read_register(reg),
                    _ => self.memory[reg as usize],
                }
            }
            JOYPAD1 => self.controllers[0].read(),
            JOYPAD2 => self.controllers[1].read(),
            _ => self.memory[addr as usize],
        }
    }

    pub fn write(&mut self, addr: u16, value: u8) {
        match addr {
            0x0000..=RAM_MIRROR_END => {
                let offset = addr as usize % RAM_SIZE;
                for mirror in (offset..=RAM_MIRROR_END as usize).step_by(RAM_SIZE) {
                    self.memory[mirror] = value;
                }
            }
            0x2000..=PPU_REGISTER_END => {
                let reg = ppu_register(addr);
                self.memory[reg as usize] = value;
                self.ppu.cpu_write_register(reg, value);
            }
            OAM_DMA => {
                self.memory[addr as usize] = value;
                self.oam_dma(value);
            }
            JOYPAD1 => {
                self.memory[addr as usize] = value;
                for controller in &mut self.controllers {
                    controller.write_strobe(value);
                }
            }
            0x8000..=0xFFFF => {
                debug!(addr = format_args!("${addr:04X}"), value, "ignored write to PRG-ROM");
            }
            _ => self.memory[addr as usize] = value,
        }
    }

    pub fn read_u16(&mut self, addr: u16) -> u16 {
        let lo = self.read(addr) as u16;
        let hi = self.read(addr.wrapping_add(1)) as u16;
        (hi << 8) | lo
    }

    /// Reads without register side effects.
    pub fn peek(&self, addr: u16) -> u8 {
        match addr {
            0x2000..=PPU_REGISTER_END => {
                let reg = ppu_register(addr);
                match reg {
                    0x2002 => self.ppu.status(),
                    0x2004 => self.ppu.peek_oam(self.ppu.oam_addr()),
                    _ => self.memory[reg as usize],
                }
            }
            _ => self.memory[addr as usize],
        }
    }

    fn oam_dma(&mut self, page: u8) {
        let base = (page as u16) << 8;
        let mut bytes = [0u8; 256];
        for (offset, slot) in bytes.iter_mut().enumerate() {
            *slot = self.read(base.wrapping_add(offset as u16));
        }
        self.ppu.write_oam_dma(&bytes);
        self.oam_dma_pending = true;
        debug!(page = format_args!("${page:02X}"), "OAM DMA");
    }
}

fn ppu_register(addr: u16) -> u16 {
    0x2000 | (addr & 0x0007)
}
