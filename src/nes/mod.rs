pub mod bus;
pub mod cartridge;
pub mod controller;
pub mod cpu;
pub mod error;
pub mod instructions;
mod palette;
pub mod ppu;

use std::path::Path;

use tracing::info;

use crate::config::{DecodePolicy, EmulatorConfig};
use bus::Bus;
use cartridge::{Cartridge, Mirroring};
use cpu::Cpu;

pub use cartridge::CartridgeError;
pub use controller::{Button, ControllerPort};
pub use cpu::CpuRegisters;
pub use error::{EmuError, Unsupported};
pub use ppu::{FRAME_HEIGHT, FRAME_WIDTH};

/// PPU dots per CPU cycle on NTSC hardware.
pub const PPU_DOTS_PER_CPU_CYCLE: u32 = 3;

/// Upper bound on CPU steps spent looking for the end of one frame.
const FRAME_STEP_LIMIT: usize = 1_000_000;

/// The console: CPU, bus, PPU and controllers stepped in lockstep.
pub struct Nes {
    cpu: Cpu,
    config: EmulatorConfig,
    cartridge_loaded: bool,
}

impl Default for Nes {
    fn default() -> Self {
        Self::new()
    }
}

impl Nes {
    pub fn new() -> Self {
        Self::with_config(EmulatorConfig::default())
    }

    pub fn with_config(config: EmulatorConfig) -> Self {
        Self {
            cpu: Cpu::new(Bus::new(), config.decode_policy),
            config,
            cartridge_loaded: false,
        }
    }

    pub fn config(&self) -> &EmulatorConfig {
        &self.config
    }

    pub fn set_decode_policy(&mut self, policy: DecodePolicy) {
        self.config.decode_policy = policy;
        self.cpu.set_decode_policy(policy);
    }

    pub fn has_cartridge(&self) -> bool {
        self.cartridge_loaded
    }

    pub fn load_rom_from_path(&mut self, path: &Path) -> Result<(), EmuError> {
        let cartridge = Cartridge::from_file(path)?;
        self.load_cartridge(&cartridge)
    }

    /// Maps a fixed-bank cartridge and resets the console. Anything needing a
    /// mapper is rejected before the machine state is touched.
    pub fn load_cartridge(&mut self, cartridge: &Cartridge) -> Result<(), EmuError> {
        if cartridge.mapper_id() != 0 {
            return Err(Unsupported::Mapper(cartridge.mapper_id()).into());
        }
        let prg_banks = cartridge.prg_bank_count();
        if prg_banks > 2 {
            return Err(Unsupported::PrgBanks(prg_banks).into());
        }
        let (Some(lower), Some(upper)) = (
            cartridge.prg_bank(0),
            cartridge.prg_bank(prg_banks.saturating_sub(1)),
        ) else {
            return Err(cartridge::CartridgeError::NoPrgBanks.into());
        };

        let mut bus = Bus::new();
        bus.load_prg(lower, upper);
        let ppu = bus.ppu_mut();
        ppu.load_chr(cartridge.chr_bank(0));
        ppu.set_mirroring(cartridge.mirroring());

        self.cpu = Cpu::new(bus, self.config.decode_policy);
        self.cartridge_loaded = true;

        info!(
            prg_banks,
            chr_banks = cartridge.chr_bank_count(),
            mirroring = ?cartridge.mirroring(),
            region = ?cartridge.region(),
            battery = cartridge.has_battery_backed_ram(),
            "cartridge loaded"
        );

        self.reset();
        Ok(())
    }

    pub fn reset(&mut self) {
        self.cpu.reset();
        info!(pc = format_args!("${:04X}", self.cpu.pc), "reset");
    }

    /// Executes one CPU instruction without advancing the PPU.
    pub fn cpu_step(&mut self) -> Result<u32, EmuError> {
        if !self.cartridge_loaded {
            return Err(EmuError::NoCartridge);
        }
        self.cpu.step()
    }

    /// Advances the PPU by one dot.
    pub fn ppu_step(&mut self) -> Result<(), EmuError> {
        self.cpu.bus.ppu_mut().step()
    }

    /// One CPU step followed by three PPU dots per cycle it consumed.
    pub fn step(&mut self) -> Result<u32, EmuError> {
        let cycles = self.cpu_step()?;
        for _ in 0..cycles * PPU_DOTS_PER_CPU_CYCLE {
            self.ppu_step()?;
        }
        Ok(cycles)
    }

    /// Steps until the PPU finishes a frame and returns the CPU cycles spent.
    pub fn run_frame(&mut self) -> Result<u64, EmuError> {
        self.take_frame_ready();

        let mut cycles = 0u64;
        for _ in 0..FRAME_STEP_LIMIT {
            cycles += self.step()? as u64;
            if self.take_frame_ready() {
                break;
            }
        }
        Ok(cycles)
    }

    pub fn is_frame_ready(&self) -> bool {
        self.cpu.bus.ppu().is_frame_ready()
    }

    pub fn take_frame_ready(&mut self) -> bool {
        self.cpu.bus.ppu_mut().take_frame_ready()
    }

    /// 256x240 pixels packed as `0xFFRRGGBB`, row-major.
    pub fn frame_buffer(&self) -> &[u32] {
        self.cpu.bus.ppu().frame_buffer()
    }

    pub fn set_button_state(&mut self, port: ControllerPort, button: Button, pressed: bool) {
        self.cpu.bus.controller_mut(port).set_button(button, pressed);
    }

    /// Replaces all eight buttons at once, bit 0 = A through bit 7 = Right.
    pub fn set_controller_state(&mut self, port: ControllerPort, state: u8) {
        self.cpu.bus.controller_mut(port).set_state(state);
    }

    pub fn controller_state(&self, port: ControllerPort) -> u8 {
        self.cpu.bus.controller(port).state()
    }

    pub fn registers(&self) -> CpuRegisters {
        self.cpu.registers()
    }

    pub fn total_cycles(&self) -> u64 {
        self.cpu.total_cycles()
    }

    pub fn frame_count(&self) -> u64 {
        self.cpu.bus.ppu().frame_count()
    }

    pub fn nmi_count(&self) -> u64 {
        self.cpu.nmi_serviced_count()
    }

    pub fn unknown_opcode_count(&self) -> u64 {
        self.cpu.unknown_opcode_count()
    }

    pub fn last_unknown_opcode(&self) -> Option<(u8, u16)> {
        self.cpu.last_unknown_opcode()
    }

    /// (scanline, dot) of the next PPU step.
    pub fn ppu_position(&self) -> (u16, u16) {
        let ppu = self.cpu.bus.ppu();
        (ppu.scanline(), ppu.dot())
    }

    /// PPUCTRL, PPUMASK and PPUSTATUS.
    pub fn ppu_registers(&self) -> (u8, u8, u8) {
        let ppu = self.cpu.bus.ppu();
        (ppu.ctrl(), ppu.mask(), ppu.status())
    }

    pub fn mirroring(&self) -> Mirroring {
        self.cpu.bus.ppu().mirroring()
    }

    pub fn peek_memory(&self, addr: u16) -> u8 {
        self.cpu.bus.peek(addr)
    }

    pub fn peek_vram(&self, addr: u16) -> u8 {
        self.cpu.bus.ppu().peek_vram(addr)
    }

    pub fn peek_oam(&self, index: u8) -> u8 {
        self.cpu.bus.ppu().peek_oam(index)
    }
}
