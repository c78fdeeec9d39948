use super::cartridge::{CHR_BANK_SIZE, Mirroring};
use super::error::{EmuError, Unsupported};
use super::palette::packed_color;

pub const FRAME_WIDTH: usize = 256;
pub const FRAME_HEIGHT: usize = 240;

pub const DOTS_PER_SCANLINE: u16 = 341;
pub const SCANLINES_PER_FRAME: u16 = 262;
pub const VBLANK_SCANLINE: u16 = 241;
pub const PRE_RENDER_SCANLINE: u16 = 261;

const VRAM_SIZE: usize = 0x4000;
const NAMETABLE_BASE: usize = 0x2000;
const PALETTE_BASE: usize = 0x3F00;

const CTRL_NAMETABLE: u8 = 0x03;
const CTRL_VRAM_INC_32: u8 = 0x04;
const CTRL_SPRITE_TABLE: u8 = 0x08;
const CTRL_BG_TABLE: u8 = 0x10;
const CTRL_SPRITE_SIZE_16: u8 = 0x20;
const CTRL_NMI_ENABLE: u8 = 0x80;

const MASK_GREYSCALE: u8 = 0x01;
const MASK_SHOW_BG_LEFT: u8 = 0x02;
const MASK_SHOW_SPRITE_LEFT: u8 = 0x04;
const MASK_SHOW_BG: u8 = 0x08;
const MASK_SHOW_SPRITES: u8 = 0x10;

pub const STATUS_SPRITE_OVERFLOW: u8 = 0x20;
pub const STATUS_SPRITE_ZERO_HIT: u8 = 0x40;
pub const STATUS_VBLANK: u8 = 0x80;

const SPRITE_HEIGHT: u16 = 8;
const MAX_SPRITES_PER_LINE: usize = 8;

const ATTR_PALETTE: u8 = 0x03;
const ATTR_BEHIND_BG: u8 = 0x20;
const ATTR_FLIP_H: u8 = 0x40;
const ATTR_FLIP_V: u8 = 0x80;

/// The 2C02 picture processing unit, advanced one dot per [`Ppu::step`].
pub struct Ppu {
    ctrl: u8,
    mask: u8,
    status: u8,

    oam_addr: u8,
    oam: [u8; 256],
    secondary_oam: [u8; 32],

    /// Full 14-bit PPU address space: pattern tables, nametables and palette.
    vram: Box<[u8]>,
    chr_writable: bool,
    mirroring: Mirroring,

    write_toggle: bool,
    v: u16,
    t: u16,
    fine_x: u8,
    read_buffer: u8,
    open_bus: u8,

    scanline: u16,
    dot: u16,
    frame_ready: bool,
    frame_count: u64,
    interrupt_line: bool,

    next_tile_id: u8,
    next_tile_attr: u8,
    next_tile_lsb: u8,
    next_tile_msb: u8,
    bg_shift_pattern_lo: u16,
    bg_shift_pattern_hi: u16,
    bg_shift_attr_lo: u16,
    bg_shift_attr_hi: u16,

    sprite_count: usize,
    sprite_patterns_lo: [u8; MAX_SPRITES_PER_LINE],
    sprite_patterns_hi: [u8; MAX_SPRITES_PER_LINE],
    sprite_x: [u8; MAX_SPRITES_PER_LINE],
    sprite_attributes: [u8; MAX_SPRITES_PER_LINE],
    sprite_zero_loaded: bool,

    frame_buffer: Vec<u32>,
}

impl Default for Ppu {
    fn default() -> Self {
        Self::new()
    }
}

impl Ppu {
    pub fn new() -> Self {
        let mut vram = vec![0u8; VRAM_SIZE].into_boxed_slice();
        vram[PALETTE_BASE..PALETTE_BASE + 0x20].fill(0x0F);

        Self {
            ctrl: 0,
            mask: 0,
            status: 0,
            oam_addr: 0,
            oam: [0; 256],
            secondary_oam: [0xFF; 32],
            vram,
            chr_writable: true,
            mirroring: Mirroring::Horizontal,
            write_toggle: false,
            v: 0,
            t: 0,
            fine_x: 0,
            read_buffer: 0,
            open_bus: 0,
            scanline: 0,
            dot: 0,
            frame_ready: false,
            frame_count: 0,
            interrupt_line: false,
            next_tile_id: 0,
            next_tile_attr: 0,
            next_tile_lsb: 0,
            next_tile_msb: 0,
            bg_shift_pattern_lo: 0,
            bg_shift_pattern_hi: 0,
            bg_shift_attr_lo: 0,
            bg_shift_attr_hi: 0,
            sprite_count: 0,
            sprite_patterns_lo: [0; MAX_SPRITES_PER_LINE],
            sprite_patterns_hi: [0; MAX_SPRITES_PER_LINE],
            sprite_x: [0; MAX_SPRITES_PER_LINE],
            sprite_attributes: [0; MAX_SPRITES_PER_LINE],
            sprite_zero_loaded: false,
            frame_buffer: vec![0xFF00_0000; FRAME_WIDTH * FRAME_HEIGHT],
        }
    }

    /// Clears registers and timing state. Pattern, nametable and palette
    /// memory survive a reset.
    pub fn reset(&mut self) {
        self.ctrl = 0;
        self.mask = 0;
        self.status = 0;
        self.oam_addr = 0;
        self.secondary_oam = [0xFF; 32];
        self.write_toggle = false;
        self.v = 0;
        self.t = 0;
        self.fine_x = 0;
        self.read_buffer = 0;
        self.open_bus = 0;
        self.scanline = 0;
        self.dot = 0;
        self.frame_ready = false;
        self.frame_count = 0;
        self.interrupt_line = false;

        self.next_tile_id = 0;
        self.next_tile_attr = 0;
        self.next_tile_lsb = 0;
        self.next_tile_msb = 0;
        self.bg_shift_pattern_lo = 0;
        self.bg_shift_pattern_hi = 0;
        self.bg_shift_attr_lo = 0;
        self.bg_shift_attr_hi = 0;
        self.clear_sprite_slots(0);
        self.sprite_count = 0;
        self.sprite_zero_loaded = false;
    }

    /// Installs pattern data. Without a CHR bank the pattern area becomes
    /// writable CHR-RAM.
    pub fn load_chr(&mut self, bank: Option<&[u8]>) {
        let patterns = &mut self.vram[..CHR_BANK_SIZE];
        match bank {
            Some(bank) => {
                let len = bank.len().min(CHR_BANK_SIZE);
                patterns.fill(0);
                patterns[..len].copy_from_slice(&bank[..len]);
                self.chr_writable = false;
            }
            None => {
                patterns.fill(0);
                self.chr_writable = true;
            }
        }
    }

    pub fn set_mirroring(&mut self, mirroring: Mirroring) {
        self.mirroring = mirroring;
    }

    pub fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    pub fn frame_buffer(&self) -> &[u32] {
        &self.frame_buffer
    }

    pub fn is_frame_ready(&self) -> bool {
        self.frame_ready
    }

    pub fn take_frame_ready(&mut self) -> bool {
        std::mem::take(&mut self.frame_ready)
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Level of the NMI output toward the CPU.
    pub fn interrupt_line(&self) -> bool {
        self.interrupt_line
    }

    pub fn scanline(&self) -> u16 {
        self.scanline
    }

    pub fn dot(&self) -> u16 {
        self.dot
    }

    pub fn ctrl(&self) -> u8 {
        self.ctrl
    }

    pub fn mask(&self) -> u8 {
        self.mask
    }

    pub fn status(&self) -> u8 {
        self.status
    }

    pub fn vram_addr(&self) -> u16 {
        self.v
    }

    pub fn oam_addr(&self) -> u8 {
        self.oam_addr
    }

    pub fn peek_vram(&self, addr: u16) -> u8 {
        self.vram[self.vram_index(addr)]
    }

    pub fn peek_oam(&self, index: u8) -> u8 {
        self.oam[index as usize]
    }

    pub fn secondary_oam(&self) -> &[u8; 32] {
        &self.secondary_oam
    }

    /// Handles a CPU read of PPUSTATUS, OAMDATA or PPUDATA. `reg` is the
    /// canonical 0x2000-0x2007 address.
    pub fn cpu_read_register(&mut self, reg: u16) -> u8 {
        match reg {
            0x2002 => {
                let value = (self.status & 0xE0) | (self.open_bus & 0x1F);
                self.status &= !STATUS_VBLANK;
                self.write_toggle = false;
                value
            }
            0x2004 => self.oam[self.oam_addr as usize],
            0x2007 => {
                let addr = self.v & 0x3FFF;
                let value = self.ppu_read(addr);
                let result = if addr >= 0x3F00 {
                    self.read_buffer = self.ppu_read(addr - 0x1000);
                    value
                } else {
                    std::mem::replace(&mut self.read_buffer, value)
                };
                self.increment_vram_addr();
                result
            }
            _ => self.open_bus,
        }
    }

    pub fn cpu_write_register(&mut self, reg: u16, value: u8) {
        self.open_bus = value;
        match reg {
            0x2000 => {
                let was_enabled = (self.ctrl & CTRL_NMI_ENABLE) != 0;
                self.ctrl = value;
                self.t = (self.t & !0x0C00) | (((value & CTRL_NAMETABLE) as u16) << 10);

                let enabled = (value & CTRL_NMI_ENABLE) != 0;
                if !enabled {
                    self.interrupt_line = false;
                } else if !was_enabled && (self.status & STATUS_VBLANK) != 0 {
                    self.interrupt_line = true;
                }
            }
            0x2001 => self.mask = value,
            0x2003 => self.oam_addr = value,
            0x2004 => {
                self.oam[self.oam_addr as usize] = value;
                self.oam_addr = self.oam_addr.wrapping_add(1);
            }
            0x2005 => {
                if !self.write_toggle {
                    self.fine_x = value & 0x07;
                    self.t = (self.t & !0x001F) | ((value as u16) >> 3);
                } else {
                    self.t = (self.t & !0x03E0) | (((value as u16) >> 3) << 5);
                    self.t = (self.t & !0x7000) | (((value as u16) & 0x07) << 12);
                }
                self.write_toggle = !self.write_toggle;
            }
            0x2006 => {
                if !self.write_toggle {
                    self.t = (self.t & 0x00FF) | (((value as u16) & 0x3F) << 8);
                } else {
                    self.t = (self.t & 0x7F00) | value as u16;
                    self.v = self.t;
                }
                self.write_toggle = !self.write_toggle;
            }
            0x2007 => {
                self.ppu_write(self.v & 0x3FFF, value);
                self.increment_vram_addr();
            }
            _ => {}
        }
    }

    pub fn write_oam_dma(&mut self, bytes: &[u8; 256]) {
        for byte in bytes {
            self.oam[self.oam_addr as usize] = *byte;
            self.oam_addr = self.oam_addr.wrapping_add(1);
        }
    }

    /// Advances one dot. Fails only when the program asks for a feature this
    /// PPU does not model.
    pub fn step(&mut self) -> Result<(), EmuError> {
        let visible_line = self.scanline < FRAME_HEIGHT as u16;
        let pre_render = self.scanline == PRE_RENDER_SCANLINE;
        let rendering_enabled = self.rendering_enabled();
        let dot = self.dot;

        if self.scanline == VBLANK_SCANLINE && dot == 1 {
            self.status |= STATUS_VBLANK;
            self.oam_addr = 0;
            if (self.ctrl & CTRL_NMI_ENABLE) != 0 {
                self.interrupt_line = true;
            }
        }

        if pre_render && dot == 1 {
            self.status &= !(STATUS_VBLANK | STATUS_SPRITE_ZERO_HIT | STATUS_SPRITE_OVERFLOW);
            self.interrupt_line = false;
            self.sprite_count = 0;
            self.sprite_zero_loaded = false;
        }

        if (visible_line || pre_render) && rendering_enabled {
            let fetch_window = (2..=257).contains(&dot) || (321..=337).contains(&dot);
            if fetch_window {
                self.shift_background_registers();
                self.fetch_background((dot - 1) & 0x07);
            }
            if dot == 256 {
                self.increment_y();
            }
            if dot == 257 {
                self.copy_horizontal_bits();
                if visible_line {
                    self.evaluate_sprites(self.scanline)?;
                }
            }
            if pre_render && (280..=304).contains(&dot) {
                self.copy_vertical_bits();
            }
        }

        if visible_line && (1..=256).contains(&dot) {
            self.render_pixel((dot - 1) as usize, self.scanline as usize);
            if rendering_enabled {
                self.shift_sprite_registers();
            }
        }

        self.dot += 1;
        if self.dot >= DOTS_PER_SCANLINE {
            self.dot = 0;
            self.scanline += 1;
            if self.scanline >= SCANLINES_PER_FRAME {
                self.scanline = 0;
                self.frame_ready = true;
                self.frame_count = self.frame_count.wrapping_add(1);
            }
        }

        Ok(())
    }

    fn rendering_enabled(&self) -> bool {
        (self.mask & (MASK_SHOW_BG | MASK_SHOW_SPRITES)) != 0
    }

    fn background_table(&self) -> u16 {
        if (self.ctrl & CTRL_BG_TABLE) != 0 {
            0x1000
        } else {
            0x0000
        }
    }

    fn sprite_table(&self) -> u16 {
        if (self.ctrl & CTRL_SPRITE_TABLE) != 0 {
            0x1000
        } else {
            0x0000
        }
    }

    fn fetch_background(&mut self, phase: u16) {
        match phase {
            0 => {
                self.load_background_shifters();
                self.next_tile_id = self.ppu_read(0x2000 | (self.v & 0x0FFF));
            }
            2 => {
                let addr = 0x23C0
                    | (self.v & 0x0C00)
                    | ((self.v >> 4) & 0x0038)
                    | ((self.v >> 2) & 0x0007);
                let attr = self.ppu_read(addr);
                let shift = ((self.v >> 4) & 0x04) | (self.v & 0x02);
                self.next_tile_attr = (attr >> shift) & 0x03;
            }
            4 => {
                let fine_y = (self.v >> 12) & 0x07;
                let addr = self.background_table() + (self.next_tile_id as u16) * 16 + fine_y;
                self.next_tile_lsb = self.ppu_read(addr);
            }
            6 => {
                let fine_y = (self.v >> 12) & 0x07;
                let addr = self.background_table() + (self.next_tile_id as u16) * 16 + fine_y + 8;
                self.next_tile_msb = self.ppu_read(addr);
            }
            7 => self.increment_coarse_x(),
            _ => {}
        }
    }

    fn render_pixel(&mut self, x: usize, y: usize) {
        let (bg_pixel, bg_palette) = self.background_sample(x);
        let sprite = self.sprite_sample(x);

        if let Some((pixel, _, _, true)) = sprite
            && pixel != 0
            && bg_pixel != 0
            && x < 255
        {
            self.status |= STATUS_SPRITE_ZERO_HIT;
        }

        let palette_index = match sprite {
            Some((pixel, palette, behind_bg, _)) if bg_pixel == 0 || !behind_bg => {
                0x10 | (palette << 2) | pixel
            }
            _ if bg_pixel != 0 => (bg_palette << 2) | bg_pixel,
            _ => 0,
        };

        let mut color = self.ppu_read(0x3F00 | palette_index as u16);
        if (self.mask & MASK_GREYSCALE) != 0 {
            color &= 0x30;
        }
        self.frame_buffer[y * FRAME_WIDTH + x] = packed_color(color);
    }

    fn background_sample(&self, x: usize) -> (u8, u8) {
        if (self.mask & MASK_SHOW_BG) == 0 {
            return (0, 0);
        }
        if x < 8 && (self.mask & MASK_SHOW_BG_LEFT) == 0 {
            return (0, 0);
        }

        let bit = 0x8000u16 >> self.fine_x;

        let p0 = ((self.bg_shift_pattern_lo & bit) != 0) as u8;
        let p1 = ((self.bg_shift_pattern_hi & bit) != 0) as u8;
        let a0 = ((self.bg_shift_attr_lo & bit) != 0) as u8;
        let a1 = ((self.bg_shift_attr_hi & bit) != 0) as u8;

        ((p1 << 1) | p0, (a1 << 1) | a0)
    }

    /// First opaque sprite pixel at `x` as (pixel, palette, behind background,
    /// is sprite zero).
    fn sprite_sample(&self, x: usize) -> Option<(u8, u8, bool, bool)> {
        if (self.mask & MASK_SHOW_SPRITES) == 0 {
            return None;
        }
        if x < 8 && (self.mask & MASK_SHOW_SPRITE_LEFT) == 0 {
            return None;
        }

        (0..self.sprite_count).find_map(|i| {
            if self.sprite_x[i] != 0 {
                return None;
            }
            let p0 = (self.sprite_patterns_lo[i] & 0x80) >> 7;
            let p1 = (self.sprite_patterns_hi[i] & 0x80) >> 6;
            let pixel = p1 | p0;
            if pixel == 0 {
                return None;
            }
            let attributes = self.sprite_attributes[i];
            Some((
                pixel,
                attributes & ATTR_PALETTE,
                (attributes & ATTR_BEHIND_BG) != 0,
                i == 0 && self.sprite_zero_loaded,
            ))
        })
    }

    fn shift_background_registers(&mut self) {
        self.bg_shift_pattern_lo <<= 1;
        self.bg_shift_pattern_hi <<= 1;
        self.bg_shift_attr_lo <<= 1;
        self.bg_shift_attr_hi <<= 1;
    }

    fn shift_sprite_registers(&mut self) {
        for i in 0..self.sprite_count {
            if self.sprite_x[i] > 0 {
                self.sprite_x[i] -= 1;
            } else {
                self.sprite_patterns_lo[i] <<= 1;
                self.sprite_patterns_hi[i] <<= 1;
            }
        }
    }

    fn load_background_shifters(&mut self) {
        self.bg_shift_pattern_lo = (self.bg_shift_pattern_lo & 0xFF00) | self.next_tile_lsb as u16;
        self.bg_shift_pattern_hi = (self.bg_shift_pattern_hi & 0xFF00) | self.next_tile_msb as u16;

        let attr_lo = if (self.next_tile_attr & 0x01) != 0 { 0xFF } else { 0x00 };
        let attr_hi = if (self.next_tile_attr & 0x02) != 0 { 0xFF } else { 0x00 };
        self.bg_shift_attr_lo = (self.bg_shift_attr_lo & 0xFF00) | attr_lo;
        self.bg_shift_attr_hi = (self.bg_shift_attr_hi & 0xFF00) | attr_hi;
    }

    fn increment_coarse_x(&mut self) {
        if (self.v & 0x001F) == 31 {
            self.v &= !0x001F;
            self.v ^= 0x0400;
        } else {
            self.v = self.v.wrapping_add(1);
        }
    }

    fn increment_y(&mut self) {
        if (self.v & 0x7000) != 0x7000 {
            self.v = self.v.wrapping_add(0x1000);
            return;
        }

        self.v &= !0x7000;
        let mut y = (self.v & 0x03E0) >> 5;
        if y == 29 {
            y = 0;
            self.v ^= 0x0800;
        } else if y == 31 {
            y = 0;
        } else {
            y += 1;
        }
        self.v = (self.v & !0x03E0) | (y << 5);
    }

    fn copy_horizontal_bits(&mut self) {
        self.v = (self.v & !0x041F) | (self.t & 0x041F);
    }

    fn copy_vertical_bits(&mut self) {
        self.v = (self.v & !0x7BE0) | (self.t & 0x7BE0);
    }

    /// Rebuilds secondary OAM from the sprites covering `line` and fetches
    /// their pattern rows for display on the following line.
    pub(crate) fn evaluate_sprites(&mut self, line: u16) -> Result<(), EmuError> {
        if (self.ctrl & CTRL_SPRITE_SIZE_16) != 0 && (self.mask & MASK_SHOW_SPRITES) != 0 {
            return Err(Unsupported::TallSprites.into());
        }

        self.secondary_oam = [0xFF; 32];
        self.sprite_zero_loaded = false;

        let mut found = 0usize;
        for n in 0..64 {
            let entry = &self.oam[n * 4..n * 4 + 4];
            let y = entry[0] as u16;
            if line < y || line - y >= SPRITE_HEIGHT {
                continue;
            }
            if found == MAX_SPRITES_PER_LINE {
                self.status |= STATUS_SPRITE_OVERFLOW;
                break;
            }
            self.secondary_oam[found * 4..found * 4 + 4].copy_from_slice(entry);
            if n == 0 {
                self.sprite_zero_loaded = true;
            }
            found += 1;
        }

        for slot in 0..found {
            let y = self.secondary_oam[slot * 4] as u16;
            let tile = self.secondary_oam[slot * 4 + 1] as u16;
            let attributes = self.secondary_oam[slot * 4 + 2];
            let x = self.secondary_oam[slot * 4 + 3];

            let mut row = line - y;
            if (attributes & ATTR_FLIP_V) != 0 {
                row = SPRITE_HEIGHT - 1 - row;
            }
            let addr = self.sprite_table() + tile * 16 + row;
            let mut low = self.ppu_read(addr);
            let mut high = self.ppu_read(addr + 8);
            if (attributes & ATTR_FLIP_H) != 0 {
                low = low.reverse_bits();
                high = high.reverse_bits();
            }

            self.sprite_patterns_lo[slot] = low;
            self.sprite_patterns_hi[slot] = high;
            self.sprite_x[slot] = x;
            self.sprite_attributes[slot] = attributes;
        }
        self.clear_sprite_slots(found);
        self.sprite_count = found;

        Ok(())
    }

    fn clear_sprite_slots(&mut self, from: usize) {
        for slot in from..MAX_SPRITES_PER_LINE {
            self.sprite_patterns_lo[slot] = 0;
            self.sprite_patterns_hi[slot] = 0;
            self.sprite_x[slot] = 0;
            self.sprite_attributes[slot] = 0;
        }
    }

    fn increment_vram_addr(&mut self) {
        let step = if (self.ctrl & CTRL_VRAM_INC_32) != 0 { 32 } else { 1 };
        self.v = self.v.wrapping_add(step) & 0x7FFF;
    }

    fn ppu_read(&self, addr: u16) -> u8 {
        self.vram[self.vram_index(addr)]
    }

    fn ppu_write(&mut self, addr: u16, value: u8) {
        let addr = addr & 0x3FFF;
        match addr {
            0x0000..=0x1FFF => {
                if self.chr_writable {
                    self.vram[addr as usize] = value;
                }
            }
            0x2000..=0x3EFF => {
                let index = self.vram_index(addr);
                self.vram[index] = value;
            }
            _ => {
                let entry = (addr & 0x1F) as usize;
                self.vram[PALETTE_BASE + entry] = value;
                if (entry & 0x03) == 0 {
                    self.vram[PALETTE_BASE + (entry ^ 0x10)] = value;
                }
            }
        }
    }

    fn vram_index(&self, addr: u16) -> usize {
        let addr = addr & 0x3FFF;
        match addr {
            0x0000..=0x1FFF => addr as usize,
            0x2000..=0x3EFF => NAMETABLE_BASE + nametable_offset(addr, self.mirroring),
            _ => PALETTE_BASE + palette_offset(addr),
        }
    }
}

/// Offset into the 4KB nametable area after applying the cartridge's
/// mirroring. 0x3000-0x3EFF folds onto 0x2000-0x2EFF.
fn nametable_offset(addr: u16, mirroring: Mirroring) -> usize {
    let index = ((addr - 0x2000) & 0x0FFF) as usize;
    let table = index / 0x400;
    let offset = index % 0x400;

    let mapped_table = match mirroring {
        Mirroring::Horizontal => table >> 1,
        Mirroring::Vertical => table & 1,
        Mirroring::FourScreen => table,
    };

    mapped_table * 0x400 + offset
}

fn palette_offset(addr: u16) -> usize {
    let mut index = (addr & 0x1F) as usize;
    if index >= 0x10 && (index & 0x03) == 0 {
        index -= 0x10;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn run_until(ppu: &mut Ppu, scanline: u16, dot: u16) {
        while !(ppu.scanline == scanline && ppu.dot == dot) {
            ppu.step().unwrap();
        }
    }

    fn set_vram_addr(ppu: &mut Ppu, addr: u16) {
        ppu.cpu_write_register(0x2006, (addr >> 8) as u8);
        ppu.cpu_write_register(0x2006, addr as u8);
    }

    #[test]
    fn vblank_entry_sets_flag_and_raises_line_when_enabled() {
        let mut ppu = Ppu::new();
        ppu.cpu_write_register(0x2000, CTRL_NMI_ENABLE);
        ppu.cpu_write_register(0x2003, 0x40);

        run_until(&mut ppu, VBLANK_SCANLINE, 1);
        assert!(!ppu.interrupt_line());
        ppu.step().unwrap();

        assert_eq!(ppu.status() & STATUS_VBLANK, STATUS_VBLANK);
        assert!(ppu.interrupt_line());
        assert_eq!(ppu.oam_addr(), 0);

        let status = ppu.cpu_read_register(0x2002);
        assert_eq!(status & STATUS_VBLANK, STATUS_VBLANK);
        assert_eq!(ppu.status() & STATUS_VBLANK, 0);
    }

    #[test]
    fn vblank_without_nmi_enable_keeps_line_low() {
        let mut ppu = Ppu::new();
        run_until(&mut ppu, VBLANK_SCANLINE, 2);
        assert_eq!(ppu.status() & STATUS_VBLANK, STATUS_VBLANK);
        assert!(!ppu.interrupt_line());

        ppu.cpu_write_register(0x2000, CTRL_NMI_ENABLE);
        assert!(ppu.interrupt_line());

        ppu.cpu_write_register(0x2000, 0);
        assert!(!ppu.interrupt_line());
    }

    #[test]
    fn pre_render_clears_flags_and_lowers_line() {
        let mut ppu = Ppu::new();
        ppu.cpu_write_register(0x2000, CTRL_NMI_ENABLE);
        run_until(&mut ppu, VBLANK_SCANLINE, 2);
        ppu.status |= STATUS_SPRITE_ZERO_HIT | STATUS_SPRITE_OVERFLOW;

        run_until(&mut ppu, PRE_RENDER_SCANLINE, 2);
        assert_eq!(ppu.status(), 0);
        assert!(!ppu.interrupt_line());
    }

    #[test]
    fn frame_is_ready_when_scanline_wraps() {
        let mut ppu = Ppu::new();
        let dots_per_frame = DOTS_PER_SCANLINE as u32 * SCANLINES_PER_FRAME as u32;
        for _ in 0..dots_per_frame - 1 {
            ppu.step().unwrap();
        }
        assert!(!ppu.is_frame_ready());

        ppu.step().unwrap();
        assert_eq!((ppu.scanline(), ppu.dot()), (0, 0));
        assert!(ppu.take_frame_ready());
        assert!(!ppu.is_frame_ready());
        assert_eq!(ppu.frame_count(), 1);
    }

    #[test]
    fn status_read_resets_write_toggle() {
        let mut ppu = Ppu::new();
        ppu.cpu_write_register(0x2006, 0x21);
        ppu.cpu_read_register(0x2002);
        set_vram_addr(&mut ppu, 0x2345);
        assert_eq!(ppu.vram_addr(), 0x2345);
    }

    #[test]
    fn status_read_mixes_in_last_written_low_bits() {
        let mut ppu = Ppu::new();
        ppu.status = STATUS_VBLANK | STATUS_SPRITE_ZERO_HIT;
        ppu.cpu_write_register(0x2001, 0x1F);
        assert_eq!(ppu.cpu_read_register(0x2002), 0xDF);
    }

    #[test]
    fn scroll_writes_fill_t_and_fine_x() {
        let mut ppu = Ppu::new();
        ppu.cpu_write_register(0x2000, 0x02);
        ppu.cpu_write_register(0x2005, 0x7D);
        ppu.cpu_write_register(0x2005, 0x5E);

        assert_eq!(ppu.fine_x, 0x05);
        assert_eq!(ppu.t & 0x001F, 0x0F);
        assert_eq!((ppu.t >> 5) & 0x1F, 0x0B);
        assert_eq!((ppu.t >> 12) & 0x07, 0x06);
        assert_eq!(ppu.t & 0x0C00, 0x0800);
    }

    #[test]
    fn ppudata_reads_are_buffered_except_palette() {
        let mut ppu = Ppu::new();
        set_vram_addr(&mut ppu, 0x2000);
        ppu.cpu_write_register(0x2007, 0xAB);
        ppu.cpu_write_register(0x2007, 0xCD);

        set_vram_addr(&mut ppu, 0x2000);
        let _stale = ppu.cpu_read_register(0x2007);
        assert_eq!(ppu.cpu_read_register(0x2007), 0xAB);
        assert_eq!(ppu.cpu_read_register(0x2007), 0xCD);

        set_vram_addr(&mut ppu, 0x3F01);
        ppu.cpu_write_register(0x2007, 0x2A);
        set_vram_addr(&mut ppu, 0x3F01);
        assert_eq!(ppu.cpu_read_register(0x2007), 0x2A);
    }

    #[test]
    fn vram_increment_follows_ctrl() {
        let mut ppu = Ppu::new();
        ppu.cpu_write_register(0x2000, CTRL_VRAM_INC_32);
        set_vram_addr(&mut ppu, 0x2000);
        ppu.cpu_write_register(0x2007, 0x01);
        assert_eq!(ppu.vram_addr(), 0x2020);

        ppu.cpu_write_register(0x2000, 0);
        ppu.cpu_write_register(0x2007, 0x02);
        assert_eq!(ppu.vram_addr(), 0x2021);
    }

    #[test]
    fn palette_backdrop_entries_alias() {
        let mut ppu = Ppu::new();
        for (addr, value) in [(0x3F10u16, 0x11u8), (0x3F04, 0x14), (0x3F18, 0x18), (0x3F0C, 0x1C)] {
            set_vram_addr(&mut ppu, addr);
            ppu.cpu_write_register(0x2007, value);
        }

        assert_eq!(ppu.peek_vram(0x3F00), 0x11);
        assert_eq!(ppu.peek_vram(0x3F14), 0x14);
        assert_eq!(ppu.peek_vram(0x3F08), 0x18);
        assert_eq!(ppu.peek_vram(0x3F1C), 0x1C);
        assert_eq!(ppu.vram[PALETTE_BASE + 0x10], 0x11);
        assert_eq!(ppu.vram[PALETTE_BASE + 0x14], 0x14);
        assert_eq!(ppu.peek_vram(0x3F21), ppu.peek_vram(0x3F01));
    }

    #[test]
    fn nametable_mirroring_modes() {
        assert_eq!(nametable_offset(0x2400, Mirroring::Horizontal), 0x000);
        assert_eq!(nametable_offset(0x2800, Mirroring::Horizontal), 0x400);
        assert_eq!(nametable_offset(0x2C05, Mirroring::Horizontal), 0x405);

        assert_eq!(nametable_offset(0x2800, Mirroring::Vertical), 0x000);
        assert_eq!(nametable_offset(0x2C05, Mirroring::Vertical), 0x405);

        assert_eq!(nametable_offset(0x2C05, Mirroring::FourScreen), 0xC05);
        assert_eq!(nametable_offset(0x3005, Mirroring::FourScreen), 0x005);

        let mut ppu = Ppu::new();
        ppu.set_mirroring(Mirroring::Vertical);
        set_vram_addr(&mut ppu, 0x2410);
        ppu.cpu_write_register(0x2007, 0x77);
        assert_eq!(ppu.peek_vram(0x2C10), 0x77);
        assert_eq!(ppu.peek_vram(0x2010), 0x00);
    }

    #[test]
    fn chr_rom_is_read_only_and_chr_ram_is_writable() {
        let mut ppu = Ppu::new();
        let bank = vec![0x5A; CHR_BANK_SIZE];
        ppu.load_chr(Some(&bank));
        set_vram_addr(&mut ppu, 0x0010);
        ppu.cpu_write_register(0x2007, 0x00);
        assert_eq!(ppu.peek_vram(0x0010), 0x5A);

        ppu.load_chr(None);
        set_vram_addr(&mut ppu, 0x0010);
        ppu.cpu_write_register(0x2007, 0x99);
        assert_eq!(ppu.peek_vram(0x0010), 0x99);
    }

    #[test]
    fn ninth_sprite_on_a_line_sets_overflow() {
        let mut ppu = Ppu::new();
        ppu.mask = MASK_SHOW_SPRITES;
        for n in 0..9u8 {
            let base = n as usize * 4;
            ppu.oam[base..base + 4].copy_from_slice(&[10, n, 0, n * 8]);
        }
        for n in 9..64 {
            ppu.oam[n * 4] = 0xEF;
        }

        ppu.evaluate_sprites(14).unwrap();

        assert_eq!(ppu.status() & STATUS_SPRITE_OVERFLOW, STATUS_SPRITE_OVERFLOW);
        assert_eq!(ppu.sprite_count, 8);
        let tiles: Vec<u8> = ppu.secondary_oam().chunks(4).map(|s| s[1]).collect();
        assert_eq!(tiles, vec![0, 1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn eight_sprites_do_not_overflow() {
        let mut ppu = Ppu::new();
        ppu.mask = MASK_SHOW_SPRITES;
        ppu.oam = [0xEF; 256];
        for n in 0..8 {
            ppu.oam[n * 4] = 20;
        }
        ppu.oam[8 * 4] = 30;

        ppu.evaluate_sprites(27).unwrap();
        assert_eq!(ppu.status() & STATUS_SPRITE_OVERFLOW, 0);
        assert_eq!(ppu.sprite_count, 8);

        ppu.evaluate_sprites(28).unwrap();
        assert_eq!(ppu.sprite_count, 0);
        assert_eq!(ppu.secondary_oam(), &[0xFF; 32]);
    }

    #[test]
    fn tall_sprites_are_rejected_while_sprites_are_shown() {
        let mut ppu = Ppu::new();
        ppu.cpu_write_register(0x2000, CTRL_SPRITE_SIZE_16);
        ppu.cpu_write_register(0x2001, MASK_SHOW_SPRITES);

        let result = (0..DOTS_PER_SCANLINE).try_for_each(|_| ppu.step());
        assert!(matches!(
            result,
            Err(EmuError::Unsupported(Unsupported::TallSprites))
        ));
    }

    fn solid_tile_ppu(mask: u8) -> Ppu {
        let mut ppu = Ppu::new();
        ppu.load_chr(None);
        // Tile 0: every pixel uses color 1.
        ppu.vram[..8].fill(0xFF);

        set_vram_addr(&mut ppu, 0x3F01);
        ppu.cpu_write_register(0x2007, 0x21);
        set_vram_addr(&mut ppu, 0x3F11);
        ppu.cpu_write_register(0x2007, 0x16);
        set_vram_addr(&mut ppu, 0x0000);
        ppu.cpu_write_register(0x2001, mask);
        ppu
    }

    #[test]
    fn renders_background_tiles_into_frame_buffer() {
        let mut ppu = solid_tile_ppu(MASK_SHOW_BG | MASK_SHOW_BG_LEFT);
        for _ in 0..2 {
            while !ppu.take_frame_ready() {
                ppu.step().unwrap();
            }
        }

        let pixel = ppu.frame_buffer()[100 * FRAME_WIDTH + 100];
        assert_eq!(pixel, packed_color(0x21));
    }

    #[test]
    fn greyscale_masks_color_bits() {
        let mut ppu = solid_tile_ppu(MASK_SHOW_BG | MASK_SHOW_BG_LEFT | MASK_GREYSCALE);
        for _ in 0..2 {
            while !ppu.take_frame_ready() {
                ppu.step().unwrap();
            }
        }

        let pixel = ppu.frame_buffer()[120 * FRAME_WIDTH + 60];
        assert_eq!(pixel, packed_color(0x20));
    }

    #[test]
    fn sprite_zero_over_opaque_background_sets_hit() {
        let mut ppu = solid_tile_ppu(
            MASK_SHOW_BG | MASK_SHOW_BG_LEFT | MASK_SHOW_SPRITES | MASK_SHOW_SPRITE_LEFT,
        );
        ppu.oam = [0xEF; 256];
        ppu.oam[..4].copy_from_slice(&[49, 0, 0, 100]);

        run_until(&mut ppu, 50, 0);
        assert_eq!(ppu.status() & STATUS_SPRITE_ZERO_HIT, 0);

        run_until(&mut ppu, 60, 0);
        assert_eq!(ppu.status() & STATUS_SPRITE_ZERO_HIT, STATUS_SPRITE_ZERO_HIT);
        assert_eq!(ppu.frame_buffer()[50 * FRAME_WIDTH + 100], packed_color(0x16));
        assert_eq!(ppu.frame_buffer()[50 * FRAME_WIDTH + 99], packed_color(0x21));
    }

    #[test]
    fn background_priority_sprite_hides_behind_opaque_background() {
        let mut ppu = solid_tile_ppu(
            MASK_SHOW_BG | MASK_SHOW_BG_LEFT | MASK_SHOW_SPRITES | MASK_SHOW_SPRITE_LEFT,
        );
        ppu.oam = [0xEF; 256];
        ppu.oam[..4].copy_from_slice(&[49, 0, ATTR_BEHIND_BG, 100]);

        run_until(&mut ppu, 60, 0);
        assert_eq!(ppu.frame_buffer()[50 * FRAME_WIDTH + 100], packed_color(0x21));
        assert_eq!(ppu.status() & STATUS_SPRITE_ZERO_HIT, STATUS_SPRITE_ZERO_HIT);
    }
}
