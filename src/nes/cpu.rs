use serde::Serialize;
use tracing::{error, trace, warn};

use super::bus::Bus;
use super::error::EmuError;
use super::instructions::{AddressingMode, Instruction, Operation, lookup};
use crate::config::DecodePolicy;

pub(crate) const FLAG_CARRY: u8 = 0x01;
pub(crate) const FLAG_ZERO: u8 = 0x02;
pub(crate) const FLAG_INTERRUPT: u8 = 0x04;
pub(crate) const FLAG_DECIMAL: u8 = 0x08;
pub(crate) const FLAG_BREAK: u8 = 0x10;
pub(crate) const FLAG_UNUSED: u8 = 0x20;
pub(crate) const FLAG_OVERFLOW: u8 = 0x40;
pub(crate) const FLAG_NEGATIVE: u8 = 0x80;

const STACK_BASE: u16 = 0x0100;
const NMI_VECTOR: u16 = 0xFFFA;
const RESET_VECTOR: u16 = 0xFFFC;
const IRQ_VECTOR: u16 = 0xFFFE;

const INTERRUPT_CYCLES: u32 = 7;
const UNDEFINED_OPCODE_CYCLES: u32 = 2;
const OAM_DMA_CYCLES: u32 = 513;

/// Snapshot of the programmer-visible registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CpuRegisters {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub p: u8,
    pub sp: u8,
    pub pc: u16,
}

pub struct Cpu {
    pub(crate) a: u8,
    pub(crate) x: u8,
    pub(crate) y: u8,
    pub(crate) p: u8,
    pub(crate) sp: u8,
    pub(crate) pc: u16,

    pub(crate) bus: Bus,

    total_cycles: u64,
    decode_policy: DecodePolicy,
    nmi_line_seen: bool,
    nmi_serviced_count: u64,
    unknown_opcode_count: u64,
    last_unknown_opcode: Option<(u8, u16)>,
}

impl Cpu {
    pub fn new(bus: Bus, decode_policy: DecodePolicy) -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            p: FLAG_INTERRUPT | FLAG_UNUSED,
            sp: 0xFD,
            pc: 0,
            bus,
            total_cycles: 0,
            decode_policy,
            nmi_line_seen: false,
            nmi_serviced_count: 0,
            unknown_opcode_count: 0,
            last_unknown_opcode: None,
        }
    }

    pub fn reset(&mut self) {
        self.bus.reset();
        self.a = 0;
        self.x = 0;
        self.y = 0;
        self.p = FLAG_INTERRUPT | FLAG_UNUSED;
        self.sp = 0xFD;
        self.total_cycles = 0;
        self.nmi_line_seen = false;
        self.nmi_serviced_count = 0;
        self.unknown_opcode_count = 0;
        self.last_unknown_opcode = None;
        self.pc = self.bus.read_u16(RESET_VECTOR);
    }

    pub fn registers(&self) -> CpuRegisters {
        CpuRegisters {
            a: self.a,
            x: self.x,
            y: self.y,
            p: self.p,
            sp: self.sp,
            pc: self.pc,
        }
    }

    pub fn total_cycles(&self) -> u64 {
        self.total_cycles
    }

    pub fn decode_policy(&self) -> DecodePolicy {
        self.decode_policy
    }

    pub fn set_decode_policy(&mut self, policy: DecodePolicy) {
        self.decode_policy = policy;
    }

    pub fn nmi_serviced_count(&self) -> u64 {
        self.nmi_serviced_count
    }

    pub fn unknown_opcode_count(&self) -> u64 {
        self.unknown_opcode_count
    }

    /// Opcode and address of the most recent undefined opcode.
    pub fn last_unknown_opcode(&self) -> Option<(u8, u16)> {
        self.last_unknown_opcode
    }

    /// Executes one instruction, or services a pending NMI, and returns the
    /// CPU cycles it took including any OAM DMA stall it triggered.
    pub fn step(&mut self) -> Result<u32, EmuError> {
        let line = self.bus.ppu().interrupt_line();
        let nmi_edge = line && !self.nmi_line_seen;
        self.nmi_line_seen = line;
        if nmi_edge {
            self.service_nmi();
            self.total_cycles += INTERRUPT_CYCLES as u64;
            return Ok(INTERRUPT_CYCLES);
        }

        let opcode_pc = self.pc;
        let opcode = self.bus.read(opcode_pc);
        let Some(instruction) = lookup(opcode) else {
            return self.undefined_opcode(opcode, opcode_pc);
        };
        self.pc = self.pc.wrapping_add(1);

        let (addr, page_crossed) = self.resolve(instruction.mode);
        let mut cycles = instruction.cycles as u32;
        if instruction.page_penalty && page_crossed {
            cycles += 1;
        }
        cycles += self.execute(instruction, addr, page_crossed);

        if self.bus.take_oam_dma() {
            let odd = (self.total_cycles + cycles as u64) & 0x01;
            cycles += OAM_DMA_CYCLES + odd as u32;
        }

        self.total_cycles += cycles as u64;
        Ok(cycles)
    }

    fn undefined_opcode(&mut self, opcode: u8, addr: u16) -> Result<u32, EmuError> {
        self.last_unknown_opcode = Some((opcode, addr));
        match self.decode_policy {
            DecodePolicy::Skip => {
                warn!(
                    opcode = format_args!("${opcode:02X}"),
                    addr = format_args!("${addr:04X}"),
                    "skipping undefined opcode"
                );
                self.unknown_opcode_count = self.unknown_opcode_count.wrapping_add(1);
                self.pc = addr.wrapping_add(1);
                self.total_cycles += UNDEFINED_OPCODE_CYCLES as u64;
                Ok(UNDEFINED_OPCODE_CYCLES)
            }
            DecodePolicy::Halt => {
                error!(
                    opcode = format_args!("${opcode:02X}"),
                    addr = format_args!("${addr:04X}"),
                    "halting on undefined opcode"
                );
                Err(EmuError::IllegalOpcode { opcode, addr })
            }
        }
    }

    /// Consumes the operand bytes for `mode` and returns the effective address
    /// plus whether indexing or a branch crossed a page.
    fn resolve(&mut self, mode: AddressingMode) -> (u16, bool) {
        match mode {
            AddressingMode::Implied | AddressingMode::Accumulator => (0, false),
            AddressingMode::Immediate => {
                let addr = self.pc;
                self.pc = self.pc.wrapping_add(1);
                (addr, false)
            }
            AddressingMode::ZeroPage => (self.fetch_byte() as u16, false),
            AddressingMode::ZeroPageX => (self.fetch_byte().wrapping_add(self.x) as u16, false),
            AddressingMode::ZeroPageY => (self.fetch_byte().wrapping_add(self.y) as u16, false),
            AddressingMode::Absolute => (self.fetch_word(), false),
            AddressingMode::AbsoluteX => {
                let base = self.fetch_word();
                indexed(base, self.x)
            }
            AddressingMode::AbsoluteY => {
                let base = self.fetch_word();
                indexed(base, self.y)
            }
            AddressingMode::Indirect => {
                let pointer = self.fetch_word();
                let lo = self.bus.read(pointer) as u16;
                let hi = self.bus.read(indirect_high_byte_addr(pointer)) as u16;
                ((hi << 8) | lo, false)
            }
            AddressingMode::IndexedIndirect => {
                let zp = self.fetch_byte().wrapping_add(self.x);
                (self.read_zero_page_u16(zp), false)
            }
            AddressingMode::IndirectIndexed => {
                let zp = self.fetch_byte();
                let base = self.read_zero_page_u16(zp);
                indexed(base, self.y)
            }
            AddressingMode::Relative => {
                let offset = self.fetch_byte() as i8;
                let target = self.pc.wrapping_add(offset as i16 as u16);
                (target, (self.pc & 0xFF00) != (target & 0xFF00))
            }
        }
    }

    /// Runs the operation and returns cycles beyond the descriptor's base
    /// cost (taken branches only).
    fn execute(&mut self, instruction: Instruction, addr: u16, page_crossed: bool) -> u32 {
        let mode = instruction.mode;
        match instruction.operation {
            Operation::Adc => {
                let value = self.bus.read(addr);
                self.adc(value);
            }
            Operation::Sbc => {
                let value = self.bus.read(addr);
                self.adc(value ^ 0xFF);
            }
            Operation::And => {
                self.a &= self.bus.read(addr);
                self.update_zn(self.a);
            }
            Operation::Ora => {
                self.a |= self.bus.read(addr);
                self.update_zn(self.a);
            }
            Operation::Eor => {
                self.a ^= self.bus.read(addr);
                self.update_zn(self.a);
            }
            Operation::Bit => {
                let value = self.bus.read(addr);
                self.set_flag(FLAG_ZERO, (self.a & value) == 0);
                self.set_flag(FLAG_NEGATIVE, (value & 0x80) != 0);
                self.set_flag(FLAG_OVERFLOW, (value & 0x40) != 0);
            }
            Operation::Cmp => {
                let value = self.bus.read(addr);
                self.compare(self.a, value);
            }
            Operation::Cpx => {
                let value = self.bus.read(addr);
                self.compare(self.x, value);
            }
            Operation::Cpy => {
                let value = self.bus.read(addr);
                self.compare(self.y, value);
            }

            Operation::Lda => {
                self.a = self.bus.read(addr);
                self.update_zn(self.a);
            }
            Operation::Ldx => {
                self.x = self.bus.read(addr);
                self.update_zn(self.x);
            }
            Operation::Ldy => {
                self.y = self.bus.read(addr);
                self.update_zn(self.y);
            }
            Operation::Sta => self.bus.write(addr, self.a),
            Operation::Stx => self.bus.write(addr, self.x),
            Operation::Sty => self.bus.write(addr, self.y),

            Operation::Asl => self.modify(mode, addr, Self::asl),
            Operation::Lsr => self.modify(mode, addr, Self::lsr),
            Operation::Rol => self.modify(mode, addr, Self::rol),
            Operation::Ror => self.modify(mode, addr, Self::ror),
            Operation::Inc => self.modify(mode, addr, |cpu, value| {
                let result = value.wrapping_add(1);
                cpu.update_zn(result);
                result
            }),
            Operation::Dec => self.modify(mode, addr, |cpu, value| {
                let result = value.wrapping_sub(1);
                cpu.update_zn(result);
                result
            }),

            Operation::Inx => {
                self.x = self.x.wrapping_add(1);
                self.update_zn(self.x);
            }
            Operation::Iny => {
                self.y = self.y.wrapping_add(1);
                self.update_zn(self.y);
            }
            Operation::Dex => {
                self.x = self.x.wrapping_sub(1);
                self.update_zn(self.x);
            }
            Operation::Dey => {
                self.y = self.y.wrapping_sub(1);
                self.update_zn(self.y);
            }

            Operation::Tax => {
                self.x = self.a;
                self.update_zn(self.x);
            }
            Operation::Tay => {
                self.y = self.a;
                self.update_zn(self.y);
            }
            Operation::Tsx => {
                self.x = self.sp;
                self.update_zn(self.x);
            }
            Operation::Txa => {
                self.a = self.x;
                self.update_zn(self.a);
            }
            Operation::Tya => {
                self.a = self.y;
                self.update_zn(self.a);
            }
            Operation::Txs => self.sp = self.x,

            Operation::Bcc => return self.branch(!self.get_flag(FLAG_CARRY), addr, page_crossed),
            Operation::Bcs => return self.branch(self.get_flag(FLAG_CARRY), addr, page_crossed),
            Operation::Bne => return self.branch(!self.get_flag(FLAG_ZERO), addr, page_crossed),
            Operation::Beq => return self.branch(self.get_flag(FLAG_ZERO), addr, page_crossed),
            Operation::Bpl => {
                return self.branch(!self.get_flag(FLAG_NEGATIVE), addr, page_crossed);
            }
            Operation::Bmi => {
                return self.branch(self.get_flag(FLAG_NEGATIVE), addr, page_crossed);
            }
            Operation::Bvc => {
                return self.branch(!self.get_flag(FLAG_OVERFLOW), addr, page_crossed);
            }
            Operation::Bvs => {
                return self.branch(self.get_flag(FLAG_OVERFLOW), addr, page_crossed);
            }

            Operation::Jmp => self.pc = addr,
            Operation::Jsr => {
                self.push_u16(self.pc.wrapping_sub(1));
                self.pc = addr;
            }
            Operation::Rts => {
                self.pc = self.pop_u16().wrapping_add(1);
            }
            Operation::Rti => {
                let status = self.pop();
                self.p = (status & !FLAG_BREAK) | FLAG_UNUSED;
                self.pc = self.pop_u16();
            }
            Operation::Brk => {
                // The byte after BRK is padding and is skipped on return.
                self.push_u16(self.pc.wrapping_add(1));
                self.push(self.p | FLAG_BREAK | FLAG_UNUSED);
                self.set_flag(FLAG_BREAK, true);
                self.set_flag(FLAG_INTERRUPT, true);
                self.pc = self.bus.read_u16(IRQ_VECTOR);
            }

            Operation::Pha => self.push(self.a),
            Operation::Php => self.push(self.p | FLAG_BREAK | FLAG_UNUSED),
            Operation::Pla => {
                self.a = self.pop();
                self.update_zn(self.a);
            }
            Operation::Plp => {
                let status = self.pop();
                self.p = (status & !FLAG_BREAK) | FLAG_UNUSED;
            }

            Operation::Clc => self.set_flag(FLAG_CARRY, false),
            Operation::Sec => self.set_flag(FLAG_CARRY, true),
            Operation::Cli => self.set_flag(FLAG_INTERRUPT, false),
            Operation::Sei => self.set_flag(FLAG_INTERRUPT, true),
            Operation::Cld => self.set_flag(FLAG_DECIMAL, false),
            Operation::Sed => self.set_flag(FLAG_DECIMAL, true),
            Operation::Clv => self.set_flag(FLAG_OVERFLOW, false),

            Operation::Nop => {}
        }
        0
    }

    /// Read-modify-write: memory operands see the unmodified value written
    /// back before the result, as the 6502 does.
    fn modify(&mut self, mode: AddressingMode, addr: u16, op: impl FnOnce(&mut Self, u8) -> u8) {
        if mode == AddressingMode::Accumulator {
            let value = self.a;
            self.a = op(self, value);
            return;
        }

        let value = self.bus.read(addr);
        self.bus.write(addr, value);
        let result = op(self, value);
        self.bus.write(addr, result);
    }

    fn branch(&mut self, condition: bool, target: u16, page_crossed: bool) -> u32 {
        if !condition {
            return 0;
        }
        self.pc = target;
        if page_crossed { 2 } else { 1 }
    }

    pub(crate) fn service_nmi(&mut self) {
        self.push_u16(self.pc);
        self.push((self.p & !FLAG_BREAK) | FLAG_UNUSED);
        self.set_flag(FLAG_INTERRUPT, true);
        self.pc = self.bus.read_u16(NMI_VECTOR);
        self.nmi_serviced_count = self.nmi_serviced_count.wrapping_add(1);
        trace!(pc = format_args!("${:04X}", self.pc), "NMI serviced");
    }

    fn adc(&mut self, value: u8) {
        let carry_in = self.get_flag(FLAG_CARRY) as u16;
        let result = self.a as u16 + value as u16 + carry_in;
        let out = result as u8;

        self.set_flag(FLAG_CARRY, result > 0xFF);
        self.set_flag(FLAG_OVERFLOW, ((self.a ^ out) & (value ^ out) & 0x80) != 0);

        self.a = out;
        self.update_zn(self.a);
    }

    fn compare(&mut self, register: u8, value: u8) {
        let result = register.wrapping_sub(value);
        self.set_flag(FLAG_CARRY, register >= value);
        self.update_zn(result);
    }

    fn asl(&mut self, value: u8) -> u8 {
        self.set_flag(FLAG_CARRY, (value & 0x80) != 0);
        let result = value << 1;
        self.update_zn(result);
        result
    }

    fn lsr(&mut self, value: u8) -> u8 {
        self.set_flag(FLAG_CARRY, (value & 0x01) != 0);
        let result = value >> 1;
        self.update_zn(result);
        result
    }

    fn rol(&mut self, value: u8) -> u8 {
        let carry_in = self.get_flag(FLAG_CARRY) as u8;
        self.set_flag(FLAG_CARRY, (value & 0x80) != 0);
        let result = (value << 1) | carry_in;
        self.update_zn(result);
        result
    }

    fn ror(&mut self, value: u8) -> u8 {
        let carry_in = if self.get_flag(FLAG_CARRY) { 0x80 } else { 0 };
        self.set_flag(FLAG_CARRY, (value & 0x01) != 0);
        let result = (value >> 1) | carry_in;
        self.update_zn(result);
        result
    }

    fn fetch_byte(&mut self) -> u8 {
        let byte = self.bus.read(self.pc);
        self.pc = self.pc.wrapping_add(1);
        byte
    }

    fn fetch_word(&mut self) -> u16 {
        let lo = self.fetch_byte() as u16;
        let hi = self.fetch_byte() as u16;
        (hi << 8) | lo
    }

    fn read_zero_page_u16(&mut self, addr: u8) -> u16 {
        let lo = self.bus.read(addr as u16) as u16;
        let hi = self.bus.read(addr.wrapping_add(1) as u16) as u16;
        (hi << 8) | lo
    }

    pub(crate) fn push(&mut self, value: u8) {
        self.bus.write(STACK_BASE | self.sp as u16, value);
        self.sp = self.sp.wrapping_sub(1);
    }

    pub(crate) fn pop(&mut self) -> u8 {
        self.sp = self.sp.wrapping_add(1);
        self.bus.read(STACK_BASE | self.sp as u16)
    }

    fn push_u16(&mut self, value: u16) {
        self.push((value >> 8) as u8);
        self.push(value as u8);
    }

    fn pop_u16(&mut self) -> u16 {
        let lo = self.pop() as u16;
        let hi = self.pop() as u16;
        (hi << 8) | lo
    }

    fn set_flag(&mut self, flag: u8, value: bool) {
        if value {
            self.p |= flag;
        } else {
            self.p &= !flag;
        }
        self.p |= FLAG_UNUSED;
    }

    fn get_flag(&self, flag: u8) -> bool {
        (self.p & flag) != 0
    }

    fn update_zn(&mut self, value: u8) {
        self.set_flag(FLAG_ZERO, value == 0);
        self.set_flag(FLAG_NEGATIVE, (value & 0x80) != 0);
    }
}

fn indexed(base: u16, index: u8) -> (u16, bool) {
    let addr = base.wrapping_add(index as u16);
    (addr, (base & 0xFF00) != (addr & 0xFF00))
}

/// Where JMP (ind) fetches the pointer's high byte: the 6502 never carries
/// into the page, so a pointer at $xxFF wraps to $xx00.
pub(crate) fn indirect_high_byte_addr(pointer: u16) -> u16 {
    (pointer & 0xFF00) | (pointer.wrapping_add(1) & 0x00FF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nes::cartridge::PRG_BANK_SIZE;
    use pretty_assertions::assert_eq;

    const PROGRAM_START: u16 = 0x8000;

    /// Builds a CPU whose 16KB bank is mirrored at 0x8000 and 0xC000 with the
    /// reset vector pointing at `program`.
    fn cpu_with_program(program: &[u8]) -> Cpu {
        cpu_with_vectors(program, &[])
    }

    fn cpu_with_vectors(program: &[u8], patches: &[(u16, u8)]) -> Cpu {
        let mut bank = vec![0xEA; PRG_BANK_SIZE];
        bank[..program.len()].copy_from_slice(program);
        bank[0x3FFC] = PROGRAM_START as u8;
        bank[0x3FFD] = (PROGRAM_START >> 8) as u8;
        for &(addr, value) in patches {
            bank[(addr as usize) & (PRG_BANK_SIZE - 1)] = value;
        }

        let mut bus = Bus::new();
        bus.load_prg(&bank, &bank);
        let mut cpu = Cpu::new(bus, DecodePolicy::Skip);
        cpu.reset();
        cpu
    }

    fn run(cpu: &mut Cpu, steps: usize) -> Vec<u32> {
        (0..steps).map(|_| cpu.step().unwrap()).collect()
    }

    #[test]
    fn reset_loads_vector_and_power_up_state() {
        let cpu = cpu_with_program(&[]);
        assert_eq!(
            cpu.registers(),
            CpuRegisters {
                a: 0,
                x: 0,
                y: 0,
                p: FLAG_INTERRUPT | FLAG_UNUSED,
                sp: 0xFD,
                pc: 0x8000,
            }
        );
    }

    #[test]
    fn adc_signed_overflow() {
        // CLC; LDA #$50; ADC #$50
        let mut cpu = cpu_with_program(&[0x18, 0xA9, 0x50, 0x69, 0x50]);
        run(&mut cpu, 3);

        assert_eq!(cpu.a, 0xA0);
        assert!(cpu.get_flag(FLAG_OVERFLOW));
        assert!(cpu.get_flag(FLAG_NEGATIVE));
        assert!(!cpu.get_flag(FLAG_ZERO));
        assert!(!cpu.get_flag(FLAG_CARRY));
    }

    #[test]
    fn adc_carry_out_and_zero() {
        // SEC; LDA #$FF; ADC #$00
        let mut cpu = cpu_with_program(&[0x38, 0xA9, 0xFF, 0x69, 0x00]);
        run(&mut cpu, 3);

        assert_eq!(cpu.a, 0x00);
        assert!(cpu.get_flag(FLAG_CARRY));
        assert!(cpu.get_flag(FLAG_ZERO));
        assert!(!cpu.get_flag(FLAG_OVERFLOW));
    }

    #[test]
    fn sbc_borrow() {
        // SEC; LDA #$00; SBC #$01
        let mut cpu = cpu_with_program(&[0x38, 0xA9, 0x00, 0xE9, 0x01]);
        run(&mut cpu, 3);

        assert_eq!(cpu.a, 0xFF);
        assert!(!cpu.get_flag(FLAG_CARRY));
        assert!(!cpu.get_flag(FLAG_ZERO));
        assert!(cpu.get_flag(FLAG_NEGATIVE));
    }

    #[test]
    fn decimal_flag_is_stored_but_arithmetic_stays_binary() {
        // SED; CLC; LDA #$09; ADC #$01
        let mut cpu = cpu_with_program(&[0xF8, 0x18, 0xA9, 0x09, 0x69, 0x01]);
        run(&mut cpu, 4);

        assert!(cpu.get_flag(FLAG_DECIMAL));
        assert_eq!(cpu.a, 0x0A);
    }

    #[test]
    fn compare_leaves_registers_untouched() {
        // LDA #$40; CMP #$41
        let mut cpu = cpu_with_program(&[0xA9, 0x40, 0xC9, 0x41]);
        run(&mut cpu, 2);
        assert_eq!(cpu.a, 0x40);
        assert!(!cpu.get_flag(FLAG_CARRY));
        assert!(!cpu.get_flag(FLAG_ZERO));
        assert!(cpu.get_flag(FLAG_NEGATIVE));

        // LDX #$10; CPX #$10; LDY #$05; CPY #$01
        let mut cpu = cpu_with_program(&[0xA2, 0x10, 0xE0, 0x10, 0xA0, 0x05, 0xC0, 0x01]);
        run(&mut cpu, 2);
        assert_eq!(cpu.x, 0x10);
        assert!(cpu.get_flag(FLAG_CARRY));
        assert!(cpu.get_flag(FLAG_ZERO));

        run(&mut cpu, 2);
        assert_eq!(cpu.y, 0x05);
        assert!(cpu.get_flag(FLAG_CARRY));
        assert!(!cpu.get_flag(FLAG_ZERO));
        assert!(!cpu.get_flag(FLAG_NEGATIVE));
    }

    #[test]
    fn bit_copies_memory_bits_into_flags() {
        let mut cpu = cpu_with_program(&[0xA9, 0x01, 0x24, 0x10]);
        cpu.bus.write(0x0010, 0xC0);
        run(&mut cpu, 2);

        assert!(cpu.get_flag(FLAG_NEGATIVE));
        assert!(cpu.get_flag(FLAG_OVERFLOW));
        assert!(cpu.get_flag(FLAG_ZERO));
        assert_eq!(cpu.a, 0x01);
    }

    #[test]
    fn shifts_and_rotates_move_carry() {
        // LDA #$81; ASL A; ROL A; LSR A; ROR A
        let mut cpu = cpu_with_program(&[0xA9, 0x81, 0x0A, 0x2A, 0x4A, 0x6A]);
        run(&mut cpu, 2);
        assert_eq!(cpu.a, 0x02);
        assert!(cpu.get_flag(FLAG_CARRY));

        run(&mut cpu, 1);
        assert_eq!(cpu.a, 0x05);
        assert!(!cpu.get_flag(FLAG_CARRY));

        run(&mut cpu, 1);
        assert_eq!(cpu.a, 0x02);
        assert!(cpu.get_flag(FLAG_CARRY));

        run(&mut cpu, 1);
        assert_eq!(cpu.a, 0x81);
        assert!(!cpu.get_flag(FLAG_CARRY));
        assert!(cpu.get_flag(FLAG_NEGATIVE));
    }

    #[test]
    fn memory_read_modify_write() {
        // INC $20; DEC $21; ASL $22
        let mut cpu = cpu_with_program(&[0xE6, 0x20, 0xC6, 0x21, 0x06, 0x22]);
        cpu.bus.write(0x0020, 0xFF);
        cpu.bus.write(0x0021, 0x01);
        cpu.bus.write(0x0022, 0x40);

        let cycles = run(&mut cpu, 3);
        assert_eq!(cycles, vec![5, 5, 5]);
        assert_eq!(cpu.bus.peek(0x0020), 0x00);
        assert_eq!(cpu.bus.peek(0x0021), 0x00);
        assert_eq!(cpu.bus.peek(0x0022), 0x80);
        assert!(cpu.get_flag(FLAG_NEGATIVE));
    }

    #[test]
    fn jmp_indirect_wraps_within_pointer_page() {
        let mut cpu = cpu_with_program(&[0x6C, 0xFF, 0x02]);
        cpu.bus.write(0x02FF, 0x34);
        cpu.bus.write(0x0200, 0x12);
        cpu.bus.write(0x0300, 0x56);

        let cycles = run(&mut cpu, 1);
        assert_eq!(cycles, vec![5]);
        assert_eq!(cpu.pc, 0x1234);
    }

    #[test]
    fn indirect_pointer_high_byte_address() {
        assert_eq!(indirect_high_byte_addr(0x30FF), 0x3000);
        assert_eq!(indirect_high_byte_addr(0x1234), 0x1235);
        assert_eq!(indirect_high_byte_addr(0xFFFF), 0xFF00);
    }

    #[test]
    fn jsr_rts_returns_after_call() {
        // $8000: JSR $8005; $8003: NOP; NOP; $8005: RTS
        let mut cpu = cpu_with_program(&[0x20, 0x05, 0x80, 0xEA, 0xEA, 0x60]);

        assert_eq!(cpu.step().unwrap(), 6);
        assert_eq!(cpu.pc, 0x8005);
        assert_eq!(cpu.sp, 0xFB);
        assert_eq!(cpu.bus.peek(0x01FD), 0x80);
        assert_eq!(cpu.bus.peek(0x01FC), 0x02);

        assert_eq!(cpu.step().unwrap(), 6);
        assert_eq!(cpu.pc, 0x8003);
        assert_eq!(cpu.sp, 0xFD);
    }

    #[test]
    fn stack_pointer_wraps_within_page_one() {
        // LDX #$00; TXS; LDA #$77; PHA; LDA #$00; PLA
        let mut cpu = cpu_with_program(&[0xA2, 0x00, 0x9A, 0xA9, 0x77, 0x48, 0xA9, 0x00, 0x68]);
        run(&mut cpu, 4);
        assert_eq!(cpu.sp, 0xFF);
        assert_eq!(cpu.bus.peek(0x0100), 0x77);

        run(&mut cpu, 2);
        assert_eq!(cpu.sp, 0x00);
        assert_eq!(cpu.a, 0x77);
    }

    #[test]
    fn php_plp_handle_break_and_unused_bits() {
        // SEC; PHP; CLC; PLP
        let mut cpu = cpu_with_program(&[0x38, 0x08, 0x18, 0x28]);
        run(&mut cpu, 2);
        assert_eq!(cpu.bus.peek(0x01FD), FLAG_INTERRUPT | FLAG_UNUSED | FLAG_BREAK | FLAG_CARRY);

        run(&mut cpu, 2);
        assert_eq!(cpu.p, FLAG_INTERRUPT | FLAG_UNUSED | FLAG_CARRY);
    }

    #[test]
    fn brk_pushes_state_and_jumps_through_vector() {
        let mut cpu = cpu_with_vectors(&[0x00, 0xFF], &[(0xFFFE, 0x34), (0xFFFF, 0x92)]);

        assert_eq!(cpu.step().unwrap(), 7);
        assert_eq!(cpu.pc, 0x9234);
        assert!(cpu.get_flag(FLAG_INTERRUPT));
        assert!(cpu.get_flag(FLAG_BREAK));
        assert_eq!(cpu.bus.peek(0x01FD), 0x80);
        assert_eq!(cpu.bus.peek(0x01FC), 0x02);
        assert_eq!(cpu.bus.peek(0x01FB), FLAG_INTERRUPT | FLAG_UNUSED | FLAG_BREAK);
    }

    #[test]
    fn rti_restores_status_and_pc() {
        // $8000: BRK; $9000: RTI
        let mut cpu = cpu_with_vectors(
            &[0x00, 0xFF],
            &[(0xFFFE, 0x00), (0xFFFF, 0x90), (0x9000, 0x40)],
        );

        run(&mut cpu, 2);
        assert_eq!(cpu.pc, 0x8002);
        assert_eq!(cpu.sp, 0xFD);
        assert_eq!(cpu.p, FLAG_INTERRUPT | FLAG_UNUSED);
    }

    #[test]
    fn page_crossing_costs_an_extra_cycle_for_reads_only() {
        // LDX #$01; LDA $80FF,X; LDA $8000,X; STA $02FF,X
        let mut cpu = cpu_with_program(&[
            0xA2, 0x01, 0xBD, 0xFF, 0x80, 0xBD, 0x00, 0x80, 0x9D, 0xFF, 0x02,
        ]);
        let cycles = run(&mut cpu, 4);
        assert_eq!(cycles, vec![2, 5, 4, 5]);
        assert_eq!(cpu.bus.peek(0x0300), cpu.a);
    }

    #[test]
    fn indirect_indexed_wraps_pointer_fetch_in_zero_page() {
        // LDY #$10; LDA ($FF),Y
        let mut cpu = cpu_with_program(&[0xA0, 0x10, 0xB1, 0xFF]);
        cpu.bus.write(0x00FF, 0xF8);
        cpu.bus.write(0x0000, 0x03);
        cpu.bus.write(0x0408, 0x99);

        let cycles = run(&mut cpu, 2);
        assert_eq!(cycles, vec![2, 6]);
        assert_eq!(cpu.a, 0x99);
    }

    #[test]
    fn indexed_indirect_adds_x_inside_zero_page() {
        // LDX #$04; LDA ($FE,X)
        let mut cpu = cpu_with_program(&[0xA2, 0x04, 0xA1, 0xFE]);
        cpu.bus.write(0x0002, 0x00);
        cpu.bus.write(0x0003, 0x06);
        cpu.bus.write(0x0600, 0x42);

        let cycles = run(&mut cpu, 2);
        assert_eq!(cycles, vec![2, 6]);
        assert_eq!(cpu.a, 0x42);
    }

    #[test]
    fn zero_page_indexing_wraps() {
        // LDX #$FF; LDA $10,X
        let mut cpu = cpu_with_program(&[0xA2, 0xFF, 0xB5, 0x10]);
        cpu.bus.write(0x000F, 0x3C);
        cpu.bus.write(0x010F, 0x00);

        run(&mut cpu, 2);
        assert_eq!(cpu.a, 0x3C);
    }

    #[test]
    fn branch_timing() {
        // LDA #$00; BNE +2 (not taken); BEQ +1 (taken)
        let mut cpu = cpu_with_program(&[0xA9, 0x00, 0xD0, 0x02, 0xF0, 0x01, 0xEA, 0xEA]);
        let cycles = run(&mut cpu, 3);
        assert_eq!(cycles, vec![2, 2, 3]);
        assert_eq!(cpu.pc, 0x8007);

        // BEQ +5 from $80FD lands on $8104.
        let mut cpu = cpu_with_vectors(&[], &[(0x80FD, 0xF0), (0x80FE, 0x05)]);
        cpu.pc = 0x80FD;
        cpu.p |= FLAG_ZERO;
        assert_eq!(cpu.step().unwrap(), 4);
        assert_eq!(cpu.pc, 0x8104);
    }

    #[test]
    fn backward_branch_sign_extends() {
        // $8000: DEX; BNE -3
        let mut cpu = cpu_with_program(&[0xA2, 0x03, 0xCA, 0xD0, 0xFD]);
        run(&mut cpu, 1);
        for _ in 0..3 {
            run(&mut cpu, 2);
        }
        assert_eq!(cpu.x, 0);
        assert_eq!(cpu.pc, 0x8005);
    }

    #[test]
    fn transfers_update_flags_except_txs() {
        // LDA #$80; TAX; TAY; LDX #$00; TXS; TSX
        let mut cpu = cpu_with_program(&[0xA9, 0x80, 0xAA, 0xA8, 0xA2, 0x00, 0x9A, 0xBA]);
        run(&mut cpu, 3);
        assert_eq!((cpu.x, cpu.y), (0x80, 0x80));
        assert!(cpu.get_flag(FLAG_NEGATIVE));

        run(&mut cpu, 2);
        assert_eq!(cpu.sp, 0x00);
        assert!(cpu.get_flag(FLAG_ZERO));

        cpu.p &= !FLAG_ZERO;
        run(&mut cpu, 1);
        assert!(cpu.get_flag(FLAG_ZERO));
    }

    #[test]
    fn undefined_opcode_is_skipped_by_default() {
        let mut cpu = cpu_with_program(&[0x02, 0xA9, 0x07]);
        let cycles = run(&mut cpu, 2);

        assert_eq!(cycles, vec![2, 2]);
        assert_eq!(cpu.a, 0x07);
        assert_eq!(cpu.unknown_opcode_count(), 1);
        assert_eq!(cpu.last_unknown_opcode(), Some((0x02, 0x8000)));
    }

    #[test]
    fn undefined_opcode_halts_under_strict_policy() {
        let mut cpu = cpu_with_program(&[0xEA, 0xFF]);
        cpu.set_decode_policy(DecodePolicy::Halt);
        run(&mut cpu, 1);

        let err = cpu.step().unwrap_err();
        assert!(matches!(
            err,
            EmuError::IllegalOpcode {
                opcode: 0xFF,
                addr: 0x8001
            }
        ));
        assert_eq!(cpu.pc, 0x8001);
        assert_eq!(cpu.total_cycles(), 2);
    }

    #[test]
    fn oam_dma_stalls_513_or_514_cycles() {
        // LDA #$02; STA $4014
        let mut cpu = cpu_with_program(&[0xA9, 0x02, 0x8D, 0x14, 0x40]);
        cpu.bus.write(0x0200, 0xAB);
        let cycles = run(&mut cpu, 2);
        assert_eq!(cycles, vec![2, 4 + 513]);
        assert_eq!(cpu.bus.ppu().peek_oam(0), 0xAB);

        // LDA $10 (3 cycles) leaves the transfer starting on an odd cycle.
        let mut cpu = cpu_with_program(&[0xA5, 0x10, 0x8D, 0x14, 0x40]);
        cpu.bus.write(0x0010, 0x02);
        let cycles = run(&mut cpu, 2);
        assert_eq!(cycles, vec![3, 4 + 514]);
        assert_eq!(cpu.total_cycles(), 3 + 4 + 514);
    }

    #[test]
    fn nmi_is_taken_once_per_rising_edge() {
        let mut cpu = cpu_with_vectors(&[], &[(0xFFFA, 0x00), (0xFFFB, 0x90)]);
        cpu.bus.write(0x2000, 0x80);
        while !cpu.bus.ppu().interrupt_line() {
            cpu.bus.ppu_mut().step().unwrap();
        }

        assert_eq!(cpu.step().unwrap(), 7);
        assert_eq!(cpu.pc, 0x9000);
        assert!(cpu.get_flag(FLAG_INTERRUPT));
        assert_eq!(cpu.bus.peek(0x01FD), 0x80);
        assert_eq!(cpu.bus.peek(0x01FC), 0x00);
        assert_eq!(cpu.bus.peek(0x01FB), FLAG_INTERRUPT | FLAG_UNUSED);
        assert_eq!(cpu.nmi_serviced_count(), 1);

        // Line still high: no second interrupt.
        assert_eq!(cpu.step().unwrap(), 2);
        assert_eq!(cpu.pc, 0x9001);
    }
}
