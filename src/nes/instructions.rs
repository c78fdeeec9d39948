//! Opcode descriptor table for the official 6502 instruction set.
//!
//! Every opcode byte maps to an [`Instruction`] (operation, addressing mode,
//! encoded length and base cycle cost) or to `None` for bytes the 2A03 does
//! not officially define. The table is built once at compile time.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    Implied,
    Accumulator,
    Immediate,
    ZeroPage,
    ZeroPageX,
    ZeroPageY,
    Absolute,
    AbsoluteX,
    AbsoluteY,
    Indirect,
    IndexedIndirect,
    IndirectIndexed,
    Relative,
}

impl AddressingMode {
    /// Operand bytes that follow the opcode.
    pub const fn operand_len(self) -> u8 {
        match self {
            AddressingMode::Implied | AddressingMode::Accumulator => 0,
            AddressingMode::Immediate
            | AddressingMode::ZeroPage
            | AddressingMode::ZeroPageX
            | AddressingMode::ZeroPageY
            | AddressingMode::IndexedIndirect
            | AddressingMode::IndirectIndexed
            | AddressingMode::Relative => 1,
            AddressingMode::Absolute
            | AddressingMode::AbsoluteX
            | AddressingMode::AbsoluteY
            | AddressingMode::Indirect => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Adc,
    And,
    Asl,
    Bcc,
    Bcs,
    Beq,
    Bit,
    Bmi,
    Bne,
    Bpl,
    Brk,
    Bvc,
    Bvs,
    Clc,
    Cld,
    Cli,
    Clv,
    Cmp,
    Cpx,
    Cpy,
    Dec,
    Dex,
    Dey,
    Eor,
    Inc,
    Inx,
    Iny,
    Jmp,
    Jsr,
    Lda,
    Ldx,
    Ldy,
    Lsr,
    Nop,
    Ora,
    Pha,
    Php,
    Pla,
    Plp,
    Rol,
    Ror,
    Rti,
    Rts,
    Sbc,
    Sec,
    Sed,
    Sei,
    Sta,
    Stx,
    Sty,
    Tax,
    Tay,
    Tsx,
    Txa,
    Txs,
    Tya,
}

impl Operation {
    pub const fn mnemonic(self) -> &'static str {
        match self {
            Operation::Adc => "ADC",
            Operation::And => "AND",
            Operation::Asl => "ASL",
            Operation::Bcc => "BCC",
            Operation::Bcs => "BCS",
            Operation::Beq => "BEQ",
            Operation::Bit => "BIT",
            Operation::Bmi => "BMI",
            Operation::Bne => "BNE",
            Operation::Bpl => "BPL",
            Operation::Brk => "BRK",
            Operation::Bvc => "BVC",
            Operation::Bvs => "BVS",
            Operation::Clc => "CLC",
            Operation::Cld => "CLD",
            Operation::Cli => "CLI",
            Operation::Clv => "CLV",
            Operation::Cmp => "CMP",
            Operation::Cpx => "CPX",
            Operation::Cpy => "CPY",
            Operation::Dec => "DEC",
            Operation::Dex => "DEX",
            Operation::Dey => "DEY",
            Operation::Eor => "EOR",
            Operation::Inc => "INC",
            Operation::Inx => "INX",
            Operation::Iny => "INY",
            Operation::Jmp => "JMP",
            Operation::Jsr => "JSR",
            Operation::Lda => "LDA",
            Operation::Ldx => "LDX",
            Operation::Ldy => "LDY",
            Operation::Lsr => "LSR",
            Operation::Nop => "NOP",
            Operation::Ora => "ORA",
            Operation::Pha => "PHA",
            Operation::Php => "PHP",
            Operation::Pla => "PLA",
            Operation::Plp => "PLP",
            Operation::Rol => "ROL",
            Operation::Ror => "ROR",
            Operation::Rti => "RTI",
            Operation::Rts => "RTS",
            Operation::Sbc => "SBC",
            Operation::Sec => "SEC",
            Operation::Sed => "SED",
            Operation::Sei => "SEI",
            Operation::Sta => "STA",
            Operation::Stx => "STX",
            Operation::Sty => "STY",
            Operation::Tax => "TAX",
            Operation::Tay => "TAY",
            Operation::Tsx => "TSX",
            Operation::Txa => "TXA",
            Operation::Txs => "TXS",
            Operation::Tya => "TYA",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub operation: Operation,
    pub mode: AddressingMode,
    /// Total encoded length, opcode included.
    pub bytes: u8,
    /// Base cost before page-cross and branch penalties.
    pub cycles: u8,
    /// One extra cycle when the indexed effective address crosses a page.
    pub page_penalty: bool,
}

impl Instruction {
    pub const fn mnemonic(&self) -> &'static str {
        self.operation.mnemonic()
    }
}

pub static INSTRUCTIONS: [Option<Instruction>; 256] = build_table();

pub fn lookup(opcode: u8) -> Option<Instruction> {
    INSTRUCTIONS[opcode as usize]
}

const fn build_table() -> [Option<Instruction>; 256] {
    let mut table = [None; 256];
    let mut opcode = 0;
    while opcode < 256 {
        table[opcode] = decode(opcode as u8);
        opcode += 1;
    }
    table
}

const fn op(
    operation: Operation,
    mode: AddressingMode,
    cycles: u8,
    page_penalty: bool,
) -> Option<Instruction> {
    Some(Instruction {
        operation,
        mode,
        bytes: 1 + mode.operand_len(),
        cycles,
        page_penalty,
    })
}

const fn decode(opcode: u8) -> Option<Instruction> {
    use AddressingMode as M;
    use Operation as O;

    match opcode {
        0x69 => op(O::Adc, M::Immediate, 2, false),
        0x65 => op(O::Adc, M::ZeroPage, 3, false),
        0x75 => op(O::Adc, M::ZeroPageX, 4, false),
        0x6D => op(O::Adc, M::Absolute, 4, false),
        0x7D => op(O::Adc, M::AbsoluteX, 4, true),
        0x79 => op(O::Adc, M::AbsoluteY, 4, true),
        0x61 => op(O::Adc, M::IndexedIndirect, 6, false),
        0x71 => op(O::Adc, M::IndirectIndexed, 5, true),

        0x29 => op(O::And, M::Immediate, 2, false),
        0x25 => op(O::And, M::ZeroPage, 3, false),
        0x35 => op(O::And, M::ZeroPageX, 4, false),
        0x2D => op(O::And, M::Absolute, 4, false),
        0x3D => op(O::And, M::AbsoluteX, 4, true),
        0x39 => op(O::And, M::AbsoluteY, 4, true),
        0x21 => op(O::And, M::IndexedIndirect, 6, false),
        0x31 => op(O::And, M::IndirectIndexed, 5, true),

        0x0A => op(O::Asl, M::Accumulator, 2, false),
        0x06 => op(O::Asl, M::ZeroPage, 5, false),
        0x16 => op(O::Asl, M::ZeroPageX, 6, false),
        0x0E => op(O::Asl, M::Absolute, 6, false),
        0x1E => op(O::Asl, M::AbsoluteX, 7, false),

        0x90 => op(O::Bcc, M::Relative, 2, false),
        0xB0 => op(O::Bcs, M::Relative, 2, false),
        0xF0 => op(O::Beq, M::Relative, 2, false),
        0x30 => op(O::Bmi, M::Relative, 2, false),
        0xD0 => op(O::Bne, M::Relative, 2, false),
        0x10 => op(O::Bpl, M::Relative, 2, false),
        0x50 => op(O::Bvc, M::Relative, 2, false),
        0x70 => op(O::Bvs, M::Relative, 2, false),

        0x24 => op(O::Bit, M::ZeroPage, 3, false),
        0x2C => op(O::Bit, M::Absolute, 4, false),

        0x00 => op(O::Brk, M::Implied, 7, false),

        0x18 => op(O::Clc, M::Implied, 2, false),
        0xD8 => op(O::Cld, M::Implied, 2, false),
        0x58 => op(O::Cli, M::Implied, 2, false),
        0xB8 => op(O::Clv, M::Implied, 2, false),

        0xC9 => op(O::Cmp, M::Immediate, 2, false),
        0xC5 => op(O::Cmp, M::ZeroPage, 3, false),
        0xD5 => op(O::Cmp, M::ZeroPageX, 4, false),
        0xCD => op(O::Cmp, M::Absolute, 4, false),
        0xDD => op(O::Cmp, M::AbsoluteX, 4, true),
        0xD9 => op(O::Cmp, M::AbsoluteY, 4, true),
        0xC1 => op(O::Cmp, M::IndexedIndirect, 6, false),
        0xD1 => op(O::Cmp, M::IndirectIndexed, 5, true),

        0xE0 => op(O::Cpx, M::Immediate, 2, false),
        0xE4 => op(O::Cpx, M::ZeroPage, 3, false),
        0xEC => op(O::Cpx, M::Absolute, 4, false),

        0xC0 => op(O::Cpy, M::Immediate, 2, false),
        0xC4 => op(O::Cpy, M::ZeroPage, 3, false),
        0xCC => op(O::Cpy, M::Absolute, 4, false),

        0xC6 => op(O::Dec, M::ZeroPage, 5, false),
        0xD6 => op(O::Dec, M::ZeroPageX, 6, false),
        0xCE => op(O::Dec, M::Absolute, 6, false),
        0xDE => op(O::Dec, M::AbsoluteX, 7, false),

        0xCA => op(O::Dex, M::Implied, 2, false),
        0x88 => op(O::Dey, M::Implied, 2, false),

        0x49 => op(O::Eor, M::Immediate, 2, false),
        0x45 => op(O::Eor, M::ZeroPage, 3, false),
        0x55 => op(O::Eor, M::ZeroPageX, 4, false),
        0x4D => op(O::Eor, M::Absolute, 4, false),
        0x5D => op(O::Eor, M::AbsoluteX, 4, true),
        0x59 => op(O::Eor, M::AbsoluteY, 4, true),
        0x41 => op(O::Eor, M::IndexedIndirect, 6, false),
        0x51 => op(O::Eor, M::IndirectIndexed, 5, true),

        0xE6 => op(O::Inc, M::ZeroPage, 5, false),
        0xF6 => op(O::Inc, M::ZeroPageX, 6, false),
        0xEE => op(O::Inc, M::Absolute, 6, false),
        0xFE => op(O::Inc, M::AbsoluteX, 7, false),

        0xE8 => op(O::Inx, M::Implied, 2, false),
        0xC8 => op(O::Iny, M::Implied, 2, false),

        0x4C => op(O::Jmp, M::Absolute, 3, false),
        0x6C => op(O::Jmp, M::Indirect, 5, false),
        0x20 => op(O::Jsr, M::Absolute, 6, false),

        0xA9 => op(O::Lda, M::Immediate, 2, false),
        0xA5 => op(O::Lda, M::ZeroPage, 3, false),
        0xB5 => op(O::Lda, M::ZeroPageX, 4, false),
        0xAD => op(O::Lda, M::Absolute, 4, false),
        0xBD => op(O::Lda, M::AbsoluteX, 4, true),
        0xB9 => op(O::Lda, M::AbsoluteY, 4, true),
        0xA1 => op(O::Lda, M::IndexedIndirect, 6, false),
        0xB1 => op(O::Lda, M::IndirectIndexed, 5, true),

        0xA2 => op(O::Ldx, M::Immediate, 2, false),
        0xA6 => op(O::Ldx, M::ZeroPage, 3, false),
        0xB6 => op(O::Ldx, M::ZeroPageY, 4, false),
        0xAE => op(O::Ldx, M::Absolute, 4, false),
        0xBE => op(O::Ldx, M::AbsoluteY, 4, true),

        0xA0 => op(O::Ldy, M::Immediate, 2, false),
        0xA4 => op(O::Ldy, M::ZeroPage, 3, false),
        0xB4 => op(O::Ldy, M::ZeroPageX, 4, false),
        0xAC => op(O::Ldy, M::Absolute, 4, false),
        0xBC => op(O::Ldy, M::AbsoluteX, 4, true),

        0x4A => op(O::Lsr, M::Accumulator, 2, false),
        0x46 => op(O::Lsr, M::ZeroPage, 5, false),
        0x56 => op(O::Lsr, M::ZeroPageX, 6, false),
        0x4E => op(O::Lsr, M::Absolute, 6, false),
        0x5E => op(O::Lsr, M::AbsoluteX, 7, false),

        0xEA => op(O::Nop, M::Implied, 2, false),

        0x09 => op(O::Ora, M::Immediate, 2, false),
        0x05 => op(O::Ora, M::ZeroPage, 3, false),
        0x15 => op(O::Ora, M::ZeroPageX, 4, false),
        0x0D => op(O::Ora, M::Absolute, 4, false),
        0x1D => op(O::Ora, M::AbsoluteX, 4, true),
        0x19 => op(O::Ora, M::AbsoluteY, 4, true),
        0x01 => op(O::Ora, M::IndexedIndirect, 6, false),
        0x11 => op(O::Ora, M::IndirectIndexed, 5, true),

        0x48 => op(O::Pha, M::Implied, 3, false),
        0x08 => op(O::Php, M::Implied, 3, false),
        0x68 => op(O::Pla, M::Implied, 4, false),
        0x28 => op(O::Plp, M::Implied, 4, false),

        0x2A => op(O::Rol, M::Accumulator, 2, false),
        0x26 => op(O::Rol, M::ZeroPage, 5, false),
        0x36 => op(O::Rol, M::ZeroPageX, 6, false),
        0x2E => op(O::Rol, M::Absolute, 6, false),
        0x3E => op(O::Rol, M::AbsoluteX, 7, false),

        0x6A => op(O::Ror, M::Accumulator, 2, false),
        0x66 => op(O::Ror, M::ZeroPage, 5, false),
        0x76 => op(O::Ror, M::ZeroPageX, 6, false),
        0x6E => op(O::Ror, M::Absolute, 6, false),
        0x7E => op(O::Ror, M::AbsoluteX, 7, false),

        0x40 => op(O::Rti, M::Implied, 6, false),
        0x60 => op(O::Rts, M::Implied, 6, false),

        0xE9 => op(O::Sbc, M::Immediate, 2, false),
        0xE5 => op(O::Sbc, M::ZeroPage, 3, false),
        0xF5 => op(O::Sbc, M::ZeroPageX, 4, false),
        0xED => op(O::Sbc, M::Absolute, 4, false),
        0xFD => op(O::Sbc, M::AbsoluteX, 4, true),
        0xF9 => op(O::Sbc, M::AbsoluteY, 4, true),
        0xE1 => op(O::Sbc, M::IndexedIndirect, 6, false),
        0xF1 => op(O::Sbc, M::IndirectIndexed, 5, true),

        0x38 => op(O::Sec, M::Implied, 2, false),
        0xF8 => op(O::Sed, M::Implied, 2, false),
        0x78 => op(O::Sei, M::Implied, 2, false),

        0x85 => op(O::Sta, M::ZeroPage, 3, false),
        0x95 => op(O::Sta, M::ZeroPageX, 4, false),
        0x8D => op(O::Sta, M::Absolute, 4, false),
        0x9D => op(O::Sta, M::AbsoluteX, 5, false),
        0x99 => op(O::Sta, M::AbsoluteY, 5, false),
        0x81 => op(O::Sta, M::IndexedIndirect, 6, false),
        0x91 => op(O::Sta, M::IndirectIndexed, 6, false),

        0x86 => op(O::Stx, M::ZeroPage, 3, false),
        0x96 => op(O::Stx, M::ZeroPageY, 4, false),
        0x8E => op(O::Stx, M::Absolute, 4, false),

        0x84 => op(O::Sty, M::ZeroPage, 3, false),
        0x94 => op(O::Sty, M::ZeroPageX, 4, false),
        0x8C => op(O::Sty, M::Absolute, 4, false),

        0xAA => op(O::Tax, M::Implied, 2, false),
        0xA8 => op(O::Tay, M::Implied, 2, false),
        0xBA => op(O::Tsx, M::Implied, 2, false),
        0x8A => op(O::Txa, M::Implied, 2, false),
        0x9A => op(O::Txs, M::Implied, 2, false),
        0x98 => op(O::Tya, M::Implied, 2, false),

        _ => None,
    }
}
