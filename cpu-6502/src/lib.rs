//! MOS 6502 back end: the full NMOS instruction set, with zero-page vs.
//! absolute addressing-mode resolution deferred to the evaluated operand's
//! known-ness and size (`OPT NOEXACT`'s default: prefer the short encoding
//! once the value is known to fit).

use asmx_core::{
    check_byte, eval_branch, CpuBackend, CpuOptions, CpuVariant, Endian, OpcodeContext,
    OpcodeEntry,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Imp,
    Acc,
    Imm,
    Zp,
    ZpX,
    ZpY,
    Abs,
    AbsX,
    AbsY,
    Ind,
    IndX,
    IndY,
    Rel,
}

struct ModeEntry {
    mode: Mode,
    opcode: u8,
}

struct Mnemonic {
    name: &'static str,
    modes: &'static [ModeEntry],
}

macro_rules! modes {
    ($(($m:ident, $op:expr)),* $(,)?) => {
        &[ $( ModeEntry { mode: Mode::$m, opcode: $op } ),* ]
    };
}

static MNEMONICS: &[Mnemonic] = &[
    Mnemonic { name: "ADC", modes: modes![(Imm, 0x69), (Zp, 0x65), (ZpX, 0x75), (Abs, 0x6D), (AbsX, 0x7D), (AbsY, 0x79), (IndX, 0x61), (IndY, 0x71)] },
    Mnemonic { name: "AND", modes: modes![(Imm, 0x29), (Zp, 0x25), (ZpX, 0x35), (Abs, 0x2D), (AbsX, 0x3D), (AbsY, 0x39), (IndX, 0x21), (IndY, 0x31)] },
    Mnemonic { name: "ASL", modes: modes![(Acc, 0x0A), (Zp, 0x06), (ZpX, 0x16), (Abs, 0x0E), (AbsX, 0x1E)] },
    Mnemonic { name: "BCC", modes: modes![(Rel, 0x90)] },
    Mnemonic { name: "BCS", modes: modes![(Rel, 0xB0)] },
    Mnemonic { name: "BEQ", modes: modes![(Rel, 0xF0)] },
    Mnemonic { name: "BIT", modes: modes![(Zp, 0x24), (Abs, 0x2C)] },
    Mnemonic { name: "BMI", modes: modes![(Rel, 0x30)] },
    Mnemonic { name: "BNE", modes: modes![(Rel, 0xD0)] },
    Mnemonic { name: "BPL", modes: modes![(Rel, 0x10)] },
    Mnemonic { name: "BRK", modes: modes![(Imp, 0x00)] },
    Mnemonic { name: "BVC", modes: modes![(Rel, 0x50)] },
    Mnemonic { name: "BVS", modes: modes![(Rel, 0x70)] },
    Mnemonic { name: "CLC", modes: modes![(Imp, 0x18)] },
    Mnemonic { name: "CLD", modes: modes![(Imp, 0xD8)] },
    Mnemonic { name: "CLI", modes: modes![(Imp, 0x58)] },
    Mnemonic { name: "CLV", modes: modes![(Imp, 0xB8)] },
    Mnemonic { name: "CMP", modes: modes![(Imm, 0xC9), (Zp, 0xC5), (ZpX, 0xD5), (Abs, 0xCD), (AbsX, 0xDD), (AbsY, 0xD9), (IndX, 0xC1), (IndY, 0xD1)] },
    Mnemonic { name: "CPX", modes: modes![(Imm, 0xE0), (Zp, 0xE4), (Abs, 0xEC)] },
    Mnemonic { name: "CPY", modes: modes![(Imm, 0xC0), (Zp, 0xC4), (Abs, 0xCC)] },
    Mnemonic { name: "DEC", modes: modes![(Zp, 0xC6), (ZpX, 0xD6), (Abs, 0xCE), (AbsX, 0xDE)] },
    Mnemonic { name: "DEX", modes: modes![(Imp, 0xCA)] },
    Mnemonic { name: "DEY", modes: modes![(Imp, 0x88)] },
    Mnemonic { name: "EOR", modes: modes![(Imm, 0x49), (Zp, 0x45), (ZpX, 0x55), (Abs, 0x4D), (AbsX, 0x5D), (AbsY, 0x59), (IndX, 0x41), (IndY, 0x51)] },
    Mnemonic { name: "INC", modes: modes![(Zp, 0xE6), (ZpX, 0xF6), (Abs, 0xEE), (AbsX, 0xFE)] },
    Mnemonic { name: "INX", modes: modes![(Imp, 0xE8)] },
    Mnemonic { name: "INY", modes: modes![(Imp, 0xC8)] },
    Mnemonic { name: "JMP", modes: modes![(Abs, 0x4C), (Ind, 0x6C)] },
    Mnemonic { name: "JSR", modes: modes![(Abs, 0x20)] },
    Mnemonic { name: "LDA", modes: modes![(Imm, 0xA9), (Zp, 0xA5), (ZpX, 0xB5), (Abs, 0xAD), (AbsX, 0xBD), (AbsY, 0xB9), (IndX, 0xA1), (IndY, 0xB1)] },
    Mnemonic { name: "LDX", modes: modes![(Imm, 0xA2), (Zp, 0xA6), (ZpY, 0xB6), (Abs, 0xAE), (AbsY, 0xBE)] },
    Mnemonic { name: "LDY", modes: modes![(Imm, 0xA0), (Zp, 0xA4), (ZpX, 0xB4), (Abs, 0xAC), (AbsX, 0xBC)] },
    Mnemonic { name: "LSR", modes: modes![(Acc, 0x4A), (Zp, 0x46), (ZpX, 0x56), (Abs, 0x4E), (AbsX, 0x5E)] },
    Mnemonic { name: "NOP", modes: modes![(Imp, 0xEA)] },
    Mnemonic { name: "ORA", modes: modes![(Imm, 0x09), (Zp, 0x05), (ZpX, 0x15), (Abs, 0x0D), (AbsX, 0x1D), (AbsY, 0x19), (IndX, 0x01), (IndY, 0x11)] },
    Mnemonic { name: "PHA", modes: modes![(Imp, 0x48)] },
    Mnemonic { name: "PHP", modes: modes![(Imp, 0x08)] },
    Mnemonic { name: "PLA", modes: modes![(Imp, 0x68)] },
    Mnemonic { name: "PLP", modes: modes![(Imp, 0x28)] },
    Mnemonic { name: "ROL", modes: modes![(Acc, 0x2A), (Zp, 0x26), (ZpX, 0x36), (Abs, 0x2E), (AbsX, 0x3E)] },
    Mnemonic { name: "ROR", modes: modes![(Acc, 0x6A), (Zp, 0x66), (ZpX, 0x76), (Abs, 0x6E), (AbsX, 0x7E)] },
    Mnemonic { name: "RTI", modes: modes![(Imp, 0x40)] },
    Mnemonic { name: "RTS", modes: modes![(Imp, 0x60)] },
    Mnemonic { name: "SBC", modes: modes![(Imm, 0xE9), (Zp, 0xE5), (ZpX, 0xF5), (Abs, 0xED), (AbsX, 0xFD), (AbsY, 0xF9), (IndX, 0xE1), (IndY, 0xF1)] },
    Mnemonic { name: "SEC", modes: modes![(Imp, 0x38)] },
    Mnemonic { name: "SED", modes: modes![(Imp, 0xF8)] },
    Mnemonic { name: "SEI", modes: modes![(Imp, 0x78)] },
    Mnemonic { name: "STA", modes: modes![(Zp, 0x85), (ZpX, 0x95), (Abs, 0x8D), (AbsX, 0x9D), (AbsY, 0x99), (IndX, 0x81), (IndY, 0x91)] },
    Mnemonic { name: "STX", modes: modes![(Zp, 0x86), (ZpY, 0x96), (Abs, 0x8E)] },
    Mnemonic { name: "STY", modes: modes![(Zp, 0x84), (ZpX, 0x94), (Abs, 0x8C)] },
    Mnemonic { name: "TAX", modes: modes![(Imp, 0xAA)] },
    Mnemonic { name: "TAY", modes: modes![(Imp, 0xA8)] },
    Mnemonic { name: "TSX", modes: modes![(Imp, 0xBA)] },
    Mnemonic { name: "TXA", modes: modes![(Imp, 0x8A)] },
    Mnemonic { name: "TXS", modes: modes![(Imp, 0x9A)] },
    Mnemonic { name: "TYA", modes: modes![(Imp, 0x98)] },
];

fn mode_opcode(mnem: &Mnemonic, mode: Mode) -> Option<u8> {
    mnem.modes.iter().find(|e| e.mode == mode).map(|e| e.opcode)
}

static OPCODES: &[OpcodeEntry] = {
    // `op_type` carries the mnemonic's index into `MNEMONICS`; kept in sync
    // by construction below rather than hand-numbered.
    const fn entry(name: &'static str, op_type: i32) -> OpcodeEntry {
        OpcodeEntry { name, op_type, parm: 0 }
    }
    &[
        entry("ADC", 0), entry("AND", 1), entry("ASL", 2), entry("BCC", 3), entry("BCS", 4),
        entry("BEQ", 5), entry("BIT", 6), entry("BMI", 7), entry("BNE", 8), entry("BPL", 9),
        entry("BRK", 10), entry("BVC", 11), entry("BVS", 12), entry("CLC", 13), entry("CLD", 14),
        entry("CLI", 15), entry("CLV", 16), entry("CMP", 17), entry("CPX", 18), entry("CPY", 19),
        entry("DEC", 20), entry("DEX", 21), entry("DEY", 22), entry("EOR", 23), entry("INC", 24),
        entry("INX", 25), entry("INY", 26), entry("JMP", 27), entry("JSR", 28), entry("LDA", 29),
        entry("LDX", 30), entry("LDY", 31), entry("LSR", 32), entry("NOP", 33), entry("ORA", 34),
        entry("PHA", 35), entry("PHP", 36), entry("PLA", 37), entry("PLP", 38), entry("ROL", 39),
        entry("ROR", 40), entry("RTI", 41), entry("RTS", 42), entry("SBC", 43), entry("SEC", 44),
        entry("SED", 45), entry("SEI", 46), entry("STA", 47), entry("STX", 48), entry("STY", 49),
        entry("TAX", 50), entry("TAY", 51), entry("TSX", 52), entry("TXA", 53), entry("TXS", 54),
        entry("TYA", 55),
    ]
};

static VARIANT: CpuVariant = CpuVariant {
    name: "6502",
    index: 0,
    endian: Endian::Little,
    addr_width: 16,
    list_width: 16,
    word_size: 8,
    options: CpuOptions { at_sym: false, dollar_sym: false },
    opcodes: OPCODES,
};

/// Addressing mode plus evaluated operand, as read off the cursor. `Rel`
/// carries the raw branch target rather than a displacement; the caller
/// computes the displacement once it knows the final instruction length.
enum Operand {
    None,
    Imm(i32, bool),
    Byte(i32, bool),
    RegIndexed { value: i32, known: bool, reg_x: bool },
    IndX(i32, bool),
    IndY(i32, bool),
    Ind(i32, bool),
}

fn looks_like_accumulator(ctx: &mut OpcodeContext) -> bool {
    let mut probe = ctx.cursor.clone();
    probe.skip_blanks();
    if probe.peek_char() != Some('A') {
        return false;
    }
    probe.bump_char();
    probe.skip_blanks();
    if !probe.at_eol() {
        return false;
    }
    *ctx.cursor = probe;
    true
}

fn read_index_reg(ctx: &mut OpcodeContext) -> Option<bool> {
    ctx.cursor.skip_blanks();
    match ctx.cursor.peek_char() {
        Some('X') | Some('x') => {
            ctx.cursor.bump_char();
            Some(true)
        }
        Some('Y') | Some('y') => {
            ctx.cursor.bump_char();
            Some(false)
        }
        _ => None,
    }
}

fn parse_operand(ctx: &mut OpcodeContext, mnem: &Mnemonic) -> Operand {
    ctx.cursor.skip_blanks();
    if ctx.cursor.at_eol() {
        return Operand::None;
    }
    if mode_opcode(mnem, Mode::Acc).is_some() && looks_like_accumulator(ctx) {
        return Operand::None;
    }
    if ctx.cursor.peek_char() == Some('#') {
        ctx.cursor.bump_char();
        let v = ctx.eval();
        return Operand::Imm(v.value, v.known);
    }
    if ctx.cursor.peek_char() == Some('(') && (mode_opcode(mnem, Mode::Ind).is_some() || mode_opcode(mnem, Mode::IndX).is_some() || mode_opcode(mnem, Mode::IndY).is_some()) {
        ctx.cursor.bump_char();
        let v = ctx.eval();
        if ctx.cursor.comma() {
            read_index_reg(ctx);
            ctx.cursor.rparen();
            return Operand::IndX(v.value, v.known);
        }
        ctx.cursor.rparen();
        if ctx.cursor.comma() {
            read_index_reg(ctx);
            return Operand::IndY(v.value, v.known);
        }
        return Operand::Ind(v.value, v.known);
    }
    let v = ctx.eval();
    if ctx.cursor.comma() {
        match read_index_reg(ctx) {
            Some(reg_x) => Operand::RegIndexed { value: v.value, known: v.known, reg_x },
            None => {
                ctx.error("expected X or Y index register");
                Operand::Byte(v.value, v.known)
            }
        }
    } else {
        Operand::Byte(v.value, v.known)
    }
}

fn fits_zero_page(value: i32, known: bool) -> bool {
    known && (0..=0xFF).contains(&value)
}

fn emit(ctx: &mut OpcodeContext, opcode: u8, operand_byte: Option<u8>) {
    ctx.buffer.add_b(opcode);
    if let Some(b) = operand_byte {
        ctx.buffer.add_b(b);
    }
}

fn emit_word(ctx: &mut OpcodeContext, opcode: u8, value: i32) {
    ctx.buffer.add_b(opcode);
    ctx.buffer.add_w(value as u16);
}

pub struct Mos6502;

impl CpuBackend for Mos6502 {
    fn name(&self) -> &'static str {
        "6502"
    }

    fn variants(&self) -> &'static [CpuVariant] {
        std::slice::from_ref(&VARIANT)
    }

    fn do_opcode(&self, ctx: &mut OpcodeContext, _variant_index: usize, op_type: i32, _parm: i32) -> bool {
        let mnem = match MNEMONICS.get(op_type as usize) {
            Some(m) => m,
            None => return false,
        };

        if let Some(opcode) = mode_opcode(mnem, Mode::Rel) {
            let v = ctx.eval();
            let loc = ctx.loc;
            let addr_width = ctx.addr_width;
            let disp = eval_branch(v.value, loc, 2, addr_width, &mut ctx.errors);
            emit(ctx, opcode, Some(disp));
            return true;
        }

        if mnem.modes.len() == 1 && mode_opcode(mnem, Mode::Imp).is_some() {
            emit(ctx, mode_opcode(mnem, Mode::Imp).unwrap(), None);
            return true;
        }

        let operand = parse_operand(ctx, mnem);
        match operand {
            Operand::None => {
                if let Some(op) = mode_opcode(mnem, Mode::Acc).or_else(|| mode_opcode(mnem, Mode::Imp)) {
                    emit(ctx, op, None);
                    true
                } else {
                    ctx.error(format!("{} requires an operand", mnem.name));
                    false
                }
            }
            Operand::Imm(value, _known) => {
                if let Some(op) = mode_opcode(mnem, Mode::Imm) {
                    let byte = check_byte(value, &mut ctx.warnings) as u8;
                    emit(ctx, op, Some(byte));
                    true
                } else {
                    ctx.error(format!("{} has no immediate addressing mode", mnem.name));
                    false
                }
            }
            Operand::Byte(value, known) => {
                if !ctx.exact && fits_zero_page(value, known) && mode_opcode(mnem, Mode::Zp).is_some() {
                    let op = mode_opcode(mnem, Mode::Zp).unwrap();
                    let byte = check_byte(value, &mut ctx.warnings) as u8;
                    emit(ctx, op, Some(byte));
                } else if let Some(op) = mode_opcode(mnem, Mode::Abs) {
                    emit_word(ctx, op, value);
                } else if let Some(op) = mode_opcode(mnem, Mode::Zp) {
                    let byte = check_byte(value, &mut ctx.warnings) as u8;
                    emit(ctx, op, Some(byte));
                } else {
                    ctx.error(format!("{} has no absolute/zero-page addressing mode", mnem.name));
                    return false;
                }
                true
            }
            Operand::RegIndexed { value, known, reg_x } => {
                let (zp_mode, abs_mode) = if reg_x { (Mode::ZpX, Mode::AbsX) } else { (Mode::ZpY, Mode::AbsY) };
                if !ctx.exact && fits_zero_page(value, known) && mode_opcode(mnem, zp_mode).is_some() {
                    let op = mode_opcode(mnem, zp_mode).unwrap();
                    let byte = check_byte(value, &mut ctx.warnings) as u8;
                    emit(ctx, op, Some(byte));
                } else if let Some(op) = mode_opcode(mnem, abs_mode) {
                    emit_word(ctx, op, value);
                } else if let Some(op) = mode_opcode(mnem, zp_mode) {
                    let byte = check_byte(value, &mut ctx.warnings) as u8;
                    emit(ctx, op, Some(byte));
                } else {
                    ctx.error(format!("{} has no indexed addressing mode for that register", mnem.name));
                    return false;
                }
                true
            }
            Operand::IndX(value, _known) => {
                if let Some(op) = mode_opcode(mnem, Mode::IndX) {
                    let byte = check_byte(value, &mut ctx.warnings) as u8;
                    emit(ctx, op, Some(byte));
                    true
                } else {
                    ctx.error(format!("{} has no (zp,X) addressing mode", mnem.name));
                    false
                }
            }
            Operand::IndY(value, _known) => {
                if let Some(op) = mode_opcode(mnem, Mode::IndY) {
                    let byte = check_byte(value, &mut ctx.warnings) as u8;
                    emit(ctx, op, Some(byte));
                    true
                } else {
                    ctx.error(format!("{} has no (zp),Y addressing mode", mnem.name));
                    false
                }
            }
            Operand::Ind(value, _known) => {
                if let Some(op) = mode_opcode(mnem, Mode::Ind) {
                    emit_word(ctx, op, value);
                    true
                } else {
                    ctx.error(format!("{} has no (abs) addressing mode", mnem.name));
                    false
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use asmx_core::{CpuRegistry, Assembler};

    fn assembler() -> Assembler {
        let mut registry = CpuRegistry::new();
        registry.register(Box::new(Mos6502));
        let mut asm = Assembler::new(registry);
        asm.set_default_cpu("6502").unwrap();
        asm
    }

    #[test]
    fn lda_immediate_sta_absolute_rts() {
        let mut asm = assembler();
        asm.segments.current_mut().lc.org(0x1000);
        asm.process_line(" LDA #$42").unwrap();
        assert_eq!(asm.bytes(), &[0xA9, 0x42]);
        asm.process_line(" STA $2000").unwrap();
        assert_eq!(asm.bytes(), &[0x8D, 0x00, 0x20]);
        asm.process_line(" RTS").unwrap();
        assert_eq!(asm.bytes(), &[0x60]);
    }

    #[test]
    fn lda_zero_page_picks_short_form() {
        let mut asm = assembler();
        asm.segments.current_mut().lc.org(0x10);
        asm.symbols.define("PTR", 0x20, false, true, true, 1);
        asm.process_line(" LDA PTR").unwrap();
        assert_eq!(asm.segments.current().lc.cod, 0x10 + 2);
    }
}
