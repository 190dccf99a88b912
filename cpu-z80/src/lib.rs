//! Zilog Z80 back end. Covers the documented instruction set: 8/16-bit
//! loads, ALU ops (8-bit register/immediate and the `ADD/ADC/SBC HL,rr`
//! 16-bit forms), INC/DEC, exchanges, the full jump/call/return family with
//! condition codes, RST, IN/OUT, IM, and the CB-prefixed bit/rotate/shift
//! group. IX/IY-indexed addressing is out of scope here.

use asmx_core::{check_byte, eval_branch, CpuBackend, CpuOptions, CpuVariant, Endian, OpcodeContext, OpcodeEntry};

const CAT_IMPLICIT: i32 = 0;
const CAT_ALU: i32 = 1;
const CAT_INCDEC: i32 = 2;
const CAT_PUSHPOP: i32 = 3;
const CAT_EX: i32 = 4;
const CAT_JP: i32 = 5;
const CAT_JR: i32 = 6;
const CAT_DJNZ: i32 = 7;
const CAT_CALL: i32 = 8;
const CAT_RET: i32 = 9;
const CAT_RST: i32 = 10;
const CAT_IN: i32 = 11;
const CAT_OUT: i32 = 12;
const CAT_IM: i32 = 13;
const CAT_CBBIT: i32 = 14;
const CAT_CBROT: i32 = 15;
const CAT_LD: i32 = 16;

const fn pack(lo: i32, hi: i32) -> i32 {
    lo | (hi << 8)
}

static OPCODES: &[OpcodeEntry] = &[
    OpcodeEntry { name: "NOP", op_type: CAT_IMPLICIT, parm: 0x00 },
    OpcodeEntry { name: "RLCA", op_type: CAT_IMPLICIT, parm: 0x07 },
    OpcodeEntry { name: "RRCA", op_type: CAT_IMPLICIT, parm: 0x0F },
    OpcodeEntry { name: "RLA", op_type: CAT_IMPLICIT, parm: 0x17 },
    OpcodeEntry { name: "RRA", op_type: CAT_IMPLICIT, parm: 0x1F },
    OpcodeEntry { name: "DAA", op_type: CAT_IMPLICIT, parm: 0x27 },
    OpcodeEntry { name: "CPL", op_type: CAT_IMPLICIT, parm: 0x2F },
    OpcodeEntry { name: "SCF", op_type: CAT_IMPLICIT, parm: 0x37 },
    OpcodeEntry { name: "CCF", op_type: CAT_IMPLICIT, parm: 0x3F },
    OpcodeEntry { name: "HALT", op_type: CAT_IMPLICIT, parm: 0x76 },
    OpcodeEntry { name: "EXX", op_type: CAT_IMPLICIT, parm: 0xD9 },
    OpcodeEntry { name: "DI", op_type: CAT_IMPLICIT, parm: 0xF3 },
    OpcodeEntry { name: "EI", op_type: CAT_IMPLICIT, parm: 0xFB },
    OpcodeEntry { name: "NEG", op_type: CAT_IMPLICIT, parm: 0xED44 },
    OpcodeEntry { name: "RETN", op_type: CAT_IMPLICIT, parm: 0xED45 },
    OpcodeEntry { name: "RETI", op_type: CAT_IMPLICIT, parm: 0xED4D },
    OpcodeEntry { name: "LDI", op_type: CAT_IMPLICIT, parm: 0xEDA0 },
    OpcodeEntry { name: "CPI", op_type: CAT_IMPLICIT, parm: 0xEDA1 },
    OpcodeEntry { name: "LDD", op_type: CAT_IMPLICIT, parm: 0xEDA8 },
    OpcodeEntry { name: "CPD", op_type: CAT_IMPLICIT, parm: 0xEDA9 },
    OpcodeEntry { name: "LDIR", op_type: CAT_IMPLICIT, parm: 0xEDB0 },
    OpcodeEntry { name: "CPIR", op_type: CAT_IMPLICIT, parm: 0xEDB1 },
    OpcodeEntry { name: "LDDR", op_type: CAT_IMPLICIT, parm: 0xEDB8 },
    OpcodeEntry { name: "CPDR", op_type: CAT_IMPLICIT, parm: 0xEDB9 },
    OpcodeEntry { name: "ADD", op_type: CAT_ALU, parm: 0 },
    OpcodeEntry { name: "ADC", op_type: CAT_ALU, parm: 1 },
    OpcodeEntry { name: "SUB", op_type: CAT_ALU, parm: 2 },
    OpcodeEntry { name: "SBC", op_type: CAT_ALU, parm: 3 },
    OpcodeEntry { name: "AND", op_type: CAT_ALU, parm: 4 },
    OpcodeEntry { name: "XOR", op_type: CAT_ALU, parm: 5 },
    OpcodeEntry { name: "OR", op_type: CAT_ALU, parm: 6 },
    OpcodeEntry { name: "CP", op_type: CAT_ALU, parm: 7 },
    OpcodeEntry { name: "INC", op_type: CAT_INCDEC, parm: pack(0x04, 0x03) },
    OpcodeEntry { name: "DEC", op_type: CAT_INCDEC, parm: pack(0x05, 0x0B) },
    OpcodeEntry { name: "PUSH", op_type: CAT_PUSHPOP, parm: 0xC5 },
    OpcodeEntry { name: "POP", op_type: CAT_PUSHPOP, parm: 0xC1 },
    OpcodeEntry { name: "EX", op_type: CAT_EX, parm: 0 },
    OpcodeEntry { name: "JP", op_type: CAT_JP, parm: 0 },
    OpcodeEntry { name: "JR", op_type: CAT_JR, parm: 0 },
    OpcodeEntry { name: "DJNZ", op_type: CAT_DJNZ, parm: 0 },
    OpcodeEntry { name: "CALL", op_type: CAT_CALL, parm: 0 },
    OpcodeEntry { name: "RET", op_type: CAT_RET, parm: 0 },
    OpcodeEntry { name: "RST", op_type: CAT_RST, parm: 0 },
    OpcodeEntry { name: "IN", op_type: CAT_IN, parm: 0 },
    OpcodeEntry { name: "OUT", op_type: CAT_OUT, parm: 0 },
    OpcodeEntry { name: "IM", op_type: CAT_IM, parm: 0 },
    OpcodeEntry { name: "BIT", op_type: CAT_CBBIT, parm: 0x40 },
    OpcodeEntry { name: "RES", op_type: CAT_CBBIT, parm: 0x80 },
    OpcodeEntry { name: "SET", op_type: CAT_CBBIT, parm: 0xC0 },
    OpcodeEntry { name: "RLC", op_type: CAT_CBROT, parm: 0x00 },
    OpcodeEntry { name: "RRC", op_type: CAT_CBROT, parm: 0x08 },
    OpcodeEntry { name: "RL", op_type: CAT_CBROT, parm: 0x10 },
    OpcodeEntry { name: "RR", op_type: CAT_CBROT, parm: 0x18 },
    OpcodeEntry { name: "SLA", op_type: CAT_CBROT, parm: 0x20 },
    OpcodeEntry { name: "SRA", op_type: CAT_CBROT, parm: 0x28 },
    OpcodeEntry { name: "SRL", op_type: CAT_CBROT, parm: 0x38 },
    OpcodeEntry { name: "LD", op_type: CAT_LD, parm: 0 },
];

static VARIANT: CpuVariant = CpuVariant {
    name: "Z80",
    index: 0,
    endian: Endian::Little,
    addr_width: 16,
    list_width: 16,
    word_size: 8,
    options: CpuOptions { at_sym: false, dollar_sym: false },
    opcodes: OPCODES,
};

const REG8: &[(&str, u8)] = &[("B", 0), ("C", 1), ("D", 2), ("E", 3), ("H", 4), ("L", 5), ("A", 7)];
const REG16: &[(&str, u8)] = &[("BC", 0), ("DE", 1), ("HL", 2), ("SP", 3)];
const REG16_AF: &[(&str, u8)] = &[("BC", 0), ("DE", 1), ("HL", 2), ("AF", 3)];
const CC8: &[(&str, u8)] = &[("NZ", 0), ("Z", 1), ("NC", 2), ("C", 3), ("PO", 4), ("PE", 5), ("P", 6), ("M", 7)];
const CC4: &[(&str, u8)] = &[("NZ", 0), ("Z", 1), ("NC", 2), ("C", 3)];

/// Matches a fixed bareword token (a register or condition name) without
/// consuming a prefix of a longer identifier: `expect` alone would let
/// `"P"` match the start of `"PO"`, so this also checks that what follows
/// isn't itself alphanumeric.
fn expect_word(ctx: &mut OpcodeContext, word: &str) -> bool {
    let save = ctx.cursor.pos();
    if ctx.cursor.expect(word) && ctx.cursor.peek_char().map_or(true, |c| !c.is_ascii_alphanumeric()) {
        return true;
    }
    ctx.cursor.set_pos(save);
    false
}

fn match_word_table(ctx: &mut OpcodeContext, table: &[(&str, u8)]) -> Option<u8> {
    for (name, code) in table {
        if expect_word(ctx, name) {
            return Some(*code);
        }
    }
    None
}

/// `r` operand: a bare 8-bit register name, or `(HL)` (register code 6).
fn read_reg8(ctx: &mut OpcodeContext) -> Option<u8> {
    let save = ctx.cursor.pos();
    if ctx.cursor.expect("(") {
        if expect_word(ctx, "HL") && ctx.cursor.expect(")") {
            return Some(6);
        }
        ctx.cursor.set_pos(save);
        return None;
    }
    match_word_table(ctx, REG8)
}

/// Peeks for a literal `(HL)` without consuming it. The generic `(expr)`
/// address forms in `do_ld` must not swallow `(HL)` as a computed address —
/// that operand is the register form `read_reg8` handles further down.
fn peek_paren_hl(ctx: &mut OpcodeContext) -> bool {
    let save = ctx.cursor.pos();
    let hit = ctx.cursor.expect("(") && expect_word(ctx, "HL") && ctx.cursor.expect(")");
    ctx.cursor.set_pos(save);
    hit
}

fn emit_cb(ctx: &mut OpcodeContext, opcode: u8) {
    ctx.buffer.add_x(0xCB00 | opcode as u32, 2);
}

fn emit_ed(ctx: &mut OpcodeContext, opcode: u8) {
    ctx.buffer.add_x(0xED00 | opcode as u32, 2);
}

fn alu_reg_or_imm(ctx: &mut OpcodeContext, alu_idx: u8) -> bool {
    if let Some(r) = read_reg8(ctx) {
        ctx.buffer.add_b(0x80 + alu_idx * 8 + r);
        return true;
    }
    let v = ctx.eval();
    let byte = check_byte(v.value, &mut ctx.warnings) as u8;
    ctx.buffer.add_b(0xC6 + alu_idx * 8);
    ctx.buffer.add_b(byte);
    true
}

fn do_alu(ctx: &mut OpcodeContext, alu_idx: u8) -> bool {
    let save = ctx.cursor.pos();
    if expect_word(ctx, "HL") && ctx.cursor.expect(",") {
        if let Some(rr) = match_word_table(ctx, REG16) {
            match alu_idx {
                0 => ctx.buffer.add_b(0x09 + rr * 16),
                1 => emit_ed(ctx, 0x4A + rr * 16),
                3 => emit_ed(ctx, 0x42 + rr * 16),
                _ => {
                    ctx.error("that ALU op has no HL,rr form");
                    return false;
                }
            }
            return true;
        }
    }
    ctx.cursor.set_pos(save);
    // `ADD A,r` etc. also accept the explicit "A," prefix; skip over it.
    let save2 = ctx.cursor.pos();
    if expect_word(ctx, "A") && ctx.cursor.expect(",") {
        return alu_reg_or_imm(ctx, alu_idx);
    }
    ctx.cursor.set_pos(save2);
    alu_reg_or_imm(ctx, alu_idx)
}

fn do_incdec(ctx: &mut OpcodeContext, base_r: i32, base_rr: i32) -> bool {
    if let Some(r) = read_reg8(ctx) {
        ctx.buffer.add_b((base_r + (r as i32) * 8) as u8);
        return true;
    }
    if let Some(rr) = match_word_table(ctx, REG16) {
        ctx.buffer.add_b((base_rr + (rr as i32) * 16) as u8);
        return true;
    }
    ctx.error("expected a register or register pair");
    false
}

fn do_pushpop(ctx: &mut OpcodeContext, base: i32) -> bool {
    match match_word_table(ctx, REG16_AF) {
        Some(rr) => {
            ctx.buffer.add_b((base + (rr as i32) * 16) as u8);
            true
        }
        None => {
            ctx.error("expected BC, DE, HL, or AF");
            false
        }
    }
}

fn do_ex(ctx: &mut OpcodeContext) -> bool {
    let save = ctx.cursor.pos();
    if expect_word(ctx, "DE") && ctx.cursor.expect(",") && expect_word(ctx, "HL") {
        ctx.buffer.add_b(0xEB);
        return true;
    }
    ctx.cursor.set_pos(save);
    if ctx.cursor.expect("AF") && ctx.cursor.expect(",") && ctx.cursor.expect("AF'") {
        ctx.buffer.add_b(0x08);
        return true;
    }
    ctx.cursor.set_pos(save);
    if ctx.cursor.expect("(") && expect_word(ctx, "SP") && ctx.cursor.expect(")") && ctx.cursor.expect(",") && expect_word(ctx, "HL") {
        ctx.buffer.add_b(0xE3);
        return true;
    }
    ctx.cursor.set_pos(save);
    ctx.error("EX expects DE,HL or AF,AF' or (SP),HL");
    false
}

fn do_jp(ctx: &mut OpcodeContext) -> bool {
    let save = ctx.cursor.pos();
    if ctx.cursor.expect("(") && expect_word(ctx, "HL") && ctx.cursor.expect(")") {
        ctx.buffer.add_b(0xE9);
        return true;
    }
    ctx.cursor.set_pos(save);
    if let Some(cc) = match_word_table(ctx, CC8) {
        if ctx.cursor.expect(",") {
            let v = ctx.eval();
            ctx.buffer.add_b(0xC2 + cc * 8);
            ctx.buffer.add_w(v.value as u16);
            return true;
        }
        ctx.cursor.set_pos(save);
    }
    let v = ctx.eval();
    ctx.buffer.add_b(0xC3);
    ctx.buffer.add_w(v.value as u16);
    true
}

fn do_jr(ctx: &mut OpcodeContext) -> bool {
    let save = ctx.cursor.pos();
    if let Some(cc) = match_word_table(ctx, CC4) {
        if ctx.cursor.expect(",") {
            let v = ctx.eval();
            let disp = eval_branch(v.value, ctx.loc, 2, ctx.addr_width, &mut ctx.errors);
            ctx.buffer.add_b(0x20 + cc * 8);
            ctx.buffer.add_b(disp);
            return true;
        }
        ctx.cursor.set_pos(save);
    }
    let v = ctx.eval();
    let disp = eval_branch(v.value, ctx.loc, 2, ctx.addr_width, &mut ctx.errors);
    ctx.buffer.add_b(0x18);
    ctx.buffer.add_b(disp);
    true
}

fn do_djnz(ctx: &mut OpcodeContext) -> bool {
    let v = ctx.eval();
    let disp = eval_branch(v.value, ctx.loc, 2, ctx.addr_width, &mut ctx.errors);
    ctx.buffer.add_b(0x10);
    ctx.buffer.add_b(disp);
    true
}

fn do_call(ctx: &mut OpcodeContext) -> bool {
    let save = ctx.cursor.pos();
    if let Some(cc) = match_word_table(ctx, CC8) {
        if ctx.cursor.expect(",") {
            let v = ctx.eval();
            ctx.buffer.add_b(0xC4 + cc * 8);
            ctx.buffer.add_w(v.value as u16);
            return true;
        }
        ctx.cursor.set_pos(save);
    }
    let v = ctx.eval();
    ctx.buffer.add_b(0xCD);
    ctx.buffer.add_w(v.value as u16);
    true
}

fn do_ret(ctx: &mut OpcodeContext) -> bool {
    if let Some(cc) = match_word_table(ctx, CC8) {
        ctx.buffer.add_b(0xC0 + cc * 8);
        return true;
    }
    ctx.buffer.add_b(0xC9);
    true
}

fn do_rst(ctx: &mut OpcodeContext) -> bool {
    let v = ctx.eval();
    if v.known && v.value >= 0 && v.value <= 0x38 && v.value % 8 == 0 {
        ctx.buffer.add_b((0xC7 + v.value) as u8);
        true
    } else {
        ctx.error("RST target must be one of 0, 8, 16, ..., 56");
        false
    }
}

fn do_in(ctx: &mut OpcodeContext) -> bool {
    if expect_word(ctx, "A") && ctx.cursor.expect(",") && ctx.cursor.expect("(") {
        let v = ctx.eval();
        if ctx.cursor.expect(")") {
            let byte = check_byte(v.value, &mut ctx.warnings) as u8;
            ctx.buffer.add_b(0xDB);
            ctx.buffer.add_b(byte);
            return true;
        }
    }
    ctx.error("IN expects A,(n)");
    false
}

fn do_out(ctx: &mut OpcodeContext) -> bool {
    if ctx.cursor.expect("(") {
        let v = ctx.eval();
        if ctx.cursor.expect(")") && ctx.cursor.expect(",") && expect_word(ctx, "A") {
            let byte = check_byte(v.value, &mut ctx.warnings) as u8;
            ctx.buffer.add_b(0xD3);
            ctx.buffer.add_b(byte);
            return true;
        }
    }
    ctx.error("OUT expects (n),A");
    false
}

fn do_im(ctx: &mut OpcodeContext) -> bool {
    let v = ctx.eval();
    match v.value {
        0 => emit_ed(ctx, 0x46),
        1 => emit_ed(ctx, 0x56),
        2 => emit_ed(ctx, 0x5E),
        _ => {
            ctx.error("IM expects 0, 1, or 2");
            return false;
        }
    }
    true
}

fn do_cbbit(ctx: &mut OpcodeContext, base: u8) -> bool {
    let v = ctx.eval();
    if !ctx.cursor.expect(",") {
        ctx.error("expected , before the register");
        return false;
    }
    let r = match read_reg8(ctx) {
        Some(r) => r,
        None => {
            ctx.error("expected a register");
            return false;
        }
    };
    if !(0..=7).contains(&v.value) {
        ctx.error("bit number must be 0..7");
        return false;
    }
    emit_cb(ctx, base + (v.value as u8) * 8 + r);
    true
}

fn do_cbrot(ctx: &mut OpcodeContext, base: u8) -> bool {
    match read_reg8(ctx) {
        Some(r) => {
            emit_cb(ctx, base + r);
            true
        }
        None => {
            ctx.error("expected a register");
            false
        }
    }
}

fn do_ld(ctx: &mut OpcodeContext) -> bool {
    let save = ctx.cursor.pos();

    // LD A,I / LD I,A / LD A,R / LD R,A
    if expect_word(ctx, "A") && ctx.cursor.expect(",") {
        if expect_word(ctx, "I") {
            emit_ed(ctx, 0x57);
            return true;
        }
        if expect_word(ctx, "R") {
            emit_ed(ctx, 0x5F);
            return true;
        }
        if ctx.cursor.expect("(") {
            if expect_word(ctx, "BC") && ctx.cursor.expect(")") {
                ctx.buffer.add_b(0x0A);
                return true;
            }
            ctx.cursor.set_pos(save);
        } else {
            ctx.cursor.set_pos(save);
        }
    } else {
        ctx.cursor.set_pos(save);
    }

    if expect_word(ctx, "I") && ctx.cursor.expect(",") && expect_word(ctx, "A") {
        emit_ed(ctx, 0x47);
        return true;
    }
    ctx.cursor.set_pos(save);

    if expect_word(ctx, "R") && ctx.cursor.expect(",") && expect_word(ctx, "A") {
        emit_ed(ctx, 0x4F);
        return true;
    }
    ctx.cursor.set_pos(save);

    if expect_word(ctx, "SP") && ctx.cursor.expect(",") && expect_word(ctx, "HL") {
        ctx.buffer.add_b(0xF9);
        return true;
    }
    ctx.cursor.set_pos(save);

    if expect_word(ctx, "A") && ctx.cursor.expect(",") && ctx.cursor.expect("(") {
        if expect_word(ctx, "DE") && ctx.cursor.expect(")") {
            ctx.buffer.add_b(0x1A);
            return true;
        }
        ctx.cursor.set_pos(save);
    } else {
        ctx.cursor.set_pos(save);
    }

    if ctx.cursor.expect("(") && expect_word(ctx, "BC") && ctx.cursor.expect(")") && ctx.cursor.expect(",") && expect_word(ctx, "A") {
        ctx.buffer.add_b(0x02);
        return true;
    }
    ctx.cursor.set_pos(save);

    if ctx.cursor.expect("(") && expect_word(ctx, "DE") && ctx.cursor.expect(")") && ctx.cursor.expect(",") && expect_word(ctx, "A") {
        ctx.buffer.add_b(0x12);
        return true;
    }
    ctx.cursor.set_pos(save);

    if expect_word(ctx, "HL") && ctx.cursor.expect(",") && ctx.cursor.expect("(") {
        let v = ctx.eval();
        if ctx.cursor.expect(")") {
            ctx.buffer.add_b(0x2A);
            ctx.buffer.add_w(v.value as u16);
            return true;
        }
        ctx.error("expected )");
        return false;
    }
    ctx.cursor.set_pos(save);

    if expect_word(ctx, "A") && ctx.cursor.expect(",") && !peek_paren_hl(ctx) && ctx.cursor.expect("(") {
        let v = ctx.eval();
        if ctx.cursor.expect(")") {
            ctx.buffer.add_b(0x3A);
            ctx.buffer.add_w(v.value as u16);
            return true;
        }
        ctx.error("expected )");
        return false;
    }
    ctx.cursor.set_pos(save);

    if !peek_paren_hl(ctx) && ctx.cursor.expect("(") {
        let v = ctx.eval();
        if ctx.cursor.expect(")") && ctx.cursor.expect(",") {
            if expect_word(ctx, "HL") {
                ctx.buffer.add_b(0x22);
                ctx.buffer.add_w(v.value as u16);
                return true;
            }
            if expect_word(ctx, "A") {
                ctx.buffer.add_b(0x32);
                ctx.buffer.add_w(v.value as u16);
                return true;
            }
        }
        ctx.error("LD (nn),? expects A or HL");
        return false;
    }
    ctx.cursor.set_pos(save);

    if let Some(rr) = match_word_table(ctx, REG16) {
        if ctx.cursor.expect(",") {
            let v = ctx.eval();
            ctx.buffer.add_b(0x01 + rr * 16);
            ctx.buffer.add_w(v.value as u16);
            return true;
        }
        ctx.cursor.set_pos(save);
    }

    if let Some(r) = read_reg8(ctx) {
        if !ctx.cursor.expect(",") {
            ctx.error("expected , after the destination register");
            return false;
        }
        if let Some(r2) = read_reg8(ctx) {
            ctx.buffer.add_b(0x40 + r * 8 + r2);
            return true;
        }
        let v = ctx.eval();
        let byte = check_byte(v.value, &mut ctx.warnings) as u8;
        ctx.buffer.add_b(0x06 + r * 8);
        ctx.buffer.add_b(byte);
        return true;
    }

    ctx.error("unrecognized LD operand");
    false
}

pub struct Zilog80;

impl CpuBackend for Zilog80 {
    fn name(&self) -> &'static str {
        "Z80"
    }

    fn variants(&self) -> &'static [CpuVariant] {
        std::slice::from_ref(&VARIANT)
    }

    fn do_opcode(&self, ctx: &mut OpcodeContext, _variant_index: usize, op_type: i32, parm: i32) -> bool {
        match op_type {
            CAT_IMPLICIT => {
                if parm <= 0xFF {
                    ctx.buffer.add_b(parm as u8);
                } else {
                    ctx.buffer.add_x(parm as u32, 2);
                }
                true
            }
            CAT_ALU => do_alu(ctx, parm as u8),
            CAT_INCDEC => do_incdec(ctx, parm & 0xFF, (parm >> 8) & 0xFF),
            CAT_PUSHPOP => do_pushpop(ctx, parm),
            CAT_EX => do_ex(ctx),
            CAT_JP => do_jp(ctx),
            CAT_JR => do_jr(ctx),
            CAT_DJNZ => do_djnz(ctx),
            CAT_CALL => do_call(ctx),
            CAT_RET => do_ret(ctx),
            CAT_RST => do_rst(ctx),
            CAT_IN => do_in(ctx),
            CAT_OUT => do_out(ctx),
            CAT_IM => do_im(ctx),
            CAT_CBBIT => do_cbbit(ctx, parm as u8),
            CAT_CBROT => do_cbrot(ctx, parm as u8),
            CAT_LD => do_ld(ctx),
            _ => false,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use asmx_core::{Assembler, CpuRegistry, ObjectWriter};

    fn assembler() -> Assembler {
        let mut registry = CpuRegistry::new();
        registry.register(Box::new(Zilog80));
        let mut asm = Assembler::new(registry);
        asm.set_default_cpu("Z80").unwrap();
        asm
    }

    /// A forward branch needs a real two-pass run to resolve, so this
    /// drives `Assembler::run` against a scratch file instead of feeding
    /// `process_line` lines directly.
    #[test]
    fn jr_forward_reference_then_nop_and_halt() {
        let dir = std::env::temp_dir().join(format!("asmx-cpu-z80-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("main.asm");
        std::fs::write(&path, "        ORG 0\n        JR L1\n        NOP\nL1:     HALT\n").unwrap();

        let mut asm = assembler();
        asm.object = Some(ObjectWriter::new_raw(None, None));
        let report = asm.run(path.to_str().unwrap()).unwrap();
        assert_eq!(report.error_count, 0);
        let bytes = asm.object.as_ref().and_then(ObjectWriter::raw_bytes).unwrap();
        assert_eq!(bytes, &[0x18, 0x01, 0x00, 0x76]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn ld_register_and_immediate_forms() {
        let mut asm = assembler();
        asm.process_line(" LD A,B").unwrap();
        assert_eq!(asm.bytes(), &[0x78]);
        asm.process_line(" LD B,42").unwrap();
        assert_eq!(asm.bytes(), &[0x06, 42]);
        asm.process_line(" LD HL,1000H").unwrap();
        assert_eq!(asm.bytes(), &[0x21, 0x00, 0x10]);
        asm.process_line(" LD (HL),A").unwrap();
        assert_eq!(asm.bytes(), &[0x77]);
    }

    #[test]
    fn cb_prefixed_bit_test_and_ed_prefixed_ldir() {
        let mut asm = assembler();
        asm.process_line(" BIT 0,A").unwrap();
        assert_eq!(asm.bytes(), &[0xCB, 0x47]);
        asm.process_line(" LDIR").unwrap();
        assert_eq!(asm.bytes(), &[0xED, 0xB0]);
    }

    #[test]
    fn push_pop_and_call_with_condition() {
        let mut asm = assembler();
        asm.process_line(" PUSH HL").unwrap();
        assert_eq!(asm.bytes(), &[0xE5]);
        asm.process_line(" CALL NZ,1234H").unwrap();
        assert_eq!(asm.bytes(), &[0xC4, 0x34, 0x12]);
        asm.process_line(" POP HL").unwrap();
        assert_eq!(asm.bytes(), &[0xE1]);
        asm.process_line(" RET").unwrap();
        assert_eq!(asm.bytes(), &[0xC9]);
    }
}
