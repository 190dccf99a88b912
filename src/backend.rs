//! The back-end contract (§6.4, §9 "Polymorphism across CPU back ends").
//!
//! A CPU back end is a value implementing [`CpuBackend`] plus a static
//! table of [`CpuVariant`]s. The core never downcasts or inspects a back
//! end's internals; everything it needs crosses through this trait and
//! [`OpcodeContext`].

use crate::emit::{Endian, InstructionBuffer};
use crate::expr::{EvalValue, Evaluator};
use crate::lexer::{LexOptions, LineCursor};
use crate::symbol::SymbolTable;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuOptions {
    pub at_sym: bool,
    pub dollar_sym: bool,
}

impl CpuOptions {
    pub fn lex_opts(self) -> LexOptions {
        LexOptions { at_sym: self.at_sym, dollar_sym: self.dollar_sym }
    }
}

/// One opcode table entry. `name` may end in `*` for suffix-wildcard
/// matching (`DC*` matches `DC`, `DC.B`, ...); `op_type`/`parm` are opaque
/// to the core and interpreted only by the owning back end's `do_opcode`.
#[derive(Debug, Clone, Copy)]
pub struct OpcodeEntry {
    pub name: &'static str,
    pub op_type: i32,
    pub parm: i32,
}

/// A "label op" is an opcode whose handling needs the line's label, if
/// any (e.g. `EQU`-like constructs owned by a back end rather than the
/// core). Spec.md's `LabelOp` range starts at this sentinel.
pub const LABEL_OP_BASE: i32 = 0x1000;

#[derive(Debug, Clone, Copy)]
pub struct CpuVariant {
    pub name: &'static str,
    pub index: usize,
    pub endian: Endian,
    pub addr_width: u32,
    pub list_width: u32,
    pub word_size: u32,
    pub options: CpuOptions,
    pub opcodes: &'static [OpcodeEntry],
}

/// Everything a back end needs to decode one opcode: the lexer cursor
/// (already past the opcode token), the symbol table, the instruction
/// buffer to fill in, and the current location/pass for evaluation.
pub struct OpcodeContext<'a> {
    pub cursor: &'a mut LineCursor,
    pub symbols: &'a mut SymbolTable,
    pub buffer: &'a mut InstructionBuffer,
    pub loc: i32,
    pub pass: u8,
    pub addr_width: u32,
    pub lex_opts: LexOptions,
    /// `ceil(WORDSIZE / 8)`; scales `$`/`*` for CPUs addressing in units
    /// wider than a byte. 1 for every back end in this workspace.
    pub word_div: i32,
    /// `OPT EXACT`: when set, a back end should not silently pick a
    /// shorter addressing mode (e.g. 6502 zero page) just because an
    /// operand's value happens to fit — it should use the mode implied by
    /// the operand's written form instead.
    pub exact: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl<'a> OpcodeContext<'a> {
    pub fn eval(&mut self) -> EvalValue {
        let mut ev = Evaluator::new(self.cursor, self.symbols, self.lex_opts, self.loc, self.word_div, self.pass);
        let v = ev.eval();
        self.errors.append(&mut ev.errors);
        self.warnings.append(&mut ev.warnings);
        v
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }
}

pub trait CpuBackend {
    /// Version/identification banner, e.g. `"6502"`.
    fn name(&self) -> &'static str;

    fn variants(&self) -> &'static [CpuVariant];

    /// Decodes one opcode. Returns `false` if `op_type` isn't recognized
    /// (shouldn't normally happen since the dispatcher only calls this
    /// after a table match).
    fn do_opcode(&self, ctx: &mut OpcodeContext, variant_index: usize, op_type: i32, parm: i32) -> bool;

    /// Label-op variant: opcodes whose semantics depend on the line's
    /// label (`op_type >= LABEL_OP_BASE`). Most back ends have none.
    fn do_label_op(&self, _ctx: &mut OpcodeContext, _variant_index: usize, _op_type: i32, _parm: i32, _label: &str) -> bool {
        false
    }

    /// Per-pass reset hook for any back-end-local state.
    fn pass_init(&mut self) {}
}
