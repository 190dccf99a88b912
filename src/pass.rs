//! The two-pass driver (§4.9) and the central `Assembler` value that
//! threads global mutable state (current segment, CPU, pass number,
//! condition stack, last-label strings, `evalKnown`) through every line
//! (§9 "Global mutable state").

use std::fs;
use std::io::Write;
use std::rc::Rc;

use crate::backend::{CpuBackend, OpcodeContext, LABEL_OP_BASE};
use crate::cond::CondStack;
use crate::dispatch;
use crate::emit::{Endian, InstructionBuffer};
use crate::error::{Diagnostic, Error, Result, Severity};
use crate::expr::{check_byte, check_word, Evaluator};
use crate::lexer::{LexOptions, LineCursor, Token};
use crate::listing::{ListingOptions, ListingWriter};
use crate::macro_engine::{split_args, BodyCapture, MacroTable, MAX_PARAMS};
use crate::objwriter::ObjectWriter;
use crate::pseudo::{self, PseudoOp};
use crate::registry::{CpuHandle, CpuRegistry};
use crate::segment::{SegmentKind, SegmentTable};
use crate::source::{SourcePos, SourceStack};
use crate::symbol::{DefOutcome, SymbolTable};
use crate::zscii;

struct FileBuffer {
    lines: Vec<String>,
    index: usize,
}

/// The layered line reader (§9 "Coroutine-like reader"): main source plus
/// nested `INCLUDE`s. Position/depth bookkeeping (including the
/// `MAX_INCLUDE` limit) is delegated to [`SourceStack`]; this just holds
/// each frame's actual line buffer in lockstep with that stack.
struct LineSource {
    positions: SourceStack,
    buffers: Vec<FileBuffer>,
}

impl LineSource {
    fn open(path: &str) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::OpenSource { path: path.to_string(), source: e })?;
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        let mut positions = SourceStack::new();
        positions.push(Rc::from(path))?;
        Ok(LineSource { positions, buffers: vec![FileBuffer { lines, index: 0 }] })
    }

    fn push_include(&mut self, path: &str) -> Result<()> {
        let text = fs::read_to_string(path).map_err(|e| Error::OpenInclude { path: path.to_string(), source: e })?;
        let lines: Vec<String> = text.lines().map(str::to_string).collect();
        self.positions.push(Rc::from(path))?;
        self.buffers.push(FileBuffer { lines, index: 0 });
        Ok(())
    }

    fn rewind(&mut self) {
        for b in &mut self.buffers {
            b.index = 0;
        }
        self.positions.reset_line();
    }

    fn next_raw(&mut self) -> Option<(String, Rc<str>, u32)> {
        loop {
            let top = self.buffers.last_mut()?;
            if top.index < top.lines.len() {
                let line = top.lines[top.index].clone();
                top.index += 1;
                self.positions.bump_line();
                let pos = self.positions.current();
                return Some((line, pos.file, pos.line));
            }
            if self.buffers.len() == 1 {
                return None;
            }
            self.buffers.pop();
            self.positions.pop();
        }
    }
}

/// `OPT`-settable assembler-wide state that isn't specific to the listing
/// (which owns its own `ListingOptions`).
#[derive(Debug, Clone, Copy)]
pub struct AssemblerOptions {
    pub exact: bool,
}

impl Default for AssemblerOptions {
    fn default() -> Self {
        AssemblerOptions { exact: false }
    }
}

#[derive(Debug, Default)]
pub struct AssembleReport {
    pub error_count: u32,
    pub warning_count: u32,
    pub diagnostics: Vec<Diagnostic>,
}

pub struct Assembler {
    pub symbols: SymbolTable,
    pub macros: MacroTable,
    pub cond: CondStack,
    pub segments: SegmentTable,
    pub registry: CpuRegistry,
    pub cpu: Option<CpuHandle>,
    pub options: AssemblerOptions,
    pub listing: Option<ListingWriter<Box<dyn Write>>>,
    pub object: Option<ObjectWriter<Box<dyn Write>>>,

    pass: u8,
    error_count: u32,
    warning_count: u32,
    diagnostics: Vec<Diagnostic>,
    cursor: LineCursor,
    lines: Option<LineSource>,
    pos: SourcePos,
    buffer: InstructionBuffer,
    transfer_addr: Option<i32>,
    capturing: Option<(String, Vec<String>, BodyCapture, bool)>,
    predefines: Vec<(String, i32, bool)>,
    end_seen: bool,
    /// `WORDSIZE n` (bits); `None` means "use the CPU's default".
    word_size_override: Option<u32>,
}

impl Assembler {
    pub fn new(registry: CpuRegistry) -> Self {
        Assembler {
            symbols: SymbolTable::new(),
            macros: MacroTable::new(),
            cond: CondStack::new(),
            segments: SegmentTable::new(),
            registry,
            cpu: None,
            options: AssemblerOptions::default(),
            listing: None,
            object: None,
            pass: 1,
            error_count: 0,
            warning_count: 0,
            diagnostics: Vec::new(),
            cursor: LineCursor::new(),
            lines: None,
            pos: SourcePos { file: Rc::from("<none>"), line: 0 },
            buffer: InstructionBuffer::new(Endian::Little),
            transfer_addr: None,
            capturing: None,
            predefines: Vec::new(),
            end_seen: false,
            word_size_override: None,
        }
    }

    pub fn predefine(&mut self, name: &str, value: i32, is_set: bool) {
        self.predefines.push((name.to_string(), value, is_set));
    }

    /// The bytes emitted by the most recent `process_line` call. Cleared at
    /// the start of the next one, so this only reflects the line just
    /// processed.
    pub fn bytes(&self) -> &[u8] {
        self.buffer.bytes()
    }

    /// Bits per word: the `WORDSIZE` override if one is in effect, else
    /// the current CPU variant's default (8 if no CPU is selected yet).
    fn word_size_bits(&self) -> u32 {
        self.word_size_override.unwrap_or_else(|| match self.cpu {
            Some(handle) => self.registry.variant(handle).word_size,
            None => 8,
        })
    }

    /// `wordDiv = ceil(WORDSIZE / 8)`, used to scale `$`/`*` for CPUs that
    /// address in units wider than a byte.
    fn word_div(&self) -> i32 {
        ((self.word_size_bits() + 7) / 8).max(1) as i32
    }

    pub fn set_default_cpu(&mut self, name: &str) -> Result<()> {
        self.cpu = Some(self.registry.find(name).ok_or_else(|| Error::UnknownCpu(name.to_string()))?);
        Ok(())
    }

    fn lex_opts(&self) -> LexOptions {
        match self.cpu {
            Some(h) => self.registry.variant(h).options.lex_opts(),
            None => LexOptions::default(),
        }
    }

    fn addr_width(&self) -> u32 {
        match self.cpu {
            Some(h) => self.registry.variant(h).addr_width,
            None => 16,
        }
    }

    fn endian(&self) -> Endian {
        match self.cpu {
            Some(h) => self.registry.variant(h).endian,
            None => Endian::Little,
        }
    }

    /// Runs both passes over `main_path` and finalizes object/listing
    /// output.
    pub fn run(&mut self, main_path: &str) -> Result<AssembleReport> {
        self.run_pass(1, main_path)?;
        self.run_pass(2, main_path)?;

        if let Some(obj) = &mut self.object {
            obj.finish(self.transfer_addr.map(|v| v as u32), "A").map_err(Error::ObjectWrite)?;
        }
        if let Some(listing) = &mut self.listing {
            let dump = self.symbols.dump(listing.options.show_temp_labels);
            listing.write_symbol_dump(&dump).map_err(Error::ListingWrite)?;
        }

        Ok(AssembleReport { error_count: self.error_count, warning_count: self.warning_count, diagnostics: self.diagnostics.clone() })
    }

    fn run_pass(&mut self, pass: u8, main_path: &str) -> Result<()> {
        self.pass = pass;
        self.cond = CondStack::new();
        self.segments.reset_location_counters();
        self.word_size_override = None;
        self.registry.init_all_passes();

        if pass == 1 {
            self.lines = Some(LineSource::open(main_path)?);
            for (name, value, is_set) in self.predefines.clone() {
                self.symbols.define(&name, value, is_set, !is_set, true, pass);
            }
        } else if let Some(src) = &mut self.lines {
            src.rewind();
        }

        self.end_seen = false;
        loop {
            let (line, file, lineno) = match self.next_logical_line() {
                Some(l) => l,
                None => break,
            };
            self.pos = SourcePos { file, line: lineno };
            if let Err(msg) = self.process_line(&line) {
                self.report_error(msg);
            }
            if self.end_seen {
                break;
            }
        }

        if !self.cond.at_initial_state() {
            self.report_error("IF block without ENDIF".to_string());
        }
        Ok(())
    }

    /// (a) macro body, (b) include stack, (c) main source — in that order.
    fn next_logical_line(&mut self) -> Option<(String, Rc<str>, u32)> {
        loop {
            if self.macros.depth() > 0 {
                if !self.macros.frame_exhausted() {
                    let line = self.macros.next_expanded_line()?;
                    let pos = self.pos.clone();
                    return Some((line, pos.file, pos.line));
                }
                self.macros.pop_frame();
                continue;
            }
            return self.lines.as_mut()?.next_raw();
        }
    }

    fn report_error(&mut self, message: String) {
        self.error_count += 1;
        self.diagnostics.push(Diagnostic { severity: Severity::Error, message, pos: self.pos.clone(), pass: self.pass });
    }

    fn report_warning(&mut self, message: String) {
        self.warning_count += 1;
        self.diagnostics.push(Diagnostic { severity: Severity::Warning, message, pos: self.pos.clone(), pass: self.pass });
    }

    /// Processes one already-read source line outside of the normal
    /// two-pass file loop: label detection, `EQU`/`SET`/`MACRO` label
    /// interception, then CPU-opcode/pseudo-op/macro-call dispatch in that
    /// priority order. `run` drives this through [`LineSource`]/macro
    /// expansion; callers that already have lines in hand (tests, a CPU
    /// back end's own fixtures) can call it directly.
    pub fn process_line(&mut self, line: &str) -> std::result::Result<(), String> {
        self.buffer.clear();
        self.buffer.endian = self.endian();
        self.cursor.set_line(line);

        if let Some((name, params, mut capture, too_many)) = self.capturing.take() {
            if capture.feed(line) {
                self.macros.define(&name, params, capture.into_body(), too_many, self.pass);
            } else {
                self.capturing = Some((name, params, capture, too_many));
            }
            return Ok(());
        }

        let has_label = !line.is_empty() && !line.starts_with(' ') && !line.starts_with('\t') && !line.trim_start().starts_with(';');
        let mut label: Option<String> = None;
        if has_label {
            if let Token::Ident(name) = self.cursor.get_word(self.lex_opts()) {
                label = Some(name);
            }
        }

        self.cursor.skip_blanks();
        if self.cursor.expect(":=") {
            return self.handle_def(label, false, true);
        }
        if self.cursor.peek_char() == Some('=') {
            self.cursor.bump_char();
            return self.handle_def(label, true, false);
        }

        let opcode_start = self.cursor.pos();
        let token = self.cursor.get_word_opcode(self.lex_opts());
        let name = match token {
            Token::Ident(n) => n,
            Token::Eof => {
                if let Some(label) = label {
                    self.define_label(&label);
                }
                return Ok(());
            }
            Token::Punct(c) => return Err(format!("unexpected character '{}'", c)),
        };

        if !self.cond.active() {
            return self.handle_conditional_only(&name);
        }

        // EQU/SET/MACRO consume the label themselves (as a symbol value or
        // a macro name) rather than having it mean "define a location-
        // counter label here", so they must run before the generic
        // define_label below.
        let pseudo_op = pseudo::lookup(&name);
        match pseudo_op {
            Some(PseudoOp::Equ) => return self.handle_def(label, true, false),
            Some(PseudoOp::Set) => return self.handle_def(label, false, true),
            Some(PseudoOp::Macro) => return self.handle_pseudo(PseudoOp::Macro, label.as_deref()),
            _ => {}
        }

        if let Some(label) = &label {
            self.define_label(label);
        }

        if let Some(handle) = self.cpu {
            let opcodes = self.registry.variant(handle).opcodes;
            if let Some((entry, consumed)) = dispatch::find_opcode(opcodes, &name) {
                self.cursor.set_pos(opcode_start + consumed);
                let op_type = entry.op_type;
                let parm = entry.parm;
                return self.dispatch_cpu_opcode(handle, op_type, parm, label.as_deref());
            }
        }

        if let Some(op) = pseudo_op {
            return self.handle_pseudo(op, label.as_deref());
        }

        if self.macros.get(&name).is_some() {
            let mut args = split_args(self.cursor.rest());
            args.truncate(MAX_PARAMS);
            self.macros.invoke(&name, args, self.pass)?;
            return Ok(());
        }

        if let Some(cpu_name) = name.strip_prefix('.') {
            match self.registry.find(cpu_name) {
                Some(handle) => {
                    self.cpu = Some(handle);
                    return Ok(());
                }
                None => return Err(format!("unknown CPU type {}", cpu_name)),
            }
        }

        Err(format!("unknown opcode {}", name))
    }

    fn handle_conditional_only(&mut self, name: &str) -> std::result::Result<(), String> {
        match pseudo::lookup(name) {
            Some(PseudoOp::If) => {
                let cond = self.eval_known_nonzero();
                self.cond.push_if(cond)
            }
            Some(PseudoOp::Elsif) => {
                let cond = self.eval_known_nonzero();
                self.cond.elsif(cond)
            }
            Some(PseudoOp::Else) => self.cond.else_(),
            Some(PseudoOp::Endif) => self.cond.endif(),
            _ => Ok(()),
        }
    }

    fn eval_known_nonzero(&mut self) -> bool {
        let loc = self.segments.current().lc.loc;
        let word_div = self.word_div();
        let mut ev = Evaluator::new(&mut self.cursor, &mut self.symbols, self.lex_opts(), loc, word_div, self.pass);
        let v = ev.eval();
        v.value != 0
    }

    fn define_label(&mut self, label: &str) {
        let loc = self.segments.current().lc.loc;
        match self.symbols.define(label, loc, false, false, true, self.pass) {
            DefOutcome::Ok => {
                self.symbols.set_last_labl(label.to_string());
            }
            DefOutcome::MultiplyDefined => self.report_error(format!("{} multiply defined", label)),
            DefOutcome::PhaseError => self.report_error("Phase error".to_string()),
        }
    }

    fn handle_def(&mut self, label: Option<String>, is_equ: bool, is_set: bool) -> std::result::Result<(), String> {
        let label = label.ok_or_else(|| "EQU/SET requires a label".to_string())?;
        if !self.cond.active() {
            return Ok(());
        }
        let loc = self.segments.current().lc.loc;
        let word_div = self.word_div();
        let mut ev = Evaluator::new(&mut self.cursor, &mut self.symbols, self.lex_opts(), loc, word_div, self.pass);
        let v = ev.eval();
        let warnings = std::mem::take(&mut ev.warnings);
        let errors = std::mem::take(&mut ev.errors);
        for w in warnings {
            self.report_warning(w);
        }
        for e in errors {
            self.report_error(e);
        }
        match self.symbols.define(&label, v.value, is_set, is_equ, v.known, self.pass) {
            DefOutcome::Ok => Ok(()),
            DefOutcome::MultiplyDefined => Err(format!("{} multiply defined", label)),
            DefOutcome::PhaseError => Err("Phase error".to_string()),
        }
    }

    fn dispatch_cpu_opcode(&mut self, handle: CpuHandle, op_type: i32, parm: i32, label: Option<&str>) -> std::result::Result<(), String> {
        let loc = self.segments.current().lc.loc;
        let addr_width = self.registry.variant(handle).addr_width;
        let lex_opts = self.registry.variant(handle).options.lex_opts();
        let word_div = self.word_div();

        let (handled, errors, warnings) = {
            let mut ctx = OpcodeContext {
                cursor: &mut self.cursor,
                symbols: &mut self.symbols,
                buffer: &mut self.buffer,
                loc,
                pass: self.pass,
                addr_width,
                lex_opts,
                word_div,
                exact: self.options.exact,
                errors: Vec::new(),
                warnings: Vec::new(),
            };
            let backend = self.registry.backend(handle.backend_index);
            let handled = if op_type >= LABEL_OP_BASE {
                backend.do_label_op(&mut ctx, handle.variant_index, op_type, parm, label.unwrap_or(""))
            } else {
                backend.do_opcode(&mut ctx, handle.variant_index, op_type, parm)
            };
            (handled, ctx.errors, ctx.warnings)
        };

        for w in warnings {
            self.report_warning(w);
        }
        for e in errors {
            self.report_error(e);
        }
        if !handled {
            return Err("opcode not recognized by back end".to_string());
        }
        self.emit_buffer()
    }

    fn emit_buffer(&mut self) -> std::result::Result<(), String> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        let seg = self.segments.current_mut();
        let addr = seg.lc.cod as u32;
        let len = self.buffer.len() as i32;
        seg.lc.advance(len);
        let bytes = self.buffer.bytes().to_vec();
        if self.pass == 2 && seg.kind == SegmentKind::Normal {
            if let Some(obj) = &mut self.object {
                obj.write_block(addr, &bytes).map_err(|e| e.to_string())?;
            }
        }
        if self.pass == 2 {
            if let Some(listing) = &mut self.listing {
                listing.write_line(addr, &bytes, self.cursor.text(), self.pass, self.macros.depth()).map_err(|e| e.to_string())?;
            }
        }
        Ok(())
    }

    fn emit_and_advance(&mut self, bytes: Vec<u8>, is_data: bool) -> std::result::Result<(), String> {
        self.buffer.clear();
        self.buffer.is_data = is_data;
        for b in &bytes {
            self.buffer.add_b(*b);
        }
        self.emit_buffer()
    }

    fn eval_operand(&mut self) -> (i32, bool) {
        let loc = self.segments.current().lc.loc;
        let word_div = self.word_div();
        let mut ev = Evaluator::new(&mut self.cursor, &mut self.symbols, self.lex_opts(), loc, word_div, self.pass);
        let v = ev.eval();
        let warnings = std::mem::take(&mut ev.warnings);
        let errors = std::mem::take(&mut ev.errors);
        for w in warnings {
            self.warning_count += 1;
            self.diagnostics.push(Diagnostic { severity: Severity::Warning, message: w, pos: self.pos.clone(), pass: self.pass });
        }
        for e in errors {
            self.error_count += 1;
            self.diagnostics.push(Diagnostic { severity: Severity::Error, message: e, pos: self.pos.clone(), pass: self.pass });
        }
        (v.value, v.known)
    }

    /// One `LIST`/`OPT` suboption (§6.3): `ON`/`OFF`, the `NO`-prefixed
    /// pairs that mirror `ListingOptions`'s fields, and (`OPT`-only in the
    /// spec, accepted from either here) `EXACT`/`NOEXACT`.
    fn apply_list_suboption(&mut self, word: &str) {
        let upper = word.to_ascii_uppercase();
        let set_listing = |opts: &mut ListingOptions| match upper.as_str() {
            "ON" => opts.list_on = true,
            "OFF" => opts.list_on = false,
            "MACRO" => opts.list_macro_expansions = true,
            "NOMACRO" => opts.list_macro_expansions = false,
            "EXPAND" => opts.expand_hex = true,
            "NOEXPAND" => opts.expand_hex = false,
            "SYM" => opts.show_symtab = true,
            "NOSYM" => opts.show_symtab = false,
            "TEMP" => opts.show_temp_labels = true,
            "NOTEMP" => opts.show_temp_labels = false,
            _ => {}
        };
        match upper.as_str() {
            "EXACT" => self.options.exact = true,
            "NOEXACT" => self.options.exact = false,
            _ => {
                if let Some(listing) = &mut self.listing {
                    set_listing(&mut listing.options);
                }
            }
        }
    }

    fn read_quoted_bytes(&mut self) -> Vec<u8> {
        let quote = match self.cursor.bump_char() {
            Some(c) => c,
            None => return Vec::new(),
        };
        let mut out = Vec::new();
        loop {
            match self.cursor.peek_char() {
                None => break,
                Some(c) if c == quote => {
                    self.cursor.bump_char();
                    if self.cursor.peek_char() == Some(quote) {
                        self.cursor.bump_char();
                        out.push(quote as u8);
                        continue;
                    }
                    break;
                }
                _ => out.push(self.cursor.get_backslash_char()),
            }
        }
        out
    }

    fn parse_byte_list(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            self.cursor.skip_blanks();
            match self.cursor.peek_char() {
                Some('\'') | Some('"') => out.extend(self.read_quoted_bytes()),
                _ => {
                    let (v, _known) = self.eval_operand();
                    let checked = check_byte(v, &mut Vec::new());
                    out.push(checked as u8);
                }
            }
            if !self.cursor.comma() {
                break;
            }
        }
        out
    }

    fn parse_word_list(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            self.cursor.skip_blanks();
            match self.cursor.peek_char() {
                Some('\'') | Some('"') => {
                    let mut bytes = self.read_quoted_bytes();
                    if bytes.len() % 2 != 0 {
                        bytes.push(0);
                    }
                    out.extend(bytes);
                }
                _ => {
                    let (v, _known) = self.eval_operand();
                    let checked = check_word(v, &mut Vec::new()) as u16;
                    let mut buf = InstructionBuffer::new(self.endian());
                    buf.add_w(checked);
                    out.extend_from_slice(buf.bytes());
                }
            }
            if !self.cursor.comma() {
                break;
            }
        }
        out
    }

    fn parse_long_list(&mut self) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            self.cursor.skip_blanks();
            match self.cursor.peek_char() {
                Some('\'') | Some('"') => {
                    let mut bytes = self.read_quoted_bytes();
                    while bytes.len() % 4 != 0 {
                        bytes.push(0);
                    }
                    out.extend(bytes);
                }
                _ => {
                    let (v, _known) = self.eval_operand();
                    let mut buf = InstructionBuffer::new(self.endian());
                    buf.add_l(v as u32);
                    out.extend_from_slice(buf.bytes());
                }
            }
            if !self.cursor.comma() {
                break;
            }
        }
        out
    }

    fn handle_pseudo(&mut self, op: PseudoOp, label: Option<&str>) -> std::result::Result<(), String> {
        use PseudoOp::*;
        match op {
            DefByte => {
                let bytes = self.parse_byte_list();
                self.emit_and_advance(bytes, true)
            }
            DefWord => {
                let bytes = self.parse_word_list();
                self.emit_and_advance(bytes, true)
            }
            DefWordRev => {
                let mut bytes = self.parse_word_list();
                bytes.reverse();
                self.emit_and_advance(bytes, true)
            }
            DefLong => {
                let bytes = self.parse_long_list();
                self.emit_and_advance(bytes, true)
            }
            Reserve { unit } => {
                self.cursor.skip_blanks();
                let (count, _) = self.eval_operand();
                let fill = if self.cursor.comma() { self.eval_operand().0 as u8 } else { 0 };
                let bytes = vec![fill; count.max(0) as usize * unit as usize];
                self.emit_and_advance(bytes, true)
            }
            Hex => {
                let mut bytes = Vec::new();
                for tok in self.cursor.rest().split_whitespace() {
                    if let Ok(b) = u8::from_str_radix(tok, 16) {
                        bytes.push(b);
                    }
                }
                self.cursor.set_pos(self.cursor.text().len());
                self.emit_and_advance(bytes, true)
            }
            Fcc => {
                self.cursor.skip_blanks();
                let bytes = self.read_quoted_bytes();
                self.emit_and_advance(bytes, true)
            }
            Zscii => {
                self.cursor.skip_blanks();
                let text = if matches!(self.cursor.peek_char(), Some('\'') | Some('"')) {
                    String::from_utf8_lossy(&self.read_quoted_bytes()).into_owned()
                } else {
                    String::new()
                };
                let bytes = zscii::encode_bytes(&text);
                self.emit_and_advance(bytes, true)
            }
            Asciic => {
                self.cursor.skip_blanks();
                let text = self.read_quoted_bytes();
                let mut bytes = vec![text.len().min(255) as u8];
                bytes.extend(text);
                self.emit_and_advance(bytes, true)
            }
            Asciz => {
                self.cursor.skip_blanks();
                let mut bytes = self.read_quoted_bytes();
                bytes.push(0);
                self.emit_and_advance(bytes, true)
            }
            Align => {
                let (n, _) = self.eval_operand();
                self.segments.current_mut().lc.align(n)
            }
            Even => self.segments.current_mut().lc.align(2),
            End => {
                self.cursor.skip_blanks();
                if !self.cursor.at_eol() {
                    let (v, _) = self.eval_operand();
                    self.transfer_addr = Some(v);
                }
                self.end_seen = true;
                Ok(())
            }
            Include => {
                self.cursor.skip_blanks();
                let path = String::from_utf8_lossy(&self.read_quoted_bytes()).into_owned();
                self.lines.as_mut().ok_or_else(|| "INCLUDE with no active source".to_string())?.push_include(&path).map_err(|e| e.to_string())
            }
            Incbin => {
                self.cursor.skip_blanks();
                let path = String::from_utf8_lossy(&self.read_quoted_bytes()).into_owned();
                let bytes = fs::read(&path).map_err(|e| format!("cannot read {}: {}", path, e))?;
                self.emit_and_advance(bytes, true)
            }
            Processor => {
                if let Token::Ident(name) = self.cursor.get_word(LexOptions::default()) {
                    self.set_default_cpu(&name).map_err(|e| e.to_string())
                } else {
                    Err("PROCESSOR requires a CPU name".to_string())
                }
            }
            Equ => self.handle_def(label.map(str::to_string), true, false),
            Set => self.handle_def(label.map(str::to_string), false, true),
            Org => {
                let (v, _) = self.eval_operand();
                self.segments.current_mut().lc.org(v);
                Ok(())
            }
            Rorg => {
                let (v, _) = self.eval_operand();
                self.segments.current_mut().lc.rorg(v);
                Ok(())
            }
            Rend => {
                self.segments.current_mut().lc.rend();
                Ok(())
            }
            List | Opt => {
                loop {
                    self.cursor.skip_blanks();
                    if self.cursor.at_eol() {
                        break;
                    }
                    match self.cursor.get_word(LexOptions::default()) {
                        Token::Ident(word) => self.apply_list_suboption(&word),
                        _ => break,
                    }
                    self.cursor.skip_blanks();
                    if !self.cursor.comma() {
                        break;
                    }
                }
                Ok(())
            }
            Error => Err(self.cursor.rest().trim().to_string()),
            Assert => {
                let (v, _) = self.eval_operand();
                if v == 0 {
                    Err("assertion failed".to_string())
                } else {
                    Ok(())
                }
            }
            Macro => {
                let name = label.map(str::to_string).unwrap_or_else(|| {
                    if let Token::Ident(n) = self.cursor.get_word(LexOptions::default()) {
                        n
                    } else {
                        String::new()
                    }
                });
                let mut params: Vec<String> = split_args(self.cursor.rest()).into_iter().map(|p| p.to_ascii_uppercase()).collect();
                let too_many = params.len() > MAX_PARAMS;
                params.truncate(MAX_PARAMS);
                self.capturing = Some((name, params, BodyCapture::new(), too_many));
                if too_many {
                    Err("Too many macro parameters".to_string())
                } else {
                    Ok(())
                }
            }
            Endm => Err("ENDM outside of a macro definition".to_string()),
            Seg => {
                if let Token::Ident(name) = self.cursor.get_word(LexOptions::default()) {
                    self.segments.switch(&name, SegmentKind::Normal);
                }
                Ok(())
            }
            SegU => {
                if let Token::Ident(name) = self.cursor.get_word(LexOptions::default()) {
                    self.segments.switch(&name, SegmentKind::Uninitialized);
                }
                Ok(())
            }
            Subr => {
                if let Some(label) = label {
                    self.symbols.set_subr_labl(label.to_string());
                }
                Ok(())
            }
            If => {
                let cond = self.eval_known_nonzero();
                self.cond.push_if(cond)
            }
            Elsif => {
                let cond = self.eval_known_nonzero();
                self.cond.elsif(cond)
            }
            Else => self.cond.else_(),
            Endif => self.cond.endif(),
            Wordsize => {
                let (n, _) = self.eval_operand();
                if n == 0 {
                    self.word_size_override = None;
                    Ok(())
                } else if n < 0 || n > 64 {
                    Err(format!("invalid word size {}", n))
                } else {
                    self.word_size_override = Some(n as u32);
                    Ok(())
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::{CpuBackend, CpuOptions, CpuVariant, OpcodeEntry};
    use crate::emit::Endian;

    struct NullCpu {
        variants: Vec<CpuVariant>,
    }

    impl CpuBackend for NullCpu {
        fn name(&self) -> &'static str {
            "NULL"
        }
        fn variants(&self) -> &'static [CpuVariant] {
            // Leaked deliberately: test-only fixture kept for the process
            // lifetime, matching how `'static` opcode tables are defined
            // by real back ends as `const` arrays.
            Box::leak(self.variants.clone().into_boxed_slice())
        }
        fn do_opcode(&self, ctx: &mut OpcodeContext, _variant_index: usize, op_type: i32, _parm: i32) -> bool {
            match op_type {
                1 => {
                    ctx.buffer.clear();
                    ctx.buffer.add_b(0x00);
                    true
                }
                _ => false,
            }
        }
    }

    fn fresh_assembler() -> Assembler {
        let mut registry = CpuRegistry::new();
        let opcodes: &'static [OpcodeEntry] = Box::leak(vec![OpcodeEntry { name: "NOP", op_type: 1, parm: 0 }].into_boxed_slice());
        let variant = CpuVariant {
            name: "NULL",
            index: 0,
            endian: Endian::Little,
            addr_width: 16,
            list_width: 16,
            word_size: 8,
            options: CpuOptions::default(),
            opcodes,
        };
        registry.register(Box::new(NullCpu { variants: vec![variant] }));
        let mut asm = Assembler::new(registry);
        asm.set_default_cpu("NULL").unwrap();
        asm
    }

    #[test]
    fn equ_then_set_scenario() {
        let mut asm = fresh_assembler();
        asm.pass = 1;
        asm.process_line("X EQU 1").unwrap();
        let err = asm.process_line("X EQU 2");
        assert!(err.is_err());
        asm.process_line("Y SET 1").unwrap();
        asm.process_line("Y SET 2").unwrap();
        assert_eq!(asm.symbols.get("Y").unwrap().value, 2);
    }

    #[test]
    fn conditional_elsif_emits_one_byte() {
        let mut asm = fresh_assembler();
        asm.pass = 2;
        asm.process_line("N SET 2").unwrap();
        asm.process_line(" IF N == 1").unwrap();
        asm.process_line(" DB 1").unwrap();
        asm.process_line(" ELSIF N == 2").unwrap();
        asm.process_line(" DB 2").unwrap();
        asm.process_line(" ELSE").unwrap();
        asm.process_line(" DB 3").unwrap();
        asm.process_line(" ENDIF").unwrap();
        assert_eq!(asm.segments.current().lc.cod, 1);
    }

    #[test]
    fn label_defines_at_current_loc() {
        let mut asm = fresh_assembler();
        asm.segments.current_mut().lc.org(0x1000);
        asm.process_line("START NOP").unwrap();
        assert_eq!(asm.symbols.get("START").unwrap().value, 0x1000);
    }

    #[test]
    fn wordsize_scales_dollar_and_zero_restores_default() {
        let mut asm = fresh_assembler();
        asm.segments.current_mut().lc.org(0x1000);
        asm.process_line(" WORDSIZE 16").unwrap();
        assert_eq!(asm.word_div(), 2);
        asm.process_line(" WORDSIZE 0").unwrap();
        assert_eq!(asm.word_div(), 1);
    }

    #[test]
    fn wordsize_65_is_an_error() {
        let mut asm = fresh_assembler();
        assert!(asm.process_line(" WORDSIZE 65").is_err());
    }

    #[test]
    fn fcc_skips_the_space_before_its_opening_quote() {
        let mut asm = fresh_assembler();
        asm.pass = 2;
        asm.process_line(" FCC \"AB\"").unwrap();
        assert_eq!(asm.segments.current().lc.cod, 2);
    }

    /// §8 scenario 6: a file whose last line is `INCLUDE "foo.inc"`, which
    /// itself contains `INCBIN "bar.dat"`, emits `foo.inc`'s own bytes then,
    /// at the `INCBIN` point, `bar.dat`'s bytes in order.
    #[test]
    fn incbin_and_include_ordering() {
        let dir = std::env::temp_dir().join(format!("asmx-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let main_path = dir.join("main.asm");
        let inc_path = dir.join("foo.inc");
        let bin_path = dir.join("bar.dat");

        std::fs::write(&bin_path, [0xAA, 0xBB]).unwrap();
        std::fs::write(&inc_path, format!("NOP\nINCBIN \"{}\"\n", bin_path.display())).unwrap();
        std::fs::write(&main_path, format!("INCLUDE \"{}\"\n", inc_path.display())).unwrap();

        let mut asm = fresh_assembler();
        let report = asm.run(main_path.to_str().unwrap()).unwrap();
        assert_eq!(report.error_count, 0);
        assert_eq!(asm.segments.current().lc.cod, 3);

        std::fs::remove_dir_all(&dir).ok();
    }
}
