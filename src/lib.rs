//! Core engine for a multi-target retargetable cross-assembler.
//!
//! This crate implements the two-pass assembly model, expression
//! evaluator, macro engine, symbol table, and object/listing writers that
//! are common to every supported CPU. A CPU back end (see the `cpu-6502`
//! and `cpu-z80` crates) supplies its own opcode table and an impl of
//! [`CpuBackend`]; the `asmx` crate wires a [`CpuRegistry`] of those back
//! ends together with an [`Assembler`] and drives them from the command
//! line.
//!
//! ```ignore
//! let mut registry = CpuRegistry::new();
//! registry.register(Box::new(cpu_6502::Mos6502));
//! let mut asm = Assembler::new(registry);
//! asm.set_default_cpu("6502")?;
//! let report = asm.run("main.asm")?;
//! ```

mod backend;
mod cond;
mod dispatch;
mod emit;
mod error;
mod expr;
mod lexer;
mod listing;
mod macro_engine;
mod objwriter;
mod pass;
mod pseudo;
mod registry;
mod segment;
mod source;
mod symbol;
mod zscii;

pub use backend::{CpuBackend, CpuOptions, CpuVariant, OpcodeContext, OpcodeEntry, LABEL_OP_BASE};
pub use emit::{Endian, InstructionBuffer};
pub use error::{Diagnostic, Error, Result, Severity};
pub use expr::{check_byte, check_strict_byte, check_word, check_strict_word, eval_branch, eval_lbranch, eval_wbranch, EvalValue};
pub use listing::{ListingOptions, ListingWriter};
pub use objwriter::{ObjectWriter, SRecordWidth};
pub use pass::{AssembleReport, Assembler, AssemblerOptions};
pub use registry::{CpuHandle, CpuRegistry};
pub use segment::SegmentKind;
pub use source::SourcePos;
pub use symbol::{DefOutcome, Symbol};
