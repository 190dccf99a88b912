//! Listing writer: address + hex + source text, with continuation lines
//! for instructions wider than one listing row, gated by the `LIST`/`OPT`
//! suboptions recovered in SPEC_FULL §C.6.

use std::io::{self, Write};

use crate::error::Diagnostic;

#[derive(Debug, Clone, Copy)]
pub struct ListingOptions {
    pub list_on: bool,
    /// `MACRO`/`NOMACRO`: include macro-expanded lines in the listing.
    pub list_macro_expansions: bool,
    /// `EXPAND`/`NOEXPAND`: wrap data-directive bytes onto continuation
    /// lines instead of eliding everything past the first row.
    pub expand_hex: bool,
    /// `SYM`/`NOSYM`: emit the end-of-run symbol table dump.
    pub show_symtab: bool,
    /// `TEMP`/`NOTEMP`: include temporary labels in that dump.
    pub show_temp_labels: bool,
    /// `-1`/`cl_ListP1`: include pass-1 diagnostics in the listing.
    pub list_pass1: bool,
}

impl Default for ListingOptions {
    fn default() -> Self {
        ListingOptions {
            list_on: true,
            list_macro_expansions: false,
            expand_hex: true,
            show_symtab: true,
            show_temp_labels: true,
            list_pass1: false,
        }
    }
}

pub struct ListingWriter<W: Write> {
    out: W,
    pub options: ListingOptions,
    bytes_per_line: usize,
}

impl<W: Write> ListingWriter<W> {
    pub fn new(out: W, options: ListingOptions) -> Self {
        ListingWriter { out, options, bytes_per_line: 6 }
    }

    pub fn write_line(&mut self, addr: u32, bytes: &[u8], source: &str, pass: u8, macro_depth: usize) -> io::Result<()> {
        if !self.options.list_on {
            return Ok(());
        }
        if pass == 1 && !self.options.list_pass1 {
            return Ok(());
        }
        if macro_depth > 0 && !self.options.list_macro_expansions {
            return Ok(());
        }

        if bytes.is_empty() {
            return writeln!(self.out, "{:24}{}", "", source);
        }

        let mut offset = 0;
        let mut first = true;
        loop {
            let end = (offset + self.bytes_per_line).min(bytes.len());
            let chunk = &bytes[offset..end];
            let hex = chunk.iter().map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(" ");
            if first {
                writeln!(self.out, "{:04X}  {:<24}{}", addr + offset as u32, hex, source)?;
            } else {
                if !self.options.expand_hex {
                    break;
                }
                writeln!(self.out, "{:04X}  {:<24}", addr + offset as u32, hex)?;
            }
            offset = end;
            first = false;
            if offset >= bytes.len() {
                break;
            }
        }
        Ok(())
    }

    pub fn write_diagnostic(&mut self, diag: &Diagnostic) -> io::Result<()> {
        if diag.pass == 1 && !self.options.list_pass1 {
            return Ok(());
        }
        writeln!(self.out, "{}", diag)
    }

    pub fn write_symbol_dump(&mut self, dump: &str) -> io::Result<()> {
        if !self.options.show_symtab {
            return Ok(());
        }
        self.out.write_all(dump.as_bytes())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::Severity;
    use crate::source::SourcePos;
    use std::rc::Rc;

    #[test]
    fn single_row_instruction() {
        let mut w = ListingWriter::new(Vec::new(), ListingOptions::default());
        w.write_line(0x1000, &[0xA9, 0x42], "START LDA #$42", 2, 0).unwrap();
        let out = String::from_utf8(w.out).unwrap();
        assert!(out.starts_with("1000  A9 42"));
        assert!(out.contains("START LDA #$42"));
    }

    #[test]
    fn wraps_long_data_directive_onto_continuation_lines() {
        let mut w = ListingWriter::new(Vec::new(), ListingOptions::default());
        let bytes = [0u8; 9];
        w.write_line(0x2000, &bytes, "DB 0,0,0,0,0,0,0,0,0", 2, 0).unwrap();
        let out = String::from_utf8(w.out).unwrap();
        assert_eq!(out.lines().count(), 2);
    }

    #[test]
    fn noexpand_suppresses_continuation_lines() {
        let mut opts = ListingOptions::default();
        opts.expand_hex = false;
        let mut w = ListingWriter::new(Vec::new(), opts);
        let bytes = [0u8; 9];
        w.write_line(0x2000, &bytes, "DB ...", 2, 0).unwrap();
        let out = String::from_utf8(w.out).unwrap();
        assert_eq!(out.lines().count(), 1);
    }

    #[test]
    fn macro_expansion_hidden_unless_nomacro_listing_enabled() {
        let mut w = ListingWriter::new(Vec::new(), ListingOptions::default());
        w.write_line(0x3000, &[0x00], "NOP", 2, 1).unwrap();
        assert!(w.out.is_empty());
    }

    #[test]
    fn pass1_diagnostic_suppressed_unless_list_p1() {
        let mut w = ListingWriter::new(Vec::new(), ListingOptions::default());
        let diag = Diagnostic { severity: Severity::Error, message: "boom".into(), pos: SourcePos { file: Rc::from("a.asm"), line: 1 }, pass: 1 };
        w.write_diagnostic(&diag).unwrap();
        assert!(w.out.is_empty());
    }
}
