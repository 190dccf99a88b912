//! Global pseudo-op name table (§6.3). Maps the lexer's opcode-variant
//! token to a [`PseudoOp`]; the handling logic itself lives in `pass.rs`
//! since it needs the full assembler context (symbols, segments, the
//! object writer...). `=` and `:=` aren't identifiers and are matched
//! directly against the lexer's punctuation tokens by the caller instead
//! of through this table.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudoOp {
    DefByte,
    DefWord,
    DefWordRev,
    DefLong,
    Reserve { unit: u8 },
    Hex,
    Fcc,
    Zscii,
    Asciic,
    Asciz,
    Align,
    Even,
    End,
    Include,
    Incbin,
    Processor,
    Equ,
    Set,
    Org,
    Rorg,
    Rend,
    List,
    Opt,
    Error,
    Assert,
    Macro,
    Endm,
    Seg,
    SegU,
    Subr,
    If,
    Else,
    Elsif,
    Endif,
    Wordsize,
}

pub fn lookup(name: &str) -> Option<PseudoOp> {
    use PseudoOp::*;
    Some(match name {
        "DB" | "FCB" | "BYTE" | "DC.B" | "DFB" | "DEFB" | "DEFM" => DefByte,
        "DW" | "FDB" | "WORD" | "DC.W" | "DA" | "DEFW" => DefWord,
        "DRW" => DefWordRev,
        "DL" | "LONG" | "DC.L" => DefLong,
        "DS" | "RMB" | "BLKB" | "DEFS" => Reserve { unit: 1 },
        "DS.W" => Reserve { unit: 2 },
        "DS.L" => Reserve { unit: 4 },
        "HEX" => Hex,
        "FCC" => Fcc,
        "ZSCII" => Zscii,
        "ASCIIC" => Asciic,
        "ASCIZ" | "ASCIIZ" => Asciz,
        "ALIGN" => Align,
        "EVEN" => Even,
        "END" => End,
        "INCLUDE" => Include,
        "INCBIN" => Incbin,
        "PROCESSOR" | "CPU" => Processor,
        "EQU" => Equ,
        "SET" | "DEFL" => Set,
        "ORG" | "AORG" => Org,
        "RORG" => Rorg,
        "REND" => Rend,
        "LIST" => List,
        "OPT" => Opt,
        "ERROR" => Error,
        "ASSERT" => Assert,
        "MACRO" => Macro,
        "ENDM" => Endm,
        "SEG" | "RSEG" => Seg,
        "SEG.U" => SegU,
        "SUBR" | "SUBROUTINE" => Subr,
        "IF" => If,
        "ELSE" => Else,
        "ELSIF" => Elsif,
        "ENDIF" => Endif,
        "WORDSIZE" => Wordsize,
        _ => return None,
    })
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn byte_directive_aliases_all_map_together() {
        for name in ["DB", "FCB", "BYTE", "DC.B", "DFB", "DEFB", "DEFM"] {
            assert_eq!(lookup(name), Some(PseudoOp::DefByte));
        }
    }

    #[test]
    fn reserve_suffixes_carry_unit_size() {
        assert_eq!(lookup("DS"), Some(PseudoOp::Reserve { unit: 1 }));
        assert_eq!(lookup("DS.W"), Some(PseudoOp::Reserve { unit: 2 }));
        assert_eq!(lookup("DS.L"), Some(PseudoOp::Reserve { unit: 4 }));
    }

    #[test]
    fn unknown_name_is_not_a_pseudo_op() {
        assert_eq!(lookup("LDA"), None);
    }
}
