//! Symbol table (§4.3) plus the `U/M/S/E` dump format recovered from the
//! original's `SYM_Dump`/`SYM_DumpTab` (SPEC_FULL §C.5).

use std::collections::BTreeMap;

/// One symbol table entry. `known` tracks whether the value was resolvable
/// without any forward reference the last time it was touched; callers use
/// it to choose short vs. long encodings.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub value: i32,
    pub defined: bool,
    pub known: bool,
    pub multiply_defined: bool,
    pub is_set: bool,
    pub is_equ: bool,
}

impl Symbol {
    fn undefined() -> Self {
        Symbol { value: 0, defined: false, known: false, multiply_defined: false, is_set: false, is_equ: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefOutcome {
    Ok,
    /// Redefinition conflict outside of `SET`/`:=` semantics.
    MultiplyDefined,
    /// Same conflict, but the symbol was still unresolved at the end of
    /// pass 1 — the original reports this as `Phase error` rather than
    /// `multiply defined` since it reflects an unstable forward reference
    /// rather than two genuinely different definitions.
    PhaseError,
}

/// `BTreeMap` gives us the alphabetic sort the listing dump wants for free,
/// matching `SYM_SortTab`'s effect without a separate sort pass.
#[derive(Debug, Default)]
pub struct SymbolTable {
    table: BTreeMap<String, Symbol>,
    pub last_labl: Option<String>,
    pub subr_labl: Option<String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    pub fn get(&self, name: &str) -> Option<&Symbol> {
        self.table.get(name)
    }

    /// `SYM_Ref`: returns the symbol's value and whether it is known. A
    /// name seen for the first time creates an undefined entry so later
    /// `Def` calls and the end-of-pass undefined check have something to
    /// find.
    pub fn reference(&mut self, name: &str) -> (i32, bool) {
        let sym = self.table.entry(name.to_string()).or_insert_with(Symbol::undefined);
        (sym.value, sym.defined && sym.known)
    }

    /// `SYM_Def`. `known` reflects whether `value` itself was computed from
    /// a fully-resolved expression (propagated from the evaluator's
    /// `evalKnown`).
    pub fn define(&mut self, name: &str, value: i32, is_set: bool, is_equ: bool, known: bool, pass: u8) -> DefOutcome {
        let sym = self.table.entry(name.to_string()).or_insert_with(Symbol::undefined);

        if !sym.defined {
            sym.value = value;
            sym.defined = true;
            sym.known = known;
            sym.is_set = is_set;
            sym.is_equ = is_equ;
            return DefOutcome::Ok;
        }

        if sym.is_set && is_set {
            sym.value = value;
            sym.known = known;
            return DefOutcome::Ok;
        }

        if sym.value == value {
            // Same line re-executed in the second pass (or a harmless
            // literal duplicate): not a conflict.
            sym.known = known;
            return DefOutcome::Ok;
        }

        let was_known = sym.known;
        sym.multiply_defined = true;
        // The original's SYM_Def sets `known` on pass 2 unconditionally,
        // even down this conflict path, so a symbol stays known for the
        // rest of the pass regardless of how this particular Def came out.
        if pass == 2 {
            sym.known = true;
        }
        if pass == 2 && !was_known {
            DefOutcome::PhaseError
        } else {
            DefOutcome::MultiplyDefined
        }
    }

    /// Composes the full name for a temporary label. `.foo` scopes to the
    /// current subroutine label when one is active, else the last ordinary
    /// label; `@foo` always scopes to the last ordinary label.
    pub fn compose_temp_name(&self, tail: &str, at_form: bool) -> Option<String> {
        if at_form {
            self.last_labl.as_deref().map(|l| format!("{}@{}", l, tail))
        } else {
            let scope = self.subr_labl.as_deref().or(self.last_labl.as_deref())?;
            Some(format!("{}.{}", scope, tail))
        }
    }

    pub fn set_last_labl(&mut self, name: impl Into<String>) {
        self.last_labl = Some(name.into());
    }

    pub fn set_subr_labl(&mut self, name: impl Into<String>) {
        self.subr_labl = Some(name.into());
    }

    /// Renders the end-of-assembly symbol dump: one line per symbol,
    /// `NAME  VALUE  FLAGS`, temporary labels omitted unless `include_temp`.
    pub fn dump(&self, include_temp: bool) -> String {
        let mut out = String::new();
        for (name, sym) in &self.table {
            let is_temp = name.contains('.') || name.contains('@');
            if is_temp && !include_temp {
                continue;
            }
            let mut flags = String::new();
            if !sym.defined {
                flags.push('U');
            }
            if sym.multiply_defined {
                flags.push('M');
            }
            if sym.is_set {
                flags.push('S');
            }
            if sym.is_equ {
                flags.push('E');
            }
            out.push_str(&format!("{:<24}{:08X}  {}\n", name, sym.value as u32, flags));
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn reference_creates_undefined_entry() {
        let mut t = SymbolTable::new();
        let (v, known) = t.reference("FOO");
        assert_eq!(v, 0);
        assert!(!known);
        assert!(t.get("FOO").is_some());
    }

    #[test]
    fn equ_redefinition_with_different_value_is_multiply_defined() {
        let mut t = SymbolTable::new();
        assert_eq!(t.define("X", 1, false, true, true, 1), DefOutcome::Ok);
        assert_eq!(t.define("X", 2, false, true, true, 1), DefOutcome::MultiplyDefined);
    }

    #[test]
    fn set_redefinition_is_allowed() {
        let mut t = SymbolTable::new();
        assert_eq!(t.define("Y", 1, true, false, true, 1), DefOutcome::Ok);
        assert_eq!(t.define("Y", 2, true, false, true, 1), DefOutcome::Ok);
        assert_eq!(t.get("Y").unwrap().value, 2);
    }

    #[test]
    fn same_value_redefinition_across_passes_is_not_a_conflict() {
        let mut t = SymbolTable::new();
        assert_eq!(t.define("X", 1, false, true, true, 1), DefOutcome::Ok);
        assert_eq!(t.define("X", 1, false, true, true, 2), DefOutcome::Ok);
    }

    #[test]
    fn temp_label_scoping() {
        let mut t = SymbolTable::new();
        t.set_last_labl("START");
        assert_eq!(t.compose_temp_name("LOOP", false).unwrap(), "START.LOOP");
        assert_eq!(t.compose_temp_name("LOOP", true).unwrap(), "START@LOOP");
        t.set_subr_labl("SUB1");
        assert_eq!(t.compose_temp_name("LOOP", false).unwrap(), "SUB1.LOOP");
    }
}
