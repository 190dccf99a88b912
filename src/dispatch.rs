//! Opcode dispatcher lookup rules (§4.8): CPU table, with trailing-`*`
//! wildcard suffix matching, ahead of the pseudo-op table and the macro
//! table. The actual call-outs to the back end / pseudo-op handlers /
//! macro invocation live in `pass.rs`, which has the mutable state they
//! need; this module is the pure name-matching logic.

use crate::backend::OpcodeEntry;

/// Matches `token` against one opcode-table entry name. A trailing `*` in
/// the entry matches any suffix, so `DC*` matches `DC`, `DC.B`, `DC.W`...
/// Returns how many bytes of `token` the entry name itself accounted for;
/// the rest is pushed back onto the lexer cursor by the caller.
pub fn match_entry(entry_name: &str, token: &str) -> Option<usize> {
    if let Some(prefix) = entry_name.strip_suffix('*') {
        if token.len() >= prefix.len() && token[..prefix.len()].eq_ignore_ascii_case(prefix) {
            Some(prefix.len())
        } else {
            None
        }
    } else if entry_name.eq_ignore_ascii_case(token) {
        Some(token.len())
    } else {
        None
    }
}

/// Searches a CPU's opcode table for the first entry matching `token`. The
/// original takes the first match in table order rather than the longest;
/// back ends are expected to list more specific entries before wildcards.
pub fn find_opcode<'a>(opcodes: &'a [OpcodeEntry], token: &str) -> Option<(&'a OpcodeEntry, usize)> {
    opcodes.iter().find_map(|e| match_entry(e.name, token).map(|consumed| (e, consumed)))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backend::OpcodeEntry;

    #[test]
    fn exact_match() {
        assert_eq!(match_entry("LDA", "LDA"), Some(3));
        assert_eq!(match_entry("LDA", "LDX"), None);
    }

    #[test]
    fn wildcard_suffix_match() {
        assert_eq!(match_entry("DC*", "DC.B"), Some(2));
        assert_eq!(match_entry("DC*", "DCPU"), Some(2));
        assert_eq!(match_entry("DC*", "DA"), None);
    }

    #[test]
    fn first_match_wins() {
        let table = [
            OpcodeEntry { name: "DC*", op_type: 1, parm: 0 },
            OpcodeEntry { name: "DC.B", op_type: 2, parm: 0 },
        ];
        let (entry, consumed) = find_opcode(&table, "DC.B").unwrap();
        assert_eq!(entry.op_type, 1);
        assert_eq!(consumed, 2);
    }
}
