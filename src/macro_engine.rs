//! Macro engine (§4.4): verbatim body capture, invocation frames, and the
//! three-stage parameter substitution run on every expanded body line.

use std::collections::HashMap;

use crate::lexer::{LexOptions, LineCursor, Token};

pub const MAX_MACRO_NESTING: usize = 10;
pub const MAX_PARAMS: usize = 30;

#[derive(Debug, Clone)]
pub struct Macro {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<String>,
    /// Set only once pass 2 reprocesses this macro's `MACRO` line. Checked
    /// only in pass 2: a forward reference to a macro not yet reached by
    /// pass 2 is an error, while pass 1 may call a macro from the point of
    /// its (pass 1) capture onward.
    pub defined: bool,
    /// True if the `MACRO` operand list named more than `MAX_PARAMS`
    /// parameters.
    pub too_many_params: bool,
}

/// Accumulates a macro body while the pass driver feeds it lines one at a
/// time, tracking nested `IF`/`ENDIF` so an `ENDM` inside a conditional
/// doesn't end the capture early.
#[derive(Debug, Default)]
pub struct BodyCapture {
    depth: i32,
    body: Vec<String>,
}

impl BodyCapture {
    pub fn new() -> Self {
        BodyCapture::default()
    }

    /// Feeds one raw source line. Returns `true` once the matching `ENDM`
    /// has been consumed (not included in the body); the line is otherwise
    /// appended verbatim.
    pub fn feed(&mut self, line: &str) -> bool {
        let mut cursor = LineCursor::new();
        cursor.set_line(line);
        if let Token::Ident(word) = cursor.get_word_opcode(LexOptions::default()) {
            match word.as_str() {
                "IF" => {
                    self.depth += 1;
                }
                "ENDIF" if self.depth > 0 => {
                    self.depth -= 1;
                }
                "ENDM" if self.depth == 0 => {
                    return true;
                }
                _ => {}
            }
        }
        self.body.push(line.to_string());
        false
    }

    pub fn into_body(self) -> Vec<String> {
        self.body
    }
}

#[derive(Debug, Clone)]
pub struct MacroFrame {
    pub macro_name: String,
    pub args: Vec<String>,
    pub param_names: Vec<String>,
    pub invocation_id: u32,
    pub next_line: usize,
    pub body_len: usize,
}

#[derive(Debug, Default)]
pub struct MacroTable {
    macros: HashMap<String, Macro>,
    next_id: u32,
    frames: Vec<MacroFrame>,
}

impl MacroTable {
    pub fn new() -> Self {
        MacroTable::default()
    }

    /// Records a macro's params/body, captured this line. `too_many_params`
    /// and `pass` flow straight onto the stored record: the *defined* flag
    /// flips true only when `pass == 2`, matching the original's "a macro
    /// is fully defined only once pass 2 has re-seen its `MACRO` line".
    pub fn define(&mut self, name: &str, params: Vec<String>, body: Vec<String>, too_many_params: bool, pass: u8) {
        let entry = self.macros.entry(name.to_string()).or_insert_with(|| Macro {
            name: name.to_string(),
            params: Vec::new(),
            body: Vec::new(),
            defined: false,
            too_many_params: false,
        });
        entry.params = params;
        entry.body = body;
        entry.too_many_params = too_many_params;
        if pass == 2 {
            entry.defined = true;
        }
    }

    pub fn get(&self, name: &str) -> Option<&Macro> {
        self.macros.get(name)
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Pushes an invocation frame, assigning the next unique 5-digit ID.
    /// `pass` gates the *defined* check: pass 1 may invoke a macro as soon
    /// as it's in the table, but pass 2 rejects a call that reaches this
    /// name before pass 2's own re-capture of it completes.
    pub fn invoke(&mut self, name: &str, args: Vec<String>, pass: u8) -> Result<(), String> {
        if self.frames.len() >= MAX_MACRO_NESTING {
            return Err("macros nested too deeply".to_string());
        }
        let m = self.macros.get(name).ok_or_else(|| "Macro has not been defined yet".to_string())?;
        if pass == 2 && !m.defined {
            return Err("Macro has not been defined yet".to_string());
        }
        let id = self.next_id;
        self.next_id = (self.next_id + 1) % 100_000;
        self.frames.push(MacroFrame {
            macro_name: name.to_string(),
            args,
            param_names: m.params.clone(),
            invocation_id: id,
            next_line: 0,
            body_len: m.body.len(),
        });
        Ok(())
    }

    pub fn current_frame(&self) -> Option<&MacroFrame> {
        self.frames.last()
    }

    /// Pops the current invocation's next body line, expanded, or `None`
    /// when the body is exhausted (caller should then pop the frame).
    pub fn next_expanded_line(&mut self) -> Option<String> {
        let name = self.frames.last()?.macro_name.clone();
        let idx = self.frames.last()?.next_line;
        let raw = self.macros.get(&name)?.body.get(idx)?.clone();
        let frame = self.frames.last_mut()?;
        frame.next_line += 1;
        let expanded = expand_body_line(&raw, &frame.args, frame.invocation_id, &frame.param_names);
        Some(expanded)
    }

    pub fn frame_exhausted(&self) -> bool {
        match self.frames.last() {
            Some(f) => f.next_line >= f.body_len,
            None => true,
        }
    }

    pub fn pop_frame(&mut self) -> Option<MacroFrame> {
        self.frames.pop()
    }
}

/// Quote-respecting comma/semicolon splitter for a macro invocation's
/// operand list: single and double quotes suppress splitting until their
/// match is found. Does not cap the result at `MAX_PARAMS`; callers that
/// need the original's silent-truncation behavior (binding invocation
/// arguments) truncate themselves, while callers that need to flag an
/// over-long list (a `MACRO` parameter-name list) can check the untruncated
/// length first.
pub fn split_args(s: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut cur = String::new();
    let mut quote: Option<char> = None;
    let mut chars = s.chars().peekable();
    let mut saw_any = false;

    while let Some(c) = chars.next() {
        match quote {
            Some(q) => {
                cur.push(c);
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    cur.push(c);
                }
                ',' => {
                    saw_any = true;
                    args.push(cur.trim().to_string());
                    cur = String::new();
                }
                ';' => break,
                _ => cur.push(c),
            },
        }
    }
    if saw_any || !cur.trim().is_empty() {
        args.push(cur.trim().to_string());
    }
    args
}

/// Runs the four substitutions, in order, over one macro body line:
/// `\n` parameter text, `\0` parameter count, `\?` invocation ID, `##`
/// token paste, then bare-identifier parameter names.
pub fn expand_body_line(line: &str, args: &[String], invocation_id: u32, param_names: &[String]) -> String {
    let mut out = String::new();
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some(d) if d.is_ascii_digit() && d != '0' => {
                chars.next();
                let n = d.to_digit(10).unwrap() as usize;
                if let Some(a) = args.get(n - 1) {
                    out.push_str(a);
                }
            }
            Some('0') => {
                chars.next();
                out.push_str(&args.len().to_string());
            }
            Some('?') => {
                chars.next();
                out.push_str(&format!("{:05}", invocation_id));
            }
            _ => out.push(c),
        }
    }
    let out = paste_tokens(&out);
    substitute_params(&out, args, param_names)
}

fn paste_tokens(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '#' && i + 1 < chars.len() && chars[i + 1] == '#' {
            while out.ends_with(' ') {
                out.pop();
            }
            i += 2;
            while i < chars.len() && chars[i] == ' ' {
                i += 1;
            }
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

fn substitute_params(s: &str, args: &[String], param_names: &[String]) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            if let Some(pos) = param_names.iter().position(|p| p.eq_ignore_ascii_case(&word)) {
                out.push_str(args.get(pos).map(String::as_str).unwrap_or(""));
            } else {
                out.push_str(&word);
            }
        } else {
            out.push(c);
            i += 1;
        }
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn split_args_respects_quotes() {
        let args = split_args(r#" "a,b", c "#);
        assert_eq!(args, vec![r#""a,b""#.to_string(), "c".to_string()]);
    }

    #[test]
    fn body_capture_stops_at_endm_outside_if() {
        let mut cap = BodyCapture::new();
        assert!(!cap.feed("LD A, 1"));
        assert!(!cap.feed("IF 1"));
        assert!(!cap.feed("ENDM")); // inside IF, doesn't end capture
        assert!(!cap.feed("ENDIF"));
        assert!(cap.feed("ENDM"));
        assert_eq!(cap.into_body(), vec!["LD A, 1".to_string(), "IF 1".to_string(), "ENDM".to_string(), "ENDIF".to_string()]);
    }

    #[test]
    fn param_and_count_and_id_substitution() {
        let args = vec!["A".to_string(), "1".to_string()];
        let out = expand_body_line(r"LD \1, #\2 ; \0 args, id \?", &args, 7, &["R".into(), "V".into()]);
        assert_eq!(out, "LD A, #1 ; 2 args, id 00007");
    }

    #[test]
    fn bare_param_name_substitution() {
        let args = vec!["A".to_string(), "1".to_string()];
        let out = expand_body_line("LD R, #V", &args, 0, &["R".into(), "V".into()]);
        assert_eq!(out, "LD A, #1");
    }

    #[test]
    fn token_paste_removes_surrounding_spaces() {
        assert_eq!(paste_tokens("DONE ## \\?"), "DONE\\?");
    }

    #[test]
    fn distinct_invocation_ids_avoid_duplicate_labels() {
        let mut t = MacroTable::new();
        t.define("MV", vec!["R".into(), "V".into()], vec!["LD R, #V".to_string(), "JR DONE\\?".to_string(), "DONE\\?:".to_string()], false, 1);
        t.invoke("MV", vec!["A".into(), "1".into()], 1).unwrap();
        let id1 = t.current_frame().unwrap().invocation_id;
        while !t.frame_exhausted() {
            t.next_expanded_line();
        }
        t.pop_frame();
        t.invoke("MV", vec!["B".into(), "2".into()], 1).unwrap();
        let id2 = t.current_frame().unwrap().invocation_id;
        assert_ne!(id1, id2);
    }

    #[test]
    fn nesting_limit_enforced() {
        let mut t = MacroTable::new();
        t.define("M", vec![], vec!["NOP".to_string()], false, 1);
        for _ in 0..MAX_MACRO_NESTING {
            t.invoke("M", vec![], 1).unwrap();
        }
        let err = t.invoke("M", vec![], 1).unwrap_err();
        assert!(err.contains("nested too deeply"));
    }

    #[test]
    fn forward_reference_only_errors_in_pass_2() {
        let mut t = MacroTable::new();
        // Pass 1 may call a macro as soon as it's in the table.
        t.define("M", vec![], vec!["NOP".to_string()], false, 1);
        t.invoke("M", vec![], 1).unwrap();
        t.pop_frame();
        // Pass 2 hasn't re-seen M's MACRO line yet: the name exists from
        // pass 1, but `defined` only flips true once pass 2 redefines it.
        let err = t.invoke("M", vec![], 2).unwrap_err();
        assert!(err.contains("not been defined yet"));
        t.define("M", vec![], vec!["NOP".to_string()], false, 2);
        t.invoke("M", vec![], 2).unwrap();
    }

    #[test]
    fn too_many_params_recorded_on_the_macro() {
        let mut t = MacroTable::new();
        let params: Vec<String> = (0..MAX_PARAMS + 1).map(|i| format!("P{}", i)).collect();
        t.define("M", params, vec!["NOP".to_string()], true, 1);
        assert!(t.get("M").unwrap().too_many_params);
    }
}
