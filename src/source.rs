//! Source position tracking and the `INCLUDE` nesting stack (§3 "Source
//! position").

use std::fmt;
use std::rc::Rc;

use crate::error::{Error, Result};

pub const MAX_INCLUDE: usize = 10;

/// A file-name + line-number pair. Errors and warnings carry the innermost
/// position on the stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePos {
    pub file: Rc<str>,
    pub line: u32,
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Stack of source positions, one per nested `INCLUDE`, up to
/// [`MAX_INCLUDE`] deep.
#[derive(Debug, Default)]
pub struct SourceStack {
    frames: Vec<SourcePos>,
}

impl SourceStack {
    pub fn new() -> Self {
        SourceStack { frames: Vec::new() }
    }

    pub fn push(&mut self, file: Rc<str>) -> Result<()> {
        if self.frames.len() >= MAX_INCLUDE {
            return Err(Error::IncludeTooDeep { max: MAX_INCLUDE });
        }
        self.frames.push(SourcePos { file, line: 0 });
        Ok(())
    }

    pub fn pop(&mut self) -> Option<SourcePos> {
        self.frames.pop()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn bump_line(&mut self) {
        if let Some(top) = self.frames.last_mut() {
            top.line += 1;
        }
    }

    pub fn current(&self) -> SourcePos {
        self.frames
            .last()
            .cloned()
            .unwrap_or(SourcePos { file: Rc::from("<none>"), line: 0 })
    }

    /// Resets the innermost frame's line counter, for re-running a pass
    /// over the same already-open file.
    pub fn reset_line(&mut self) {
        if let Some(top) = self.frames.last_mut() {
            top.line = 0;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bump_line_advances_innermost_frame_only() {
        let mut s = SourceStack::new();
        s.push(Rc::from("outer.asm")).unwrap();
        s.bump_line();
        s.bump_line();
        s.push(Rc::from("inner.asm")).unwrap();
        s.bump_line();
        assert_eq!(s.current().line, 1);
        s.pop();
        assert_eq!(s.current().line, 2);
    }

    #[test]
    fn nesting_limit_enforced() {
        let mut s = SourceStack::new();
        for i in 0..MAX_INCLUDE {
            s.push(Rc::from(format!("f{}.asm", i).as_str())).unwrap();
        }
        assert!(s.push(Rc::from("one_too_many.asm")).is_err());
    }

    #[test]
    fn current_before_any_push_is_a_placeholder() {
        let s = SourceStack::new();
        assert_eq!(s.current().file.as_ref(), "<none>");
        assert_eq!(s.current().line, 0);
    }
}
