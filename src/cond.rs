//! Conditional assembly stack (§4.5): `IF`/`ELSIF`/`ELSE`/`ENDIF`.

pub const MAX_COND_DEPTH: usize = 256;

#[derive(Debug, Clone, Copy)]
struct CondFrame {
    /// Whether the enclosing context was active when this `IF` was
    /// pushed, fixed for the frame's whole lifetime. A nested `IF` whose
    /// own condition later turns true must still stay inactive if this is
    /// false — `elsif`/`else` only ever adjust `local_active`.
    parent_active: bool,
    /// Whether the *currently selected* branch at this level is the one
    /// whose body should run.
    local_active: bool,
    /// Some branch at this level has already been selected; later
    /// `ELSIF`/`ELSE` can never become true.
    satisfied: bool,
    else_seen: bool,
}

#[derive(Debug)]
pub struct CondStack {
    frames: Vec<CondFrame>,
}

impl Default for CondStack {
    fn default() -> Self {
        CondStack::new()
    }
}

impl CondStack {
    pub fn new() -> Self {
        CondStack { frames: vec![CondFrame { parent_active: true, local_active: true, satisfied: true, else_seen: false }] }
    }

    /// The current assembly state: skip everything but `IF`/`ELSE`/
    /// `ELSIF`/`ENDIF` tracking when this is `false`.
    pub fn active(&self) -> bool {
        self.frames.last().map(|f| f.parent_active && f.local_active).unwrap_or(true)
    }

    pub fn depth(&self) -> usize {
        self.frames.len() - 1
    }

    pub fn at_top_level(&self) -> bool {
        self.frames.len() == 1
    }

    pub fn push_if(&mut self, cond: bool) -> Result<(), String> {
        if self.frames.len() - 1 >= MAX_COND_DEPTH {
            return Err("IF nested too deeply".to_string());
        }
        let parent_active = self.active();
        self.frames.push(CondFrame { parent_active, local_active: cond, satisfied: cond, else_seen: false });
        Ok(())
    }

    pub fn elsif(&mut self, cond: bool) -> Result<(), String> {
        let frame = self.frames.last_mut().ok_or_else(|| "ELSIF without IF".to_string())?;
        if frame.else_seen {
            return Err("ELSIF after ELSE".to_string());
        }
        if frame.satisfied {
            frame.local_active = false;
        } else {
            frame.local_active = cond;
            frame.satisfied = cond;
        }
        Ok(())
    }

    pub fn else_(&mut self) -> Result<(), String> {
        let frame = self.frames.last_mut().ok_or_else(|| "ELSE without IF".to_string())?;
        if frame.else_seen {
            return Err("duplicate ELSE".to_string());
        }
        frame.else_seen = true;
        frame.local_active = !frame.satisfied;
        frame.satisfied = true;
        Ok(())
    }

    pub fn endif(&mut self) -> Result<(), String> {
        if self.frames.len() <= 1 {
            return Err("ENDIF without IF".to_string());
        }
        self.frames.pop();
        Ok(())
    }

    /// `IF block without ENDIF` check at EOF.
    pub fn at_initial_state(&self) -> bool {
        self.at_top_level()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nested_scoping() {
        let mut c = CondStack::new();
        c.push_if(false).unwrap();
        assert!(!c.active());
        c.push_if(true).unwrap(); // nested inside a false parent stays false
        assert!(!c.active());
        c.endif().unwrap();
        c.endif().unwrap();
        assert!(c.active());
    }

    #[test]
    fn elsif_chain_picks_first_true_branch() {
        let mut c = CondStack::new();
        c.push_if(false).unwrap();
        assert!(!c.active());
        c.elsif(true).unwrap();
        assert!(c.active());
        c.elsif(true).unwrap(); // already satisfied, stays false
        assert!(!c.active());
        c.else_().unwrap();
        assert!(!c.active());
        c.endif().unwrap();
    }

    #[test]
    fn double_else_is_an_error() {
        let mut c = CondStack::new();
        c.push_if(false).unwrap();
        c.else_().unwrap();
        assert!(c.else_().is_err());
    }

    #[test]
    fn endif_without_if_is_an_error() {
        let mut c = CondStack::new();
        assert!(c.endif().is_err());
    }

    #[test]
    fn eof_check_detects_unclosed_if() {
        let mut c = CondStack::new();
        assert!(c.at_initial_state());
        c.push_if(true).unwrap();
        assert!(!c.at_initial_state());
    }

    #[test]
    fn nested_elsif_stays_inactive_when_outer_if_is_false() {
        let mut c = CondStack::new();
        c.push_if(false).unwrap(); // outer disabled
        c.push_if(false).unwrap(); // inner IF, condition false
        assert!(!c.active());
        c.elsif(true).unwrap(); // inner condition now true, but outer still disables it
        assert!(!c.active());
        c.endif().unwrap();
        c.endif().unwrap();
    }
}
