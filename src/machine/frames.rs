//! Frame and choice-point management
//!
//! There is a single kind of frame on the local stack, specialised at
//! runtime. A frame starts life as a target frame being filled with call
//! arguments, may be promoted to a choice point when the called predicate
//! has more than one clause, and becomes the source frame of the callee once
//! the clause enters. The header precedes the variable cells:
//!
//! ```text
//! base + 0  continuation (code address)
//! base + 1  parent source frame (0 = none)
//! base + 2  backtrack clause (pool index of the next alternative)
//! base + 3  saved global top       \
//! base + 4  saved trail top         | populated on promotion
//! base + 5  saved local top         |
//! base + 6  previous choice point  /
//! base + 7  V[0], V[1], ...
//! ```

use tracing::{debug, trace};

use super::word::Word;
use super::{Addr, Machine, MachineError, MachineResult};

pub(crate) const FRAME_CONT: usize = 0;
pub(crate) const FRAME_PARENT: usize = 1;
pub(crate) const FRAME_CLAUSE: usize = 2;
pub(crate) const FRAME_SAVED_GT: usize = 3;
pub(crate) const FRAME_SAVED_TT: usize = 4;
pub(crate) const FRAME_SAVED_LT: usize = 5;
pub(crate) const FRAME_PREV_CP: usize = 6;
pub(crate) const FRAME_HEADER: usize = 7;

impl Machine {
    fn frame_field(&self, frame: Addr, field: usize) -> MachineResult<usize> {
        Ok(self.store.read_word(frame + field)?.payload())
    }

    fn set_frame_field(&mut self, frame: Addr, field: usize, value: usize) -> MachineResult<()> {
        self.store.write_word(frame + field, Word::int(value))
    }

    pub(crate) fn frame_cont(&self, frame: Addr) -> MachineResult<Addr> {
        self.frame_field(frame, FRAME_CONT)
    }

    pub(crate) fn set_frame_cont(&mut self, frame: Addr, pc: Addr) -> MachineResult<()> {
        self.set_frame_field(frame, FRAME_CONT, pc)
    }

    /// The caller's source frame, or None for the query frame.
    pub(crate) fn frame_parent(&self, frame: Addr) -> MachineResult<Option<Addr>> {
        let parent = self.frame_field(frame, FRAME_PARENT)?;
        Ok(if parent == 0 { None } else { Some(parent) })
    }

    pub(crate) fn frame_saved_gt(&self, frame: Addr) -> MachineResult<Addr> {
        self.frame_field(frame, FRAME_SAVED_GT)
    }

    /// Allocate a target frame at the local top. Only the header is
    /// reserved; variable cells come into existence as they are addressed.
    pub fn push_target_frame(&mut self) -> MachineResult<Addr> {
        let base = self.store.local_top();
        self.store.touch(base + FRAME_HEADER - 1)?;
        for field in [
            FRAME_CONT,
            FRAME_CLAUSE,
            FRAME_SAVED_GT,
            FRAME_SAVED_TT,
            FRAME_SAVED_LT,
            FRAME_PREV_CP,
        ] {
            self.set_frame_field(base, field, 0)?;
        }
        self.set_frame_field(base, FRAME_PARENT, self.sf.unwrap_or(0))?;
        self.tf = Some(base);
        trace!(target: "zipr::machine", frame = base, "push target frame");
        Ok(base)
    }

    /// Reverse a target-frame allocation that will not be promoted.
    pub fn pop_target_frame(&mut self) -> MachineResult<()> {
        let frame = self
            .tf
            .take()
            .ok_or(MachineError::Precondition("no target frame to discard"))?;
        debug_assert!(
            self.cp.map_or(true, |cp| cp < frame),
            "a choice point cannot sit above an unpromoted frame"
        );
        self.store.truncate_local(frame);
        Ok(())
    }

    /// Promote the target frame to a choice point that will retry
    /// `backtrack_clause` (a clause pool index) on failure.
    pub fn push_choice_point(&mut self, backtrack_clause: usize) -> MachineResult<()> {
        let frame = self.tf.ok_or(MachineError::Precondition(
            "choice point requires a target frame",
        ))?;
        self.set_frame_field(frame, FRAME_CLAUSE, backtrack_clause)?;
        self.set_frame_field(frame, FRAME_SAVED_GT, self.store.global_top())?;
        self.set_frame_field(frame, FRAME_SAVED_TT, self.store.trail_top())?;
        self.set_frame_field(frame, FRAME_SAVED_LT, self.store.local_top())?;
        self.set_frame_field(frame, FRAME_PREV_CP, self.cp.unwrap_or(0))?;
        self.cp = Some(frame);
        trace!(
            target: "zipr::machine",
            frame,
            clause = backtrack_clause,
            "push choice point"
        );
        Ok(())
    }

    /// Finalise the target frame as the activation of the called clause;
    /// returns the frame's address.
    pub fn push_source_frame(&mut self, nparams: usize, nvars: usize) -> MachineResult<Addr> {
        let frame = self
            .tf
            .take()
            .ok_or(MachineError::Precondition("enter without a target frame"))?;
        debug_assert!(
            self.store.local_top() >= self.var_addr(frame, nparams),
            "caller did not fill every parameter slot"
        );
        if nvars > 0 {
            // Extend the frame to its full extent so later allocations land
            // above even the untouched variables.
            self.store.touch(self.var_addr(frame, nvars - 1))?;
        }
        self.sf = Some(frame);
        Ok(frame)
    }

    /// Return control to the caller. True iff the returning frame was the
    /// query frame, i.e. execution is complete.
    pub fn pop_source_frame(&mut self) -> MachineResult<bool> {
        let frame = self
            .sf
            .ok_or(MachineError::Precondition("return without a source frame"))?;
        let Some(parent) = self.frame_parent(frame)? else {
            return Ok(true);
        };
        self.pc = self.frame_cont(frame)?;
        self.sf = Some(parent);
        // The frame's storage must persist while a choice point at or above
        // it is live.
        if self.cp.map_or(true, |cp| cp < frame) {
            self.store.truncate_local(frame);
        }
        Ok(false)
    }

    /// Undo to the latest choice point and select its next clause. Returns
    /// the code address to resume at, or None when no choice point is left.
    /// Addresses of cells reset to unbound are appended to `vars_out`,
    /// which must be empty on entry.
    pub fn backtrack(&mut self, vars_out: &mut Vec<Addr>) -> MachineResult<Option<Addr>> {
        if !vars_out.is_empty() {
            return Err(MachineError::Precondition(
                "backtrack requires an empty output buffer",
            ));
        }
        let Some(cp) = self.cp else {
            trace!(target: "zipr::machine", "backtrack with no choice point");
            return Ok(None);
        };

        let saved_gt = self.frame_field(cp, FRAME_SAVED_GT)?;
        let saved_tt = self.frame_field(cp, FRAME_SAVED_TT)?;
        let saved_lt = self.frame_field(cp, FRAME_SAVED_LT)?;
        let clause_index = self.frame_field(cp, FRAME_CLAUSE)?;

        // Replay the trail before truncating: a trailed local cell may sit
        // above the saved local top, and its reset must land while the cell
        // still exists.
        while self.store.trail_top() > saved_tt {
            let Some(addr) = self.store.trail_pop() else {
                break;
            };
            self.store.write_word(addr, Word::unbound(addr))?;
            vars_out.push(addr);
        }
        self.store.truncate_global(saved_gt);
        self.store.truncate_local(saved_lt);
        // A failed match can abandon traversal entries mid-structure.
        self.store.pad_clear();

        self.tf = Some(cp);
        self.sf = self.frame_parent(cp)?;

        let clause = self.code.clause_at(clause_index)?;
        match clause.next {
            Some(next) => {
                // More alternatives behind this one: the choice point stays
                // live and will retry the next clause.
                self.set_frame_field(cp, FRAME_CLAUSE, next)?;
            }
            None => {
                let prev = self.frame_field(cp, FRAME_PREV_CP)?;
                self.cp = if prev == 0 { None } else { Some(prev) };
            }
        }
        debug!(
            target: "zipr::machine",
            frame = cp,
            retry = clause.addr,
            undone = vars_out.len(),
            "backtrack"
        );
        Ok(Some(clause.addr))
    }
}
