//! Unification, binding and trailing
//!
//! Robinson-style structural unification without an occurs check. Bindings
//! are directed so that references always point from newer cells to older
//! ones (lower addresses, with the whole global region older than the local
//! region), which is what makes backtracking a pure truncation plus trail
//! replay. The trail records only bindings that an existing choice point
//! could need to undo.

use smallvec::SmallVec;
use tracing::trace;

use super::store::PadEntry;
use super::word::{Tag, Word};
use super::{Addr, Machine, MachineError, MachineResult};

/// Addresses written by one unification, newest last.
pub type BoundAddrs = SmallVec<[Addr; 8]>;

impl Machine {
    /// Bind the cells at `a1` and `a2`, at least one of which must hold a
    /// `REF`. Both addresses are expected to be dereferenced. Returns the
    /// address that was written.
    pub fn bind(&mut self, a1: Addr, a2: Addr) -> MachineResult<Addr> {
        let w1 = self.store.read_word(a1)?;
        let w2 = self.store.read_word(a2)?;
        let written = match (w1.is_ref(), w2.is_ref()) {
            (true, true) => {
                if a1 == a2 {
                    return Ok(a1);
                }
                // Point the younger cell at the older one.
                let (younger, older) = if a1 > a2 { (a1, a2) } else { (a2, a1) };
                self.store.write_word(younger, Word::reference(older))?;
                younger
            }
            // Against a non-reference, copy the value word into the unbound
            // cell; pointing at its location could direct an older cell at a
            // younger one.
            (true, false) => {
                self.store.write_word(a1, w2)?;
                a1
            }
            (false, true) => {
                self.store.write_word(a2, w1)?;
                a2
            }
            (false, false) => {
                return Err(MachineError::Precondition("bind requires an unbound cell"))
            }
        };
        self.trail(written)?;
        trace!(target: "zipr::machine", addr = written, "bind");
        Ok(written)
    }

    /// Record `addr` on the trail iff a choice point exists and the binding
    /// would survive its truncation: local-stack cells always, global cells
    /// only below the choice point's saved global top.
    pub fn trail(&mut self, addr: Addr) -> MachineResult<()> {
        let Some(cp) = self.cp else {
            return Ok(());
        };
        let saved_gt = self.frame_saved_gt(cp)?;
        if self.store.is_local(addr) || addr < saved_gt {
            self.store.trail_push(addr)?;
        }
        Ok(())
    }

    /// Attempt full structural unification of the terms at `a1` and `a2`,
    /// using the scratchpad as an explicit work list. Returns the addresses
    /// bound along the way, or None on mismatch. Bindings made before a
    /// mismatch stay in place; backtracking undoes them.
    pub fn unifiable(&mut self, a1: Addr, a2: Addr) -> MachineResult<Option<BoundAddrs>> {
        let depth = self.store.pad_len();
        let mut bound = BoundAddrs::new();
        self.store.pad_push(PadEntry::Work {
            left: a1,
            right: a2,
        })?;

        while self.store.pad_len() > depth {
            let Some(PadEntry::Work { left, right }) = self.store.pad_pop() else {
                return Err(MachineError::Precondition(
                    "foreign entry on the unification work list",
                ));
            };
            let (la, lw) = self.store.deref(left)?;
            let (ra, rw) = self.store.deref(right)?;
            if la == ra {
                continue;
            }
            match (lw.tag(), rw.tag()) {
                (Tag::Ref, _) | (_, Tag::Ref) => {
                    bound.push(self.bind(la, ra)?);
                }
                (Tag::Con, Tag::Con) => {
                    if lw.payload() != rw.payload() {
                        self.store.pad_truncate(depth);
                        return Ok(None);
                    }
                }
                (Tag::Str, Tag::Str) => {
                    let lf = self.store.read_word(lw.payload())?;
                    let rf = self.store.read_word(rw.payload())?;
                    if lf.tag() != Tag::Fun || rf.tag() != Tag::Fun {
                        return Err(MachineError::CorruptTerm(lw.payload()));
                    }
                    if lf.payload() != rf.payload() {
                        self.store.pad_truncate(depth);
                        return Ok(None);
                    }
                    let arity = self.code.functor_at(lf.payload())?.arity as usize;
                    // Pushed in reverse so the pairs pop in left-to-right
                    // argument order.
                    for k in (0..arity).rev() {
                        self.store.pad_push(PadEntry::Work {
                            left: lw.payload() + 1 + k,
                            right: rw.payload() + 1 + k,
                        })?;
                    }
                }
                _ => {
                    self.store.pad_truncate(depth);
                    return Ok(None);
                }
            }
        }
        Ok(Some(bound))
    }
}

#[cfg(test)]
mod tests {
    use super::super::code::CodeStore;
    use super::super::symbol::ClauseSymbol;
    use super::*;

    /// Machine with interned functors a/0, b/0, f/2 and one dummy clause for
    /// choice-point tests. Returns (machine, a, b, f, clause).
    fn test_machine() -> (Machine, usize, usize, usize, usize) {
        let mut code = CodeStore::new();
        let a = code.intern_functor("a", 0).unwrap();
        let b = code.intern_functor("b", 0).unwrap();
        let f = code.intern_functor("f", 2).unwrap();
        let clause = code
            .push_clause(ClauseSymbol {
                addr: 0,
                nparams: 0,
                nvars: 0,
                next: None,
            })
            .unwrap();
        let mut machine = Machine::new(code);
        machine.reset(0).unwrap();
        (machine, a, b, f, clause)
    }

    /// Build f(x, y) on the heap from two already-pushed cells, returning
    /// the address of a cell holding the structure word.
    fn push_struct(machine: &mut Machine, f: usize, x: Word, y: Word) -> Addr {
        let block = machine.store.push_global(Word::functor(f)).unwrap();
        machine.store.push_global(x).unwrap();
        machine.store.push_global(y).unwrap();
        machine
            .store
            .push_global(Word::structure(block))
            .unwrap()
    }

    #[test]
    fn test_bind_points_younger_at_older() {
        let (mut machine, ..) = test_machine();
        let old = machine.store.push_global_unbound().unwrap();
        let young = machine.store.push_global_unbound().unwrap();
        let written = machine.bind(young, old).unwrap();
        assert_eq!(written, young);
        assert_eq!(machine.read_word(young).unwrap(), Word::reference(old));
        assert!(machine.read_word(old).unwrap().is_unbound_at(old));
    }

    #[test]
    fn test_bind_local_to_global() {
        let (mut machine, ..) = test_machine();
        let g = machine.store.push_global_unbound().unwrap();
        let l = machine.local_top();
        machine.store.touch(l).unwrap();
        // Local cells are younger than every global cell.
        let written = machine.bind(l, g).unwrap();
        assert_eq!(written, l);
        assert_eq!(machine.read_word(l).unwrap(), Word::reference(g));
    }

    #[test]
    fn test_bind_copies_value_words() {
        let (mut machine, a, ..) = test_machine();
        let var = machine.store.push_global_unbound().unwrap();
        let val = machine.store.push_global(Word::constant(a)).unwrap();
        let written = machine.bind(var, val).unwrap();
        assert_eq!(written, var);
        assert_eq!(machine.read_word(var).unwrap(), Word::constant(a));
    }

    #[test]
    fn test_bind_rejects_two_values() {
        let (mut machine, a, b, ..) = test_machine();
        let x = machine.store.push_global(Word::constant(a)).unwrap();
        let y = machine.store.push_global(Word::constant(b)).unwrap();
        assert!(matches!(
            machine.bind(x, y),
            Err(MachineError::Precondition(_))
        ));
    }

    #[test]
    fn test_trail_requires_choice_point() {
        let (mut machine, ..) = test_machine();
        let g = machine.store.push_global_unbound().unwrap();
        machine.trail(g).unwrap();
        assert_eq!(machine.trail_top(), 0, "no choice point, nothing trailed");
    }

    #[test]
    fn test_trail_skips_fresh_global_cells() {
        let (mut machine, _, _, _, clause) = test_machine();
        let old = machine.store.push_global_unbound().unwrap();
        machine.push_target_frame().unwrap();
        machine.push_choice_point(clause).unwrap();
        let fresh = machine.store.push_global_unbound().unwrap();

        machine.trail(old).unwrap();
        machine.trail(fresh).unwrap();
        // Only the cell below the saved global top needs an undo entry; the
        // fresh one vanishes with the truncation.
        assert_eq!(machine.trail_top(), 1);
    }

    #[test]
    fn test_unify_atoms() {
        let (mut machine, a, b, ..) = test_machine();
        let x = machine.store.push_global(Word::constant(a)).unwrap();
        let y = machine.store.push_global(Word::constant(a)).unwrap();
        let z = machine.store.push_global(Word::constant(b)).unwrap();
        assert!(machine.unifiable(x, y).unwrap().is_some());
        assert!(machine.unifiable(x, z).unwrap().is_none());
        assert_eq!(machine.store.pad_len(), 0, "work list fully drained");
    }

    #[test]
    fn test_unify_structures_binds_arguments() {
        let (mut machine, a, b, f, _) = test_machine();
        // f(X, a) against f(b, Y): X gets b, Y gets a.
        let x = machine.store.push_global_unbound().unwrap();
        let y = machine.store.push_global_unbound().unwrap();
        let left = push_struct(&mut machine, f, Word::reference(x), Word::constant(a));
        let right = push_struct(&mut machine, f, Word::constant(b), Word::reference(y));

        let bound = machine.unifiable(left, right).unwrap().expect("unifies");
        assert_eq!(bound.len(), 2);
        assert_eq!(machine.read_word(x).unwrap(), Word::constant(b));
        assert_eq!(machine.read_word(y).unwrap(), Word::constant(a));

        // Idempotent: repeating the unification binds nothing further.
        let again = machine.unifiable(left, right).unwrap().expect("unifies");
        assert!(again.is_empty());
    }

    #[test]
    fn test_unify_is_symmetric() {
        for flip in [false, true] {
            let (mut machine, a, b, f, _) = test_machine();
            let x = machine.store.push_global_unbound().unwrap();
            let left = push_struct(&mut machine, f, Word::reference(x), Word::constant(a));
            let right = push_struct(&mut machine, f, Word::constant(b), Word::constant(a));
            let (s1, s2) = if flip { (right, left) } else { (left, right) };
            let bound = machine.unifiable(s1, s2).unwrap().expect("unifies");
            assert_eq!(bound.len(), 1);
            assert_eq!(machine.read_word(x).unwrap(), Word::constant(b));
        }
    }

    #[test]
    fn test_unify_functor_mismatch_fails() {
        let (mut machine, a, _, f, _) = test_machine();
        let g = machine.code.intern_functor("g", 2).unwrap();
        let left = push_struct(&mut machine, f, Word::constant(a), Word::constant(a));
        let right = push_struct(&mut machine, g, Word::constant(a), Word::constant(a));
        assert!(machine.unifiable(left, right).unwrap().is_none());
    }

    #[test]
    fn test_bindings_round_trip_through_backtrack() {
        let (mut machine, a, _, f, clause) = test_machine();
        let x = machine.store.push_global_unbound().unwrap();
        let y = machine.store.push_global_unbound().unwrap();
        let left = push_struct(&mut machine, f, Word::reference(x), Word::reference(y));
        let right = push_struct(&mut machine, f, Word::constant(a), Word::constant(a));

        machine.push_target_frame().unwrap();
        machine.push_choice_point(clause).unwrap();
        let gt = machine.global_top();

        machine.unifiable(left, right).unwrap().expect("unifies");
        assert_eq!(machine.read_word(x).unwrap(), Word::constant(a));

        let mut undone = Vec::new();
        machine.backtrack(&mut undone).unwrap();
        assert_eq!(machine.global_top(), gt);
        // Every binding was undone to an unbound self-reference.
        assert!(machine.read_word(x).unwrap().is_unbound_at(x));
        assert!(machine.read_word(y).unwrap().is_unbound_at(y));
        assert_eq!(undone.len(), 2);
    }
}
