//! Data regions: global stack, local stack, trail, scratchpad
//!
//! All four regions live in one store and share a single address space. The
//! global stack (heap) occupies addresses `[0, global capacity)`; the local
//! stack starts at `local_base`, so any global address is numerically lower
//! than any local address. That makes the region-aware age ordering a plain
//! integer comparison: lower address means older cell.
//!
//! Local cells come into existence on first touch and are initialised to an
//! unbound self-reference, which is what gives frames their lazily
//! initialised variable cells. Regions never grow past their configured
//! capacity; exhaustion is a fatal error.

use super::opcode::Mode;
use super::word::Word;
use super::{Addr, MachineConfig, MachineError, MachineResult};

/// One scratchpad entry. The scratchpad has exactly two consumers: compound
/// traversal (`Resume` entries record where the cursor continues and which
/// mode to restore) and structural unification (`Work` entries are pending
/// cell pairs).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PadEntry {
    Resume { at: Addr, mode: Mode },
    Work { left: Addr, right: Addr },
}

/// The machine's data regions.
#[derive(Debug)]
pub struct DataStore {
    global: Vec<Word>,
    local: Vec<Word>,
    trail: Vec<Addr>,
    pad: Vec<PadEntry>,
    local_base: usize,
    local_limit: usize,
    trail_limit: usize,
    pad_limit: usize,
}

impl DataStore {
    pub fn new(config: &MachineConfig) -> Self {
        // A zero-sized heap would collapse the two address ranges.
        let local_base = config.global_capacity.max(1);
        DataStore {
            global: Vec::new(),
            local: Vec::new(),
            trail: Vec::new(),
            pad: Vec::new(),
            local_base,
            local_limit: config.local_capacity,
            trail_limit: config.trail_capacity,
            pad_limit: config.scratch_capacity,
        }
    }

    /// Empty every region; used by `reset` before a fresh query run.
    pub fn reset(&mut self) {
        self.global.clear();
        self.local.clear();
        self.trail.clear();
        self.pad.clear();
    }

    /// First address of the local stack.
    #[inline]
    pub fn local_base(&self) -> Addr {
        self.local_base
    }

    /// True iff `addr` lies on the local stack.
    #[inline]
    pub fn is_local(&self, addr: Addr) -> bool {
        addr >= self.local_base
    }

    /// Current top of the global stack (one past the last cell).
    #[inline]
    pub fn global_top(&self) -> Addr {
        self.global.len()
    }

    /// Current top of the local stack (one past the last cell).
    #[inline]
    pub fn local_top(&self) -> Addr {
        self.local_base + self.local.len()
    }

    /// Current top of the trail.
    #[inline]
    pub fn trail_top(&self) -> usize {
        self.trail.len()
    }

    /// Random access to any existing cell; reference chains are not
    /// followed.
    pub fn read_word(&self, addr: Addr) -> MachineResult<Word> {
        if addr >= self.local_base {
            self.local
                .get(addr - self.local_base)
                .copied()
                .ok_or(MachineError::AddressOutOfBounds(addr))
        } else {
            self.global
                .get(addr)
                .copied()
                .ok_or(MachineError::AddressOutOfBounds(addr))
        }
    }

    /// Unconditional write; the caller arranges trailing where the write is
    /// a binding.
    pub fn write_word(&mut self, addr: Addr, word: Word) -> MachineResult<()> {
        if addr >= self.local_base {
            let idx = addr - self.local_base;
            match self.local.get_mut(idx) {
                Some(cell) => {
                    *cell = word;
                    Ok(())
                }
                None => Err(MachineError::AddressOutOfBounds(addr)),
            }
        } else {
            match self.global.get_mut(addr) {
                Some(cell) => {
                    *cell = word;
                    Ok(())
                }
                None => Err(MachineError::AddressOutOfBounds(addr)),
            }
        }
    }

    /// Make sure the local cell at `addr` exists, growing the local stack
    /// with unbound cells up to and including it.
    pub fn touch(&mut self, addr: Addr) -> MachineResult<()> {
        if !self.is_local(addr) {
            // Global cells exist only once pushed.
            return if addr < self.global.len() {
                Ok(())
            } else {
                Err(MachineError::AddressOutOfBounds(addr))
            };
        }
        let idx = addr - self.local_base;
        if idx >= self.local_limit {
            return Err(MachineError::RegionOverflow {
                region: "local stack",
                limit: self.local_limit,
            });
        }
        while self.local.len() <= idx {
            let cell_addr = self.local_base + self.local.len();
            self.local.push(Word::unbound(cell_addr));
        }
        Ok(())
    }

    /// Follow reference links until a non-reference word or an unbound
    /// self-reference; returns the final address and its contents.
    pub fn deref(&self, addr: Addr) -> MachineResult<(Addr, Word)> {
        let mut at = addr;
        loop {
            let word = self.read_word(at)?;
            if word.is_ref() && word.payload() != at {
                at = word.payload();
            } else {
                return Ok((at, word));
            }
        }
    }

    /// Append one cell to the global stack.
    pub fn push_global(&mut self, word: Word) -> MachineResult<Addr> {
        if self.global.len() >= self.local_base {
            return Err(MachineError::RegionOverflow {
                region: "global stack",
                limit: self.local_base,
            });
        }
        let addr = self.global.len();
        self.global.push(word);
        Ok(addr)
    }

    /// Append a fresh unbound cell to the global stack.
    pub fn push_global_unbound(&mut self) -> MachineResult<Addr> {
        let addr = self.global.len();
        self.push_global(Word::unbound(addr))
    }

    /// Drop every global cell at or above `top`.
    pub fn truncate_global(&mut self, top: Addr) {
        self.global.truncate(top);
    }

    /// Drop every local cell at or above `top`.
    pub fn truncate_local(&mut self, top: Addr) {
        self.local.truncate(top.saturating_sub(self.local_base));
    }

    pub fn trail_push(&mut self, addr: Addr) -> MachineResult<()> {
        if self.trail.len() >= self.trail_limit {
            return Err(MachineError::RegionOverflow {
                region: "trail",
                limit: self.trail_limit,
            });
        }
        self.trail.push(addr);
        Ok(())
    }

    pub fn trail_pop(&mut self) -> Option<Addr> {
        self.trail.pop()
    }

    pub fn pad_push(&mut self, entry: PadEntry) -> MachineResult<()> {
        if self.pad.len() >= self.pad_limit {
            return Err(MachineError::RegionOverflow {
                region: "scratchpad",
                limit: self.pad_limit,
            });
        }
        self.pad.push(entry);
        Ok(())
    }

    pub fn pad_pop(&mut self) -> Option<PadEntry> {
        self.pad.pop()
    }

    #[inline]
    pub fn pad_len(&self) -> usize {
        self.pad.len()
    }

    pub fn pad_truncate(&mut self, len: usize) {
        self.pad.truncate(len);
    }

    pub fn pad_clear(&mut self) {
        self.pad.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::word::Tag;

    fn small_store() -> DataStore {
        DataStore::new(&MachineConfig {
            global_capacity: 64,
            local_capacity: 64,
            trail_capacity: 8,
            scratch_capacity: 8,
            trace: false,
        })
    }

    #[test]
    fn test_regions_are_disjoint() {
        let mut store = small_store();
        let g = store.push_global(Word::constant(0)).unwrap();
        assert!(!store.is_local(g));
        let l = store.local_base();
        store.touch(l).unwrap();
        assert!(store.is_local(l));
        assert!(g < l, "global addresses order below local addresses");
    }

    #[test]
    fn test_touch_initialises_unbound() {
        let mut store = small_store();
        let base = store.local_base();
        store.touch(base + 3).unwrap();
        // Every cell up to the touched one exists and is self-referential.
        for i in 0..4 {
            let w = store.read_word(base + i).unwrap();
            assert!(w.is_unbound_at(base + i), "cell {} not unbound", i);
        }
        assert_eq!(store.local_top(), base + 4);
    }

    #[test]
    fn test_deref_follows_chains() {
        let mut store = small_store();
        let a = store.push_global_unbound().unwrap();
        let b = store.push_global(Word::reference(a)).unwrap();
        let c = store.push_global(Word::reference(b)).unwrap();
        let (end, word) = store.deref(c).unwrap();
        assert_eq!(end, a);
        assert!(word.is_unbound_at(a));

        store.write_word(a, Word::constant(5)).unwrap();
        let (end, word) = store.deref(c).unwrap();
        assert_eq!(end, a);
        assert_eq!(word.tag(), Tag::Con);
    }

    #[test]
    fn test_out_of_bounds_read() {
        let store = small_store();
        assert!(matches!(
            store.read_word(0),
            Err(MachineError::AddressOutOfBounds(0))
        ));
        assert!(matches!(
            store.read_word(store.local_base()),
            Err(MachineError::AddressOutOfBounds(_))
        ));
    }

    #[test]
    fn test_region_overflow() {
        let mut store = DataStore::new(&MachineConfig {
            global_capacity: 2,
            local_capacity: 2,
            trail_capacity: 1,
            scratch_capacity: 1,
            trace: false,
        });
        store.push_global_unbound().unwrap();
        store.push_global_unbound().unwrap();
        assert!(matches!(
            store.push_global_unbound(),
            Err(MachineError::RegionOverflow { region: "global stack", .. })
        ));

        let base = store.local_base();
        store.touch(base + 1).unwrap();
        assert!(matches!(
            store.touch(base + 2),
            Err(MachineError::RegionOverflow { region: "local stack", .. })
        ));

        store.trail_push(0).unwrap();
        assert!(store.trail_push(1).is_err());
    }

    #[test]
    fn test_truncate_discards_cells() {
        let mut store = small_store();
        store.push_global(Word::constant(1)).unwrap();
        store.push_global(Word::constant(2)).unwrap();
        store.truncate_global(1);
        assert_eq!(store.global_top(), 1);
        assert!(store.read_word(1).is_err());

        let base = store.local_base();
        store.touch(base + 2).unwrap();
        store.truncate_local(base + 1);
        assert_eq!(store.local_top(), base + 1);
    }
}
