//! Allocation accounting.
//!
//! Objects are reference counted, so there is nothing to trace and
//! nothing to sweep. What remains of a collector is its contract with
//! running code: allocations accumulate debt, [`Heap::should_step`]
//! tells a frame that a collection step is due, and write barriers
//! are reported. Engines must honor all three exactly like a tracing
//! collector would require, and the counters let tests check that.

use std::rc::Rc;

use hashbrown::HashSet;
use rustc_hash::FxBuildHasher;

use super::value::LuaStr;

/// Bytes of allocation between two collection steps.
const STEP_SIZE: isize = 64 * 1024;

/// Strings up to this length are interned.
const MAX_SHORT_LEN: usize = 40;

pub struct Heap {
    debt: isize,
    strings: HashSet<Rc<str>, FxBuildHasher>,
    stats: HeapStats,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStats {
    pub allocated: u64,
    pub steps: u64,
    pub barriers: u64,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            debt: -STEP_SIZE,
            strings: HashSet::with_capacity_and_hasher(256, FxBuildHasher),
            stats: HeapStats::default(),
        }
    }

    #[inline]
    pub fn alloc(&mut self, bytes: usize) {
        self.debt += bytes as isize;
        self.stats.allocated += bytes as u64;
    }

    #[inline]
    pub fn should_step(&self) -> bool {
        self.debt > 0
    }

    /// One collection step. Drops interned strings nobody else holds.
    pub fn step(&mut self) {
        self.stats.steps += 1;
        self.strings.retain(|s| Rc::strong_count(s) > 1);
        self.debt = -STEP_SIZE;
    }

    /// An old object now references a possibly newer value.
    #[inline]
    pub fn barrier(&mut self) {
        self.stats.barriers += 1;
    }

    pub fn intern(&mut self, s: &str) -> LuaStr {
        if s.len() > MAX_SHORT_LEN {
            self.alloc(s.len());
            return LuaStr::new(Rc::from(s));
        }
        if let Some(existing) = self.strings.get(s) {
            return LuaStr::new(existing.clone());
        }
        self.alloc(s.len());
        let rc: Rc<str> = Rc::from(s);
        self.strings.insert(rc.clone());
        LuaStr::new(rc)
    }

    pub fn intern_owned(&mut self, s: String) -> LuaStr {
        if s.len() > MAX_SHORT_LEN {
            self.alloc(s.len());
            return LuaStr::new(Rc::from(s));
        }
        self.intern(&s)
    }

    #[inline]
    pub fn stats(&self) -> HeapStats {
        self.stats
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}
